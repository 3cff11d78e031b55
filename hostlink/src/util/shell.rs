//! Quoting for command lines run by the guest's POSIX shell.

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | ':' | '@' | '%' | '+' | '=' | ',' | '-')
}

/// Quote `s` as a single shell word.
///
/// Words made only of unambiguous characters are returned unchanged so the
/// common command lines stay readable; anything else is single-quoted with
/// embedded quotes written as `'\''`.
pub fn quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(is_plain) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words_unchanged() {
        assert_eq!(quote("/mnt/sda1/src"), "/mnt/sda1/src");
        assert_eq!(quote("docker@192.168.99.1:/Users/joe"), "docker@192.168.99.1:/Users/joe");
        assert_eq!(quote("username=joe,password=pw"), "username=joe,password=pw");
    }

    #[test]
    fn test_metacharacters_are_quoted() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("x;reboot"), "'x;reboot'");
        assert_eq!(quote("$(id)"), "'$(id)'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_single_quote_is_escaped() {
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
