//! SSH identities used by the SFTP daemon.
//!
//! The authorized-keys file is append-only and may hold duplicates; it is
//! read into a map keyed by the SHA-256 fingerprint of each key's wire
//! encoding, so a duplicate collapses onto the same entry.

mod guest;

pub use guest::{GuestKeypair, fetch_guest_keypair, install_guest_keypair};

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use russh_keys::PublicKeyBase64;
use russh_keys::key::PublicKey;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the marshalled public key.
pub fn fingerprint(key: &PublicKey) -> String {
    hex::encode(Sha256::digest(key.public_key_bytes()))
}

/// Parsed authorized-keys file.
#[derive(Default)]
pub struct AuthorizedKeys {
    keys: HashMap<String, PublicKey>,
}

impl std::fmt::Debug for AuthorizedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedKeys")
            .field("fingerprints", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AuthorizedKeys {
    /// Read and parse the file at `path`. A missing file yields an empty set.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or any entry is malformed.
    pub fn load(path: &Path) -> HostlinkResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "authorized keys file missing");
                Ok(Self::default())
            }
            Err(e) => Err(HostlinkError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Parse OpenSSH `authorized_keys` text.
    ///
    /// Blank lines and `#` comments are skipped. Leading key options are
    /// tolerated; the key type token marks where the key starts.
    pub fn parse(text: &str) -> HostlinkResult<Self> {
        let mut keys = HashMap::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let tokens: Vec<&str> = line.split_whitespace().collect();
            let encoded = tokens
                .iter()
                .position(|t| is_key_type(t))
                .and_then(|i| tokens.get(i + 1))
                .ok_or_else(|| {
                    HostlinkError::Config(format!(
                        "invalid authorized key on line {}",
                        lineno + 1
                    ))
                })?;

            let key = russh_keys::parse_public_key_base64(encoded).map_err(|e| {
                HostlinkError::Config(format!(
                    "invalid authorized key on line {}: {}",
                    lineno + 1,
                    e
                ))
            })?;
            keys.insert(fingerprint(&key), key);
        }

        Ok(Self { keys })
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys.contains_key(&fingerprint(key))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn is_key_type(token: &str) -> bool {
    token.starts_with("ssh-") || token.starts_with("ecdsa-sha2-") || token.starts_with("sk-")
}

/// Append one public-key line to the authorized-keys file, creating it if needed.
pub fn append_authorized_key(path: &Path, public_key: &str) -> HostlinkResult<()> {
    let line = public_key.trim();
    AuthorizedKeys::parse(line)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(|e| {
        HostlinkError::Storage(format!("Failed to open {}: {}", path.display(), e))
    })?;
    writeln!(file, "{}", line).map_err(|e| {
        HostlinkError::Storage(format!("Failed to append to {}: {}", path.display(), e))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ALICE: &str = include_str!("testdata/alice_ed25519.pub");
    const GUEST: &str = include_str!("testdata/guest_rsa.pub");

    fn parse_one(line: &str) -> PublicKey {
        let encoded = line.split_whitespace().nth(1).unwrap();
        russh_keys::parse_public_key_base64(encoded).unwrap()
    }

    #[test]
    fn test_parse_and_lookup() {
        let keys = AuthorizedKeys::parse(&format!("# comment\n\n{}{}", ALICE, GUEST)).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&parse_one(ALICE)));
        assert!(keys.contains(&parse_one(GUEST)));
    }

    #[test]
    fn test_duplicates_collapse() {
        let keys = AuthorizedKeys::parse(&format!("{}{}{}", ALICE, ALICE, ALICE)).unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_options_prefix_tolerated() {
        let line = format!("no-pty,no-agent-forwarding {}", ALICE);
        let keys = AuthorizedKeys::parse(&line).unwrap();
        assert!(keys.contains(&parse_one(ALICE)));
    }

    #[test]
    fn test_malformed_entry_fails() {
        assert!(AuthorizedKeys::parse("garbage line here").is_err());
        assert!(AuthorizedKeys::parse("ssh-ed25519 !!!notbase64").is_err());
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = fingerprint(&parse_one(ALICE));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(fp, fingerprint(&parse_one(GUEST)));
    }

    #[test]
    fn test_append_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certs/authorized_keys");

        assert!(AuthorizedKeys::load(&path).unwrap().is_empty());
        append_authorized_key(&path, ALICE).unwrap();
        append_authorized_key(&path, ALICE).unwrap();
        append_authorized_key(&path, GUEST).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(AuthorizedKeys::load(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_append_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("authorized_keys");
        assert!(append_authorized_key(&path, "not a key").is_err());
        assert!(!path.exists());
    }
}
