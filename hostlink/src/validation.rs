//! Validators for user-supplied network settings and profile names.

use std::net::{IpAddr, Ipv4Addr};

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use url::Url;

const MAX_NETMASK_PREFIX: u32 = 25;

/// `addr/prefix` with an IPv4 or IPv6 address and an in-range prefix length.
pub fn is_valid_cidr(cidr: &str) -> bool {
    let Some((addr, prefix)) = cidr.split_once('/') else {
        return false;
    };
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Ok(prefix) = prefix.parse::<u32>() else {
        return false;
    };
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => prefix <= 32,
        Ok(IpAddr::V6(_)) => prefix <= 128,
        Err(_) => false,
    }
}

pub fn is_valid_ipv4(address: &str) -> bool {
    address.parse::<Ipv4Addr>().is_ok()
}

/// Either a prefix length in `1..=25` or a canonical dotted-quad mask.
pub fn is_valid_netmask(mask: &str) -> bool {
    if !mask.is_empty() && mask.bytes().all(|b| b.is_ascii_digit()) {
        return matches!(mask.parse::<u32>(), Ok(p) if (1..=MAX_NETMASK_PREFIX).contains(&p));
    }

    let Ok(mask) = mask.parse::<Ipv4Addr>() else {
        return false;
    };
    let bits = u32::from(mask);
    let ones = bits.leading_ones();
    ones > 0 && bits.checked_shl(ones).unwrap_or(0) == 0
}

/// Unprivileged TCP ports.
pub fn is_valid_port(port: u32) -> bool {
    (1024..=65535).contains(&port)
}

/// A single path component: ASCII alphanumerics, `-`, `_` and `.`, not
/// starting with a dot.
pub fn is_valid_profile_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub fn validate_profile_name(name: &str) -> HostlinkResult<()> {
    if is_valid_profile_name(name) {
        Ok(())
    } else {
        Err(HostlinkError::Config(format!("invalid profile name {:?}", name)))
    }
}

/// Check a proxy URL. A URL without a scheme is taken as `http://`.
///
/// An empty string is accepted and means "no proxy".
pub fn validate_proxy_url(raw: &str) -> HostlinkResult<()> {
    if raw.is_empty() {
        return Ok(());
    }
    normalize_proxy_url(raw).map(|_| ())
}

/// Parse a proxy URL, defaulting the scheme to `http`.
pub fn normalize_proxy_url(raw: &str) -> HostlinkResult<Url> {
    let invalid = || HostlinkError::Config(format!("Proxy URL '{}' is not valid.", raw));

    let normalized = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let rest = normalized
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(invalid)?;
    if rest.contains("://") {
        return Err(invalid());
    }
    let authority = rest.split('/').next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    if host_port.is_empty() || host_port.starts_with(':') {
        return Err(invalid());
    }

    let url = Url::parse(&normalized).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(invalid()),
    }
}
