//! Parsing of `key=value,key=value` option strings from the command line.

use std::collections::BTreeMap;

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use regex::Regex;

const OPTION_STRING: &str = r"^([a-z-]+=[^,]*,)*([a-z-]+=[^,]*)$";

/// Parse an option string into a map.
///
/// # Errors
///
/// Returns a config error if the string does not match `k=v(,k=v)*` with
/// lowercase keys.
pub fn parse_option_string(raw: &str) -> HostlinkResult<BTreeMap<String, String>> {
    let pattern = Regex::new(OPTION_STRING)
        .map_err(|e| HostlinkError::Internal(format!("option string pattern: {}", e)))?;
    if !pattern.is_match(raw) {
        return Err(HostlinkError::Config(format!(
            "invalid option string {:?}; expected key=value[,key=value...]",
            raw
        )));
    }

    Ok(raw
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}
