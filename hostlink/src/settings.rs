//! Profile key-value settings (`<profile>/config/config.json`).
//!
//! A flat JSON object with kebab-case keys. Values present here take
//! precedence over daemon flags.

use serde::{Deserialize, Serialize};

use hostlink_shared::constants::{guest, ports};
use hostlink_shared::errors::{HostlinkError, HostlinkResult};

use crate::layout::ProfileLayout;
use crate::state::JsonStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostfolders_mountpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostfolders_automount: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostfolders_sftp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_proxy_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_proxy_upstream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_proxy_reencrypt: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_ssh_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_ssh_key: Option<String>,
}

impl Settings {
    pub fn store(profile: &ProfileLayout) -> JsonStore<Settings> {
        JsonStore::new(profile.config_path())
    }

    pub fn load(profile: &ProfileLayout) -> HostlinkResult<Self> {
        Self::store(profile).load()
    }

    /// Base directory for default host-folder mountpoints in the guest.
    pub fn mount_base(&self) -> &str {
        self.hostfolders_mountpath
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(guest::DEFAULT_MOUNT_BASE)
    }

    pub fn sftp_port(&self) -> u16 {
        self.hostfolders_sftp_port.unwrap_or(ports::SFTPD)
    }

    pub fn automount(&self) -> bool {
        self.hostfolders_automount.unwrap_or(false)
    }

    pub fn proxy_port(&self) -> u16 {
        self.local_proxy_port.unwrap_or(ports::PROXY)
    }

    /// Set one key from its kebab-case name and string value.
    pub fn set(&mut self, key: &str, value: &str) -> HostlinkResult<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> HostlinkResult<T> {
            value.parse().map_err(|_| {
                HostlinkError::Config(format!("invalid value {:?} for {}", value, key))
            })
        }

        match key {
            "hostfolders-mountpath" => self.hostfolders_mountpath = Some(value.to_string()),
            "hostfolders-automount" => self.hostfolders_automount = Some(parse(key, value)?),
            "hostfolders-sftp-port" => self.hostfolders_sftp_port = Some(parse(key, value)?),
            "local-proxy-port" => self.local_proxy_port = Some(parse(key, value)?),
            "local-proxy-upstream" => self.local_proxy_upstream = Some(value.to_string()),
            "local-proxy-reencrypt" => self.local_proxy_reencrypt = Some(parse(key, value)?),
            "guest-ip" => self.guest_ip = Some(value.to_string()),
            "guest-ssh-port" => self.guest_ssh_port = Some(parse(key, value)?),
            "guest-ssh-key" => self.guest_ssh_key = Some(value.to_string()),
            other => {
                return Err(HostlinkError::Config(format!("unknown setting {}", other)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.mount_base(), "/mnt/sda1");
        assert_eq!(settings.sftp_port(), 2022);
        assert_eq!(settings.proxy_port(), 3128);
        assert!(!settings.automount());
    }

    #[test]
    fn test_kebab_case_keys() {
        let settings: Settings = serde_json::from_str(
            r#"{"hostfolders-mountpath":"/mnt/data","hostfolders-sftp-port":2200,"local-proxy-reencrypt":true}"#,
        )
        .unwrap();
        assert_eq!(settings.mount_base(), "/mnt/data");
        assert_eq!(settings.sftp_port(), 2200);
        assert_eq!(settings.local_proxy_reencrypt, Some(true));
    }

    #[test]
    fn test_set_validates_values() {
        let mut settings = Settings::default();
        settings.set("local-proxy-port", "8080").unwrap();
        assert_eq!(settings.proxy_port(), 8080);

        assert!(settings.set("local-proxy-port", "http").is_err());
        assert!(settings.set("no-such-key", "1").is_err());
    }
}
