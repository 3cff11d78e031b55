//! Host-folder definitions as stored in the state documents.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use serde::{Deserialize, Serialize};

/// Recognised option keys.
pub mod keys {
    pub const UNC_PATH: &str = "uncpath";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const DOMAIN: &str = "domain";
    pub const MOUNTPOINT: &str = "mountpoint";
    pub const SOURCE: &str = "source";
    pub const EXTRA_OPTIONS: &str = "extra-options";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostFolderKind {
    Cifs,
    Sshfs,
}

impl HostFolderKind {
    fn allowed_options(self) -> &'static [&'static str] {
        match self {
            HostFolderKind::Cifs => &[
                keys::UNC_PATH,
                keys::USERNAME,
                keys::PASSWORD,
                keys::DOMAIN,
                keys::MOUNTPOINT,
            ],
            HostFolderKind::Sshfs => &[keys::SOURCE, keys::MOUNTPOINT, keys::EXTRA_OPTIONS],
        }
    }

    fn required_option(self) -> &'static str {
        match self {
            HostFolderKind::Cifs => keys::UNC_PATH,
            HostFolderKind::Sshfs => keys::SOURCE,
        }
    }
}

impl fmt::Display for HostFolderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostFolderKind::Cifs => f.write_str("cifs"),
            HostFolderKind::Sshfs => f.write_str("sshfs"),
        }
    }
}

impl FromStr for HostFolderKind {
    type Err = HostlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cifs" => Ok(HostFolderKind::Cifs),
            "sshfs" => Ok(HostFolderKind::Sshfs),
            other => Err(HostlinkError::Config(format!(
                "unknown host folder type {:?}; use cifs or sshfs",
                other
            ))),
        }
    }
}

/// Which document a definition lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Instance,
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Instance => f.write_str("instance"),
            Scope::Global => f.write_str("global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFolder {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: HostFolderKind,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl HostFolder {
    pub fn new(name: impl Into<String>, kind: HostFolderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// A non-empty option value.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Mountpoint in the guest: the `mountpoint` option, else `<base>/<name>`.
    pub fn mountpoint(&self, base: &str) -> String {
        match self.option(keys::MOUNTPOINT) {
            Some(mp) => mp.to_string(),
            None => format!("{}/{}", base.trim_end_matches('/'), self.name),
        }
    }

    /// What gets mounted: the UNC path for CIFS, the host path for SSHFS.
    pub fn source(&self) -> String {
        self.option(self.kind.required_option())
            .unwrap_or_default()
            .to_string()
    }

    /// Reject definitions the mount strategies cannot act on.
    pub fn validate(&self) -> HostlinkResult<()> {
        if self.name.is_empty() || self.name.contains('/') || self.name.contains(char::is_whitespace)
        {
            return Err(HostlinkError::Config(format!(
                "invalid host folder name {:?}",
                self.name
            )));
        }

        let allowed = self.kind.allowed_options();
        if let Some(key) = self.options.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(HostlinkError::Config(format!(
                "option {:?} is not valid for {} host folders",
                key, self.kind
            )));
        }

        let required = self.kind.required_option();
        if self.option(required).is_none() {
            return Err(HostlinkError::Config(format!(
                "{} host folder {} requires the {} option",
                self.kind, self.name, required
            )));
        }

        if self.kind == HostFolderKind::Sshfs && !self.source().starts_with('/') {
            return Err(HostlinkError::Config(format!(
                "sshfs source {:?} must be an absolute path",
                self.source()
            )));
        }

        if let Some(mp) = self.option(keys::MOUNTPOINT) {
            if !mp.starts_with('/') {
                return Err(HostlinkError::Config(format!(
                    "mountpoint {:?} must be an absolute path",
                    mp
                )));
            }
        }
        Ok(())
    }
}

/// One row of `hostfolder list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub name: String,
    pub kind: HostFolderKind,
    pub scope: Scope,
    pub source: String,
    pub mountpoint: String,
    /// `None` when the guest could not be inspected.
    pub mounted: Option<bool>,
}
