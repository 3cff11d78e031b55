//! On-disk layout of the hostlink home and profile directories.

use std::path::{Path, PathBuf};

use hostlink_shared::constants::{envs, filenames};
use hostlink_shared::errors::{HostlinkError, HostlinkResult};

/// Root of all hostlink state (`$HOSTLINK_HOME`, else `~/.hostlink`).
///
/// Holds the shared state document, the daemon logs and one directory per
/// profile.
#[derive(Clone, Debug)]
pub struct Layout {
    home: PathBuf,
}

impl Layout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolve the home directory from the environment.
    ///
    /// # Errors
    ///
    /// Returns a config error when neither `HOSTLINK_HOME` nor a user home
    /// directory is available.
    pub fn from_env() -> HostlinkResult<Self> {
        if let Some(home) = std::env::var_os(envs::HOSTLINK_HOME) {
            return Ok(Self::new(home));
        }
        let user_home = dirs::home_dir().ok_or_else(|| {
            HostlinkError::Config(format!(
                "cannot determine home directory; set {}",
                envs::HOSTLINK_HOME
            ))
        })?;
        Ok(Self::new(user_home.join(filenames::DEFAULT_HOME)))
    }

    pub fn home_dir(&self) -> &Path {
        &self.home
    }

    /// The shared state document holding daemon PIDs and global host folders.
    pub fn shared_state_path(&self) -> PathBuf {
        self.home.join(filenames::CONFIG_JSON)
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.home.join(filenames::PROFILES_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join(filenames::LOGS_DIR)
    }

    pub fn profile(&self, name: &str) -> ProfileLayout {
        ProfileLayout {
            name: name.to_string(),
            dir: self.profiles_dir().join(name),
        }
    }
}

/// Paths inside one profile directory.
#[derive(Clone, Debug)]
pub struct ProfileLayout {
    name: String,
    dir: PathBuf,
}

impl ProfileLayout {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Key-value settings used by the CLI.
    pub fn config_path(&self) -> PathBuf {
        self.dir
            .join(filenames::CONFIG_DIR)
            .join(filenames::CONFIG_JSON)
    }

    /// Instance-state document for this profile's VM.
    pub fn instance_state_path(&self) -> PathBuf {
        self.dir
            .join(filenames::MACHINES_DIR)
            .join(&self.name)
            .join(filenames::CONFIG_JSON)
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.dir.join(filenames::CERTS_DIR)
    }

    pub fn authorized_keys_path(&self) -> PathBuf {
        self.certs_dir().join(filenames::AUTHORIZED_KEYS)
    }

    /// Host-side cache of the guest's private key; also the SFTP host key.
    pub fn private_key_path(&self) -> PathBuf {
        self.certs_dir().join(filenames::PRIVATE_KEY)
    }

    /// Create the profile's directory skeleton.
    pub fn prepare(&self) -> HostlinkResult<()> {
        for dir in [
            self.dir.join(filenames::CONFIG_DIR),
            self.dir.join(filenames::MACHINES_DIR).join(&self.name),
            self.certs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                HostlinkError::Storage(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}
