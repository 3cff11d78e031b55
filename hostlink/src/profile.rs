//! Named profiles, one directory each under `<home>/profiles`.

use hostlink_shared::errors::{HostlinkError, HostlinkResult};

use crate::layout::{Layout, ProfileLayout};
use crate::state::{JsonStore, SharedState};
use crate::validation::validate_profile_name;

/// Profile used when none has been selected.
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone)]
pub struct Profiles {
    layout: Layout,
    shared: JsonStore<SharedState>,
}

impl Profiles {
    pub fn new(layout: &Layout) -> Self {
        Self {
            layout: layout.clone(),
            shared: JsonStore::new(layout.shared_state_path()),
        }
    }

    /// Create the directory skeleton for `name`.
    pub fn add(&self, name: &str) -> HostlinkResult<ProfileLayout> {
        validate_profile_name(name)?;
        let profile = self.layout.profile(name);
        if profile.dir().exists() {
            return Err(HostlinkError::AlreadyExists(format!("profile {}", name)));
        }
        profile.prepare()?;
        tracing::info!(profile = name, "profile created");
        Ok(profile)
    }

    /// Delete the profile directory. Clears the active selection if it pointed here.
    pub fn remove(&self, name: &str) -> HostlinkResult<()> {
        validate_profile_name(name)?;
        let profile = self.layout.profile(name);
        if !profile.dir().is_dir() {
            return Err(HostlinkError::NotFound(format!("profile {}", name)));
        }
        std::fs::remove_dir_all(profile.dir()).map_err(|e| {
            HostlinkError::Storage(format!(
                "Failed to remove {}: {}",
                profile.dir().display(),
                e
            ))
        })?;

        self.shared.update(|doc| {
            if doc.active_profile == name {
                doc.active_profile.clear();
            }
            Ok(())
        })?;
        tracing::info!(profile = name, "profile removed");
        Ok(())
    }

    /// Profile names in sorted order.
    pub fn list(&self) -> HostlinkResult<Vec<String>> {
        let entries = match std::fs::read_dir(self.layout.profiles_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn set_active(&self, name: &str) -> HostlinkResult<()> {
        validate_profile_name(name)?;
        if !self.layout.profile(name).dir().is_dir() {
            return Err(HostlinkError::NotFound(format!("profile {}", name)));
        }
        self.shared.update(|doc| {
            doc.active_profile = name.to_string();
            Ok(())
        })
    }

    /// The selected profile, or [`DEFAULT_PROFILE`].
    pub fn active(&self) -> HostlinkResult<String> {
        let doc = self.shared.load()?;
        if doc.active_profile.is_empty() {
            Ok(DEFAULT_PROFILE.to_string())
        } else {
            validate_profile_name(&doc.active_profile)?;
            Ok(doc.active_profile)
        }
    }
}
