//! JSON state documents persisted with all-or-nothing writes.
//!
//! Every document is a plain serde type. [`JsonStore`] owns the path and
//! implements the load/write/delete contract:
//!
//! - `load` synthesises and writes a default document when the file is missing,
//!   and fails on a parse error instead of overwriting.
//! - `write` produces indented JSON (mode 0644) in a temp file beside the target,
//!   then renames it over the target, so readers never see a partial document.
//! - `update` wraps load-modify-write in an inter-process [`StateLock`].

mod instance;
mod lock;
mod shared;

pub use instance::InstanceState;
pub use lock::StateLock;
pub use shared::SharedState;

use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

/// Handle to one JSON document on disk.
#[derive(Debug)]
pub struct JsonStore<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonStore<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _doc: PhantomData,
        }
    }
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, creating it with default content if absent.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed, or if the
    /// default document cannot be written.
    pub fn load(&self) -> HostlinkResult<T> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "state file missing, writing default");
                let doc = T::default();
                self.write(&doc)?;
                return Ok(doc);
            }
            Err(e) => {
                return Err(HostlinkError::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        serde_json::from_slice(&raw).map_err(|e| {
            HostlinkError::Storage(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    /// Atomically replace the document on disk.
    pub fn write(&self, doc: &T) -> HostlinkResult<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| {
            HostlinkError::Storage(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;

        let mut json = serde_json::to_vec_pretty(doc)?;
        json.push(b'\n');

        let storage_err = |e: std::io::Error| {
            HostlinkError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
        };

        let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
        tmp.write_all(&json).map_err(storage_err)?;
        tmp.as_file().sync_all().map_err(storage_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(storage_err)?;
        }

        tmp.persist(&self.path)
            .map_err(|e| storage_err(e.error))?;
        Ok(())
    }

    /// Remove the document. A missing file is not an error.
    pub fn delete(&self) -> HostlinkResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HostlinkError::Storage(format!(
                "Failed to delete {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Load, mutate, and persist under the document's lock.
    ///
    /// The document is written only when `f` succeeds.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> HostlinkResult<R>) -> HostlinkResult<R> {
        let _lock = StateLock::acquire(&self.path)?;
        let mut doc = self.load()?;
        let out = f(&mut doc)?;
        self.write(&doc)?;
        Ok(out)
    }
}
