//! Advisory inter-process lock around read-modify-write of a state document.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use hostlink_shared::constants::filenames;
use hostlink_shared::errors::{HostlinkError, HostlinkResult};

/// Exclusive lock on `<document>.lock`, released when dropped.
///
/// On Windows the lock file is created but not locked.
#[derive(Debug)]
pub struct StateLock {
    _file: File,
    path: PathBuf,
}

impl StateLock {
    /// Block until the lock for `document` is held.
    pub fn acquire(document: &Path) -> HostlinkResult<Self> {
        let mut name = document.as_os_str().to_owned();
        name.push(filenames::LOCK_SUFFIX);
        let path = PathBuf::from(name);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                HostlinkError::Storage(format!(
                    "Failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        lock_exclusive(&file).map_err(|e| {
            HostlinkError::Storage(format!("Failed to lock {}: {}", path.display(), e))
        })?;

        tracing::trace!(lock = %path.display(), "acquired state lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // Closing the descriptor on drop releases the lock.
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_is_next_to_document() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("config.json");
        let lock = StateLock::acquire(&doc).unwrap();
        assert_eq!(lock.path(), dir.path().join("config.json.lock"));
        assert!(lock.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_excludes_second_holder_until_drop() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("config.json");
        let first = StateLock::acquire(&doc).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let flag = acquired.clone();
        let doc2 = doc.clone();
        let handle = std::thread::spawn(move || {
            let _second = StateLock::acquire(&doc2).unwrap();
            flag.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(first);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
