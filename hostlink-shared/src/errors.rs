//! Error type for every hostlink layer.
//!
//! Errors travel upward by value and carry a message meant for the user.
//! The only variant callers branch on is [`HostlinkError::AlreadyMounted`].

use thiserror::Error;

/// Result alias used across the workspace.
pub type HostlinkResult<T> = Result<T, HostlinkError>;

#[derive(Debug, Error)]
pub enum HostlinkError {
    /// Invalid flag, option string, or unknown kind. Raised before any daemon is touched.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The guest is not running, so nothing can be executed inside it.
    #[error("host is in the wrong state")]
    InvalidState,

    #[error("host folder is already mounted: {0}")]
    AlreadyMounted(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Non-zero exit or transport failure while running a command in the guest.
    #[error("guest command failed: {0}")]
    Guest(String),

    #[error("mount failed: {0}")]
    Mount(String),

    /// Spawn, bind, or key-load failure of a background daemon.
    #[error("daemon error: {0}")]
    Daemon(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HostlinkError {
    /// True for the user-visible "already mounted" no-op.
    pub fn is_already_mounted(&self) -> bool {
        matches!(self, HostlinkError::AlreadyMounted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        assert_eq!(
            HostlinkError::InvalidState.to_string(),
            "host is in the wrong state"
        );
    }

    #[test]
    fn test_already_mounted_is_distinguishable() {
        let err = HostlinkError::AlreadyMounted("Users".into());
        assert!(err.is_already_mounted());
        assert!(err.to_string().contains("host folder is already mounted"));
        assert!(!HostlinkError::Mount("boom".into()).is_already_mounted());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HostlinkError = io.into();
        assert!(matches!(err, HostlinkError::Io(_)));
    }
}
