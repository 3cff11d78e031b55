//! Tracing subscriber setup for the CLI and the daemons.
//!
//! Everything goes to stderr, filtered by `RUST_LOG`. Daemons run detached
//! with stderr pointed at `/dev/null`, so they also write
//! `<home>/logs/<daemon>.log`.

use std::path::PathBuf;

use hostlink_shared::constants::envs;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::layout::Layout;

/// Keeps the file writer flushing; hold it until the process exits.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(envs::RUST_LOG).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Log file for `daemon` under the hostlink home.
pub fn log_path(layout: &Layout, daemon: &str) -> PathBuf {
    layout.logs_dir().join(format!("{}.log", daemon))
}

/// Install the global subscriber.
///
/// `daemon` names the log file and raises the default level to `info`;
/// CLI commands pass `None` and default to `warn`, or `debug` with `verbose`.
/// A second call in the same process is ignored.
pub fn init(layout: &Layout, daemon: Option<&str>, verbose: bool) -> LogGuard {
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let Some(daemon) = daemon else {
        let default = if verbose { "debug" } else { "warn" };
        let _ = tracing_subscriber::registry()
            .with(filter(default))
            .with(stderr)
            .try_init();
        return LogGuard { _file_guard: None };
    };

    let dir = layout.logs_dir();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("cannot create log directory {}: {}", dir.display(), e);
    }
    let appender = tracing_appender::rolling::never(&dir, format!("{}.log", daemon));
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    let _ = tracing_subscriber::registry()
        .with(filter(if verbose { "debug" } else { "info" }))
        .with(stderr)
        .with(file_layer)
        .try_init();

    LogGuard {
        _file_guard: Some(guard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_path() {
        let layout = Layout::new("/tmp/hl");
        assert_eq!(log_path(&layout, "sftpd"), PathBuf::from("/tmp/hl/logs/sftpd.log"));
    }

    #[test]
    fn test_daemon_init_creates_log_dir() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        let guard = init(&layout, Some("proxy"), false);
        assert!(layout.logs_dir().is_dir());
        drop(guard);
    }
}
