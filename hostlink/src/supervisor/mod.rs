//! Lifecycle of the background daemons.
//!
//! The [`Supervisor`] launches each daemon as a detached child of the CLI,
//! records its PID in the shared state document, and offers idempotent
//! start/stop across CLI invocations.
//!
//! ## Architecture
//!
//! - **Launcher**: builds the command for a daemon kind (the current executable by default)
//! - **ServiceControl**: the narrow "make sure it runs" seam other components depend on

pub mod process_options;

use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::str::FromStr;
use std::sync::Arc;

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use parking_lot::Mutex;

use crate::layout::Layout;
use crate::state::{JsonStore, SharedState, StateLock};
use crate::util::process::{is_process_alive, is_same_process, terminate_process};

/// The daemons whose PIDs live in the shared state document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonKind {
    Sftpd,
    Proxy,
    SystemTray,
}

impl DaemonKind {
    pub const ALL: [DaemonKind; 3] = [DaemonKind::Sftpd, DaemonKind::Proxy, DaemonKind::SystemTray];

    pub fn name(self) -> &'static str {
        match self {
            DaemonKind::Sftpd => "sftpd",
            DaemonKind::Proxy => "proxy",
            DaemonKind::SystemTray => "systemtray",
        }
    }

    /// Arguments that make the hostlink binary run this daemon in the foreground.
    pub fn start_args(self) -> HostlinkResult<[&'static str; 2]> {
        match self {
            DaemonKind::Sftpd => Ok(["services", "sftpd"]),
            DaemonKind::Proxy => Ok(["services", "proxy"]),
            DaemonKind::SystemTray => Err(HostlinkError::Unsupported(
                "the system tray cannot be started by this binary".to_string(),
            )),
        }
    }

    pub fn pid_in(self, state: &SharedState) -> u32 {
        match self {
            DaemonKind::Sftpd => state.sftpd_pid,
            DaemonKind::Proxy => state.proxy_pid,
            DaemonKind::SystemTray => state.systray_pid,
        }
    }

    pub fn set_pid_in(self, state: &mut SharedState, pid: u32) {
        match self {
            DaemonKind::Sftpd => state.sftpd_pid = pid,
            DaemonKind::Proxy => state.proxy_pid = pid,
            DaemonKind::SystemTray => state.systray_pid = pid,
        }
    }
}

impl fmt::Display for DaemonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DaemonKind {
    type Err = HostlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DaemonKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                HostlinkError::Config(format!(
                    "unknown service {:?}; valid services are sftpd, proxy",
                    s
                ))
            })
    }
}

/// Builds the command that runs a daemon on behalf of `profile`.
pub trait Launcher: Send + Sync {
    fn command(&self, kind: DaemonKind, profile: &str) -> HostlinkResult<Command>;

    /// Whether `pid` is a daemon this launcher started.
    fn owns(&self, pid: u32, kind: DaemonKind) -> bool {
        is_same_process(pid, kind.name())
    }
}

/// Re-executes the running binary with `services <name> --profile <profile>`.
#[derive(Debug, Default)]
pub struct SelfLauncher;

impl Launcher for SelfLauncher {
    fn command(&self, kind: DaemonKind, profile: &str) -> HostlinkResult<Command> {
        let exe = std::env::current_exe().map_err(|e| {
            HostlinkError::Daemon(format!("cannot locate the hostlink executable: {}", e))
        })?;
        let mut cmd = Command::new(exe);
        cmd.args(kind.start_args()?);
        cmd.arg("--profile").arg(profile);
        Ok(cmd)
    }
}

/// Something that can make sure a daemon is up.
pub trait ServiceControl: Send + Sync {
    /// Start `kind` unless it is already live; returns its PID.
    fn ensure_running(&self, kind: DaemonKind) -> HostlinkResult<u32>;
}

/// Starts, checks and stops daemons, persisting PIDs in the shared state.
///
/// Daemons it starts serve `profile`: its host key, authorized keys and
/// settings.
pub struct Supervisor {
    home: PathBuf,
    profile: String,
    state: JsonStore<SharedState>,
    launcher: Arc<dyn Launcher>,
    /// Children spawned by this process, kept so exited ones can be reaped.
    children: Mutex<Vec<Child>>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state.path())
            .field("profile", &self.profile)
            .finish()
    }
}

impl Supervisor {
    pub fn new(layout: &Layout, profile: &str) -> Self {
        Self::with_launcher(layout, profile, Arc::new(SelfLauncher))
    }

    pub fn with_launcher(layout: &Layout, profile: &str, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            home: layout.home_dir().to_path_buf(),
            profile: profile.to_string(),
            state: JsonStore::new(layout.shared_state_path()),
            launcher,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Return the recorded PID of `kind` if that process is live, else 0.
    pub fn get_pid(&self, kind: DaemonKind) -> HostlinkResult<u32> {
        let pid = kind.pid_in(&self.state.load()?);
        Ok(if self.is_live(pid) { pid } else { 0 })
    }

    /// Send the terminate signal to `kind` if it is live and clear its PID.
    ///
    /// A PID that is live but belongs to some other program is cleared without
    /// being signalled.
    pub fn stop(&self, kind: DaemonKind) -> HostlinkResult<()> {
        self.state.update(|doc| {
            let pid = kind.pid_in(doc);
            if !self.is_live(pid) {
                tracing::debug!(daemon = %kind, "not running");
                kind.set_pid_in(doc, 0);
                return Ok(());
            }

            if !self.launcher.owns(pid, kind) {
                tracing::warn!(daemon = %kind, pid, "recorded PID belongs to another process");
                kind.set_pid_in(doc, 0);
                return Ok(());
            }

            if !terminate_process(pid) {
                return Err(HostlinkError::Daemon(format!(
                    "failed to stop {} (pid {})",
                    kind, pid
                )));
            }
            tracing::info!(daemon = %kind, pid, "stopped");
            kind.set_pid_in(doc, 0);
            Ok(())
        })?;
        self.reap();
        Ok(())
    }

    fn spawn(&self, kind: DaemonKind) -> HostlinkResult<Child> {
        let mut cmd = self.launcher.command(kind, &self.profile)?;
        process_options::detach(&mut cmd, &self.home);

        cmd.spawn().map_err(|e| {
            let err_msg = format!("Failed to spawn {} daemon: {}", kind, e);
            tracing::error!("{}", err_msg);
            HostlinkError::Daemon(err_msg)
        })
    }

    fn is_live(&self, pid: u32) -> bool {
        self.reap();
        is_process_alive(pid)
    }

    /// Collect exited children so their PIDs stop answering the liveness check.
    fn reap(&self) {
        self.children
            .lock()
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));
    }
}

impl ServiceControl for Supervisor {
    fn ensure_running(&self, kind: DaemonKind) -> HostlinkResult<u32> {
        let _lock = StateLock::acquire(self.state.path())?;
        let mut doc = self.state.load()?;

        let recorded = kind.pid_in(&doc);
        if self.is_live(recorded) {
            tracing::debug!(daemon = %kind, pid = recorded, "already running");
            self.state.write(&doc)?;
            return Ok(recorded);
        }

        let mut child = self.spawn(kind)?;
        let pid = child.id();
        kind.set_pid_in(&mut doc, pid);

        if let Err(e) = self.state.write(&doc) {
            tracing::error!(daemon = %kind, pid, error = %e, "failed to record PID, stopping daemon");
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        tracing::info!(daemon = %kind, pid, "started");
        self.children.lock().push(child);
        Ok(pid)
    }
}
