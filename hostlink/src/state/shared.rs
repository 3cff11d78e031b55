use serde::{Deserialize, Serialize};

use crate::hostfolder::HostFolder;

/// Document shared by every profile: daemon PIDs and global host folders.
///
/// A PID of 0 means "never started".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedState {
    pub sftpd_pid: u32,
    pub proxy_pid: u32,
    pub systray_pid: u32,
    pub host_folders_global: Vec<HostFolder>,
    pub active_profile: String,
}
