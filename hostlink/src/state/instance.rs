use serde::{Deserialize, Serialize};

use crate::hostfolder::HostFolder;

/// Per-profile state of the guest VM and its instance-scoped host folders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceState {
    pub vm_driver: String,
    pub oc_path: String,
    pub is_registered: bool,
    pub is_rhel_based: bool,
    pub timezone: String,
    pub host_folders_instance: Vec<HostFolder>,
    pub openshift_version: String,
    pub supports_network_assignment: bool,
    pub supports_dnsmasq: bool,
}
