//! Running shell commands inside the guest VM.
//!
//! VM lifecycle lives elsewhere; this crate only needs a handle that can run
//! a command in the guest over SSH and report the guest's state and address.

mod network;
mod ssh;

#[cfg(test)]
pub mod mock;

pub use network::host_ip_for;
pub use ssh::SshDriver;

use std::net::IpAddr;

use hostlink_shared::errors::HostlinkResult;

/// Synchronous "run this in the guest" primitive.
///
/// Returns stdout on success. A non-zero exit becomes an error whose message
/// carries stderr.
pub trait GuestBridge: Send + Sync {
    fn run(&self, cmd: &str) -> HostlinkResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestState {
    Running,
    Stopped,
}

/// A guest VM handle as consumed by the host-folder manager.
pub trait Driver: GuestBridge {
    fn name(&self) -> &str;

    fn state(&self) -> HostlinkResult<GuestState>;

    /// The guest's IP address.
    fn ip(&self) -> HostlinkResult<IpAddr>;

    /// This host's address on the network shared with the guest.
    fn host_ip(&self) -> HostlinkResult<IpAddr> {
        host_ip_for(self.ip()?)
    }
}
