//! Host-side service plane for a developer VM.
//!
//! The CLI spawns two background daemons on demand, an SFTP server used by
//! the guest to reverse-mount host directories and an HTTP forward proxy,
//! and drives host-folder mounts inside the guest through a [`guest::Driver`].

pub mod guest;
pub mod hostfolder;
pub mod keys;
pub mod layout;
pub mod logging;
pub mod profile;
pub mod proxy;
pub mod settings;
pub mod sftpd;
pub mod state;
pub mod supervisor;
pub mod util;
pub mod validation;

pub use hostlink_shared::{HostlinkError, HostlinkResult};
pub use layout::Layout;
