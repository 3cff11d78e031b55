//! Types shared between the hostlink library and its binary.

pub mod constants;
pub mod errors;

pub use errors::{HostlinkError, HostlinkResult};
