//! Fixed-count retry without backoff.

use hostlink_shared::errors::HostlinkResult;

/// Run `op` up to `attempts` times, returning the first success or the last error.
pub fn retry<T>(attempts: usize, mut op: impl FnMut() -> HostlinkResult<T>) -> HostlinkResult<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::debug!(attempt, error = %e, "retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
