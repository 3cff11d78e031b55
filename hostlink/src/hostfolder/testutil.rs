use hostlink_shared::errors::HostlinkResult;
use parking_lot::Mutex;

use crate::guest::mock::MockDriver;
use crate::supervisor::{DaemonKind, ServiceControl};

/// Pretends every daemon starts, remembering which ones were asked for.
#[derive(Default)]
pub struct RecordingServices {
    started: Mutex<Vec<DaemonKind>>,
}

impl RecordingServices {
    pub fn started(&self) -> Vec<DaemonKind> {
        self.started.lock().clone()
    }
}

impl ServiceControl for RecordingServices {
    fn ensure_running(&self, kind: DaemonKind) -> HostlinkResult<u32> {
        self.started.lock().push(kind);
        Ok(4242)
    }
}

/// Make the guest hand out the keypair under `keys/testdata`.
pub fn script_guest_keys(driver: &MockDriver) {
    // `cat ...id_rsa.pub` also contains the private-key needle; the later rule wins.
    driver.on(
        "cat /home/docker/.ssh/id_rsa",
        include_str!("../keys/testdata/guest_rsa"),
    );
    driver.on(
        "cat /home/docker/.ssh/id_rsa.pub",
        include_str!("../keys/testdata/guest_rsa.pub"),
    );
}
