//! PID liveness, termination, and identity checks.
//!
//! The liveness check is advisory: a recycled PID looks alive.

/// Ask a process to exit.
///
/// # Returns
/// * `true` - Signal delivered or process already gone
/// * `false` - Failed to signal (permission denied)
#[cfg(unix)]
pub fn terminate_process(pid: u32) -> bool {
    if pid == 0 {
        return true;
    }
    unsafe { libc::kill(pid as i32, libc::SIGTERM) == 0 || !is_process_alive(pid) }
}

#[cfg(windows)]
pub fn terminate_process(pid: u32) -> bool {
    use sysinfo::{Pid, System};

    if pid == 0 {
        return true;
    }
    let mut sys = System::new();
    let pid_obj = Pid::from_u32(pid);
    sys.refresh_process(pid_obj);
    match sys.process(pid_obj) {
        Some(process) => process.kill(),
        None => true,
    }
}

/// Check if a process with the given PID exists.
///
/// Uses `libc::kill(pid, 0)` which sends a null signal to check existence.
/// PID 0 is the "never started" marker and is never alive.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Check if a process with the given PID exists by looking up its handle.
#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, System};

    if pid == 0 {
        return false;
    }
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid))
}

/// Verify that a PID belongs to a hostlink daemon started with `services <name>`.
///
/// # Implementation
/// * **Linux**: Read `/proc/{pid}/cmdline` and look for `services` followed by the name
/// * **Other**: Use `sysinfo` to read the command line of the process
pub fn is_same_process(pid: u32, service: &str) -> bool {
    #[cfg(target_os = "linux")]
    {
        is_same_process_linux(pid, service)
    }

    #[cfg(not(target_os = "linux"))]
    {
        is_same_process_sysinfo(pid, service)
    }
}

fn args_match(args: &[&str], service: &str) -> bool {
    args.windows(2)
        .any(|pair| pair[0] == "services" && pair[1] == service)
}

#[cfg(target_os = "linux")]
fn is_same_process_linux(pid: u32, service: &str) -> bool {
    let cmdline_path = format!("/proc/{}/cmdline", pid);

    match std::fs::read_to_string(&cmdline_path) {
        Ok(cmdline) => {
            let args: Vec<&str> = cmdline.split('\0').collect();
            args_match(&args, service)
        }
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn is_same_process_sysinfo(pid: u32, service: &str) -> bool {
    use sysinfo::{Pid, System};

    let mut sys = System::new();
    let pid_obj = Pid::from_u32(pid);
    sys.refresh_process(pid_obj);

    match sys.process(pid_obj) {
        Some(process) => {
            let args: Vec<&str> = process.cmd().iter().map(String::as_str).collect();
            args_match(&args, service)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_current() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_invalid() {
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(999999999));
        assert!(!is_process_alive(u32::MAX));
    }

    #[test]
    fn test_is_same_process_current() {
        // The test harness is not a hostlink daemon.
        assert!(!is_same_process(std::process::id(), "sftpd"));
    }

    #[test]
    fn test_args_match() {
        assert!(args_match(&["/usr/bin/hostlink", "services", "proxy"], "proxy"));
        assert!(!args_match(&["/usr/bin/hostlink", "services", "sftpd"], "proxy"));
        assert!(!args_match(&["proxy"], "proxy"));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_process() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(is_process_alive(pid));

        assert!(terminate_process(pid));
        child.wait().unwrap();
        assert!(!is_process_alive(pid));
    }
}
