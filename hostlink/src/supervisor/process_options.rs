//! Platform options for launching a detached daemon.
//!
//! Whatever the platform, the child:
//! - inherits none of the parent's stdio,
//! - runs in its own process group, so Ctrl-C of the CLI does not reach it,
//! - sees only a whitelisted environment.

use std::path::Path;
use std::process::{Command, Stdio};

use hostlink_shared::constants::envs;

/// Variables copied from the parent environment when set.
#[cfg(not(windows))]
const PASSTHROUGH_ENV: &[&str] = &[envs::PATH, envs::RUST_LOG];

#[cfg(windows)]
const PASSTHROUGH_ENV: &[&str] = &[
    envs::PATH,
    envs::RUST_LOG,
    "SystemRoot",
    "COMPUTERNAME",
    "PATHEXT",
];

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Configure `cmd` to start detached from the calling terminal.
///
/// # Arguments
/// * `cmd` - Command about to be spawned
/// * `home` - Hostlink home exported to the child as `HOSTLINK_HOME`
pub fn detach(cmd: &mut Command, home: &Path) {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());

    cmd.env_clear();
    cmd.env(envs::HOSTLINK_HOME, home);
    for name in PASSTHROUGH_ENV {
        if let Some(value) = std::env::var_os(name) {
            cmd.env(name, value);
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn test_environment_is_whitelisted() {
        let mut cmd = Command::new("true");
        detach(&mut cmd, Path::new("/tmp/hl-home"));

        let envs: Vec<(&OsStr, Option<&OsStr>)> = cmd.get_envs().collect();
        assert!(envs.contains(&(
            OsStr::new("HOSTLINK_HOME"),
            Some(OsStr::new("/tmp/hl-home"))
        )));
        for (name, _) in &envs {
            let name = name.to_string_lossy();
            assert!(
                name == "HOSTLINK_HOME" || PASSTHROUGH_ENV.contains(&name.as_ref()),
                "unexpected variable {}",
                name
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_child_runs_in_own_process_group() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        detach(&mut cmd, Path::new("/tmp"));
        let mut child = cmd.spawn().unwrap();

        let pgid = unsafe { libc::getpgid(child.id() as i32) };
        let our_pgid = unsafe { libc::getpgid(0) };
        assert_eq!(pgid, child.id() as i32);
        assert_ne!(pgid, our_pgid);

        child.kill().unwrap();
        child.wait().unwrap();
    }
}
