//! Guest driver backed by the system `ssh` client.

use std::net::{IpAddr, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use hostlink_shared::constants::guest;
use hostlink_shared::errors::{HostlinkError, HostlinkResult};

use super::{Driver, GuestBridge, GuestState};
use crate::layout::ProfileLayout;
use crate::settings::Settings;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs commands in the guest with `ssh user@ip -- cmd`.
#[derive(Debug, Clone)]
pub struct SshDriver {
    name: String,
    ip: IpAddr,
    port: u16,
    user: String,
    identity: Option<PathBuf>,
}

impl SshDriver {
    pub fn new(name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            ip,
            port: 22,
            user: guest::USER.to_string(),
            identity: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity(mut self, key: impl Into<PathBuf>) -> Self {
        self.identity = Some(key.into());
        self
    }

    /// Build a driver for the profile's VM from its `guest-*` settings.
    ///
    /// # Errors
    ///
    /// Returns a config error when `guest-ip` is unset or invalid.
    pub fn from_settings(profile: &ProfileLayout, settings: &Settings) -> HostlinkResult<Self> {
        let raw_ip = settings.guest_ip.as_deref().ok_or_else(|| {
            HostlinkError::Config(format!(
                "guest-ip is not set for profile {}",
                profile.name()
            ))
        })?;
        let ip: IpAddr = raw_ip
            .parse()
            .map_err(|_| HostlinkError::Config(format!("invalid guest-ip {:?}", raw_ip)))?;

        let mut driver = Self::new(profile.name(), ip);
        if let Some(port) = settings.guest_ssh_port {
            driver = driver.with_port(port);
        }
        if let Some(key) = settings.guest_ssh_key.as_deref() {
            driver = driver.with_identity(key);
        }
        Ok(driver)
    }

    fn command(&self, cmd: &str) -> Command {
        let mut ssh = Command::new("ssh");
        ssh.args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "BatchMode=yes",
            "-o",
            "LogLevel=quiet",
            "-o",
            "ConnectTimeout=10",
        ]);
        ssh.arg("-p").arg(self.port.to_string());
        if let Some(identity) = &self.identity {
            ssh.arg("-i").arg(identity);
        }
        ssh.arg(format!("{}@{}", self.user, self.ip));
        ssh.arg("--").arg(cmd);
        ssh
    }
}

impl GuestBridge for SshDriver {
    fn run(&self, cmd: &str) -> HostlinkResult<String> {
        // Commands may carry credentials; log only the program.
        let program = cmd.split_whitespace().find(|w| *w != "sudo").unwrap_or_default();
        tracing::debug!(guest = %self.name, program, "running guest command");

        let output = self
            .command(cmd)
            .output()
            .map_err(|e| HostlinkError::Guest(format!("failed to run ssh: {}", e)))?;

        if !output.status.success() {
            return Err(HostlinkError::Guest(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Driver for SshDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> HostlinkResult<GuestState> {
        let addr = SocketAddr::new(self.ip, self.port);
        Ok(match TcpStream::connect_timeout(&addr, PROBE_TIMEOUT) {
            Ok(_) => GuestState::Running,
            Err(e) => {
                tracing::debug!(guest = %self.name, %addr, error = %e, "guest ssh port unreachable");
                GuestState::Stopped
            }
        })
    }

    fn ip(&self) -> HostlinkResult<IpAddr> {
        Ok(self.ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    #[test]
    fn test_command_line() {
        let driver = SshDriver::new("dev", "192.168.99.100".parse().unwrap())
            .with_port(2222)
            .with_identity("/keys/id");
        let cmd = driver.command("cat /proc/mounts");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(cmd.get_program(), "ssh");
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id"]));
        assert!(args.contains(&"docker@192.168.99.100".to_string()));
        assert_eq!(args.last().unwrap(), "cat /proc/mounts");
    }

    #[test]
    fn test_from_settings_requires_ip() {
        let profile = Layout::new("/tmp/hl").profile("dev");
        assert!(SshDriver::from_settings(&profile, &Settings::default()).is_err());

        let settings = Settings {
            guest_ip: Some("10.0.2.15".into()),
            guest_ssh_port: Some(2222),
            ..Default::default()
        };
        let driver = SshDriver::from_settings(&profile, &settings).unwrap();
        assert_eq!(driver.ip().unwrap().to_string(), "10.0.2.15");
        assert_eq!(driver.name(), "dev");
    }

    #[test]
    fn test_state_stopped_when_port_closed() {
        // Bind then drop to get a port with nothing listening.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let driver = SshDriver::new("dev", "127.0.0.1".parse().unwrap()).with_port(port);
        assert_eq!(driver.state().unwrap(), GuestState::Stopped);
    }
}
