//! SSHFS mounts: the guest logs back into this host's SFTP daemon.

use std::net::IpAddr;

use hostlink_shared::constants::guest;
use hostlink_shared::errors::{HostlinkError, HostlinkResult};

use super::definition::{HostFolder, keys};
use crate::guest::Driver;
use crate::keys::{fetch_guest_keypair, install_guest_keypair};
use crate::layout::ProfileLayout;
use crate::supervisor::{DaemonKind, ServiceControl};
use crate::util::retry::retry;
use crate::util::shell::quote;

const MOUNT_ATTEMPTS: usize = 3;

/// The host address of the guest's current SSH session, as seen by the guest.
const HOST_IP_COMMAND: &str =
    "sudo netstat -tapen | grep 'sshd: docker' | head -n1 | awk '{split($5, a, \":\"); print a[1]}'";

pub(super) struct SshfsContext<'a> {
    pub profile: &'a ProfileLayout,
    pub services: &'a dyn ServiceControl,
    pub sftp_port: u16,
}

fn host_ip_from_guest(driver: &dyn Driver) -> HostlinkResult<IpAddr> {
    let out = driver.run(HOST_IP_COMMAND)?;
    let raw = out.trim();
    raw.parse().map_err(|_| {
        HostlinkError::Guest(format!(
            "cannot determine the host address from the guest (got {:?})",
            raw
        ))
    })
}

fn mount_command(
    host_ip: IpAddr,
    source: &str,
    mountpoint: &str,
    extra: Option<&str>,
    port: u16,
) -> String {
    let extra = match extra {
        Some(e) if e.starts_with('-') => format!("{} ", e),
        Some(e) => format!("-o {} ", e),
        None => String::new(),
    };
    let remote = format!("{}@{}:{}", guest::USER, host_ip, source);
    format!(
        "sudo sshfs {} {} -o IdentityFile={} -o 'StrictHostKeyChecking=no' \
         -o reconnect -o allow_other -o idmap=none {}-p {}",
        quote(&remote),
        quote(mountpoint),
        guest::KEY_FILE,
        extra,
        port
    )
}

/// Mount `folder` at `mountpoint` inside the guest.
///
/// Before the first attempt the guest keypair is fetched, cached and
/// authorized on this host, and the SFTP daemon is started. The mount
/// itself is attempted up to three times.
pub(super) fn mount(
    driver: &dyn Driver,
    folder: &HostFolder,
    mountpoint: &str,
    ctx: &SshfsContext<'_>,
) -> HostlinkResult<()> {
    let pair = fetch_guest_keypair(driver)?;
    install_guest_keypair(&pair, ctx.profile)?;

    let pid = ctx.services.ensure_running(DaemonKind::Sftpd)?;
    tracing::debug!(pid, "sftpd running");

    let host_ip = host_ip_from_guest(driver)?;
    let cmd = mount_command(
        host_ip,
        &folder.source(),
        mountpoint,
        folder.option(keys::EXTRA_OPTIONS),
        ctx.sftp_port,
    );

    retry(MOUNT_ATTEMPTS, || driver.run(&cmd).map(|_| ())).map_err(|e| {
        HostlinkError::Mount(format!(
            "{}: {}\nNote: Make sure that your network and firewall settings on the host allows port {} to be opened\n",
            folder.name, e, ctx.sftp_port
        ))
    })?;

    tracing::info!(host_folder = %folder.name, %host_ip, mountpoint, "sshfs folder mounted");
    Ok(())
}
