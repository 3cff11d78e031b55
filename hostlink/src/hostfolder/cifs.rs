//! CIFS mounts of a Windows/Samba share into the guest.

use hostlink_shared::constants::guest;
use hostlink_shared::errors::{HostlinkError, HostlinkResult};

use super::crypto;
use super::definition::{HostFolder, keys};
use crate::guest::Driver;
use crate::util::shell::quote;

/// Definition name whose UNC path always points at this host's `Users` share.
pub const USERS_SHARE: &str = "Users";

/// Host part of a UNC path (`//host/share`); empty when malformed.
pub fn unc_host(unc: &str) -> &str {
    unc.split('/').nth(2).unwrap_or_default()
}

fn is_reachable(driver: &dyn Driver, host: &str) -> bool {
    driver.run(&format!("sudo ping -c1 -w1 {}", quote(host))).is_ok()
}

fn mount_command(
    unc: &str,
    mountpoint: &str,
    username: &str,
    password: &str,
    domain: Option<&str>,
    rhel: bool,
) -> String {
    // mount.cifs reads a doubled comma as a literal one.
    let mut options = format!(
        "username={},password={}",
        username.replace(',', ",,"),
        password.replace(',', ",,")
    );
    if rhel {
        options.push(',');
        options.push_str(guest::RHEL_CIFS_CONTEXT);
    }
    if let Some(domain) = domain {
        options.push_str(",domain=");
        options.push_str(&domain.replace(',', ",,"));
    }
    format!(
        "sudo mount -t cifs {} {} -o {}",
        quote(unc),
        quote(mountpoint),
        quote(&options)
    )
}

/// Mount `folder` at `mountpoint` inside the guest.
///
/// # Arguments
/// * `rhel` - Guest is RHEL-based and needs the sandbox SELinux context
///
/// # Errors
/// * `Unreachable` - The UNC host does not answer a ping from the guest
/// * `Mount` - The mount command failed; not retried
pub(super) fn mount(
    driver: &dyn Driver,
    folder: &HostFolder,
    mountpoint: &str,
    rhel: bool,
) -> HostlinkResult<()> {
    let unc = if folder.name == USERS_SHARE {
        format!("//{}/{}", driver.host_ip()?, USERS_SHARE)
    } else {
        folder.source()
    };

    let host = unc_host(&unc);
    if host.is_empty() || !is_reachable(driver, host) {
        return Err(HostlinkError::Unreachable(format!(
            "host {:?} of {} cannot be reached from the guest",
            host, folder.name
        )));
    }

    let password = folder
        .option(keys::PASSWORD)
        .map(crypto::decrypt)
        .transpose()?
        .unwrap_or_default();

    let cmd = mount_command(
        &unc,
        mountpoint,
        folder.option(keys::USERNAME).unwrap_or_default(),
        &password,
        folder.option(keys::DOMAIN),
        rhel,
    );

    driver
        .run(&cmd)
        .map_err(|e| HostlinkError::Mount(format!("{}: {}", folder.name, e)))?;
    tracing::info!(host_folder = %folder.name, %unc, mountpoint, "cifs share mounted");
    Ok(())
}
