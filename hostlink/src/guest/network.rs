//! Host address discovery from the guest's point of view.

use std::net::{IpAddr, Ipv4Addr};

use hostlink_shared::errors::{HostlinkError, HostlinkResult};

/// Whether `a` and `b` are on the same IPv4 network under `mask`.
pub(crate) fn same_network(a: Ipv4Addr, b: Ipv4Addr, mask: Ipv4Addr) -> bool {
    let mask = u32::from(mask);
    mask != 0 && (u32::from(a) & mask) == (u32::from(b) & mask)
}

/// Find the address of the host interface whose network contains `guest`.
#[cfg(unix)]
pub fn host_ip_for(guest: IpAddr) -> HostlinkResult<IpAddr> {
    let IpAddr::V4(guest_v4) = guest else {
        return Err(HostlinkError::Unsupported(format!(
            "host address lookup for IPv6 guest {}",
            guest
        )));
    };

    let addrs = nix::ifaddrs::getifaddrs()
        .map_err(|e| HostlinkError::Internal(format!("Failed to list interfaces: {}", e)))?;

    for ifaddr in addrs {
        let (Some(address), Some(netmask)) = (ifaddr.address, ifaddr.netmask) else {
            continue;
        };
        let (Some(address), Some(netmask)) = (address.as_sockaddr_in(), netmask.as_sockaddr_in())
        else {
            continue;
        };

        let host = address.ip();
        if host != guest_v4 && same_network(host, guest_v4, netmask.ip()) {
            tracing::debug!(interface = %ifaddr.interface_name, host = %host, guest = %guest_v4, "found host address");
            return Ok(IpAddr::V4(host));
        }
    }

    Err(HostlinkError::NotFound(format!(
        "host interface on the network of {}",
        guest
    )))
}

#[cfg(not(unix))]
pub fn host_ip_for(guest: IpAddr) -> HostlinkResult<IpAddr> {
    Err(HostlinkError::Unsupported(format!(
        "host address lookup for guest {} on this platform",
        guest
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_network() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        assert!(same_network(
            Ipv4Addr::new(192, 168, 99, 1),
            Ipv4Addr::new(192, 168, 99, 100),
            mask
        ));
        assert!(!same_network(
            Ipv4Addr::new(192, 168, 98, 1),
            Ipv4Addr::new(192, 168, 99, 100),
            mask
        ));
        assert!(!same_network(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(192, 168, 99, 100),
            Ipv4Addr::UNSPECIFIED
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_ipv6_guest_unsupported() {
        assert!(host_ip_for("fe80::1".parse().unwrap()).is_err());
    }
}
