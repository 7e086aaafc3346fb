//! Network interface lookup and server address selection.

use std::net::{IpAddr, Ipv4Addr};

use pnet::datalink::{self, NetworkInterface};

use crate::error::ResolveError;

/// Pick the IPv4 address that identifies this server on `interface`.
///
/// Addresses are tried in tiers: global unicast (including RFC 1918),
/// then link-local unicast, then loopback. Each tier scans every address
/// before falling through to the next. Non-IPv4 addresses are ignored.
pub fn interface_ip(interface: &NetworkInterface) -> Result<Ipv4Addr, ResolveError> {
    let tiers: [fn(&Ipv4Addr) -> bool; 3] = [
        is_global_unicast,
        Ipv4Addr::is_link_local,
        Ipv4Addr::is_loopback,
    ];

    tiers
        .iter()
        .find_map(|tier| ipv4_addrs(interface).find(|ip| tier(ip)))
        .ok_or_else(|| ResolveError::NoAddress(interface.name.clone()))
}

/// Look up an interface by its kernel index.
pub fn interface_by_index(index: u32) -> Option<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.index == index)
}

/// Look up an interface by name.
pub fn interface_by_name(name: &str) -> Option<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
}

/// Find the interface that owns `addr`.
pub fn interface_with_addr(addr: Ipv4Addr) -> Option<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| ipv4_addrs(iface).any(|ip| ip == addr))
}

/// List all available network interfaces.
pub fn list_interfaces() -> Vec<String> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| {
            let status = if iface.is_up() { "UP" } else { "DOWN" };
            let ips: Vec<_> = iface.ips.iter().map(|ip| ip.to_string()).collect();
            format!(
                "{}: {} [{}]",
                iface.name,
                status,
                if ips.is_empty() {
                    "no IP".to_string()
                } else {
                    ips.join(", ")
                }
            )
        })
        .collect()
}

fn ipv4_addrs(interface: &NetworkInterface) -> impl Iterator<Item = Ipv4Addr> + '_ {
    interface.ips.iter().filter_map(|net| match net.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    })
}

/// Unicast and routable: not unspecified, broadcast, multicast, loopback
/// or link-local.
fn is_global_unicast(ip: &Ipv4Addr) -> bool {
    !(ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_loopback()
        || ip.is_link_local())
}
