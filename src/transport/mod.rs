//! DHCP packet transport abstraction.
//!
//! This module defines the `Transport` trait and the factory that picks an
//! implementation once at startup. Servers depend on the trait only, which
//! keeps them testable with in-memory transports.

mod bound;
#[cfg(target_os = "linux")]
mod pktinfo;

pub use bound::BoundTransport;
#[cfg(target_os = "linux")]
pub use pktinfo::PktInfoTransport;

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use pnet::datalink::NetworkInterface;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::codec::{classify_transmission, TransmissionStrategy};
use crate::domain::Packet;
use crate::error::TransportError;

/// DHCP server port
pub const DHCP_SERVER_PORT: u16 = 67;
/// DHCP client port
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Maximum datagram we accept.
const MAX_DATAGRAM_SIZE: usize = 1500;

/// A DHCP-oriented packet socket.
pub trait Transport: Send {
    /// Block until a decodable DHCP packet arrives.
    ///
    /// Returns the packet and the interface it arrived on. Undecodable
    /// datagrams are skipped. A read timeout surfaces as
    /// `TransportError::TimedOut`.
    fn recv(&mut self) -> Result<(Packet, NetworkInterface), TransportError>;

    /// Send `packet` according to its transmission strategy. `interface`
    /// is the interface the request arrived on.
    fn send(&mut self, packet: &Packet, interface: &NetworkInterface) -> Result<(), TransportError>;

    /// Set the read timeout for future `recv` calls. `None` blocks forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError>;
}

/// Opens transports. Chosen once at startup and handed to the server.
pub trait TransportFactory: Send + Sync {
    fn open(&self, addr: SocketAddrV4) -> Result<Box<dyn Transport>, TransportError>;
}

/// Where a packet goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub addr: SocketAddrV4,
    /// Whether the packet must leave through the arrival interface.
    pub pin_interface: bool,
}

/// Compute the destination for `packet` from its transmission strategy.
pub fn destination(packet: &Packet) -> Destination {
    match classify_transmission(packet) {
        TransmissionStrategy::Broadcast | TransmissionStrategy::HardwareAddr => Destination {
            addr: SocketAddrV4::new(Ipv4Addr::BROADCAST, DHCP_CLIENT_PORT),
            pin_interface: true,
        },
        TransmissionStrategy::RelayAddr => Destination {
            addr: SocketAddrV4::new(packet.relay_addr, DHCP_SERVER_PORT),
            pin_interface: false,
        },
        TransmissionStrategy::ClientAddr => Destination {
            addr: SocketAddrV4::new(packet.client_addr, DHCP_CLIENT_PORT),
            pin_interface: false,
        },
    }
}

/// Create a UDP socket with broadcast enabled, bound to `addr`.
fn create_socket(addr: SocketAddrV4) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}

/// Opens the best transport the platform supports.
///
/// On Linux this is a `PktInfoTransport`, which learns the arrival
/// interface of every datagram. Elsewhere, or if that fails, it falls back
/// to a `BoundTransport` attributing all traffic to `fallback_interface`.
pub struct PlatformTransportFactory {
    fallback_interface: Option<NetworkInterface>,
}

impl PlatformTransportFactory {
    pub fn new(fallback_interface: Option<NetworkInterface>) -> Self {
        Self { fallback_interface }
    }
}

impl TransportFactory for PlatformTransportFactory {
    fn open(&self, addr: SocketAddrV4) -> Result<Box<dyn Transport>, TransportError> {
        match open_platform(addr) {
            Ok(transport) => return Ok(transport),
            Err(e) => warn!("Packet-info transport unavailable on {}: {}", addr, e),
        }

        let interface = self.fallback_interface.clone().ok_or_else(|| {
            TransportError::Unavailable(
                "no packet-info support and no interface configured".to_string(),
            )
        })?;
        debug!("Using portable transport bound to {}", interface.name);
        Ok(Box::new(BoundTransport::bind(addr, interface)?))
    }
}

#[cfg(target_os = "linux")]
fn open_platform(addr: SocketAddrV4) -> Result<Box<dyn Transport>, TransportError> {
    let transport = PktInfoTransport::bind(addr)?;
    debug!("Using IP_PKTINFO transport on {}", addr);
    Ok(Box::new(transport))
}

#[cfg(not(target_os = "linux"))]
fn open_platform(_addr: SocketAddrV4) -> Result<Box<dyn Transport>, TransportError> {
    Err(TransportError::Unavailable(
        "IP_PKTINFO is only supported on Linux".to_string(),
    ))
}
