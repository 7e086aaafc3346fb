//! DHCP packet codec.
//!
//! This module is responsible for converting between raw bytes and domain
//! DHCP packets, and for deciding how a packet must be transmitted.

mod dhcp_codec;

pub use dhcp_codec::{
    check_bounds, classify_transmission, decode, encode, encode_options, DHCP_MAGIC_COOKIE,
};

/// How a packet must be delivered, per the RFC 2131 transmission rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionStrategy {
    /// Broadcast to port 68.
    Broadcast,
    /// Unicast to port 67 of the relay address.
    RelayAddr,
    /// Unicast to port 68 of the client address.
    ClientAddr,
    /// Unicast to port 68 of the offered address, with the link-layer
    /// destination set to the client hardware address rather than resolved
    /// by ARP. Transports that cannot set the link-layer destination may
    /// broadcast instead.
    HardwareAddr,
}
