//! Portable transport for platforms without packet-info support.

use std::net::{SocketAddrV4, UdpSocket};
use std::time::Duration;

use pnet::datalink::NetworkInterface;
use tracing::debug;

use super::{create_socket, destination, Transport, MAX_DATAGRAM_SIZE};
use crate::codec::{decode, encode};
use crate::domain::Packet;
use crate::error::TransportError;

/// A plain UDP transport that attributes every datagram to one interface.
///
/// Only correct when the server listens on a single interface. Packets are
/// sent with ordinary routing; broadcasts leave on whichever interface the
/// kernel picks.
pub struct BoundTransport {
    socket: UdpSocket,
    interface: NetworkInterface,
}

impl BoundTransport {
    pub fn bind(addr: SocketAddrV4, interface: NetworkInterface) -> Result<Self, TransportError> {
        let socket = create_socket(addr)?;
        Ok(Self {
            socket: socket.into(),
            interface,
        })
    }
}

impl Transport for BoundTransport {
    fn recv(&mut self) -> Result<(Packet, NetworkInterface), TransportError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .map_err(TransportError::from_recv)?;

            match decode(&buf[..len]) {
                Ok(packet) => return Ok((packet, self.interface.clone())),
                Err(e) => debug!("Skipping undecodable datagram from {}: {}", from, e),
            }
        }
    }

    fn send(&mut self, packet: &Packet, _interface: &NetworkInterface) -> Result<(), TransportError> {
        let bytes = encode(packet)?;
        let dest = destination(packet);
        self.socket.send_to(&bytes, dest.addr)?;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.socket.set_read_timeout(timeout)?;
        Ok(())
    }
}
