//! Domain events emitted while steering machines through netboot.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use macaddr::MacAddr6;

use super::dhcp::format_hardware_addr;

/// Which server produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Dhcp,
    Tftp,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dhcp => write!(f, "DHCP"),
            Self::Tftp => write!(f, "TFTP"),
        }
    }
}

/// Where a machine is in the boot process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// The boot policy declined to boot the machine.
    Ignored,
    /// A ProxyDHCP offer pointing at a chainload image was sent.
    ProxyDhcp,
    /// A ProxyDHCP offer pointing at the HTTP boot script was sent.
    ProxyDhcpIpxe,
    /// A chainload image was transferred.
    Tftp,
    /// A chainload image transfer failed.
    TftpFailed,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignored => write!(f, "ignored"),
            Self::ProxyDhcp => write!(f, "proxydhcp"),
            Self::ProxyDhcpIpxe => write!(f, "proxydhcp-ipxe"),
            Self::Tftp => write!(f, "tftp"),
            Self::TftpFailed => write!(f, "tftp-failed"),
        }
    }
}

/// What the event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSubject {
    Machine(MacAddr6),
    Peer(SocketAddr),
}

impl fmt::Display for EventSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine(mac) => write!(f, "{}", format_hardware_addr(mac.as_bytes())),
            Self::Peer(addr) => write!(f, "{}", addr),
        }
    }
}

/// A structured boot progress event.
#[derive(Debug, Clone)]
pub struct BootEvent {
    pub timestamp: Instant,
    pub source: EventSource,
    pub subject: EventSubject,
    pub state: MachineState,
    pub message: String,
}

impl BootEvent {
    pub fn machine(
        source: EventSource,
        mac: MacAddr6,
        state: MachineState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Instant::now(),
            source,
            subject: EventSubject::Machine(mac),
            state,
            message: message.into(),
        }
    }

    pub fn peer(
        source: EventSource,
        addr: SocketAddr,
        state: MachineState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Instant::now(),
            source,
            subject: EventSubject::Peer(addr),
            state,
            message: message.into(),
        }
    }

    /// MAC address of the machine, when the event names one.
    pub fn mac(&self) -> Option<MacAddr6> {
        match self.subject {
            EventSubject::Machine(mac) => Some(mac),
            EventSubject::Peer(_) => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.state, MachineState::TftpFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_event() {
        let mac = MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff);
        let event = BootEvent::machine(
            EventSource::Dhcp,
            mac,
            MachineState::ProxyDhcp,
            "Offering to boot",
        );

        assert_eq!(event.mac(), Some(mac));
        assert_eq!(event.subject.to_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(event.message, "Offering to boot");
        assert!(!event.is_failure());
    }

    #[test]
    fn test_peer_event() {
        let addr: SocketAddr = "192.168.1.50:2070".parse().unwrap();
        let event = BootEvent::peer(
            EventSource::Tftp,
            addr,
            MachineState::TftpFailed,
            "send failed",
        );

        assert_eq!(event.mac(), None);
        assert_eq!(event.subject.to_string(), "192.168.1.50:2070");
        assert!(event.is_failure());
    }

    #[test]
    fn test_timestamp_is_set() {
        let before = Instant::now();
        let event = BootEvent::machine(
            EventSource::Dhcp,
            MacAddr6::nil(),
            MachineState::Ignored,
            "",
        );
        let after = Instant::now();

        assert!(event.timestamp >= before);
        assert!(event.timestamp <= after);
    }

    #[test]
    fn test_display() {
        assert_eq!(EventSource::Dhcp.to_string(), "DHCP");
        assert_eq!(EventSource::Tftp.to_string(), "TFTP");
        assert_eq!(MachineState::ProxyDhcpIpxe.to_string(), "proxydhcp-ipxe");
    }
}
