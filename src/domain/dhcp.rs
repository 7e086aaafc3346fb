//! DHCP packet domain models.
//!
//! These types represent the logical structure of DHCP packets,
//! independent of wire format encoding (see `codec`).

use std::collections::btree_map::{self, BTreeMap};
use std::net::Ipv4Addr;

use crate::error::OptionError;

/// DHCP option codes used by the boot server.
pub mod option_codes {
    pub const PAD: u8 = 0;
    pub const VENDOR_SPECIFIC: u8 = 43;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_IDENTIFIER: u8 = 54;
    pub const VENDOR_CLASS_ID: u8 = 60;
    pub const USER_CLASS: u8 = 77;
    pub const CLIENT_ARCH: u8 = 93;
    pub const CLIENT_UUID: u8 = 97;
    pub const END: u8 = 255;
}

/// DHCP message types as defined in RFC 2131.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl MessageType {
    /// Parse from the DHCP option 53 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }

    /// The DHCP option 53 value.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }

    /// Whether the message travels server to client (BOOTREPLY).
    pub fn is_reply(self) -> bool {
        matches!(self, Self::Offer | Self::Ack | Self::Nak)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DHCPDISCOVER"),
            Self::Offer => write!(f, "DHCPOFFER"),
            Self::Request => write!(f, "DHCPREQUEST"),
            Self::Decline => write!(f, "DHCPDECLINE"),
            Self::Ack => write!(f, "DHCPACK"),
            Self::Nak => write!(f, "DHCPNAK"),
            Self::Release => write!(f, "DHCPRELEASE"),
            Self::Inform => write!(f, "DHCPINFORM"),
        }
    }
}

/// Raw DHCP options keyed by code, kept in ascending code order.
///
/// Values are stored uninterpreted; the typed accessors decode them on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(BTreeMap<u8, Vec<u8>>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `code` to `value`, replacing any previous value.
    pub fn insert(&mut self, code: u8, value: impl Into<Vec<u8>>) {
        self.0.insert(code, value.into());
    }

    /// Set `code` to `value` unless it is already present.
    ///
    /// Returns false when an earlier value was kept.
    pub fn insert_first(&mut self, code: u8, value: impl Into<Vec<u8>>) -> bool {
        match self.0.entry(code) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(value.into());
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn remove(&mut self, code: u8) -> Option<Vec<u8>> {
        self.0.remove(&code)
    }

    pub fn contains(&self, code: u8) -> bool {
        self.0.contains_key(&code)
    }

    /// Raw bytes of an option.
    pub fn bytes(&self, code: u8) -> Option<&[u8]> {
        self.0.get(&code).map(Vec::as_slice)
    }

    /// Option value as a big-endian 16-bit integer.
    pub fn u16(&self, code: u8) -> Result<u16, OptionError> {
        let value = self.bytes(code).ok_or(OptionError::Missing(code))?;
        match value {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(OptionError::WrongLength {
                code,
                expected: 2,
                actual: value.len(),
            }),
        }
    }

    /// Option value as text.
    pub fn string(&self, code: u8) -> Result<&str, OptionError> {
        let value = self.bytes(code).ok_or(OptionError::Missing(code))?;
        std::str::from_utf8(value).map_err(|_| OptionError::NotUtf8(code))
    }

    /// Option value as an IPv4 address.
    pub fn ipv4(&self, code: u8) -> Result<Ipv4Addr, OptionError> {
        let value = self.bytes(code).ok_or(OptionError::Missing(code))?;
        match value {
            [a, b, c, d] => Ok(Ipv4Addr::new(*a, *b, *c, *d)),
            _ => Err(OptionError::WrongLength {
                code,
                expected: 4,
                actual: value.len(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.0.iter().map(|(code, value)| (*code, value.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A DHCP packet with the fields the boot server reads or writes.
///
/// Unset addresses are `Ipv4Addr::UNSPECIFIED`; empty strings mean the
/// field is blank on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub message_type: MessageType,
    pub transaction_id: [u8; 4],
    pub broadcast: bool,
    /// Client IP address (ciaddr)
    pub client_addr: Ipv4Addr,
    /// 'Your' IP address (yiaddr)
    pub your_addr: Ipv4Addr,
    /// Next server IP address (siaddr)
    pub server_addr: Ipv4Addr,
    /// Relay agent IP address (giaddr)
    pub relay_addr: Ipv4Addr,
    /// Client hardware address (chaddr), `hlen` bytes
    pub hardware_addr: Vec<u8>,
    /// Server host name (sname)
    pub boot_server_name: String,
    /// Boot filename (file)
    pub boot_filename: String,
    pub options: Options,
}

impl Packet {
    /// Create an empty packet of the given type.
    pub fn new(message_type: MessageType, transaction_id: [u8; 4], hardware_addr: Vec<u8>) -> Self {
        Self {
            message_type,
            transaction_id,
            broadcast: false,
            client_addr: Ipv4Addr::UNSPECIFIED,
            your_addr: Ipv4Addr::UNSPECIFIED,
            server_addr: Ipv4Addr::UNSPECIFIED,
            relay_addr: Ipv4Addr::UNSPECIFIED,
            hardware_addr,
            boot_server_name: String::new(),
            boot_filename: String::new(),
            options: Options::new(),
        }
    }

    /// Hardware address in colon-separated lowercase hex.
    pub fn hardware_addr_string(&self) -> String {
        format_hardware_addr(&self.hardware_addr)
    }
}

/// Format a hardware address as colon-separated lowercase hex.
pub fn format_hardware_addr(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod message_type_tests {
        use super::*;

        #[test]
        fn test_from_u8_valid_values() {
            assert_eq!(MessageType::from_u8(1), Some(MessageType::Discover));
            assert_eq!(MessageType::from_u8(2), Some(MessageType::Offer));
            assert_eq!(MessageType::from_u8(3), Some(MessageType::Request));
            assert_eq!(MessageType::from_u8(4), Some(MessageType::Decline));
            assert_eq!(MessageType::from_u8(5), Some(MessageType::Ack));
            assert_eq!(MessageType::from_u8(6), Some(MessageType::Nak));
            assert_eq!(MessageType::from_u8(7), Some(MessageType::Release));
            assert_eq!(MessageType::from_u8(8), Some(MessageType::Inform));
        }

        #[test]
        fn test_from_u8_invalid_values() {
            assert_eq!(MessageType::from_u8(0), None);
            assert_eq!(MessageType::from_u8(9), None);
            assert_eq!(MessageType::from_u8(255), None);
        }

        #[test]
        fn test_as_u8_inverts_from_u8() {
            for value in 1..=8 {
                let msg = MessageType::from_u8(value).unwrap();
                assert_eq!(msg.as_u8(), value);
            }
        }

        #[test]
        fn test_is_reply() {
            assert!(MessageType::Offer.is_reply());
            assert!(MessageType::Ack.is_reply());
            assert!(MessageType::Nak.is_reply());
            assert!(!MessageType::Discover.is_reply());
            assert!(!MessageType::Request.is_reply());
        }

        #[test]
        fn test_display() {
            assert_eq!(MessageType::Discover.to_string(), "DHCPDISCOVER");
            assert_eq!(MessageType::Offer.to_string(), "DHCPOFFER");
        }
    }

    mod options_tests {
        use super::*;

        #[test]
        fn test_insert_first_keeps_earlier_value() {
            let mut opts = Options::new();
            assert!(opts.insert_first(60, b"PXEClient".to_vec()));
            assert!(!opts.insert_first(60, b"other".to_vec()));
            assert_eq!(opts.bytes(60), Some(&b"PXEClient"[..]));
        }

        #[test]
        fn test_insert_replaces() {
            let mut opts = Options::new();
            opts.insert(60, b"one".to_vec());
            opts.insert(60, b"two".to_vec());
            assert_eq!(opts.bytes(60), Some(&b"two"[..]));
            assert_eq!(opts.len(), 1);
        }

        #[test]
        fn test_u16() {
            let mut opts = Options::new();
            opts.insert(93, vec![0x00, 0x07]);
            assert_eq!(opts.u16(93), Ok(7));
        }

        #[test]
        fn test_u16_wrong_length() {
            let mut opts = Options::new();
            opts.insert(93, vec![0x07]);
            assert_eq!(
                opts.u16(93),
                Err(OptionError::WrongLength {
                    code: 93,
                    expected: 2,
                    actual: 1
                })
            );
        }

        #[test]
        fn test_missing() {
            let opts = Options::new();
            assert_eq!(opts.u16(93), Err(OptionError::Missing(93)));
            assert_eq!(opts.string(77), Err(OptionError::Missing(77)));
            assert_eq!(opts.ipv4(54), Err(OptionError::Missing(54)));
            assert_eq!(opts.bytes(97), None);
        }

        #[test]
        fn test_string() {
            let mut opts = Options::new();
            opts.insert(77, b"iPXE".to_vec());
            assert_eq!(opts.string(77), Ok("iPXE"));

            opts.insert(77, vec![0xff, 0xfe]);
            assert_eq!(opts.string(77), Err(OptionError::NotUtf8(77)));
        }

        #[test]
        fn test_ipv4() {
            let mut opts = Options::new();
            opts.insert(54, vec![10, 0, 0, 1]);
            assert_eq!(opts.ipv4(54), Ok(Ipv4Addr::new(10, 0, 0, 1)));
        }

        #[test]
        fn test_iter_is_ordered_by_code() {
            let mut opts = Options::new();
            opts.insert(97, vec![0]);
            opts.insert(54, vec![1, 2, 3, 4]);
            opts.insert(60, b"PXEClient".to_vec());
            let codes: Vec<u8> = opts.iter().map(|(code, _)| code).collect();
            assert_eq!(codes, vec![54, 60, 97]);
        }
    }

    mod packet_tests {
        use super::*;

        #[test]
        fn test_new_has_unset_fields() {
            let packet = Packet::new(MessageType::Offer, [1, 2, 3, 4], vec![0xaa; 6]);
            assert!(!packet.broadcast);
            assert!(packet.relay_addr.is_unspecified());
            assert!(packet.boot_filename.is_empty());
            assert!(packet.options.is_empty());
        }

        #[test]
        fn test_hardware_addr_string() {
            let packet = Packet::new(
                MessageType::Discover,
                [0; 4],
                vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01],
            );
            assert_eq!(packet.hardware_addr_string(), "de:ad:be:ef:00:01");
        }
    }
}
