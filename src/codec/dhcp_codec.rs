//! DHCP wire format encoding and decoding.
//!
//! Implements the RFC 2131 fixed header followed by the RFC 2132
//! magic cookie and TLV option stream.

use std::net::Ipv4Addr;

use crate::domain::{option_codes, MessageType, Options, Packet};
use crate::error::{DecodeError, EncodeError};

use super::TransmissionStrategy;

/// DHCP magic cookie: 0x63825363
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed BOOTP header size, up to the magic cookie.
const HEADER_LEN: usize = 236;

/// Header plus magic cookie.
const MIN_DHCP_SIZE: usize = HEADER_LEN + 4;

/// Encoded packets are padded to the BOOTP minimum for relay agents.
const MIN_ENCODED_SIZE: usize = 300;

const MAX_HARDWARE_ADDR_LEN: usize = 16;
const MAX_SERVER_NAME_LEN: usize = 64;
const MAX_FILENAME_LEN: usize = 128;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const FLAG_BROADCAST: u16 = 0x8000;

/// Decode a DHCP packet from a UDP payload.
///
/// Unknown options are kept as raw bytes. When an option code repeats,
/// the first occurrence wins.
pub fn decode(data: &[u8]) -> Result<Packet, DecodeError> {
    if data.len() < MIN_DHCP_SIZE {
        return Err(DecodeError::PacketTooShort {
            expected: MIN_DHCP_SIZE,
            actual: data.len(),
        });
    }

    if data[236..240] != DHCP_MAGIC_COOKIE {
        return Err(DecodeError::InvalidMagicCookie);
    }

    let op = data[0];
    if op != BOOTREQUEST && op != BOOTREPLY {
        return Err(DecodeError::InvalidOpCode(op));
    }

    let hlen = data[2];
    if hlen as usize > MAX_HARDWARE_ADDR_LEN {
        return Err(DecodeError::InvalidHardwareAddrLen(hlen));
    }

    // hops at [3], secs at [8..10]
    let transaction_id = [data[4], data[5], data[6], data[7]];
    let flags = u16::from_be_bytes([data[10], data[11]]);

    let mut options = decode_options(&data[MIN_DHCP_SIZE..], MIN_DHCP_SIZE)?;

    let message_type = match options.remove(option_codes::MESSAGE_TYPE) {
        Some(value) => match value.first() {
            Some(&t) => MessageType::from_u8(t).ok_or(DecodeError::UnknownMessageType(t))?,
            None => return Err(DecodeError::MissingMessageType),
        },
        None => return Err(DecodeError::MissingMessageType),
    };

    Ok(Packet {
        message_type,
        transaction_id,
        broadcast: flags & FLAG_BROADCAST != 0,
        client_addr: ipv4_at(data, 12),
        your_addr: ipv4_at(data, 16),
        server_addr: ipv4_at(data, 20),
        relay_addr: ipv4_at(data, 24),
        hardware_addr: data[28..28 + hlen as usize].to_vec(),
        boot_server_name: null_terminated_string(&data[44..108]),
        boot_filename: null_terminated_string(&data[108..236]),
        options,
    })
}

/// Encode a DHCP packet into its wire format.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    check_bounds(packet)?;

    let mut out = vec![0u8; MIN_DHCP_SIZE];

    out[0] = if packet.message_type.is_reply() {
        BOOTREPLY
    } else {
        BOOTREQUEST
    };
    out[1] = HTYPE_ETHERNET;
    out[2] = packet.hardware_addr.len() as u8;
    out[4..8].copy_from_slice(&packet.transaction_id);
    if packet.broadcast {
        out[10..12].copy_from_slice(&FLAG_BROADCAST.to_be_bytes());
    }
    out[12..16].copy_from_slice(&packet.client_addr.octets());
    out[16..20].copy_from_slice(&packet.your_addr.octets());
    out[20..24].copy_from_slice(&packet.server_addr.octets());
    out[24..28].copy_from_slice(&packet.relay_addr.octets());
    out[28..28 + packet.hardware_addr.len()].copy_from_slice(&packet.hardware_addr);

    let sname = packet.boot_server_name.as_bytes();
    out[44..44 + sname.len()].copy_from_slice(sname);
    let file = packet.boot_filename.as_bytes();
    out[108..108 + file.len()].copy_from_slice(file);

    out[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

    out.extend_from_slice(&[option_codes::MESSAGE_TYPE, 1, packet.message_type.as_u8()]);
    for (code, value) in packet.options.iter() {
        if code == option_codes::MESSAGE_TYPE {
            return Err(EncodeError::ReservedOption(code));
        }
        write_option(&mut out, code, value)?;
    }
    out.push(option_codes::END);

    if out.len() < MIN_ENCODED_SIZE {
        out.resize(MIN_ENCODED_SIZE, 0);
    }

    Ok(out)
}

/// Encode an option set as an encapsulated option blob, e.g. for the
/// PXE vendor-specific option 43.
pub fn encode_options(options: &Options) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    for (code, value) in options.iter() {
        write_option(&mut out, code, value)?;
    }
    out.push(option_codes::END);
    Ok(out)
}

/// Check that the variable-length fields fit the fixed header.
pub fn check_bounds(packet: &Packet) -> Result<(), EncodeError> {
    if packet.hardware_addr.len() > MAX_HARDWARE_ADDR_LEN {
        return Err(EncodeError::HardwareAddrTooLong(packet.hardware_addr.len()));
    }
    if packet.boot_server_name.len() > MAX_SERVER_NAME_LEN {
        return Err(EncodeError::ServerNameTooLong(packet.boot_server_name.len()));
    }
    if packet.boot_filename.len() > MAX_FILENAME_LEN {
        return Err(EncodeError::FilenameTooLong(packet.boot_filename.len()));
    }
    Ok(())
}

/// Decide how a packet must be put on the wire (RFC 2131 section 4.1).
pub fn classify_transmission(packet: &Packet) -> TransmissionStrategy {
    if !packet.relay_addr.is_unspecified() {
        TransmissionStrategy::RelayAddr
    } else if packet.message_type == MessageType::Nak {
        TransmissionStrategy::Broadcast
    } else if !packet.client_addr.is_unspecified() {
        TransmissionStrategy::ClientAddr
    } else if packet.broadcast || packet.your_addr.is_unspecified() {
        TransmissionStrategy::Broadcast
    } else {
        TransmissionStrategy::HardwareAddr
    }
}

fn write_option(out: &mut Vec<u8>, code: u8, value: &[u8]) -> Result<(), EncodeError> {
    if code == option_codes::PAD || code == option_codes::END {
        return Err(EncodeError::ReservedOption(code));
    }
    let len = u8::try_from(value.len()).map_err(|_| EncodeError::OptionTooLong {
        code,
        len: value.len(),
    })?;
    out.push(code);
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

/// Parse the TLV option stream. `base` is the stream's offset in the
/// packet, used in error messages.
fn decode_options(data: &[u8], base: usize) -> Result<Options, DecodeError> {
    let mut options = Options::new();
    let mut offset = 0;

    while offset < data.len() {
        let code = data[offset];

        if code == option_codes::PAD {
            offset += 1;
            continue;
        }

        if code == option_codes::END {
            break;
        }

        if offset + 1 >= data.len() {
            return Err(DecodeError::InvalidOption {
                offset: base + offset,
                message: "option length missing".to_string(),
            });
        }

        let len = data[offset + 1] as usize;

        if offset + 2 + len > data.len() {
            return Err(DecodeError::InvalidOption {
                offset: base + offset,
                message: format!(
                    "option {} truncated: expected {} bytes, have {}",
                    code,
                    len,
                    data.len() - offset - 2
                ),
            });
        }

        options.insert_first(code, &data[offset + 2..offset + 2 + len]);
        offset += 2 + len;
    }

    Ok(options)
}

fn ipv4_at(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

/// Read a NUL-padded string field.
fn null_terminated_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

    /// Build a raw BOOTREQUEST with the given options appended after the cookie.
    fn raw_request(options: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 240];
        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = 6;
        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        packet[28..34].copy_from_slice(&MAC);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        packet.extend_from_slice(options);
        packet
    }

    fn discover_options() -> Vec<u8> {
        vec![option_codes::MESSAGE_TYPE, 1, 1, option_codes::END]
    }

    mod decode_tests {
        use super::*;

        #[test]
        fn test_decode_minimum_packet() {
            let packet = decode(&raw_request(&discover_options())).unwrap();

            assert_eq!(packet.message_type, MessageType::Discover);
            assert_eq!(packet.transaction_id, [0x12, 0x34, 0x56, 0x78]);
            assert_eq!(packet.hardware_addr, MAC.to_vec());
            assert!(!packet.broadcast);
            assert!(packet.options.is_empty());
        }

        #[test]
        fn test_packet_too_short() {
            let result = decode(&[0u8; 100]);
            assert_eq!(
                result,
                Err(DecodeError::PacketTooShort {
                    expected: 240,
                    actual: 100
                })
            );
        }

        #[test]
        fn test_header_without_cookie_is_too_short() {
            let data = &raw_request(&[])[..236];
            assert!(matches!(
                decode(data),
                Err(DecodeError::PacketTooShort { .. })
            ));
        }

        #[test]
        fn test_bad_magic_cookie() {
            let mut data = raw_request(&discover_options());
            data[236] = 0;
            assert_eq!(decode(&data), Err(DecodeError::InvalidMagicCookie));
        }

        #[test]
        fn test_bad_op_code() {
            let mut data = raw_request(&discover_options());
            data[0] = 3;
            assert_eq!(decode(&data), Err(DecodeError::InvalidOpCode(3)));
        }

        #[test]
        fn test_bad_hardware_addr_len() {
            let mut data = raw_request(&discover_options());
            data[2] = 17;
            assert_eq!(decode(&data), Err(DecodeError::InvalidHardwareAddrLen(17)));
        }

        #[test]
        fn test_missing_message_type() {
            let data = raw_request(&[option_codes::END]);
            assert_eq!(decode(&data), Err(DecodeError::MissingMessageType));
        }

        #[test]
        fn test_unknown_message_type() {
            let data = raw_request(&[option_codes::MESSAGE_TYPE, 1, 42, option_codes::END]);
            assert_eq!(decode(&data), Err(DecodeError::UnknownMessageType(42)));
        }

        #[test]
        fn test_truncated_option() {
            let data = raw_request(&[option_codes::MESSAGE_TYPE, 1, 1, 93, 4, 0]);
            assert!(matches!(
                decode(&data),
                Err(DecodeError::InvalidOption { offset: 243, .. })
            ));
        }

        #[test]
        fn test_options_without_terminator() {
            let data = raw_request(&[option_codes::MESSAGE_TYPE, 1, 1, 93, 2, 0, 7]);
            let packet = decode(&data).unwrap();
            assert_eq!(packet.options.u16(option_codes::CLIENT_ARCH), Ok(7));
        }

        #[test]
        fn test_pad_options_are_skipped() {
            let data = raw_request(&[0, 0, option_codes::MESSAGE_TYPE, 1, 1, 0, 93, 2, 0, 0, 255]);
            let packet = decode(&data).unwrap();
            assert_eq!(packet.options.len(), 1);
            assert_eq!(packet.options.u16(option_codes::CLIENT_ARCH), Ok(0));
        }

        #[test]
        fn test_options_after_end_are_ignored() {
            let data = raw_request(&[option_codes::MESSAGE_TYPE, 1, 1, 255, 93, 2, 0, 7]);
            let packet = decode(&data).unwrap();
            assert!(!packet.options.contains(option_codes::CLIENT_ARCH));
        }

        #[test]
        fn test_duplicate_option_first_wins() {
            let data = raw_request(&[
                option_codes::MESSAGE_TYPE, 1, 1,
                77, 4, b'i', b'P', b'X', b'E',
                77, 9, b'p', b'i', b'x', b'i', b'e', b'c', b'o', b'r', b'e',
                255,
            ]);
            let packet = decode(&data).unwrap();
            assert_eq!(packet.options.string(option_codes::USER_CLASS), Ok("iPXE"));
        }

        #[test]
        fn test_unknown_options_are_retained() {
            let data = raw_request(&[option_codes::MESSAGE_TYPE, 1, 1, 200, 2, 0xca, 0xfe, 255]);
            let packet = decode(&data).unwrap();
            assert_eq!(packet.options.bytes(200), Some(&[0xca, 0xfe][..]));
        }

        #[test]
        fn test_fixed_fields() {
            let mut data = raw_request(&discover_options());
            data[10] = 0x80;
            data[12..16].copy_from_slice(&[192, 168, 1, 10]);
            data[16..20].copy_from_slice(&[192, 168, 1, 11]);
            data[20..24].copy_from_slice(&[192, 168, 1, 1]);
            data[24..28].copy_from_slice(&[10, 0, 0, 1]);
            data[44..48].copy_from_slice(b"boot");
            data[108..118].copy_from_slice(b"pxelinux.0");

            let packet = decode(&data).unwrap();
            assert!(packet.broadcast);
            assert_eq!(packet.client_addr, Ipv4Addr::new(192, 168, 1, 10));
            assert_eq!(packet.your_addr, Ipv4Addr::new(192, 168, 1, 11));
            assert_eq!(packet.server_addr, Ipv4Addr::new(192, 168, 1, 1));
            assert_eq!(packet.relay_addr, Ipv4Addr::new(10, 0, 0, 1));
            assert_eq!(packet.boot_server_name, "boot");
            assert_eq!(packet.boot_filename, "pxelinux.0");
        }
    }

    mod encode_tests {
        use super::*;

        fn offer() -> Packet {
            let mut packet = Packet::new(MessageType::Offer, [1, 2, 3, 4], MAC.to_vec());
            packet.broadcast = true;
            packet.server_addr = Ipv4Addr::new(10, 0, 0, 1);
            packet.boot_server_name = "10.0.0.1".to_string();
            packet.boot_filename = "aa:bb:cc:dd:ee:ff/0".to_string();
            packet
                .options
                .insert(option_codes::SERVER_IDENTIFIER, vec![10, 0, 0, 1]);
            packet
                .options
                .insert(option_codes::VENDOR_CLASS_ID, b"PXEClient".to_vec());
            packet
        }

        #[test]
        fn test_encode_layout() {
            let bytes = encode(&offer()).unwrap();

            assert_eq!(bytes.len(), 300);
            assert_eq!(bytes[0], BOOTREPLY);
            assert_eq!(bytes[1], HTYPE_ETHERNET);
            assert_eq!(bytes[2], 6);
            assert_eq!(&bytes[4..8], &[1, 2, 3, 4]);
            assert_eq!(&bytes[10..12], &[0x80, 0x00]);
            assert_eq!(&bytes[20..24], &[10, 0, 0, 1]);
            assert_eq!(&bytes[28..34], &MAC);
            assert_eq!(&bytes[44..52], b"10.0.0.1");
            assert_eq!(bytes[52], 0);
            assert_eq!(&bytes[236..240], &DHCP_MAGIC_COOKIE);
            // Message type first, then options in code order.
            assert_eq!(&bytes[240..243], &[53, 1, 2]);
            assert_eq!(&bytes[243..249], &[54, 4, 10, 0, 0, 1]);
            assert_eq!(&bytes[249..251], &[60, 9]);
            assert_eq!(bytes[260], option_codes::END);
        }

        #[test]
        fn test_request_uses_bootrequest() {
            let packet = Packet::new(MessageType::Discover, [0; 4], MAC.to_vec());
            assert_eq!(encode(&packet).unwrap()[0], BOOTREQUEST);
        }

        #[test]
        fn test_round_trip() {
            let packet = offer();
            let decoded = decode(&encode(&packet).unwrap()).unwrap();
            assert_eq!(decoded, packet);
        }

        #[test]
        fn test_decode_then_encode_keeps_first_duplicate() {
            let data = raw_request(&[
                option_codes::MESSAGE_TYPE, 1, 1,
                93, 2, 0, 7,
                93, 2, 0, 6,
                97, 17, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
                255,
            ]);
            let first = decode(&data).unwrap();
            let second = decode(&encode(&first).unwrap()).unwrap();

            assert_eq!(second, first);
            assert_eq!(second.options.u16(option_codes::CLIENT_ARCH), Ok(7));
        }

        #[test]
        fn test_option_too_long() {
            let mut packet = offer();
            packet.options.insert(200, vec![0u8; 256]);
            assert_eq!(
                encode(&packet),
                Err(EncodeError::OptionTooLong { code: 200, len: 256 })
            );
        }

        #[test]
        fn test_option_of_255_bytes_fits() {
            let mut packet = offer();
            packet.options.insert(200, vec![7u8; 255]);
            let decoded = decode(&encode(&packet).unwrap()).unwrap();
            assert_eq!(decoded.options.bytes(200).map(<[u8]>::len), Some(255));
        }

        #[test]
        fn test_reserved_option_codes() {
            for code in [option_codes::PAD, option_codes::MESSAGE_TYPE, option_codes::END] {
                let mut packet = offer();
                packet.options.insert(code, vec![1]);
                assert_eq!(encode(&packet), Err(EncodeError::ReservedOption(code)));
            }
        }

        #[test]
        fn test_field_bounds() {
            let mut packet = offer();
            packet.boot_server_name = "x".repeat(65);
            assert_eq!(encode(&packet), Err(EncodeError::ServerNameTooLong(65)));

            let mut packet = offer();
            packet.boot_filename = "x".repeat(129);
            assert_eq!(encode(&packet), Err(EncodeError::FilenameTooLong(129)));

            let mut packet = offer();
            packet.hardware_addr = vec![0; 17];
            assert_eq!(encode(&packet), Err(EncodeError::HardwareAddrTooLong(17)));
        }

        #[test]
        fn test_fields_at_their_bounds() {
            let mut packet = offer();
            packet.boot_server_name = "s".repeat(64);
            packet.boot_filename = "f".repeat(128);
            packet.hardware_addr = vec![1; 16];
            let decoded = decode(&encode(&packet).unwrap()).unwrap();
            assert_eq!(decoded, packet);
        }

        #[test]
        fn test_encode_options() {
            let mut pxe = Options::new();
            pxe.insert(6, vec![8]);
            assert_eq!(encode_options(&pxe).unwrap(), vec![6, 1, 8, 255]);
        }
    }

    mod transmission_tests {
        use super::*;

        fn reply() -> Packet {
            Packet::new(MessageType::Offer, [0; 4], MAC.to_vec())
        }

        #[test]
        fn test_relay_wins() {
            let mut packet = reply();
            packet.relay_addr = Ipv4Addr::new(10, 0, 0, 254);
            packet.client_addr = Ipv4Addr::new(10, 0, 1, 5);
            packet.broadcast = true;
            assert_eq!(classify_transmission(&packet), TransmissionStrategy::RelayAddr);
        }

        #[test]
        fn test_nak_is_broadcast() {
            let mut packet = reply();
            packet.message_type = MessageType::Nak;
            packet.client_addr = Ipv4Addr::new(10, 0, 1, 5);
            assert_eq!(classify_transmission(&packet), TransmissionStrategy::Broadcast);
        }

        #[test]
        fn test_client_addr() {
            let mut packet = reply();
            packet.client_addr = Ipv4Addr::new(10, 0, 1, 5);
            assert_eq!(classify_transmission(&packet), TransmissionStrategy::ClientAddr);
        }

        #[test]
        fn test_broadcast_flag() {
            let mut packet = reply();
            packet.broadcast = true;
            packet.your_addr = Ipv4Addr::new(10, 0, 1, 5);
            assert_eq!(classify_transmission(&packet), TransmissionStrategy::Broadcast);
        }

        #[test]
        fn test_no_offered_address_is_broadcast() {
            assert_eq!(classify_transmission(&reply()), TransmissionStrategy::Broadcast);
        }

        #[test]
        fn test_hardware_addr_unicast() {
            let mut packet = reply();
            packet.your_addr = Ipv4Addr::new(10, 0, 1, 5);
            assert_eq!(classify_transmission(&packet), TransmissionStrategy::HardwareAddr);
        }
    }
}
