//! PXE request validation, client classification and offer construction.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;
use tracing::debug;

use crate::codec::{check_bounds, encode_options};
use crate::domain::{option_codes, Architecture, Firmware, Machine, MessageType, Options, Packet};
use crate::error::{EncodeError, NotBootRequest, ValidationError};

/// Vendor class every PXE server identifies itself with.
const PXE_VENDOR_CLASS: &[u8] = b"PXEClient";

/// PXE vendor sub-option 6: boot server discovery control.
const PXE_DISCOVERY_CONTROL: u8 = 6;
/// Discovery control bit 3: skip discovery, boot the filename directly.
const DISCOVERY_BYPASS: u8 = 8;

/// OUIs of Raspberry Pi boards. Their bootloader reports architecture 0
/// although it is not an x86 BIOS.
const RPI_OUIS: [[u8; 3]; 5] = [
    [0x28, 0xcd, 0xc1],
    [0xb8, 0x27, 0xeb],
    [0xd8, 0x3a, 0xdd],
    [0xdc, 0xa6, 0x32],
    [0xe4, 0x5f, 0x01],
];

/// Outcome of looking up an RFC 4578 client architecture code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchLookup {
    Supported(Architecture, Firmware),
    /// UEFI HTTP boot, which speaks a different protocol.
    HttpBoot(&'static str),
    Unsupported,
}

fn lookup_architecture(code: u16) -> ArchLookup {
    match code {
        0 => ArchLookup::Supported(Architecture::Ia32, Firmware::X86Pc),
        6 => ArchLookup::Supported(Architecture::Ia32, Firmware::Efi32),
        7 => ArchLookup::Supported(Architecture::X64, Firmware::Efi64),
        9 => ArchLookup::Supported(Architecture::X64, Firmware::EfiBc),
        11 => ArchLookup::Supported(Architecture::Arm64, Firmware::EfiArm64),
        16 => ArchLookup::HttpBoot("x64"),
        19 => ArchLookup::HttpBoot("arm64"),
        _ => ArchLookup::Unsupported,
    }
}

/// Check that `packet` is a PXE boot request we should look at.
pub fn is_boot_request(packet: &Packet) -> Result<(), NotBootRequest> {
    if packet.message_type != MessageType::Discover {
        return Err(NotBootRequest::WrongMessageType(packet.message_type));
    }
    if !packet.options.contains(option_codes::CLIENT_ARCH) {
        return Err(NotBootRequest::MissingArchitecture);
    }
    Ok(())
}

/// Identify the client machine and the firmware it is running.
pub fn classify_client(packet: &Packet) -> Result<(Machine, Firmware), ValidationError> {
    let code = packet
        .options
        .u16(option_codes::CLIENT_ARCH)
        .map_err(ValidationError::MalformedArchitecture)?;

    // Raspberry Pis would need their own firmware type; until then they are
    // refused rather than mistaken for x86 BIOS machines.
    if code == 0 && has_rpi_oui(&packet.hardware_addr) {
        debug!("Client {} looks like a Raspberry Pi", packet.hardware_addr_string());
        return Err(ValidationError::UnsupportedFirmware(code));
    }

    let (arch, mut firmware) = match lookup_architecture(code) {
        ArchLookup::Supported(arch, firmware) => (arch, firmware),
        ArchLookup::HttpBoot(variant) => return Err(ValidationError::HttpBoot { code, variant }),
        ArchLookup::Unsupported => return Err(ValidationError::UnsupportedFirmware(code)),
    };

    // The user class only refines the firmware type, never the architecture.
    if let Ok(user_class) = packet.options.string(option_codes::USER_CLASS) {
        // iPXE burned into a BIOS ROM uses native drivers; chainloading an
        // UNDI build would not work.
        if user_class == "iPXE" && firmware == Firmware::X86Pc {
            firmware = Firmware::X86Ipxe;
        }
        // Our own iPXE: already chainloaded once, hand over to HTTP.
        if user_class == "pixiecore" {
            firmware = Firmware::PixiecoreIpxe;
        }
    }

    // Some PXE ROMs omit the GUID. It is only mirrored back, so tolerate that.
    match packet.options.bytes(option_codes::CLIENT_UUID) {
        None | Some([]) => {}
        Some(guid) if guid.len() != 17 => return Err(ValidationError::GuidLength(guid.len())),
        Some(guid) if guid[0] != 0 => return Err(ValidationError::GuidLeadingByte),
        Some(_) => {}
    }

    let mac = match packet.hardware_addr.as_slice() {
        &[a, b, c, d, e, f] => MacAddr6::new(a, b, c, d, e, f),
        other => return Err(ValidationError::HardwareAddrLen(other.len())),
    };

    Ok((Machine { mac, arch }, firmware))
}

/// Build the ProxyDHCP offer steering `machine` to its next boot stage.
pub fn build_offer(
    request: &Packet,
    machine: &Machine,
    server_ip: Ipv4Addr,
    firmware: Firmware,
    http_port: u16,
) -> Result<Packet, EncodeError> {
    let mut offer = Packet::new(
        MessageType::Offer,
        request.transaction_id,
        machine.mac.as_bytes().to_vec(),
    );
    offer.broadcast = true;
    offer.relay_addr = request.relay_addr;
    offer.server_addr = server_ip;

    offer
        .options
        .insert(option_codes::SERVER_IDENTIFIER, server_ip.octets().to_vec());
    // Servers identify as PXEClient too.
    offer
        .options
        .insert(option_codes::VENDOR_CLASS_ID, PXE_VENDOR_CLASS.to_vec());
    if let Some(guid) = request.options.bytes(option_codes::CLIENT_UUID) {
        offer.options.insert(option_codes::CLIENT_UUID, guid.to_vec());
    }

    let mac = machine.mac_string();
    match firmware {
        Firmware::X86Pc => {
            offer
                .options
                .insert(option_codes::VENDOR_SPECIFIC, discovery_bypass()?);
            offer.boot_server_name = server_ip.to_string();
            offer.boot_filename = format!("{}/{}", mac, firmware.code());
        }
        Firmware::X86Ipxe => {
            // iPXE ROMs want a URL rather than a server name plus filename.
            offer
                .options
                .insert(option_codes::VENDOR_SPECIFIC, discovery_bypass()?);
            offer.boot_filename = format!("tftp://{}/{}/{}", server_ip, mac, firmware.code());
        }
        Firmware::Efi32 | Firmware::Efi64 | Firmware::EfiBc | Firmware::EfiArm64 => {
            // Many EFI firmwares ignore ProxyDHCP offers carrying option 43.
            // Without it they retry against port 4011 of this server.
            offer.boot_server_name = server_ip.to_string();
            offer.boot_filename = format!("{}/{}", mac, firmware.code());
        }
        Firmware::PixiecoreIpxe => {
            offer.boot_filename = ipxe_script_url(server_ip, http_port, machine);
        }
    }

    check_bounds(&offer)?;
    Ok(offer)
}

/// URL of the boot script our iPXE build fetches after chainloading.
pub fn ipxe_script_url(server_ip: Ipv4Addr, http_port: u16, machine: &Machine) -> String {
    format!(
        "http://{}:{}/_/ipxe?arch={}&mac={}",
        server_ip,
        http_port,
        machine.arch.code(),
        machine.mac_string()
    )
}

/// PXE vendor options telling the client to boot the filename directly.
fn discovery_bypass() -> Result<Vec<u8>, EncodeError> {
    let mut pxe = Options::new();
    pxe.insert(PXE_DISCOVERY_CONTROL, vec![DISCOVERY_BYPASS]);
    encode_options(&pxe)
}

fn has_rpi_oui(hardware_addr: &[u8]) -> bool {
    RPI_OUIS
        .iter()
        .any(|oui| hardware_addr.starts_with(oui))
}
