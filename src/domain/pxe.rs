//! PXE-specific domain models.

use std::fmt;

use macaddr::MacAddr6;

use super::dhcp::format_hardware_addr;

/// CPU architecture reported to the boot policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 32-bit x86
    Ia32,
    /// 64-bit x86
    X64,
    /// 64-bit ARM
    Arm64,
}

impl Architecture {
    /// Numeric code used in the iPXE handoff URL.
    pub fn code(self) -> u8 {
        match self {
            Self::Ia32 => 0,
            Self::X64 => 1,
            Self::Arm64 => 2,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ia32 => write!(f, "IA32"),
            Self::X64 => write!(f, "X64"),
            Self::Arm64 => write!(f, "ARM64"),
        }
    }
}

/// Client firmware flavour, which decides how the client is chainloaded.
///
/// The numeric code appears in boot filenames and TFTP paths. EFI variants
/// share their RFC 4578 architecture code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Firmware {
    /// Classic x86 BIOS with PXE/UNDI support
    X86Pc,
    /// x86 BIOS running iPXE as its ROM (no UNDI)
    X86Ipxe,
    /// Our own iPXE build, after one chainload round
    PixiecoreIpxe,
    Efi32,
    Efi64,
    EfiBc,
    EfiArm64,
}

impl Firmware {
    pub const ALL: [Firmware; 7] = [
        Self::X86Pc,
        Self::X86Ipxe,
        Self::PixiecoreIpxe,
        Self::Efi32,
        Self::Efi64,
        Self::EfiBc,
        Self::EfiArm64,
    ];

    pub fn code(self) -> u32 {
        match self {
            Self::X86Pc => 0,
            Self::X86Ipxe => 1,
            Self::PixiecoreIpxe => 2,
            Self::Efi32 => 6,
            Self::Efi64 => 7,
            Self::EfiBc => 9,
            Self::EfiArm64 => 11,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|fw| fw.code() == code)
    }

    /// Short name used for image keys in configuration.
    pub fn config_key(self) -> &'static str {
        match self {
            Self::X86Pc => "bios",
            Self::X86Ipxe => "ipxe",
            Self::PixiecoreIpxe => "pixiecore",
            Self::Efi32 => "efi32",
            Self::Efi64 => "efi64",
            Self::EfiBc => "efibc",
            Self::EfiArm64 => "arm64",
        }
    }

    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|fw| fw.config_key() == key)
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86Pc => write!(f, "x86 BIOS PXE"),
            Self::X86Ipxe => write!(f, "x86 iPXE"),
            Self::PixiecoreIpxe => write!(f, "pixiecore iPXE"),
            Self::Efi32 => write!(f, "EFI32"),
            Self::Efi64 => write!(f, "EFI64"),
            Self::EfiBc => write!(f, "EFI BC"),
            Self::EfiArm64 => write!(f, "EFI ARM64"),
        }
    }
}

/// A client asking to be booted. Derived per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Machine {
    pub mac: MacAddr6,
    pub arch: Architecture,
}

impl Machine {
    /// MAC address in colon-separated lowercase hex.
    pub fn mac_string(&self) -> String {
        format_hardware_addr(self.mac.as_bytes())
    }
}
