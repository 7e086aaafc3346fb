use std::io;

use thiserror::Error;

use crate::domain::MessageType;

/// Errors raised while decoding a DHCP packet from the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid DHCP magic cookie")]
    InvalidMagicCookie,

    #[error("invalid op code {0}")]
    InvalidOpCode(u8),

    #[error("invalid hardware address length {0}")]
    InvalidHardwareAddrLen(u8),

    #[error("invalid option at offset {offset}: {message}")]
    InvalidOption { offset: usize, message: String },

    #[error("packet has no DHCP message type")]
    MissingMessageType,

    #[error("unknown DHCP message type {0}")]
    UnknownMessageType(u8),
}

/// Errors raised while serializing a DHCP packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("option {code} is {len} bytes, options hold at most 255")]
    OptionTooLong { code: u8, len: usize },

    #[error("option code {0} is reserved")]
    ReservedOption(u8),

    #[error("hardware address is {0} bytes, the wire format holds at most 16")]
    HardwareAddrTooLong(usize),

    #[error("boot server name is {0} bytes, the wire format holds at most 64")]
    ServerNameTooLong(usize),

    #[error("boot filename is {0} bytes, the wire format holds at most 128")]
    FilenameTooLong(usize),
}

/// Errors raised by the typed option accessors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("option {0} not present")]
    Missing(u8),

    #[error("option {code} has length {actual}, expected {expected}")]
    WrongLength {
        code: u8,
        expected: usize,
        actual: usize,
    },

    #[error("option {0} is not valid UTF-8")]
    NotUtf8(u8),
}

/// Errors raised by a packet transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("read timed out")]
    TimedOut,

    #[error("no network interface with index {0}")]
    InterfaceNotFound(u32),

    #[error("encoding packet: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Map an IO error, folding read timeouts into `TimedOut`.
    ///
    /// A receive interrupted by a signal counts as a timeout too, so the
    /// caller gets back to checking its running flag.
    pub fn from_recv(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                Self::TimedOut
            }
            _ => Self::Io(err),
        }
    }
}

/// Raised when no address on an interface can identify the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no usable unicast address configured on interface {0}")]
    NoAddress(String),
}

/// Why a packet is not a PXE boot request. Not an error: most DHCP traffic
/// on a segment has nothing to do with PXE.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotBootRequest {
    #[error("packet is {0}, not DHCPDISCOVER")]
    WrongMessageType(MessageType),

    #[error("not a PXE boot request (missing option 93)")]
    MissingArchitecture,
}

/// Reasons a PXE boot request cannot be served.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed DHCP option 93 (required for PXE): {0}")]
    MalformedArchitecture(OptionError),

    #[error("unsupported client firmware type '{0}'")]
    UnsupportedFirmware(u16),

    #[error("unsupported client firmware type '{code}' (probably HTTP {variant} EFI boot)")]
    HttpBoot { code: u16, variant: &'static str },

    #[error("malformed client GUID (option 97), leading byte must be zero")]
    GuidLeadingByte,

    #[error("malformed client GUID (option 97), wrong size {0}")]
    GuidLength(usize),

    #[error("unsupported hardware address length {0}")]
    HardwareAddrLen(usize),
}

/// Errors raised when resolving a TFTP path to a boot image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown path {0:?}: not found")]
    NotFound(String),

    #[error("unknown firmware type {0}")]
    UnknownFirmware(u32),
}

/// Unrecoverable server failures.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("receiving DHCP packet: {0}")]
    Receive(#[source] TransportError),

    #[error("opening DHCP transport: {0}")]
    Open(#[source] TransportError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Config error: {0}")]
    Invalid(String),
}
