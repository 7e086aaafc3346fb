//! Domain models for ProxyDHCP netbooting.
//!
//! This module contains the core domain types that are independent
//! of any infrastructure concerns.

mod dhcp;
mod events;
mod pxe;

pub use dhcp::{format_hardware_addr, option_codes, MessageType, Options, Packet};
pub use events::{BootEvent, EventSource, EventSubject, MachineState};
pub use pxe::{Architecture, Firmware, Machine};
