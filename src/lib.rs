//! ProxyDHCP PXE boot server.
//!
//! Answers PXE boot requests alongside an existing DHCP server, steering
//! each client to a boot image matching its firmware, and serves those
//! images over TFTP.

pub mod booter;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod interface;
pub mod proxydhcp;
pub mod reporter;
pub mod tftp;
pub mod transport;

pub use booter::{BootSpec, Booter, StaticBooter};
pub use config::Config;
pub use domain::{Architecture, BootEvent, Firmware, Machine, MachineState, Packet};
pub use proxydhcp::ProxyDhcpServer;
pub use reporter::{ConsoleReporter, EventReporter, TracingReporter};
pub use tftp::{ImageDispatcher, ImageMap, TftpServer};
pub use transport::{PlatformTransportFactory, Transport, TransportFactory};
