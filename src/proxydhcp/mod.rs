//! ProxyDHCP server module.
//!
//! Implements a proxyDHCP server that provides PXE boot information
//! without interfering with the main DHCP server's IP allocation.

mod offer;
mod server;

pub use offer::{build_offer, classify_client, ipxe_script_url, is_boot_request};
pub use server::{Iteration, Outcome, ProxyDhcpServer};
