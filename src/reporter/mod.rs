//! Reporting module for boot progress events.
//!
//! This module defines the `EventReporter` trait and provides
//! implementations for different outputs.

mod console_reporter;
mod tracing_reporter;

pub use console_reporter::ConsoleReporter;
pub use tracing_reporter::TracingReporter;

use crate::domain::BootEvent;

/// Sink for boot progress events.
///
/// Shared by the DHCP and TFTP servers, so implementations must be safe
/// to call from several threads at once.
pub trait EventReporter: Send + Sync {
    /// Report a boot event.
    fn report(&self, event: &BootEvent);
}
