//! Reporter that forwards boot events to `tracing`.

use tracing::{info, warn};

use crate::domain::BootEvent;
use crate::reporter::EventReporter;

/// Emits every boot event as a structured log record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl EventReporter for TracingReporter {
    fn report(&self, event: &BootEvent) {
        if event.is_failure() {
            warn!(
                source = %event.source,
                subject = %event.subject,
                state = %event.state,
                "{}",
                event.message
            );
        } else {
            info!(
                source = %event.source,
                subject = %event.subject,
                state = %event.state,
                "{}",
                event.message
            );
        }
    }
}
