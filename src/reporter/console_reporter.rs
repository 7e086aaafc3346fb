//! Console-based event reporter.

use std::io::{self, Write};

use crate::domain::{BootEvent, MachineState};
use crate::reporter::EventReporter;

/// Reports boot events to the console.
///
/// Formats events in a human-readable format suitable for
/// terminal output.
pub struct ConsoleReporter {
    /// Whether to show verbose output
    verbose: bool,
}

impl ConsoleReporter {
    /// Create a new console reporter.
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// Enable or disable verbose output.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn format_event(&self, event: &BootEvent) -> String {
        let label = match event.state {
            MachineState::Ignored => "IGNORED",
            MachineState::ProxyDhcp => "OFFER",
            MachineState::ProxyDhcpIpxe => "OFFER iPXE",
            MachineState::Tftp => "SENT",
            MachineState::TftpFailed => "FAILED",
        };

        let mut output = format!(
            "[{} {}] {} | {}",
            event.source, label, event.subject, event.message
        );

        if self.verbose {
            output.push_str(&format!(
                " | +{}ms",
                event.timestamp.elapsed().as_millis()
            ));
        }

        output
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventReporter for ConsoleReporter {
    fn report(&self, event: &BootEvent) {
        let output = self.format_event(event);
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", output);
    }
}
