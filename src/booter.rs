//! Boot policy: decides whether and what a machine should netboot.

use std::collections::HashSet;

use anyhow::Result;
use macaddr::MacAddr6;

use crate::domain::Machine;

/// What to boot. Served to iPXE by the HTTP side as a boot script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSpec {
    /// Kernel URL or path
    pub kernel: String,
    /// Initrd URLs or paths, loaded in order
    pub initrd: Vec<String>,
    /// Kernel command line
    pub cmdline: String,
}

/// Source of boot decisions.
///
/// `Ok(None)` means the machine should not netboot; the server then stays
/// silent so another boot server (or local disk) can take over.
pub trait Booter: Send + Sync {
    fn boot_spec(&self, machine: &Machine) -> Result<Option<BootSpec>>;
}

/// Boots every machine (or every allow-listed machine) with one spec.
#[derive(Debug, Clone)]
pub struct StaticBooter {
    spec: BootSpec,
    allowed: Option<HashSet<MacAddr6>>,
}

impl StaticBooter {
    pub fn new(spec: BootSpec) -> Self {
        Self {
            spec,
            allowed: None,
        }
    }

    /// Restrict booting to the given MAC addresses.
    pub fn with_allowed(mut self, macs: impl IntoIterator<Item = MacAddr6>) -> Self {
        self.allowed = Some(macs.into_iter().collect());
        self
    }
}

impl Booter for StaticBooter {
    fn boot_spec(&self, machine: &Machine) -> Result<Option<BootSpec>> {
        match &self.allowed {
            Some(allowed) if !allowed.contains(&machine.mac) => Ok(None),
            _ => Ok(Some(self.spec.clone())),
        }
    }
}
