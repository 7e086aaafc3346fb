//! ProxyDHCP server loop.
//!
//! Receives DHCP packets, filters PXE boot requests, consults the boot
//! policy and answers with an offer naming the next boot stage. The server
//! never hands out IP addresses; that stays with the site's DHCP server.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pnet::datalink::NetworkInterface;
use tracing::{debug, error, info, warn};

use crate::booter::Booter;
use crate::domain::{BootEvent, EventSource, Firmware, MachineState, Packet};
use crate::error::{ServerError, TransportError};
use crate::interface::interface_ip;
use crate::proxydhcp::offer::{build_offer, classify_client, is_boot_request};
use crate::reporter::EventReporter;
use crate::transport::{Transport, TransportFactory};

/// How often the receive loop wakes to check the running flag.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// What happened to one received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// An offer went out.
    Offered,
    /// Not a PXE boot request.
    Skipped,
    /// The boot policy declined the machine.
    Declined,
    /// A boot request we could not serve.
    Dropped,
}

/// Result of one trip around the receive loop.
#[derive(Debug)]
pub enum Iteration {
    Continue(Outcome),
    /// The read timed out without a packet.
    Idle,
    /// The transport failed; the server must stop.
    Fatal(TransportError),
}

/// ProxyDHCP server for PXE boot.
pub struct ProxyDhcpServer {
    booter: Arc<dyn Booter>,
    reporter: Arc<dyn EventReporter>,
    /// Port of the HTTP endpoint serving iPXE scripts.
    http_port: u16,
    running: Arc<AtomicBool>,
}

impl ProxyDhcpServer {
    pub fn new(booter: Arc<dyn Booter>, reporter: Arc<dyn EventReporter>, http_port: u16) -> Self {
        Self {
            booter,
            reporter,
            http_port,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle to stop the server.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Open a transport on `addr` and serve until stopped.
    pub fn run(&self, factory: &dyn TransportFactory, addr: SocketAddrV4) -> Result<(), ServerError> {
        let mut transport = factory.open(addr).map_err(ServerError::Open)?;
        transport
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(ServerError::Open)?;

        info!("ProxyDHCP server listening on {}", addr);
        self.running.store(true, Ordering::SeqCst);
        self.serve(transport.as_mut())
    }

    /// Serve packets from `transport` while the running flag is set.
    ///
    /// Problems with individual packets are logged and skipped. Only a
    /// receive failure ends the loop, and it is returned to the caller.
    pub fn serve(&self, transport: &mut dyn Transport) -> Result<(), ServerError> {
        while self.running.load(Ordering::SeqCst) {
            if let Iteration::Fatal(e) = self.serve_one(transport) {
                error!("Receiving packet: {}", e);
                return Err(ServerError::Receive(e));
            }
        }

        info!("ProxyDHCP server stopped");
        Ok(())
    }

    /// Receive and handle a single packet.
    pub fn serve_one(&self, transport: &mut dyn Transport) -> Iteration {
        match transport.recv() {
            Ok((packet, interface)) => {
                Iteration::Continue(self.handle_packet(transport, &packet, &interface))
            }
            Err(TransportError::TimedOut) => Iteration::Idle,
            Err(e) => Iteration::Fatal(e),
        }
    }

    fn handle_packet(
        &self,
        transport: &mut dyn Transport,
        packet: &Packet,
        interface: &NetworkInterface,
    ) -> Outcome {
        let mac = packet.hardware_addr_string();

        if let Err(reason) = is_boot_request(packet) {
            debug!("Ignoring packet from {}: {}", mac, reason);
            return Outcome::Skipped;
        }

        let (machine, firmware) = match classify_client(packet) {
            Ok(classified) => classified,
            Err(e) => {
                info!("Unusable packet from {}: {}", mac, e);
                return Outcome::Dropped;
            }
        };

        debug!("Got valid request to boot {} ({})", mac, machine.arch);

        match self.booter.boot_spec(&machine) {
            Ok(Some(spec)) => debug!("Boot spec for {}: kernel {}", mac, spec.kernel),
            Ok(None) => {
                debug!("Ignoring packet from {}: no boot spec", mac);
                self.report(BootEvent::machine(
                    EventSource::Dhcp,
                    machine.mac,
                    MachineState::Ignored,
                    "Machine should not netboot",
                ));
                return Outcome::Declined;
            }
            Err(e) => {
                info!("Couldn't get bootspec for {}: {:#}", mac, e);
                return Outcome::Dropped;
            }
        }

        info!("Offering to boot {} ({})", mac, firmware);
        let event = if firmware == Firmware::PixiecoreIpxe {
            BootEvent::machine(
                EventSource::Dhcp,
                machine.mac,
                MachineState::ProxyDhcpIpxe,
                "Offering to boot iPXE",
            )
        } else {
            BootEvent::machine(
                EventSource::Dhcp,
                machine.mac,
                MachineState::ProxyDhcp,
                "Offering to boot",
            )
        };
        self.report(event);

        let server_ip = match interface_ip(interface) {
            Ok(ip) => ip,
            Err(e) => {
                warn!("Want to boot {} on {}, but {}", mac, interface.name, e);
                return Outcome::Dropped;
            }
        };

        let offer = match build_offer(packet, &machine, server_ip, firmware, self.http_port) {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Failed to construct ProxyDHCP offer for {}: {}", mac, e);
                return Outcome::Dropped;
            }
        };

        if let Err(e) = transport.send(&offer, interface) {
            warn!("Failed to send ProxyDHCP offer for {}: {}", mac, e);
            return Outcome::Dropped;
        }

        debug!("Sent offer to {}: file {:?}", mac, offer.boot_filename);
        Outcome::Offered
    }

    fn report(&self, event: BootEvent) {
        self.reporter.report(&event);
    }
}
