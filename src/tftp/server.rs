//! TFTP server implementation.
//!
//! A read-only TFTP server for handing boot images to PXE ROMs.
//! Implements RFC 1350 (TFTP) with RFC 2347 (options), RFC 2348 (blksize)
//! and RFC 2349 (tsize) support. What a path resolves to is up to the
//! `TransferHandler`.

use std::collections::HashMap;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, error, info, warn};

/// TFTP opcodes
const OPCODE_RRQ: u16 = 1;
const OPCODE_WRQ: u16 = 2;
const OPCODE_DATA: u16 = 3;
const OPCODE_ACK: u16 = 4;
const OPCODE_ERROR: u16 = 5;
const OPCODE_OACK: u16 = 6;

/// TFTP error codes
const ERROR_FILE_NOT_FOUND: u16 = 1;
const ERROR_ACCESS_VIOLATION: u16 = 2;
const ERROR_ILLEGAL_OPERATION: u16 = 4;

const DEFAULT_BLOCK_SIZE: usize = 512;
/// RFC 2348 bounds
const MIN_BLOCK_SIZE: usize = 8;
const MAX_BLOCK_SIZE: usize = 65464;

const MAX_RETRIES: u32 = 5;
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Decides what a TFTP read request gets.
pub trait TransferHandler: Send + Sync {
    /// Open `path` for `peer`. Returns the content and its exact length.
    fn open(&self, path: &str, peer: SocketAddr) -> Result<(Box<dyn Read + Send>, u64)>;

    /// Called once per read request with the bytes sent or the failure.
    fn transfer_finished(&self, peer: SocketAddr, path: &str, outcome: &Result<u64>);
}

/// A parsed read request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadRequest {
    filename: String,
    mode: String,
    /// RFC 2347 options, names lowercased
    options: HashMap<String, String>,
}

impl ReadRequest {
    /// Parse the body of an RRQ (everything after the opcode).
    fn parse(body: &[u8]) -> Option<Self> {
        let mut parts = body.split(|&b| b == 0);

        let filename = std::str::from_utf8(parts.next()?).ok()?;
        if filename.is_empty() {
            return None;
        }
        let mode = std::str::from_utf8(parts.next()?).ok()?.to_lowercase();

        let mut options = HashMap::new();
        while let (Some(name), Some(value)) = (parts.next(), parts.next()) {
            if let (Ok(name), Ok(value)) = (std::str::from_utf8(name), std::str::from_utf8(value)) {
                if !name.is_empty() && !value.is_empty() {
                    options.insert(name.to_lowercase(), value.to_string());
                }
            }
        }

        Some(Self {
            filename: filename.strip_prefix('/').unwrap_or(filename).to_string(),
            mode,
            options,
        })
    }

    /// Block size the client asked for, clamped to what RFC 2348 allows.
    fn block_size(&self) -> Option<usize> {
        self.options
            .get("blksize")
            .and_then(|v| v.parse::<usize>().ok())
            .map(|size| size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE))
    }

    fn wants_tsize(&self) -> bool {
        self.options.contains_key("tsize")
    }
}

/// TFTP server handing out whatever the handler resolves.
pub struct TftpServer {
    handler: Arc<dyn TransferHandler>,
    bind_addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl TftpServer {
    pub fn new(handler: Arc<dyn TransferHandler>, bind_addr: SocketAddr) -> Self {
        Self {
            handler,
            bind_addr,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle to stop the server.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Bind the listening socket and mark the server running.
    pub fn bind(&self) -> Result<UdpSocket> {
        let socket = UdpSocket::bind(self.bind_addr)
            .with_context(|| format!("Failed to bind TFTP socket to {}", self.bind_addr))?;
        info!("TFTP server listening on {}", self.bind_addr);

        self.running.store(true, Ordering::SeqCst);
        Ok(socket)
    }

    /// Serve read requests arriving on `socket` until `running` is cleared.
    pub fn serve(&self, socket: UdpSocket) -> Result<()> {
        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .context("Failed to set socket timeout")?;

        let mut buf = [0u8; 2048];

        while self.running.load(Ordering::SeqCst) {
            let (len, peer) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(ref e) if is_idle_wakeup(e) => continue,
                Err(e) => {
                    error!("TFTP receive error: {}", e);
                    continue;
                }
            };

            if len < 4 {
                continue;
            }

            match u16::from_be_bytes([buf[0], buf[1]]) {
                OPCODE_RRQ => match ReadRequest::parse(&buf[2..len]) {
                    Some(request) => self.spawn_transfer(request, peer),
                    None => debug!("Malformed read request from {}", peer),
                },
                OPCODE_WRQ => {
                    warn!("Write request from {} denied (read-only server)", peer);
                    send_error(&socket, peer, ERROR_ACCESS_VIOLATION, "Write not supported");
                }
                opcode => debug!("Unexpected opcode {} from {}", opcode, peer),
            }
        }

        info!("TFTP server stopped");
        Ok(())
    }

    fn spawn_transfer(&self, request: ReadRequest, peer: SocketAddr) {
        let handler = self.handler.clone();

        thread::spawn(move || {
            debug!("{} requesting {:?}", peer, request.filename);
            let outcome = transfer(handler.as_ref(), &request, peer);
            match &outcome {
                Ok(bytes) => info!("TFTP: Sent {:?} to {} ({} bytes)", request.filename, peer, bytes),
                Err(e) => warn!("TFTP: Send of {:?} to {} failed: {:#}", request.filename, peer, e),
            }
            handler.transfer_finished(peer, &request.filename, &outcome);
        });
    }
}

/// Run one transfer from a fresh ephemeral socket. Returns bytes sent.
fn transfer(handler: &dyn TransferHandler, request: &ReadRequest, peer: SocketAddr) -> Result<u64> {
    let socket = UdpSocket::bind((local_ip_for(peer), 0)).context("Failed to bind transfer socket")?;
    socket.set_read_timeout(Some(TRANSFER_TIMEOUT))?;
    socket.set_write_timeout(Some(TRANSFER_TIMEOUT))?;

    if request.mode != "octet" {
        send_error(&socket, peer, ERROR_ILLEGAL_OPERATION, "Only octet mode is supported");
        bail!("unsupported transfer mode {:?}", request.mode);
    }

    let (mut reader, size) = match handler.open(&request.filename, peer) {
        Ok(opened) => opened,
        Err(e) => {
            send_error(&socket, peer, ERROR_FILE_NOT_FOUND, &e.to_string());
            return Err(e);
        }
    };

    let block_size = request.block_size().unwrap_or(DEFAULT_BLOCK_SIZE);
    let tsize = request.wants_tsize().then_some(size);

    if request.block_size().is_some() || tsize.is_some() {
        let oack = oack_packet(request.block_size(), tsize);
        send_and_wait(&socket, peer, &oack, 0)?;
    }

    let mut block_num: u16 = 1;
    let mut buf = vec![0u8; block_size];
    let mut total_sent = 0u64;

    loop {
        let bytes_read = read_block(reader.as_mut(), &mut buf)?;
        let packet = data_packet(block_num, &buf[..bytes_read]);
        send_and_wait(&socket, peer, &packet, block_num)?;

        total_sent += bytes_read as u64;
        if bytes_read < block_size {
            return Ok(total_sent);
        }
        block_num = block_num.wrapping_add(1);
    }
}

/// Send `packet` and wait for the ACK of `block`, resending on timeout.
fn send_and_wait(socket: &UdpSocket, peer: SocketAddr, packet: &[u8], block: u16) -> Result<()> {
    let mut retries = 0;
    let mut ack = [0u8; 516];

    socket.send_to(packet, peer)?;
    loop {
        match socket.recv_from(&mut ack) {
            Ok((len, from)) if from == peer && len >= 4 => {
                let opcode = u16::from_be_bytes([ack[0], ack[1]]);
                let acked = u16::from_be_bytes([ack[2], ack[3]]);
                if opcode == OPCODE_ACK && acked == block {
                    return Ok(());
                }
                if opcode == OPCODE_ERROR {
                    let message = String::from_utf8_lossy(&ack[4..len]);
                    bail!("client sent error {}: {}", acked, message.trim_end_matches('\0'));
                }
                // Duplicate or stale ACK, keep waiting.
            }
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(anyhow!("Transfer timeout after {} retries", MAX_RETRIES));
                }
                debug!("TFTP: Retry {} for block {}", retries, block);
                socket.send_to(packet, peer)?;
            }
            Err(e) => return Err(anyhow!("ACK receive error: {}", e)),
        }
    }
}

/// A receive that returned without data: the poll interval elapsed or a
/// signal (such as Ctrl-C) interrupted the read.
fn is_idle_wakeup(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Fill `buf` as far as the reader allows. Short only at end of data.
fn read_block(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reply from the address the client talked to when it is loopback, so
/// local clients can match the transfer source.
fn local_ip_for(peer: SocketAddr) -> IpAddr {
    if peer.ip().is_loopback() {
        peer.ip()
    } else {
        Ipv4Addr::UNSPECIFIED.into()
    }
}

fn oack_packet(block_size: Option<usize>, tsize: Option<u64>) -> Vec<u8> {
    let mut oack = OPCODE_OACK.to_be_bytes().to_vec();
    if let Some(size) = block_size {
        oack.extend_from_slice(b"blksize\0");
        oack.extend_from_slice(size.to_string().as_bytes());
        oack.push(0);
    }
    if let Some(size) = tsize {
        oack.extend_from_slice(b"tsize\0");
        oack.extend_from_slice(size.to_string().as_bytes());
        oack.push(0);
    }
    oack
}

fn data_packet(block: u16, data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + data.len());
    packet.extend_from_slice(&OPCODE_DATA.to_be_bytes());
    packet.extend_from_slice(&block.to_be_bytes());
    packet.extend_from_slice(data);
    packet
}

fn send_error(socket: &UdpSocket, addr: SocketAddr, code: u16, message: &str) {
    let mut packet = Vec::with_capacity(5 + message.len());
    packet.extend_from_slice(&OPCODE_ERROR.to_be_bytes());
    packet.extend_from_slice(&code.to_be_bytes());
    packet.extend_from_slice(message.as_bytes());
    packet.push(0);

    let _ = socket.send_to(&packet, addr);
}
