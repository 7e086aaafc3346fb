//! Linux transport that learns the arrival interface via `IP_PKTINFO`.

use std::io;
use std::mem;
use std::net::SocketAddrV4;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::time::Duration;

use pnet::datalink::NetworkInterface;
use socket2::{SockAddr, Socket};
use tracing::debug;

use super::{create_socket, destination, Transport, MAX_DATAGRAM_SIZE};
use crate::codec::{decode, encode};
use crate::domain::Packet;
use crate::error::TransportError;
use crate::interface::interface_by_index;

/// Room for one `in_pktinfo` control message, 8-byte aligned.
const CONTROL_BUF_WORDS: usize = 8;

/// A UDP transport reporting which interface each datagram arrived on.
///
/// Broadcast replies carry an outgoing `IP_PKTINFO` so they leave through
/// the interface the request came in on.
pub struct PktInfoTransport {
    socket: Socket,
}

impl PktInfoTransport {
    pub fn bind(addr: SocketAddrV4) -> Result<Self, TransportError> {
        let socket = create_socket(addr)?;
        enable_pktinfo(socket.as_raw_fd())?;
        Ok(Self { socket })
    }
}

impl Transport for PktInfoTransport {
    fn recv(&mut self) -> Result<(Packet, NetworkInterface), TransportError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, if_index) =
                recv_with_ifindex(self.socket.as_raw_fd(), &mut buf).map_err(TransportError::from_recv)?;

            let packet = match decode(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Skipping undecodable datagram: {}", e);
                    continue;
                }
            };

            let interface =
                interface_by_index(if_index).ok_or(TransportError::InterfaceNotFound(if_index))?;
            return Ok((packet, interface));
        }
    }

    fn send(&mut self, packet: &Packet, interface: &NetworkInterface) -> Result<(), TransportError> {
        let bytes = encode(packet)?;
        let dest = destination(packet);

        if dest.pin_interface {
            send_via_interface(self.socket.as_raw_fd(), &bytes, dest.addr, interface.index)?;
        } else {
            self.socket.send_to(&bytes, &SockAddr::from(dest.addr))?;
        }
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.socket.set_read_timeout(timeout)?;
        Ok(())
    }
}

fn enable_pktinfo(fd: RawFd) -> io::Result<()> {
    let on: libc::c_int = 1;
    // SAFETY: `on` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_PKTINFO,
            &on as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Receive one datagram, returning its length and arrival interface index.
fn recv_with_ifindex(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, u32)> {
    let mut control = [0u64; CONTROL_BUF_WORDS];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    // SAFETY: msghdr is plain data; every pointer set below refers to a
    // buffer that lives until the end of this function.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = mem::size_of_val(&control) as _;

    // SAFETY: `msg` is fully initialized and its buffers are valid.
    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut if_index = 0;
    // SAFETY: the CMSG_* helpers walk the control buffer the kernel filled,
    // bounded by msg_controllen.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_PKTINFO {
                let info: libc::in_pktinfo =
                    ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo);
                if_index = info.ipi_ifindex as u32;
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok((n as usize, if_index))
}

/// Send `data` to `dest` out of interface `if_index`.
fn send_via_interface(fd: RawFd, data: &[u8], dest: SocketAddrV4, if_index: u32) -> io::Result<()> {
    let mut control = [0u64; CONTROL_BUF_WORDS];
    let addr = SockAddr::from(dest);
    let mut iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };

    // SAFETY: as in `recv_with_ifindex`; the kernel only reads through
    // these pointers for sendmsg.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = addr.as_ptr() as *mut libc::c_void;
    msg.msg_namelen = addr.len();
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;

    // SAFETY: the control buffer is large enough for one in_pktinfo
    // message, checked by the assertion on CMSG_SPACE.
    unsafe {
        let space = libc::CMSG_SPACE(mem::size_of::<libc::in_pktinfo>() as u32) as usize;
        debug_assert!(space <= mem::size_of_val(&control));
        msg.msg_controllen = space as _;

        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::IPPROTO_IP;
        (*cmsg).cmsg_type = libc::IP_PKTINFO;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::in_pktinfo>() as u32) as _;

        let info = libc::in_pktinfo {
            ipi_ifindex: if_index as libc::c_int,
            ipi_spec_dst: libc::in_addr { s_addr: 0 },
            ipi_addr: libc::in_addr { s_addr: 0 },
        };
        ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut libc::in_pktinfo, info);
    }

    // SAFETY: `msg` and everything it points to are valid for the call.
    let n = unsafe { libc::sendmsg(fd, &msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
