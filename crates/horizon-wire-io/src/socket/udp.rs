use std::net::SocketAddr;
use std::sync::Arc;

use super::Socket;
use crate::address::{Host, IpAddress};
use crate::error::{NetworkError, Result};
use crate::logging::targets;
use crate::sys::{self, Family, Kind, RawHandle};
use crate::waitable::{WaitState, Waitable};

/// A non-blocking UDP socket.
///
/// Datagrams are atomic: a send transmits the whole datagram or nothing, and
/// a receive yields one whole datagram (silently truncated to the buffer) or
/// nothing.
#[derive(Debug)]
pub struct UdpSocket {
    socket: Socket,
    family: Family,
    dual_stack: bool,
}

impl Default for UdpSocket {
    fn default() -> Self {
        Self {
            socket: Socket::new(),
            family: Family::V4,
            dual_stack: false,
        }
    }
}

impl UdpSocket {
    /// An invalid (closed) socket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to `port` on all interfaces with broadcast enabled.
    ///
    /// `ipv4` selects an IPv4 socket; otherwise an IPv6 socket is opened and
    /// made dual-stack when the OS allows it. Port 0 picks an ephemeral port.
    pub fn open(&mut self, port: u16, ipv4: bool) -> Result<()> {
        let address = if ipv4 {
            IpAddress::ANY_V4
        } else {
            IpAddress::UNSPECIFIED
        };
        self.bind(Host::new(address, port))
    }

    /// Bind to a specific local address with broadcast enabled.
    pub fn bind(&mut self, host: Host) -> Result<()> {
        self.close();

        let family = if host.address.is_ipv4() {
            Family::V4
        } else {
            Family::V6
        };
        let handle =
            sys::sys_socket(family, Kind::Datagram).map_err(|e| NetworkError::os("socket", e))?;
        let socket = Socket::from_raw(handle);

        let dual_stack = family == Family::V6
            && match sys::sys_set_v6only(handle, false) {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(
                        target: targets::SOCKET,
                        error = %err,
                        "udp socket stays IPv6-only"
                    );
                    false
                }
            };

        sys::sys_set_broadcast(handle).map_err(|e| NetworkError::os("set SO_BROADCAST", e))?;
        sys::sys_bind(handle, &host.to_socket_addr())
            .map_err(|e| NetworkError::os("bind", e))?;

        self.socket = socket;
        self.family = family;
        self.dual_stack = dual_stack;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.socket.is_valid()
    }

    /// Whether an IPv6 socket also reaches IPv4 peers.
    pub fn is_dual_stack(&self) -> bool {
        self.is_valid() && self.dual_stack
    }

    pub fn close(&mut self) {
        self.socket.close();
    }

    pub fn local_host(&self) -> Result<Host> {
        self.socket.local_host()
    }

    fn destination(&self, host: Host) -> Result<SocketAddr> {
        match (self.family, host.address.is_ipv4()) {
            (Family::V4, true) => Ok(host.to_socket_addr()),
            (Family::V6, false) => Ok(host.to_socket_addr()),
            (Family::V6, true) if self.dual_stack => Ok(host.to_socket_addr_v6()),
            _ => Err(NetworkError::InvalidAddress(format!(
                "{host} is not reachable from this socket's address family"
            ))),
        }
    }

    /// Send one datagram to `destination`.
    ///
    /// Returns the datagram length, or 0 if the socket cannot take it now.
    pub fn send_to(&self, buffer: &[u8], destination: Host) -> Result<usize> {
        let handle = self.socket.handle()?;
        let addr = self.destination(destination)?;
        loop {
            match sys::sys_send_to(handle, buffer, &addr) {
                Ok(sent) => return Ok(sent),
                Err(err) if sys::is_interrupted(&err) => continue,
                Err(err) if sys::is_would_block(&err) => return Ok(0),
                Err(err) => return Err(NetworkError::os("sendto", err)),
            }
        }
    }

    /// Receive one datagram.
    ///
    /// Returns the number of bytes stored (at most `buffer.len()`) and the
    /// sender, or 0 and an unspecified host when nothing is pending.
    pub fn recv_from(&self, buffer: &mut [u8]) -> Result<(usize, Host)> {
        let handle = self.socket.handle()?;
        loop {
            match sys::sys_recv_from(handle, buffer) {
                Ok((received, from)) => return Ok((received, Host::from(from))),
                Err(err) if sys::is_interrupted(&err) => continue,
                Err(err) if sys::is_would_block(&err) => return Ok((0, Host::default())),
                Err(err) => return Err(NetworkError::os("recvfrom", err)),
            }
        }
    }
}

impl Waitable for UdpSocket {
    fn raw_handle(&self) -> RawHandle {
        self.socket.raw_handle()
    }

    fn wait_state(&self) -> &Arc<WaitState> {
        self.socket.wait_state()
    }
}
