use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use super::{Socket, TcpSocket};
use crate::address::Host;
use crate::error::{NetworkError, Result};
use crate::logging::targets;
use crate::sys::{self, Family, Kind, RawHandle};
use crate::waitable::{WaitState, Waitable};

/// A non-blocking TCP listener.
///
/// Listens dual-stack where the OS allows it, otherwise IPv4 only.
/// Pending connections show up as read readiness.
#[derive(Debug, Default)]
pub struct TcpServerSocket {
    socket: Socket,
    disable_delayed_ack: bool,
}

impl TcpServerSocket {
    /// An invalid (closed) listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind and listen on `port` on all interfaces (0 picks an ephemeral port).
    ///
    /// Accepted sockets inherit `disable_delayed_ack`.
    pub fn open(&mut self, port: u16, disable_delayed_ack: bool, backlog: i32) -> Result<()> {
        self.close();

        let socket = match Self::listen(Family::V6, port, backlog) {
            Ok(socket) => socket,
            Err(err) => {
                tracing::debug!(
                    target: targets::SOCKET,
                    error = %err,
                    "dual-stack listen unavailable, falling back to IPv4"
                );
                Self::listen(Family::V4, port, backlog)?
            }
        };

        tracing::debug!(target: targets::SOCKET, port, "tcp listener open");
        self.socket = socket;
        self.disable_delayed_ack = disable_delayed_ack;
        Ok(())
    }

    fn listen(family: Family, port: u16, backlog: i32) -> Result<Socket> {
        let handle =
            sys::sys_socket(family, Kind::Stream).map_err(|e| NetworkError::os("socket", e))?;
        let socket = Socket::from_raw(handle);

        let addr = match family {
            Family::V4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            Family::V6 => {
                sys::sys_set_v6only(handle, false)
                    .map_err(|e| NetworkError::os("clear IPV6_V6ONLY", e))?;
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))
            }
        };

        sys::sys_set_reuseaddr(handle).map_err(|e| NetworkError::os("set SO_REUSEADDR", e))?;
        sys::sys_bind(handle, &addr).map_err(|e| NetworkError::os("bind", e))?;
        sys::sys_listen(handle, backlog).map_err(|e| NetworkError::os("listen", e))?;
        Ok(socket)
    }

    pub fn is_valid(&self) -> bool {
        self.socket.is_valid()
    }

    pub fn close(&mut self) {
        self.socket.close();
    }

    /// Accept one pending connection without blocking.
    ///
    /// Returns an invalid socket when nothing is pending.
    pub fn accept(&self) -> Result<TcpSocket> {
        let handle = self.socket.handle()?;
        let client = loop {
            match sys::sys_accept(handle) {
                Ok(client) => break client,
                Err(err) if sys::is_interrupted(&err) => continue,
                Err(err) if sys::is_would_block(&err) => return Ok(TcpSocket::new()),
                // The peer gave up before we got to it; look for the next one.
                Err(err) if err.kind() == std::io::ErrorKind::ConnectionAborted => continue,
                Err(err) => return Err(NetworkError::os("accept", err)),
            }
        };

        let accepted = TcpSocket::from_raw(client);
        if self.disable_delayed_ack {
            sys::sys_disable_delayed_ack(client)
                .map_err(|e| NetworkError::os("disable delayed ack", e))?;
        }
        Ok(accepted)
    }

    pub fn local_host(&self) -> Result<Host> {
        self.socket.local_host()
    }
}

impl Waitable for TcpServerSocket {
    fn raw_handle(&self) -> RawHandle {
        self.socket.raw_handle()
    }

    fn wait_state(&self) -> &Arc<WaitState> {
        self.socket.wait_state()
    }
}
