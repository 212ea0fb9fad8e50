use std::io;
use std::net::Shutdown;
use std::sync::Arc;

use super::Socket;
use crate::address::Host;
use crate::error::{NetworkError, Result};
use crate::logging::targets;
use crate::sys::{self, Family, Kind, RawHandle};
use crate::waitable::{WaitState, Waitable};

/// A non-blocking TCP connection.
///
/// `open` starts the connect and returns immediately. Register the socket for
/// [`Interest::WRITE`](crate::Interest::WRITE) to learn when the connection
/// completes, then check [`take_error`](Self::take_error) for the outcome.
#[derive(Debug, Default)]
pub struct TcpSocket {
    socket: Socket,
}

impl TcpSocket {
    /// An invalid (closed) socket.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_raw(handle: RawHandle) -> Self {
        Self {
            socket: Socket::from_raw(handle),
        }
    }

    /// Start connecting to `host`, closing any previous connection first.
    ///
    /// An in-progress or interrupted connect counts as success; completion is
    /// observed later as write readiness.
    pub fn open(&mut self, host: Host, disable_delayed_ack: bool) -> Result<()> {
        self.close();

        let family = if host.address.is_ipv4() {
            Family::V4
        } else {
            Family::V6
        };
        let handle =
            sys::sys_socket(family, Kind::Stream).map_err(|e| NetworkError::os("socket", e))?;
        let socket = Socket::from_raw(handle);

        if disable_delayed_ack {
            sys::sys_disable_delayed_ack(handle)
                .map_err(|e| NetworkError::os("disable delayed ack", e))?;
        }

        match sys::sys_connect(handle, &host.to_socket_addr()) {
            Ok(()) => {}
            Err(err) if sys::is_connect_pending(&err) => {}
            Err(err) => return Err(NetworkError::os("connect", err)),
        }

        tracing::debug!(target: targets::SOCKET, %host, "tcp connect started");
        self.socket = socket;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.socket.is_valid()
    }

    pub fn close(&mut self) {
        self.socket.close();
    }

    /// Send as much of `buffer` as the socket accepts without blocking.
    ///
    /// Returns 0 when the send buffer is full.
    pub fn send(&self, buffer: &[u8]) -> Result<usize> {
        let handle = self.socket.handle()?;
        loop {
            match sys::sys_send(handle, buffer) {
                Ok(sent) => return Ok(sent),
                Err(err) if sys::is_interrupted(&err) => continue,
                Err(err) if sys::is_would_block(&err) => return Ok(0),
                Err(err) => return Err(NetworkError::os("send", err)),
            }
        }
    }

    /// Read whatever is available without blocking.
    ///
    /// Returns 0 when nothing is pending. A 0 after the wait set reported the
    /// socket readable means the peer closed the connection.
    pub fn recv(&self, buffer: &mut [u8]) -> Result<usize> {
        let handle = self.socket.handle()?;
        loop {
            match sys::sys_recv(handle, buffer) {
                Ok(received) => return Ok(received),
                Err(err) if sys::is_interrupted(&err) => continue,
                Err(err) if sys::is_would_block(&err) => return Ok(0),
                Err(err) => return Err(NetworkError::os("recv", err)),
            }
        }
    }

    /// Take the pending socket error, if any.
    ///
    /// After a connect finishes (write readiness), `Ok(None)` means it
    /// succeeded.
    pub fn take_error(&self) -> Result<Option<io::Error>> {
        let handle = self.socket.handle()?;
        sys::sys_take_error(handle).map_err(|e| NetworkError::os("getsockopt", e))
    }

    /// The connected peer.
    pub fn peer_host(&self) -> Result<Host> {
        let handle = self.socket.handle()?;
        sys::sys_peer_addr(handle)
            .map(Host::from)
            .map_err(|e| NetworkError::os("getpeername", e))
    }

    pub fn local_host(&self) -> Result<Host> {
        self.socket.local_host()
    }

    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        let handle = self.socket.handle()?;
        sys::sys_shutdown(handle, how).map_err(|e| NetworkError::os("shutdown", e))
    }
}

impl Waitable for TcpSocket {
    fn raw_handle(&self) -> RawHandle {
        self.socket.raw_handle()
    }

    fn wait_state(&self) -> &Arc<WaitState> {
        self.socket.wait_state()
    }
}
