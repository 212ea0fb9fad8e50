//! Non-blocking sockets.
//!
//! Every socket owns exactly one native handle and is move-only. A socket
//! starts out invalid; `open` creates the handle, and `close` (also run on
//! drop) releases it. Transfers report "would block" as zero bytes, retry
//! signal interruptions internally, and raise [`NetworkError`] for anything
//! else.

mod server;
mod tcp;
mod udp;

use std::sync::Arc;

pub use server::TcpServerSocket;
pub use tcp::TcpSocket;
pub use udp::UdpSocket;

use crate::address::Host;
use crate::error::{NetworkError, Result};
use crate::logging::targets;
use crate::sys::{self, INVALID_HANDLE, RawHandle};
use crate::waitable::{WaitState, Waitable};

/// The handle-owning core shared by every socket type.
#[derive(Debug)]
pub struct Socket {
    handle: RawHandle,
    state: Arc<WaitState>,
}

impl Socket {
    /// An invalid (closed) socket.
    pub fn new() -> Self {
        Self {
            handle: INVALID_HANDLE,
            state: WaitState::new(),
        }
    }

    pub(crate) fn from_raw(handle: RawHandle) -> Self {
        Self {
            handle,
            state: WaitState::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.handle != INVALID_HANDLE
    }

    /// The native handle, or [`NetworkError::InvalidSocket`] when closed.
    pub(crate) fn handle(&self) -> Result<RawHandle> {
        if self.is_valid() {
            Ok(self.handle)
        } else {
            Err(NetworkError::InvalidSocket)
        }
    }

    /// Release the handle. Safe to call repeatedly; always clears readiness.
    pub fn close(&mut self) {
        self.state.clear_readiness();
        if !self.is_valid() {
            return;
        }
        if self.state.is_registered() {
            tracing::warn!(
                target: targets::SOCKET,
                "closing a socket that is still registered with a wait set"
            );
        }
        sys::sys_close(self.handle);
        self.handle = INVALID_HANDLE;
    }

    /// The locally bound address.
    pub fn local_host(&self) -> Result<Host> {
        let handle = self.handle()?;
        sys::sys_local_addr(handle)
            .map(Host::from)
            .map_err(|e| NetworkError::os("getsockname", e))
    }
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

impl Waitable for Socket {
    fn raw_handle(&self) -> RawHandle {
        self.handle
    }

    fn wait_state(&self) -> &Arc<WaitState> {
        &self.state
    }
}

static_assertions::assert_impl_all!(Socket: Send, Sync);
static_assertions::assert_not_impl_any!(Socket: Clone, Copy);
static_assertions::assert_not_impl_any!(TcpSocket: Clone);
static_assertions::assert_not_impl_any!(UdpSocket: Clone);
static_assertions::assert_not_impl_any!(TcpServerSocket: Clone);
