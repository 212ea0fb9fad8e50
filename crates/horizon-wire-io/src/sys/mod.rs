//! Native socket calls.
//!
//! The platform module is selected at compile time and exposes the same set of
//! `sys_*` functions on every target. Sockets created here are always
//! non-blocking.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::*;

#[cfg(unix)]
pub use unix::{INVALID_HANDLE, RawHandle};
#[cfg(windows)]
pub use windows::{INVALID_HANDLE, RawHandle};

/// Address family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    V4,
    V6,
}

/// Socket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Stream,
    Datagram,
}

/// The call could not complete without blocking.
pub(crate) fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// The call was interrupted by a signal.
pub(crate) fn is_interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

/// A non-blocking connect has started and will finish later.
pub(crate) fn is_connect_pending(err: &io::Error) -> bool {
    is_would_block(err) || is_interrupted(err) || err.raw_os_error() == Some(IN_PROGRESS)
}
