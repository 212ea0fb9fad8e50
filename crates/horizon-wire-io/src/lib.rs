//! Readiness multiplexing and non-blocking sockets for Horizon Wire.
//!
//! This crate provides the low-level I/O layer:
//!
//! - **Wait sets**: [`WaitSet`] blocks one thread until any of a fixed number
//!   of registered objects becomes readable, writable or errored, using
//!   `epoll`, `kqueue` or WinSock event selection depending on the platform.
//! - **Sockets**: [`TcpSocket`], [`TcpServerSocket`] and [`UdpSocket`] are
//!   non-blocking, move-only wrappers over native handles. Every socket is a
//!   [`Waitable`].
//! - **Addresses**: [`IpAddress`] stores IPv4 and IPv6 uniformly as a 128-bit
//!   value; [`Host`] pairs it with a port.
//! - **Wakeups**: [`channel`] lets other threads interrupt a blocked wait and
//!   hand it messages.
//!
//! # Readiness
//!
//! A wait returns the number of ready objects and records each one's
//! [`Readiness`] on the object itself:
//!
//! ```no_run
//! use std::time::Duration;
//! use horizon_wire_io::{Interest, UdpSocket, WaitSet, Waitable};
//!
//! let mut socket = UdpSocket::new();
//! socket.open(0, true)?;
//!
//! let mut wait_set = WaitSet::new(8)?;
//! wait_set.add(&socket, Interest::READ)?;
//!
//! let mut buffer = [0u8; 512];
//! while wait_set.wait(Some(Duration::from_secs(1)), None)? > 0 {
//!     if socket.readiness().is_readable() {
//!         let (len, from) = socket.recv_from(&mut buffer)?;
//!         println!("{len} bytes from {from}");
//!     }
//! }
//! wait_set.remove(&socket);
//! # Ok::<(), horizon_wire_io::NetworkError>(())
//! ```
//!
//! # Non-blocking transfers
//!
//! Sends and receives never block. A transfer that cannot make progress
//! reports 0 bytes; signal interruptions are retried internally. Every other
//! failure is a [`NetworkError`].

pub mod address;
pub mod error;
pub mod logging;
pub mod notify;
pub mod socket;
pub(crate) mod sys;
pub mod waitable;
pub mod waitset;

pub use address::{Host, IpAddress};
pub use error::{NetworkError, Result};
pub use notify::{Notifier, NotifyHandle, channel};
pub use socket::{Socket, TcpServerSocket, TcpSocket, UdpSocket};
pub use sys::{INVALID_HANDLE, RawHandle};
pub use waitable::{Interest, Readiness, WaitState, Waitable};
pub use waitset::{WaitKey, WaitSet};
