//! Cross-thread wakeups for a thread blocked in [`WaitSet::wait`].
//!
//! [`channel`] pairs a message queue with a loopback UDP socket. Senders push
//! a message and fire a one-byte datagram at the socket; the receiving
//! [`Notifier`] is registered for read interest like any other waitable, and
//! [`Notifier::drain`] empties both the socket and the queue.
//!
//! [`WaitSet::wait`]: crate::WaitSet::wait

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::address::{Host, IpAddress};
use crate::error::Result;
use crate::logging::targets;
use crate::socket::UdpSocket;
use crate::sys::RawHandle;
use crate::waitable::{WaitState, Waitable};

const WAKE: [u8; 1] = [1];

/// Create a connected notifier pair.
pub fn channel<T>() -> Result<(Notifier<T>, NotifyHandle<T>)> {
    let mut socket = UdpSocket::new();
    socket.bind(Host::new(IpAddress::LOCALHOST_V4, 0))?;
    let target = socket.local_host()?;

    let mut sender = UdpSocket::new();
    sender.bind(Host::new(IpAddress::LOCALHOST_V4, 0))?;

    let (tx, rx) = crossbeam_channel::unbounded();
    tracing::trace!(target: targets::NOTIFY, %target, "notifier bound");

    Ok((
        Notifier { socket, rx },
        NotifyHandle {
            tx,
            wake: Arc::new(WakeSocket {
                socket: sender,
                target,
            }),
        },
    ))
}

#[derive(Debug)]
struct WakeSocket {
    socket: UdpSocket,
    target: Host,
}

/// The sending half. Cheap to clone and usable from any thread.
#[derive(Debug)]
pub struct NotifyHandle<T> {
    tx: Sender<T>,
    wake: Arc<WakeSocket>,
}

impl<T> Clone for NotifyHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            wake: Arc::clone(&self.wake),
        }
    }
}

impl<T> NotifyHandle<T> {
    /// Queue `message` and wake the receiving thread.
    ///
    /// Returns false once the [`Notifier`] is gone.
    pub fn send(&self, message: T) -> bool {
        if self.tx.send(message).is_err() {
            return false;
        }
        match self.wake.socket.send_to(&WAKE, self.wake.target) {
            Ok(sent) if sent == WAKE.len() => {}
            Ok(_) => {
                // Buffer full: the receiver already has wakes queued.
                tracing::trace!(target: targets::NOTIFY, "wake datagram dropped");
            }
            Err(err) => {
                tracing::warn!(target: targets::NOTIFY, error = %err, "failed to send wake datagram");
            }
        }
        true
    }
}

/// The receiving half. Register it with a [`WaitSet`](crate::WaitSet) for
/// [`Interest::READ`](crate::Interest::READ).
#[derive(Debug)]
pub struct Notifier<T> {
    socket: UdpSocket,
    rx: Receiver<T>,
}

impl<T> Notifier<T> {
    /// Consume pending wakeups and return every queued message.
    pub fn drain(&self) -> Vec<T> {
        let mut scratch = [0u8; 16];
        loop {
            match self.socket.recv_from(&mut scratch) {
                Ok((0, _)) => break,
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(target: targets::NOTIFY, error = %err, "failed to read wake datagram");
                    break;
                }
            }
        }
        self.rx.try_iter().collect()
    }
}

impl<T> Waitable for Notifier<T> {
    fn raw_handle(&self) -> RawHandle {
        self.socket.raw_handle()
    }

    fn wait_state(&self) -> &Arc<WaitState> {
        self.socket.wait_state()
    }
}
