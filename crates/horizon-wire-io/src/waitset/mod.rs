//! Readiness multiplexing over the platform's native facility.
//!
//! A [`WaitSet`] holds a fixed number of registrations and blocks a thread
//! until one of the registered [`Waitable`]s becomes ready:
//!
//! - Linux and Android use `epoll`.
//! - macOS, iOS and the BSDs use `kqueue`.
//! - Windows attaches one WinSock event object per socket and waits on all of
//!   them at once. That facility caps a wait set at 64 registrations and only
//!   reports socket write readiness after a send would have blocked.
//!
//! All backends report level-triggered readiness: an object stays ready until
//! the condition is consumed.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use horizon_wire_io::{Interest, UdpSocket, WaitSet, Waitable};
//!
//! let mut socket = UdpSocket::new();
//! socket.open(0, true)?;
//!
//! let mut wait_set = WaitSet::new(4)?;
//! wait_set.add(&socket, Interest::READ)?;
//!
//! if wait_set.wait(Some(Duration::from_millis(100)), None)? > 0 {
//!     assert!(socket.readiness().is_readable());
//! }
//! wait_set.remove(&socket);
//! # Ok::<(), horizon_wire_io::NetworkError>(())
//! ```

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use slotmap::{Key, KeyData, SlotMap, new_key_type};

use crate::error::{NetworkError, Result};
use crate::logging::targets;
use crate::sys::{INVALID_HANDLE, RawHandle};
use crate::waitable::{Interest, Readiness, WaitState, Waitable};

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) type Poller = epoll::Epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub(crate) type Poller = kqueue::Kqueue;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) type Poller = windows::EventSelect;

new_key_type! {
    /// Identifies one registration in a [`WaitSet`].
    pub struct WaitKey;
}

/// A native readiness facility.
///
/// Tokens are opaque to the backend; it hands them back with each event.
pub(crate) trait Multiplexer: Sized {
    /// Largest number of registrations the facility supports.
    const MAX_CAPACITY: usize;

    fn new(capacity: usize) -> io::Result<Self>;

    fn register(&mut self, handle: RawHandle, token: u64, interest: Interest) -> io::Result<()>;

    fn reregister(&mut self, handle: RawHandle, token: u64, interest: Interest)
    -> io::Result<()>;

    fn deregister(&mut self, handle: RawHandle, token: u64) -> io::Result<()>;

    /// Block once for at most `timeout` (forever if `None`), appending
    /// `(token, readiness)` pairs. A token may appear more than once.
    fn poll(&mut self, timeout: Option<Duration>, events: &mut Vec<(u64, Readiness)>)
    -> io::Result<()>;
}

/// Milliseconds for a native timeout, rounded up so a wait never ends early.
pub(crate) fn timeout_millis(timeout: Duration) -> u128 {
    timeout.as_nanos().div_ceil(1_000_000)
}

struct Registration {
    handle: RawHandle,
    interest: Interest,
    state: Arc<WaitState>,
}

/// A fixed-capacity set of registered waitables.
///
/// Waitables must be removed before they are closed. Dropping the wait set
/// removes anything still registered.
pub struct WaitSet {
    poller: Poller,
    capacity: usize,
    registrations: SlotMap<WaitKey, Registration>,
    by_state: HashMap<usize, WaitKey>,
    events: Vec<(u64, Readiness)>,
    merged: Vec<(WaitKey, Readiness)>,
}

impl WaitSet {
    /// Create a wait set with room for `capacity` registrations.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity > Poller::MAX_CAPACITY {
            return Err(NetworkError::CapacityUnsupported {
                requested: capacity,
                max: Poller::MAX_CAPACITY,
            });
        }

        let poller = Poller::new(capacity).map_err(|e| NetworkError::os("create wait set", e))?;
        Ok(Self {
            poller,
            capacity,
            registrations: SlotMap::with_capacity_and_key(capacity),
            by_state: HashMap::with_capacity(capacity),
            events: Vec::with_capacity(capacity),
            merged: Vec::with_capacity(capacity),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of current registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// The key a waitable is registered under, if it belongs to this set.
    pub fn key_of(&self, waitable: &dyn Waitable) -> Option<WaitKey> {
        self.by_state.get(&state_id(waitable.wait_state())).copied()
    }

    /// Register a waitable.
    ///
    /// Fails if it already belongs to a wait set, if its handle is closed, or
    /// if the set is full.
    pub fn add(&mut self, waitable: &dyn Waitable, interest: Interest) -> Result<WaitKey> {
        let handle = waitable.raw_handle();
        if handle == INVALID_HANDLE {
            return Err(NetworkError::InvalidSocket);
        }
        if self.registrations.len() >= self.capacity {
            return Err(NetworkError::WaitSetFull {
                capacity: self.capacity,
            });
        }

        let state = waitable.wait_state();
        if !state.try_register() {
            return Err(NetworkError::AlreadyRegistered);
        }

        let key = self.registrations.insert(Registration {
            handle,
            interest,
            state: Arc::clone(state),
        });

        if let Err(err) = self.poller.register(handle, key.data().as_ffi(), interest) {
            self.registrations.remove(key);
            state.unregister();
            return Err(NetworkError::os("register", err));
        }

        self.by_state.insert(state_id(state), key);
        tracing::trace!(target: targets::WAIT_SET, ?key, ?interest, "registered");
        Ok(key)
    }

    /// Replace the interest of a registered waitable.
    pub fn change(&mut self, waitable: &dyn Waitable, interest: Interest) -> Result<()> {
        let key = self.key_of(waitable).ok_or(NetworkError::NotRegistered)?;
        let registration = &mut self.registrations[key];

        self.poller
            .reregister(registration.handle, key.data().as_ffi(), interest)
            .map_err(|e| NetworkError::os("change interest", e))?;
        registration.interest = interest;
        Ok(())
    }

    /// Unregister a waitable.
    ///
    /// Never fails: a native error is logged and the registration is dropped
    /// anyway, so this is safe to call from destructors.
    pub fn remove(&mut self, waitable: &dyn Waitable) {
        let Some(key) = self.key_of(waitable) else {
            tracing::trace!(target: targets::WAIT_SET, "remove of an unregistered waitable");
            return;
        };
        self.remove_key(key);
    }

    fn remove_key(&mut self, key: WaitKey) {
        let Some(registration) = self.registrations.remove(key) else {
            return;
        };
        self.by_state.remove(&state_id(&registration.state));

        if let Err(err) = self.poller.deregister(registration.handle, key.data().as_ffi()) {
            tracing::warn!(
                target: targets::WAIT_SET,
                ?key,
                error = %err,
                "failed to deregister from the native wait facility"
            );
        }
        registration.state.unregister();
    }

    /// Block until at least one registered waitable is ready or `timeout`
    /// elapses (`None` waits indefinitely).
    ///
    /// Returns the number of ready waitables, 0 only on timeout. Each ready
    /// waitable is counted once and its readiness flags are replaced; flags of
    /// waitables not reported are left untouched. When `ready` is supplied it
    /// is cleared and filled with the keys of the ready waitables.
    ///
    /// Signal interruptions are retried with the remaining time, so the call
    /// may return later than `timeout` but never earlier.
    pub fn wait(
        &mut self,
        timeout: Option<Duration>,
        mut ready: Option<&mut Vec<WaitKey>>,
    ) -> Result<usize> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        if let Some(ready) = ready.as_deref_mut() {
            ready.clear();
        }

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));

            self.events.clear();
            match self.poller.poll(remaining, &mut self.events) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    tracing::trace!(target: targets::WAIT_SET, "wait interrupted, retrying");
                    continue;
                }
                Err(err) => return Err(NetworkError::os("wait", err)),
            }

            let count = self.publish(ready.as_deref_mut());
            if count > 0 {
                return Ok(count);
            }

            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Ok(0);
            }
        }
    }

    fn publish(&mut self, mut ready: Option<&mut Vec<WaitKey>>) -> usize {
        self.merged.clear();
        for &(token, readiness) in &self.events {
            let key = WaitKey::from(KeyData::from_ffi(token));
            let Some(registration) = self.registrations.get(key) else {
                continue;
            };
            let readiness = Readiness::from_bits(
                readiness.bits() & registration.interest.reportable().bits(),
            );
            if readiness.is_empty() {
                continue;
            }
            match self.merged.iter_mut().find(|(k, _)| *k == key) {
                Some((_, merged)) => *merged |= readiness,
                None => self.merged.push((key, readiness)),
            }
        }

        for &(key, readiness) in &self.merged {
            self.registrations[key].state.set_readiness(readiness);
            if let Some(ready) = ready.as_deref_mut() {
                ready.push(key);
            }
        }
        self.merged.len()
    }
}

impl Drop for WaitSet {
    fn drop(&mut self) {
        let keys: Vec<WaitKey> = self.registrations.keys().collect();
        for key in keys {
            self.remove_key(key);
        }
    }
}

fn state_id(state: &Arc<WaitState>) -> usize {
    Arc::as_ptr(state) as usize
}
