//! Lookup requests and transaction id allocation.

use std::collections::BTreeMap;
use std::fmt;

use horizon_wire_io::Host;
use slotmap::new_key_type;

use crate::message::RecordType;

new_key_type! {
    /// Identifies a request in the worker's arena.
    pub(crate) struct RequestKey;
}

/// Identifies one [`HostNameResolver`](crate::HostNameResolver) handle.
pub(crate) type HandleId = u64;

/// The outcome delivered to a lookup callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    /// The name resolved. The port is always 0.
    Resolved(Host),
    /// The server reported that the name does not exist.
    NoSuchHost,
    /// No usable reply arrived before the deadline.
    Timeout,
    /// The server's reply was malformed or reported a failure.
    DnsError,
    /// The lookup could not be carried out (no DNS server, socket failure).
    Error,
}

impl ResolveStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// The resolved host, if any.
    pub fn host(&self) -> Option<Host> {
        match self {
            Self::Resolved(host) => Some(*host),
            _ => None,
        }
    }
}

impl fmt::Display for ResolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(host) => write!(f, "resolved to {}", host.address),
            Self::NoSuchHost => f.write_str("no such host"),
            Self::Timeout => f.write_str("timed out"),
            Self::DnsError => f.write_str("DNS error"),
            Self::Error => f.write_str("error"),
        }
    }
}

pub(crate) type Callback = Box<dyn FnOnce(ResolveStatus) + Send + 'static>;

/// Where a request is in its lifecycle.
///
/// A request is only cancellable before `Completing`; once the worker has
/// taken the callback it runs to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestState {
    /// In the send queue.
    Queued,
    /// Sent; waiting for the reply or the deadline.
    AwaitingReply,
    /// The callback is running or about to run.
    Completing,
}

pub(crate) struct Request {
    pub handle: HandleId,
    pub hostname: String,
    pub server: Option<Host>,
    pub id: u16,
    pub record_type: RecordType,
    pub expiry: u32,
    pub state: RequestState,
    pub callback: Option<Callback>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("handle", &self.handle)
            .field("hostname", &self.hostname)
            .field("server", &self.server)
            .field("id", &self.id)
            .field("record_type", &self.record_type)
            .field("expiry", &self.expiry)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Transaction ids of outstanding requests.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator {
    ids: BTreeMap<u16, RequestKey>,
}

impl IdAllocator {
    /// Pick an unused id: 0 when nothing is outstanding, else one past the
    /// largest id in use, else the lowest gap. `None` when all are taken.
    pub fn allocate(&self) -> Option<u16> {
        let Some((&max, _)) = self.ids.last_key_value() else {
            return Some(0);
        };
        if let Some(next) = max.checked_add(1) {
            return Some(next);
        }

        let mut expected: u16 = 0;
        for &id in self.ids.keys() {
            if id != expected {
                return Some(expected);
            }
            expected = expected.checked_add(1)?;
        }
        None
    }

    pub fn insert(&mut self, id: u16, key: RequestKey) {
        let previous = self.ids.insert(id, key);
        debug_assert!(previous.is_none(), "transaction id {id} reused");
    }

    /// Release `id` if it still belongs to `key`.
    pub fn remove(&mut self, id: u16, key: RequestKey) {
        if self.ids.get(&id) == Some(&key) {
            self.ids.remove(&id);
        }
    }

    pub fn get(&self, id: u16) -> Option<RequestKey> {
        self.ids.get(&id).copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ids.len()
    }
}
