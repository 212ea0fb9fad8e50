//! Per-lookup resolver handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use horizon_wire_io::Host;
use parking_lot::Mutex;

use crate::error::{ResolveError, Result};
use crate::lookup::{LookupService, Shared};
use crate::request::{HandleId, ResolveStatus};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// A handle that runs one hostname lookup at a time.
///
/// The lookup itself happens on the resolver's worker thread, which also
/// invokes the callback. Dropping the handle cancels an outstanding lookup.
///
/// # Example
///
/// ```no_run
/// use horizon_wire_dns::{HostNameResolver, ResolveStatus};
///
/// let resolver = HostNameResolver::new();
/// resolver.resolve_async("example.com", 2_000, None, |status| match status {
///     ResolveStatus::Resolved(host) => println!("example.com is {}", host.address),
///     other => println!("lookup failed: {other}"),
/// })?;
/// # Ok::<(), horizon_wire_dns::ResolveError>(())
/// ```
#[derive(Debug)]
pub struct HostNameResolver {
    id: HandleId,
    service: Arc<LookupService>,
    /// The generation that received the latest submission.
    generation: Mutex<Option<Arc<Shared>>>,
}

impl HostNameResolver {
    /// A handle on the process-wide [`LookupService`].
    pub fn new() -> Self {
        Self::with_service(LookupService::global())
    }

    /// A handle on a specific service.
    pub fn with_service(service: Arc<LookupService>) -> Self {
        Self {
            id: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
            service,
            generation: Mutex::new(None),
        }
    }

    /// Start resolving `hostname`, querying AAAA first and falling back to A
    /// when the server reports that no such name exists.
    ///
    /// `dns_server` overrides the service's default server for this lookup.
    /// `callback` runs exactly once on the worker thread unless the lookup is
    /// cancelled, and never runs if this returns an error.
    ///
    /// The callback may start a new lookup on this handle.
    pub fn resolve_async<F>(
        &self,
        hostname: &str,
        timeout_ms: u32,
        dns_server: Option<Host>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(ResolveStatus) + Send + 'static,
    {
        let mut generation = self.generation.lock();
        if let Some(shared) = generation.as_ref()
            && shared.is_pending(self.id)
        {
            return Err(ResolveError::AlreadyInProgress);
        }

        let shared =
            self.service
                .submit(self.id, hostname, timeout_ms, dns_server, Box::new(callback))?;
        *generation = Some(shared);
        Ok(())
    }

    /// Resolve `hostname` and wait for the outcome.
    ///
    /// Must not be called from a lookup callback: the worker would wait on
    /// itself.
    pub fn resolve_blocking(
        &self,
        hostname: &str,
        timeout_ms: u32,
        dns_server: Option<Host>,
    ) -> Result<ResolveStatus> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.resolve_async(hostname, timeout_ms, dns_server, move |status| {
            let _ = tx.send(status);
        })?;
        // A dropped sender means the request vanished without an outcome.
        Ok(rx.recv().unwrap_or(ResolveStatus::Error))
    }

    /// Cancel the outstanding lookup.
    ///
    /// Returns true if a lookup was removed before its callback started; its
    /// callback will never run. Returns false if there was nothing to cancel.
    /// If the callback is running on another thread, this waits for it to
    /// finish, so state the callback uses may be freed once this returns.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.generation.lock().clone() else {
            return false;
        };
        shared.cancel(self.id)
    }

    /// Whether a lookup is outstanding and its callback has not started.
    pub fn is_pending(&self) -> bool {
        self.generation
            .lock()
            .as_ref()
            .is_some_and(|shared| shared.is_pending(self.id))
    }
}

impl Default for HostNameResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostNameResolver {
    fn drop(&mut self) {
        self.cancel();
    }
}

static_assertions::assert_impl_all!(HostNameResolver: Send, Sync);
static_assertions::assert_not_impl_any!(HostNameResolver: Clone);
