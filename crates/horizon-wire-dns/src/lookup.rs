//! The lookup worker and the service that owns it.
//!
//! A [`LookupService`] runs at most one worker thread at a time. The thread
//! owns a UDP socket and a wait set, sends queued queries, matches replies by
//! transaction id and hostname, and times requests out. It exits on its own
//! once nothing is outstanding; the next submission starts a new generation.
//! If the old thread is still winding down, the new one joins it before doing
//! anything else.
//!
//! Caller threads never touch the socket. They only add and remove requests
//! under the generation's lock and nudge the worker through a wake channel.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use horizon_wire_io::{
    Host, Interest, NetworkError, Notifier, NotifyHandle, Readiness, UdpSocket, WaitKey, WaitSet,
    Waitable,
};
use parking_lot::{Condvar, Mutex};
use slotmap::SlotMap;

use crate::buckets::TimeBuckets;
use crate::config::ResolverConfig;
use crate::error::{ResolveError, Result};
use crate::logging::targets;
use crate::message::{self, MAX_DATAGRAM, RecordType, ReplyOutcome};
use crate::request::{
    Callback, HandleId, IdAllocator, Request, RequestKey, RequestState, ResolveStatus,
};
use crate::tick::TickSource;

static GLOBAL: OnceLock<Arc<LookupService>> = OnceLock::new();

#[derive(Debug)]
enum Command {
    Wake,
    Quit,
}

type Completions = Vec<(RequestKey, ResolveStatus)>;

/// Owns the resolver worker thread.
///
/// Most code uses the process-wide instance through
/// [`HostNameResolver::new`](crate::HostNameResolver::new). A separate
/// service with its own configuration can be created with
/// [`LookupService::new`]; it shuts its worker down when dropped.
#[derive(Debug)]
pub struct LookupService {
    config: ResolverConfig,
    current: Mutex<Option<Generation>>,
}

#[derive(Debug)]
struct Generation {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl LookupService {
    /// Create a service with its own worker.
    pub fn new(config: ResolverConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            current: Mutex::new(None),
        })
    }

    /// The process-wide service, created with the default configuration on
    /// first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Self::new(ResolverConfig::default())))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Whether a worker generation is currently running.
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|g| !g.shared.inner.lock().exiting)
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Lookups still outstanding are failed with [`ResolveStatus::Error`].
    /// When called from a lookup callback the worker is told to quit but not
    /// joined.
    pub fn shutdown(&self) {
        let Some(mut generation) = self.current.lock().take() else {
            return;
        };
        generation.shared.notify.send(Command::Quit);

        let Some(thread) = generation.thread.take() else {
            return;
        };
        if generation.shared.is_worker_thread() {
            tracing::debug!(target: targets::RESOLVER, "shutdown from a lookup callback, not joining");
            return;
        }
        if thread.join().is_err() {
            tracing::error!(target: targets::RESOLVER, "resolver worker panicked");
        }
    }

    pub(crate) fn submit(
        &self,
        handle: HandleId,
        hostname: &str,
        timeout_ms: u32,
        server: Option<Host>,
        callback: Callback,
    ) -> Result<Arc<Shared>> {
        let hostname = message::validate_hostname(hostname)?.to_string();
        let mut current = self.current.lock();

        if let Some(generation) = current.as_ref() {
            let shared = &generation.shared;
            let mut inner = shared.inner.lock();
            if !inner.exiting {
                let wake = shared.enqueue(&mut inner, handle, hostname, timeout_ms, server, callback)?;
                drop(inner);
                if wake {
                    shared.notify.send(Command::Wake);
                }
                return Ok(Arc::clone(shared));
            }
        }

        let (notifier, notify) = horizon_wire_io::channel()?;
        let shared = Arc::new(Shared::new(
            Arc::clone(&self.config.tick_source),
            notify,
            self.config.resolve_default_server(),
        ));
        let mut worker = Worker::open(Arc::clone(&shared), notifier)?;
        {
            let mut inner = shared.inner.lock();
            shared.enqueue(&mut inner, handle, hostname, timeout_ms, server, callback)?;
        }

        worker.join_on_start = current.take().and_then(|mut old| old.thread.take());
        if worker.join_on_start.is_some() {
            tracing::debug!(target: targets::RESOLVER, "replacing an exiting resolver worker");
        }

        let mut builder = thread::Builder::new().name(self.config.thread_name.clone());
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let thread = builder
            .spawn(move || worker.run())
            .map_err(ResolveError::Spawn)?;

        *current = Some(Generation {
            shared: Arc::clone(&shared),
            thread: Some(thread),
        });
        Ok(shared)
    }
}

impl Drop for LookupService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State shared between one worker generation and the callers using it.
#[derive(Debug)]
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    callback_done: Condvar,
    notify: NotifyHandle<Command>,
    ticks: Arc<dyn TickSource>,
    worker_thread: OnceLock<ThreadId>,
    /// Fails the next wake cycle as if the socket had reported an error.
    #[cfg(test)]
    fault: std::sync::atomic::AtomicBool,
}

/// Indexes over the outstanding requests.
///
/// Every live request is in `requests` and `ids`, and in one bucket. It is in
/// `send_queue` exactly while it is `Queued`. A `Completing` request is only
/// in `requests` (and `by_handle`) until its callback returns.
#[derive(Debug)]
struct Inner {
    requests: SlotMap<RequestKey, Request>,
    ids: IdAllocator,
    buckets: TimeBuckets<RequestKey>,
    send_queue: VecDeque<RequestKey>,
    by_handle: HashMap<HandleId, RequestKey>,
    /// Retired by a wraparound seen on a caller thread; the worker times them out.
    retired: Vec<RequestKey>,
    exiting: bool,
    server: Option<Host>,
}

impl Shared {
    fn new(ticks: Arc<dyn TickSource>, notify: NotifyHandle<Command>, server: Option<Host>) -> Self {
        let now = ticks.now();
        Self {
            inner: Mutex::new(Inner {
                requests: SlotMap::with_key(),
                ids: IdAllocator::default(),
                buckets: TimeBuckets::new(now),
                send_queue: VecDeque::new(),
                by_handle: HashMap::new(),
                retired: Vec::new(),
                exiting: false,
                server,
            }),
            callback_done: Condvar::new(),
            notify,
            ticks,
            worker_thread: OnceLock::new(),
            #[cfg(test)]
            fault: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn is_worker_thread(&self) -> bool {
        self.worker_thread.get() == Some(&thread::current().id())
    }

    /// Add a request; returns whether the worker needs a wakeup.
    fn enqueue(
        &self,
        inner: &mut Inner,
        handle: HandleId,
        hostname: String,
        timeout_ms: u32,
        server: Option<Host>,
        callback: Callback,
    ) -> Result<bool> {
        let id = inner.ids.allocate().ok_or(ResolveError::TooManyRequests)?;

        let now = self.ticks.now();
        let retired = inner.buckets.observe(now);
        inner.retired.extend(retired);

        let key = inner.requests.insert(Request {
            handle,
            hostname,
            server,
            id,
            record_type: RecordType::Aaaa,
            expiry: 0,
            state: RequestState::Queued,
            callback: Some(callback),
        });
        let expiry = inner.buckets.insert(now, timeout_ms, key);
        inner.requests[key].expiry = expiry;
        inner.ids.insert(id, key);
        inner.by_handle.insert(handle, key);

        let first_queued = inner.send_queue.is_empty();
        inner.send_queue.push_back(key);
        tracing::trace!(target: targets::RESOLVER, id, expiry, "lookup queued");
        Ok(first_queued || !inner.retired.is_empty())
    }

    /// Whether `handle` has a request that has not started completing.
    pub(crate) fn is_pending(&self, handle: HandleId) -> bool {
        self.inner.lock().pending_key(handle).is_some()
    }

    /// Remove the outstanding request of `handle`.
    ///
    /// If its callback is already running on another thread, wait for it to
    /// return first. Inside the handle's own callback this returns false at
    /// once.
    pub(crate) fn cancel(&self, handle: HandleId) -> bool {
        let mut inner = self.inner.lock();
        loop {
            let Some(&key) = inner.by_handle.get(&handle) else {
                return false;
            };
            match inner.requests.get(key).map(|r| r.state) {
                None => {
                    inner.by_handle.remove(&handle);
                    return false;
                }
                Some(RequestState::Completing) => {
                    if self.is_worker_thread() {
                        return false;
                    }
                    while inner.requests.contains_key(key) {
                        self.callback_done.wait(&mut inner);
                    }
                    // The callback may have submitted again on this handle.
                    if inner.pending_key(handle).is_none() {
                        return false;
                    }
                }
                Some(_) => {
                    inner.remove(key);
                    tracing::trace!(target: targets::RESOLVER, "lookup cancelled");
                    return true;
                }
            }
        }
    }

    /// Run the callback of a `Completing` request and drop the request.
    fn finish(&self, key: RequestKey, status: ResolveStatus) {
        let callback = self
            .inner
            .lock()
            .requests
            .get_mut(key)
            .and_then(|r| r.callback.take());

        if let Some(callback) = callback
            && panic::catch_unwind(AssertUnwindSafe(|| callback(status))).is_err()
        {
            tracing::error!(target: targets::WORKER, %status, "lookup callback panicked");
        }

        let mut inner = self.inner.lock();
        if let Some(request) = inner.requests.remove(key)
            && inner.by_handle.get(&request.handle) == Some(&key)
        {
            inner.by_handle.remove(&request.handle);
        }
        drop(inner);
        self.callback_done.notify_all();
    }

    fn run_completions(&self, completions: &mut Completions) {
        for (key, status) in completions.drain(..) {
            self.finish(key, status);
        }
    }
}

impl Inner {
    fn pending_key(&self, handle: HandleId) -> Option<RequestKey> {
        let key = *self.by_handle.get(&handle)?;
        let request = self.requests.get(key)?;
        (request.state != RequestState::Completing).then_some(key)
    }

    /// Take a request out of every index except the arena and mark it
    /// `Completing`.
    fn complete(&mut self, key: RequestKey, status: ResolveStatus, completions: &mut Completions) {
        let Some(request) = self.requests.get_mut(key) else {
            return;
        };
        if request.state == RequestState::Completing {
            return;
        }
        if request.state == RequestState::Queued {
            self.send_queue.retain(|&k| k != key);
        }
        request.state = RequestState::Completing;
        self.ids.remove(request.id, key);
        self.buckets.remove(request.expiry, key);
        completions.push((key, status));
    }

    fn fail_all(&mut self, completions: &mut Completions) {
        self.send_queue.clear();
        let keys: Vec<RequestKey> = self.requests.keys().collect();
        for key in keys {
            self.complete(key, ResolveStatus::Error, completions);
        }
        self.retired.clear();
    }

    /// Drop a request that never reached `Completing`.
    fn remove(&mut self, key: RequestKey) {
        let Some(request) = self.requests.remove(key) else {
            return;
        };
        if request.state == RequestState::Queued {
            self.send_queue.retain(|&k| k != key);
        }
        self.ids.remove(request.id, key);
        self.buckets.remove(request.expiry, key);
        if self.by_handle.get(&request.handle) == Some(&key) {
            self.by_handle.remove(&request.handle);
        }
    }

    /// An AAAA lookup came back NXDOMAIN: ask again for an A record.
    fn retry_as_a(&mut self, key: RequestKey, completions: &mut Completions) {
        let Some(old_id) = self.requests.get(key).map(|r| r.id) else {
            return;
        };
        self.ids.remove(old_id, key);
        let Some(id) = self.ids.allocate() else {
            self.complete(key, ResolveStatus::Error, completions);
            return;
        };
        self.ids.insert(id, key);

        let request = &mut self.requests[key];
        request.id = id;
        request.record_type = RecordType::A;
        request.state = RequestState::Queued;
        self.send_queue.push_back(key);
        tracing::trace!(target: targets::WORKER, old_id, id, "no AAAA record, retrying as A");
    }
}

struct Worker {
    shared: Arc<Shared>,
    socket: UdpSocket,
    notifier: Notifier<Command>,
    wait_set: WaitSet,
    socket_key: WaitKey,
    write_interest: bool,
    send_blocked: bool,
    join_on_start: Option<JoinHandle<()>>,
}

impl Worker {
    fn open(shared: Arc<Shared>, notifier: Notifier<Command>) -> horizon_wire_io::Result<Self> {
        let mut socket = UdpSocket::new();
        let dual_stack = socket.open(0, false).is_ok() && socket.is_dual_stack();
        if !dual_stack {
            tracing::debug!(target: targets::WORKER, "dual-stack socket unavailable, using IPv4");
            socket.open(0, true)?;
        }

        let mut wait_set = WaitSet::new(2)?;
        let socket_key = wait_set.add(&socket, Interest::READ)?;
        wait_set.add(&notifier, Interest::READ)?;

        Ok(Self {
            shared,
            socket,
            notifier,
            wait_set,
            socket_key,
            write_interest: false,
            send_blocked: false,
            join_on_start: None,
        })
    }

    fn run(mut self) {
        if let Some(previous) = self.join_on_start.take()
            && previous.join().is_err()
        {
            tracing::warn!(target: targets::WORKER, "previous resolver worker panicked");
        }
        let _ = self.shared.worker_thread.set(thread::current().id());
        tracing::debug!(target: targets::WORKER, "resolver worker started");

        let mut buffer = [0u8; MAX_DATAGRAM];
        let mut ready = Vec::with_capacity(2);
        let mut completions = Completions::new();

        loop {
            let timeout = match self.prepare() {
                Ok(timeout) => timeout,
                Err(err) => {
                    self.terminate(&err, &mut completions);
                    break;
                }
            };
            if let Err(err) = self.wait_set.wait(Some(timeout), Some(&mut ready)) {
                self.terminate(&err, &mut completions);
                break;
            }

            let quit = self
                .notifier
                .drain()
                .iter()
                .any(|command| matches!(command, Command::Quit));

            let readiness = if ready.contains(&self.socket_key) {
                self.socket.readiness()
            } else {
                Readiness::NOT_READY
            };
            if let Err(err) = self.service(readiness, &mut buffer, &mut completions) {
                self.terminate(&err, &mut completions);
                break;
            }
            self.shared.run_completions(&mut completions);

            if quit {
                self.quit(&mut completions);
                break;
            }
            if self.exit_if_idle() {
                break;
            }
        }

        self.wait_set.remove(&self.socket);
        self.wait_set.remove(&self.notifier);
        tracing::debug!(target: targets::WORKER, "resolver worker exiting");
    }

    /// Sync the socket's interest with the send queue and pick the wait timeout.
    fn prepare(&mut self) -> horizon_wire_io::Result<Duration> {
        let inner = self.shared.inner.lock();
        let want_write = !inner.send_queue.is_empty();
        if want_write != self.write_interest {
            let interest = if want_write {
                Interest::BOTH
            } else {
                Interest::READ
            };
            self.wait_set.change(&self.socket, interest)?;
            self.write_interest = want_write;
        }

        // WinSock only reports UDP write readiness after a send would block,
        // so a non-empty queue is flushed without waiting for it.
        let flush_now = cfg!(windows) && want_write && !self.send_blocked;
        let delay = if flush_now || !inner.retired.is_empty() {
            0
        } else {
            inner.buckets.next_delay(self.shared.ticks.now())
        };
        Ok(Duration::from_millis(u64::from(delay)))
    }

    /// One wake cycle: replies, then sends, then deadlines.
    fn service(
        &mut self,
        readiness: Readiness,
        buffer: &mut [u8],
        completions: &mut Completions,
    ) -> horizon_wire_io::Result<()> {
        #[cfg(test)]
        if self
            .shared
            .fault
            .swap(false, std::sync::atomic::Ordering::AcqRel)
        {
            return Err(NetworkError::os("poll", io::Error::other("injected socket failure")));
        }

        if readiness.is_error() {
            return Err(NetworkError::os(
                "poll",
                io::Error::other("error condition on the resolver socket"),
            ));
        }

        if readiness.is_readable() {
            loop {
                let (len, from) = self.socket.recv_from(buffer)?;
                if len == 0 {
                    break;
                }
                self.handle_reply(&buffer[..len], from, completions);
            }
        }

        if readiness.is_writable() {
            self.send_blocked = false;
        }
        if readiness.is_writable() || (cfg!(windows) && !self.send_blocked) {
            self.flush(completions)?;
        }

        self.expire(completions);
        Ok(())
    }

    fn handle_reply(&self, packet: &[u8], from: Host, completions: &mut Completions) {
        let Some(id) = message::reply_id(packet) else {
            tracing::trace!(target: targets::WORKER, %from, "runt datagram ignored");
            return;
        };

        let mut inner = self.shared.inner.lock();
        let Some(key) = inner.ids.get(id) else {
            tracing::trace!(target: targets::WORKER, id, %from, "reply for unknown id");
            return;
        };
        let request = &inner.requests[key];
        if request.state != RequestState::AwaitingReply {
            tracing::trace!(target: targets::WORKER, id, "reply for a request not yet sent");
            return;
        }

        let record_type = request.record_type;
        match message::decode_reply(packet, id, &request.hostname, record_type) {
            ReplyOutcome::Unrelated => {
                tracing::trace!(target: targets::WORKER, id, %from, "mismatched reply ignored");
            }
            ReplyOutcome::NoSuchHost if record_type == RecordType::Aaaa => {
                inner.retry_as_a(key, completions);
            }
            ReplyOutcome::NoSuchHost => inner.complete(key, ResolveStatus::NoSuchHost, completions),
            ReplyOutcome::DnsError => inner.complete(key, ResolveStatus::DnsError, completions),
            ReplyOutcome::Address(address) => {
                let host = Host::new(address, 0);
                inner.complete(key, ResolveStatus::Resolved(host), completions);
            }
        }
    }

    /// Send queued requests in order until the socket pushes back.
    fn flush(&mut self, completions: &mut Completions) -> horizon_wire_io::Result<()> {
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;

        while let Some(&key) = inner.send_queue.front() {
            let Some(request) = inner.requests.get(key) else {
                inner.send_queue.pop_front();
                continue;
            };
            let Some(server) = request.server.or(inner.server) else {
                inner.send_queue.pop_front();
                tracing::debug!(target: targets::WORKER, "no DNS server known");
                inner.complete(key, ResolveStatus::Error, completions);
                continue;
            };
            let packet =
                match message::encode_query(request.id, &request.hostname, request.record_type) {
                    Ok(packet) => packet,
                    Err(err) => {
                        inner.send_queue.pop_front();
                        tracing::debug!(target: targets::WORKER, error = %err, "query not encodable");
                        inner.complete(key, ResolveStatus::Error, completions);
                        continue;
                    }
                };

            match self.socket.send_to(&packet, server) {
                Ok(0) => {
                    self.send_blocked = true;
                    break;
                }
                Ok(_) => {
                    inner.send_queue.pop_front();
                    inner.requests[key].state = RequestState::AwaitingReply;
                    tracing::trace!(target: targets::WORKER, %server, "query sent");
                }
                Err(NetworkError::InvalidAddress(reason)) => {
                    inner.send_queue.pop_front();
                    tracing::debug!(target: targets::WORKER, %server, %reason, "server unreachable from this socket");
                    inner.complete(key, ResolveStatus::Error, completions);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn expire(&self, completions: &mut Completions) {
        let mut inner = self.shared.inner.lock();
        let now = self.shared.ticks.now();

        let mut timed_out = std::mem::take(&mut inner.retired);
        timed_out.extend(inner.buckets.observe(now));
        timed_out.extend(inner.buckets.expired(now));
        for key in timed_out {
            inner.complete(key, ResolveStatus::Timeout, completions);
        }
    }

    fn terminate(&self, err: &NetworkError, completions: &mut Completions) {
        tracing::error!(target: targets::WORKER, error = %err, "resolver socket failed, failing outstanding lookups");
        {
            let mut inner = self.shared.inner.lock();
            inner.exiting = true;
            inner.fail_all(completions);
        }
        self.shared.run_completions(completions);
    }

    fn quit(&self, completions: &mut Completions) {
        {
            let mut inner = self.shared.inner.lock();
            inner.exiting = true;
            if !inner.requests.is_empty() {
                tracing::warn!(
                    target: targets::WORKER,
                    outstanding = inner.requests.len(),
                    "resolver shut down with lookups outstanding"
                );
                inner.fail_all(completions);
            }
        }
        self.shared.run_completions(completions);
    }

    fn exit_if_idle(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.requests.is_empty() {
            inner.exiting = true;
        }
        inner.exiting
    }
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket as StdUdpSocket;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    use crossbeam_channel::{Receiver, unbounded};

    use super::*;

    /// A bound socket that reads nothing and answers nothing.
    fn silent_server() -> (StdUdpSocket, Host) {
        let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let host = Host::from(socket.local_addr().unwrap());
        (socket, host)
    }

    fn submit(
        service: &LookupService,
        handle: HandleId,
        hostname: &str,
    ) -> (Result<Arc<Shared>>, Receiver<ResolveStatus>) {
        let (tx, rx) = unbounded();
        let result = service.submit(
            handle,
            hostname,
            60_000,
            None,
            Box::new(move |status| {
                let _ = tx.send(status);
            }),
        );
        (result, rx)
    }

    fn current(service: &LookupService) -> Option<Arc<Shared>> {
        service.current.lock().as_ref().map(|g| Arc::clone(&g.shared))
    }

    #[test]
    fn test_transport_failure_ends_generation() {
        let (_server, host) = silent_server();
        let service = LookupService::new(ResolverConfig::with_dns_server(host));

        let (first, first_rx) = submit(&service, 1, "one.example");
        let (second, second_rx) = submit(&service, 2, "two.example");
        let shared = first.unwrap();
        assert!(Arc::ptr_eq(&shared, &second.unwrap()));

        shared.fault.store(true, Ordering::Release);
        shared.notify.send(Command::Wake);

        let deadline = Duration::from_secs(5);
        assert_eq!(first_rx.recv_timeout(deadline).unwrap(), ResolveStatus::Error);
        assert_eq!(second_rx.recv_timeout(deadline).unwrap(), ResolveStatus::Error);
        assert!(shared.inner.lock().exiting);
        assert!(!service.is_running());
        assert!(!shared.is_pending(1));

        // The next submission gets a fresh generation.
        let (replacement, replacement_rx) = submit(&service, 1, "one.example");
        let replacement = replacement.unwrap();
        assert!(!Arc::ptr_eq(&shared, &replacement));
        assert!(service.is_running());
        assert!(replacement.is_pending(1));

        service.shutdown();
        assert_eq!(replacement_rx.recv_timeout(deadline).unwrap(), ResolveStatus::Error);
    }

    #[test]
    fn test_exhausted_ids_reject_submission() {
        let (_server, host) = silent_server();
        let service = LookupService::new(ResolverConfig::with_dns_server(host));

        let (first, _first_rx) = submit(&service, 1, "one.example");
        let shared = first.unwrap();

        // Occupy every remaining transaction id.
        let mut placeholders: SlotMap<RequestKey, ()> = SlotMap::with_key();
        {
            let mut inner = shared.inner.lock();
            while let Some(id) = inner.ids.allocate() {
                let key = placeholders.insert(());
                inner.ids.insert(id, key);
            }
            assert_eq!(inner.ids.len(), 65_536);
        }

        let before = {
            let inner = shared.inner.lock();
            (
                inner.requests.len(),
                inner.send_queue.len(),
                inner.by_handle.len(),
                inner.buckets.len(),
            )
        };

        let started = Instant::now();
        let (rejected, rejected_rx) = submit(&service, 2, "two.example");
        assert!(matches!(rejected, Err(ResolveError::TooManyRequests)));
        assert!(started.elapsed() < Duration::from_secs(1));

        {
            let inner = shared.inner.lock();
            let after = (
                inner.requests.len(),
                inner.send_queue.len(),
                inner.by_handle.len(),
                inner.buckets.len(),
            );
            assert_eq!(after, before);
            assert!(!inner.by_handle.contains_key(&2));
        }
        assert!(Arc::ptr_eq(&shared, &current(&service).unwrap()));
        assert!(!shared.is_pending(2));

        service.shutdown();
        assert!(rejected_rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
