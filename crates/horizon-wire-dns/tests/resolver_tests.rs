//! End-to-end tests for the resolver against a stub DNS server.

mod common;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use horizon_wire_dns::{
    HostNameResolver, LookupService, ManualTicks, ResolveError, ResolveStatus, ResolverConfig,
};
use horizon_wire_io::{Host, IpAddress};

use common::{Behavior, StubServer, init_tracing, ipv4};

fn service_for(server: &StubServer) -> Arc<LookupService> {
    LookupService::new(ResolverConfig::with_dns_server(server.host()).thread_name("dns-test"))
}

fn channel() -> (Sender<ResolveStatus>, Receiver<ResolveStatus>) {
    unbounded()
}

fn next(rx: &Receiver<ResolveStatus>) -> ResolveStatus {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("callback never fired")
}

#[test]
fn test_resolves_a_record() {
    init_tracing();
    let stub = StubServer::start(Behavior::Answer(Ipv4Addr::new(93, 184, 216, 34)));
    let resolver = HostNameResolver::with_service(service_for(&stub));

    let status = resolver.resolve_blocking("example.com", 2_000, None).unwrap();
    assert_eq!(status, ResolveStatus::Resolved(Host::new(ipv4(93, 184, 216, 34), 0)));
    // AAAA came back NXDOMAIN, then A.
    assert_eq!(stub.queries(), 2);
}

#[test]
fn test_resolves_aaaa_record() {
    init_tracing();
    let v6 = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x34);
    let stub = StubServer::start(Behavior::AnswerV6(v6));
    let resolver = HostNameResolver::with_service(service_for(&stub));

    let status = resolver.resolve_blocking("example.com", 2_000, None).unwrap();
    assert_eq!(status.host().map(|h| h.address), Some(IpAddress::from(v6)));
    assert_eq!(stub.queries(), 1);
}

#[test]
fn test_nxdomain_retries_once_then_reports() {
    init_tracing();
    let stub = StubServer::start(Behavior::NxDomain);
    let resolver = HostNameResolver::with_service(service_for(&stub));

    let status = resolver
        .resolve_blocking("nonexistent.invalid", 2_000, None)
        .unwrap();
    assert_eq!(status, ResolveStatus::NoSuchHost);
    assert_eq!(stub.queries(), 2);
}

#[test]
fn test_server_failure_is_dns_error() {
    init_tracing();
    let stub = StubServer::start(Behavior::ServFail);
    let resolver = HostNameResolver::with_service(service_for(&stub));

    let status = resolver.resolve_blocking("example.com", 2_000, None).unwrap();
    assert_eq!(status, ResolveStatus::DnsError);
    // No A fallback after a server failure.
    assert_eq!(stub.queries(), 1);
}

#[test]
fn test_silent_server_times_out() {
    init_tracing();
    let stub = StubServer::start(Behavior::Silent);
    let resolver = HostNameResolver::with_service(service_for(&stub));

    let started = Instant::now();
    let status = resolver.resolve_blocking("example.com", 500, None).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(status, ResolveStatus::Timeout);
    assert!(elapsed >= Duration::from_millis(490), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_500), "fired late: {elapsed:?}");
}

#[test]
fn test_mismatched_question_is_ignored() {
    init_tracing();
    // Success, NXDOMAIN and SERVFAIL for another name all leave the lookup waiting.
    for rcode in [0, 3, 2] {
        let stub = StubServer::start(Behavior::WrongName(rcode));
        let resolver = HostNameResolver::with_service(service_for(&stub));

        let status = resolver.resolve_blocking("example.com", 300, None).unwrap();
        assert_eq!(status, ResolveStatus::Timeout, "rcode {rcode}");
        // No A retry: the AAAA query was never answered.
        assert_eq!(stub.queries(), 1, "rcode {rcode}");
    }
}

#[test]
fn test_cancel_before_reply() {
    init_tracing();
    let stub = StubServer::start(Behavior::Silent);
    let resolver = HostNameResolver::with_service(service_for(&stub));
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&fired);
    resolver
        .resolve_async("example.com", 200, None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(resolver.is_pending());

    assert!(resolver.cancel());
    assert!(!resolver.cancel());
    assert!(!resolver.is_pending());

    // Well past the deadline: the callback must never run.
    thread::sleep(Duration::from_millis(400));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn test_second_lookup_on_busy_handle() {
    init_tracing();
    let stub = StubServer::start(Behavior::Silent);
    let resolver = HostNameResolver::with_service(service_for(&stub));

    resolver
        .resolve_async("example.com", 5_000, None, |_| {})
        .unwrap();
    let second = resolver.resolve_async("example.org", 5_000, None, |_| {});
    assert!(matches!(second, Err(ResolveError::AlreadyInProgress)));

    assert!(resolver.cancel());
    resolver
        .resolve_async("example.org", 5_000, None, |_| {})
        .unwrap();
    assert!(resolver.cancel());
}

#[test]
fn test_invalid_hostnames_fail_synchronously() {
    init_tracing();
    let stub = StubServer::start(Behavior::Silent);
    let resolver = HostNameResolver::with_service(service_for(&stub));

    let long = format!("{}a", "a.".repeat(127));
    assert_eq!(long.len(), 255);
    assert!(matches!(
        resolver.resolve_async(&long, 1_000, None, |_| panic!("no callback expected")),
        Err(ResolveError::HostnameTooLong { len: 255 })
    ));
    assert!(matches!(
        resolver.resolve_async("a..b", 1_000, None, |_| panic!("no callback expected")),
        Err(ResolveError::InvalidHostname(_))
    ));
    assert!(!resolver.is_pending());
    assert_eq!(stub.queries(), 0);
}

#[test]
fn test_concurrent_lookups_do_not_cross() {
    init_tracing();
    let first = StubServer::start(Behavior::Answer(Ipv4Addr::new(10, 0, 0, 1)));
    let second = StubServer::start(Behavior::Answer(Ipv4Addr::new(10, 0, 0, 2)));
    let service = service_for(&first);

    let (tx, rx) = unbounded();
    let mut resolvers = Vec::new();
    for i in 0..16u8 {
        let resolver = HostNameResolver::with_service(Arc::clone(&service));
        let (server, expected) = if i % 2 == 0 {
            (first.host(), ipv4(10, 0, 0, 1))
        } else {
            (second.host(), ipv4(10, 0, 0, 2))
        };
        let tx = tx.clone();
        resolver
            .resolve_async(&format!("host{i}.example"), 3_000, Some(server), move |status| {
                let _ = tx.send((status, expected));
            })
            .unwrap();
        resolvers.push(resolver);
    }

    for _ in 0..16 {
        let (status, expected) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status, ResolveStatus::Resolved(Host::new(expected, 0)));
    }
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_wraparound_times_out_exactly_once() {
    init_tracing();
    let stub = StubServer::start(Behavior::Silent);
    let ticks = ManualTicks::new(u32::MAX - 100);
    let service = LookupService::new(
        ResolverConfig::with_dns_server(stub.host()).tick_source(ticks.clone()),
    );
    let resolver = HostNameResolver::with_service(service);

    let (tx, rx) = channel();
    resolver
        .resolve_async("example.com", 300, None, move |status| {
            let _ = tx.send(status);
        })
        .unwrap();

    // Past the wrap but before the deadline at tick 199.
    ticks.advance(150);
    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    assert!(resolver.is_pending());

    ticks.set(250);
    assert_eq!(next(&rx), ResolveStatus::Timeout);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn test_callback_may_resubmit_on_same_handle() {
    init_tracing();
    let stub = StubServer::start(Behavior::Answer(Ipv4Addr::new(192, 0, 2, 7)));
    let resolver = Arc::new(HostNameResolver::with_service(service_for(&stub)));
    let (tx, rx) = channel();

    let again = Arc::clone(&resolver);
    let first_tx = tx.clone();
    resolver
        .resolve_async("first.example", 2_000, None, move |status| {
            let _ = first_tx.send(status);
            // Completing lookups no longer count as in progress.
            assert!(!again.is_pending());
            again
                .resolve_async("second.example", 2_000, None, move |status| {
                    let _ = tx.send(status);
                })
                .unwrap();
        })
        .unwrap();

    let expected = ResolveStatus::Resolved(Host::new(ipv4(192, 0, 2, 7), 0));
    assert_eq!(next(&rx), expected);
    assert_eq!(next(&rx), expected);
}

#[test]
fn test_cancel_waits_for_running_callback() {
    init_tracing();
    let stub = StubServer::start(Behavior::Answer(Ipv4Addr::new(192, 0, 2, 8)));
    let resolver = HostNameResolver::with_service(service_for(&stub));
    let (started_tx, started_rx) = unbounded();
    let finished = Arc::new(AtomicUsize::new(0));

    let done = Arc::clone(&finished);
    resolver
        .resolve_async("slow.example", 2_000, None, move |_| {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(200));
            done.store(1, Ordering::SeqCst);
        })
        .unwrap();

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!resolver.cancel());
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_callback_keeps_worker_alive() {
    init_tracing();
    let stub = StubServer::start(Behavior::Answer(Ipv4Addr::new(192, 0, 2, 9)));
    let service = service_for(&stub);

    let doomed = HostNameResolver::with_service(Arc::clone(&service));
    let survivor = HostNameResolver::with_service(Arc::clone(&service));
    let (tx, rx) = channel();

    doomed
        .resolve_async("boom.example", 2_000, None, |_| panic!("callback failure"))
        .unwrap();
    survivor
        .resolve_async("fine.example", 2_000, None, move |status| {
            let _ = tx.send(status);
        })
        .unwrap();

    assert!(next(&rx).is_resolved());
}

#[test]
fn test_missing_server_is_error() {
    init_tracing();
    let service = LookupService::new(ResolverConfig::system().use_system_config(false));
    let resolver = HostNameResolver::with_service(service);

    let status = resolver.resolve_blocking("example.com", 1_000, None).unwrap();
    assert_eq!(status, ResolveStatus::Error);
}

#[test]
fn test_shutdown_fails_outstanding_lookups() {
    init_tracing();
    let stub = StubServer::start(Behavior::Silent);
    let service = service_for(&stub);
    let resolver = HostNameResolver::with_service(Arc::clone(&service));
    let (tx, rx) = channel();

    resolver
        .resolve_async("example.com", 60_000, None, move |status| {
            let _ = tx.send(status);
        })
        .unwrap();
    assert!(service.is_running());

    service.shutdown();
    assert_eq!(next(&rx), ResolveStatus::Error);
    assert!(!service.is_running());
    assert!(!resolver.is_pending());
}

#[test]
fn test_worker_exits_when_idle_and_restarts() {
    init_tracing();
    let stub = StubServer::start(Behavior::Answer(Ipv4Addr::new(192, 0, 2, 10)));
    let service = service_for(&stub);
    let resolver = HostNameResolver::with_service(Arc::clone(&service));

    assert!(resolver.resolve_blocking("a.example", 2_000, None).unwrap().is_resolved());

    let deadline = Instant::now() + Duration::from_secs(5);
    while service.is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!service.is_running());

    assert!(resolver.resolve_blocking("b.example", 2_000, None).unwrap().is_resolved());
}

#[test]
fn test_dropping_handle_cancels() {
    init_tracing();
    let stub = StubServer::start(Behavior::Silent);
    let service = service_for(&stub);
    let fired = Arc::new(AtomicUsize::new(0));

    {
        let resolver = HostNameResolver::with_service(Arc::clone(&service));
        let counter = Arc::clone(&fired);
        resolver
            .resolve_async("example.com", 100, None, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    thread::sleep(Duration::from_millis(300));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
