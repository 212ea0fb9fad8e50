//! Tests for TCP connections and listeners.

use std::net::Shutdown;
use std::time::Duration;

use horizon_wire_io::{
    Host, Interest, IpAddress, NetworkError, TcpServerSocket, TcpSocket, WaitSet, Waitable,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn listener() -> (TcpServerSocket, Host) {
    let mut server = TcpServerSocket::new();
    server.open(0, true, 16).unwrap();
    let port = server.local_host().unwrap().port;
    (server, Host::new(IpAddress::LOCALHOST_V4, port))
}

/// Block until `waitable` reports `interest`, or panic after a few seconds.
fn wait_for(waitable: &dyn Waitable, interest: Interest) {
    let mut wait_set = WaitSet::new(1).unwrap();
    wait_set.add(waitable, interest).unwrap();
    let count = wait_set.wait(Some(Duration::from_secs(5)), None).unwrap();
    wait_set.remove(waitable);
    assert_eq!(count, 1, "timed out waiting for readiness");
}

fn connected_pair() -> (TcpServerSocket, TcpSocket, TcpSocket) {
    let (server, address) = listener();

    let mut client = TcpSocket::new();
    client.open(address, true).unwrap();
    assert!(client.is_valid());

    wait_for(&server, Interest::READ);
    let accepted = server.accept().unwrap();
    assert!(accepted.is_valid());

    wait_for(&client, Interest::WRITE);
    assert!(client.take_error().unwrap().is_none());

    (server, client, accepted)
}

fn recv_exact(socket: &TcpSocket, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buffer = [0u8; 64];
    while received.len() < len {
        wait_for(socket, Interest::READ);
        let n = socket.recv(&mut buffer).unwrap();
        assert!(n > 0, "connection closed early");
        received.extend_from_slice(&buffer[..n]);
    }
    received
}

#[test]
fn test_echo_round_trip() {
    init_tracing();
    let (_server, client, accepted) = connected_pair();

    assert_eq!(client.send(b"ping").unwrap(), 4);
    let request = recv_exact(&accepted, 4);
    assert_eq!(request, b"ping");

    assert_eq!(accepted.send(&request).unwrap(), 4);
    assert_eq!(recv_exact(&client, 4), b"ping");

    assert_eq!(
        accepted.peer_host().unwrap().port,
        client.local_host().unwrap().port
    );
}

#[test]
fn test_peer_close_reads_zero() {
    init_tracing();
    let (_server, mut client, accepted) = connected_pair();

    client.close();
    wait_for(&accepted, Interest::READ);
    let mut buffer = [0u8; 16];
    assert_eq!(accepted.recv(&mut buffer).unwrap(), 0);
}

#[test]
fn test_shutdown_write_signals_eof() {
    init_tracing();
    let (_server, client, accepted) = connected_pair();

    client.shutdown(Shutdown::Write).unwrap();
    wait_for(&accepted, Interest::READ);
    let mut buffer = [0u8; 16];
    assert_eq!(accepted.recv(&mut buffer).unwrap(), 0);
}

#[test]
fn test_recv_with_nothing_pending() {
    init_tracing();
    let (_server, client, _accepted) = connected_pair();
    let mut buffer = [0u8; 16];
    assert_eq!(client.recv(&mut buffer).unwrap(), 0);
}

#[test]
fn test_accept_with_nothing_pending() {
    init_tracing();
    let (server, _address) = listener();
    let accepted = server.accept().unwrap();
    assert!(!accepted.is_valid());
}

#[test]
fn test_operations_on_closed_socket() {
    let socket = TcpSocket::new();
    let mut buffer = [0u8; 4];
    assert!(matches!(socket.send(b"x"), Err(NetworkError::InvalidSocket)));
    assert!(matches!(
        socket.recv(&mut buffer),
        Err(NetworkError::InvalidSocket)
    ));
    assert!(matches!(socket.peer_host(), Err(NetworkError::InvalidSocket)));

    let server = TcpServerSocket::new();
    assert!(matches!(server.accept(), Err(NetworkError::InvalidSocket)));
}

#[test]
fn test_close_is_idempotent() {
    init_tracing();
    let (_server, mut client, _accepted) = connected_pair();
    client.close();
    assert!(!client.is_valid());
    client.close();
    assert!(!client.is_valid());
    assert_eq!(client.raw_handle(), horizon_wire_io::INVALID_HANDLE);
}
