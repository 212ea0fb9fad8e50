//! A minimal DNS server on a loopback std socket for driving the resolver.

#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use horizon_wire_io::{Host, IpAddress};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// How the stub answers each query.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// A records get this address; AAAA queries get NXDOMAIN.
    Answer(Ipv4Addr),
    /// AAAA records get this address.
    AnswerV6(Ipv6Addr),
    /// Every query gets NXDOMAIN.
    NxDomain,
    /// Every query gets SERVFAIL.
    ServFail,
    /// Queries are read and dropped.
    Silent,
    /// Replies carry the right id and this rcode but a different question name.
    WrongName(u16),
}

pub struct StubServer {
    addr: SocketAddr,
    queries: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StubServer {
    pub fn start(behavior: Behavior) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let queries = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let queries = Arc::clone(&queries);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut buffer = [0u8; 512];
                while !stop.load(Ordering::Acquire) {
                    let Ok((len, from)) = socket.recv_from(&mut buffer) else {
                        continue;
                    };
                    queries.fetch_add(1, Ordering::AcqRel);
                    if let Some(reply) = answer(&buffer[..len], behavior) {
                        let _ = socket.send_to(&reply, from);
                    }
                }
            })
        };

        Self {
            addr,
            queries,
            stop,
            thread: Some(thread),
        }
    }

    pub fn host(&self) -> Host {
        Host::from(self.addr)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Acquire)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A loopback address nothing listens on.
pub fn unreachable_server() -> Host {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let host = Host::from(socket.local_addr().unwrap());
    drop(socket);
    host
}

pub fn ipv4(a: u8, b: u8, c: u8, d: u8) -> IpAddress {
    IpAddress::from_ipv4_octets([a, b, c, d])
}

fn answer(query: &[u8], behavior: Behavior) -> Option<Vec<u8>> {
    if query.len() < 12 {
        return None;
    }
    // End of the question: name, then QTYPE and QCLASS.
    let mut pos = 12;
    while *query.get(pos)? != 0 {
        pos += 1 + query[pos] as usize;
    }
    let qtype = u16::from_be_bytes([*query.get(pos + 1)?, *query.get(pos + 2)?]);
    let question_end = pos + 5;
    let question = query.get(..question_end)?;

    let (rcode, rdata): (u16, Option<Vec<u8>>) = match behavior {
        Behavior::Silent => return None,
        Behavior::NxDomain => (3, None),
        Behavior::ServFail => (2, None),
        Behavior::Answer(v4) if qtype == 1 => (0, Some(v4.octets().to_vec())),
        Behavior::Answer(_) => (3, None),
        Behavior::AnswerV6(v6) if qtype == 28 => (0, Some(v6.octets().to_vec())),
        Behavior::AnswerV6(_) => (3, None),
        Behavior::WrongName(rcode) => {
            let mut reply = question.to_vec();
            reply[2..4].copy_from_slice(&(0x8180 | rcode).to_be_bytes());
            // Flip the first letter of the name.
            reply[13] ^= 0x01;
            return Some(reply);
        }
    };

    let mut reply = question.to_vec();
    reply[2..4].copy_from_slice(&(0x8180 | rcode).to_be_bytes());
    if let Some(rdata) = rdata {
        reply[6..8].copy_from_slice(&1u16.to_be_bytes());
        reply.extend_from_slice(&[0xc0, 0x0c]);
        reply.extend_from_slice(&qtype.to_be_bytes());
        reply.extend_from_slice(&1u16.to_be_bytes());
        reply.extend_from_slice(&60u32.to_be_bytes());
        reply.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        reply.extend_from_slice(&rdata);
    }
    Some(reply)
}
