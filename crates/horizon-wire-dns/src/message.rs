//! DNS query encoding and reply decoding.
//!
//! Covers the subset of RFC 1035 needed for address lookups over UDP: one
//! question per message, A and AAAA record types, class IN, and datagrams of
//! at most 512 bytes.

use horizon_wire_io::IpAddress;

use crate::error::MessageError;

/// Largest DNS message carried over UDP.
pub const MAX_DATAGRAM: usize = 512;

/// Longest hostname accepted, in bytes, excluding a trailing dot.
pub const MAX_HOSTNAME_LEN: usize = 253;

const MAX_LABEL_LEN: usize = 63;
const HEADER_LEN: usize = 12;

/// Standard query with recursion desired.
const QUERY_FLAGS: u16 = 0x0100;
const FLAG_RESPONSE: u16 = 0x8000;
const RCODE_MASK: u16 = 0x000f;
const RCODE_NXDOMAIN: u16 = 3;
const CLASS_IN: u16 = 1;

const LABEL_POINTER: u8 = 0xc0;

/// The address record type being queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// IPv4 address.
    A,
    /// IPv6 address.
    Aaaa,
}

impl RecordType {
    /// The QTYPE value on the wire.
    pub const fn code(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Aaaa => 28,
        }
    }

    /// RDATA length of a record of this type.
    pub const fn address_len(self) -> usize {
        match self {
            Self::A => 4,
            Self::Aaaa => 16,
        }
    }
}

/// What a reply means for the request it was matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The first matching answer record.
    Address(IpAddress),
    /// The server answered NXDOMAIN.
    NoSuchHost,
    /// The reply was for this request but unusable.
    DnsError,
    /// The reply does not belong to this request and should be ignored.
    Unrelated,
}

/// Check that `hostname` can be encoded and return it without a trailing dot.
pub fn validate_hostname(hostname: &str) -> Result<&str, MessageError> {
    let name = hostname.strip_suffix('.').unwrap_or(hostname);
    if name.len() > MAX_HOSTNAME_LEN {
        return Err(MessageError::NameTooLong(name.len()));
    }
    if name.is_empty() {
        return Err(MessageError::EmptyName);
    }
    for label in name.split('.') {
        if label.is_empty() {
            return Err(MessageError::EmptyLabel);
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(MessageError::LabelTooLong(label.to_string()));
        }
    }
    Ok(name)
}

/// Encode a single-question query for `hostname`.
pub fn encode_query(
    id: u16,
    hostname: &str,
    record_type: RecordType,
) -> Result<Vec<u8>, MessageError> {
    let name = validate_hostname(hostname)?;

    let mut packet = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&QUERY_FLAGS.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    packet.extend_from_slice(&[0; 6]); // ancount, nscount, arcount

    for label in name.split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&record_type.code().to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    debug_assert!(packet.len() <= MAX_DATAGRAM);
    Ok(packet)
}

/// The transaction id of a received packet, if it is long enough to carry one.
pub fn reply_id(packet: &[u8]) -> Option<u16> {
    Reader::new(packet).u16()
}

/// Interpret `packet` as the reply to the query `(id, hostname, record_type)`.
pub fn decode_reply(
    packet: &[u8],
    id: u16,
    hostname: &str,
    record_type: RecordType,
) -> ReplyOutcome {
    match reply_id(packet) {
        Some(reply) if reply == id => {}
        _ => return ReplyOutcome::Unrelated,
    }
    decode_matched(packet, hostname, record_type).unwrap_or(ReplyOutcome::DnsError)
}

/// `None` means the packet ended early or is malformed.
fn decode_matched(packet: &[u8], hostname: &str, record_type: RecordType) -> Option<ReplyOutcome> {
    let mut reader = Reader::new(packet);
    reader.skip(2)?; // id
    let flags = reader.u16()?;
    if flags & FLAG_RESPONSE == 0 {
        return Some(ReplyOutcome::Unrelated);
    }

    let qdcount = reader.u16()?;
    let ancount = reader.u16()?;
    reader.skip(4)?; // nscount, arcount
    if qdcount != 1 {
        return Some(ReplyOutcome::DnsError);
    }

    let expected = hostname.strip_suffix('.').unwrap_or(hostname);
    if !reader.question_name_matches(expected)? {
        return Some(ReplyOutcome::Unrelated);
    }
    let qtype = reader.u16()?;
    let qclass = reader.u16()?;
    if qtype != record_type.code() || qclass != CLASS_IN {
        return Some(ReplyOutcome::Unrelated);
    }

    // Only a reply to this exact question may settle the request.
    match flags & RCODE_MASK {
        0 => {}
        RCODE_NXDOMAIN => return Some(ReplyOutcome::NoSuchHost),
        _ => return Some(ReplyOutcome::DnsError),
    }

    for _ in 0..ancount {
        reader.skip_name()?;
        let rtype = reader.u16()?;
        reader.skip(2)?; // class
        reader.skip(4)?; // ttl
        let rdlength = reader.u16()? as usize;
        let rdata = reader.take(rdlength)?;

        if rtype != record_type.code() {
            continue;
        }
        return Some(match (record_type, rdata) {
            (RecordType::A, &[a, b, c, d]) => {
                ReplyOutcome::Address(IpAddress::from_ipv4_octets([a, b, c, d]))
            }
            (RecordType::Aaaa, rdata) if rdata.len() == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata);
                ReplyOutcome::Address(IpAddress::from_ipv6_octets(octets))
            }
            _ => ReplyOutcome::DnsError,
        });
    }
    Some(ReplyOutcome::DnsError)
}

struct Reader<'a> {
    packet: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(packet: &'a [u8]) -> Self {
        Self { packet, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.packet.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    /// Walk the uncompressed question name, comparing labels case-insensitively.
    fn question_name_matches(&mut self, expected: &str) -> Option<bool> {
        let mut expected_labels = expected.split('.').filter(|l| !l.is_empty());
        let mut matches = true;
        loop {
            let len = self.u8()?;
            if len == 0 {
                return Some(matches && expected_labels.next().is_none());
            }
            if len & LABEL_POINTER != 0 {
                // Compression or reserved label types have no place here.
                return None;
            }
            let label = self.take(len as usize)?;
            match expected_labels.next() {
                Some(want) if want.as_bytes().eq_ignore_ascii_case(label) => {}
                _ => matches = false,
            }
        }
    }

    /// Advance past a possibly compressed name without following pointers.
    fn skip_name(&mut self) -> Option<()> {
        loop {
            let len = self.u8()?;
            match len & LABEL_POINTER {
                0 if len == 0 => return Some(()),
                0 => self.skip(len as usize)?,
                LABEL_POINTER => return self.skip(1),
                _ => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    /// A reply echoing the question of `query` with the given rcode and answers.
    fn reply(query: &[u8], rcode: u16, answers: &[(u16, &[u8])]) -> Vec<u8> {
        let mut packet = query.to_vec();
        packet[2..4].copy_from_slice(&(0x8180 | rcode).to_be_bytes());
        packet[6..8].copy_from_slice(&(answers.len() as u16).to_be_bytes());
        for (rtype, rdata) in answers {
            packet.extend_from_slice(&[0xc0, 0x0c]);
            packet.extend_from_slice(&rtype.to_be_bytes());
            packet.extend_from_slice(&CLASS_IN.to_be_bytes());
            packet.extend_from_slice(&300u32.to_be_bytes());
            packet.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            packet.extend_from_slice(rdata);
        }
        packet
    }

    #[test]
    fn test_query_layout() {
        let query = encode_query(0x1234, "example.com", RecordType::Aaaa).unwrap();
        assert_eq!(&query[..2], &[0x12, 0x34]);
        assert_eq!(&query[2..4], &[0x01, 0x00]);
        assert_eq!(&query[4..12], &[0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&query[12..25], b"\x07example\x03com\x00");
        assert_eq!(&query[25..], &[0, 28, 0, 1]);
    }

    #[test]
    fn test_trailing_dot_is_ignored() {
        let plain = encode_query(1, "example.com", RecordType::A).unwrap();
        let dotted = encode_query(1, "example.com.", RecordType::A).unwrap();
        assert_eq!(plain, dotted);
    }

    #[test]
    fn test_hostname_validation() {
        assert_eq!(validate_hostname(""), Err(MessageError::EmptyName));
        assert_eq!(validate_hostname("a..b"), Err(MessageError::EmptyLabel));
        assert_eq!(validate_hostname(".example"), Err(MessageError::EmptyLabel));

        let long_label = "a".repeat(64);
        assert!(matches!(
            validate_hostname(&long_label),
            Err(MessageError::LabelTooLong(_))
        ));

        let max = ["a".repeat(63), "b".repeat(63), "c".repeat(63), "d".repeat(61)].join(".");
        assert_eq!(max.len(), MAX_HOSTNAME_LEN);
        assert!(validate_hostname(&max).is_ok());
        assert!(validate_hostname(&format!("{max}.")).is_ok());
        assert_eq!(
            validate_hostname(&format!("x{max}")),
            Err(MessageError::NameTooLong(254))
        );
    }

    #[test]
    fn test_decode_a_record() {
        let query = encode_query(7, "example.com", RecordType::A).unwrap();
        let packet = reply(&query, 0, &[(1, &[93, 184, 216, 34])]);
        assert_eq!(
            decode_reply(&packet, 7, "example.com", RecordType::A),
            ReplyOutcome::Address(Ipv4Addr::new(93, 184, 216, 34).into())
        );
    }

    #[test]
    fn test_decode_skips_other_records() {
        let query = encode_query(7, "www.example.com", RecordType::Aaaa).unwrap();
        let v6 = Ipv6Addr::new(0x2606, 0x2800, 0x220, 1, 0x248, 0x1893, 0x25c8, 0x1946);
        // A CNAME pointing back at the question name, then the address.
        let packet = reply(&query, 0, &[(5, &[0xc0, 0x0c]), (28, &v6.octets())]);
        assert_eq!(
            decode_reply(&packet, 7, "WWW.Example.COM", RecordType::Aaaa),
            ReplyOutcome::Address(v6.into())
        );
    }

    #[test]
    fn test_decode_rcodes() {
        let query = encode_query(9, "nonexistent.invalid", RecordType::A).unwrap();
        let nx = reply(&query, 3, &[]);
        assert_eq!(
            decode_reply(&nx, 9, "nonexistent.invalid", RecordType::A),
            ReplyOutcome::NoSuchHost
        );
        let servfail = reply(&query, 2, &[]);
        assert_eq!(
            decode_reply(&servfail, 9, "nonexistent.invalid", RecordType::A),
            ReplyOutcome::DnsError
        );
        let empty = reply(&query, 0, &[]);
        assert_eq!(
            decode_reply(&empty, 9, "nonexistent.invalid", RecordType::A),
            ReplyOutcome::DnsError
        );
    }

    #[test]
    fn test_decode_ignores_mismatches() {
        let query = encode_query(3, "example.com", RecordType::A).unwrap();
        let packet = reply(&query, 0, &[(1, &[1, 2, 3, 4])]);

        assert_eq!(
            decode_reply(&packet, 4, "example.com", RecordType::A),
            ReplyOutcome::Unrelated
        );
        assert_eq!(
            decode_reply(&packet, 3, "example.org", RecordType::A),
            ReplyOutcome::Unrelated
        );
        assert_eq!(
            decode_reply(&packet, 3, "www.example.com", RecordType::A),
            ReplyOutcome::Unrelated
        );
        assert_eq!(
            decode_reply(&packet, 3, "example.com", RecordType::Aaaa),
            ReplyOutcome::Unrelated
        );
        // Failures for another question must not settle this one.
        for rcode in [2, 3] {
            let other = encode_query(3, "foo.example", RecordType::A).unwrap();
            let failure = reply(&other, rcode, &[]);
            assert_eq!(
                decode_reply(&failure, 3, "bar.example", RecordType::A),
                ReplyOutcome::Unrelated,
                "rcode {rcode}"
            );
            assert_eq!(
                decode_reply(&failure, 3, "foo.example", RecordType::Aaaa),
                ReplyOutcome::Unrelated,
                "rcode {rcode}"
            );
        }
        // The query itself has the response bit clear.
        assert_eq!(
            decode_reply(&query, 3, "example.com", RecordType::A),
            ReplyOutcome::Unrelated
        );
    }

    #[test]
    fn test_truncated_reply_is_dns_error() {
        let query = encode_query(5, "example.com", RecordType::A).unwrap();
        let packet = reply(&query, 0, &[(1, &[1, 2, 3, 4])]);
        for len in 2..packet.len() {
            assert_eq!(
                decode_reply(&packet[..len], 5, "example.com", RecordType::A),
                ReplyOutcome::DnsError,
                "length {len}"
            );
        }
        assert_eq!(reply_id(&packet[..1]), None);
        assert_eq!(
            decode_reply(&packet[..1], 5, "example.com", RecordType::A),
            ReplyOutcome::Unrelated
        );
    }

    #[test]
    fn test_wrong_rdata_length_is_dns_error() {
        let query = encode_query(5, "example.com", RecordType::A).unwrap();
        let packet = reply(&query, 0, &[(1, &[1, 2, 3])]);
        assert_eq!(
            decode_reply(&packet, 5, "example.com", RecordType::A),
            ReplyOutcome::DnsError
        );
    }
}
