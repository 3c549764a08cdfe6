//! Captive DNS responder.
//!
//! While the provisioning portal is up, every A query gets answered with the
//! portal address so phones and laptops running captive-portal detection are
//! steered at the setup page. This is the whole of the DNS protocol we
//! speak: one question, one synthesized answer, nothing recursive.

use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use tracing::{debug, info};

/// Most packets drained per tick, so a burst of probes cannot starve the
/// rest of the poll cycle.
const MAX_PACKETS_PER_TICK: usize = 8;

const QTYPE_A: u16 = 1;
const QTYPE_ANY: u16 = 255;
const QCLASS_IN: u16 = 1;

pub(crate) struct DnsResponder {
    socket: UdpSocket,
    addr: SocketAddr,
    answer: Ipv4Addr,
}

impl DnsResponder {
    pub(crate) fn bind(bind: SocketAddr, answer: Ipv4Addr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        let addr = socket.local_addr()?;
        info!("captive dns answering {answer} on {addr}");
        Ok(Self {
            socket,
            addr,
            answer,
        })
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Drains pending queries, answering each. Returns without blocking.
    pub(crate) fn service(&mut self) {
        let mut buf = [0u8; 512];
        for _ in 0..MAX_PACKETS_PER_TICK {
            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("dns recv failed: {e}");
                    break;
                }
            };

            let Some(reply) = build_reply(&buf[..len], self.answer) else {
                continue;
            };
            if let Err(e) = self.socket.send_to(&reply, peer) {
                debug!("dns send to {peer} failed: {e}");
            }
        }
    }
}

/// Builds an answer for a plain one-question A/ANY query, or `None` for
/// anything else (responses, truncated packets, other record types).
fn build_reply(query: &[u8], answer: Ipv4Addr) -> Option<Vec<u8>> {
    if query.len() < 12 {
        return None;
    }

    let flags = u16::from_be_bytes([query[2], query[3]]);
    let is_response = flags & 0x8000 != 0;
    let opcode = (flags >> 11) & 0xf;
    let qdcount = u16::from_be_bytes([query[4], query[5]]);
    if is_response || opcode != 0 || qdcount != 1 {
        return None;
    }

    // walk the single question's labels
    let mut pos = 12;
    loop {
        let len = *query.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        // compression pointers do not belong in a question
        if len & 0xc0 != 0 {
            return None;
        }
        pos += 1 + len;
    }
    if pos + 4 > query.len() {
        return None;
    }
    let qtype = u16::from_be_bytes([query[pos], query[pos + 1]]);
    let qclass = u16::from_be_bytes([query[pos + 2], query[pos + 3]]);
    let question_end = pos + 4;

    if !(qtype == QTYPE_A || qtype == QTYPE_ANY) || qclass != QCLASS_IN {
        return None;
    }

    let mut reply = Vec::with_capacity(question_end + 16);
    reply.extend_from_slice(&query[0..2]); // id
    reply.extend_from_slice(&[0x81, 0x80]); // response, recursion "available"
    reply.extend_from_slice(&[0x00, 0x01]); // one question
    reply.extend_from_slice(&[0x00, 0x01]); // one answer
    reply.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // no authority/additional
    reply.extend_from_slice(&query[12..question_end]);
    reply.extend_from_slice(&[0xc0, 0x0c]); // name: pointer at the question
    reply.extend_from_slice(&QTYPE_A.to_be_bytes());
    reply.extend_from_slice(&QCLASS_IN.to_be_bytes());
    reply.extend_from_slice(&[0x00, 0x00, 0x00, 0x3c]); // ttl 60s
    reply.extend_from_slice(&[0x00, 0x04]);
    reply.extend_from_slice(&answer.octets());

    Some(reply)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    const PORTAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

    /// `example.com`, type A, class IN, id 0xabcd.
    fn a_query() -> Vec<u8> {
        let mut q = vec![
            0xab, 0xcd, // id
            0x01, 0x00, // standard query, recursion desired
            0x00, 0x01, // one question
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        q.extend_from_slice(b"\x07example\x03com\x00");
        q.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        q
    }

    #[test]
    fn answers_a_queries_with_the_portal_address() {
        let reply = build_reply(&a_query(), PORTAL_IP).unwrap();

        assert_eq!(&reply[0..2], &[0xab, 0xcd]);
        // one answer record
        assert_eq!(u16::from_be_bytes([reply[6], reply[7]]), 1);
        // rdata is the portal address
        assert_eq!(reply[reply.len() - 4..], PORTAL_IP.octets());
    }

    #[test]
    fn ignores_responses() {
        let mut query = a_query();
        query[2] = 0x81; // QR bit set
        assert_eq!(build_reply(&query, PORTAL_IP), None);
    }

    #[test]
    fn ignores_non_address_queries() {
        let mut query = a_query();
        let type_at = query.len() - 4;
        query[type_at + 1] = 15; // MX
        assert_eq!(build_reply(&query, PORTAL_IP), None);
    }

    #[test]
    fn ignores_truncated_packets() {
        let query = a_query();
        assert_eq!(build_reply(&query[..8], PORTAL_IP), None);
        assert_eq!(build_reply(&query[..query.len() - 3], PORTAL_IP), None);
    }

    #[test]
    fn responder_answers_over_loopback() {
        let mut responder =
            DnsResponder::bind("127.0.0.1:0".parse().unwrap(), PORTAL_IP).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();

        client.send_to(&a_query(), responder.addr()).unwrap();
        responder.service();

        let mut buf = [0u8; 512];
        let (len, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[0..2], &[0xab, 0xcd]);
        assert_eq!(buf[len - 4..len], PORTAL_IP.octets());
    }

    #[test]
    fn service_survives_garbage() {
        let mut responder =
            DnsResponder::bind("127.0.0.1:0".parse().unwrap(), PORTAL_IP).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();

        client.send_to(&[0xff; 3], responder.addr()).unwrap();
        client.send_to(&[0x00; 64], responder.addr()).unwrap();
        responder.service();
    }
}
