use pnet::packet::MutablePacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes, checksum};
use std::sync::atomic::{AtomicU16, Ordering};

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Default payload size (standard ping)
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;
/// Minimum payload size (identifier + sequence + timestamp)
pub const MIN_PAYLOAD_SIZE: usize = 8;

static ROUND_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Identifies a specific probe for correlation
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ProbeId {
    pub ttl: u8,
    pub seq: u8,
}

impl ProbeId {
    pub fn new(ttl: u8, seq: u8) -> Self {
        Self { ttl, seq }
    }

    /// Encode TTL and cycle into a 16-bit value for the ICMP sequence field
    pub fn to_sequence(&self) -> u16 {
        ((self.ttl as u16) << 8) | (self.seq as u16)
    }

    /// Decode from a 16-bit ICMP sequence field
    pub fn from_sequence(seq: u16) -> Self {
        Self {
            ttl: (seq >> 8) as u8,
            seq: (seq & 0xFF) as u8,
        }
    }
}

/// ICMP identifier for one probe round
///
/// Concurrent rounds from the same process share the raw socket traffic, so
/// each round mixes a process-wide counter into the pid.
pub fn round_identifier() -> u16 {
    let round = ROUND_COUNTER.fetch_add(1, Ordering::Relaxed);
    (std::process::id() as u16).wrapping_add(round.wrapping_mul(0x9E37))
}

/// Build an ICMP Echo Request packet
///
/// Set ipv6=true to build an ICMPv6 Echo Request (the kernel fills in the
/// ICMPv6 checksum).
///
/// Payload layout:
/// - Bytes 0-1: identifier
/// - Bytes 2-3: sequence
/// - Bytes 4-7: timestamp (lower 32 bits of microseconds)
/// - Bytes 8+: pattern fill
pub fn build_echo_request(
    identifier: u16,
    sequence: u16,
    payload_size: usize,
    ipv6: bool,
) -> Vec<u8> {
    let payload_size = payload_size.max(MIN_PAYLOAD_SIZE);
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload_size];

    {
        let Some(mut packet) = MutableEchoRequestPacket::new(&mut buffer) else {
            return buffer;
        };

        if ipv6 {
            packet.set_icmp_type(IcmpType::new(128));
        } else {
            packet.set_icmp_type(IcmpTypes::EchoRequest);
        }
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);

        let payload = packet.payload_mut();
        payload[0..2].copy_from_slice(&identifier.to_be_bytes());
        payload[2..4].copy_from_slice(&sequence.to_be_bytes());

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u32)
            .unwrap_or(0);
        payload[4..8].copy_from_slice(&timestamp.to_be_bytes());

        for (i, byte) in payload[8..].iter_mut().enumerate() {
            *byte = (i & 0xFF) as u8;
        }
    }

    if !ipv6 {
        let cksum = IcmpPacket::new(&buffer).map(|p| checksum(&p));
        if let (Some(cksum), Some(mut packet)) =
            (cksum, MutableEchoRequestPacket::new(&mut buffer))
        {
            packet.set_checksum(cksum);
        }
    }

    buffer
}
