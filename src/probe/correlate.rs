use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use std::net::IpAddr;

use crate::probe::icmp::ProbeId;

const IPPROTO_ICMP: u8 = 1;

// ICMPv6 type codes
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const IPV6_HEADER_SIZE: usize = 40;
const IPV6_NH_ICMPV6: u8 = 58;

/// What kind of ICMP message answered a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// The destination itself answered
    EchoReply,
    /// An intermediate router dropped the probe at TTL expiry
    TimeExceeded,
    /// Some hop refused to forward; treated as the end of the path
    DestUnreachable(u8),
}

impl ResponseKind {
    /// Whether this response marks the end of the path
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::TimeExceeded)
    }
}

/// ICMP message correlated to one of our probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub responder: IpAddr,
    pub probe_id: ProbeId,
    pub kind: ResponseKind,
}

/// Parse a packet read from a raw ICMP socket
///
/// IPv4 raw sockets deliver the IP header; IPv6 raw sockets deliver the
/// ICMPv6 message directly. Returns None for anything that is not an
/// answer to a probe carrying `our_identifier`.
pub fn parse_icmp_response(
    data: &[u8],
    responder: IpAddr,
    our_identifier: u16,
) -> Option<ParsedResponse> {
    if data.is_empty() {
        return None;
    }

    if responder.is_ipv6() {
        parse_icmp_response_v6(data, responder, our_identifier)
    } else {
        parse_icmp_response_v4(data, responder, our_identifier)
    }
}

fn parse_icmp_response_v4(
    data: &[u8],
    responder: IpAddr,
    our_identifier: u16,
) -> Option<ParsedResponse> {
    let ip_packet = Ipv4Packet::new(data)?;
    let ip_header_len = (ip_packet.get_header_length() as usize) * 4;

    if data.len() < ip_header_len + 8 {
        return None;
    }

    let icmp_data = &data[ip_header_len..];
    let icmp_packet = IcmpPacket::new(icmp_data)?;

    match icmp_packet.get_icmp_type() {
        IcmpTypes::EchoReply => {
            let (identifier, sequence) = id_and_sequence(icmp_data)?;
            (identifier == our_identifier).then(|| ParsedResponse {
                responder,
                probe_id: ProbeId::from_sequence(sequence),
                kind: ResponseKind::EchoReply,
            })
        }
        IcmpTypes::TimeExceeded => {
            quoted_echo_v4(icmp_data, our_identifier).map(|sequence| ParsedResponse {
                responder,
                probe_id: ProbeId::from_sequence(sequence),
                kind: ResponseKind::TimeExceeded,
            })
        }
        IcmpTypes::DestinationUnreachable => {
            let code = icmp_packet.get_icmp_code().0;
            quoted_echo_v4(icmp_data, our_identifier).map(|sequence| ParsedResponse {
                responder,
                probe_id: ProbeId::from_sequence(sequence),
                kind: ResponseKind::DestUnreachable(code),
            })
        }
        _ => None,
    }
}

/// Sequence of our Echo Request quoted inside an IPv4 ICMP error
fn quoted_echo_v4(icmp_data: &[u8], our_identifier: u16) -> Option<u16> {
    // ICMP header (8) + original IP header (>= 20) + original ICMP header (8)
    if icmp_data.len() < 8 + 20 + 8 {
        return None;
    }

    let original_ip_data = &icmp_data[8..];
    let original_ip = Ipv4Packet::new(original_ip_data)?;
    let orig_ihl = (original_ip.get_header_length() as usize) * 4;

    if original_ip.get_next_level_protocol().0 != IPPROTO_ICMP
        || original_ip_data.len() < orig_ihl + 8
    {
        return None;
    }

    let original_icmp = &original_ip_data[orig_ihl..];
    if original_icmp[0] != 8 {
        // Not an Echo Request
        return None;
    }

    let (identifier, sequence) = id_and_sequence(original_icmp)?;
    (identifier == our_identifier).then_some(sequence)
}

fn parse_icmp_response_v6(
    icmp_data: &[u8],
    responder: IpAddr,
    our_identifier: u16,
) -> Option<ParsedResponse> {
    if icmp_data.len() < 8 {
        return None;
    }

    let kind = match icmp_data[0] {
        ICMPV6_ECHO_REPLY => {
            let (identifier, sequence) = id_and_sequence(icmp_data)?;
            return (identifier == our_identifier).then(|| ParsedResponse {
                responder,
                probe_id: ProbeId::from_sequence(sequence),
                kind: ResponseKind::EchoReply,
            });
        }
        ICMPV6_TIME_EXCEEDED => ResponseKind::TimeExceeded,
        ICMPV6_DEST_UNREACHABLE => ResponseKind::DestUnreachable(icmp_data[1]),
        _ => return None,
    };

    // ICMPv6 header (8) + original IPv6 header (40) + original ICMPv6 header (8)
    if icmp_data.len() < 8 + IPV6_HEADER_SIZE + 8 {
        return None;
    }
    let original_ip = &icmp_data[8..];
    if original_ip[6] != IPV6_NH_ICMPV6 {
        return None;
    }
    let original_icmp = &original_ip[IPV6_HEADER_SIZE..];
    if original_icmp[0] != ICMPV6_ECHO_REQUEST {
        return None;
    }

    let (identifier, sequence) = id_and_sequence(original_icmp)?;
    (identifier == our_identifier).then(|| ParsedResponse {
        responder,
        probe_id: ProbeId::from_sequence(sequence),
        kind,
    })
}

fn id_and_sequence(icmp: &[u8]) -> Option<(u16, u16)> {
    if icmp.len() < 8 {
        return None;
    }
    Some((
        u16::from_be_bytes([icmp[4], icmp[5]]),
        u16::from_be_bytes([icmp[6], icmp[7]]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::icmp::build_echo_request;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ipv4_header(
        protocol: u8,
        ttl: u8,
        src: [u8; 4],
        dst: [u8; 4],
        payload_len: usize,
    ) -> Vec<u8> {
        let total = (20 + payload_len) as u16;
        let mut h = vec![0u8; 20];
        h[0] = 0x45;
        h[2..4].copy_from_slice(&total.to_be_bytes());
        h[8] = ttl;
        h[9] = protocol;
        h[12..16].copy_from_slice(&src);
        h[16..20].copy_from_slice(&dst);
        h
    }

    fn time_exceeded_v4(identifier: u16, sequence: u16) -> Vec<u8> {
        let probe = build_echo_request(identifier, sequence, 8, false);
        let mut quoted = ipv4_header(1, 1, [192, 168, 1, 100], [8, 8, 8, 8], probe.len());
        quoted.extend_from_slice(&probe[..8]);

        let mut icmp = vec![11, 0, 0, 0, 0, 0, 0, 0];
        icmp.extend_from_slice(&quoted);

        let mut packet = ipv4_header(1, 250, [10, 0, 0, 1], [192, 168, 1, 100], icmp.len());
        packet.extend_from_slice(&icmp);
        packet
    }

    fn echo_reply_v4(identifier: u16, sequence: u16) -> Vec<u8> {
        let mut icmp = build_echo_request(identifier, sequence, 8, false);
        icmp[0] = 0;
        let mut packet = ipv4_header(1, 57, [8, 8, 8, 8], [192, 168, 1, 100], icmp.len());
        packet.extend_from_slice(&icmp);
        packet
    }

    #[test]
    fn test_time_exceeded_v4_correlated() {
        let seq = ProbeId::new(3, 7).to_sequence();
        let responder = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        let packet = time_exceeded_v4(0xBEEF, seq);
        let parsed = parse_icmp_response(&packet, responder, 0xBEEF).unwrap();
        assert_eq!(parsed.responder, responder);
        assert_eq!(parsed.probe_id, ProbeId::new(3, 7));
        assert_eq!(parsed.kind, ResponseKind::TimeExceeded);
        assert!(!parsed.kind.is_terminal());
    }

    #[test]
    fn test_time_exceeded_v4_other_identifier_ignored() {
        let seq = ProbeId::new(3, 7).to_sequence();
        let responder = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(parse_icmp_response(&time_exceeded_v4(0x1111, seq), responder, 0xBEEF).is_none());
    }

    #[test]
    fn test_echo_reply_v4_correlated() {
        let seq = ProbeId::new(9, 0).to_sequence();
        let responder = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

        let parsed = parse_icmp_response(&echo_reply_v4(77, seq), responder, 77).unwrap();
        assert_eq!(parsed.probe_id.ttl, 9);
        assert_eq!(parsed.kind, ResponseKind::EchoReply);
        assert!(parsed.kind.is_terminal());
    }

    #[test]
    fn test_truncated_v4_ignored() {
        let responder = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let packet = time_exceeded_v4(1, 1);
        assert!(parse_icmp_response(&packet[..30], responder, 1).is_none());
        assert!(parse_icmp_response(&[], responder, 1).is_none());
    }

    #[test]
    fn test_echo_reply_v6_correlated() {
        let seq = ProbeId::new(4, 2).to_sequence();
        let mut icmp = build_echo_request(99, seq, 8, true);
        icmp[0] = ICMPV6_ECHO_REPLY;
        let responder = IpAddr::V6(Ipv6Addr::LOCALHOST);

        let parsed = parse_icmp_response(&icmp, responder, 99).unwrap();
        assert_eq!(parsed.probe_id, ProbeId::new(4, 2));
        assert_eq!(parsed.kind, ResponseKind::EchoReply);
    }

    #[test]
    fn test_time_exceeded_v6_correlated() {
        let seq = ProbeId::new(2, 5).to_sequence();
        let probe = build_echo_request(99, seq, 8, true);

        let mut quoted_ip = vec![0u8; IPV6_HEADER_SIZE];
        quoted_ip[0] = 0x60;
        quoted_ip[6] = IPV6_NH_ICMPV6;
        quoted_ip[7] = 1;

        let mut icmp = vec![ICMPV6_TIME_EXCEEDED, 0, 0, 0, 0, 0, 0, 0];
        icmp.extend_from_slice(&quoted_ip);
        icmp.extend_from_slice(&probe);

        let responder = IpAddr::V6("2001:db8::1".parse().unwrap());
        let parsed = parse_icmp_response(&icmp, responder, 99).unwrap();
        assert_eq!(parsed.probe_id, ProbeId::new(2, 5));
        assert_eq!(parsed.kind, ResponseKind::TimeExceeded);
    }
}
