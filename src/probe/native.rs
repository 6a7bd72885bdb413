//! Built-in ICMP echo path prober.
//!
//! One round sends `cycles` waves of Echo Requests, one per TTL up to the
//! destination (once known), and counts correlated replies per TTL. Socket
//! I/O is blocking, so the round runs on the blocking thread pool.

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ProbeProtocol;
use crate::probe::{
    DEFAULT_PAYLOAD_SIZE, PathProbe, ProbeError, ProbeId, build_echo_request,
    create_raw_icmp_socket, is_timeout, parse_icmp_response, recv_icmp, round_identifier,
    send_icmp, set_ttl,
};
use crate::state::HopStat;

/// Native ICMP traceroute engine (needs CAP_NET_RAW)
#[derive(Debug, Clone)]
pub struct IcmpProber {
    max_hops: u8,
    cycle_timeout: Duration,
}

impl IcmpProber {
    pub fn new(max_hops: u8, cycle_timeout: Duration) -> Self {
        Self {
            max_hops,
            cycle_timeout,
        }
    }
}

#[async_trait]
impl PathProbe for IcmpProber {
    async fn probe(
        &self,
        target: &str,
        protocol: ProbeProtocol,
        cycles: u32,
    ) -> Result<Vec<HopStat>, ProbeError> {
        if protocol != ProbeProtocol::Icmp {
            return Err(ProbeError::Unsupported(protocol));
        }

        let round = Round {
            target: target.to_string(),
            cycles,
            max_hops: self.max_hops,
            cycle_timeout: self.cycle_timeout,
            cancel: CancellationToken::new(),
        };

        // Stop the blocking loop if this future is dropped (timeout or shutdown)
        let _stop = scopeguard::guard(round.cancel.clone(), |cancel| cancel.cancel());

        tokio::task::spawn_blocking(move || round.run())
            .await
            .map_err(|e| ProbeError::Join(e.to_string()))?
    }
}

struct Round {
    target: String,
    cycles: u32,
    max_hops: u8,
    cycle_timeout: Duration,
    cancel: CancellationToken,
}

impl Round {
    fn run(self) -> Result<Vec<HopStat>, ProbeError> {
        let target = resolve_target(&self.target)?;
        let ipv6 = target.is_ipv6();
        let socket = create_raw_icmp_socket(ipv6)?;
        let identifier = round_identifier();

        let max_hops = self.max_hops as usize;
        let mut sent = vec![0u64; max_hops];
        let mut received = vec![0u64; max_hops];
        let mut dest_ttl: Option<u8> = None;
        let mut buffer = [0u8; 1500];

        for cycle in 0..self.cycles {
            if self.cancel.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }

            // Sequence carries the low byte of the cycle; stale replies from
            // 256 cycles ago are not a concern within one reply window
            let seq = cycle as u8;
            let limit = dest_ttl.unwrap_or(self.max_hops);

            for ttl in 1..=limit {
                let probe_id = ProbeId::new(ttl, seq);
                let packet = build_echo_request(
                    identifier,
                    probe_id.to_sequence(),
                    DEFAULT_PAYLOAD_SIZE,
                    ipv6,
                );

                if let Err(e) = set_ttl(&socket, ttl, ipv6) {
                    return Err(ProbeError::Socket(format!(
                        "failed to set TTL {}: {}",
                        ttl, e
                    )));
                }
                match send_icmp(&socket, &packet, target) {
                    Ok(_) => sent[ttl as usize - 1] += 1,
                    Err(e) => {
                        tracing::debug!(dest = %target, ttl, error = %e, "failed to send probe");
                    }
                }
            }

            let mut answered: HashSet<u8> = HashSet::new();
            let deadline = Instant::now() + self.cycle_timeout;

            while Instant::now() < deadline {
                if self.cancel.is_cancelled() {
                    return Err(ProbeError::Cancelled);
                }

                let (len, source) = match recv_icmp(&socket, &mut buffer) {
                    Ok(r) => r,
                    Err(e) if is_timeout(&e) => continue,
                    Err(e) => return Err(ProbeError::Socket(format!("receive failed: {}", e))),
                };

                let Some(response) = parse_icmp_response(&buffer[..len], source, identifier) else {
                    continue;
                };

                let ttl = response.probe_id.ttl;
                if response.probe_id.seq != seq || ttl == 0 || ttl > limit {
                    continue;
                }
                if !answered.insert(ttl) {
                    continue;
                }

                received[ttl as usize - 1] += 1;
                if response.kind.is_terminal() {
                    dest_ttl = Some(dest_ttl.map_or(ttl, |d| d.min(ttl)));
                }

                let wanted = dest_ttl.unwrap_or(limit);
                if (1..=wanted).all(|t| answered.contains(&t)) {
                    break;
                }
            }
        }

        // Without a destination answer, report up to the last hop that spoke
        let last = match dest_ttl {
            Some(d) => d as usize,
            None => received.iter().rposition(|&r| r > 0).map_or(1, |i| i + 1),
        };

        Ok((0..last)
            .map(|i| HopStat::new(i as u32 + 1, sent[i], received[i]))
            .collect())
    }
}

/// Resolve a hostname or literal address, preferring IPv4
pub fn resolve_target(target: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = (target, 0)
        .to_socket_addrs()
        .map_err(|e| ProbeError::Resolve {
            target: target.to_string(),
            reason: e.to_string(),
        })?
        .map(|s| s.ip())
        .collect();

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ProbeError::Resolve {
            target: target.to_string(),
            reason: "no addresses found".to_string(),
        })
}
