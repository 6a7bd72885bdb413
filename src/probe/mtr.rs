//! Engine backed by the system `mtr` binary in raw output mode.
//!
//! `mtr --raw` prints one event per line, with 0-based hop positions:
//!
//! ```text
//! x 0 33000          probe sent at position 0, sequence 33000
//! h 0 192.168.1.1    position 0 answered by 192.168.1.1
//! p 0 1843 33000     reply for sequence 33000 after 1843 usec
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::ProbeProtocol;
use crate::probe::{PathProbe, ProbeError};
use crate::state::HopStat;

/// Runs `mtr --raw` once per round
#[derive(Debug, Clone)]
pub struct MtrCommand {
    program: String,
    max_hops: u8,
}

impl MtrCommand {
    pub fn new(program: impl Into<String>, max_hops: u8) -> Self {
        Self {
            program: program.into(),
            max_hops,
        }
    }

    /// Command-line arguments for one round
    pub fn args(&self, target: &str, protocol: ProbeProtocol, cycles: u32) -> Vec<String> {
        let mut args = vec![
            "--raw".to_string(),
            "--no-dns".to_string(),
            "--report-cycles".to_string(),
            cycles.to_string(),
            "--max-ttl".to_string(),
            self.max_hops.to_string(),
        ];
        match protocol {
            ProbeProtocol::Tcp => args.push("--tcp".to_string()),
            ProbeProtocol::Udp => args.push("--udp".to_string()),
            ProbeProtocol::Icmp => {}
        }
        // Keep hostnames that look like flags from being parsed as options
        args.push("--".to_string());
        args.push(target.to_string());
        args
    }
}

#[async_trait]
impl PathProbe for MtrCommand {
    async fn probe(
        &self,
        target: &str,
        protocol: ProbeProtocol,
        cycles: u32,
    ) -> Result<Vec<HopStat>, ProbeError> {
        let output = Command::new(&self.program)
            .args(self.args(target, protocol, cycles))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout or shutdown kills mtr
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Exited {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_raw_output(
            &String::from_utf8_lossy(&output.stdout),
            cycles,
        ))
    }
}

#[derive(Default)]
struct PositionCounts {
    sent: u64,
    received: u64,
    /// Last address reported by an `h` line
    host: Option<String>,
    /// Any reply, host or name line was seen
    answered: bool,
}

/// Count transmits and replies per hop from `mtr --raw` output
///
/// mtr sends the next TTL before earlier replies arrive, so positions past
/// the destination can carry `x` lines with no answer. The path ends at the
/// last position that answered, or earlier at the first position reporting
/// the same address as that last one.
///
/// Versions of mtr that predate `x` lines only report replies; every
/// position that showed up is then assumed to have been sent `cycles` probes.
pub fn parse_raw_output(raw: &str, cycles: u32) -> Vec<HopStat> {
    let mut positions: BTreeMap<u32, PositionCounts> = BTreeMap::new();
    let mut saw_transmit = false;

    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        let (Some(kind), Some(pos)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(pos) = pos.parse::<u32>() else {
            continue;
        };

        match kind {
            "x" => {
                saw_transmit = true;
                positions.entry(pos).or_default().sent += 1;
            }
            "p" => {
                let counts = positions.entry(pos).or_default();
                counts.received += 1;
                counts.answered = true;
            }
            "h" => {
                let counts = positions.entry(pos).or_default();
                counts.host = fields.next().map(str::to_string);
                counts.answered = true;
            }
            "d" => positions.entry(pos).or_default().answered = true,
            _ => {}
        }
    }

    let Some(last) = path_end(&positions) else {
        return Vec::new();
    };

    positions
        .into_iter()
        .take_while(|(pos, _)| *pos <= last)
        .map(|(pos, counts)| {
            let sent = if saw_transmit {
                counts.sent
            } else {
                cycles as u64
            };
            HopStat::new(pos + 1, sent, counts.received)
        })
        .collect()
}

/// Final position of the path, or None if nothing answered
fn path_end(positions: &BTreeMap<u32, PositionCounts>) -> Option<u32> {
    let (&last, counts) = positions.iter().rev().find(|(_, c)| c.answered)?;

    let Some(dest) = counts.host.as_deref() else {
        return Some(last);
    };

    // The destination answers every TTL at or beyond its distance
    positions
        .iter()
        .find(|(_, c)| c.host.as_deref() == Some(dest))
        .map(|(&pos, _)| pos)
        .or(Some(last))
}
