//! Normalization of raw engine output into per-hop records.

use crate::state::HopStat;

/// Something odd about a round that was still processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// Hop reported with no packets sent; dropped
    DroppedEmpty { index: u32 },
    /// Same index reported twice; later entry dropped
    Duplicate { index: u32 },
    /// Path not contiguous; everything from `found` on was discarded
    Gap { expected: u32, found: u32 },
    /// Engine reported more replies than probes; kept as-is
    ExcessReceived { index: u32, sent: u64, received: u64 },
}

/// Output of [`parse_round`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRound {
    /// Contiguous hops starting at index 1
    pub hops: Vec<HopStat>,
    pub anomalies: Vec<Anomaly>,
}

impl ParsedRound {
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Whether the path was cut short by a gap
    pub fn truncated(&self) -> bool {
        self.anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::Gap { .. }))
    }
}

/// Turn one round of raw engine hops into a contiguous, ordered path
pub fn parse_round(mut raw: Vec<HopStat>) -> ParsedRound {
    raw.sort_by_key(|h| h.index);

    let mut parsed = ParsedRound {
        hops: Vec::with_capacity(raw.len()),
        anomalies: Vec::new(),
    };

    let mut expected = 1u32;
    for hop in raw {
        if hop.sent == 0 {
            parsed.anomalies.push(Anomaly::DroppedEmpty { index: hop.index });
            continue;
        }

        if parsed.hops.last().is_some_and(|last| last.index == hop.index) {
            parsed.anomalies.push(Anomaly::Duplicate { index: hop.index });
            continue;
        }

        if hop.index != expected {
            parsed.anomalies.push(Anomaly::Gap {
                expected,
                found: hop.index,
            });
            break;
        }

        if hop.received > hop.sent {
            parsed.anomalies.push(Anomaly::ExcessReceived {
                index: hop.index,
                sent: hop.sent,
                received: hop.received,
            });
        }

        parsed.hops.push(hop);
        expected += 1;
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(index: u32, sent: u64, received: u64) -> HopStat {
        HopStat::new(index, sent, received)
    }

    #[test]
    fn test_contiguous_path_unchanged() {
        let raw = vec![hop(1, 10, 10), hop(2, 10, 7), hop(3, 10, 10)];
        let parsed = parse_round(raw.clone());
        assert_eq!(parsed.hops, raw);
        assert!(parsed.anomalies.is_empty());
    }

    #[test]
    fn test_truncates_at_first_gap() {
        let raw = vec![hop(1, 5, 5), hop(2, 5, 5), hop(3, 5, 4), hop(5, 5, 5)];
        let parsed = parse_round(raw);

        let indices: Vec<u32> = parsed.hops.iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(
            parsed.anomalies,
            vec![Anomaly::Gap {
                expected: 4,
                found: 5
            }]
        );
        assert!(parsed.truncated());
    }

    #[test]
    fn test_drops_trailing_zero_sent() {
        let raw = vec![hop(1, 5, 5), hop(2, 5, 3), hop(3, 0, 0)];
        let parsed = parse_round(raw);

        assert_eq!(parsed.hops, vec![hop(1, 5, 5), hop(2, 5, 3)]);
        assert_eq!(parsed.anomalies, vec![Anomaly::DroppedEmpty { index: 3 }]);
        assert!(!parsed.truncated());
    }

    #[test]
    fn test_zero_sent_in_middle_becomes_gap() {
        let raw = vec![hop(1, 5, 5), hop(2, 0, 0), hop(3, 5, 5)];
        let parsed = parse_round(raw);

        assert_eq!(parsed.hops, vec![hop(1, 5, 5)]);
        assert!(parsed.truncated());
    }

    #[test]
    fn test_missing_first_hop_yields_nothing() {
        let parsed = parse_round(vec![hop(2, 5, 5), hop(3, 5, 5)]);
        assert!(parsed.is_empty());
        assert_eq!(
            parsed.anomalies,
            vec![Anomaly::Gap {
                expected: 1,
                found: 2
            }]
        );
    }

    #[test]
    fn test_excess_received_preserved() {
        let parsed = parse_round(vec![hop(1, 10, 12)]);
        assert_eq!(parsed.hops, vec![hop(1, 10, 12)]);
        assert_eq!(
            parsed.anomalies,
            vec![Anomaly::ExcessReceived {
                index: 1,
                sent: 10,
                received: 12
            }]
        );
    }

    #[test]
    fn test_unordered_input_sorted() {
        let parsed = parse_round(vec![hop(3, 1, 1), hop(1, 1, 1), hop(2, 1, 0)]);
        let indices: Vec<u32> = parsed.hops.iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_index_keeps_first() {
        let parsed = parse_round(vec![hop(1, 4, 4), hop(2, 4, 2), hop(2, 4, 4), hop(3, 4, 4)]);
        assert_eq!(parsed.hops, vec![hop(1, 4, 4), hop(2, 4, 2), hop(3, 4, 4)]);
        assert_eq!(parsed.anomalies, vec![Anomaly::Duplicate { index: 2 }]);
    }

    #[test]
    fn test_zero_index_is_gap() {
        let parsed = parse_round(vec![hop(0, 3, 3), hop(1, 3, 3)]);
        assert!(parsed.is_empty());
        assert!(parsed.truncated());
    }

    #[test]
    fn test_empty_input() {
        let parsed = parse_round(Vec::new());
        assert!(parsed.is_empty());
        assert!(parsed.anomalies.is_empty());
    }
}
