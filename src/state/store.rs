//! Latest per-hop counters for every probed host.
//!
//! The store is partitioned per alias: the outer map is only write-locked
//! when an alias is registered, and each alias slot holds an immutable
//! `Arc<[HopStat]>` that writers swap wholesale. A reader therefore sees
//! either the complete previous round or the complete new one, and a write
//! to one alias never waits on a reader or writer of another.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Packet counters for one hop of one completed round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HopStat {
    /// 1-based position along the path
    pub index: u32,
    pub sent: u64,
    pub received: u64,
}

impl HopStat {
    pub fn new(index: u32, sent: u64, received: u64) -> Self {
        Self {
            index,
            sent,
            received,
        }
    }
}

/// One parsed round for a host, handed from a worker to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub alias: String,
    pub hops: Vec<HopStat>,
}

/// Last-known counters for one (alias, hop)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSample {
    pub sent: u64,
    pub received: u64,
}

type Slot = Arc<RwLock<Arc<[HopStat]>>>;

/// Concurrency-safe latest-value store, cheap to clone
#[derive(Clone, Default)]
pub struct MetricsStore {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty slot for `alias` so later updates skip the outer write lock
    pub fn register(&self, alias: &str) {
        if self.slots.read().contains_key(alias) {
            return;
        }
        self.slots
            .write()
            .entry(alias.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Arc::from(Vec::new()))));
    }

    /// Replace every hop of `alias` with `hops`
    pub fn update(&self, alias: &str, mut hops: Vec<HopStat>) {
        debug_assert!(
            has_unique_indices(&hops),
            "duplicate hop index in update for {alias}"
        );

        hops.sort_by_key(|h| h.index);
        let hops: Arc<[HopStat]> = Arc::from(hops);

        let slot = self.slots.read().get(alias).cloned();
        let slot = match slot {
            Some(slot) => slot,
            None => {
                self.register(alias);
                match self.slots.read().get(alias).cloned() {
                    Some(slot) => slot,
                    None => return,
                }
            }
        };

        *slot.write() = hops;
    }

    /// Apply a parsed round
    pub fn apply(&self, result: ProbeResult) {
        self.update(&result.alias, result.hops);
    }

    /// Current hops of one alias
    pub fn hops(&self, alias: &str) -> Option<Arc<[HopStat]>> {
        let slot = self.slots.read().get(alias).cloned()?;
        let hops = slot.read().clone();
        Some(hops)
    }

    /// Point-in-time copy of every alias, safe to render without locks
    pub fn snapshot(&self) -> Snapshot {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .iter()
            .map(|(alias, slot)| (alias.clone(), slot.clone()))
            .collect();

        let hosts = slots
            .into_iter()
            .map(|(alias, slot)| {
                let hops = slot.read().clone();
                (alias, hops)
            })
            .collect();

        Snapshot { hosts }
    }

    /// Number of registered aliases
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

fn has_unique_indices(hops: &[HopStat]) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(hops.len());
    hops.iter().all(|h| seen.insert(h.index))
}

/// Immutable view of the store, ordered by alias
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    hosts: BTreeMap<String, Arc<[HopStat]>>,
}

impl Snapshot {
    /// Counters for one (alias, hop)
    pub fn sample(&self, alias: &str, index: u32) -> Option<MetricSample> {
        self.hosts
            .get(alias)?
            .iter()
            .find(|h| h.index == index)
            .map(|h| MetricSample {
                sent: h.sent,
                received: h.received,
            })
    }

    /// All hops of one alias
    pub fn hops(&self, alias: &str) -> Option<&[HopStat]> {
        self.hosts.get(alias).map(|h| &h[..])
    }

    /// Every (alias, hop) pair, ordered by alias then hop index
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HopStat)> {
        self.hosts
            .iter()
            .flat_map(|(alias, hops)| hops.iter().map(move |h| (alias.as_str(), h)))
    }

    /// Total number of samples
    pub fn len(&self) -> usize {
        self.hosts.values().map(|h| h.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn hops(counts: &[(u64, u64)]) -> Vec<HopStat> {
        counts
            .iter()
            .enumerate()
            .map(|(i, &(sent, received))| HopStat::new(i as u32 + 1, sent, received))
            .collect()
    }

    #[test]
    fn test_update_then_snapshot_returns_exact_hops() {
        let store = MetricsStore::new();
        let round = hops(&[(10, 10), (10, 7)]);
        store.update("edge1", round.clone());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.hops("edge1").unwrap(), &round[..]);
        assert_eq!(
            snapshot.sample("edge1", 2),
            Some(MetricSample {
                sent: 10,
                received: 7
            })
        );
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_shorter_path_removes_stale_hops() {
        let store = MetricsStore::new();
        store.update("a", hops(&[(5, 5), (5, 5), (5, 4), (5, 3)]));
        store.update("a", hops(&[(5, 5), (5, 5)]));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.hops("a").unwrap().len(), 2);
        assert!(snapshot.sample("a", 3).is_none());
        assert!(snapshot.sample("a", 4).is_none());
    }

    #[test]
    fn test_update_leaves_other_aliases_untouched() {
        let store = MetricsStore::new();
        store.update("a", hops(&[(3, 3)]));
        store.update("b", hops(&[(4, 1)]));
        store.update("a", hops(&[(6, 6), (6, 5)]));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.hops("b").unwrap(), &hops(&[(4, 1)])[..]);
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let store = MetricsStore::new();
        store.update("a", hops(&[(1, 1)]));
        let before = store.snapshot();

        store.update("a", hops(&[(2, 0), (2, 2)]));

        assert_eq!(before.hops("a").unwrap(), &hops(&[(1, 1)])[..]);
        assert_eq!(store.snapshot().hops("a").unwrap().len(), 2);
    }

    #[test]
    fn test_registered_alias_has_no_samples() {
        let store = MetricsStore::new();
        store.register("idle");
        store.register("idle");

        assert_eq!(store.len(), 1);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.hops("idle").map(|h| h.len()), Some(0));
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_snapshot_iteration_order() {
        let store = MetricsStore::new();
        store.update("zeta", hops(&[(1, 1)]));
        store.update("alpha", hops(&[(1, 1), (1, 0)]));

        let keys: Vec<(String, u32)> = store
            .snapshot()
            .iter()
            .map(|(alias, hop)| (alias.to_string(), hop.index))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("alpha".to_string(), 1),
                ("alpha".to_string(), 2),
                ("zeta".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_readers_never_see_mixed_rounds() {
        let store = MetricsStore::new();
        store.register("a");

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for round in 1..=500u64 {
                    // Every hop of a round carries the round number
                    let hops = (1..=8).map(|i| HopStat::new(i, round, round)).collect();
                    store.update("a", hops);
                }
            })
        };

        for _ in 0..500 {
            let snapshot = store.snapshot();
            let hops = snapshot.hops("a").unwrap();
            if let Some(first) = hops.first() {
                assert_eq!(hops.len(), 8);
                assert!(hops.iter().all(|h| h.sent == first.sent));
            }
        }

        writer.join().unwrap();
        assert_eq!(store.snapshot().sample("a", 8).unwrap().sent, 500);
    }
}
