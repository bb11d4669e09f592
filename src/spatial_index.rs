//! One proximity index per (asset, side), created lazily on first insert.
//!
//! Each index is an `Arc<KdTree>` behind its own reader-writer lock. Writers
//! hold the write lock and copy-on-write the tree; readers clone the `Arc`
//! under the read lock and iterate that snapshot with no lock held.

use crate::kd_tree::{IndexEntry, KdTree, Neighbors, QueryLimits, DEFAULT_COMPACTION_RATIO};
use crate::types::{normalize_asset, BidId, Location, Side};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifies one index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub asset: String,
    pub side: Side,
}

impl IndexKey {
    pub fn new(asset: &str, side: Side) -> Self {
        Self {
            asset: normalize_asset(asset),
            side,
        }
    }
}

type Slot = Arc<RwLock<Arc<KdTree>>>;

/// All proximity indexes of the desk.
#[derive(Debug)]
pub struct SpatialIndexSet {
    indexes: RwLock<HashMap<IndexKey, Slot>>,
    compaction_ratio: f64,
}

impl Default for SpatialIndexSet {
    fn default() -> Self {
        Self::new(DEFAULT_COMPACTION_RATIO)
    }
}

impl SpatialIndexSet {
    pub fn new(compaction_ratio: f64) -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            compaction_ratio,
        }
    }

    fn slot(&self, key: &IndexKey) -> Option<Slot> {
        self.indexes.read().get(key).cloned()
    }

    fn slot_or_create(&self, key: IndexKey) -> Slot {
        if let Some(slot) = self.slot(&key) {
            return slot;
        }
        let ratio = self.compaction_ratio;
        self.indexes
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(Arc::new(KdTree::new(ratio)))))
            .clone()
    }

    /// Adds an open bid to the (asset, side) index.
    pub fn insert(&self, asset: &str, side: Side, location: Location, bid_id: BidId, created_at: u64) {
        let slot = self.slot_or_create(IndexKey::new(asset, side));
        let mut tree = slot.write();
        Arc::make_mut(&mut *tree).insert(IndexEntry {
            bid_id,
            location,
            created_at,
        });
    }

    /// Removes a bid from the (asset, side) index. No-op when absent.
    pub fn remove(&self, asset: &str, side: Side, bid_id: BidId) -> bool {
        let key = IndexKey::new(asset, side);
        let Some(slot) = self.slot(&key) else {
            debug!("index remove skipped bid_id={} asset={} side={:?} reason=no_index", bid_id.0, key.asset, side);
            return false;
        };
        let mut tree = slot.write();
        if !tree.contains(bid_id) {
            debug!("index remove skipped bid_id={} asset={} side={:?} reason=absent", bid_id.0, key.asset, side);
            return false;
        }
        Arc::make_mut(&mut *tree).remove(bid_id)
    }

    /// Stable view of one index at this instant.
    pub fn snapshot(&self, asset: &str, side: Side) -> Option<Arc<KdTree>> {
        self.slot(&IndexKey::new(asset, side))
            .map(|slot| Arc::clone(&*slot.read()))
    }

    /// Up to `k` nearest bids, nearest first.
    pub fn nearest(&self, asset: &str, side: Side, location: Location, k: usize) -> Neighbors {
        self.query(asset, side, location, QueryLimits::nearest(k))
    }

    /// Bids within `radius_km`, nearest first.
    pub fn within_radius(&self, asset: &str, side: Side, location: Location, radius_km: f64) -> Neighbors {
        self.query(asset, side, location, QueryLimits::within(radius_km))
    }

    /// General query; an index that was never created yields nothing.
    pub fn query(&self, asset: &str, side: Side, location: Location, limits: QueryLimits) -> Neighbors {
        match self.snapshot(asset, side) {
            Some(tree) => tree.neighbors(location, limits),
            None => Neighbors::empty(),
        }
    }

    /// Live entries in one index.
    pub fn len(&self, asset: &str, side: Side) -> usize {
        self.snapshot(asset, side).map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, asset: &str, side: Side) -> bool {
        self.len(asset, side) == 0
    }

    /// Live entries across all indexes.
    pub fn total_len(&self) -> usize {
        self.indexes.read().values().map(|slot| slot.read().len()).sum()
    }

    /// Keys of indexes created so far.
    pub fn keys(&self) -> Vec<IndexKey> {
        self.indexes.read().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.indexes.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(it: Neighbors) -> Vec<u64> {
        it.map(|(id, _)| id.0).collect()
    }

    #[test]
    fn indexes_are_separate_per_asset_and_side() {
        let set = SpatialIndexSet::default();
        set.insert("btc", Side::Buy, Location::new(0.0, 0.0), BidId(1), 1);
        set.insert("BTC", Side::Sell, Location::new(0.0, 0.0), BidId(2), 2);
        set.insert("eth", Side::Buy, Location::new(0.0, 0.0), BidId(3), 3);
        assert_eq!(set.len("BTC", Side::Buy), 1);
        assert_eq!(set.len("btc", Side::Sell), 1);
        assert_eq!(set.total_len(), 3);
        assert_eq!(ids(set.nearest("BTC", Side::Buy, Location::new(0.0, 0.0), 10)), vec![1]);
        assert_eq!(set.keys().len(), 3);
    }

    #[test]
    fn query_on_missing_index_is_empty() {
        let set = SpatialIndexSet::default();
        assert!(ids(set.within_radius("XMR", Side::Sell, Location::new(0.0, 0.0), 100.0)).is_empty());
        assert!(set.is_empty("XMR", Side::Sell));
    }

    #[test]
    fn remove_twice_is_noop() {
        let set = SpatialIndexSet::default();
        set.insert("BTC", Side::Buy, Location::new(0.0, 0.0), BidId(1), 1);
        assert!(set.remove("BTC", Side::Buy, BidId(1)));
        assert!(!set.remove("BTC", Side::Buy, BidId(1)));
        assert!(!set.remove("ETH", Side::Buy, BidId(1)));
        assert_eq!(set.total_len(), 0);
    }

    #[test]
    fn running_query_is_unaffected_by_later_writes() {
        let set = SpatialIndexSet::default();
        set.insert("BTC", Side::Sell, Location::new(0.0, 0.0), BidId(1), 1);
        set.insert("BTC", Side::Sell, Location::new(0.0, 1.0), BidId(2), 2);
        let mut it = set.nearest("BTC", Side::Sell, Location::new(0.0, 0.0), 2);
        assert_eq!(it.next().map(|(id, _)| id), Some(BidId(1)));
        set.remove("BTC", Side::Sell, BidId(2));
        set.insert("BTC", Side::Sell, Location::new(0.0, 0.5), BidId(3), 3);
        assert_eq!(it.next().map(|(id, _)| id), Some(BidId(2)));
        assert_eq!(ids(set.nearest("BTC", Side::Sell, Location::new(0.0, 0.0), 2)), vec![1, 3]);
    }

    #[test]
    fn concurrent_writers_on_different_indexes() {
        let set = Arc::new(SpatialIndexSet::default());
        let handles: Vec<_> = ["BTC", "ETH", "LTC", "USDT"]
            .into_iter()
            .map(|asset| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        set.insert(asset, Side::Buy, Location::new((i % 80) as f64, (i % 170) as f64), BidId(i), i);
                    }
                    for i in (0..200u64).step_by(2) {
                        set.remove(asset, Side::Buy, BidId(i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(set.total_len(), 400);
    }
}
