//! Canonical set of bids and the only writer of the spatial indexes.
//!
//! Every bid sits behind its own mutex; any change to a bid's status and the
//! matching index update happen while that mutex is held, so a bid is in its
//! index exactly while it is open.

use crate::error::BidError;
use crate::spatial_index::SpatialIndexSet;
use crate::types::{normalize_asset, now_millis, Bid, BidId, BidStatus, Location, Side, UserId};
use log::info;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type BidSlot = Arc<Mutex<Bid>>;

/// Bid registry.
#[derive(Debug)]
pub struct BidRegistry {
    bids: RwLock<HashMap<BidId, BidSlot>>,
    index: Arc<SpatialIndexSet>,
    supported_assets: HashSet<String>,
    next_bid_id: AtomicU64,
}

impl BidRegistry {
    /// Creates a registry writing to `index`, accepting only `supported_assets`.
    pub fn new(index: Arc<SpatialIndexSet>, supported_assets: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            bids: RwLock::new(HashMap::new()),
            index,
            supported_assets: supported_assets
                .into_iter()
                .map(|a| normalize_asset(a.as_ref()))
                .collect(),
            next_bid_id: AtomicU64::new(1),
        }
    }

    pub fn index(&self) -> &Arc<SpatialIndexSet> {
        &self.index
    }

    pub fn is_supported(&self, asset: &str) -> bool {
        self.supported_assets.contains(&normalize_asset(asset))
    }

    /// Supported assets, sorted.
    pub fn supported_assets(&self) -> Vec<String> {
        let mut assets: Vec<String> = self.supported_assets.iter().cloned().collect();
        assets.sort();
        assets
    }

    fn slot(&self, bid_id: BidId) -> Result<BidSlot, BidError> {
        self.bids
            .read()
            .get(&bid_id)
            .cloned()
            .ok_or(BidError::NotFound(bid_id))
    }

    /// Opens a bid at the owner's location and indexes it.
    ///
    /// Fails with `InvalidLocation` when `location` is missing or out of range and
    /// with `UnsupportedAsset` when the asset is not allowed; neither touches the index.
    pub fn create_bid(
        &self,
        owner: UserId,
        side: Side,
        asset: &str,
        location: Option<Location>,
    ) -> Result<Bid, BidError> {
        let location = location
            .filter(Location::is_valid)
            .ok_or(BidError::InvalidLocation)?;
        let asset = normalize_asset(asset);
        if !self.supported_assets.contains(&asset) {
            return Err(BidError::UnsupportedAsset(asset));
        }
        let bid = Bid {
            bid_id: BidId(self.next_bid_id.fetch_add(1, Ordering::Relaxed)),
            owner,
            side,
            asset,
            location,
            status: BidStatus::Open,
            created_at: now_millis(),
        };
        let slot = Arc::new(Mutex::new(bid.clone()));
        let guard = slot.lock();
        self.bids.write().insert(bid.bid_id, Arc::clone(&slot));
        self.index
            .insert(&bid.asset, bid.side, bid.location, bid.bid_id, bid.created_at);
        drop(guard);
        info!(
            "bid created bid_id={} owner={} side={:?} asset={} lat={} lon={}",
            bid.bid_id.0, owner.0, side, bid.asset, location.latitude, location.longitude
        );
        Ok(bid)
    }

    /// Cancels an open bid on behalf of its owner.
    pub fn cancel_bid(&self, bid_id: BidId, requester: UserId) -> Result<Bid, BidError> {
        let slot = self.slot(bid_id)?;
        let mut bid = slot.lock();
        if bid.owner != requester {
            return Err(BidError::Forbidden);
        }
        if !bid.is_open() {
            return Err(BidError::NotOpen(bid_id));
        }
        self.index.remove(&bid.asset, bid.side, bid_id);
        bid.status = BidStatus::Cancelled;
        info!("bid cancelled bid_id={} owner={}", bid_id.0, requester.0);
        Ok(bid.clone())
    }

    /// Cancels every open bid of `owner`. Returns the ids cancelled.
    pub fn cancel_all_for(&self, owner: UserId) -> Vec<BidId> {
        let mut cancelled = Vec::new();
        for bid in self.list_bids(owner) {
            if bid.is_open() && self.cancel_bid(bid.bid_id, owner).is_ok() {
                cancelled.push(bid.bid_id);
            }
        }
        cancelled
    }

    /// Marks two open, compatible bids as matched and drops both from the index.
    pub fn commit_match(&self, a: BidId, b: BidId) -> Result<(Bid, Bid), BidError> {
        if a == b {
            return Err(BidError::IncompatibleBids);
        }
        let slot_a = self.slot(a)?;
        let slot_b = self.slot(b)?;
        // Lock in id order so two commits over the same pair cannot deadlock.
        let (mut bid_a, mut bid_b) = if a < b {
            let guard_a = slot_a.lock();
            (guard_a, slot_b.lock())
        } else {
            let guard_b = slot_b.lock();
            (slot_a.lock(), guard_b)
        };
        if !bid_a.is_open() {
            return Err(BidError::NotOpen(a));
        }
        if !bid_b.is_open() {
            return Err(BidError::NotOpen(b));
        }
        if bid_a.asset != bid_b.asset || bid_a.side == bid_b.side || bid_a.owner == bid_b.owner {
            return Err(BidError::IncompatibleBids);
        }
        self.index.remove(&bid_a.asset, bid_a.side, a);
        self.index.remove(&bid_b.asset, bid_b.side, b);
        bid_a.status = BidStatus::Matched;
        bid_b.status = BidStatus::Matched;
        info!(
            "bids matched bid_a={} owner_a={} bid_b={} owner_b={} asset={}",
            a.0, bid_a.owner.0, b.0, bid_b.owner.0, bid_a.asset
        );
        Ok((bid_a.clone(), bid_b.clone()))
    }

    pub fn get(&self, bid_id: BidId) -> Option<Bid> {
        self.slot(bid_id).ok().map(|slot| slot.lock().clone())
    }

    /// All bids of `owner`, newest first.
    pub fn list_bids(&self, owner: UserId) -> Vec<Bid> {
        let slots: Vec<BidSlot> = self.bids.read().values().cloned().collect();
        let mut bids: Vec<Bid> = slots
            .iter()
            .map(|slot| slot.lock().clone())
            .filter(|bid| bid.owner == owner)
            .collect();
        bids.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.bid_id.cmp(&a.bid_id)));
        bids
    }

    /// Number of bids of any status.
    pub fn len(&self) -> usize {
        self.bids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open bids ordered by id, for the external store.
    pub fn snapshot(&self) -> Vec<Bid> {
        let slots: Vec<BidSlot> = self.bids.read().values().cloned().collect();
        let mut bids: Vec<Bid> = slots
            .iter()
            .map(|slot| slot.lock().clone())
            .filter(Bid::is_open)
            .collect();
        bids.sort_by_key(|bid| bid.bid_id);
        bids
    }

    /// Rehydrates bids from the external store. Open bids are re-indexed; ids keep
    /// their values and new ids continue after the highest loaded one.
    ///
    /// Rejects the whole batch if an open bid carries an invalid location, or if
    /// an id is `u64::MAX` and no id could follow it.
    pub fn load_all_bids(&self, bids: impl IntoIterator<Item = Bid>) -> Result<usize, BidError> {
        let bids: Vec<Bid> = bids.into_iter().collect();
        if bids.iter().any(|bid| bid.is_open() && !bid.location.is_valid()) {
            return Err(BidError::InvalidLocation);
        }
        if let Some(bid) = bids.iter().find(|bid| bid.bid_id.0 == u64::MAX) {
            return Err(BidError::BidIdOutOfRange(bid.bid_id));
        }
        let mut map = self.bids.write();
        for mut bid in bids.iter().cloned() {
            bid.asset = normalize_asset(&bid.asset);
            if let Some(previous) = map.get(&bid.bid_id) {
                let previous = previous.lock();
                if previous.is_open() {
                    self.index.remove(&previous.asset, previous.side, previous.bid_id);
                }
            }
            if bid.is_open() {
                self.index
                    .insert(&bid.asset, bid.side, bid.location, bid.bid_id, bid.created_at);
            }
            self.next_bid_id
                .fetch_max(bid.bid_id.0.saturating_add(1), Ordering::Relaxed);
            map.insert(bid.bid_id, Arc::new(Mutex::new(bid)));
        }
        info!("bids loaded count={} open={}", bids.len(), bids.iter().filter(|b| b.is_open()).count());
        Ok(bids.len())
    }
}
