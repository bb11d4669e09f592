//! Single (asset, side) proximity index: an arena-backed k-d tree.
//!
//! Entries are keyed by latitude/longitude and stored as unit vectors (see
//! [`crate::geo`]). Each node keeps the bounding box of its subtree, so a
//! best-first search yields entries in ascending great-circle distance.
//! Search order uses the chord metric for entries and boxes alike; the
//! reported distance is haversine.
//!
//! Removal tombstones a node; once tombstones exceed `compaction_ratio` of the
//! live entries the tree is rebuilt balanced. Inserts that land deeper than
//! twice the balanced height also trigger a rebuild.

use crate::geo::{box_lower_bound_km, haversine_km, unit_distance_km, unit_vector};
use crate::types::{BidId, Location};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// Default tombstone fraction that triggers a rebuild.
pub const DEFAULT_COMPACTION_RATIO: f64 = 0.5;

/// Slack subtracted from subtree bounds so float rounding never lets an entry
/// overtake an unexpanded subtree holding an equally distant one.
const BOUND_SLACK_KM: f64 = 1e-9;

/// What the index stores for one open bid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexEntry {
    pub bid_id: BidId,
    pub location: Location,
    /// Tie-breaker for equidistant entries: earlier first.
    pub created_at: u64,
}

#[derive(Clone, Copy, Debug)]
struct Node {
    entry: IndexEntry,
    point: [f64; 3],
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
    min: [f64; 3],
    max: [f64; 3],
    live: bool,
}

impl Node {
    fn leaf(entry: IndexEntry, point: [f64; 3], axis: usize) -> Self {
        Self {
            entry,
            point,
            axis,
            left: None,
            right: None,
            min: point,
            max: point,
            live: true,
        }
    }

    fn absorb(&mut self, min: &[f64; 3], max: &[f64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(min[axis]);
            self.max[axis] = self.max[axis].max(max[axis]);
        }
    }
}

/// k-d tree over open bids of one (asset, side).
#[derive(Clone, Debug)]
pub struct KdTree {
    nodes: Vec<Node>,
    root: Option<usize>,
    /// Live entries by bid id -> node slot.
    slots: HashMap<BidId, usize>,
    tombstones: usize,
    compaction_ratio: f64,
    rebuilds: u64,
}

impl Default for KdTree {
    fn default() -> Self {
        Self::new(DEFAULT_COMPACTION_RATIO)
    }
}

impl KdTree {
    pub fn new(compaction_ratio: f64) -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            slots: HashMap::new(),
            tombstones: 0,
            compaction_ratio,
            rebuilds: 0,
        }
    }

    /// Builds a balanced tree from entries in one pass.
    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>, compaction_ratio: f64) -> Self {
        let mut tree = Self::new(compaction_ratio);
        let mut items: Vec<(IndexEntry, [f64; 3])> = Vec::new();
        let mut seen: HashMap<BidId, usize> = HashMap::new();
        for entry in entries {
            let item = (entry, unit_vector(entry.location));
            match seen.get(&entry.bid_id) {
                Some(&i) => items[i] = item,
                None => {
                    seen.insert(entry.bid_id, items.len());
                    items.push(item);
                }
            }
        }
        tree.build_from(items);
        tree
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, bid_id: BidId) -> bool {
        self.slots.contains_key(&bid_id)
    }

    /// Removed entries still occupying nodes.
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Number of full rebuilds performed so far.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Live entries in arbitrary order.
    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        self.slots.values().map(move |&slot| self.nodes[slot].entry)
    }

    /// Inserts an entry. Re-inserting a bid id replaces its previous entry.
    pub fn insert(&mut self, entry: IndexEntry) {
        if self.slots.contains_key(&entry.bid_id) {
            self.remove(entry.bid_id);
        }
        let point = unit_vector(entry.location);
        let slot = self.nodes.len();
        let Some(mut current) = self.root else {
            self.nodes.push(Node::leaf(entry, point, 0));
            self.root = Some(slot);
            self.slots.insert(entry.bid_id, slot);
            return;
        };
        let mut depth = 1;
        loop {
            let node = &mut self.nodes[current];
            node.absorb(&point, &point);
            let go_left = point[node.axis] < node.point[node.axis];
            let next = if go_left { node.left } else { node.right };
            match next {
                Some(child) => {
                    current = child;
                    depth += 1;
                }
                None => {
                    if go_left {
                        node.left = Some(slot);
                    } else {
                        node.right = Some(slot);
                    }
                    break;
                }
            }
        }
        self.nodes.push(Node::leaf(entry, point, depth % 3));
        self.slots.insert(entry.bid_id, slot);
        if depth > self.depth_limit() {
            log::debug!("kd_tree rebuild reason=depth depth={} live={}", depth, self.len());
            self.rebuild();
        }
    }

    /// Removes an entry by bid id. Returns `false` if it was not present.
    pub fn remove(&mut self, bid_id: BidId) -> bool {
        let Some(slot) = self.slots.remove(&bid_id) else {
            return false;
        };
        self.nodes[slot].live = false;
        self.tombstones += 1;
        if self.slots.is_empty() {
            self.nodes.clear();
            self.root = None;
            self.tombstones = 0;
        } else if self.tombstones as f64 > self.compaction_ratio * self.slots.len() as f64 {
            log::debug!(
                "kd_tree rebuild reason=tombstones tombstones={} live={}",
                self.tombstones,
                self.len()
            );
            self.rebuild();
        }
        true
    }

    /// Rebuilds a balanced tree from live entries, dropping tombstones.
    pub fn rebuild(&mut self) {
        let items: Vec<(IndexEntry, [f64; 3])> = self
            .slots
            .values()
            .map(|&slot| (self.nodes[slot].entry, self.nodes[slot].point))
            .collect();
        self.build_from(items);
        self.rebuilds += 1;
    }

    /// Entries ordered by ascending distance from `probe`, bounded by `limits`.
    pub fn neighbors(self: &Arc<Self>, probe: Location, limits: QueryLimits) -> Neighbors {
        Neighbors::new(Arc::clone(self), probe, limits)
    }

    fn depth_limit(&self) -> usize {
        let live = self.slots.len().max(1);
        let height = (usize::BITS - live.leading_zeros()) as usize;
        2 * height + 4
    }

    fn build_from(&mut self, mut items: Vec<(IndexEntry, [f64; 3])>) {
        self.nodes.clear();
        self.slots.clear();
        self.tombstones = 0;
        self.nodes.reserve(items.len());
        self.root = self.build(&mut items, 0);
    }

    fn build(&mut self, items: &mut [(IndexEntry, [f64; 3])], depth: usize) -> Option<usize> {
        if items.is_empty() {
            return None;
        }
        let axis = depth % 3;
        let mid = items.len() / 2;
        items.select_nth_unstable_by(mid, |a, b| a.1[axis].total_cmp(&b.1[axis]));
        let (entry, point) = items[mid];
        let slot = self.nodes.len();
        self.nodes.push(Node::leaf(entry, point, axis));
        self.slots.insert(entry.bid_id, slot);

        let (lower, rest) = items.split_at_mut(mid);
        let left = self.build(lower, depth + 1);
        let right = self.build(&mut rest[1..], depth + 1);
        for child in [left, right].into_iter().flatten() {
            let (min, max) = (self.nodes[child].min, self.nodes[child].max);
            self.nodes[slot].absorb(&min, &max);
        }
        self.nodes[slot].left = left;
        self.nodes[slot].right = right;
        Some(slot)
    }
}

/// Bounds on a proximity query.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct QueryLimits {
    /// Stop after this many entries.
    pub k: Option<usize>,
    /// Stop at the first entry farther than this.
    pub radius_km: Option<f64>,
    /// Stop after expanding this many tree nodes (caller deadline).
    pub max_visits: Option<usize>,
}

impl QueryLimits {
    pub fn nearest(k: usize) -> Self {
        Self {
            k: Some(k),
            ..Default::default()
        }
    }

    pub fn within(radius_km: f64) -> Self {
        Self {
            radius_km: Some(radius_km),
            ..Default::default()
        }
    }

    pub fn with_max_visits(mut self, max_visits: Option<usize>) -> Self {
        self.max_visits = max_visits;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    // Subtrees sort before entries at equal distance.
    Subtree,
    Entry,
}

#[derive(Clone, Copy, Debug)]
struct Pending {
    distance: f64,
    /// Haversine distance handed to the caller. Not part of the ordering.
    reported_km: f64,
    kind: Kind,
    created_at: u64,
    bid_id: BidId,
    slot: usize,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.kind.cmp(&other.kind))
            .then(self.created_at.cmp(&other.created_at))
            .then(self.bid_id.cmp(&other.bid_id))
            .then(self.slot.cmp(&other.slot))
    }
}

/// Lazy best-first traversal of a tree snapshot. Yields `(bid_id, distance_km)`
/// in ascending distance; equal distances come out earliest-created first.
///
/// Holds its own `Arc` of the tree, so concurrent writers never affect it.
#[derive(Debug)]
pub struct Neighbors {
    tree: Arc<KdTree>,
    probe: Location,
    point: [f64; 3],
    heap: BinaryHeap<Reverse<Pending>>,
    limits: QueryLimits,
    yielded: usize,
    visited: usize,
}

impl Neighbors {
    fn new(tree: Arc<KdTree>, probe: Location, limits: QueryLimits) -> Self {
        let point = unit_vector(probe);
        let mut heap = BinaryHeap::new();
        if let Some(root) = tree.root {
            heap.push(Reverse(Pending {
                distance: 0.0,
                reported_km: 0.0,
                kind: Kind::Subtree,
                created_at: 0,
                bid_id: BidId(0),
                slot: root,
            }));
        }
        Self {
            tree,
            probe,
            point,
            heap,
            limits,
            yielded: 0,
            visited: 0,
        }
    }

    /// An iterator that yields nothing.
    pub fn empty() -> Self {
        Self::new(Arc::new(KdTree::default()), Location::new(0.0, 0.0), QueryLimits::default())
    }

    /// Tree nodes expanded so far.
    pub fn visited(&self) -> usize {
        self.visited
    }

    fn finish(&mut self) -> Option<(BidId, f64)> {
        self.heap.clear();
        None
    }
}

impl Iterator for Neighbors {
    type Item = (BidId, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.limits.k.is_some_and(|k| self.yielded >= k) {
            return self.finish();
        }
        while let Some(Reverse(item)) = self.heap.pop() {
            if self.limits.radius_km.is_some_and(|r| item.distance > r) {
                return self.finish();
            }
            match item.kind {
                Kind::Entry => {
                    self.yielded += 1;
                    return Some((item.bid_id, item.reported_km));
                }
                Kind::Subtree => {
                    if self.limits.max_visits.is_some_and(|max| self.visited >= max) {
                        return self.finish();
                    }
                    self.visited += 1;
                    let node = self.tree.nodes[item.slot];
                    if node.live {
                        self.heap.push(Reverse(Pending {
                            distance: unit_distance_km(&self.point, &node.point),
                            reported_km: haversine_km(self.probe, node.entry.location),
                            kind: Kind::Entry,
                            created_at: node.entry.created_at,
                            bid_id: node.entry.bid_id,
                            slot: item.slot,
                        }));
                    }
                    for child in [node.left, node.right].into_iter().flatten() {
                        let bounds = &self.tree.nodes[child];
                        let bound = box_lower_bound_km(&self.point, &bounds.min, &bounds.max);
                        self.heap.push(Reverse(Pending {
                            distance: (bound - BOUND_SLACK_KM).max(0.0),
                            reported_km: 0.0,
                            kind: Kind::Subtree,
                            created_at: 0,
                            bid_id: BidId(0),
                            slot: child,
                        }));
                    }
                }
            }
        }
        None
    }
}
