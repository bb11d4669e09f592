//! Counterparty ranking.
//!
//! [`Matcher::find_counterparts`] looks at the opposite side of the same asset:
//! everything within the configured radius, or the `k` nearest when nobody is
//! that close. It never commits a match.

use crate::kd_tree::QueryLimits;
use crate::registry::BidRegistry;
use crate::types::Bid;
use std::sync::Arc;

pub const DEFAULT_MATCH_RADIUS_KM: f64 = 50.0;
pub const DEFAULT_FALLBACK_K: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatcherConfig {
    pub radius_km: f64,
    pub fallback_k: usize,
    /// Node budget per query, if any.
    pub max_visits: Option<usize>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            radius_km: DEFAULT_MATCH_RADIUS_KM,
            fallback_k: DEFAULT_FALLBACK_K,
            max_visits: None,
        }
    }
}

/// A ranked counterparty.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candidate {
    pub bid: Bid,
    pub distance_km: f64,
}

#[derive(Debug)]
pub struct Matcher {
    registry: Arc<BidRegistry>,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(registry: Arc<BidRegistry>, config: MatcherConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> MatcherConfig {
        self.config
    }

    /// Opposite-side bids for the same asset, nearest first. Empty when there are none.
    ///
    /// Bids of the same owner are skipped, as are ids that closed after the index
    /// snapshot was taken.
    pub fn find_counterparts(&self, bid: &Bid) -> Vec<Candidate> {
        let within = self.candidates(
            bid,
            QueryLimits::within(self.config.radius_km).with_max_visits(self.config.max_visits),
            usize::MAX,
        );
        if !within.is_empty() {
            return within;
        }
        self.candidates(
            bid,
            QueryLimits::default().with_max_visits(self.config.max_visits),
            self.config.fallback_k,
        )
    }

    fn candidates(&self, bid: &Bid, limits: QueryLimits, take: usize) -> Vec<Candidate> {
        self.registry
            .index()
            .query(&bid.asset, bid.side.opposite(), bid.location, limits)
            .filter_map(|(bid_id, distance_km)| {
                let other = self.registry.get(bid_id)?;
                (other.is_open() && other.owner != bid.owner).then_some(Candidate {
                    bid: other,
                    distance_km,
                })
            })
            .take(take)
            .collect()
    }
}
