//! Synthetic bid generator.
//!
//! Deterministic, configurable stream of bid requests scattered around a centre
//! location, for property tests, demos and benchmarks. Same seed ⇒ same stream.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::registry::BidRegistry;
use crate::types::{Bid, Location, Side, UserId};

/// Configuration for the synthetic bid generator.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// RNG seed. Same seed ⇒ same stream.
    pub seed: u64,
    pub num_bids: usize,
    /// Probability of Buy (0.0..=1.0). Sell otherwise.
    pub buy_ratio: f64,
    /// Assets picked uniformly.
    pub assets: Vec<String>,
    pub center: Location,
    /// Max offset from the centre in degrees, per axis.
    pub spread_deg: f64,
    /// Number of distinct owners (1..=num_users).
    pub num_users: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_bids: 1000,
            buy_ratio: 0.5,
            assets: vec!["BTC".into(), "ETH".into()],
            center: Location::new(52.52, 13.40),
            spread_deg: 1.0,
            num_users: 50,
        }
    }
}

/// One generated bid request.
#[derive(Clone, Debug, PartialEq)]
pub struct BidRequest {
    pub owner: UserId,
    pub side: Side,
    pub asset: String,
    pub location: Location,
}

/// Deterministic request stream.
pub struct Generator {
    rng: StdRng,
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { rng, config }
    }

    /// A random location inside the configured area, clamped to valid ranges.
    pub fn next_location(&mut self) -> Location {
        let spread = self.config.spread_deg.abs();
        let (dlat, dlon) = if spread > 0.0 {
            (self.rng.gen_range(-spread..=spread), self.rng.gen_range(-spread..=spread))
        } else {
            (0.0, 0.0)
        };
        Location::new(
            (self.config.center.latitude + dlat).clamp(-90.0, 90.0),
            (self.config.center.longitude + dlon).clamp(-180.0, 180.0),
        )
    }

    pub fn next_request(&mut self) -> BidRequest {
        let side = if self.rng.gen::<f64>() < self.config.buy_ratio {
            Side::Buy
        } else {
            Side::Sell
        };
        let asset = if self.config.assets.is_empty() {
            "BTC".to_string()
        } else {
            let i = self.rng.gen_range(0..self.config.assets.len());
            self.config.assets[i].clone()
        };
        let owner = UserId(self.rng.gen_range(1..=self.config.num_users.max(1)));
        let location = self.next_location();
        BidRequest {
            owner,
            side,
            asset,
            location,
        }
    }

    /// Generates `config.num_bids` requests.
    pub fn all_requests(mut self) -> Vec<BidRequest> {
        (0..self.config.num_bids).map(|_| self.next_request()).collect()
    }
}

/// Submits every request to the registry, returning the bids that were accepted.
pub fn replay_into_registry(registry: &BidRegistry, requests: &[BidRequest]) -> Vec<Bid> {
    requests
        .iter()
        .filter_map(|r| {
            registry
                .create_bid(r.owner, r.side, &r.asset, Some(r.location))
                .ok()
        })
        .collect()
}
