//! Desk configuration, built from the environment.
//!
//! `SUPPORTED_ASSETS` (comma list), `MATCH_RADIUS_KM`, `MATCH_FALLBACK_K`,
//! `INDEX_COMPACTION_RATIO`, `QUERY_MAX_VISITS`. Unset or unparsable values fall
//! back to the defaults.

use crate::kd_tree::DEFAULT_COMPACTION_RATIO;
use crate::matcher::{MatcherConfig, DEFAULT_FALLBACK_K, DEFAULT_MATCH_RADIUS_KM};
use crate::types::normalize_asset;

pub const DEFAULT_ASSETS: &[&str] = &["BTC", "ETH", "USDT", "USDC", "LTC"];

#[derive(Clone, Debug, PartialEq)]
pub struct DeskConfig {
    pub supported_assets: Vec<String>,
    pub match_radius_km: f64,
    pub fallback_k: usize,
    pub compaction_ratio: f64,
    pub max_visits: Option<usize>,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            supported_assets: DEFAULT_ASSETS.iter().map(|a| a.to_string()).collect(),
            match_radius_km: DEFAULT_MATCH_RADIUS_KM,
            fallback_k: DEFAULT_FALLBACK_K,
            compaction_ratio: DEFAULT_COMPACTION_RATIO,
            max_visits: None,
        }
    }
}

impl DeskConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds from any key lookup. For tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let supported_assets = lookup("SUPPORTED_ASSETS")
            .map(|s| parse_assets(&s))
            .filter(|assets| !assets.is_empty())
            .unwrap_or(defaults.supported_assets);
        let match_radius_km = lookup("MATCH_RADIUS_KM")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(defaults.match_radius_km);
        let fallback_k = lookup("MATCH_FALLBACK_K")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.fallback_k);
        let compaction_ratio = lookup("INDEX_COMPACTION_RATIO")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(defaults.compaction_ratio);
        let max_visits = lookup("QUERY_MAX_VISITS").and_then(|s| s.trim().parse().ok());
        Self {
            supported_assets,
            match_radius_km,
            fallback_k,
            compaction_ratio,
            max_visits,
        }
    }

    pub fn matcher(&self) -> MatcherConfig {
        MatcherConfig {
            radius_km: self.match_radius_km,
            fallback_k: self.fallback_k,
            max_visits: self.max_visits,
        }
    }
}

fn parse_assets(s: &str) -> Vec<String> {
    let mut assets: Vec<String> = s
        .split(',')
        .map(normalize_asset)
        .filter(|a| !a.is_empty())
        .collect();
    assets.dedup();
    assets
}
