//! Core types and IDs for the desk (data models).
//!
//! All identifiers are newtype wrappers. [`Bid`], [`Side`], [`BidStatus`] and
//! [`Location`] define a standing offer; [`User`] and [`PendingInput`] carry the
//! per-account conversation state.

use std::time::{SystemTime, UNIX_EPOCH};

/// Unique bid identifier (internal, monotonic).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct BidId(pub u64);

impl std::fmt::Display for BidId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messaging account identifier (chat id as delivered by the gateway).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct UserId(pub i64);

/// Bid side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side a counterparty must be on.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Bid lifecycle status. Only open bids are indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BidStatus {
    Open,
    Matched,
    Cancelled,
}

/// Latitude/longitude pair in degrees.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Finite and within [-90, 90] x [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Parses a free-text reply such as `"52.52, 13.40"` or `"52.52 13.40"`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|p| !p.is_empty());
        let latitude = parts.next()?.parse().ok()?;
        let longitude = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        let location = Self::new(latitude, longitude);
        location.is_valid().then_some(location)
    }
}

/// Standing offer to buy or sell an asset near a location.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bid {
    pub bid_id: BidId,
    pub owner: UserId,
    pub side: Side,
    /// Upper-case asset symbol, e.g. `BTC`.
    pub asset: String,
    /// Owner's location at creation time. Does not follow later relocations.
    pub location: Location,
    pub status: BidStatus,
    /// Unix milliseconds.
    pub created_at: u64,
}

impl Bid {
    pub fn is_open(&self) -> bool {
        matches!(self.status, BidStatus::Open)
    }
}

/// What reply the conversation expects next from a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PendingInput {
    Location,
    BidSide,
    BidAsset(Side),
}

/// Per-account state.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub location: Option<Location>,
    pub pending: Option<PendingInput>,
}

impl User {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            location: None,
            pending: None,
        }
    }
}

/// Normalizes an asset symbol for lookup and storage.
pub fn normalize_asset(asset: &str) -> String {
    asset.trim().to_ascii_uppercase()
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
