//! Bid errors reported back to the gateway. None of them is fatal.

use crate::types::BidId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BidError {
    /// The owner has no location, or it is out of range.
    #[error("a valid location is required before creating a bid")]
    InvalidLocation,

    #[error("asset {0} is not supported")]
    UnsupportedAsset(String),

    #[error("bid {0} not found")]
    NotFound(BidId),

    #[error("only the owner may change this bid")]
    Forbidden,

    #[error("bid {0} is no longer open")]
    NotOpen(BidId),

    /// Bids must be on opposite sides of the same asset and have different owners.
    #[error("bids cannot be matched with each other")]
    IncompatibleBids,

    /// A stored bid id leaves no room for new ids after it.
    #[error("bid id {0} is out of range")]
    BidIdOutOfRange(BidId),
}

impl BidError {
    /// Stable snake_case code carried in notifications and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BidError::InvalidLocation => "invalid_location",
            BidError::UnsupportedAsset(_) => "unsupported_asset",
            BidError::NotFound(_) => "not_found",
            BidError::Forbidden => "forbidden",
            BidError::NotOpen(_) => "not_open",
            BidError::IncompatibleBids => "incompatible_bids",
            BidError::BidIdOutOfRange(_) => "bid_id_out_of_range",
        }
    }
}
