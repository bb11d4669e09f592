//! # OTC Proximity Desk
//!
//! Peer-to-peer OTC crypto desk that matches buyers and sellers by distance:
//! a bid registry, one k-d tree per (asset, side), and a matcher ranking
//! opposite-side bids by great-circle distance.
//!
//! ## Entry point
//!
//! Use [`Desk`] as the single entry point: create with [`Desk::new`], then feed
//! it [`UserIntent`]s with [`Desk::handle`] and deliver the returned
//! [`Notification`]s through the messaging gateway.
//!
//! ## Example
//!
//! ```rust
//! use otc_proximity_desk::{Desk, DeskConfig, IntentKind, Side, UserId, UserIntent};
//!
//! let desk = Desk::new(DeskConfig::default());
//! desk.handle(UserIntent::new(UserId(1), IntentKind::SetLocation { latitude: 52.52, longitude: 13.40 }));
//! desk.handle(UserIntent::new(UserId(2), IntentKind::SetLocation { latitude: 52.50, longitude: 13.45 }));
//! desk.handle(UserIntent::new(UserId(1), IntentKind::CreateBid { side: Side::Sell, asset: "BTC".into() }));
//! let out = desk.handle(UserIntent::new(UserId(2), IntentKind::CreateBid { side: Side::Buy, asset: "BTC".into() }));
//! // The buyer gets the candidate list, the seller is told about the new buyer.
//! assert_eq!(out.len(), 2);
//! ```
//!
//! ## Lower-level API
//!
//! [`BidRegistry`], [`SpatialIndexSet`] and [`Matcher`] can be used directly
//! without the conversation layer.

pub mod api;
pub mod audit;
pub mod config;
pub mod desk;
pub mod error;
pub mod generator;
pub mod geo;
pub mod intent;
pub mod kd_tree;
pub mod matcher;
pub mod persistence;
pub mod registry;
pub mod spatial_index;
pub mod types;
pub mod users;

pub use config::DeskConfig;
pub use desk::{Desk, Removal};
pub use error::BidError;
pub use intent::{Choice, IntentKind, Notification, UserIntent};
pub use kd_tree::{IndexEntry, KdTree, Neighbors, QueryLimits};
pub use matcher::{Candidate, Matcher, MatcherConfig};
pub use registry::BidRegistry;
pub use spatial_index::SpatialIndexSet;
pub use types::{Bid, BidId, BidStatus, Location, PendingInput, Side, User, UserId};
pub use users::UserStore;
pub use generator::{replay_into_registry, BidRequest, Generator, GeneratorConfig};
