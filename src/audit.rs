//! Structured audit trail for bid lifecycle actions.
//!
//! Each event is one JSON object: when, who, what, which bids, and how it ended.
//! `LogAuditSink` writes them under the `audit` log target; `InMemoryAuditSink` keeps them for tests.

use serde::Serialize;
use std::sync::Arc;

use crate::types::{now_millis, BidId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    BidCreate,
    BidCancel,
    MatchCommit,
    UserRemoved,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub at_ms: u64,
    pub user_id: UserId,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bids: Vec<BidId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    /// `success` or a [`crate::BidError::code`].
    pub outcome: &'static str,
}

impl AuditEvent {
    pub fn new(user_id: UserId, action: AuditAction, outcome: &'static str) -> Self {
        Self {
            at_ms: now_millis(),
            user_id,
            action,
            bids: Vec::new(),
            detail: None,
            outcome,
        }
    }

    pub fn with_bids(mut self, bids: impl IntoIterator<Item = BidId>) -> Self {
        self.bids.extend(bids);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => log::info!(target: "audit", "{}", line),
            Err(e) => log::warn!(target: "audit", "unserializable audit event action={:?} error={}", event.action, e),
        }
    }
}

pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Clones share one buffer.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<parking_lot::Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().iter().map(|e| e.action).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
