//! Single-entry desk facade.
//!
//! Holds the user store, the bid registry and the matcher so the gateway bridge
//! can hand over [`UserIntent`]s without touching the core directly. Every
//! intent produces notifications; rejected intents produce one notification
//! carrying the error code.

use crate::audit::{AuditAction, AuditEvent, AuditSink, NullAuditSink};
use crate::config::DeskConfig;
use crate::error::BidError;
use crate::intent::{home_menu, Choice, IntentKind, Notification, UserIntent};
use crate::matcher::{Candidate, Matcher};
use crate::persistence::PersistedState;
use crate::registry::BidRegistry;
use crate::spatial_index::SpatialIndexSet;
use crate::types::{normalize_asset, Bid, BidId, BidStatus, Location, PendingInput, Side, UserId};
use crate::users::UserStore;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

pub const START_TEXT: &str = "Happy Moon! I am your Over The Counter (OTC) Trading Bot. 🤖\n\
Here you can find other people to *buy* and *sell* your *crypto* currencies.\n\
Whether it is fiat to crypto, crypto to crypto or something different, you can find it here!\n";

pub const RESTART_TEXT: &str = "Happy Moon!\n\
Me, your OTC Trading Bot, just got restarted on the server! 🤖\n\
To make sure you have the latest features, please start a fresh chat with me by typing /start.";

/// Result of dropping an unreachable user.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Removal {
    pub removed: bool,
    pub cancelled_bids: Vec<BidId>,
}

pub struct Desk {
    config: DeskConfig,
    users: UserStore,
    registry: Arc<BidRegistry>,
    matcher: Matcher,
    /// Open proposals as (target bid, proposing bid).
    proposals: Mutex<HashSet<(BidId, BidId)>>,
    audit: Arc<dyn AuditSink>,
}

impl Desk {
    pub fn new(config: DeskConfig) -> Self {
        Self::with_audit(config, Arc::new(NullAuditSink))
    }

    pub fn with_audit(config: DeskConfig, audit: Arc<dyn AuditSink>) -> Self {
        let index = Arc::new(SpatialIndexSet::new(config.compaction_ratio));
        let registry = Arc::new(BidRegistry::new(index, &config.supported_assets));
        let matcher = Matcher::new(Arc::clone(&registry), config.matcher());
        Self {
            config,
            users: UserStore::new(),
            registry,
            matcher,
            proposals: Mutex::new(HashSet::new()),
            audit,
        }
    }

    pub fn config(&self) -> &DeskConfig {
        &self.config
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn registry(&self) -> &Arc<BidRegistry> {
        &self.registry
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Handles one intent. Errors come back as a notification with an error code.
    pub fn handle(&self, intent: UserIntent) -> Vec<Notification> {
        let user = intent.user_id;
        if self.users.touch(user) {
            info!("user registered user_id={}", user.0);
        }
        match self.apply(user, intent.kind) {
            Ok(notifications) => notifications,
            Err(err) => {
                warn!("intent rejected user_id={} error={}", user.0, err.code());
                vec![Notification::text(user, err.to_string())
                    .with_error(err.code())
                    .with_choices(home_menu())]
            }
        }
    }

    fn apply(&self, user: UserId, kind: IntentKind) -> Result<Vec<Notification>, BidError> {
        match kind {
            IntentKind::Start => {
                self.users.set_pending(user, None);
                Ok(vec![Notification::text(user, START_TEXT).with_choices(home_menu())])
            }
            IntentKind::SetLocation { latitude, longitude } => {
                self.set_location(user, Location::new(latitude, longitude))
            }
            IntentKind::RequestLocation => {
                self.users.set_pending(user, Some(PendingInput::Location));
                Ok(vec![Notification::text(
                    user,
                    "Please send your location as `latitude, longitude`.",
                )])
            }
            IntentKind::BeginCreateBid => {
                if self.users.location(user).is_none() {
                    return Err(BidError::InvalidLocation);
                }
                self.users.set_pending(user, Some(PendingInput::BidSide));
                Ok(vec![Notification::text(user, "Do you want to buy or sell?").with_choices(vec![vec![
                    Choice::new("BUY", "side:buy"),
                    Choice::new("SELL", "side:sell"),
                ]])])
            }
            IntentKind::ChooseSide { side } => Ok(vec![self.ask_asset(user, side)]),
            IntentKind::CreateBid { side, asset } => self.create_bid(user, side, &asset),
            IntentKind::CancelBid { bid_id } => self.cancel_bid(user, bid_id),
            IntentKind::ListBids => Ok(vec![self.list_bids(user)]),
            IntentKind::FindBids => Ok(vec![self.find_bids(user)]),
            IntentKind::ProposeMatch { bid_id, counterpart_id } => self.propose_match(user, bid_id, counterpart_id),
            IntentKind::AcceptMatch { bid_id, counterpart_id } => self.accept_match(user, bid_id, counterpart_id),
            IntentKind::Text { text } => self.reply(user, &text),
        }
    }

    /// Free text is read according to what the user was last asked for.
    /// Menu buttons arrive as text too and always win over a pending question.
    fn reply(&self, user: UserId, text: &str) -> Result<Vec<Notification>, BidError> {
        if let Some(kind) = IntentKind::from_menu_label(text) {
            self.users.set_pending(user, None);
            return self.apply(user, kind);
        }
        match self.users.pending(user) {
            Some(PendingInput::Location) => match Location::parse(text) {
                Some(location) => self.set_location(user, location),
                None => Err(BidError::InvalidLocation),
            },
            Some(PendingInput::BidSide) => match text.trim().to_ascii_lowercase().as_str() {
                "buy" => Ok(vec![self.ask_asset(user, Side::Buy)]),
                "sell" => Ok(vec![self.ask_asset(user, Side::Sell)]),
                _ => Ok(vec![Notification::text(user, "Please choose BUY or SELL.").with_choices(vec![vec![
                    Choice::new("BUY", "side:buy"),
                    Choice::new("SELL", "side:sell"),
                ]])]),
            },
            Some(PendingInput::BidAsset(side)) => self.create_bid(user, side, text),
            None => Ok(vec![Notification::text(user, "Please pick an option from the menu.")
                .with_choices(home_menu())]),
        }
    }

    fn ask_asset(&self, user: UserId, side: Side) -> Notification {
        self.users.set_pending(user, Some(PendingInput::BidAsset(side)));
        let assets = self.registry.supported_assets();
        Notification::text(
            user,
            format!("Which asset do you want to {}? Supported: {}", side.label().to_lowercase(), assets.join(", ")),
        )
        .with_choices(vec![assets
            .iter()
            .map(|a| Choice::new(a.clone(), format!("bid:{}:{}", side.label().to_lowercase(), a)))
            .collect()])
    }

    fn set_location(&self, user: UserId, location: Location) -> Result<Vec<Notification>, BidError> {
        if !location.is_valid() {
            return Err(BidError::InvalidLocation);
        }
        self.users.set_location(user, location);
        if self.users.pending(user) == Some(PendingInput::Location) {
            self.users.set_pending(user, None);
        }
        info!("location set user_id={} lat={} lon={}", user.0, location.latitude, location.longitude);
        Ok(vec![Notification::text(user, "📍 Location saved. New bids will be placed here.")
            .with_choices(home_menu())])
    }

    fn create_bid(&self, user: UserId, side: Side, asset: &str) -> Result<Vec<Notification>, BidError> {
        let result = self
            .registry
            .create_bid(user, side, asset, self.users.location(user));
        let detail = serde_json::json!({ "side": side, "asset": normalize_asset(asset) });
        let bid = match result {
            Ok(bid) => bid,
            Err(err) => {
                self.audit
                    .record(AuditEvent::new(user, AuditAction::BidCreate, err.code()).with_detail(detail));
                return Err(err);
            }
        };
        self.audit.record(
            AuditEvent::new(user, AuditAction::BidCreate, "success")
                .with_bids([bid.bid_id])
                .with_detail(detail),
        );
        self.users.set_pending(user, None);

        let candidates = self.matcher.find_counterparts(&bid);
        let mut notifications = vec![self.candidates_notification(
            user,
            &bid,
            &candidates,
            format!("✅ Bid #{} created: {} {}.", bid.bid_id, side.label(), bid.asset),
        )];
        for candidate in &candidates {
            notifications.push(
                Notification::text(
                    candidate.bid.owner,
                    format!(
                        "🔔 New {} bid #{} for {} {:.1} km from your bid #{}.",
                        bid.side.label(),
                        bid.bid_id,
                        bid.asset,
                        candidate.distance_km,
                        candidate.bid.bid_id
                    ),
                )
                .with_choices(vec![vec![Choice::new(
                    "🤝 PROPOSE",
                    format!("propose:{}:{}", candidate.bid.bid_id, bid.bid_id),
                )]]),
            );
        }
        Ok(notifications)
    }

    fn candidates_notification(&self, user: UserId, bid: &Bid, candidates: &[Candidate], header: String) -> Notification {
        if candidates.is_empty() {
            return Notification::text(user, format!("{}\nNo counterparts yet.", header)).with_choices(home_menu());
        }
        let mut text = header;
        let mut rows = Vec::new();
        for candidate in candidates {
            text.push_str(&format!(
                "\n• #{} {} {}, {:.1} km",
                candidate.bid.bid_id,
                candidate.bid.side.label(),
                candidate.bid.asset,
                candidate.distance_km
            ));
            rows.push(vec![Choice::new(
                format!("🤝 #{}", candidate.bid.bid_id),
                format!("propose:{}:{}", bid.bid_id, candidate.bid.bid_id),
            )]);
        }
        Notification::text(user, text).with_choices(rows)
    }

    fn cancel_bid(&self, user: UserId, bid_id: BidId) -> Result<Vec<Notification>, BidError> {
        let result = self.registry.cancel_bid(bid_id, user);
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.code(),
        };
        self.audit
            .record(AuditEvent::new(user, AuditAction::BidCancel, outcome).with_bids([bid_id]));
        result?;
        self.drop_proposals(&[bid_id]);
        Ok(vec![Notification::text(user, format!("❌ Bid #{} cancelled.", bid_id)).with_choices(home_menu())])
    }

    fn list_bids(&self, user: UserId) -> Notification {
        let bids = self.registry.list_bids(user);
        if bids.is_empty() {
            return Notification::text(user, "You have no bids yet.").with_choices(home_menu());
        }
        let mut text = String::from("📝 Your bids:");
        let mut rows = Vec::new();
        for bid in &bids {
            text.push_str(&format!(
                "\n• #{} {} {} ({})",
                bid.bid_id,
                bid.side.label(),
                bid.asset,
                status_label(bid.status)
            ));
            if bid.is_open() {
                rows.push(vec![Choice::new(format!("❌ CANCEL #{}", bid.bid_id), format!("cancel:{}", bid.bid_id))]);
            }
        }
        if rows.is_empty() {
            return Notification::text(user, text).with_choices(home_menu());
        }
        Notification::text(user, text).with_choices(rows)
    }

    fn find_bids(&self, user: UserId) -> Notification {
        let open: Vec<Bid> = self
            .registry
            .list_bids(user)
            .into_iter()
            .filter(Bid::is_open)
            .collect();
        if open.is_empty() {
            return Notification::text(user, "Create a bid first, then I can look for counterparts.")
                .with_choices(home_menu());
        }
        let mut text = String::from("🛒 Counterparts near your bids:");
        let mut rows = Vec::new();
        for bid in &open {
            let candidates = self.matcher.find_counterparts(bid);
            text.push_str(&format!("\n\n#{} {} {}:", bid.bid_id, bid.side.label(), bid.asset));
            if candidates.is_empty() {
                text.push_str(" nobody yet");
            }
            for candidate in &candidates {
                text.push_str(&format!("\n• #{}: {:.1} km", candidate.bid.bid_id, candidate.distance_km));
                rows.push(vec![Choice::new(
                    format!("🤝 #{} ↔ #{}", bid.bid_id, candidate.bid.bid_id),
                    format!("propose:{}:{}", bid.bid_id, candidate.bid.bid_id),
                )]);
            }
        }
        if rows.is_empty() {
            return Notification::text(user, text).with_choices(home_menu());
        }
        Notification::text(user, text).with_choices(rows)
    }

    /// Looks up `own` for `user` and `other` as a compatible open counterpart.
    fn pair(&self, user: UserId, own: BidId, other: BidId) -> Result<(Bid, Bid), BidError> {
        let own_bid = self.registry.get(own).ok_or(BidError::NotFound(own))?;
        if own_bid.owner != user {
            return Err(BidError::Forbidden);
        }
        let other_bid = self.registry.get(other).ok_or(BidError::NotFound(other))?;
        if !own_bid.is_open() {
            return Err(BidError::NotOpen(own));
        }
        if !other_bid.is_open() {
            return Err(BidError::NotOpen(other));
        }
        if own_bid.asset != other_bid.asset || own_bid.side == other_bid.side || own_bid.owner == other_bid.owner {
            return Err(BidError::IncompatibleBids);
        }
        Ok((own_bid, other_bid))
    }

    fn propose_match(&self, user: UserId, own: BidId, other: BidId) -> Result<Vec<Notification>, BidError> {
        let (own_bid, other_bid) = self.pair(user, own, other)?;
        self.proposals.lock().insert((other, own));
        info!("match proposed bid_id={} counterpart_id={} user_id={}", own.0, other.0, user.0);
        Ok(vec![
            Notification::text(user, format!("📨 Proposal sent to the owner of bid #{}.", other)),
            Notification::text(
                other_bid.owner,
                format!(
                    "🤝 The owner of {} bid #{} wants to trade {} with your bid #{}.",
                    own_bid.side.label(),
                    own,
                    own_bid.asset,
                    other
                ),
            )
            .with_choices(vec![vec![Choice::new("✅ ACCEPT", format!("accept:{}:{}", other, own))]]),
        ])
    }

    fn accept_match(&self, user: UserId, own: BidId, other: BidId) -> Result<Vec<Notification>, BidError> {
        self.pair(user, own, other)?;
        if !self.proposals.lock().contains(&(own, other)) {
            return Err(BidError::NotFound(other));
        }
        let result = self.registry.commit_match(own, other);
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.code(),
        };
        self.audit
            .record(AuditEvent::new(user, AuditAction::MatchCommit, outcome).with_bids([own, other]));
        let (own_bid, other_bid) = result?;
        self.drop_proposals(&[own, other]);
        let distance = crate::geo::haversine_km(own_bid.location, other_bid.location);
        let text = |mine: &Bid, theirs: &Bid| {
            format!(
                "🎉 Your {} bid #{} for {} is matched with bid #{} ({:.1} km away). Contact user {} to settle.",
                mine.side.label(),
                mine.bid_id,
                mine.asset,
                theirs.bid_id,
                distance,
                theirs.owner.0
            )
        };
        Ok(vec![
            Notification::text(own_bid.owner, text(&own_bid, &other_bid)).with_choices(home_menu()),
            Notification::text(other_bid.owner, text(&other_bid, &own_bid)).with_choices(home_menu()),
        ])
    }

    fn drop_proposals(&self, bids: &[BidId]) {
        self.proposals
            .lock()
            .retain(|(target, proposer)| !bids.contains(target) && !bids.contains(proposer));
    }

    /// Drops a user the gateway can no longer reach, cancelling their open bids.
    pub fn remove_unreachable(&self, user: UserId) -> Removal {
        let removed = self.users.remove(user).is_some();
        let cancelled_bids = self.registry.cancel_all_for(user);
        self.drop_proposals(&cancelled_bids);
        if removed || !cancelled_bids.is_empty() {
            info!(
                "user removed user_id={} reason=unreachable cancelled_bids={}",
                user.0,
                cancelled_bids.len()
            );
            self.audit.record(
                AuditEvent::new(user, AuditAction::UserRemoved, "success")
                    .with_bids(cancelled_bids.iter().copied())
                    .with_detail(serde_json::json!({ "reason": "unreachable" })),
            );
        }
        Removal {
            removed,
            cancelled_bids,
        }
    }

    /// Restart notice for every known user.
    pub fn restart_notifications(&self) -> Vec<Notification> {
        self.users
            .user_ids()
            .into_iter()
            .map(|user| Notification::text(user, RESTART_TEXT))
            .collect()
    }

    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            users: self.users.snapshot(),
            bids: self.registry.snapshot(),
        }
    }

    /// Loads users and bids saved by [`Desk::snapshot`]. Meant for a fresh desk.
    pub fn restore(&self, state: PersistedState) -> Result<(), BidError> {
        let bids = self.registry.load_all_bids(state.bids)?;
        let users = state.users.len();
        self.users.load(state.users);
        info!("desk restored users={} bids={}", users, bids);
        Ok(())
    }
}

fn status_label(status: BidStatus) -> &'static str {
    match status {
        BidStatus::Open => "open",
        BidStatus::Matched => "matched",
        BidStatus::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::intent::{CREATE_BID_LABEL, MY_BIDS_LABEL};

    fn init_log() {
        let _ = env_logger::try_init();
    }

    fn desk() -> (Desk, InMemoryAuditSink) {
        let sink = InMemoryAuditSink::default();
        (Desk::with_audit(DeskConfig::default(), Arc::new(sink.clone())), sink)
    }

    fn send(desk: &Desk, user: i64, kind: IntentKind) -> Vec<Notification> {
        desk.handle(UserIntent::new(UserId(user), kind))
    }

    fn locate(desk: &Desk, user: i64, lat: f64, lon: f64) {
        send(desk, user, IntentKind::SetLocation { latitude: lat, longitude: lon });
    }

    fn create(desk: &Desk, user: i64, side: Side, asset: &str) -> BidId {
        let out = send(desk, user, IntentKind::CreateBid { side, asset: asset.into() });
        assert!(out[0].error.is_none(), "create failed: {:?}", out);
        desk.registry().list_bids(UserId(user))[0].bid_id
    }

    #[test]
    fn start_shows_home_menu() {
        init_log();
        let (desk, _) = desk();
        let out = send(&desk, 1, IntentKind::Start);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, START_TEXT);
        assert_eq!(out[0].choices, Some(home_menu()));
        assert_eq!(desk.users().len(), 1);
    }

    #[test]
    fn create_bid_without_location_is_rejected() {
        init_log();
        let (desk, sink) = desk();
        let out = send(&desk, 1, IntentKind::CreateBid { side: Side::Buy, asset: "BTC".into() });
        assert_eq!(out[0].error.as_deref(), Some("invalid_location"));
        assert_eq!(desk.registry().index().total_len(), 0);
        assert_eq!(sink.events()[0].outcome, "invalid_location");
    }

    #[test]
    fn two_step_create_flow() {
        init_log();
        let (desk, _) = desk();
        send(&desk, 1, IntentKind::RequestLocation);
        assert_eq!(desk.users().pending(UserId(1)), Some(PendingInput::Location));
        send(&desk, 1, IntentKind::Text { text: "52.52, 13.40".into() });
        assert_eq!(desk.users().location(UserId(1)), Some(Location::new(52.52, 13.40)));
        assert_eq!(desk.users().pending(UserId(1)), None);

        let out = send(&desk, 1, IntentKind::Text { text: "✍️ CREATE BID".into() });
        assert_eq!(out[0].choices.as_ref().unwrap()[0][1].data, "side:sell");
        let out = send(&desk, 1, IntentKind::ChooseSide { side: Side::Sell });
        assert!(out[0].text.contains("BTC"));
        assert_eq!(desk.users().pending(UserId(1)), Some(PendingInput::BidAsset(Side::Sell)));

        let out = send(&desk, 1, IntentKind::Text { text: "eth".into() });
        assert!(out[0].text.contains("created"));
        let bids = desk.registry().list_bids(UserId(1));
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].asset, "ETH");
        assert_eq!(bids[0].side, Side::Sell);
        assert_eq!(desk.users().pending(UserId(1)), None);
    }

    #[test]
    fn unsupported_asset_keeps_asking() {
        init_log();
        let (desk, _) = desk();
        locate(&desk, 1, 0.0, 0.0);
        send(&desk, 1, IntentKind::ChooseSide { side: Side::Buy });
        let out = send(&desk, 1, IntentKind::Text { text: "DOGE".into() });
        assert_eq!(out[0].error.as_deref(), Some("unsupported_asset"));
        assert_eq!(desk.users().pending(UserId(1)), Some(PendingInput::BidAsset(Side::Buy)));
    }

    fn click(desk: &Desk, user: i64, data: &str) -> Vec<Notification> {
        let kind = IntentKind::from_choice(data).unwrap_or_else(|| panic!("unparseable choice {:?}", data));
        let out = send(desk, user, kind);
        assert_choices_parse(&out);
        out
    }

    fn assert_choices_parse(out: &[Notification]) {
        for choice in out.iter().filter_map(|n| n.choices.as_ref()).flatten().flatten() {
            assert!(
                IntentKind::from_choice(&choice.data).is_some(),
                "choice {:?} does not parse",
                choice
            );
        }
    }

    fn choice_data(n: &Notification, label: &str) -> String {
        n.choices
            .iter()
            .flatten()
            .flatten()
            .find(|c| c.label == label)
            .map(|c| c.data.clone())
            .unwrap_or_else(|| panic!("no {:?} button in {:?}", label, n))
    }

    #[test]
    fn button_only_flow_from_create_to_match() {
        init_log();
        let (desk, _) = desk();
        locate(&desk, 1, 52.52, 13.40);
        locate(&desk, 2, 52.50, 13.42);

        let out = send(&desk, 1, IntentKind::Start);
        assert_choices_parse(&out);
        let out = click(&desk, 1, &choice_data(&out[0], CREATE_BID_LABEL));
        let out = click(&desk, 1, &choice_data(&out[0], "SELL"));
        assert_eq!(choice_data(&out[0], "BTC"), "bid:sell:BTC");
        click(&desk, 1, &choice_data(&out[0], "BTC"));
        let sell = desk.registry().list_bids(UserId(1))[0].bid_id;
        assert_eq!(desk.users().pending(UserId(1)), None);

        let out = click(&desk, 2, "create_bid");
        let out = click(&desk, 2, &choice_data(&out[0], "BUY"));
        let out = click(&desk, 2, &choice_data(&out[0], "BTC"));
        let buy = desk.registry().list_bids(UserId(2))[0].bid_id;
        let out = click(&desk, 2, &choice_data(&out[0], &format!("🤝 #{}", sell)));
        let out = click(&desk, 1, &choice_data(&out[1], "✅ ACCEPT"));
        assert!(out.iter().all(|n| n.error.is_none()));
        assert_eq!(desk.registry().get(sell).unwrap().status, BidStatus::Matched);
        assert_eq!(desk.registry().get(buy).unwrap().status, BidStatus::Matched);

        let extra = create(&desk, 1, Side::Buy, "LTC");
        let out = click(&desk, 1, "my_bids");
        click(&desk, 1, &choice_data(&out[0], &format!("❌ CANCEL #{}", extra)));
        assert_eq!(desk.registry().get(extra).unwrap().status, BidStatus::Cancelled);
    }

    #[test]
    fn menu_button_overrides_pending_question() {
        init_log();
        let (desk, _) = desk();
        locate(&desk, 1, 0.0, 0.0);
        send(&desk, 1, IntentKind::ChooseSide { side: Side::Buy });
        let out = send(&desk, 1, IntentKind::Text { text: MY_BIDS_LABEL.into() });
        assert!(out[0].error.is_none(), "{:?}", out);
        assert_eq!(out[0].text, "You have no bids yet.");
        assert_eq!(desk.users().pending(UserId(1)), None);
        assert!(desk.registry().is_empty());

        send(&desk, 1, IntentKind::RequestLocation);
        let out = send(&desk, 1, IntentKind::Text { text: CREATE_BID_LABEL.into() });
        assert!(out[0].error.is_none(), "{:?}", out);
        assert_eq!(desk.users().pending(UserId(1)), Some(PendingInput::BidSide));
        assert_eq!(desk.users().location(UserId(1)), Some(Location::new(0.0, 0.0)));
    }

    #[test]
    fn new_bid_notifies_both_parties() {
        init_log();
        let (desk, _) = desk();
        locate(&desk, 1, 52.52, 13.40);
        locate(&desk, 2, 52.50, 13.42);
        let sell = create(&desk, 1, Side::Sell, "BTC");
        let out = send(&desk, 2, IntentKind::CreateBid { side: Side::Buy, asset: "btc".into() });
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].user_id, UserId(2));
        assert!(out[0].text.contains(&format!("#{}", sell)));
        assert_eq!(out[1].user_id, UserId(1));
        let buy = desk.registry().list_bids(UserId(2))[0].bid_id;
        assert_eq!(
            out[1].choices.as_ref().unwrap()[0][0].data,
            format!("propose:{}:{}", sell, buy)
        );
    }

    #[test]
    fn propose_accept_commits_match() {
        init_log();
        let (desk, sink) = desk();
        locate(&desk, 1, 0.0, 0.0);
        locate(&desk, 2, 0.0, 0.1);
        let sell = create(&desk, 1, Side::Sell, "ETH");
        let buy = create(&desk, 2, Side::Buy, "ETH");

        let out = send(&desk, 2, IntentKind::ProposeMatch { bid_id: buy, counterpart_id: sell });
        assert_eq!(out.len(), 2);
        let accept = &out[1].choices.as_ref().unwrap()[0][0].data;
        let kind = IntentKind::from_choice(accept).unwrap();
        assert_eq!(kind, IntentKind::AcceptMatch { bid_id: sell, counterpart_id: buy });

        // Only the owner of the target bid may accept.
        let out = send(&desk, 2, kind.clone());
        assert_eq!(out[0].error.as_deref(), Some("forbidden"));

        let out = send(&desk, 1, kind);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|n| n.error.is_none() && n.text.contains("matched")));
        assert_eq!(desk.registry().get(sell).unwrap().status, BidStatus::Matched);
        assert_eq!(desk.registry().get(buy).unwrap().status, BidStatus::Matched);
        assert_eq!(desk.registry().index().total_len(), 0);
        assert!(sink.actions().contains(&AuditAction::MatchCommit));
    }

    #[test]
    fn accept_without_proposal_is_not_found() {
        init_log();
        let (desk, _) = desk();
        locate(&desk, 1, 0.0, 0.0);
        locate(&desk, 2, 0.0, 0.1);
        let sell = create(&desk, 1, Side::Sell, "ETH");
        let buy = create(&desk, 2, Side::Buy, "ETH");
        let out = send(&desk, 1, IntentKind::AcceptMatch { bid_id: sell, counterpart_id: buy });
        assert_eq!(out[0].error.as_deref(), Some("not_found"));
        assert!(desk.registry().get(sell).unwrap().is_open());
    }

    #[test]
    fn cancel_and_list() {
        init_log();
        let (desk, _) = desk();
        locate(&desk, 1, 0.0, 0.0);
        let a = create(&desk, 1, Side::Buy, "BTC");
        let b = create(&desk, 1, Side::Sell, "LTC");
        let out = send(&desk, 2, IntentKind::CancelBid { bid_id: a });
        assert_eq!(out[0].error.as_deref(), Some("forbidden"));
        send(&desk, 1, IntentKind::CancelBid { bid_id: a });
        let out = send(&desk, 1, IntentKind::ListBids);
        assert!(out[0].text.contains("cancelled"));
        let rows = out[0].choices.as_ref().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].data, format!("cancel:{}", b));
    }

    #[test]
    fn find_bids_lists_counterparts() {
        init_log();
        let (desk, _) = desk();
        locate(&desk, 1, 0.0, 0.0);
        locate(&desk, 2, 0.0, 0.2);
        let out = send(&desk, 1, IntentKind::FindBids);
        assert!(out[0].text.contains("Create a bid first"));
        let buy = create(&desk, 1, Side::Buy, "USDT");
        let sell = create(&desk, 2, Side::Sell, "USDT");
        let out = send(&desk, 1, IntentKind::FindBids);
        assert_eq!(
            out[0].choices.as_ref().unwrap()[0][0].data,
            format!("propose:{}:{}", buy, sell)
        );
    }

    #[test]
    fn unreachable_user_is_removed_with_bids() {
        init_log();
        let (desk, sink) = desk();
        locate(&desk, 1, 0.0, 0.0);
        let bid = create(&desk, 1, Side::Buy, "BTC");
        let removal = desk.remove_unreachable(UserId(1));
        assert!(removal.removed);
        assert_eq!(removal.cancelled_bids, vec![bid]);
        assert!(desk.users().is_empty());
        assert_eq!(desk.registry().index().total_len(), 0);
        assert!(sink.actions().contains(&AuditAction::UserRemoved));
        assert!(!desk.remove_unreachable(UserId(1)).removed);
    }

    #[test]
    fn restart_notifies_every_user() {
        init_log();
        let (desk, _) = desk();
        send(&desk, 3, IntentKind::Start);
        send(&desk, 1, IntentKind::Start);
        let out = desk.restart_notifications();
        assert_eq!(out.iter().map(|n| n.user_id).collect::<Vec<_>>(), vec![UserId(1), UserId(3)]);
        assert!(out.iter().all(|n| n.text == RESTART_TEXT));
    }

    #[test]
    fn snapshot_restore_round_trip() {
        init_log();
        let (desk, _) = desk();
        locate(&desk, 1, 10.0, 10.0);
        locate(&desk, 2, 10.0, 10.2);
        create(&desk, 1, Side::Sell, "BTC");
        let buy = create(&desk, 2, Side::Buy, "BTC");
        let state = desk.snapshot();

        let (fresh, _) = self::desk();
        fresh.restore(state.clone()).unwrap();
        assert_eq!(fresh.snapshot(), state);
        let bid = fresh.registry().get(buy).unwrap();
        assert_eq!(
            fresh.matcher().find_counterparts(&bid),
            desk.matcher().find_counterparts(&desk.registry().get(buy).unwrap())
        );
    }

    #[test]
    fn unknown_text_shows_menu() {
        init_log();
        let (desk, _) = desk();
        let out = send(&desk, 1, IntentKind::Text { text: "hello".into() });
        assert_eq!(out[0].choices, Some(home_menu()));
        assert!(out[0].error.is_none());
    }
}
