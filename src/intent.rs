//! Messages exchanged with the messaging gateway.
//!
//! [`UserIntent`] is what the gateway delivers for one user action; the desk
//! answers with [`Notification`]s. Inline choices carry a callback string that
//! [`IntentKind::from_choice`] turns back into an intent.

use crate::types::{BidId, Side, UserId};

/// One user action, as delivered by the gateway.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UserIntent {
    pub user_id: UserId,
    pub kind: IntentKind,
}

impl UserIntent {
    pub fn new(user_id: UserId, kind: IntentKind) -> Self {
        Self { user_id, kind }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentKind {
    /// `/start`
    Start,
    SetLocation { latitude: f64, longitude: f64 },
    /// LOCATION menu button: ask for a location reply.
    RequestLocation,
    /// CREATE BID menu button: first step, pick a side.
    BeginCreateBid,
    /// Second step, pick an asset for this side.
    ChooseSide { side: Side },
    CreateBid { side: Side, asset: String },
    CancelBid { bid_id: BidId },
    ListBids,
    /// FIND BIDS menu button: counterparts for every open bid of the user.
    FindBids,
    /// Offer `bid_id` (own) to the owner of `counterpart_id`.
    ProposeMatch { bid_id: BidId, counterpart_id: BidId },
    /// Accept a proposal made against `bid_id` (own) by `counterpart_id`.
    AcceptMatch { bid_id: BidId, counterpart_id: BidId },
    /// Free-text reply, interpreted by the user's pending input.
    Text { text: String },
}

pub const FIND_BIDS_LABEL: &str = "🛒 FIND BIDS";
pub const CREATE_BID_LABEL: &str = "✍️ CREATE BID";
pub const MY_BIDS_LABEL: &str = "📝 MY BIDS";
pub const LOCATION_LABEL: &str = "🌎 LOCATION";

impl IntentKind {
    /// Parses the callback string of a [`Choice`].
    pub fn from_choice(data: &str) -> Option<Self> {
        let mut parts = data.split(':');
        let kind = match (parts.next()?, parts.next(), parts.next()) {
            ("start", None, None) => IntentKind::Start,
            ("find_bids", None, None) => IntentKind::FindBids,
            ("create_bid", None, None) => IntentKind::BeginCreateBid,
            ("my_bids", None, None) => IntentKind::ListBids,
            ("location", None, None) => IntentKind::RequestLocation,
            ("side", Some(side), None) => IntentKind::ChooseSide {
                side: parse_side(side)?,
            },
            ("bid", Some(side), Some(asset)) if !asset.is_empty() => IntentKind::CreateBid {
                side: parse_side(side)?,
                asset: asset.to_string(),
            },
            ("cancel", Some(id), None) => IntentKind::CancelBid {
                bid_id: BidId(id.parse().ok()?),
            },
            ("propose", Some(own), Some(other)) => IntentKind::ProposeMatch {
                bid_id: BidId(own.parse().ok()?),
                counterpart_id: BidId(other.parse().ok()?),
            },
            ("accept", Some(own), Some(other)) => IntentKind::AcceptMatch {
                bid_id: BidId(own.parse().ok()?),
                counterpart_id: BidId(other.parse().ok()?),
            },
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(kind)
    }

    /// Maps a home-menu button label to its intent.
    pub fn from_menu_label(label: &str) -> Option<Self> {
        match label.trim() {
            FIND_BIDS_LABEL => Some(IntentKind::FindBids),
            CREATE_BID_LABEL => Some(IntentKind::BeginCreateBid),
            MY_BIDS_LABEL => Some(IntentKind::ListBids),
            LOCATION_LABEL => Some(IntentKind::RequestLocation),
            _ => None,
        }
    }
}

fn parse_side(s: &str) -> Option<Side> {
    match s {
        "buy" => Some(Side::Buy),
        "sell" => Some(Side::Sell),
        _ => None,
    }
}

/// Button shown under a notification.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Choice {
    pub label: String,
    /// Callback string, see [`IntentKind::from_choice`].
    pub data: String,
}

impl Choice {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Outgoing message for one user. Delivered at most once by the gateway.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub text: String,
    /// Rows of buttons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Vec<Choice>>>,
    /// Error code when the message reports a rejected intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Notification {
    pub fn text(user_id: UserId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            text: text.into(),
            choices: None,
            error: None,
        }
    }

    pub fn with_choices(mut self, choices: Vec<Vec<Choice>>) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn with_error(mut self, code: &str) -> Self {
        self.error = Some(code.to_string());
        self
    }
}

/// Home menu: two rows of two buttons.
pub fn home_menu() -> Vec<Vec<Choice>> {
    vec![
        vec![
            Choice::new(FIND_BIDS_LABEL, "find_bids"),
            Choice::new(CREATE_BID_LABEL, "create_bid"),
        ],
        vec![
            Choice::new(MY_BIDS_LABEL, "my_bids"),
            Choice::new(LOCATION_LABEL, "location"),
        ],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_choices_parse_back() {
        for row in home_menu() {
            for choice in row {
                let from_data = IntentKind::from_choice(&choice.data).unwrap();
                assert_eq!(IntentKind::from_menu_label(&choice.label), Some(from_data));
            }
        }
    }

    #[test]
    fn parametrised_choices_parse() {
        assert_eq!(
            IntentKind::from_choice("side:sell"),
            Some(IntentKind::ChooseSide { side: Side::Sell })
        );
        assert_eq!(
            IntentKind::from_choice("cancel:12"),
            Some(IntentKind::CancelBid { bid_id: BidId(12) })
        );
        assert_eq!(
            IntentKind::from_choice("accept:3:4"),
            Some(IntentKind::AcceptMatch {
                bid_id: BidId(3),
                counterpart_id: BidId(4)
            })
        );
        assert_eq!(
            IntentKind::from_choice("bid:buy:USDT"),
            Some(IntentKind::CreateBid {
                side: Side::Buy,
                asset: "USDT".into()
            })
        );
        assert_eq!(IntentKind::from_choice("bid:buy:"), None);
        assert_eq!(IntentKind::from_choice("side:hold"), None);
        assert_eq!(IntentKind::from_choice("cancel:x"), None);
        assert_eq!(IntentKind::from_choice("propose:1:2:3"), None);
        assert_eq!(IntentKind::from_choice("nope"), None);
    }

    #[test]
    fn intent_json_shape() {
        let intent: UserIntent = serde_json::from_value(serde_json::json!({
            "user_id": 42,
            "kind": { "type": "create_bid", "side": "Buy", "asset": "btc" }
        }))
        .unwrap();
        assert_eq!(
            intent,
            UserIntent::new(
                UserId(42),
                IntentKind::CreateBid {
                    side: Side::Buy,
                    asset: "btc".into()
                }
            )
        );
    }

    #[test]
    fn notification_omits_empty_fields() {
        let json = serde_json::to_value(Notification::text(UserId(1), "hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "user_id": 1, "text": "hi" }));
    }
}
