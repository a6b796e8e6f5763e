//! Wire models for the websocket feed.
//!
//! Every outbound frame is a [`Message`]: an action plus a homogeneous
//! payload batch. The payload is a tagged union in Rust but serializes
//! untagged; the subscribed channel together with the action is enough for
//! clients to decode it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::esi::types::{ContractBid, FullContract, MarketOrder};

/// What happened to the entities in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Addition,
    Change,
    Deletion,
}

/// Field-level delta for a market order. Deletions report the entire
/// remaining volume as the change and zero volume remaining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderChange {
    pub order_id: i64,
    pub location_id: i64,
    pub type_id: i32,
    pub is_buy_order: bool,
    #[serde(skip)]
    pub changed: bool,
    pub volume_change: i32,
    pub volume_remain: i32,
    pub price: f64,
    pub duration: i32,
}

/// Delta for a public contract. Only the bid side of a contract ever
/// mutates, so changes capture the pre-update price and bid list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractChange {
    pub contract_id: i32,
    pub location_id: i64,
    /// Set on deletions whose stored expiry had already passed; the
    /// contract aged out rather than being completed or withdrawn.
    pub expired: bool,
    #[serde(skip)]
    pub changed: bool,
    pub bids: Vec<ContractBid>,
    pub price: f64,
    pub time_changed: DateTime<Utc>,
}

/// One homogeneous batch of entities or deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Orders(Vec<MarketOrder>),
    OrderChanges(Vec<OrderChange>),
    Contracts(Vec<FullContract>),
    ContractChanges(Vec<ContractChange>),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Orders(v) => v.is_empty(),
            Payload::OrderChanges(v) => v.is_empty(),
            Payload::Contracts(v) => v.is_empty(),
            Payload::ContractChanges(v) => v.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Orders(v) => v.len(),
            Payload::OrderChanges(v) => v.len(),
            Payload::Contracts(v) => v.len(),
            Payload::ContractChanges(v) => v.len(),
        }
    }
}

/// Envelope for every websocket frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub action: Action,
    pub payload: Payload,
}

impl Message {
    pub fn new(action: Action, payload: Payload) -> Self {
        Self { action, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_order() -> MarketOrder {
        MarketOrder {
            order_id: 1,
            type_id: 34,
            location_id: 60003760,
            system_id: 30000142,
            volume_total: 10,
            volume_remain: 5,
            min_volume: 1,
            price: 100.0,
            is_buy_order: false,
            duration: 90,
            issued: Utc.with_ymd_and_hms(2026, 7, 30, 11, 0, 0).unwrap(),
            range: "region".to_string(),
        }
    }

    #[test]
    fn action_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Action::Addition).unwrap(),
            "\"addition\""
        );
        assert_eq!(
            serde_json::to_string(&Action::Deletion).unwrap(),
            "\"deletion\""
        );
    }

    #[test]
    fn order_message_round_trips() {
        let msg = Message::new(Action::Addition, Payload::Orders(vec![sample_order()]));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"action\":\"addition\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn order_change_message_round_trips() {
        let change = OrderChange {
            order_id: 1,
            location_id: 60003760,
            type_id: 34,
            is_buy_order: false,
            changed: false,
            volume_change: 3,
            volume_remain: 2,
            price: 120.0,
            duration: 90,
        };
        let msg = Message::new(Action::Change, Payload::OrderChanges(vec![change]));
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn contract_change_message_round_trips() {
        let change = ContractChange {
            contract_id: 7,
            location_id: 60003760,
            expired: true,
            changed: false,
            bids: vec![ContractBid {
                bid_id: 1,
                amount: 1000.0,
                date_bid: Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap(),
            }],
            price: 5000.0,
            time_changed: Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap(),
        };
        let msg = Message::new(Action::Deletion, Payload::ContractChanges(vec![change]));
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn internal_changed_flag_stays_off_the_wire() {
        let change = OrderChange {
            order_id: 1,
            location_id: 2,
            type_id: 3,
            is_buy_order: true,
            changed: true,
            volume_change: 0,
            volume_remain: 1,
            price: 1.0,
            duration: 30,
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(!json.contains("changed"));
    }
}
