//! Upstream response schemas.
//!
//! Field names mirror the ESI JSON exactly so the structs double as wire
//! models for the websocket payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single market order as listed by the regional orders feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub order_id: i64,
    pub type_id: i32,
    pub location_id: i64,
    pub system_id: i32,
    pub volume_total: i32,
    pub volume_remain: i32,
    pub min_volume: i32,
    pub price: f64,
    pub is_buy_order: bool,
    pub duration: i32,
    pub issued: DateTime<Utc>,
    pub range: String,
}

/// Public contract header. Immutable for the lifetime of the contract
/// except through its bid list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractHeader {
    pub contract_id: i32,
    #[serde(rename = "type")]
    pub type_: String,
    pub issuer_id: i32,
    pub issuer_corporation_id: i32,
    pub for_corporation: bool,
    pub date_issued: DateTime<Utc>,
    pub date_expired: DateTime<Utc>,
    #[serde(default)]
    pub start_location_id: i64,
    #[serde(default)]
    pub end_location_id: i64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub reward: f64,
    #[serde(default)]
    pub collateral: f64,
    #[serde(default)]
    pub buyout: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub days_to_complete: i32,
    #[serde(default)]
    pub title: String,
}

impl ContractHeader {
    pub fn is_auction(&self) -> bool {
        self.type_ == "auction"
    }

    /// Couriers never list items; everything else can.
    pub fn carries_items(&self) -> bool {
        self.type_ != "courier"
    }
}

/// One bid on an auction contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractBid {
    pub bid_id: i32,
    pub amount: f64,
    pub date_bid: DateTime<Utc>,
}

/// One item row inside a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractItem {
    pub record_id: i64,
    pub type_id: i32,
    pub quantity: i32,
    pub is_included: bool,
}

/// Contract header plus the detail lists the header points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullContract {
    pub contract: ContractHeader,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ContractItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bids: Vec<ContractBid>,
}
