//! Websocket broadcast layer.
//!
//! A single hub task owns the client set and multiplexes registration,
//! unregistration, and broadcasts. Clients subscribe to named channels at
//! upgrade time and are pure write-sinks afterwards.

mod endpoint;
mod hub;

pub use endpoint::{router, subscriptions_from_query, WsState};
pub use hub::{Client, ClientQueue, Hub, HubHandle, RegisterCallback};

/// Channel carrying market order events and snapshots.
pub const MARKET_CHANNEL: &str = "market";
/// Channel carrying public contract events and snapshots.
pub const CONTRACT_CHANNEL: &str = "contract";

/// Every channel a client can subscribe to.
pub const CHANNELS: &[&str] = &[MARKET_CHANNEL, CONTRACT_CHANNEL];
