//! Order state and the order differ.

use chrono::{DateTime, Utc};

use super::LocationIndex;
use crate::esi::types::MarketOrder;
use crate::models::OrderChange;

/// Stored order plus the poll-cycle timestamp that last observed it.
#[derive(Debug, Clone)]
pub struct Order {
    pub touched: DateTime<Utc>,
    pub order: MarketOrder,
}

/// Per-location order state.
pub struct OrderStore {
    index: LocationIndex<Order>,
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            index: LocationIndex::new(),
        }
    }

    /// Idempotently create the map for a location.
    pub fn ensure(&self, location_id: i64) {
        self.index.ensure(location_id);
    }

    /// Store a freshly polled order. Returns the field-level diff against
    /// the previous observation and whether the order is new. The fresh
    /// entity always replaces the stored one, refreshing `touched` even
    /// when nothing else changed.
    pub fn upsert(
        &self,
        location_id: i64,
        touched: DateTime<Utc>,
        order: MarketOrder,
    ) -> (OrderChange, bool) {
        let map = self.index.or_create(location_id);

        let mut change = OrderChange {
            order_id: order.order_id,
            location_id: order.location_id,
            type_id: order.type_id,
            is_buy_order: order.is_buy_order,
            changed: false,
            volume_change: 0,
            volume_remain: 0,
            price: 0.0,
            duration: 0,
        };

        let result = match map.entry(order.order_id) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let stored = entry.get();
                if stored.order.volume_remain != order.volume_remain
                    || stored.order.price != order.price
                    || stored.order.duration != order.duration
                {
                    change.changed = true;
                    change.volume_change = stored.order.volume_remain - order.volume_remain;
                    change.volume_remain = order.volume_remain;
                    change.price = order.price;
                    change.duration = order.duration;
                }
                entry.insert(Order { touched, order });
                (change, false)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Order { touched, order });
                (change, true)
            }
        };
        result
    }

    /// Remove and report every order the latest listing no longer carries.
    /// A deletion zeroes the remaining volume and reports the full
    /// remainder as the volume change.
    pub fn sweep(&self, location_id: i64, cutoff: DateTime<Utc>) -> Vec<OrderChange> {
        let Some(map) = self.index.get(location_id) else {
            return Vec::new();
        };

        let mut deletions = Vec::new();
        for entry in map.iter() {
            let stored = entry.value();
            if stored.touched < cutoff {
                deletions.push(OrderChange {
                    order_id: stored.order.order_id,
                    location_id: stored.order.location_id,
                    type_id: stored.order.type_id,
                    is_buy_order: stored.order.is_buy_order,
                    changed: true,
                    volume_change: stored.order.volume_remain,
                    volume_remain: 0,
                    price: stored.order.price,
                    duration: stored.order.duration,
                });
            }
        }
        for deletion in &deletions {
            map.remove(&deletion.order_id);
        }
        deletions
    }

    /// Locations currently known to the store.
    pub fn location_ids(&self) -> Vec<i64> {
        self.index.location_ids()
    }

    /// All orders at one location, for snapshot replay.
    pub fn dump_location(&self, location_id: i64) -> Vec<MarketOrder> {
        match self.index.get(location_id) {
            Some(map) => map.iter().map(|e| e.value().order.clone()).collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
