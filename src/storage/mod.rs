//! In-memory state store.
//!
//! State is sharded per market location: a read-mostly index maps location
//! ids to concurrent entity maps. The index only grows (locations are
//! discovered at startup or when a structure first appears), so a
//! reader-writer lock around it is cheaper than a fully concurrent outer
//! map. Everything here is rebuilt from polling; nothing is persisted.

mod contracts;
mod orders;

pub use contracts::{Contract, ContractStore};
pub use orders::{Order, OrderStore};

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

/// Location-sharded map of entities keyed by their upstream id.
pub(crate) struct LocationIndex<V> {
    locations: RwLock<HashMap<i64, Arc<DashMap<i64, V>>>>,
}

impl<V> LocationIndex<V> {
    pub(crate) fn new() -> Self {
        Self {
            locations: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotently create the per-location map.
    pub(crate) fn ensure(&self, location_id: i64) {
        self.or_create(location_id);
    }

    pub(crate) fn get(&self, location_id: i64) -> Option<Arc<DashMap<i64, V>>> {
        self.locations.read().get(&location_id).cloned()
    }

    pub(crate) fn or_create(&self, location_id: i64) -> Arc<DashMap<i64, V>> {
        if let Some(map) = self.get(location_id) {
            return map;
        }
        let mut locations = self.locations.write();
        locations
            .entry(location_id)
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone()
    }

    pub(crate) fn location_ids(&self) -> Vec<i64> {
        self.locations.read().keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.locations.read().values().map(|m| m.len()).sum()
    }
}
