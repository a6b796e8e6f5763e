//! Player-structure discovery and authenticated polling.
//!
//! Structures are market locations that only exist at runtime: they show
//! up as location ids in the public order feed. Their own order books are
//! behind authentication, so the worker here only runs when an identity is
//! configured; otherwise the registry still tracks what was discovered.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use super::MarketWatch;
use crate::esi::types::MarketOrder;

/// Location ids at or above this belong to player structures rather than
/// NPC stations.
pub const PLAYER_STRUCTURE_ID_FLOOR: i64 = 1_000_000_000_000;

/// Fallback poll interval when no structure reported a cache window.
const STRUCTURE_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// A market structure discovered from the public order feed.
#[derive(Debug, Clone, Serialize)]
pub struct Structure {
    pub structure_id: i64,
    pub region_id: i32,
    pub first_seen: DateTime<Utc>,
    pub last_polled: Option<DateTime<Utc>>,
}

/// Registry of every structure seen so far. Entries are never removed;
/// a structure that stops trading simply stops producing orders.
pub struct StructureStore {
    inner: DashMap<i64, Structure>,
}

impl Default for StructureStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureStore {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Record the structure behind an order's location, if it is one.
    pub fn observe(&self, order: &MarketOrder, region_id: i32) {
        if order.location_id < PLAYER_STRUCTURE_ID_FLOOR {
            return;
        }
        self.inner
            .entry(order.location_id)
            .or_insert_with(|| Structure {
                structure_id: order.location_id,
                region_id,
                first_seen: Utc::now(),
                last_polled: None,
            });
    }

    pub fn ids(&self) -> Vec<i64> {
        self.inner.iter().map(|e| *e.key()).collect()
    }

    pub fn mark_polled(&self, structure_id: i64, at: DateTime<Utc>) {
        if let Some(mut entry) = self.inner.get_mut(&structure_id) {
            entry.last_polled = Some(at);
        }
    }

    pub fn get(&self, structure_id: i64) -> Option<Structure> {
        self.inner.get(&structure_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Poll every known structure's market under the configured identity.
/// Runs as a single task; each structure gets the same cycle machinery as
/// a region, keyed by its structure id.
pub(crate) async fn structure_worker(watch: Arc<MarketWatch>) {
    info!("structure worker started");
    loop {
        let token = watch
            .token_source()
            .and_then(|source| source.bearer_token());
        let Some(token) = token else {
            warn!("bearer token unavailable, structure polling idle");
            tokio::time::sleep(STRUCTURE_POLL_INTERVAL).await;
            continue;
        };

        let mut next_wakeup: Option<Duration> = None;
        for structure_id in watch.structures.ids() {
            let polled_at = Utc::now();
            match watch.poll_structure_once(structure_id, &token).await {
                Ok(sleep_for) => {
                    watch.structures.mark_polled(structure_id, polled_at);
                    next_wakeup = Some(match next_wakeup {
                        Some(current) => current.min(sleep_for),
                        None => sleep_for,
                    });
                }
                Err(e) => {
                    warn!(structure = structure_id, error = %e, "structure cycle failed");
                }
            }
        }

        tokio::time::sleep(next_wakeup.unwrap_or(STRUCTURE_POLL_INTERVAL)).await;
    }
}
