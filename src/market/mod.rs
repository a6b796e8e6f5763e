//! Market polling core.
//!
//! One long-running worker per eligible region for orders and another for
//! public contracts, all feeding the shared stores and the broadcast hub.
//! Player structures discovered in the order feed get their own
//! authenticated polling when credentials are configured.

pub mod contracts;
pub mod orders;
pub mod structures;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::esi::{EsiClient, StaticTokenSource, TokenSource};
use crate::models::{Action, Message, Payload};
use crate::storage::{ContractStore, OrderStore};
use crate::ws::{HubHandle, RegisterCallback, CONTRACT_CHANNEL, MARKET_CHANNEL};
use orders::OrderFeed;
use structures::StructureStore;

/// Region ids at or above this belong to transient wormhole space, whose
/// markets are always empty.
const TRANSIENT_REGION_FLOOR: i32 = 11_000_000;

/// The polling core: upstream client, state stores, and the hub handle the
/// workers publish through.
pub struct MarketWatch {
    esi: EsiClient,
    pub orders: Arc<OrderStore>,
    pub contracts: Arc<ContractStore>,
    pub structures: Arc<StructureStore>,
    hub: HubHandle,
    wormhole_region_id: i32,
    token_source: Option<Arc<dyn TokenSource>>,
}

impl MarketWatch {
    pub fn new(esi: EsiClient, hub: HubHandle, cfg: &Config) -> Self {
        let token_source: Option<Arc<dyn TokenSource>> = if cfg.esi.authenticated() {
            Some(Arc::new(StaticTokenSource::new(cfg.esi.refresh_token.clone())))
        } else {
            None
        };

        Self {
            esi,
            orders: Arc::new(OrderStore::new()),
            contracts: Arc::new(ContractStore::new()),
            structures: Arc::new(StructureStore::new()),
            hub,
            wormhole_region_id: cfg.wormhole_region_id,
            token_source,
        }
    }

    /// Swap in a different token source, e.g. a real SSO refresher wired up
    /// by the embedding application.
    pub fn with_token_source(mut self, token_source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(token_source);
        self
    }

    pub(crate) fn esi(&self) -> &EsiClient {
        &self.esi
    }

    pub(crate) fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub(crate) fn token_source(&self) -> Option<&Arc<dyn TokenSource>> {
        self.token_source.as_ref()
    }

    /// Whether a region is worth a worker: everything in regular space,
    /// plus the one persistent wormhole region with a market.
    pub fn watchable_region(&self, region_id: i32) -> bool {
        region_id < TRANSIENT_REGION_FLOOR || region_id == self.wormhole_region_id
    }

    /// Fetch the region directory and spawn the per-region workers. Fails
    /// only on the initial directory fetch; the caller treats that as
    /// fatal.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let regions = self
            .esi
            .list_regions()
            .await
            .context("fetching region directory")?;
        info!(regions = regions.len(), "region directory loaded");

        for &region_id in &regions {
            self.orders.ensure(i64::from(region_id));
            self.contracts.ensure(i64::from(region_id));
        }

        let mut workers = 0;
        for &region_id in &regions {
            if !self.watchable_region(region_id) {
                continue;
            }
            workers += 1;
            tokio::spawn(orders::market_worker(Arc::clone(&self), region_id));
            tokio::spawn(contracts::contract_worker(Arc::clone(&self), region_id));
        }
        info!(workers, "region workers started");

        if self.token_source.is_some() {
            tokio::spawn(structures::structure_worker(Arc::clone(&self)));
        } else {
            warn!("no authenticated identity configured; structure polling disabled");
        }

        Ok(())
    }

    /// Run a single market poll cycle for one region. Returns how long to
    /// sleep before the next cycle.
    pub async fn poll_market_once(&self, region_id: i32) -> Result<Duration> {
        orders::run_order_cycle(self, &OrderFeed::Region(region_id)).await
    }

    /// Run a single authenticated poll cycle for one player structure.
    pub async fn poll_structure_once(&self, structure_id: i64, token: &str) -> Result<Duration> {
        let feed = OrderFeed::Structure {
            structure_id,
            token: token.to_string(),
        };
        orders::run_order_cycle(self, &feed).await
    }

    /// Run a single public-contract poll cycle for one region.
    pub async fn poll_contracts_once(&self, region_id: i32) -> Result<Duration> {
        contracts::run_contract_cycle(self, region_id).await
    }
}

/// On-connect snapshot replay for the market channel: one addition message
/// per non-empty location, so no single giant allocation is built.
pub fn order_snapshot_callback(store: Arc<OrderStore>) -> RegisterCallback {
    Box::new(move |subscriptions: &HashSet<String>, queue| {
        if !subscriptions.contains(MARKET_CHANNEL) {
            return true;
        }
        for location_id in store.location_ids() {
            let orders = store.dump_location(location_id);
            if orders.is_empty() {
                continue;
            }
            let message = Message::new(Action::Addition, Payload::Orders(orders));
            if queue.try_send(Arc::new(message)).is_err() {
                return false;
            }
        }
        true
    })
}

/// On-connect snapshot replay for the contract channel.
pub fn contract_snapshot_callback(store: Arc<ContractStore>) -> RegisterCallback {
    Box::new(move |subscriptions: &HashSet<String>, queue| {
        if !subscriptions.contains(CONTRACT_CHANNEL) {
            return true;
        }
        for location_id in store.location_ids() {
            let contracts = store.dump_location(location_id);
            if contracts.is_empty() {
                continue;
            }
            let message = Message::new(Action::Addition, Payload::Contracts(contracts));
            if queue.try_send(Arc::new(message)).is_err() {
                return false;
            }
        }
        true
    })
}
