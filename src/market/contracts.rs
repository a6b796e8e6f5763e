//! Public-contract polling cycles.
//!
//! Structurally the same as the order cycle, plus per-contract detail
//! fetches: the item list is immutable and fetched once when a contract
//! first appears, while auction bids are refetched every cycle because
//! they are the only part of a public contract that moves.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::orders::cycle_sleep;
use super::MarketWatch;
use crate::esi::types::{ContractHeader, FullContract};
use crate::models::{Action, Message, Payload};
use crate::ws::CONTRACT_CHANNEL;

/// Long-running contract worker for one region.
pub(crate) async fn contract_worker(watch: Arc<MarketWatch>, region_id: i32) {
    info!(region = region_id, "contract worker started");
    loop {
        match run_contract_cycle(&watch, region_id).await {
            Ok(sleep_for) => tokio::time::sleep(sleep_for).await,
            Err(e) => {
                warn!(region = region_id, error = %e, "contract cycle failed, restarting");
            }
        }
    }
}

pub(crate) async fn run_contract_cycle(watch: &MarketWatch, region_id: i32) -> Result<Duration> {
    let cycle_start = Utc::now();

    let first = watch.esi().list_region_contracts(region_id, 1).await?;
    let pages = first.pages;
    let expires = first.expires;
    let mut headers = first.items;

    let mut fetches = JoinSet::new();
    for page in 2..=pages {
        let esi = watch.esi().clone();
        fetches.spawn(async move { esi.list_region_contracts(region_id, page).await });
    }

    let mut failed_pages = 0;
    while let Some(joined) = fetches.join_next().await {
        match joined {
            Ok(Ok(page)) => headers.extend(page.items),
            Ok(Err(e)) => {
                failed_pages += 1;
                warn!(region = region_id, error = %e, "contract page fetch failed");
            }
            Err(e) => {
                failed_pages += 1;
                warn!(region = region_id, error = %e, "contract page task failed");
            }
        }
    }
    if failed_pages > 0 {
        bail!("{failed_pages} of {pages} contract pages failed");
    }

    let location_id = i64::from(region_id);
    let mut additions = Vec::new();
    let mut changes = Vec::new();
    for header in headers {
        let contract = hydrate_contract(watch, location_id, header).await;
        let (change, is_new) = watch
            .contracts
            .upsert(location_id, cycle_start, contract.clone());
        if is_new {
            additions.push(contract);
        } else if change.changed {
            changes.push(change);
        }
    }
    let deletions = watch.contracts.sweep(location_id, cycle_start);

    debug!(
        region = region_id,
        additions = additions.len(),
        changes = changes.len(),
        deletions = deletions.len(),
        "contract cycle complete"
    );

    let hub = watch.hub();
    hub.broadcast(
        CONTRACT_CHANNEL,
        Message::new(Action::Addition, Payload::Contracts(additions)),
    )
    .await;
    hub.broadcast(
        CONTRACT_CHANNEL,
        Message::new(Action::Change, Payload::ContractChanges(changes)),
    )
    .await;
    hub.broadcast(
        CONTRACT_CHANNEL,
        Message::new(Action::Deletion, Payload::ContractChanges(deletions)),
    )
    .await;

    Ok(cycle_sleep(expires, Utc::now()))
}

/// Attach detail lists to a freshly listed header. Detail failures degrade
/// to the previously stored lists so a flaky detail endpoint neither aborts
/// the cycle nor fabricates bid changes.
async fn hydrate_contract(
    watch: &MarketWatch,
    location_id: i64,
    header: ContractHeader,
) -> FullContract {
    let contract_id = header.contract_id;
    let already_stored = watch.contracts.contains(location_id, contract_id);

    let items = if already_stored {
        watch
            .contracts
            .stored_items(location_id, contract_id)
            .unwrap_or_default()
    } else if header.carries_items() {
        match watch.esi().list_contract_items(contract_id).await {
            Ok(items) => items,
            Err(e) => {
                warn!(contract = contract_id, error = %e, "contract item fetch failed");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let bids = if header.is_auction() {
        match watch.esi().list_contract_bids(contract_id).await {
            Ok(bids) => bids,
            Err(e) => {
                warn!(contract = contract_id, error = %e, "contract bid fetch failed");
                watch
                    .contracts
                    .stored_bids(location_id, contract_id)
                    .unwrap_or_default()
            }
        }
    } else {
        Vec::new()
    };

    FullContract {
        contract: header,
        items,
        bids,
    }
}
