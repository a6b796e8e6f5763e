//! Order polling cycles.
//!
//! One cycle fetches every page of a feed, runs the differ against the
//! store, publishes the resulting batches, and reports how long to sleep
//! until the upstream cache window reopens. Regional feeds and
//! authenticated structure feeds share the same cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::MarketWatch;
use crate::esi::types::MarketOrder;
use crate::esi::{EsiClient, PagedResponse};
use crate::models::{Action, Message, Payload};
use crate::ws::MARKET_CHANNEL;

/// Sleep when the cache-expiry header is missing or already in the past.
pub(crate) const DEFAULT_CYCLE_SLEEP: Duration = Duration::from_secs(10);

/// Padding past the cache expiry so the next fetch lands on fresh data.
const CACHE_GRACE: Duration = Duration::from_secs(15);

/// Where a cycle's orders come from.
#[derive(Clone)]
pub(crate) enum OrderFeed {
    Region(i32),
    Structure { structure_id: i64, token: String },
}

impl OrderFeed {
    /// Store shard this feed writes into.
    fn location_id(&self) -> i64 {
        match self {
            OrderFeed::Region(region_id) => i64::from(*region_id),
            OrderFeed::Structure { structure_id, .. } => *structure_id,
        }
    }

    /// Region to attribute newly discovered structures to.
    fn discovery_region(&self) -> Option<i32> {
        match self {
            OrderFeed::Region(region_id) => Some(*region_id),
            OrderFeed::Structure { .. } => None,
        }
    }

    async fn fetch(&self, esi: &EsiClient, page: i32) -> Result<PagedResponse<Vec<MarketOrder>>> {
        match self {
            OrderFeed::Region(region_id) => esi.list_region_orders(*region_id, page).await,
            OrderFeed::Structure {
                structure_id,
                token,
            } => esi.list_structure_orders(*structure_id, page, token).await,
        }
    }
}

/// Long-running market worker for one region. Failed cycles restart
/// immediately; partial data never reaches the differ.
pub(crate) async fn market_worker(watch: Arc<MarketWatch>, region_id: i32) {
    info!(region = region_id, "market worker started");
    let feed = OrderFeed::Region(region_id);
    loop {
        match run_order_cycle(&watch, &feed).await {
            Ok(sleep_for) => tokio::time::sleep(sleep_for).await,
            Err(e) => {
                warn!(region = region_id, error = %e, "market cycle failed, restarting");
            }
        }
    }
}

/// One full poll cycle: fan out all pages, diff, publish, report the sleep
/// until the cache window reopens.
pub(crate) async fn run_order_cycle(watch: &MarketWatch, feed: &OrderFeed) -> Result<Duration> {
    let cycle_start = Utc::now();

    let first = feed.fetch(watch.esi(), 1).await?;
    let pages = first.pages;
    let expires = first.expires;
    let mut orders = first.items;

    let mut fetches = JoinSet::new();
    for page in 2..=pages {
        let feed = feed.clone();
        let esi = watch.esi().clone();
        fetches.spawn(async move { feed.fetch(&esi, page).await });
    }

    let mut failed_pages = 0;
    while let Some(joined) = fetches.join_next().await {
        match joined {
            Ok(Ok(page)) => orders.extend(page.items),
            Ok(Err(e)) => {
                failed_pages += 1;
                warn!(location = feed.location_id(), error = %e, "order page fetch failed");
            }
            Err(e) => {
                failed_pages += 1;
                warn!(location = feed.location_id(), error = %e, "order page task failed");
            }
        }
    }
    if failed_pages > 0 {
        // An incomplete listing must be discarded whole: missing pages
        // would otherwise surface as spurious deletions.
        bail!("{failed_pages} of {pages} order pages failed");
    }

    let location_id = feed.location_id();
    let mut additions = Vec::new();
    let mut changes = Vec::new();
    for order in orders {
        if let Some(region_id) = feed.discovery_region() {
            watch.structures.observe(&order, region_id);
        }
        let (change, is_new) = watch.orders.upsert(location_id, cycle_start, order.clone());
        if is_new {
            additions.push(order);
        } else if change.changed {
            changes.push(change);
        }
    }
    let deletions = watch.orders.sweep(location_id, cycle_start);

    debug!(
        location = location_id,
        additions = additions.len(),
        changes = changes.len(),
        deletions = deletions.len(),
        "order cycle complete"
    );

    let hub = watch.hub();
    hub.broadcast(
        MARKET_CHANNEL,
        Message::new(Action::Addition, Payload::Orders(additions)),
    )
    .await;
    hub.broadcast(
        MARKET_CHANNEL,
        Message::new(Action::Change, Payload::OrderChanges(changes)),
    )
    .await;
    hub.broadcast(
        MARKET_CHANNEL,
        Message::new(Action::Deletion, Payload::OrderChanges(deletions)),
    )
    .await;

    Ok(cycle_sleep(expires, Utc::now()))
}

/// Sleep until the upstream cache window reopens, plus a little. A missing
/// or stale expiry falls back to a short fixed nap.
pub(crate) fn cycle_sleep(expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    match expires {
        Some(at) => {
            let until = at - now;
            if until <= chrono::Duration::zero() {
                DEFAULT_CYCLE_SLEEP
            } else {
                until.to_std().unwrap_or(Duration::ZERO) + CACHE_GRACE
            }
        }
        None => DEFAULT_CYCLE_SLEEP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_expiry_uses_the_floor() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert_eq!(cycle_sleep(None, now), DEFAULT_CYCLE_SLEEP);
    }

    #[test]
    fn stale_expiry_uses_the_floor() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let expired = now - chrono::Duration::seconds(30);
        assert_eq!(cycle_sleep(Some(expired), now), DEFAULT_CYCLE_SLEEP);
        assert_eq!(cycle_sleep(Some(now), now), DEFAULT_CYCLE_SLEEP);
    }

    #[test]
    fn future_expiry_adds_grace() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let expires = now + chrono::Duration::seconds(300);
        assert_eq!(cycle_sleep(Some(expires), now), Duration::from_secs(315));
    }
}
