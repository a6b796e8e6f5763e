//! Contract state and the contract differ.

use chrono::{DateTime, Utc};

use super::LocationIndex;
use crate::esi::types::{ContractBid, ContractItem, FullContract};
use crate::models::ContractChange;

/// Stored contract plus the poll-cycle timestamp that last observed it.
#[derive(Debug, Clone)]
pub struct Contract {
    pub touched: DateTime<Utc>,
    pub contract: FullContract,
}

/// Per-location public-contract state.
pub struct ContractStore {
    index: LocationIndex<Contract>,
}

impl Default for ContractStore {
    fn default() -> Self {
        Self::new()
    }
}

fn total_bid_amount(contract: &FullContract) -> f64 {
    contract.bids.iter().map(|b| b.amount).sum()
}

impl ContractStore {
    pub fn new() -> Self {
        Self {
            index: LocationIndex::new(),
        }
    }

    pub fn ensure(&self, location_id: i64) {
        self.index.ensure(location_id);
    }

    /// True when the contract is already stored at this location. Used to
    /// skip re-fetching the immutable item list.
    pub fn contains(&self, location_id: i64, contract_id: i32) -> bool {
        self.index
            .get(location_id)
            .map(|m| m.contains_key(&i64::from(contract_id)))
            .unwrap_or(false)
    }

    /// Item list recorded for a stored contract, if any.
    pub fn stored_items(&self, location_id: i64, contract_id: i32) -> Option<Vec<ContractItem>> {
        let map = self.index.get(location_id)?;
        map.get(&i64::from(contract_id))
            .map(|c| c.contract.items.clone())
    }

    /// Bid list recorded for a stored contract, if any.
    pub fn stored_bids(&self, location_id: i64, contract_id: i32) -> Option<Vec<ContractBid>> {
        let map = self.index.get(location_id)?;
        map.get(&i64::from(contract_id))
            .map(|c| c.contract.bids.clone())
    }

    /// Store a freshly polled contract. The header is immutable for public
    /// contracts, so a change means the bid side moved: a different bid
    /// count or a different total bid amount. The emitted change carries
    /// the pre-update price and bid list.
    pub fn upsert(
        &self,
        location_id: i64,
        touched: DateTime<Utc>,
        contract: FullContract,
    ) -> (ContractChange, bool) {
        let map = self.index.or_create(location_id);

        let mut change = ContractChange {
            contract_id: contract.contract.contract_id,
            location_id: contract.contract.start_location_id,
            expired: false,
            changed: false,
            bids: Vec::new(),
            price: 0.0,
            time_changed: Utc::now(),
        };

        let result = match map.entry(i64::from(contract.contract.contract_id)) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let stored = entry.get();
                let bids_moved = stored.contract.bids.len() != contract.bids.len()
                    || total_bid_amount(&stored.contract) != total_bid_amount(&contract);
                if bids_moved {
                    change.changed = true;
                    change.price = stored.contract.contract.price;
                    change.bids = stored.contract.bids.clone();
                }
                entry.insert(Contract { touched, contract });
                (change, false)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Contract { touched, contract });
                (change, true)
            }
        };
        result
    }

    /// Remove and report every contract the latest listing no longer
    /// carries. Deletions distinguish natural expiry from disappearance
    /// through the `expired` flag.
    pub fn sweep(&self, location_id: i64, cutoff: DateTime<Utc>) -> Vec<ContractChange> {
        let Some(map) = self.index.get(location_id) else {
            return Vec::new();
        };

        let now = Utc::now();
        let mut deletions = Vec::new();
        for entry in map.iter() {
            let stored = entry.value();
            if stored.touched < cutoff {
                deletions.push(ContractChange {
                    contract_id: stored.contract.contract.contract_id,
                    location_id: stored.contract.contract.start_location_id,
                    expired: stored.contract.contract.date_expired < now,
                    changed: true,
                    bids: stored.contract.bids.clone(),
                    price: stored.contract.contract.price,
                    time_changed: now,
                });
            }
        }
        for deletion in &deletions {
            map.remove(&i64::from(deletion.contract_id));
        }
        deletions
    }

    pub fn location_ids(&self) -> Vec<i64> {
        self.index.location_ids()
    }

    /// All contracts at one location, for snapshot replay.
    pub fn dump_location(&self, location_id: i64) -> Vec<FullContract> {
        match self.index.get(location_id) {
            Some(map) => map.iter().map(|e| e.value().contract.clone()).collect(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esi::types::{ContractBid, ContractHeader};
    use chrono::TimeZone;

    const LOCATION: i64 = 10000002;

    fn bid(id: i32, amount: f64) -> ContractBid {
        ContractBid {
            bid_id: id,
            amount,
            date_bid: Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap(),
        }
    }

    fn contract(id: i32, expires_in_hours: i64, bids: Vec<ContractBid>) -> FullContract {
        FullContract {
            contract: ContractHeader {
                contract_id: id,
                type_: "auction".to_string(),
                issuer_id: 90000001,
                issuer_corporation_id: 98000001,
                for_corporation: false,
                date_issued: Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap(),
                date_expired: Utc::now() + chrono::Duration::hours(expires_in_hours),
                start_location_id: 60003760,
                end_location_id: 0,
                price: 5000.0,
                reward: 0.0,
                collateral: 0.0,
                buyout: 100_000.0,
                volume: 10.0,
                days_to_complete: 0,
                title: "auction lot".to_string(),
            },
            items: Vec::new(),
            bids,
        }
    }

    fn cycle(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap() + chrono::Duration::minutes(n)
    }

    #[test]
    fn first_observation_is_new() {
        let store = ContractStore::new();
        let (change, is_new) = store.upsert(LOCATION, cycle(0), contract(7, 48, vec![]));
        assert!(is_new);
        assert!(!change.changed);
        assert!(store.contains(LOCATION, 7));
    }

    #[test]
    fn new_bid_reports_previous_state() {
        let store = ContractStore::new();
        store.upsert(LOCATION, cycle(0), contract(7, 48, vec![bid(1, 1000.0)]));

        let fresh = contract(7, 48, vec![bid(1, 1000.0), bid(2, 1500.0)]);
        let (change, is_new) = store.upsert(LOCATION, cycle(1), fresh);
        assert!(!is_new);
        assert!(change.changed);
        assert_eq!(change.price, 5000.0);
        assert_eq!(change.bids.len(), 1);
        assert_eq!(change.bids[0].bid_id, 1);
    }

    #[test]
    fn bid_amount_change_with_same_count_is_detected() {
        let store = ContractStore::new();
        store.upsert(LOCATION, cycle(0), contract(7, 48, vec![bid(1, 1000.0)]));

        let (change, _) = store.upsert(LOCATION, cycle(1), contract(7, 48, vec![bid(1, 1800.0)]));
        assert!(change.changed);
    }

    #[test]
    fn identical_replay_is_silent_but_refreshes_touch() {
        let store = ContractStore::new();
        store.upsert(LOCATION, cycle(0), contract(7, 48, vec![bid(1, 1000.0)]));

        let (change, is_new) = store.upsert(LOCATION, cycle(1), contract(7, 48, vec![bid(1, 1000.0)]));
        assert!(!is_new);
        assert!(!change.changed);
        assert!(store.sweep(LOCATION, cycle(1)).is_empty());
    }

    #[test]
    fn sweep_flags_natural_expiry() {
        let store = ContractStore::new();
        store.upsert(LOCATION, cycle(0), contract(7, -1, vec![bid(1, 1000.0)]));
        store.upsert(LOCATION, cycle(0), contract(8, 48, vec![]));

        let deletions = store.sweep(LOCATION, cycle(1));
        assert_eq!(deletions.len(), 2);

        let aged_out = deletions.iter().find(|d| d.contract_id == 7).unwrap();
        assert!(aged_out.expired);
        assert_eq!(aged_out.price, 5000.0);
        assert_eq!(aged_out.bids.len(), 1);

        let vanished = deletions.iter().find(|d| d.contract_id == 8).unwrap();
        assert!(!vanished.expired);
        assert!(store.is_empty());
    }

    #[test]
    fn stored_items_survive_upsert() {
        let store = ContractStore::new();
        let mut with_items = contract(7, 48, vec![]);
        with_items.items = vec![ContractItem {
            record_id: 1,
            type_id: 587,
            quantity: 2,
            is_included: true,
        }];
        store.upsert(LOCATION, cycle(0), with_items);

        let items = store.stored_items(LOCATION, 7).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].type_id, 587);
        assert!(store.stored_items(LOCATION, 99).is_none());
    }
}
