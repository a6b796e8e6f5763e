//! eve-marketwatch
//!
//! Watches the EVE Online regional market and public-contract feeds,
//! diffs every poll against in-memory state, and streams additions,
//! changes, and deletions to websocket subscribers. State lives only in
//! memory and is rebuilt by polling after a restart.

pub mod config;
pub mod esi;
pub mod market;
pub mod models;
pub mod storage;
pub mod ws;
