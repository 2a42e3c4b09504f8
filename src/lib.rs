//! Lootbox randomness client
//!
//! Drives a lootbox program through the Switchboard VRF cycle from the
//! client side:
//!
//! - **Registration**: VRF record owned by the user state, queue permission,
//!   and the user state itself.
//! - **Request**: submits `request_randomness` and returns once accepted.
//! - **Waiter**: bounded subscription on the user state until the oracle's
//!   callback writes a result.
//! - **Reward**: mints the reward the callback selected.
//!
//! Every operation takes its ledger and configuration explicitly; see
//! [`LootboxClient`] for the composed cycle.

pub mod accounts;
pub mod client;
pub mod config;
pub mod error;
pub mod instructions;
pub mod ledger;
pub mod metrics;
pub mod pda;
pub mod registration;
pub mod request;
pub mod reward;
pub mod switchboard;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{CycleOutcome, LootboxClient};
pub use config::LootboxConfig;
pub use error::LootboxError;
pub use ledger::rpc::RpcLedger;
pub use ledger::LedgerClient;
