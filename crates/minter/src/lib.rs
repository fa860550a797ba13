//! Minter of an ERC20 bridge.
//!
//! Deposits made through the helper contract on Ethereum are scraped from its logs
//! and credited to internal balances. Users move balances between each other and
//! withdraw them to Ethereum addresses through EIP-1559 transactions signed by the
//! minter. Every state change is an event appended to a durable log, from which the
//! state is rebuilt on restart.

pub mod address;
pub mod api;
pub mod blocklist;
pub mod client;
pub mod config;
pub mod deposit;
pub mod endpoints;
pub mod eth_logs;
pub mod guard;
pub mod identity;
pub mod lifecycle;
pub mod map;
pub mod metrics;
pub mod minter;
pub mod network;
pub mod numeric;
pub mod retry;
pub mod rpc;
pub mod service;
pub mod state;
pub mod storage;
pub mod tx;
pub mod users;
pub mod withdraw;

pub use client::VaultClient;
pub use config::MinterConfig;
pub use minter::{Minter, MinterError};

#[cfg(test)]
mod tests;
