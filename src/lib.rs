//! Interbank Settlement Service
//!
//! Delayed two-phase settlement of transfers to a counterparty bank.
//!
//! # Modules
//!
//! - [`core_types`] - Transfer id and account number
//! - [`money`] - Amount parsing/formatting and currency codes
//! - [`ledger`] - Account balances and reservation holds
//! - [`interbank`] - Transfer FSM, delay queue, gateway, recovery
//! - [`api`] - HTTP surface
//! - [`config`] / [`config_watcher`] / [`logging`] / [`db`] - Ambient plumbing

// Core types - must be first!
pub mod core_types;
pub mod money;

pub mod api;
pub mod config;
pub mod config_watcher;
pub mod db;
pub mod interbank;
pub mod ledger;
pub mod logging;

// Convenient re-exports at crate root
pub use core_types::{AccountNumber, TransferId};
pub use interbank::{InterbankError, TransferCoordinator, TransferStatus};
pub use ledger::{LedgerError, LedgerStore};
