//! Ledger Store
//!
//! Durable account records with reservation holds.
//!
//! # Balance Model
//!
//! ```text
//! available_balance = balance - Σ(active reservations)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Conditional Mutation**: `reserve` is an atomic "decrement available if
//!    sufficient"; no read-modify-write without a guard
//! 2. **Exactly Once**: a reservation is keyed by transfer id and is either
//!    committed (balance debit) or released (available restored), never both
//! 3. **Non-negative**: available balance never drops below zero

pub mod db;
pub mod memory;

pub use db::PgLedgerStore;
pub use memory::MemoryLedger;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::{AccountNumber, TransferId};
use crate::money::Currency;

/// Account owner kind
///
/// Personal and company accounts share every ledger field; the kind travels
/// alongside them instead of selecting a separate record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    Personal,
    Company,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Personal => "PERSONAL",
            AccountKind::Company => "COMPANY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PERSONAL" => Some(AccountKind::Personal),
            "COMPANY" => Some(AccountKind::Company),
            _ => None,
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(AccountStatus::Active),
            "INACTIVE" => Some(AccountStatus::Inactive),
            _ => None,
        }
    }
}

/// Account ledger entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub number: AccountNumber,
    pub kind: AccountKind,
    pub status: AccountStatus,
    pub currency: Currency,
    pub balance: Decimal,
    pub available_balance: Decimal,
    /// Informational only; limits are enforced by the payments service
    pub daily_limit: Option<Decimal>,
    pub monthly_limit: Option<Decimal>,
}

impl Account {
    /// Open an active account with no holds
    pub fn new(number: AccountNumber, kind: AccountKind, currency: Currency, balance: Decimal) -> Self {
        Self {
            number,
            kind,
            status: AccountStatus::Active,
            currency,
            balance,
            available_balance: balance,
            daily_limit: None,
            monthly_limit: None,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Sum of outstanding reservations
    #[inline]
    pub fn reserved(&self) -> Decimal {
        self.balance - self.available_balance
    }
}

/// A hold against available balance, keyed by transfer id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub transfer_id: TransferId,
    pub account: AccountNumber,
    pub amount: Decimal,
}

/// Result of a one-shot settlement command (commit/release/credit/revert)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// The command mutated balances
    Applied,
    /// Already applied earlier for this transfer id (or nothing to apply)
    AlreadySettled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Insufficient available balance")]
    InsufficientFunds,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Reservation conflict for transfer {0}")]
    ReservationConflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

/// Ledger store contract consumed by the settlement coordinator
///
/// Every mutation is atomic and conditionally applied per account.
/// Settlement commands are idempotent per transfer id.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &'static str;

    /// Look up an account
    async fn account(&self, number: &AccountNumber) -> Result<Option<Account>, LedgerError>;

    /// Place a hold: decrement available balance if sufficient
    ///
    /// Re-reserving an identical reservation is a no-op.
    /// Returns `InsufficientFunds` without side effects otherwise.
    async fn reserve(&self, reservation: &Reservation) -> Result<(), LedgerError>;

    /// Turn the reservation into a real balance debit
    async fn commit(&self, transfer_id: TransferId) -> Result<Settle, LedgerError>;

    /// Return the reserved amount to available balance
    async fn release(&self, transfer_id: TransferId) -> Result<Settle, LedgerError>;

    /// Credit an incoming interbank amount (balance and available)
    async fn credit(
        &self,
        transfer_id: TransferId,
        account: &AccountNumber,
        amount: Decimal,
    ) -> Result<Settle, LedgerError>;

    /// Undo a previous `credit` for the transfer id, if funds are still there
    async fn revert_credit(&self, transfer_id: TransferId) -> Result<Settle, LedgerError>;

    /// Transfer ids of holds still active after `older_than`, oldest first
    async fn stale_holds(&self, older_than: Duration) -> Result<Vec<TransferId>, LedgerError>;
}
