//! In-memory Ledger Store
//!
//! `DashMap`-backed implementation used by tests and database-less runs.
//! Each conditional update happens under the account's shard write lock,
//! which makes `reserve` an atomic "decrement if sufficient".

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::{Account, LedgerError, LedgerStore, Reservation, Settle};
use crate::core_types::{AccountNumber, TransferId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldState {
    Active,
    Committed,
    Released,
}

#[derive(Debug, Clone)]
struct Hold {
    account: AccountNumber,
    amount: Decimal,
    state: HoldState,
    /// Unix millis
    created_at: i64,
}

#[derive(Debug, Clone)]
struct Credit {
    account: AccountNumber,
    amount: Decimal,
    reverted: bool,
}

/// In-memory ledger
#[derive(Default)]
pub struct MemoryLedger {
    accounts: DashMap<AccountNumber, Account>,
    holds: DashMap<TransferId, Hold>,
    credits: DashMap<TransferId, Credit>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account
    pub fn open_account(&self, account: Account) -> Result<(), LedgerError> {
        match self.accounts.entry(account.number.clone()) {
            Entry::Occupied(e) => Err(LedgerError::AccountExists(e.key().to_string())),
            Entry::Vacant(e) => {
                e.insert(account);
                Ok(())
            }
        }
    }

    /// Mutate an account in place (test hook for status/currency changes)
    pub fn update_account<F: FnOnce(&mut Account)>(
        &self,
        number: &AccountNumber,
        f: F,
    ) -> Result<(), LedgerError> {
        let mut account = self
            .accounts
            .get_mut(number)
            .ok_or_else(|| LedgerError::AccountNotFound(number.to_string()))?;
        f(&mut *account);
        Ok(())
    }

    /// Number of reservations not yet committed or released
    pub fn active_reservations(&self) -> usize {
        self.holds
            .iter()
            .filter(|h| h.state == HoldState::Active)
            .count()
    }

    /// Settle an active hold exactly once; `apply` mutates the account
    fn settle_hold<F>(
        &self,
        transfer_id: TransferId,
        next: HoldState,
        apply: F,
    ) -> Result<Settle, LedgerError>
    where
        F: FnOnce(&mut Account, Decimal),
    {
        // Hold entry lock is taken first, account lock second, everywhere.
        let mut hold = match self.holds.get_mut(&transfer_id) {
            Some(h) => h,
            None => {
                debug!(transfer_id = %transfer_id, "No reservation to settle");
                return Ok(Settle::AlreadySettled);
            }
        };

        if hold.state != HoldState::Active {
            if hold.state != next {
                warn!(
                    transfer_id = %transfer_id,
                    state = ?hold.state,
                    requested = ?next,
                    "Reservation already settled the other way"
                );
                return Err(LedgerError::ReservationConflict(transfer_id.to_string()));
            }
            return Ok(Settle::AlreadySettled);
        }

        let mut account = self
            .accounts
            .get_mut(&hold.account)
            .ok_or_else(|| LedgerError::AccountNotFound(hold.account.to_string()))?;

        apply(&mut *account, hold.amount);
        hold.state = next;
        Ok(Settle::Applied)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn account(&self, number: &AccountNumber) -> Result<Option<Account>, LedgerError> {
        Ok(self.accounts.get(number).map(|a| a.clone()))
    }

    async fn reserve(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        if reservation.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let hold = match self.holds.entry(reservation.transfer_id) {
            Entry::Occupied(e) => {
                let existing = e.get();
                return if existing.account == reservation.account
                    && existing.amount == reservation.amount
                {
                    Ok(())
                } else {
                    Err(LedgerError::ReservationConflict(
                        reservation.transfer_id.to_string(),
                    ))
                };
            }
            Entry::Vacant(e) => e,
        };

        let mut account = self
            .accounts
            .get_mut(&reservation.account)
            .ok_or_else(|| LedgerError::AccountNotFound(reservation.account.to_string()))?;

        if account.available_balance < reservation.amount {
            return Err(LedgerError::InsufficientFunds);
        }
        account.available_balance -= reservation.amount;

        hold.insert(Hold {
            account: reservation.account.clone(),
            amount: reservation.amount,
            state: HoldState::Active,
            created_at: chrono::Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    async fn commit(&self, transfer_id: TransferId) -> Result<Settle, LedgerError> {
        self.settle_hold(transfer_id, HoldState::Committed, |account, amount| {
            account.balance -= amount;
        })
    }

    async fn release(&self, transfer_id: TransferId) -> Result<Settle, LedgerError> {
        self.settle_hold(transfer_id, HoldState::Released, |account, amount| {
            account.available_balance += amount;
        })
    }

    async fn credit(
        &self,
        transfer_id: TransferId,
        account: &AccountNumber,
        amount: Decimal,
    ) -> Result<Settle, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let credit = match self.credits.entry(transfer_id) {
            Entry::Occupied(_) => return Ok(Settle::AlreadySettled),
            Entry::Vacant(e) => e,
        };

        let mut target = self
            .accounts
            .get_mut(account)
            .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))?;
        target.balance += amount;
        target.available_balance += amount;

        credit.insert(Credit {
            account: account.clone(),
            amount,
            reverted: false,
        });
        Ok(Settle::Applied)
    }

    async fn revert_credit(&self, transfer_id: TransferId) -> Result<Settle, LedgerError> {
        let mut credit = match self.credits.get_mut(&transfer_id) {
            Some(c) => c,
            None => return Ok(Settle::AlreadySettled),
        };
        if credit.reverted {
            return Ok(Settle::AlreadySettled);
        }

        let mut target = self
            .accounts
            .get_mut(&credit.account)
            .ok_or_else(|| LedgerError::AccountNotFound(credit.account.to_string()))?;

        if target.available_balance < credit.amount {
            return Err(LedgerError::InsufficientFunds);
        }
        target.balance -= credit.amount;
        target.available_balance -= credit.amount;
        credit.reverted = true;
        Ok(Settle::Applied)
    }

    async fn stale_holds(&self, older_than: Duration) -> Result<Vec<TransferId>, LedgerError> {
        let cutoff = chrono::Utc::now().timestamp_millis() - older_than.as_millis() as i64;
        let mut stale: Vec<(i64, TransferId)> = self
            .holds
            .iter()
            .filter(|h| h.state == HoldState::Active && h.created_at <= cutoff)
            .map(|h| (h.created_at, *h.key()))
            .collect();
        stale.sort();
        Ok(stale.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AccountKind;
    use crate::money::Currency;
    use rust_decimal_macros::dec;

    fn acc(n: &str) -> AccountNumber {
        AccountNumber::parse(n).unwrap()
    }

    fn ledger_with(balance: Decimal) -> (MemoryLedger, AccountNumber) {
        let ledger = MemoryLedger::new();
        let number = acc("111000100000000011");
        ledger
            .open_account(Account::new(
                number.clone(),
                AccountKind::Personal,
                Currency::new("RSD").unwrap(),
                balance,
            ))
            .unwrap();
        (ledger, number)
    }

    fn hold(id: TransferId, account: &AccountNumber, amount: Decimal) -> Reservation {
        Reservation {
            transfer_id: id,
            account: account.clone(),
            amount,
        }
    }

    #[tokio::test]
    async fn test_reserve_and_commit() {
        let (ledger, number) = ledger_with(dec!(1000));
        let id = TransferId::new();

        ledger.reserve(&hold(id, &number, dec!(400))).await.unwrap();
        let a = ledger.account(&number).await.unwrap().unwrap();
        assert_eq!(a.balance, dec!(1000));
        assert_eq!(a.available_balance, dec!(600));
        assert_eq!(a.reserved(), dec!(400));

        assert_eq!(ledger.commit(id).await.unwrap(), Settle::Applied);
        let a = ledger.account(&number).await.unwrap().unwrap();
        assert_eq!(a.balance, dec!(600));
        assert_eq!(a.available_balance, dec!(600));

        // Exactly once
        assert_eq!(ledger.commit(id).await.unwrap(), Settle::AlreadySettled);
        let a = ledger.account(&number).await.unwrap().unwrap();
        assert_eq!(a.balance, dec!(600));
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let (ledger, number) = ledger_with(dec!(1000));
        let id = TransferId::new();

        ledger.reserve(&hold(id, &number, dec!(400))).await.unwrap();
        assert_eq!(ledger.release(id).await.unwrap(), Settle::Applied);
        assert_eq!(ledger.release(id).await.unwrap(), Settle::AlreadySettled);

        let a = ledger.account(&number).await.unwrap().unwrap();
        assert_eq!(a.balance, dec!(1000));
        assert_eq!(a.available_balance, dec!(1000));
        assert_eq!(ledger.active_reservations(), 0);
    }

    #[tokio::test]
    async fn test_commit_after_release_conflicts() {
        let (ledger, number) = ledger_with(dec!(1000));
        let id = TransferId::new();

        ledger.reserve(&hold(id, &number, dec!(100))).await.unwrap();
        ledger.release(id).await.unwrap();
        assert!(matches!(
            ledger.commit(id).await,
            Err(LedgerError::ReservationConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_funds_no_side_effect() {
        let (ledger, number) = ledger_with(dec!(300));
        let id = TransferId::new();

        let result = ledger.reserve(&hold(id, &number, dec!(301))).await;
        assert_eq!(result, Err(LedgerError::InsufficientFunds));

        let a = ledger.account(&number).await.unwrap().unwrap();
        assert_eq!(a.available_balance, dec!(300));
        assert_eq!(ledger.active_reservations(), 0);
        // No hold was recorded, so a later release is a no-op
        assert_eq!(ledger.release(id).await.unwrap(), Settle::AlreadySettled);
    }

    #[tokio::test]
    async fn test_reserve_idempotent_per_transfer() {
        let (ledger, number) = ledger_with(dec!(1000));
        let id = TransferId::new();

        ledger.reserve(&hold(id, &number, dec!(400))).await.unwrap();
        ledger.reserve(&hold(id, &number, dec!(400))).await.unwrap();
        let a = ledger.account(&number).await.unwrap().unwrap();
        assert_eq!(a.available_balance, dec!(600));

        assert!(matches!(
            ledger.reserve(&hold(id, &number, dec!(10))).await,
            Err(LedgerError::ReservationConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_reserve_unknown_account() {
        let ledger = MemoryLedger::new();
        let result = ledger
            .reserve(&hold(TransferId::new(), &acc("111000100000000099"), dec!(1)))
            .await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_overdraw() {
        let (ledger, number) = ledger_with(dec!(1000));
        let ledger = std::sync::Arc::new(ledger);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            let number = number.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .reserve(&hold(TransferId::new(), &number, dec!(300)))
                    .await
                    .is_ok()
            }));
        }

        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 3);
        let a = ledger.account(&number).await.unwrap().unwrap();
        assert_eq!(a.available_balance, dec!(100));
    }

    #[tokio::test]
    async fn test_credit_and_revert() {
        let (ledger, number) = ledger_with(dec!(50));
        let id = TransferId::new();

        assert_eq!(ledger.credit(id, &number, dec!(25)).await.unwrap(), Settle::Applied);
        assert_eq!(
            ledger.credit(id, &number, dec!(25)).await.unwrap(),
            Settle::AlreadySettled
        );
        let a = ledger.account(&number).await.unwrap().unwrap();
        assert_eq!(a.balance, dec!(75));
        assert_eq!(a.available_balance, dec!(75));

        assert_eq!(ledger.revert_credit(id).await.unwrap(), Settle::Applied);
        assert_eq!(ledger.revert_credit(id).await.unwrap(), Settle::AlreadySettled);
        let a = ledger.account(&number).await.unwrap().unwrap();
        assert_eq!(a.balance, dec!(50));
    }

    #[tokio::test]
    async fn test_stale_holds_lists_active_only() {
        let (ledger, number) = ledger_with(dec!(1000));
        let (committed, released, active) = (TransferId::new(), TransferId::new(), TransferId::new());
        for id in [committed, released, active] {
            ledger.reserve(&hold(id, &number, dec!(100))).await.unwrap();
        }
        ledger.commit(committed).await.unwrap();
        ledger.release(released).await.unwrap();

        assert_eq!(ledger.stale_holds(Duration::ZERO).await.unwrap(), vec![active]);
        assert!(
            ledger
                .stale_holds(Duration::from_secs(3600))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
