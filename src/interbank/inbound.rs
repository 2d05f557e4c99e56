//! Inbound Settlement
//!
//! The counterparty-facing side of the handshake: another bank calls our
//! prepare / commit / cancel to move funds into a local account. Credits are
//! keyed by the sender's transfer id, so repeated commits or cancels apply
//! once.

use std::sync::Arc;

use tracing::{info, warn};

use super::types::{PrepareVote, SettlementPayload};
use super::validation;
use crate::ledger::{LedgerError, LedgerStore, Settle};

pub struct InboundSettlement {
    ledger: Arc<dyn LedgerStore>,
    local_prefix: String,
}

impl InboundSettlement {
    pub fn new(ledger: Arc<dyn LedgerStore>, local_prefix: impl Into<String>) -> Self {
        Self {
            ledger,
            local_prefix: local_prefix.into(),
        }
    }

    /// Vote on an incoming transfer without moving funds
    ///
    /// Accepts only when the recipient is a local, active account in the
    /// transfer currency. Currency conversion is not offered.
    pub async fn prepare(&self, payload: &SettlementPayload) -> Result<PrepareVote, LedgerError> {
        if validation::validate_amount(payload.amount).is_err() {
            return Ok(PrepareVote::decline("Invalid amount"));
        }

        if !payload.to_account.is_held_by(&self.local_prefix) {
            return Ok(PrepareVote::decline("Recipient account is not held by this bank"));
        }

        let recipient = match self.ledger.account(&payload.to_account).await? {
            Some(account) if account.is_active() => account,
            _ => {
                return Ok(PrepareVote::decline(
                    "Recipient account does not exist or is inactive",
                ));
            }
        };

        if recipient.currency != payload.currency {
            return Ok(PrepareVote::decline(
                "Recipient currency does not match the transfer currency",
            ));
        }

        info!(
            transfer_id = %payload.transfer_id,
            to_account = %payload.to_account,
            amount = %payload.amount,
            "Inbound transfer prepared"
        );
        Ok(PrepareVote::accept(payload.amount, payload.currency.clone()))
    }

    /// Credit the recipient
    pub async fn commit(&self, payload: &SettlementPayload) -> Result<Settle, LedgerError> {
        let settled = self
            .ledger
            .credit(payload.transfer_id, &payload.to_account, payload.amount)
            .await?;

        match settled {
            Settle::Applied => info!(
                transfer_id = %payload.transfer_id,
                to_account = %payload.to_account,
                amount = %payload.amount,
                "Inbound transfer credited"
            ),
            Settle::AlreadySettled => {
                info!(transfer_id = %payload.transfer_id, "Inbound commit already applied")
            }
        }
        Ok(settled)
    }

    /// Undo a credit, if one was applied and the funds are still there
    pub async fn cancel(&self, payload: &SettlementPayload) -> Result<Settle, LedgerError> {
        match self.ledger.revert_credit(payload.transfer_id).await {
            Ok(settled) => {
                info!(transfer_id = %payload.transfer_id, result = ?settled, "Inbound transfer cancelled");
                Ok(settled)
            }
            Err(e) => {
                warn!(
                    transfer_id = %payload.transfer_id,
                    to_account = %payload.to_account,
                    error = %e,
                    "Inbound cancel could not revert credit"
                );
                Err(e)
            }
        }
    }
}
