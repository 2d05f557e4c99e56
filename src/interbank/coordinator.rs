//! Interbank Transfer Coordinator
//!
//! Owns every transfer transition. `initiate` validates, reserves, persists
//! and schedules; `execute` runs the prepare → commit/cancel handshake once
//! the cool-down has elapsed and finalizes the ledger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::error::{InterbankError, ValidationError};
use super::gateway::CounterpartyGateway;
use super::queue::DelayBroker;
use super::reconciliation::{self, ALERT_TARGET, ReconciliationEntry};
use super::state::TransferStatus;
use super::store::TransferStore;
use super::types::{InitiateAck, Resolution, TransferRecord, TransferRequest};
use super::validation::{self, BankPrefixes};
use crate::core_types::TransferId;
use crate::ledger::{LedgerError, LedgerStore, Reservation, Settle};

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Mandatory delay between reservation and settlement
    pub cool_down: Duration,
    pub prefixes: BankPrefixes,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cool_down: Duration::from_millis(900_000),
            prefixes: BankPrefixes {
                local: "111".to_string(),
                counterparty: "222".to_string(),
            },
        }
    }
}

/// Hook run by `execute` before the counterparty is contacted
///
/// Returning `InterbankError::Validation` fails the transfer
/// (`RESERVED → FAILED_VALIDATION`, reservation released). Any other error
/// leaves the transfer untouched.
#[async_trait]
pub trait PreSettlementCheck: Send + Sync {
    async fn check(&self, record: &TransferRecord) -> Result<(), InterbankError>;
}

/// Default check: the source account still exists, is active and holds the
/// transfer currency
pub struct SourceAccountCheck {
    ledger: Arc<dyn LedgerStore>,
}

impl SourceAccountCheck {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl PreSettlementCheck for SourceAccountCheck {
    async fn check(&self, record: &TransferRecord) -> Result<(), InterbankError> {
        let account = self
            .ledger
            .account(&record.from_account)
            .await
            .map_err(InterbankError::Ledger)?;
        validation::check_source_account(account.as_ref(), &record.currency)?;
        Ok(())
    }
}

/// Interbank Transfer Coordinator
pub struct TransferCoordinator {
    ledger: Arc<dyn LedgerStore>,
    store: Arc<dyn TransferStore>,
    gateway: Arc<dyn CounterpartyGateway>,
    broker: Arc<dyn DelayBroker>,
    check: Arc<dyn PreSettlementCheck>,
    config: CoordinatorConfig,
}

impl TransferCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        store: Arc<dyn TransferStore>,
        gateway: Arc<dyn CounterpartyGateway>,
        broker: Arc<dyn DelayBroker>,
        config: CoordinatorConfig,
    ) -> Self {
        let check = Arc::new(SourceAccountCheck::new(ledger.clone()));
        Self {
            ledger,
            store,
            gateway,
            broker,
            check,
            config,
        }
    }

    /// Replace the pre-settlement check
    pub fn with_check(mut self, check: Arc<dyn PreSettlementCheck>) -> Self {
        self.check = check;
        self
    }

    // ========================================================================
    // Initiate
    // ========================================================================

    /// Validate, reserve, persist as `RESERVED`, schedule after cool-down
    ///
    /// Validation failures leave no state behind.
    pub async fn initiate(&self, req: TransferRequest) -> Result<InitiateAck, InterbankError> {
        validation::validate_request(&req, &self.config.prefixes)?;

        let source = self
            .ledger
            .account(&req.from_account)
            .await
            .map_err(InterbankError::Ledger)?;
        validation::check_source_account(source.as_ref(), &req.currency)?;

        // INITIATED: exists only in memory until the hold is taken
        let transfer_id = TransferId::new();
        debug!(
            transfer_id = %transfer_id,
            state = %TransferStatus::Initiated,
            from = %req.from_account,
            to = %req.to_account,
            amount = %req.amount,
            "Transfer validated"
        );

        self.ledger
            .reserve(&Reservation {
                transfer_id,
                account: req.from_account.clone(),
                amount: req.amount,
            })
            .await?;

        let record = TransferRecord::reserved(transfer_id, &req);
        if let Err(e) = self.store.insert(&record).await {
            error!(transfer_id = %transfer_id, error = %e, "Failed to persist transfer, releasing reservation");
            if let Err(release_err) = self.ledger.release(transfer_id).await {
                error!(
                    transfer_id = %transfer_id,
                    error = %release_err,
                    "Failed to release reservation of unpersisted transfer"
                );
            }
            return Err(e);
        }

        if let Err(e) = self
            .broker
            .publish_delayed(transfer_id, self.config.cool_down)
            .await
        {
            // Already durable as RESERVED; the recovery worker republishes it
            error!(
                transfer_id = %transfer_id,
                error = %e,
                "Delay queue publish failed, left for recovery"
            );
        }

        let execute_after = record.created_at + self.config.cool_down.as_millis() as i64;
        info!(
            transfer_id = %transfer_id,
            amount = %record.amount,
            currency = %record.currency,
            execute_after,
            "Interbank transfer reserved"
        );

        Ok(InitiateAck {
            transfer_id,
            status: TransferStatus::Reserved,
            execute_after,
        })
    }

    // ========================================================================
    // Execute
    // ========================================================================

    /// Settle a transfer after its cool-down
    ///
    /// Safe under at-least-once delivery: unknown transfers are a no-op and
    /// terminal ones only finish a ledger step left undone. Returns the status
    /// after processing, `None` if unknown.
    pub async fn execute(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<TransferStatus>, InterbankError> {
        let Some(record) = self.store.get(transfer_id).await? else {
            warn!(transfer_id = %transfer_id, "Execute for unknown transfer, discarding");
            return Ok(None);
        };

        match record.status {
            TransferStatus::Reserved => self.execute_reserved(record).await.map(Some),
            TransferStatus::PendingRemote if record.prepare_acked => {
                // Commit outcome unknown: only an operator may decide
                self.escalate(&record, "execute redelivered after prepare ack")
                    .await?;
                Ok(Some(TransferStatus::PendingRemote))
            }
            TransferStatus::PendingRemote => {
                info!(transfer_id = %transfer_id, "Resuming settlement, re-sending prepare");
                self.settle_remote(&record).await.map(Some)
            }
            status => {
                debug!(transfer_id = %transfer_id, state = %status, "Execute on settled transfer");
                self.settle_leftover_hold(&record).await?;
                Ok(Some(status))
            }
        }
    }

    async fn execute_reserved(
        &self,
        record: TransferRecord,
    ) -> Result<TransferStatus, InterbankError> {
        let transfer_id = record.transfer_id;

        match self.check.check(&record).await {
            Ok(()) => {}
            Err(InterbankError::Validation(reason)) => {
                return self.fail_validation(&record, reason).await;
            }
            Err(e) => return Err(e),
        }

        // Persist PENDING_REMOTE before calling the counterparty
        if !self
            .store
            .update_status_if(
                transfer_id,
                TransferStatus::Reserved,
                TransferStatus::PendingRemote,
            )
            .await?
        {
            return self.current_status(transfer_id).await;
        }

        let record = TransferRecord {
            status: TransferStatus::PendingRemote,
            ..record
        };
        self.settle_remote(&record).await
    }

    /// prepare → commit | cancel, with the record already `PENDING_REMOTE`
    async fn settle_remote(
        &self,
        record: &TransferRecord,
    ) -> Result<TransferStatus, InterbankError> {
        let transfer_id = record.transfer_id;
        let payload = record.payload();

        let decline_reason = match self.gateway.prepare(&payload).await {
            Ok(vote) if vote.accepted => None,
            Ok(vote) => Some(format!("Declined by counterparty: {}", vote.message)),
            Err(e) => Some(format!("Prepare failed: {}", e)),
        };

        if let Some(reason) = decline_reason {
            return self.cancel_remote(record, &reason).await;
        }

        if !self.store.mark_prepare_acked(transfer_id).await? {
            return self.current_status(transfer_id).await;
        }
        debug!(transfer_id = %transfer_id, gateway = self.gateway.name(), "Prepare acknowledged");

        if let Err(e) = self.gateway.commit(&payload).await {
            let reason = format!("Commit failed after prepare ack: {}", e);
            self.escalate(record, &reason).await?;
            return Ok(TransferStatus::PendingRemote);
        }

        // Remote side is committed; turn the hold into a debit
        if let Err(e) = self.ledger.commit(transfer_id).await {
            let reason = format!("Ledger commit failed after remote commit: {}", e);
            self.escalate(record, &reason).await?;
            return Err(InterbankError::Ledger(e));
        }

        if !self
            .store
            .update_status_if(
                transfer_id,
                TransferStatus::PendingRemote,
                TransferStatus::Committed,
            )
            .await?
        {
            return self.current_status(transfer_id).await;
        }

        info!(
            transfer_id = %transfer_id,
            amount = %record.amount,
            currency = %record.currency,
            "Interbank transfer committed"
        );
        Ok(TransferStatus::Committed)
    }

    /// Prepare declined or failed: best-effort cancel, then release
    async fn cancel_remote(
        &self,
        record: &TransferRecord,
        reason: &str,
    ) -> Result<TransferStatus, InterbankError> {
        let transfer_id = record.transfer_id;
        warn!(transfer_id = %transfer_id, reason, "Prepare not accepted, cancelling");

        if let Err(e) = self.gateway.cancel(&record.payload()).await {
            warn!(transfer_id = %transfer_id, error = %e, "Cancel failed (ignored)");
        }

        if !self
            .store
            .update_status_with_error(
                transfer_id,
                TransferStatus::PendingRemote,
                TransferStatus::Cancelled,
                reason,
            )
            .await?
        {
            return self.current_status(transfer_id).await;
        }

        self.release(transfer_id).await?;
        info!(transfer_id = %transfer_id, "Interbank transfer cancelled, funds released");
        Ok(TransferStatus::Cancelled)
    }

    async fn fail_validation(
        &self,
        record: &TransferRecord,
        reason: ValidationError,
    ) -> Result<TransferStatus, InterbankError> {
        let transfer_id = record.transfer_id;
        warn!(transfer_id = %transfer_id, reason = %reason, "Pre-settlement check failed");

        if !self
            .store
            .update_status_with_error(
                transfer_id,
                TransferStatus::Reserved,
                TransferStatus::FailedValidation,
                &reason.to_string(),
            )
            .await?
        {
            return self.current_status(transfer_id).await;
        }

        self.release(transfer_id).await?;
        Ok(TransferStatus::FailedValidation)
    }

    async fn release(&self, transfer_id: TransferId) -> Result<Settle, InterbankError> {
        self.ledger.release(transfer_id).await.map_err(|e| {
            error!(
                target: ALERT_TARGET,
                transfer_id = %transfer_id,
                error = %e,
                "Reservation release failed on a terminal transfer"
            );
            InterbankError::Ledger(e)
        })
    }

    /// Finish the ledger step of a terminal transfer whose hold is still active
    ///
    /// The status is written before the release on the cancel paths, so a
    /// failed release leaves the hold behind. Returns true if a hold was settled.
    pub(crate) async fn settle_leftover_hold(
        &self,
        record: &TransferRecord,
    ) -> Result<bool, InterbankError> {
        let transfer_id = record.transfer_id;
        let settled = match record.status {
            TransferStatus::Cancelled | TransferStatus::FailedValidation => {
                self.release(transfer_id).await?
            }
            TransferStatus::Committed => self
                .ledger
                .commit(transfer_id)
                .await
                .map_err(InterbankError::Ledger)?,
            _ => return Ok(false),
        };

        if settled == Settle::Applied {
            warn!(
                target: ALERT_TARGET,
                transfer_id = %transfer_id,
                state = %record.status,
                "Leftover reservation settled"
            );
        }
        Ok(settled == Settle::Applied)
    }

    /// Flag for reconciliation (once) and alert the operator
    async fn escalate(&self, record: &TransferRecord, reason: &str) -> Result<(), InterbankError> {
        if !record.needs_reconciliation {
            self.store
                .flag_reconciliation(record.transfer_id, reason)
                .await?;
        }
        reconciliation::alert_operator(record, reason);
        Ok(())
    }

    /// Status after losing a CAS race
    async fn current_status(
        &self,
        transfer_id: TransferId,
    ) -> Result<TransferStatus, InterbankError> {
        match self.store.get(transfer_id).await? {
            Some(r) => {
                debug!(transfer_id = %transfer_id, state = %r.status, "Concurrent transition detected");
                Ok(r.status)
            }
            None => {
                error!(transfer_id = %transfer_id, "Transfer not found after CAS failure");
                Err(InterbankError::NotFound(transfer_id.to_string()))
            }
        }
    }

    // ========================================================================
    // Operator
    // ========================================================================

    /// Operator decision for a `PENDING_REMOTE` transfer flagged for
    /// reconciliation. Never calls the counterparty.
    pub async fn resolve_manually(
        &self,
        transfer_id: TransferId,
        resolution: Resolution,
    ) -> Result<TransferRecord, InterbankError> {
        let record = self.get(transfer_id).await?;

        if record.status != TransferStatus::PendingRemote || !record.needs_reconciliation {
            return Err(InterbankError::InvalidStateTransition(format!(
                "{} is {} and not awaiting reconciliation",
                transfer_id, record.status
            )));
        }

        // The hold settles one way only, so it decides between racing
        // resolutions; the status follows the ledger
        match resolution {
            Resolution::Committed => {
                if !record.prepare_acked {
                    return Err(InterbankError::InvalidStateTransition(format!(
                        "{} was never acknowledged by the counterparty",
                        transfer_id
                    )));
                }
                resolved_hold(transfer_id, self.ledger.commit(transfer_id).await)?;
                self.transition_resolved(transfer_id, TransferStatus::Committed, None)
                    .await?;
            }
            Resolution::Cancelled => {
                resolved_hold(transfer_id, self.ledger.release(transfer_id).await)?;
                self.transition_resolved(
                    transfer_id,
                    TransferStatus::Cancelled,
                    Some("Cancelled by operator"),
                )
                .await?;
            }
        }

        warn!(
            target: ALERT_TARGET,
            transfer_id = %transfer_id,
            resolution = ?resolution,
            "Transfer resolved manually"
        );
        self.get(transfer_id).await
    }

    async fn transition_resolved(
        &self,
        transfer_id: TransferId,
        new: TransferStatus,
        error: Option<&str>,
    ) -> Result<(), InterbankError> {
        let moved = match error {
            Some(error) => {
                self.store
                    .update_status_with_error(transfer_id, TransferStatus::PendingRemote, new, error)
                    .await?
            }
            None => {
                self.store
                    .update_status_if(transfer_id, TransferStatus::PendingRemote, new)
                    .await?
            }
        };
        if !moved {
            return Err(InterbankError::InvalidStateTransition(format!(
                "{} was modified concurrently",
                transfer_id
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get(&self, transfer_id: TransferId) -> Result<TransferRecord, InterbankError> {
        self.store
            .get(transfer_id)
            .await?
            .ok_or_else(|| InterbankError::NotFound(transfer_id.to_string()))
    }

    /// Transfers awaiting operator resolution
    pub async fn pending_reconciliation(&self) -> Result<Vec<ReconciliationEntry>, InterbankError> {
        let now = chrono::Utc::now().timestamp_millis();
        Ok(self
            .store
            .pending_reconciliation()
            .await?
            .iter()
            .map(|r| ReconciliationEntry::from_record(r, now))
            .collect())
    }

    /// Access to the transfer store for the recovery worker
    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn broker(&self) -> &Arc<dyn DelayBroker> {
        &self.broker
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Re-raise the operator alert for a transfer (recovery worker)
    pub(crate) async fn realert(&self, record: &TransferRecord) -> Result<(), InterbankError> {
        let reason = record
            .last_error
            .as_deref()
            .unwrap_or("awaiting reconciliation");
        self.escalate(record, reason).await
    }
}

/// Map the ledger outcome of a manual resolution
fn resolved_hold(
    transfer_id: TransferId,
    result: Result<Settle, LedgerError>,
) -> Result<Settle, InterbankError> {
    match result {
        Ok(settled) => Ok(settled),
        Err(LedgerError::ReservationConflict(_)) => Err(InterbankError::InvalidStateTransition(
            format!("{} was already resolved the other way", transfer_id),
        )),
        Err(e) => Err(InterbankError::Ledger(e)),
    }
}
