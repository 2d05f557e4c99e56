//! Recovery Worker
//!
//! Background worker that finds transfers the queue lost track of.
//!
//! - `RESERVED` transfers whose cool-down elapsed long ago were never
//!   executed (publish failed, process restarted): republish them straight to
//!   the process queue.
//! - `PENDING_REMOTE` transfers awaiting reconciliation: re-raise the operator
//!   alert. Commit is never retried from here.
//! - Reservations still active behind a terminal transfer (release failed
//!   after the status was written): settle them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::coordinator::TransferCoordinator;
use super::error::InterbankError;
use super::state::TransferStatus;

/// Configuration for the recovery worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale transfers
    pub scan_interval: Duration,
    /// Extra time past the cool-down before a `RESERVED` transfer counts as lost
    pub stale_grace: Duration,
    /// Maximum transfers to process per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_grace: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Outcome of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub republished: usize,
    pub realerted: usize,
    pub holds_settled: usize,
}

pub struct RecoveryWorker {
    coordinator: Arc<TransferCoordinator>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(coordinator: Arc<TransferCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    pub fn with_defaults(coordinator: Arc<TransferCoordinator>) -> Self {
        Self::new(coordinator, WorkerConfig::default())
    }

    /// Run the recovery worker loop
    ///
    /// This method runs forever, periodically scanning for stale transfers.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_grace_secs = self.config.stale_grace.as_secs(),
            "Starting interbank recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan
    pub async fn scan_and_recover(&self) -> Result<ScanReport, InterbankError> {
        let mut report = ScanReport::default();
        let store = self.coordinator.store();

        // A RESERVED record is only touched at insert, so updated_at is the
        // reservation time
        let overdue = self.coordinator.config().cool_down + self.config.stale_grace;
        let lost = store
            .find_stale(TransferStatus::Reserved, overdue, self.config.batch_size)
            .await?;

        for transfer in &lost {
            debug!(transfer_id = %transfer.transfer_id, "Republishing overdue transfer");
            match self
                .coordinator
                .broker()
                .publish_now(transfer.transfer_id)
                .await
            {
                Ok(()) => report.republished += 1,
                Err(e) => {
                    error!(
                        transfer_id = %transfer.transfer_id,
                        error = %e,
                        "Failed to republish transfer"
                    );
                }
            }
        }

        let unresolved = store.pending_reconciliation().await?;
        for transfer in unresolved
            .iter()
            .filter(|t| t.updated_at + (self.config.stale_grace.as_millis() as i64) <= now_ms())
            .take(self.config.batch_size)
        {
            if let Err(e) = self.coordinator.realert(transfer).await {
                error!(transfer_id = %transfer.transfer_id, error = %e, "Failed to re-alert");
                continue;
            }
            report.realerted += 1;
        }

        // PENDING_REMOTE without the flag and untouched for a whole grace
        // period: the process died mid-handshake
        let stuck = store
            .find_stale(
                TransferStatus::PendingRemote,
                self.config.stale_grace,
                self.config.batch_size,
            )
            .await?;
        for transfer in stuck.iter().filter(|t| !t.needs_reconciliation) {
            if transfer.prepare_acked {
                if let Err(e) = self.coordinator.realert(transfer).await {
                    error!(transfer_id = %transfer.transfer_id, error = %e, "Failed to flag transfer");
                    continue;
                }
                report.realerted += 1;
            } else {
                warn!(transfer_id = %transfer.transfer_id, "Resuming interrupted settlement");
                if self
                    .coordinator
                    .broker()
                    .publish_now(transfer.transfer_id)
                    .await
                    .is_ok()
                {
                    report.republished += 1;
                }
            }
        }

        report.holds_settled = self.settle_leftover_holds().await?;

        if report != ScanReport::default() {
            info!(
                republished = report.republished,
                realerted = report.realerted,
                holds_settled = report.holds_settled,
                "Recovery scan finished"
            );
        }
        Ok(report)
    }

    async fn settle_leftover_holds(&self) -> Result<usize, InterbankError> {
        let holds = self
            .coordinator
            .ledger()
            .stale_holds(self.config.stale_grace)
            .await
            .map_err(InterbankError::Ledger)?;

        let mut settled = 0;
        for transfer_id in holds {
            if settled >= self.config.batch_size {
                break;
            }
            let Some(record) = self.coordinator.store().get(transfer_id).await? else {
                // Either initiate is still writing the record or it failed
                // to undo its own hold; neither is safe to release blindly
                warn!(transfer_id = %transfer_id, "Active reservation without a transfer record");
                continue;
            };
            if !record.status.is_terminal() {
                continue;
            }
            match self.coordinator.settle_leftover_hold(&record).await {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(transfer_id = %transfer_id, error = %e, "Failed to settle leftover reservation");
                }
            }
        }
        Ok(settled)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.stale_grace, Duration::from_secs(60));
        assert_eq!(config.batch_size, 100);
    }
}
