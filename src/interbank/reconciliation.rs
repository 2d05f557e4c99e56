//! Operator Reconciliation
//!
//! A transfer lands here when the counterparty accepted `prepare` but the
//! outcome of `commit` is unknown. It stays `PENDING_REMOTE` with its
//! reservation held until an operator resolves it; nothing retries commit
//! automatically.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::error;

use super::types::TransferRecord;
use crate::core_types::{AccountNumber, TransferId};
use crate::money::Currency;

/// Log target for operator alerts and manual resolution audit lines
pub const ALERT_TARGET: &str = "interbank::reconciliation";

/// Raise an operator alert for an unresolved transfer
pub fn alert_operator(record: &TransferRecord, reason: &str) {
    error!(
        target: ALERT_TARGET,
        transfer_id = %record.transfer_id,
        from_account = %record.from_account,
        to_account = %record.to_account,
        amount = %record.amount,
        currency = %record.currency,
        reason,
        "Transfer requires manual reconciliation"
    );
}

/// Operator-facing view of an unresolved transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationEntry {
    pub transfer_id: TransferId,
    pub from_account: AccountNumber,
    pub to_account: AccountNumber,
    pub amount: Decimal,
    pub currency: Currency,
    pub prepare_acked: bool,
    pub last_error: Option<String>,
    pub created_at: i64,
    /// Millis since the last status change
    pub pending_for_ms: i64,
}

impl ReconciliationEntry {
    pub fn from_record(record: &TransferRecord, now_ms: i64) -> Self {
        Self {
            transfer_id: record.transfer_id,
            from_account: record.from_account.clone(),
            to_account: record.to_account.clone(),
            amount: record.amount,
            currency: record.currency.clone(),
            prepare_acked: record.prepare_acked,
            last_error: record.last_error.clone(),
            created_at: record.created_at,
            pending_for_ms: (now_ms - record.updated_at).max(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interbank::types::TransferRequest;
    use rust_decimal_macros::dec;

    #[test]
    fn test_entry_from_record() {
        let req = TransferRequest::new(
            AccountNumber::parse("111000100000000011").unwrap(),
            AccountNumber::parse("222000100000000099").unwrap(),
            dec!(400),
            Currency::new("RSD").unwrap(),
        );
        let mut record = TransferRecord::reserved(TransferId::new(), &req);
        record.prepare_acked = true;
        record.last_error = Some("Counterparty request timed out".into());

        let entry = ReconciliationEntry::from_record(&record, record.updated_at + 5_000);
        assert_eq!(entry.pending_for_ms, 5_000);
        assert!(entry.prepare_acked);
        assert_eq!(entry.amount, dec!(400));

        // Clock skew never yields a negative age
        let entry = ReconciliationEntry::from_record(&record, record.updated_at - 10);
        assert_eq!(entry.pending_for_ms, 0);
    }

    #[test]
    fn test_alert_target_name() {
        assert_eq!(ALERT_TARGET, "interbank::reconciliation");
    }
}
