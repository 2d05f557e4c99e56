//! Transfer Store
//!
//! Durable transfer records. All status updates are atomic CAS
//! (Compare-And-Swap) on the expected prior status.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::error::InterbankError;
use super::state::TransferStatus;
use super::types::TransferRecord;
use crate::core_types::TransferId;

/// Transfer store contract used by the coordinator and the recovery worker
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &'static str;

    /// Persist a freshly reserved transfer
    ///
    /// Only `RESERVED` records are accepted; `INITIATED` is never durable.
    async fn insert(&self, record: &TransferRecord) -> Result<(), InterbankError>;

    async fn get(&self, transfer_id: TransferId) -> Result<Option<TransferRecord>, InterbankError>;

    /// Update status only if the current status matches `expected`
    ///
    /// Returns false if another writer moved the transfer first.
    /// Entering a terminal status clears `needs_reconciliation`.
    async fn update_status_if(
        &self,
        transfer_id: TransferId,
        expected: TransferStatus,
        new: TransferStatus,
    ) -> Result<bool, InterbankError>;

    /// CAS update that also records `last_error`
    async fn update_status_with_error(
        &self,
        transfer_id: TransferId,
        expected: TransferStatus,
        new: TransferStatus,
        error: &str,
    ) -> Result<bool, InterbankError>;

    /// Record a successful prepare; only valid in `PENDING_REMOTE`
    async fn mark_prepare_acked(&self, transfer_id: TransferId) -> Result<bool, InterbankError>;

    /// Flag a `PENDING_REMOTE` transfer for operator reconciliation
    async fn flag_reconciliation(
        &self,
        transfer_id: TransferId,
        error: &str,
    ) -> Result<bool, InterbankError>;

    /// Transfers in `status` not touched for at least `threshold`, oldest first
    async fn find_stale(
        &self,
        status: TransferStatus,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, InterbankError>;

    /// Transfers awaiting operator resolution, oldest first
    async fn pending_reconciliation(&self) -> Result<Vec<TransferRecord>, InterbankError>;
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// In-memory transfer store for tests and DB-less runs
#[derive(Default)]
pub struct MemoryTransferStore {
    records: DashMap<TransferId, TransferRecord>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rewind `updated_at` so a record looks stale
    #[cfg(test)]
    pub fn backdate(&self, transfer_id: TransferId, by: Duration) {
        if let Some(mut record) = self.records.get_mut(&transfer_id) {
            record.updated_at -= by.as_millis() as i64;
        }
    }

    fn cas(
        &self,
        transfer_id: TransferId,
        expected: TransferStatus,
        new: TransferStatus,
        error: Option<&str>,
    ) -> bool {
        let Some(mut record) = self.records.get_mut(&transfer_id) else {
            return false;
        };
        if record.status != expected {
            return false;
        }
        record.status = new;
        if new.is_terminal() {
            record.needs_reconciliation = false;
        }
        if let Some(error) = error {
            record.last_error = Some(error.to_string());
        }
        record.updated_at = now_ms();
        true
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: &TransferRecord) -> Result<(), InterbankError> {
        if record.status != TransferStatus::Reserved {
            return Err(InterbankError::InvalidStateTransition(format!(
                "insert in {} (expected RESERVED)",
                record.status
            )));
        }
        match self.records.entry(record.transfer_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(InterbankError::Storage(format!(
                "Duplicate transfer id {}",
                record.transfer_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, transfer_id: TransferId) -> Result<Option<TransferRecord>, InterbankError> {
        Ok(self.records.get(&transfer_id).map(|r| r.clone()))
    }

    async fn update_status_if(
        &self,
        transfer_id: TransferId,
        expected: TransferStatus,
        new: TransferStatus,
    ) -> Result<bool, InterbankError> {
        Ok(self.cas(transfer_id, expected, new, None))
    }

    async fn update_status_with_error(
        &self,
        transfer_id: TransferId,
        expected: TransferStatus,
        new: TransferStatus,
        error: &str,
    ) -> Result<bool, InterbankError> {
        Ok(self.cas(transfer_id, expected, new, Some(error)))
    }

    async fn mark_prepare_acked(&self, transfer_id: TransferId) -> Result<bool, InterbankError> {
        let Some(mut record) = self.records.get_mut(&transfer_id) else {
            return Ok(false);
        };
        if record.status != TransferStatus::PendingRemote {
            return Ok(false);
        }
        record.prepare_acked = true;
        record.updated_at = now_ms();
        Ok(true)
    }

    async fn flag_reconciliation(
        &self,
        transfer_id: TransferId,
        error: &str,
    ) -> Result<bool, InterbankError> {
        let Some(mut record) = self.records.get_mut(&transfer_id) else {
            return Ok(false);
        };
        if record.status != TransferStatus::PendingRemote {
            return Ok(false);
        }
        record.needs_reconciliation = true;
        record.last_error = Some(error.to_string());
        record.updated_at = now_ms();
        Ok(true)
    }

    async fn find_stale(
        &self,
        status: TransferStatus,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, InterbankError> {
        let cutoff = now_ms() - threshold.as_millis() as i64;
        let mut stale: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| r.status == status && r.updated_at <= cutoff)
            .map(|r| r.clone())
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn pending_reconciliation(&self) -> Result<Vec<TransferRecord>, InterbankError> {
        let mut pending: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| r.status == TransferStatus::PendingRemote && r.needs_reconciliation)
            .map(|r| r.clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::AccountNumber;
    use crate::interbank::types::TransferRequest;
    use crate::money::Currency;
    use rust_decimal_macros::dec;

    fn record() -> TransferRecord {
        let req = TransferRequest::new(
            AccountNumber::parse("111000100000000011").unwrap(),
            AccountNumber::parse("222000100000000099").unwrap(),
            dec!(400),
            Currency::new("RSD").unwrap(),
        );
        TransferRecord::reserved(TransferId::new(), &req)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryTransferStore::new();
        let r = record();
        store.insert(&r).await.unwrap();
        assert_eq!(store.get(r.transfer_id).await.unwrap(), Some(r.clone()));
        assert!(store.insert(&r).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_rejects_non_reserved() {
        let store = MemoryTransferStore::new();
        let mut r = record();
        r.status = TransferStatus::Initiated;
        assert!(matches!(
            store.insert(&r).await,
            Err(InterbankError::InvalidStateTransition(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cas_only_from_expected() {
        let store = MemoryTransferStore::new();
        let r = record();
        store.insert(&r).await.unwrap();
        let id = r.transfer_id;

        assert!(
            store
                .update_status_if(id, TransferStatus::Reserved, TransferStatus::PendingRemote)
                .await
                .unwrap()
        );
        // Second writer loses
        assert!(
            !store
                .update_status_if(id, TransferStatus::Reserved, TransferStatus::PendingRemote)
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_status_if(TransferId::new(), TransferStatus::Reserved, TransferStatus::PendingRemote)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_reconciliation_flag_cleared_on_terminal() {
        let store = MemoryTransferStore::new();
        let r = record();
        store.insert(&r).await.unwrap();
        let id = r.transfer_id;

        // Not flaggable before PENDING_REMOTE
        assert!(!store.flag_reconciliation(id, "commit timeout").await.unwrap());
        assert!(!store.mark_prepare_acked(id).await.unwrap());

        store
            .update_status_if(id, TransferStatus::Reserved, TransferStatus::PendingRemote)
            .await
            .unwrap();
        assert!(store.mark_prepare_acked(id).await.unwrap());
        assert!(store.flag_reconciliation(id, "commit timeout").await.unwrap());
        assert_eq!(store.pending_reconciliation().await.unwrap().len(), 1);

        store
            .update_status_if(id, TransferStatus::PendingRemote, TransferStatus::Committed)
            .await
            .unwrap();
        let r = store.get(id).await.unwrap().unwrap();
        assert!(!r.needs_reconciliation);
        assert!(r.prepare_acked);
        assert_eq!(r.last_error.as_deref(), Some("commit timeout"));
        assert!(store.pending_reconciliation().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_stale() {
        let store = MemoryTransferStore::new();
        let fresh = record();
        let old = record();
        store.insert(&fresh).await.unwrap();
        store.insert(&old).await.unwrap();
        store.backdate(old.transfer_id, Duration::from_secs(120));

        let stale = store
            .find_stale(TransferStatus::Reserved, Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].transfer_id, old.transfer_id);

        let none = store
            .find_stale(TransferStatus::PendingRemote, Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
