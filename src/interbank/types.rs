//! Interbank Transfer Core Types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::TransferStatus;
use crate::core_types::{AccountNumber, TransferId};
use crate::money::Currency;

/// Transfer request as submitted by the orchestration caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account: AccountNumber,
    /// Destination at the counterparty bank
    pub to_account: AccountNumber,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub reference_number: Option<String>,
    /// Payment code, e.g. "289"
    #[serde(default)]
    pub payment_code: Option<String>,
}

impl TransferRequest {
    pub fn new(
        from_account: AccountNumber,
        to_account: AccountNumber,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        Self {
            from_account,
            to_account,
            amount,
            currency,
            purpose: None,
            reference_number: None,
            payment_code: None,
        }
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_reference(mut self, reference_number: impl Into<String>) -> Self {
        self.reference_number = Some(reference_number.into());
        self
    }

    pub fn with_payment_code(mut self, payment_code: impl Into<String>) -> Self {
        self.payment_code = Some(payment_code.into());
        self
    }
}

/// Durable transfer record (`interbank_transfers_tb`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub from_account: AccountNumber,
    pub to_account: AccountNumber,
    pub amount: Decimal,
    pub currency: Currency,
    pub purpose: Option<String>,
    pub reference_number: Option<String>,
    pub payment_code: Option<String>,
    pub status: TransferStatus,
    /// Durable marker: the counterparty accepted `prepare`
    pub prepare_acked: bool,
    /// Commit outcome unknown, operator must resolve
    pub needs_reconciliation: bool,
    pub last_error: Option<String>,
    /// Unix millis
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransferRecord {
    /// Build the record for a freshly reserved transfer
    pub fn reserved(transfer_id: TransferId, req: &TransferRequest) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            transfer_id,
            from_account: req.from_account.clone(),
            to_account: req.to_account.clone(),
            amount: req.amount,
            currency: req.currency.clone(),
            purpose: req.purpose.clone(),
            reference_number: req.reference_number.clone(),
            payment_code: req.payment_code.clone(),
            status: TransferStatus::Reserved,
            prepare_acked: false,
            needs_reconciliation: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Wire payload sent to the counterparty
    pub fn payload(&self) -> SettlementPayload {
        SettlementPayload {
            transfer_id: self.transfer_id,
            from_account: self.from_account.clone(),
            to_account: self.to_account.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            purpose: self.purpose.clone(),
            reference_number: self.reference_number.clone(),
            payment_code: self.payment_code.clone(),
        }
    }
}

/// Returned by `initiate`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiateAck {
    pub transfer_id: TransferId,
    pub status: TransferStatus,
    /// Unix millis after which the transfer will be settled
    pub execute_after: i64,
}

/// Prepare/commit/cancel payload, both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementPayload {
    pub transfer_id: TransferId,
    pub from_account: AccountNumber,
    pub to_account: AccountNumber,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_code: Option<String>,
}

/// Counterparty answer to `prepare`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareVote {
    pub accepted: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
}

impl PrepareVote {
    pub fn accept(final_amount: Decimal, currency: Currency) -> Self {
        Self {
            accepted: true,
            message: "Ready to commit".to_string(),
            final_amount: Some(final_amount),
            currency: Some(currency),
        }
    }

    pub fn decline(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
            final_amount: None,
            currency: None,
        }
    }
}

/// Operator decision for a transfer whose commit outcome is unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Counterparty confirmed it committed: debit the reservation
    Committed,
    /// Counterparty confirmed it did not commit: release the reservation
    Cancelled,
}

impl Resolution {
    pub fn target_status(&self) -> TransferStatus {
        match self {
            Resolution::Committed => TransferStatus::Committed,
            Resolution::Cancelled => TransferStatus::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> TransferRequest {
        TransferRequest::new(
            AccountNumber::parse("111000100000000011").unwrap(),
            AccountNumber::parse("222000100000000099").unwrap(),
            dec!(400),
            Currency::new("RSD").unwrap(),
        )
        .with_purpose("rent")
    }

    #[test]
    fn test_reserved_record() {
        let id = TransferId::new();
        let record = TransferRecord::reserved(id, &request());
        assert_eq!(record.status, TransferStatus::Reserved);
        assert!(!record.prepare_acked);
        assert!(!record.needs_reconciliation);
        assert_eq!(record.purpose.as_deref(), Some("rent"));
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_payload_wire_format() {
        let record = TransferRecord::reserved(TransferId::new(), &request());
        let json = serde_json::to_value(record.payload()).unwrap();
        assert_eq!(json["amount"], "400");
        assert_eq!(json["currency"], "RSD");
        assert_eq!(json["to_account"], "222000100000000099");
        assert!(json.get("reference_number").is_none());
    }

    #[test]
    fn test_payload_carries_payment_code() {
        let req = request().with_reference("97-0001").with_payment_code("289");
        let record = TransferRecord::reserved(TransferId::new(), &req);
        let json = serde_json::to_value(record.payload()).unwrap();
        assert_eq!(json["payment_code"], "289");
        assert_eq!(json["reference_number"], "97-0001");

        // Older senders omit it
        let payload: SettlementPayload = serde_json::from_value(serde_json::json!({
            "transfer_id": record.transfer_id.to_string(),
            "from_account": "111000100000000011",
            "to_account": "222000100000000099",
            "amount": "400",
            "currency": "RSD"
        }))
        .unwrap();
        assert_eq!(payload.payment_code, None);
    }

    #[test]
    fn test_prepare_vote_parsing() {
        let vote: PrepareVote =
            serde_json::from_str(r#"{"accepted":false,"message":"inactive"}"#).unwrap();
        assert_eq!(vote, PrepareVote::decline("inactive"));

        let vote: PrepareVote = serde_json::from_str(
            r#"{"accepted":true,"message":"ok","final_amount":"400.00","currency":"RSD"}"#,
        )
        .unwrap();
        assert!(vote.accepted);
        assert_eq!(vote.final_amount, Some(dec!(400)));
    }

    #[test]
    fn test_resolution_target() {
        assert_eq!(Resolution::Committed.target_status(), TransferStatus::Committed);
        let r: Resolution = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(r.target_status(), TransferStatus::Cancelled);
    }
}
