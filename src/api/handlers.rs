//! HTTP handlers
//!
//! Client endpoints (initiate / status), operator endpoints (reconciliation,
//! dead letters) and the inbound counterparty protocol.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::AppState;
use super::response::{ApiError, ApiResult, accepted, ok};
use crate::core_types::{AccountNumber, TransferId};
use crate::interbank::queue::DeadLetter;
use crate::interbank::{
    InitiateAck, PrepareVote, ReconciliationEntry, Resolution, SettlementPayload, TransferRecord,
    TransferRequest, ValidationError,
};
use crate::ledger::Settle;
use crate::money::{self, Currency, MoneyError};

// ============================================================================
// Request / Response DTOs
// ============================================================================

/// Client transfer request; amount is a decimal string ("400.00")
#[derive(Debug, Clone, Deserialize)]
pub struct InitiateTransferBody {
    pub from_account: String,
    pub to_account: String,
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub payment_code: Option<String>,
}

impl InitiateTransferBody {
    fn into_request(self) -> Result<TransferRequest, ApiError> {
        let from_account = AccountNumber::parse(&self.from_account)
            .map_err(|e| ApiError::bad_request(format!("from_account: {}", e)))?;
        let to_account = AccountNumber::parse(&self.to_account).map_err(|e| {
            ApiError::from(crate::interbank::InterbankError::from(
                ValidationError::MalformedDestination(e.to_string()),
            ))
        })?;
        let amount = money::parse_amount(&self.amount).map_err(|e| match e {
            MoneyError::PrecisionOverflow { .. } => {
                ApiError::from(crate::interbank::InterbankError::from(
                    ValidationError::PrecisionOverflow,
                ))
            }
            MoneyError::InvalidAmount => ApiError::from(crate::interbank::InterbankError::from(
                ValidationError::InvalidAmount,
            )),
            other => ApiError::bad_request(format!("amount: {}", other)),
        })?;
        let currency = Currency::new(&self.currency)
            .map_err(|e| ApiError::bad_request(format!("currency: {}", e)))?;

        let mut req = TransferRequest::new(from_account, to_account, amount, currency);
        if let Some(purpose) = self.purpose {
            req = req.with_purpose(purpose);
        }
        if let Some(reference) = self.reference_number {
            req = req.with_reference(reference);
        }
        if let Some(code) = self.payment_code {
            req = req.with_payment_code(code);
        }
        Ok(req)
    }
}

/// Transfer view with amounts formatted to two decimals
#[derive(Debug, Serialize)]
pub struct TransferView {
    pub transfer_id: TransferId,
    pub from_account: AccountNumber,
    pub to_account: AccountNumber,
    pub amount: String,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_code: Option<String>,
    pub status: String,
    pub needs_reconciliation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<TransferRecord> for TransferView {
    fn from(r: TransferRecord) -> Self {
        Self {
            transfer_id: r.transfer_id,
            from_account: r.from_account,
            to_account: r.to_account,
            amount: money::format_amount(r.amount),
            currency: r.currency,
            purpose: r.purpose,
            reference_number: r.reference_number,
            payment_code: r.payment_code,
            status: r.status.as_str().to_string(),
            needs_reconciliation: r.needs_reconciliation,
            last_error: r.last_error,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub resolution: Resolution,
}

#[derive(Debug, Serialize)]
pub struct InboundAck {
    pub transfer_id: TransferId,
    /// False when the command had already been applied
    pub applied: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    pub transfer_store: &'static str,
    pub ledger: &'static str,
}

fn parse_transfer_id(raw: &str) -> Result<TransferId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("Invalid transfer ID format"))
}

// ============================================================================
// Client Endpoints
// ============================================================================

/// POST /api/v1/interbank/transfers
pub async fn initiate_transfer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InitiateTransferBody>,
) -> ApiResult<InitiateAck> {
    let req = body.into_request()?;
    let ack = state.coordinator.initiate(req).await?;
    accepted(ack)
}

/// GET /api/v1/interbank/transfers/{transfer_id}
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Path(transfer_id): Path<String>,
) -> ApiResult<TransferView> {
    let transfer_id = parse_transfer_id(&transfer_id)?;
    let record = state.coordinator.get(transfer_id).await?;
    ok(record.into())
}

// ============================================================================
// Operator Endpoints
// ============================================================================

/// GET /api/v1/interbank/reconciliation
pub async fn list_reconciliation(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<ReconciliationEntry>> {
    ok(state.coordinator.pending_reconciliation().await?)
}

/// POST /api/v1/interbank/reconciliation/{transfer_id}/resolve
pub async fn resolve_transfer(
    State(state): State<Arc<AppState>>,
    Path(transfer_id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> ApiResult<TransferView> {
    let transfer_id = parse_transfer_id(&transfer_id)?;
    let record = state
        .coordinator
        .resolve_manually(transfer_id, body.resolution)
        .await?;
    ok(record.into())
}

/// GET /api/v1/interbank/dead-letters
pub async fn list_dead_letters(State(state): State<Arc<AppState>>) -> ApiResult<Vec<DeadLetter>> {
    ok(state.coordinator.broker().dead_letters())
}

/// GET /api/v1/health
///
/// 503 when the database is configured but unreachable; no details leak.
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    if let Some(db) = &state.db
        && let Err(e) = db.health_check().await
    {
        tracing::warn!(error = %e, "Health check: database unreachable");
        return ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            super::response::error_codes::SERVICE_UNAVAILABLE,
            "unavailable",
        )
        .into_err();
    }

    ok(HealthResponse {
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        transfer_store: state.coordinator.store().name(),
        ledger: state.ledger_name,
    })
}

// ============================================================================
// Inbound Counterparty Protocol
// ============================================================================

/// POST /api/interbank/prepare
///
/// Answers with a bare vote, not the envelope: the caller is another bank.
pub async fn inbound_prepare(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SettlementPayload>,
) -> Result<Json<PrepareVote>, ApiError> {
    Ok(Json(state.inbound.prepare(&payload).await?))
}

/// POST /api/interbank/commit
pub async fn inbound_commit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SettlementPayload>,
) -> Result<(StatusCode, Json<InboundAck>), ApiError> {
    let settled = state.inbound.commit(&payload).await?;
    Ok((
        StatusCode::OK,
        Json(InboundAck {
            transfer_id: payload.transfer_id,
            applied: settled == Settle::Applied,
        }),
    ))
}

/// POST /api/interbank/cancel
pub async fn inbound_cancel(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SettlementPayload>,
) -> Result<(StatusCode, Json<InboundAck>), ApiError> {
    let settled = state.inbound.cancel(&payload).await?;
    Ok((
        StatusCode::OK,
        Json(InboundAck {
            transfer_id: payload.transfer_id,
            applied: settled == Settle::Applied,
        }),
    ))
}
