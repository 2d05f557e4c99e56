//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError` / `ApiResult<T>`: handler error path
//! - `error_codes`: Standard error code constants

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::interbank::{InterbankError, ValidationError};
use crate::ledger::LedgerError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

pub fn accepted<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(data))))
}

// ============================================================================
// Error Path
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::TRANSFER_NOT_FOUND, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            msg,
        )
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::<()>::error(self.code, self.msg)),
        )
            .into_response()
    }
}

impl From<InterbankError> for ApiError {
    fn from(e: InterbankError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match &e {
            InterbankError::Validation(ValidationError::InsufficientFunds) => {
                error_codes::INSUFFICIENT_BALANCE
            }
            InterbankError::Validation(
                ValidationError::SourceAccountNotFound
                | ValidationError::SourceAccountInactive
                | ValidationError::ForeignSourceAccount(_),
            ) => error_codes::ACCOUNT_UNAVAILABLE,
            InterbankError::Validation(_) => error_codes::INVALID_PARAMETER,
            InterbankError::NotFound(_) => error_codes::TRANSFER_NOT_FOUND,
            InterbankError::InvalidStateTransition(_) => error_codes::INVALID_STATE,
            InterbankError::Queue(_) => error_codes::SERVICE_UNAVAILABLE,
            InterbankError::Storage(_) | InterbankError::Ledger(_) => error_codes::INTERNAL_ERROR,
        };
        // Internal details stay in the logs
        let msg = if status.is_server_error() {
            tracing::error!(error = %e, code = e.code(), "Request failed");
            e.code().to_string()
        } else {
            format!("{}: {}", e.code(), e)
        };
        Self::new(status, code, msg)
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds => Self::new(
                StatusCode::CONFLICT,
                error_codes::INSUFFICIENT_BALANCE,
                e.to_string(),
            ),
            LedgerError::AccountNotFound(_) => Self::new(
                StatusCode::NOT_FOUND,
                error_codes::ACCOUNT_UNAVAILABLE,
                e.to_string(),
            ),
            other => {
                tracing::error!(error = %other, "Ledger operation failed");
                Self::internal("LEDGER_ERROR")
            }
        }
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const ACCOUNT_UNAVAILABLE: i32 = 1003;

    // Resource errors (4xxx)
    pub const TRANSFER_NOT_FOUND: i32 = 4001;
    pub const INVALID_STATE: i32 = 4091;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let json = serde_json::to_value(ApiResponse::success(42)).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["msg"], "ok");
        assert_eq!(json["data"], 42);

        let json = serde_json::to_value(ApiResponse::<()>::error(1001, "bad")).unwrap();
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_interbank_error_mapping() {
        let e: ApiError = InterbankError::from(ValidationError::InsufficientFunds).into();
        assert_eq!(e.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(e.code, error_codes::INSUFFICIENT_BALANCE);
        assert!(e.msg.starts_with("INSUFFICIENT_FUNDS"));

        let e: ApiError = InterbankError::NotFound("x".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e: ApiError = InterbankError::Storage("connection refused".into()).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.msg, "DATABASE_ERROR");
    }
}
