//! Interbank Error Types

use thiserror::Error;

use crate::ledger::LedgerError;

/// Synchronous rejection reasons from `initiate` (no state was created)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Amount precision exceeds 2 decimals")]
    PrecisionOverflow,

    #[error("Source account not found")]
    SourceAccountNotFound,

    #[error("Source account is not active")]
    SourceAccountInactive,

    #[error("Source account is not held by this bank: {0}")]
    ForeignSourceAccount(String),

    #[error("Currency mismatch: account holds {account}, transfer is in {transfer}")]
    CurrencyMismatch { account: String, transfer: String },

    #[error("Insufficient available balance")]
    InsufficientFunds,

    #[error("Destination account is not at the counterparty bank: {0}")]
    MalformedDestination(String),

    #[error("Source and destination account cannot be the same")]
    SameAccount,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidAmount => "INVALID_AMOUNT",
            ValidationError::PrecisionOverflow => "PRECISION_OVERFLOW",
            ValidationError::SourceAccountNotFound => "SOURCE_ACCOUNT_NOT_FOUND",
            ValidationError::SourceAccountInactive => "SOURCE_ACCOUNT_INACTIVE",
            ValidationError::ForeignSourceAccount(_) => "FOREIGN_SOURCE_ACCOUNT",
            ValidationError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            ValidationError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ValidationError::MalformedDestination(_) => "MALFORMED_DESTINATION",
            ValidationError::SameAccount => "SAME_ACCOUNT",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ValidationError::InvalidAmount
            | ValidationError::PrecisionOverflow
            | ValidationError::MalformedDestination(_)
            | ValidationError::SameAccount => 400,
            ValidationError::SourceAccountNotFound
            | ValidationError::SourceAccountInactive
            | ValidationError::ForeignSourceAccount(_)
            | ValidationError::CurrencyMismatch { .. }
            | ValidationError::InsufficientFunds => 422,
        }
    }
}

/// Interbank error types
#[derive(Error, Debug, Clone)]
pub enum InterbankError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Queue error: {0}")]
    Queue(String),
}

impl InterbankError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            InterbankError::Validation(v) => v.code(),
            InterbankError::NotFound(_) => "TRANSFER_NOT_FOUND",
            InterbankError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            InterbankError::Storage(_) => "DATABASE_ERROR",
            InterbankError::Ledger(_) => "LEDGER_ERROR",
            InterbankError::Queue(_) => "QUEUE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            InterbankError::Validation(v) => v.http_status(),
            InterbankError::NotFound(_) => 404,
            InterbankError::InvalidStateTransition(_) => 409,
            InterbankError::Storage(_) | InterbankError::Ledger(_) => 500,
            InterbankError::Queue(_) => 503,
        }
    }
}

impl From<LedgerError> for InterbankError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds => ValidationError::InsufficientFunds.into(),
            LedgerError::AccountNotFound(_) => ValidationError::SourceAccountNotFound.into(),
            LedgerError::InvalidAmount => ValidationError::InvalidAmount.into(),
            other => InterbankError::Ledger(other),
        }
    }
}

impl From<sqlx::Error> for InterbankError {
    fn from(e: sqlx::Error) -> Self {
        InterbankError::Storage(e.to_string())
    }
}

impl From<anyhow::Error> for InterbankError {
    fn from(e: anyhow::Error) -> Self {
        InterbankError::Storage(e.to_string())
    }
}
