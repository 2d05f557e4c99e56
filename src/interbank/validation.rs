//! Transfer Request Validation
//!
//! Stateless checks run before any reservation is taken. Checks that need
//! the source account (existence, status, currency) live in
//! [`check_source_account`] so the pre-settlement check can reuse them.

use rust_decimal::Decimal;

use super::error::ValidationError;
use super::types::TransferRequest;
use crate::ledger::Account;
use crate::money::{self, MoneyError};

/// Bank prefixes used to classify account numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankPrefixes {
    /// Prefix of accounts held by this bank
    pub local: String,
    /// Prefix of accounts held by the counterparty bank
    pub counterparty: String,
}

/// Validate the parts of a request that need no account lookup
pub fn validate_request(
    req: &TransferRequest,
    prefixes: &BankPrefixes,
) -> Result<(), ValidationError> {
    validate_amount(req.amount)?;

    if req.from_account == req.to_account {
        return Err(ValidationError::SameAccount);
    }

    if !req.from_account.is_held_by(&prefixes.local) {
        return Err(ValidationError::ForeignSourceAccount(
            req.from_account.to_string(),
        ));
    }

    if !req.to_account.is_held_by(&prefixes.counterparty) {
        return Err(ValidationError::MalformedDestination(
            req.to_account.to_string(),
        ));
    }

    Ok(())
}

/// Validate a transfer amount (strictly positive, at most 2 decimals)
pub fn validate_amount(amount: Decimal) -> Result<(), ValidationError> {
    match money::validate_amount(amount) {
        Ok(_) => Ok(()),
        Err(MoneyError::PrecisionOverflow { .. }) => Err(ValidationError::PrecisionOverflow),
        Err(_) => Err(ValidationError::InvalidAmount),
    }
}

/// Source account must exist, be active, and hold the transfer currency
pub fn check_source_account(
    account: Option<&Account>,
    req_currency: &money::Currency,
) -> Result<(), ValidationError> {
    let account = account.ok_or(ValidationError::SourceAccountNotFound)?;

    if !account.is_active() {
        return Err(ValidationError::SourceAccountInactive);
    }

    if &account.currency != req_currency {
        return Err(ValidationError::CurrencyMismatch {
            account: account.currency.to_string(),
            transfer: req_currency.to_string(),
        });
    }

    Ok(())
}
