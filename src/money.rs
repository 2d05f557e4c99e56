//! Money Module
//!
//! Conversion between client-facing strings and internal `Decimal` amounts.
//! All client amounts MUST go through [`parse_amount`] or [`validate_amount`].
//!
//! ## Design Principles
//! 1. Fixed minor-unit scale: every currency settles with 2 decimals
//! 2. Explicit Error Handling: No silent rounding or truncation
//! 3. Type Safety: currency codes are a validated newtype
//!
//! ## Usage
//! ```rust
//! use interbank_settlement::money::{format_amount, parse_amount};
//!
//! let amount = parse_amount("400.5").unwrap();
//! assert_eq!(format_amount(amount), "400.50");
//! ```

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum fractional digits accepted for any amount
pub const AMOUNT_SCALE: u32 = 2;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),
}

// ============================================================================
// Parse: Client → Internal
// ============================================================================

/// Convert a client string amount to a validated `Decimal`
///
/// # Errors
/// * `InvalidAmount` - If amount is zero or signed
/// * `PrecisionOverflow` - If input has more than [`AMOUNT_SCALE`] decimals
/// * `InvalidFormat` - If string format is invalid (".5", "5.", "1e3", ...)
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let (whole, frac) = match amount_str.split_once('.') {
        None => (amount_str, ""),
        Some((whole, frac)) => {
            // Require both sides of the dot to be non-empty
            if whole.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if frac.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (whole, frac)
        }
    };

    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(amount_str.to_string()));
    }

    if frac.len() as u32 > AMOUNT_SCALE {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: AMOUNT_SCALE,
        });
    }

    let amount = Decimal::from_str(amount_str)
        .map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;

    validate_amount(amount)
}

/// Validate an already-typed amount (e.g. from a JSON number)
pub fn validate_amount(amount: Decimal) -> Result<Decimal, MoneyError> {
    if amount <= Decimal::ZERO {
        return Err(MoneyError::InvalidAmount);
    }
    let scale = amount.normalize().scale();
    if scale > AMOUNT_SCALE {
        return Err(MoneyError::PrecisionOverflow {
            provided: scale,
            max: AMOUNT_SCALE,
        });
    }
    Ok(amount)
}

// ============================================================================
// Format: Internal → Client
// ============================================================================

/// Format an amount with exactly [`AMOUNT_SCALE`] decimals
pub fn format_amount(amount: Decimal) -> String {
    let mut value = amount.round_dp(AMOUNT_SCALE);
    value.rescale(AMOUNT_SCALE);
    value.to_string()
}

// ============================================================================
// Currency
// ============================================================================

/// Three-letter uppercase currency code (e.g. "RSD", "EUR")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let code = code.trim();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(Self(code.to_string()))
        } else {
            Err(MoneyError::InvalidCurrency(code.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}
