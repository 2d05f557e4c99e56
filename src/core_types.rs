//! Core types used throughout the system
//!
//! Identifiers shared by the ledger and the interbank settlement modules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transfer ID - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed between API instances
/// - 128-bit with good entropy
///
/// Also serves as the reservation key in the ledger and the idempotency key
/// towards the counterparty bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    /// Generate a new unique TransferId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for TransferId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TransferId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Number of digits in a bank account number
pub const ACCOUNT_NUMBER_LEN: usize = 18;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Malformed account number: {0}")]
pub struct AccountNumberError(pub String);

/// Bank account number
///
/// # Invariants
/// - Exactly 18 ASCII digits
/// - The first three digits identify the holding bank
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

impl AccountNumber {
    pub fn parse(raw: &str) -> Result<Self, AccountNumberError> {
        let raw = raw.trim();
        if raw.len() != ACCOUNT_NUMBER_LEN || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AccountNumberError(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Three-digit code of the bank holding this account
    pub fn bank_prefix(&self) -> &str {
        &self.0[..3]
    }

    /// Whether this account is held by the bank with the given prefix
    pub fn is_held_by(&self, bank_prefix: &str) -> bool {
        self.bank_prefix() == bank_prefix
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountNumber {
    type Err = AccountNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = AccountNumberError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountNumber> for String {
    fn from(value: AccountNumber) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_id_roundtrip() {
        let id = TransferId::new();
        let parsed: TransferId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_transfer_id_json() {
        let id = TransferId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: TransferId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_account_number_parse() {
        let acc = AccountNumber::parse("111000100000000011").unwrap();
        assert_eq!(acc.bank_prefix(), "111");
        assert!(acc.is_held_by("111"));
        assert!(!acc.is_held_by("222"));

        assert!(AccountNumber::parse("").is_err());
        assert!(AccountNumber::parse("11100010000000001").is_err()); // 17 digits
        assert!(AccountNumber::parse("11100010000000001A").is_err());
    }

    #[test]
    fn test_account_number_serde_rejects_malformed() {
        let ok: Result<AccountNumber, _> = serde_json::from_str("\"222000100000000011\"");
        assert!(ok.is_ok());
        let bad: Result<AccountNumber, _> = serde_json::from_str("\"abc\"");
        assert!(bad.is_err());
    }
}
