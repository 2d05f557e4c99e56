//! Interbank Transfer State Definitions
//!
//! State IDs are stable and stored as SMALLINT in PostgreSQL.

use std::fmt;

use serde::{Serialize, Serializer};

/// Interbank transfer FSM states
///
/// Terminal states: COMMITTED (30), CANCELLED (-10), FAILED_VALIDATION (-20)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferStatus {
    /// Request accepted, funds not yet held (never persisted)
    Initiated = 0,

    /// Funds held, waiting out the cool-down window
    Reserved = 10,

    /// Counterparty contacted (persist-before-call)
    /// CRITICAL: Must eventually reach COMMITTED or CANCELLED
    PendingRemote = 20,

    /// Terminal: counterparty committed, reservation debited
    Committed = 30,

    /// Terminal: counterparty declined/unreachable, reservation released
    Cancelled = -10,

    /// Terminal: pre-settlement check failed, no remote contact
    FailedValidation = -20,
}

impl TransferStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Committed
                | TransferStatus::Cancelled
                | TransferStatus::FailedValidation
        )
    }

    /// Check if funds are still held by a reservation
    #[inline]
    pub fn holds_funds(&self) -> bool {
        matches!(
            self,
            TransferStatus::Reserved | TransferStatus::PendingRemote
        )
    }

    /// Allowed forward transitions; the machine is one-directional
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Initiated, Reserved)
                | (Reserved, PendingRemote)
                | (Reserved, FailedValidation)
                | (PendingRemote, Committed)
                | (PendingRemote, Cancelled)
        )
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStatus::Initiated),
            10 => Some(TransferStatus::Reserved),
            20 => Some(TransferStatus::PendingRemote),
            30 => Some(TransferStatus::Committed),
            -10 => Some(TransferStatus::Cancelled),
            -20 => Some(TransferStatus::FailedValidation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Initiated => "INITIATED",
            TransferStatus::Reserved => "RESERVED",
            TransferStatus::PendingRemote => "PENDING_REMOTE",
            TransferStatus::Committed => "COMMITTED",
            TransferStatus::Cancelled => "CANCELLED",
            TransferStatus::FailedValidation => "FAILED_VALIDATION",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferStatus::from_id(value).ok_or(())
    }
}

impl Serialize for TransferStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TransferStatus; 6] = [
        TransferStatus::Initiated,
        TransferStatus::Reserved,
        TransferStatus::PendingRemote,
        TransferStatus::Committed,
        TransferStatus::Cancelled,
        TransferStatus::FailedValidation,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(TransferStatus::Committed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(TransferStatus::FailedValidation.is_terminal());

        assert!(!TransferStatus::Initiated.is_terminal());
        assert!(!TransferStatus::Reserved.is_terminal());
        assert!(!TransferStatus::PendingRemote.is_terminal());
    }

    #[test]
    fn test_holds_funds() {
        assert!(TransferStatus::Reserved.holds_funds());
        assert!(TransferStatus::PendingRemote.holds_funds());
        assert!(!TransferStatus::Initiated.holds_funds());
        assert!(!TransferStatus::Committed.holds_funds());
    }

    #[test]
    fn test_transitions_one_directional() {
        assert!(TransferStatus::Reserved.can_transition_to(TransferStatus::PendingRemote));
        assert!(TransferStatus::PendingRemote.can_transition_to(TransferStatus::Committed));
        assert!(TransferStatus::Reserved.can_transition_to(TransferStatus::FailedValidation));

        // Never commit without going through PENDING_REMOTE
        assert!(!TransferStatus::Reserved.can_transition_to(TransferStatus::Committed));
        assert!(!TransferStatus::PendingRemote.can_transition_to(TransferStatus::Reserved));
        assert!(!TransferStatus::PendingRemote.can_transition_to(TransferStatus::FailedValidation));

        for terminal in ALL.iter().filter(|s| s.is_terminal()) {
            for next in ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in ALL {
            assert_eq!(TransferStatus::from_id(state.id()), Some(state));
        }
        assert!(TransferStatus::from_id(999).is_none());
        assert!(TransferStatus::try_from(-30).is_err());
    }

    #[test]
    fn test_display_and_json() {
        assert_eq!(TransferStatus::PendingRemote.to_string(), "PENDING_REMOTE");
        assert_eq!(
            serde_json::to_string(&TransferStatus::FailedValidation).unwrap(),
            "\"FAILED_VALIDATION\""
        );
    }
}
