//! Error types for the ceremony.
//!
//! Every failure is raised synchronously at the point of violation and carries
//! the status word the device would have answered with.

use thiserror::Error;

/// Status word returned for a successful operation.
pub const SW_OK: u16 = 0x9000;

/// Status word returned when an operation needs finalized keys.
pub const SW_NO_KEYS_PRESENT: u16 = 0xB022;

#[derive(Debug, Error)]
pub enum CeremonyError {
    /// Identity index outside the supported range.
    #[error("identity index {index} is out of range (max {max})")]
    InvalidIndex { index: u8, max: u8 },

    /// Operation invoked before its prerequisite round or state.
    #[error("{operation} is not allowed in state {state}")]
    ProtocolOrder {
        operation: &'static str,
        state: &'static str,
    },

    /// Participants or threshold outside 2 <= t <= n <= max.
    #[error("invalid participant count: {participants} participants, {min_signers} min signers (max {max})")]
    ParticipantCount {
        participants: usize,
        min_signers: u16,
        max: usize,
    },

    /// Operation requires finalized keys and there are none.
    #[error("no keys present")]
    NoKeysPresent,

    /// A package is addressed to, or originates from, the wrong identity.
    #[error("package mismatch: {0}")]
    PackageMismatch(String),

    /// A non-native asset was reviewed while expert mode is off.
    #[error("Expert mode is required to review this transaction")]
    ExpertModeRequired,

    /// A second signature was requested for an already signed transaction.
    #[error("transaction {tx_hash} was already signed by this identity")]
    SignatureReplay { tx_hash: String },

    /// Too few shares, or shares over different signing packages.
    #[error("aggregation mismatch: {0}")]
    AggregationMismatch(String),

    /// The approver rejected the operation.
    #[error("operation denied: {0}")]
    Denied(&'static str),

    /// Backup blob could not be opened or has an unknown version.
    #[error("backup error: {reason}")]
    Backup { reason: String, status: u16 },

    /// Secure element failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Malformed payload or transaction.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Invalid ceremony configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CeremonyError {
    /// Maps the error to the device status word.
    pub fn status_word(&self) -> u16 {
        match self {
            CeremonyError::InvalidIndex { .. } => 0xB014,
            CeremonyError::ProtocolOrder { .. } => SW_NO_KEYS_PRESENT,
            CeremonyError::ParticipantCount { .. } => 0xB024,
            CeremonyError::NoKeysPresent => SW_NO_KEYS_PRESENT,
            CeremonyError::PackageMismatch(_) => 0xB00C,
            CeremonyError::ExpertModeRequired => 0xB027,
            CeremonyError::SignatureReplay { .. } => 0xB013,
            CeremonyError::AggregationMismatch(_) => 0xB011,
            CeremonyError::Denied(_) => 0x6985,
            CeremonyError::Backup { status, .. } => *status,
            CeremonyError::Crypto(_) => 0xB008,
            CeremonyError::InvalidPayload(_)
            | CeremonyError::Serialization(_)
            | CeremonyError::Hex(_) => 0xB00F,
            CeremonyError::Config(_) | CeremonyError::Io(_) => 0x6F00,
        }
    }

    pub(crate) fn crypto(err: impl std::fmt::Display) -> Self {
        CeremonyError::Crypto(err.to_string())
    }
}

/// Convenience result type for ceremony operations.
pub type Result<T> = std::result::Result<T, CeremonyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_words() {
        assert_eq!(CeremonyError::NoKeysPresent.status_word(), 0xB022);
        assert_eq!(CeremonyError::ExpertModeRequired.status_word(), 0xB027);
        assert_eq!(
            CeremonyError::InvalidIndex { index: 9, max: 5 }.status_word(),
            0xB014
        );
        let err = CeremonyError::Backup {
            reason: "bad version".to_string(),
            status: 0xB023,
        };
        assert_eq!(err.status_word(), 0xB023);
    }

    #[test]
    fn test_expert_mode_message() {
        let msg = CeremonyError::ExpertModeRequired.to_string();
        assert!(msg.contains("Expert mode is required"));
    }
}
