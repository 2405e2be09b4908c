//! Error types for the fuel ledger.

use std::fmt;
use thiserror::Error;

/// A field that must be present before an operation can proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequiredField {
    TruckId,
    StartMeter,
    StartDip,
    EndMeter,
    EndDip,
    FillTime,
    FillAmount,
    /// The bulk-fill ledger is empty.
    BulkFills,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequiredField::TruckId => "truckId",
            RequiredField::StartMeter => "startMeter",
            RequiredField::StartDip => "startDip",
            RequiredField::EndMeter => "endMeter",
            RequiredField::EndDip => "endDip",
            RequiredField::FillTime => "time",
            RequiredField::FillAmount => "amount",
            RequiredField::BulkFills => "fills",
        };
        f.write_str(name)
    }
}

/// Main error type for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Missing or invalid data: {0}")]
    MissingData(RequiredField),

    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    /// Whether the caller can correct its input and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LedgerError::MissingData(_)
                | LedgerError::InvalidReading(_)
                | LedgerError::Validation(_)
        )
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::StorageUnavailable(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LedgerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LedgerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LedgerError::Validation(e.to_string())
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
