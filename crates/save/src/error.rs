//! Error types raised inside the save engine.
//!
//! None of these reach gameplay code as failures of a mutation: setters are
//! infallible, writes report through the scheduler, and integrity failures are
//! turned into the reset-to-defaults recovery path by the store.

use thiserror::Error;

/// Errors surfaced by the save pipeline.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("invalid save file name {0:?}")]
    InvalidFileName(String),

    #[error("slot {index} is out of range (0..{max_slots})")]
    InvalidSlot { index: u8, max_slots: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize save record: {0}")]
    Serialization(String),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("encryption unavailable: {0}")]
    EncryptionConfig(String),

    #[error("background save task failed to join")]
    WorkerJoin(#[source] tokio::task::JoinError),
}

impl SaveError {
    /// Whether a retry through the dirty/scheduled cycle can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SaveError::Io(_) | SaveError::WorkerJoin(_))
    }
}

/// Reasons a stored payload was rejected on load.
///
/// Every variant leads to the same recovery; the distinction only matters
/// for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch { stored: String, computed: String },

    #[error("payload could not be decrypted: {0}")]
    Decrypt(String),
}

pub type Result<T> = std::result::Result<T, SaveError>;
