//! Error types for the VCA ledger

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::VcaId;

/// Errors that can occur anywhere in the VCA lifecycle
#[derive(Error, Debug)]
pub enum VcaError {
    /// Attestation was not verified
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// Cognitive metric outside [0, 100]
    #[error("{metric} out of range: {value} (expected 0-100)")]
    InvalidRange { metric: String, value: f64 },

    /// Referenced VCA, batch or artifact does not exist
    #[error("{kind} not found: {location}")]
    NotFound { kind: String, location: String },

    /// Posting attempted before any human decision
    #[error("VCA {0} has no consent record")]
    MissingConsent(VcaId),

    /// Subject already present in the ledger
    #[error("{0} has already been posted to the ledger")]
    DuplicatePosting(String),

    /// Proving toolchain failed, timed out or returned malformed output
    #[error("{stage} failed: {diagnostic}")]
    CollaboratorFailure { stage: String, diagnostic: String },

    /// Consent exists and no override was requested
    #[error("VCA {vca_id} already has consent ({response})")]
    ConsentAlreadyRecorded { vca_id: VcaId, response: String },

    /// Prompt abandoned or timed out; nothing was recorded
    #[error("consent for VCA {0} was cancelled")]
    ConsentCancelled(VcaId),

    /// Batch cannot be rolled up
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A document that must be new is already stored
    #[error("{kind} already exists: {location}")]
    AlreadyExists { kind: String, location: String },

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl VcaError {
    pub fn not_found(kind: impl Into<String>, location: impl std::fmt::Display) -> Self {
        VcaError::NotFound {
            kind: kind.into(),
            location: location.to_string(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, location: impl std::fmt::Display) -> Self {
        VcaError::AlreadyExists {
            kind: kind.into(),
            location: location.to_string(),
        }
    }

    pub fn collaborator(stage: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        VcaError::CollaboratorFailure {
            stage: stage.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VcaError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for VCA operations
pub type Result<T> = std::result::Result<T, VcaError>;
