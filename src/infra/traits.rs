//! Trait definitions for the VCA ledger's storage and collaborator seams

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::path::{Path, PathBuf};

use crate::domain::{
    BatchId, ConsentDecision, ConsentRequest, DuplicatePolicy, LedgerEntry, LedgerRecord,
    ProofArtifacts, RollupEntry, VcaId, VcaRecord, VerificationReport,
};

use super::Result;

/// Append-only ledger of VCA outcomes and batch rollups.
///
/// Invariant: `tx_id` strictly increases in append order and no entry is
/// ever modified or removed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a record, assigning the next transaction id.
    ///
    /// The duplicate check, id assignment and write happen as one serialized
    /// step. Under `DuplicatePolicy::Reject` a subject that is already present
    /// fails with `DuplicatePosting` and nothing is written.
    async fn append(&self, record: LedgerRecord, policy: DuplicatePolicy) -> Result<LedgerEntry>;

    /// All entries in append order
    async fn entries(&self) -> Result<Vec<LedgerEntry>>;

    /// Whether any entry references this VCA or batch id
    async fn contains_subject(&self, subject_id: &str) -> Result<bool>;

    /// Number of entries
    async fn count(&self) -> Result<u64>;

    /// Highest sequence assigned so far (0 when empty)
    async fn head(&self) -> Result<u64>;
}

/// Persistent VCA documents keyed by id
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VcaStore: Send + Sync {
    /// Store a freshly generated VCA; `AlreadyExists` if the id is taken
    async fn create_vca(&self, vca: &VcaRecord) -> Result<()>;

    /// Write (or overwrite) the document for this VCA atomically
    async fn save_vca(&self, vca: &VcaRecord) -> Result<()>;

    /// Load and validate a VCA; `NotFound` when absent
    async fn load_vca(&self, vca_id: &VcaId) -> Result<VcaRecord>;

    async fn vca_exists(&self, vca_id: &VcaId) -> Result<bool>;
}

/// Persistent rollup documents keyed by batch id
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RollupStore: Send + Sync {
    /// Rollups are written once; `AlreadyExists` if the batch id is taken
    async fn save_rollup(&self, rollup: &RollupEntry) -> Result<()>;

    async fn load_rollup(&self, batch_id: &BatchId) -> Result<RollupEntry>;

    async fn rollup_exists(&self, batch_id: &BatchId) -> Result<bool>;
}

/// External zero-knowledge proving toolchain.
///
/// Inputs are fixed-point integers (percent x 100).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProofToolchain: Send + Sync {
    /// Prove `confidence >= threshold` without revealing confidence
    async fn prove_threshold(
        &self,
        confidence_fixed: u32,
        threshold_fixed: u32,
    ) -> Result<ProofArtifacts>;

    /// Check a proof against its public signals and verification key
    async fn verify(
        &self,
        proof_file: &Path,
        public_file: &Path,
        verification_key: &Path,
    ) -> Result<VerificationReport>;

    /// Verification key used by `verify` for this circuit
    fn verification_key(&self) -> PathBuf;

    fn circuit_name(&self) -> String;
}

/// Human-facing consent prompt
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// Present the request and wait for a decision.
    ///
    /// Returns `Cancelled` when the human abandons the prompt.
    async fn request(&self, request: &ConsentRequest) -> Result<ConsentDecision>;
}
