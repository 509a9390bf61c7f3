//! VCA Ledger Library
//!
//! Verifiable Cognitive Actions: agent actions backed by a zero-knowledge
//! threshold proof, gated on explicit human consent, and recorded in an
//! append-only ledger.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (VCA, consent, ledger entries, rollups)
//! - [`infra`] - Storage and collaborator implementations (SQLite, filesystem, snarkjs, terminal)
//! - [`lifecycle`] - Generate, confirm, post and batch services
//! - [`crypto`] - Canonical JSON hashing
//! - [`config`] - Environment configuration
//! - [`metrics`] - In-process metrics
//! - [`telemetry`] - Logging and OpenTelemetry integration

pub mod config;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod lifecycle;
pub mod metrics;
pub mod migrations;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use domain::{
    BatchId, CognitiveState, ConsentDecision, ConsentRecord, ConsentResponse, DuplicatePolicy,
    GasSchedule, LedgerEntry, LedgerRecord, ReconfirmPolicy, RollupEntry, TxId, VcaId, VcaRecord,
};
pub use infra::{
    ConsentPrompt, LedgerStore, ProofToolchain, Result, RollupStore, VcaError, VcaStore,
};
pub use lifecycle::{
    BatchMinter, BatchRequest, ConsentCoordinator, GenerateRequest, LedgerService, VcaGenerator,
};
