//! Proof attestation types
//!
//! The proving toolchain is an external collaborator. These types carry what
//! it hands back: artifact references, the proof and public-signal documents,
//! and the verification outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{now_millis, utc_timestamp};

/// Proving system used by the threshold circuit
pub const PROOF_TYPE_GROTH16: &str = "groth16";

/// Default circuit name
pub const DEFAULT_CIRCUIT: &str = "intent_threshold";

/// Artifacts written by a `prove_threshold` call
#[derive(Debug, Clone, PartialEq)]
pub struct ProofArtifacts {
    pub proof_file: PathBuf,
    pub public_file: PathBuf,
    /// Parsed contents of `proof_file`
    pub proof: serde_json::Value,
    /// Parsed contents of `public_file`
    pub public_signals: serde_json::Value,
}

/// Outcome of a `verify` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub valid: bool,
    /// Raw toolchain output, kept for diagnostics
    pub output: String,
}

impl VerificationReport {
    pub fn valid(output: impl Into<String>) -> Self {
        Self {
            valid: true,
            output: output.into(),
        }
    }

    pub fn invalid(output: impl Into<String>) -> Self {
        Self {
            valid: false,
            output: output.into(),
        }
    }
}

/// Render a public-signals document as one display string per input.
///
/// snarkjs writes a JSON array of decimal strings. Other scalars are shown
/// as JSON; anything that is not an array is a single input.
pub fn public_inputs(signals: &serde_json::Value) -> Vec<String> {
    let render = |v: &serde_json::Value| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match signals {
        serde_json::Value::Array(items) => items.iter().map(render).collect(),
        other => vec![render(other)],
    }
}

/// Proof artifact plus its verification outcome, as embedded in a VCA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofAttestation {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub circuit: String,
    pub proof_file: String,
    pub public_file: String,
    pub proof: serde_json::Value,
    pub public_signals: serde_json::Value,
    pub verified: bool,
    #[serde(with = "utc_timestamp")]
    pub verified_at: DateTime<Utc>,
}

impl ProofAttestation {
    /// Bind toolchain artifacts to the verification verdict.
    ///
    /// An attestation with `verified == false` can exist, but it can never
    /// back a VCA.
    pub fn from_artifacts(
        artifacts: ProofArtifacts,
        circuit: impl Into<String>,
        report: &VerificationReport,
    ) -> Self {
        Self {
            proof_type: PROOF_TYPE_GROTH16.to_string(),
            circuit: circuit.into(),
            proof_file: artifacts.proof_file.display().to_string(),
            public_file: artifacts.public_file.display().to_string(),
            proof: artifacts.proof,
            public_signals: artifacts.public_signals,
            verified: report.valid,
            verified_at: now_millis(),
        }
    }
}
