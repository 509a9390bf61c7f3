//! VCA generation: validate, prove, verify, persist.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::domain::{CognitiveState, ProofAttestation, VcaRecord, VerificationReport};
use crate::infra::{ProofToolchain, Result, VcaError, VcaStore};
use crate::metrics::{metric_names, timed, MetricsRegistry};

/// Input for a single VCA
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub intent: String,
    pub task_data: String,
    pub cognitive_state: CognitiveState,
}

impl GenerateRequest {
    pub fn new(
        intent: impl Into<String>,
        task_data: impl Into<String>,
        cognitive_state: CognitiveState,
    ) -> Self {
        Self {
            intent: intent.into(),
            task_data: task_data.into(),
            cognitive_state,
        }
    }
}

/// Produces verified VCAs and stores them
#[derive(Clone)]
pub struct VcaGenerator {
    toolchain: Arc<dyn ProofToolchain>,
    store: Arc<dyn VcaStore>,
    metrics: Arc<MetricsRegistry>,
}

impl VcaGenerator {
    pub fn new(toolchain: Arc<dyn ProofToolchain>, store: Arc<dyn VcaStore>) -> Self {
        Self {
            toolchain,
            store,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Generate, verify and persist a VCA.
    ///
    /// Ranges are checked before the toolchain runs, so an out-of-range
    /// request never spawns a prover. A proof that fails verification is
    /// `InvalidProof` and nothing is stored.
    #[instrument(skip(self, request), fields(intent = %request.intent))]
    pub async fn generate(&self, request: GenerateRequest) -> Result<VcaRecord> {
        request.cognitive_state.validate()?;

        let state = &request.cognitive_state;
        let artifacts = timed(
            &self.metrics,
            metric_names::GENERATE_LATENCY,
            self.toolchain
                .prove_threshold(state.confidence_fixed_point(), state.threshold_fixed_point()),
        )
        .await?;

        let report = self
            .toolchain
            .verify(
                &artifacts.proof_file,
                &artifacts.public_file,
                &self.toolchain.verification_key(),
            )
            .await?;
        if !report.valid {
            return Err(VcaError::InvalidProof(format!(
                "{} failed verification: {}",
                artifacts.proof_file.display(),
                report.output.trim()
            )));
        }

        let attestation =
            ProofAttestation::from_artifacts(artifacts, self.toolchain.circuit_name(), &report);
        let vca = VcaRecord::new(
            attestation,
            request.intent,
            request.task_data,
            request.cognitive_state,
        )?;

        self.store.create_vca(&vca).await?;
        self.metrics.inc_counter(metric_names::VCAS_GENERATED).await;

        info!(vca_id = %vca.vca_id(), confidence = vca.confidence(), "VCA created");
        Ok(vca)
    }

    /// Re-run verification on existing proof artifacts.
    ///
    /// Uses the toolchain's verification key unless one is given.
    pub async fn verify_artifacts(
        &self,
        proof_file: &Path,
        public_file: &Path,
        verification_key: Option<&Path>,
    ) -> Result<VerificationReport> {
        let default_key = self.toolchain.verification_key();
        let key = verification_key.unwrap_or(&default_key);
        self.toolchain.verify(proof_file, public_file, key).await
    }
}
