//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::json;

use vca_ledger::domain::{
    CognitiveState, ConsentDecision, ConsentRequest, ProofArtifacts, VerificationReport,
    DEFAULT_CIRCUIT,
};
use vca_ledger::infra::{
    ConsentPrompt, InMemoryDocumentStore, InMemoryLedger, ProofToolchain, Result, VcaError,
};
use vca_ledger::lifecycle::{ConsentCoordinator, LedgerService, VcaGenerator};
use vca_ledger::metrics::MetricsRegistry;

/// Proof toolchain that fabricates artifacts in memory.
///
/// Can be told to fail for particular confidence values (fixed point) or to
/// report every proof as invalid.
#[derive(Default)]
pub struct StubToolchain {
    fail_on: HashSet<u32>,
    reject_all: bool,
    proofs: AtomicU64,
}

impl StubToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(confidences: impl IntoIterator<Item = u32>) -> Self {
        Self {
            fail_on: confidences.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_all: true,
            ..Self::default()
        }
    }

    pub fn proofs_generated(&self) -> u64 {
        self.proofs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProofToolchain for StubToolchain {
    async fn prove_threshold(
        &self,
        confidence_fixed: u32,
        threshold_fixed: u32,
    ) -> Result<ProofArtifacts> {
        if self.fail_on.contains(&confidence_fixed) {
            return Err(VcaError::collaborator(
                "witness",
                format!("assert failed for confidence {confidence_fixed}"),
            ));
        }
        let n = self.proofs.fetch_add(1, Ordering::SeqCst);
        Ok(ProofArtifacts {
            proof_file: PathBuf::from(format!("proofs/proof-{n:08}.json")),
            public_file: PathBuf::from(format!("proofs/public-{n:08}.json")),
            proof: json!({
                "pi_a": [confidence_fixed.to_string(), threshold_fixed.to_string(), "1"],
                "protocol": "groth16",
                "curve": "bn128",
                "nonce": n,
            }),
            public_signals: json!(["1", threshold_fixed.to_string()]),
        })
    }

    async fn verify(
        &self,
        _proof_file: &Path,
        _public_file: &Path,
        _verification_key: &Path,
    ) -> Result<VerificationReport> {
        if self.reject_all {
            Ok(VerificationReport::invalid("[ERROR] snarkJS: Invalid proof"))
        } else {
            Ok(VerificationReport::valid("[INFO]  snarkJS: OK!"))
        }
    }

    fn verification_key(&self) -> PathBuf {
        PathBuf::from("build/verification_key.json")
    }

    fn circuit_name(&self) -> String {
        DEFAULT_CIRCUIT.to_string()
    }
}

/// Prompt that replays a fixed list of answers and records what it was shown
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<ConsentDecision>>,
    seen: Mutex<Vec<ConsentRequest>>,
}

impl ScriptedPrompt {
    pub fn new(answers: impl IntoIterator<Item = ConsentDecision>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ConsentRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConsentPrompt for ScriptedPrompt {
    async fn request(&self, request: &ConsentRequest) -> Result<ConsentDecision> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConsentDecision::Cancelled))
    }
}

/// Everything wired against in-memory stores
pub struct Harness {
    pub docs: Arc<InMemoryDocumentStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub metrics: Arc<MetricsRegistry>,
    pub generator: VcaGenerator,
    pub service: LedgerService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_toolchain(StubToolchain::new())
    }

    pub fn with_toolchain(toolchain: StubToolchain) -> Self {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let generator =
            VcaGenerator::new(Arc::new(toolchain), docs.clone()).with_metrics(metrics.clone());
        let service = LedgerService::new(ledger.clone(), docs.clone(), docs.clone())
            .with_metrics(metrics.clone());
        Self {
            docs,
            ledger,
            metrics,
            generator,
            service,
        }
    }

    pub fn coordinator(&self, prompt: Arc<ScriptedPrompt>) -> ConsentCoordinator {
        ConsentCoordinator::new(self.docs.clone(), prompt).with_metrics(self.metrics.clone())
    }
}

pub fn state(confidence: f64) -> CognitiveState {
    CognitiveState::new(confidence, 92.0)
}

/// A metric value inside [0, 100]
pub fn arb_percent() -> impl Strategy<Value = f64> {
    (0u32..=10_000).prop_map(|hundredths| hundredths as f64 / 100.0)
}

/// A metric value outside [0, 100]
pub fn arb_out_of_range() -> impl Strategy<Value = f64> {
    prop_oneof![-1.0e6..-0.001f64, 100.001..1.0e6f64]
}
