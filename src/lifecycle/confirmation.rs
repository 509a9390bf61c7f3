//! Consent capture
//!
//! Loads a VCA, asks a human through a `ConsentPrompt`, and stores the
//! decision. Cancellation and timeout leave the stored VCA untouched.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::domain::{ConsentDecision, ConsentRecord, ReconfirmPolicy, VcaId, VcaRecord};
use crate::infra::{ConsentPrompt, Result, VcaError, VcaStore};
use crate::metrics::{metric_names, MetricsRegistry};

/// Default time a human has to answer
pub const DEFAULT_CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ConsentCoordinator {
    store: Arc<dyn VcaStore>,
    prompt: Arc<dyn ConsentPrompt>,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl ConsentCoordinator {
    pub fn new(store: Arc<dyn VcaStore>, prompt: Arc<dyn ConsentPrompt>) -> Self {
        Self {
            store,
            prompt,
            timeout: DEFAULT_CONSENT_TIMEOUT,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Prompt for consent on a stored VCA and persist the answer.
    ///
    /// An already-confirmed VCA is refused up front unless the policy is
    /// `Override`, so the human is never asked a question whose answer would
    /// be thrown away.
    #[instrument(skip(self), fields(vca_id = %vca_id))]
    pub async fn confirm(&self, vca_id: &VcaId, policy: ReconfirmPolicy) -> Result<VcaRecord> {
        let vca = self.store.load_vca(vca_id).await?;
        ensure_reconfirm_allowed(&vca, policy)?;

        let decision =
            match tokio::time::timeout(self.timeout, self.prompt.request(&vca.consent_request()))
                .await
            {
                Ok(decision) => decision?,
                Err(_) => {
                    warn!(timeout = ?self.timeout, "consent prompt timed out");
                    ConsentDecision::Cancelled
                }
            };

        self.apply(vca, decision, policy).await
    }

    /// Record a decision obtained outside a prompt (scripted approval).
    #[instrument(skip(self), fields(vca_id = %vca_id))]
    pub async fn record(
        &self,
        vca_id: &VcaId,
        decision: ConsentDecision,
        policy: ReconfirmPolicy,
    ) -> Result<VcaRecord> {
        let vca = self.store.load_vca(vca_id).await?;
        ensure_reconfirm_allowed(&vca, policy)?;
        self.apply(vca, decision, policy).await
    }

    async fn apply(
        &self,
        mut vca: VcaRecord,
        decision: ConsentDecision,
        policy: ReconfirmPolicy,
    ) -> Result<VcaRecord> {
        let Some(response) = decision.response() else {
            self.metrics.inc_counter(metric_names::CONSENT_CANCELLED).await;
            info!(vca_id = %vca.vca_id(), "consent cancelled; VCA unchanged");
            return Err(VcaError::ConsentCancelled(vca.vca_id().clone()));
        };

        vca.record_consent(ConsentRecord::new(response), policy)?;
        self.store.save_vca(&vca).await?;

        let counter = match decision {
            ConsentDecision::Approved => metric_names::CONSENT_APPROVED,
            _ => metric_names::CONSENT_VETOED,
        };
        self.metrics.inc_counter(counter).await;

        info!(vca_id = %vca.vca_id(), ?decision, "consent recorded");
        Ok(vca)
    }
}

fn ensure_reconfirm_allowed(vca: &VcaRecord, policy: ReconfirmPolicy) -> Result<()> {
    match (vca.consent(), policy) {
        (Some(current), ReconfirmPolicy::Reject) => Err(VcaError::ConsentAlreadyRecorded {
            vca_id: vca.vca_id().clone(),
            response: current.user_response.to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CognitiveState, ConsentState, ProofArtifacts, ProofAttestation, VerificationReport,
        DEFAULT_CIRCUIT,
    };
    use crate::infra::{InMemoryDocumentStore, MockConsentPrompt};
    use serde_json::json;
    use std::path::PathBuf;

    async fn stored_vca(store: &InMemoryDocumentStore) -> VcaRecord {
        let attestation = ProofAttestation::from_artifacts(
            ProofArtifacts {
                proof_file: PathBuf::from("p.json"),
                public_file: PathBuf::from("s.json"),
                proof: json!({}),
                public_signals: json!([]),
            },
            DEFAULT_CIRCUIT,
            &VerificationReport::valid("OK!"),
        );
        let vca = VcaRecord::new(
            attestation,
            "Archive completed tasks",
            "Clean up task board",
            CognitiveState::new(96.0, 92.0),
        )
        .unwrap();
        store.save_vca(&vca).await.unwrap();
        vca
    }

    fn prompt_answering(decision: ConsentDecision) -> MockConsentPrompt {
        let mut prompt = MockConsentPrompt::new();
        prompt.expect_request().returning(move |_| Ok(decision));
        prompt
    }

    #[tokio::test]
    async fn test_approval_is_persisted() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let vca = stored_vca(&store).await;
        let coordinator = ConsentCoordinator::new(
            store.clone(),
            Arc::new(prompt_answering(ConsentDecision::Approved)),
        );

        let updated = coordinator
            .confirm(vca.vca_id(), ReconfirmPolicy::Reject)
            .await
            .unwrap();
        assert_eq!(updated.consent_state(), ConsentState::Approved);

        let reloaded = store.load_vca(vca.vca_id()).await.unwrap();
        assert_eq!(reloaded.consent_state(), ConsentState::Approved);
    }

    #[tokio::test]
    async fn test_cancel_leaves_vca_unconfirmed() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let vca = stored_vca(&store).await;
        let coordinator = ConsentCoordinator::new(
            store.clone(),
            Arc::new(prompt_answering(ConsentDecision::Cancelled)),
        );

        let err = coordinator
            .confirm(vca.vca_id(), ReconfirmPolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, VcaError::ConsentCancelled(_)));

        let reloaded = store.load_vca(vca.vca_id()).await.unwrap();
        assert_eq!(reloaded.consent_state(), ConsentState::Unconfirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_cancellation_not_veto() {
        struct SilentPrompt;

        #[async_trait::async_trait]
        impl ConsentPrompt for SilentPrompt {
            async fn request(
                &self,
                _request: &crate::domain::ConsentRequest,
            ) -> Result<ConsentDecision> {
                std::future::pending().await
            }
        }

        let store = Arc::new(InMemoryDocumentStore::new());
        let vca = stored_vca(&store).await;
        let coordinator = ConsentCoordinator::new(store.clone(), Arc::new(SilentPrompt))
            .with_timeout(Duration::from_secs(1));

        let err = coordinator
            .confirm(vca.vca_id(), ReconfirmPolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, VcaError::ConsentCancelled(_)));

        let reloaded = store.load_vca(vca.vca_id()).await.unwrap();
        assert_eq!(reloaded.consent_state(), ConsentState::Unconfirmed);
    }

    #[tokio::test]
    async fn test_reconfirm_without_override_never_prompts() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let vca = stored_vca(&store).await;
        coordinator_recording(&store, &vca, ConsentDecision::Vetoed).await;

        let mut prompt = MockConsentPrompt::new();
        prompt.expect_request().never();
        let coordinator = ConsentCoordinator::new(store.clone(), Arc::new(prompt));

        let err = coordinator
            .confirm(vca.vca_id(), ReconfirmPolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, VcaError::ConsentAlreadyRecorded { .. }));
    }

    #[tokio::test]
    async fn test_override_keeps_history() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let vca = stored_vca(&store).await;
        coordinator_recording(&store, &vca, ConsentDecision::Vetoed).await;

        let coordinator = ConsentCoordinator::new(
            store.clone(),
            Arc::new(prompt_answering(ConsentDecision::Approved)),
        );
        let updated = coordinator
            .confirm(vca.vca_id(), ReconfirmPolicy::Override)
            .await
            .unwrap();

        assert_eq!(updated.consent_state(), ConsentState::Approved);
        assert_eq!(updated.consent_history().len(), 2);
    }

    async fn coordinator_recording(
        store: &Arc<InMemoryDocumentStore>,
        vca: &VcaRecord,
        decision: ConsentDecision,
    ) {
        let mut prompt = MockConsentPrompt::new();
        prompt.expect_request().never();
        ConsentCoordinator::new(store.clone(), Arc::new(prompt))
            .record(vca.vca_id(), decision, ReconfirmPolicy::Reject)
            .await
            .unwrap();
    }
}
