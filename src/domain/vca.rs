//! Verifiable Cognitive Action record
//!
//! A VCA bundles an intent with a cognitive-state snapshot and a verified
//! threshold proof. Everything except the consent history is fixed at
//! construction. Documents are validated on read as well as on construction,
//! so a record that exists in memory always satisfies the invariants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::{Result, VcaError};

use super::{
    now_millis, utc_timestamp, CognitiveState, ConsentRecord, ConsentRequest, ConsentState,
    ProofAttestation, ReconfirmPolicy, VcaId,
};

/// A proposed agent action with its threshold proof and consent history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VcaDocument")]
pub struct VcaRecord {
    vca_id: VcaId,
    #[serde(with = "utc_timestamp")]
    timestamp: DateTime<Utc>,
    intent: String,
    task_data: String,
    cognitive_state: CognitiveState,
    zkp: ProofAttestation,
    /// Current consent; always equal to the last element of `consent_history`
    #[serde(skip_serializing_if = "Option::is_none")]
    consent: Option<ConsentRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    consent_history: Vec<ConsentRecord>,
}

impl VcaRecord {
    /// Construct a VCA from a verified attestation.
    ///
    /// Fails with `InvalidProof` when the attestation is not verified and with
    /// `InvalidRange` when any metric is outside [0, 100]. Does not persist or
    /// post anything.
    pub fn new(
        attestation: ProofAttestation,
        intent: impl Into<String>,
        task_data: impl Into<String>,
        cognitive_state: CognitiveState,
    ) -> Result<Self> {
        let record = Self {
            vca_id: VcaId::generate(),
            timestamp: now_millis(),
            intent: intent.into(),
            task_data: task_data.into(),
            cognitive_state,
            zkp: attestation,
            consent: None,
            consent_history: Vec::new(),
        };
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<()> {
        if !self.zkp.verified {
            return Err(VcaError::InvalidProof(format!(
                "attestation for {} is not verified",
                self.vca_id
            )));
        }
        self.cognitive_state.validate()
    }

    pub fn vca_id(&self) -> &VcaId {
        &self.vca_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn task_data(&self) -> &str {
        &self.task_data
    }

    pub fn cognitive_state(&self) -> &CognitiveState {
        &self.cognitive_state
    }

    pub fn confidence(&self) -> f64 {
        self.cognitive_state.confidence
    }

    pub fn attestation(&self) -> &ProofAttestation {
        &self.zkp
    }

    /// Current (most recent) consent record
    pub fn consent(&self) -> Option<&ConsentRecord> {
        self.consent.as_ref()
    }

    /// Every consent record ever captured, oldest first
    pub fn consent_history(&self) -> &[ConsentRecord] {
        &self.consent_history
    }

    pub fn consent_state(&self) -> ConsentState {
        ConsentState::from_record(self.consent())
    }

    /// What to show a human when asking for consent on this VCA
    pub fn consent_request(&self) -> ConsentRequest {
        ConsentRequest {
            vca_id: self.vca_id.clone(),
            intent: self.intent.clone(),
            task_data: self.task_data.clone(),
            cognitive_state: self.cognitive_state.clone(),
            proof_verified: self.zkp.verified,
            proof_type: self.zkp.proof_type.clone(),
            created_at: self.timestamp,
            previous: self.consent.clone(),
        }
    }

    /// Attach a consent record.
    ///
    /// A VCA that already carries consent only accepts a new record under
    /// `ReconfirmPolicy::Override`, and even then the earlier record is kept
    /// in the history.
    pub fn record_consent(&mut self, record: ConsentRecord, policy: ReconfirmPolicy) -> Result<()> {
        if let Some(current) = &self.consent {
            if policy == ReconfirmPolicy::Reject {
                return Err(VcaError::ConsentAlreadyRecorded {
                    vca_id: self.vca_id.clone(),
                    response: current.user_response.to_string(),
                });
            }
        }
        self.consent_history.push(record.clone());
        self.consent = Some(record);
        Ok(())
    }
}

/// Wire shape of a VCA document, validated into a `VcaRecord`.
///
/// Older documents carry only `consent`; their history is seeded from it.
#[derive(Deserialize)]
struct VcaDocument {
    vca_id: VcaId,
    #[serde(with = "utc_timestamp")]
    timestamp: DateTime<Utc>,
    intent: String,
    #[serde(default)]
    task_data: String,
    cognitive_state: CognitiveState,
    zkp: ProofAttestation,
    #[serde(default)]
    consent: Option<ConsentRecord>,
    #[serde(default)]
    consent_history: Vec<ConsentRecord>,
}

impl TryFrom<VcaDocument> for VcaRecord {
    type Error = VcaError;

    fn try_from(doc: VcaDocument) -> Result<Self> {
        let mut consent_history = doc.consent_history;
        let consent = match (doc.consent, consent_history.last()) {
            (Some(current), None) => {
                consent_history.push(current.clone());
                Some(current)
            }
            (Some(current), Some(last)) if &current != last => {
                return Err(VcaError::Internal(format!(
                    "VCA {}: current consent does not match the latest history entry",
                    doc.vca_id
                )));
            }
            (Some(current), Some(_)) => Some(current),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        };

        let record = Self {
            vca_id: doc.vca_id,
            timestamp: doc.timestamp,
            intent: doc.intent,
            task_data: doc.task_data,
            cognitive_state: doc.cognitive_state,
            zkp: doc.zkp,
            consent,
            consent_history,
        };
        record.validate()?;
        Ok(record)
    }
}
