//! Ledger entry types
//!
//! Entries are derived from VCAs (or rollups) and are immutable once
//! appended. Proof artifacts are never copied into the ledger; only their
//! canonical SHA-256 fingerprint is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::proof_hash;
use crate::infra::{Result, VcaError};

use super::{
    hash256_hex, now_millis, utc_timestamp, CognitiveState, ConsentResponse, Hash256, RollupEntry,
    TxId, VcaId, VcaRecord,
};

/// Reward for an executed action at or above 95% confidence
pub const VGT_REWARD_HIGH: u64 = 10;
/// Reward for an executed action at or above 90% confidence
pub const VGT_REWARD_MEDIUM: u64 = 5;
/// Reward for any other executed action
pub const VGT_REWARD_BASE: u64 = 3;

/// What the ledger records as having happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Execute,
    Veto,
    Unknown,
    BatchRollup,
}

/// Status of a ledger entry at posting time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Executed,
    Vetoed,
    Pending,
    PendingConfirmation,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryStatus::Executed => "executed",
            EntryStatus::Vetoed => "vetoed",
            EntryStatus::Pending => "pending",
            EntryStatus::PendingConfirmation => "pending_confirmation",
        };
        f.write_str(s)
    }
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LedgerAction::Execute => "execute",
            LedgerAction::Veto => "veto",
            LedgerAction::Unknown => "unknown",
            LedgerAction::BatchRollup => "batch_rollup",
        };
        f.write_str(s)
    }
}

/// Map a consent response to the ledger `(action, status)` pair.
pub fn classify_consent(response: &ConsentResponse) -> (LedgerAction, EntryStatus) {
    match response {
        ConsentResponse::Approved => (LedgerAction::Execute, EntryStatus::Executed),
        ConsentResponse::Vetoed => (LedgerAction::Veto, EntryStatus::Vetoed),
        ConsentResponse::Unrecognized(_) => (LedgerAction::Unknown, EntryStatus::Pending),
    }
}

/// VGT reward for an entry. Only executed actions earn anything.
pub fn vgt_reward(status: EntryStatus, confidence: f64) -> u64 {
    if status != EntryStatus::Executed {
        return 0;
    }
    if confidence >= 95.0 {
        VGT_REWARD_HIGH
    } else if confidence >= 90.0 {
        VGT_REWARD_MEDIUM
    } else {
        VGT_REWARD_BASE
    }
}

/// How the ledger treats a subject that has already been posted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    /// Explicit operator override: post again anyway
    AllowDuplicate,
}

/// Extra facts about the source VCA, carried for auditors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub proof_type: String,
    pub verified: bool,
    #[serde(with = "utc_timestamp")]
    pub consent_timestamp: DateTime<Utc>,
}

/// Ledger body for a single VCA outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VcaEntry {
    pub action: LedgerAction,
    pub vca_id: VcaId,
    pub intent: String,
    #[serde(with = "hash256_hex")]
    pub proof_hash: Hash256,
    pub human_consent: ConsentResponse,
    pub status: EntryStatus,
    /// Copy of the VCA's cognitive state at posting time
    pub cognitive_state: CognitiveState,
    pub metadata: EntryMetadata,
    pub vgt_reward: u64,
}

impl VcaEntry {
    /// Derive the ledger body from a VCA.
    ///
    /// Fails with `MissingConsent` when no human decision has been recorded.
    pub fn from_vca(vca: &VcaRecord) -> Result<Self> {
        let consent = vca
            .consent()
            .ok_or_else(|| VcaError::MissingConsent(vca.vca_id().clone()))?;

        let (action, status) = classify_consent(&consent.user_response);
        let attestation = vca.attestation();

        Ok(Self {
            action,
            vca_id: vca.vca_id().clone(),
            intent: vca.intent().to_string(),
            proof_hash: proof_hash(&attestation.proof)?,
            human_consent: consent.user_response.clone(),
            status,
            cognitive_state: vca.cognitive_state().clone(),
            metadata: EntryMetadata {
                proof_type: attestation.proof_type.clone(),
                verified: attestation.verified,
                consent_timestamp: consent.timestamp,
            },
            vgt_reward: vgt_reward(status, vca.confidence()),
        })
    }

    /// Re-derive the reward from the stored snapshot
    pub fn expected_reward(&self) -> u64 {
        vgt_reward(self.status, self.cognitive_state.confidence)
    }
}

/// What gets appended: a single VCA outcome or a batch rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry_type", rename_all = "snake_case")]
pub enum LedgerRecord {
    Vca(VcaEntry),
    BatchRollup(RollupEntry),
}

impl LedgerRecord {
    pub fn entry_type(&self) -> &'static str {
        match self {
            LedgerRecord::Vca(_) => "vca",
            LedgerRecord::BatchRollup(_) => "batch_rollup",
        }
    }

    /// Identity used for duplicate detection (VCA id or batch id)
    pub fn subject_id(&self) -> &str {
        match self {
            LedgerRecord::Vca(entry) => entry.vca_id.as_str(),
            LedgerRecord::BatchRollup(rollup) => rollup.batch_id.as_str(),
        }
    }

    pub fn action(&self) -> LedgerAction {
        match self {
            LedgerRecord::Vca(entry) => entry.action,
            LedgerRecord::BatchRollup(rollup) => rollup.action,
        }
    }

    pub fn status(&self) -> EntryStatus {
        match self {
            LedgerRecord::Vca(entry) => entry.status,
            LedgerRecord::BatchRollup(rollup) => rollup.status,
        }
    }

    pub fn vgt_reward(&self) -> u64 {
        match self {
            LedgerRecord::Vca(entry) => entry.vgt_reward,
            LedgerRecord::BatchRollup(_) => 0,
        }
    }
}

/// A posted ledger entry. Created once by the store, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tx_id: TxId,
    #[serde(with = "utc_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub record: LedgerRecord,
}

impl LedgerEntry {
    /// Stamp a record with its ledger sequence. Only stores call this.
    pub fn new(sequence: u64, record: LedgerRecord) -> Self {
        Self {
            tx_id: TxId::from_sequence(sequence),
            timestamp: now_millis(),
            record,
        }
    }

    pub fn sequence(&self) -> Option<u64> {
        self.tx_id.sequence()
    }

    pub fn as_vca(&self) -> Option<&VcaEntry> {
        match &self.record {
            LedgerRecord::Vca(entry) => Some(entry),
            LedgerRecord::BatchRollup(_) => None,
        }
    }

    pub fn as_rollup(&self) -> Option<&RollupEntry> {
        match &self.record {
            LedgerRecord::BatchRollup(rollup) => Some(rollup),
            LedgerRecord::Vca(_) => None,
        }
    }
}

/// Aggregate view over a ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub entries: u64,
    pub executed: u64,
    pub vetoed: u64,
    pub pending: u64,
    pub rollups: u64,
    pub total_vgt: u64,
}

impl LedgerSummary {
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            summary.entries += 1;
            summary.total_vgt += entry.record.vgt_reward();
            match entry.record.status() {
                EntryStatus::Executed => summary.executed += 1,
                EntryStatus::Vetoed => summary.vetoed += 1,
                EntryStatus::Pending => summary.pending += 1,
                EntryStatus::PendingConfirmation => summary.rollups += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ConsentRecord, ProofArtifacts, ProofAttestation, ReconfirmPolicy, VerificationReport,
        DEFAULT_CIRCUIT,
    };
    use serde_json::json;
    use std::path::PathBuf;

    fn vca(confidence: f64) -> VcaRecord {
        let attestation = ProofAttestation::from_artifacts(
            ProofArtifacts {
                proof_file: PathBuf::from("proofs/proof-a.json"),
                public_file: PathBuf::from("proofs/public-a.json"),
                proof: json!({"protocol": "groth16", "curve": "bn128"}),
                public_signals: json!(["1"]),
            },
            DEFAULT_CIRCUIT,
            &VerificationReport::valid("OK!"),
        );
        VcaRecord::new(
            attestation,
            "Review pull request",
            "Code review for feature X",
            CognitiveState::new(confidence, 92.0),
        )
        .unwrap()
    }

    fn with_consent(confidence: f64, record: ConsentRecord) -> VcaRecord {
        let mut v = vca(confidence);
        v.record_consent(record, ReconfirmPolicy::Reject).unwrap();
        v
    }

    #[test]
    fn test_reward_tiers() {
        assert_eq!(vgt_reward(EntryStatus::Executed, 96.0), 10);
        assert_eq!(vgt_reward(EntryStatus::Executed, 95.0), 10);
        assert_eq!(vgt_reward(EntryStatus::Executed, 93.0), 5);
        assert_eq!(vgt_reward(EntryStatus::Executed, 90.0), 5);
        assert_eq!(vgt_reward(EntryStatus::Executed, 89.99), 3);
        assert_eq!(vgt_reward(EntryStatus::Vetoed, 99.0), 0);
        assert_eq!(vgt_reward(EntryStatus::Pending, 99.0), 0);
    }

    #[test]
    fn test_entry_from_approved_vca() {
        let entry = VcaEntry::from_vca(&with_consent(96.0, ConsentRecord::approved())).unwrap();
        assert_eq!(entry.action, LedgerAction::Execute);
        assert_eq!(entry.status, EntryStatus::Executed);
        assert_eq!(entry.vgt_reward, 10);
        assert_eq!(entry.human_consent, ConsentResponse::Approved);
        assert!(entry.metadata.verified);
    }

    #[test]
    fn test_entry_from_vetoed_vca() {
        let entry = VcaEntry::from_vca(&with_consent(99.0, ConsentRecord::vetoed())).unwrap();
        assert_eq!(entry.action, LedgerAction::Veto);
        assert_eq!(entry.status, EntryStatus::Vetoed);
        assert_eq!(entry.vgt_reward, 0);
    }

    #[test]
    fn test_entry_from_unrecognized_consent() {
        let odd = ConsentRecord::new(ConsentResponse::Unrecognized("maybe".into()));
        let entry = VcaEntry::from_vca(&with_consent(97.0, odd)).unwrap();
        assert_eq!(entry.action, LedgerAction::Unknown);
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.vgt_reward, 0);
        assert_eq!(entry.human_consent.as_str(), "maybe");
    }

    #[test]
    fn test_entry_requires_consent() {
        let err = VcaEntry::from_vca(&vca(96.0)).unwrap_err();
        assert!(matches!(err, VcaError::MissingConsent(_)));
    }

    #[test]
    fn test_proof_hash_matches_canonical_fingerprint() {
        let v = with_consent(96.0, ConsentRecord::approved());
        let entry = VcaEntry::from_vca(&v).unwrap();
        let reordered = json!({"curve": "bn128", "protocol": "groth16"});
        assert_eq!(entry.proof_hash, proof_hash(&reordered).unwrap());
    }

    #[test]
    fn test_ledger_entry_json_shape() {
        let v = with_consent(93.0, ConsentRecord::approved());
        let entry = LedgerEntry::new(1, LedgerRecord::Vca(VcaEntry::from_vca(&v).unwrap()));
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["tx_id"], "tx-000001");
        assert_eq!(json["entry_type"], "vca");
        assert_eq!(json["action"], "execute");
        assert_eq!(json["status"], "executed");
        assert_eq!(json["human_consent"], "approved");
        assert_eq!(json["vgt_reward"], 5);
        assert_eq!(json["proof_hash"].as_str().unwrap().len(), 64);

        let back: LedgerEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let v = with_consent(96.0, ConsentRecord::approved());
        let mut entry = VcaEntry::from_vca(&v).unwrap();
        entry.cognitive_state.confidence = 10.0;
        assert_eq!(v.confidence(), 96.0);
    }

    #[test]
    fn test_summary_counts() {
        let approved = with_consent(96.0, ConsentRecord::approved());
        let vetoed = with_consent(96.0, ConsentRecord::vetoed());
        let entries = vec![
            LedgerEntry::new(1, LedgerRecord::Vca(VcaEntry::from_vca(&approved).unwrap())),
            LedgerEntry::new(2, LedgerRecord::Vca(VcaEntry::from_vca(&vetoed).unwrap())),
        ];
        let summary = LedgerSummary::from_entries(&entries);
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.vetoed, 1);
        assert_eq!(summary.total_vgt, 10);
    }
}
