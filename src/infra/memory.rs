//! In-memory stores
//!
//! Used by tests, benches and dry runs. The ledger holds its mutex across the
//! whole check-assign-append step, so concurrent appends are serialized the
//! same way the SQLite store serializes them.

use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::domain::{
    BatchId, DuplicatePolicy, LedgerEntry, LedgerRecord, RollupEntry, VcaId, VcaRecord,
};

use super::{LedgerStore, Result, RollupStore, VcaError, VcaStore};

#[derive(Default)]
struct LedgerState {
    head: u64,
    entries: Vec<LedgerEntry>,
}

/// Ledger kept in process memory
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn append(&self, record: LedgerRecord, policy: DuplicatePolicy) -> Result<LedgerEntry> {
        let mut state = self.state.lock().await;

        let subject = record.subject_id();
        if policy == DuplicatePolicy::Reject
            && state
                .entries
                .iter()
                .any(|e| e.record.subject_id() == subject)
        {
            return Err(VcaError::DuplicatePosting(subject.to_string()));
        }

        let sequence = state.head + 1;
        let entry = LedgerEntry::new(sequence, record);
        state.head = sequence;
        state.entries.push(entry.clone());

        debug!(tx_id = %entry.tx_id, subject = entry.record.subject_id(), "appended");
        Ok(entry)
    }

    async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.state.lock().await.entries.clone())
    }

    async fn contains_subject(&self, subject_id: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .any(|e| e.record.subject_id() == subject_id))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.state.lock().await.entries.len() as u64)
    }

    async fn head(&self) -> Result<u64> {
        Ok(self.state.lock().await.head)
    }
}

/// VCA and rollup documents kept in process memory
#[derive(Default)]
pub struct InMemoryDocumentStore {
    vcas: RwLock<HashMap<VcaId, VcaRecord>>,
    rollups: RwLock<HashMap<BatchId, RollupEntry>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VcaStore for InMemoryDocumentStore {
    async fn create_vca(&self, vca: &VcaRecord) -> Result<()> {
        match self.vcas.write().await.entry(vca.vca_id().clone()) {
            Entry::Occupied(_) => Err(VcaError::already_exists("VCA", vca.vca_id())),
            Entry::Vacant(slot) => {
                slot.insert(vca.clone());
                Ok(())
            }
        }
    }

    async fn save_vca(&self, vca: &VcaRecord) -> Result<()> {
        self.vcas
            .write()
            .await
            .insert(vca.vca_id().clone(), vca.clone());
        Ok(())
    }

    async fn load_vca(&self, vca_id: &VcaId) -> Result<VcaRecord> {
        self.vcas
            .read()
            .await
            .get(vca_id)
            .cloned()
            .ok_or_else(|| VcaError::not_found("VCA", vca_id))
    }

    async fn vca_exists(&self, vca_id: &VcaId) -> Result<bool> {
        Ok(self.vcas.read().await.contains_key(vca_id))
    }
}

#[async_trait]
impl RollupStore for InMemoryDocumentStore {
    async fn save_rollup(&self, rollup: &RollupEntry) -> Result<()> {
        match self.rollups.write().await.entry(rollup.batch_id.clone()) {
            Entry::Occupied(_) => Err(VcaError::already_exists("batch", &rollup.batch_id)),
            Entry::Vacant(slot) => {
                slot.insert(rollup.clone());
                Ok(())
            }
        }
    }

    async fn load_rollup(&self, batch_id: &BatchId) -> Result<RollupEntry> {
        self.rollups
            .read()
            .await
            .get(batch_id)
            .cloned()
            .ok_or_else(|| VcaError::not_found("batch", batch_id))
    }

    async fn rollup_exists(&self, batch_id: &BatchId) -> Result<bool> {
        Ok(self.rollups.read().await.contains_key(batch_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CognitiveState, ConsentRecord, GasSchedule, ProofArtifacts, ProofAttestation,
        ReconfirmPolicy, VerificationReport, DEFAULT_CIRCUIT,
    };
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn vca() -> VcaRecord {
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
        VcaRecord::new(attestation, "intent", "task", CognitiveState::new(94.0, 92.0)).unwrap()
    }

    fn rollup_record(id: &str) -> LedgerRecord {
        LedgerRecord::BatchRollup(
            RollupEntry::from_vcas(&[vca()], BatchId::from(id), &GasSchedule::default()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_ids() {
        let ledger = InMemoryLedger::new();
        let first = ledger
            .append(rollup_record("batch-1"), DuplicatePolicy::Reject)
            .await
            .unwrap();
        let second = ledger
            .append(rollup_record("batch-2"), DuplicatePolicy::Reject)
            .await
            .unwrap();

        assert_eq!(first.tx_id.as_str(), "tx-000001");
        assert_eq!(second.tx_id.as_str(), "tx-000002");
        assert_eq!(ledger.head().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_rejected_and_ledger_unchanged() {
        let ledger = InMemoryLedger::new();
        ledger
            .append(rollup_record("batch-1"), DuplicatePolicy::Reject)
            .await
            .unwrap();

        let err = ledger
            .append(rollup_record("batch-1"), DuplicatePolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, VcaError::DuplicatePosting(_)));
        assert_eq!(ledger.count().await.unwrap(), 1);

        ledger
            .append(rollup_record("batch-1"), DuplicatePolicy::AllowDuplicate)
            .await
            .unwrap();
        assert_eq!(ledger.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_ids() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .append(rollup_record(&format!("batch-{i}")), DuplicatePolicy::Reject)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entries = ledger.entries().await.unwrap();
        assert_eq!(entries.len(), 20);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.sequence(), Some(i as u64 + 1));
        }
    }

    #[tokio::test]
    async fn test_document_store_not_found() {
        let store = InMemoryDocumentStore::new();
        let err = store.load_vca(&VcaId::from("vca-missing")).await.unwrap_err();
        assert!(matches!(err, VcaError::NotFound { .. }));

        let v = vca();
        store.save_vca(&v).await.unwrap();
        assert!(store.vca_exists(v.vca_id()).await.unwrap());
        assert_eq!(store.load_vca(v.vca_id()).await.unwrap(), v);
    }

    #[tokio::test]
    async fn test_create_never_replaces_a_stored_document() {
        let store = InMemoryDocumentStore::new();
        let mut v = vca();
        store.create_vca(&v).await.unwrap();

        v.record_consent(ConsentRecord::approved(), ReconfirmPolicy::Reject)
            .unwrap();
        store.save_vca(&v).await.unwrap();

        let err = store.create_vca(&vca_with_id(&v)).await.unwrap_err();
        assert!(matches!(err, VcaError::AlreadyExists { .. }));
        assert!(store.load_vca(v.vca_id()).await.unwrap().consent().is_some());

        let rollup =
            RollupEntry::from_vcas(&[vca()], BatchId::from("batch-1"), &GasSchedule::default())
                .unwrap();
        store.save_rollup(&rollup).await.unwrap();
        let err = store.save_rollup(&rollup).await.unwrap_err();
        assert!(matches!(err, VcaError::AlreadyExists { .. }));
    }

    /// A fresh, unconfirmed VCA that reuses an existing id
    fn vca_with_id(existing: &VcaRecord) -> VcaRecord {
        let mut doc = serde_json::to_value(vca()).unwrap();
        doc["vca_id"] = json!(existing.vca_id().as_str());
        serde_json::from_value(doc).unwrap()
    }
}
