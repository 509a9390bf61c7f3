//! Ledger ingestion
//!
//! Turns consented VCAs and stored rollups into ledger entries. The store
//! does the duplicate check and id assignment; this layer derives the entry
//! body and keeps the metrics.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::{
    BatchId, DuplicatePolicy, LedgerEntry, LedgerRecord, LedgerSummary, VcaEntry, VcaId,
    VcaRecord,
};
use crate::infra::{LedgerStore, Result, RollupStore, VcaError, VcaStore};
use crate::metrics::{metric_names, MetricsRegistry};

pub struct LedgerService {
    ledger: Arc<dyn LedgerStore>,
    vcas: Arc<dyn VcaStore>,
    rollups: Arc<dyn RollupStore>,
    metrics: Arc<MetricsRegistry>,
}

impl LedgerService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        vcas: Arc<dyn VcaStore>,
        rollups: Arc<dyn RollupStore>,
    ) -> Self {
        Self {
            ledger,
            vcas,
            rollups,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Post a stored VCA by id
    #[instrument(skip(self), fields(vca_id = %vca_id))]
    pub async fn post(&self, vca_id: &VcaId, policy: DuplicatePolicy) -> Result<LedgerEntry> {
        let vca = self.vcas.load_vca(vca_id).await?;
        self.post_vca(&vca, policy).await
    }

    /// Post a VCA that carries consent.
    ///
    /// Fails with `MissingConsent` before touching the ledger, and with
    /// `DuplicatePosting` when the VCA is already present and the policy is
    /// `Reject`.
    pub async fn post_vca(&self, vca: &VcaRecord, policy: DuplicatePolicy) -> Result<LedgerEntry> {
        let body = VcaEntry::from_vca(vca)?;
        let entry = self.append(LedgerRecord::Vca(body), policy).await?;

        self.metrics
            .add_counter(metric_names::VGT_ISSUED, entry.record.vgt_reward())
            .await;
        info!(
            tx_id = %entry.tx_id,
            status = %entry.record.status(),
            vgt = entry.record.vgt_reward(),
            "VCA posted"
        );
        Ok(entry)
    }

    /// Fold a stored batch rollup into the ledger. Each batch can be folded
    /// once.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn post_rollup(&self, batch_id: &BatchId) -> Result<LedgerEntry> {
        let rollup = self.rollups.load_rollup(batch_id).await?;
        rollup.validate()?;
        let entry = self
            .append(LedgerRecord::BatchRollup(rollup), DuplicatePolicy::Reject)
            .await?;

        self.metrics.inc_counter(metric_names::ROLLUPS_POSTED).await;
        info!(tx_id = %entry.tx_id, "rollup posted");
        Ok(entry)
    }

    async fn append(&self, record: LedgerRecord, policy: DuplicatePolicy) -> Result<LedgerEntry> {
        match self.ledger.append(record, policy).await {
            Ok(entry) => {
                self.metrics.inc_counter(metric_names::ENTRIES_POSTED).await;
                if let Some(seq) = entry.sequence() {
                    self.metrics.set_gauge(metric_names::LEDGER_HEAD, seq).await;
                }
                Ok(entry)
            }
            Err(err @ VcaError::DuplicatePosting(_)) => {
                self.metrics
                    .inc_counter(metric_names::DUPLICATES_REJECTED)
                    .await;
                warn!(%err, "duplicate posting rejected");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Whether a VCA or batch already has a ledger entry
    pub async fn is_posted(&self, subject_id: &str) -> Result<bool> {
        self.ledger.contains_subject(subject_id).await
    }

    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries().await
    }

    pub async fn summary(&self) -> Result<LedgerSummary> {
        Ok(LedgerSummary::from_entries(&self.entries().await?))
    }

    /// Whole ledger as a pretty-printed JSON array
    pub async fn export_json(&self) -> Result<String> {
        let entries = self.entries().await?;
        Ok(serde_json::to_string_pretty(&entries)?)
    }
}
