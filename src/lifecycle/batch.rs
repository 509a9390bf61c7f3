//! Batch minting
//!
//! Generates a run of VCAs with stepped confidence and records a single
//! rollup describing them. One failed VCA does not abort the batch.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::domain::{sample_intent, BatchId, CognitiveState, GasSchedule, RollupEntry, VcaRecord};
use crate::infra::{Result, RollupStore, VcaError};
use crate::metrics::{metric_names, MetricsRegistry};

use super::{GenerateRequest, VcaGenerator};

/// Confidence added per VCA in a batch
pub const CONFIDENCE_STEP: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchRequest {
    pub count: usize,
    pub base_confidence: f64,
    pub threshold: f64,
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self {
            count: 10,
            base_confidence: 94.0,
            threshold: 92.0,
        }
    }
}

impl BatchRequest {
    /// Confidence of the `index`-th VCA
    pub fn confidence_at(&self, index: usize) -> f64 {
        self.base_confidence + index as f64 * CONFIDENCE_STEP
    }
}

/// A VCA the batch could not produce
#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub intent: &'static str,
    pub error: VcaError,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub rollup: RollupEntry,
    pub vcas: Vec<VcaRecord>,
    pub failures: Vec<BatchFailure>,
    pub elapsed: Duration,
}

pub struct BatchMinter {
    generator: VcaGenerator,
    rollups: Arc<dyn RollupStore>,
    gas: GasSchedule,
    metrics: Arc<MetricsRegistry>,
}

impl BatchMinter {
    pub fn new(generator: VcaGenerator, rollups: Arc<dyn RollupStore>, gas: GasSchedule) -> Self {
        Self {
            generator,
            rollups,
            gas,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Mint `count` VCAs and store their rollup.
    ///
    /// VCAs are generated one after another; failures are logged, collected
    /// and skipped. If nothing succeeds the batch is `InvalidBatch` and no
    /// rollup is written.
    #[instrument(skip(self))]
    pub async fn mint(&self, request: BatchRequest) -> Result<BatchOutcome> {
        if request.count == 0 {
            return Err(VcaError::InvalidBatch("count must be at least 1".into()));
        }

        let start = Instant::now();
        let mut vcas = Vec::with_capacity(request.count);
        let mut failures = Vec::new();

        for index in 0..request.count {
            let (intent, task_data) = sample_intent(index);
            let state = CognitiveState::new(request.confidence_at(index), request.threshold);

            match self
                .generator
                .generate(GenerateRequest::new(intent, task_data, state))
                .await
            {
                Ok(vca) => {
                    info!(index, vca_id = %vca.vca_id(), "batch item minted");
                    self.metrics.inc_counter(metric_names::BATCH_ITEMS_MINTED).await;
                    vcas.push(vca);
                }
                Err(error) => {
                    warn!(index, intent, %error, "batch item failed; skipping");
                    self.metrics.inc_counter(metric_names::BATCH_ITEMS_FAILED).await;
                    failures.push(BatchFailure {
                        index,
                        intent,
                        error,
                    });
                }
            }
        }

        if vcas.is_empty() {
            return Err(VcaError::InvalidBatch(format!(
                "no VCAs generated ({} failures)",
                failures.len()
            )));
        }

        let batch_id = self.next_batch_id().await?;
        let rollup = RollupEntry::from_vcas(&vcas, batch_id, &self.gas)?;
        self.rollups.save_rollup(&rollup).await?;

        info!(
            batch_id = %rollup.batch_id,
            minted = vcas.len(),
            failed = failures.len(),
            "batch complete"
        );

        Ok(BatchOutcome {
            rollup,
            vcas,
            failures,
            elapsed: start.elapsed(),
        })
    }

    async fn next_batch_id(&self) -> Result<BatchId> {
        let id = BatchId::from_timestamp(Utc::now());
        if self.rollups.rollup_exists(&id).await? {
            return Ok(id.with_suffix());
        }
        Ok(id)
    }
}
