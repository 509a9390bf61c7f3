//! Batch rollup
//!
//! Summarises a batch of freshly minted VCAs as a single ledger entry and
//! estimates what batching saves compared with posting each VCA on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::infra::{Result, VcaError};

use super::{now_millis, utc_timestamp, BatchId, EntryStatus, LedgerAction, VcaId, VcaRecord};

/// Sample intents cycled through when minting a batch
pub const SAMPLE_INTENTS: [(&str, &str); 10] = [
    ("Approve email to team", "Send project update email"),
    ("Schedule standup meeting", "Book 15min daily sync"),
    ("Review pull request", "Code review for feature X"),
    ("Update documentation", "Add API examples to README"),
    ("Respond to Slack message", "Answer technical question"),
    ("Create calendar event", "Block focus time tomorrow"),
    ("Archive completed tasks", "Clean up task board"),
    ("Send meeting notes", "Distribute notes from planning session"),
    ("Update project timeline", "Adjust milestones in tracker"),
    ("Approve expense report", "Sign off on team lunch expense"),
];

/// `(intent, task_data)` for the `index`-th VCA of a batch
pub fn sample_intent(index: usize) -> (&'static str, &'static str) {
    SAMPLE_INTENTS[index % SAMPLE_INTENTS.len()]
}

/// VGT per VCA when each one is approved individually
pub const VGT_PER_INDIVIDUAL: u64 = 5;
/// Flat VGT for approving a whole batch
pub const VGT_AMORTIZED: u64 = 3;

/// Simulated gas costs. Only used for the savings estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSchedule {
    pub per_tx_gas: u64,
    pub batch_overhead_gas: u64,
    pub per_item_gas: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            per_tx_gas: 150_000,
            batch_overhead_gas: 50_000,
            per_item_gas: 20_000,
        }
    }
}

impl GasSchedule {
    /// Cost comparison for a batch of `count` VCAs.
    pub fn analyze(&self, count: usize) -> CostAnalysis {
        let n = count as u64;
        let individual_cost = self.per_tx_gas.saturating_mul(n);
        let batch_cost = self
            .batch_overhead_gas
            .saturating_add(self.per_item_gas.saturating_mul(n));
        let savings = individual_cost as i64 - batch_cost as i64;
        let savings_percent = if individual_cost == 0 {
            0.0
        } else {
            savings as f64 / individual_cost as f64 * 100.0
        };

        CostAnalysis {
            individual_cost,
            batch_cost,
            savings,
            savings_percent,
        }
    }
}

/// Gas comparison between individual posting and a rollup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub individual_cost: u64,
    pub batch_cost: u64,
    /// Negative when batching costs more
    pub savings: i64,
    /// Unrounded; use `savings_percent_display` for output
    pub savings_percent: f64,
}

impl CostAnalysis {
    pub fn savings_percent_display(&self) -> String {
        format!("{:.1}%", self.savings_percent)
    }
}

/// Reward projection under both approval models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VgtProjection {
    pub individual_total: u64,
    pub amortized_total: u64,
}

impl VgtProjection {
    pub fn for_count(count: usize) -> Self {
        Self {
            individual_total: count as u64 * VGT_PER_INDIVIDUAL,
            amortized_total: VGT_AMORTIZED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupMetadata {
    /// Every VCA in the batch carries its own proof
    pub individual_proofs: bool,
    pub gas: CostAnalysis,
    pub vgt: VgtProjection,
}

/// Single ledger entry standing in for a batch of VCAs
///
/// Stored documents are checked on read, so a rollup whose counts or
/// classification were edited by hand never reaches the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RollupDocument")]
pub struct RollupEntry {
    pub batch_id: BatchId,
    pub action: LedgerAction,
    pub vca_count: usize,
    pub vca_ids: Vec<VcaId>,
    pub total_confidence_avg: f64,
    pub status: EntryStatus,
    #[serde(with = "utc_timestamp")]
    pub created_at: DateTime<Utc>,
    pub metadata: RollupMetadata,
}

impl RollupEntry {
    /// Build the rollup for a batch.
    ///
    /// The batch must be non-empty, hold each VCA once, and contain only
    /// unconfirmed VCAs.
    pub fn from_vcas(vcas: &[VcaRecord], batch_id: BatchId, schedule: &GasSchedule) -> Result<Self> {
        if vcas.is_empty() {
            return Err(VcaError::InvalidBatch("batch contains no VCAs".into()));
        }

        let mut seen = HashSet::with_capacity(vcas.len());
        for vca in vcas {
            if !seen.insert(vca.vca_id()) {
                return Err(VcaError::InvalidBatch(format!(
                    "VCA {} appears more than once",
                    vca.vca_id()
                )));
            }
            if vca.consent().is_some() {
                return Err(VcaError::InvalidBatch(format!(
                    "VCA {} already carries consent",
                    vca.vca_id()
                )));
            }
        }

        let total: f64 = vcas.iter().map(VcaRecord::confidence).sum();
        let avg = total / vcas.len() as f64;

        Ok(Self {
            batch_id,
            action: LedgerAction::BatchRollup,
            vca_count: vcas.len(),
            vca_ids: vcas.iter().map(|v| v.vca_id().clone()).collect(),
            total_confidence_avg: round_to(avg, 2),
            status: EntryStatus::PendingConfirmation,
            created_at: now_millis(),
            metadata: RollupMetadata {
                individual_proofs: true,
                gas: schedule.analyze(vcas.len()),
                vgt: VgtProjection::for_count(vcas.len()),
            },
        })
    }

    /// Check the invariants `from_vcas` establishes.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            Err(VcaError::InvalidBatch(format!("rollup {}: {reason}", self.batch_id)))
        };

        if self.action != LedgerAction::BatchRollup {
            return invalid(format!("action is {}, expected batch_rollup", self.action));
        }
        if self.status != EntryStatus::PendingConfirmation {
            return invalid(format!("status is {}, expected pending_confirmation", self.status));
        }
        if self.vca_ids.is_empty() {
            return invalid("no VCAs".into());
        }
        if self.vca_count != self.vca_ids.len() {
            return invalid(format!(
                "vca_count is {} but {} ids are listed",
                self.vca_count,
                self.vca_ids.len()
            ));
        }
        let mut seen = HashSet::with_capacity(self.vca_ids.len());
        if let Some(dup) = self.vca_ids.iter().find(|id| !seen.insert(*id)) {
            return invalid(format!("VCA {dup} appears more than once"));
        }
        if !(0.0..=100.0).contains(&self.total_confidence_avg) {
            return invalid(format!(
                "average confidence {} is outside [0, 100]",
                self.total_confidence_avg
            ));
        }
        let gas = &self.metadata.gas;
        if gas.savings != gas.individual_cost as i64 - gas.batch_cost as i64 {
            return invalid("gas savings do not match the listed costs".into());
        }
        if self.metadata.vgt != VgtProjection::for_count(self.vca_count) {
            return invalid("VGT projection does not match the VCA count".into());
        }
        Ok(())
    }
}

/// Wire shape of a rollup document, validated into a `RollupEntry`
#[derive(Deserialize)]
struct RollupDocument {
    batch_id: BatchId,
    action: LedgerAction,
    vca_count: usize,
    vca_ids: Vec<VcaId>,
    total_confidence_avg: f64,
    status: EntryStatus,
    #[serde(with = "utc_timestamp")]
    created_at: DateTime<Utc>,
    metadata: RollupMetadata,
}

impl TryFrom<RollupDocument> for RollupEntry {
    type Error = VcaError;

    fn try_from(doc: RollupDocument) -> Result<Self> {
        let entry = Self {
            batch_id: doc.batch_id,
            action: doc.action,
            vca_count: doc.vca_count,
            vca_ids: doc.vca_ids,
            total_confidence_avg: doc.total_confidence_avg,
            status: doc.status,
            created_at: doc.created_at,
            metadata: doc.metadata,
        };
        entry.validate()?;
        Ok(entry)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
