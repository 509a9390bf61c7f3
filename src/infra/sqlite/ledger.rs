//! SQLite-backed append-only ledger
//!
//! Appends run in one transaction: bump the `ledger_head` counter (which
//! takes SQLite's write lock), check for a duplicate subject, insert. A
//! duplicate rolls the transaction back, so the counter never skips. An
//! in-process mutex keeps writers from the same process from contending on
//! the database lock; `UNIQUE` on `seq` and `tx_id` makes a racing writer
//! from another process fail instead of overwriting.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::domain::{DuplicatePolicy, LedgerEntry, LedgerRecord};
use crate::infra::{LedgerStore, Result, VcaError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite ledger store
pub struct SqliteLedger {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteLedger {
    /// Wrap an existing pool. The schema must already be migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Open (creating if missing) the database at `url` and migrate it
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let ledger = Self::new(pool);
        ledger.initialize().await?;
        Ok(ledger)
    }

    /// Private in-memory database. A single pooled connection that is never
    /// recycled, since each new connection would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let ledger = Self::new(pool);
        ledger.initialize().await?;
        Ok(ledger)
    }

    /// Apply embedded migrations
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    seq: i64,
    tx_id: String,
    document: String,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = VcaError;

    fn try_from(row: LedgerRow) -> Result<Self> {
        let entry: LedgerEntry = serde_json::from_str(&row.document)?;
        if entry.tx_id.as_str() != row.tx_id || entry.sequence() != Some(row.seq as u64) {
            return Err(VcaError::Internal(format!(
                "ledger row {} does not match its document ({})",
                row.seq, entry.tx_id
            )));
        }
        Ok(entry)
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    #[instrument(skip(self, record), fields(subject = record.subject_id()))]
    async fn append(&self, record: LedgerRecord, policy: DuplicatePolicy) -> Result<LedgerEntry> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let head: i64 = sqlx::query_scalar(
            "UPDATE ledger_head SET head = head + 1, updated_at = ? WHERE id = 1 RETURNING head",
        )
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        if policy == DuplicatePolicy::Reject {
            let existing: Option<String> = sqlx::query_scalar(
                "SELECT tx_id FROM ledger_entries WHERE subject_id = ? ORDER BY seq LIMIT 1",
            )
            .bind(record.subject_id())
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(tx_id) = existing {
                tx.rollback().await?;
                debug!(%tx_id, "duplicate subject rejected");
                return Err(VcaError::DuplicatePosting(record.subject_id().to_string()));
            }
        }

        let entry = LedgerEntry::new(head as u64, record);
        let document = serde_json::to_string(&entry)?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (seq, tx_id, entry_type, subject_id, posted_at, document)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(head)
        .bind(entry.tx_id.as_str())
        .bind(entry.record.entry_type())
        .bind(entry.record.subject_id())
        .bind(&now)
        .bind(&document)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(tx_id = %entry.tx_id, "appended");
        Ok(entry)
    }

    async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            "SELECT seq, tx_id, document FROM ledger_entries ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn contains_subject(&self, subject_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM ledger_entries WHERE subject_id = ?)",
        )
        .bind(subject_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn head(&self) -> Result<u64> {
        let head: i64 = sqlx::query_scalar("SELECT head FROM ledger_head WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(head as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BatchId, CognitiveState, GasSchedule, ProofArtifacts, ProofAttestation, RollupEntry,
        VcaRecord, VerificationReport, DEFAULT_CIRCUIT,
    };
    use serde_json::json;
    use std::path::PathBuf;

    fn rollup(id: &str) -> LedgerRecord {
        let attestation = ProofAttestation::from_artifacts(
            ProofArtifacts {
                proof_file: PathBuf::from("p.json"),
                public_file: PathBuf::from("s.json"),
                proof: json!({"protocol": "groth16"}),
                public_signals: json!(["1"]),
            },
            DEFAULT_CIRCUIT,
            &VerificationReport::valid("OK!"),
        );
        let vca = VcaRecord::new(attestation, "intent", "", CognitiveState::new(94.0, 92.0))
            .unwrap();
        LedgerRecord::BatchRollup(
            RollupEntry::from_vcas(&[vca], BatchId::from(id), &GasSchedule::default()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let entry = ledger
            .append(rollup("batch-1"), DuplicatePolicy::Reject)
            .await
            .unwrap();
        assert_eq!(entry.tx_id.as_str(), "tx-000001");

        let entries = ledger.entries().await.unwrap();
        assert_eq!(entries, vec![entry]);
        assert!(ledger.contains_subject("batch-1").await.unwrap());
        assert!(!ledger.contains_subject("batch-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_rolls_back_counter() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger
            .append(rollup("batch-1"), DuplicatePolicy::Reject)
            .await
            .unwrap();

        let err = ledger
            .append(rollup("batch-1"), DuplicatePolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, VcaError::DuplicatePosting(_)));
        assert_eq!(ledger.count().await.unwrap(), 1);
        assert_eq!(ledger.head().await.unwrap(), 1);

        let next = ledger
            .append(rollup("batch-2"), DuplicatePolicy::Reject)
            .await
            .unwrap();
        assert_eq!(next.tx_id.as_str(), "tx-000002");
    }

    #[tokio::test]
    async fn test_entries_cannot_be_modified() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger
            .append(rollup("batch-1"), DuplicatePolicy::Reject)
            .await
            .unwrap();

        let update = sqlx::query("UPDATE ledger_entries SET document = '{}'")
            .execute(ledger.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM ledger_entries")
            .execute(ledger.pool())
            .await;
        assert!(delete.is_err());
        assert_eq!(ledger.count().await.unwrap(), 1);
    }
}
