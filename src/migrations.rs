//! Database migrations.
//!
//! Uses SQLx embedded migrations for the SQLite ledger.

use sqlx::SqlitePool;

use crate::infra::{Result, VcaError};

static SQLITE_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/sqlite");

pub async fn run_sqlite(pool: &SqlitePool) -> Result<()> {
    SQLITE_MIGRATOR
        .run(pool)
        .await
        .map_err(|e| VcaError::Database(e.into()))
}
