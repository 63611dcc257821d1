//! Bookkeeping table creation
//!
//! All statements are idempotent, safe to run on every startup.

use caveat_common::Result;
use sqlx::SqlitePool;

/// Create the batches, staging_rows and run_lock tables if missing
pub async fn init_ingest_tables(pool: &SqlitePool) -> Result<()> {
    create_batches_table(pool).await?;
    create_staging_rows_table(pool).await?;
    create_run_lock_table(pool).await?;
    Ok(())
}

/// Batch audit record, one row per ingestion run
async fn create_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            batch_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            status TEXT NOT NULL,
            file_fingerprints TEXT NOT NULL,
            schema_version TEXT NOT NULL,
            rules_version TEXT NOT NULL,
            contract_hash TEXT NOT NULL,
            header_fingerprint TEXT NOT NULL DEFAULT '',
            contract_report TEXT,
            rows_loaded INTEGER NOT NULL DEFAULT 0,
            rows_after_dedup INTEGER NOT NULL DEFAULT 0,
            rows_outliers_marked INTEGER NOT NULL DEFAULT 0,
            rows_promoted INTEGER NOT NULL DEFAULT 0,
            validation_passed INTEGER,
            validation_issues TEXT NOT NULL DEFAULT '[]',
            semantic_warnings TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_batches_status ON batches (status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_batches_started ON batches (started_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Batch-scoped staging area; rows are never mixed across batches
async fn create_staging_rows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_rows (
            batch_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            project TEXT NOT NULL,
            sale_date TEXT NOT NULL,
            price INTEGER NOT NULL,
            area_sqft REAL NOT NULL,
            floor_range TEXT,
            district INTEGER,
            tenure TEXT,
            property_type TEXT,
            sale_type TEXT,
            market_segment TEXT,
            transaction_month TEXT NOT NULL,
            psf_source REAL,
            psf_calc REAL NOT NULL,
            psf_reconciled REAL NOT NULL,
            bedroom_count INTEGER,
            floor_level TEXT,
            region TEXT,
            tenure_class TEXT,
            raw_extras TEXT NOT NULL DEFAULT '{}',
            row_hash TEXT NOT NULL,
            is_valid INTEGER NOT NULL DEFAULT 1,
            invalid_reason TEXT,
            is_outlier INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (batch_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_staging_rows_hash ON staging_rows (batch_id, row_hash)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Single-row run lock; INSERT failure on the fixed id is the fail-fast path
async fn create_run_lock_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            batch_id TEXT NOT NULL,
            acquired_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
