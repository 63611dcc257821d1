//! Database initialization
//!
//! Creates the database on first run and applies the production schema.
//! All statements are idempotent (`CREATE TABLE IF NOT EXISTS`), so opening an
//! existing database is safe.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use sqlite options to create database if it doesn't exist
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows the read side to query while a promotion transaction is open
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Set busy timeout so concurrent readers don't error out immediately
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_transactions_table(&pool).await?;
    create_monthly_aggregates_table(&pool).await?;
    create_project_lookup_table(&pool).await?;

    Ok(pool)
}

/// Create the production transactions table
///
/// `row_hash` is the digest of the natural-key fields and the table's primary
/// key. Promotion inserts with `ON CONFLICT(row_hash) DO NOTHING`, so the
/// uniqueness constraint is the sole cross-batch conflict-resolution
/// mechanism. `is_outlier` is carried from staging; read-side queries must
/// filter on it explicitly.
async fn create_transactions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            row_hash TEXT PRIMARY KEY,
            project TEXT NOT NULL,
            sale_date TEXT NOT NULL,
            transaction_month TEXT NOT NULL,
            price INTEGER NOT NULL,
            area_sqft REAL NOT NULL,
            psf REAL NOT NULL,
            floor_range TEXT,
            floor_level TEXT,
            bedroom_count INTEGER,
            district INTEGER,
            region TEXT,
            tenure_class TEXT,
            property_type TEXT,
            sale_type TEXT,
            is_outlier INTEGER NOT NULL DEFAULT 0,
            promoted_batch_id TEXT NOT NULL,
            promoted_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Index design for the external query layer
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_month ON transactions (transaction_month)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_district ON transactions (district)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_batch ON transactions (promoted_batch_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the cached monthly aggregate statistics table
async fn create_monthly_aggregates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS monthly_aggregates (
            region TEXT NOT NULL,
            transaction_month TEXT NOT NULL,
            transaction_count INTEGER NOT NULL,
            median_psf REAL,
            total_value INTEGER NOT NULL,
            refreshed_at TEXT NOT NULL,
            PRIMARY KEY (region, transaction_month)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the auxiliary project lookup table
async fn create_project_lookup_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_lookup (
            project TEXT PRIMARY KEY,
            district INTEGER,
            region TEXT,
            transaction_count INTEGER NOT NULL DEFAULT 0,
            last_seen_month TEXT,
            refreshed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
