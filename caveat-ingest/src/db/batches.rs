//! Batch audit record persistence
//!
//! The batch is saved after every stage transition so a crash leaves an
//! accurate audit trail of how far the run got.

use caveat_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{Batch, BatchStatus};

/// Insert or update a batch audit record
pub async fn save_batch(pool: &SqlitePool, batch: &Batch) -> Result<()> {
    let batch_id = batch.batch_id.to_string();
    let status = batch.status.as_str();
    let started_at = batch.started_at.to_rfc3339();
    let ended_at = batch.ended_at.map(|dt| dt.to_rfc3339());
    let file_fingerprints = serde_json::to_string(&batch.file_fingerprints)
        .map_err(|e| Error::Internal(format!("serialize file_fingerprints: {}", e)))?;
    let contract_report = batch
        .contract_report
        .as_ref()
        .map(|r| r.to_string());
    let validation_issues = serde_json::to_string(&batch.validation_issues)
        .map_err(|e| Error::Internal(format!("serialize validation_issues: {}", e)))?;
    let semantic_warnings = serde_json::to_string(&batch.semantic_warnings)
        .map_err(|e| Error::Internal(format!("serialize semantic_warnings: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO batches (
            batch_id, started_at, ended_at, status,
            file_fingerprints, schema_version, rules_version, contract_hash,
            header_fingerprint, contract_report,
            rows_loaded, rows_after_dedup, rows_outliers_marked, rows_promoted,
            validation_passed, validation_issues, semantic_warnings
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(batch_id) DO UPDATE SET
            ended_at = excluded.ended_at,
            status = excluded.status,
            header_fingerprint = excluded.header_fingerprint,
            contract_report = excluded.contract_report,
            rows_loaded = excluded.rows_loaded,
            rows_after_dedup = excluded.rows_after_dedup,
            rows_outliers_marked = excluded.rows_outliers_marked,
            rows_promoted = excluded.rows_promoted,
            validation_passed = excluded.validation_passed,
            validation_issues = excluded.validation_issues,
            semantic_warnings = excluded.semantic_warnings
        "#,
    )
    .bind(&batch_id)
    .bind(&started_at)
    .bind(&ended_at)
    .bind(status)
    .bind(&file_fingerprints)
    .bind(&batch.schema_version)
    .bind(&batch.rules_version)
    .bind(&batch.contract_hash)
    .bind(&batch.header_fingerprint)
    .bind(&contract_report)
    .bind(batch.rows_loaded as i64)
    .bind(batch.rows_after_dedup as i64)
    .bind(batch.rows_outliers_marked as i64)
    .bind(batch.rows_promoted as i64)
    .bind(batch.validation_passed)
    .bind(&validation_issues)
    .bind(&semantic_warnings)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a batch by id
pub async fn load_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<Batch>> {
    let row = sqlx::query("SELECT * FROM batches WHERE batch_id = ?")
        .bind(batch_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(batch_from_row).transpose()
}

/// Most recently started batch in the given status, for `--publish` and
/// `--rollback` target selection
pub async fn latest_batch_with_status(
    pool: &SqlitePool,
    status: BatchStatus,
) -> Result<Option<Batch>> {
    let row = sqlx::query(
        "SELECT * FROM batches WHERE status = ? ORDER BY started_at DESC LIMIT 1",
    )
    .bind(status.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(batch_from_row).transpose()
}

fn batch_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Batch> {
    let batch_id: String = row.get("batch_id");
    let batch_id = Uuid::parse_str(&batch_id)
        .map_err(|e| Error::Internal(format!("invalid batch_id in batches table: {}", e)))?;

    let status: String = row.get("status");
    let status = parse_status(&status)?;

    let started_at: String = row.get("started_at");
    let started_at = chrono::DateTime::parse_from_rfc3339(&started_at)
        .map_err(|e| Error::Internal(format!("invalid started_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at
        .map(|s| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| Error::Internal(format!("invalid ended_at: {}", e)))
        })
        .transpose()?;

    let file_fingerprints: String = row.get("file_fingerprints");
    let file_fingerprints: BTreeMap<String, String> = serde_json::from_str(&file_fingerprints)
        .map_err(|e| Error::Internal(format!("deserialize file_fingerprints: {}", e)))?;

    let contract_report: Option<String> = row.get("contract_report");
    let contract_report = contract_report
        .map(|s| {
            serde_json::from_str(&s)
                .map_err(|e| Error::Internal(format!("deserialize contract_report: {}", e)))
        })
        .transpose()?;

    let validation_issues: String = row.get("validation_issues");
    let validation_issues: Vec<String> = serde_json::from_str(&validation_issues)
        .map_err(|e| Error::Internal(format!("deserialize validation_issues: {}", e)))?;

    let semantic_warnings: String = row.get("semantic_warnings");
    let semantic_warnings: Vec<String> = serde_json::from_str(&semantic_warnings)
        .map_err(|e| Error::Internal(format!("deserialize semantic_warnings: {}", e)))?;

    Ok(Batch {
        batch_id,
        started_at,
        ended_at,
        status,
        file_fingerprints,
        schema_version: row.get("schema_version"),
        rules_version: row.get("rules_version"),
        contract_hash: row.get("contract_hash"),
        header_fingerprint: row.get("header_fingerprint"),
        contract_report,
        rows_loaded: row.get::<i64, _>("rows_loaded") as u64,
        rows_after_dedup: row.get::<i64, _>("rows_after_dedup") as u64,
        rows_outliers_marked: row.get::<i64, _>("rows_outliers_marked") as u64,
        rows_promoted: row.get::<i64, _>("rows_promoted") as u64,
        validation_passed: row.get("validation_passed"),
        validation_issues,
        semantic_warnings,
    })
}

fn parse_status(s: &str) -> Result<BatchStatus> {
    match s {
        "staging" => Ok(BatchStatus::Staging),
        "validating" => Ok(BatchStatus::Validating),
        "ready" => Ok(BatchStatus::Ready),
        "promoting" => Ok(BatchStatus::Promoting),
        "completed" => Ok(BatchStatus::Completed),
        "failed" => Ok(BatchStatus::Failed),
        "rolled_back" => Ok(BatchStatus::RolledBack),
        other => Err(Error::Internal(format!("unknown batch status '{}'", other))),
    }
}
