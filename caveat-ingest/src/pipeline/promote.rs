//! Promotion engine
//!
//! Publish mode bulk-inserts every valid staged row into the production
//! `transactions` table inside one transaction, with hash uniqueness as a
//! no-op conflict rule so re-promoting a partially-promoted batch is safe.
//! Plan mode computes the same diff read-only. Rollback deletes the rows a
//! completed batch promoted.

use caveat_common::{Error, Result};
use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::info;

use crate::models::{Batch, StagingRow};

/// Existing-hash lookups are chunked to stay under SQLite's bind limit
const HASH_LOOKUP_CHUNK: usize = 500;

/// Read-only promotion diff
#[derive(Debug)]
pub struct PromotionPlan {
    /// Valid rows whose hash is not yet in production
    pub new_rows: u64,
    /// Valid rows already promoted by an earlier batch; silent no-ops
    pub hash_collisions: u64,
    pub outlier_count: u64,
    /// Earliest and latest sale date among valid rows
    pub date_window: Option<(NaiveDate, NaiveDate)>,
    /// Districts in this batch with no promoted transaction yet
    pub new_districts: Vec<u8>,
}

impl PromotionPlan {
    /// Operator-facing report
    pub fn render(&self) -> String {
        let mut out = String::from("Promotion plan (no production writes):\n");
        out.push_str(&format!("  new rows:          {}\n", self.new_rows));
        out.push_str(&format!("  hash collisions:   {}\n", self.hash_collisions));
        out.push_str(&format!("  outliers flagged:  {}\n", self.outlier_count));
        match self.date_window {
            Some((from, to)) => {
                out.push_str(&format!("  sale-date window:  {} .. {}\n", from, to))
            }
            None => out.push_str("  sale-date window:  (no valid rows)\n"),
        }
        if self.new_districts.is_empty() {
            out.push_str("  new districts:     none\n");
        } else {
            let list: Vec<String> = self.new_districts.iter().map(|d| d.to_string()).collect();
            out.push_str(&format!("  new districts:     {}\n", list.join(", ")));
        }
        out
    }
}

/// Compute the promotion diff without mutating the production table
pub async fn plan_promotion(pool: &SqlitePool, rows: &[StagingRow]) -> Result<PromotionPlan> {
    let valid: Vec<&StagingRow> = rows.iter().filter(|r| r.is_valid).collect();

    let mut existing = 0u64;
    for chunk in valid.chunks(HASH_LOOKUP_CHUNK) {
        existing += count_existing_hashes(pool, chunk).await?;
    }

    let outlier_count = valid.iter().filter(|r| r.is_outlier).count() as u64;

    let date_window = valid
        .iter()
        .map(|r| r.sale_date)
        .fold(None, |window: Option<(NaiveDate, NaiveDate)>, date| {
            Some(match window {
                Some((min, max)) => (min.min(date), max.max(date)),
                None => (date, date),
            })
        });

    let batch_districts: BTreeSet<u8> = valid.iter().filter_map(|r| r.district).collect();
    let known: Vec<i64> =
        sqlx::query_scalar("SELECT DISTINCT district FROM transactions WHERE district IS NOT NULL")
            .fetch_all(pool)
            .await?;
    let known: BTreeSet<u8> = known.into_iter().map(|d| d as u8).collect();
    let new_districts: Vec<u8> = batch_districts.difference(&known).copied().collect();

    Ok(PromotionPlan {
        new_rows: valid.len() as u64 - existing,
        hash_collisions: existing,
        outlier_count,
        date_window,
        new_districts,
    })
}

async fn count_existing_hashes(pool: &SqlitePool, rows: &[&StagingRow]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; rows.len()].join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM transactions WHERE row_hash IN ({})",
        placeholders
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for row in rows {
        query = query.bind(&row.row_hash);
    }
    Ok(query.fetch_one(pool).await? as u64)
}

/// Atomically promote every valid staged row, returning how many inserted
///
/// Rows whose hash already exists in production are silent no-ops, never an
/// error. Any failure rolls the whole transaction back; no partial promotion
/// is observable.
pub async fn publish(pool: &SqlitePool, batch: &Batch, rows: &[StagingRow]) -> Result<u64> {
    let promoted_at = Utc::now().to_rfc3339();
    let batch_id = batch.batch_id.to_string();
    let mut promoted = 0u64;

    let mut tx = pool.begin().await?;
    for row in rows.iter().filter(|r| r.is_valid) {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                row_hash, project, sale_date, transaction_month, price,
                area_sqft, psf, floor_range, floor_level, bedroom_count,
                district, region, tenure_class, property_type, sale_type,
                is_outlier, promoted_batch_id, promoted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(row_hash) DO NOTHING
            "#,
        )
        .bind(&row.row_hash)
        .bind(&row.project)
        .bind(row.sale_date.to_string())
        .bind(&row.transaction_month)
        .bind(row.price)
        .bind(row.area_sqft)
        .bind(row.psf_reconciled)
        .bind(&row.floor_range)
        .bind(&row.floor_level)
        .bind(row.bedroom_count.map(|c| c as i64))
        .bind(row.district.map(|d| d as i64))
        .bind(&row.region)
        .bind(&row.tenure_class)
        .bind(&row.property_type)
        .bind(&row.sale_type)
        .bind(row.is_outlier)
        .bind(&batch_id)
        .bind(&promoted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Promotion(format!("insert failed, rolling back: {}", e)))?;

        promoted += result.rows_affected();
    }
    tx.commit()
        .await
        .map_err(|e| Error::Promotion(format!("commit failed: {}", e)))?;

    Ok(promoted)
}

/// Delete the production rows a completed batch promoted
pub async fn rollback_batch(pool: &SqlitePool, batch: &Batch) -> Result<u64> {
    let result = sqlx::query("DELETE FROM transactions WHERE promoted_batch_id = ?")
        .bind(batch.batch_id.to_string())
        .execute(pool)
        .await?;
    info!(
        batch_id = %batch.batch_id,
        rows_removed = result.rows_affected(),
        "Rolled back promoted rows"
    );
    Ok(result.rows_affected())
}
