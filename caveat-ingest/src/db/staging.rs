//! Staging area persistence
//!
//! Rows are written in chunks inside transactions on one connection, which
//! keeps staging writes serialized per batch. Dedup and outlier marking work
//! over the in-memory rows and apply their flag changes back here.

use caveat_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::StagingRow;

/// Insert a chunk of staged rows in one transaction
pub async fn insert_rows(pool: &SqlitePool, rows: &[StagingRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for row in rows {
        let raw_extras = serde_json::to_string(&row.raw_extras)
            .map_err(|e| Error::Internal(format!("serialize raw_extras: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO staging_rows (
                batch_id, seq, project, sale_date, price, area_sqft,
                floor_range, district, tenure, property_type, sale_type,
                market_segment, transaction_month, psf_source, psf_calc,
                psf_reconciled, bedroom_count, floor_level, region,
                tenure_class, raw_extras, row_hash, is_valid, invalid_reason,
                is_outlier
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.batch_id.to_string())
        .bind(row.seq)
        .bind(&row.project)
        .bind(row.sale_date.to_string())
        .bind(row.price)
        .bind(row.area_sqft)
        .bind(&row.floor_range)
        .bind(row.district.map(|d| d as i64))
        .bind(&row.tenure)
        .bind(&row.property_type)
        .bind(&row.sale_type)
        .bind(&row.market_segment)
        .bind(&row.transaction_month)
        .bind(row.psf_source)
        .bind(row.psf_calc)
        .bind(row.psf_reconciled)
        .bind(row.bedroom_count.map(|c| c as i64))
        .bind(&row.floor_level)
        .bind(&row.region)
        .bind(&row.tenure_class)
        .bind(&raw_extras)
        .bind(&row.row_hash)
        .bind(row.is_valid)
        .bind(&row.invalid_reason)
        .bind(row.is_outlier)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(())
}

/// Load every staged row of a batch, in seq order
pub async fn load_rows(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<StagingRow>> {
    let rows = sqlx::query("SELECT * FROM staging_rows WHERE batch_id = ? ORDER BY seq")
        .bind(batch_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(staging_row_from_row).collect()
}

/// Apply validity and outlier flag changes back to the staging table
///
/// Called after dedup/outlier marking with only the rows whose flags changed.
pub async fn update_flags(pool: &SqlitePool, rows: &[&StagingRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for row in rows {
        sqlx::query(
            r#"
            UPDATE staging_rows
            SET is_valid = ?, invalid_reason = ?, is_outlier = ?
            WHERE batch_id = ? AND seq = ?
            "#,
        )
        .bind(row.is_valid)
        .bind(&row.invalid_reason)
        .bind(row.is_outlier)
        .bind(row.batch_id.to_string())
        .bind(row.seq)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(())
}

fn staging_row_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StagingRow> {
    let batch_id: String = row.get("batch_id");
    let batch_id = Uuid::parse_str(&batch_id)
        .map_err(|e| Error::Internal(format!("invalid batch_id in staging_rows: {}", e)))?;

    let sale_date: String = row.get("sale_date");
    let sale_date = sale_date
        .parse::<chrono::NaiveDate>()
        .map_err(|e| Error::Internal(format!("invalid sale_date in staging_rows: {}", e)))?;

    let raw_extras: String = row.get("raw_extras");
    let raw_extras: BTreeMap<String, String> = serde_json::from_str(&raw_extras)
        .map_err(|e| Error::Internal(format!("deserialize raw_extras: {}", e)))?;

    Ok(StagingRow {
        batch_id,
        seq: row.get("seq"),
        project: row.get("project"),
        sale_date,
        price: row.get("price"),
        area_sqft: row.get("area_sqft"),
        floor_range: row.get("floor_range"),
        district: row.get::<Option<i64>, _>("district").map(|d| d as u8),
        tenure: row.get("tenure"),
        property_type: row.get("property_type"),
        sale_type: row.get("sale_type"),
        market_segment: row.get("market_segment"),
        transaction_month: row.get("transaction_month"),
        psf_source: row.get("psf_source"),
        psf_calc: row.get("psf_calc"),
        psf_reconciled: row.get("psf_reconciled"),
        bedroom_count: row.get::<Option<i64>, _>("bedroom_count").map(|c| c as u32),
        floor_level: row.get("floor_level"),
        region: row.get("region"),
        tenure_class: row.get("tenure_class"),
        raw_extras,
        row_hash: row.get("row_hash"),
        is_valid: row.get("is_valid"),
        invalid_reason: row.get("invalid_reason"),
        is_outlier: row.get("is_outlier"),
    })
}
