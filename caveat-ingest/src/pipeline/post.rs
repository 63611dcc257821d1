//! Post-promotion maintenance
//!
//! Recomputes the cached monthly aggregates for the region/month buckets the
//! batch touched and refreshes the project lookup table, bounded to a fixed
//! number of projects per run. Aggregates exclude outlier rows, the same
//! filter every read-side consumer applies. A failure here does not roll back
//! the promotion; the batch stays completed and the operator re-runs the task.

use caveat_common::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tracing::info;

use crate::models::{Batch, StagingRow};
use crate::PipelineContext;

/// Run all post-promotion tasks for a freshly completed batch
pub async fn run_post_promotion(
    ctx: &PipelineContext,
    batch: &Batch,
    rows: &[StagingRow],
) -> Result<()> {
    let valid: Vec<&StagingRow> = rows.iter().filter(|r| r.is_valid).collect();

    refresh_monthly_aggregates(&ctx.pool, &valid).await?;
    refresh_project_lookup(&ctx.pool, &valid, ctx.config.lookup_refresh_batch_size).await?;

    info!(batch_id = %batch.batch_id, "Post-promotion tasks complete");
    Ok(())
}

/// Recompute aggregates for each (region, month) bucket the batch touched
async fn refresh_monthly_aggregates(pool: &SqlitePool, rows: &[&StagingRow]) -> Result<()> {
    let buckets: BTreeSet<(String, String)> = rows
        .iter()
        .filter_map(|r| {
            r.region
                .as_ref()
                .map(|region| (region.clone(), r.transaction_month.clone()))
        })
        .collect();

    let refreshed_at = Utc::now().to_rfc3339();
    for (region, month) in &buckets {
        let stats = sqlx::query(
            r#"
            SELECT COUNT(*) AS n, COALESCE(SUM(price), 0) AS total
            FROM transactions
            WHERE region = ? AND transaction_month = ? AND is_outlier = 0
            "#,
        )
        .bind(region)
        .bind(month)
        .fetch_one(pool)
        .await?;
        let count: i64 = stats.get("n");
        let total: i64 = stats.get("total");

        let median_psf = median_psf(pool, region, month).await?;

        sqlx::query(
            r#"
            INSERT INTO monthly_aggregates (
                region, transaction_month, transaction_count, median_psf,
                total_value, refreshed_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(region, transaction_month) DO UPDATE SET
                transaction_count = excluded.transaction_count,
                median_psf = excluded.median_psf,
                total_value = excluded.total_value,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(region)
        .bind(month)
        .bind(count)
        .bind(median_psf)
        .bind(total)
        .bind(&refreshed_at)
        .execute(pool)
        .await?;
    }

    info!(buckets = buckets.len(), "Monthly aggregates refreshed");
    Ok(())
}

/// Median PSF of non-outlier transactions in one bucket
async fn median_psf(pool: &SqlitePool, region: &str, month: &str) -> Result<Option<f64>> {
    let mut psfs: Vec<f64> = sqlx::query_scalar(
        r#"
        SELECT psf FROM transactions
        WHERE region = ? AND transaction_month = ? AND is_outlier = 0
        "#,
    )
    .bind(region)
    .bind(month)
    .fetch_all(pool)
    .await?;

    if psfs.is_empty() {
        return Ok(None);
    }
    psfs.sort_by(|a, b| a.total_cmp(b));
    let mid = psfs.len() / 2;
    Ok(Some(if psfs.len() % 2 == 0 {
        (psfs[mid - 1] + psfs[mid]) / 2.0
    } else {
        psfs[mid]
    }))
}

/// Refresh lookup rows for the projects this batch touched, bounded per run
async fn refresh_project_lookup(
    pool: &SqlitePool,
    rows: &[&StagingRow],
    batch_size: usize,
) -> Result<()> {
    let projects: BTreeSet<String> = rows.iter().map(|r| r.project.clone()).collect();
    let refreshed_at = Utc::now().to_rfc3339();

    let mut refreshed = 0usize;
    for project in projects.iter().take(batch_size) {
        let stats = sqlx::query(
            r#"
            SELECT COUNT(*) AS n, MAX(transaction_month) AS last_month,
                   MAX(district) AS district, MAX(region) AS region
            FROM transactions
            WHERE project = ?
            "#,
        )
        .bind(project)
        .fetch_one(pool)
        .await?;
        let count: i64 = stats.get("n");
        if count == 0 {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO project_lookup (
                project, district, region, transaction_count, last_seen_month,
                refreshed_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(project) DO UPDATE SET
                district = excluded.district,
                region = excluded.region,
                transaction_count = excluded.transaction_count,
                last_seen_month = excluded.last_seen_month,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(project)
        .bind(stats.get::<Option<i64>, _>("district"))
        .bind(stats.get::<Option<String>, _>("region"))
        .bind(count)
        .bind(stats.get::<Option<String>, _>("last_month"))
        .bind(&refreshed_at)
        .execute(pool)
        .await?;
        refreshed += 1;
    }

    if projects.len() > batch_size {
        info!(
            refreshed,
            deferred = projects.len() - batch_size,
            "Project lookup refresh hit the per-run bound"
        );
    } else {
        info!(refreshed, "Project lookup refreshed");
    }
    Ok(())
}
