//! Pipeline orchestration
//!
//! Drives one batch through the stage sequence
//! compatibility → staging → validation → dedup/outlier marking →
//! (plan | promotion) → post-promotion, holding the system-wide run lock for
//! the duration of the run. A hard failure at any stage transitions the batch
//! to `failed` with the staging area retained, and the production table is
//! never touched.

pub mod dedup;
pub mod post;
pub mod promote;
pub mod staging;
pub mod validate;

use caveat_common::{hash::fingerprint_file, Error, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::db::{batches, lock, staging as staging_db};
use crate::models::{Batch, BatchStatus};
use crate::PipelineContext;
use promote::PromotionPlan;

/// How far a run goes and whether it writes to production
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Stage, validate, dedup, promote, post-promotion
    Full,
    /// Stage, validate, dedup, report the promotion diff, no production writes
    Plan,
    /// Stage, validate, dedup, leave the batch `ready`
    StagingOnly,
}

/// Result of an ingestion run
#[derive(Debug)]
pub struct RunOutcome {
    pub batch: Batch,
    /// Promotion diff, present in plan mode only
    pub plan: Option<PromotionPlan>,
}

/// Execute an ingestion run over the given input files
pub async fn run_ingest(
    ctx: &PipelineContext,
    files: &[PathBuf],
    mode: RunMode,
    allow_future_dates: bool,
) -> Result<RunOutcome> {
    if files.is_empty() {
        return Err(Error::InvalidInput("no input files given".to_string()));
    }

    let mut batch = Batch::new(
        &ctx.contract.schema_version,
        &ctx.contract.contract_hash,
        ctx.rules.rules_version(),
    );
    fingerprint_inputs(&mut batch, files)?;

    lock::acquire_run_lock(&ctx.pool, batch.batch_id).await?;
    info!(
        batch_id = %batch.batch_id,
        files = files.len(),
        mode = ?mode,
        "Starting ingestion run"
    );
    batches::save_batch(&ctx.pool, &batch).await?;

    let result = run_stages(ctx, &mut batch, files, mode, allow_future_dates).await;

    match result {
        Ok(plan) => {
            lock::release_run_lock(&ctx.pool).await?;
            Ok(RunOutcome { batch, plan })
        }
        Err(e) => {
            fail_batch(ctx, &mut batch, &e).await;
            lock::release_run_lock(&ctx.pool).await?;
            Err(e)
        }
    }
}

/// Promote the most recent `ready` batch
pub async fn publish_ready(ctx: &PipelineContext) -> Result<Batch> {
    let mut batch = batches::latest_batch_with_status(&ctx.pool, BatchStatus::Ready)
        .await?
        .ok_or_else(|| Error::NotFound("no batch in ready state to publish".to_string()))?;

    lock::acquire_run_lock(&ctx.pool, batch.batch_id).await?;
    info!(batch_id = %batch.batch_id, "Publishing ready batch");

    let result = promote_and_finish(ctx, &mut batch).await;

    match result {
        Ok(()) => {
            lock::release_run_lock(&ctx.pool).await?;
            Ok(batch)
        }
        Err(e) => {
            fail_batch(ctx, &mut batch, &e).await;
            lock::release_run_lock(&ctx.pool).await?;
            Err(e)
        }
    }
}

/// Revert the most recent `completed` batch
pub async fn rollback_latest(ctx: &PipelineContext) -> Result<Batch> {
    let mut batch = batches::latest_batch_with_status(&ctx.pool, BatchStatus::Completed)
        .await?
        .ok_or_else(|| Error::NotFound("no completed batch to roll back".to_string()))?;

    lock::acquire_run_lock(&ctx.pool, batch.batch_id).await?;

    let result = async {
        let removed = promote::rollback_batch(&ctx.pool, &batch).await?;
        batch.transition_to(BatchStatus::RolledBack)?;
        batches::save_batch(&ctx.pool, &batch).await?;
        info!(
            batch_id = %batch.batch_id,
            rows_removed = removed,
            "Batch rolled back"
        );
        Ok(())
    }
    .await;

    lock::release_run_lock(&ctx.pool).await?;
    result.map(|()| batch)
}

/// Stage → validate → dedup → (plan | promote + post)
async fn run_stages(
    ctx: &PipelineContext,
    batch: &mut Batch,
    files: &[PathBuf],
    mode: RunMode,
    allow_future_dates: bool,
) -> Result<Option<PromotionPlan>> {
    let stage_outcome = staging::stage_files(ctx, batch, files, allow_future_dates).await?;
    batch.rows_loaded = stage_outcome.rows_staged;
    batches::save_batch(&ctx.pool, batch).await?;

    batch.transition_to(BatchStatus::Validating)?;
    batches::save_batch(&ctx.pool, batch).await?;

    // Validation and dedup need the whole staged batch; full-scan barrier
    let mut rows = staging_db::load_rows(&ctx.pool, batch.batch_id).await?;

    let validation = validate::validate_batch(&ctx.config, batch, &rows, &stage_outcome);
    if let Some(reason) = validation.hard_failure {
        return Err(Error::Validation(reason));
    }

    let dedup_outcome = dedup::dedup_and_mark(&ctx.config, &mut rows);
    let changed: Vec<&crate::models::StagingRow> =
        dedup_outcome.changed.iter().map(|&i| &rows[i]).collect();
    staging_db::update_flags(&ctx.pool, &changed).await?;
    batch.rows_after_dedup = dedup_outcome.rows_after_dedup;
    batch.rows_outliers_marked = dedup_outcome.outliers_marked;
    info!(
        batch_id = %batch.batch_id,
        rows_after_dedup = batch.rows_after_dedup,
        duplicates_removed = dedup_outcome.duplicates_removed,
        outliers_marked = batch.rows_outliers_marked,
        "Dedup and outlier marking complete"
    );

    batch.transition_to(BatchStatus::Ready)?;
    batches::save_batch(&ctx.pool, batch).await?;

    match mode {
        RunMode::StagingOnly => Ok(None),
        RunMode::Plan => {
            let plan = promote::plan_promotion(&ctx.pool, &rows).await?;
            Ok(Some(plan))
        }
        RunMode::Full => {
            promote_and_finish(ctx, batch).await?;
            Ok(None)
        }
    }
}

/// Promotion and post-promotion for a `ready` batch
async fn promote_and_finish(ctx: &PipelineContext, batch: &mut Batch) -> Result<()> {
    let rows = staging_db::load_rows(&ctx.pool, batch.batch_id).await?;

    batch.transition_to(BatchStatus::Promoting)?;
    batches::save_batch(&ctx.pool, batch).await?;

    let promoted = promote::publish(&ctx.pool, batch, &rows).await?;
    batch.rows_promoted = promoted;
    batch.transition_to(BatchStatus::Completed)?;
    batches::save_batch(&ctx.pool, batch).await?;
    info!(
        batch_id = %batch.batch_id,
        rows_promoted = promoted,
        "Promotion committed"
    );

    // A post-promotion failure is reported but the batch stays completed;
    // the operator re-runs the specific maintenance task
    if let Err(e) = post::run_post_promotion(ctx, batch, &rows).await {
        warn!(batch_id = %batch.batch_id, error = %e, "Post-promotion task failed");
        batch.add_warning(format!("post-promotion task failed: {}", e));
        batches::save_batch(&ctx.pool, batch).await?;
    }

    Ok(())
}

fn fingerprint_inputs(batch: &mut Batch, files: &[PathBuf]) -> Result<()> {
    for path in files {
        let fingerprint = fingerprint_file(path)?;
        batch
            .file_fingerprints
            .insert(path.display().to_string(), fingerprint);
    }
    Ok(())
}

/// Best-effort terminal bookkeeping on a hard failure
async fn fail_batch(ctx: &PipelineContext, batch: &mut Batch, error: &Error) {
    warn!(
        batch_id = %batch.batch_id,
        stage = error.stage(),
        error = %error,
        "Hard failure, batch -> failed"
    );
    if !batch.status.is_terminal() {
        if batch.transition_to(BatchStatus::Failed).is_ok() {
            if let Err(save_err) = batches::save_batch(&ctx.pool, batch).await {
                warn!(
                    batch_id = %batch.batch_id,
                    error = %save_err,
                    "Could not persist failed batch status"
                );
            }
        }
    }
}
