//! Batch validation
//!
//! Two independent check classes over the full staged batch: quantitative
//! (row count, parse-success rate, numeric distribution bounds) and semantic
//! (declared vs derived region consistency, batch-wide PSF divergence). A
//! parse rate below threshold or catastrophic semantic drift is a hard
//! failure; everything else is recorded on the batch and promotion proceeds.

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::models::{Batch, StagingRow};
use crate::pipeline::staging::StageOutcome;
use crate::rules::Region;

/// Validation verdict; `hard_failure` set means the batch must fail
#[derive(Debug)]
pub struct ValidationOutcome {
    pub hard_failure: Option<String>,
}

/// Run all checks over the staged batch, recording findings on the batch
pub fn validate_batch(
    config: &PipelineConfig,
    batch: &mut Batch,
    rows: &[StagingRow],
    stage: &StageOutcome,
) -> ValidationOutcome {
    let mut hard_failure = None;

    // Quantitative: minimum batch size
    if stage.rows_staged < config.min_rows {
        hard_failure = Some(format!(
            "staged row count {} below minimum {}",
            stage.rows_staged, config.min_rows
        ));
    }

    // Quantitative: required-field parse success rate
    let parse_rate = if stage.rows_read > 0 {
        stage.rows_staged as f64 / stage.rows_read as f64
    } else {
        0.0
    };
    if hard_failure.is_none() && parse_rate < config.min_parse_rate {
        hard_failure = Some(format!(
            "parse success rate {:.3} below threshold {:.3} ({} of {} rows failed)",
            parse_rate,
            config.min_parse_rate,
            stage.rows_read - stage.rows_staged,
            stage.rows_read
        ));
    } else if parse_rate < 1.0 {
        batch.add_issue(format!(
            "parse success rate {:.3} ({} of {} rows failed)",
            parse_rate,
            stage.rows_read - stage.rows_staged,
            stage.rows_read
        ));
    }

    // Quantitative: absolute distribution bounds
    let mut price_out = 0u64;
    let mut area_out = 0u64;
    let mut psf_out = 0u64;
    for row in rows {
        if row.price < config.price_min || row.price > config.price_max {
            price_out += 1;
        }
        if row.area_sqft < config.area_min_sqft || row.area_sqft > config.area_max_sqft {
            area_out += 1;
        }
        if row.psf_reconciled < config.psf_min || row.psf_reconciled > config.psf_max {
            psf_out += 1;
        }
    }
    for (field, count, low, high) in [
        ("price", price_out, config.price_min as f64, config.price_max as f64),
        ("area_sqft", area_out, config.area_min_sqft, config.area_max_sqft),
        ("psf", psf_out, config.psf_min, config.psf_max),
    ] {
        if count > 0 {
            batch.add_issue(format!(
                "{} rows have {} outside [{}, {}]",
                count, field, low, high
            ));
        }
    }

    // Semantic: declared market segment vs district-implied region
    let mut region_checked = 0u64;
    let mut region_mismatched = 0u64;
    for row in rows {
        let declared = row.market_segment.as_deref().and_then(Region::parse);
        let derived = row.region.as_deref();
        if let (Some(declared), Some(derived)) = (declared, derived) {
            region_checked += 1;
            if declared.as_str() != derived {
                region_mismatched += 1;
            }
        }
    }
    if region_checked > 0 && region_mismatched > 0 {
        let mismatch_rate = region_mismatched as f64 / region_checked as f64;
        if hard_failure.is_none() && mismatch_rate > config.max_region_mismatch_rate {
            hard_failure = Some(format!(
                "region mismatch rate {:.3} above threshold {:.3} ({} of {} rows)",
                mismatch_rate, config.max_region_mismatch_rate, region_mismatched, region_checked
            ));
        } else {
            batch.add_warning(format!(
                "declared region disagrees with district for {} of {} rows",
                region_mismatched, region_checked
            ));
        }
    }

    // Semantic: batch-wide PSF divergence
    if stage.psf_present > 0 {
        let divergence_rate = stage.psf_substituted as f64 / stage.psf_present as f64;
        if hard_failure.is_none() && divergence_rate > config.max_psf_divergence_rate {
            hard_failure = Some(format!(
                "PSF divergence rate {:.3} above threshold {:.3} ({} of {} rows substituted)",
                divergence_rate,
                config.max_psf_divergence_rate,
                stage.psf_substituted,
                stage.psf_present
            ));
        }
    }

    batch.validation_passed = Some(hard_failure.is_none());
    match &hard_failure {
        Some(reason) => warn!(
            batch_id = %batch.batch_id,
            reason = %reason,
            "Validation hard failure"
        ),
        None => info!(
            batch_id = %batch.batch_id,
            issues = batch.validation_issues.len(),
            warnings = batch.semantic_warnings.len(),
            "Validation passed"
        ),
    }

    ValidationOutcome { hard_failure }
}
