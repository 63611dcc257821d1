//! Staged transaction row
//!
//! Typed struct for one parsed CSV row, scoped to exactly one batch. Required
//! and derived fields are compile-time checked; genuinely unknown input
//! columns ride along in the opaque `raw_extras` side map, preserved verbatim
//! and never read downstream.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One staged row, parsed and derived but not yet promoted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingRow {
    pub batch_id: Uuid,
    /// Position within the batch, assigned by the loader; first occurrence
    /// wins at dedup time
    pub seq: i64,

    // Canonical input fields
    pub project: String,
    pub sale_date: NaiveDate,
    /// Transacted price in whole dollars
    pub price: i64,
    pub area_sqft: f64,
    pub floor_range: Option<String>,
    pub district: Option<u8>,
    pub tenure: Option<String>,
    pub property_type: Option<String>,
    pub sale_type: Option<String>,
    pub market_segment: Option<String>,

    // Derived fields, computed in fixed order by the staging loader
    /// Month bucket, `YYYY-MM`
    pub transaction_month: String,
    /// Source-provided price per square foot, when the column was present
    pub psf_source: Option<f64>,
    /// price / area
    pub psf_calc: f64,
    /// Source PSF unless it diverged beyond tolerance, then calculated
    pub psf_reconciled: f64,
    pub bedroom_count: Option<u32>,
    pub floor_level: Option<String>,
    pub region: Option<String>,
    pub tenure_class: Option<String>,

    /// Unknown input columns, preserved verbatim
    pub raw_extras: BTreeMap<String, String>,

    /// Deterministic digest of the natural-key fields; the sole cross-batch
    /// dedup mechanism
    pub row_hash: String,

    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub is_outlier: bool,
}
