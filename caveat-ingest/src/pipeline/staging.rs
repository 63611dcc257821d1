//! Staging loader
//!
//! Streams each input CSV, resolves column aliases against the contract,
//! parses typed fields, applies the rule-registry derivations in fixed order
//! (month bucket → PSF reconciliation → bedroom classification → floor
//! classification → region lookup), computes the natural-key row hash, and
//! persists rows to the batch-scoped staging area in chunks. Headers the
//! contract does not know are preserved verbatim in each row's raw extras.

use caveat_common::{hash::sha256_hex, Error, Result};
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::compat;
use crate::contract::SchemaContract;
use crate::models::{Batch, StagingRow};
use crate::PipelineContext;

/// How many parse-failure samples are kept for the audit record
const MAX_FAILURE_SAMPLES: usize = 10;

/// Loader statistics handed to the validator
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Data rows read from the input files
    pub rows_read: u64,
    /// Rows that parsed and were persisted to staging
    pub rows_staged: u64,
    /// Rows whose source PSF was present
    pub psf_present: u64,
    /// Rows where the calculated PSF replaced a divergent source PSF
    pub psf_substituted: u64,
    /// Sample parse failures, capped
    pub failure_samples: Vec<String>,
}

/// Stage every input file into the batch's staging area
pub async fn stage_files(
    ctx: &PipelineContext,
    batch: &mut Batch,
    files: &[PathBuf],
    allow_future_dates: bool,
) -> Result<StageOutcome> {
    let mut outcome = StageOutcome::default();
    let mut seq: i64 = 0;
    let mut chunk: Vec<StagingRow> = Vec::with_capacity(ctx.config.staging_chunk_size);
    let mut future_dated: u64 = 0;

    for (file_index, path) in files.iter().enumerate() {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .map_err(|e| {
                Error::InvalidInput(format!("cannot open input file {}: {}", path.display(), e))
            })?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| {
                Error::InvalidInput(format!("cannot read headers of {}: {}", path.display(), e))
            })?
            .iter()
            .map(|h| h.to_string())
            .collect();

        // The only hard gate before any row is parsed
        let report = compat::check_headers(&ctx.contract, &headers);
        if !report.is_compatible() {
            return Err(Error::Compat(format!(
                "{}: missing required columns: {}",
                path.display(),
                report.missing_required().join(", ")
            )));
        }
        for warning in report.warnings() {
            batch.add_issue(format!("{}: {}", file_name(path), warning));
        }
        if file_index == 0 {
            batch.header_fingerprint = report.header_fingerprint.clone();
            batch.contract_report = Some(
                serde_json::to_value(&report)
                    .map_err(|e| Error::Internal(format!("serialize compat report: {}", e)))?,
            );
        }

        let columns = ColumnMap::new(&ctx.contract, &headers);
        debug!(
            file = %path.display(),
            headers = headers.len(),
            unknown = columns.extra_indexes.len(),
            "Staging input file"
        );

        for record in reader.records() {
            let record = record.map_err(|e| {
                Error::InvalidInput(format!("CSV read error in {}: {}", path.display(), e))
            })?;
            outcome.rows_read += 1;

            match parse_row(ctx, batch.batch_id, seq, &columns, &record) {
                Ok(mut row) => {
                    // Future-dated sales are rejected softly unless opted in
                    if !allow_future_dates && row.sale_date > Utc::now().date_naive() {
                        row.is_valid = false;
                        row.invalid_reason = Some("future_sale_date".to_string());
                        future_dated += 1;
                    }
                    if row.psf_source.is_some() {
                        outcome.psf_present += 1;
                        if row.psf_source != Some(row.psf_reconciled) {
                            outcome.psf_substituted += 1;
                        }
                    }
                    seq += 1;
                    outcome.rows_staged += 1;
                    chunk.push(row);
                    if chunk.len() >= ctx.config.staging_chunk_size {
                        crate::db::staging::insert_rows(&ctx.pool, &chunk).await?;
                        chunk.clear();
                    }
                }
                Err(reason) => {
                    if outcome.failure_samples.len() < MAX_FAILURE_SAMPLES {
                        outcome
                            .failure_samples
                            .push(format!("{} row {}: {}", file_name(path), outcome.rows_read, reason));
                    }
                }
            }
        }
    }
    crate::db::staging::insert_rows(&ctx.pool, &chunk).await?;

    if outcome.psf_substituted > 0 {
        batch.add_warning(format!(
            "calculated PSF substituted for {} of {} rows with a source PSF",
            outcome.psf_substituted, outcome.psf_present
        ));
    }
    if future_dated > 0 {
        batch.add_warning(format!(
            "{} future-dated rows rejected (pass --allow-future-dates to accept)",
            future_dated
        ));
    }
    for sample in &outcome.failure_samples {
        batch.add_issue(format!("parse failure: {}", sample));
    }

    info!(
        batch_id = %batch.batch_id,
        rows_read = outcome.rows_read,
        rows_staged = outcome.rows_staged,
        "Staging complete"
    );
    if outcome.rows_staged < outcome.rows_read {
        warn!(
            batch_id = %batch.batch_id,
            failures = outcome.rows_read - outcome.rows_staged,
            "Some rows failed to parse"
        );
    }

    Ok(outcome)
}

/// Header index resolution for one file
struct ColumnMap {
    /// canonical column name → index in the record
    canonical: HashMap<String, usize>,
    /// (index, raw header) of columns the contract does not know
    extra_indexes: Vec<(usize, String)>,
}

impl ColumnMap {
    fn new(contract: &SchemaContract, headers: &[String]) -> Self {
        let mut canonical = HashMap::new();
        let mut extra_indexes = Vec::new();
        for (index, header) in headers.iter().enumerate() {
            match contract.resolve_header(header) {
                // First occurrence wins if a file repeats a column
                Some(name) => {
                    canonical.entry(name.to_string()).or_insert(index);
                }
                None => extra_indexes.push((index, header.trim().to_string())),
            }
        }
        Self {
            canonical,
            extra_indexes,
        }
    }

    fn get<'a>(&self, record: &'a csv::StringRecord, column: &str) -> Option<&'a str> {
        self.canonical
            .get(column)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Parse and derive one row; Err is the parse-failure reason
fn parse_row(
    ctx: &PipelineContext,
    batch_id: uuid::Uuid,
    seq: i64,
    columns: &ColumnMap,
    record: &csv::StringRecord,
) -> std::result::Result<StagingRow, String> {
    let project = columns
        .get(record, "project")
        .ok_or("empty project")?
        .to_string();
    let sale_date = columns
        .get(record, "sale_date")
        .and_then(parse_sale_date)
        .ok_or("unparseable sale_date")?;
    let price = columns
        .get(record, "price")
        .and_then(parse_money)
        .ok_or("unparseable price")?;
    let area_sqft = columns
        .get(record, "area_sqft")
        .and_then(parse_number)
        .ok_or("unparseable area_sqft")?;

    let floor_range = columns.get(record, "floor_range").map(str::to_string);
    let district = columns.get(record, "district").and_then(parse_district);
    let tenure = columns.get(record, "tenure").map(str::to_string);
    let property_type = columns.get(record, "property_type").map(str::to_string);
    let sale_type = columns.get(record, "sale_type").map(str::to_string);
    let market_segment = columns.get(record, "market_segment").map(str::to_string);

    let mut raw_extras = BTreeMap::new();
    for (index, header) in &columns.extra_indexes {
        if let Some(value) = record.get(*index) {
            if !value.trim().is_empty() {
                raw_extras.insert(header.clone(), value.trim().to_string());
            }
        }
    }

    // Derivations, fixed order: month bucket first, PSF reconciliation next,
    // then the classifier rules
    let transaction_month = sale_date.format("%Y-%m").to_string();

    let psf_calc = price as f64 / area_sqft;
    let psf_source = columns.get(record, "psf").and_then(parse_number);
    let psf_reconciled = reconcile_psf(
        psf_source,
        psf_calc,
        ctx.config.psf_abs_tolerance,
        ctx.config.psf_rel_tolerance,
    );

    let bedroom_count = Some(ctx.rules.classify_bedrooms(area_sqft));
    let floor_level = floor_range
        .as_deref()
        .and_then(|r| ctx.rules.classify_floor_level(r))
        .map(|l| l.as_str().to_string());
    let region = district.map(|d| ctx.rules.region_for_district(d).as_str().to_string());
    let tenure_class = tenure
        .as_deref()
        .map(|t| ctx.rules.classify_tenure(t).as_str().to_string());

    let mut row = StagingRow {
        batch_id,
        seq,
        project,
        sale_date,
        price,
        area_sqft,
        floor_range,
        district,
        tenure,
        property_type,
        sale_type,
        market_segment,
        transaction_month,
        psf_source,
        psf_calc,
        psf_reconciled,
        bedroom_count,
        floor_level,
        region,
        tenure_class,
        raw_extras,
        row_hash: String::new(),
        is_valid: true,
        invalid_reason: None,
        is_outlier: false,
    };
    row.row_hash = natural_key_hash(&ctx.contract, &row);
    Ok(row)
}

/// Prefer the source PSF unless it deviates from price/area by more than the
/// larger of the absolute and relative tolerances
pub fn reconcile_psf(
    psf_source: Option<f64>,
    psf_calc: f64,
    abs_tolerance: f64,
    rel_tolerance: f64,
) -> f64 {
    match psf_source {
        Some(source) => {
            let tolerance = abs_tolerance.max(rel_tolerance * psf_calc);
            if (source - psf_calc).abs() > tolerance {
                psf_calc
            } else {
                source
            }
        }
        None => psf_calc,
    }
}

/// Deterministic digest of the contract's natural-key fields
///
/// Canonical `field=value` lines in the contract's declared order; project is
/// case-folded and area fixed to two decimals so cosmetic differences between
/// weekly files do not defeat cross-batch dedup.
pub fn natural_key_hash(contract: &SchemaContract, row: &StagingRow) -> String {
    let mut canonical = String::new();
    for field in &contract.natural_key_fields {
        let value = match field.as_str() {
            "project" => row.project.trim().to_lowercase(),
            "transaction_month" => row.transaction_month.clone(),
            "price" => row.price.to_string(),
            "area_sqft" => format!("{:.2}", row.area_sqft),
            "floor_range" => row.floor_range.clone().unwrap_or_default(),
            "sale_date" => row.sale_date.to_string(),
            "district" => row.district.map(|d| d.to_string()).unwrap_or_default(),
            _ => String::new(),
        };
        canonical.push_str(field);
        canonical.push('=');
        canonical.push_str(&value);
        canonical.push('\n');
    }
    sha256_hex(canonical.as_bytes())
}

/// Parse a sale date in any of the formats seen across weekly feeds
pub fn parse_sale_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in ["%Y-%m-%d", "%d-%b-%Y", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    // Month-granularity feeds ("Mar-2024") bucket to the first of the month
    NaiveDate::parse_from_str(&format!("01-{}", trimmed), "%d-%b-%Y").ok()
}

/// Parse a dollar amount, tolerating "$", thousands separators and whitespace
fn parse_money(raw: &str) -> Option<i64> {
    let value = parse_number(raw)?;
    Some(value.round() as i64)
}

/// Parse a positive numeric field, tolerating "$", "," and whitespace
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| *v > 0.0)
}

/// Parse a postal district number, tolerating a "D" prefix ("D09")
fn parse_district(raw: &str) -> Option<u8> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    cleaned.parse::<u8>().ok().filter(|d| (1..=28).contains(d))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
