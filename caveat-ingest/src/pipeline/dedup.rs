//! In-batch deduplication and outlier marking
//!
//! Rows sharing a natural-key hash within the batch collapse to the first
//! occurrence; later occurrences are marked invalid and retained for audit.
//! Cross-batch overlap is intentionally not handled here: promotion's
//! hash-uniqueness conflict rule covers it. Outliers (bulk sales by area,
//! extreme prices by a robust IQR bound over the batch) are flagged, never
//! removed; every downstream consumer filters on the flag.

use std::collections::HashSet;

use crate::config::PipelineConfig;
use crate::models::StagingRow;

/// Dedup/outlier results plus which rows changed and need their flags persisted
#[derive(Debug)]
pub struct DedupOutcome {
    /// Valid rows remaining after in-batch dedup
    pub rows_after_dedup: u64,
    pub duplicates_removed: u64,
    pub outliers_marked: u64,
    /// Indexes into the row slice whose flags changed
    pub changed: Vec<usize>,
}

/// Collapse in-batch duplicates and flag outliers, in memory
///
/// Rows must be in seq order so "first occurrence wins" is deterministic.
pub fn dedup_and_mark(config: &PipelineConfig, rows: &mut [StagingRow]) -> DedupOutcome {
    let mut outcome = DedupOutcome {
        rows_after_dedup: 0,
        duplicates_removed: 0,
        outliers_marked: 0,
        changed: Vec::new(),
    };

    let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());
    for (index, row) in rows.iter_mut().enumerate() {
        if !row.is_valid {
            continue;
        }
        if seen.insert(row.row_hash.clone()) {
            outcome.rows_after_dedup += 1;
        } else {
            row.is_valid = false;
            row.invalid_reason = Some("duplicate_in_batch".to_string());
            outcome.duplicates_removed += 1;
            outcome.changed.push(index);
        }
    }

    let price_bounds = price_outlier_bounds(config, rows);
    for (index, row) in rows.iter_mut().enumerate() {
        if !row.is_valid {
            continue;
        }
        let bulk_sale = row.area_sqft > config.bulk_sale_area_sqft;
        let price_extreme = price_bounds
            .map(|(low, high)| (row.price as f64) < low || (row.price as f64) > high)
            .unwrap_or(false);
        if bulk_sale || price_extreme {
            row.is_outlier = true;
            outcome.outliers_marked += 1;
            outcome.changed.push(index);
        }
    }

    outcome
}

/// Robust price bounds over the batch's valid rows: median ± multiplier × IQR
///
/// None when the batch is too small for quartiles to mean anything.
fn price_outlier_bounds(config: &PipelineConfig, rows: &[StagingRow]) -> Option<(f64, f64)> {
    let mut prices: Vec<f64> = rows
        .iter()
        .filter(|r| r.is_valid)
        .map(|r| r.price as f64)
        .collect();
    if prices.len() < 4 {
        return None;
    }
    prices.sort_by(|a, b| a.total_cmp(b));

    let median = percentile(&prices, 0.5);
    let iqr = percentile(&prices, 0.75) - percentile(&prices, 0.25);
    let spread = config.iqr_multiplier * iqr;
    Some((median - spread, median + spread))
}

/// Linear-interpolation percentile over a sorted slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let fraction = rank - low as f64;
        sorted[low] + fraction * (sorted[high] - sorted[low])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn row(seq: i64, hash: &str, price: i64, area: f64) -> StagingRow {
        StagingRow {
            batch_id: Uuid::new_v4(),
            seq,
            project: "P".to_string(),
            sale_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            price,
            area_sqft: area,
            floor_range: None,
            district: None,
            tenure: None,
            property_type: None,
            sale_type: None,
            market_segment: None,
            transaction_month: "2024-03".to_string(),
            psf_source: None,
            psf_calc: price as f64 / area,
            psf_reconciled: price as f64 / area,
            bedroom_count: None,
            floor_level: None,
            region: None,
            tenure_class: None,
            raw_extras: BTreeMap::new(),
            row_hash: hash.to_string(),
            is_valid: true,
            invalid_reason: None,
            is_outlier: false,
        }
    }

    fn uniform_rows(count: usize) -> Vec<StagingRow> {
        (0..count)
            .map(|i| {
                row(
                    i as i64,
                    &format!("hash-{}", i),
                    1_000_000 + (i as i64 % 10) * 50_000,
                    900.0,
                )
            })
            .collect()
    }

    #[test]
    fn first_occurrence_wins_on_duplicate_hashes() {
        let mut rows = uniform_rows(6);
        rows[3].row_hash = "hash-1".to_string();
        rows[5].row_hash = "hash-1".to_string();

        let outcome = dedup_and_mark(&PipelineConfig::default(), &mut rows);
        assert_eq!(outcome.rows_after_dedup, 4);
        assert_eq!(outcome.duplicates_removed, 2);
        assert!(rows[1].is_valid);
        assert!(!rows[3].is_valid);
        assert_eq!(rows[3].invalid_reason.as_deref(), Some("duplicate_in_batch"));
        assert!(!rows[5].is_valid);
    }

    #[test]
    fn bulk_sale_area_is_flagged_not_removed() {
        let mut rows = uniform_rows(10);
        rows[4].area_sqft = 25_000.0;

        let outcome = dedup_and_mark(&PipelineConfig::default(), &mut rows);
        assert_eq!(outcome.outliers_marked, 1);
        assert!(rows[4].is_outlier);
        assert!(rows[4].is_valid);
        assert_eq!(outcome.rows_after_dedup, 10);
    }

    #[test]
    fn extreme_price_is_flagged_by_iqr_bound() {
        let mut rows = uniform_rows(20);
        // Median ~1.2M, IQR ~250k, 5x IQR spread; 100M is far outside
        rows[7].price = 100_000_000;
        rows[7].row_hash = "hash-extreme".to_string();

        let outcome = dedup_and_mark(&PipelineConfig::default(), &mut rows);
        assert!(rows[7].is_outlier);
        assert_eq!(outcome.outliers_marked, 1);
    }

    #[test]
    fn uniform_prices_produce_no_outliers() {
        let mut rows = uniform_rows(50);
        let outcome = dedup_and_mark(&PipelineConfig::default(), &mut rows);
        assert_eq!(outcome.outliers_marked, 0);
        assert!(outcome.changed.is_empty());
    }

    #[test]
    fn tiny_batches_skip_the_price_bound() {
        let mut rows = uniform_rows(3);
        rows[0].price = 99_000_000;
        let outcome = dedup_and_mark(&PipelineConfig::default(), &mut rows);
        assert_eq!(outcome.outliers_marked, 0);
    }

    #[test]
    fn invalid_rows_do_not_shadow_later_duplicates() {
        let mut rows = uniform_rows(4);
        rows[0].is_valid = false;
        rows[0].invalid_reason = Some("future_sale_date".to_string());
        rows[2].row_hash = rows[0].row_hash.clone();

        let outcome = dedup_and_mark(&PipelineConfig::default(), &mut rows);
        // The invalid row is not in the dedup set, so row 2 survives
        assert!(rows[2].is_valid);
        assert_eq!(outcome.rows_after_dedup, 3);
    }
}
