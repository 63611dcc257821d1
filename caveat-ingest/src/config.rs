//! Pipeline thresholds
//!
//! Every numeric policy knob the pipeline applies lives here: PSF
//! reconciliation tolerances, outlier bounds, validation thresholds. Their
//! calibration is domain policy rather than a structural requirement, so all
//! of them load from a TOML file with compiled defaults.

use caveat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pipeline threshold configuration
///
/// All fields default, so a partial (or absent) `caveat.toml` is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum staged rows for a batch to validate
    pub min_rows: u64,
    /// Required-field parse success rate below which the batch hard-fails
    pub min_parse_rate: f64,

    /// Absolute PSF tolerance in dollars before the calculated value replaces
    /// the source value
    pub psf_abs_tolerance: f64,
    /// Relative PSF tolerance as a fraction of the calculated value
    pub psf_rel_tolerance: f64,
    /// Batch-wide PSF substitution rate above which the batch hard-fails
    pub max_psf_divergence_rate: f64,

    /// Declared-vs-derived region mismatch rate above which the batch hard-fails
    pub max_region_mismatch_rate: f64,

    /// Transacted area above which a row is flagged as a bulk sale
    pub bulk_sale_area_sqft: f64,
    /// Price outlier bound: median ± this multiple of the interquartile range
    pub iqr_multiplier: f64,

    /// Absolute distribution bounds checked by the validator
    pub price_min: i64,
    pub price_max: i64,
    pub area_min_sqft: f64,
    pub area_max_sqft: f64,
    pub psf_min: f64,
    pub psf_max: f64,

    /// Staging rows inserted per transaction
    pub staging_chunk_size: usize,
    /// Projects refreshed in the lookup table per post-promotion run
    pub lookup_refresh_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_rows: 100,
            min_parse_rate: 0.95,
            psf_abs_tolerance: 3.0,
            psf_rel_tolerance: 0.005,
            max_psf_divergence_rate: 0.10,
            max_region_mismatch_rate: 0.05,
            bulk_sale_area_sqft: 10_000.0,
            iqr_multiplier: 5.0,
            price_min: 50_000,
            price_max: 200_000_000,
            area_min_sqft: 100.0,
            area_max_sqft: 50_000.0,
            psf_min: 100.0,
            psf_max: 10_000.0,
            staging_chunk_size: 500,
            lookup_refresh_batch_size: 200,
        }
    }
}

impl PipelineConfig {
    /// Load thresholds from a TOML file; an absent file yields the defaults,
    /// an unparseable one is a configuration error
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No pipeline config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid config file {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_yields_defaults() {
        let config =
            PipelineConfig::load_or_default(Path::new("/nonexistent/caveat.toml")).unwrap();
        assert_eq!(config.min_rows, 100);
        assert_eq!(config.iqr_multiplier, 5.0);
        assert_eq!(config.psf_abs_tolerance, 3.0);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caveat.toml");
        std::fs::write(&path, "min_rows = 5\nbulk_sale_area_sqft = 8000.0\n").unwrap();

        let config = PipelineConfig::load_or_default(&path).unwrap();
        assert_eq!(config.min_rows, 5);
        assert_eq!(config.bulk_sale_area_sqft, 8000.0);
        assert_eq!(config.min_parse_rate, 0.95);
    }

    #[test]
    fn unparseable_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caveat.toml");
        std::fs::write(&path, "min_rows = \"not a number\"").unwrap();

        let err = PipelineConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
