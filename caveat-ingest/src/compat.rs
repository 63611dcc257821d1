//! Header compatibility checker
//!
//! Diffs the header row of an incoming CSV against the schema contract before
//! any row is parsed. Each expected column is classified as present (exact or
//! via a registered alias), missing-required, or missing-optional; headers the
//! contract does not know about are listed so the loader can preserve them as
//! raw extras. A missing required column is the pipeline's only hard gate
//! before parsing starts.

use crate::contract::SchemaContract;
use caveat_common::hash::sha256_hex;
use serde::{Deserialize, Serialize};

/// How one contract column matched the incoming headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ColumnStatus {
    /// Exact canonical name present
    Present,
    /// Present under a registered alias (column was renamed upstream)
    PresentViaAlias { alias: String },
    /// Required column absent under any name
    MissingRequired,
    /// Optional column absent under any name
    MissingOptional,
}

/// Classification of one expected column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnFinding {
    pub column: String,
    #[serde(flatten)]
    pub status: ColumnStatus,
}

/// Result of diffing a file's headers against the contract
///
/// Serialized to JSON and stored on the batch audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatReport {
    pub columns: Vec<ColumnFinding>,
    /// Headers the contract does not recognize, preserved as raw extras
    pub unknown_headers: Vec<String>,
    /// Stable hash of the sorted header set, for audit comparison across runs
    pub header_fingerprint: String,
}

impl CompatReport {
    /// Required columns absent under any name; non-empty means hard failure
    pub fn missing_required(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|f| f.status == ColumnStatus::MissingRequired)
            .map(|f| f.column.as_str())
            .collect()
    }

    pub fn is_compatible(&self) -> bool {
        self.missing_required().is_empty()
    }

    /// Soft findings worth recording on the batch: renames, missing optional
    /// columns, unknown headers
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for finding in &self.columns {
            match &finding.status {
                ColumnStatus::PresentViaAlias { alias } => warnings.push(format!(
                    "column '{}' supplied under alias '{}'",
                    finding.column, alias
                )),
                ColumnStatus::MissingOptional => {
                    warnings.push(format!("optional column '{}' missing", finding.column))
                }
                _ => {}
            }
        }
        if !self.unknown_headers.is_empty() {
            warnings.push(format!(
                "unknown headers preserved as raw extras: {}",
                self.unknown_headers.join(", ")
            ));
        }
        warnings
    }
}

/// Classify a file's headers against the contract
pub fn check_headers(contract: &SchemaContract, headers: &[String]) -> CompatReport {
    let mut columns = Vec::new();
    let mut unknown_headers = Vec::new();

    // Which canonical column each raw header resolves to, if any
    let resolved: Vec<Option<&str>> = headers
        .iter()
        .map(|h| contract.resolve_header(h))
        .collect();

    for expected in contract
        .required_columns
        .iter()
        .chain(&contract.optional_columns)
    {
        let hit = headers
            .iter()
            .zip(&resolved)
            .find(|(_, canonical)| canonical.as_deref() == Some(expected.as_str()));

        let status = match hit {
            Some((raw, _)) if raw.trim().eq_ignore_ascii_case(expected) => ColumnStatus::Present,
            Some((raw, _)) => ColumnStatus::PresentViaAlias {
                alias: raw.trim().to_string(),
            },
            None if contract.is_required(expected) => ColumnStatus::MissingRequired,
            None => ColumnStatus::MissingOptional,
        };
        columns.push(ColumnFinding {
            column: expected.clone(),
            status,
        });
    }

    for (raw, canonical) in headers.iter().zip(&resolved) {
        if canonical.is_none() {
            unknown_headers.push(raw.trim().to_string());
        }
    }

    CompatReport {
        columns,
        unknown_headers,
        header_fingerprint: header_fingerprint(headers),
    }
}

/// Stable hash of a header set: trimmed, lowercased, sorted, newline-joined
pub fn header_fingerprint(headers: &[String]) -> String {
    let mut normalized: Vec<String> = headers
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    normalized.sort();
    sha256_hex(normalized.join("\n").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> SchemaContract {
        SchemaContract::load_or_default(std::path::Path::new("/nonexistent")).unwrap()
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_headers_are_compatible() {
        let report = check_headers(
            &contract(),
            &headers(&["project", "sale_date", "price", "area_sqft"]),
        );
        assert!(report.is_compatible());
        assert!(report.unknown_headers.is_empty());
        // Optional columns absent, so warnings mention them
        assert!(report.warnings().iter().any(|w| w.contains("psf")));
    }

    #[test]
    fn renamed_column_resolves_via_alias() {
        let report = check_headers(
            &contract(),
            &headers(&["Project Name", "sale_date", "price", "area_sqft"]),
        );
        assert!(report.is_compatible());
        let project = report
            .columns
            .iter()
            .find(|f| f.column == "project")
            .unwrap();
        assert_eq!(
            project.status,
            ColumnStatus::PresentViaAlias {
                alias: "Project Name".to_string()
            }
        );
    }

    #[test]
    fn missing_required_column_fails_compatibility() {
        let report = check_headers(&contract(), &headers(&["project", "price", "area_sqft"]));
        assert!(!report.is_compatible());
        assert_eq!(report.missing_required(), vec!["sale_date"]);
    }

    #[test]
    fn unknown_headers_are_listed_not_rejected() {
        let report = check_headers(
            &contract(),
            &headers(&["project", "sale_date", "price", "area_sqft", "agent_notes"]),
        );
        assert!(report.is_compatible());
        assert_eq!(report.unknown_headers, vec!["agent_notes"]);
    }

    #[test]
    fn fingerprint_ignores_header_order_and_case() {
        let a = header_fingerprint(&headers(&["project", "Price", "area_sqft"]));
        let b = header_fingerprint(&headers(&["area_sqft", "project", "price"]));
        let c = header_fingerprint(&headers(&["area_sqft", "project"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
