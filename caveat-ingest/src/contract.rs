//! Schema contract
//!
//! The contract is the versioned, hashable description of the input columns
//! the pipeline accepts: required and optional canonical columns, registered
//! aliases for column renames, and the ordered natural-key field list used to
//! build the row hash. Loaded once at pipeline start and never mutated
//! mid-run, so every stage of a batch sees the same contract.

use caveat_common::{hash::sha256_hex, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Contract document vendored with the crate, used on first run when no
/// `contract.toml` exists in the root folder yet.
const DEFAULT_CONTRACT_TOML: &str = r#"
schema_version = "2024.1"

required_columns = ["project", "sale_date", "price", "area_sqft"]

optional_columns = [
    "psf",
    "floor_range",
    "district",
    "tenure",
    "property_type",
    "sale_type",
    "market_segment",
]

natural_key_fields = ["project", "transaction_month", "price", "area_sqft", "floor_range"]

[column_aliases]
"project_name" = "project"
"Project Name" = "project"
"contract_date" = "sale_date"
"Sale Date" = "sale_date"
"transacted_price" = "price"
"Transacted Price ($)" = "price"
"Price ($)" = "price"
"Area (SQFT)" = "area_sqft"
"floor_area_sqft" = "area_sqft"
"Unit Price ($ PSF)" = "psf"
"unit_price_psf" = "psf"
"Floor Level" = "floor_range"
"Postal District" = "district"
"Tenure" = "tenure"
"Property Type" = "property_type"
"Type of Sale" = "sale_type"
"Market Segment" = "market_segment"
"#;

/// Canonical column definitions for one pipeline run
///
/// Immutable once loaded. `contract_hash` is a SHA-256 over the canonical
/// serialized form, so two runs against byte-different contract files with
/// identical content still audit as the same contract version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContract {
    /// Human-assigned contract version string
    pub schema_version: String,
    /// Columns that must be present (exact name or alias) before any row parses
    pub required_columns: Vec<String>,
    /// Columns used when present, warned about when absent
    pub optional_columns: Vec<String>,
    /// Registered renames: alias → canonical column name
    pub column_aliases: BTreeMap<String, String>,
    /// Ordered business fields hashed into the natural-key row hash
    pub natural_key_fields: Vec<String>,

    /// SHA-256 of the canonical contract content, computed at load
    #[serde(skip)]
    pub contract_hash: String,

    /// Lowercased header → canonical name, built once at load
    #[serde(skip)]
    resolution: HashMap<String, String>,
}

impl SchemaContract {
    /// Load a contract from a TOML file; missing or unparseable is a hard failure
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Contract(format!("cannot read contract file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the contract file if present, otherwise fall back to the vendored
    /// default (first run against an empty root folder)
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(
                path = %path.display(),
                "No contract file found, using vendored default contract"
            );
            Self::from_toml_str(DEFAULT_CONTRACT_TOML)
        }
    }

    /// Parse a contract from TOML content
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut contract: SchemaContract = toml::from_str(content)
            .map_err(|e| Error::Contract(format!("invalid contract file: {}", e)))?;

        if contract.required_columns.is_empty() {
            return Err(Error::Contract(
                "contract declares no required columns".to_string(),
            ));
        }
        if contract.natural_key_fields.is_empty() {
            return Err(Error::Contract(
                "contract declares no natural-key fields".to_string(),
            ));
        }
        for (alias, canonical) in &contract.column_aliases {
            if !contract.is_known_column(canonical) {
                return Err(Error::Contract(format!(
                    "alias '{}' maps to unknown column '{}'",
                    alias, canonical
                )));
            }
        }

        contract.contract_hash = contract.compute_hash();
        contract.resolution = contract.build_resolution();
        Ok(contract)
    }

    fn is_known_column(&self, name: &str) -> bool {
        self.required_columns.iter().any(|c| c == name)
            || self.optional_columns.iter().any(|c| c == name)
    }

    /// Canonical hash over the contract content
    ///
    /// Field order is fixed and collections are sorted (aliases are already in
    /// a BTreeMap), so the digest is stable across serialization details.
    fn compute_hash(&self) -> String {
        let mut canonical = String::new();
        canonical.push_str("schema_version=");
        canonical.push_str(&self.schema_version);
        canonical.push('\n');

        let mut required = self.required_columns.clone();
        required.sort();
        canonical.push_str(&format!("required={}\n", required.join(",")));

        let mut optional = self.optional_columns.clone();
        optional.sort();
        canonical.push_str(&format!("optional={}\n", optional.join(",")));

        for (alias, target) in &self.column_aliases {
            canonical.push_str(&format!("alias={}=>{}\n", alias.to_lowercase(), target));
        }

        // Natural-key order is significant, keep it as declared
        canonical.push_str(&format!(
            "natural_key={}\n",
            self.natural_key_fields.join(",")
        ));

        sha256_hex(canonical.as_bytes())
    }

    fn build_resolution(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for column in self.required_columns.iter().chain(&self.optional_columns) {
            map.insert(column.to_lowercase(), column.clone());
        }
        for (alias, canonical) in &self.column_aliases {
            map.insert(alias.trim().to_lowercase(), canonical.clone());
        }
        map
    }

    /// Resolve a raw CSV header to its canonical column name
    ///
    /// Matching is case-insensitive on the trimmed header, either against the
    /// canonical name itself or a registered alias. Returns `None` for
    /// unknown headers (preserved as raw extras at load time).
    pub fn resolve_header(&self, header: &str) -> Option<&str> {
        self.resolution
            .get(&header.trim().to_lowercase())
            .map(|s| s.as_str())
    }

    /// Whether a canonical column is in the required set
    pub fn is_required(&self, canonical: &str) -> bool {
        self.required_columns.iter().any(|c| c == canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_contract_parses_and_hashes() {
        let contract = SchemaContract::from_toml_str(DEFAULT_CONTRACT_TOML).unwrap();
        assert_eq!(contract.schema_version, "2024.1");
        assert_eq!(contract.required_columns.len(), 4);
        assert_eq!(contract.contract_hash.len(), 64);
        assert_eq!(
            contract.natural_key_fields,
            vec!["project", "transaction_month", "price", "area_sqft", "floor_range"]
        );
    }

    #[test]
    fn contract_hash_is_content_addressed() {
        let a = SchemaContract::from_toml_str(DEFAULT_CONTRACT_TOML).unwrap();
        let b = SchemaContract::from_toml_str(DEFAULT_CONTRACT_TOML).unwrap();
        assert_eq!(a.contract_hash, b.contract_hash);

        let altered = DEFAULT_CONTRACT_TOML.replace("2024.1", "2024.2");
        let c = SchemaContract::from_toml_str(&altered).unwrap();
        assert_ne!(a.contract_hash, c.contract_hash);
    }

    #[test]
    fn resolves_exact_names_and_aliases_case_insensitively() {
        let contract = SchemaContract::from_toml_str(DEFAULT_CONTRACT_TOML).unwrap();
        assert_eq!(contract.resolve_header("project"), Some("project"));
        assert_eq!(contract.resolve_header("PROJECT"), Some("project"));
        assert_eq!(contract.resolve_header("Project Name"), Some("project"));
        assert_eq!(contract.resolve_header("  price ($)  "), Some("price"));
        assert_eq!(contract.resolve_header("nett_price"), None);
    }

    #[test]
    fn alias_to_unknown_column_is_rejected() {
        let bad = r#"
            schema_version = "t"
            required_columns = ["project"]
            optional_columns = []
            natural_key_fields = ["project"]
            [column_aliases]
            "p" = "nonexistent"
        "#;
        let err = SchemaContract::from_toml_str(bad).unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
    }

    #[test]
    fn missing_contract_file_is_a_contract_error() {
        let err = SchemaContract::load(Path::new("/nonexistent/contract.toml")).unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
    }
}
