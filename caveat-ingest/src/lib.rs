//! caveat-ingest library interface
//!
//! Batch ingestion pipeline for weekly property-transaction CSV files:
//! contract-driven schema validation, staged loading with computed-field
//! derivation, quantitative and semantic validation, in-batch deduplication,
//! outlier marking, and atomic promotion into the production store.
//!
//! The binary (`src/main.rs`) wires these modules together; everything is
//! exposed here so integration tests can drive individual stages.

pub mod compat;
pub mod config;
pub mod contract;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod rules;

use sqlx::SqlitePool;

use config::PipelineConfig;
use contract::SchemaContract;
use rules::RuleRegistry;

/// Everything a pipeline run needs, constructed once in `main` and passed
/// down. Contract and rules are loaded before the run starts and never
/// re-read mid-run, so every stage of a batch sees the same versions.
pub struct PipelineContext {
    /// Schema contract governing input columns and the natural key
    pub contract: SchemaContract,
    /// Versioned derivation rules
    pub rules: RuleRegistry,
    /// Pipeline thresholds
    pub config: PipelineConfig,
    /// Database connection pool (production + bookkeeping tables)
    pub pool: SqlitePool,
}

impl PipelineContext {
    pub fn new(
        contract: SchemaContract,
        rules: RuleRegistry,
        config: PipelineConfig,
        pool: SqlitePool,
    ) -> Self {
        Self {
            contract,
            rules,
            config,
            pool,
        }
    }
}
