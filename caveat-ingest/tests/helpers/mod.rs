//! Shared test utilities: scratch database, pipeline context, CSV fixtures

// Each integration test binary compiles this module; not all of them use
// every helper
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use caveat_ingest::config::PipelineConfig;
use caveat_ingest::contract::SchemaContract;
use caveat_ingest::rules::RuleRegistry;
use caveat_ingest::PipelineContext;

/// A pipeline context backed by a fresh database in a temp directory
///
/// Holds the TempDir so the database file outlives the pool.
pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub ctx: PipelineContext,
}

impl TestEnv {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Fresh context with the vendored default contract and test-friendly thresholds
pub async fn test_env() -> TestEnv {
    test_env_with_config(PipelineConfig {
        min_rows: 2,
        ..PipelineConfig::default()
    })
    .await
}

pub async fn test_env_with_config(config: PipelineConfig) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let pool = caveat_common::db::init_database(&dir.path().join("caveat.db"))
        .await
        .unwrap();
    caveat_ingest::db::init_ingest_tables(&pool).await.unwrap();

    let contract = SchemaContract::load_or_default(Path::new("/nonexistent")).unwrap();
    let ctx = PipelineContext::new(contract, RuleRegistry::standard(), config, pool);
    TestEnv { dir, ctx }
}

/// Write a CSV file with the given header line and data lines
pub fn write_csv(dir: &Path, name: &str, header: &str, rows: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut content = String::from(header);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    std::fs::write(&path, content).unwrap();
    path
}

pub const STANDARD_HEADER: &str = "project,sale_date,price,area_sqft,floor_range,district";

/// Generate `count` rows with unique natural keys and unremarkable prices
pub fn standard_rows(count: usize) -> Vec<String> {
    (0..count).map(standard_row).collect()
}

/// One row; price varies with `i` so every natural key is unique
pub fn standard_row(i: usize) -> String {
    format!(
        "EMERALD GROVE {},2024-03-{:02},{},{}.0,06-10,9",
        i % 5,
        1 + i % 28,
        1_000_000 + i * 500,
        900 + (i % 5) * 50
    )
}

/// Count rows in the production transactions table
pub async fn production_count(ctx: &PipelineContext) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
        .fetch_one(&ctx.pool)
        .await
        .unwrap()
}

/// Count non-outlier rows, the filter every read-side consumer applies
pub async fn production_count_filtered(ctx: &PipelineContext) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE is_outlier = 0")
        .fetch_one(&ctx.pool)
        .await
        .unwrap()
}
