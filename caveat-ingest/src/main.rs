//! caveat-ingest - Property-transaction batch ingestion pipeline
//!
//! Ingests weekly CSV batches of raw property-transaction records into the
//! analytics store: contract-driven schema validation, staged loading with
//! derived fields, semantic validation, deduplication, outlier marking, and
//! atomic promotion with a full audit trail.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use caveat_common::{Error, Result};
use caveat_ingest::config::PipelineConfig;
use caveat_ingest::contract::SchemaContract;
use caveat_ingest::pipeline::{self, RunMode};
use caveat_ingest::rules::RuleRegistry;
use caveat_ingest::PipelineContext;

#[derive(Parser, Debug)]
#[command(
    name = "caveat-ingest",
    version,
    about = "Batch ingestion pipeline for property-transaction CSV files"
)]
struct Cli {
    /// Input CSV files to ingest
    files: Vec<PathBuf>,

    /// Stage and validate, report the promotion diff, write nothing to production
    #[arg(long, conflicts_with_all = ["staging_only", "publish", "rollback"])]
    plan: bool,

    /// Stage and validate only, leaving the batch ready for a later --publish
    #[arg(long, conflicts_with_all = ["publish", "rollback"])]
    staging_only: bool,

    /// Promote the most recent ready batch
    #[arg(long, conflicts_with = "rollback")]
    publish: bool,

    /// Revert the most recent completed batch
    #[arg(long)]
    rollback: bool,

    /// Accept rows with sale dates in the future
    #[arg(long)]
    allow_future_dates: bool,

    /// Data directory holding the database, contract and config files
    #[arg(long, env = "CAVEAT_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Schema contract file (default: <root>/contract.toml)
    #[arg(long)]
    contract: Option<PathBuf>,

    /// Pipeline thresholds file (default: <root>/caveat.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        // Operators need to tell a bad input file from a system fault
        eprintln!("error [{}]: {}", e.stage(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("caveat-ingest {}", env!("CARGO_PKG_VERSION"));

    let root = caveat_common::config::resolve_root_folder(cli.root_folder.as_deref());
    caveat_common::config::ensure_root_folder(&root)?;
    info!(root = %root.display(), "Root folder resolved");

    let db_path = caveat_common::config::database_path(&root);
    let pool = caveat_common::db::init_database(&db_path).await?;
    caveat_ingest::db::init_ingest_tables(&pool).await?;

    let contract = match &cli.contract {
        // An explicitly named contract file must exist
        Some(path) => SchemaContract::load(path)?,
        None => SchemaContract::load_or_default(&caveat_common::config::contract_path(&root))?,
    };
    let config = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )))
        }
        Some(path) => PipelineConfig::load_or_default(path)?,
        None => PipelineConfig::load_or_default(&caveat_common::config::config_path(&root))?,
    };
    let rules = RuleRegistry::standard();
    info!(
        schema_version = %contract.schema_version,
        contract_hash = %contract.contract_hash,
        rules_version = %rules.rules_version(),
        "Contract and rules loaded"
    );

    let ctx = PipelineContext::new(contract, rules, config, pool);

    if cli.rollback {
        let batch = pipeline::rollback_latest(&ctx).await?;
        println!("Rolled back batch {} ({})", batch.batch_id, batch.status.as_str());
        return Ok(());
    }

    if cli.publish {
        let batch = pipeline::publish_ready(&ctx).await?;
        println!(
            "Published batch {}: {} rows promoted ({})",
            batch.batch_id,
            batch.rows_promoted,
            batch.status.as_str()
        );
        return Ok(());
    }

    if cli.files.is_empty() {
        return Err(Error::InvalidInput(
            "no input files; pass CSV paths, or use --publish / --rollback".to_string(),
        ));
    }

    let mode = if cli.plan {
        RunMode::Plan
    } else if cli.staging_only {
        RunMode::StagingOnly
    } else {
        RunMode::Full
    };

    let outcome = pipeline::run_ingest(&ctx, &cli.files, mode, cli.allow_future_dates).await?;
    let batch = &outcome.batch;

    if let Some(plan) = &outcome.plan {
        print!("{}", plan.render());
    }
    println!(
        "Batch {}: status={} loaded={} after_dedup={} outliers={} promoted={}",
        batch.batch_id,
        batch.status.as_str(),
        batch.rows_loaded,
        batch.rows_after_dedup,
        batch.rows_outliers_marked,
        batch.rows_promoted
    );
    for issue in &batch.validation_issues {
        println!("  issue: {}", issue);
    }
    for warning in &batch.semantic_warnings {
        println!("  warning: {}", warning);
    }

    Ok(())
}
