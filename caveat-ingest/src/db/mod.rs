//! Pipeline bookkeeping database operations
//!
//! The ingest crate owns the batch audit table, the batch-scoped staging
//! area and the run lock. The production tables (transactions, aggregates,
//! lookups) are created by `caveat_common::db::init`.

pub mod batches;
pub mod lock;
pub mod schema;
pub mod staging;

pub use schema::init_ingest_tables;
