//! Pipeline data model

mod batch;
mod staging_row;

pub use batch::{Batch, BatchStatus, StateTransition};
pub use staging_row::StagingRow;
