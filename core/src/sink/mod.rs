pub mod memory;
pub mod postgres;

use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::SinkError;

pub use self::memory::MemorySink;
pub use self::postgres::PostgresSink;

/// What to do when the target table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Drop and recreate the table from the batch schema, then insert.
    Replace,
    /// Insert into the table as it is, creating it first if missing.
    Append,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Replace => f.write_str("replace"),
            WriteMode::Append => f.write_str("append"),
        }
    }
}

/// The `Sink` trait defines the contract for any destination table store.
/// It takes one batch in Arrow format and persists it under `table`.
#[allow(async_fn_in_trait)]
pub trait Sink {
    /// Writes every row of `batch` and returns how many rows were stored.
    /// A zero-row batch with [`WriteMode::Replace`] only (re)creates the table.
    async fn write(
        &mut self,
        table: &str,
        batch: &RecordBatch,
        mode: WriteMode,
    ) -> Result<u64, SinkError>;
}
