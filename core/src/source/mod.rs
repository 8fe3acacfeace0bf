pub mod csv;
pub mod fetch;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::errors::Result;

pub use self::csv::CsvSource;

/// Yields typed row batches from wherever the rows live.
///
/// Every batch carries the same schema. The sequence is read once, front to
/// back; starting over means building a new source.
#[allow(async_fn_in_trait)]
pub trait Source {
    /// Schema every batch is coerced to.
    fn schema(&self) -> SchemaRef;

    /// Reads up to `rows` rows from the start of the data without moving the
    /// batch cursor. Used to establish the destination table.
    async fn sample(&mut self, rows: usize) -> Result<RecordBatch>;

    /// Reads the next batch. `None` means the source is exhausted.
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>>;
}
