use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;

use crate::errors::SinkError;
use crate::sink::{Sink, WriteMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub table: String,
    pub mode: WriteMode,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub num_rows: usize,
}

impl MemoryTable {
    fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
            num_rows: 0,
        }
    }

    /// All stored rows as a single batch.
    pub fn concat(&self) -> Result<RecordBatch, ArrowError> {
        concat_batches(&self.schema, &self.batches)
    }
}

/// Keeps tables in process memory and records every write call.
///
/// Used by tests and by dry runs, where [`MemorySink::discarding`] counts rows
/// without holding on to them.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: HashMap<String, MemoryTable>,
    calls: Vec<WriteCall>,
    discard_rows: bool,
    reject_from_call: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discarding() -> Self {
        Self {
            discard_rows: true,
            ..Self::default()
        }
    }

    /// Fails the `n`-th write call (zero based) and every call after it.
    pub fn reject_from_call(mut self, n: usize) -> Self {
        self.reject_from_call = Some(n);
        self
    }

    pub fn calls(&self) -> &[WriteCall] {
        &self.calls
    }

    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    /// Row counts of the append calls, in order.
    pub fn append_sizes(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter(|c| c.mode == WriteMode::Append)
            .map(|c| c.rows)
            .collect()
    }
}

impl Sink for MemorySink {
    async fn write(
        &mut self,
        table: &str,
        batch: &RecordBatch,
        mode: WriteMode,
    ) -> Result<u64, SinkError> {
        if self
            .reject_from_call
            .is_some_and(|n| self.calls.len() >= n)
        {
            return Err(SinkError::Write {
                table: table.to_string(),
                reason: "write rejected".to_string(),
            });
        }

        let stored = match mode {
            WriteMode::Replace => self
                .tables
                .entry(table.to_string())
                .insert_entry(MemoryTable::new(batch.schema()))
                .into_mut(),
            WriteMode::Append => self
                .tables
                .entry(table.to_string())
                .or_insert_with(|| MemoryTable::new(batch.schema())),
        };
        if stored.schema != batch.schema() {
            return Err(SinkError::Write {
                table: table.to_string(),
                reason: "batch schema does not match table schema".to_string(),
            });
        }

        if !self.discard_rows && batch.num_rows() > 0 {
            stored.batches.push(batch.clone());
        }
        stored.num_rows += batch.num_rows();
        self.calls.push(WriteCall {
            table: table.to_string(),
            mode,
            rows: batch.num_rows(),
        });
        Ok(batch.num_rows() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch(values: &[i64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values.to_vec()))]).unwrap()
    }

    #[tokio::test]
    async fn test_replace_drops_previous_rows() {
        let mut sink = MemorySink::new();
        sink.write("t", &batch(&[1, 2]), WriteMode::Append).await.unwrap();
        sink.write("t", &batch(&[]), WriteMode::Replace).await.unwrap();
        sink.write("t", &batch(&[3]), WriteMode::Append).await.unwrap();

        let table = sink.table("t").unwrap();
        assert_eq!(table.num_rows, 1);
        assert_eq!(table.concat().unwrap(), batch(&[3]));
        assert_eq!(sink.append_sizes(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_append_rejects_other_schema() {
        let mut sink = MemorySink::new();
        sink.write("t", &batch(&[1]), WriteMode::Replace).await.unwrap();

        let other = Arc::new(Schema::new(vec![Field::new("name", DataType::Utf8, true)]));
        let err = sink
            .write("t", &RecordBatch::new_empty(other), WriteMode::Append)
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Write { .. }));
    }

    #[test]
    fn test_concat_reports_mismatched_batches() {
        let other = Arc::new(Schema::new(vec![Field::new("name", DataType::Utf8, true)]));
        let table = MemoryTable {
            schema: other,
            batches: vec![batch(&[1])],
            num_rows: 1,
        };
        assert!(table.concat().is_err());
    }

    #[tokio::test]
    async fn test_discarding_counts_only() {
        let mut sink = MemorySink::discarding();
        sink.write("t", &batch(&[1, 2, 3]), WriteMode::Append).await.unwrap();
        let table = sink.table("t").unwrap();
        assert_eq!(table.num_rows, 3);
        assert!(table.batches.is_empty());
        assert_eq!(table.concat().unwrap().num_rows(), 0);
    }

    #[tokio::test]
    async fn test_reject_from_call() {
        let mut sink = MemorySink::new().reject_from_call(1);
        sink.write("t", &batch(&[1]), WriteMode::Append).await.unwrap();
        assert!(sink.write("t", &batch(&[2]), WriteMode::Append).await.is_err());
        assert_eq!(sink.table("t").unwrap().num_rows, 1);
    }
}
