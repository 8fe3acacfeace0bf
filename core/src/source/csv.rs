use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SchemaField;
use crate::errors::{Result, SourceError};
use crate::schema::{coerce_integers, read_schema, resolve_schema};
use crate::source::Source;

type BoxedRead = Box<dyn Read + Send>;

/// Reads a CSV file, gzipped or plain, in fixed-size typed batches.
///
/// Short rows are padded with nulls. Integer columns accept integral
/// decimals like `1.0`.
pub struct CsvSource {
    path: PathBuf,
    schema: SchemaRef,
    read_schema: SchemaRef,
    batch_size: usize,
    reader: Option<arrow::csv::Reader<BoxedRead>>,
    rows_read: usize,
}

impl CsvSource {
    /// Reads the header of `path` and resolves the declared column types
    /// against it. No data rows are read yet.
    pub fn open(
        path: impl AsRef<Path>,
        declared: &[SchemaField],
        batch_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let header = read_header(&path)?;
        let schema = resolve_schema(&header, declared)?;
        info!(
            path = %path.display(),
            columns = schema.fields().len(),
            batch_size,
            "opened csv source"
        );

        Ok(Self {
            path,
            read_schema: Arc::new(read_schema(&schema)),
            schema: Arc::new(schema),
            batch_size,
            reader: None,
            rows_read: 0,
        })
    }

    /// Data rows handed out by [`next_batch`](Source::next_batch) so far.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    fn build_reader(&self, batch_size: usize) -> Result<arrow::csv::Reader<BoxedRead>> {
        let input = open_input(&self.path)?;
        let reader = ReaderBuilder::new(self.read_schema.clone())
            .with_header(true)
            .with_truncated_rows(true)
            .with_batch_size(batch_size)
            .build(input)?;
        Ok(reader)
    }
}

impl Source for CsvSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    async fn sample(&mut self, rows: usize) -> Result<RecordBatch> {
        let mut reader = self.build_reader(rows)?;
        match reader.next().transpose()? {
            Some(batch) => Ok(coerce_integers(&batch, &self.schema)?),
            None => Ok(RecordBatch::new_empty(self.schema.clone())),
        }
    }

    async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.reader.is_none() {
            self.reader = Some(self.build_reader(self.batch_size)?);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let batch = match reader.next().transpose()? {
            Some(batch) => Some(coerce_integers(&batch, &self.schema)?),
            None => None,
        };
        if let Some(batch) = &batch {
            self.rows_read += batch.num_rows();
            debug!(rows = batch.num_rows(), total = self.rows_read, "read batch");
        }
        Ok(batch)
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

fn open_input(path: &Path) -> Result<BoxedRead> {
    let file = File::open(path).map_err(|source| SourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if is_gzip(path) {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn read_header(path: &Path) -> Result<Vec<String>> {
    let input = open_input(path)?;
    let (schema, _) = Format::default()
        .with_header(true)
        .infer_schema(input, Some(0))?;
    if schema.fields().is_empty() {
        return Err(SourceError::Malformed {
            reason: format!("{} has no header row", path.display()),
        }
        .into());
    }
    Ok(schema.fields().iter().map(|f| f.name().clone()).collect())
}
