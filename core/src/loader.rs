use chrono::Utc;
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::LoadConfig;
use crate::errors::Result;
use crate::sink::{Sink, WriteMode};
use crate::source::{CsvSource, Source, fetch};
use crate::telemetry::{LoadMetrics, ProgressObserver};

/// Where a run is. Any error moves the loader straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Start,
    SchemaInit,
    StreamBatch,
    WriteBatch,
    Done,
    Failed,
}

/// The loader orchestrates the data flow from source -> sink.
///
/// One batch is read, then written, then the next one is read. There is no
/// transaction around the run: batches written before a failure stay written.
pub struct BulkLoader<S, K, P> {
    table: String,
    sample_rows: usize,
    source: S,
    sink: K,
    observer: P,
    state: LoadState,
    metrics: LoadMetrics,
}

impl<S, K, P> BulkLoader<S, K, P>
where
    S: Source,
    K: Sink,
    P: ProgressObserver,
{
    pub fn new(config: &LoadConfig, source: S, sink: K, observer: P) -> Self {
        Self {
            table: config.sink.table.clone(),
            sample_rows: config.source.sample_rows,
            source,
            sink,
            observer,
            state: LoadState::Start,
            metrics: LoadMetrics::default(),
        }
    }

    /// Replaces the target table with every row of the source.
    ///
    /// High-level logic:
    /// 1. Read a small sample and write zero rows with `Replace` to create the table.
    /// 2. Pull batches from the source until it is exhausted.
    /// 3. Write each batch with `Append` and notify the observer.
    pub async fn run(&mut self) -> Result<LoadMetrics> {
        let start = Instant::now();
        self.metrics.started_at = Some(Utc::now());
        let result = self.load().await;
        self.metrics.elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                self.state = LoadState::Done;
                info!(
                    table = %self.table,
                    batches = self.metrics.batches_written,
                    rows = self.metrics.rows_written,
                    elapsed_ms = self.metrics.elapsed_ms,
                    "load finished"
                );
                Ok(self.metrics.clone())
            }
            Err(e) => {
                error!(
                    table = %self.table,
                    state = ?self.state,
                    batches = self.metrics.batches_written,
                    rows = self.metrics.rows_written,
                    "load failed: {}",
                    e
                );
                self.state = LoadState::Failed;
                Err(e)
            }
        }
    }

    async fn load(&mut self) -> Result<()> {
        self.state = LoadState::SchemaInit;
        let sample = self.source.sample(self.sample_rows).await?;
        debug!(rows = sample.num_rows(), "read schema sample");
        self.sink
            .write(&self.table, &sample.slice(0, 0), WriteMode::Replace)
            .await?;
        self.metrics.schema_inits += 1;
        info!(table = %self.table, "table schema initialised");

        let mut batch_index = 0;
        loop {
            self.state = LoadState::StreamBatch;
            let Some(batch) = self.source.next_batch().await? else {
                break;
            };

            self.state = LoadState::WriteBatch;
            let written = self
                .sink
                .write(&self.table, &batch, WriteMode::Append)
                .await?;
            if written != batch.num_rows() as u64 {
                warn!(
                    expected = batch.num_rows(),
                    written,
                    "sink reported a different row count"
                );
            }

            self.metrics.batches_written += 1;
            self.metrics.rows_written += written;
            self.observer.batch_written(batch.num_rows(), batch_index);
            batch_index += 1;
        }
        Ok(())
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn metrics(&self) -> &LoadMetrics {
        &self.metrics
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_parts(self) -> (S, K, P) {
        (self.source, self.sink, self.observer)
    }
}

/// Fetches the configured source if it is remote and opens it as a batched
/// CSV reader.
pub async fn open_source(config: &LoadConfig) -> Result<CsvSource> {
    let client = Client::new();
    let path = fetch::resolve_locator(&client, &config.source).await?;
    CsvSource::open(path, &config.schema, config.processing.batch_size)
}

/// Validates `config`, then runs a full load into `sink`.
pub async fn run_load<K, P>(config: LoadConfig, sink: K, observer: P) -> Result<(LoadMetrics, K)>
where
    K: Sink,
    P: ProgressObserver,
{
    config.validate()?;
    let source = open_source(&config).await?;
    let mut loader = BulkLoader::new(&config, source, sink, observer);
    let metrics = loader.run().await?;
    let (_, sink, _) = loader.into_parts();
    Ok((metrics, sink))
}
