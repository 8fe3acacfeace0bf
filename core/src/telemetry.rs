use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loader_core=info,ingest_data=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct LoadMetrics {
    pub started_at: Option<DateTime<Utc>>,
    pub schema_inits: usize,
    pub batches_written: usize,
    pub rows_written: u64,
    pub elapsed_ms: u64,
}

/// Notified after every batch the loader writes.
pub trait ProgressObserver {
    /// `rows_written` is the size of the batch just written; `batch_index`
    /// counts batches from zero.
    fn batch_written(&mut self, rows_written: usize, batch_index: usize);
}

impl<F> ProgressObserver for F
where
    F: FnMut(usize, usize),
{
    fn batch_written(&mut self, rows_written: usize, batch_index: usize) {
        self(rows_written, batch_index)
    }
}

/// Logs each batch with a running total.
#[derive(Debug, Default)]
pub struct TracingProgress {
    total: u64,
}

impl TracingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl ProgressObserver for TracingProgress {
    fn batch_written(&mut self, rows_written: usize, batch_index: usize) {
        self.total += rows_written as u64;
        info!(
            batch = batch_index + 1,
            inserted = rows_written,
            total = self.total,
            "inserted batch"
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn batch_written(&mut self, _rows_written: usize, _batch_index: usize) {}
}
