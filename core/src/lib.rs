pub mod config;
pub mod errors;
pub mod loader;
pub mod schema;
pub mod sink;
pub mod source;
pub mod telemetry;

pub use config::LoadConfig;
pub use errors::{LoadError, Result};
pub use loader::{BulkLoader, LoadState, run_load};
pub use sink::{MemorySink, PostgresSink, Sink, WriteMode};
pub use source::{CsvSource, Source};
pub use telemetry::{LoadMetrics, ProgressObserver, TracingProgress};
