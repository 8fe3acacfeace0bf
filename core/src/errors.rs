use arrow::error::ArrowError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source read error: {0}")]
    SourceRead(#[from] SourceError),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(#[from] SchemaError),

    #[error("Sink write error: {0}")]
    SinkWrite(#[from] SinkError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Failed to load configuration from {origin}: {error}")]
    LoadFailed {
        origin: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV: {reason}")]
    Malformed { reason: String },
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Declared column {column} is missing from the CSV header")]
    MissingColumn { column: String },

    #[error("Column {column} appears more than once")]
    DuplicateColumn { column: String },

    #[error("Value could not be coerced to its declared type: {reason}")]
    Coercion { reason: String },

    #[error("Column {column} has a type the sink cannot store: {data_type}")]
    Unsupported { column: String, data_type: String },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to connect to {target}: {reason}")]
    Connection { target: String, reason: String },

    #[error("Failed to write to table {table}: {reason}")]
    Write { table: String, reason: String },

    #[error("Invalid table name: {table}")]
    InvalidTable { table: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

pub type Result<T> = std::result::Result<T, LoadError>;

impl From<ArrowError> for LoadError {
    /// Cell-level parse failures are coercion problems; everything else the
    /// CSV reader raises means the file itself could not be read.
    fn from(err: ArrowError) -> Self {
        match err {
            ArrowError::ParseError(reason) | ArrowError::CastError(reason) => {
                LoadError::SchemaMismatch(SchemaError::Coercion { reason })
            }
            other => LoadError::SourceRead(SourceError::Malformed {
                reason: other.to_string(),
            }),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Invalid {
            message: err.to_string(),
        }
    }
}

impl LoadError {
    /// Process exit code for this failure. Every failure is fatal; the code
    /// only tells the caller which stage gave up.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::Config(_) => 2,
            LoadError::SourceRead(_) => 3,
            LoadError::SchemaMismatch(_) => 4,
            LoadError::SinkWrite(SinkError::Schema(_)) => 4,
            LoadError::SinkWrite(_) => 5,
        }
    }
}
