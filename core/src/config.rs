use arrow::datatypes::{DataType, Field, TimeUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::errors::ConfigError;

pub const TRIP_DATA_PREFIX: &str = "https://github.com/DataTalksClub/nyc-tlc-data/releases/download";

/// Environment variable holding a whole YAML config.
pub const CONFIG_ENV: &str = "LOADER_CONFIG";

/// Postgres truncates identifiers longer than this.
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: PostgresConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default = "taxi_schema")]
    pub schema: Vec<SchemaField>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// http(s) URL, `file://` URL or local path of the CSV (optionally gzipped).
    pub url: String,
    /// Rows read up front to establish the destination table.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    /// Where downloads land. Defaults to the system temp dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Skip the download when the target file already exists in `cache_dir`.
    #[serde(default)]
    pub reuse_download: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub table: String,
    /// Leading row-ordinal column; `None` writes the CSV columns only.
    #[serde(default = "default_index_column")]
    pub index_column: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchemaField {
    pub name: String,
    pub data_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[serde(alias = "int", alias = "long")]
    Int64,
    #[serde(alias = "float", alias = "double")]
    Float64,
    #[serde(alias = "string", alias = "text")]
    Utf8,
    #[serde(alias = "datetime")]
    Timestamp,
    #[serde(alias = "bool")]
    Boolean,
}

impl ColumnType {
    pub fn to_arrow(self) -> DataType {
        match self {
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Utf8 => DataType::Utf8,
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            ColumnType::Boolean => DataType::Boolean,
        }
    }
}

impl SchemaField {
    pub fn new(name: &str, data_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nullable: true,
        }
    }

    pub fn to_arrow(&self) -> Field {
        Field::new(&self.name, self.data_type.to_arrow(), self.nullable)
    }
}

/// Column types of the yellow taxi trip files. Columns not listed here are
/// read as text.
pub fn taxi_schema() -> Vec<SchemaField> {
    use ColumnType::*;

    [
        ("VendorID", Int64),
        ("tpep_pickup_datetime", Timestamp),
        ("tpep_dropoff_datetime", Timestamp),
        ("passenger_count", Int64),
        ("trip_distance", Float64),
        ("RatecodeID", Int64),
        ("store_and_fwd_flag", Utf8),
        ("PULocationID", Int64),
        ("DOLocationID", Int64),
        ("payment_type", Int64),
        ("fare_amount", Float64),
        ("extra", Float64),
        ("mta_tax", Float64),
        ("tip_amount", Float64),
        ("tolls_amount", Float64),
        ("improvement_surcharge", Float64),
        ("total_amount", Float64),
        ("congestion_surcharge", Float64),
    ]
    .into_iter()
    .map(|(name, data_type)| SchemaField::new(name, data_type))
    .collect()
}

/// Release URL of one month of trip data, e.g. `yellow_tripdata_2021-01.csv.gz`.
pub fn trip_data_url(color: &str, year: u16, month: u8) -> String {
    format!("{TRIP_DATA_PREFIX}/{color}/{color}_tripdata_{year}-{month:02}.csv.gz")
}

pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && name.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_sample_rows() -> usize {
    100
}

fn default_index_column() -> Option<String> {
    Some("index".to_string())
}

fn default_nullable() -> bool {
    true
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: trip_data_url("yellow", 2021, 1),
            sample_rows: default_sample_rows(),
            cache_dir: None,
            reuse_download: false,
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            password: "root".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "ny_taxi".to_string(),
            table: "yellow_taxi_data".to_string(),
            index_column: default_index_column(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            sink: PostgresConfig::default(),
            processing: ProcessingConfig::default(),
            schema: taxi_schema(),
        }
    }
}

impl PostgresConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    /// Same as [`connection_url`](Self::connection_url) with the password masked.
    pub fn redacted_url(&self) -> String {
        format!(
            "postgresql://{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

pub fn load_config(config_path: Option<&str>) -> Result<LoadConfig, ConfigError> {
    match config_path {
        Some(path) => LoadConfig::from_file(path),
        None => LoadConfig::from_env(),
    }
}

impl LoadConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            origin: path.to_string(),
            error: Box::new(e),
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let config_str = std::env::var(CONFIG_ENV).map_err(|_| ConfigError::Invalid {
            message: format!("{CONFIG_ENV} environment variable not set"),
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: String| Err(ConfigError::ValidationFailed { reason });

        if self.processing.batch_size == 0 {
            return fail("batch_size must be greater than zero".to_string());
        }
        if self.source.sample_rows == 0 {
            return fail("sample_rows must be greater than zero".to_string());
        }
        if self.source.url.trim().is_empty() {
            return fail("source url cannot be empty".to_string());
        }
        if !is_valid_identifier(&self.sink.table) {
            return fail(format!("'{}' is not a valid table name", self.sink.table));
        }
        if self.schema.is_empty() {
            return fail("schema cannot be empty".to_string());
        }

        let mut seen = HashSet::new();
        for field in &self.schema {
            if !seen.insert(field.name.as_str()) {
                return fail(format!("column '{}' is declared twice", field.name));
            }
        }

        if let Some(index) = &self.sink.index_column {
            if !is_valid_identifier(index) {
                return fail(format!("'{index}' is not a valid index column name"));
            }
            if seen.contains(index.as_str()) {
                return fail(format!("index column '{index}' clashes with a data column"));
            }
        }
        Ok(())
    }
}
