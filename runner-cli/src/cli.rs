use clap::Parser;
use loader_core::config::{
    CONFIG_ENV, LoadConfig, PostgresConfig, ProcessingConfig, SourceConfig, load_config,
    taxi_schema, trip_data_url,
};
use loader_core::errors::ConfigError;
use std::path::PathBuf;

/// Load one month of NYC taxi trip data into Postgres in batches.
#[derive(Debug, Parser)]
#[command(name = "ingest-data", version)]
pub struct Cli {
    /// PostgreSQL user
    #[arg(long, env = "PG_USER", default_value = "root")]
    pub pg_user: String,

    /// PostgreSQL password
    #[arg(long, env = "PG_PASS", default_value = "root", hide_env_values = true)]
    pub pg_pass: String,

    /// PostgreSQL host
    #[arg(long, env = "PG_HOST", default_value = "localhost")]
    pub pg_host: String,

    /// PostgreSQL port
    #[arg(long, env = "PG_PORT", default_value_t = 5432)]
    pub pg_port: u16,

    /// PostgreSQL database name
    #[arg(long, env = "PG_DB", default_value = "ny_taxi")]
    pub pg_db: String,

    /// Target table name
    #[arg(long, default_value = "yellow_taxi_data")]
    pub target_table: String,

    /// Year of the trip data release
    #[arg(long, default_value_t = 2021)]
    pub year: u16,

    /// Month of the trip data release
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=12))]
    pub month: u8,

    /// Taxi color of the release (yellow, green, fhv)
    #[arg(long, default_value = "yellow")]
    pub color: String,

    /// Read from this URL or path instead of the monthly release
    #[arg(long)]
    pub url: Option<String>,

    /// Rows per batch
    #[arg(long, default_value_t = 100_000)]
    pub chunk_size: usize,

    /// Rows read up front to create the table
    #[arg(long, default_value_t = 100)]
    pub sample_rows: usize,

    /// Directory for downloaded files
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Reuse a previous download found in the cache directory
    #[arg(long)]
    pub reuse_download: bool,

    /// YAML config file; replaces all source and connection flags.
    /// Without it, YAML in LOADER_CONFIG does the same.
    #[arg(long)]
    pub config: Option<String>,

    /// Do not write the leading row-ordinal column
    #[arg(long)]
    pub no_index: bool,

    /// Read and type-check everything but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run metrics as JSON on stdout when done
    #[arg(long)]
    pub metrics_json: bool,
}

impl Cli {
    pub fn to_config(&self) -> Result<LoadConfig, ConfigError> {
        let mut config = if self.config.is_some() || std::env::var_os(CONFIG_ENV).is_some() {
            load_config(self.config.as_deref())?
        } else {
            self.flags_config()
        };
        if self.no_index {
            config.sink.index_column = None;
        }
        config.validate()?;
        Ok(config)
    }

    fn flags_config(&self) -> LoadConfig {
        let url = self
            .url
            .clone()
            .unwrap_or_else(|| trip_data_url(&self.color, self.year, self.month));

        LoadConfig {
            source: SourceConfig {
                url,
                sample_rows: self.sample_rows,
                cache_dir: self.cache_dir.clone(),
                reuse_download: self.reuse_download,
            },
            sink: PostgresConfig {
                user: self.pg_user.clone(),
                password: self.pg_pass.clone(),
                host: self.pg_host.clone(),
                port: self.pg_port,
                database: self.pg_db.clone(),
                table: self.target_table.clone(),
                ..PostgresConfig::default()
            },
            processing: ProcessingConfig {
                batch_size: self.chunk_size,
            },
            schema: taxi_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    // to_config reads the process environment
    static ENV: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["ingest-data"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_reach_the_config() {
        let _env = env_lock();
        let cli = parse(&[
            "--pg-user",
            "loader",
            "--pg-pass",
            "secret",
            "--pg-host",
            "db",
            "--pg-port",
            "6543",
            "--pg-db",
            "taxi",
            "--target-table",
            "trips",
            "--year",
            "2020",
            "--month",
            "7",
            "--chunk-size",
            "500",
        ]);
        let config = cli.to_config().unwrap();

        assert_eq!(
            config.sink.connection_url(),
            "postgresql://loader:secret@db:6543/taxi"
        );
        assert_eq!(config.sink.table, "trips");
        assert_eq!(config.processing.batch_size, 500);
        assert!(config.source.url.ends_with("yellow/yellow_tripdata_2020-07.csv.gz"));
    }

    #[test]
    fn test_url_override_and_no_index() {
        let _env = env_lock();
        let cli = parse(&["--url", "/tmp/trips.csv", "--no-index"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.source.url, "/tmp/trips.csv");
        assert_eq!(config.sink.index_column, None);
    }

    #[test]
    fn test_month_out_of_range() {
        assert!(Cli::try_parse_from(["ingest-data", "--month", "13"]).is_err());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let _env = env_lock();
        let cli = parse(&["--chunk-size", "0"]);
        assert!(matches!(
            cli.to_config(),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn test_config_file_replaces_flags() {
        let _env = env_lock();
        let dir = std::env::temp_dir().join(format!("ingest-data-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("load.yaml");
        std::fs::write(
            &path,
            "source:\n  url: trips.csv\nsink:\n  user: u\n  password: p\n  host: h\n  port: 1\n  database: d\n  table: from_file\n",
        )
        .unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "--target-table", "ignored"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.sink.table, "from_file");
        assert_eq!(config.source.url, "trips.csv");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_env_config_replaces_flags() {
        let _env = env_lock();
        unsafe { std::env::set_var(CONFIG_ENV, "source:\n  url: from_env.csv\n") };
        let result = parse(&["--target-table", "ignored", "--chunk-size", "7"]).to_config();
        unsafe { std::env::remove_var(CONFIG_ENV) };

        let config = result.unwrap();
        assert_eq!(config.source.url, "from_env.csv");
        assert_eq!(config.sink.table, "yellow_taxi_data");
        assert_eq!(config.processing.batch_size, 100_000);
    }
}
