use flate2::Compression;
use flate2::write::GzEncoder;
use loader_core::config::*;
use loader_core::errors::*;
use loader_core::sink::{MemorySink, WriteMode};
use loader_core::telemetry::NoProgress;
use loader_core::{LoadMetrics, run_load};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TAXI_HEADER: &str = "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,RatecodeID,store_and_fwd_flag,PULocationID,DOLocationID,payment_type,fare_amount,extra,mta_tax,tip_amount,tolls_amount,improvement_surcharge,total_amount,congestion_surcharge";

fn taxi_row(i: usize, bad_fare: bool) -> String {
    let minute = i / 60 % 60;
    let second = i % 60;
    let fare = 5.0 + (i % 40) as f64 * 0.5;
    let fare_text = if bad_fare {
        "not-a-fare".to_string()
    } else {
        format!("{fare:.1}")
    };
    format!(
        "{},2021-01-01 00:{minute:02}:{second:02},2021-01-01 01:{minute:02}:{second:02},1,{:.2},1,N,142,43,2,{fare_text},0.5,0.5,2.0,0.0,0.3,{:.2},2.5",
        i % 2 + 1,
        1.0 + i as f64 / 100.0,
        fare + 5.8,
    )
}

/// Writes a gzipped trip file with `rows` rows; `bad_row` gets a non-numeric fare.
fn write_trips(dir: &TempDir, rows: usize, bad_row: Option<usize>) -> PathBuf {
    let path = dir.path().join("yellow_tripdata_2021-01.csv.gz");
    let mut encoder = GzEncoder::new(std::fs::File::create(&path).unwrap(), Compression::fast());
    writeln!(encoder, "{TAXI_HEADER}").unwrap();
    for i in 0..rows {
        let row = taxi_row(i, Some(i) == bad_row);
        writeln!(encoder, "{row}").unwrap();
    }
    encoder.finish().unwrap();
    path
}

fn config_for(path: &Path, batch_size: usize) -> LoadConfig {
    let mut config = LoadConfig::default();
    config.source.url = path.display().to_string();
    config.processing.batch_size = batch_size;
    config
}

async fn load(config: LoadConfig, sink: MemorySink) -> Result<(LoadMetrics, MemorySink)> {
    run_load(config, sink, NoProgress).await
}

#[tokio::test]
async fn test_250_rows_in_batches_of_100() {
    let dir = TempDir::new().unwrap();
    let path = write_trips(&dir, 250, None);

    let (metrics, sink) = load(config_for(&path, 100), MemorySink::new()).await.unwrap();

    assert_eq!(metrics.rows_written, 250);
    assert_eq!(metrics.batches_written, 3);
    assert_eq!(sink.calls()[0].mode, WriteMode::Replace);
    assert_eq!(sink.calls()[0].rows, 0);
    assert_eq!(sink.append_sizes(), vec![100, 100, 50]);
    assert_eq!(sink.table("yellow_taxi_data").unwrap().num_rows, 250);
}

#[tokio::test]
async fn test_columns_follow_declared_types() {
    let dir = TempDir::new().unwrap();
    let path = write_trips(&dir, 20, None);

    let (_, sink) = load(config_for(&path, 8), MemorySink::new()).await.unwrap();
    let table = sink.table("yellow_taxi_data").unwrap();

    for field in taxi_schema() {
        let stored = table.schema.field_with_name(&field.name).unwrap();
        assert_eq!(stored.data_type(), &field.data_type.to_arrow(), "{}", field.name);
    }
}

#[tokio::test]
async fn test_batch_size_does_not_change_contents() {
    let dir = TempDir::new().unwrap();
    let path = write_trips(&dir, 250, None);

    let (_, small) = load(config_for(&path, 7), MemorySink::new()).await.unwrap();
    let (_, large) = load(config_for(&path, 1000), MemorySink::new()).await.unwrap();

    let small = small.table("yellow_taxi_data").unwrap().concat().unwrap();
    let large = large.table("yellow_taxi_data").unwrap().concat().unwrap();
    assert_eq!(small.num_rows(), 250);
    assert_eq!(small, large);
}

#[tokio::test]
async fn test_rerun_replaces_instead_of_duplicating() {
    let dir = TempDir::new().unwrap();
    let path = write_trips(&dir, 120, None);

    let (_, sink) = load(config_for(&path, 50), MemorySink::new()).await.unwrap();
    let (_, sink) = load(config_for(&path, 50), sink).await.unwrap();

    assert_eq!(sink.table("yellow_taxi_data").unwrap().num_rows, 120);
}

#[tokio::test]
async fn test_header_only_source_creates_empty_table() {
    let dir = TempDir::new().unwrap();
    let path = write_trips(&dir, 0, None);

    let (metrics, sink) = load(config_for(&path, 100), MemorySink::new()).await.unwrap();

    assert_eq!(metrics.schema_inits, 1);
    assert_eq!(metrics.rows_written, 0);
    assert!(sink.append_sizes().is_empty());
    let table = sink.table("yellow_taxi_data").unwrap();
    assert_eq!(table.num_rows, 0);
    assert_eq!(table.schema.fields().len(), 18);
}

#[tokio::test]
async fn test_bad_value_aborts_after_earlier_batches() {
    let dir = TempDir::new().unwrap();
    let path = write_trips(&dir, 250, Some(150));

    let sink = MemorySink::new();
    let config = config_for(&path, 100);
    let source = loader_core::loader::open_source(&config).await.unwrap();
    let mut loader = loader_core::BulkLoader::new(&config, source, sink, NoProgress);

    let err = loader.run().await.unwrap_err();
    assert!(matches!(err, LoadError::SchemaMismatch(SchemaError::Coercion { .. })));
    assert_eq!(loader.state(), loader_core::LoadState::Failed);
    assert_eq!(loader.sink().table("yellow_taxi_data").unwrap().num_rows, 100);
}

#[tokio::test]
async fn test_missing_source_is_source_read_error() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir.path().join("nope.csv.gz"), 100);

    let err = load(config, MemorySink::new()).await.err().unwrap();
    assert!(matches!(err, LoadError::SourceRead(_)));
    assert_eq!(err.exit_code(), 3);
}

/// Full round trip against a throwaway Postgres container.
#[tokio::test]
#[ignore = "needs a docker daemon"]
async fn test_postgres_round_trip() {
    use loader_core::PostgresSink;
    use testcontainers::{GenericImage, clients, core::WaitFor};
    use tokio_postgres::NoTls;

    let docker = clients::Cli::default();
    let image = GenericImage::new("postgres", "16-alpine")
        .with_env_var("POSTGRES_USER", "root")
        .with_env_var("POSTGRES_PASSWORD", "root")
        .with_env_var("POSTGRES_DB", "ny_taxi")
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ));
    let node = docker.run(image);

    let dir = TempDir::new().unwrap();
    let path = write_trips(&dir, 250, None);
    let mut config = config_for(&path, 100);
    config.sink.port = node.get_host_port_ipv4(5432);

    // the server restarts once after initdb, so the first attempts may be refused
    let mut sink = None;
    for _ in 0..20 {
        match PostgresSink::connect(&config.sink).await {
            Ok(connected) => {
                sink = Some(connected);
                break;
            }
            Err(_) => tokio::time::sleep(std::time::Duration::from_millis(500)).await,
        }
    }
    let sink = sink.expect("postgres never accepted connections");

    run_load(config.clone(), sink, NoProgress).await.unwrap();
    // second run must replace, not duplicate
    let sink = PostgresSink::connect(&config.sink).await.unwrap();
    run_load(config.clone(), sink, NoProgress).await.unwrap();

    let (client, connection) = tokio_postgres::connect(
        &format!(
            "host=localhost port={} user=root password=root dbname=ny_taxi",
            config.sink.port
        ),
        NoTls,
    )
    .await
    .unwrap();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {}", e);
        }
    });

    let row = client
        .query_one(
            "SELECT count(*), min(\"index\"), max(\"index\") FROM yellow_taxi_data",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(row.get::<_, i64>(0), 250);
    assert_eq!(row.get::<_, i64>(1), 0);
    assert_eq!(row.get::<_, i64>(2), 249);

    let types = client
        .query(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_name = 'yellow_taxi_data' AND column_name IN ('VendorID', 'fare_amount', 'tpep_pickup_datetime')",
            &[],
        )
        .await
        .unwrap();
    for row in types {
        let column: &str = row.get(0);
        let data_type: &str = row.get(1);
        let expected = match column {
            "VendorID" => "bigint",
            "fare_amount" => "double precision",
            _ => "timestamp without time zone",
        };
        assert_eq!(data_type, expected, "{column}");
    }
}
