use arrow::array::{ArrayRef, Int64Array};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use futures::{SinkExt, pin_mut};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::config::{PostgresConfig, is_valid_identifier};
use crate::errors::{SchemaError, SinkError};
use crate::sink::{Sink, WriteMode};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Writes batches into Postgres tables with `COPY ... FROM STDIN`.
///
/// Tables get a leading row-ordinal column when `index_column` is set. The
/// ordinal restarts at zero whenever a table is replaced.
pub struct PostgresSink {
    client: Client,
    tables: TableLedger,
}

/// What one `write` call runs: optional DDL, then a COPY of `rows` rows
/// numbered from `first_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WritePlan {
    ddl: Option<String>,
    first_index: i64,
    rows: usize,
}

/// Tables this sink has created and the next row ordinal of each.
#[derive(Debug, Default)]
struct TableLedger {
    index_column: Option<String>,
    next_index: HashMap<String, i64>,
    created: HashSet<String>,
}

impl TableLedger {
    fn new(index_column: Option<String>) -> Self {
        Self {
            index_column,
            ..Self::default()
        }
    }

    /// Replace always drops and recreates, restarting the ordinal. Append
    /// creates the table only the first time this sink sees it.
    fn plan(
        &self,
        table: &str,
        schema: &Schema,
        rows: usize,
        mode: WriteMode,
    ) -> Result<WritePlan, SchemaError> {
        let index_column = self.index_column.as_deref();
        let next_index = self.next_index.get(table).copied().unwrap_or(0);
        let (ddl, first_index) = match mode {
            WriteMode::Replace => {
                let create = create_table_sql(table, schema, index_column, false)?;
                let ddl = format!("DROP TABLE IF EXISTS {};\n{create}", quote_ident(table));
                (Some(ddl), 0)
            }
            WriteMode::Append if !self.created.contains(table) => (
                Some(create_table_sql(table, schema, index_column, true)?),
                next_index,
            ),
            WriteMode::Append => (None, next_index),
        };
        Ok(WritePlan {
            ddl,
            first_index,
            rows,
        })
    }

    /// Records a plan that ran to completion.
    fn commit(&mut self, table: &str, plan: &WritePlan) {
        self.created.insert(table.to_string());
        self.next_index
            .insert(table.to_string(), plan.first_index + plan.rows as i64);
    }
}

impl PostgresSink {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, SinkError> {
        let target = config.redacted_url();
        let (client, connection) = tokio_postgres::Config::new()
            .user(&config.user)
            .password(&config.password)
            .host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .connect(NoTls)
            .await
            .map_err(|e| SinkError::Connection {
                target: target.clone(),
                reason: e.to_string(),
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection error: {}", e);
            }
        });

        info!(target = %target, "connected to postgres");
        Ok(Self::from_client(client, config.index_column.clone()))
    }

    pub fn from_client(client: Client, index_column: Option<String>) -> Self {
        Self {
            client,
            tables: TableLedger::new(index_column),
        }
    }

    async fn execute(&self, table: &str, sql: &str) -> Result<(), SinkError> {
        debug!(sql, "executing");
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| write_error(table, e))
    }

    async fn copy_rows(
        &self,
        table: &str,
        batch: &RecordBatch,
        first_index: i64,
    ) -> Result<u64, SinkError> {
        let batch = with_index(batch, self.tables.index_column.as_deref(), first_index)
            .map_err(|e| write_error(table, e))?;
        let payload = encode_csv(&batch).map_err(|e| write_error(table, e))?;

        let columns = batch
            .schema()
            .fields()
            .iter()
            .map(|f| quote_ident(f.name()))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "COPY {} ({columns}) FROM STDIN WITH (FORMAT csv)",
            quote_ident(table)
        );

        let sink = self
            .client
            .copy_in::<str, Bytes>(statement.as_str())
            .await
            .map_err(|e| write_error(table, e))?;
        pin_mut!(sink);
        sink.send(Bytes::from(payload))
            .await
            .map_err(|e| write_error(table, e))?;
        sink.finish().await.map_err(|e| write_error(table, e))
    }
}

impl Sink for PostgresSink {
    async fn write(
        &mut self,
        table: &str,
        batch: &RecordBatch,
        mode: WriteMode,
    ) -> Result<u64, SinkError> {
        if !is_valid_identifier(table) {
            return Err(SinkError::InvalidTable {
                table: table.to_string(),
            });
        }

        let plan = self
            .tables
            .plan(table, &batch.schema(), batch.num_rows(), mode)?;
        if let Some(ddl) = &plan.ddl {
            self.execute(table, ddl).await?;
            info!(table, %mode, "table created");
        }

        let rows = if plan.rows == 0 {
            0
        } else {
            self.copy_rows(table, batch, plan.first_index).await?
        };
        self.tables.commit(table, &plan);
        Ok(rows)
    }
}

fn write_error(table: &str, err: impl std::fmt::Display) -> SinkError {
    SinkError::Write {
        table: table.to_string(),
        reason: err.to_string(),
    }
}

/// Double-quotes an identifier so mixed-case names like `VendorID` survive.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn postgres_type(data_type: &DataType) -> Option<&'static str> {
    let sql = match data_type {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => "BIGINT",
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 => "BIGINT",
        DataType::Float16 | DataType::Float32 | DataType::Float64 => "DOUBLE PRECISION",
        DataType::Utf8 | DataType::LargeUtf8 => "TEXT",
        DataType::Boolean => "BOOLEAN",
        DataType::Date32 | DataType::Date64 => "DATE",
        DataType::Timestamp(_, None) => "TIMESTAMP WITHOUT TIME ZONE",
        DataType::Timestamp(_, Some(_)) => "TIMESTAMP WITH TIME ZONE",
        _ => return None,
    };
    Some(sql)
}

/// `CREATE TABLE` (plus the index on the ordinal column) for `schema`.
pub fn create_table_sql(
    table: &str,
    schema: &Schema,
    index_column: Option<&str>,
    if_not_exists: bool,
) -> Result<String, SchemaError> {
    let mut columns = Vec::with_capacity(schema.fields().len() + 1);
    if let Some(index) = index_column {
        columns.push(format!("{} BIGINT", quote_ident(index)));
    }
    for field in schema.fields() {
        let sql_type = postgres_type(field.data_type()).ok_or_else(|| SchemaError::Unsupported {
            column: field.name().clone(),
            data_type: field.data_type().to_string(),
        })?;
        let not_null = if field.is_nullable() { "" } else { " NOT NULL" };
        columns.push(format!("{} {sql_type}{not_null}", quote_ident(field.name())));
    }

    let exists = if if_not_exists { "IF NOT EXISTS " } else { "" };
    let mut sql = format!(
        "CREATE TABLE {exists}{} (\n    {}\n);",
        quote_ident(table),
        columns.join(",\n    ")
    );
    if let Some(index) = index_column {
        sql.push_str(&format!(
            "\nCREATE INDEX {exists}{} ON {} ({});",
            quote_ident(&format!("ix_{table}_{index}")),
            quote_ident(table),
            quote_ident(index)
        ));
    }
    Ok(sql)
}

/// Prepends the row-ordinal column, numbering rows from `first`.
fn with_index(
    batch: &RecordBatch,
    index_column: Option<&str>,
    first: i64,
) -> Result<RecordBatch, arrow::error::ArrowError> {
    let Some(index) = index_column else {
        return Ok(batch.clone());
    };

    let schema = batch.schema();
    let mut fields: Vec<Field> = Vec::with_capacity(schema.fields().len() + 1);
    fields.push(Field::new(index, DataType::Int64, false));
    fields.extend(schema.fields().iter().map(|f| f.as_ref().clone()));

    let ordinals = Int64Array::from_iter_values(first..first + batch.num_rows() as i64);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns() + 1);
    columns.push(Arc::new(ordinals));
    columns.extend(batch.columns().iter().cloned());

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

/// CSV body for `COPY ... (FORMAT csv)`: no header, nulls as empty fields.
fn encode_csv(batch: &RecordBatch) -> Result<Vec<u8>, arrow::error::ArrowError> {
    let mut writer = WriterBuilder::new()
        .with_header(false)
        .with_timestamp_format(TIMESTAMP_FORMAT.to_string())
        .build(Vec::new());
    writer.write(batch)?;
    Ok(writer.into_inner())
}
