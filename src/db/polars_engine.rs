//! Embedded SQL engine over CSV/Parquet files
//!
//! Every table in the schema overview with a `path` is scanned lazily and
//! registered in a Polars `SQLContext`. Results are pulled in slices so a
//! reader that stops after the preview never materializes the rest.

use crate::db::gateway::{driver_error, DatabaseGateway, Row, RowCount, RowStream};
use crate::error::{Result, SageError};
use crate::metadata::SchemaOverview;
use async_trait::async_trait;
use futures::StreamExt;
use polars::prelude::*;
use polars::sql::SQLContext;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const SLICE_ROWS: usize = 256;

pub struct PolarsGateway {
    tables: HashMap<String, LazyFrame>,
}

impl PolarsGateway {
    /// Register every schema table that names a data file under `data_dir`.
    pub fn from_schema(schema: &SchemaOverview, data_dir: &Path) -> Result<Self> {
        let mut tables = HashMap::new();
        for (name, path) in schema.table_paths(data_dir) {
            let frame = match path.extension().and_then(|e| e.to_str()) {
                Some("csv") => LazyCsvReader::new(&path)
                    .with_has_header(true)
                    .with_try_parse_dates(true)
                    .finish(),
                Some("parquet") => LazyFrame::scan_parquet(&path, ScanArgsParquet::default()),
                _ => {
                    warn!("Skipping table {}: unsupported file {}", name, path.display());
                    continue;
                }
            }
            .map_err(|e| SageError::Config(format!("Failed to scan {}: {}", path.display(), e)))?;
            tables.insert(name, frame);
        }
        info!("Polars engine registered {} tables from {}", tables.len(), data_dir.display());
        Ok(Self { tables })
    }

    fn plan(&self, sql: &str) -> Result<LazyFrame> {
        let mut ctx = SQLContext::new();
        for (name, frame) in &self.tables {
            ctx.register(name, frame.clone());
        }
        ctx.execute(sql).map_err(|e| driver_error(sql, e))
    }
}

#[async_trait]
impl DatabaseGateway for PolarsGateway {
    fn name(&self) -> &'static str {
        "polars"
    }

    async fn execute(&self, sql: &str) -> Result<RowStream> {
        let plan = self.plan(sql)?;
        let first = collect_slice(plan.clone(), 0, sql.to_string()).await?;
        let columns: Vec<String> = first.get_column_names().iter().map(|s| s.to_string()).collect();
        let first_rows = dataframe_to_rows(&first).map_err(|e| driver_error(sql, e))?;
        let exhausted = first.height() < SLICE_ROWS;

        let stream_sql = sql.to_string();
        let rest = futures::stream::unfold((plan, SLICE_ROWS, exhausted), move |(plan, offset, done)| {
            let sql = stream_sql.clone();
            async move {
                if done {
                    return None;
                }
                let batch = collect_slice(plan.clone(), offset, sql.clone())
                    .await
                    .and_then(|df| {
                        let last = df.height() < SLICE_ROWS;
                        dataframe_to_rows(&df).map(|rows| (rows, last)).map_err(|e| driver_error(&sql, e))
                    });
                match batch {
                    Ok((rows, last)) => Some((Ok(rows), (plan, offset + SLICE_ROWS, last))),
                    Err(e) => Some((Err(e), (plan, offset, true))),
                }
            }
        });

        let rows = futures::stream::iter(vec![Ok(first_rows)])
            .chain(rest)
            .flat_map(|batch: Result<Vec<Row>>| {
                let items: Vec<Result<Row>> = match batch {
                    Ok(rows) => rows.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(items)
            })
            .boxed();

        Ok(RowStream::new(columns, rows))
    }

    async fn probe_count(&self, sql: &str, ceiling: u64) -> Result<RowCount> {
        let limit = IdxSize::try_from(ceiling.saturating_add(1)).unwrap_or(IdxSize::MAX);
        let plan = self.plan(sql)?.limit(limit);
        let owned_sql = sql.to_string();
        let seen = tokio::task::spawn_blocking(move || plan.collect().map(|df| df.height()))
            .await
            .map_err(|e| driver_error(&owned_sql, e))?
            .map_err(|e| driver_error(&owned_sql, e))?;
        Ok(RowCount::capped(seen as u64, ceiling))
    }
}

async fn collect_slice(plan: LazyFrame, offset: usize, sql: String) -> Result<DataFrame> {
    let len = IdxSize::try_from(SLICE_ROWS).unwrap_or(IdxSize::MAX);
    tokio::task::spawn_blocking(move || plan.slice(offset as i64, len).collect())
        .await
        .map_err(|e| driver_error(&sql, e))?
        .map_err(|e| driver_error(&sql, e))
}

fn dataframe_to_rows(df: &DataFrame) -> PolarsResult<Vec<Row>> {
    let mut rows = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let mut row = Vec::with_capacity(df.width());
        for series in df.get_columns() {
            row.push(any_value_to_json(series.get(row_idx)?));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn any_value_to_json(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::Int8(i) => Value::from(i),
        AnyValue::Int16(i) => Value::from(i),
        AnyValue::Int32(i) => Value::from(i),
        AnyValue::Int64(i) => Value::from(i),
        AnyValue::UInt8(u) => Value::from(u),
        AnyValue::UInt16(u) => Value::from(u),
        AnyValue::UInt32(u) => Value::from(u),
        AnyValue::UInt64(u) => Value::from(u),
        AnyValue::Float32(f) => serde_json::Number::from_f64(f as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::Float64(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    }
}
