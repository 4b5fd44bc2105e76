//! PostgreSQL gateway
//!
//! Rows are fetched by a background task and handed over through a bounded
//! channel, so a consumer that stops reading after the preview also stops
//! the fetch.

use crate::db::gateway::{driver_error, strip_terminator, DatabaseGateway, Row, RowCount, RowStream};
use crate::error::{Result, SageError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Row as _, TypeInfo};
use tokio::sync::mpsc;
use tracing::{debug, info};

const CHANNEL_CAPACITY: usize = 64;

type FetchedRow = std::result::Result<PgRow, sqlx::Error>;

pub struct PostgresGateway {
    pool: PgPool,
}

impl PostgresGateway {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| SageError::Config(format!("Failed to connect to PostgreSQL: {}", e)))?;
        info!("Connected to PostgreSQL (max {} connections)", max_connections);
        Ok(Self { pool })
    }

    /// Column names of a statement without running it.
    async fn describe_columns(&self, sql: &str) -> Result<Vec<String>> {
        let described = (&self.pool).describe(sql).await.map_err(|e| driver_error(sql, e))?;
        Ok(described.columns().iter().map(|c| c.name().to_string()).collect())
    }
}

/// Pushes fetched rows into `tx`, stopping after the first failed row. A
/// dropped receiver ends the fetch even while the server has not produced a
/// row yet.
async fn forward_rows<S, T, E>(rows: S, tx: mpsc::Sender<std::result::Result<T, E>>)
where
    S: Stream<Item = std::result::Result<T, E>>,
{
    futures::pin_mut!(rows);
    loop {
        let row = tokio::select! {
            _ = tx.closed() => {
                debug!("Row consumer went away, stopping fetch");
                return;
            }
            row = rows.next() => row,
        };
        let Some(row) = row else { return };
        let failed = row.is_err();
        if tx.send(row).await.is_err() || failed {
            return;
        }
    }
}

#[async_trait]
impl DatabaseGateway for PostgresGateway {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, sql: &str) -> Result<RowStream> {
        let (tx, mut rx) = mpsc::channel::<FetchedRow>(CHANNEL_CAPACITY);
        let pool = self.pool.clone();
        let owned_sql = sql.to_string();

        tokio::spawn(async move {
            let rows = sqlx::query(&owned_sql).fetch(&pool);
            forward_rows(rows, tx).await;
        });

        let first = match rx.recv().await {
            Some(Ok(row)) => row,
            Some(Err(e)) => return Err(driver_error(sql, e)),
            None => {
                let columns = self.describe_columns(sql).await?;
                let rows = futures::stream::empty().boxed();
                return Ok(RowStream::new(columns, rows).with_reported_total(Some(0)));
            }
        };
        let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();

        let stream_sql = sql.to_string();
        let rest = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|row| (row, rx))
        });
        let rows = futures::stream::once(async move { Ok::<PgRow, sqlx::Error>(first) })
            .chain(rest)
            .map(move |row| match row {
                Ok(row) => decode_row(&row).map_err(|e| driver_error(&stream_sql, e)),
                Err(e) => Err(driver_error(&stream_sql, e)),
            })
            .boxed();

        Ok(RowStream::new(columns, rows))
    }

    async fn probe_count(&self, sql: &str, ceiling: u64) -> Result<RowCount> {
        let limit = i64::try_from(ceiling.saturating_add(1)).unwrap_or(i64::MAX);
        let probe = format!(
            "SELECT COUNT(*) FROM (SELECT 1 FROM ({}) AS q LIMIT {}) AS probe",
            strip_terminator(sql),
            limit
        );
        debug!("Count probe: {}", probe);
        let seen: i64 = sqlx::query_scalar(&probe)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| driver_error(sql, e))?;
        Ok(RowCount::capped(seen.max(0) as u64, ceiling))
    }
}

fn decode_row(row: &PgRow) -> std::result::Result<Row, sqlx::Error> {
    (0..row.columns().len()).map(|idx| decode_value(row, idx)).collect()
}

fn decode_value(row: &PgRow, idx: usize) -> std::result::Result<Value, sqlx::Error> {
    let type_name = row.column(idx).type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::from),
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.map(|f| Value::from(f as f64)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(Value::from),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<Option<String>, _>(idx)?.map(Value::from),
        "UUID" => row.try_get::<Option<uuid::Uuid>, _>(idx)?.map(|u| Value::from(u.to_string())),
        "DATE" => row.try_get::<Option<chrono::NaiveDate>, _>(idx)?.map(|d| Value::from(d.to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)?
            .map(|t| Value::from(t.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)?
            .map(|t| Value::from(t.to_rfc3339())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx)?,
        other => {
            debug!("No JSON mapping for Postgres type {}, returning null", other);
            None
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fetch_stops_when_consumer_leaves_before_first_row() {
        let (tx, rx) = mpsc::channel::<std::result::Result<u32, String>>(4);
        let fetch = tokio::spawn(forward_rows(futures::stream::pending(), tx));
        drop(rx);
        let stopped = tokio::time::timeout(Duration::from_secs(5), fetch).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_fetch_stops_after_failed_row() {
        let (tx, mut rx) = mpsc::channel(4);
        let rows = futures::stream::iter(vec![Ok(1u32), Err("boom".to_string()), Ok(3)]);
        forward_rows(rows, tx).await;
        assert_eq!(rx.recv().await, Some(Ok(1)));
        assert_eq!(rx.recv().await, Some(Err("boom".to_string())));
        assert_eq!(rx.recv().await, None);
    }
}
