use crate::error::{Result, SageError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One result row, values aligned with the stream's column names.
pub type Row = Vec<serde_json::Value>;

/// Row count that never requires a full scan to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RowCount {
    Exact(u64),
    /// More rows exist than the ceiling that was probed
    MoreThan(u64),
}

impl RowCount {
    /// Clamp a known total against a ceiling.
    pub fn capped(total: u64, ceiling: u64) -> Self {
        if total > ceiling {
            RowCount::MoreThan(ceiling)
        } else {
            RowCount::Exact(total)
        }
    }

    pub fn exceeds(&self, shown: u64) -> bool {
        match *self {
            RowCount::Exact(n) => n > shown,
            RowCount::MoreThan(_) => true,
        }
    }
}

impl fmt::Display for RowCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowCount::Exact(n) => write!(f, "{}", n),
            RowCount::MoreThan(n) => write!(f, "more than {}", n),
        }
    }
}

/// Lazily pulled query result.
pub struct RowStream {
    pub columns: Vec<String>,
    pub rows: BoxStream<'static, Result<Row>>,
    /// Total row count when the driver already knows it
    pub reported_total: Option<u64>,
}

impl RowStream {
    pub fn new(columns: Vec<String>, rows: BoxStream<'static, Result<Row>>) -> Self {
        Self {
            columns,
            rows,
            reported_total: None,
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let total = rows.len() as u64;
        let mut stream = Self::new(columns, futures::stream::iter(rows.into_iter().map(Ok)).boxed());
        stream.reported_total = Some(total);
        stream
    }

    pub fn with_reported_total(mut self, total: Option<u64>) -> Self {
        self.reported_total = total;
        self
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns)
            .field("reported_total", &self.reported_total)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait DatabaseGateway: Send + Sync {
    /// Engine name for logs (e.g. "postgres", "polars")
    fn name(&self) -> &'static str;

    /// Run a query. Fails with `SageError::Execution` carrying the driver message.
    async fn execute(&self, sql: &str) -> Result<RowStream>;

    /// Count result rows, examining at most `ceiling + 1` of them.
    async fn probe_count(&self, sql: &str, ceiling: u64) -> Result<RowCount> {
        let mut stream = self.execute(sql).await?;
        if let Some(total) = stream.reported_total {
            return Ok(RowCount::capped(total, ceiling));
        }
        let mut seen = 0u64;
        while seen <= ceiling {
            match stream.rows.next().await {
                Some(row) => {
                    row?;
                    seen += 1;
                }
                None => return Ok(RowCount::Exact(seen)),
            }
        }
        Ok(RowCount::MoreThan(ceiling))
    }
}

/// Strip trailing semicolons so the statement can be wrapped in a subquery.
pub fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

pub(crate) fn driver_error(sql: &str, err: impl fmt::Display) -> SageError {
    SageError::execution(sql, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Row>);

    #[async_trait]
    impl DatabaseGateway for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn execute(&self, _sql: &str) -> Result<RowStream> {
            let rows = self.0.clone();
            Ok(RowStream::new(
                vec!["n".to_string()],
                futures::stream::iter(rows.into_iter().map(Ok)).boxed(),
            ))
        }
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n).map(|i| vec![serde_json::json!(i)]).collect()
    }

    #[tokio::test]
    async fn test_default_probe_is_inclusive_at_ceiling() {
        assert_eq!(Fixed(rows(10)).probe_count("q", 10).await.unwrap(), RowCount::Exact(10));
        assert_eq!(Fixed(rows(11)).probe_count("q", 10).await.unwrap(), RowCount::MoreThan(10));
        assert_eq!(Fixed(rows(0)).probe_count("q", 10).await.unwrap(), RowCount::Exact(0));
    }

    #[test]
    fn test_capped_and_display() {
        assert_eq!(RowCount::capped(100, 100), RowCount::Exact(100));
        assert_eq!(RowCount::capped(101, 100).to_string(), "more than 100");
        assert!(RowCount::MoreThan(5).exceeds(5));
        assert!(!RowCount::Exact(5).exceeds(5));
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("SELECT 1; "), "SELECT 1");
    }
}
