//! SQL agent
//!
//! Runs the SQL pipeline with execution and summarizes the cached result.

use crate::agents::Agent;
use crate::cache::{CacheEntry, ResultCache};
use crate::error::Result;
use crate::query::{AgentKind, AgentPayload, Query};
use crate::sql_pipeline::SqlPipeline;
use async_trait::async_trait;
use itertools::Itertools;
use std::sync::Arc;

const SUMMARY_ROWS: usize = 5;

pub struct SqlAgent {
    pipeline: Arc<SqlPipeline>,
    cache: Arc<ResultCache>,
}

impl SqlAgent {
    pub fn new(pipeline: Arc<SqlPipeline>, cache: Arc<ResultCache>) -> Self {
        Self { pipeline, cache }
    }
}

/// Markdown rendering of the first few preview rows.
pub fn render_preview(entry: &CacheEntry, max_rows: usize) -> String {
    if entry.columns.is_empty() {
        return "(no rows)".to_string();
    }
    let mut out = format!("| {} |\n", entry.columns.join(" | "));
    out.push_str(&format!("|{}|\n", entry.columns.iter().map(|_| "---").join("|")));
    for row in entry.preview.iter().take(max_rows) {
        let mut cells = row.iter().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        });
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

#[async_trait]
impl Agent for SqlAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Sql
    }

    async fn run(&self, query: &Query) -> Result<AgentPayload> {
        let outcome = self.pipeline.run(query, true).await.into_result()?;

        if let Some(answer) = outcome.general_answer {
            return Ok(AgentPayload {
                text: answer,
                reasoning: outcome.reasoning,
                ..AgentPayload::default()
            });
        }

        let mut text = String::new();
        if let Some(sql) = &outcome.sql {
            text.push_str(&format!("```sql\n{}\n```\n", sql));
        }
        if let Some(query_id) = &outcome.query_id {
            let entry = self.cache.get(query_id)?;
            text.push_str(&format!("Rows matched: {} (query id {})\n\n", entry.total, query_id));
            text.push_str(&render_preview(&entry, SUMMARY_ROWS));
        }

        Ok(AgentPayload {
            text,
            sql: outcome.sql,
            query_id: outcome.query_id,
            reasoning: outcome.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RowCount;
    use serde_json::json;

    fn entry(rows: usize) -> CacheEntry {
        CacheEntry {
            query_id: "q1".to_string(),
            sql: "SELECT name, revenue FROM customers".to_string(),
            columns: vec!["name".to_string(), "revenue".to_string()],
            preview: (0..rows).map(|i| vec![json!(format!("c{}", i)), json!(i * 10)]).collect(),
            total: RowCount::Exact(rows as u64),
            created_at: chrono::Utc::now(),
            interpretation: None,
        }
    }

    #[test]
    fn test_preview_table_shows_first_rows() {
        let table = render_preview(&entry(8), SUMMARY_ROWS);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "| name | revenue |");
        assert_eq!(lines[1], "|---|---|");
        assert_eq!(lines[2], "| c0 | 0 |");
        assert_eq!(lines.len(), 2 + SUMMARY_ROWS);
    }

    #[test]
    fn test_null_cells_render_empty() {
        let mut e = entry(1);
        e.preview[0][1] = serde_json::Value::Null;
        assert!(render_preview(&e, SUMMARY_ROWS).contains("| c0 |  |"));
    }

    #[test]
    fn test_no_columns() {
        let mut e = entry(0);
        e.columns.clear();
        assert_eq!(render_preview(&e, SUMMARY_ROWS), "(no rows)");
    }
}
