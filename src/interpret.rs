//! Result interpretation
//!
//! Explains a cached result from its preview alone; the query is never run
//! again.

use crate::cache::CacheEntry;
use crate::error::{Result, SageError};
use crate::llm::{ask, ModelGateway, PromptKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const MAX_KEY_FINDINGS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visualization {
    pub chart_type: String,
    pub x: String,
    #[serde(default)]
    pub y: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpretation {
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub visualization: Option<Visualization>,
}

impl Interpretation {
    pub fn summary_only(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            key_findings: Vec::new(),
            visualization: None,
        }
    }
}

/// Check that every column a visualization names exists in the result.
pub fn check_visualization(visualization: &Visualization, columns: &[String]) -> Result<()> {
    let known = |name: &str| columns.iter().any(|c| c.eq_ignore_ascii_case(name));
    let mut named = vec![visualization.x.as_str()];
    named.extend(visualization.y.as_deref());
    match named.into_iter().find(|name| !known(name)) {
        Some(missing) => Err(SageError::MalformedInterpretation(format!(
            "{} chart references unknown column '{}' (available: {})",
            visualization.chart_type,
            missing,
            columns.join(", ")
        ))),
        None => Ok(()),
    }
}

pub struct Interpreter {
    model: Arc<dyn ModelGateway>,
}

impl Interpreter {
    pub fn new(model: Arc<dyn ModelGateway>) -> Self {
        Self { model }
    }

    pub async fn interpret(&self, entry: &CacheEntry) -> Result<Interpretation> {
        let inputs = serde_json::json!({
            "sql": entry.sql,
            "columns": entry.columns,
            "preview_rows": entry.preview,
            "total_count": entry.total.to_string(),
        });
        let mut interpretation: Interpretation = ask(self.model.as_ref(), PromptKind::Interpret, inputs).await?;
        debug!("Interpreted {} with {} findings", entry.query_id, interpretation.key_findings.len());

        interpretation.key_findings.truncate(MAX_KEY_FINDINGS);
        if let Some(visualization) = &interpretation.visualization {
            if let Err(e) = check_visualization(visualization, &entry.columns) {
                warn!("Dropping visualization for {}: {}", entry.query_id, e);
                interpretation.visualization = None;
            }
        }
        Ok(interpretation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["customer".to_string(), "revenue".to_string()]
    }

    #[test]
    fn test_visualization_with_known_columns() {
        let viz = Visualization {
            chart_type: "bar".into(),
            x: "customer".into(),
            y: Some("Revenue".into()),
        };
        assert!(check_visualization(&viz, &columns()).is_ok());
    }

    #[test]
    fn test_visualization_with_unknown_column() {
        let viz = Visualization {
            chart_type: "line".into(),
            x: "customer".into(),
            y: Some("profit".into()),
        };
        let err = check_visualization(&viz, &columns()).unwrap_err();
        assert_eq!(err.class(), "MalformedInterpretationError");
        assert!(err.to_string().contains("profit"));
    }
}
