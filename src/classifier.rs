//! Query classifier
//!
//! Asks the model which kind of question this is and how sure it is.

use crate::error::{Result, SageError};
use crate::llm::{ModelGateway, PromptKind};
use crate::query::{AgentKind, Category, Classification, Query};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct RawClassification {
    category: Category,
    confidence: f64,
    #[serde(default)]
    scores: Option<BTreeMap<AgentKind, f64>>,
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SageError::Classification(format!("{} {} is outside [0, 1]", name, value)))
    }
}

/// Decode a model answer into a classification.
pub fn parse_classification(raw: Value) -> Result<Classification> {
    let raw: RawClassification =
        serde_json::from_value(raw).map_err(|e| SageError::Classification(format!("unreadable answer: {}", e)))?;

    check_unit("confidence", raw.confidence)?;
    let mut classification = Classification::new(raw.category, raw.confidence);
    if let Some(scores) = raw.scores {
        for (agent, score) in scores {
            check_unit(&format!("{} score", agent), score)?;
            classification.scores.insert(agent, score);
        }
    }
    // A mixed answer without scores puts every agent in the running
    if raw.category == Category::Mixed && classification.scores.is_empty() {
        for agent in AgentKind::PRIORITY {
            classification.scores.insert(agent, raw.confidence);
        }
    }
    Ok(classification)
}

pub struct QueryClassifier {
    model: Arc<dyn ModelGateway>,
}

impl QueryClassifier {
    pub fn new(model: Arc<dyn ModelGateway>) -> Self {
        Self { model }
    }

    pub async fn classify(&self, query: &Query) -> Result<Classification> {
        let inputs = serde_json::json!({
            "question": query.text,
            "context": query.context,
            "categories": [Category::Sql, Category::KnowledgeLookup, Category::General, Category::Mixed],
        });
        let raw = self
            .model
            .invoke(PromptKind::Classify, inputs)
            .await
            .map_err(|e| SageError::Classification(e.to_string()))?;
        let classification = parse_classification(raw)?;
        info!(
            "Classified as {:?} (confidence {:.2}, scores {:?})",
            classification.category, classification.confidence, classification.scores
        );
        Ok(classification)
    }

    /// Like `classify`, but a failure, or no answer by `deadline`, degrades
    /// to a zero-confidence general classification.
    pub async fn classify_or_degrade(&self, query: &Query, deadline: Instant) -> Classification {
        let classified = tokio::time::timeout_at(deadline, self.classify(query))
            .await
            .unwrap_or_else(|_| Err(SageError::Classification("no answer before the query deadline".to_string())));
        match classified {
            Ok(classification) => classification,
            Err(e) => {
                warn!("Classification failed, falling back to general: {}", e);
                Classification::degraded()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_scores_default_to_category() {
        let c = parse_classification(json!({"category": "sql", "confidence": 0.82})).unwrap();
        assert_eq!(c.category, Category::Sql);
        assert_eq!(c.score(AgentKind::Sql), 0.82);
        assert_eq!(c.scores.len(), 1);
    }

    #[test]
    fn test_explicit_scores_are_kept() {
        let c = parse_classification(json!({
            "category": "knowledge_lookup",
            "confidence": 0.55,
            "scores": {"sql": 0.5, "knowledge_lookup": 0.55, "general": 0.1}
        }))
        .unwrap();
        assert_eq!(c.score(AgentKind::Sql), 0.5);
        assert_eq!(c.score(AgentKind::General), 0.1);
        assert_eq!(c.max_confidence(), 0.55);
    }

    #[test]
    fn test_mixed_without_scores_seeds_every_agent() {
        let c = parse_classification(json!({"category": "mixed", "confidence": 0.9})).unwrap();
        assert_eq!(c.scores.len(), 3);
        assert!(AgentKind::PRIORITY.iter().all(|&agent| c.score(agent) == 0.9));
    }

    #[test]
    fn test_mixed_with_scores_keeps_them() {
        let c = parse_classification(json!({
            "category": "mixed",
            "confidence": 0.9,
            "scores": {"sql": 0.8}
        }))
        .unwrap();
        assert_eq!(c.scores.len(), 1);
        assert_eq!(c.score(AgentKind::General), 0.0);
    }

    #[test]
    fn test_rejects_out_of_range_and_unknown() {
        for raw in [
            json!({"category": "sql", "confidence": 1.2}),
            json!({"category": "sql", "confidence": 0.8, "scores": {"general": -0.1}}),
            json!({"category": "weather", "confidence": 0.8}),
            json!({"confidence": 0.8}),
        ] {
            let err = parse_classification(raw).unwrap_err();
            assert_eq!(err.class(), "ClassificationError");
        }
    }
}
