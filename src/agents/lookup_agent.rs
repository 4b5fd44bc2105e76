//! Knowledge-lookup agent
//!
//! Answers questions about what the data means (which tables exist, what a
//! column holds, how tables relate) from schema descriptions only.

use crate::agents::general_agent::ModelAnswer;
use crate::agents::Agent;
use crate::error::Result;
use crate::llm::{ask, ModelGateway, PromptKind};
use crate::metadata::{SchemaProvider, TableInfo};
use crate::query::{AgentKind, AgentPayload, Query};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const MAX_TABLES: usize = 5;

pub struct KnowledgeLookupAgent {
    model: Arc<dyn ModelGateway>,
    schema: Arc<dyn SchemaProvider>,
}

impl KnowledgeLookupAgent {
    pub fn new(model: Arc<dyn ModelGateway>, schema: Arc<dyn SchemaProvider>) -> Self {
        Self { model, schema }
    }

    fn relevant_tables(&self, question: &str) -> Vec<&TableInfo> {
        let overview = self.schema.overview();
        let matched = overview.search(question, MAX_TABLES);
        if matched.is_empty() {
            overview.tables.iter().take(MAX_TABLES).collect()
        } else {
            matched
        }
    }
}

#[async_trait]
impl Agent for KnowledgeLookupAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::KnowledgeLookup
    }

    async fn run(&self, query: &Query) -> Result<AgentPayload> {
        let tables = self.relevant_tables(&query.text);
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        debug!("Knowledge lookup over tables {:?}", names);

        let inputs = serde_json::json!({
            "question": query.text,
            "context": query.context,
            "tables": tables,
        });
        let answer: ModelAnswer = ask(self.model.as_ref(), PromptKind::KnowledgeAnswer, inputs).await?;

        let mut payload = AgentPayload::text(answer.answer);
        if !names.is_empty() {
            payload.reasoning.push(format!("Consulted tables: {}", names.join(", ")));
        }
        Ok(payload)
    }
}
