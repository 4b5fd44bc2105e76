use crate::agents::Agent;
use crate::error::Result;
use crate::llm::{ask, ModelGateway, PromptKind};
use crate::query::{AgentKind, AgentPayload, Query};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct ModelAnswer {
    pub answer: String,
}

/// Plain model answer for questions that need neither data nor schema.
pub struct GeneralAgent {
    model: Arc<dyn ModelGateway>,
}

impl GeneralAgent {
    pub fn new(model: Arc<dyn ModelGateway>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Agent for GeneralAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::General
    }

    async fn run(&self, query: &Query) -> Result<AgentPayload> {
        let inputs = serde_json::json!({
            "question": query.text,
            "context": query.context,
        });
        let answer: ModelAnswer = ask(self.model.as_ref(), PromptKind::GeneralAnswer, inputs).await?;
        Ok(AgentPayload::text(answer.answer))
    }
}
