//! Model gateway
//!
//! `ModelGateway` is the seam every component uses to talk to a language
//! model: a prompt kind plus structured inputs in, structured JSON out.
//! `LlmClient` implements it against an OpenAI-compatible chat-completions
//! endpoint.

use crate::config::LlmConfig;
use crate::error::ModelError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Classify,
    GenerateSql,
    KnowledgeAnswer,
    GeneralAnswer,
    Interpret,
}

impl PromptKind {
    fn instructions(self) -> &'static str {
        match self {
            PromptKind::Classify => {
                "Classify the user's question about a relational dataset. Categories: \
                 sql (needs a database query), knowledge_lookup (about the schema or meaning of data), \
                 general (anything else), mixed (needs more than one). Return JSON: \
                 {\"category\": str, \"confidence\": 0..1, \
                 \"scores\": {\"sql\": 0..1, \"knowledge_lookup\": 0..1, \"general\": 0..1}}"
            }
            PromptKind::GenerateSql => {
                "Write one read-only SQL query answering the question using only the given schema. \
                 If no query is needed, answer directly. Return JSON: \
                 {\"intent\": \"sql\"|\"general\", \"sql\": str|null, \"answer\": str|null, \"reasoning\": [str]}"
            }
            PromptKind::KnowledgeAnswer => {
                "Answer the question using only the provided table descriptions. \
                 Return JSON: {\"answer\": str}"
            }
            PromptKind::GeneralAnswer => "Answer the question concisely. Return JSON: {\"answer\": str}",
            PromptKind::Interpret => {
                "Explain these query results. Return JSON: {\"summary\": str, \"key_findings\": [str] (at most 4), \
                 \"visualization\": {\"chart_type\": str, \"x\": column, \"y\": column|null}|null}"
            }
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn invoke(&self, kind: PromptKind, inputs: Value) -> Result<Value, ModelError>;
}

/// Invoke the model and decode its answer into `T`.
pub async fn ask<T: DeserializeOwned>(
    gateway: &dyn ModelGateway,
    kind: PromptKind,
    inputs: Value,
) -> Result<T, ModelError> {
    let raw = gateway.invoke(kind, inputs).await?;
    serde_json::from_value(raw).map_err(|e| ModelError::Malformed(format!("{} answer: {}", kind, e)))
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    async fn call_llm(&self, kind: PromptKind, inputs: &Value) -> Result<String, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": kind.instructions()},
                {"role": "user", "content": inputs.to_string()}
            ],
            "temperature": 0.1,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Unavailable(format!("LLM API call failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ModelError::Unavailable(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::Malformed(format!("Failed to parse LLM response: {}", e))
            }
        })?;

        let choice = response_json
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ModelError::Malformed("No choices in LLM response".to_string()))?;

        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("content_filter") => {
                return Err(ModelError::Refusal("filtered by content policy".to_string()));
            }
            Some("length") => warn!("LLM response for {} was truncated due to length limit", kind),
            _ => {}
        }
        if let Some(refusal) = choice["message"].get("refusal").and_then(|r| r.as_str()) {
            return Err(ModelError::Refusal(refusal.to_string()));
        }

        let content = choice["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ModelError::Malformed("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl ModelGateway for LlmClient {
    async fn invoke(&self, kind: PromptKind, inputs: Value) -> Result<Value, ModelError> {
        debug!("Invoking model {} for {}", self.model, kind);
        let content = self.call_llm(kind, &inputs).await?;
        let cleaned = extract_json_from_response(&content);
        serde_json::from_str(&cleaned)
            .map_err(|e| ModelError::Malformed(format!("{}: {}", e, truncate_for_log(&cleaned))))
    }
}

/// Strip markdown fences and surrounding prose from a JSON answer.
pub fn extract_json_from_response(response: &str) -> String {
    let trimmed = response.trim();
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let after_lang = after_fence.strip_prefix("json").unwrap_or(after_fence);
        if let Some(end) = after_lang.find("```") {
            return after_lang[..end].trim().to_string();
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

fn truncate_for_log(s: &str) -> String {
    s.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let raw = "Here you go:\n```json\n{\"answer\": \"42\"}\n```";
        assert_eq!(extract_json_from_response(raw), "{\"answer\": \"42\"}");
    }

    #[test]
    fn test_extract_json_from_prose() {
        let raw = "Sure! {\"answer\": \"yes\"} Hope that helps.";
        assert_eq!(extract_json_from_response(raw), "{\"answer\": \"yes\"}");
    }

    #[test]
    fn test_extract_json_passthrough() {
        assert_eq!(extract_json_from_response("not json"), "not json");
    }
}
