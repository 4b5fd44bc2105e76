//! Request-side data model: queries, classifications, agent tasks and results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub include_reasoning: bool,
    /// Overrides the configured synthesis token budget for this call
    #[serde(default)]
    pub token_budget: Option<usize>,
}

/// Immutable incoming question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub context: Vec<Turn>,
    #[serde(default)]
    pub config: QueryConfig,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: Vec::new(),
            config: QueryConfig::default(),
        }
    }

    pub fn with_context(mut self, context: Vec<Turn>) -> Self {
        self.context = context;
        self
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sql,
    KnowledgeLookup,
    General,
    Mixed,
}

impl Category {
    /// The agent that handles this category alone, if any.
    pub fn agent(self) -> Option<AgentKind> {
        match self {
            Category::Sql => Some(AgentKind::Sql),
            Category::KnowledgeLookup => Some(AgentKind::KnowledgeLookup),
            Category::General => Some(AgentKind::General),
            Category::Mixed => None,
        }
    }
}

/// Specialized pipelines, declared in fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Sql,
    KnowledgeLookup,
    General,
}

impl AgentKind {
    pub const PRIORITY: [AgentKind; 3] = [AgentKind::Sql, AgentKind::KnowledgeLookup, AgentKind::General];

    /// Lower is more important.
    pub fn priority(self) -> usize {
        match self {
            AgentKind::Sql => 0,
            AgentKind::KnowledgeLookup => 1,
            AgentKind::General => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgentKind::Sql => "SQL",
            AgentKind::KnowledgeLookup => "Knowledge lookup",
            AgentKind::General => "General",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentKind::Sql => "sql",
            AgentKind::KnowledgeLookup => "knowledge_lookup",
            AgentKind::General => "general",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub confidence: f64,
    /// Per-agent confidence; always contains the winning category when it maps to an agent
    #[serde(default)]
    pub scores: BTreeMap<AgentKind, f64>,
}

impl Classification {
    pub fn new(category: Category, confidence: f64) -> Self {
        let mut scores = BTreeMap::new();
        if let Some(agent) = category.agent() {
            scores.insert(agent, confidence);
        }
        Self { category, confidence, scores }
    }

    pub fn with_score(mut self, agent: AgentKind, score: f64) -> Self {
        self.scores.insert(agent, score);
        self
    }

    /// Used when classification fails.
    pub fn degraded() -> Self {
        Self {
            category: Category::General,
            confidence: 0.0,
            scores: BTreeMap::new(),
        }
    }

    pub fn max_confidence(&self) -> f64 {
        self.scores.values().copied().fold(self.confidence, f64::max)
    }

    pub fn score(&self, agent: AgentKind) -> f64 {
        self.scores.get(&agent).copied().unwrap_or(0.0)
    }
}

/// One unit of dispatched work.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub agent: AgentKind,
    pub query: Arc<Query>,
    pub deadline: tokio::time::Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default)]
    pub reasoning: Vec<String>,
}

impl AgentPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub class: String,
    pub message: String,
}

impl From<&crate::error::SageError> for AgentFailure {
    fn from(err: &crate::error::SageError) -> Self {
        Self {
            class: err.class().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: AgentKind,
    pub outcome: Result<AgentPayload, AgentFailure>,
    pub elapsed: Duration,
}

impl AgentResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}
