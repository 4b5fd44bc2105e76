//! Data Assistant
//!
//! Caller-facing entry point. A question goes through
//! classify → route → dispatch → synthesize; results produced by the SQL
//! agent stay in the result cache under a query id so the caller can come
//! back for a preview, an interpretation, or to give feedback.

use crate::agents::{AgentRegistry, Dispatcher, GeneralAgent, KnowledgeLookupAgent, SqlAgent};
use crate::cache::ResultCache;
use crate::classifier::QueryClassifier;
use crate::config::Config;
use crate::db::{DatabaseGateway, Row, RowCount};
use crate::error::{Result, SageError};
use crate::interpret::{Interpretation, Interpreter};
use crate::llm::ModelGateway;
use crate::metadata::{SchemaOverview, SchemaProvider};
use crate::observability::{ExecutionLogStore, SystemMetrics};
use crate::query::{AgentKind, Classification, Query, QueryConfig, Turn};
use crate::router::{AgentRouter, ExecutionMode};
use crate::sql_pipeline::SqlPipeline;
use crate::synthesizer::{ResponseMetadata, ResponseSynthesizer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Answer to `submit_query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub final_answer: String,
    pub classification: Classification,
    pub active_agents: Vec<AgentKind>,
    pub execution_mode: ExecutionMode,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub query_id: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub total_count: RowCount,
    /// More rows exist than are shown
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Positive,
    Negative,
}

pub struct DataAssistant {
    classifier: QueryClassifier,
    router: AgentRouter,
    dispatcher: Dispatcher,
    synthesizer: ResponseSynthesizer,
    pipeline: Arc<SqlPipeline>,
    interpreter: Interpreter,
    cache: Arc<ResultCache>,
    schema: Arc<dyn SchemaProvider>,
    token_budget: usize,
    agent_timeout: Duration,
    log_store: Arc<ExecutionLogStore>,
    system_metrics: Arc<SystemMetrics>,
}

impl DataAssistant {
    pub fn new(
        config: &Config,
        model: Arc<dyn ModelGateway>,
        database: Arc<dyn DatabaseGateway>,
        schema: Arc<dyn SchemaProvider>,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache.clone()));
        let log_store = Arc::new(ExecutionLogStore::new());
        let system_metrics = Arc::new(SystemMetrics::new());

        let pipeline = Arc::new(
            SqlPipeline::new(Arc::clone(&model), database, Arc::clone(&schema), Arc::clone(&cache))
                .with_log(Arc::clone(&log_store)),
        );

        let registry = AgentRegistry::new()
            .with_agent(Arc::new(SqlAgent::new(Arc::clone(&pipeline), Arc::clone(&cache))))
            .with_agent(Arc::new(KnowledgeLookupAgent::new(Arc::clone(&model), Arc::clone(&schema))))
            .with_agent(Arc::new(GeneralAgent::new(Arc::clone(&model))));
        let dispatcher = Dispatcher::new(Arc::new(registry), config.router.max_parallel_agents)
            .with_metrics(Arc::clone(&system_metrics));

        Self {
            classifier: QueryClassifier::new(Arc::clone(&model)),
            router: AgentRouter::new(config.router.clone()),
            dispatcher,
            synthesizer: ResponseSynthesizer::new(),
            pipeline,
            interpreter: Interpreter::new(model),
            cache,
            schema,
            token_budget: config.synthesis.token_budget,
            agent_timeout: config.router.agent_timeout,
            log_store,
            system_metrics,
        }
    }

    /// Answer a question with whichever agents the router picks.
    pub async fn submit_query(&self, text: &str, context: Vec<Turn>, config: QueryConfig) -> QueryResponse {
        let query = Arc::new(Query::new(text).with_context(context).with_config(config));
        info!("Submitting query: {}", query.text);

        // Classification and the agents share one deadline
        let deadline = Instant::now() + self.agent_timeout;
        let classification = self.classifier.classify_or_degrade(&query, deadline).await;
        let plan = self.router.route_until(&classification, Arc::clone(&query), deadline);
        let active_agents = plan.agents();
        let mode = plan.mode;

        let results = self.dispatcher.dispatch(plan.tasks).await;
        let budget = query.config.token_budget.unwrap_or(self.token_budget);
        let answer = self
            .synthesizer
            .synthesize(&results, mode, budget, query.config.include_reasoning);

        QueryResponse {
            final_answer: answer.text,
            classification,
            active_agents,
            execution_mode: mode,
            metadata: answer.metadata,
        }
    }

    /// Generate and execute SQL for a question; the result is cached.
    pub async fn generate_sql(&self, text: &str, context: Vec<Turn>) -> Result<GeneratedQuery> {
        let query = Query::new(text).with_context(context);
        let outcome = self.pipeline.run(&query, true).await;
        if let Some(err) = &outcome.error {
            self.system_metrics.record_error(err.class());
        }
        let outcome = outcome.into_result()?;

        match (outcome.query_id, outcome.sql) {
            (Some(query_id), Some(sql)) => Ok(GeneratedQuery { query_id, sql }),
            _ => Err(SageError::Generation {
                message: format!(
                    "question needs no SQL: {}",
                    outcome.general_answer.unwrap_or_default()
                ),
                overview: Box::new(self.schema.overview().clone()),
            }),
        }
    }

    pub fn preview(&self, query_id: &str) -> Result<Preview> {
        let entry = self.cache.get(query_id);
        self.system_metrics.record_cache_lookup(entry.is_ok());
        let entry = entry?;
        Ok(Preview {
            truncated: entry.total.exceeds(entry.preview.len() as u64),
            columns: entry.columns,
            rows: entry.preview,
            total_count: entry.total,
        })
    }

    /// Interpret a cached result; the model is asked at most once per query id.
    pub async fn interpret(&self, query_id: &str) -> Result<Interpretation> {
        let interpreter = &self.interpreter;
        let result = self
            .cache
            .interpretation_or_compute(query_id, move |entry| async move { interpreter.interpret(&entry).await })
            .await;
        self.system_metrics
            .record_cache_lookup(!matches!(result, Err(SageError::NotFound(_))));
        result
    }

    /// Record the caller's verdict. A negative verdict drops the cached result.
    pub fn feedback(&self, query_id: &str, verdict: Verdict) -> Result<()> {
        match verdict {
            Verdict::Negative => {
                let removed = self.cache.invalidate(query_id);
                info!("Negative feedback for {} (entry removed: {})", query_id, removed);
                Ok(())
            }
            Verdict::Positive => {
                if !self.cache.contains(query_id) {
                    return Err(SageError::NotFound(query_id.to_string()));
                }
                info!("Positive feedback for {}", query_id);
                Ok(())
            }
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn schema(&self) -> &SchemaOverview {
        self.schema.overview()
    }

    pub fn metrics(&self) -> &SystemMetrics {
        &self.system_metrics
    }

    pub fn execution_logs(&self) -> &ExecutionLogStore {
        &self.log_store
    }
}
