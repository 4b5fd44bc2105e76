use crate::cache::ResultCache;
use crate::db::DatabaseGateway;
use crate::error::{Result, SageError};
use crate::llm::{ask, ModelGateway, PromptKind};
use crate::metadata::SchemaProvider;
use crate::observability::{ExecutionLog, ExecutionLogStore};
use crate::query::Query;
use crate::sql_pipeline::validator::SqlValidator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    Generate,
    Validate,
    Execute,
    SkipExecute,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlIntent {
    Sql,
    General,
}

/// What the model answers for a `GenerateSql` prompt.
#[derive(Debug, Clone, Deserialize)]
struct GeneratedSql {
    intent: SqlIntent,
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    reasoning: Vec<String>,
}

/// Result of one pipeline run.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub intent: SqlIntent,
    pub sql: Option<String>,
    /// Set instead of `sql` when the question needs no query
    pub general_answer: Option<String>,
    /// Minted by the result cache after a successful execution
    pub query_id: Option<String>,
    pub error: Option<SageError>,
    pub reasoning: Vec<String>,
    pub states: Vec<PipelineState>,
}

impl PipelineOutcome {
    fn new() -> Self {
        Self {
            intent: SqlIntent::Sql,
            sql: None,
            general_answer: None,
            query_id: None,
            error: None,
            reasoning: Vec::new(),
            states: vec![PipelineState::Start],
        }
    }

    fn enter(&mut self, state: PipelineState) {
        debug!("SQL pipeline: {:?} -> {:?}", self.states.last(), state);
        self.states.push(state);
    }

    fn fail(mut self, error: SageError) -> Self {
        warn!("SQL pipeline failed: {}", error);
        self.enter(PipelineState::Failed);
        self.error = Some(error);
        self
    }

    /// Collapse into a `Result`, keeping the error if the run failed.
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

pub struct SqlPipeline {
    model: Arc<dyn ModelGateway>,
    database: Arc<dyn DatabaseGateway>,
    schema: Arc<dyn SchemaProvider>,
    cache: Arc<ResultCache>,
    validator: SqlValidator,
    log: Option<Arc<ExecutionLogStore>>,
}

impl SqlPipeline {
    pub fn new(
        model: Arc<dyn ModelGateway>,
        database: Arc<dyn DatabaseGateway>,
        schema: Arc<dyn SchemaProvider>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            model,
            database,
            schema,
            cache,
            validator: SqlValidator::new(),
            log: None,
        }
    }

    /// Record every run in `log`.
    pub fn with_log(mut self, log: Arc<ExecutionLogStore>) -> Self {
        self.log = Some(log);
        self
    }

    /// Run the pipeline. Failures are reported in `PipelineOutcome::error`.
    pub async fn run(&self, query: &Query, execute: bool) -> PipelineOutcome {
        let start = Instant::now();
        let outcome = self.run_states(query, execute).await;
        if let Some(log) = &self.log {
            let entry = ExecutionLog::new(query.text.clone()).with_states(outcome.states.clone());
            let entry = match &outcome.error {
                Some(err) => entry.with_error(err.class(), err.to_string()),
                None => entry.with_success(outcome.sql.clone(), outcome.query_id.clone()),
            };
            log.add_log(entry.with_elapsed_ms(start.elapsed().as_millis() as u64));
        }
        outcome
    }

    async fn run_states(&self, query: &Query, execute: bool) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::new();

        outcome.enter(PipelineState::Generate);
        let generated = match self.generate(query).await {
            Ok(generated) => generated,
            Err(e) => return outcome.fail(e),
        };
        outcome.reasoning = generated.reasoning;
        outcome.intent = generated.intent;

        let sql = match (generated.intent, generated.sql) {
            (SqlIntent::General, _) => {
                info!("SQL pipeline resolved question as general");
                outcome.general_answer = Some(generated.answer.unwrap_or_default());
                outcome.enter(PipelineState::Done);
                return outcome;
            }
            (SqlIntent::Sql, Some(sql)) if !sql.trim().is_empty() => sql.trim().to_string(),
            (SqlIntent::Sql, _) => {
                let err = self.generation_error("model returned no SQL".to_string());
                return outcome.fail(err);
            }
        };
        outcome.sql = Some(sql.clone());

        outcome.enter(PipelineState::Validate);
        if let Err(e) = self.validator.validate(&sql) {
            return outcome.fail(e);
        }

        if !execute {
            outcome.enter(PipelineState::SkipExecute);
            outcome.enter(PipelineState::Done);
            return outcome;
        }

        outcome.enter(PipelineState::Execute);
        let stream = match self.database.execute(&sql).await {
            Ok(stream) => stream,
            Err(e) => return outcome.fail(e),
        };
        match self.cache.populate(&sql, stream, self.database.as_ref()).await {
            Ok(query_id) => {
                info!("Executed on {} and cached as {}", self.database.name(), query_id);
                outcome.query_id = Some(query_id);
            }
            Err(e) => return outcome.fail(e),
        }

        outcome.enter(PipelineState::Done);
        outcome
    }

    async fn generate(&self, query: &Query) -> Result<GeneratedSql> {
        let inputs = serde_json::json!({
            "question": query.text,
            "context": query.context,
            "schema": self.schema.overview(),
        });
        ask::<GeneratedSql>(self.model.as_ref(), PromptKind::GenerateSql, inputs)
            .await
            .map_err(|e| self.generation_error(e.to_string()))
    }

    fn generation_error(&self, message: String) -> SageError {
        SageError::Generation {
            message,
            overview: Box::new(self.schema.overview().clone()),
        }
    }
}
