use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use sqlsage::config::LlmConfig;
use sqlsage::db::{DatabaseGateway, Row, RowStream};
use sqlsage::llm::{ModelGateway, PromptKind};
use sqlsage::metadata::{SchemaOverview, StaticSchema, TableInfo};
use sqlsage::{Config, DataAssistant, ModelError, SageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Model that answers each prompt kind with a fixed value.
#[derive(Default)]
pub struct ScriptedModel {
    answers: HashMap<PromptKind, Result<Value, ModelError>>,
    delays: HashMap<PromptKind, Duration>,
    calls: Mutex<HashMap<PromptKind, usize>>,
    inputs: Mutex<Vec<(PromptKind, Value)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, kind: PromptKind, value: Value) -> Self {
        self.answers.insert(kind, Ok(value));
        self
    }

    pub fn fail(mut self, kind: PromptKind, error: ModelError) -> Self {
        self.answers.insert(kind, Err(error));
        self
    }

    pub fn delay(mut self, kind: PromptKind, delay: Duration) -> Self {
        self.delays.insert(kind, delay);
        self
    }

    pub fn calls(&self, kind: PromptKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }

    pub fn inputs_for(&self, kind: PromptKind) -> Vec<Value> {
        self.inputs
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[async_trait]
impl ModelGateway for ScriptedModel {
    async fn invoke(&self, kind: PromptKind, inputs: Value) -> Result<Value, ModelError> {
        *self.calls.lock().unwrap().entry(kind).or_insert(0) += 1;
        self.inputs.lock().unwrap().push((kind, inputs));
        if let Some(delay) = self.delays.get(&kind) {
            tokio::time::sleep(*delay).await;
        }
        self.answers
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Err(ModelError::Unavailable(format!("no scripted answer for {}", kind))))
    }
}

/// Database that returns the same rows for every query and counts what is pulled.
pub struct MemoryDatabase {
    columns: Vec<String>,
    rows: Vec<Row>,
    failure: Option<String>,
    reported_total: bool,
    pub executions: AtomicUsize,
    pub pulled: Arc<AtomicUsize>,
}

impl MemoryDatabase {
    pub fn new(columns: &[&str], rows: Vec<Row>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            failure: None,
            reported_total: false,
            executions: AtomicUsize::new(0),
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `n` rows of (customer, revenue).
    pub fn revenue_rows(n: usize) -> Self {
        let rows = (0..n)
            .map(|i| vec![json!(format!("customer_{}", i)), json!(1000 - i as i64)])
            .collect();
        Self::new(&["name", "revenue"], rows)
    }

    pub fn failing(message: &str) -> Self {
        let mut db = Self::new(&[], Vec::new());
        db.failure = Some(message.to_string());
        db
    }

    pub fn with_reported_total(mut self) -> Self {
        self.reported_total = true;
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseGateway for MemoryDatabase {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, sql: &str) -> sqlsage::Result<RowStream> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(SageError::execution(sql, message.clone()));
        }
        let pulled = Arc::clone(&self.pulled);
        let rows = futures::stream::iter(self.rows.clone())
            .map(move |row| {
                pulled.fetch_add(1, Ordering::SeqCst);
                Ok(row)
            })
            .boxed();
        let total = self.reported_total.then_some(self.rows.len() as u64);
        Ok(RowStream::new(self.columns.clone(), rows).with_reported_total(total))
    }
}

pub fn sample_schema() -> SchemaOverview {
    SchemaOverview::from_tables(vec![
        TableInfo::named("customers")
            .with_description("One row per customer")
            .with_column("customer_id", "integer", "Primary key")
            .with_column("name", "text", "Customer display name")
            .related_to("orders"),
        TableInfo::named("orders")
            .with_description("Orders placed by customers, with revenue per order")
            .with_column("order_id", "integer", "Primary key")
            .with_column("customer_id", "integer", "References customers")
            .with_column("revenue", "numeric", "Order revenue in USD")
            .with_column("ordered_at", "date", "Order date")
            .related_to("customers"),
    ])
}

pub const TOP_CUSTOMERS_SQL: &str = "SELECT c.name, SUM(o.revenue) AS revenue \
     FROM customers c JOIN orders o ON o.customer_id = c.customer_id \
     WHERE o.ordered_at >= DATE '2024-01-01' \
     GROUP BY c.name ORDER BY revenue DESC LIMIT 10";

pub fn sql_answer(sql: &str) -> Value {
    json!({"intent": "sql", "sql": sql, "reasoning": ["join customers to orders", "rank by revenue"]})
}

pub fn test_config() -> Config {
    Config::new(LlmConfig::new("test-key"))
}

pub fn assistant(config: &Config, model: Arc<ScriptedModel>, db: Arc<MemoryDatabase>) -> DataAssistant {
    DataAssistant::new(config, model, db, Arc::new(StaticSchema::new(sample_schema())))
}
