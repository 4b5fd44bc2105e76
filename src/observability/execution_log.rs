//! Execution Logging
//!
//! Structured record of every SQL pipeline run, kept in a bounded ring.

use crate::sql_pipeline::PipelineState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Execution log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub query_id: Option<String>,
    pub user_query: String,
    pub states: Vec<PipelineState>,
    pub final_sql: Option<String>,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            query_id: None,
            user_query: user_query.into(),
            states: Vec::new(),
            final_sql: None,
            error_class: None,
            error_message: None,
            execution_time_ms: 0,
            success: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_states(mut self, states: Vec<PipelineState>) -> Self {
        self.states = states;
        self
    }

    pub fn with_error(mut self, error_class: &str, error_msg: String) -> Self {
        self.error_class = Some(error_class.to_string());
        self.error_message = Some(error_msg);
        self.success = false;
        self
    }

    pub fn with_success(mut self, sql: Option<String>, query_id: Option<String>) -> Self {
        self.final_sql = sql;
        self.query_id = query_id;
        self.success = true;
        self
    }

    pub fn with_elapsed_ms(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }
}

/// Execution log store; the oldest entries are dropped past `capacity`.
pub struct ExecutionLogStore {
    logs: Mutex<VecDeque<ExecutionLog>>,
    capacity: usize,
}

impl ExecutionLogStore {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            logs: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
        }
    }

    pub fn add_log(&self, log: ExecutionLog) {
        let mut logs = self.logs.lock().unwrap_or_else(|p| p.into_inner());
        if logs.len() == self.capacity {
            logs.pop_front();
        }
        logs.push_back(log);
    }

    pub fn get_logs(&self) -> Vec<ExecutionLog> {
        self.logs.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect()
    }

    pub fn get_logs_by_query(&self, query_id: &str) -> Vec<ExecutionLog> {
        self.logs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|log| log.query_id.as_deref() == Some(query_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExecutionLogStore {
    fn default() -> Self {
        Self::new()
    }
}
