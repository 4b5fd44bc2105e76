use crate::metadata::SchemaOverview;
use thiserror::Error;

/// Failures reported by a model backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("model refused to answer: {0}")]
    Refusal(String),

    #[error("model returned malformed output: {0}")]
    Malformed(String),

    #[error("model backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum SageError {
    #[error("Classification error: {0}")]
    Classification(String),

    #[error("SQL generation failed: {message} (known tables: {})", .overview.table_names().join(", "))]
    Generation {
        message: String,
        overview: Box<SchemaOverview>,
    },

    #[error("Unsafe query rejected: {reason}")]
    UnsafeQuery { sql: String, reason: String },

    #[error("Execution error: {driver_message}")]
    Execution { sql: String, driver_message: String },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Query id not found: {0}")]
    NotFound(String),

    #[error("Malformed interpretation: {0}")]
    MalformedInterpretation(String),

    #[error("Agent timed out after {0}ms")]
    AgentTimeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SageError {
    /// Stable class name shown to users for diagnostics.
    pub fn class(&self) -> &'static str {
        match self {
            SageError::Classification(_) => "ClassificationError",
            SageError::Generation { .. } => "GenerationError",
            SageError::UnsafeQuery { .. } => "UnsafeQueryError",
            SageError::Execution { .. } => "ExecutionError",
            SageError::Model(_) => "ModelError",
            SageError::NotFound(_) => "NotFoundError",
            SageError::MalformedInterpretation(_) => "MalformedInterpretationError",
            SageError::AgentTimeout(_) => "AgentTimeout",
            SageError::Config(_) => "ConfigError",
            SageError::Io(_) => "IoError",
            SageError::Json(_) => "JsonError",
        }
    }

    pub fn execution(sql: impl Into<String>, driver_message: impl Into<String>) -> Self {
        SageError::Execution {
            sql: sql.into(),
            driver_message: driver_message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_lists_tables() {
        let overview = SchemaOverview::from_tables(vec![crate::metadata::TableInfo::named("orders")]);
        let err = SageError::Generation {
            message: "no sql".to_string(),
            overview: Box::new(overview),
        };
        assert_eq!(err.class(), "GenerationError");
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_execution_error_keeps_driver_message() {
        let err = SageError::execution("SELECT x FROM t", "column \"x\" does not exist");
        assert_eq!(err.to_string(), "Execution error: column \"x\" does not exist");
    }
}
