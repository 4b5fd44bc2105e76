//! SQL Sage
//!
//! Answers natural-language questions about a relational dataset: routes
//! each question to SQL, knowledge-lookup and general agents, executes the
//! generated SQL and caches the results for preview and interpretation.

pub mod agents;
pub mod assistant;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod interpret;
pub mod llm;
pub mod metadata;
pub mod observability;
pub mod query;
pub mod router;
pub mod sql_pipeline;
pub mod synthesizer;

pub use assistant::{DataAssistant, GeneratedQuery, Preview, QueryResponse, Verdict};
pub use cache::{CacheEntry, ResultCache};
pub use config::Config;
pub use error::{ModelError, Result, SageError};
pub use interpret::{Interpretation, Visualization};
pub use query::{AgentKind, Category, Classification, Query, QueryConfig, Turn};
pub use router::ExecutionMode;
