//! Observability
//!
//! In-process counters and a bounded log of SQL pipeline runs.

pub mod execution_log;
pub mod metrics;

pub use execution_log::{ExecutionLog, ExecutionLogStore};
pub use metrics::{MetricsSnapshot, SystemMetrics};
