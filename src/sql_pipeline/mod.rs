//! SQL pipeline
//!
//! Question → SQL → read-only validation → optional execution → result cache.

pub mod pipeline;
pub mod validator;

pub use pipeline::{PipelineOutcome, PipelineState, SqlIntent, SqlPipeline};
pub use validator::SqlValidator;
