//! Dispatcher
//!
//! Runs a route plan's tasks with at most `max_parallel` in flight, each
//! bounded by its own deadline. Results come back in submission order no
//! matter which task finishes first. Dropping the `dispatch` future aborts
//! every task still running.

use crate::agents::AgentRegistry;
use crate::error::SageError;
use crate::observability::SystemMetrics;
use crate::query::{AgentFailure, AgentResult, AgentTask};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    max_parallel: usize,
    metrics: Option<Arc<SystemMetrics>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<AgentRegistry>, max_parallel: usize) -> Self {
        Self {
            registry,
            max_parallel: max_parallel.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SystemMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn dispatch(&self, mut tasks: Vec<AgentTask>) -> Vec<AgentResult> {
        let results = match tasks.len() {
            // A single task runs inline, still bounded by its deadline
            1 => match tasks.pop() {
                Some(task) => vec![run_task(&self.registry, task).await],
                None => Vec::new(),
            },
            _ => self.dispatch_parallel(tasks).await,
        };

        if let Some(metrics) = &self.metrics {
            for result in &results {
                metrics.record_agent_run(&result.agent.to_string(), result.elapsed);
                if let Err(failure) = &result.outcome {
                    metrics.record_error(&failure.class);
                }
            }
        }
        results
    }

    async fn dispatch_parallel(&self, tasks: Vec<AgentTask>) -> Vec<AgentResult> {
        let permits = Arc::new(Semaphore::new(self.max_parallel));
        let kinds: Vec<_> = tasks.iter().map(|t| t.agent).collect();
        let mut slots: Vec<Option<AgentResult>> = vec![None; tasks.len()];
        let mut set = JoinSet::new();

        for (index, task) in tasks.into_iter().enumerate() {
            let registry = Arc::clone(&self.registry);
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                (index, run_task(&registry, task).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Agent task did not complete: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(kinds)
            .map(|(slot, agent)| {
                slot.unwrap_or_else(|| AgentResult {
                    agent,
                    outcome: Err(AgentFailure {
                        class: "AgentPanic".to_string(),
                        message: format!("{} agent stopped unexpectedly", agent),
                    }),
                    elapsed: Duration::ZERO,
                })
            })
            .collect()
    }
}

async fn run_task(registry: &AgentRegistry, task: AgentTask) -> AgentResult {
    let start = Instant::now();
    let budget = task.deadline.saturating_duration_since(start);
    debug!("Dispatching {} agent ({}ms budget)", task.agent, budget.as_millis());

    let outcome = match registry.get(task.agent) {
        Ok(agent) => match tokio::time::timeout_at(task.deadline, agent.run(&task.query)).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(AgentFailure::from(&e)),
            Err(_) => Err(AgentFailure::from(&SageError::AgentTimeout(budget.as_millis() as u64))),
        },
        Err(e) => Err(AgentFailure::from(&e)),
    };

    let elapsed = start.elapsed();
    match &outcome {
        Ok(_) => info!("{} agent finished in {}ms", task.agent, elapsed.as_millis()),
        Err(failure) => warn!(
            "{} agent failed after {}ms: {} ({})",
            task.agent,
            elapsed.as_millis(),
            failure.message,
            failure.class
        ),
    }

    AgentResult {
        agent: task.agent,
        outcome,
        elapsed,
    }
}
