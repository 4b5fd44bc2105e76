//! Specialized agents and the dispatcher that runs them.

pub mod dispatcher;
pub mod general_agent;
pub mod lookup_agent;
pub mod sql_agent;

pub use dispatcher::Dispatcher;
pub use general_agent::GeneralAgent;
pub use lookup_agent::KnowledgeLookupAgent;
pub use sql_agent::SqlAgent;

use crate::error::{Result, SageError};
use crate::query::{AgentKind, AgentPayload, Query};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn run(&self, query: &Query) -> Result<AgentPayload>;
}

/// One agent per kind.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.kind(), agent);
        self
    }

    pub fn get(&self, kind: AgentKind) -> Result<Arc<dyn Agent>> {
        self.agents
            .get(&kind)
            .cloned()
            .ok_or_else(|| SageError::Config(format!("no agent registered for {}", kind)))
    }
}
