//! Agent router
//!
//! Maps a classification to the agents that should answer. The mapping is
//! the `DECISION_TABLE` below, read top to bottom; the first matching rule
//! decides. Thresholds are inclusive.

use crate::config::RouterConfig;
use crate::query::{AgentKind, AgentTask, Category, Classification, Query};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Single,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Any,
    /// Highest of confidence and every agent score below the multi-agent threshold
    BelowMulti,
    AtLeastSql,
    AtLeastLookup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Parallel,
    Single(AgentKind),
    Fallback(AgentKind),
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    category: Option<Category>,
    band: Band,
    action: Action,
}

const DECISION_TABLE: [Rule; 5] = [
    Rule { category: Some(Category::Mixed), band: Band::Any, action: Action::Parallel },
    Rule { category: None, band: Band::BelowMulti, action: Action::Parallel },
    Rule { category: Some(Category::Sql), band: Band::AtLeastSql, action: Action::Single(AgentKind::Sql) },
    Rule {
        category: Some(Category::KnowledgeLookup),
        band: Band::AtLeastLookup,
        action: Action::Single(AgentKind::KnowledgeLookup),
    },
    Rule { category: None, band: Band::Any, action: Action::Fallback(AgentKind::General) },
];

impl Rule {
    fn matches(&self, c: &Classification, config: &RouterConfig) -> bool {
        if self.category.is_some_and(|category| category != c.category) {
            return false;
        }
        match self.band {
            Band::Any => true,
            Band::BelowMulti => c.max_confidence() < config.multi_agent_threshold,
            Band::AtLeastSql => c.confidence >= config.sql_threshold,
            Band::AtLeastLookup => c.confidence >= config.lookup_threshold,
        }
    }
}

/// Agents chosen for one query, in submission order.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub tasks: Vec<AgentTask>,
    pub mode: ExecutionMode,
}

impl RoutePlan {
    pub fn agents(&self) -> Vec<AgentKind> {
        self.tasks.iter().map(|t| t.agent).collect()
    }
}

pub struct AgentRouter {
    config: RouterConfig,
}

impl AgentRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Agent kinds for a classification. Never empty.
    pub fn select(&self, classification: &Classification) -> Vec<AgentKind> {
        let rule = DECISION_TABLE
            .iter()
            .find(|rule| rule.matches(classification, &self.config))
            .unwrap_or(&DECISION_TABLE[DECISION_TABLE.len() - 1]);

        match rule.action {
            Action::Single(agent) | Action::Fallback(agent) => vec![agent],
            Action::Parallel => {
                let agents = self.parallel_candidates(classification);
                if agents.is_empty() {
                    vec![AgentKind::General]
                } else {
                    agents
                }
            }
        }
    }

    fn parallel_candidates(&self, classification: &Classification) -> Vec<AgentKind> {
        let mut candidates: Vec<(AgentKind, f64)> = AgentKind::PRIORITY
            .iter()
            .map(|&agent| (agent, classification.score(agent)))
            .filter(|&(_, score)| score >= self.config.multi_agent_floor)
            .collect();
        // Stable sort keeps priority order among equal scores
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.truncate(self.config.max_parallel_agents);

        let mut agents: Vec<AgentKind> = candidates.into_iter().map(|(agent, _)| agent).collect();
        agents.sort_by_key(|agent| agent.priority());
        agents
    }

    pub fn route(&self, classification: &Classification, query: Arc<Query>) -> RoutePlan {
        self.route_until(classification, query, Instant::now() + self.config.agent_timeout)
    }

    /// Like `route`, with every task sharing an already running `deadline`.
    pub fn route_until(&self, classification: &Classification, query: Arc<Query>, deadline: Instant) -> RoutePlan {
        let agents = self.select(classification);
        let mode = if agents.len() > 1 {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Single
        };
        info!("Routing {:?} to {:?} ({:?})", classification.category, agents, mode);

        let tasks = agents
            .into_iter()
            .map(|agent| AgentTask {
                agent,
                query: Arc::clone(&query),
                deadline,
            })
            .collect();
        RoutePlan { tasks, mode }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> AgentRouter {
        AgentRouter::new(RouterConfig::default())
    }

    #[test]
    fn test_confident_sql_goes_single() {
        let c = Classification::new(Category::Sql, 0.92);
        assert_eq!(router().select(&c), vec![AgentKind::Sql]);
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let c = Classification::new(Category::Sql, 0.7);
        assert_eq!(router().select(&c), vec![AgentKind::Sql]);
        let c = Classification::new(Category::KnowledgeLookup, 0.7);
        assert_eq!(router().select(&c), vec![AgentKind::KnowledgeLookup]);
    }

    #[test]
    fn test_uncertain_scores_go_parallel() {
        let c = Classification::new(Category::KnowledgeLookup, 0.55).with_score(AgentKind::Sql, 0.5);
        let query = Arc::new(Query::new("Which tables hold revenue and what was it last month?"));
        let plan = router().route(&c, query);
        assert_eq!(plan.mode, ExecutionMode::Parallel);
        assert_eq!(plan.agents(), vec![AgentKind::Sql, AgentKind::KnowledgeLookup]);
        assert!(plan.tasks.len() <= RouterConfig::default().max_parallel_agents);
    }

    #[test]
    fn test_parallel_keeps_top_k_by_score() {
        let config = RouterConfig {
            max_parallel_agents: 2,
            ..RouterConfig::default()
        };
        let c = Classification::new(Category::Mixed, 0.9)
            .with_score(AgentKind::Sql, 0.3)
            .with_score(AgentKind::KnowledgeLookup, 0.5)
            .with_score(AgentKind::General, 0.4);
        assert_eq!(
            AgentRouter::new(config).select(&c),
            vec![AgentKind::KnowledgeLookup, AgentKind::General]
        );
    }

    #[test]
    fn test_score_ties_break_by_priority() {
        let config = RouterConfig {
            max_parallel_agents: 1,
            ..RouterConfig::default()
        };
        let c = Classification::new(Category::Mixed, 0.9)
            .with_score(AgentKind::General, 0.4)
            .with_score(AgentKind::KnowledgeLookup, 0.4);
        assert_eq!(AgentRouter::new(config).select(&c), vec![AgentKind::KnowledgeLookup]);
    }

    #[test]
    fn test_never_empty() {
        assert_eq!(router().select(&Classification::degraded()), vec![AgentKind::General]);
        let mixed_without_scores = Classification::new(Category::Mixed, 0.9);
        assert_eq!(router().select(&mixed_without_scores), vec![AgentKind::General]);
        let weak_sql = Classification::new(Category::Sql, 0.65);
        assert_eq!(router().select(&weak_sql), vec![AgentKind::General]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_carry_deadline() {
        let c = Classification::new(Category::Sql, 0.9);
        let start = Instant::now();
        let plan = router().route(&c, Arc::new(Query::new("q")));
        assert_eq!(plan.tasks[0].deadline, start + RouterConfig::default().agent_timeout);
    }

    #[test]
    fn test_parallel_tasks_share_given_deadline() {
        let c = Classification::new(Category::Mixed, 0.5)
            .with_score(AgentKind::Sql, 0.5)
            .with_score(AgentKind::General, 0.5);
        let deadline = Instant::now() + std::time::Duration::from_millis(300);
        let plan = router().route_until(&c, Arc::new(Query::new("q")), deadline);
        assert_eq!(plan.tasks.len(), 2);
        assert!(plan.tasks.iter().all(|t| t.deadline == deadline));
    }
}
