//! Response synthesizer
//!
//! Folds agent results into one answer. Sections follow agent priority;
//! when the combined text is over the token budget the lowest-priority
//! section is cut first and the highest-priority one is never touched.

use crate::query::{AgentKind, AgentResult};
use crate::router::ExecutionMode;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

const TRUNCATION_MARKER: &str = "\n[truncated]";
/// A truncated section keeps at least this many characters of body, otherwise it is dropped.
const MIN_SECTION_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTiming {
    pub agent: AgentKind,
    pub elapsed_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub active_agents: Vec<AgentKind>,
    pub execution_mode: ExecutionMode,
    pub agents: Vec<AgentTiming>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    pub metadata: ResponseMetadata,
}

/// Rough token count: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone)]
enum Part {
    Section { agent: AgentKind, body: String },
    Unavailable { agent: AgentKind, class: String },
}

impl Part {
    fn render(&self) -> String {
        match self {
            Part::Section { agent, body } => format!("### {}\n{}", agent.label(), body),
            Part::Unavailable { agent, class } => format!("{} unavailable ({})", agent.label(), class),
        }
    }
}

fn render(parts: &[Part]) -> String {
    parts.iter().map(Part::render).join("\n\n")
}

fn with_reasoning(text: &str, reasoning: &[String], include: bool) -> String {
    let text = text.trim();
    if !include || reasoning.is_empty() {
        return text.to_string();
    }
    let steps = reasoning.iter().map(|step| format!("- {}", step)).join("\n");
    format!("{}\n\nReasoning:\n{}", text, steps)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseSynthesizer;

impl ResponseSynthesizer {
    pub fn new() -> Self {
        Self
    }

    pub fn synthesize(
        &self,
        results: &[AgentResult],
        mode: ExecutionMode,
        token_budget: usize,
        include_reasoning: bool,
    ) -> FinalAnswer {
        let metadata = ResponseMetadata {
            active_agents: results.iter().map(|r| r.agent).collect(),
            execution_mode: mode,
            agents: results
                .iter()
                .map(|r| AgentTiming {
                    agent: r.agent,
                    elapsed_ms: r.elapsed.as_millis() as u64,
                    success: r.is_ok(),
                })
                .collect(),
        };

        let text = if results.iter().all(|r| !r.is_ok()) {
            apology(results)
        } else if let [single] = results {
            match &single.outcome {
                Ok(payload) => with_reasoning(&payload.text, &payload.reasoning, include_reasoning),
                Err(_) => apology(results),
            }
        } else {
            merge(results, token_budget, include_reasoning)
        };

        FinalAnswer { text, metadata }
    }
}

fn apology(results: &[AgentResult]) -> String {
    let classes = results
        .iter()
        .filter_map(|r| r.outcome.as_ref().err())
        .map(|failure| failure.class.as_str())
        .unique()
        .join(", ");
    if classes.is_empty() {
        "Sorry, I could not answer that question.".to_string()
    } else {
        format!("Sorry, I could not answer that question. Errors: {}.", classes)
    }
}

fn merge(results: &[AgentResult], token_budget: usize, include_reasoning: bool) -> String {
    let mut ordered: Vec<&AgentResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.agent.priority());

    let mut parts: Vec<Part> = ordered
        .into_iter()
        .map(|r| match &r.outcome {
            Ok(payload) => Part::Section {
                agent: r.agent,
                body: with_reasoning(&payload.text, &payload.reasoning, include_reasoning),
            },
            Err(failure) => Part::Unavailable {
                agent: r.agent,
                class: failure.class.clone(),
            },
        })
        .collect();

    fit_to_budget(&mut parts, token_budget);
    render(&parts)
}

/// Truncate or drop sections from the lowest priority upwards until the
/// rendered text fits. The first section is always kept whole.
fn fit_to_budget(parts: &mut Vec<Part>, token_budget: usize) {
    let budget_chars = token_budget.saturating_mul(4);
    loop {
        let rendered_chars = render(parts).chars().count();
        if rendered_chars <= budget_chars {
            return;
        }

        let first = parts.iter().position(|p| matches!(p, Part::Section { .. }));
        let Some(victim) = parts.iter().rposition(|p| matches!(p, Part::Section { .. })) else {
            return;
        };
        if Some(victim) == first {
            return;
        }

        let excess = rendered_chars - budget_chars;
        if let Part::Section { agent, body } = &mut parts[victim] {
            let body_chars = body.chars().count();
            let keep = body_chars.saturating_sub(excess + TRUNCATION_MARKER.len());
            if keep >= MIN_SECTION_CHARS && !body.ends_with(TRUNCATION_MARKER) {
                debug!("Truncating {} section to {} chars", agent, keep);
                let mut cut: String = body.chars().take(keep).collect();
                cut.push_str(TRUNCATION_MARKER);
                *body = cut;
                continue;
            }
            debug!("Dropping {} section to fit the token budget", agent);
        }
        parts.remove(victim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{AgentFailure, AgentPayload};
    use std::time::Duration;

    fn ok(agent: AgentKind, text: &str) -> AgentResult {
        AgentResult {
            agent,
            outcome: Ok(AgentPayload::text(text)),
            elapsed: Duration::from_millis(12),
        }
    }

    fn failed(agent: AgentKind, class: &str) -> AgentResult {
        AgentResult {
            agent,
            outcome: Err(AgentFailure {
                class: class.to_string(),
                message: "boom".to_string(),
            }),
            elapsed: Duration::from_millis(5),
        }
    }

    fn synth(results: &[AgentResult], budget: usize) -> FinalAnswer {
        ResponseSynthesizer::new().synthesize(results, ExecutionMode::Parallel, budget, false)
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_single_result_passthrough() {
        let mut result = ok(AgentKind::Sql, "  42 rows  ");
        if let Ok(payload) = &mut result.outcome {
            payload.reasoning = vec!["joined orders".to_string()];
        }
        let plain = ResponseSynthesizer::new().synthesize(&[result.clone()], ExecutionMode::Single, 100, false);
        assert_eq!(plain.text, "42 rows");
        let reasoned = ResponseSynthesizer::new().synthesize(&[result], ExecutionMode::Single, 100, true);
        assert!(reasoned.text.ends_with("Reasoning:\n- joined orders"));
    }

    #[test]
    fn test_sections_follow_priority_and_label_failures() {
        let answer = synth(
            &[
                ok(AgentKind::General, "general text"),
                failed(AgentKind::KnowledgeLookup, "ModelError"),
                ok(AgentKind::Sql, "sql text"),
            ],
            1000,
        );
        assert_eq!(
            answer.text,
            "### SQL\nsql text\n\nKnowledge lookup unavailable (ModelError)\n\n### General\ngeneral text"
        );
        assert_eq!(answer.metadata.agents.len(), 3);
        assert!(!answer.metadata.agents[1].success);
    }

    #[test]
    fn test_over_budget_truncates_lowest_priority() {
        let long = "x".repeat(400);
        let answer = synth(&[ok(AgentKind::Sql, &long), ok(AgentKind::General, &long)], 200);
        assert!(estimate_tokens(&answer.text) <= 200);
        assert!(answer.text.starts_with(&format!("### SQL\n{}", long)));
        assert!(answer.text.ends_with("[truncated]"));
    }

    #[test]
    fn test_highest_priority_is_never_truncated() {
        let long = "y".repeat(2000);
        let answer = synth(&[ok(AgentKind::Sql, &long), ok(AgentKind::General, "short")], 100);
        assert_eq!(answer.text, format!("### SQL\n{}", long));
    }

    #[test]
    fn test_total_failure_apologizes_with_classes() {
        let answer = synth(
            &[failed(AgentKind::Sql, "AgentTimeout"), failed(AgentKind::General, "ModelError")],
            100,
        );
        assert_eq!(
            answer.text,
            "Sorry, I could not answer that question. Errors: AgentTimeout, ModelError."
        );
    }
}
