//! Routers for the self-review topology.

use std::collections::HashSet;

use metamorphosis_core::state::WorkflowState;
use metamorphosis_core::types::{ConversationTurn, ToolCallRequest};

use crate::graph::Router;

pub const TOOLS: &str = "tools";
pub const FINAL: &str = "final";
pub const MALFORMED: &str = "malformed";
pub const CONTINUE: &str = "continue";
pub const STOP: &str = "stop";

/// Classifies an agent's latest turn.
///
/// - `tools`: the agent has a tool call with no correlated result yet.
/// - `final`: the agent's latest turn is a non-blank utterance.
/// - `malformed`: anything else, including no turn at all.
pub struct AgentTurnRouter {
    agent: String,
}

impl AgentTurnRouter {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

impl Router for AgentTurnRouter {
    fn name(&self) -> &str {
        "agent_turn"
    }

    fn labels(&self) -> &'static [&'static str] {
        &[TOOLS, FINAL, MALFORMED]
    }

    fn decide(&self, state: &WorkflowState) -> &'static str {
        let log = state.conversation_log();
        if !pending_calls(log, &self.agent).is_empty() {
            return TOOLS;
        }
        match log.iter().rev().find(|t| t.origin() == self.agent) {
            Some(ConversationTurn::Utterance { text, .. }) if !text.trim().is_empty() => FINAL,
            _ => MALFORMED,
        }
    }
}

/// Tool calls made by `agent` that have no result in the log yet, in log order.
pub fn pending_calls<'a>(
    log: &'a [ConversationTurn],
    agent: &str,
) -> Vec<&'a ToolCallRequest> {
    let answered: HashSet<&str> = log
        .iter()
        .filter_map(|t| match t {
            ConversationTurn::ToolResult { result, .. } => Some(result.id.as_str()),
            _ => None,
        })
        .collect();

    log.iter()
        .filter_map(|t| match t {
            ConversationTurn::ToolCall { origin, request } if origin == agent => Some(request),
            _ => None,
        })
        .filter(|r| !answered.contains(r.id.as_str()))
        .collect()
}

/// Continues to scoring once enough achievements were parsed.
pub struct ContinueReviewRouter {
    min_achievements: usize,
}

impl ContinueReviewRouter {
    pub fn new(min_achievements: usize) -> Self {
        Self { min_achievements }
    }
}

impl Router for ContinueReviewRouter {
    fn name(&self) -> &str {
        "continue_review"
    }

    fn labels(&self) -> &'static [&'static str] {
        &[CONTINUE, STOP]
    }

    fn decide(&self, state: &WorkflowState) -> &'static str {
        let count = state.achievements().map(|a| a.items.len()).unwrap_or(0);
        if count >= self.min_achievements {
            CONTINUE
        } else {
            STOP
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metamorphosis_core::state::StateUpdate;
    use metamorphosis_core::types::{AchievementsList, ToolResult};
    use metamorphosis_test_utils::sample_achievements;

    const AGENT: &str = "achievements_extractor";

    fn with_turns(turns: Vec<ConversationTurn>) -> WorkflowState {
        WorkflowState::seed("Shipped X.")
            .merge(&StateUpdate::new().with_turns(turns), AGENT)
            .unwrap()
    }

    #[test]
    fn test_unresolved_call_routes_to_tools_every_time() {
        let call = ToolCallRequest::new("extract_achievements", serde_json::json!({"text": "x"}));
        let state = with_turns(vec![ConversationTurn::tool_call(AGENT, call)]);
        let router = AgentTurnRouter::new(AGENT);
        for _ in 0..5 {
            assert_eq!(router.decide(&state), TOOLS);
        }
    }

    #[test]
    fn test_resolved_call_is_not_pending() {
        let call = ToolCallRequest::new("extract_achievements", serde_json::json!({"text": "x"}));
        let result = ToolResult::success(&call, sample_achievements());
        let state = with_turns(vec![
            ConversationTurn::tool_call(AGENT, call),
            ConversationTurn::tool_result("achievements_tool_node", result),
        ]);
        assert!(pending_calls(state.conversation_log(), AGENT).is_empty());
        // The agent's latest turn is a call, not an utterance
        assert_eq!(AgentTurnRouter::new(AGENT).decide(&state), MALFORMED);
    }

    #[test]
    fn test_utterance_routes_final() {
        let state = with_turns(vec![ConversationTurn::utterance(AGENT, "Here are the achievements.")]);
        assert_eq!(AgentTurnRouter::new(AGENT).decide(&state), FINAL);
    }

    #[test]
    fn test_blank_or_missing_turn_is_malformed() {
        let router = AgentTurnRouter::new(AGENT);
        assert_eq!(router.decide(&WorkflowState::seed("x")), MALFORMED);

        let state = with_turns(vec![ConversationTurn::utterance(AGENT, "  ")]);
        assert_eq!(router.decide(&state), MALFORMED);
    }

    #[test]
    fn test_other_agents_turns_are_ignored() {
        let call = ToolCallRequest::new("evaluate_review_text", serde_json::json!({"text": "x"}));
        let state = with_turns(vec![ConversationTurn::tool_call("review_text_evaluator", call)]);
        assert_eq!(AgentTurnRouter::new(AGENT).decide(&state), MALFORMED);
        assert_eq!(
            AgentTurnRouter::new("review_text_evaluator").decide(&state),
            TOOLS
        );
    }

    #[test]
    fn test_continue_review_threshold() {
        let list: AchievementsList = serde_json::from_value(sample_achievements()).unwrap();
        let state = WorkflowState::seed("x")
            .merge(&StateUpdate::new().with_achievements(list), "parser")
            .unwrap();

        assert_eq!(ContinueReviewRouter::new(1).decide(&state), CONTINUE);
        assert_eq!(ContinueReviewRouter::new(3).decide(&state), STOP);
        assert_eq!(ContinueReviewRouter::new(1).decide(&WorkflowState::seed("x")), STOP);
    }
}
