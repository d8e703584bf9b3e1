use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::state::{Field, StateUpdate, WorkflowState};
use metamorphosis_core::types::{
    AchievementsList, ConversationTurn, Scorecard, ThreadId, ToolOutcome, ToolResult,
};

use crate::graph::{Node, NodeKind};

/// Which structured field a [`ParseNode`] fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTarget {
    Achievements,
    Scorecard,
}

/// Lifts the result of an agent's tool call into a structured field.
///
/// The call is found as the agent's most recent request for `tool`; the
/// result is matched to it by correlation id.
pub struct ParseNode {
    name: String,
    agent: String,
    tool: String,
    target: ParseTarget,
    outputs: [Field; 2],
}

impl ParseNode {
    pub fn new(
        name: impl Into<String>,
        agent: impl Into<String>,
        tool: impl Into<String>,
        target: ParseTarget,
    ) -> Self {
        let field = match target {
            ParseTarget::Achievements => Field::Achievements,
            ParseTarget::Scorecard => Field::Scorecard,
        };
        Self {
            name: name.into(),
            agent: agent.into(),
            tool: tool.into(),
            target,
            outputs: [field, Field::ConversationLog],
        }
    }

    /// The correlated result of the agent's latest call to `tool`.
    fn find_result<'a>(&self, log: &'a [ConversationTurn]) -> Result<&'a ToolResult> {
        let missing = || MetamorphosisError::MissingExpectedResult {
            node: self.name.clone(),
            tool: self.tool.clone(),
        };

        let call_id = log
            .iter()
            .rev()
            .find_map(|t| match t {
                ConversationTurn::ToolCall { origin, request }
                    if *origin == self.agent && request.tool == self.tool =>
                {
                    Some(request.id.as_str())
                }
                _ => None,
            })
            .ok_or_else(missing)?;

        log.iter()
            .find_map(|t| match t {
                ConversationTurn::ToolResult { result, .. } if result.id == call_id => Some(result),
                _ => None,
            })
            .ok_or_else(missing)
    }

    fn invalid(&self, message: impl Into<String>) -> MetamorphosisError {
        MetamorphosisError::InvalidResult {
            node: self.name.clone(),
            message: message.into(),
        }
    }
}

impl Node for ParseNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Parse
    }

    fn outputs(&self) -> &[Field] {
        &self.outputs
    }

    fn run(
        &self,
        thread_id: ThreadId,
        state: Arc<WorkflowState>,
    ) -> BoxFuture<'_, Result<StateUpdate>> {
        Box::pin(async move {
            let result = self.find_result(state.conversation_log())?;
            let payload = match &result.outcome {
                ToolOutcome::Success { payload } => payload.clone(),
                ToolOutcome::Failure { failure } => {
                    return Err(MetamorphosisError::ToolFailed {
                        node: self.name.clone(),
                        failure: failure.clone(),
                    })
                }
            };

            let update = match self.target {
                ParseTarget::Achievements => {
                    let list: AchievementsList = serde_json::from_value(payload)
                        .map_err(|e| self.invalid(format!("malformed achievements: {}", e)))?;
                    info!(thread_id = %thread_id, node = %self.name, count = list.items.len(), "Parsed achievements");
                    let note = format!("Received {} achievements from tool.", list.items.len());
                    StateUpdate::new()
                        .with_achievements(list)
                        .with_turns([ConversationTurn::utterance(&self.name, note)])
                }
                ParseTarget::Scorecard => {
                    let card: Scorecard = serde_json::from_value(payload)
                        .map_err(|e| self.invalid(format!("malformed scorecard: {}", e)))?;
                    card.validate().map_err(|m| self.invalid(m))?;
                    info!(thread_id = %thread_id, node = %self.name, overall = card.overall, "Parsed scorecard");
                    let note = format!("Received scorecard with overall score {}.", card.overall);
                    StateUpdate::new()
                        .with_scorecard(card)
                        .with_turns([ConversationTurn::utterance(&self.name, note)])
                }
            };
            Ok(update)
        })
    }
}
