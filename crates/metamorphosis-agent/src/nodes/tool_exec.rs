use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tracing::{debug, warn};

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::state::{Field, StateUpdate, WorkflowState};
use metamorphosis_core::types::{ConversationTurn, ThreadId, ToolFailure, ToolResult};
use metamorphosis_tools::ToolRegistry;

use crate::graph::{Node, NodeKind};
use crate::router::pending_calls;

const OUTPUTS: &[Field] = &[Field::ConversationLog];

/// Executes every pending tool call of one agent and appends the results.
///
/// Failures are recorded as failed results, not raised, so the parse node
/// downstream sees exactly what happened. Calls to tools outside the
/// agent's allowed set fail with `NotFound`.
pub struct ToolExecutionNode {
    name: String,
    agent: String,
    allowed: Vec<String>,
    registry: Arc<ToolRegistry>,
}

impl ToolExecutionNode {
    pub fn new(
        name: impl Into<String>,
        agent: impl Into<String>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            allowed: Vec::new(),
            registry,
        }
    }

    pub fn with_tools<S: Into<String>>(mut self, tools: impl IntoIterator<Item = S>) -> Self {
        self.allowed = tools.into_iter().map(Into::into).collect();
        self
    }
}

impl Node for ToolExecutionNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ToolExecution
    }

    fn outputs(&self) -> &[Field] {
        OUTPUTS
    }

    fn tools(&self) -> Vec<String> {
        self.allowed.clone()
    }

    fn run(
        &self,
        thread_id: ThreadId,
        state: Arc<WorkflowState>,
    ) -> BoxFuture<'_, Result<StateUpdate>> {
        Box::pin(async move {
            let pending = pending_calls(state.conversation_log(), &self.agent);
            if pending.is_empty() {
                return Err(MetamorphosisError::InvalidResult {
                    node: self.name.clone(),
                    message: format!("no pending tool call from '{}'", self.agent),
                });
            }

            let invocations = pending.iter().map(|call| async move {
                if !self.allowed.iter().any(|t| *t == call.tool) {
                    warn!(node = %self.name, tool = %call.tool, "Agent requested a tool it was not given");
                    return ToolResult::failure(
                        call,
                        ToolFailure::NotFound {
                            tool: call.tool.clone(),
                        },
                    );
                }
                match self.registry.invoke(&call.tool, call.payload.clone()).await {
                    Ok(payload) => ToolResult::success(call, payload),
                    Err(failure) => ToolResult::failure(call, failure),
                }
            });
            let results = join_all(invocations).await;

            debug!(
                thread_id = %thread_id,
                node = %self.name,
                calls = results.len(),
                failed = results.iter().filter(|r| r.is_error()).count(),
                "Tool calls executed"
            );
            Ok(StateUpdate::new().with_turns(
                results
                    .into_iter()
                    .map(|r| ConversationTurn::tool_result(&self.name, r)),
            ))
        })
    }
}
