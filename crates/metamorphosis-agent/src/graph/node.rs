use std::sync::Arc;

use futures::future::BoxFuture;

use metamorphosis_core::error::Result;
use metamorphosis_core::state::{Field, StateUpdate, WorkflowState};
use metamorphosis_core::types::ThreadId;

/// What a node does, used for validation and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Calls one tool and writes one field.
    Transform,
    /// Invokes the model, which may request tool calls.
    Agent,
    /// Executes an agent's pending tool calls.
    ToolExecution,
    /// Lifts a structured result out of the conversation log.
    Parse,
}

/// A unit of work in the workflow graph.
///
/// A node never mutates the state it is given; every write goes through the
/// returned [`StateUpdate`], which the engine merges.
pub trait Node: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn kind(&self) -> NodeKind;

    /// Fields this node may write.
    fn outputs(&self) -> &[Field];

    /// Tools this node may invoke. Checked against the registry when the graph is built.
    fn tools(&self) -> Vec<String> {
        Vec::new()
    }

    fn run(&self, thread_id: ThreadId, state: Arc<WorkflowState>)
        -> BoxFuture<'_, Result<StateUpdate>>;
}
