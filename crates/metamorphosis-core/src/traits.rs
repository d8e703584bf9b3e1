use std::time::Duration;

use futures::future::BoxFuture;

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::event::WorkflowEvent;
use crate::types::*;

/// An external capability invoked by name with a JSON payload.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used for registry lookup and model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for the payload.
    fn input_schema(&self) -> serde_json::Value;

    /// Invoke the tool.
    ///
    /// Return `ToolValidation` for a payload the tool cannot accept and
    /// `ToolExecution` for anything that went wrong while running it.
    fn invoke(&self, payload: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Time budget for one invocation. `None` uses the registry default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Model invoker: given a request, returns a final answer or tool calls.
pub trait ModelInvoker: Send + Sync + 'static {
    fn invoke(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelReply>>;
}

/// Checkpoint store with one record per thread, swappable backend.
pub trait CheckpointStore: Send + Sync + 'static {
    /// Insert or replace the checkpoint for `checkpoint.thread_id`.
    fn put(&self, checkpoint: Checkpoint) -> BoxFuture<'_, Result<()>>;

    /// Load the checkpoint for a thread, or `CheckpointNotFound`.
    fn get(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Checkpoint>>;

    /// Remove a thread's checkpoint. Returns whether one existed.
    fn delete(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<bool>>;

    /// All threads with a stored checkpoint.
    fn threads(&self) -> BoxFuture<'_, Result<Vec<ThreadId>>>;
}

/// Receives one event per committed node.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: WorkflowEvent);
}
