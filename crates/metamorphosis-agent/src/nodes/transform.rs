use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::state::{Field, StateUpdate, TextField, WorkflowState};
use metamorphosis_core::types::ThreadId;
use metamorphosis_tools::ToolRegistry;

use crate::graph::{Node, NodeKind};

/// Calls one tool on one text field and writes its result to another.
pub struct TransformNode {
    name: String,
    tool: String,
    input: TextField,
    output: TextField,
    outputs: [Field; 1],
    /// Key of the string result inside an object payload; `None` expects a bare string.
    result_key: Option<String>,
    registry: Arc<ToolRegistry>,
}

impl TransformNode {
    pub fn new(
        name: impl Into<String>,
        tool: impl Into<String>,
        input: TextField,
        output: TextField,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            tool: tool.into(),
            input,
            output,
            outputs: [output.field()],
            result_key: None,
            registry,
        }
    }

    pub fn with_result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = Some(key.into());
        self
    }

    fn extract(&self, payload: &serde_json::Value) -> Result<String> {
        let value = match &self.result_key {
            Some(key) => payload.get(key),
            None => Some(payload),
        };
        value
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| MetamorphosisError::InvalidResult {
                node: self.name.clone(),
                message: match &self.result_key {
                    Some(key) => format!("tool '{}' result has no string '{}'", self.tool, key),
                    None => format!("tool '{}' result is not a string", self.tool),
                },
            })
    }
}

impl Node for TransformNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Transform
    }

    fn outputs(&self) -> &[Field] {
        &self.outputs
    }

    fn tools(&self) -> Vec<String> {
        vec![self.tool.clone()]
    }

    fn run(
        &self,
        thread_id: ThreadId,
        state: Arc<WorkflowState>,
    ) -> BoxFuture<'_, Result<StateUpdate>> {
        Box::pin(async move {
            let text = state
                .text(self.input)
                .ok_or_else(|| MetamorphosisError::MissingInput {
                    node: self.name.clone(),
                    field: self.input.field().to_string(),
                })?;

            let payload = self
                .registry
                .invoke(&self.tool, serde_json::json!({ "text": text }))
                .await
                .map_err(|failure| MetamorphosisError::ToolFailed {
                    node: self.name.clone(),
                    failure,
                })?;

            let value = self.extract(&payload)?;
            debug!(thread_id = %thread_id, node = %self.name, tool = %self.tool, "Transform produced output");
            Ok(StateUpdate::new().with_text(self.output, value))
        })
    }
}
