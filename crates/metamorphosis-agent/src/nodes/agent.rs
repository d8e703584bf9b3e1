use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tracing::debug;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::state::{Field, StateUpdate, TextField, WorkflowState};
use metamorphosis_core::traits::ModelInvoker;
use metamorphosis_core::types::{ConversationTurn, ModelRequest, ThreadId, ToolCallRequest};
use metamorphosis_tools::ToolRegistry;

use crate::graph::{Node, NodeKind};

/// Invokes the model once and records its reply in the conversation log.
///
/// The reply becomes an utterance (when it has text, or when it has neither
/// text nor tool calls) followed by one tool-call turn per proposed call.
/// Whether a tool must run next is left to the router.
pub struct AgentNode {
    name: String,
    model: Arc<dyn ModelInvoker>,
    registry: Arc<ToolRegistry>,
    tools: Vec<String>,
    input: TextField,
    system: String,
    instruction: String,
}

const OUTPUTS: &[Field] = &[Field::ConversationLog];

impl AgentNode {
    pub fn new(
        name: impl Into<String>,
        model: Arc<dyn ModelInvoker>,
        registry: Arc<ToolRegistry>,
        input: TextField,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            registry,
            tools: Vec::new(),
            input,
            system: String::new(),
            instruction: String::new(),
        }
    }

    pub fn with_tools<S: Into<String>>(mut self, tools: impl IntoIterator<Item = S>) -> Self {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }
}

impl Node for AgentNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Agent
    }

    fn outputs(&self) -> &[Field] {
        OUTPUTS
    }

    fn tools(&self) -> Vec<String> {
        self.tools.clone()
    }

    fn run(
        &self,
        thread_id: ThreadId,
        state: Arc<WorkflowState>,
    ) -> BoxFuture<'_, Result<StateUpdate>> {
        Box::pin(async move {
            let input = state
                .text(self.input)
                .ok_or_else(|| MetamorphosisError::MissingInput {
                    node: self.name.clone(),
                    field: self.input.field().to_string(),
                })?;

            let request = ModelRequest {
                system: self.system.clone(),
                history: state.conversation_log().to_vec(),
                instruction: self.instruction.clone(),
                input: input.to_string(),
                tools: self.registry.definitions_for(&self.tools),
            };

            let start = Instant::now();
            let reply = self.model.invoke(request).await?;

            let mut turns = Vec::with_capacity(reply.tool_calls.len() + 1);
            if reply.text.is_some() || reply.tool_calls.is_empty() {
                turns.push(ConversationTurn::utterance(
                    &self.name,
                    reply.text.unwrap_or_default(),
                ));
            }
            for call in reply.tool_calls {
                let mut request = ToolCallRequest::new(call.name, call.arguments);
                if let Some(id) = call.id {
                    request.id = id;
                }
                turns.push(ConversationTurn::tool_call(&self.name, request));
            }

            debug!(
                thread_id = %thread_id,
                node = %self.name,
                turns = turns.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Agent replied"
            );
            Ok(StateUpdate::new().with_turns(turns))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metamorphosis_core::types::ModelReply;
    use metamorphosis_test_utils::{FnTool, ScriptedModel};

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(FnTool::fixed("extract_achievements", serde_json::json!({})));
        Arc::new(registry)
    }

    fn agent(model: Arc<ScriptedModel>) -> AgentNode {
        AgentNode::new("achievements_extractor", model, registry(), TextField::OriginalText)
            .with_tools(["extract_achievements"])
            .with_instruction("Extract achievements. Call the tool if needed.")
    }

    #[tokio::test]
    async fn test_agent_records_tool_call() {
        let model = Arc::new(ScriptedModel::new([ModelReply::tool_call(
            "extract_achievements",
            serde_json::json!({"text": "Shipped X"}),
        )]));
        let update = agent(model.clone())
            .run(ThreadId::from_str("t"), Arc::new(WorkflowState::seed("Shipped X")))
            .await
            .unwrap();

        assert_eq!(update.conversation_log.len(), 1);
        match &update.conversation_log[0] {
            ConversationTurn::ToolCall { origin, request } => {
                assert_eq!(origin, "achievements_extractor");
                assert_eq!(request.tool, "extract_achievements");
                assert!(request.id.starts_with("call_"));
            }
            other => panic!("unexpected turn: {other:?}"),
        }

        let sent = &model.requests()[0];
        assert_eq!(sent.input, "Shipped X");
        assert_eq!(sent.tools.len(), 1);
        assert_eq!(sent.tools[0].name, "extract_achievements");
    }

    #[tokio::test]
    async fn test_agent_keeps_provider_call_id_and_text() {
        let mut reply = ModelReply::tool_call("extract_achievements", serde_json::json!({}));
        reply.text = Some("Calling the extractor.".into());
        reply.tool_calls[0].id = Some("call_abc".into());
        let model = Arc::new(ScriptedModel::new([reply]));

        let update = agent(model)
            .run(ThreadId::from_str("t"), Arc::new(WorkflowState::seed("x")))
            .await
            .unwrap();
        assert_eq!(update.conversation_log.len(), 2);
        assert!(matches!(&update.conversation_log[0], ConversationTurn::Utterance { text, .. } if text == "Calling the extractor."));
        assert!(matches!(&update.conversation_log[1], ConversationTurn::ToolCall { request, .. } if request.id == "call_abc"));
    }

    #[tokio::test]
    async fn test_empty_reply_is_recorded_as_blank_utterance() {
        let model = Arc::new(ScriptedModel::new([ModelReply::default()]));
        let update = agent(model)
            .run(ThreadId::from_str("t"), Arc::new(WorkflowState::seed("x")))
            .await
            .unwrap();
        assert_eq!(
            update.conversation_log,
            vec![ConversationTurn::utterance("achievements_extractor", "")]
        );
    }

    #[tokio::test]
    async fn test_model_error_propagates() {
        let model = Arc::new(ScriptedModel::new([]));
        let err = agent(model)
            .run(ThreadId::from_str("t"), Arc::new(WorkflowState::seed("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphosisError::ModelRequest(_)));
    }
}
