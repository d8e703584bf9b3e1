use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::{ModelInvoker, Tool};

use super::{ask_json, estimate_tokens, parse_text_input};

pub const NAME: &str = "abstractive_summarize";

const SYSTEM_PROMPT: &str = "Write a short abstractive summary of the employee self-review, \
focused on outcomes. Return {\"summarized_text\": string}.";

pub struct SummarizeTool {
    model: Arc<dyn ModelInvoker>,
}

impl SummarizeTool {
    pub fn new(model: Arc<dyn ModelInvoker>) -> Self {
        Self { model }
    }
}

impl Tool for SummarizeTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Produce an abstractive summary of a self-review."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Review text to summarize" }
            },
            "required": ["text"]
        })
    }

    fn invoke(&self, payload: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let text = parse_text_input(payload)?;
            debug!(len = text.len(), "Summarizing text");

            let reply = ask_json(&*self.model, NAME, SYSTEM_PROMPT, &text).await?;
            let summary = reply
                .get("summarized_text")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| MetamorphosisError::ToolExecution {
                    tool: NAME.to_string(),
                    message: "reply has no summarized_text".to_string(),
                })?;

            Ok(serde_json::json!({
                "summarized_text": summary,
                "size": estimate_tokens(summary),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metamorphosis_core::types::ModelReply;
    use metamorphosis_test_utils::ScriptedModel;

    #[tokio::test]
    async fn test_summarize_accepts_fenced_reply() {
        let model = Arc::new(ScriptedModel::new([ModelReply::text(
            "```json\n{\"summarized_text\": \"Delivered X with faster responses.\"}\n```",
        )]));
        let out = SummarizeTool::new(model)
            .invoke(serde_json::json!({"text": "Shipped X, cut latency 50%."}))
            .await
            .unwrap();
        assert_eq!(out["summarized_text"], "Delivered X with faster responses.");
        assert_eq!(out["size"], 7);
    }

    #[tokio::test]
    async fn test_summarize_model_failure_is_execution_error() {
        let model = Arc::new(ScriptedModel::new([]));
        let err = SummarizeTool::new(model)
            .invoke(serde_json::json!({"text": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphosisError::ToolExecution { ref tool, .. } if tool == NAME));
    }
}
