use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::{ModelInvoker, Tool};

use super::{ask_json, estimate_tokens, parse_text_input};

pub const NAME: &str = "copy_edit";

const SYSTEM_PROMPT: &str = "You are a careful copy editor. Fix grammar, spelling and \
punctuation in the employee self-review without changing its meaning, tone or facts. \
Return {\"copy_edited_text\": string}.";

/// Grammar and clarity pass over the review text.
pub struct CopyEditTool {
    model: Arc<dyn ModelInvoker>,
}

impl CopyEditTool {
    pub fn new(model: Arc<dyn ModelInvoker>) -> Self {
        Self { model }
    }
}

impl Tool for CopyEditTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Correct grammar, spelling and punctuation in a self-review, preserving meaning."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Review text to copy-edit" }
            },
            "required": ["text"]
        })
    }

    fn invoke(&self, payload: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let text = parse_text_input(payload)?;
            debug!(len = text.len(), "Copy-editing text");

            let reply = ask_json(&*self.model, NAME, SYSTEM_PROMPT, &text).await?;
            let edited = reply
                .get("copy_edited_text")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| MetamorphosisError::ToolExecution {
                    tool: NAME.to_string(),
                    message: "reply has no copy_edited_text".to_string(),
                })?;

            Ok(serde_json::json!({
                "copy_edited_text": edited,
                "size": estimate_tokens(edited),
                "is_edited": edited != text,
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
    async fn test_copy_edit_reports_edit() {
        let model = Arc::new(ScriptedModel::new([ModelReply::text(
            r#"{"copy_edited_text": "Shipped X and cut latency by 50%."}"#,
        )]));
        let tool = CopyEditTool::new(model.clone());

        let out = tool
            .invoke(serde_json::json!({"text": "shipped X, cut latency 50%"}))
            .await
            .unwrap();
        assert_eq!(out["copy_edited_text"], "Shipped X and cut latency by 50%.");
        assert_eq!(out["is_edited"], true);
        assert_eq!(model.requests()[0].input, "shipped X, cut latency 50%");
    }

    #[tokio::test]
    async fn test_copy_edit_rejects_reply_without_text() {
        let model = Arc::new(ScriptedModel::new([ModelReply::text(r#"{"other": 1}"#)]));
        let tool = CopyEditTool::new(model);
        let err = tool
            .invoke(serde_json::json!({"text": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphosisError::ToolExecution { .. }));
    }
}
