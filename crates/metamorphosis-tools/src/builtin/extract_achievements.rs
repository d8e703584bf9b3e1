use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::{ModelInvoker, Tool};
use metamorphosis_core::types::AchievementsList;

use super::{ask_json, estimate_tokens, parse_text_input};

pub const NAME: &str = "extract_achievements";

const SYSTEM_PROMPT: &str = "Extract concrete, outcome-focused achievements from the \
employee self-review. Only include what the text states. Copy numbers and units verbatim \
into metric_strings. impact_area is one of reliability, performance, security, cost, \
revenue, customer, delivery_speed, quality, compliance, team. ownership_scope is one of \
IC, TechLead, Manager, Cross-team, Org-wide, or null. Return {\"items\": [{\"title\", \
\"outcome\", \"impact_area\", \"metric_strings\", \"timeframe\", \"ownership_scope\", \
\"collaborators\"}]}.";

/// Structured achievement extraction.
///
/// The returned `size` is recomputed locally from titles and outcomes,
/// whatever the model put there.
pub struct ExtractAchievementsTool {
    model: Arc<dyn ModelInvoker>,
}

impl ExtractAchievementsTool {
    pub fn new(model: Arc<dyn ModelInvoker>) -> Self {
        Self { model }
    }
}

impl Tool for ExtractAchievementsTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Extract key achievements from a self-review as structured records."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Review text to mine for achievements" }
            },
            "required": ["text"]
        })
    }

    fn invoke(&self, payload: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let text = parse_text_input(payload)?;

            let reply = ask_json(&*self.model, NAME, SYSTEM_PROMPT, &text).await?;
            let mut list: AchievementsList =
                serde_json::from_value(reply).map_err(|e| MetamorphosisError::ToolExecution {
                    tool: NAME.to_string(),
                    message: format!("malformed achievements: {}", e),
                })?;

            let joined: Vec<String> = list
                .items
                .iter()
                .map(|a| format!("{} {}", a.title, a.outcome))
                .collect();
            list.size = estimate_tokens(&joined.join(" "));
            list.unit = "tokens".to_string();
            debug!(count = list.items.len(), "Extracted achievements");

            Ok(serde_json::to_value(list)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metamorphosis_core::types::{ImpactArea, ModelReply};
    use metamorphosis_test_utils::ScriptedModel;

    #[tokio::test]
    async fn test_extract_recomputes_size() {
        let reply = serde_json::json!({
            "items": [{
                "title": "Shipped X",
                "outcome": "Cut latency 50%",
                "impact_area": "performance",
                "metric_strings": ["50%"],
                "ownership_scope": "IC"
            }],
            "size": 999
        });
        let model = Arc::new(ScriptedModel::new([ModelReply::text(reply.to_string())]));
        let out = ExtractAchievementsTool::new(model)
            .invoke(serde_json::json!({"text": "Shipped X, cut latency 50%."}))
            .await
            .unwrap();

        let list: AchievementsList = serde_json::from_value(out).unwrap();
        assert_eq!(list.items[0].impact_area, ImpactArea::Performance);
        assert_eq!(list.items[0].metric_strings, vec!["50%"]);
        // "Shipped X Cut latency 50%" is five words
        assert_eq!(list.size, 7);
        assert_eq!(list.unit, "tokens");
    }

    #[tokio::test]
    async fn test_extract_rejects_unknown_impact_area() {
        let reply = serde_json::json!({
            "items": [{ "title": "t", "outcome": "o", "impact_area": "vibes" }]
        });
        let model = Arc::new(ScriptedModel::new([ModelReply::text(reply.to_string())]));
        let err = ExtractAchievementsTool::new(model)
            .invoke(serde_json::json!({"text": "t"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed achievements"));
    }
}
