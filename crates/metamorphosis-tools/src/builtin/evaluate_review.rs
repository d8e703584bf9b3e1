use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::{ModelInvoker, Tool};
use metamorphosis_core::types::Scorecard;

use super::{ask_json, parse_text_input};

pub const NAME: &str = "evaluate_review_text";

const SYSTEM_PROMPT: &str = "Score the employee self-review from 0 to 100 on each of \
OutcomeOverActivity, QuantitativeSpecificity, ClarityCoherence, Conciseness, \
OwnershipLeadership and Collaboration, with a one-sentence rationale and suggestion each. \
Give an overall score and a verdict of excellent, strong, mixed or weak. Return \
{\"metrics\": [{\"name\", \"score\", \"rationale\", \"suggestion\"}], \"overall\", \
\"verdict\", \"notes\"}.";

pub struct EvaluateReviewTool {
    model: Arc<dyn ModelInvoker>,
}

impl EvaluateReviewTool {
    pub fn new(model: Arc<dyn ModelInvoker>) -> Self {
        Self { model }
    }
}

impl Tool for EvaluateReviewTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Score a self-review against six writing-quality metrics."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Review text to evaluate" }
            },
            "required": ["text"]
        })
    }

    fn invoke(&self, payload: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let text = parse_text_input(payload)?;

            let reply = ask_json(&*self.model, NAME, SYSTEM_PROMPT, &text).await?;
            let mut card: Scorecard =
                serde_json::from_value(reply).map_err(|e| MetamorphosisError::ToolExecution {
                    tool: NAME.to_string(),
                    message: format!("malformed scorecard: {}", e),
                })?;
            card.validate().map_err(|message| MetamorphosisError::ToolExecution {
                tool: NAME.to_string(),
                message,
            })?;

            // Radar data mirrors the metric list unless the model supplied a consistent pair.
            if card.radar_labels.is_empty() || card.radar_labels.len() != card.radar_values.len() {
                card.radar_labels = card.metrics.iter().map(|m| format!("{:?}", m.name)).collect();
                card.radar_values = card.metrics.iter().map(|m| m.score).collect();
            }
            debug!(overall = card.overall, verdict = ?card.verdict, "Review evaluated");

            Ok(serde_json::to_value(card)?)
        })
    }
}
