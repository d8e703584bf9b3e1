pub mod copy_edit;
pub mod evaluate_review;
pub mod extract_achievements;
pub mod summarize;
pub mod word_cloud;

use std::sync::Arc;

use serde::Deserialize;

use metamorphosis_core::config::WordCloudConfig;
use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::ModelInvoker;
use metamorphosis_core::types::ModelRequest;

use crate::registry::ToolRegistry;

/// Payload accepted by every built-in review tool.
#[derive(Deserialize)]
struct TextInput {
    text: String,
}

/// Validate a `{"text": "..."}` payload.
pub(crate) fn parse_text_input(payload: serde_json::Value) -> Result<String> {
    let input: TextInput = serde_json::from_value(payload)
        .map_err(|e| MetamorphosisError::ToolValidation(e.to_string()))?;
    if input.text.trim().is_empty() {
        return Err(MetamorphosisError::ToolValidation(
            "text must not be empty".to_string(),
        ));
    }
    Ok(input.text)
}

/// Ask the model for a JSON object and parse it out of the reply text.
pub(crate) async fn ask_json(
    model: &dyn ModelInvoker,
    tool: &str,
    system: &str,
    text: &str,
) -> Result<serde_json::Value> {
    let reply = model
        .invoke(ModelRequest {
            system: system.to_string(),
            history: vec![],
            instruction: "Respond with a single JSON object only.".to_string(),
            input: text.to_string(),
            tools: vec![],
        })
        .await
        .map_err(|e| MetamorphosisError::ToolExecution {
            tool: tool.to_string(),
            message: e.to_string(),
        })?;

    let body = reply.text.unwrap_or_default();
    extract_json(&body).ok_or_else(|| MetamorphosisError::ToolExecution {
        tool: tool.to_string(),
        message: format!("model reply is not JSON: {}", truncate(&body, 120)),
    })
}

/// Parse JSON from a reply that may be wrapped in a markdown fence or prose.
pub(crate) fn extract_json(body: &str) -> Option<serde_json::Value> {
    let trimmed = body.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Rough token estimate used for the `size` fields.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() * 4).div_ceil(3)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Register the five review tools.
///
/// The four text tools are backed by `model`. If the word-cloud output
/// directory cannot be created, `word_cloud` is left unregistered and
/// declared late-bound so the visualization branch fails at run time
/// instead of the graph failing to build.
pub fn register_review_tools(
    registry: &mut ToolRegistry,
    model: Arc<dyn ModelInvoker>,
    word_cloud: &WordCloudConfig,
) {
    registry.register(copy_edit::CopyEditTool::new(model.clone()));
    registry.register(summarize::SummarizeTool::new(model.clone()));
    registry.register(extract_achievements::ExtractAchievementsTool::new(model.clone()));
    registry.register(evaluate_review::EvaluateReviewTool::new(model));

    match word_cloud::WordCloudTool::from_config(word_cloud) {
        Ok(tool) => registry.register(tool),
        Err(e) => {
            tracing::warn!(error = %e, "Word cloud output unavailable, tool left late-bound");
            registry.declare_late_bound(word_cloud::NAME);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_input() {
        assert_eq!(
            parse_text_input(serde_json::json!({"text": "hello"})).unwrap(),
            "hello"
        );
        assert!(matches!(
            parse_text_input(serde_json::json!({"body": "hello"})),
            Err(MetamorphosisError::ToolValidation(_))
        ));
        assert!(matches!(
            parse_text_input(serde_json::json!({"text": "   "})),
            Err(MetamorphosisError::ToolValidation(_))
        ));
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(
            extract_json(r#"{"a": 1}"#),
            Some(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            extract_json("```json\n{\"a\": 2}\n```"),
            Some(serde_json::json!({"a": 2}))
        );
        assert_eq!(
            extract_json("Here you go: {\"a\": 3} thanks"),
            Some(serde_json::json!({"a": 3}))
        );
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three"), 4);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
