use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use metamorphosis_core::config::ModelConfig;
use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::ModelInvoker;
use metamorphosis_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default endpoint for OpenAI-compatible providers.
fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "ollama" => "http://localhost:11434/v1/chat/completions",
        "groq" => "https://api.groq.com/openai/v1/chat/completions",
        "openrouter" => "https://openrouter.ai/api/v1/chat/completions",
        "together" => "https://api.together.xyz/v1/chat/completions",
        "mistral" => "https://api.mistral.ai/v1/chat/completions",
        _ => OPENAI_API_URL,
    }
}

/// OpenAI-compatible chat completions invoker. Works with OpenAI, Ollama, Groq, OpenRouter, etc.
pub struct OpenAiInvoker {
    http: Client,
    config: ModelConfig,
}

impl OpenAiInvoker {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or_else(|| default_base_url(&self.config.provider))
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OaiMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "function_type")]
    r#type: String,
    function: OaiFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCall>,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Build the chat transcript: system, prior turns, then the user message.
/// Consecutive tool calls are folded into one assistant message.
pub(crate) fn convert_messages(request: &ModelRequest) -> Vec<OaiMessage> {
    let mut msgs = Vec::with_capacity(request.history.len() + 2);
    if !request.system.is_empty() {
        msgs.push(OaiMessage::text("system", request.system.clone()));
    }

    for turn in &request.history {
        match turn {
            ConversationTurn::Utterance { text, .. } => {
                msgs.push(OaiMessage::text("assistant", text.clone()));
            }
            ConversationTurn::ToolCall { request: call, .. } => {
                let oai_call = OaiToolCall {
                    id: Some(call.id.clone()),
                    r#type: function_type(),
                    function: OaiFunction {
                        name: call.tool.clone(),
                        arguments: call.payload.to_string(),
                    },
                };
                match msgs.last_mut() {
                    Some(OaiMessage {
                        tool_calls: Some(calls),
                        ..
                    }) => calls.push(oai_call),
                    _ => msgs.push(OaiMessage {
                        role: "assistant".to_string(),
                        content: None,
                        tool_calls: Some(vec![oai_call]),
                        tool_call_id: None,
                    }),
                }
            }
            ConversationTurn::ToolResult { result, .. } => {
                let content = match &result.outcome {
                    ToolOutcome::Success { payload } => match payload {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                    ToolOutcome::Failure { failure } => format!("Error: {}", failure),
                };
                msgs.push(OaiMessage {
                    role: "tool".to_string(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: Some(result.id.clone()),
                });
            }
        }
    }
    msgs.push(OaiMessage::text("user", request.user_message()));
    msgs
}

/// Turn a chat completion body into a [`ModelReply`].
///
/// Arguments that are not valid JSON are passed through as a string so the
/// tool rejects them, rather than failing the model call.
pub(crate) fn parse_response(body: &str) -> Result<ModelReply> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| MetamorphosisError::ModelParse(e.to_string()))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| MetamorphosisError::ModelParse("response has no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ProposedToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: serde_json::from_str(&tc.function.arguments)
                .unwrap_or(serde_json::Value::String(tc.function.arguments)),
        })
        .collect();

    Ok(ModelReply {
        text: choice.message.content.filter(|t| !t.is_empty()),
        tool_calls,
    })
}

impl ModelInvoker for OpenAiInvoker {
    fn invoke(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelReply>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: self.config.model_id.clone(),
                messages: convert_messages(&request),
                max_tokens: self.config.max_tokens,
                temperature: Some(self.config.temperature),
                tools: convert_tools(&request.tools),
            };

            let mut req = self.http.post(self.endpoint()).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            debug!(
                model = %self.config.model_id,
                messages = body.messages.len(),
                tools = body.tools.len(),
                "Sending chat completion"
            );

            let response = req
                .send()
                .await
                .map_err(|e| MetamorphosisError::ModelRequest(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| MetamorphosisError::ModelRequest(e.to_string()))?;
            if !status.is_success() {
                return Err(MetamorphosisError::ModelRequest(format!(
                    "HTTP {}: {}",
                    status, text
                )));
            }

            parse_response(&text)
        })
    }
}
