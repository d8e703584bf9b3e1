use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an isolated execution session.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request from an agent stage to run a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id, echoed by the matching [`ToolResult`].
    pub id: String,
    pub tool: String,
    pub payload: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(tool: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            tool: tool.into(),
            payload,
        }
    }
}

/// Typed failure of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolFailure {
    #[error("tool '{tool}' is not registered")]
    NotFound { tool: String },
    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
    #[error("tool '{tool}' rejected payload: {message}")]
    InvalidPayload { tool: String, message: String },
    #[error("tool '{tool}' failed: {message}")]
    RemoteFailure { tool: String, message: String },
}

impl ToolFailure {
    pub fn tool(&self) -> &str {
        match self {
            Self::NotFound { tool }
            | Self::Timeout { tool, .. }
            | Self::InvalidPayload { tool, .. }
            | Self::RemoteFailure { tool, .. } => tool,
        }
    }
}

/// Outcome half of a [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: serde_json::Value },
    Failure { failure: ToolFailure },
}

/// Result of a tool invocation, correlated to its request by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub tool: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(request: &ToolCallRequest, payload: serde_json::Value) -> Self {
        Self {
            id: request.id.clone(),
            tool: request.tool.clone(),
            outcome: ToolOutcome::Success { payload },
        }
    }

    pub fn failure(request: &ToolCallRequest, failure: ToolFailure) -> Self {
        Self {
            id: request.id.clone(),
            tool: request.tool.clone(),
            outcome: ToolOutcome::Failure { failure },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure { .. })
    }
}

/// One entry of the append-only conversation log.
///
/// `origin` is the name of the node that produced the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationTurn {
    Utterance { origin: String, text: String },
    ToolCall { origin: String, request: ToolCallRequest },
    ToolResult { origin: String, result: ToolResult },
}

impl ConversationTurn {
    pub fn utterance(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Utterance {
            origin: origin.into(),
            text: text.into(),
        }
    }

    pub fn tool_call(origin: impl Into<String>, request: ToolCallRequest) -> Self {
        Self::ToolCall {
            origin: origin.into(),
            request,
        }
    }

    pub fn tool_result(origin: impl Into<String>, result: ToolResult) -> Self {
        Self::ToolResult {
            origin: origin.into(),
            result,
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Self::Utterance { origin, .. }
            | Self::ToolCall { origin, .. }
            | Self::ToolResult { origin, .. } => origin,
        }
    }
}

/// Tool definition for sending to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A single request to the model invoker. Prompts are opaque to the engine.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: String,
    pub history: Vec<ConversationTurn>,
    /// What the model is asked to do with `input`.
    pub instruction: String,
    /// The text under review.
    pub input: String,
    pub tools: Vec<ToolDefinition>,
}

impl ModelRequest {
    /// The user message a chat provider sends: instruction, then the input.
    pub fn user_message(&self) -> String {
        if self.instruction.is_empty() {
            self.input.clone()
        } else {
            format!("{}\n\n{}", self.instruction, self.input)
        }
    }
}

/// A tool call proposed by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedToolCall {
    /// Provider-assigned id, when the provider supplies one.
    pub id: Option<String>,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// What the model answered: text, tool calls, or (malformed) neither.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ProposedToolCall>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: vec![],
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            text: None,
            tool_calls: vec![ProposedToolCall {
                id: None,
                name: name.into(),
                arguments,
            }],
        }
    }
}

// ---------- Achievements ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactArea {
    Reliability,
    Performance,
    Security,
    Cost,
    Revenue,
    Customer,
    DeliverySpeed,
    Quality,
    Compliance,
    Team,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnershipScope {
    #[serde(rename = "IC")]
    Ic,
    TechLead,
    Manager,
    #[serde(rename = "Cross-team")]
    CrossTeam,
    #[serde(rename = "Org-wide")]
    OrgWide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub title: String,
    pub outcome: String,
    pub impact_area: ImpactArea,
    /// Numbers and units copied verbatim from the review.
    #[serde(default)]
    pub metric_strings: Vec<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub ownership_scope: Option<OwnershipScope>,
    #[serde(default)]
    pub collaborators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementsList {
    pub items: Vec<Achievement>,
    /// Token estimate of concatenated titles and outcomes.
    #[serde(default)]
    pub size: usize,
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_unit() -> String {
    "tokens".to_string()
}

// ---------- Review scorecard ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricName {
    OutcomeOverActivity,
    QuantitativeSpecificity,
    ClarityCoherence,
    Conciseness,
    OwnershipLeadership,
    Collaboration,
}

impl MetricName {
    pub const ALL: [MetricName; 6] = [
        MetricName::OutcomeOverActivity,
        MetricName::QuantitativeSpecificity,
        MetricName::ClarityCoherence,
        MetricName::Conciseness,
        MetricName::OwnershipLeadership,
        MetricName::Collaboration,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub name: MetricName,
    pub score: u8,
    pub rationale: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Excellent,
    Strong,
    Mixed,
    Weak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub metrics: Vec<MetricScore>,
    pub overall: u8,
    pub verdict: Verdict,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub radar_labels: Vec<String>,
    #[serde(default)]
    pub radar_values: Vec<u8>,
}

impl Scorecard {
    /// Check score ranges; returns a description of the first violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.overall > 100 {
            return Err(format!("overall score {} exceeds 100", self.overall));
        }
        if let Some(m) = self.metrics.iter().find(|m| m.score > 100) {
            return Err(format!("metric {:?} score {} exceeds 100", m.name, m.score));
        }
        if let Some(v) = self.radar_values.iter().find(|v| **v > 100) {
            return Err(format!("radar value {} exceeds 100", v));
        }
        Ok(())
    }
}

// ---------- Run reporting ----------

/// A branch-level failure reported by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub thread_id: ThreadId,
    pub node: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every reachable branch reached a terminal node.
    Completed,
    /// At least one branch stopped on a failure; the others completed.
    Degraded,
}
