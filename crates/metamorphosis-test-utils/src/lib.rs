//! Fakes for the engine's external collaborators.
//!
//! Every fake is constructed explicitly and handed to the code under test,
//! so tests can substitute behavior per run.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::event::WorkflowEvent;
use metamorphosis_core::traits::{EventSink, ModelInvoker, Tool};
use metamorphosis_core::types::{ModelReply, ModelRequest, ProposedToolCall};

type ToolFn = dyn Fn(serde_json::Value) -> Result<serde_json::Value> + Send + Sync;

/// A tool whose behavior is a closure over the payload.
pub struct FnTool {
    name: String,
    f: Arc<ToolFn>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
}

impl FnTool {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(serde_json::Value) -> Result<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
            delay: None,
            timeout: None,
        }
    }

    /// A tool that always answers `response`.
    pub fn fixed(name: impl Into<String>, response: serde_json::Value) -> Self {
        Self::new(name, move |_| Ok(response.clone()))
    }

    /// A tool that always fails with `ToolExecution`.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        let tool = name.clone();
        Self::new(name, move |_| {
            Err(MetamorphosisError::ToolExecution {
                tool: tool.clone(),
                message: message.clone(),
            })
        })
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Override the dispatcher's time budget for this tool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    fn invoke(&self, payload: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.f)(payload)
        })
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A model that replays canned replies in order.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ModelInvoker for ScriptedModel {
    fn invoke(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelReply>> {
        Box::pin(async move {
            if let Ok(mut seen) = self.requests.lock() {
                seen.push(request);
            }
            self.replies
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .ok_or_else(|| MetamorphosisError::ModelRequest("script exhausted".into()))
        })
    }
}

/// A model that always calls the first tool it is offered with `{"text": input}`,
/// and answers plain text when offered none. Call ids are derived from the
/// tool name, so repeated runs produce identical conversation logs.
pub struct ToolCallingModel;

impl ModelInvoker for ToolCallingModel {
    fn invoke(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelReply>> {
        Box::pin(async move {
            Ok(match request.tools.first() {
                Some(def) => ModelReply {
                    text: None,
                    tool_calls: vec![ProposedToolCall {
                        id: Some(format!("call_{}", def.name)),
                        name: def.name.clone(),
                        arguments: serde_json::json!({ "text": request.input }),
                    }],
                },
                None => ModelReply::text(request.input),
            })
        })
    }
}

/// Sink that records every event.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: WorkflowEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// An `extract_achievements` result for "Shipped X, cut latency 50%."
pub fn sample_achievements() -> serde_json::Value {
    serde_json::json!({
        "items": [{
            "title": "Shipped X",
            "outcome": "Shipped X and cut latency by 50%",
            "impact_area": "performance",
            "metric_strings": ["50%"],
            "timeframe": null,
            "ownership_scope": "IC",
            "collaborators": []
        }],
        "size": 9,
        "unit": "tokens"
    })
}

/// An `evaluate_review_text` result with six metrics.
pub fn sample_scorecard() -> serde_json::Value {
    let names = [
        "OutcomeOverActivity",
        "QuantitativeSpecificity",
        "ClarityCoherence",
        "Conciseness",
        "OwnershipLeadership",
        "Collaboration",
    ];
    let scores = [80, 85, 70, 90, 60, 40];
    let metrics: Vec<serde_json::Value> = names
        .iter()
        .zip(scores)
        .map(|(name, score)| {
            serde_json::json!({
                "name": name,
                "score": score,
                "rationale": "Cites a concrete outcome.",
                "suggestion": "Add scope."
            })
        })
        .collect();
    serde_json::json!({
        "metrics": metrics,
        "overall": 71,
        "verdict": "strong",
        "notes": [],
        "radar_labels": names,
        "radar_values": scores
    })
}
