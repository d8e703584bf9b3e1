use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::Tool;
use metamorphosis_core::types::{ToolDefinition, ToolFailure};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Registry of available tools, and the dispatcher that invokes them.
///
/// Tools are looked up by name. A name declared late-bound may be missing
/// when the graph is built; invoking it while still missing yields
/// [`ToolFailure::NotFound`].
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    late_bound: BTreeSet<String>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            late_bound: BTreeSet::new(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the budget for tools that do not declare their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Allow `name` to be absent at graph-build time.
    pub fn declare_late_bound(&mut self, name: impl Into<String>) {
        self.late_bound.insert(name.into());
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Build-time check that a node may refer to `name`.
    pub fn ensure_resolvable(&self, name: &str) -> Result<()> {
        if self.tools.contains_key(name) || self.late_bound.contains(name) {
            Ok(())
        } else {
            Err(MetamorphosisError::ToolNotFound(name.to_string()))
        }
    }

    /// List all registered tools, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Definitions of the named tools, for sending to the model.
    /// Names that are not registered are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Invoke a tool by name within its time budget.
    pub async fn invoke(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolFailure> {
        let tool = self.get(name).ok_or_else(|| ToolFailure::NotFound {
            tool: name.to_string(),
        })?;

        let timeout = tool.timeout().unwrap_or(self.default_timeout);
        let start = Instant::now();

        let result = match tokio::time::timeout(timeout, tool.invoke(payload)).await {
            Ok(result) => result.map_err(|e| classify(name, e)),
            Err(_) => Err(ToolFailure::Timeout {
                tool: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(tool = name, elapsed_ms, "Tool invocation succeeded"),
            Err(failure) => warn!(tool = name, elapsed_ms, %failure, "Tool invocation failed"),
        }
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a tool's own error onto the typed failure recorded in the log.
fn classify(tool: &str, err: MetamorphosisError) -> ToolFailure {
    match err {
        MetamorphosisError::ToolValidation(message) => ToolFailure::InvalidPayload {
            tool: tool.to_string(),
            message,
        },
        MetamorphosisError::ToolNotFound(name) => ToolFailure::NotFound { tool: name },
        MetamorphosisError::ToolTimeout { timeout_ms, .. } => ToolFailure::Timeout {
            tool: tool.to_string(),
            timeout_ms,
        },
        MetamorphosisError::ToolExecution { message, .. } => ToolFailure::RemoteFailure {
            tool: tool.to_string(),
            message,
        },
        other => ToolFailure::RemoteFailure {
            tool: tool.to_string(),
            message: other.to_string(),
        },
    }
}
