use thiserror::Error;

use crate::types::ToolFailure;

#[derive(Debug, Error)]
pub enum MetamorphosisError {
    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_ms}ms: {tool}")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    #[error("Node {node}: tool call failed: {failure}")]
    ToolFailed { node: String, failure: ToolFailure },

    // Model errors
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    #[error("Model response parse error: {0}")]
    ModelParse(String),

    // Workflow errors
    #[error("Field '{field}' already written by '{first_writer}', rejected write from '{second_writer}'")]
    Conflict {
        field: String,
        first_writer: String,
        second_writer: String,
    },

    #[error("Agent turn from '{node}' is neither a tool call nor a final answer")]
    MalformedAgentTurn { node: String },

    #[error("Node {node}: no result from tool '{tool}' in conversation log")]
    MissingExpectedResult { node: String, tool: String },

    #[error("Node {node}: required field '{field}' is not set")]
    MissingInput { node: String, field: String },

    #[error("Node {node}: invalid result: {message}")]
    InvalidResult { node: String, message: String },

    #[error("Run exceeded max steps ({0})")]
    StepLimitExceeded(usize),

    #[error("Thread already has a run in flight: {0}")]
    ThreadBusy(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run driver panicked: {0}")]
    RunPanicked(String),

    // Graph errors
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    // Checkpoint errors
    #[error("No checkpoint for thread: {0}")]
    CheckpointNotFound(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MetamorphosisError {
    /// Whether this error aborts the whole run rather than a single branch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::StepLimitExceeded(_)
                | Self::Cancelled
                | Self::RunPanicked(_)
                | Self::InvalidGraph(_)
                | Self::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MetamorphosisError>;
