//! Node implementations used by the self-review workflow.

pub mod agent;
pub mod parse;
pub mod tool_exec;
pub mod transform;

pub use agent::AgentNode;
pub use parse::{ParseNode, ParseTarget};
pub use tool_exec::ToolExecutionNode;
pub use transform::TransformNode;
