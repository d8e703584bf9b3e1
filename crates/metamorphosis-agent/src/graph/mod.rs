//! Workflow graph and execution engine.
//!
//! A workflow is a directed graph of [`Node`]s. Each node has at most one
//! outgoing [`Edge`]: unconditional, conditional (chosen by a [`Router`]
//! over the post-merge state), or a fan-out whose targets run concurrently.
//! Nodes without an edge are terminal.
//!
//! The [`ExecutionEngine`] advances a frontier of active nodes in steps,
//! merging each node's update into the thread's [`WorkflowState`] and
//! checkpointing after every commit.
//!
//! [`WorkflowState`]: metamorphosis_core::state::WorkflowState

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;

pub use builder::{Graph, GraphBuilder};
pub use edge::{Edge, RouteTarget, Router, Transition};
pub use executor::{ExecutionEngine, RunHandle, RunOutcome};
pub use node::{Node, NodeKind};
