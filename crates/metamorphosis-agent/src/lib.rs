pub mod checkpoint;
pub mod graph;
pub mod nodes;
pub mod review;
pub mod router;
pub mod runs;

pub use checkpoint::{open_store, MemoryCheckpointStore, SqliteCheckpointStore};
pub use graph::{
    Edge, ExecutionEngine, Graph, GraphBuilder, Node, NodeKind, RouteTarget, Router, RunHandle,
    RunOutcome, Transition,
};
pub use nodes::{AgentNode, ParseNode, ParseTarget, ToolExecutionNode, TransformNode};
pub use review::self_review_graph;
pub use router::{AgentTurnRouter, ContinueReviewRouter};
pub use runs::{RunGuard, RunRegistry};
