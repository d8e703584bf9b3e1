use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::WorkflowState;
use crate::types::{NodeFailure, ThreadId};

/// The last committed state of a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub state: WorkflowState,
    /// The node whose commit produced this checkpoint (`__start__` for the seed).
    pub last_completed_node: String,
    /// Nodes still to run when this checkpoint was taken. Empty once the run finished.
    #[serde(default)]
    pub frontier: Vec<String>,
    /// Branch failures recorded so far.
    #[serde(default)]
    pub failures: Vec<NodeFailure>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        thread_id: ThreadId,
        state: WorkflowState,
        last_completed_node: impl Into<String>,
        frontier: Vec<String>,
    ) -> Self {
        Self {
            thread_id,
            state,
            last_completed_node: last_completed_node.into(),
            frontier,
            failures: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_failures(mut self, failures: Vec<NodeFailure>) -> Self {
        self.failures = failures;
        self
    }

    /// Whether the run that wrote this checkpoint had nothing left to do.
    pub fn is_finished(&self) -> bool {
        self.frontier.is_empty()
    }
}
