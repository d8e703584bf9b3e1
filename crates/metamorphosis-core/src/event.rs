use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::state::{StateUpdate, WorkflowState};
use crate::traits::EventSink;
use crate::types::{RunStatus, ThreadId};

/// Event emitted by the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run started (or resumed) with the given frontier.
    RunStarted {
        thread_id: ThreadId,
        frontier: Vec<String>,
    },
    /// A node's update was merged and checkpointed.
    NodeCompleted {
        thread_id: ThreadId,
        node: String,
        update: StateUpdate,
        state: WorkflowState,
    },
    /// A node (or a failure route out of it) stopped its branch.
    NodeFailed {
        thread_id: ThreadId,
        node: String,
        error: String,
    },
    /// Every branch reached a terminal node or stopped on a failure.
    RunFinished {
        thread_id: ThreadId,
        status: RunStatus,
    },
    /// The run aborted: conflict, step limit, or cancellation.
    RunAborted { thread_id: ThreadId, error: String },
}

impl WorkflowEvent {
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Self::RunStarted { thread_id, .. }
            | Self::NodeCompleted { thread_id, .. }
            | Self::NodeFailed { thread_id, .. }
            | Self::RunFinished { thread_id, .. }
            | Self::RunAborted { thread_id, .. } => thread_id,
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: WorkflowEvent) {
        self.publish(event);
    }
}

impl EventSink for mpsc::UnboundedSender<WorkflowEvent> {
    fn emit(&self, event: WorkflowEvent) {
        // The receiver may have been dropped by a caller that stopped listening
        let _ = self.send(event);
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: WorkflowEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_fans_out_to_subscribers() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(WorkflowEvent::RunFinished {
            thread_id: ThreadId::from_str("t1"),
            status: RunStatus::Completed,
        });

        assert_eq!(a.recv().await.unwrap().thread_id().as_str(), "t1");
        assert_eq!(b.recv().await.unwrap().thread_id().as_str(), "t1");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(WorkflowEvent::RunAborted {
            thread_id: ThreadId::from_str("t1"),
            error: "cancelled".into(),
        });
    }

    #[test]
    fn test_event_json_shape() {
        let event = WorkflowEvent::NodeFailed {
            thread_id: ThreadId::from_str("t9"),
            node: "wordcloud".into(),
            error: "timeout".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_failed");
        assert_eq!(json["thread_id"], "t9");
        assert_eq!(json["node"], "wordcloud");
    }
}
