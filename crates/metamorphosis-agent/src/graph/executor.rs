use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use metamorphosis_core::checkpoint::Checkpoint;
use metamorphosis_core::config::EngineConfig;
use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::event::WorkflowEvent;
use metamorphosis_core::state::{StateUpdate, WorkflowState, START};
use metamorphosis_core::traits::{CheckpointStore, EventSink};
use metamorphosis_core::types::{NodeFailure, RunStatus, ThreadId};

use super::builder::Graph;
use super::edge::Transition;
use crate::runs::RunRegistry;

/// Final result of a run that was not aborted.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub thread_id: ThreadId,
    pub state: WorkflowState,
    pub status: RunStatus,
    /// Branch failures, in the order they were recorded.
    pub failures: Vec<NodeFailure>,
}

/// A run executing in the background.
///
/// Drain `events` to observe each commit, then await [`RunHandle::outcome`].
pub struct RunHandle {
    pub thread_id: ThreadId,
    pub events: UnboundedReceiverStream<WorkflowEvent>,
    token: CancellationToken,
    task: JoinHandle<Result<RunOutcome>>,
}

impl RunHandle {
    /// Request cancellation. In-flight node tasks are aborted.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn outcome(self) -> Result<RunOutcome> {
        join_outcome(self.task.await)
    }
}

fn join_outcome(joined: std::result::Result<Result<RunOutcome>, JoinError>) -> Result<RunOutcome> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(MetamorphosisError::RunPanicked(e.to_string())),
        Err(_) => Err(MetamorphosisError::Cancelled),
    }
}

/// What a spawned node task hands back to the driver.
struct Finished {
    node: String,
    elapsed_ms: u64,
    result: Result<StateUpdate>,
}

/// Drives workflow runs over a fixed graph.
///
/// Each run belongs to one thread. The frontier advances in steps: every
/// node of a step runs concurrently against the state committed before the
/// step, and the driver merges their updates one at a time as they finish,
/// checkpointing after each. The next step is the union of the edges
/// resolved from this step's nodes.
#[derive(Clone)]
pub struct ExecutionEngine {
    graph: Arc<Graph>,
    store: Arc<dyn CheckpointStore>,
    runs: RunRegistry,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(graph: Graph, store: Arc<dyn CheckpointStore>, config: EngineConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            store,
            runs: RunRegistry::new(),
            config,
        }
    }

    /// Start a fresh run of `text` on `thread_id` and wait for it.
    ///
    /// Any checkpoint already stored for the thread is replaced.
    pub async fn run(
        &self,
        thread_id: ThreadId,
        text: impl Into<String>,
        sink: &dyn EventSink,
    ) -> Result<RunOutcome> {
        let guard = self.runs.register(&thread_id)?;
        self.start(&thread_id, guard.token(), text.into(), sink).await
    }

    /// Start a fresh run in the background, streaming its events.
    ///
    /// The thread is claimed before this returns, so a second run on the
    /// same thread fails with `ThreadBusy` immediately.
    pub fn stream(&self, thread_id: ThreadId, text: impl Into<String>) -> Result<RunHandle> {
        let guard = self.runs.register(&thread_id)?;
        let token = guard.token().clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = self.clone();
        let text = text.into();
        let id = thread_id.clone();

        let task = tokio::spawn(async move {
            let outcome = engine.start(&id, guard.token(), text, &tx).await;
            drop(guard);
            outcome
        });

        Ok(RunHandle {
            thread_id,
            events: UnboundedReceiverStream::new(rx),
            token,
            task,
        })
    }

    /// Continue a thread from its checkpoint.
    ///
    /// A thread whose last run finished is returned as stored.
    pub async fn resume(&self, thread_id: ThreadId, sink: &dyn EventSink) -> Result<RunOutcome> {
        let guard = self.runs.register(&thread_id)?;
        let checkpoint = self.store.get(&thread_id).await?;

        if checkpoint.is_finished() {
            debug!(thread_id = %thread_id, "Thread already finished, nothing to resume");
            let status = status_of(&checkpoint.failures);
            sink.emit(WorkflowEvent::RunFinished {
                thread_id: thread_id.clone(),
                status,
            });
            return Ok(RunOutcome {
                thread_id,
                state: checkpoint.state,
                status,
                failures: checkpoint.failures,
            });
        }

        info!(
            thread_id = %thread_id,
            last_completed = %checkpoint.last_completed_node,
            frontier = ?checkpoint.frontier,
            "Resuming run"
        );
        self.drive(
            &thread_id,
            guard.token(),
            Arc::new(checkpoint.state),
            checkpoint.frontier,
            checkpoint.failures,
            sink,
        )
        .await
    }

    /// Cancel the run in flight on `thread_id`. Returns false if there is none.
    pub fn cancel(&self, thread_id: &ThreadId) -> bool {
        let cancelled = self.runs.cancel(thread_id);
        if cancelled {
            info!(thread_id = %thread_id, "Run cancellation requested");
        }
        cancelled
    }

    pub fn is_running(&self, thread_id: &ThreadId) -> bool {
        self.runs.is_running(thread_id)
    }

    /// The last committed checkpoint of a thread.
    pub async fn checkpoint(&self, thread_id: &ThreadId) -> Result<Checkpoint> {
        self.store.get(thread_id).await
    }

    /// Threads with a stored checkpoint.
    pub async fn threads(&self) -> Result<Vec<ThreadId>> {
        self.store.threads().await
    }

    async fn start(
        &self,
        thread_id: &ThreadId,
        token: &CancellationToken,
        text: String,
        sink: &dyn EventSink,
    ) -> Result<RunOutcome> {
        let state = WorkflowState::seed(text);
        let frontier = vec![self.graph.entry().to_string()];
        self.store
            .put(Checkpoint::new(
                thread_id.clone(),
                state.clone(),
                START,
                frontier.clone(),
            ))
            .await?;

        self.drive(thread_id, token, Arc::new(state), frontier, Vec::new(), sink)
            .await
    }

    async fn drive(
        &self,
        thread_id: &ThreadId,
        token: &CancellationToken,
        mut state: Arc<WorkflowState>,
        mut frontier: Vec<String>,
        mut failures: Vec<NodeFailure>,
        sink: &dyn EventSink,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        info!(thread_id = %thread_id, frontier = ?frontier, "Run started");
        sink.emit(WorkflowEvent::RunStarted {
            thread_id: thread_id.clone(),
            frontier: frontier.clone(),
        });

        let mut steps = 0;
        while !frontier.is_empty() {
            steps += 1;
            if steps > self.config.max_steps {
                let err = MetamorphosisError::StepLimitExceeded(self.config.max_steps);
                return Err(self.abort(thread_id, sink, err));
            }
            if token.is_cancelled() {
                return Err(self.abort(thread_id, sink, MetamorphosisError::Cancelled));
            }

            debug!(thread_id = %thread_id, step = steps, nodes = ?frontier, "Step started");
            let mut tasks = JoinSet::new();
            for name in &frontier {
                let Some(node) = self.graph.node(name) else {
                    let err = MetamorphosisError::InvalidGraph(format!(
                        "node '{}' is not part of the graph",
                        name
                    ));
                    return Err(self.abort(thread_id, sink, err));
                };
                let node_state = state.clone();
                let id = thread_id.clone();
                let name = name.clone();
                tasks.spawn(async move {
                    let start = Instant::now();
                    let result = AssertUnwindSafe(node.run(id, node_state))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(MetamorphosisError::InvalidResult {
                                node: name.clone(),
                                message: "node panicked".into(),
                            })
                        });
                    Finished {
                        node: name,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        result,
                    }
                });
            }

            let mut pending = frontier.clone();
            let mut next: Vec<String> = Vec::new();
            loop {
                let joined = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tasks.abort_all();
                        return Err(self.abort(thread_id, sink, MetamorphosisError::Cancelled));
                    }
                    joined = tasks.join_next() => joined,
                };
                let finished = match joined {
                    None => break,
                    Some(Ok(finished)) => finished,
                    // Node tasks are only aborted above, so this is runtime shutdown
                    Some(Err(_)) => {
                        return Err(self.abort(thread_id, sink, MetamorphosisError::Cancelled))
                    }
                };
                let Finished {
                    node,
                    elapsed_ms,
                    result,
                } = finished;
                pending.retain(|n| *n != node);

                match result {
                    Ok(update) => {
                        state = match state.merge(&update, &node) {
                            Ok(merged) => Arc::new(merged),
                            Err(e) => {
                                tasks.abort_all();
                                return Err(self.abort(thread_id, sink, e));
                            }
                        };

                        let mut routed_to_failure = false;
                        match self.graph.edge(&node).map(|edge| edge.resolve(&state)) {
                            Some(Transition::Next(targets)) => {
                                debug!(thread_id = %thread_id, node = %node, next = ?targets, "Routed");
                                for target in targets {
                                    if !next.contains(&target) {
                                        next.push(target);
                                    }
                                }
                            }
                            Some(Transition::Fail) => routed_to_failure = true,
                            Some(Transition::End) | None => {}
                        }

                        let failure = routed_to_failure.then(|| {
                            MetamorphosisError::MalformedAgentTurn { node: node.clone() }
                        });
                        if let Some(err) = &failure {
                            failures.push(self.failure(thread_id, &node, err));
                        }

                        if let Err(e) = self
                            .commit(thread_id, &state, &node, &pending, &next, &failures)
                            .await
                        {
                            tasks.abort_all();
                            return Err(self.abort(thread_id, sink, e));
                        }

                        info!(
                            thread_id = %thread_id,
                            node = %node,
                            fields = ?update.fields(),
                            elapsed_ms,
                            "Node committed"
                        );
                        sink.emit(WorkflowEvent::NodeCompleted {
                            thread_id: thread_id.clone(),
                            node: node.clone(),
                            update,
                            state: (*state).clone(),
                        });
                        if let Some(err) = failure {
                            sink.emit(WorkflowEvent::NodeFailed {
                                thread_id: thread_id.clone(),
                                node,
                                error: err.to_string(),
                            });
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        tasks.abort_all();
                        return Err(self.abort(thread_id, sink, e));
                    }
                    Err(e) => {
                        failures.push(self.failure(thread_id, &node, &e));
                        if let Err(e) = self
                            .commit(thread_id, &state, &node, &pending, &next, &failures)
                            .await
                        {
                            tasks.abort_all();
                            return Err(self.abort(thread_id, sink, e));
                        }
                        sink.emit(WorkflowEvent::NodeFailed {
                            thread_id: thread_id.clone(),
                            node,
                            error: e.to_string(),
                        });
                    }
                }
            }

            frontier = next;
        }

        let status = status_of(&failures);
        info!(
            thread_id = %thread_id,
            status = ?status,
            steps,
            failures = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );
        sink.emit(WorkflowEvent::RunFinished {
            thread_id: thread_id.clone(),
            status,
        });

        Ok(RunOutcome {
            thread_id: thread_id.clone(),
            state: Arc::try_unwrap(state).unwrap_or_else(|shared| (*shared).clone()),
            status,
            failures,
        })
    }

    /// Persist the state after `node`. The stored frontier is what is left
    /// of the current step followed by what the step has scheduled so far.
    async fn commit(
        &self,
        thread_id: &ThreadId,
        state: &WorkflowState,
        node: &str,
        pending: &[String],
        next: &[String],
        failures: &[NodeFailure],
    ) -> Result<()> {
        let mut frontier = pending.to_vec();
        frontier.extend(next.iter().filter(|n| !pending.contains(n)).cloned());
        self.store
            .put(
                Checkpoint::new(thread_id.clone(), state.clone(), node, frontier)
                    .with_failures(failures.to_vec()),
            )
            .await?;
        debug!(thread_id = %thread_id, node = %node, "Checkpoint written");
        Ok(())
    }

    fn failure(&self, thread_id: &ThreadId, node: &str, err: &MetamorphosisError) -> NodeFailure {
        warn!(thread_id = %thread_id, node = %node, error = %err, "Branch stopped");
        NodeFailure {
            thread_id: thread_id.clone(),
            node: node.to_string(),
            error: err.to_string(),
        }
    }

    fn abort(
        &self,
        thread_id: &ThreadId,
        sink: &dyn EventSink,
        err: MetamorphosisError,
    ) -> MetamorphosisError {
        error!(thread_id = %thread_id, error = %err, "Run aborted");
        sink.emit(WorkflowEvent::RunAborted {
            thread_id: thread_id.clone(),
            error: err.to_string(),
        });
        err
    }
}

fn status_of(failures: &[NodeFailure]) -> RunStatus {
    if failures.is_empty() {
        RunStatus::Completed
    } else {
        RunStatus::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::graph::{Edge, Node, NodeKind, RouteTarget, Router};
    use futures::future::BoxFuture;
    use futures::StreamExt;
    use metamorphosis_core::state::{Field, TextField};
    use metamorphosis_core::types::ConversationTurn;
    use metamorphosis_test_utils::CollectingSink;
    use metamorphosis_tools::ToolRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behavior {
        Write,
        Fail,
        Panic,
    }

    struct Stub {
        name: &'static str,
        outputs: Vec<Field>,
        update: StateUpdate,
        behavior: Behavior,
        /// Sleep on the first call only.
        first_delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
    }

    impl Stub {
        fn writes(name: &'static str, field: TextField, value: &str) -> Self {
            Self {
                name,
                outputs: vec![field.field()],
                update: StateUpdate::new().with_text(field, value),
                behavior: Behavior::Write,
                first_delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn logs(name: &'static str) -> Self {
            Self {
                name,
                outputs: vec![Field::ConversationLog],
                update: StateUpdate::new().with_turns([ConversationTurn::utterance(name, "tick")]),
                behavior: Behavior::Write,
                first_delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn behaving(mut self, behavior: Behavior) -> Self {
            self.behavior = behavior;
            self
        }

        fn slow_first(mut self, delay: Duration) -> Self {
            self.first_delay = Some(delay);
            self
        }
    }

    impl Node for Stub {
        fn name(&self) -> &str {
            self.name
        }
        fn kind(&self) -> NodeKind {
            NodeKind::Transform
        }
        fn outputs(&self) -> &[Field] {
            &self.outputs
        }
        fn run(
            &self,
            _thread_id: ThreadId,
            _state: Arc<WorkflowState>,
        ) -> BoxFuture<'_, Result<StateUpdate>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if let (0, Some(delay)) = (call, self.first_delay) {
                    tokio::time::sleep(delay).await;
                }
                match self.behavior {
                    Behavior::Write => Ok(self.update.clone()),
                    Behavior::Fail => Err(MetamorphosisError::InvalidResult {
                        node: self.name.to_string(),
                        message: "bad output".into(),
                    }),
                    Behavior::Panic => panic!("stub exploded"),
                }
            })
        }
    }

    struct AlwaysBad;

    impl Router for AlwaysBad {
        fn name(&self) -> &str {
            "always_bad"
        }
        fn labels(&self) -> &'static [&'static str] {
            &["bad"]
        }
        fn decide(&self, _state: &WorkflowState) -> &'static str {
            "bad"
        }
    }

    fn engine(graph: Graph) -> ExecutionEngine {
        ExecutionEngine::new(
            graph,
            Arc::new(MemoryCheckpointStore::new()),
            EngineConfig::default(),
        )
    }

    /// root -> {left, right}; left -> leaf
    fn diamond(right: Stub) -> Graph {
        Graph::builder("root")
            .node(Stub::writes("root", TextField::RewrittenText, "clean"))
            .node(Stub::writes("left", TextField::SummaryText, "short"))
            .node(right)
            .node(Stub::logs("leaf"))
            .edge("root", Edge::fan_out(["left", "right"]))
            .edge("left", Edge::to("leaf"))
            .build(&ToolRegistry::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_fan_out_run_completes() {
        let engine = engine(diamond(Stub::writes(
            "right",
            TextField::VisualizationRef,
            "cloud.svg",
        )));
        let sink = CollectingSink::new();
        let thread = ThreadId::from_str("t1");

        let outcome = engine.run(thread.clone(), "raw", &sink).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.state.rewritten_text(), Some("clean"));
        assert_eq!(outcome.state.summary_text(), Some("short"));
        assert_eq!(outcome.state.visualization_ref(), Some("cloud.svg"));
        assert_eq!(outcome.state.conversation_log().len(), 1);

        let committed: Vec<String> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                WorkflowEvent::NodeCompleted { node, .. } => Some(node),
                _ => None,
            })
            .collect();
        assert_eq!(committed.len(), 4);
        assert_eq!(committed[0], "root");
        assert_eq!(committed[3], "leaf");
        assert!(matches!(sink.events().last(), Some(WorkflowEvent::RunFinished { .. })));

        let checkpoint = engine.checkpoint(&thread).await.unwrap();
        assert!(checkpoint.is_finished());
        assert_eq!(checkpoint.state, outcome.state);
        assert!(!engine.is_running(&thread));
    }

    #[tokio::test]
    async fn test_branch_failure_degrades_but_siblings_finish() {
        let engine = engine(diamond(
            Stub::writes("right", TextField::VisualizationRef, "x").behaving(Behavior::Fail),
        ));
        let sink = CollectingSink::new();

        let outcome = engine.run(ThreadId::from_str("t1"), "raw", &sink).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Degraded);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].node, "right");
        assert_eq!(outcome.state.summary_text(), Some("short"));
        assert_eq!(outcome.state.visualization_ref(), None);
        assert_eq!(outcome.state.conversation_log().len(), 1);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, WorkflowEvent::NodeFailed { node, .. } if node == "right")));
    }

    #[tokio::test]
    async fn test_panicking_node_is_a_branch_failure() {
        let engine = engine(diamond(
            Stub::writes("right", TextField::VisualizationRef, "x").behaving(Behavior::Panic),
        ));
        let outcome = engine
            .run(ThreadId::from_str("t1"), "raw", &CollectingSink::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Degraded);
        assert_eq!(outcome.failures[0].node, "right");
        assert!(outcome.failures[0].error.contains("panicked"));
    }

    #[tokio::test]
    async fn test_failure_route_records_malformed_turn() {
        let graph = Graph::builder("agent")
            .node(Stub::logs("agent"))
            .node(Stub::writes("parser", TextField::SummaryText, "never"))
            .edge(
                "agent",
                Edge::conditional(AlwaysBad, [("bad", RouteTarget::Fail)]),
            )
            .build(&ToolRegistry::new());
        // "parser" is unreachable through a Fail-only router
        assert!(graph.is_err());

        let graph = Graph::builder("agent")
            .node(Stub::logs("agent"))
            .edge("agent", Edge::conditional(AlwaysBad, [("bad", RouteTarget::Fail)]))
            .build(&ToolRegistry::new())
            .unwrap();
        let sink = CollectingSink::new();
        let outcome = engine(graph)
            .run(ThreadId::from_str("t1"), "raw", &sink)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Degraded);
        assert!(outcome.failures[0].error.contains("neither a tool call"));
        assert_eq!(outcome.state.conversation_log().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_aborts_run() {
        let graph = Graph::builder("first")
            .node(Stub::writes("first", TextField::SummaryText, "one"))
            .node(Stub::writes("second", TextField::SummaryText, "two"))
            .edge("first", Edge::to("second"))
            .build(&ToolRegistry::new())
            .unwrap();
        let engine = engine(graph);
        let sink = CollectingSink::new();
        let thread = ThreadId::from_str("t1");

        let err = engine.run(thread.clone(), "raw", &sink).await.unwrap_err();
        assert!(matches!(
            err,
            MetamorphosisError::Conflict { ref first_writer, ref second_writer, .. }
                if first_writer == "first" && second_writer == "second"
        ));
        assert!(matches!(sink.events().last(), Some(WorkflowEvent::RunAborted { .. })));

        // The last commit is untouched
        let checkpoint = engine.checkpoint(&thread).await.unwrap();
        assert_eq!(checkpoint.state.summary_text(), Some("one"));
        assert_eq!(checkpoint.frontier, vec!["second"]);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let graph = Graph::builder("spin")
            .node(Stub::logs("spin"))
            .edge("spin", Edge::to("spin"))
            .build(&ToolRegistry::new())
            .unwrap();
        let config = EngineConfig {
            max_steps: 3,
            ..EngineConfig::default()
        };
        let engine = ExecutionEngine::new(graph, Arc::new(MemoryCheckpointStore::new()), config);

        let err = engine
            .run(ThreadId::from_str("t1"), "raw", &CollectingSink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphosisError::StepLimitExceeded(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_resume() {
        let graph = Graph::builder("root")
            .node(
                Stub::writes("root", TextField::RewrittenText, "clean")
                    .slow_first(Duration::from_secs(60)),
            )
            .build(&ToolRegistry::new())
            .unwrap();
        let engine = engine(graph);
        let thread = ThreadId::from_str("t1");

        let handle = engine.stream(thread.clone(), "raw").unwrap();
        assert!(matches!(
            engine.run(thread.clone(), "raw", &CollectingSink::new()).await,
            Err(MetamorphosisError::ThreadBusy(_))
        ));
        assert!(engine.cancel(&thread));
        assert!(matches!(handle.outcome().await, Err(MetamorphosisError::Cancelled)));
        assert!(!engine.is_running(&thread));

        let checkpoint = engine.checkpoint(&thread).await.unwrap();
        assert_eq!(checkpoint.frontier, vec!["root"]);

        let outcome = engine.resume(thread.clone(), &CollectingSink::new()).await.unwrap();
        assert_eq!(outcome.state.rewritten_text(), Some("clean"));
        assert_eq!(outcome.state.original_text(), Some("raw"));

        // Resuming a finished thread hands back the stored state
        let again = engine.resume(thread, &CollectingSink::new()).await.unwrap();
        assert_eq!(again.state, outcome.state);
        assert_eq!(again.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_stream_yields_events_in_commit_order() {
        let engine = engine(diamond(Stub::writes(
            "right",
            TextField::VisualizationRef,
            "cloud.svg",
        )));
        let mut handle = engine.stream(ThreadId::from_str("t1"), "raw").unwrap();

        let mut events = Vec::new();
        while let Some(event) = handle.events.next().await {
            events.push(event);
        }
        let outcome = handle.outcome().await.unwrap();

        assert!(matches!(events.first(), Some(WorkflowEvent::RunStarted { frontier, .. }) if frontier == &vec!["root".to_string()]));
        assert!(matches!(events.last(), Some(WorkflowEvent::RunFinished { status: RunStatus::Completed, .. })));
        match &events[events.len() - 2] {
            WorkflowEvent::NodeCompleted { state, .. } => assert_eq!(*state, outcome.state),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_driver_panic_is_not_reported_as_cancellation() {
        let panicked = tokio::spawn(async {
            if true {
                panic!("driver bug");
            }
            Err::<RunOutcome, _>(MetamorphosisError::Cancelled)
        })
        .await;
        let err = join_outcome(panicked).unwrap_err();
        assert!(matches!(err, MetamorphosisError::RunPanicked(_)));
        assert!(err.is_fatal());

        let aborted = tokio::spawn(std::future::pending::<Result<RunOutcome>>());
        aborted.abort();
        assert!(matches!(
            join_outcome(aborted.await),
            Err(MetamorphosisError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint() {
        let engine = engine(diamond(Stub::writes("right", TextField::VisualizationRef, "x")));
        let err = engine
            .resume(ThreadId::from_str("nope"), &CollectingSink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphosisError::CheckpointNotFound(_)));
    }
}
