use std::collections::BTreeMap;
use std::sync::Arc;

use metamorphosis_core::state::WorkflowState;

/// Pure decision over the workflow state, used by conditional edges.
///
/// `decide` must return one of `labels()` and must not depend on anything
/// but `state`.
pub trait Router: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Every label `decide` can return.
    fn labels(&self) -> &'static [&'static str];

    fn decide(&self, state: &WorkflowState) -> &'static str;
}

/// Where a routed branch goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Node(String),
    /// The branch ends normally.
    End,
    /// The branch ends with `MalformedAgentTurn` for the source node.
    Fail,
}

impl RouteTarget {
    pub fn node(name: impl Into<String>) -> Self {
        Self::Node(name.into())
    }
}

/// The outgoing transition of a node. Nodes without one are terminal.
#[derive(Clone)]
pub enum Edge {
    Unconditional(String),
    Conditional {
        router: Arc<dyn Router>,
        branches: BTreeMap<&'static str, RouteTarget>,
    },
    /// Every target runs concurrently in the next step.
    FanOut(Vec<String>),
}

impl Edge {
    pub fn to(target: impl Into<String>) -> Self {
        Self::Unconditional(target.into())
    }

    pub fn conditional(
        router: impl Router,
        branches: impl IntoIterator<Item = (&'static str, RouteTarget)>,
    ) -> Self {
        Self::Conditional {
            router: Arc::new(router),
            branches: branches.into_iter().collect(),
        }
    }

    pub fn fan_out<S: Into<String>>(targets: impl IntoIterator<Item = S>) -> Self {
        Self::FanOut(targets.into_iter().map(Into::into).collect())
    }

    /// Node names this edge can lead to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Unconditional(t) => vec![t.as_str()],
            Self::FanOut(ts) => ts.iter().map(|t| t.as_str()).collect(),
            Self::Conditional { branches, .. } => branches
                .values()
                .filter_map(|t| match t {
                    RouteTarget::Node(n) => Some(n.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconditional(t) => f.debug_tuple("Unconditional").field(t).finish(),
            Self::FanOut(ts) => f.debug_tuple("FanOut").field(ts).finish(),
            Self::Conditional { router, branches } => f
                .debug_struct("Conditional")
                .field("router", &router.name())
                .field("branches", branches)
                .finish(),
        }
    }
}

/// Result of resolving an edge against the post-merge state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next(Vec<String>),
    End,
    Fail,
}

impl Edge {
    pub fn resolve(&self, state: &WorkflowState) -> Transition {
        match self {
            Self::Unconditional(t) => Transition::Next(vec![t.clone()]),
            Self::FanOut(ts) => Transition::Next(ts.clone()),
            Self::Conditional { router, branches } => {
                let label = router.decide(state);
                // Branch coverage is checked at build time
                match branches.get(label) {
                    Some(RouteTarget::Node(n)) => Transition::Next(vec![n.clone()]),
                    Some(RouteTarget::End) => Transition::End,
                    Some(RouteTarget::Fail) | None => Transition::Fail,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl Router for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn labels(&self) -> &'static [&'static str] {
            &["a", "b", "c"]
        }
        fn decide(&self, _state: &WorkflowState) -> &'static str {
            self.0
        }
    }

    fn edge(label: &'static str) -> Edge {
        Edge::conditional(
            Fixed(label),
            [
                ("a", RouteTarget::node("next")),
                ("b", RouteTarget::End),
                ("c", RouteTarget::Fail),
            ],
        )
    }

    #[test]
    fn test_conditional_resolution() {
        let state = WorkflowState::default();
        assert_eq!(edge("a").resolve(&state), Transition::Next(vec!["next".into()]));
        assert_eq!(edge("b").resolve(&state), Transition::End);
        assert_eq!(edge("c").resolve(&state), Transition::Fail);
    }

    #[test]
    fn test_targets() {
        assert_eq!(edge("a").targets(), vec!["next"]);
        assert_eq!(Edge::fan_out(["x", "y"]).targets(), vec!["x", "y"]);
        assert_eq!(Edge::to("z").targets(), vec!["z"]);
    }
}
