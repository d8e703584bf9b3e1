use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::state::{Field, START};
use metamorphosis_tools::ToolRegistry;

use super::edge::{Edge, RouteTarget};
use super::node::{Node, NodeKind};

/// A validated, immutable workflow topology.
pub struct Graph {
    nodes: HashMap<String, Arc<dyn Node>>,
    /// Declaration order, for stable rendering.
    order: Vec<String>,
    edges: HashMap<String, Edge>,
    entry: String,
}

impl Graph {
    pub fn builder(entry: impl Into<String>) -> GraphBuilder {
        GraphBuilder::new(entry)
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn node(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(name).cloned()
    }

    pub fn edge(&self, name: &str) -> Option<&Edge> {
        self.edges.get(name)
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Nodes with no outgoing edge.
    pub fn terminals(&self) -> Vec<&str> {
        self.node_names()
            .filter(|n| !self.edges.contains_key(*n))
            .collect()
    }

    /// Render the topology as a mermaid flowchart.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD;\n");
        let _ = writeln!(out, "    {}([{}]);", START, START);
        for name in &self.order {
            let shape = match self.nodes.get(name).map(|n| n.kind()) {
                Some(NodeKind::Agent) => format!("{}([{}])", name, name),
                Some(NodeKind::ToolExecution) => format!("{}[[{}]]", name, name),
                Some(NodeKind::Parse) => format!("{}{{{{{}}}}}", name, name),
                _ => format!("{}[{}]", name, name),
            };
            let _ = writeln!(out, "    {};", shape);
        }
        let _ = writeln!(out, "    __end__([__end__]);");
        let _ = writeln!(out, "    __start__ --> {};", self.entry);

        for name in &self.order {
            match self.edges.get(name) {
                None => {
                    let _ = writeln!(out, "    {} --> __end__;", name);
                }
                Some(Edge::Unconditional(to)) => {
                    let _ = writeln!(out, "    {} --> {};", name, to);
                }
                Some(Edge::FanOut(targets)) => {
                    for to in targets {
                        let _ = writeln!(out, "    {} --> {};", name, to);
                    }
                }
                Some(Edge::Conditional { branches, .. }) => {
                    for (label, target) in branches {
                        let to = match target {
                            RouteTarget::Node(n) => n.as_str(),
                            RouteTarget::End => "__end__",
                            RouteTarget::Fail => "__fail__",
                        };
                        let _ = writeln!(out, "    {} -. {} .-> {};", name, label, to);
                    }
                }
            }
        }
        out
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("entry", &self.entry)
            .field("nodes", &self.order)
            .field("edges", &self.edges)
            .finish()
    }
}

/// Assembles a [`Graph`] and validates it against a tool registry.
pub struct GraphBuilder {
    nodes: Vec<Arc<dyn Node>>,
    edges: Vec<(String, Edge)>,
    entry: String,
}

impl GraphBuilder {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: entry.into(),
        }
    }

    pub fn node(mut self, node: impl Node) -> Self {
        self.nodes.push(Arc::new(node));
        self
    }

    pub fn edge(mut self, from: impl Into<String>, edge: Edge) -> Self {
        self.edges.push((from.into(), edge));
        self
    }

    /// Validate and freeze the topology.
    ///
    /// Fails with `InvalidGraph` on unknown or duplicate nodes, a second edge
    /// out of one node, router labels without a branch (or branches without a
    /// label), fan-out targets with overlapping outputs, or unreachable nodes.
    /// Fails with `ToolNotFound` for a tool the registry cannot resolve.
    pub fn build(self, registry: &ToolRegistry) -> Result<Graph> {
        let mut nodes: HashMap<String, Arc<dyn Node>> = HashMap::new();
        let mut order = Vec::new();
        for node in self.nodes {
            let name = node.name().to_string();
            if nodes.insert(name.clone(), node).is_some() {
                return Err(invalid(format!("duplicate node '{}'", name)));
            }
            order.push(name);
        }

        if !nodes.contains_key(&self.entry) {
            return Err(invalid(format!("entry node '{}' is not defined", self.entry)));
        }

        let mut edges = HashMap::new();
        for (from, edge) in self.edges {
            if !nodes.contains_key(&from) {
                return Err(invalid(format!("edge from unknown node '{}'", from)));
            }
            for target in edge.targets() {
                if !nodes.contains_key(target) {
                    return Err(invalid(format!(
                        "edge '{}' -> '{}' targets an unknown node",
                        from, target
                    )));
                }
            }
            check_edge(&from, &edge, &nodes)?;
            if edges.insert(from.clone(), edge).is_some() {
                return Err(invalid(format!("node '{}' has more than one outgoing edge", from)));
            }
        }

        for name in &order {
            if let Some(node) = nodes.get(name) {
                for tool in node.tools() {
                    registry.ensure_resolvable(&tool)?;
                }
            }
        }

        let graph = Graph {
            nodes,
            order,
            edges,
            entry: self.entry,
        };
        check_reachable(&graph)?;

        debug!(
            entry = %graph.entry,
            nodes = graph.order.len(),
            terminals = ?graph.terminals(),
            "Workflow graph built"
        );
        Ok(graph)
    }
}

fn invalid(msg: String) -> MetamorphosisError {
    MetamorphosisError::InvalidGraph(msg)
}

fn check_edge(from: &str, edge: &Edge, nodes: &HashMap<String, Arc<dyn Node>>) -> Result<()> {
    match edge {
        Edge::Unconditional(_) => Ok(()),
        Edge::Conditional { router, branches } => {
            let labels: BTreeSet<&str> = router.labels().iter().copied().collect();
            let declared: BTreeSet<&str> = branches.keys().copied().collect();
            if let Some(missing) = labels.difference(&declared).next() {
                return Err(invalid(format!(
                    "router '{}' on '{}' has no branch for label '{}'",
                    router.name(),
                    from,
                    missing
                )));
            }
            if let Some(extra) = declared.difference(&labels).next() {
                return Err(invalid(format!(
                    "branch '{}' on '{}' is not a label of router '{}'",
                    extra,
                    from,
                    router.name()
                )));
            }
            Ok(())
        }
        Edge::FanOut(targets) => {
            let mut claimed: HashMap<Field, &str> = HashMap::new();
            for target in targets {
                let Some(node) = nodes.get(target) else {
                    continue;
                };
                for field in node.outputs() {
                    if let Some(other) = claimed.insert(*field, target.as_str()) {
                        return Err(invalid(format!(
                            "fan-out from '{}': '{}' and '{}' both write '{}'",
                            from, other, target, field
                        )));
                    }
                }
            }
            Ok(())
        }
    }
}

fn check_reachable(graph: &Graph) -> Result<()> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([graph.entry.as_str()]);
    while let Some(name) = queue.pop_front() {
        if !seen.insert(name) {
            continue;
        }
        if let Some(edge) = graph.edges.get(name) {
            queue.extend(edge.targets());
        }
    }
    match graph.order.iter().find(|n| !seen.contains(n.as_str())) {
        Some(orphan) => Err(invalid(format!("node '{}' is unreachable from the entry", orphan))),
        None => Ok(()),
    }
}
