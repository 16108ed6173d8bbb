// src/graph.rs

//! Formula dependency graph and build planning
//!
//! [`DependencyGraph`] is a plain directed graph over formula names with
//! typed edges. [`build_plan`] discovers the graph from a
//! [`FormulaSource`], evaluating each formula's conditions against one
//! host snapshot, and orders it with Kahn's algorithm.
//!
//! Ordering is deterministic: every node gets a declaration index (the
//! requested formulas first, then dependencies in depth-first discovery
//! order), and whenever several nodes are ready at once the lowest index
//! goes first.
//!
//! ```text
//! requested: [btop]          btop -> lowdown (build)
//!                            btop -> gcc     (runtime, linux only)
//! plan:      [lowdown, gcc, btop]
//! ```

use crate::error::{Error, Result};
use crate::formula::{resolve, DependencyKind, FormulaSource, ResolvedFormula};
use crate::hash::sha256;
use crate::host::HostFacts;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// An outgoing edge: the owning node depends on `to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    to: usize,
    kind: DependencyKind,
}

/// A directed graph of formula dependencies
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Node names by declaration index
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// Outgoing edges (dependencies) per node
    edges: Vec<Vec<Edge>>,
    /// Incoming edges (dependents) per node
    reverse: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node if absent; returns its declaration index
    pub fn add_node(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), i);
        self.edges.push(Vec::new());
        self.reverse.push(Vec::new());
        i
    }

    /// Record that `from` depends on `to`
    pub fn add_edge(&mut self, from: &str, to: &str, kind: DependencyKind) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        let edge = Edge { to, kind };
        if !self.edges[from].contains(&edge) {
            self.edges[from].push(edge);
            self.reverse[to].push(from);
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Node names in declaration order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Direct dependencies of `name` with their kinds, in declaration order
    pub fn dependencies(&self, name: &str) -> Vec<(&str, DependencyKind)> {
        self.index
            .get(name)
            .map(|&i| {
                self.edges[i]
                    .iter()
                    .map(|e| (self.names[e.to].as_str(), e.kind))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nodes that directly depend on `name`
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let Some(&i) = self.index.get(name) else {
            return Vec::new();
        };
        let unique: BTreeSet<usize> = self.reverse[i].iter().copied().collect();
        unique.into_iter().map(|d| self.names[d].as_str()).collect()
    }

    /// The first cycle found by depth-first search, closed on its start
    /// node (e.g. `[a, b, a]`)
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnStack,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            node: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            marks[node] = Mark::OnStack;
            path.push(node);
            for edge in &graph.edges[node] {
                match marks[edge.to] {
                    Mark::New => {
                        if let Some(cycle) = visit(graph, edge.to, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::OnStack => {
                        let start = path.iter().position(|&n| n == edge.to).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|&n| graph.names[n].clone()).collect();
                        cycle.push(graph.names[edge.to].clone());
                        return Some(cycle);
                    }
                    Mark::Done => {}
                }
            }
            path.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.names.len()];
        let mut path = Vec::new();
        for start in 0..self.names.len() {
            if marks[start] == Mark::New
                && let Some(cycle) = visit(self, start, &mut marks, &mut path)
            {
                return Some(cycle);
            }
        }
        None
    }

    /// Topological order, dependencies first, ties broken by declaration
    /// index
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(Error::CyclicDependency { cycle });
        }

        let mut in_degree: Vec<usize> = self.edges.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.names.len());

        while let Some(node) = ready.pop_first() {
            order.push(self.names[node].clone());
            for &dependent in &self.reverse[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        Ok(order)
    }

    /// Everything reachable from `name` through edges whose kind passes
    /// `follow`, in declaration order
    pub fn reachable(&self, name: &str, follow: impl Fn(DependencyKind) -> bool) -> Vec<String> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for edge in &self.edges[node] {
                if follow(edge.kind) && seen.insert(edge.to) {
                    stack.push(edge.to);
                }
            }
        }
        seen.remove(&start);
        seen.into_iter().map(|i| self.names[i].clone()).collect()
    }

    /// All formulas `name` transitively depends on, through any edge
    pub fn transitive_dependencies(&self, name: &str) -> Vec<String> {
        self.reachable(name, |_| true)
    }

    /// All formulas that transitively depend on `name`
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &dependent in &self.reverse[node] {
                if seen.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }
        seen.remove(&start);
        seen.into_iter().map(|i| self.names[i].clone()).collect()
    }

    /// What must be present whenever `name` is used: its runtime
    /// dependencies, transitively
    pub fn runtime_closure(&self, name: &str) -> Vec<String> {
        self.reachable(name, |kind| kind.persists())
    }
}

/// One formula in a build plan
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub formula: ResolvedFormula,
    /// Named on the command line rather than pulled in as a dependency
    pub requested: bool,
    /// An existing install receipt already covers this node
    pub satisfied: bool,
}

impl PlanNode {
    pub fn name(&self) -> &str {
        &self.formula.name
    }
}

/// A topologically ordered set of formulas to install
#[derive(Debug, Clone)]
pub struct BuildPlan {
    graph: DependencyGraph,
    nodes: HashMap<String, PlanNode>,
    order: Vec<String>,
    include_tests: bool,
}

impl BuildPlan {
    /// Formula names, dependencies first
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn includes_tests(&self) -> bool {
        self.include_tests
    }

    pub fn node(&self, name: &str) -> Option<&PlanNode> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut PlanNode> {
        self.nodes.get_mut(name)
    }

    /// Nodes in plan order
    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    /// Formulas whose install locations the build of `name` may see:
    /// direct build and runtime dependencies plus their runtime closures,
    /// in plan order
    pub fn build_inputs(&self, name: &str) -> Vec<String> {
        self.inputs_through(name, |kind| kind.needed_for_build())
    }

    /// Formulas the test of `name` may see: its own runtime closure plus
    /// test dependencies and their runtime closures, in plan order
    pub fn test_inputs(&self, name: &str) -> Vec<String> {
        let mut inputs: BTreeSet<String> = self.graph.runtime_closure(name).into_iter().collect();
        inputs.extend(self.inputs_through(name, |kind| kind == DependencyKind::Test));
        self.in_plan_order(inputs)
    }

    /// Runtime closure of `name`, in plan order
    pub fn runtime_closure(&self, name: &str) -> Vec<String> {
        self.in_plan_order(self.graph.runtime_closure(name))
    }

    /// Fingerprint of everything the build of `name` consumed
    ///
    /// Covers each build input's name, version (with revision) and
    /// definition hash, so a change anywhere below a formula invalidates
    /// its receipt.
    pub fn closure_hash(&self, name: &str) -> String {
        let mut lines: Vec<String> = self
            .graph
            .reachable(name, |kind| kind.needed_for_build())
            .into_iter()
            .filter_map(|dep| self.nodes.get(&dep))
            .map(|node| {
                format!(
                    "{} {} {}",
                    node.formula.name,
                    node.formula.pkg_version(),
                    node.formula.definition_hash
                )
            })
            .collect();
        lines.sort();
        sha256(lines.join("\n").as_bytes())
    }

    fn inputs_through(&self, name: &str, direct: impl Fn(DependencyKind) -> bool) -> Vec<String> {
        let mut inputs = BTreeSet::new();
        for (dep, kind) in self.graph.dependencies(name) {
            if direct(kind) {
                inputs.insert(dep.to_string());
                inputs.extend(self.graph.runtime_closure(dep));
            }
        }
        self.in_plan_order(inputs)
    }

    fn in_plan_order(&self, names: impl IntoIterator<Item = String>) -> Vec<String> {
        let wanted: BTreeSet<String> = names.into_iter().collect();
        self.order
            .iter()
            .filter(|n| wanted.contains(*n))
            .cloned()
            .collect()
    }
}

/// Discover, resolve and order everything `requested` needs
///
/// Test-only edges are followed only with `include_tests`. Fails with
/// [`Error::CyclicDependency`] before anything is fetched or built.
pub fn build_plan(
    source: &dyn FormulaSource,
    host: &HostFacts,
    requested: &[String],
    include_tests: bool,
) -> Result<BuildPlan> {
    let mut graph = DependencyGraph::new();
    let mut nodes: HashMap<String, PlanNode> = HashMap::new();

    for name in requested {
        graph.add_node(name);
    }

    // Depth-first discovery with an explicit stack; children are pushed in
    // reverse so they are visited in declaration order
    let mut stack: Vec<String> = requested.iter().rev().cloned().collect();
    while let Some(name) = stack.pop() {
        if nodes.contains_key(&name) {
            continue;
        }
        let formula = resolve(&source.load(&name)?, host)?;
        graph.add_node(&name);

        let mut children = Vec::new();
        for dep in &formula.dependencies {
            if dep.kind == DependencyKind::Test && !include_tests {
                continue;
            }
            graph.add_edge(&name, &dep.name, dep.kind);
            if !nodes.contains_key(&dep.name) {
                children.push(dep.name.clone());
            }
        }
        stack.extend(children.into_iter().rev());

        debug!(
            "Planned {} {} ({} dependencies)",
            formula.name,
            formula.version,
            formula.dependencies.len()
        );
        nodes.insert(
            name.clone(),
            PlanNode {
                requested: requested.contains(&name),
                satisfied: false,
                formula,
            },
        );
    }

    let order = graph.topological_sort()?;
    Ok(BuildPlan {
        graph,
        nodes,
        order,
        include_tests,
    })
}
