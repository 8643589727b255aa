// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DefaultIx, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use petgraph::Graph;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use crate::ir::program::{CallSiteId, MethodId, ProgramModel};

/// Unique identifiers for call graph nodes.
pub type CGNodeId = NodeIndex<DefaultIx>;
/// Unique identifiers for call graph edges.
pub type CGEdgeId = EdgeIndex<DefaultIx>;
/// Context-insensitive call graph over host methods.
pub type MethodCallGraph = CallGraph<MethodId, CallSiteId>;

pub trait CGFunction: Copy + Clone + PartialEq + Eq + Hash + Debug {
    fn dot_label(&self, program: &dyn ProgramModel) -> String;
}

impl CGFunction for MethodId {
    fn dot_label(&self, program: &dyn ProgramModel) -> String {
        program.method_signature(*self)
    }
}

pub trait CGCallSite: Copy + Clone + PartialEq + Eq + Hash + Debug {
    fn dot_label(&self, program: &dyn ProgramModel) -> String;
}

impl CGCallSite for CallSiteId {
    fn dot_label(&self, program: &dyn ProgramModel) -> String {
        let call_site = program.call_site(*self);
        format!("{}@L{}", call_site.method_ref.name(), call_site.line)
    }
}

#[derive(Debug)]
pub struct CallGraphNode<F: CGFunction> {
    pub(crate) func: F,
}

impl<F: CGFunction> CallGraphNode<F> {
    pub fn new(func: F) -> Self {
        CallGraphNode { func }
    }
}

#[derive(Debug)]
pub struct CallGraphEdge<S: CGCallSite> {
    pub(crate) callsite: S,
}

impl<S: CGCallSite> CallGraphEdge<S> {
    pub fn new(callsite: S) -> Self {
        CallGraphEdge { callsite }
    }
}

#[derive(Debug)]
pub struct CallGraph<F: CGFunction, S: CGCallSite> {
    /// The graph structure capturing call relationships.
    pub graph: Graph<CallGraphNode<F>, CallGraphEdge<S>>,
    /// A map from functions to their corresponding call graph nodes.
    pub func_nodes: HashMap<F, CGNodeId>,
    /// A map from call sites to call graph edges.
    pub callsite_to_edges: HashMap<S, HashSet<CGEdgeId>>,
    /// Functions in the order they were first added.
    pub(crate) reach_funcs: Vec<F>,
}

impl<F: CGFunction, S: CGCallSite> Default for CallGraph<F, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: CGFunction, S: CGCallSite> CallGraph<F, S> {
    pub fn new() -> Self {
        CallGraph {
            graph: Graph::<CallGraphNode<F>, CallGraphEdge<S>>::new(),
            func_nodes: HashMap::new(),
            callsite_to_edges: HashMap::new(),
            reach_funcs: Vec::new(),
        }
    }

    /// Add a new node to the call graph.
    pub fn add_node(&mut self, func: F) {
        self.get_or_insert_node(func);
    }

    fn get_or_insert_node(&mut self, func: F) -> CGNodeId {
        match self.func_nodes.entry(func) {
            Entry::Occupied(o) => o.get().to_owned(),
            Entry::Vacant(v) => {
                self.reach_funcs.push(func);
                let node_id = self.graph.add_node(CallGraphNode::new(func));
                *v.insert(node_id)
            }
        }
    }

    #[inline]
    pub fn contains(&self, func: F) -> bool {
        self.func_nodes.contains_key(&func)
    }

    /// Returns all callees of a call site.
    pub fn get_callees(&self, callsite: &S) -> HashSet<F> {
        match self.callsite_to_edges.get(callsite) {
            Some(edges) => edges
                .iter()
                .filter_map(|edge_id| self.graph.edge_endpoints(*edge_id))
                .filter_map(|(_, target)| self.graph.node_weight(target))
                .map(|node| node.func)
                .collect(),
            None => HashSet::new(),
        }
    }

    /// Returns true if an edge to the callee already existed for the callsite.
    pub fn has_edge(&self, callsite: &S, callee_id: F) -> bool {
        self.get_callees(callsite).contains(&callee_id)
    }

    /// Adds a new edge to the call graph.
    /// The edge is a call from `caller_id` to `callee_id` at `callsite`.
    /// Returns false if the edge already existed, and true otherwise.
    pub fn add_edge(&mut self, callsite: S, caller_id: F, callee_id: F) -> bool {
        let caller_node = self.get_or_insert_node(caller_id);
        let callee_node = self.get_or_insert_node(callee_id);
        if self.has_edge(&callsite, callee_id) {
            return false;
        }
        let edge_id = self
            .graph
            .add_edge(caller_node, callee_node, CallGraphEdge::new(callsite));
        self.callsite_to_edges
            .entry(callsite)
            .or_default()
            .insert(edge_id);
        true
    }

    /// Distinct direct callees of `func`, in edge insertion order.
    pub fn successors(&self, func: F) -> Vec<F> {
        self.neighbors(func, Direction::Outgoing)
    }

    /// Distinct direct callers of `func`.
    pub fn predecessors(&self, func: F) -> Vec<F> {
        self.neighbors(func, Direction::Incoming)
    }

    fn neighbors(&self, func: F, dir: Direction) -> Vec<F> {
        let Some(node) = self.func_nodes.get(&func) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut edges: Vec<_> = self.graph.edges_directed(*node, dir).collect();
        edges.sort_by_key(|e| e.id());
        edges
            .into_iter()
            .map(|e| match dir {
                Direction::Outgoing => e.target(),
                Direction::Incoming => e.source(),
            })
            .filter_map(|n| self.graph.node_weight(n).map(|w| w.func))
            .filter(|f| seen.insert(*f))
            .collect()
    }

    /// The call sites in `caller` that have an edge to `callee`.
    pub fn call_sites_between(&self, caller: F, callee: F) -> Vec<S> {
        match (self.func_nodes.get(&caller), self.func_nodes.get(&callee)) {
            (Some(from), Some(to)) => self
                .graph
                .edges_connecting(*from, *to)
                .map(|e| e.weight().callsite)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Iterates over the functions in the graph.
    pub fn reach_funcs_iter(&self) -> impl Iterator<Item = F> + '_ {
        self.reach_funcs.iter().copied()
    }

    pub fn num_funcs(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_edges(&self) -> usize {
        self.graph.edge_count()
    }

    /// Renders the call graph in Graphviz DOT format.
    pub fn to_dot_string(&self, program: &dyn ProgramModel) -> String {
        let edge_attrs = |_, edge: petgraph::graph::EdgeReference<'_, CallGraphEdge<S>>| {
            format!("label = {:?}", edge.weight().callsite.dot_label(program))
        };
        let node_attrs = |_, (_, node): (NodeIndex, &CallGraphNode<F>)| format!("label = {:?}", node.func.dot_label(program));
        let dot = Dot::with_attr_getters(
            &self.graph,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &edge_attrs,
            &node_attrs,
        );
        format!("{:?}", dot)
    }

    pub fn to_dot(&self, program: &dyn ProgramModel, dot_path: &std::path::Path) -> Result<()> {
        std::fs::write(dot_path, self.to_dot_string(program))
            .with_context(|| format!("failed to write dot file {}", dot_path.display()))
    }
}

/// One edge of a serialized call graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallEdgeRecord {
    pub caller: MethodId,
    pub call_site: CallSiteId,
    pub callee: MethodId,
}

/// A call graph computed by an earlier, cheaper analysis run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PriorCallGraph {
    #[serde(default)]
    pub methods: Vec<MethodId>,
    #[serde(default)]
    pub edges: Vec<CallEdgeRecord>,
}

impl PriorCallGraph {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read call graph {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("malformed call graph {}", path.display()))
    }

    pub fn into_call_graph(self) -> MethodCallGraph {
        let mut call_graph = MethodCallGraph::new();
        for method in self.methods {
            call_graph.add_node(method);
        }
        for edge in self.edges {
            call_graph.add_edge(edge.call_site, edge.caller, edge.callee);
        }
        call_graph
    }
}

impl From<&MethodCallGraph> for PriorCallGraph {
    fn from(call_graph: &MethodCallGraph) -> Self {
        let edges = call_graph
            .graph
            .edge_references()
            .map(|e| CallEdgeRecord {
                caller: call_graph.graph[e.source()].func,
                call_site: e.weight().callsite,
                callee: call_graph.graph[e.target()].func,
            })
            .collect();
        PriorCallGraph {
            methods: call_graph.reach_funcs_iter().collect(),
            edges,
        }
    }
}
