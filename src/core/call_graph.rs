//! CallGraph type for representing inter-procedural call relationships.
//!
//! Nodes are module functions addressed by `FuncIdx`. There is at most one
//! edge per `(caller, callee)` pair; adding the pair again merges the call
//! sites and keeps the weaker confidence and the less precise call type.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::fmt::Write as _;

use crate::core::candidates::Confidence;
use crate::core::function::FuncIdx;
use crate::core::module::Module;
use crate::error::{Result, WasmCgError};

/// Call type for edges in the call graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// `call`
    Direct,
    /// `call_indirect` without vtable evidence, and host callbacks
    Indirect,
    /// `call_indirect` resolved through a recovered vtable slot
    Virtual,
    /// `return_call` (caller replaced by callee)
    Tail,
}

impl CallType {
    /// How much the kind alone says about the target: `Indirect` least,
    /// `Direct` most.
    pub fn precision(&self) -> u8 {
        match self {
            CallType::Indirect => 0,
            CallType::Virtual => 1,
            CallType::Tail => 2,
            CallType::Direct => 3,
        }
    }

    /// The less precise of two kinds.
    pub fn weaker(self, other: CallType) -> CallType {
        if other.precision() < self.precision() {
            other
        } else {
            self
        }
    }

    pub fn value(&self) -> &str {
        match self {
            CallType::Direct => "direct",
            CallType::Indirect => "indirect",
            CallType::Virtual => "virtual",
            CallType::Tail => "tail",
        }
    }
}

/// Function node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraphNode {
    pub id: FuncIdx,
    pub name: String,
    /// Rendered signature, e.g. `[i32] -> []`
    pub signature: String,
    pub imported: bool,
    pub exported: bool,
}

/// Edge in call graph representing one or more calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraphEdge {
    pub caller: FuncIdx,
    pub callee: FuncIdx,
    /// Byte offsets of the call instructions; empty for host edges
    pub call_sites: Vec<usize>,
    pub call_type: CallType,
    pub confidence: Confidence,
}

impl CallGraphEdge {
    pub fn new(caller: FuncIdx, callee: FuncIdx, call_type: CallType, confidence: Confidence) -> Self {
        Self {
            caller,
            callee,
            call_sites: Vec::new(),
            call_type,
            confidence,
        }
    }

    pub fn with_call_sites(
        caller: FuncIdx,
        callee: FuncIdx,
        call_type: CallType,
        confidence: Confidence,
        call_sites: Vec<usize>,
    ) -> Self {
        Self {
            caller,
            callee,
            call_sites,
            call_type,
            confidence,
        }
    }

    pub fn key(&self) -> (FuncIdx, FuncIdx) {
        (self.caller, self.callee)
    }

    /// Add a call site to this edge
    pub fn add_call_site(&mut self, offset: usize) {
        if let Err(pos) = self.call_sites.binary_search(&offset) {
            self.call_sites.insert(pos, offset);
        }
    }

    /// Fold another edge between the same pair into this one.
    pub fn merge(&mut self, other: &CallGraphEdge) {
        for site in &other.call_sites {
            self.add_call_site(*site);
        }
        self.call_type = self.call_type.weaker(other.call_type);
        self.confidence = self.confidence.min(other.confidence);
    }
}

/// CallGraph represents inter-procedural calling relationships
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraph {
    /// Function nodes, ordered by index
    pub nodes: Vec<CallGraphNode>,
    /// Edges, ordered by key
    pub edges: Vec<CallGraphEdge>,
}

impl CallGraph {
    /// Create a new empty call graph
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// One node per module function, no edges.
    pub fn with_module_nodes(module: &Module) -> Self {
        let nodes = module
            .functions
            .iter()
            .map(|f| CallGraphNode {
                id: f.idx,
                name: f.name.clone(),
                signature: f.ty.to_string(),
                imported: f.is_imported(),
                exported: f.is_exported(),
            })
            .collect();
        Self {
            nodes,
            edges: Vec::new(),
        }
    }

    /// Add a function node to the graph
    pub fn add_node(&mut self, node: CallGraphNode) {
        match self.nodes.binary_search_by_key(&node.id, |n| n.id) {
            Ok(_) => {}
            Err(pos) => self.nodes.insert(pos, node),
        }
    }

    /// Add an edge, merging it with an existing edge between the same pair.
    /// Does not auto-add nodes.
    pub fn add_edge(&mut self, edge: CallGraphEdge) {
        match self.edges.binary_search_by_key(&edge.key(), |e| e.key()) {
            Ok(pos) => self.edges[pos].merge(&edge),
            Err(pos) => self.edges.insert(pos, edge),
        }
    }

    /// Record one call site.
    pub fn add_call(
        &mut self,
        caller: FuncIdx,
        callee: FuncIdx,
        call_type: CallType,
        confidence: Confidence,
        offset: Option<usize>,
    ) {
        let mut edge = CallGraphEdge::new(caller, callee, call_type, confidence);
        if let Some(offset) = offset {
            edge.call_sites.push(offset);
        }
        self.add_edge(edge);
    }

    /// Remove an edge
    pub fn remove_edge(&mut self, caller: FuncIdx, callee: FuncIdx) {
        self.edges.retain(|edge| edge.key() != (caller, callee));
    }

    pub fn node(&self, id: FuncIdx) -> Option<&CallGraphNode> {
        self.nodes
            .binary_search_by_key(&id, |n| n.id)
            .ok()
            .map(|pos| &self.nodes[pos])
    }

    pub fn contains(&self, id: FuncIdx) -> bool {
        self.node(id).is_some()
    }

    pub fn edge(&self, caller: FuncIdx, callee: FuncIdx) -> Option<&CallGraphEdge> {
        self.edges
            .binary_search_by_key(&(caller, callee), |e| e.key())
            .ok()
            .map(|pos| &self.edges[pos])
    }

    /// Get all edges from a specific caller
    pub fn outgoing_edges(&self, caller: FuncIdx) -> Vec<&CallGraphEdge> {
        self.edges.iter().filter(|edge| edge.caller == caller).collect()
    }

    /// Get all edges to a specific callee
    pub fn incoming_edges(&self, callee: FuncIdx) -> Vec<&CallGraphEdge> {
        self.edges.iter().filter(|edge| edge.callee == callee).collect()
    }

    /// Distinct callees of `caller`, ordered
    pub fn callees(&self, caller: FuncIdx) -> Vec<FuncIdx> {
        let set: BTreeSet<FuncIdx> = self.outgoing_edges(caller).iter().map(|e| e.callee).collect();
        set.into_iter().collect()
    }

    /// Distinct callers of `callee`, ordered
    pub fn callers(&self, callee: FuncIdx) -> Vec<FuncIdx> {
        let set: BTreeSet<FuncIdx> = self.incoming_edges(callee).iter().map(|e| e.caller).collect();
        set.into_iter().collect()
    }

    pub fn has_callees(&self, id: FuncIdx) -> bool {
        self.edges.iter().any(|e| e.caller == id)
    }

    pub fn has_callers(&self, id: FuncIdx) -> bool {
        self.edges.iter().any(|e| e.callee == id)
    }

    /// Successor map over the whole graph.
    pub fn adjacency(&self) -> BTreeMap<FuncIdx, BTreeSet<FuncIdx>> {
        let mut adj: BTreeMap<FuncIdx, BTreeSet<FuncIdx>> =
            self.nodes.iter().map(|n| (n.id, BTreeSet::new())).collect();
        for edge in &self.edges {
            adj.entry(edge.caller).or_default().insert(edge.callee);
        }
        adj
    }

    fn predecessors(&self) -> BTreeMap<FuncIdx, BTreeSet<FuncIdx>> {
        let mut preds: BTreeMap<FuncIdx, BTreeSet<FuncIdx>> = BTreeMap::new();
        for edge in &self.edges {
            preds.entry(edge.callee).or_default().insert(edge.caller);
        }
        preds
    }

    /// Get root functions (functions with no callers)
    pub fn root_functions(&self) -> Vec<FuncIdx> {
        let called: BTreeSet<FuncIdx> = self.edges.iter().map(|e| e.callee).collect();
        self.nodes
            .iter()
            .map(|n| n.id)
            .filter(|id| !called.contains(id))
            .collect()
    }

    /// Get leaf functions (functions with no callees)
    pub fn leaf_functions(&self) -> Vec<FuncIdx> {
        let calling: BTreeSet<FuncIdx> = self.edges.iter().map(|e| e.caller).collect();
        self.nodes
            .iter()
            .map(|n| n.id)
            .filter(|id| !calling.contains(id))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn function_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Longest acyclic caller chain above `id` (0 for roots).
    pub fn call_depth(&self, id: FuncIdx) -> Option<usize> {
        if !self.contains(id) {
            return None;
        }
        let preds = self.predecessors();
        let mut on_path = BTreeSet::new();
        Some(Self::call_depth_dfs(&preds, id, &mut on_path))
    }

    fn call_depth_dfs(
        preds: &BTreeMap<FuncIdx, BTreeSet<FuncIdx>>,
        id: FuncIdx,
        on_path: &mut BTreeSet<FuncIdx>,
    ) -> usize {
        if !on_path.insert(id) {
            return 0; // cycle
        }
        let mut max_depth = 0;
        if let Some(callers) = preds.get(&id) {
            for caller in callers {
                if on_path.contains(caller) {
                    continue;
                }
                max_depth = max_depth.max(Self::call_depth_dfs(preds, *caller, on_path) + 1);
            }
        }
        on_path.remove(&id);
        max_depth
    }

    /// Find all simple call paths from `start` to `end`
    pub fn find_call_paths(&self, start: FuncIdx, end: FuncIdx) -> Vec<Vec<FuncIdx>> {
        let adj = self.adjacency();
        let mut paths = Vec::new();
        let mut current_path = Vec::new();
        let mut visited = BTreeSet::new();
        Self::call_paths_dfs(&adj, start, end, &mut current_path, &mut visited, &mut paths);
        paths
    }

    fn call_paths_dfs(
        adj: &BTreeMap<FuncIdx, BTreeSet<FuncIdx>>,
        current: FuncIdx,
        target: FuncIdx,
        current_path: &mut Vec<FuncIdx>,
        visited: &mut BTreeSet<FuncIdx>,
        paths: &mut Vec<Vec<FuncIdx>>,
    ) {
        current_path.push(current);
        visited.insert(current);

        if current == target {
            paths.push(current_path.clone());
        } else if let Some(callees) = adj.get(&current) {
            for callee in callees {
                if !visited.contains(callee) {
                    Self::call_paths_dfs(adj, *callee, target, current_path, visited, paths);
                }
            }
        }

        current_path.pop();
        visited.remove(&current);
    }

    /// Check if the call graph has cycles (recursion, including self calls)
    pub fn has_cycles(&self) -> bool {
        let adj = self.adjacency();
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut state: HashMap<FuncIdx, u8> = HashMap::new();
        for start in adj.keys() {
            if state.get(start).copied().unwrap_or(0) != 0 {
                continue;
            }
            let mut stack: Vec<(FuncIdx, Vec<FuncIdx>)> = Vec::new();
            state.insert(*start, 1);
            stack.push((*start, adj[start].iter().rev().copied().collect()));
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                match top.1.pop() {
                    Some(next) => match state.get(&next).copied().unwrap_or(0) {
                        0 => {
                            state.insert(next, 1);
                            let succ = adj
                                .get(&next)
                                .map(|s| s.iter().rev().copied().collect())
                                .unwrap_or_default();
                            stack.push((next, succ));
                        }
                        1 => return true,
                        _ => {}
                    },
                    None => {
                        state.insert(node, 2);
                        stack.pop();
                    }
                }
            }
        }
        false
    }

    /// Functions reachable from `roots` (roots included when present).
    pub fn reachable_from(&self, roots: &BTreeSet<FuncIdx>) -> BTreeSet<FuncIdx> {
        let adj = self.adjacency();
        let mut seen: BTreeSet<FuncIdx> = BTreeSet::new();
        let mut worklist: VecDeque<FuncIdx> = roots.iter().copied().filter(|r| self.contains(*r)).collect();
        while let Some(f) = worklist.pop_front() {
            if !seen.insert(f) {
                continue;
            }
            if let Some(callees) = adj.get(&f) {
                worklist.extend(callees.iter().filter(|c| !seen.contains(c)).copied());
            }
        }
        seen
    }

    /// Subgraph restricted to functions reachable from `roots`.
    pub fn reachable_subgraph(&self, roots: &BTreeSet<FuncIdx>) -> Self {
        let keep: Vec<FuncIdx> = self.reachable_from(roots).into_iter().collect();
        self.subgraph(&keep)
    }

    /// Validate internal consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(format!("Duplicate function ID: {}", node.id));
            }
        }

        let mut keys = BTreeSet::new();
        for edge in &self.edges {
            if !seen.contains(&edge.caller) {
                return Err(format!("Edge references unknown caller function: {}", edge.caller));
            }
            if !seen.contains(&edge.callee) {
                return Err(format!("Edge references unknown callee function: {}", edge.callee));
            }
            if !keys.insert(edge.key()) {
                return Err(format!("Duplicate edge {} -> {}", edge.caller, edge.callee));
            }
        }
        Ok(())
    }

    /// Validate against the module the graph was built from: every
    /// endpoint must be one of its functions.
    pub fn validate_against(&self, module: &Module) -> Result<()> {
        self.validate().map_err(WasmCgError::Internal)?;
        let count = module.function_count();
        for edge in &self.edges {
            for f in [edge.caller, edge.callee] {
                if f.index() >= count {
                    return Err(WasmCgError::Internal(format!(
                        "Edge references {} but the module has {} functions",
                        f, count
                    )));
                }
            }
        }
        Ok(())
    }

    /// Get statistics about the call graph
    pub fn statistics(&self) -> CallGraphStats {
        let mut call_type_counts = BTreeMap::new();
        let mut confidence_counts = BTreeMap::new();
        for edge in &self.edges {
            *call_type_counts.entry(edge.call_type).or_insert(0) += 1;
            *confidence_counts.entry(edge.confidence).or_insert(0) += 1;
        }

        let total_call_sites: usize = self.edges.iter().map(|e| e.call_sites.len()).sum();

        CallGraphStats {
            function_count: self.function_count(),
            edge_count: self.edge_count(),
            root_functions: self.root_functions().len(),
            leaf_functions: self.leaf_functions().len(),
            has_cycles: self.has_cycles(),
            call_type_counts,
            confidence_counts,
            total_call_sites,
            average_call_sites_per_edge: if !self.edges.is_empty() {
                total_call_sites as f64 / self.edges.len() as f64
            } else {
                0.0
            },
        }
    }

    /// Create a subgraph containing only specified functions and their connecting edges
    pub fn subgraph(&self, ids: &[FuncIdx]) -> Self {
        let keep: BTreeSet<FuncIdx> = ids.iter().copied().collect();
        Self {
            nodes: self
                .nodes
                .iter()
                .filter(|n| keep.contains(&n.id))
                .cloned()
                .collect(),
            edges: self
                .edges
                .iter()
                .filter(|e| keep.contains(&e.caller) && keep.contains(&e.callee))
                .cloned()
                .collect(),
        }
    }

    /// Graphviz rendering. Nodes and edges come out sorted, so equal graphs
    /// render to identical text.
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        out.push_str("digraph G {\n");
        out.push_str("\trankdir=\"LR\";\n");
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "\t\"{}\" [label=\"{}\\n{}\"];",
                node.id,
                escape_dot(&node.name),
                escape_dot(&node.signature)
            );
        }
        for edge in &self.edges {
            let style = match edge.call_type {
                CallType::Direct => "solid",
                CallType::Tail => "bold",
                CallType::Virtual | CallType::Indirect => "dashed",
            };
            let _ = writeln!(
                out,
                "\t\"{}\"->\"{}\" [style={}, label=\"{}\"];",
                edge.caller,
                edge.callee,
                style,
                edge.confidence.value()
            );
        }
        out.push_str("}\n");
        out
    }
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Statistics about a call graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallGraphStats {
    pub function_count: usize,
    pub edge_count: usize,
    pub root_functions: usize,
    pub leaf_functions: usize,
    pub has_cycles: bool,
    pub call_type_counts: BTreeMap<CallType, usize>,
    pub confidence_counts: BTreeMap<Confidence, usize>,
    pub total_call_sites: usize,
    pub average_call_sites_per_edge: f64,
}

impl fmt::Display for CallGraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "functions={} edges={} roots={} leaves={} cycles={}",
            self.function_count, self.edge_count, self.root_functions, self.leaf_functions, self.has_cycles
        )?;
        for (ty, n) in &self.call_type_counts {
            writeln!(f, "  {:<10} {}", ty.value(), n)?;
        }
        for (c, n) in &self.confidence_counts {
            writeln!(f, "  {:<18} {}", c.value(), n)?;
        }
        write!(f, "  call sites {}", self.total_call_sites)
    }
}

impl fmt::Display for CallGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CallGraph(functions={}, edges={})",
            self.nodes.len(),
            self.edges.len()
        )
    }
}

impl Default for CallGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(i: u32) -> CallGraphNode {
        CallGraphNode {
            id: FuncIdx(i),
            name: format!("f{}", i),
            signature: "[] -> []".to_string(),
            imported: false,
            exported: i == 0,
        }
    }

    fn create_test_call_graph() -> CallGraph {
        let mut cg = CallGraph::new();
        for i in 0..5 {
            cg.add_node(node(i));
        }
        let direct = |cg: &mut CallGraph, a: u32, b: u32| {
            cg.add_call(FuncIdx(a), FuncIdx(b), CallType::Direct, Confidence::Certain, Some(a as usize * 10))
        };
        direct(&mut cg, 0, 1);
        direct(&mut cg, 0, 2);
        direct(&mut cg, 1, 4);
        direct(&mut cg, 2, 4);
        direct(&mut cg, 2, 3);
        direct(&mut cg, 4, 3);
        direct(&mut cg, 3, 1); // cycle: 3 -> 1 -> 4 -> 3
        cg
    }

    #[test]
    fn test_call_graph_creation() {
        let cg = CallGraph::new();
        assert!(cg.is_empty());
        assert_eq!(cg.function_count(), 0);
        assert_eq!(cg.edge_count(), 0);
    }

    #[test]
    fn test_root_and_leaf_functions() {
        let cg = create_test_call_graph();
        assert_eq!(cg.root_functions(), vec![FuncIdx(0)]);
        assert!(cg.leaf_functions().is_empty());
        assert_eq!(cg.callers(FuncIdx(4)), vec![FuncIdx(1), FuncIdx(2)]);
    }

    #[test]
    fn test_has_cycles() {
        assert!(create_test_call_graph().has_cycles());

        let mut acyclic = CallGraph::new();
        acyclic.add_node(node(0));
        acyclic.add_node(node(1));
        acyclic.add_call(FuncIdx(0), FuncIdx(1), CallType::Direct, Confidence::Certain, None);
        assert!(!acyclic.has_cycles());

        acyclic.add_call(FuncIdx(1), FuncIdx(1), CallType::Tail, Confidence::Certain, None);
        assert!(acyclic.has_cycles());
    }

    #[test]
    fn test_call_depth_and_paths() {
        let cg = create_test_call_graph();
        assert_eq!(cg.call_depth(FuncIdx(0)), Some(0));
        assert!(cg.call_depth(FuncIdx(3)).unwrap() >= 2);
        assert_eq!(cg.call_depth(FuncIdx(99)), None);

        let paths = cg.find_call_paths(FuncIdx(0), FuncIdx(3));
        assert!(paths.contains(&vec![FuncIdx(0), FuncIdx(2), FuncIdx(3)]));
        assert!(paths.iter().all(|p| p.first() == Some(&FuncIdx(0))));
    }

    #[test]
    fn test_merge_keeps_min_confidence() {
        let mut cg = CallGraph::new();
        cg.add_node(node(0));
        cg.add_node(node(1));
        cg.add_call(FuncIdx(0), FuncIdx(1), CallType::Direct, Confidence::Certain, Some(4));
        cg.add_call(FuncIdx(0), FuncIdx(1), CallType::Virtual, Confidence::Certain, Some(20));
        cg.add_call(FuncIdx(0), FuncIdx(1), CallType::Virtual, Confidence::Heuristic, Some(8));

        assert_eq!(cg.edge_count(), 1);
        let e = cg.edge(FuncIdx(0), FuncIdx(1)).unwrap();
        assert_eq!(e.call_sites, vec![4, 8, 20]);
        assert_eq!(e.call_type, CallType::Virtual);
        assert_eq!(e.confidence, Confidence::Heuristic);
    }

    #[test]
    fn test_one_edge_per_pair() {
        let mut cg = CallGraph::new();
        cg.add_node(node(0));
        cg.add_node(node(1));
        cg.add_call(FuncIdx(0), FuncIdx(1), CallType::Tail, Confidence::Certain, Some(4));
        cg.add_call(FuncIdx(0), FuncIdx(1), CallType::Direct, Confidence::Certain, Some(9));
        assert_eq!(cg.edge(FuncIdx(0), FuncIdx(1)).map(|e| e.call_type), Some(CallType::Tail));
        cg.add_call(FuncIdx(0), FuncIdx(1), CallType::Indirect, Confidence::OverApproximated, None);

        assert_eq!(cg.edge_count(), 1);
        assert!(cg.validate().is_ok());
        let e = cg.edge(FuncIdx(0), FuncIdx(1)).unwrap();
        assert_eq!(e.call_type, CallType::Indirect);
        assert_eq!(e.confidence, Confidence::OverApproximated);
        assert_eq!(e.call_sites, vec![4, 9]);

        cg.remove_edge(FuncIdx(0), FuncIdx(1));
        assert_eq!(cg.edge_count(), 0);
    }

    #[test]
    fn test_call_type_precision() {
        assert_eq!(CallType::Direct.weaker(CallType::Virtual), CallType::Virtual);
        assert_eq!(CallType::Indirect.weaker(CallType::Tail), CallType::Indirect);
        assert_eq!(CallType::Tail.weaker(CallType::Tail), CallType::Tail);
    }

    #[test]
    fn test_validation() {
        let mut cg = CallGraph::new();
        cg.add_node(node(0));
        cg.add_call(FuncIdx(0), FuncIdx(0), CallType::Direct, Confidence::Certain, None);
        assert!(cg.validate().is_ok());

        cg.edges.push(CallGraphEdge::new(FuncIdx(0), FuncIdx(7), CallType::Direct, Confidence::Certain));
        assert!(cg.validate().is_err());
    }

    #[test]
    fn test_statistics() {
        let stats = create_test_call_graph().statistics();
        assert_eq!(stats.function_count, 5);
        assert_eq!(stats.edge_count, 7);
        assert_eq!(stats.root_functions, 1);
        assert_eq!(stats.leaf_functions, 0);
        assert!(stats.has_cycles);
        assert_eq!(stats.call_type_counts[&CallType::Direct], 7);
        assert_eq!(stats.confidence_counts[&Confidence::Certain], 7);
    }

    #[test]
    fn test_subgraph_and_reachability() {
        let cg = create_test_call_graph();
        let sub = cg.subgraph(&[FuncIdx(0), FuncIdx(1), FuncIdx(4)]);
        assert_eq!(sub.function_count(), 3);
        assert_eq!(sub.edge_count(), 2); // 0->1, 1->4

        let roots: BTreeSet<FuncIdx> = [FuncIdx(3)].into_iter().collect();
        let reach = cg.reachable_from(&roots);
        assert!(!reach.contains(&FuncIdx(0)));
        assert!(!reach.contains(&FuncIdx(2)));
        assert_eq!(reach.len(), 3);
    }

    #[test]
    fn test_dot_is_sorted() {
        let mut a = CallGraph::new();
        let mut b = CallGraph::new();
        for i in [2, 0, 1] {
            a.add_node(node(i));
        }
        for i in [0, 1, 2] {
            b.add_node(node(i));
        }
        a.add_call(FuncIdx(1), FuncIdx(2), CallType::Direct, Confidence::Certain, None);
        a.add_call(FuncIdx(0), FuncIdx(1), CallType::Virtual, Confidence::Heuristic, None);
        b.add_call(FuncIdx(0), FuncIdx(1), CallType::Virtual, Confidence::Heuristic, None);
        b.add_call(FuncIdx(1), FuncIdx(2), CallType::Direct, Confidence::Certain, None);

        let dot = a.to_dot();
        assert_eq!(dot, b.to_dot());
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("\"func[0]\"->\"func[1]\" [style=dashed, label=\"heuristic\"];"));
    }
}
