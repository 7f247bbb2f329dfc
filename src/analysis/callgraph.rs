//! Call-graph construction from classified call sites.

use std::collections::BTreeSet;
use tracing::{debug, info_span};

use crate::analysis::classify::ClassifiedSite;
use crate::config::GraphConfig;
use crate::core::call_graph::{CallGraph, CallType};
use crate::core::candidates::Confidence;
use crate::core::function::FuncIdx;
use crate::core::module::Module;

/// Merge every site's candidates into one graph. Sites that share
/// `(caller, callee)` collapse into a single edge that keeps the weakest
/// confidence and the least precise call type.
pub fn build(module: &Module, sites: &[ClassifiedSite]) -> CallGraph {
    let mut graph = CallGraph::with_module_nodes(module);
    for site in sites {
        let confidence = site.candidates.confidence();
        for callee in site.candidates.targets() {
            graph.add_call(site.caller, *callee, site.call_type, confidence, Some(site.offset));
        }
    }
    graph
}

/// Edges from every imported function to every exported one: the host may
/// call back into the module from any import.
pub fn add_host_edges(graph: &mut CallGraph, module: &Module) {
    let exports: Vec<FuncIdx> = module.exported_functions().map(|f| f.idx).collect();
    let mut added = 0usize;
    for import in module.functions.iter().filter(|f| f.is_imported()) {
        for export in &exports {
            graph.add_call(
                import.idx,
                *export,
                CallType::Indirect,
                Confidence::OverApproximated,
                None,
            );
            added += 1;
        }
    }
    debug!(edges = added, "Host callback edges");
}

/// Build the graph and apply the graph options.
pub fn build_with(module: &Module, sites: &[ClassifiedSite], cfg: &GraphConfig) -> CallGraph {
    let _span = info_span!("build_call_graph", sites = sites.len()).entered();
    let mut graph = build(module, sites);
    if cfg.host_calls_exports {
        add_host_edges(&mut graph, module);
    }
    if !cfg.include_unreachable_nodes {
        graph = graph.reachable_subgraph(&entry_roots(module));
    }
    graph
}

/// Default reachability roots: the module's entry points plus the imports,
/// which stand for the host.
pub fn entry_roots(module: &Module) -> BTreeSet<FuncIdx> {
    let mut roots = module.entry_points();
    roots.extend(module.functions.iter().filter(|f| f.is_imported()).map(|f| f.idx));
    roots
}
