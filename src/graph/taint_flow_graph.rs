// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The part of the call graph that taint flows travel through.

use super::call_graph::MethodCallGraph;
use crate::ir::program::MethodId;

/// Builds the subgraph spanned by `chains`. Each pair of adjacent methods contributes the call
/// edges between them in `call_graph`.
pub fn taint_flow_subgraph<'c>(
    call_graph: &MethodCallGraph,
    chains: impl IntoIterator<Item = &'c [MethodId]>,
) -> MethodCallGraph {
    let mut subgraph = MethodCallGraph::new();
    for chain in chains {
        if let [single] = chain {
            subgraph.add_node(*single);
        }
        for pair in chain.windows(2) {
            let (caller, callee) = (pair[0], pair[1]);
            for call_site in call_graph.call_sites_between(caller, callee) {
                subgraph.add_edge(call_site, caller, callee);
            }
        }
    }
    subgraph
}
