// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Non-uniform context sensitivity from a prior call graph.
//!
//! Methods on a path from an entry to a sink call are analyzed with the deepest call-site
//! context, their direct callees with a shallow one, and the rest of the application with the
//! minimum. Library methods get no directive at all.

use log::*;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::graph::call_graph::MethodCallGraph;
use crate::graph::chain::{backward_closure, forward_closure, BfsBounds};
use crate::ir::program::{MethodId, ProgramModel};
use crate::pta::context_strategy::{DirectiveTable, Precision};

/// Locks `mutex`, keeping the data of a worker that panicked while holding it.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("[!] A closure worker panicked, merging its partial results");
        poisoned.into_inner()
    })
}

pub struct PrecisionTuner<'a> {
    program: &'a dyn ProgramModel,
    call_graph: &'a MethodCallGraph,
    keywords: &'a [String],
    bounds: BfsBounds,
}

impl<'a> PrecisionTuner<'a> {
    pub fn new(
        program: &'a dyn ProgramModel,
        call_graph: &'a MethodCallGraph,
        keywords: &'a [String],
        bounds: BfsBounds,
    ) -> Self {
        PrecisionTuner {
            program,
            call_graph,
            keywords,
            bounds,
        }
    }

    fn is_namespace_method(&self, method: MethodId) -> bool {
        let class = self.program.method(method).class;
        let name = &self.program.class(class).name;
        self.keywords.iter().any(|k| name.contains(k.as_str()))
    }

    /// Namespace methods of the call graph that call one of `sinks` directly.
    pub fn direct_sink_callers(&self, namespace: &HashSet<MethodId>, sinks: &BTreeSet<String>) -> BTreeSet<MethodId> {
        let program = self.program;
        namespace
            .iter()
            .copied()
            .filter(|m| {
                let calls_sink_site = program
                    .method(*m)
                    .call_sites
                    .iter()
                    .any(|cs| sinks.contains(&program.call_site(*cs).method_ref.to_string()));
                calls_sink_site
                    || self
                        .call_graph
                        .successors(*m)
                        .into_iter()
                        .any(|callee| sinks.contains(&program.method_signature(callee)))
            })
            .collect()
    }

    /// Union of the bounded closures of every root, computed in parallel.
    fn closure_of_all(&self, roots: Vec<MethodId>, backward: bool) -> HashSet<MethodId> {
        let merged = Arc::new(Mutex::new(HashSet::new()));
        let call_graph = self.call_graph;
        let bounds = self.bounds;
        roots.into_par_iter().for_each(|root| {
            let reached = if backward {
                backward_closure(call_graph, [root], bounds)
            } else {
                forward_closure(call_graph, [root], bounds)
            };
            lock_recovering(&merged).extend(reached);
        });
        match Arc::try_unwrap(merged) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
            Err(shared) => lock_recovering(&shared).clone(),
        }
    }

    pub fn compute(&self, entries: &[MethodId], sinks: &BTreeSet<String>) -> DirectiveTable {
        let start = Instant::now();
        let namespace = self
            .call_graph
            .reach_funcs_iter()
            .filter(|m| self.is_namespace_method(*m))
            .collect::<HashSet<_>>();

        let mut directives = DirectiveTable::new();
        let direct = self.direct_sink_callers(&namespace, sinks);
        for method in direct.iter() {
            directives.insert(*method, Precision::Max);
        }

        let sink_reaching = self.closure_of_all(direct.iter().copied().collect(), true);
        let entry_reachable = self.closure_of_all(entries.to_vec(), false);
        for method in namespace.iter() {
            if sink_reaching.contains(method) && entry_reachable.contains(method) {
                directives.insert(*method, Precision::Max);
            }
        }

        let max_methods = directives
            .iter()
            .filter(|(_, p)| **p == Precision::Max)
            .map(|(m, _)| *m)
            .collect::<Vec<_>>();
        for method in max_methods {
            for callee in self.call_graph.successors(method) {
                directives.entry(callee).or_insert(Precision::Level(2));
            }
        }

        for method in namespace.iter() {
            directives.entry(*method).or_insert(Precision::Min);
        }

        let count = |p: Precision| directives.values().filter(|v| **v == p).count();
        info!(
            "[+] Precision directives: {} MAX, {} level-2, {} MIN in {}",
            count(Precision::Max),
            count(Precision::Level(2)),
            count(Precision::Min),
            humantime::format_duration(start.elapsed())
        );
        directives
    }
}
