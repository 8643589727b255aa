// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Bounded breadth-first search over call graphs.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use super::call_graph::{CGCallSite, CGFunction, CallGraph};

/// Limits shared by every traversal. Hitting either bound means "no path".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfsBounds {
    pub max_depth: usize,
    pub max_iterations: usize,
}

impl BfsBounds {
    pub const CHAIN: BfsBounds = BfsBounds {
        max_depth: 14,
        max_iterations: 100_000,
    };

    pub const REACHABILITY: BfsBounds = BfsBounds {
        max_depth: 14,
        max_iterations: 10_000,
    };
}

impl Default for BfsBounds {
    fn default() -> Self {
        BfsBounds::CHAIN
    }
}

/// Finds a shortest call chain from `source` to `target`.
///
/// Only successors accepted by `follow` are explored. Returns `[target]` when both ends are the
/// same method, and an empty chain when no path exists within `bounds`.
pub fn breadth_first<F, S>(
    call_graph: &CallGraph<F, S>,
    source: F,
    target: F,
    bounds: BfsBounds,
    follow: impl Fn(F) -> bool,
) -> Vec<F>
where
    F: CGFunction,
    S: CGCallSite,
{
    if source == target {
        return vec![target];
    }
    if !call_graph.contains(source) || !call_graph.contains(target) {
        return Vec::new();
    }

    let mut parents: HashMap<F, F> = HashMap::new();
    let mut visited = HashSet::from([source]);
    let mut worklist = VecDeque::from([(source, 0usize)]);
    let mut iterations = 0;
    while let Some((func, depth)) = worklist.pop_front() {
        iterations += 1;
        if iterations > bounds.max_iterations {
            break;
        }
        if depth + 1 >= bounds.max_depth {
            continue;
        }
        for succ in call_graph.successors(func) {
            if succ == target {
                parents.insert(succ, func);
                return rebuild_chain(&parents, source, target);
            }
            if follow(succ) && visited.insert(succ) {
                parents.insert(succ, func);
                worklist.push_back((succ, depth + 1));
            }
        }
    }
    Vec::new()
}

fn rebuild_chain<F: CGFunction>(parents: &HashMap<F, F>, source: F, target: F) -> Vec<F> {
    let mut chain = vec![target];
    let mut cur = target;
    while cur != source {
        match parents.get(&cur) {
            Some(parent) => {
                chain.push(*parent);
                cur = *parent;
            }
            None => return Vec::new(),
        }
    }
    chain.reverse();
    chain
}

/// Returns true if `to` is reachable from `from`, including `from == to`.
pub fn is_reachable<F, S>(call_graph: &CallGraph<F, S>, from: F, to: F, bounds: BfsBounds) -> bool
where
    F: CGFunction,
    S: CGCallSite,
{
    !breadth_first(call_graph, from, to, bounds, |_| true).is_empty()
}

/// All functions reachable from any of `roots` (roots included), bounded by depth and dequeues.
pub fn forward_closure<F, S>(
    call_graph: &CallGraph<F, S>,
    roots: impl IntoIterator<Item = F>,
    bounds: BfsBounds,
) -> HashSet<F>
where
    F: CGFunction,
    S: CGCallSite,
{
    closure(roots, bounds, |f| call_graph.successors(f))
}

/// All functions from which any of `targets` is reachable (targets included).
pub fn backward_closure<F, S>(
    call_graph: &CallGraph<F, S>,
    targets: impl IntoIterator<Item = F>,
    bounds: BfsBounds,
) -> HashSet<F>
where
    F: CGFunction,
    S: CGCallSite,
{
    closure(targets, bounds, |f| call_graph.predecessors(f))
}

fn closure<F: CGFunction>(
    roots: impl IntoIterator<Item = F>,
    bounds: BfsBounds,
    next: impl Fn(F) -> Vec<F>,
) -> HashSet<F> {
    let mut visited: HashSet<F> = HashSet::new();
    let mut worklist = VecDeque::new();
    for root in roots {
        if visited.insert(root) {
            worklist.push_back((root, 0usize));
        }
    }
    let mut iterations = 0;
    while let Some((func, depth)) = worklist.pop_front() {
        iterations += 1;
        if iterations > bounds.max_iterations {
            break;
        }
        if depth + 1 >= bounds.max_depth {
            continue;
        }
        for n in next(func) {
            if visited.insert(n) {
                worklist.push_back((n, depth + 1));
            }
        }
    }
    visited
}
