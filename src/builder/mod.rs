// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Plugins that build call and pointer-flow edges across service boundaries.

use std::collections::{BTreeSet, HashSet};

use crate::ir::program::{CallSiteId, MethodId, MethodRef, ProgramModel};
use crate::pta::{CallEdge, CsObj, CsVar, FlowKind, HostContext, Pointer, Solver};

pub mod dubbo;
pub mod feign;
pub mod grpc;
pub mod kafka;
pub mod rabbitmq;
pub mod rest_template;
pub mod spring_bean;
pub mod spring_container;

/// Remembers the edges a plugin has already handed to the solver.
#[derive(Debug, Default)]
pub struct EdgeLedger {
    call_edges: HashSet<CallEdge>,
    pfg_edges: HashSet<(Pointer, Pointer)>,
}

impl EdgeLedger {
    /// Adds `edge` unless it was added before. Returns true if it is new.
    pub fn add_call_edge(&mut self, hcx: &mut HostContext, edge: CallEdge) -> bool {
        if self.call_edges.insert(edge) {
            hcx.solver.add_call_edge(edge);
            true
        } else {
            false
        }
    }

    pub fn add_pfg_edge(&mut self, hcx: &mut HostContext, from: Pointer, to: Pointer, kind: FlowKind) -> bool {
        if self.pfg_edges.insert((from, to)) {
            hcx.solver.add_pfg_edge(from, to, kind);
            true
        } else {
            false
        }
    }

    pub fn num_call_edges(&self) -> usize {
        self.call_edges.len()
    }

    pub fn num_pfg_edges(&self) -> usize {
        self.pfg_edges.len()
    }
}

/// The subsignature a call site invokes: its resolved target's, else the written reference's.
pub fn invoked_subsignature(program: &dyn ProgramModel, call_site: CallSiteId) -> String {
    let info = program.call_site(call_site);
    match info.target {
        Some(target) => program.method(target).subsignature(),
        None => info.method_ref.subsignature.clone(),
    }
}

/// Returns true if the call site invokes a method with the subsignature of `signature`.
pub fn invokes_subsignature_of(program: &dyn ProgramModel, call_site: CallSiteId, signature: &str) -> bool {
    match MethodRef::parse(signature) {
        Some(method_ref) => invoked_subsignature(program, call_site) == method_ref.subsignature,
        None => false,
    }
}

/// A synthesized messaging call is only added when the callee has a body and receives the payload.
pub fn is_compatible(program: &dyn ProgramModel, callee: MethodId) -> bool {
    let method = program.method(callee);
    !method.is_abstract && method.param_count() > 0
}

/// String constants among `objs`, looking through merged objects.
pub fn constant_strings(solver: &dyn Solver, objs: &[CsObj]) -> BTreeSet<String> {
    objs.iter().flat_map(|o| solver.constant_strings_of(o.obj)).collect()
}

/// String constants the current points-to set of `var` holds.
pub fn constant_strings_of_var(solver: &dyn Solver, var: CsVar) -> BTreeSet<String> {
    constant_strings(solver, &solver.points_to_of_var(var))
}
