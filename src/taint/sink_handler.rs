// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Collects taint flows into the declared sinks once the solver has converged.
//!
//! Every flow must be backed by a call chain from the method where the taint appears to the
//! method holding the sink. Flows whose chain runs through a validator are dropped, and flows
//! sharing a source method and sink call collapse into the first one found.

use log::*;
use std::collections::HashSet;
use std::time::Instant;

use super::flow::{SinkPoint, SourcePoint, TaintFlow, RESULT};
use super::source::{call_site_var, method_by_signature};
use super::TaintConfig;
use crate::graph::call_graph::MethodCallGraph;
use crate::graph::chain::{breadth_first, BfsBounds};
use crate::graph::taint_flow_graph::taint_flow_subgraph;
use crate::ir::program::{CallSiteId, MethodId, ProgramModel, VarId};
use crate::pta::{CsObj, CsVar, HostContext, Plugin, Solver, TaintManager};
use crate::util::results_dumper;

/// A reported flow with the call chain that backs it.
#[derive(Clone, Debug)]
pub struct ReportedFlow {
    pub flow: TaintFlow,
    /// Empty for field sources, which have no source method.
    pub chain: Vec<MethodId>,
}

impl ReportedFlow {
    #[inline]
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }
}

#[derive(Debug, Default)]
pub struct TaintReport {
    pub flows: Vec<ReportedFlow>,
    /// The call graph spanned by the chains of `flows`.
    pub graph: MethodCallGraph,
}

/// Returns true if the call site invokes `signature`, by written reference or, unless
/// `call_site_mode` is set, by resolved target.
fn invokes(program: &dyn ProgramModel, call_site: CallSiteId, signature: &str, call_site_mode: bool) -> bool {
    let info = program.call_site(call_site);
    if info.method_ref.to_string() == signature {
        return true;
    }
    !call_site_mode
        && info
            .target
            .map(|t| program.method_signature(t) == signature)
            .unwrap_or(false)
}

/// Returns true if a non-abstract method of `chain` calls one of `validators`.
pub fn passes_validator(program: &dyn ProgramModel, chain: &[MethodId], validators: &[String]) -> bool {
    if validators.is_empty() {
        return false;
    }
    chain.iter().copied().any(|m| {
        let method = program.method(m);
        !method.is_abstract
            && method
                .call_sites
                .iter()
                .any(|cs| validators.iter().any(|v| invokes(program, *cs, v, false)))
    })
}

/// Keeps the flows backed by a validator-free chain and drops duplicates of an earlier flow.
pub fn filter_flows(
    program: &dyn ProgramModel,
    call_graph: &MethodCallGraph,
    candidates: Vec<TaintFlow>,
    validators: &[String],
    bounds: BfsBounds,
) -> Vec<ReportedFlow> {
    let follow = |m: MethodId| {
        let method = program.method(m);
        !method.is_abstract && program.class(method.class).is_application
    };
    let mut keys = HashSet::new();
    let mut reported = Vec::new();
    for flow in candidates {
        let chain = match (flow.source.container(program), flow.sink.container(program)) {
            (Some(source), Some(sink)) => {
                let chain = breadth_first(call_graph, source, sink, bounds, follow);
                if chain.is_empty() {
                    debug!("No chain for {}", flow);
                    continue;
                }
                if passes_validator(program, &chain, validators) {
                    debug!("Validated chain for {}", flow);
                    continue;
                }
                chain
            }
            _ => Vec::new(),
        };
        if !keys.insert(flow.dedup_key(program)) {
            continue;
        }
        reported.push(ReportedFlow { flow, chain });
    }
    reported
}

pub struct SinkHandler {
    bounds: BfsBounds,
    report: Option<TaintReport>,
}

impl SinkHandler {
    pub fn new(bounds: BfsBounds) -> Self {
        SinkHandler { bounds, report: None }
    }

    pub fn report(&self) -> Option<&TaintReport> {
        self.report.as_ref()
    }

    /// Sources of the taint objects `var` points to under any of its method's contexts.
    /// Arrays count as tainted when one of their elements is.
    fn tainted_sources(solver: &dyn Solver, taint: &dyn TaintManager, method: MethodId, var: VarId) -> Vec<SourcePoint> {
        let mut sources = Vec::new();
        let mut check = |obj: CsObj| {
            if taint.is_taint(obj.obj) {
                if let Some(source) = taint.source_of(obj.obj) {
                    sources.push(source);
                }
                return true;
            }
            false
        };
        for context in solver.contexts_of(method) {
            for obj in solver.points_to_of_var(CsVar { context, var }) {
                if check(obj) {
                    continue;
                }
                for elem in solver.points_to_of_array_index(obj) {
                    check(elem);
                }
            }
        }
        sources
    }

    fn record(
        hcx: &HostContext,
        config: &TaintConfig,
        candidates: &mut Vec<TaintFlow>,
        seen: &mut HashSet<TaintFlow>,
        method: MethodId,
        var: VarId,
        sink: SinkPoint,
    ) {
        let program = hcx.program;
        let sink = sink.with_exclusions(&config.exclude_source_param_anno, &config.exclude_call_source);
        for source in Self::tainted_sources(&*hcx.solver, &*hcx.taint, method, var) {
            if sink.excludes(program, &source) {
                continue;
            }
            let flow = TaintFlow::new(program, source, sink.clone());
            if seen.insert(flow.clone()) {
                candidates.push(flow);
            }
        }
    }

    fn collect_candidates(&self, hcx: &HostContext) -> Vec<TaintFlow> {
        let program = hcx.program;
        let session = hcx.session;
        let config = &session.taint_config;
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        let mut sink_calls = 0;

        let mut reachable = hcx.solver.reachable_methods();
        reachable.sort();
        for method in reachable {
            let info = program.method(method);
            if info.is_abstract || !session.is_namespace_method(program, method) {
                continue;
            }
            for call_site in info.call_sites.iter().copied() {
                for sink in config.sinks.iter() {
                    if !invokes(program, call_site, &sink.method, config.call_site_mode) {
                        continue;
                    }
                    sink_calls += 1;
                    info!(
                        "[*] sink {} in {}",
                        program.call_site_string(call_site),
                        program.method_signature(method)
                    );
                    let Some(var) = call_site_var(program, call_site, sink.index) else {
                        continue;
                    };
                    let point = SinkPoint::at_call(call_site, sink.index, &sink.vul_id);
                    Self::record(hcx, config, &mut candidates, &mut seen, method, var, point);
                }
            }
        }

        for sink in config.sinks.iter().filter(|s| s.index == RESULT) {
            let Some(method) = method_by_signature(program, &sink.method) else {
                continue;
            };
            if !hcx.solver.is_reachable(method) {
                continue;
            }
            for var in program.method(method).return_vars.iter().copied() {
                let point = SinkPoint::at_return(method, var, &sink.vul_id);
                Self::record(hcx, config, &mut candidates, &mut seen, method, var, point);
            }
        }
        info!("[*] sink callsite count: {}", sink_calls);
        candidates
    }
}

impl Plugin for SinkHandler {
    fn name(&self) -> &str {
        "sink-handler"
    }

    fn on_finish(&mut self, hcx: &mut HostContext) {
        let start = Instant::now();
        let program = hcx.program;
        let session = hcx.session;
        let candidates = self.collect_candidates(hcx);
        let num_candidates = candidates.len();
        let call_graph = hcx.solver.call_graph();
        let flows = filter_flows(
            program,
            &call_graph,
            candidates,
            &session.taint_config.validators,
            self.bounds,
        );
        let graph = taint_flow_subgraph(&call_graph, flows.iter().map(|f| f.chain.as_slice()));
        info!(
            "[+] {} taint flows kept of {} in {}",
            flows.len(),
            num_candidates,
            humantime::format_duration(start.elapsed())
        );
        let report = TaintReport { flows, graph };
        if let Err(e) = results_dumper::dump_taint_report(program, &report, &session.options.output_dir) {
            error!("[-] {:#}", e);
        }
        self.report = Some(report);
    }
}
