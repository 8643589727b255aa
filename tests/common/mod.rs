// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! A small host that drives plugins to a fixpoint over a `MemoryProgram`.
//!
//! Every method is analyzed under the empty context only. Direct calls with a resolved target
//! pass arguments and return values, and every pointer flow graph edge copies points-to sets.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use mscan::gateway::service::Service;
use mscan::graph::call_graph::MethodCallGraph;
use mscan::ir::context::ContextId;
use mscan::ir::memory::MemoryProgram;
use mscan::ir::program::{Annotation, CallSiteId, FieldId, MethodId, ProgramModel, VarId};
use mscan::pta::session::AnalysisSession;
use mscan::pta::{
    CallEdge, CsMethod, CsObj, CsVar, EntryPoint, FlowKind, HostContext, ObjId, ObjKind, Plugin, Pointer, Solver,
    TaintManager,
};
use mscan::taint::flow::SourcePoint;
use mscan::taint::TaintConfig;
use mscan::util::options::AnalysisOptions;

pub const EMPTY: ContextId = ContextId::new(0);
const TAINT_BASE: usize = 1 << 20;

pub fn cs_var(var: VarId) -> CsVar {
    CsVar { context: EMPTY, var }
}

pub fn cs_obj(obj: ObjId) -> CsObj {
    CsObj { context: EMPTY, obj }
}

pub fn annotation(type_name: &str) -> Annotation {
    Annotation::new(type_name)
}

/// Options for an application under `com.foo`.
pub fn options() -> AnalysisOptions {
    AnalysisOptions {
        keywords: vec!["com.foo".to_string()],
        ..Default::default()
    }
}

pub fn session(services: Vec<Service>, taint_config: TaintConfig) -> AnalysisSession {
    AnalysisSession::new(options(), services, taint_config, None)
}

#[derive(Default)]
pub struct MockSolver {
    reachable: BTreeSet<MethodId>,
    pts: BTreeMap<CsVar, BTreeSet<CsObj>>,
    field_pts: BTreeMap<(CsObj, FieldId), BTreeSet<CsObj>>,
    array_pts: HashMap<CsObj, Vec<CsObj>>,
    objects: Vec<ObjKind>,
    containers: HashMap<CallSiteId, MethodId>,
    cg_edges: BTreeSet<(CallSiteId, MethodId, MethodId)>,
    pub call_edges: Vec<CallEdge>,
    pub pfg_edges: Vec<(Pointer, Pointer, FlowKind)>,
    pub entries: Vec<EntryPoint>,
}

impl MockSolver {
    pub fn new(program: &dyn ProgramModel) -> Self {
        let mut containers = HashMap::new();
        for class in program.classes() {
            for method in program.class(class).methods.iter().copied() {
                for call_site in program.method(method).call_sites.iter().copied() {
                    containers.insert(call_site, method);
                }
            }
        }
        MockSolver {
            containers,
            ..Default::default()
        }
    }

    pub fn reach(&mut self, method: MethodId) {
        self.reachable.insert(method);
    }

    pub fn new_object(&mut self, class_name: &str) -> ObjId {
        self.push_object(ObjKind::Alloc {
            class_name: class_name.to_string(),
        })
    }

    fn push_object(&mut self, kind: ObjKind) -> ObjId {
        self.objects.push(kind);
        ObjId::new(self.objects.len() - 1)
    }

    pub fn var_points_to(&self, var: VarId) -> Vec<CsObj> {
        self.points_to_of_var(cs_var(var))
    }

    pub fn field_points_to(&self, base: CsObj, field: FieldId) -> Vec<CsObj> {
        self.field_pts
            .get(&(base, field))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn mock_objects(&self, desc: &str) -> Vec<ObjId> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, k)| matches!(k, ObjKind::Mock { desc: d, .. } if d == desc))
            .map(|(i, _)| ObjId::new(i))
            .collect()
    }

    pub fn edges_to(&self, callee: MethodId) -> usize {
        self.call_edges.iter().filter(|e| e.callee.method == callee).count()
    }

    fn insert_pts(&mut self, var: CsVar, objs: impl IntoIterator<Item = CsObj>) -> bool {
        let set = self.pts.entry(var).or_default();
        let before = set.len();
        set.extend(objs);
        set.len() != before
    }

    fn read(&self, pointer: &Pointer) -> Vec<CsObj> {
        match pointer {
            Pointer::Var(var) => self.points_to_of_var(*var),
            Pointer::InstanceField(base, field) => self.field_points_to(*base, *field),
            Pointer::ArrayIndex(array) => self.points_to_of_array_index(*array),
            Pointer::StaticField(_) => Vec::new(),
        }
    }

    /// Adds parameter and return flow for the direct calls of `method`.
    fn expand(&mut self, program: &dyn ProgramModel, method: MethodId) -> Vec<MethodId> {
        let mut callees = Vec::new();
        for call_site in program.method(method).call_sites.iter().copied() {
            let info = program.call_site(call_site);
            let Some(target) = info.target else {
                continue;
            };
            self.cg_edges.insert((call_site, method, target));
            let target_info = program.method(target);
            for (arg, param) in info.args.iter().zip(target_info.params.iter()) {
                self.pfg_edges.push((
                    Pointer::Var(cs_var(*arg)),
                    Pointer::Var(cs_var(*param)),
                    FlowKind::ParameterPassing,
                ));
            }
            if let Some(result) = info.result {
                for ret in target_info.return_vars.iter() {
                    self.pfg_edges
                        .push((Pointer::Var(cs_var(*ret)), Pointer::Var(cs_var(result)), FlowKind::Return));
                }
            }
            callees.push(target);
        }
        callees
    }

    fn propagate(&mut self) -> bool {
        let mut changed = false;
        for (from, to, _) in self.pfg_edges.clone() {
            let objs = self.read(&from);
            if objs.is_empty() {
                continue;
            }
            changed |= match to {
                Pointer::Var(var) => self.insert_pts(var, objs),
                Pointer::InstanceField(base, field) => {
                    let set = self.field_pts.entry((base, field)).or_default();
                    let before = set.len();
                    set.extend(objs);
                    set.len() != before
                }
                _ => false,
            };
        }
        changed
    }
}

impl Solver for MockSolver {
    fn empty_context(&self) -> ContextId {
        EMPTY
    }

    fn contexts_of(&self, method: MethodId) -> Vec<ContextId> {
        if self.reachable.contains(&method) {
            vec![EMPTY]
        } else {
            Vec::new()
        }
    }

    fn reachable_methods(&self) -> Vec<MethodId> {
        self.reachable.iter().copied().collect()
    }

    fn add_call_edge(&mut self, edge: CallEdge) {
        if let Some(caller) = self.containers.get(&edge.call_site.call_site).copied() {
            self.cg_edges.insert((edge.call_site.call_site, caller, edge.callee.method));
        }
        self.reachable.insert(edge.callee.method);
        self.call_edges.push(edge);
    }

    fn add_pfg_edge(&mut self, from: Pointer, to: Pointer, kind: FlowKind) {
        self.pfg_edges.push((from, to, kind));
    }

    fn add_points_to(&mut self, var: CsVar, obj: CsObj) {
        self.insert_pts(var, [obj]);
    }

    fn add_field_points_to(&mut self, base: CsObj, field: FieldId, obj: CsObj) {
        self.field_pts.entry((base, field)).or_default().insert(obj);
    }

    fn add_entry_point(&mut self, entry: EntryPoint) {
        self.reachable.insert(entry.method);
        self.entries.push(entry);
    }

    fn points_to_of_var(&self, var: CsVar) -> Vec<CsObj> {
        self.pts
            .get(&var)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn points_to_of_array_index(&self, array: CsObj) -> Vec<CsObj> {
        self.array_pts.get(&array).cloned().unwrap_or_default()
    }

    fn points_to_of_field(&self, base: CsObj, field: FieldId) -> Vec<CsObj> {
        self.field_points_to(base, field)
    }

    fn new_mock_object(&mut self, class_name: &str, desc: &str) -> ObjId {
        self.push_object(ObjKind::Mock {
            class_name: class_name.to_string(),
            desc: desc.to_string(),
        })
    }

    fn new_string_constant(&mut self, value: &str) -> ObjId {
        if let Some(i) = self
            .objects
            .iter()
            .position(|k| matches!(k, ObjKind::Constant(s) if s == value))
        {
            return ObjId::new(i);
        }
        self.push_object(ObjKind::Constant(value.to_string()))
    }

    fn object_kind(&self, obj: ObjId) -> ObjKind {
        if obj.index() >= TAINT_BASE {
            return ObjKind::Taint;
        }
        self.objects[obj.index()].clone()
    }

    fn call_graph(&self) -> MethodCallGraph {
        let mut call_graph = MethodCallGraph::new();
        for method in self.reachable.iter() {
            call_graph.add_node(*method);
        }
        for (call_site, caller, callee) in self.cg_edges.iter() {
            call_graph.add_edge(*call_site, *caller, *callee);
        }
        call_graph
    }
}

#[derive(Default)]
pub struct MockTaint {
    sources: Vec<SourcePoint>,
}

impl MockTaint {
    pub fn sources(&self) -> &[SourcePoint] {
        &self.sources
    }
}

impl TaintManager for MockTaint {
    fn is_taint(&self, obj: ObjId) -> bool {
        obj.index() >= TAINT_BASE && obj.index() - TAINT_BASE < self.sources.len()
    }

    fn source_of(&self, obj: ObjId) -> Option<SourcePoint> {
        obj.index()
            .checked_sub(TAINT_BASE)
            .and_then(|i| self.sources.get(i).cloned())
    }

    fn make_taint(&mut self, source: SourcePoint, _type_name: &str) -> ObjId {
        self.sources.push(source);
        ObjId::new(TAINT_BASE + self.sources.len() - 1)
    }
}

pub struct MockHost {
    pub program: MemoryProgram,
    pub solver: MockSolver,
    pub taint: MockTaint,
    pub session: AnalysisSession,
}

impl MockHost {
    pub fn new(program: MemoryProgram, session: AnalysisSession) -> Self {
        let solver = MockSolver::new(&program);
        MockHost {
            program,
            solver,
            taint: MockTaint::default(),
            session,
        }
    }

    pub fn hcx(&mut self) -> HostContext<'_> {
        HostContext::new(&self.program, &mut self.solver, &mut self.taint, &self.session)
    }

    /// Runs `plugin` from start to finish. `seed` runs right after `on_start`.
    pub fn run_with(&mut self, plugin: &mut dyn Plugin, seed: impl FnOnce(&mut MockSolver)) {
        plugin.on_start(&mut self.hcx());
        seed(&mut self.solver);

        let mut analyzed = BTreeSet::new();
        let mut announced: HashMap<CsVar, usize> = HashMap::new();
        loop {
            let mut changed = false;

            let mut pending: Vec<MethodId> = self.solver.reachable_methods();
            while let Some(method) = pending.pop() {
                if !analyzed.insert(method) {
                    continue;
                }
                changed = true;
                for callee in self.solver.expand(&self.program, method) {
                    self.solver.reach(callee);
                    pending.push(callee);
                }
                let mut hcx = self.hcx();
                plugin.on_new_method(&mut hcx, method);
                plugin.on_new_cs_method(&mut hcx, CsMethod { context: EMPTY, method });
            }

            changed |= self.solver.propagate();

            let grown: Vec<(CsVar, Vec<CsObj>)> = self
                .solver
                .pts
                .iter()
                .filter(|(var, objs)| announced.get(*var) != Some(&objs.len()))
                .map(|(var, objs)| (*var, objs.iter().copied().collect()))
                .collect();
            for (var, objs) in grown {
                announced.insert(var, objs.len());
                changed = true;
                plugin.on_new_points_to_set(&mut self.hcx(), var, &objs);
            }

            if !changed {
                break;
            }
        }
        plugin.on_finish(&mut self.hcx());
    }

    pub fn run(&mut self, plugin: &mut dyn Plugin) {
        self.run_with(plugin, |_| {});
    }
}
