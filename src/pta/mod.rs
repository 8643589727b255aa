// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The seam between this layer and the host pointer analysis.
//!
//! The host owns the points-to fixpoint. It calls back into a [`Plugin`] at well defined points
//! and exposes its state through the [`Solver`] and [`TaintManager`] traits. Everything that
//! crosses a microservice boundary is synthesized by plugins through these traits.

use log::*;
use std::any::Any;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::graph::call_graph::MethodCallGraph;
use crate::ir::context::ContextId;
use crate::ir::program::{CallKind, CallSiteId, FieldId, MethodId, ProgramModel, VarId};
use crate::taint::flow::SourcePoint;

use self::session::AnalysisSession;

pub mod analysis;
pub mod context_strategy;
pub mod session;
pub mod strategies;

crate::newtype_index! {
    /// The unique identifier for each abstract heap object.
    pub struct ObjId;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CsMethod {
    pub context: ContextId,
    pub method: MethodId,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CsVar {
    pub context: ContextId,
    pub var: VarId,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CsObj {
    pub context: ContextId,
    pub obj: ObjId,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CsCallSite {
    pub context: ContextId,
    pub call_site: CallSiteId,
}

/// A call edge synthesized by a plugin.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallEdge {
    pub kind: CallKind,
    pub call_site: CsCallSite,
    pub callee: CsMethod,
}

/// The kind of a pointer flow graph edge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Local,
    ParameterPassing,
    Return,
    Other,
}

/// A node of the host's pointer flow graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pointer {
    Var(CsVar),
    InstanceField(CsObj, FieldId),
    StaticField(FieldId),
    ArrayIndex(CsObj),
}

/// What an abstract object stands for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjKind {
    /// A `new` expression in the program.
    Alloc { class_name: String },
    /// A string literal or a synthesized string constant.
    Constant(String),
    /// Several objects merged by the host's heap model.
    Merged(Vec<ObjId>),
    /// An object materialized by a plugin.
    Mock { class_name: String, desc: String },
    /// An object carrying taint.
    Taint,
}

/// How the host fills the parameters of an entry method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamProvider {
    /// The host's default provider.
    Default,
    /// Parameter index to the objects it may point to.
    Specified(BTreeMap<usize, Vec<ObjId>>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub method: MethodId,
    pub this_obj: Option<ObjId>,
    pub params: ParamProvider,
}

/// Mutable access to the host solver.
pub trait Solver {
    fn empty_context(&self) -> ContextId;

    /// The contexts under which `method` has been analyzed so far.
    fn contexts_of(&self, method: MethodId) -> Vec<ContextId>;

    fn reachable_methods(&self) -> Vec<MethodId>;

    fn is_reachable(&self, method: MethodId) -> bool {
        !self.contexts_of(method).is_empty()
    }

    fn add_call_edge(&mut self, edge: CallEdge);

    fn add_pfg_edge(&mut self, from: Pointer, to: Pointer, kind: FlowKind);

    fn add_points_to(&mut self, var: CsVar, obj: CsObj);

    fn add_field_points_to(&mut self, base: CsObj, field: FieldId, obj: CsObj);

    fn add_entry_point(&mut self, entry: EntryPoint);

    fn points_to_of_var(&self, var: CsVar) -> Vec<CsObj>;

    fn points_to_of_array_index(&self, array: CsObj) -> Vec<CsObj>;

    fn points_to_of_field(&self, base: CsObj, field: FieldId) -> Vec<CsObj>;

    fn new_mock_object(&mut self, class_name: &str, desc: &str) -> ObjId;

    fn new_string_constant(&mut self, value: &str) -> ObjId;

    fn object_kind(&self, obj: ObjId) -> ObjKind;

    /// A context-insensitive snapshot of the current call graph.
    fn call_graph(&self) -> MethodCallGraph;

    /// Points-to of `var` under every context of its method.
    fn points_to_of_var_all_contexts(&self, program: &dyn ProgramModel, var: VarId) -> Vec<CsObj> {
        self.contexts_of(program.var(var).method)
            .into_iter()
            .flat_map(|context| self.points_to_of_var(CsVar { context, var }))
            .collect()
    }

    /// String constants an object stands for, looking through merged objects.
    fn constant_strings_of(&self, obj: ObjId) -> Vec<String> {
        match self.object_kind(obj) {
            ObjKind::Constant(s) => vec![s],
            ObjKind::Merged(members) => members
                .into_iter()
                .filter_map(|m| match self.object_kind(m) {
                    ObjKind::Constant(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Taint bookkeeping of the host.
pub trait TaintManager {
    fn is_taint(&self, obj: ObjId) -> bool;
    fn source_of(&self, obj: ObjId) -> Option<SourcePoint>;
    /// Creates a taint object of type `type_name` that originates from `source`.
    fn make_taint(&mut self, source: SourcePoint, type_name: &str) -> ObjId;
}

/// Everything a plugin may touch during a callback.
pub struct HostContext<'h> {
    pub program: &'h dyn ProgramModel,
    pub solver: &'h mut dyn Solver,
    pub taint: &'h mut dyn TaintManager,
    pub session: &'h AnalysisSession,
}

impl<'h> HostContext<'h> {
    pub fn new(
        program: &'h dyn ProgramModel,
        solver: &'h mut dyn Solver,
        taint: &'h mut dyn TaintManager,
        session: &'h AnalysisSession,
    ) -> Self {
        HostContext {
            program,
            solver,
            taint,
            session,
        }
    }

    #[inline]
    pub fn empty_context(&self) -> ContextId {
        self.solver.empty_context()
    }

    /// Adds the call edge `call_site -> callee` in the empty callee context.
    pub fn add_call_edge_in_empty_context(&mut self, kind: CallKind, call_site: CsCallSite, callee: MethodId) {
        let context = self.solver.empty_context();
        self.solver.add_call_edge(CallEdge {
            kind,
            call_site,
            callee: CsMethod { context, method: callee },
        });
    }
}

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Observer of solver events. All callbacks default to doing nothing.
pub trait Plugin: AsAny {
    fn name(&self) -> &str;

    fn on_start(&mut self, _hcx: &mut HostContext) {}

    fn on_new_method(&mut self, _hcx: &mut HostContext, _method: MethodId) {}

    fn on_new_cs_method(&mut self, _hcx: &mut HostContext, _cs_method: CsMethod) {}

    fn on_new_points_to_set(&mut self, _hcx: &mut HostContext, _var: CsVar, _pts: &[CsObj]) {}

    fn on_finish(&mut self, _hcx: &mut HostContext) {}

    /// Number of edges this plugin has synthesized so far.
    fn synthesized_edges(&self) -> usize {
        0
    }
}

/// Dispatches every callback to the registered plugins in registration order.
#[derive(Default)]
pub struct CompositePlugin {
    plugins: Vec<Box<dyn Plugin>>,
}

impl CompositePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) {
        debug!("Registering plugin {}", plugin.name());
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.plugins.iter().map(|p| p.as_ref())
    }

    /// Finds the first registered plugin of type `T`.
    pub fn find<T: Plugin + 'static>(&self) -> Option<&T> {
        self.plugins
            .iter()
            .find_map(|p| p.as_ref().as_any().downcast_ref::<T>())
    }
}

impl Plugin for CompositePlugin {
    fn name(&self) -> &str {
        "composite"
    }

    fn on_start(&mut self, hcx: &mut HostContext) {
        for plugin in self.plugins.iter_mut() {
            let start = Instant::now();
            plugin.on_start(hcx);
            debug!(
                "{} started in {}",
                plugin.name(),
                humantime::format_duration(start.elapsed())
            );
        }
    }

    fn on_new_method(&mut self, hcx: &mut HostContext, method: MethodId) {
        for plugin in self.plugins.iter_mut() {
            plugin.on_new_method(hcx, method);
        }
    }

    fn on_new_cs_method(&mut self, hcx: &mut HostContext, cs_method: CsMethod) {
        for plugin in self.plugins.iter_mut() {
            plugin.on_new_cs_method(hcx, cs_method);
        }
    }

    fn on_new_points_to_set(&mut self, hcx: &mut HostContext, var: CsVar, pts: &[CsObj]) {
        for plugin in self.plugins.iter_mut() {
            plugin.on_new_points_to_set(hcx, var, pts);
        }
    }

    fn on_finish(&mut self, hcx: &mut HostContext) {
        for plugin in self.plugins.iter_mut() {
            plugin.on_finish(hcx);
        }
        for plugin in self.plugins.iter() {
            info!("[+] {}: {} synthesized edges", plugin.name(), plugin.synthesized_edges());
        }
    }

    fn synthesized_edges(&self) -> usize {
        self.plugins.iter().map(|p| p.synthesized_edges()).sum()
    }
}
