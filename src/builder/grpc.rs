// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! gRPC stub calls to the service implementations with the same method name.

use log::*;
use std::collections::{BTreeMap, HashMap};

use super::{is_compatible, EdgeLedger};
use crate::ir::known_names::{GRPC_ABSTRACT_STUB, GRPC_BINDABLE_SERVICE};
use crate::ir::program::{CallKind, CallSiteId, MethodId};
use crate::pta::{CallEdge, CsCallSite, CsMethod, CsVar, FlowKind, HostContext, Plugin, Pointer};

#[derive(Default)]
pub struct GrpcPlugin {
    /// Stub call sites to the service methods they reach.
    invoke_to_callees: HashMap<CallSiteId, Vec<MethodId>>,
    ledger: EdgeLedger,
}

impl GrpcPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callees_of(&self, call_site: CallSiteId) -> &[MethodId] {
        self.invoke_to_callees
            .get(&call_site)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

impl Plugin for GrpcPlugin {
    fn name(&self) -> &str {
        "grpc"
    }

    fn on_start(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        let session = hcx.session;
        let (Some(stub_class), Some(service_class)) = (
            program.class_by_name(GRPC_ABSTRACT_STUB),
            program.class_by_name(GRPC_BINDABLE_SERVICE),
        ) else {
            debug!("No gRPC classes in the program");
            return;
        };

        let mut service_methods: BTreeMap<&str, Vec<MethodId>> = BTreeMap::new();
        for class in program.all_subclasses_of(service_class) {
            let info = program.class(class);
            if info.is_abstract || info.is_interface || !session.is_namespace_class(&info.name) {
                continue;
            }
            for method in info.methods.iter().copied() {
                let method_info = program.method(method);
                if method_info.param_count() > 0 {
                    service_methods.entry(method_info.name.as_str()).or_default().push(method);
                }
            }
        }

        for class in session.namespace_classes(program) {
            for method in program.class(class).methods.iter().copied() {
                if program.method(method).is_abstract {
                    continue;
                }
                for call_site in program.method(method).call_sites.iter().copied() {
                    let info = program.call_site(call_site);
                    if info.kind == CallKind::Special {
                        continue;
                    }
                    let Some(callee) = info.target else {
                        continue;
                    };
                    let callee_info = program.method(callee);
                    let callee_class = program.class(callee_info.class);
                    if !program.is_subclass(stub_class, callee_info.class)
                        || callee_class.name.starts_with("io.grpc.")
                        || callee_info.name == "build"
                        || callee_info.param_count() == 0
                    {
                        continue;
                    }
                    if info.arg(0).is_none() {
                        debug!("var is none: {}", program.call_site_string(call_site));
                        continue;
                    }
                    if let Some(targets) = service_methods.get(callee_info.name.as_str()) {
                        self.invoke_to_callees
                            .entry(call_site)
                            .or_default()
                            .extend(targets.iter().copied());
                    }
                }
            }
        }
        debug!("{} gRPC stub call sites resolved", self.invoke_to_callees.len());
    }

    fn on_new_cs_method(&mut self, hcx: &mut HostContext, cs_method: CsMethod) {
        if self.invoke_to_callees.is_empty() {
            return;
        }
        let program = hcx.program;
        for call_site in program.method(cs_method.method).call_sites.iter().copied() {
            let Some(callees) = self.invoke_to_callees.get(&call_site).cloned() else {
                continue;
            };
            let Some(arg0) = program.call_site(call_site).arg(0) else {
                continue;
            };
            let empty = hcx.empty_context();
            for callee in callees {
                if let Some(param0) = program.method(callee).param(0) {
                    let from = Pointer::Var(CsVar {
                        context: cs_method.context,
                        var: arg0,
                    });
                    let to = Pointer::Var(CsVar {
                        context: empty,
                        var: param0,
                    });
                    self.ledger.add_pfg_edge(hcx, from, to, FlowKind::ParameterPassing);
                }
                if is_compatible(program, callee) {
                    let edge = CallEdge {
                        kind: CallKind::Virtual,
                        call_site: CsCallSite {
                            context: cs_method.context,
                            call_site,
                        },
                        callee: CsMethod {
                            context: empty,
                            method: callee,
                        },
                    };
                    self.ledger.add_call_edge(hcx, edge);
                }
            }
        }
    }

    fn synthesized_edges(&self) -> usize {
        self.ledger.num_call_edges()
    }
}
