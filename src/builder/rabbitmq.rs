// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! RabbitMQ producers to the listeners of the queue an exchange and route key are bound to.

use log::*;
use std::collections::{BTreeMap, HashMap};

use super::{constant_strings_of_var, invokes_subsignature_of, is_compatible, EdgeLedger};
use crate::ir::context::ContextId;
use crate::ir::known_names::{find_known, KnownNames, RABBIT_BINDING_INIT, RABBIT_CONVERT_AND_SEND};
use crate::ir::program::{CallSiteId, MethodId, ProgramModel, VarId};
use crate::pta::{CallEdge, CsCallSite, CsMethod, CsObj, CsVar, FlowKind, HostContext, Plugin, Pointer};

/// The first `queues` element of a `@RabbitListener` method.
pub fn listener_queue(program: &dyn ProgramModel, method: MethodId) -> Option<String> {
    let annotation = find_known(&program.method(method).annotations, |k| k == KnownNames::RabbitListener)?;
    annotation
        .first_string("queues")
        .filter(|q| !q.is_empty())
        .map(|q| q.to_string())
}

#[inline]
fn bind_key(exchange: &str, route_key: &str) -> String {
    format!("{}@{}", exchange, route_key)
}

#[derive(Default)]
pub struct RabbitMqPlugin {
    listeners: BTreeMap<String, Vec<MethodId>>,
    /// Exchange and route-key variables of reachable `convertAndSend` calls.
    send_var_to_calls: HashMap<VarId, Vec<CallSiteId>>,
    /// Queue, exchange and route-key variables of reachable `Binding` constructions.
    bind_var_to_calls: HashMap<VarId, Vec<CallSiteId>>,
    /// `exchange@routeKey` to queue.
    bind_map: HashMap<String, String>,
    ledger: EdgeLedger,
}

impl RabbitMqPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_of(&self, exchange: &str, route_key: &str) -> Option<&str> {
        self.bind_map.get(&bind_key(exchange, route_key)).map(|q| q.as_str())
    }

    fn record_bindings(&mut self, hcx: &mut HostContext, context: ContextId, call_site: CallSiteId) {
        let program = hcx.program;
        let info = program.call_site(call_site);
        let (Some(queue), Some(exchange), Some(route_key)) = (info.arg(0), info.arg(2), info.arg(3)) else {
            return;
        };
        let queues = constant_strings_of_var(hcx.solver, CsVar { context, var: queue });
        let exchanges = constant_strings_of_var(hcx.solver, CsVar { context, var: exchange });
        let route_keys = constant_strings_of_var(hcx.solver, CsVar { context, var: route_key });
        for e in exchanges.iter() {
            for r in route_keys.iter() {
                for q in queues.iter() {
                    debug!("RabbitMQ binding {} -> {}", bind_key(e, r), q);
                    self.bind_map.insert(bind_key(e, r), q.clone());
                }
            }
        }
    }

    fn connect_send(&mut self, hcx: &mut HostContext, context: ContextId, call_site: CallSiteId) {
        let program = hcx.program;
        let info = program.call_site(call_site);
        let (Some(exchange), Some(route_key)) = (info.arg(0), info.arg(1)) else {
            return;
        };
        let exchanges = constant_strings_of_var(hcx.solver, CsVar { context, var: exchange });
        let route_keys = constant_strings_of_var(hcx.solver, CsVar { context, var: route_key });
        let empty = hcx.empty_context();
        for e in exchanges.iter() {
            for r in route_keys.iter() {
                let Some(queue) = self.bind_map.get(&bind_key(e, r)) else {
                    continue;
                };
                let Some(callees) = self.listeners.get(queue).cloned() else {
                    continue;
                };
                for callee in callees {
                    if let (Some(payload), Some(param0)) = (info.arg(2), program.method(callee).param(0)) {
                        let from = Pointer::Var(CsVar { context, var: payload });
                        let to = Pointer::Var(CsVar {
                            context: empty,
                            var: param0,
                        });
                        self.ledger.add_pfg_edge(hcx, from, to, FlowKind::ParameterPassing);
                    }
                    if is_compatible(program, callee) {
                        let edge = CallEdge {
                            kind: info.kind,
                            call_site: CsCallSite { context, call_site },
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
    }
}

impl Plugin for RabbitMqPlugin {
    fn name(&self) -> &str {
        "rabbitmq"
    }

    fn on_start(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        for class in program.application_classes() {
            for method in program.class(class).methods.iter().copied() {
                if let Some(queue) = listener_queue(program, method) {
                    self.listeners.entry(queue).or_default().push(method);
                }
            }
        }
    }

    fn on_new_method(&mut self, hcx: &mut HostContext, method: MethodId) {
        let program = hcx.program;
        for call_site in program.method(method).call_sites.iter().copied() {
            let info = program.call_site(call_site);
            if info.is_dynamic() {
                continue;
            }
            if invokes_subsignature_of(program, call_site, RABBIT_CONVERT_AND_SEND) {
                for var in [info.arg(0), info.arg(1)].into_iter().flatten() {
                    self.send_var_to_calls.entry(var).or_default().push(call_site);
                }
            }
            if invokes_subsignature_of(program, call_site, RABBIT_BINDING_INIT) {
                for var in [info.arg(0), info.arg(2), info.arg(3)].into_iter().flatten() {
                    self.bind_var_to_calls.entry(var).or_default().push(call_site);
                }
            }
        }
    }

    fn on_new_points_to_set(&mut self, hcx: &mut HostContext, var: CsVar, _pts: &[CsObj]) {
        if let Some(binds) = self.bind_var_to_calls.get(&var.var).cloned() {
            for call_site in binds {
                self.record_bindings(hcx, var.context, call_site);
            }
        }
        if let Some(sends) = self.send_var_to_calls.get(&var.var).cloned() {
            for call_site in sends {
                self.connect_send(hcx, var.context, call_site);
            }
        }
    }

    fn synthesized_edges(&self) -> usize {
        self.ledger.num_call_edges()
    }
}
