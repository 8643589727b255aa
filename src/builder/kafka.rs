// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Kafka producers to the listeners of the topic they send to.

use log::*;
use std::collections::{BTreeMap, HashMap};

use super::{constant_strings, invokes_subsignature_of, is_compatible, EdgeLedger};
use crate::ir::known_names::{find_known, KnownNames, KAFKA_SEND};
use crate::ir::program::{CallSiteId, MethodId, ProgramModel, VarId};
use crate::pta::{CallEdge, CsCallSite, CsMethod, CsObj, CsVar, FlowKind, HostContext, Plugin, Pointer};

/// The first `topics` element of a `@KafkaListener` method.
pub fn listener_topic(program: &dyn ProgramModel, method: MethodId) -> Option<String> {
    let annotation = find_known(&program.method(method).annotations, |k| k == KnownNames::KafkaListener)?;
    annotation
        .first_string("topics")
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

#[derive(Default)]
pub struct KafkaPlugin {
    listeners: BTreeMap<String, Vec<MethodId>>,
    /// Topic variables of reachable `send` calls.
    var_to_sends: HashMap<VarId, Vec<CallSiteId>>,
    ledger: EdgeLedger,
}

impl KafkaPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listeners_of(&self, topic: &str) -> &[MethodId] {
        self.listeners.get(topic).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl Plugin for KafkaPlugin {
    fn name(&self) -> &str {
        "kafka"
    }

    fn on_start(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        for class in program.application_classes() {
            for method in program.class(class).methods.iter().copied() {
                if let Some(topic) = listener_topic(program, method) {
                    self.listeners.entry(topic).or_default().push(method);
                }
            }
        }
        debug!("{} Kafka topics with listeners", self.listeners.len());
    }

    fn on_new_method(&mut self, hcx: &mut HostContext, method: MethodId) {
        let program = hcx.program;
        for call_site in program.method(method).call_sites.iter().copied() {
            let info = program.call_site(call_site);
            if info.is_dynamic() || !invokes_subsignature_of(program, call_site, KAFKA_SEND) {
                continue;
            }
            if let Some(topic_var) = info.arg(0) {
                self.var_to_sends.entry(topic_var).or_default().push(call_site);
            }
        }
    }

    fn on_new_points_to_set(&mut self, hcx: &mut HostContext, var: CsVar, pts: &[CsObj]) {
        let Some(sends) = self.var_to_sends.get(&var.var).cloned() else {
            return;
        };
        let program = hcx.program;
        for topic in constant_strings(hcx.solver, pts) {
            let Some(callees) = self.listeners.get(&topic).cloned() else {
                continue;
            };
            let empty = hcx.empty_context();
            for callee in callees {
                for call_site in sends.iter().copied() {
                    let info = program.call_site(call_site);
                    if let (Some(payload), Some(param0)) = (info.arg(1), program.method(callee).param(0)) {
                        let from = Pointer::Var(CsVar {
                            context: var.context,
                            var: payload,
                        });
                        let to = Pointer::Var(CsVar {
                            context: empty,
                            var: param0,
                        });
                        self.ledger.add_pfg_edge(hcx, from, to, FlowKind::ParameterPassing);
                    }
                    if is_compatible(program, callee) {
                        let edge = CallEdge {
                            kind: info.kind,
                            call_site: CsCallSite {
                                context: var.context,
                                call_site,
                            },
                            callee: CsMethod {
                                context: empty,
                                method: callee,
                            },
                        };
                        if self.ledger.add_call_edge(hcx, edge) {
                            info!("[+] Kafka topic {}: {}", topic, program.method_signature(callee));
                        }
                    }
                }
            }
        }
    }

    fn synthesized_edges(&self) -> usize {
        self.ledger.num_call_edges()
    }
}
