// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Feign client calls to the controllers that serve the same route.

use log::*;
use std::collections::{BTreeMap, HashMap};

use super::EdgeLedger;
use crate::ir::known_names::{find_known, has_known, KnownNames};
use crate::ir::program::{ClassId, MethodId, ProgramModel};
use crate::pta::{CallEdge, CsCallSite, CsMethod, HostContext, Plugin};

/// Returns true for interfaces annotated `*.FeignClient`.
pub fn is_feign_client(program: &dyn ProgramModel, class: ClassId) -> bool {
    let info = program.class(class);
    info.is_interface && has_known(&info.annotations, KnownNames::FeignClient)
}

pub fn is_controller(program: &dyn ProgramModel, class: ClassId) -> bool {
    find_known(&program.class(class).annotations, KnownNames::is_controller).is_some()
}

#[derive(Default)]
pub struct FeignPlugin {
    /// Feign method signature to the controller methods mapped to the same route.
    mapping_edges: HashMap<String, Vec<MethodId>>,
    ledger: EdgeLedger,
}

impl FeignPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn targets_of(&self, feign_signature: &str) -> &[MethodId] {
        self.mapping_edges
            .get(feign_signature)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

impl Plugin for FeignPlugin {
    fn name(&self) -> &str {
        "feign"
    }

    fn on_start(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        let session = hcx.session;

        let mut handler_mappings: BTreeMap<String, Vec<MethodId>> = BTreeMap::new();
        for endpoint in session.endpoints(program) {
            let class = program.method(endpoint.method).class;
            if is_controller(program, class) {
                handler_mappings
                    .entry(endpoint.route.clone())
                    .or_default()
                    .push(endpoint.method);
            }
        }

        for class in session.namespace_classes(program) {
            if !is_feign_client(program, class) {
                continue;
            }
            let class_name = &program.class(class).name;
            for method in program.class(class).methods.iter().copied() {
                let Some(route) = session.route_of(program, method) else {
                    continue;
                };
                let route = session.options.route_rewrite.apply(route, class_name);
                if let Some(handlers) = handler_mappings.get(&route) {
                    debug!("Feign {} -> {} handlers on {}", program.method_signature(method), handlers.len(), route);
                    self.mapping_edges
                        .entry(program.method_signature(method))
                        .or_default()
                        .extend(handlers.iter().copied());
                }
            }
        }
    }

    fn on_new_cs_method(&mut self, hcx: &mut HostContext, cs_method: CsMethod) {
        let program = hcx.program;
        for call_site in program.method(cs_method.method).call_sites.iter().copied() {
            let info = program.call_site(call_site);
            if !info.is_interface() {
                continue;
            }
            let Some(declaring) = program.class_by_name(&info.method_ref.class_name) else {
                continue;
            };
            if !is_feign_client(program, declaring) {
                continue;
            }
            let Some(handlers) = self.mapping_edges.get(&info.method_ref.to_string()) else {
                continue;
            };
            let cs_call_site = CsCallSite {
                context: cs_method.context,
                call_site,
            };
            for callee in handlers.clone() {
                if info.args.len() > program.method(callee).param_count() {
                    warn!(
                        "[!] not match param num {} {}",
                        info.method_ref,
                        program.method_signature(callee)
                    );
                    continue;
                }
                let edge = CallEdge {
                    kind: info.kind,
                    call_site: cs_call_site,
                    callee: CsMethod {
                        context: hcx.empty_context(),
                        method: callee,
                    },
                };
                self.ledger.add_call_edge(hcx, edge);
            }
        }
    }

    fn synthesized_edges(&self) -> usize {
        self.ledger.num_call_edges()
    }
}
