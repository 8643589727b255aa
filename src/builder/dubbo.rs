// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Dubbo consumer calls to the provider implementing the called interface.

use super::EdgeLedger;
use crate::ir::known_names::{find_known, KnownNames};
use crate::ir::program::{ClassId, ProgramModel};
use crate::pta::{CallEdge, CsCallSite, CsMethod, HostContext, Plugin};

pub fn is_dubbo_service(program: &dyn ProgramModel, class: ClassId) -> bool {
    find_known(&program.class(class).annotations, KnownNames::is_dubbo_provider).is_some()
}

#[derive(Default)]
pub struct DubboPlugin {
    providers: Vec<ClassId>,
    ledger: EdgeLedger,
}

impl DubboPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn providers(&self) -> &[ClassId] {
        &self.providers
    }
}

impl Plugin for DubboPlugin {
    fn name(&self) -> &str {
        "dubbo"
    }

    fn on_start(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        self.providers = program
            .application_classes()
            .into_iter()
            .filter(|c| is_dubbo_service(program, *c))
            .collect();
    }

    fn on_new_cs_method(&mut self, hcx: &mut HostContext, cs_method: CsMethod) {
        if self.providers.is_empty() {
            return;
        }
        let program = hcx.program;
        for call_site in program.method(cs_method.method).call_sites.iter().copied() {
            let info = program.call_site(call_site);
            if !info.is_interface() {
                continue;
            }
            let Some(declaring) = program.class_by_name(&info.method_ref.class_name) else {
                continue;
            };
            if !program.class(declaring).is_interface {
                continue;
            }
            let Some(provider) = self
                .providers
                .iter()
                .copied()
                .find(|p| program.is_subclass(declaring, *p))
            else {
                continue;
            };
            let Some(target) = program.declared_method(provider, &info.method_ref.subsignature) else {
                continue;
            };
            if info.args.len() > program.method(target).param_count() {
                continue;
            }
            let edge = CallEdge {
                kind: info.kind,
                call_site: CsCallSite {
                    context: cs_method.context,
                    call_site,
                },
                callee: CsMethod {
                    context: hcx.empty_context(),
                    method: target,
                },
            };
            self.ledger.add_call_edge(hcx, edge);
        }
    }

    fn synthesized_edges(&self) -> usize {
        self.ledger.num_call_edges()
    }
}
