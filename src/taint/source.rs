// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Places taint objects at configured sources and at the parameters of exposed controllers.

use log::*;
use std::collections::HashSet;

use super::flow::{SourcePoint, BASE, RESULT};
use super::SourceConfig;
use crate::builder::spring_container::is_controller_class;
use crate::ir::known_names::SAFE_PARAM_TYPES;
use crate::ir::program::{CallSiteId, MethodId, MethodRef, ProgramModel, VarId};
use crate::pta::{CsCallSite, CsMethod, CsObj, CsVar, HostContext, Plugin};

/// Returns true if values of `type_name` never carry attacker-controlled data.
pub fn is_safe_param_type(type_name: &str) -> bool {
    SAFE_PARAM_TYPES.contains(&type_name)
}

/// Resolves a full method signature to a declared method.
pub fn method_by_signature(program: &dyn ProgramModel, signature: &str) -> Option<MethodId> {
    let method_ref = MethodRef::parse(signature)?;
    let class = program.class_by_name(&method_ref.class_name)?;
    program.declared_method(class, &method_ref.subsignature)
}

/// The variable at `index` of a call site: receiver, result or an argument.
pub fn call_site_var(program: &dyn ProgramModel, call_site: CallSiteId, index: i32) -> Option<VarId> {
    let info = program.call_site(call_site);
    match index {
        BASE => info.receiver,
        RESULT => info.result,
        i if i >= 0 => info.arg(i as usize),
        _ => None,
    }
}

#[derive(Default)]
pub struct TaintSourcePlugin {
    call_sources: Vec<(String, i32, Option<String>)>,
    seen: HashSet<(CsCallSite, i32)>,
    num_sources: usize,
}

impl TaintSourcePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_sources(&self) -> usize {
        self.num_sources
    }

    fn taint_param(&mut self, hcx: &mut HostContext, method: MethodId, index: usize) {
        let program = hcx.program;
        let info = program.method(method);
        let (Some(param), Some(param_type)) = (info.param(index), info.param_types.get(index)) else {
            return;
        };
        let obj = hcx.taint.make_taint(SourcePoint::Param { method, index }, param_type);
        let empty = hcx.empty_context();
        hcx.solver.add_points_to(
            CsVar {
                context: empty,
                var: param,
            },
            CsObj {
                context: empty,
                obj,
            },
        );
        self.num_sources += 1;
    }

    fn controller_sources(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        let methods: Vec<MethodId> = hcx
            .session
            .exposed_endpoints(program)
            .map(|e| e.method)
            .filter(|m| !program.method(*m).is_abstract && is_controller_class(program, program.method(*m).class))
            .collect();
        for method in methods {
            let info = program.method(method);
            for (index, param_type) in info.param_types.iter().enumerate() {
                if !is_safe_param_type(param_type) {
                    self.taint_param(hcx, method, index);
                }
            }
        }
    }

    fn is_call_source(program: &dyn ProgramModel, call_site: CallSiteId, signature: &str) -> bool {
        let info = program.call_site(call_site);
        info.method_ref.to_string() == signature
            || info
                .target
                .map(|t| program.method_signature(t) == signature)
                .unwrap_or(false)
    }
}

impl Plugin for TaintSourcePlugin {
    fn name(&self) -> &str {
        "taint-source"
    }

    fn on_start(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        let session = hcx.session;
        self.controller_sources(hcx);
        for source in session.taint_config.sources.iter() {
            match source {
                SourceConfig::Call {
                    method,
                    index,
                    type_name,
                } => self.call_sources.push((method.clone(), *index, type_name.clone())),
                SourceConfig::Param { method, index } => match method_by_signature(program, method) {
                    Some(m) => self.taint_param(hcx, m, *index),
                    None => debug!("[-] Source method not found: {}", method),
                },
            }
        }
        info!("[+] {} parameter sources", self.num_sources);
    }

    fn on_new_cs_method(&mut self, hcx: &mut HostContext, cs_method: CsMethod) {
        if self.call_sources.is_empty() {
            return;
        }
        let program = hcx.program;
        for call_site in program.method(cs_method.method).call_sites.iter().copied() {
            for (signature, index, type_name) in self.call_sources.iter() {
                if !Self::is_call_source(program, call_site, signature) {
                    continue;
                }
                let key = (
                    CsCallSite {
                        context: cs_method.context,
                        call_site,
                    },
                    *index,
                );
                if !self.seen.insert(key) {
                    continue;
                }
                let Some(var) = call_site_var(program, call_site, *index) else {
                    continue;
                };
                let type_name = type_name.as_deref().unwrap_or(&program.var(var).var_type);
                let obj = hcx.taint.make_taint(
                    SourcePoint::Call {
                        call_site,
                        index: *index,
                    },
                    type_name,
                );
                let empty = hcx.empty_context();
                hcx.solver.add_points_to(
                    CsVar {
                        context: cs_method.context,
                        var,
                    },
                    CsObj {
                        context: empty,
                        obj,
                    },
                );
                self.num_sources += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::memory::MemoryProgram;
    use crate::ir::program::CallKind;

    #[test]
    fn safe_types_and_call_vars() {
        assert!(is_safe_param_type("int"));
        assert!(is_safe_param_type("org.springframework.ui.Model"));
        assert!(!is_safe_param_type("java.lang.String"));

        let mut program = MemoryProgram::new();
        let svc = program.add_class("com.foo.Svc");
        let find = program.add_method(svc, "find", &["java.lang.String"], "java.lang.String");
        let caller = program.add_method(svc, "run", &["java.lang.String"], "void");
        let arg = program.method(caller).params[0];
        let cs = program.add_call(caller, find, CallKind::Virtual, vec![arg]);

        assert_eq!(call_site_var(&program, cs, 0), Some(arg));
        assert_eq!(call_site_var(&program, cs, 1), None);
        assert_eq!(call_site_var(&program, cs, RESULT), None);
        assert_eq!(
            method_by_signature(&program, "<com.foo.Svc: java.lang.String find(java.lang.String)>"),
            Some(find)
        );
        assert_eq!(method_by_signature(&program, "<com.foo.Svc: void gone()>"), None);
    }
}
