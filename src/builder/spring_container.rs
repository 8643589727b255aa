// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! A model of the Spring container: bean discovery, controller entries and dependency wiring.

use log::*;
use std::time::Instant;

use super::spring_bean::{
    decapitalize, inject_fields_of, inject_params_of, BeanRegistry, FanOutPolicy, InjectMode, SpringBean,
};
use crate::ir::known_names::{find_known, has_known, KnownNames};
use crate::ir::program::{ClassId, MethodId, ProgramModel};
use crate::pta::{CsObj, CsVar, EntryPoint, FlowKind, HostContext, ObjId, ParamProvider, Plugin, Pointer};

const BEAN_DESC: &str = "SpringBean";

/// How a namespace class takes part in the container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    JaxRs,
    Bean,
    Configuration,
}

pub fn component_kind(program: &dyn ProgramModel, class: ClassId) -> Option<ComponentKind> {
    let annotations = &program.class(class).annotations;
    if has_known(annotations, KnownNames::Configuration) {
        Some(ComponentKind::Configuration)
    } else if find_known(annotations, |k| k.is_bean_stereotype()).is_some() {
        Some(ComponentKind::Bean)
    } else if has_known(annotations, KnownNames::RsPath) {
        Some(ComponentKind::JaxRs)
    } else {
        None
    }
}

pub fn is_controller_class(program: &dyn ProgramModel, class: ClassId) -> bool {
    let annotations = &program.class(class).annotations;
    find_known(annotations, |k| k.is_controller()).is_some() || has_known(annotations, KnownNames::RsPath)
}

/// Bean names of a stereotype-annotated class: the annotation `value`, else the decapitalized
/// simple name.
pub fn direct_bean_names(program: &dyn ProgramModel, class: ClassId) -> Vec<String> {
    let info = program.class(class);
    let named = find_known(&info.annotations, |k| k.is_bean_stereotype() && !k.is_unnamed_stereotype())
        .and_then(|a| a.first_string("value"))
        .filter(|v| !v.is_empty());
    match named {
        Some(name) => vec![name.to_string()],
        None => vec![decapitalize(info.simple_name())],
    }
}

/// Bean names of a `@Bean` method: its `name` and `value` elements, else the method name.
pub fn produced_bean_names(program: &dyn ProgramModel, method: MethodId) -> Vec<String> {
    let info = program.method(method);
    let mut names: Vec<String> = find_known(&info.annotations, |k| k == KnownNames::Bean)
        .map(|a| {
            a.strings("name")
                .into_iter()
                .chain(a.strings("value"))
                .filter(|n| !n.is_empty())
                .map(|n| n.to_string())
                .collect()
        })
        .unwrap_or_default();
    if names.is_empty() {
        names.push(info.name.clone());
    }
    names
}

#[derive(Default)]
pub struct SpringContainerPlugin {
    registry: BeanRegistry,
    fan_out: FanOutPolicy,
    /// Mock objects of configuration hosts.
    hosts: Vec<(ClassId, ObjId)>,
    entries: usize,
    wired: usize,
}

impl SpringContainerPlugin {
    pub fn new(fan_out: FanOutPolicy) -> Self {
        SpringContainerPlugin {
            fan_out,
            ..Default::default()
        }
    }

    pub fn registry(&self) -> &BeanRegistry {
        &self.registry
    }

    pub fn num_entries(&self) -> usize {
        self.entries
    }

    fn scan_beans(&mut self, hcx: &mut HostContext, classes: &[ClassId]) {
        let program = hcx.program;
        for class in classes.iter().copied() {
            let info = program.class(class);
            let Some(kind) = component_kind(program, class) else {
                continue;
            };
            let object = hcx.solver.new_mock_object(&info.name, BEAN_DESC);
            match kind {
                ComponentKind::Configuration => self.hosts.push((class, object)),
                ComponentKind::Bean | ComponentKind::JaxRs => {
                    let bean = SpringBean::Direct {
                        class,
                        names: direct_bean_names(program, class),
                        primary: has_known(&info.annotations, KnownNames::Primary),
                        object,
                    };
                    debug!("Bean {:?} of {}", bean.names(), info.name);
                    self.registry.register(bean);
                }
            }
        }

        for (host, _) in self.hosts.clone() {
            for method in program.class(host).methods.iter().copied() {
                let info = program.method(method);
                if !has_known(&info.annotations, KnownNames::Bean) {
                    continue;
                }
                let Some(class) = program.class_by_name(&info.return_type) else {
                    debug!("[-] Can't resolve the bean type {} of {}", info.return_type, info.name);
                    continue;
                };
                let object = hcx.solver.new_mock_object(&info.return_type, BEAN_DESC);
                let empty = hcx.empty_context();
                for site in info.return_vars.iter().copied() {
                    hcx.solver.add_points_to(
                        CsVar {
                            context: empty,
                            var: site,
                        },
                        CsObj {
                            context: empty,
                            obj: object,
                        },
                    );
                }
                self.registry.register(SpringBean::Produced {
                    class,
                    names: produced_bean_names(program, method),
                    primary: has_known(&info.annotations, KnownNames::Primary),
                    object,
                    producer: method,
                    producer_sites: info.return_vars.clone(),
                });
            }
        }
    }

    fn add_entry(&mut self, hcx: &mut HostContext, method: MethodId, this_obj: ObjId) {
        hcx.solver.add_entry_point(EntryPoint {
            method,
            this_obj: Some(this_obj),
            params: ParamProvider::Default,
        });
        self.entries += 1;
    }

    /// Controller endpoints and `@Bean` producers become entry points.
    fn register_entries(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        let session = hcx.session;
        let controllers: Vec<(ClassId, ObjId)> = self
            .registry
            .beans()
            .iter()
            .filter(|b| matches!(b, SpringBean::Direct { .. }) && is_controller_class(program, b.class()))
            .map(|b| (b.class(), b.object()))
            .collect();
        for (class, object) in controllers {
            for method in program.class(class).methods.iter().copied() {
                if program.method(method).is_abstract || !session.is_exposed(program, method) {
                    continue;
                }
                self.add_entry(hcx, method, object);
            }
        }
        for (host, object) in self.hosts.clone() {
            for method in program.class(host).methods.iter().copied() {
                if has_known(&program.method(method).annotations, KnownNames::Bean) {
                    self.add_entry(hcx, method, object);
                }
            }
        }
    }

    fn wire_fields(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        let empty = hcx.empty_context();
        let holders: Vec<(ClassId, ObjId)> = self
            .registry
            .beans()
            .iter()
            .map(|b| (b.class(), b.object()))
            .collect();
        for (holder, holder_obj) in holders {
            let base = CsObj {
                context: empty,
                obj: holder_obj,
            };
            for inject in inject_fields_of(program, holder) {
                let field = program.field(inject.field);
                let selected = self.registry.select(program, &field.field_type, &inject.mode, self.fan_out);
                if selected.is_empty() {
                    match &inject.mode {
                        InjectMode::ByQualifier(_) => warn!(
                            "Can't find the field {}.{} {}",
                            program.class(field.class).name,
                            field.name,
                            inject.mode
                        ),
                        _ if inject.required => debug!(
                            "[-] No bean of type {} for {}.{}",
                            field.field_type,
                            program.class(field.class).name,
                            field.name
                        ),
                        _ => {}
                    }
                    continue;
                }
                for bean in selected {
                    match bean {
                        SpringBean::Direct { object, .. } => {
                            hcx.solver.add_field_points_to(
                                base,
                                inject.field,
                                CsObj {
                                    context: empty,
                                    obj: *object,
                                },
                            );
                        }
                        SpringBean::Produced { producer_sites, .. } => {
                            for site in producer_sites.iter().copied() {
                                hcx.solver.add_pfg_edge(
                                    Pointer::Var(CsVar {
                                        context: empty,
                                        var: site,
                                    }),
                                    Pointer::InstanceField(base, inject.field),
                                    FlowKind::Other,
                                );
                            }
                        }
                    }
                    self.wired += 1;
                }
            }
        }
    }

    fn wire_params(&mut self, hcx: &mut HostContext, classes: &[ClassId]) {
        let program = hcx.program;
        let empty = hcx.empty_context();
        for class in classes.iter().copied() {
            if component_kind(program, class).is_none() {
                continue;
            }
            let mut constructed = Vec::new();
            for inject in inject_params_of(program, class) {
                let method = program.method(inject.method);
                let (Some(param), Some(param_type)) =
                    (method.param(inject.index), method.param_types.get(inject.index))
                else {
                    continue;
                };
                let selected = self.registry.select(program, param_type, &inject.mode, self.fan_out);
                if selected.is_empty() {
                    if let InjectMode::ByQualifier(_) = inject.mode {
                        warn!(
                            "Can't find the param {} of {} {}",
                            inject.index,
                            program.method_signature(inject.method),
                            inject.mode
                        );
                    }
                    continue;
                }
                let to = CsVar {
                    context: empty,
                    var: param,
                };
                for bean in selected {
                    match bean {
                        SpringBean::Direct { object, .. } => {
                            hcx.solver.add_points_to(
                                to,
                                CsObj {
                                    context: empty,
                                    obj: *object,
                                },
                            );
                        }
                        SpringBean::Produced { producer_sites, .. } => {
                            for site in producer_sites.iter().copied() {
                                hcx.solver.add_pfg_edge(
                                    Pointer::Var(CsVar {
                                        context: empty,
                                        var: site,
                                    }),
                                    Pointer::Var(to),
                                    FlowKind::Other,
                                );
                            }
                        }
                    }
                    self.wired += 1;
                }
                if method.is_constructor() && !constructed.contains(&inject.method) {
                    constructed.push(inject.method);
                }
            }
            // Constructors only run on the container's own objects.
            for constructor in constructed {
                for object in self.registry.objects_of_class(class) {
                    self.add_entry(hcx, constructor, object);
                }
            }
        }
    }
}

impl Plugin for SpringContainerPlugin {
    fn name(&self) -> &str {
        "spring-container"
    }

    fn on_start(&mut self, hcx: &mut HostContext) {
        let start = Instant::now();
        let classes = hcx.session.namespace_classes(hcx.program);
        self.scan_beans(hcx, &classes);
        self.register_entries(hcx);
        self.wire_fields(hcx);
        self.wire_params(hcx, &classes);
        info!(
            "[+] {} beans, {} entries, {} injections in {}",
            self.registry.len(),
            self.entries,
            self.wired,
            humantime::format_duration(start.elapsed())
        );
    }

    fn synthesized_edges(&self) -> usize {
        self.wired
    }
}
