// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Spring beans and the rules that pick the beans wired into an injection point.

use log::*;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::ir::known_names::{find_known, KnownNames};
use crate::ir::program::{Annotation, ClassId, FieldId, MethodId, ProgramModel, VarId};
use crate::pta::ObjId;

/// A bean registered in the container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpringBean {
    /// A stereotype-annotated class, backed by one mock object.
    Direct {
        class: ClassId,
        names: Vec<String>,
        primary: bool,
        object: ObjId,
    },
    /// The value of a `@Bean` method. The bean is whatever its return variables point to.
    Produced {
        class: ClassId,
        names: Vec<String>,
        primary: bool,
        object: ObjId,
        producer: MethodId,
        producer_sites: Vec<VarId>,
    },
}

impl SpringBean {
    pub fn class(&self) -> ClassId {
        match self {
            SpringBean::Direct { class, .. } | SpringBean::Produced { class, .. } => *class,
        }
    }

    pub fn names(&self) -> &[String] {
        match self {
            SpringBean::Direct { names, .. } | SpringBean::Produced { names, .. } => names,
        }
    }

    pub fn is_primary(&self) -> bool {
        match self {
            SpringBean::Direct { primary, .. } | SpringBean::Produced { primary, .. } => *primary,
        }
    }

    pub fn object(&self) -> ObjId {
        match self {
            SpringBean::Direct { object, .. } | SpringBean::Produced { object, .. } => *object,
        }
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.names().iter().any(|n| n == name)
    }
}

/// What to do when several beans of the same type qualify and none is primary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FanOutPolicy {
    /// Wire every candidate.
    #[default]
    All,
    /// Report the ambiguity and wire nothing.
    Diagnose,
}

impl FromStr for FanOutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(FanOutPolicy::All),
            "diagnose" => Ok(FanOutPolicy::Diagnose),
            _ => Err(format!("unknown fan-out policy {}", s)),
        }
    }
}

/// How an injection point names the bean it wants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InjectMode {
    ByType,
    ByQualifier(String),
    /// `@Resource` without a name: the field name first, then the type.
    ByNameOrType(String),
}

impl fmt::Display for InjectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectMode::ByType => write!(f, "by type"),
            InjectMode::ByQualifier(name) => write!(f, "by qualifier {}", name),
            InjectMode::ByNameOrType(name) => write!(f, "by name {} or type", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectFieldInfo {
    pub field: FieldId,
    /// The bean class whose objects hold the field. It may be a subclass of the declaring class.
    pub holder: ClassId,
    pub mode: InjectMode,
    pub required: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectParamInfo {
    pub method: MethodId,
    pub index: usize,
    pub mode: InjectMode,
    pub required: bool,
}

/// Java bean naming: `OrderService` becomes `orderService`, `URLService` stays as is.
pub fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) if first.is_uppercase() && second.is_uppercase() => name.to_string(),
        (Some(first), _) => first.to_lowercase().chain(name.chars().skip(1)).collect(),
        (None, _) => String::new(),
    }
}

fn qualifier_of(annotations: &[Annotation]) -> Option<String> {
    find_known(annotations, |k| k == KnownNames::Qualifier)
        .and_then(|a| a.first_string("value"))
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn is_required(annotations: &[Annotation]) -> bool {
    find_known(annotations, |k| k == KnownNames::Autowired)
        .and_then(|a| a.element("required"))
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

/// The injection mode of an annotated field, or `None` if the field is not injected.
pub fn field_inject_mode(field_name: &str, annotations: &[Annotation]) -> Option<InjectMode> {
    find_known(annotations, |k| k.is_injection())?;
    if let Some(qualifier) = qualifier_of(annotations) {
        return Some(InjectMode::ByQualifier(qualifier));
    }
    match find_known(annotations, |k| k == KnownNames::Resource) {
        Some(resource) => match resource.first_string("name").filter(|n| !n.is_empty()) {
            Some(name) => Some(InjectMode::ByQualifier(name.to_string())),
            None => Some(InjectMode::ByNameOrType(field_name.to_string())),
        },
        None => Some(InjectMode::ByType),
    }
}

pub fn param_inject_mode(annotations: &[Annotation]) -> InjectMode {
    match qualifier_of(annotations) {
        Some(qualifier) => InjectMode::ByQualifier(qualifier),
        None => InjectMode::ByType,
    }
}

/// Injected fields of `holder`, collected along its superclass chain.
pub fn inject_fields_of(program: &dyn ProgramModel, holder: ClassId) -> Vec<InjectFieldInfo> {
    let mut fields = Vec::new();
    let mut current = Some(holder);
    while let Some(class) = current {
        let info = program.class(class);
        for field in info.fields.iter().copied() {
            let field_info = program.field(field);
            if field_info.is_static {
                continue;
            }
            if let Some(mode) = field_inject_mode(&field_info.name, &field_info.annotations) {
                fields.push(InjectFieldInfo {
                    field,
                    holder,
                    mode,
                    required: is_required(&field_info.annotations),
                });
            }
        }
        current = info.super_class;
    }
    fields
}

/// Injected parameters of a bean class's constructors and `@Bean` methods.
///
/// A class with a single constructor taking parameters uses that constructor unconditionally.
/// Otherwise every constructor and `@Bean` method with parameters is an injection site.
pub fn inject_params_of(program: &dyn ProgramModel, class: ClassId) -> Vec<InjectParamInfo> {
    let info = program.class(class);
    let constructors: Vec<MethodId> = info
        .methods
        .iter()
        .copied()
        .filter(|m| {
            let method = program.method(*m);
            method.is_constructor() && method.param_count() > 0
        })
        .collect();
    if let [only] = constructors.as_slice() {
        return (0..program.method(*only).param_count())
            .map(|index| InjectParamInfo {
                method: *only,
                index,
                mode: InjectMode::ByType,
                required: true,
            })
            .collect();
    }

    let mut params = Vec::new();
    for m in info.methods.iter().copied() {
        let method = program.method(m);
        let is_producer = find_known(&method.annotations, |k| k == KnownNames::Bean).is_some();
        if !(method.is_constructor() || is_producer) || method.param_count() == 0 {
            continue;
        }
        for index in 0..method.param_count() {
            let annotations = method.param_annotations(index);
            params.push(InjectParamInfo {
                method: m,
                index,
                mode: param_inject_mode(annotations),
                required: is_required(&method.annotations),
            });
        }
    }
    params
}

/// All beans of one run with their name index.
#[derive(Debug, Default)]
pub struct BeanRegistry {
    beans: Vec<SpringBean>,
    by_name: HashMap<String, usize>,
}

impl BeanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bean. A name already taken keeps its first bean.
    pub fn register(&mut self, bean: SpringBean) {
        let index = self.beans.len();
        for name in bean.names() {
            if let Some(existing) = self.by_name.get(name) {
                debug!("Bean name {} is already taken by bean #{}", name, existing);
                continue;
            }
            self.by_name.insert(name.clone(), index);
        }
        self.beans.push(bean);
    }

    pub fn beans(&self) -> &[SpringBean] {
        &self.beans
    }

    pub fn len(&self) -> usize {
        self.beans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }

    pub fn by_name(&self, name: &str) -> Option<&SpringBean> {
        self.by_name.get(name).map(|i| &self.beans[*i])
    }

    /// Direct beans backed by exactly `class`.
    pub fn objects_of_class(&self, class: ClassId) -> Vec<ObjId> {
        self.beans
            .iter()
            .filter(|b| matches!(b, SpringBean::Direct { .. }) && b.class() == class)
            .map(|b| b.object())
            .collect()
    }

    /// Beans whose backing class is a subtype of `declared_type`.
    pub fn candidates_of_type(&self, program: &dyn ProgramModel, declared_type: &str) -> Vec<&SpringBean> {
        let Some(declared) = program.class_by_name(declared_type) else {
            return Vec::new();
        };
        self.beans
            .iter()
            .filter(|b| program.is_subclass(declared, b.class()))
            .collect()
    }

    /// Picks the beans for a by-type injection of `declared_type`.
    ///
    /// A single candidate is wired. Among several, a unique primary wins; otherwise `policy`
    /// decides between wiring every candidate and wiring none.
    pub fn select_by_type(
        &self,
        program: &dyn ProgramModel,
        declared_type: &str,
        policy: FanOutPolicy,
    ) -> Vec<&SpringBean> {
        let candidates = self.candidates_of_type(program, declared_type);
        if candidates.len() <= 1 {
            return candidates;
        }
        let primaries: Vec<&SpringBean> = candidates.iter().copied().filter(|b| b.is_primary()).collect();
        if primaries.len() == 1 {
            return primaries;
        }
        match policy {
            FanOutPolicy::All => candidates,
            FanOutPolicy::Diagnose => {
                warn!(
                    "[!] {} beans of type {} qualify and none is primary",
                    candidates.len(),
                    declared_type
                );
                Vec::new()
            }
        }
    }

    /// Picks the beans an injection point of `declared_type` receives under `mode`.
    pub fn select(
        &self,
        program: &dyn ProgramModel,
        declared_type: &str,
        mode: &InjectMode,
        policy: FanOutPolicy,
    ) -> Vec<&SpringBean> {
        match mode {
            InjectMode::ByType => self.select_by_type(program, declared_type, policy),
            InjectMode::ByQualifier(name) => self.by_name(name).into_iter().collect(),
            InjectMode::ByNameOrType(name) => match self.by_name(name) {
                Some(bean) => vec![bean],
                None => self.select_by_type(program, declared_type, policy),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::memory::MemoryProgram;

    fn direct(class: ClassId, name: &str, primary: bool, object: usize) -> SpringBean {
        SpringBean::Direct {
            class,
            names: vec![name.to_string()],
            primary,
            object: ObjId::new(object),
        }
    }

    fn repo_program() -> (MemoryProgram, ClassId, ClassId, ClassId) {
        let mut program = MemoryProgram::new();
        let api = program.add_class("com.foo.OrderRepo");
        program.class_mut(api).is_interface = true;
        let jdbc = program.add_class("com.foo.JdbcOrderRepo");
        program.class_mut(jdbc).interfaces.push(api);
        let mongo = program.add_class("com.foo.MongoOrderRepo");
        program.class_mut(mongo).interfaces.push(api);
        (program, api, jdbc, mongo)
    }

    #[test]
    fn bean_names() {
        assert_eq!(decapitalize("OrderService"), "orderService");
        assert_eq!(decapitalize("URLService"), "URLService");
        assert_eq!(decapitalize("a"), "a");
        assert_eq!(decapitalize(""), "");
    }

    #[test]
    fn single_candidate_is_wired() {
        let (program, _, jdbc, _) = repo_program();
        let mut registry = BeanRegistry::new();
        registry.register(direct(jdbc, "jdbcOrderRepo", false, 0));
        let selected = registry.select_by_type(&program, "com.foo.OrderRepo", FanOutPolicy::All);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].object(), ObjId::new(0));
        assert!(registry
            .select_by_type(&program, "com.foo.Missing", FanOutPolicy::All)
            .is_empty());
    }

    #[test]
    fn fan_out_and_primary() {
        let (program, _, jdbc, mongo) = repo_program();
        let mut registry = BeanRegistry::new();
        registry.register(direct(jdbc, "jdbcOrderRepo", false, 0));
        registry.register(direct(mongo, "mongoOrderRepo", false, 1));
        assert_eq!(
            registry
                .select_by_type(&program, "com.foo.OrderRepo", FanOutPolicy::All)
                .len(),
            2
        );
        assert!(registry
            .select_by_type(&program, "com.foo.OrderRepo", FanOutPolicy::Diagnose)
            .is_empty());

        let mut registry = BeanRegistry::new();
        registry.register(direct(jdbc, "jdbcOrderRepo", false, 0));
        registry.register(direct(mongo, "mongoOrderRepo", true, 1));
        let selected = registry.select_by_type(&program, "com.foo.OrderRepo", FanOutPolicy::All);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].object(), ObjId::new(1));
    }

    #[test]
    fn qualifier_and_resource_modes() {
        let (program, _, jdbc, mongo) = repo_program();
        let mut registry = BeanRegistry::new();
        registry.register(direct(jdbc, "jdbcOrderRepo", false, 0));
        registry.register(direct(mongo, "mongoOrderRepo", false, 1));

        let mode = InjectMode::ByQualifier("mongoOrderRepo".to_string());
        let selected = registry.select(&program, "com.foo.OrderRepo", &mode, FanOutPolicy::All);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].object(), ObjId::new(1));
        let mode = InjectMode::ByQualifier("nothing".to_string());
        assert!(registry
            .select(&program, "com.foo.OrderRepo", &mode, FanOutPolicy::All)
            .is_empty());
        let mode = InjectMode::ByNameOrType("repo".to_string());
        assert_eq!(
            registry
                .select(&program, "com.foo.OrderRepo", &mode, FanOutPolicy::All)
                .len(),
            2
        );
    }

    #[test]
    fn field_modes_from_annotations() {
        let autowired = Annotation::new("org.springframework.beans.factory.annotation.Autowired");
        let qualifier =
            Annotation::new("org.springframework.beans.factory.annotation.Qualifier").with_str("value", "mongo");
        let resource = Annotation::new("javax.annotation.Resource");
        let named_resource = Annotation::new("jakarta.annotation.Resource").with_str("name", "jdbc");

        assert_eq!(field_inject_mode("repo", &[autowired.clone()]), Some(InjectMode::ByType));
        assert_eq!(
            field_inject_mode("repo", &[autowired, qualifier]),
            Some(InjectMode::ByQualifier("mongo".to_string()))
        );
        assert_eq!(
            field_inject_mode("repo", &[resource]),
            Some(InjectMode::ByNameOrType("repo".to_string()))
        );
        assert_eq!(
            field_inject_mode("repo", &[named_resource]),
            Some(InjectMode::ByQualifier("jdbc".to_string()))
        );
        assert_eq!(field_inject_mode("repo", &[]), None);
    }

    #[test]
    fn single_constructor_injection() {
        let mut program = MemoryProgram::new();
        let svc = program.add_class("com.foo.OrderService");
        let init = program.add_method(svc, "<init>", &["com.foo.OrderRepo", "com.foo.Clock"], "void");
        let params = inject_params_of(&program, svc);
        assert_eq!(params.len(), 2);
        assert!(params.iter().all(|p| p.method == init && p.required && p.mode == InjectMode::ByType));

        let cfg = program.add_class("com.foo.Config");
        program.add_method(cfg, "<init>", &[], "void");
        let producer = program.add_method(cfg, "repo", &["javax.sql.DataSource"], "com.foo.OrderRepo");
        program.method_mut(producer).annotations.push(Annotation::new("org.springframework.context.annotation.Bean"));
        program.method_mut(producer).param_annotations[0].push(
            Annotation::new("org.springframework.beans.factory.annotation.Qualifier").with_str("value", "ds"),
        );
        let params = inject_params_of(&program, cfg);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].method, producer);
        assert_eq!(params[0].mode, InjectMode::ByQualifier("ds".to_string()));
    }

    #[test]
    fn no_arg_constructor_does_not_hide_the_injecting_one() {
        let mut program = MemoryProgram::new();
        let svc = program.add_class("com.foo.OrderService");
        program.add_method(svc, "<init>", &[], "void");
        let init = program.add_method(svc, "<init>", &["com.foo.OrderRepo"], "void");
        program.method_mut(init).param_annotations[0].push(
            Annotation::new("org.springframework.beans.factory.annotation.Qualifier").with_str("value", "repo"),
        );
        let params = inject_params_of(&program, svc);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].method, init);
        assert!(params[0].required);
        assert_eq!(params[0].mode, InjectMode::ByType);
    }

    #[test]
    fn inherited_fields() {
        let mut program = MemoryProgram::new();
        let base = program.add_class("com.foo.BaseService");
        let repo = program.add_field(base, "repo", "com.foo.OrderRepo");
        program
            .field_mut(repo)
            .annotations
            .push(Annotation::new("org.springframework.beans.factory.annotation.Autowired"));
        program.add_field(base, "plain", "java.lang.String");
        let svc = program.add_class("com.foo.OrderService");
        program.class_mut(svc).super_class = Some(base);

        let fields = inject_fields_of(&program, svc);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field, repo);
        assert_eq!(fields[0].holder, svc);
    }

    #[test]
    fn parse_fan_out_policy() {
        assert_eq!("all".parse::<FanOutPolicy>(), Ok(FanOutPolicy::All));
        assert_eq!("diagnose".parse::<FanOutPolicy>(), Ok(FanOutPolicy::Diagnose));
        assert!("some".parse::<FanOutPolicy>().is_err());
    }
}
