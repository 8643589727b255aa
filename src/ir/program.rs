// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The class/method/statement model consumed from the host analysis engine.
//!
//! The host owns bytecode decoding and IR construction. This layer only reads
//! already-resolved records through the [`ProgramModel`] trait.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

crate::newtype_index! {
    /// The unique identifier for each class or interface.
    pub struct ClassId;
}

crate::newtype_index! {
    /// The unique identifier for each declared method.
    pub struct MethodId;
}

crate::newtype_index! {
    /// The unique identifier for each declared field.
    pub struct FieldId;
}

crate::newtype_index! {
    /// The unique identifier for each local variable (including parameters and `this`).
    pub struct VarId;
}

crate::newtype_index! {
    /// The unique identifier for each invocation statement.
    pub struct CallSiteId;
}

/// A value of an annotation element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Array(Vec<ElementValue>),
}

impl ElementValue {
    /// Flattens the value into its string members.
    pub fn strings(&self) -> Vec<&str> {
        match self {
            ElementValue::Str(s) => vec![s.as_str()],
            ElementValue::Array(elems) => elems.iter().flat_map(|e| e.strings()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ElementValue::Bool(b) => Some(*b),
            ElementValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Fully qualified name of the annotation type.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub elements: BTreeMap<String, ElementValue>,
}

impl Annotation {
    pub fn new(type_name: &str) -> Self {
        Annotation {
            type_name: type_name.to_string(),
            elements: BTreeMap::new(),
        }
    }

    pub fn with_element(mut self, key: &str, value: ElementValue) -> Self {
        self.elements.insert(key.to_string(), value);
        self
    }

    pub fn with_str(self, key: &str, value: &str) -> Self {
        self.with_element(key, ElementValue::Str(value.to_string()))
    }

    pub fn with_strs(self, key: &str, values: &[&str]) -> Self {
        let values = values.iter().map(|v| ElementValue::Str(v.to_string())).collect();
        self.with_element(key, ElementValue::Array(values))
    }

    pub fn has_element(&self, key: &str) -> bool {
        self.elements.contains_key(key)
    }

    pub fn element(&self, key: &str) -> Option<&ElementValue> {
        self.elements.get(key)
    }

    /// All string members of the element `key`, in declaration order.
    pub fn strings(&self, key: &str) -> Vec<&str> {
        self.elements.get(key).map(|e| e.strings()).unwrap_or_default()
    }

    /// The first string member of the element `key`.
    pub fn first_string(&self, key: &str) -> Option<&str> {
        self.strings(key).into_iter().next()
    }

    #[inline]
    pub fn is(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }

    #[inline]
    pub fn ends_with(&self, suffix: &str) -> bool {
        self.type_name.ends_with(suffix)
    }
}

/// Returns the first annotation of the exact type `type_name`.
pub fn find_annotation<'a>(annotations: &'a [Annotation], type_name: &str) -> Option<&'a Annotation> {
    annotations.iter().find(|a| a.is(type_name))
}

/// Returns the first annotation whose type ends with any of `suffixes`.
pub fn find_annotation_by_suffix<'a>(
    annotations: &'a [Annotation],
    suffixes: &[&str],
) -> Option<&'a Annotation> {
    annotations
        .iter()
        .find(|a| suffixes.iter().any(|s| a.ends_with(s)))
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassInfo {
    /// Fully qualified name, e.g. `com.foo.order.OrderController`.
    pub name: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub super_class: Option<ClassId>,
    #[serde(default)]
    pub interfaces: Vec<ClassId>,
    #[serde(default)]
    pub is_interface: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default = "default_true")]
    pub is_application: bool,
    #[serde(default)]
    pub methods: Vec<MethodId>,
    #[serde(default)]
    pub fields: Vec<FieldId>,
}

impl ClassInfo {
    pub fn simple_name(&self) -> &str {
        let name = self.name.rsplit('.').next().unwrap_or(&self.name);
        name.rsplit('$').next().unwrap_or(name)
    }

    pub fn has_annotation(&self, type_name: &str) -> bool {
        find_annotation(&self.annotations, type_name).is_some()
    }
}

/// A constant-string store into an array slot, e.g. `arr[i] = "orders"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArrayStore {
    pub array: VarId,
    pub value: VarId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub class: ClassId,
    #[serde(default)]
    pub param_types: Vec<String>,
    #[serde(default = "void_type")]
    pub return_type: String,
    #[serde(default)]
    pub param_names: Vec<String>,
    #[serde(default)]
    pub param_annotations: Vec<Vec<Annotation>>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_static: bool,
    /// Parameter variables, excluding `this`.
    #[serde(default)]
    pub params: Vec<VarId>,
    #[serde(default)]
    pub this_var: Option<VarId>,
    #[serde(default)]
    pub return_vars: Vec<VarId>,
    #[serde(default)]
    pub call_sites: Vec<CallSiteId>,
    #[serde(default)]
    pub array_stores: Vec<ArrayStore>,
}

fn void_type() -> String {
    "void".to_string()
}

impl MethodInfo {
    /// The subsignature, e.g. `java.lang.String find(java.lang.String,int)`.
    pub fn subsignature(&self) -> String {
        format!("{} {}({})", self.return_type, self.name, self.param_types.join(","))
    }

    #[inline]
    pub fn param_count(&self) -> usize {
        self.param_types.len()
    }

    #[inline]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn param(&self, index: usize) -> Option<VarId> {
        self.params.get(index).copied()
    }

    pub fn param_annotations(&self, index: usize) -> &[Annotation] {
        self.param_annotations
            .get(index)
            .map(|annos| annos.as_slice())
            .unwrap_or(&[])
    }

    pub fn param_name(&self, index: usize) -> Option<&str> {
        self.param_names.get(index).map(|s| s.as_str())
    }

    pub fn has_annotation(&self, type_name: &str) -> bool {
        find_annotation(&self.annotations, type_name).is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub class: ClassId,
    pub field_type: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub is_static: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VarInfo {
    pub name: String,
    pub method: MethodId,
    #[serde(default)]
    pub var_type: String,
    /// Set when the variable holds a string literal.
    #[serde(default)]
    pub const_string: Option<String>,
}

/// How the host dispatches a call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    Static,
    Special,
    Virtual,
    Interface,
    Dynamic,
    Other,
}

/// A symbolic method reference as written at the call site.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub class_name: String,
    pub subsignature: String,
}

impl MethodRef {
    pub fn new(class_name: &str, subsignature: &str) -> Self {
        MethodRef {
            class_name: class_name.to_string(),
            subsignature: subsignature.to_string(),
        }
    }

    /// Parses a full signature such as `<com.foo.A: void run(int)>`.
    pub fn parse(signature: &str) -> Option<MethodRef> {
        let inner = signature.strip_prefix('<')?.strip_suffix('>')?;
        let (class_name, subsignature) = inner.split_once(": ")?;
        Some(MethodRef::new(class_name, subsignature))
    }

    /// The method name part of the subsignature.
    pub fn name(&self) -> &str {
        let head = self.subsignature.split('(').next().unwrap_or("");
        head.rsplit(' ').next().unwrap_or(head)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {}>", self.class_name, self.subsignature)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallSiteInfo {
    pub container: MethodId,
    pub method_ref: MethodRef,
    /// The statically resolved target, if the host could resolve one.
    #[serde(default)]
    pub target: Option<MethodId>,
    pub kind: CallKind,
    #[serde(default)]
    pub receiver: Option<VarId>,
    #[serde(default)]
    pub args: Vec<VarId>,
    #[serde(default)]
    pub result: Option<VarId>,
    #[serde(default)]
    pub line: i32,
}

impl CallSiteInfo {
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.kind == CallKind::Dynamic
    }

    #[inline]
    pub fn is_interface(&self) -> bool {
        self.kind == CallKind::Interface
    }

    pub fn arg(&self, index: usize) -> Option<VarId> {
        self.args.get(index).copied()
    }
}

/// Read access to the host's class hierarchy and IR.
pub trait ProgramModel {
    fn classes(&self) -> Vec<ClassId>;
    fn class(&self, id: ClassId) -> &ClassInfo;
    fn method(&self, id: MethodId) -> &MethodInfo;
    fn field(&self, id: FieldId) -> &FieldInfo;
    fn var(&self, id: VarId) -> &VarInfo;
    fn call_site(&self, id: CallSiteId) -> &CallSiteInfo;
    fn class_by_name(&self, name: &str) -> Option<ClassId>;

    fn application_classes(&self) -> Vec<ClassId> {
        self.classes()
            .into_iter()
            .filter(|c| self.class(*c).is_application)
            .collect()
    }

    /// The full signature, e.g. `<com.foo.A: void run(int)>`.
    fn method_signature(&self, id: MethodId) -> String {
        let method = self.method(id);
        format!("<{}: {}>", self.class(method.class).name, method.subsignature())
    }

    fn method_ref_of(&self, id: MethodId) -> MethodRef {
        let method = self.method(id);
        MethodRef {
            class_name: self.class(method.class).name.clone(),
            subsignature: method.subsignature(),
        }
    }

    /// Renders a call site as `<container>[i@Lline] <callee ref>`.
    fn call_site_string(&self, id: CallSiteId) -> String {
        let call_site = self.call_site(id);
        let position = self
            .method(call_site.container)
            .call_sites
            .iter()
            .position(|cs| *cs == id)
            .unwrap_or(0);
        format!(
            "{}[{}@L{}] {}",
            self.method_signature(call_site.container),
            position,
            call_site.line,
            call_site.method_ref
        )
    }

    fn declared_method(&self, class: ClassId, subsignature: &str) -> Option<MethodId> {
        self.class(class)
            .methods
            .iter()
            .copied()
            .find(|m| self.method(*m).subsignature() == subsignature)
    }

    fn declared_method_by_name(&self, class: ClassId, name: &str) -> Option<MethodId> {
        self.class(class)
            .methods
            .iter()
            .copied()
            .find(|m| self.method(*m).name == name)
    }

    /// Returns true if `sub` is `sup` or inherits from it through superclasses or interfaces.
    fn is_subclass(&self, sup: ClassId, sub: ClassId) -> bool {
        let mut visited = HashSet::new();
        let mut worklist = VecDeque::from([sub]);
        while let Some(class) = worklist.pop_front() {
            if class == sup {
                return true;
            }
            if !visited.insert(class) {
                continue;
            }
            let info = self.class(class);
            if let Some(super_class) = info.super_class {
                worklist.push_back(super_class);
            }
            worklist.extend(info.interfaces.iter().copied());
        }
        false
    }

    /// All classes that are `sup` or inherit from it.
    fn all_subclasses_of(&self, sup: ClassId) -> Vec<ClassId> {
        self.classes()
            .into_iter()
            .filter(|c| self.is_subclass(sup, *c))
            .collect()
    }

    /// String literals stored into elements of `array` inside its method.
    fn constant_array_stores(&self, array: VarId) -> Vec<String> {
        let method = self.method(self.var(array).method);
        method
            .array_stores
            .iter()
            .filter(|store| store.array == array)
            .filter_map(|store| self.var(store.value).const_string.clone())
            .collect()
    }
}
