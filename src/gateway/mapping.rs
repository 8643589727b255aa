// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Request-mapping lookup over the class hierarchy.

use std::collections::HashMap;

use crate::ir::known_names::{find_known, KnownNames};
use crate::ir::program::{Annotation, ClassId, ElementValue, MethodId, ProgramModel};

/// Joins a class-level prefix with a method-level mapping.
pub fn join_mapping(prefix: &str, mapping: &str) -> String {
    let mut prefix = if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{}", prefix)
    };
    if prefix.ends_with('/') {
        prefix.pop();
    }
    let mapping = mapping.strip_prefix('/').unwrap_or(mapping);
    format!("{}/{}", prefix, mapping)
}

/// The mapping paths declared by a mapping annotation: the `value` array, else the `path`
/// array, else a plain `value` string.
pub fn mapping_values(annotation: &Annotation) -> Vec<String> {
    let strip = |s: &str| s.trim_matches('"').to_string();
    match (annotation.element("value"), annotation.element("path")) {
        (Some(ElementValue::Array(values)), _) | (_, Some(ElementValue::Array(values))) => values
            .iter()
            .flat_map(|v| v.strings())
            .map(strip)
            .collect(),
        (Some(ElementValue::Str(value)), _) | (None, Some(ElementValue::Str(value))) => vec![strip(value.as_str())],
        _ => Vec::new(),
    }
}

/// Memoized lookup of mapping annotations.
///
/// A method without its own mapping inherits one from the same-subsignature method of an
/// application superclass, else of an application interface (direct, of superclasses, or of
/// those interfaces).
pub struct MappingResolver {
    keywords: Vec<String>,
    method_cache: HashMap<MethodId, Option<Annotation>>,
    class_cache: HashMap<ClassId, Option<Annotation>>,
}

impl MappingResolver {
    pub fn new(keywords: &[String]) -> Self {
        MappingResolver {
            keywords: keywords.to_vec(),
            method_cache: HashMap::new(),
            class_cache: HashMap::new(),
        }
    }

    fn in_namespace(&self, name: &str) -> bool {
        self.keywords.iter().any(|k| name.contains(k.as_str()))
    }

    pub fn class_mapping(&mut self, program: &dyn ProgramModel, class: ClassId) -> Option<Annotation> {
        self.class_cache
            .entry(class)
            .or_insert_with(|| find_known(&program.class(class).annotations, KnownNames::is_mapping).cloned())
            .clone()
    }

    pub fn method_mapping(&mut self, program: &dyn ProgramModel, method: MethodId) -> Option<Annotation> {
        if let Some(cached) = self.method_cache.get(&method) {
            return cached.clone();
        }
        let found = self.lookup_method_mapping(program, method);
        self.method_cache.insert(method, found.clone());
        found
    }

    fn lookup_method_mapping(&self, program: &dyn ProgramModel, method: MethodId) -> Option<Annotation> {
        let info = program.method(method);
        if let Some(own) = find_known(&info.annotations, KnownNames::is_mapping) {
            return Some(own.clone());
        }
        let subsignature = info.subsignature();
        let declaring = program.class(info.class);

        let mut interfaces = Vec::new();
        let push_interfaces = |class: ClassId, out: &mut Vec<ClassId>| {
            for inf in &program.class(class).interfaces {
                out.push(*inf);
                out.extend(program.class(*inf).interfaces.iter().copied());
            }
        };
        push_interfaces(info.class, &mut interfaces);

        let mut found = None;
        let mut super_class = declaring.super_class;
        while let Some(sup) = super_class {
            let sup_info = program.class(sup);
            if !self.in_namespace(&sup_info.name) {
                break;
            }
            push_interfaces(sup, &mut interfaces);
            if let Some(sup_method) = program.declared_method(sup, &subsignature) {
                if let Some(a) = find_known(&program.method(sup_method).annotations, KnownNames::is_mapping) {
                    found = Some(a.clone());
                    break;
                }
            }
            super_class = sup_info.super_class;
        }
        if found.is_some() {
            return found;
        }

        interfaces
            .into_iter()
            .filter(|inf| self.in_namespace(&program.class(*inf).name))
            .filter_map(|inf| program.declared_method(inf, &subsignature))
            .find_map(|m| find_known(&program.method(m).annotations, KnownNames::is_mapping).cloned())
    }

    /// The first mapping path of a method, or `None` when it has no mapping.
    pub fn first_method_mapping(&mut self, program: &dyn ProgramModel, method: MethodId) -> Option<String> {
        self.method_mapping(program, method)
            .map(|a| mapping_values(&a).into_iter().next().unwrap_or_default())
    }

    /// The first class-level mapping path, or an empty prefix.
    pub fn class_prefix(&mut self, program: &dyn ProgramModel, class: ClassId) -> String {
        self.class_mapping(program, class)
            .and_then(|a| mapping_values(&a).into_iter().next())
            .unwrap_or_default()
    }

    /// The joined route of a method, or `None` when the method has no mapping.
    pub fn route_of(&mut self, program: &dyn ProgramModel, method: MethodId) -> Option<String> {
        let mapping = self.first_method_mapping(program, method)?;
        let prefix = self.class_prefix(program, program.method(method).class);
        Some(join_mapping(&prefix, &mapping))
    }
}
