// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! An in-memory program model, loadable from the JSON export of a host front end.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::program::*;

#[derive(Default, Serialize, Deserialize)]
pub struct MemoryProgram {
    #[serde(default)]
    classes: Vec<ClassInfo>,
    #[serde(default)]
    methods: Vec<MethodInfo>,
    #[serde(default)]
    fields: Vec<FieldInfo>,
    #[serde(default)]
    vars: Vec<VarInfo>,
    #[serde(default)]
    call_sites: Vec<CallSiteInfo>,
    #[serde(skip)]
    class_names: HashMap<String, ClassId>,
}

impl MemoryProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut program: MemoryProgram =
            serde_json::from_str(text).context("malformed program model")?;
        program.rebuild_name_index();
        Ok(program)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read program model {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    fn rebuild_name_index(&mut self) {
        self.class_names = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), ClassId::new(i)))
            .collect();
    }

    /// Adds an application class with no members.
    pub fn add_class(&mut self, name: &str) -> ClassId {
        let id = ClassId::new(self.classes.len());
        self.classes.push(ClassInfo {
            name: name.to_string(),
            annotations: Vec::new(),
            super_class: None,
            interfaces: Vec::new(),
            is_interface: false,
            is_abstract: false,
            is_application: true,
            methods: Vec::new(),
            fields: Vec::new(),
        });
        self.class_names.insert(name.to_string(), id);
        id
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassInfo {
        &mut self.classes[id.index()]
    }

    /// Adds a method with one variable per parameter, a `this` variable, and a single return
    /// variable unless it returns `void`.
    pub fn add_method(
        &mut self,
        class: ClassId,
        name: &str,
        param_types: &[&str],
        return_type: &str,
    ) -> MethodId {
        let id = MethodId::new(self.methods.len());
        self.methods.push(MethodInfo {
            name: name.to_string(),
            class,
            param_types: param_types.iter().map(|t| t.to_string()).collect(),
            return_type: return_type.to_string(),
            param_names: (0..param_types.len()).map(|i| format!("arg{i}")).collect(),
            param_annotations: vec![Vec::new(); param_types.len()],
            annotations: Vec::new(),
            is_abstract: false,
            is_static: false,
            params: Vec::new(),
            this_var: None,
            return_vars: Vec::new(),
            call_sites: Vec::new(),
            array_stores: Vec::new(),
        });
        self.classes[class.index()].methods.push(id);

        let this_type = self.classes[class.index()].name.clone();
        let this_var = self.add_var(id, "this", &this_type);
        let params: Vec<VarId> = param_types
            .iter()
            .enumerate()
            .map(|(i, ty)| self.add_var(id, &format!("arg{i}"), ty))
            .collect();
        let return_vars = if return_type == "void" {
            Vec::new()
        } else {
            vec![self.add_var(id, "ret", return_type)]
        };
        let method = &mut self.methods[id.index()];
        method.this_var = Some(this_var);
        method.params = params;
        method.return_vars = return_vars;
        id
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodInfo {
        &mut self.methods[id.index()]
    }

    pub fn add_field(&mut self, class: ClassId, name: &str, field_type: &str) -> FieldId {
        let id = FieldId::new(self.fields.len());
        self.fields.push(FieldInfo {
            name: name.to_string(),
            class,
            field_type: field_type.to_string(),
            annotations: Vec::new(),
            is_static: false,
        });
        self.classes[class.index()].fields.push(id);
        id
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut FieldInfo {
        &mut self.fields[id.index()]
    }

    pub fn add_var(&mut self, method: MethodId, name: &str, var_type: &str) -> VarId {
        let id = VarId::new(self.vars.len());
        self.vars.push(VarInfo {
            name: name.to_string(),
            method,
            var_type: var_type.to_string(),
            const_string: None,
        });
        id
    }

    /// Adds a variable holding a string literal.
    pub fn add_const_var(&mut self, method: MethodId, value: &str) -> VarId {
        let name = format!("%strconst{}", self.vars.len());
        let id = self.add_var(method, &name, "java.lang.String");
        self.vars[id.index()].const_string = Some(value.to_string());
        id
    }

    pub fn add_array_store(&mut self, method: MethodId, array: VarId, value: VarId) {
        self.methods[method.index()]
            .array_stores
            .push(ArrayStore { array, value });
    }

    pub fn add_call_site(
        &mut self,
        container: MethodId,
        method_ref: MethodRef,
        kind: CallKind,
        target: Option<MethodId>,
        args: Vec<VarId>,
        result: Option<VarId>,
    ) -> CallSiteId {
        let id = CallSiteId::new(self.call_sites.len());
        self.call_sites.push(CallSiteInfo {
            container,
            method_ref,
            target,
            kind,
            receiver: None,
            args,
            result,
            line: -1,
        });
        self.methods[container.index()].call_sites.push(id);
        id
    }

    /// Adds a call site that invokes `callee`, deriving the method reference from it.
    pub fn add_call(
        &mut self,
        container: MethodId,
        callee: MethodId,
        kind: CallKind,
        args: Vec<VarId>,
    ) -> CallSiteId {
        let method_ref = self.method_ref_of(callee);
        self.add_call_site(container, method_ref, kind, Some(callee), args, None)
    }
}

impl ProgramModel for MemoryProgram {
    fn classes(&self) -> Vec<ClassId> {
        (0..self.classes.len()).map(ClassId::new).collect()
    }

    fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.index()]
    }

    fn method(&self, id: MethodId) -> &MethodInfo {
        &self.methods[id.index()]
    }

    fn field(&self, id: FieldId) -> &FieldInfo {
        &self.fields[id.index()]
    }

    fn var(&self, id: VarId) -> &VarInfo {
        &self.vars[id.index()]
    }

    fn call_site(&self, id: CallSiteId) -> &CallSiteInfo {
        &self.call_sites[id.index()]
    }

    fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.class_names.get(name).copied()
    }
}
