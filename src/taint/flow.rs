// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Source points, sink points and the flows between them.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::ir::program::{CallSiteId, FieldId, MethodId, ProgramModel, VarId};

/// Index of the receiver at a call site.
pub const BASE: i32 = -1;
/// Index of the result at a call site, or of the return values of a method.
pub const RESULT: i32 = -2;

pub fn index_to_string(index: i32) -> String {
    match index {
        BASE => "base".to_string(),
        RESULT => "result".to_string(),
        i => i.to_string(),
    }
}

/// Where a taint object is manufactured.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourcePoint {
    /// The result, receiver or an argument of a call.
    Call { call_site: CallSiteId, index: i32 },
    /// A parameter of a method.
    Param { method: MethodId, index: usize },
    /// A field read.
    Field { field: FieldId },
}

impl SourcePoint {
    /// The method in which the taint first appears, if any.
    pub fn container(&self, program: &dyn ProgramModel) -> Option<MethodId> {
        match self {
            SourcePoint::Call { call_site, .. } => Some(program.call_site(*call_site).container),
            SourcePoint::Param { method, .. } => Some(*method),
            SourcePoint::Field { .. } => None,
        }
    }

    pub fn render(&self, program: &dyn ProgramModel) -> String {
        match self {
            SourcePoint::Call { call_site, index } => {
                format!("{}/{}", program.call_site_string(*call_site), index_to_string(*index))
            }
            SourcePoint::Param { method, index } => {
                format!("{}/{}", program.method_signature(*method), index)
            }
            SourcePoint::Field { field } => {
                let field = program.field(*field);
                format!("<{}: {} {}>", program.class(field.class).name, field.field_type, field.name)
            }
        }
    }
}

/// A sensitive call argument, call result or method return value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SinkPoint {
    pub sink_call: Option<CallSiteId>,
    pub index: i32,
    /// Set for return-value sinks, which have no call site.
    pub callee: Option<MethodId>,
    pub var: Option<VarId>,
    pub exclude_source_param_anno: Vec<String>,
    pub exclude_call_source: Vec<String>,
    pub vul_id: String,
}

impl SinkPoint {
    pub fn at_call(call_site: CallSiteId, index: i32, vul_id: &str) -> Self {
        SinkPoint {
            sink_call: Some(call_site),
            index,
            callee: None,
            var: None,
            exclude_source_param_anno: Vec::new(),
            exclude_call_source: Vec::new(),
            vul_id: vul_id.to_string(),
        }
    }

    pub fn at_return(method: MethodId, var: VarId, vul_id: &str) -> Self {
        SinkPoint {
            sink_call: None,
            index: RESULT,
            callee: Some(method),
            var: Some(var),
            exclude_source_param_anno: Vec::new(),
            exclude_call_source: Vec::new(),
            vul_id: vul_id.to_string(),
        }
    }

    pub fn with_exclusions(mut self, param_annos: &[String], call_sources: &[String]) -> Self {
        self.exclude_source_param_anno = param_annos.to_vec();
        self.exclude_call_source = call_sources.to_vec();
        self
    }

    /// The method containing the sink.
    pub fn container(&self, program: &dyn ProgramModel) -> Option<MethodId> {
        match (self.sink_call, self.var) {
            (Some(call_site), _) => Some(program.call_site(call_site).container),
            (None, Some(var)) => Some(program.var(var).method),
            (None, None) => self.callee,
        }
    }

    fn location(&self, program: &dyn ProgramModel) -> String {
        match (self.sink_call, self.callee) {
            (Some(call_site), _) => program.call_site_string(call_site),
            (None, Some(callee)) => program.method_signature(callee),
            (None, None) => String::new(),
        }
    }

    pub fn render(&self, program: &dyn ProgramModel) -> String {
        format!(
            "{}/{} --- VUL_ID:{}",
            self.location(program),
            index_to_string(self.index),
            self.vul_id
        )
    }

    /// Returns true if a flow from `source` into this sink is excluded.
    pub fn excludes(&self, program: &dyn ProgramModel, source: &SourcePoint) -> bool {
        match source {
            SourcePoint::Param { method, index } if !self.exclude_source_param_anno.is_empty() => program
                .method(*method)
                .param_annotations(*index)
                .iter()
                .any(|a| self.exclude_source_param_anno.contains(&a.type_name)),
            SourcePoint::Call { call_site, index } if !self.exclude_call_source.is_empty() => {
                let key = format!("{}/{}", program.call_site(*call_site).method_ref, index);
                self.exclude_call_source.contains(&key)
            }
            _ => false,
        }
    }
}

/// A source reaching a sink. Equality and ordering follow the rendered text.
#[derive(Clone, Debug)]
pub struct TaintFlow {
    pub source: SourcePoint,
    pub sink: SinkPoint,
    rendered: String,
}

impl TaintFlow {
    pub fn new(program: &dyn ProgramModel, source: SourcePoint, sink: SinkPoint) -> Self {
        let rendered = format!("TaintFlow{{{} -> {}}}", source.render(program), sink.render(program));
        TaintFlow { source, sink, rendered }
    }

    /// The identity under which duplicate flows collapse: `<source container>-<sink call>`.
    pub fn dedup_key(&self, program: &dyn ProgramModel) -> String {
        let source = match self.source.container(program) {
            Some(method) => program.method_signature(method),
            None => self.source.render(program),
        };
        let sink = match self.sink.sink_call {
            Some(call_site) => program.call_site_string(call_site),
            None => "null".to_string(),
        };
        format!("{}-{}", source, sink)
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for TaintFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl PartialEq for TaintFlow {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for TaintFlow {}

impl Hash for TaintFlow {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

impl PartialOrd for TaintFlow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaintFlow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rendered.cmp(&other.rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::memory::MemoryProgram;
    use crate::ir::program::{Annotation, CallKind, MethodRef};

    #[test]
    fn render_and_compare_flows() {
        let mut program = MemoryProgram::new();
        let ctl = program.add_class("com.foo.Ctl");
        let handle = program.add_method(ctl, "handle", &["java.lang.String"], "void");
        program.method_mut(handle).param_annotations[0].push(Annotation::new("com.foo.Trusted"));
        let arg = program.method(handle).params[0];
        let cs = program.add_call_site(
            handle,
            MethodRef::new("java.sql.Statement", "boolean execute(java.lang.String)"),
            CallKind::Interface,
            None,
            vec![arg],
            None,
        );

        let source = SourcePoint::Param { method: handle, index: 0 };
        let sink = SinkPoint::at_call(cs, 0, "SQLI");
        let flow = TaintFlow::new(&program, source.clone(), sink.clone());
        assert_eq!(
            flow.to_string(),
            "TaintFlow{<com.foo.Ctl: void handle(java.lang.String)>/0 -> \
             <com.foo.Ctl: void handle(java.lang.String)>[0@L-1] \
             <java.sql.Statement: boolean execute(java.lang.String)>/0 --- VUL_ID:SQLI}"
        );
        assert_eq!(flow, TaintFlow::new(&program, source.clone(), sink.clone()));
        assert_eq!(source.container(&program), Some(handle));
        assert_eq!(sink.container(&program), Some(handle));

        let excluded = sink.with_exclusions(&["com.foo.Trusted".to_string()], &[]);
        assert!(excluded.excludes(&program, &source));
        assert_eq!(index_to_string(RESULT), "result");
        assert_eq!(index_to_string(BASE), "base");
    }
}
