// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! `RestTemplate.exchange` calls to the endpoints whose route ends with the formatted URL.
//!
//! URLs are usually built by `String.format` from a template and constant path parts. Such a
//! call is evaluated as soon as its argument array is known, and the result variable receives
//! a synthetic constant `mock:<url>` that is later matched against endpoint routes.

use log::*;
use std::collections::HashMap;

use super::{constant_strings, EdgeLedger};
use crate::ir::known_names::{REST_TEMPLATE_EXCHANGE, STRING_FORMAT};
use crate::ir::program::{CallKind, CallSiteId, MethodId, VarId};
use crate::pta::{CallEdge, CsCallSite, CsMethod, CsObj, CsVar, FlowKind, HostContext, Plugin, Pointer};

const MOCK_PREFIX: &str = "mock:";

/// Returns true if every `%` of the template starts a `%s` or `%%` sequence.
pub fn is_only_percent_s(template: &str) -> bool {
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('s') | Some('%') => {}
                _ => return false,
            }
        }
    }
    true
}

fn count_placeholders(template: &str) -> usize {
    template.matches("%s").count()
}

/// Substitutes `%s` with `values` in order and unescapes `%%`. Missing values render as `null`.
fn format_percent_s(template: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut values = values.iter();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push_str(values.next().map(|v| v.as_str()).unwrap_or("null")),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Formats `template` with `values`. When there are fewer values than placeholders, the
/// leading surplus `%s` are dropped first, together with a `/` right before them.
pub fn format_with_trimmed_template(template: &str, values: &[String]) -> String {
    if !is_only_percent_s(template) {
        return String::new();
    }
    let mut trimmed = template.to_string();
    let surplus = count_placeholders(template).saturating_sub(values.len());
    for _ in 0..surplus {
        let Some(pos) = trimmed.find("%s") else {
            break;
        };
        let cut_from = if pos > 0 && trimmed.as_bytes()[pos - 1] == b'/' {
            pos - 1
        } else {
            pos
        };
        trimmed.replace_range(cut_from..pos + 2, "");
    }
    format_percent_s(&trimmed, values)
}

/// Returns true if the URL suffix `url` identifies `route`.
pub fn url_matches_route(url: &str, route: &str) -> bool {
    !url.trim().is_empty() && url.contains('/') && url != "/" && url != "}" && route.ends_with(url)
}

#[derive(Default)]
pub struct RestTemplatePlugin {
    /// URL variables of `exchange` calls.
    url_to_calls: HashMap<VarId, Vec<CallSiteId>>,
    /// Argument arrays of `String.format` calls to their (template, result).
    array_to_formats: HashMap<VarId, Vec<(String, VarId)>>,
    ledger: EdgeLedger,
}

impl RestTemplatePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish_formatted(&mut self, hcx: &mut HostContext, array: CsVar) {
        let Some(formats) = self.array_to_formats.get(&array.var) else {
            return;
        };
        let values = hcx.program.constant_array_stores(array.var);
        let empty = hcx.empty_context();
        for (template, result) in formats.iter() {
            let url = format_with_trimmed_template(template, &values);
            debug!("Formatted URL {} from {}", url, template);
            let obj = hcx.solver.new_string_constant(&format!("{}{}", MOCK_PREFIX, url));
            hcx.solver.add_points_to(
                CsVar {
                    context: array.context,
                    var: *result,
                },
                CsObj {
                    context: empty,
                    obj,
                },
            );
        }
    }

    fn connect_exchange(&mut self, hcx: &mut HostContext, url_var: CsVar, pts: &[CsObj]) {
        let Some(calls) = self.url_to_calls.get(&url_var.var).cloned() else {
            return;
        };
        let urls: Vec<String> = constant_strings(hcx.solver, pts)
            .into_iter()
            .filter_map(|s| s.strip_prefix(MOCK_PREFIX).map(|u| u.to_string()))
            .collect();
        if urls.is_empty() {
            return;
        }
        let program = hcx.program;
        let targets: Vec<MethodId> = hcx
            .session
            .endpoints(program)
            .iter()
            .filter(|e| !program.method(e.method).is_abstract)
            .filter(|e| urls.iter().any(|u| url_matches_route(u, &e.route)))
            .map(|e| e.method)
            .collect();
        let empty = hcx.empty_context();
        for target in targets {
            for call_site in calls.iter().copied() {
                let edge = CallEdge {
                    kind: CallKind::Other,
                    call_site: CsCallSite {
                        context: url_var.context,
                        call_site,
                    },
                    callee: CsMethod {
                        context: empty,
                        method: target,
                    },
                };
                if self.ledger.add_call_edge(hcx, edge) {
                    info!(
                        "[+] RestTemplate {} -> {}",
                        program.call_site_string(call_site),
                        program.method_signature(target)
                    );
                }
                let target_info = program.method(target);
                if target_info.param_count() != 1 {
                    continue;
                }
                if let (Some(body), Some(param0)) = (program.call_site(call_site).arg(2), target_info.param(0)) {
                    let from = Pointer::Var(CsVar {
                        context: url_var.context,
                        var: body,
                    });
                    let to = Pointer::Var(CsVar {
                        context: empty,
                        var: param0,
                    });
                    self.ledger.add_pfg_edge(hcx, from, to, FlowKind::ParameterPassing);
                }
            }
        }
    }
}

impl Plugin for RestTemplatePlugin {
    fn name(&self) -> &str {
        "rest-template"
    }

    fn on_start(&mut self, hcx: &mut HostContext) {
        let program = hcx.program;
        let session = hcx.session;
        for class in session.namespace_classes(program) {
            for method in program.class(class).methods.iter().copied() {
                if program.method(method).is_abstract {
                    continue;
                }
                for call_site in program.method(method).call_sites.iter().copied() {
                    let info = program.call_site(call_site);
                    let Some(target) = info.target else {
                        continue;
                    };
                    let signature = program.method_signature(target);
                    if REST_TEMPLATE_EXCHANGE.contains(&signature.as_str()) {
                        if let Some(url) = info.arg(0) {
                            self.url_to_calls.entry(url).or_default().push(call_site);
                        }
                    } else if signature == STRING_FORMAT {
                        let template = info
                            .arg(0)
                            .and_then(|v| program.var(v).const_string.clone())
                            .unwrap_or_default();
                        if !is_only_percent_s(&template) {
                            continue;
                        }
                        if let (Some(array), Some(result)) = (info.arg(1), info.result) {
                            self.array_to_formats
                                .entry(array)
                                .or_default()
                                .push((template, result));
                        }
                    }
                }
            }
        }
        debug!(
            "{} RestTemplate URL variables, {} format arrays",
            self.url_to_calls.len(),
            self.array_to_formats.len()
        );
    }

    fn on_new_points_to_set(&mut self, hcx: &mut HostContext, var: CsVar, pts: &[CsObj]) {
        if self.url_to_calls.contains_key(&var.var) {
            self.connect_exchange(hcx, var, pts);
        } else if self.array_to_formats.contains_key(&var.var) {
            self.publish_formatted(hcx, var);
        }
    }

    fn synthesized_edges(&self) -> usize {
        self.ledger.num_call_edges()
    }
}
