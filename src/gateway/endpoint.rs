// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Classifies controller methods as externally exposed or internal.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::*;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use super::mapping::MappingResolver;
use super::service::{Endpoint, Service};
use crate::ir::known_names::{find_known, KnownNames};
use crate::ir::program::{ClassId, MethodId, ProgramModel};

/// Namespaces of frameworks whose gateways expose every endpoint.
pub const ALWAYS_EXPOSED_KEYWORDS: [&str; 6] =
    ["springblade", "gruul", "medusa", "cn.zealon", "pig4cloud.pig", "youlai"];

/// Turns a route glob into a regular expression: `**/` and `**` both become `.*`.
pub fn process_rule(glob: &str) -> String {
    glob.replace("**/", ".*").replace("**", ".*")
}

/// Returns true if the glob, as a regular expression, is found anywhere in `route`.
/// An invalid expression matches nothing.
pub fn rule_matches(glob: &str, route: &str) -> bool {
    match Regex::new(&process_rule(glob)) {
        Ok(re) => re.is_match(route),
        Err(e) => {
            debug!("invalid route rule {}: {}", glob, e);
            false
        }
    }
}

/// The `.`-to-`/` class path used to find a class in a service's class list.
pub fn class_path_of(class_name: &str) -> String {
    let path = class_name.replace('.', "/");
    match path.strip_prefix("com/") {
        Some(rest) => rest.to_string(),
        None => path,
    }
}

/// Externally supplied verdicts, loaded from `entry/<project>.json`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EntryOracle {
    #[serde(default)]
    pub external_entries: Vec<String>,
    #[serde(default)]
    pub internal_entries: Vec<String>,
}

impl EntryOracle {
    pub fn load(dir: &Path, project: &str) -> Result<Self> {
        let path = dir.join(format!("{}.json", project));
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read entry oracle {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("malformed entry oracle {}", path.display()))
    }

    /// External matches win, then internal matches. Unknown routes are exposed.
    pub fn is_exposed(&self, route: &str) -> bool {
        if self.external_entries.iter().any(|g| rule_matches(g, route)) {
            true
        } else {
            !self.internal_entries.iter().any(|g| rule_matches(g, route))
        }
    }
}

lazy_static! {
    static ref YUDAO_APP: Regex = Regex::new(r"^.*\.controller\.app\..*$").unwrap();
    static ref YUDAO_ADMIN: Regex = Regex::new(r"^.*\.controller\.admin\..*$").unwrap();
}

/// Platform-specific rewriting of computed routes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RouteRewrite {
    Identity,
    /// Prefixes `/app-api` or `/admin-api` for yudao-cloud controllers.
    #[default]
    Yudao,
}

impl RouteRewrite {
    pub fn apply(&self, route: String, class_name: &str) -> String {
        match self {
            RouteRewrite::Identity => route,
            RouteRewrite::Yudao if class_name.contains("yudao") => {
                if YUDAO_APP.is_match(class_name) {
                    format!("/app-api{}", route)
                } else if YUDAO_ADMIN.is_match(class_name) {
                    format!("/admin-api{}", route)
                } else {
                    route
                }
            }
            RouteRewrite::Yudao => route,
        }
    }
}

impl FromStr for RouteRewrite {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "identity" => Ok(RouteRewrite::Identity),
            "yudao" => Ok(RouteRewrite::Yudao),
            _ => Err(format!("unknown route rewrite policy {}", s)),
        }
    }
}

pub struct EndpointClassifier<'a> {
    pub program: &'a dyn ProgramModel,
    pub keywords: &'a [String],
    pub services: &'a [Service],
    pub oracle: Option<&'a EntryOracle>,
    pub rewrite: RouteRewrite,
}

impl<'a> EndpointClassifier<'a> {
    fn in_namespace(&self, name: &str) -> bool {
        self.keywords.iter().any(|k| name.contains(k.as_str()))
    }

    /// True if a configured keyword names a framework whose gateway exposes everything.
    fn always_exposed(&self) -> bool {
        self.keywords
            .iter()
            .any(|k| ALWAYS_EXPOSED_KEYWORDS.iter().any(|f| k.contains(f)))
    }

    pub fn classify(&self, mappings: &mut MappingResolver) -> Vec<Endpoint> {
        let program = self.program;
        let mut endpoints = Vec::new();
        for class in program.application_classes() {
            let class_info = program.class(class);
            if !self.in_namespace(&class_info.name) {
                continue;
            }
            for method in class_info.methods.iter().copied() {
                let method_info = program.method(method);
                let Some(route) = mappings.route_of(program, method) else {
                    continue;
                };
                let route = self.rewrite.apply(route, &class_info.name);
                let endpoint = match self.oracle {
                    Some(oracle) => Endpoint {
                        method_name: method_info.name.clone(),
                        declaring_class: class_info.name.clone(),
                        exposed: oracle.is_exposed(&route),
                        route,
                        method,
                        hit_routes: Vec::new(),
                        relevant_services: Vec::new(),
                    },
                    None => self.correlate(class, &method_info.name, method, route),
                };
                if endpoint.exposed {
                    info!("[+] Exposed endpoint: {}", endpoint.route);
                } else {
                    info!(
                        "[-] Unexposed endpoint: {}: {}.{}",
                        endpoint.route, endpoint.declaring_class, endpoint.method_name
                    );
                }
                endpoints.push(endpoint);
            }
        }
        endpoints
    }

    fn correlate(
        &self,
        class: ClassId,
        method_name: &str,
        method: MethodId,
        route: String,
    ) -> Endpoint {
        let class_name = &self.program.class(class).name;
        let class_path = class_path_of(class_name);
        let mut relevant = self
            .services
            .iter()
            .filter(|s| s.owns_class_path(&class_path))
            .collect::<Vec<_>>();
        if relevant.is_empty() {
            if let Some(target) = self.feign_service_name(class) {
                relevant = self.services.iter().filter(|s| s.is_named(&target)).collect();
            }
        }
        if relevant.is_empty() {
            error!("[-] No service found for classpath: {}.{}", class_name, method_name);
        }

        let hit_routes = if self.always_exposed() {
            vec!["EXPOSED".to_string()]
        } else {
            relevant
                .iter()
                .flat_map(|s| s.routes.iter())
                .filter(|glob| rule_matches(glob, &route))
                .cloned()
                .collect::<Vec<_>>()
        };

        Endpoint {
            method_name: method_name.to_string(),
            declaring_class: class_name.clone(),
            exposed: !hit_routes.is_empty(),
            route,
            method,
            hit_routes,
            relevant_services: relevant.iter().map(|s| s.name.clone()).collect(),
        }
    }

    /// The service named by a `@FeignClient` on the class or one of its interfaces.
    fn feign_service_name(&self, class: ClassId) -> Option<String> {
        let info = self.program.class(class);
        std::iter::once(class)
            .chain(info.interfaces.iter().copied())
            .filter_map(|c| {
                find_known(&self.program.class(c).annotations, |k| k == KnownNames::FeignClient)
            })
            .find_map(|a| {
                a.first_string("name")
                    .or_else(|| a.first_string("value"))
                    .map(|s| s.to_string())
            })
            .filter(|s| !s.is_empty())
    }
}
