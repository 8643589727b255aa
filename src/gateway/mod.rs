// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Gateway route tables.
//!
//! Two configuration schemas are understood: Zuul (`zuul.routes.<id>`) and Spring Cloud Gateway
//! (`spring.cloud.gateway.routes[]`). Both yield, per service, the route globs under which the
//! gateway forwards external traffic to it.

use anyhow::{bail, Context, Result};
use log::*;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use self::service::Service;

pub mod endpoint;
pub mod mapping;
pub mod service;

/// Service name to externally visible route globs.
pub type RouteTable = BTreeMap<String, Vec<String>>;

/// Removes the first `/` segment of a route: `/a/b/c` becomes `/b/c`.
/// Trailing empty segments are dropped, so `/a/b/` also becomes `/b`.
pub fn strip_first_segment(route: &str) -> String {
    let parts: Vec<&str> = route.split('/').collect();
    let len = parts.iter().rposition(|p| !p.is_empty()).map_or(0, |i| i + 1);
    parts[..len]
        .iter()
        .skip(2)
        .fold(String::new(), |mut acc, part| {
            acc.push('/');
            acc.push_str(part);
            acc
        })
}

pub(crate) fn yaml_scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parses a gateway configuration document into a route table.
pub fn parse_routes(text: &str) -> Result<RouteTable> {
    let doc: Value = serde_yaml::from_str(text).context("malformed gateway configuration")?;
    if doc.get("zuul").is_some() {
        Ok(routes_from_zuul(&doc))
    } else if doc.get("spring").is_some() {
        routes_from_spring_cloud(&doc)
    } else {
        bail!("unknown gateway configuration schema")
    }
}

fn routes_from_zuul(doc: &Value) -> RouteTable {
    let mut table = RouteTable::new();
    let Some(routes) = doc
        .get("zuul")
        .and_then(|z| z.get("routes"))
        .and_then(|r| r.as_mapping())
    else {
        return table;
    };
    for (route_id, details) in routes {
        if !details.is_mapping() {
            continue;
        }
        let service = details
            .get("service-id")
            .or_else(|| details.get("serviceId"))
            .and_then(yaml_scalar_string);
        let Some(service) = service else {
            warn!("[-] Zuul route {:?} has no service id", route_id);
            continue;
        };
        let strip_prefix = details
            .get("strip-prefix")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if let Some(path) = details.get("path").and_then(yaml_scalar_string) {
            let path = if strip_prefix { strip_first_segment(&path) } else { path };
            table.entry(service).or_default().push(path);
        }
    }
    table
}

fn routes_from_spring_cloud(doc: &Value) -> Result<RouteTable> {
    let routes = doc
        .get("spring")
        .and_then(|s| s.get("cloud"))
        .and_then(|c| c.get("gateway"))
        .and_then(|g| g.get("routes"))
        .and_then(|r| r.as_sequence())
        .context("no spring.cloud.gateway.routes in configuration")?;

    let mut table = RouteTable::new();
    for route in routes {
        let service = route
            .get("uri")
            .and_then(|u| u.as_str())
            .map(service_of_uri)
            .unwrap_or_default();
        let filters = route.get("filters").and_then(|f| f.as_sequence()).map(|seq| {
            seq.iter()
                .filter_map(|f| f.as_str())
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
        });
        let strip = is_strip(filters.as_deref());
        let paths = route
            .get("predicates")
            .and_then(|p| p.as_sequence())
            .into_iter()
            .flatten()
            .filter_map(|p| p.as_str())
            .filter_map(|p| p.strip_prefix("Path="))
            .flat_map(|globs| globs.split(','))
            .map(|glob| glob.trim())
            .filter(|glob| !glob.is_empty())
            .map(|glob| if strip { strip_first_segment(glob) } else { glob.to_string() })
            .collect::<Vec<_>>();
        table.entry(service).or_default().extend(paths);
    }
    Ok(table)
}

/// The authority host of a gateway URI, e.g. `order-service` for `lb://order-service`.
fn service_of_uri(uri: &str) -> String {
    let rest = match uri.split_once("://") {
        Some((_, rest)) => rest,
        None => return String::new(),
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = authority.rsplit('@').next().unwrap_or(authority);
    host.split(':').next().unwrap_or("").to_string()
}

fn is_strip(filters: Option<&[String]>) -> bool {
    match filters {
        None => true,
        Some(filters) => filters.iter().any(|f| f == "StripPrefix=1"),
    }
}

/// Resolves the gateway configuration of a project onto its services.
pub struct GatewayResolver<'a> {
    services: &'a mut Vec<Service>,
}

impl<'a> GatewayResolver<'a> {
    pub fn new(services: &'a mut Vec<Service>) -> Self {
        GatewayResolver { services }
    }

    /// Processes the first of `configs`. Zero configs skip routing analysis.
    pub fn resolve(&mut self, configs: &[PathBuf]) {
        if configs.len() > 1 {
            let all = configs
                .iter()
                .map(|c| c.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            error!("[-] More than one route configuration file found: {}", all);
        }
        let Some(config) = configs.first() else {
            info!("[*] No gateway configuration, routing analysis skipped");
            return;
        };
        match Self::load(config) {
            Ok(table) => self.apply(table),
            Err(e) => error!("[-] Routes configuration not found or is invalid: {:#}", e),
        }
    }

    fn load(path: &Path) -> Result<RouteTable> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        parse_routes(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Merges a route table into the services, matching names case-insensitively.
    pub fn apply(&mut self, table: RouteTable) {
        for (service_name, routes) in table {
            match self.services.iter_mut().find(|s| s.is_named(&service_name)) {
                Some(service) => service.routes.extend(routes),
                None => error!("[-] Service {} not found!", service_name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_first_segment_cases() {
        assert_eq!(strip_first_segment("/a/b/c"), "/b/c");
        assert_eq!(strip_first_segment("/a"), "");
        assert_eq!(strip_first_segment(""), "");
        assert_eq!(strip_first_segment(&strip_first_segment("/a")), "");
        assert_eq!(strip_first_segment("/api/orders/**"), "/orders/**");
        assert_eq!(strip_first_segment("/svc/a/"), "/a");
        assert_eq!(strip_first_segment("/svc/a//"), "/a");
    }

    #[test]
    fn parse_zuul_routes() {
        let yaml = r#"
zuul:
  routes:
    orders:
      path: /api/orders/**
      service-id: order-service
    users:
      path: /users/**
      serviceId: user-service
      strip-prefix: false
    broken: 3
"#;
        let table = parse_routes(yaml).unwrap();
        assert_eq!(table["order-service"], vec!["/orders/**"]);
        assert_eq!(table["user-service"], vec!["/users/**"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn parse_spring_cloud_gateway_routes() {
        let yaml = r#"
spring:
  cloud:
    gateway:
      routes:
        - id: order
          uri: lb://order-service
          predicates:
            - Path=/api/orders/**,/api/carts/**
        - id: user
          uri: http://user-service:8080
          predicates:
            - Path=/users/**
            - Method=GET
          filters:
            - AddRequestHeader=X, Y
        - id: pay
          uri: lb://pay-service
          predicates:
            - Path=/api/pay/**
          filters:
            - StripPrefix=1
"#;
        let table = parse_routes(yaml).unwrap();
        assert_eq!(table["order-service"], vec!["/orders/**", "/carts/**"]);
        assert_eq!(table["user-service"], vec!["/users/**"]);
        assert_eq!(table["pay-service"], vec!["/pay/**"]);
    }

    #[test]
    fn unknown_schema_and_malformed_yaml_are_errors() {
        assert!(parse_routes("server:\n  port: 80\n").is_err());
        assert!(parse_routes("zuul: [unclosed").is_err());
        assert!(parse_routes("spring:\n  application:\n    name: x\n").is_err());
    }

    #[test]
    fn apply_matches_services_case_insensitively() {
        let mut services = vec![Service::new("Order-Service")];
        let mut table = RouteTable::new();
        table.insert("order-service".to_string(), vec!["/orders/**".to_string()]);
        table.insert("missing".to_string(), vec!["/x/**".to_string()]);
        GatewayResolver::new(&mut services).apply(table);
        assert_eq!(services[0].routes, vec!["/orders/**"]);
    }
}
