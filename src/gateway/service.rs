// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Deployable services and the endpoints they serve.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::*;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::ir::program::MethodId;

/// One deployable unit of the decomposed application.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Service {
    pub name: String,
    /// Route globs under which the gateway exposes this service.
    pub routes: Vec<String>,
    /// Class file paths packaged in this service, e.g. `com/foo/order/OrderController.class`.
    pub class_list: BTreeSet<String>,
}

impl Service {
    pub fn new(name: &str) -> Self {
        Service {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.class_list.extend(classes.into_iter().map(Into::into));
        self
    }

    pub fn with_routes<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.extend(routes.into_iter().map(Into::into));
        self
    }

    #[inline]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Returns true if a packaged class path contains `class_path`.
    pub fn owns_class_path(&self, class_path: &str) -> bool {
        self.class_list.iter().any(|c| c.contains(class_path))
    }
}

/// A controller-like method with its normalized route and exposure verdict.
#[derive(Clone, Debug, Serialize)]
pub struct Endpoint {
    pub method_name: String,
    pub declaring_class: String,
    pub route: String,
    #[serde(skip)]
    pub method: MethodId,
    pub exposed: bool,
    pub hit_routes: Vec<String>,
    pub relevant_services: Vec<String>,
}

/// The outcome of scanning a directory of extracted archives.
#[derive(Debug, Default)]
pub struct Discovery {
    pub services: Vec<Service>,
    /// Candidate gateway route configurations, in scan order.
    pub route_configs: Vec<PathBuf>,
}

const CONFIG_PREFIXES: [&str; 3] = ["bootstrap", "application", "entry"];
const CONFIG_SUFFIXES: [&str; 3] = ["yml", "yaml", "properties"];

lazy_static! {
    static ref PARENT_BLOCK: Regex = Regex::new(r"(?s)<parent>.*?</parent>").unwrap();
    static ref ARTIFACT_ID: Regex = Regex::new(r"<artifactId>\s*([^<\s]+)\s*</artifactId>").unwrap();
}

/// Scans `root`, where each subdirectory holds one extracted archive.
pub struct ServiceDiscovery<'a> {
    keywords: &'a [String],
    route_config: Option<&'a Path>,
}

impl<'a> ServiceDiscovery<'a> {
    pub fn new(keywords: &'a [String], route_config: Option<&'a Path>) -> Self {
        ServiceDiscovery { keywords, route_config }
    }

    pub fn discover(&self, root: &Path) -> Result<Discovery> {
        let mut archives = fs::read_dir(root)
            .with_context(|| format!("failed to list archives in {}", root.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect::<Vec<_>>();
        archives.sort();

        let mut discovery = Discovery::default();
        for archive in archives {
            self.parse_archive(&archive, &mut discovery);
        }
        Ok(discovery)
    }

    fn parse_archive(&self, archive: &Path, discovery: &mut Discovery) {
        let files = WalkDir::new(archive)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect::<Vec<_>>();

        let service_name = self.service_name(archive, &files);
        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        info!("archive: {}", archive.display());
        info!("serviceName: {:?}", service_name);

        if let Some(name) = &service_name {
            if discovery.services.iter().any(|s| &s.name == name) {
                return;
            }
        }

        let keyword_paths = self
            .keywords
            .iter()
            .map(|k| k.replace('.', "/"))
            .collect::<Vec<_>>();
        let class_list = files
            .iter()
            .filter_map(|f| f.strip_prefix(archive).ok())
            .map(|f| f.to_string_lossy().replace('\\', "/"))
            .filter(|f| keyword_paths.iter().any(|k| f.contains(k.as_str())))
            .collect::<BTreeSet<_>>();

        let name = match service_name {
            Some(name) if !class_list.is_empty() => name,
            _ => {
                error!("[*] Empty service name in {}", archive_name);
                self.inject_into_existing(&mut discovery.services, class_list, &archive_name);
                return;
            }
        };

        if let Some(config) = self.gateway_config(archive, &files) {
            discovery.route_configs.push(config);
        }
        discovery.services.push(Service {
            name,
            routes: Vec::new(),
            class_list,
        });
    }

    /// Extends services whose name shares the archive's leading name parts.
    fn inject_into_existing(&self, services: &mut [Service], class_list: BTreeSet<String>, archive_name: &str) {
        let parts_needed = if self.keywords.iter().any(|k| k.contains("tangyh")) {
            2
        } else if self.keywords.iter().any(|k| k.contains("paas")) {
            3
        } else {
            return;
        };
        let parts = archive_name.split('-').collect::<Vec<_>>();
        if parts.len() < parts_needed {
            return;
        }
        let prefix = parts[..parts_needed].join("-");
        for service in services.iter_mut().filter(|s| s.name.contains(&prefix)) {
            service.class_list.extend(class_list.iter().cloned());
        }
    }

    fn service_name(&self, archive: &Path, files: &[PathBuf]) -> Option<String> {
        let app_name = config_files(files)
            .filter(|f| file_contains(f, |text| text.lines().any(|l| l.contains("application:"))))
            .find_map(|f| app_name_of(f));
        match app_name {
            Some(name) if !name.contains("@pom") => Some(name),
            _ => {
                let artifact = artifact_id_of(files);
                if artifact.is_none() {
                    info!("[*] no pom.xml in {}", archive.display());
                }
                artifact
            }
        }
    }

    fn gateway_config(&self, archive: &Path, files: &[PathBuf]) -> Option<PathBuf> {
        if let Some(route_config) = self.route_config {
            let candidate = archive.join(route_config);
            return candidate.is_file().then_some(candidate);
        }
        let configs = config_files(files)
            .filter(|f| file_contains(f, is_gateway_config_text))
            .cloned()
            .collect::<Vec<_>>();
        if configs.len() > 1 {
            error!(
                "[-] Finding more than one gateway config file in {}",
                archive.display()
            );
        }
        configs.into_iter().next()
    }
}

fn config_files(files: &[PathBuf]) -> impl Iterator<Item = &PathBuf> {
    files.iter().filter(|f| {
        let name = f.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        CONFIG_PREFIXES.iter().any(|p| name.contains(*p)) && CONFIG_SUFFIXES.iter().any(|s| name.contains(*s))
    })
}

fn file_contains(path: &Path, pred: impl Fn(&str) -> bool) -> bool {
    match fs::read_to_string(path) {
        Ok(text) => pred(&text),
        Err(e) => {
            debug!("cannot read {}: {}", path.display(), e);
            false
        }
    }
}

/// Gateway configurations mention `zuul`, or both `spring` and `routes`.
pub fn is_gateway_config_text(text: &str) -> bool {
    let contains_zuul = text.lines().any(|l| l.contains("zuul"));
    let contains_spring_routes =
        text.lines().any(|l| l.contains("spring")) && text.lines().any(|l| l.contains("routes"));
    contains_zuul || contains_spring_routes
}

/// Reads `spring.application.name` from a YAML or properties file.
fn app_name_of(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let is_properties = path.extension().map_or(false, |e| e == "properties");
    let name = if is_properties {
        text.lines()
            .filter_map(|l| l.split_once('='))
            .find(|(k, _)| k.trim() == "spring.application.name")
            .map(|(_, v)| v.trim().to_string())
    } else {
        app_name_from_yaml(&text)
    };
    name.filter(|n| !n.is_empty())
}

pub fn app_name_from_yaml(text: &str) -> Option<String> {
    let doc: serde_yaml::Value = match serde_yaml::from_str(text) {
        Ok(doc) => doc,
        Err(e) => {
            debug!("malformed yaml: {}", e);
            return None;
        }
    };
    doc.get("spring")?
        .get("application")?
        .get("name")
        .and_then(super::yaml_scalar_string)
}

/// The first `artifactId` not nested in `<parent>`, over all `pom.xml` files of an archive.
fn artifact_id_of(files: &[PathBuf]) -> Option<String> {
    let poms = files
        .iter()
        .filter(|f| f.file_name().map_or(false, |n| n == "pom.xml"))
        .collect::<Vec<_>>();
    if poms.len() > 1 {
        info!("[+] {} pom.xml", poms.len());
    }
    poms.into_iter()
        .filter_map(|pom| fs::read_to_string(pom).ok())
        .find_map(|text| artifact_id_from_pom(&text))
}

pub fn artifact_id_from_pom(text: &str) -> Option<String> {
    let without_parent = PARENT_BLOCK.replace_all(text, "");
    ARTIFACT_ID
        .captures(&without_parent)
        .map(|c| c[1].to_string())
}
