// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Taint configuration and the taint plugins.
//!
//! A configuration is a YAML document:
//!
//! ```yaml
//! enhance_sinks:
//!   - { method: "<java.sql.Statement: boolean execute(java.lang.String)>", index: 0, vul_id: SQLI }
//! call-site-mode: true
//! validators:
//!   - "<com.foo.Checker: boolean isSafe(java.lang.String)>"
//! sources:
//!   - { kind: call, method: "<javax.servlet.ServletRequest: java.lang.String getParameter(java.lang.String)>", index: result }
//!   - { kind: param, method: "<com.foo.Job: void run(java.lang.String)>", index: 0 }
//! exclude_source_param_anno: [ "org.springframework.web.bind.annotation.PathVariable" ]
//! exclude_call_source: [ "<java.lang.Integer: int parseInt(java.lang.String)>/result" ]
//! ```

use anyhow::{bail, Context, Result};
use log::*;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

use self::flow::{BASE, RESULT};

pub mod flow;
pub mod mybatis;
pub mod sink_handler;
pub mod source;

/// Parses a sink or source index: an integer, `base` or `result`.
pub fn parse_index(text: &str) -> Option<i32> {
    match text.trim() {
        "base" => Some(BASE),
        "result" => Some(RESULT),
        s => s.parse().ok(),
    }
}

fn deserialize_index<'de, D>(deserializer: D) -> std::result::Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(i32),
        Name(String),
    }
    match Repr::deserialize(deserializer)? {
        Repr::Int(i) => Ok(i),
        Repr::Name(s) => parse_index(&s).ok_or_else(|| D::Error::custom(format!("invalid index {}", s))),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// The callee signature, e.g. `<java.sql.Statement: boolean execute(java.lang.String)>`.
    pub method: String,
    #[serde(deserialize_with = "deserialize_index")]
    pub index: i32,
    #[serde(default)]
    pub vul_id: String,
}

impl SinkConfig {
    pub fn new(method: &str, index: i32, vul_id: &str) -> Self {
        SinkConfig {
            method: method.to_string(),
            index,
            vul_id: vul_id.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Call {
        method: String,
        #[serde(deserialize_with = "deserialize_index")]
        index: i32,
        /// Type of the manufactured taint object. Defaults to the declared type.
        #[serde(default, rename = "type")]
        type_name: Option<String>,
    },
    Param {
        method: String,
        index: usize,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintConfig {
    #[serde(default, rename = "enhance_sinks")]
    pub sinks: Vec<SinkConfig>,
    #[serde(default, rename = "call-site-mode")]
    pub call_site_mode: bool,
    #[serde(default)]
    pub validators: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub exclude_source_param_anno: Vec<String>,
    #[serde(default)]
    pub exclude_call_source: Vec<String>,
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yml") | Some("yaml"))
}

fn concat_distinct<T: Clone + PartialEq>(into: &mut Vec<T>, other: &[T]) {
    for item in other {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

impl TaintConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty document is an empty configuration.
        if text.trim().is_empty() {
            return Ok(TaintConfig::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Loads a configuration from a file, or merges every YAML file under a directory.
    /// A malformed file in a directory is reported and contributes nothing.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading taint config from {}", path.display());
        if path.is_file() {
            Self::load_single(path)
        } else if path.is_dir() {
            let mut result = TaintConfig::default();
            let files = WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_yaml(e.path()));
            for entry in files {
                match Self::load_single(entry.path()) {
                    Ok(config) => result.merge_with(config),
                    Err(e) => error!("[-] {:#}", e),
                }
            }
            Ok(result)
        } else {
            bail!("{} is neither a file nor a directory", path.display())
        }
    }

    fn load_single(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read taint config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("failed to load taint config from {}", path.display()))
    }

    /// Merges `other` into this configuration. Sinks are first-wins by `(method, index)`.
    pub fn merge_with(&mut self, other: TaintConfig) {
        self.add_sinks(other.sinks);
        self.call_site_mode |= other.call_site_mode;
        concat_distinct(&mut self.validators, &other.validators);
        concat_distinct(&mut self.sources, &other.sources);
        concat_distinct(&mut self.exclude_source_param_anno, &other.exclude_source_param_anno);
        concat_distinct(&mut self.exclude_call_source, &other.exclude_call_source);
    }

    /// Adds sinks whose `(method, index)` is not declared yet. Returns how many were added.
    pub fn add_sinks(&mut self, sinks: impl IntoIterator<Item = SinkConfig>) -> usize {
        let mut added = 0;
        for sink in sinks {
            if !self.sinks.iter().any(|s| s.method == sink.method && s.index == sink.index) {
                self.sinks.push(sink);
                added += 1;
            }
        }
        added
    }

    /// Distinct callee signatures of all sinks.
    pub fn sink_signatures(&self) -> BTreeSet<String> {
        self.sinks.iter().map(|s| s.method.clone()).collect()
    }

    pub fn sinks_of<'a>(&'a self, method: &'a str) -> impl Iterator<Item = &'a SinkConfig> + 'a {
        self.sinks.iter().filter(move |s| s.method == method)
    }

    pub fn is_validator(&self, signature: &str) -> bool {
        self.validators.iter().any(|v| v == signature)
    }
}
