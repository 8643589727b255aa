// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Sinks discovered from MyBatis XML mappers.
//!
//! A `${name}` placeholder is spliced into the SQL text verbatim, so the mapper method parameter
//! that feeds it is a SQL injection sink. Mapper files are parsed on a thread pool; the scan
//! gives up after a grace period and keeps what was parsed so far.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::*;
use rayon::ThreadPoolBuilder;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use super::SinkConfig;
use crate::ir::known_names::{find_known, KnownNames};
use crate::ir::program::{ClassId, MethodId, ProgramModel, VarId};
use crate::pta::{CsMethod, CsObj, CsVar, HostContext, ObjId, ObjKind, Plugin};

pub const MYBATIS_VUL_ID: &str = "SQLI_Mybatis_Xml";

lazy_static! {
    static ref MAPPER_NAMESPACE: Regex = Regex::new(r#"<mapper\b[^>]*\bnamespace\s*=\s*"([^"]+)""#).unwrap();
    static ref STATEMENT: Regex =
        Regex::new(r"(?s)<(select|insert|update|delete)\b([^>]*)>(.*?)</(?:select|insert|update|delete)\s*>").unwrap();
    static ref SQL_FRAGMENT: Regex = Regex::new(r"(?s)<sql\b([^>]*)>(.*?)</sql\s*>").unwrap();
    static ref INCLUDE: Regex = Regex::new(r#"<include\b[^>]*\brefid\s*=\s*"([^"]+)"[^>]*?(?:/>|>.*?</include\s*>)"#).unwrap();
    static ref ID_ATTR: Regex = Regex::new(r#"\bid\s*=\s*"([^"]+)""#).unwrap();
    static ref DOLLAR_PARAM: Regex = Regex::new(r"\$\{([^}]+)\}").unwrap();
    static ref PROPERTY: Regex = Regex::new(r"<property\b([^>]*)>").unwrap();
    static ref NAME_ATTR: Regex = Regex::new(r#"\bname\s*=\s*"([^"]*)""#).unwrap();
    static ref VALUE_ATTR: Regex = Regex::new(r#"\bvalue\s*=\s*"([^"]*)""#).unwrap();
}

const MAX_INCLUDE_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryType {
    fn of(tag: &str) -> Option<QueryType> {
        match tag {
            "select" => Some(QueryType::Select),
            "insert" => Some(QueryType::Insert),
            "update" => Some(QueryType::Update),
            "delete" => Some(QueryType::Delete),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapperStatement {
    pub id: String,
    pub query_type: QueryType,
    /// Names spliced by `${...}`, cut before any `,` and `.`.
    pub dollar_params: BTreeSet<String>,
    /// `<property name value>` pairs declared inside the statement.
    pub properties: Vec<(String, String)>,
}

impl MapperStatement {
    /// False when a `<property>` binds one of the spliced names to a literal value.
    pub fn single_param_injectable(&self) -> bool {
        !self.properties.iter().any(|(name, value)| {
            self.dollar_params.iter().any(|p| p.contains(name.as_str())) && !value.contains('$')
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapperFile {
    pub namespace: String,
    pub statements: Vec<MapperStatement>,
}

fn id_of(attributes: &str) -> Option<String> {
    ID_ATTR.captures(attributes).map(|c| c[1].to_string())
}

fn properties_of(body: &str) -> Vec<(String, String)> {
    PROPERTY
        .captures_iter(body)
        .map(|c| {
            let attr = |re: &Regex| re.captures(&c[1]).map(|v| v[1].to_string()).unwrap_or_default();
            (attr(&NAME_ATTR), attr(&VALUE_ATTR))
        })
        .collect()
}

fn expand_includes(body: &str, fragments: &HashMap<String, String>, depth: usize) -> String {
    if depth >= MAX_INCLUDE_DEPTH {
        return body.to_string();
    }
    INCLUDE
        .replace_all(body, |caps: &regex::Captures| match fragments.get(&caps[1]) {
            Some(fragment) => expand_includes(fragment, fragments, depth + 1),
            None => String::new(),
        })
        .into_owned()
}

/// The `${...}` parameter names of an SQL body.
pub fn dollar_params(sql: &str) -> BTreeSet<String> {
    DOLLAR_PARAM
        .captures_iter(sql)
        .filter_map(|c| {
            let inner = c[1].split(',').next()?;
            let name = inner.split('.').next()?.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// Parses a mapper document. Returns `None` if it has no `<mapper namespace>`.
pub fn parse_mapper(text: &str) -> Option<MapperFile> {
    let namespace = MAPPER_NAMESPACE.captures(text)?[1].trim().to_string();
    let fragments: HashMap<String, String> = SQL_FRAGMENT
        .captures_iter(text)
        .filter_map(|c| Some((id_of(&c[1])?, c[2].to_string())))
        .collect();
    let statements = STATEMENT
        .captures_iter(text)
        .filter_map(|c| {
            let query_type = QueryType::of(&c[1])?;
            let id = id_of(&c[2])?;
            let sql = expand_includes(&c[3], &fragments, 0);
            Some(MapperStatement {
                id,
                query_type,
                dollar_params: dollar_params(&sql),
                properties: properties_of(&c[3]),
            })
        })
        .collect();
    Some(MapperFile { namespace, statements })
}

fn parse_mapper_file(path: &Path) -> Result<Option<MapperFile>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read mapper {}", path.display()))?;
    Ok(parse_mapper(&text))
}

/// Parameter positions of `method` that feed one of the statement's `${...}` params.
pub fn injected_positions(program: &dyn ProgramModel, method: MethodId, statement: &MapperStatement) -> Vec<usize> {
    let info = program.method(method);
    let params = &statement.dollar_params;
    if params.is_empty() {
        return Vec::new();
    }
    if info.param_count() == 1 {
        return if statement.single_param_injectable() { vec![0] } else { Vec::new() };
    }
    let query_like = params.iter().any(|p| p.to_lowercase().contains("query"));
    (0..info.param_count())
        .filter(|pos| {
            match find_known(info.param_annotations(*pos), |k| k == KnownNames::MybatisParam) {
                Some(param) => param.first_string("value").map(|v| params.contains(v)).unwrap_or(false),
                None => {
                    info.param_name(*pos).map(|n| params.contains(n)).unwrap_or(false)
                        || (query_like
                            && info
                                .param_types
                                .get(*pos)
                                .map(|t| t.to_lowercase().contains("query"))
                                .unwrap_or(false))
                }
            }
        })
        .collect()
}

/// Turns parsed mappers into sinks on the mapper interface methods they implement.
pub fn resolve_sinks(program: &dyn ProgramModel, files: &[MapperFile]) -> Vec<SinkConfig> {
    let mut sinks = Vec::new();
    for file in files {
        let Some(class) = program.class_by_name(&file.namespace) else {
            debug!("[-] Mapper interface not found: {}", file.namespace);
            continue;
        };
        for statement in file.statements.iter() {
            let Some(method) = program.declared_method_by_name(class, &statement.id) else {
                continue;
            };
            for pos in injected_positions(program, method, statement) {
                let sink = SinkConfig::new(&program.method_signature(method), pos as i32, MYBATIS_VUL_ID);
                info!("add dynamic {} sink: {}/{}", MYBATIS_VUL_ID, sink.method, pos);
                sinks.push(sink);
            }
        }
    }
    sinks
}

/// `namespace.id` of every `<select>` statement.
pub fn select_operations(files: &[MapperFile]) -> BTreeSet<String> {
    files
        .iter()
        .flat_map(|f| {
            f.statements
                .iter()
                .filter(|s| s.query_type == QueryType::Select)
                .map(move |s| format!("{}.{}", f.namespace, s.id))
        })
        .collect()
}

/// Taints the result of a mapper `select` call when its argument, or a field of it, is tainted.
#[derive(Default)]
pub struct MapperResultPlugin {
    selects: BTreeSet<String>,
    /// Argument of a select call to the variables receiving its result.
    arg_results: HashMap<VarId, Vec<VarId>>,
    propagated: HashSet<(CsVar, ObjId)>,
}

impl MapperResultPlugin {
    pub fn new(selects: BTreeSet<String>) -> Self {
        MapperResultPlugin {
            selects,
            ..Default::default()
        }
    }

    fn application_class_of(hcx: &HostContext, obj: ObjId) -> Option<ClassId> {
        let class_name = match hcx.solver.object_kind(obj) {
            ObjKind::Alloc { class_name } | ObjKind::Mock { class_name, .. } => class_name,
            _ => return None,
        };
        hcx.program
            .class_by_name(&class_name)
            .filter(|c| hcx.program.class(*c).is_application)
    }

    fn taint_objects(hcx: &HostContext, pts: &[CsObj]) -> Vec<ObjId> {
        let mut taints = Vec::new();
        for obj in pts.iter().copied() {
            if hcx.taint.is_taint(obj.obj) {
                taints.push(obj.obj);
                continue;
            }
            let Some(class) = Self::application_class_of(hcx, obj.obj) else {
                continue;
            };
            for field in hcx.program.class(class).fields.iter().copied() {
                taints.extend(
                    hcx.solver
                        .points_to_of_field(obj, field)
                        .into_iter()
                        .map(|o| o.obj)
                        .filter(|o| hcx.taint.is_taint(*o)),
                );
            }
        }
        taints
    }
}

impl Plugin for MapperResultPlugin {
    fn name(&self) -> &str {
        "mybatis-result"
    }

    fn on_new_cs_method(&mut self, hcx: &mut HostContext, cs_method: CsMethod) {
        let program = hcx.program;
        for call_site in program.method(cs_method.method).call_sites.iter().copied() {
            let info = program.call_site(call_site);
            if info.is_dynamic() {
                continue;
            }
            let Some(result) = info.result else {
                continue;
            };
            let class_name = match info.target {
                Some(target) => program.class(program.method(target).class).name.as_str(),
                None => info.method_ref.class_name.as_str(),
            };
            if !self.selects.contains(&format!("{}.{}", class_name, info.method_ref.name())) {
                continue;
            }
            for arg in info.args.iter().copied() {
                let results = self.arg_results.entry(arg).or_default();
                if !results.contains(&result) {
                    results.push(result);
                }
            }
        }
    }

    fn on_new_points_to_set(&mut self, hcx: &mut HostContext, var: CsVar, pts: &[CsObj]) {
        let Some(results) = self.arg_results.get(&var.var).cloned() else {
            return;
        };
        let taints = Self::taint_objects(hcx, pts);
        if taints.is_empty() {
            return;
        }
        let empty = hcx.empty_context();
        for result in results {
            let to = CsVar {
                context: var.context,
                var: result,
            };
            for taint in taints.iter().copied() {
                if !self.propagated.insert((to, taint)) {
                    continue;
                }
                let Some(source) = hcx.taint.source_of(taint) else {
                    continue;
                };
                let result_type = hcx.program.var(result).var_type.clone();
                let obj = hcx.taint.make_taint(source, &result_type);
                debug!("select result {} tainted", hcx.program.var(result).name);
                hcx.solver.add_points_to(to, CsObj { context: empty, obj });
            }
        }
    }

    fn synthesized_edges(&self) -> usize {
        self.propagated.len()
    }
}

/// Parses every `*.xml` under a directory on a thread pool.
pub struct MapperScanner {
    grace: Duration,
    threads: usize,
}

impl MapperScanner {
    pub fn new(grace: Duration) -> Self {
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        MapperScanner { grace, threads }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    fn mapper_paths(dir: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().map(|ext| ext == "xml").unwrap_or(false))
            .collect();
        paths.sort();
        paths
    }

    pub fn scan(&self, dir: &Path) -> Result<Vec<MapperFile>> {
        if !dir.is_dir() {
            debug!("{} is not a directory", dir.display());
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let paths = Self::mapper_paths(dir);
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .context("failed to build the mapper thread pool")?;
        let results = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();

        for path in paths.iter().cloned() {
            let results = Arc::clone(&results);
            let cancelled = Arc::clone(&cancelled);
            let done_tx = done_tx.clone();
            pool.spawn(move || {
                if !cancelled.load(Ordering::Relaxed) {
                    match parse_mapper_file(&path) {
                        Ok(Some(file)) => {
                            debug!("Found {} db operations in {}", file.statements.len(), path.display());
                            if let Ok(mut results) = results.lock() {
                                results.push(file);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => error!("Error processing file: {:#}", e),
                    }
                }
                let _ = done_tx.send(());
            });
        }
        drop(done_tx);

        let deadline = start + self.grace;
        let mut finished = 0;
        while finished < paths.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match done_rx.recv_timeout(remaining) {
                Ok(()) => finished += 1,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "[!] Mapper scan timed out after {}, {} of {} files parsed",
                        humantime::format_duration(self.grace),
                        finished,
                        paths.len()
                    );
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut files = match results.lock() {
            Ok(mut results) => std::mem::take(&mut *results),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        files.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        info!(
            "[+] {} mappers parsed in {}",
            files.len(),
            humantime::format_duration(start.elapsed())
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::memory::MemoryProgram;
    use crate::ir::program::Annotation;
    use std::io::Write;

    const ORDER_MAPPER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE mapper PUBLIC "-//mybatis.org//DTD Mapper 3.0//EN" "http://mybatis.org/dtd/mybatis-3-mapper.dtd">
<mapper namespace="com.foo.order.OrderMapper">
  <sql id="orderBy">ORDER BY ${sort.field}</sql>
  <select id="list" resultType="com.foo.order.Order">
    SELECT * FROM orders WHERE owner = #{owner}
    <include refid="orderBy"/>
  </select>
  <delete id="purge">DELETE FROM ${table, jdbcType=VARCHAR}</delete>
  <update id="touch">UPDATE orders SET t = now() WHERE id = #{id}</update>
</mapper>"#;

    #[test]
    fn parse_statements_and_params() {
        let file = parse_mapper(ORDER_MAPPER).unwrap();
        assert_eq!(file.namespace, "com.foo.order.OrderMapper");
        assert_eq!(file.statements.len(), 3);
        assert_eq!(file.statements[0].id, "list");
        assert_eq!(file.statements[0].query_type, QueryType::Select);
        assert!(file.statements[0].dollar_params.contains("sort"));
        assert!(file.statements[1].dollar_params.contains("table"));
        assert!(file.statements[2].dollar_params.is_empty());
        assert!(parse_mapper("<beans/>").is_none());
    }

    #[test]
    fn resolve_param_positions() {
        let mut program = MemoryProgram::new();
        let mapper = program.add_class("com.foo.order.OrderMapper");
        program.class_mut(mapper).is_interface = true;
        let list = program.add_method(mapper, "list", &["java.lang.String", "com.foo.Sort"], "java.util.List");
        program.method_mut(list).param_annotations[1]
            .push(Annotation::new("org.apache.ibatis.annotations.Param").with_str("value", "sort"));
        let purge = program.add_method(mapper, "purge", &["java.lang.String"], "void");
        program.add_method(mapper, "touch", &["long"], "void");

        let file = parse_mapper(ORDER_MAPPER).unwrap();
        let sinks = resolve_sinks(&program, &[file]);
        assert_eq!(
            sinks,
            vec![
                SinkConfig::new(&program.method_signature(list), 1, MYBATIS_VUL_ID),
                SinkConfig::new(&program.method_signature(purge), 0, MYBATIS_VUL_ID),
            ]
        );
    }

    const LITERAL_SORT_MAPPER: &str = r#"<mapper namespace="com.foo.order.OrderMapper">
  <sql id="page">LIMIT ${limit}</sql>
  <select id="list">
    SELECT * FROM orders ORDER BY ${sort}
    <include refid="page"><property name="sort" value="created_at"/></include>
  </select>
  <select id="search">
    SELECT * FROM orders WHERE name LIKE '${keyword}'
    <include refid="page"><property value="${keyword}" name="keyword"/></include>
  </select>
</mapper>"#;

    #[test]
    fn literal_property_disables_single_param_sink() {
        let file = parse_mapper(LITERAL_SORT_MAPPER).unwrap();
        assert_eq!(
            file.statements[0].properties,
            vec![("sort".to_string(), "created_at".to_string())]
        );
        assert!(!file.statements[0].single_param_injectable());
        assert!(file.statements[1].single_param_injectable());

        let mut program = MemoryProgram::new();
        let mapper = program.add_class("com.foo.order.OrderMapper");
        program.class_mut(mapper).is_interface = true;
        program.add_method(mapper, "list", &["com.foo.Page"], "java.util.List");
        let search = program.add_method(mapper, "search", &["java.lang.String"], "java.util.List");
        assert_eq!(
            resolve_sinks(&program, &[file]),
            vec![SinkConfig::new(&program.method_signature(search), 0, MYBATIS_VUL_ID)]
        );
    }

    #[test]
    fn select_operations_name_only_selects() {
        let file = parse_mapper(ORDER_MAPPER).unwrap();
        let selects = select_operations(&[file]);
        assert_eq!(selects.into_iter().collect::<Vec<_>>(), vec!["com.foo.order.OrderMapper.list"]);
    }

    #[test]
    fn scan_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("OrderMapper.xml")).unwrap();
        f.write_all(ORDER_MAPPER.as_bytes()).unwrap();
        std::fs::write(dir.path().join("broken.xml"), "<mapper>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "<mapper namespace=\"x\">").unwrap();

        let files = MapperScanner::new(Duration::from_secs(30))
            .with_threads(2)
            .scan(dir.path())
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].namespace, "com.foo.order.OrderMapper");

        let missing = dir.path().join("missing");
        assert!(MapperScanner::new(Duration::from_secs(1)).scan(&missing).unwrap().is_empty());
    }
}
