// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Analysis options.

use clap::error::ErrorKind;
use clap::{Arg, Command};
use std::path::PathBuf;
use std::time::Duration;

use crate::builder::spring_bean::FanOutPolicy;
use crate::gateway::endpoint::RouteRewrite;
use crate::graph::chain::BfsBounds;

const MSCAN_USAGE: &str = r#"mscan [OPTIONS] --project <NAME> --keywords <NAMESPACE>..."#;

/// Creates the clap::Command metadata for argument parsing.
fn make_options_parser() -> Command<'static> {
    Command::new("mscan")
        .no_binary_name(true)
        .override_usage(MSCAN_USAGE)
        .version(env!("CARGO_PKG_VERSION"))
        .arg(Arg::new("project")
            .long("project")
            .takes_value(true)
            .help("The project name, used to locate the entry oracle."))
        .arg(Arg::new("keywords")
            .long("keywords")
            .takes_value(true)
            .multiple_values(true)
            .use_value_delimiter(true)
            .help("Package namespaces of the application classes, e.g. com.foo.")
            .long_help("Classes whose qualified name contains one of these keywords are treated as \
                        application code. Comma separated or repeated."))
        .arg(Arg::new("services-dir")
            .long("services-dir")
            .takes_value(true)
            .help("Directory of extracted service archives, one subdirectory per archive."))
        .arg(Arg::new("route-config")
            .long("route-config")
            .takes_value(true)
            .help("Gateway route configuration, overriding the one found in the archives."))
        .arg(Arg::new("oracle-dir")
            .long("oracle-dir")
            .takes_value(true)
            .help("Directory holding <project>.json with external and internal entry globs."))
        .arg(Arg::new("taint-config")
            .long("taint-config")
            .takes_value(true)
            .help("Taint configuration file, or a directory of .yml/.yaml files."))
        .arg(Arg::new("mapper-dir")
            .long("mapper-dir")
            .takes_value(true)
            .help("Directory scanned for MyBatis mapper XML files."))
        .arg(Arg::new("program")
            .long("program")
            .takes_value(true)
            .help("The program model in JSON."))
        .arg(Arg::new("prior-call-graph")
            .long("prior-call-graph")
            .takes_value(true)
            .help("A call graph in JSON from a previous, cheaper analysis run."))
        .arg(Arg::new("output-dir")
            .long("output-dir")
            .takes_value(true)
            .help("Directory receiving the reports."))
        .arg(Arg::new("max-context-depth")
            .long("max-context-depth")
            .takes_value(true)
            .value_parser(clap::value_parser!(u32))
            .help("Call-site context depth of methods on a source-to-sink path."))
        .arg(Arg::new("min-context-depth")
            .long("min-context-depth")
            .takes_value(true)
            .value_parser(clap::value_parser!(u32))
            .help("Call-site context depth of methods off every source-to-sink path."))
        .arg(Arg::new("heap-context-depth")
            .long("heap-context-depth")
            .takes_value(true)
            .value_parser(clap::value_parser!(u32))
            .hide(true)
            .help("Heap context depth."))
        .arg(Arg::new("bfs-depth")
            .long("bfs-depth")
            .takes_value(true)
            .value_parser(clap::value_parser!(usize))
            .help("Maximum length of a call chain."))
        .arg(Arg::new("chain-iterations")
            .long("chain-iterations")
            .takes_value(true)
            .value_parser(clap::value_parser!(usize))
            .hide(true)
            .help("Dequeue ceiling of chain discovery."))
        .arg(Arg::new("reach-iterations")
            .long("reach-iterations")
            .takes_value(true)
            .value_parser(clap::value_parser!(usize))
            .hide(true)
            .help("Dequeue ceiling of reachability queries."))
        .arg(Arg::new("mapper-timeout")
            .long("mapper-timeout")
            .takes_value(true)
            .help("Grace period of the mapper scan, e.g. 60s or 2m."))
        .arg(Arg::new("fan-out")
            .long("fan-out")
            .takes_value(true)
            .value_parser(["all", "diagnose"])
            .help("How ambiguous by-type injections are wired.")
            .long_help("`all` wires every candidate bean. `diagnose` reports the ambiguity and wires nothing."))
        .arg(Arg::new("route-rewrite")
            .long("route-rewrite")
            .takes_value(true)
            .value_parser(["identity", "yudao"])
            .help("Platform-specific route rewriting."))
        .arg(Arg::new("dump-endpoints")
            .long("dump-endpoints")
            .takes_value(false)
            .help("Dump the endpoint table to endpoints.txt."))
        .arg(Arg::new("dump-directives")
            .long("dump-directives")
            .takes_value(false)
            .help("Dump the precision directives to directives.txt."))
}

#[derive(Clone, Debug)]
pub struct AnalysisOptions {
    pub project: String,
    pub keywords: Vec<String>,
    pub services_dir: Option<PathBuf>,
    pub route_config: Option<PathBuf>,
    pub oracle_dir: Option<PathBuf>,
    pub taint_config: Option<PathBuf>,
    pub mapper_dir: Option<PathBuf>,
    pub program: Option<PathBuf>,
    pub prior_call_graph: Option<PathBuf>,
    pub output_dir: PathBuf,

    // options for the precision-directed context selector
    pub max_context_depth: u32,
    pub min_context_depth: u32,
    pub heap_context_depth: u32,

    pub bfs_depth: usize,
    pub chain_iterations: usize,
    pub reach_iterations: usize,

    pub mapper_timeout: Duration,
    pub fan_out: FanOutPolicy,
    pub route_rewrite: RouteRewrite,

    pub dump_endpoints: bool,
    pub dump_directives: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            project: String::new(),
            keywords: Vec::new(),
            services_dir: None,
            route_config: None,
            oracle_dir: None,
            taint_config: None,
            mapper_dir: None,
            program: None,
            prior_call_graph: None,
            output_dir: PathBuf::from("."),
            max_context_depth: 5,
            min_context_depth: 1,
            heap_context_depth: 1,
            bfs_depth: BfsBounds::CHAIN.max_depth,
            chain_iterations: BfsBounds::CHAIN.max_iterations,
            reach_iterations: BfsBounds::REACHABILITY.max_iterations,
            mapper_timeout: Duration::from_secs(60),
            fan_out: FanOutPolicy::All,
            route_rewrite: RouteRewrite::Yudao,
            dump_endpoints: false,
            dump_directives: false,
        }
    }
}

impl AnalysisOptions {
    /// Parses options from a list of strings, overriding only the options present in `args`.
    ///
    /// Arguments coming from the environment are best effort: a parse error is returned to the
    /// caller. On the command line, help and version requests print and exit.
    pub fn parse_from_args(&mut self, args: &[String], from_env: bool) -> anyhow::Result<()> {
        let matches = match make_options_parser().try_get_matches_from(args.iter()) {
            Ok(matches) => matches,
            Err(e) if from_env => return Err(anyhow::anyhow!("invalid MSCAN_FLAGS: {}", e)),
            Err(e) => match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
                _ => return Err(anyhow::anyhow!("{}", e)),
            },
        };

        if let Some(project) = matches.get_one::<String>("project") {
            self.project = project.clone();
        }
        if let Some(keywords) = matches.get_many::<String>("keywords") {
            self.keywords = keywords
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }

        let path_of = |id: &str| matches.get_one::<String>(id).map(PathBuf::from);
        if let Some(p) = path_of("services-dir") {
            self.services_dir = Some(p);
        }
        if let Some(p) = path_of("route-config") {
            self.route_config = Some(p);
        }
        if let Some(p) = path_of("oracle-dir") {
            self.oracle_dir = Some(p);
        }
        if let Some(p) = path_of("taint-config") {
            self.taint_config = Some(p);
        }
        if let Some(p) = path_of("mapper-dir") {
            self.mapper_dir = Some(p);
        }
        if let Some(p) = path_of("program") {
            self.program = Some(p);
        }
        if let Some(p) = path_of("prior-call-graph") {
            self.prior_call_graph = Some(p);
        }
        if let Some(p) = path_of("output-dir") {
            self.output_dir = p;
        }

        if let Some(depth) = matches.get_one::<u32>("max-context-depth") {
            self.max_context_depth = *depth;
        }
        if let Some(depth) = matches.get_one::<u32>("min-context-depth") {
            self.min_context_depth = *depth;
        }
        if let Some(depth) = matches.get_one::<u32>("heap-context-depth") {
            self.heap_context_depth = *depth;
        }
        if let Some(depth) = matches.get_one::<usize>("bfs-depth") {
            self.bfs_depth = *depth;
        }
        if let Some(n) = matches.get_one::<usize>("chain-iterations") {
            self.chain_iterations = *n;
        }
        if let Some(n) = matches.get_one::<usize>("reach-iterations") {
            self.reach_iterations = *n;
        }

        if let Some(timeout) = matches.get_one::<String>("mapper-timeout") {
            self.mapper_timeout = humantime::parse_duration(timeout)
                .map_err(|e| anyhow::anyhow!("invalid --mapper-timeout {}: {}", timeout, e))?;
        }
        if let Some(policy) = matches.get_one::<String>("fan-out") {
            self.fan_out = policy.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(rewrite) = matches.get_one::<String>("route-rewrite") {
            self.route_rewrite = rewrite.parse().map_err(anyhow::Error::msg)?;
        }

        if matches.contains_id("dump-endpoints") {
            self.dump_endpoints = true;
        }
        if matches.contains_id("dump-directives") {
            self.dump_directives = true;
        }
        Ok(())
    }

    pub fn chain_bounds(&self) -> BfsBounds {
        BfsBounds {
            max_depth: self.bfs_depth,
            max_iterations: self.chain_iterations,
        }
    }

    pub fn reachability_bounds(&self) -> BfsBounds {
        BfsBounds {
            max_depth: self.bfs_depth,
            max_iterations: self.reach_iterations,
        }
    }
}
