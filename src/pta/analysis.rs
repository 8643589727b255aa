// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Assembles a microservice analysis: the session, the plugin list and the context selector.
//!
//! The host drives the fixpoint. It hands every event to [`MicroserviceAnalysis::plugins`] and
//! asks [`MicroserviceAnalysis::selector`] for callee contexts.

use anyhow::Result;
use log::*;
use std::collections::BTreeSet;
use std::time::Instant;

use super::context_strategy::{DirectiveTable, PrecisionSelector};
use super::session::AnalysisSession;
use super::strategies::pruning::PrecisionTuner;
use super::{CompositePlugin, Plugin};
use crate::builder::dubbo::DubboPlugin;
use crate::builder::feign::FeignPlugin;
use crate::builder::grpc::GrpcPlugin;
use crate::builder::kafka::KafkaPlugin;
use crate::builder::rabbitmq::RabbitMqPlugin;
use crate::builder::rest_template::RestTemplatePlugin;
use crate::builder::spring_container::SpringContainerPlugin;
use crate::gateway::endpoint::EntryOracle;
use crate::gateway::service::{Service, ServiceDiscovery};
use crate::gateway::GatewayResolver;
use crate::graph::call_graph::MethodCallGraph;
use crate::ir::program::{MethodId, ProgramModel};
use crate::taint::mybatis::{resolve_sinks, select_operations, MapperFile, MapperResultPlugin, MapperScanner};
use crate::taint::sink_handler::SinkHandler;
use crate::taint::source::TaintSourcePlugin;
use crate::taint::TaintConfig;
use crate::util::options::AnalysisOptions;

/// Discovers the services under `options.services_dir` and resolves the gateway routes onto them.
pub fn discover_services(options: &AnalysisOptions) -> Result<Vec<Service>> {
    let Some(root) = &options.services_dir else {
        info!("[*] No services directory given");
        return Ok(Vec::new());
    };
    let discovery =
        ServiceDiscovery::new(&options.keywords, options.route_config.as_deref()).discover(root)?;
    let mut services = discovery.services;
    GatewayResolver::new(&mut services).resolve(&discovery.route_configs);
    info!("[+] {} services discovered", services.len());
    Ok(services)
}

/// Loads the taint configuration named by the options. A missing option is an empty configuration.
pub fn load_taint_config(options: &AnalysisOptions) -> Result<TaintConfig> {
    match &options.taint_config {
        Some(path) => TaintConfig::load(path),
        None => Ok(TaintConfig::default()),
    }
}

/// Parses the mappers under `options.mapper_dir`.
pub fn scan_mappers(options: &AnalysisOptions) -> Result<Vec<MapperFile>> {
    match &options.mapper_dir {
        Some(dir) => MapperScanner::new(options.mapper_timeout).scan(dir),
        None => Ok(Vec::new()),
    }
}

/// Computes precision directives for the exposed endpoints from a prior call graph.
pub fn compute_directives(
    program: &dyn ProgramModel,
    session: &AnalysisSession,
    call_graph: &MethodCallGraph,
) -> DirectiveTable {
    let entries: Vec<MethodId> = session
        .exposed_endpoints(program)
        .map(|e| e.method)
        .filter(|m| !program.method(*m).is_abstract)
        .collect();
    let sinks = session.taint_config.sink_signatures();
    let tuner = PrecisionTuner::new(
        program,
        call_graph,
        session.keywords(),
        session.options.reachability_bounds(),
    );
    tuner.compute(&entries, &sinks)
}

pub struct AnalysisBuilder {
    options: AnalysisOptions,
    services: Vec<Service>,
    taint_config: TaintConfig,
    oracle: Option<EntryOracle>,
    directives: DirectiveTable,
    mapper_selects: BTreeSet<String>,
    extra_plugins: Vec<Box<dyn Plugin>>,
    default_plugins: bool,
}

impl AnalysisBuilder {
    fn new(options: AnalysisOptions) -> Self {
        AnalysisBuilder {
            options,
            services: Vec::new(),
            taint_config: TaintConfig::default(),
            oracle: None,
            directives: DirectiveTable::new(),
            mapper_selects: BTreeSet::new(),
            extra_plugins: Vec::new(),
            default_plugins: true,
        }
    }

    pub fn services(mut self, services: Vec<Service>) -> Self {
        self.services = services;
        self
    }

    pub fn taint_config(mut self, taint_config: TaintConfig) -> Self {
        self.taint_config = taint_config;
        self
    }

    pub fn oracle(mut self, oracle: Option<EntryOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn directives(mut self, directives: DirectiveTable) -> Self {
        self.directives = directives;
        self
    }

    /// Appends a plugin after the default ones.
    pub fn plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.extra_plugins.push(plugin);
        self
    }

    pub fn without_default_plugins(mut self) -> Self {
        self.default_plugins = false;
        self
    }

    /// Reads services, routes, the taint configuration and the entry oracle as the options say.
    /// Each input that fails to load is logged and left empty.
    pub fn load_inputs(mut self) -> Self {
        match discover_services(&self.options) {
            Ok(services) => self.services = services,
            Err(e) => error!("[-] {:#}", e),
        }
        match load_taint_config(&self.options) {
            Ok(config) => self.taint_config = config,
            Err(e) => error!("[-] {:#}", e),
        }
        if let Some(dir) = &self.options.oracle_dir {
            match EntryOracle::load(dir, &self.options.project) {
                Ok(oracle) => self.oracle = Some(oracle),
                Err(e) => warn!("[-] {:#}", e),
            }
        }
        self
    }

    /// Adds the sinks of the parsed mappers to the taint configuration and remembers their
    /// select statements for result propagation.
    pub fn mapper_sinks(mut self, program: &dyn ProgramModel, files: &[MapperFile]) -> Self {
        let added = self.taint_config.add_sinks(resolve_sinks(program, files));
        self.mapper_selects.extend(select_operations(files));
        debug!("{} mapper sinks added, {} selects", added, self.mapper_selects.len());
        self
    }

    fn default_plugin_list(options: &AnalysisOptions, mapper_selects: BTreeSet<String>) -> Vec<Box<dyn Plugin>> {
        vec![
            Box::new(SpringContainerPlugin::new(options.fan_out)),
            Box::new(TaintSourcePlugin::new()),
            Box::new(MapperResultPlugin::new(mapper_selects)),
            Box::new(FeignPlugin::new()),
            Box::new(DubboPlugin::new()),
            Box::new(GrpcPlugin::new()),
            Box::new(KafkaPlugin::new()),
            Box::new(RabbitMqPlugin::new()),
            Box::new(RestTemplatePlugin::new()),
            Box::new(SinkHandler::new(options.chain_bounds())),
        ]
    }

    pub fn build(self) -> MicroserviceAnalysis {
        let mut plugins = CompositePlugin::new();
        if self.default_plugins {
            for plugin in Self::default_plugin_list(&self.options, self.mapper_selects) {
                plugins.add_plugin(plugin);
            }
        }
        for plugin in self.extra_plugins {
            plugins.add_plugin(plugin);
        }
        let selector = PrecisionSelector::with_limits(
            self.directives,
            self.options.max_context_depth as usize,
            self.options.min_context_depth as usize,
            self.options.heap_context_depth as usize,
        );
        let session = AnalysisSession::new(self.options, self.services, self.taint_config, self.oracle);
        MicroserviceAnalysis {
            session,
            plugins,
            selector,
            created: Instant::now(),
        }
    }
}

pub struct MicroserviceAnalysis {
    session: AnalysisSession,
    plugins: CompositePlugin,
    selector: PrecisionSelector,
    created: Instant,
}

impl MicroserviceAnalysis {
    pub fn builder(options: AnalysisOptions) -> AnalysisBuilder {
        AnalysisBuilder::new(options)
    }

    pub fn session(&self) -> &AnalysisSession {
        &self.session
    }

    pub fn plugins(&self) -> &CompositePlugin {
        &self.plugins
    }

    pub fn selector(&self) -> &PrecisionSelector {
        &self.selector
    }

    /// Splits the analysis for a host run: plugins and selector mutate while the session is shared.
    pub fn parts_mut(&mut self) -> (&AnalysisSession, &mut CompositePlugin, &mut PrecisionSelector) {
        (&self.session, &mut self.plugins, &mut self.selector)
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.created.elapsed()
    }
}
