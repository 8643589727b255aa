// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use itertools::Itertools;
use log::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::gateway::service::Endpoint;
use crate::ir::program::ProgramModel;
use crate::pta::context_strategy::DirectiveTable;
use crate::pta::session::AnalysisSession;
use crate::pta::CompositePlugin;
use crate::taint::sink_handler::TaintReport;

pub const TAINT_FLOWS_FILE: &str = "microservice-taint-flows.txt";
pub const TAINT_FLOW_GRAPH_FILE: &str = "microservice-sinks-taint-flow-graph.dot";
pub const ENDPOINTS_FILE: &str = "endpoints.txt";
pub const DIRECTIVES_FILE: &str = "directives.txt";

fn create_writer(dir: &Path, name: &str) -> Result<BufWriter<File>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Unable to create {}", dir.display()))?;
    let path = dir.join(name);
    let file = File::create(&path).with_context(|| format!("Unable to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Writes everything the options ask for and prints the summary statistics.
pub fn dump_results(
    program: &dyn ProgramModel,
    session: &AnalysisSession,
    plugins: Option<&CompositePlugin>,
    directives: &DirectiveTable,
) -> Result<()> {
    let options = &session.options;
    let endpoints = session.endpoints(program);
    if options.dump_endpoints {
        info!("Dumping endpoints...");
        dump_endpoints(endpoints, &options.output_dir)?;
    }
    if options.dump_directives {
        info!("Dumping precision directives...");
        dump_directives(program, directives, &options.output_dir)?;
    }

    let exposed = endpoints.iter().filter(|e| e.exposed).count();
    info!("##########################################################");
    info!("Endpoints: {} exposed, {} internal", exposed, endpoints.len() - exposed);
    info!("Precision directives: {}", directives.len());
    if let Some(plugins) = plugins {
        for plugin in plugins.plugins() {
            let edges = plugin.synthesized_edges();
            if edges > 0 {
                info!("Edges synthesized by {}: {}", plugin.name(), edges);
            }
        }
    }
    info!("##########################################################");
    Ok(())
}

/// One line per endpoint: exposure, route, declaring method, hit routes, relevant services.
pub fn dump_endpoints(endpoints: &[Endpoint], dir: &Path) -> Result<()> {
    let mut writer = create_writer(dir, ENDPOINTS_FILE)?;
    for endpoint in endpoints.iter().sorted_by(|a, b| a.route.cmp(&b.route)) {
        writeln!(
            writer,
            "{}\t{}\t{}.{}\t[{}]\t[{}]",
            if endpoint.exposed { "EXPOSED" } else { "INTERNAL" },
            endpoint.route,
            endpoint.declaring_class,
            endpoint.method_name,
            endpoint.hit_routes.iter().join(", "),
            endpoint.relevant_services.iter().join(", ")
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// One line per directive: `<method signature>\t<precision>`.
pub fn dump_directives(program: &dyn ProgramModel, directives: &DirectiveTable, dir: &Path) -> Result<()> {
    let mut writer = create_writer(dir, DIRECTIVES_FILE)?;
    for (method, precision) in directives {
        writeln!(writer, "{}\t{}", program.method_signature(*method), precision)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn dump_taint_report(program: &dyn ProgramModel, report: &TaintReport, dir: &Path) -> Result<()> {
    let mut writer = create_writer(dir, TAINT_FLOWS_FILE)?;
    for flow in report.flows.iter() {
        writeln!(writer, "{} {}", flow.chain_len(), flow.flow)?;
    }
    writer.flush()?;
    report.graph.to_dot(program, &dir.join(TAINT_FLOW_GRAPH_FILE))?;
    info!("[+] {} taint flows dumped to {}", report.flows.len(), dir.display());
    Ok(())
}
