// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The main routine of `mscan`.
//!
//! Runs the pre-analysis: discovers services and gateway routes, loads the taint configuration
//! and the program model, classifies endpoints and computes precision directives. The
//! points-to fixpoint itself is left to the host analysis.

use log::*;
use std::env;
use std::time::Instant;

use mscan::graph::call_graph::PriorCallGraph;
use mscan::ir::memory::MemoryProgram;
use mscan::pta::analysis::{compute_directives, scan_mappers, MicroserviceAnalysis};
use mscan::pta::context_strategy::DirectiveTable;
use mscan::util::options::AnalysisOptions;
use mscan::util::results_dumper;

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;

fn main() {
    // Initialize loggers.
    if env::var("MSCAN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("MSCAN_LOG")
            .write_style("MSCAN_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    // Get any options specified via the MSCAN_FLAGS environment variable
    let mut options = AnalysisOptions::default();
    let mscan_flags = env::var("MSCAN_FLAGS").unwrap_or_default();
    let mscan_args: Vec<String> = serde_json::from_str(&mscan_flags).unwrap_or_default();
    if let Err(e) = options.parse_from_args(&mscan_args[..], true) {
        error!("{:#}", e);
        std::process::exit(EXIT_FAILURE);
    }

    // Let arguments supplied on the command line override the environment variable.
    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(e) = options.parse_from_args(&args[..], false) {
        eprintln!("{:#}", e);
        std::process::exit(EXIT_FAILURE);
    }
    info!("MSCAN Options: {:?}", options);

    std::process::exit(run(options));
}

fn run(options: AnalysisOptions) -> i32 {
    let start = Instant::now();

    let Some(program_path) = options.program.clone() else {
        error!("No program model given, use --program");
        return EXIT_FAILURE;
    };
    let program = match MemoryProgram::load(&program_path) {
        Ok(program) => program,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_FAILURE;
        }
    };
    info!("[+] Program model loaded from {}", program_path.display());

    let mappers = match scan_mappers(&options) {
        Ok(mappers) => mappers,
        Err(e) => {
            warn!("[-] {:#}", e);
            Vec::new()
        }
    };

    let prior_call_graph = options.prior_call_graph.clone();
    let analysis = MicroserviceAnalysis::builder(options)
        .load_inputs()
        .mapper_sinks(&program, &mappers)
        .build();

    let session = analysis.session();
    let endpoints = session.endpoints(&program);
    info!(
        "[+] {} endpoints classified, {} exposed",
        endpoints.len(),
        endpoints.iter().filter(|e| e.exposed).count()
    );

    let directives = match prior_call_graph.as_deref().map(PriorCallGraph::load) {
        Some(Ok(prior)) => compute_directives(&program, session, &prior.into_call_graph()),
        Some(Err(e)) => {
            warn!("[-] {:#}", e);
            DirectiveTable::new()
        }
        None => DirectiveTable::new(),
    };

    if let Err(e) = results_dumper::dump_results(&program, session, Some(analysis.plugins()), &directives) {
        error!("[-] {:#}", e);
    }
    info!("[+] Pre-analysis finished in {}", humantime::format_duration(start.elapsed()));
    EXIT_SUCCESS
}
