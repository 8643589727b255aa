// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! State shared by every plugin of one analysis run.

use std::cell::{OnceCell, RefCell};

use log::*;

use crate::gateway::endpoint::{EndpointClassifier, EntryOracle};
use crate::gateway::mapping::MappingResolver;
use crate::gateway::service::{Endpoint, Service};
use crate::ir::program::{Annotation, ClassId, MethodId, ProgramModel};
use crate::taint::TaintConfig;
use crate::util::options::AnalysisOptions;

pub struct AnalysisSession {
    pub options: AnalysisOptions,
    pub services: Vec<Service>,
    pub taint_config: TaintConfig,
    pub oracle: Option<EntryOracle>,
    endpoints: OnceCell<Vec<Endpoint>>,
    mappings: RefCell<MappingResolver>,
}

impl AnalysisSession {
    pub fn new(
        options: AnalysisOptions,
        services: Vec<Service>,
        taint_config: TaintConfig,
        oracle: Option<EntryOracle>,
    ) -> Self {
        let mappings = RefCell::new(MappingResolver::new(&options.keywords));
        AnalysisSession {
            options,
            services,
            taint_config,
            oracle,
            endpoints: OnceCell::new(),
            mappings,
        }
    }

    #[inline]
    pub fn keywords(&self) -> &[String] {
        &self.options.keywords
    }

    /// Returns true if the qualified class name belongs to the application namespace.
    pub fn is_namespace_class(&self, class_name: &str) -> bool {
        self.options.keywords.iter().any(|k| class_name.contains(k.as_str()))
    }

    pub fn is_namespace_method(&self, program: &dyn ProgramModel, method: MethodId) -> bool {
        let class = program.method(method).class;
        self.is_namespace_class(&program.class(class).name)
    }

    /// Application classes of the namespace, in class id order.
    pub fn namespace_classes(&self, program: &dyn ProgramModel) -> Vec<ClassId> {
        program
            .application_classes()
            .into_iter()
            .filter(|c| self.is_namespace_class(&program.class(*c).name))
            .collect()
    }

    /// The classified endpoints. Classification runs on the first call only.
    pub fn endpoints(&self, program: &dyn ProgramModel) -> &[Endpoint] {
        self.endpoints.get_or_init(|| {
            let classifier = EndpointClassifier {
                program,
                keywords: &self.options.keywords,
                services: &self.services,
                oracle: self.oracle.as_ref(),
                rewrite: self.options.route_rewrite,
            };
            let endpoints = classifier.classify(&mut self.mappings.borrow_mut());
            let exposed = endpoints.iter().filter(|e| e.exposed).count();
            info!(
                "[+] {} endpoints classified, {} exposed, {} internal",
                endpoints.len(),
                exposed,
                endpoints.len() - exposed
            );
            endpoints
        })
    }

    pub fn exposed_endpoints<'s>(&'s self, program: &dyn ProgramModel) -> impl Iterator<Item = &'s Endpoint> {
        self.endpoints(program).iter().filter(|e| e.exposed)
    }

    pub fn is_exposed(&self, program: &dyn ProgramModel, method: MethodId) -> bool {
        self.exposed_endpoints(program).any(|e| e.method == method)
    }

    pub fn method_mapping(&self, program: &dyn ProgramModel, method: MethodId) -> Option<Annotation> {
        self.mappings.borrow_mut().method_mapping(program, method)
    }

    /// The un-rewritten route of a mapped method.
    pub fn route_of(&self, program: &dyn ProgramModel, method: MethodId) -> Option<String> {
        self.mappings.borrow_mut().route_of(program, method)
    }
}
