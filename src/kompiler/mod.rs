//! The source-to-source half of the pipeline: find launch sites, split the
//! launched functions out as services and rewrite what is left into the
//! controller.

pub mod analyzer;
pub mod artifacts;
pub mod controller;
pub mod globals;
pub mod scope;
pub mod sends;
pub mod service;
pub mod template;

use crate::{
    config::Config,
    error::{KompileError, KompileResult},
    program::Program,
};
use analyzer::{find_launch_sites, Analysis};
use controller::ControllerArtifact;
use service::ServiceArtifact;
use tracing::info;

#[derive(Clone, Debug)]
pub struct Compilation {
    pub analysis: Analysis,
    pub services: Vec<ServiceArtifact>,
    pub controller: ControllerArtifact,
}

pub fn compile(program: &Program, config: &Config) -> KompileResult<Compilation> {
    let analysis = find_launch_sites(&program.file, &program.symbols);
    info!(
        sites = analysis.sites.len(),
        skipped = analysis.skipped.len(),
        "analyzed launch sites"
    );

    let mut services = Vec::new();
    for callee in analysis.callees() {
        let symbol = program
            .symbols
            .get(callee)
            .ok_or_else(|| KompileError::Build {
                artifact: callee.to_string(),
                message: "launched function is missing from the symbol table".into(),
            })?;
        services.push(service::synthesize(program, symbol, config)?);
    }

    let controller = controller::rewrite(program, &analysis, &services)?;
    Ok(Compilation {
        analysis,
        services,
        controller,
    })
}
