//! Builds every artifact directory into an image and runs it on the
//! cluster: services first, then the controller wired to their addresses.

pub mod retry;
pub mod scheduler;
pub mod toolchain;

use crate::{
    config::Config,
    error::{KompileError, KompileResult},
    kompiler::{
        analyzer::CONTROLLER_NAME,
        artifacts::{controller_env, image_name, workload_name, ArtifactDir},
        controller::ControllerArtifact,
        service::SERVICE_PORT,
    },
};
use retry::RetryPolicy;
use scheduler::{Phase, Scheduler, WorkloadSpec};
use std::collections::BTreeMap;
use toolchain::Toolchain;
use tracing::{debug, info};

/// Artifact name to the address its workload answers on.
pub type Addresses = BTreeMap<String, String>;

pub struct Orchestrator<'a, T, S> {
    toolchain: &'a T,
    scheduler: &'a S,
    config: &'a Config,
    policy: RetryPolicy,
}

impl<'a, T: Toolchain, S: Scheduler> Orchestrator<'a, T, S> {
    pub fn new(toolchain: &'a T, scheduler: &'a S, config: &'a Config) -> Self {
        Self {
            toolchain,
            scheduler,
            config,
            policy: config.retry_policy(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build_and_deploy(
        &self,
        artifacts: &[ArtifactDir],
        controller: &ControllerArtifact,
    ) -> KompileResult<Addresses> {
        let mut addresses = Addresses::new();
        for artifact in artifacts.iter().filter(|a| a.name != CONTROLLER_NAME) {
            let address = self.deploy(artifact, SERVICE_PORT, Vec::new())?.1;
            addresses.insert(artifact.name.clone(), address);
        }

        let Some(artifact) = artifacts.iter().find(|a| a.name == CONTROLLER_NAME) else {
            return Ok(addresses);
        };
        if let Some(missing) = controller
            .services
            .iter()
            .find(|service| !addresses.contains_key(*service))
        {
            return Err(KompileError::Scheduling {
                artifact: CONTROLLER_NAME.into(),
                message: format!("no address for service `{missing}`"),
            });
        }
        let env = controller_env(controller, self.config, |service| {
            addresses.get(service).cloned().unwrap_or_default()
        });
        let port = self.config.controller.port;
        let (workload, address) = self.deploy(artifact, port, env)?;
        self.scheduler
            .expose(CONTROLLER_NAME, &workload, &self.config.controller.host, port)?;
        addresses.insert(CONTROLLER_NAME.to_string(), address);
        Ok(addresses)
    }

    /// Builds, pushes and schedules one artifact; returns the workload name
    /// and its address once it runs.
    fn deploy(
        &self,
        artifact: &ArtifactDir,
        port: u16,
        env: Vec<(String, String)>,
    ) -> KompileResult<(String, String)> {
        let name = &artifact.name;
        let image = image_name(&self.config.registry.location, name);

        let executable = self.toolchain.compile(name, &artifact.dir)?;
        info!(artifact = %name, executable = %executable.display(), "compiled");
        self.toolchain.containerize(name, &executable, &image)?;
        self.toolchain.push(name, &image)?;
        info!(artifact = %name, image = %image, "pushed image");

        let workload = self.scheduler.create_workload(&WorkloadSpec {
            artifact: name.clone(),
            name: workload_name(name),
            image,
            port,
            env,
        })?;
        let address = self.wait_until_running(name, &workload)?;
        let address = format!("http://{address}:{port}");
        info!(artifact = %name, workload = %workload, address = %address, "workload running");
        Ok((workload, address))
    }

    fn wait_until_running(&self, artifact: &str, workload: &str) -> KompileResult<String> {
        let polled = self.policy.poll(|attempt| {
            let status = self.scheduler.get_status(artifact, workload)?;
            debug!(artifact, workload, attempt, phase = ?status.phase, "polled workload");
            match (status.phase, status.address) {
                (Phase::Running, Some(address)) => Ok(Some(address)),
                (Phase::Failed | Phase::Succeeded, _) => Err(KompileError::Scheduling {
                    artifact: artifact.to_string(),
                    message: format!("workload {workload} stopped ({:?})", status.phase),
                }),
                _ => Ok(None),
            }
        })?;
        polled.ok_or_else(|| KompileError::Scheduling {
            artifact: artifact.to_string(),
            message: format!(
                "workload {workload} not running after {} attempts",
                self.policy.max_attempts
            ),
        })
    }
}

#[cfg(test)]
mod tests;
