//! Lays compiled programs out on disk, one buildable directory per
//! artifact.

use super::{
    analyzer::CONTROLLER_NAME,
    controller::{ControllerArtifact, CONTROLLER_RUNTIME},
    service::{ServiceArtifact, SERVICE_PORT, SERVICE_RUNTIME},
    Compilation,
};
use crate::{
    config::Config,
    error::{KompileError, KompileResult},
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

const DOCKERFILE: &str = include_str!("embeds/Dockerfile");
const GO_MOD: &str = include_str!("embeds/go.mod.tmpl");
const DEPLOYMENT: &str = include_str!("embeds/deployment.yml");

pub const MAIN_FILE: &str = "main.go";
pub const RUNTIME_FILE: &str = "kompile_runtime.go";
pub const DEPLOYMENT_FILE: &str = "deployment.yml";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactDir {
    /// Service function name, or `controller`.
    pub name: String,
    pub dir: PathBuf,
}

/// Writes every service and then the controller under `out`.
pub fn write_all(
    out: &Path,
    compilation: &Compilation,
    config: &Config,
) -> KompileResult<Vec<ArtifactDir>> {
    let mut written = Vec::with_capacity(compilation.services.len() + 1);
    for service in &compilation.services {
        written.push(write_service(out, service, config)?);
    }
    written.push(write_controller(out, &compilation.controller, config)?);
    Ok(written)
}

pub fn write_service(
    out: &Path,
    service: &ServiceArtifact,
    config: &Config,
) -> KompileResult<ArtifactDir> {
    let dir = fresh_dir(out, &service.name)?;
    write(&dir.join(MAIN_FILE), &service.source)?;
    write(&dir.join(RUNTIME_FILE), SERVICE_RUNTIME)?;
    write(&dir.join("go.mod"), &go_mod(&service.name, config))?;
    write(&dir.join("Dockerfile"), DOCKERFILE)?;
    write(
        &dir.join(DEPLOYMENT_FILE),
        &deployment(
            &service.name,
            &workload_name(&service.name),
            SERVICE_PORT,
            &[],
            config,
        ),
    )?;
    info!(service = %service.name, dir = %dir.display(), "wrote service");
    Ok(ArtifactDir {
        name: service.name.clone(),
        dir,
    })
}

pub fn write_controller(
    out: &Path,
    controller: &ControllerArtifact,
    config: &Config,
) -> KompileResult<ArtifactDir> {
    let dir = fresh_dir(out, CONTROLLER_NAME)?;
    write(&dir.join(MAIN_FILE), &controller.source)?;
    write(&dir.join(RUNTIME_FILE), CONTROLLER_RUNTIME)?;
    write(&dir.join("go.mod"), &go_mod(CONTROLLER_NAME, config))?;
    write(&dir.join("Dockerfile"), DOCKERFILE)?;
    let env = controller_env(controller, config, |service| {
        format!("http://{}:{SERVICE_PORT}", workload_name(service))
    });
    write(
        &dir.join(DEPLOYMENT_FILE),
        &deployment(
            CONTROLLER_NAME,
            &config.controller.host,
            config.controller.port,
            &env,
            config,
        ),
    )?;
    info!(dir = %dir.display(), "wrote controller");
    Ok(ArtifactDir {
        name: CONTROLLER_NAME.to_string(),
        dir,
    })
}

/// Image reference an artifact is pushed as. Registries only accept
/// lower-case repository names.
pub fn image_name(registry: &str, artifact: &str) -> String {
    format!(
        "{}/{}:latest",
        registry.trim_end_matches('/'),
        artifact.to_ascii_lowercase()
    )
}

/// DNS-1123 label for naming workloads after an artifact.
pub fn workload_name(artifact: &str) -> String {
    let mut out = String::with_capacity(artifact.len());
    for ch in artifact.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "kompile".into()
    } else {
        trimmed.chars().take(63).collect()
    }
}

/// Environment variable the controller reads a service address from.
pub fn service_env_var(service: &str) -> String {
    let name: String = service
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("KOMPILE_SERVICE_{name}")
}

fn go_mod(artifact: &str, config: &Config) -> String {
    GO_MOD
        .replace("{{module}}", &format!("kompile/{}", workload_name(artifact)))
        .replace("{{go_version}}", &config.build.go_version)
}

/// Variables the controller workload is started with: its listening port
/// and one address per service it dispatches to.
pub fn controller_env(
    controller: &ControllerArtifact,
    config: &Config,
    address: impl Fn(&str) -> String,
) -> Vec<(String, String)> {
    let mut env = vec![(
        "KOMPILE_CONTROLLER_PORT".to_string(),
        config.controller.port.to_string(),
    )];
    env.extend(
        controller
            .services
            .iter()
            .map(|service| (service_env_var(service), address(service))),
    );
    env
}

fn deployment(
    name: &str,
    host: &str,
    port: u16,
    env: &[(String, String)],
    config: &Config,
) -> String {
    let env = if env.is_empty() {
        "            []".to_string()
    } else {
        env.iter()
            .map(|(key, value)| {
                format!("            - name: {key}\n              value: \"{value}\"")
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    DEPLOYMENT
        .replace("{{name}}", &workload_name(name))
        .replace("{{image}}", &image_name(&config.registry.location, name))
        .replace("{{port}}", &port.to_string())
        .replace("{{host}}", host)
        .replace("{{env}}", &env)
}

fn fresh_dir(out: &Path, name: &str) -> KompileResult<PathBuf> {
    let dir = out.join(name);
    if dir.exists() {
        fs::remove_dir_all(&dir).map_err(|error| KompileError::io(&dir, error))?;
    }
    fs::create_dir_all(&dir).map_err(|error| KompileError::io(&dir, error))?;
    Ok(dir)
}

fn write(path: &Path, contents: &str) -> KompileResult<()> {
    fs::write(path, contents).map_err(|error| KompileError::io(path, error))
}
