//! Running images as cluster workloads.

use super::toolchain::{failure, run};
use crate::error::{KompileError, KompileResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    io::Write,
    process::{Command, Stdio},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Artifact the workload runs, used in errors.
    pub artifact: String,
    /// Prefix for the generated workload name; also its `app` label.
    pub name: String,
    pub image: String,
    pub port: u16,
    pub env: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Phase {
    fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Phase::Pending,
            "Running" => Phase::Running,
            "Succeeded" => Phase::Succeeded,
            "Failed" => Phase::Failed,
            _ => Phase::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub phase: Phase,
    /// Cluster address, once one has been assigned.
    pub address: Option<String>,
}

pub trait Scheduler {
    /// Starts a workload and returns its name.
    fn create_workload(&self, spec: &WorkloadSpec) -> KompileResult<String>;

    fn get_status(&self, artifact: &str, workload: &str) -> KompileResult<WorkloadStatus>;

    /// Makes `workload` reachable under the stable host name `host`.
    fn expose(&self, artifact: &str, workload: &str, host: &str, port: u16) -> KompileResult<()>;
}

/// Talks to Kubernetes through `kubectl`.
#[derive(Clone, Debug, Default)]
pub struct Kubectl {
    pub namespace: Option<String>,
}

impl Kubectl {
    pub fn new(namespace: Option<String>) -> Self {
        Self { namespace }
    }

    fn command(&self) -> Command {
        let mut command = Command::new("kubectl");
        if let Some(namespace) = &self.namespace {
            command.args(["--namespace", namespace]);
        }
        command
    }
}

fn scheduling(artifact: &str, message: impl Into<String>) -> KompileError {
    KompileError::Scheduling {
        artifact: artifact.to_string(),
        message: message.into(),
    }
}

impl Scheduler for Kubectl {
    fn create_workload(&self, spec: &WorkloadSpec) -> KompileResult<String> {
        let manifest = pod_manifest(spec).to_string();
        let mut child = self
            .command()
            .args(["create", "-f", "-", "-o", "jsonpath={.metadata.name}"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| scheduling(&spec.artifact, format!("failed to spawn kubectl: {err}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(manifest.as_bytes())
                .map_err(|err| scheduling(&spec.artifact, format!("failed to send manifest: {err}")))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|err| scheduling(&spec.artifact, format!("kubectl did not finish: {err}")))?;
        if !output.status.success() {
            return Err(scheduling(&spec.artifact, failure("kubectl", &output)));
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if name.is_empty() {
            return Err(scheduling(&spec.artifact, "kubectl did not report a pod name"));
        }
        Ok(name)
    }

    fn get_status(&self, artifact: &str, workload: &str) -> KompileResult<WorkloadStatus> {
        let output = run(self.command().args(["get", "pod", workload, "-o", "json"]))
            .map_err(|message| scheduling(artifact, message))?;
        parse_pod_status(&String::from_utf8_lossy(&output.stdout))
            .map_err(|message| scheduling(artifact, message))
    }

    fn expose(&self, artifact: &str, workload: &str, host: &str, port: u16) -> KompileResult<()> {
        let port = port.to_string();
        run(self.command().args([
            "expose",
            "pod",
            workload,
            "--name",
            host,
            "--port",
            &port,
            "--target-port",
            &port,
        ]))
        .map_err(|message| scheduling(artifact, message))?;
        Ok(())
    }
}

pub fn pod_manifest(spec: &WorkloadSpec) -> Value {
    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "generateName": format!("{}-", spec.name),
            "labels": { "app": spec.name },
        },
        "spec": {
            "containers": [{
                "name": spec.name,
                "image": spec.image,
                "ports": [{ "containerPort": spec.port }],
                "env": env,
            }],
        },
    })
}

#[derive(Deserialize)]
struct PodDocument {
    #[serde(default)]
    status: PodStatus,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    phase: Option<String>,
    #[serde(rename = "podIP")]
    pod_ip: Option<String>,
}

pub fn parse_pod_status(document: &str) -> Result<WorkloadStatus, String> {
    let pod: PodDocument =
        serde_json::from_str(document).map_err(|err| format!("unreadable pod status: {err}"))?;
    Ok(WorkloadStatus {
        phase: pod
            .status
            .phase
            .as_deref()
            .map(Phase::parse)
            .unwrap_or(Phase::Pending),
        address: pod.status.pod_ip.filter(|ip| !ip.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_pod_manifest() {
        let manifest = pod_manifest(&WorkloadSpec {
            artifact: "resizeImage".into(),
            name: "resizeimage".into(),
            image: "localhost:5000/resizeimage:latest".into(),
            port: 8080,
            env: vec![("KOMPILE_CONTROLLER_PORT".into(), "8080".into())],
        });
        assert_eq!(manifest["metadata"]["generateName"], "resizeimage-");
        assert_eq!(manifest["metadata"]["labels"]["app"], "resizeimage");
        let container = &manifest["spec"]["containers"][0];
        assert_eq!(container["image"], "localhost:5000/resizeimage:latest");
        assert_eq!(container["ports"][0]["containerPort"], 8080);
        assert_eq!(container["env"][0]["name"], "KOMPILE_CONTROLLER_PORT");
    }

    #[test]
    fn reads_phase_and_address() {
        let status = parse_pod_status(
            r#"{"metadata":{"name":"resize-x1"},"status":{"phase":"Running","podIP":"10.0.0.7"}}"#,
        )
        .unwrap();
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.address.as_deref(), Some("10.0.0.7"));

        let pending = parse_pod_status(r#"{"metadata":{}}"#).unwrap();
        assert_eq!(pending.phase, Phase::Pending);
        assert_eq!(pending.address, None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_pod_status("not json").is_err());
    }
}
