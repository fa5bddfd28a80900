use super::*;
use crate::{kompiler::compile, program::load};
use scheduler::WorkloadStatus;
use std::{
    cell::RefCell,
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Default)]
struct FakeToolchain {
    log: RefCell<Vec<String>>,
    fail_push: Option<&'static str>,
}

impl Toolchain for FakeToolchain {
    fn compile(&self, artifact: &str, dir: &Path) -> KompileResult<PathBuf> {
        self.log.borrow_mut().push(format!("compile {artifact}"));
        Ok(dir.join("main"))
    }

    fn containerize(&self, artifact: &str, _executable: &Path, image: &str) -> KompileResult<()> {
        self.log
            .borrow_mut()
            .push(format!("containerize {artifact} {image}"));
        Ok(())
    }

    fn push(&self, artifact: &str, image: &str) -> KompileResult<()> {
        if self.fail_push == Some(artifact) {
            return Err(KompileError::Push {
                artifact: artifact.into(),
                message: "denied".into(),
            });
        }
        self.log.borrow_mut().push(format!("push {image}"));
        Ok(())
    }
}

/// Every workload reports `Pending` for `pending_polls` polls, then the
/// phase given for its app (Running by default).
#[derive(Default)]
struct FakeScheduler {
    pending_polls: u32,
    phases: HashMap<String, Phase>,
    created: RefCell<Vec<WorkloadSpec>>,
    polls: RefCell<HashMap<String, u32>>,
    exposed: RefCell<Vec<(String, String, u16)>>,
}

impl Scheduler for FakeScheduler {
    fn create_workload(&self, spec: &WorkloadSpec) -> KompileResult<String> {
        self.created.borrow_mut().push(spec.clone());
        Ok(format!("{}-abc12", spec.name))
    }

    fn get_status(&self, _artifact: &str, workload: &str) -> KompileResult<WorkloadStatus> {
        let mut polls = self.polls.borrow_mut();
        let count = polls.entry(workload.to_string()).or_default();
        *count += 1;
        if *count <= self.pending_polls {
            return Ok(WorkloadStatus {
                phase: Phase::Pending,
                address: None,
            });
        }
        let app = workload.trim_end_matches("-abc12");
        let phase = self.phases.get(app).copied().unwrap_or(Phase::Running);
        let created = self.created.borrow();
        let index = created.iter().position(|spec| spec.name == app).unwrap_or(0);
        Ok(WorkloadStatus {
            phase,
            address: Some(format!("10.0.0.{}", index + 1)),
        })
    }

    fn expose(&self, _artifact: &str, workload: &str, host: &str, port: u16) -> KompileResult<()> {
        self.exposed
            .borrow_mut()
            .push((workload.to_string(), host.to_string(), port));
        Ok(())
    }
}

const TWO_SERVICES: &str = "package main\n\nfunc funcA(out chan int) { out <- 1 }\n\nfunc funcB(result chan string) { result <- \"b\" }\n\nfunc main() {\n\ta := make(chan int)\n\tb := make(chan string)\n\tgo funcA(a)\n\tgo funcB(b)\n\tprintln(<-a, <-b)\n}\n";

fn fixture() -> (ControllerArtifact, Vec<ArtifactDir>) {
    let program = load(Path::new("main.go"), TWO_SERVICES).unwrap();
    let compilation = compile(&program, &Config::default()).unwrap();
    let artifacts = ["funcA", "funcB", "controller"]
        .into_iter()
        .map(|name| ArtifactDir {
            name: name.into(),
            dir: PathBuf::from("out").join(name),
        })
        .collect();
    (compilation.controller, artifacts)
}

fn immediate() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        interval: Duration::ZERO,
    }
}

#[test]
fn deploys_services_before_the_controller() {
    let (controller, artifacts) = fixture();
    let config = Config::default();
    let toolchain = FakeToolchain::default();
    let scheduler = FakeScheduler {
        pending_polls: 2,
        ..FakeScheduler::default()
    };
    let addresses = Orchestrator::new(&toolchain, &scheduler, &config)
        .with_policy(immediate())
        .build_and_deploy(&artifacts, &controller)
        .unwrap();

    assert_eq!(addresses["funcA"], "http://10.0.0.1:8080");
    assert_eq!(addresses["funcB"], "http://10.0.0.2:8080");
    assert_eq!(addresses["controller"], "http://10.0.0.3:8080");

    let log = toolchain.log.borrow();
    assert_eq!(log[0], "compile funcA");
    assert_eq!(log[1], "containerize funcA localhost:5000/funca:latest");
    assert_eq!(log.last().unwrap(), "push localhost:5000/controller:latest");

    let created = scheduler.created.borrow();
    let names: Vec<_> = created.iter().map(|spec| spec.name.as_str()).collect();
    assert_eq!(names, vec!["funca", "funcb", "controller"]);
    assert!(created[0].env.is_empty());
    assert_eq!(
        created[2].env,
        vec![
            ("KOMPILE_CONTROLLER_PORT".to_string(), "8080".to_string()),
            ("KOMPILE_SERVICE_FUNCA".to_string(), "http://10.0.0.1:8080".to_string()),
            ("KOMPILE_SERVICE_FUNCB".to_string(), "http://10.0.0.2:8080".to_string()),
        ]
    );
    assert_eq!(
        scheduler.exposed.borrow().as_slice(),
        &[(
            "controller-abc12".to_string(),
            "kompile-controller".to_string(),
            8080
        )]
    );
}

#[test]
fn polling_is_bounded() {
    let (controller, artifacts) = fixture();
    let config = Config::default();
    let toolchain = FakeToolchain::default();
    let scheduler = FakeScheduler {
        pending_polls: 10,
        ..FakeScheduler::default()
    };
    let err = Orchestrator::new(&toolchain, &scheduler, &config)
        .with_policy(immediate())
        .build_and_deploy(&artifacts, &controller)
        .unwrap_err();
    match err {
        KompileError::Scheduling { artifact, message } => {
            assert_eq!(artifact, "funcA");
            assert!(message.contains("not running after 3 attempts"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn failed_workloads_stop_deployment() {
    let (controller, artifacts) = fixture();
    let config = Config::default();
    let toolchain = FakeToolchain::default();
    let scheduler = FakeScheduler {
        phases: HashMap::from([("funcb".to_string(), Phase::Failed)]),
        ..FakeScheduler::default()
    };
    let err = Orchestrator::new(&toolchain, &scheduler, &config)
        .with_policy(immediate())
        .build_and_deploy(&artifacts, &controller)
        .unwrap_err();
    assert!(matches!(err, KompileError::Scheduling { artifact, .. } if artifact == "funcB"));
    assert_eq!(scheduler.created.borrow().len(), 2);
}

#[test]
fn toolchain_errors_name_the_artifact() {
    let (controller, artifacts) = fixture();
    let config = Config::default();
    let toolchain = FakeToolchain {
        fail_push: Some("funcA"),
        ..FakeToolchain::default()
    };
    let scheduler = FakeScheduler::default();
    let err = Orchestrator::new(&toolchain, &scheduler, &config)
        .build_and_deploy(&artifacts, &controller)
        .unwrap_err();
    assert_eq!(err.to_string(), "pushing image for `funcA` failed: denied");
    assert!(scheduler.created.borrow().is_empty());
}

#[test]
fn controller_needs_every_service_address() {
    let (controller, artifacts) = fixture();
    let config = Config::default();
    let toolchain = FakeToolchain::default();
    let scheduler = FakeScheduler::default();
    let only_controller: Vec<_> = artifacts
        .into_iter()
        .filter(|artifact| artifact.name == "controller")
        .collect();
    let err = Orchestrator::new(&toolchain, &scheduler, &config)
        .with_policy(immediate())
        .build_and_deploy(&only_controller, &controller)
        .unwrap_err();
    assert!(err.to_string().contains("no address for service `funcA`"));
}
