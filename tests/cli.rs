use std::{
    env, fs,
    path::PathBuf,
    process::{Command, Output},
};

fn bin_path() -> String {
    env::var("CARGO_BIN_EXE_kompile").expect("binary path not set by cargo test")
}

fn root() -> PathBuf {
    PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("manifest dir not set by cargo"))
}

fn kompile(args: &[&str]) -> Output {
    Command::new(bin_path())
        .current_dir(root())
        .env("KOMPILE_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run kompile")
}

#[test]
fn writes_artifacts_without_deploying() {
    let out = tempfile::tempdir().expect("tempdir");
    let output = kompile(&[
        "-f",
        "demos/checksum/main.go",
        "-o",
        out.path().to_str().expect("utf-8 temp path"),
        "--config",
        "demos/checksum/kompile.toml",
        "--registry",
        "registry.example:5000",
        "--no-deploy",
    ]);
    assert!(
        output.status.success(),
        "kompile failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    for file in ["main.go", "kompile_runtime.go", "go.mod", "Dockerfile", "deployment.yml"] {
        assert!(out.path().join("checksum").join(file).is_file(), "checksum/{file}");
        assert!(out.path().join("controller").join(file).is_file(), "controller/{file}");
    }
    let deployment = fs::read_to_string(out.path().join("controller/deployment.yml"))
        .expect("controller deployment");
    assert!(deployment.contains("image: registry.example:5000/controller:latest"));
    let controller = fs::read_to_string(out.path().join("controller/main.go"))
        .expect("controller source");
    assert!(controller.contains("kompileDispatch(\"checksum\""));
}

#[test]
fn syntax_errors_fail_with_a_diagnostic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("broken.go");
    fs::write(&source, "package main\n\nfunc main() {\n\tx := \n}\n").expect("write source");
    let output = kompile(&[
        "-f",
        source.to_str().expect("utf-8 temp path"),
        "-o",
        dir.path().join("out").to_str().expect("utf-8 temp path"),
        "--no-deploy",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("broken.go"), "stderr: {stderr}");
    assert!(!dir.path().join("out").exists());
}

#[test]
fn filename_is_required() {
    let output = kompile(&["--no-deploy"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--filename"));
}
