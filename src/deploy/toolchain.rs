//! Turning an artifact directory into a pushed container image.

use crate::error::{KompileError, KompileResult};
use std::{
    path::{Path, PathBuf},
    process::{Command, Output},
};
use tracing::debug;

pub const EXECUTABLE: &str = "main";

pub trait Toolchain {
    /// Builds the Go program in `dir` into a static executable.
    fn compile(&self, artifact: &str, dir: &Path) -> KompileResult<PathBuf>;

    /// Packages `executable` into an image tagged `image`, using the
    /// Dockerfile next to it.
    fn containerize(&self, artifact: &str, executable: &Path, image: &str) -> KompileResult<()>;

    fn push(&self, artifact: &str, image: &str) -> KompileResult<()>;
}

/// Shells out to `go` and `docker`.
#[derive(Clone, Debug, Default)]
pub struct CommandToolchain;

impl Toolchain for CommandToolchain {
    fn compile(&self, artifact: &str, dir: &Path) -> KompileResult<PathBuf> {
        let build = |message: String| KompileError::Build {
            artifact: artifact.to_string(),
            message,
        };
        run(Command::new("go").args(["mod", "tidy"]).current_dir(dir)).map_err(build)?;
        run(Command::new("go")
            .args(["build", "-ldflags", "-s -w", "-trimpath", "-o", EXECUTABLE, "."])
            .env("CGO_ENABLED", "0")
            .current_dir(dir))
        .map_err(build)?;
        Ok(dir.join(EXECUTABLE))
    }

    fn containerize(&self, artifact: &str, executable: &Path, image: &str) -> KompileResult<()> {
        let context = executable.parent().unwrap_or_else(|| Path::new("."));
        run(Command::new("docker")
            .args(["build", "-t", image, "."])
            .current_dir(context))
        .map_err(|message| KompileError::Container {
            artifact: artifact.to_string(),
            message,
        })?;
        Ok(())
    }

    fn push(&self, artifact: &str, image: &str) -> KompileResult<()> {
        run(Command::new("docker").args(["push", image])).map_err(|message| KompileError::Push {
            artifact: artifact.to_string(),
            message,
        })?;
        Ok(())
    }
}

/// Runs `command` to completion; a spawn failure or non-zero exit becomes
/// the message of the caller's error.
pub(crate) fn run(command: &mut Command) -> Result<Output, String> {
    let program = command.get_program().to_string_lossy().into_owned();
    debug!(command = ?command, "running");
    let output = command
        .output()
        .map_err(|err| format!("failed to spawn {program}: {err}"))?;
    if !output.status.success() {
        return Err(failure(&program, &output));
    }
    Ok(output)
}

pub(crate) fn failure(program: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{program} exited with {}", output.status)
    } else {
        format!("{program} exited with {}: {stderr}", output.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_programs_are_reported() {
        let err = run(&mut Command::new("kompile-no-such-program")).unwrap_err();
        assert!(err.starts_with("failed to spawn kompile-no-such-program"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_commands_carry_stderr() {
        let err = run(Command::new("sh").args(["-c", "echo broken >&2; exit 3"])).unwrap_err();
        assert!(err.starts_with("sh exited with"));
        assert!(err.ends_with(": broken"));
    }
}
