use crate::language::{errors::SyntaxError, printer::PrintError, span::Span};
use std::path::PathBuf;
use thiserror::Error;

pub type KompileResult<T> = Result<T, KompileError>;

#[derive(Debug, Error)]
pub enum KompileError {
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        text: String,
        errors: Vec<SyntaxError>,
    },
    #[error("function `{function}` sends on channel `{channel}` more than once on a single path")]
    TooManySends {
        function: String,
        channel: String,
        span: Span,
    },
    #[error("channel `{channel}` of function `{function}` cannot become a callback: {reason}")]
    UnsupportedChannelUse {
        function: String,
        channel: String,
        reason: String,
        span: Span,
    },
    #[error("function `{function}` refers to package-level variable `{name}`")]
    GlobalStateReference {
        function: String,
        name: String,
        span: Span,
    },
    #[error("could not print generated source for `{artifact}`")]
    Print {
        artifact: String,
        #[source]
        error: PrintError,
    },
    #[error("build of `{artifact}` failed: {message}")]
    Build { artifact: String, message: String },
    #[error("container image for `{artifact}` failed: {message}")]
    Container { artifact: String, message: String },
    #[error("pushing image for `{artifact}` failed: {message}")]
    Push { artifact: String, message: String },
    #[error("scheduling `{artifact}` failed: {message}")]
    Scheduling { artifact: String, message: String },
    #[error("invalid configuration in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

impl KompileError {
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        KompileError::Io {
            path: path.into(),
            error,
        }
    }

    /// Source location the error points at, for errors raised while
    /// transforming the input program.
    pub fn span(&self) -> Option<Span> {
        match self {
            KompileError::TooManySends { span, .. }
            | KompileError::UnsupportedChannelUse { span, .. }
            | KompileError::GlobalStateReference { span, .. } => Some(*span),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            KompileError::TooManySends { .. } => "second send on this path",
            KompileError::UnsupportedChannelUse { .. } => "channel used here",
            KompileError::GlobalStateReference { .. } => "package-level variable referenced here",
            _ => "here",
        }
    }

    pub fn help(&self) -> Option<String> {
        match self {
            KompileError::TooManySends { .. } => Some(
                "only one value can be delivered per dispatch; send once and carry the rest in that value"
                    .into(),
            ),
            KompileError::UnsupportedChannelUse { .. } => Some(
                "callback channels may only be sent on or closed inside the launched function".into(),
            ),
            KompileError::GlobalStateReference { name, .. } => Some(format!(
                "pass `{name}` to the function as a parameter instead"
            )),
            _ => None,
        }
    }
}
