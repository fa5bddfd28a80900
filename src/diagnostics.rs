use crate::{error::KompileError, language::errors::SyntaxError, language::span::Span};
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use std::{error::Error as _, path::Path};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
pub struct SyntaxDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{label}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
    label: String,
}

impl SyntaxDiagnostic {
    pub fn from_error(src: NamedSource<String>, err: SyntaxError) -> Self {
        Self {
            src,
            span: err.to_source_span(),
            help: err.help.clone(),
            message: err.message.clone(),
            label: err.label,
        }
    }
}

/// A transformation error that points into the input program.
#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(kompile::transform))]
pub struct KompileDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{label}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
    label: String,
}

impl KompileDiagnostic {
    /// `None` when `error` carries no usable source location.
    pub fn from_error(src: NamedSource<String>, error: &KompileError) -> Option<Self> {
        let span = error.span().filter(|span: &Span| !span.is_synthetic())?;
        Some(Self {
            src,
            span: span.to_source_span(),
            help: error.help(),
            message: error.to_string(),
            label: error.label().to_string(),
        })
    }
}

pub fn emit_syntax_errors(path: &Path, source: &str, errors: &[SyntaxError]) {
    let src = NamedSource::new(path.display().to_string(), source.to_string());
    for err in errors {
        let diagnostic = SyntaxDiagnostic::from_error(src.clone(), err.clone());
        eprintln!("{:?}", Report::new(diagnostic));
    }
}

/// Prints `error`, with the offending source when `source` is the program
/// it was raised for.
pub fn report_error(error: &KompileError, source: Option<(&Path, &str)>) {
    if let KompileError::Parse { path, text, errors } = error {
        emit_syntax_errors(path, text, errors);
        return;
    }
    if let Some((path, text)) = source {
        let src = NamedSource::new(path.display().to_string(), text.to_string());
        if let Some(diagnostic) = KompileDiagnostic::from_error(src, error) {
            eprintln!("{:?}", Report::new(diagnostic));
            return;
        }
    }
    eprintln!("error: {error}");
    let mut cause = error.source();
    while let Some(err) = cause {
        eprintln!("  caused by: {err}");
        cause = err.source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_errors_point_at_their_span() {
        let error = KompileError::TooManySends {
            function: "resize".into(),
            channel: "result".into(),
            span: Span::new(10, 16),
        };
        let diagnostic =
            KompileDiagnostic::from_error(NamedSource::new("main.go", "x".repeat(40)), &error)
                .unwrap();
        assert_eq!(diagnostic.span, SourceSpan::from((10, 6)));
        assert_eq!(diagnostic.label, "second send on this path");
        assert!(diagnostic.help.is_some());
    }

    #[test]
    fn errors_without_location_have_no_diagnostic() {
        let error = KompileError::Build {
            artifact: "resize".into(),
            message: "go build failed".into(),
        };
        assert!(KompileDiagnostic::from_error(NamedSource::new("main.go", String::new()), &error)
            .is_none());
        let synthetic = KompileError::GlobalStateReference {
            function: "f".into(),
            name: "T".into(),
            span: Span::synthetic(),
        };
        assert!(
            KompileDiagnostic::from_error(NamedSource::new("main.go", String::new()), &synthetic)
                .is_none()
        );
    }
}
