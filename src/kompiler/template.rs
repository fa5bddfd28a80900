//! Generated Go is written as source text and parsed back into syntax trees
//! so it can be spliced into rewritten programs and printed uniformly.

use crate::{
    error::{KompileError, KompileResult},
    language::{
        ast::{Decl, Expr, Stmt, Type},
        parser::parse_file,
        printer::{print_expr, print_type, PrintError},
    },
};

fn generated(artifact: &str, reason: String) -> KompileError {
    KompileError::Print {
        artifact: artifact.to_string(),
        error: PrintError::Invalid {
            what: "generated code",
            reason,
        },
    }
}

/// Parses top-level declarations.
pub fn parse_decls(artifact: &str, source: &str) -> KompileResult<Vec<Decl>> {
    let file = parse_file(&format!("package main\n\n{source}\n")).map_err(|errors| {
        let reason = errors
            .errors
            .first()
            .map(|error| error.message.clone())
            .unwrap_or_default();
        generated(artifact, format!("{reason} in:\n{source}"))
    })?;
    Ok(file.decls)
}

/// Parses a statement list as it would appear inside a function body.
pub fn parse_stmts(artifact: &str, source: &str) -> KompileResult<Vec<Stmt>> {
    let decls = parse_decls(artifact, &format!("func _() {{\n{source}\n}}"))?;
    match decls.into_iter().next() {
        Some(Decl::Func(func)) => Ok(func.body.map(|body| body.stmts).unwrap_or_default()),
        _ => Err(generated(artifact, format!("expected statements in:\n{source}"))),
    }
}

pub fn render_expr(artifact: &str, expr: &Expr) -> KompileResult<String> {
    print_expr(expr).map_err(|error| KompileError::Print {
        artifact: artifact.to_string(),
        error,
    })
}

pub fn render_type(artifact: &str, ty: &Type) -> KompileResult<String> {
    print_type(ty).map_err(|error| KompileError::Print {
        artifact: artifact.to_string(),
        error,
    })
}

/// Interpreted Go string literal for `text`.
pub fn go_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `base` when no name in `taken` uses it, otherwise the first free
/// `base2`, `base3`, ...
pub fn fresh_name(base: &str, taken: &dyn Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
