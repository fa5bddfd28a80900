use crate::language::{ast::*, span::Span};
use std::collections::HashMap;

/// Lexical scopes of local names inside one function.
///
/// Only locals are tracked; a name that is not bound here refers to a
/// package-level declaration or a predeclared identifier. Names bound by a
/// channel declaration remember the span of that declaration.
#[derive(Debug)]
pub struct Scopes {
    frames: Vec<Frame>,
}

#[derive(Debug, Default)]
struct Frame {
    names: HashMap<String, Option<Span>>,
    /// First frame of a function literal body.
    function: bool,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Opens the scope of a function literal. Outer names stay visible to
    /// `is_local` but not to `channel_decl`.
    pub fn push_function(&mut self) {
        self.frames.push(Frame {
            names: HashMap::new(),
            function: true,
        });
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn bind(&mut self, name: &str) {
        self.bind_with(name, None);
    }

    fn bind_with(&mut self, name: &str, channel: Option<Span>) {
        if name == "_" {
            return;
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.names.insert(name.to_string(), channel);
        }
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.frames.iter().rev().any(|frame| frame.names.contains_key(name))
    }

    /// Span of the channel declaration `name` resolves to, when it resolves
    /// to one made in the current function.
    pub fn channel_decl(&self, name: &str) -> Option<Span> {
        for frame in self.frames.iter().rev() {
            if let Some(channel) = frame.names.get(name) {
                return *channel;
            }
            if frame.function {
                break;
            }
        }
        None
    }

    pub fn bind_signature(&mut self, sig: &Signature) {
        for field in sig.params.iter().chain(&sig.results) {
            for name in &field.names {
                self.bind(&name.name);
            }
        }
    }

    pub fn bind_type_params(&mut self, params: &[Field]) {
        for field in params {
            for name in &field.names {
                self.bind(&name.name);
            }
        }
    }

    /// Binds the names `stmt` declares into the enclosing scope. Call after
    /// the statement itself has been visited.
    pub fn bind_declared(&mut self, stmt: &Stmt) {
        for name in declared_names(stmt) {
            let channel = is_channel_decl(stmt, name).then(|| stmt.span());
            self.bind_with(name, channel);
        }
    }

    /// Binds names that live in the scope a statement opens, such as range
    /// variables and the type switch guard.
    pub fn bind_implicit(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Range(range) if range.define => {
                for expr in range.key.iter().chain(&range.value) {
                    if let Some(ident) = expr.as_ident() {
                        self.bind(&ident.name);
                    }
                }
            }
            Stmt::TypeSwitch(switch) => {
                if let Some(binding) = &switch.binding {
                    self.bind(&binding.name);
                }
            }
            _ => {}
        }
    }
}

/// Statements whose children live in a scope of their own.
pub fn opens_scope(stmt: &Stmt) -> bool {
    matches!(
        stmt,
        Stmt::Block(_)
            | Stmt::If(_)
            | Stmt::Switch(_)
            | Stmt::TypeSwitch(_)
            | Stmt::Select(_)
            | Stmt::For(_)
            | Stmt::Range(_)
    )
}

/// Names declared by `stmt` in the scope that contains it.
pub fn declared_names(stmt: &Stmt) -> Vec<&str> {
    match stmt {
        Stmt::Decl(decl) => gen_decl_names(decl),
        Stmt::Assign {
            lhs,
            op: AssignOp::Define,
            ..
        } => lhs
            .iter()
            .filter_map(|expr| expr.as_ident().map(|ident| ident.name.as_str()))
            .collect(),
        Stmt::Labeled { stmt, .. } => declared_names(stmt),
        _ => Vec::new(),
    }
}

pub fn gen_decl_names(decl: &GenDecl) -> Vec<&str> {
    decl.specs
        .iter()
        .flat_map(|spec| match spec {
            Spec::Value(spec) => spec.names.iter().map(|n| n.name.as_str()).collect(),
            Spec::Type(spec) => vec![spec.name.name.as_str()],
        })
        .collect()
}

/// `make(chan T, ...)`
pub fn is_make_chan(expr: &Expr) -> bool {
    let Expr::Call { fun, args, .. } = expr else {
        return false;
    };
    if !matches!(fun.as_ident(), Some(ident) if ident.name == "make") {
        return false;
    }
    match args.first() {
        Some(Expr::Type(ty, _)) => ty.chan_elem().is_some(),
        Some(Expr::Paren(inner, _)) => matches!(inner.as_ref(), Expr::Type(ty, _) if ty.chan_elem().is_some()),
        _ => false,
    }
}

/// Whether `stmt` allocates or declares `name` as a channel, in any of the
/// forms `name := make(chan T)`, `name = make(chan T)`,
/// `var name = make(chan T)` and `var name chan T`.
pub fn is_channel_decl(stmt: &Stmt, name: &str) -> bool {
    match stmt {
        Stmt::Assign {
            lhs,
            op: AssignOp::Define | AssignOp::Assign,
            rhs,
            ..
        } => lhs.len() == rhs.len()
            && lhs.iter().zip(rhs).any(|(target, value)| {
                matches!(target.as_ident(), Some(ident) if ident.name == name) && is_make_chan(value)
            }),
        Stmt::Decl(decl) if decl.kind == GenKind::Var => decl.specs.iter().any(|spec| match spec {
            Spec::Value(spec) => value_spec_declares_channel(spec, name),
            Spec::Type(_) => false,
        }),
        _ => false,
    }
}

pub fn value_spec_declares_channel(spec: &ValueSpec, name: &str) -> bool {
    let Some(index) = spec.names.iter().position(|ident| ident.name == name) else {
        return false;
    };
    if spec.values.is_empty() {
        return spec.ty.as_ref().is_some_and(|ty| ty.chan_elem().is_some());
    }
    spec.values.len() == spec.names.len() && is_make_chan(&spec.values[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::parser::parse_file;

    fn body(source: &str) -> Vec<Stmt> {
        let file = parse_file(&format!("package main\nfunc f() {{\n{source}\n}}\n")).unwrap();
        let stmts = file.functions().next().unwrap().body.clone().unwrap().stmts;
        stmts
    }

    #[test]
    fn recognizes_channel_declarations() {
        let stmts = body(
            "a := make(chan int)\nvar b = make(chan string, 1)\nvar c chan bool\nd, e := 1, make(chan int)\nf := 3",
        );
        assert!(is_channel_decl(&stmts[0], "a"));
        assert!(is_channel_decl(&stmts[1], "b"));
        assert!(is_channel_decl(&stmts[2], "c"));
        assert!(is_channel_decl(&stmts[3], "e"));
        assert!(!is_channel_decl(&stmts[3], "d"));
        assert!(!is_channel_decl(&stmts[4], "f"));
    }

    #[test]
    fn scopes_shadow_and_unwind() {
        let mut scopes = Scopes::new();
        scopes.bind("x");
        scopes.push();
        scopes.bind("y");
        scopes.bind("_");
        assert!(scopes.is_local("x"));
        assert!(scopes.is_local("y"));
        assert!(!scopes.is_local("_"));
        scopes.pop();
        assert!(!scopes.is_local("y"));
        scopes.pop();
        assert!(scopes.is_local("x"));
    }

    #[test]
    fn remembers_channel_declarations_in_scope() {
        let stmts = body("ch := make(chan int)\n{\n\tch := 1\n}\nn := 2");
        let mut scopes = Scopes::new();
        scopes.bind_declared(&stmts[0]);
        assert_eq!(scopes.channel_decl("ch"), Some(stmts[0].span()));
        scopes.push();
        scopes.bind("ch");
        assert_eq!(scopes.channel_decl("ch"), None);
        scopes.pop();
        scopes.bind_declared(&stmts[2]);
        assert_eq!(scopes.channel_decl("n"), None);
        scopes.push_function();
        assert!(scopes.is_local("ch"));
        assert_eq!(scopes.channel_decl("ch"), None);
    }

    #[test]
    fn collects_declared_names() {
        let stmts = body("x, y := 1, 2\nvar (\n\ta int\n\tb = 2\n)\ntype T int\nz = 3");
        assert_eq!(declared_names(&stmts[0]), vec!["x", "y"]);
        assert_eq!(declared_names(&stmts[1]), vec!["a", "b"]);
        assert_eq!(declared_names(&stmts[2]), vec!["T"]);
        assert!(declared_names(&stmts[3]).is_empty());
    }
}
