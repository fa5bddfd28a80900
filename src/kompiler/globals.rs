//! Works out which package-level declarations a generated service has to
//! carry along with its function.

use super::scope::{opens_scope, Scopes};
use crate::language::{
    ast::*,
    span::Span,
    visit::{walk_block, walk_expr, walk_stmt, walk_type, Visitor},
};
use std::collections::{BTreeSet, HashMap};

/// A reference to a package-level variable, which a service cannot share.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalRef {
    pub name: String,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TopLevel {
    Func(usize),
    Var,
    /// A `const` or `type` declaration group.
    Group(usize),
}

struct Index {
    names: HashMap<String, TopLevel>,
    methods: HashMap<String, Vec<usize>>,
}

impl Index {
    fn build(file: &File) -> Self {
        let mut names = HashMap::new();
        let mut methods: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, decl) in file.decls.iter().enumerate() {
            match decl {
                Decl::Func(func) => match &func.recv {
                    Some(recv) => {
                        if let Some(base) = receiver_base(&recv.ty) {
                            methods.entry(base.to_string()).or_default().push(position);
                        }
                    }
                    None => {
                        names.insert(func.name.name.clone(), TopLevel::Func(position));
                    }
                },
                Decl::Gen(gen) => {
                    let entry = match gen.kind {
                        GenKind::Var => TopLevel::Var,
                        GenKind::Const | GenKind::Type => TopLevel::Group(position),
                    };
                    for spec in &gen.specs {
                        match spec {
                            Spec::Value(spec) => {
                                for name in spec.names.iter().filter(|n| !n.is_blank()) {
                                    names.insert(name.name.clone(), entry);
                                }
                            }
                            Spec::Type(spec) => {
                                names.insert(spec.name.name.clone(), entry);
                            }
                        }
                    }
                }
            }
        }
        Self { names, methods }
    }
}

fn receiver_base(ty: &Type) -> Option<&str> {
    match ty {
        Type::Name { pkg: None, name, .. } => Some(name),
        Type::Pointer(inner) | Type::Paren(inner) => receiver_base(inner),
        _ => None,
    }
}

/// Returns the package-level declarations `root` depends on, transitively
/// and in source order. `root` itself is never part of the result, even when
/// it is declared in `file` under the same name.
pub fn dependencies(file: &File, root: &FuncDecl) -> Result<Vec<Decl>, GlobalRef> {
    let index = Index::build(file);
    let mut included: BTreeSet<usize> = BTreeSet::new();
    let mut pending = vec![References::of_func(root)];

    while let Some(references) = pending.pop() {
        for (name, span, strength) in references.names {
            let Some(entry) = index.names.get(&name) else {
                continue;
            };
            let position = match entry {
                TopLevel::Var if strength == Strength::Hard => {
                    return Err(GlobalRef { name, span });
                }
                TopLevel::Var => continue,
                TopLevel::Func(_) if name == root.name.name => continue,
                TopLevel::Func(position) | TopLevel::Group(position) => *position,
            };
            let mut added = vec![position];
            if matches!(entry, TopLevel::Group(_)) {
                added.extend(index.methods.get(&name).into_iter().flatten().copied());
            }
            for position in added {
                if included.insert(position) {
                    pending.push(References::of_decl(&file.decls[position]));
                }
            }
        }
    }

    Ok(included
        .into_iter()
        .map(|position| file.decls[position].clone())
        .collect())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strength {
    Hard,
    /// An identifier used as a composite literal key, which may be a field
    /// name rather than a reference.
    Soft,
}

#[derive(Default)]
struct References {
    names: Vec<(String, Span, Strength)>,
    scopes: Scopes,
}

impl References {
    fn of_func(func: &FuncDecl) -> Self {
        let mut refs = References::default();
        refs.enter_func(func);
        refs
    }

    fn of_decl(decl: &Decl) -> Self {
        let mut refs = References::default();
        match decl {
            Decl::Func(func) => refs.enter_func(func),
            Decl::Gen(gen) => {
                for spec in &gen.specs {
                    if let Spec::Type(spec) = spec {
                        refs.scopes.push();
                        refs.scopes.bind_type_params(&spec.type_params);
                        for param in &spec.type_params {
                            refs.visit_type(&param.ty);
                        }
                        refs.visit_type(&spec.ty);
                        refs.scopes.pop();
                    }
                }
                for spec in &gen.specs {
                    if let Spec::Value(spec) = spec {
                        if let Some(ty) = &spec.ty {
                            refs.visit_type(ty);
                        }
                        for value in &spec.values {
                            refs.visit_expr(value);
                        }
                    }
                }
            }
        }
        refs
    }

    fn enter_func(&mut self, func: &FuncDecl) {
        self.scopes.bind_type_params(&func.type_params);
        if let Some(recv) = &func.recv {
            for name in &recv.names {
                self.scopes.bind(&name.name);
            }
            // `func (s *Stack[T]) ...` binds `T` as a type parameter.
            if let Some(args) = receiver_args(&recv.ty) {
                for arg in args {
                    if let Type::Name { pkg: None, name, .. } = arg {
                        self.scopes.bind(name);
                    }
                }
            }
            self.visit_type(&recv.ty);
        }
        for param in &func.type_params {
            self.visit_type(&param.ty);
        }
        self.scopes.bind_signature(&func.sig);
        for field in func.sig.params.iter().chain(&func.sig.results) {
            self.visit_type(&field.ty);
        }
        if let Some(body) = &func.body {
            walk_block(self, body);
        }
    }

    fn note(&mut self, name: &str, span: Span, strength: Strength) {
        if !self.scopes.is_local(name) {
            self.names.push((name.to_string(), span, strength));
        }
    }
}

fn receiver_args(ty: &Type) -> Option<&[Type]> {
    match ty {
        Type::Name { args, .. } => Some(args),
        Type::Pointer(inner) | Type::Paren(inner) => receiver_args(inner),
        _ => None,
    }
}

fn keys_are_values(ty: Option<&Expr>) -> bool {
    matches!(
        ty,
        Some(Expr::Type(ty, _)) if matches!(**ty, Type::Map { .. } | Type::Slice(_) | Type::Array { .. })
    )
}

impl<'ast> Visitor<'ast> for References {
    fn visit_stmt(&mut self, stmt: &'ast Stmt) {
        let scoped = opens_scope(stmt);
        if scoped {
            self.scopes.push();
            self.scopes.bind_implicit(stmt);
        }
        match stmt {
            // Names on the left of `:=` are always new locals.
            Stmt::Assign {
                lhs,
                op: AssignOp::Define,
                rhs,
                ..
            } => {
                for expr in rhs {
                    self.visit_expr(expr);
                }
                for expr in lhs.iter().filter(|expr| expr.as_ident().is_none()) {
                    self.visit_expr(expr);
                }
            }
            Stmt::Range(range) if range.define => {
                self.visit_expr(&range.expr);
                walk_block(self, &range.body);
            }
            _ => walk_stmt(self, stmt),
        }
        if scoped {
            self.scopes.pop();
        }
        self.scopes.bind_declared(stmt);
    }

    fn visit_expr(&mut self, expr: &'ast Expr) {
        match expr {
            Expr::Ident(ident) => self.note(&ident.name, ident.span, Strength::Hard),
            Expr::Composite(lit) => {
                if let Some(ty) = &lit.ty {
                    self.visit_expr(ty);
                }
                let keyed_values = keys_are_values(lit.ty.as_deref());
                for elt in &lit.elts {
                    match elt {
                        Expr::KeyValue { key, value, .. } => {
                            match key.as_ref() {
                                Expr::Ident(ident) if !keyed_values => {
                                    self.note(&ident.name, ident.span, Strength::Soft)
                                }
                                key => self.visit_expr(key),
                            }
                            self.visit_expr(value);
                        }
                        elt => self.visit_expr(elt),
                    }
                }
            }
            _ => walk_expr(self, expr),
        }
    }

    fn visit_type(&mut self, ty: &'ast Type) {
        if let Type::Name {
            pkg: None, name, ..
        } = ty
        {
            self.note(name, Span::synthetic(), Strength::Hard);
        }
        walk_type(self, ty);
    }

    fn visit_func_lit(&mut self, lit: &'ast FuncLit) {
        self.scopes.push();
        for field in lit.sig.params.iter().chain(&lit.sig.results) {
            self.visit_type(&field.ty);
        }
        self.scopes.bind_signature(&lit.sig);
        walk_block(self, &lit.body);
        self.scopes.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::parser::parse_file;

    fn deps(source: &str, root: &str) -> Result<Vec<String>, GlobalRef> {
        let file = parse_file(source).unwrap();
        let root = file.functions().find(|f| f.name.name == root).unwrap().clone();
        Ok(dependencies(&file, &root)?
            .iter()
            .map(|decl| match decl {
                Decl::Func(func) => func.name.name.clone(),
                Decl::Gen(gen) => match &gen.specs[0] {
                    Spec::Value(spec) => spec.names[0].name.clone(),
                    Spec::Type(spec) => spec.name.name.clone(),
                },
            })
            .collect())
    }

    #[test]
    fn copies_types_constants_and_helpers_transitively() {
        let names = deps(
            r#"package main

const scale = 2

type Job struct {
	ID   string
	Size Size
}

type Size int

func (s Size) Half() Size { return s / scale }

func describe(j Job) string { return j.ID }

func unused() {}

func work(j Job, out chan string) {
	out <- describe(Job{ID: j.ID, Size: j.Size.Half()})
}
"#,
            "work",
        )
        .unwrap();
        assert_eq!(names, vec!["scale", "Job", "Size", "Half", "describe"]);
    }

    #[test]
    fn rejects_package_variables() {
        let err = deps(
            "package main\nvar counter int\nfunc bump() { counter++ }\nfunc work(out chan int) {\n\tbump()\n\tout <- 1\n}\n",
            "work",
        )
        .unwrap_err();
        assert_eq!(err.name, "counter");
        assert!(!err.span.is_synthetic());
    }

    #[test]
    fn locals_shadow_package_names() {
        let names = deps(
            "package main\nvar total int\nfunc work(out chan int) {\n\ttotal := 0\n\tfor i := range 3 {\n\t\ttotal += i\n\t}\n\tout <- total\n}\n",
            "work",
        )
        .unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn struct_keys_are_field_names() {
        let names = deps(
            "package main\nvar Name = \"x\"\ntype T struct{ Name string }\nfunc work(out chan T) {\n\tout <- T{Name: \"y\"}\n}\n",
            "work",
        )
        .unwrap();
        assert_eq!(names, vec!["T"]);
    }

    #[test]
    fn map_keys_are_references() {
        let err = deps(
            "package main\nvar key = \"k\"\nfunc work(out chan map[string]int) {\n\tout <- map[string]int{key: 1}\n}\n",
            "work",
        )
        .unwrap_err();
        assert_eq!(err.name, "key");
    }
}
