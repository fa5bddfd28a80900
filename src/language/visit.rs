//! Read-only traversal of the syntax tree.
//!
//! Implementors override the hooks they care about and call the matching
//! `walk_*` function to keep descending.

use crate::language::ast::*;

pub trait Visitor<'ast> {
    fn visit_stmt(&mut self, stmt: &'ast Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'ast Expr) {
        walk_expr(self, expr);
    }

    fn visit_type(&mut self, ty: &'ast Type) {
        walk_type(self, ty);
    }

    fn visit_func_lit(&mut self, lit: &'ast FuncLit) {
        walk_signature(self, &lit.sig);
        walk_block(self, &lit.body);
    }
}

pub fn walk_decl<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, decl: &'ast Decl) {
    match decl {
        Decl::Func(func) => {
            if let Some(recv) = &func.recv {
                visitor.visit_type(&recv.ty);
            }
            for param in &func.type_params {
                visitor.visit_type(&param.ty);
            }
            walk_signature(visitor, &func.sig);
            if let Some(body) = &func.body {
                walk_block(visitor, body);
            }
        }
        Decl::Gen(decl) => walk_gen_decl(visitor, decl),
    }
}

pub fn walk_gen_decl<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, decl: &'ast GenDecl) {
    for spec in &decl.specs {
        match spec {
            Spec::Value(spec) => {
                if let Some(ty) = &spec.ty {
                    visitor.visit_type(ty);
                }
                for value in &spec.values {
                    visitor.visit_expr(value);
                }
            }
            Spec::Type(spec) => {
                for param in &spec.type_params {
                    visitor.visit_type(&param.ty);
                }
                visitor.visit_type(&spec.ty);
            }
        }
    }
}

pub fn walk_signature<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, sig: &'ast Signature) {
    for field in sig.params.iter().chain(&sig.results) {
        visitor.visit_type(&field.ty);
    }
}

pub fn walk_block<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, block: &'ast Block) {
    for stmt in &block.stmts {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_stmt<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, stmt: &'ast Stmt) {
    match stmt {
        Stmt::Decl(decl) => walk_gen_decl(visitor, decl),
        Stmt::Labeled { stmt, .. } => visitor.visit_stmt(stmt),
        Stmt::Expr(expr) => visitor.visit_expr(expr),
        Stmt::Send { chan, value, .. } => {
            visitor.visit_expr(chan);
            visitor.visit_expr(value);
        }
        Stmt::IncDec { x, .. } => visitor.visit_expr(x),
        Stmt::Assign { lhs, rhs, .. } => {
            for expr in lhs.iter().chain(rhs) {
                visitor.visit_expr(expr);
            }
        }
        Stmt::Go { call, .. } | Stmt::Defer { call, .. } => visitor.visit_expr(call),
        Stmt::Return { results, .. } => {
            for expr in results {
                visitor.visit_expr(expr);
            }
        }
        Stmt::Branch { .. } | Stmt::Empty(_) => {}
        Stmt::Block(block) => walk_block(visitor, block),
        Stmt::If(stmt) => {
            if let Some(init) = &stmt.init {
                visitor.visit_stmt(init);
            }
            visitor.visit_expr(&stmt.cond);
            walk_block(visitor, &stmt.then);
            if let Some(els) = &stmt.els {
                visitor.visit_stmt(els);
            }
        }
        Stmt::Switch(stmt) => {
            if let Some(init) = &stmt.init {
                visitor.visit_stmt(init);
            }
            if let Some(tag) = &stmt.tag {
                visitor.visit_expr(tag);
            }
            walk_case_clauses(visitor, &stmt.clauses);
        }
        Stmt::TypeSwitch(stmt) => {
            if let Some(init) = &stmt.init {
                visitor.visit_stmt(init);
            }
            visitor.visit_expr(&stmt.subject);
            walk_case_clauses(visitor, &stmt.clauses);
        }
        Stmt::Select(stmt) => {
            for clause in &stmt.clauses {
                if let Some(comm) = &clause.comm {
                    visitor.visit_stmt(comm);
                }
                for stmt in &clause.body {
                    visitor.visit_stmt(stmt);
                }
            }
        }
        Stmt::For(stmt) => {
            if let Some(init) = &stmt.init {
                visitor.visit_stmt(init);
            }
            if let Some(cond) = &stmt.cond {
                visitor.visit_expr(cond);
            }
            if let Some(post) = &stmt.post {
                visitor.visit_stmt(post);
            }
            walk_block(visitor, &stmt.body);
        }
        Stmt::Range(stmt) => {
            if let Some(key) = &stmt.key {
                visitor.visit_expr(key);
            }
            if let Some(value) = &stmt.value {
                visitor.visit_expr(value);
            }
            visitor.visit_expr(&stmt.expr);
            walk_block(visitor, &stmt.body);
        }
    }
}

fn walk_case_clauses<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, clauses: &'ast [CaseClause]) {
    for clause in clauses {
        for expr in clause.list.iter().flatten() {
            visitor.visit_expr(expr);
        }
        for stmt in &clause.body {
            visitor.visit_stmt(stmt);
        }
    }
}

pub fn walk_expr<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, expr: &'ast Expr) {
    match expr {
        Expr::Ident(_) | Expr::Lit(_) => {}
        Expr::Composite(lit) => {
            if let Some(ty) = &lit.ty {
                visitor.visit_expr(ty);
            }
            for elt in &lit.elts {
                visitor.visit_expr(elt);
            }
        }
        Expr::FuncLit(lit) => visitor.visit_func_lit(lit),
        Expr::Paren(inner, _) => visitor.visit_expr(inner),
        Expr::Selector { x, .. } => visitor.visit_expr(x),
        Expr::Index { x, indices, .. } => {
            visitor.visit_expr(x);
            for index in indices {
                visitor.visit_expr(index);
            }
        }
        Expr::Slice {
            x, low, high, max, ..
        } => {
            visitor.visit_expr(x);
            for part in [low, high, max].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        Expr::TypeAssert { x, ty, .. } => {
            visitor.visit_expr(x);
            if let Some(ty) = ty {
                visitor.visit_type(ty);
            }
        }
        Expr::Call { fun, args, .. } => {
            visitor.visit_expr(fun);
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        Expr::Star { x, .. } | Expr::Unary { x, .. } => visitor.visit_expr(x),
        Expr::Binary { x, y, .. } => {
            visitor.visit_expr(x);
            visitor.visit_expr(y);
        }
        Expr::KeyValue { key, value, .. } => {
            visitor.visit_expr(key);
            visitor.visit_expr(value);
        }
        Expr::Type(ty, _) => visitor.visit_type(ty),
    }
}

pub fn walk_type<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, ty: &'ast Type) {
    match ty {
        Type::Name { args, .. } => {
            for arg in args {
                visitor.visit_type(arg);
            }
        }
        Type::Pointer(inner)
        | Type::Slice(inner)
        | Type::Ellipsis(inner)
        | Type::Paren(inner) => visitor.visit_type(inner),
        Type::Array { len, elem } => {
            if let Some(len) = len {
                visitor.visit_expr(len);
            }
            visitor.visit_type(elem);
        }
        Type::Map { key, value } => {
            visitor.visit_type(key);
            visitor.visit_type(value);
        }
        Type::Chan { elem, .. } => visitor.visit_type(elem),
        Type::Func(sig) => walk_signature(visitor, sig),
        Type::Struct(fields) => {
            for field in fields {
                visitor.visit_type(&field.ty);
            }
        }
        Type::Interface(elems) => {
            for elem in elems {
                match elem {
                    InterfaceElem::Method { sig, .. } => walk_signature(visitor, sig),
                    InterfaceElem::Embedded(ty) => visitor.visit_type(ty),
                }
            }
        }
        Type::Union(terms) => {
            for term in terms {
                visitor.visit_type(&term.ty);
            }
        }
    }
}

/// Collects every package qualifier used in `pkg.Name` position, in
/// expressions and in qualified type names alike.
#[derive(Default)]
pub struct QualifierCollector {
    pub qualifiers: std::collections::BTreeSet<String>,
}

impl<'ast> Visitor<'ast> for QualifierCollector {
    fn visit_expr(&mut self, expr: &'ast Expr) {
        if let Expr::Selector { x, .. } = expr {
            if let Expr::Ident(base) = x.as_ref() {
                self.qualifiers.insert(base.name.clone());
            }
        }
        walk_expr(self, expr);
    }

    fn visit_type(&mut self, ty: &'ast Type) {
        if let Type::Name { pkg: Some(pkg), .. } = ty {
            self.qualifiers.insert(pkg.clone());
        }
        walk_type(self, ty);
    }
}

pub fn qualifiers_in_file(file: &File) -> std::collections::BTreeSet<String> {
    let mut collector = QualifierCollector::default();
    for decl in &file.decls {
        walk_decl(&mut collector, decl);
    }
    collector.qualifiers
}
