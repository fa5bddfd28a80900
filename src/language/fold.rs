//! Tree-to-tree rewriting by value.
//!
//! A `Fold` consumes a tree and produces a new one. Statements fold into a
//! list so a pass can delete a statement or expand it into several.

use crate::language::ast::*;

pub trait Fold {
    fn fold_block(&mut self, block: Block) -> Block {
        walk_block(self, block)
    }

    fn fold_stmt(&mut self, stmt: Stmt) -> Vec<Stmt> {
        vec![walk_stmt(self, stmt)]
    }

    fn fold_expr(&mut self, expr: Expr) -> Expr {
        walk_expr(self, expr)
    }

    fn fold_func_lit(&mut self, lit: FuncLit) -> FuncLit {
        walk_func_lit(self, lit)
    }
}

pub fn walk_block<F: Fold + ?Sized>(folder: &mut F, block: Block) -> Block {
    Block {
        stmts: fold_stmts(folder, block.stmts),
        span: block.span,
    }
}

pub fn fold_stmts<F: Fold + ?Sized>(folder: &mut F, stmts: Vec<Stmt>) -> Vec<Stmt> {
    stmts
        .into_iter()
        .flat_map(|stmt| folder.fold_stmt(stmt))
        .collect()
}

/// Folds a statement that sits in a single-statement position, such as an
/// `if` initializer. Deleted statements become `None`; expansions are
/// wrapped in a block.
pub fn fold_single<F: Fold + ?Sized>(folder: &mut F, stmt: Stmt) -> Option<Stmt> {
    let mut out = folder.fold_stmt(stmt);
    match out.len() {
        0 => None,
        1 => out.pop(),
        _ => Some(Stmt::Block(Block::new(out))),
    }
}

fn fold_boxed<F: Fold + ?Sized>(folder: &mut F, stmt: Option<Box<Stmt>>) -> Option<Box<Stmt>> {
    stmt.and_then(|stmt| fold_single(folder, *stmt)).map(Box::new)
}

pub fn walk_func_lit<F: Fold + ?Sized>(folder: &mut F, lit: FuncLit) -> FuncLit {
    FuncLit {
        sig: lit.sig,
        body: folder.fold_block(lit.body),
        span: lit.span,
    }
}

pub fn walk_gen_decl<F: Fold + ?Sized>(folder: &mut F, decl: GenDecl) -> GenDecl {
    let specs = decl
        .specs
        .into_iter()
        .map(|spec| match spec {
            Spec::Value(spec) => Spec::Value(ValueSpec {
                values: spec.values.into_iter().map(|v| folder.fold_expr(v)).collect(),
                ..spec
            }),
            other => other,
        })
        .collect();
    GenDecl { specs, ..decl }
}

pub fn walk_stmt<F: Fold + ?Sized>(folder: &mut F, stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Decl(decl) => Stmt::Decl(walk_gen_decl(folder, decl)),
        Stmt::Labeled { label, stmt, span } => Stmt::Labeled {
            label,
            stmt: Box::new(fold_single(folder, *stmt).unwrap_or(Stmt::Empty(span))),
            span,
        },
        Stmt::Expr(expr) => Stmt::Expr(folder.fold_expr(expr)),
        Stmt::Send { chan, value, span } => Stmt::Send {
            chan: folder.fold_expr(chan),
            value: folder.fold_expr(value),
            span,
        },
        Stmt::IncDec { x, inc, span } => Stmt::IncDec {
            x: folder.fold_expr(x),
            inc,
            span,
        },
        Stmt::Assign { lhs, op, rhs, span } => Stmt::Assign {
            lhs: lhs.into_iter().map(|e| folder.fold_expr(e)).collect(),
            op,
            rhs: rhs.into_iter().map(|e| folder.fold_expr(e)).collect(),
            span,
        },
        Stmt::Go { call, span } => Stmt::Go {
            call: folder.fold_expr(call),
            span,
        },
        Stmt::Defer { call, span } => Stmt::Defer {
            call: folder.fold_expr(call),
            span,
        },
        Stmt::Return { results, span } => Stmt::Return {
            results: results.into_iter().map(|e| folder.fold_expr(e)).collect(),
            span,
        },
        Stmt::Branch { .. } | Stmt::Empty(_) => stmt,
        Stmt::Block(block) => Stmt::Block(folder.fold_block(block)),
        Stmt::If(stmt) => Stmt::If(walk_if(folder, stmt)),
        Stmt::Switch(stmt) => Stmt::Switch(SwitchStmt {
            init: fold_boxed(folder, stmt.init),
            tag: stmt.tag.map(|tag| folder.fold_expr(tag)),
            clauses: walk_case_clauses(folder, stmt.clauses),
            span: stmt.span,
        }),
        Stmt::TypeSwitch(stmt) => Stmt::TypeSwitch(TypeSwitchStmt {
            init: fold_boxed(folder, stmt.init),
            binding: stmt.binding,
            subject: folder.fold_expr(stmt.subject),
            clauses: walk_case_clauses(folder, stmt.clauses),
            span: stmt.span,
        }),
        Stmt::Select(stmt) => Stmt::Select(SelectStmt {
            clauses: stmt
                .clauses
                .into_iter()
                .map(|clause| CommClause {
                    comm: fold_boxed(folder, clause.comm),
                    body: fold_stmts(folder, clause.body),
                    span: clause.span,
                })
                .collect(),
            span: stmt.span,
        }),
        Stmt::For(stmt) => Stmt::For(ForStmt {
            init: fold_boxed(folder, stmt.init),
            cond: stmt.cond.map(|cond| folder.fold_expr(cond)),
            post: fold_boxed(folder, stmt.post),
            body: folder.fold_block(stmt.body),
            span: stmt.span,
        }),
        Stmt::Range(stmt) => Stmt::Range(RangeStmt {
            key: stmt.key.map(|key| folder.fold_expr(key)),
            value: stmt.value.map(|value| folder.fold_expr(value)),
            define: stmt.define,
            expr: folder.fold_expr(stmt.expr),
            body: folder.fold_block(stmt.body),
            span: stmt.span,
        }),
    }
}

pub fn walk_if<F: Fold + ?Sized>(folder: &mut F, stmt: IfStmt) -> IfStmt {
    IfStmt {
        init: fold_boxed(folder, stmt.init),
        cond: folder.fold_expr(stmt.cond),
        then: folder.fold_block(stmt.then),
        els: fold_boxed(folder, stmt.els),
        span: stmt.span,
    }
}

pub fn walk_case_clauses<F: Fold + ?Sized>(
    folder: &mut F,
    clauses: Vec<CaseClause>,
) -> Vec<CaseClause> {
    clauses
        .into_iter()
        .map(|clause| CaseClause {
            list: clause
                .list
                .map(|list| list.into_iter().map(|e| folder.fold_expr(e)).collect()),
            body: fold_stmts(folder, clause.body),
            span: clause.span,
        })
        .collect()
}

fn fold_box<F: Fold + ?Sized>(folder: &mut F, expr: Box<Expr>) -> Box<Expr> {
    Box::new(folder.fold_expr(*expr))
}

pub fn walk_expr<F: Fold + ?Sized>(folder: &mut F, expr: Expr) -> Expr {
    match expr {
        Expr::Ident(_) | Expr::Lit(_) | Expr::Type(..) => expr,
        Expr::Composite(lit) => Expr::Composite(CompositeLit {
            ty: lit.ty.map(|ty| fold_box(folder, ty)),
            elts: lit.elts.into_iter().map(|e| folder.fold_expr(e)).collect(),
            span: lit.span,
        }),
        Expr::FuncLit(lit) => Expr::FuncLit(folder.fold_func_lit(lit)),
        Expr::Paren(inner, span) => Expr::Paren(fold_box(folder, inner), span),
        Expr::Selector { x, sel, span } => Expr::Selector {
            x: fold_box(folder, x),
            sel,
            span,
        },
        Expr::Index { x, indices, span } => Expr::Index {
            x: fold_box(folder, x),
            indices: indices.into_iter().map(|e| folder.fold_expr(e)).collect(),
            span,
        },
        Expr::Slice {
            x,
            low,
            high,
            max,
            slice3,
            span,
        } => Expr::Slice {
            x: fold_box(folder, x),
            low: low.map(|e| fold_box(folder, e)),
            high: high.map(|e| fold_box(folder, e)),
            max: max.map(|e| fold_box(folder, e)),
            slice3,
            span,
        },
        Expr::TypeAssert { x, ty, span } => Expr::TypeAssert {
            x: fold_box(folder, x),
            ty,
            span,
        },
        Expr::Call {
            fun,
            args,
            ellipsis,
            span,
        } => Expr::Call {
            fun: fold_box(folder, fun),
            args: args.into_iter().map(|e| folder.fold_expr(e)).collect(),
            ellipsis,
            span,
        },
        Expr::Star { x, span } => Expr::Star {
            x: fold_box(folder, x),
            span,
        },
        Expr::Unary { op, x, span } => Expr::Unary {
            op,
            x: fold_box(folder, x),
            span,
        },
        Expr::Binary { op, x, y, span } => Expr::Binary {
            op,
            x: fold_box(folder, x),
            y: fold_box(folder, y),
            span,
        },
        Expr::KeyValue { key, value, span } => Expr::KeyValue {
            key: fold_box(folder, key),
            value: fold_box(folder, value),
            span,
        },
    }
}
