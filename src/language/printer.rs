//! Renders a syntax tree back to Go source in gofmt layout: tabs for
//! indentation, one statement per line, blank lines between declarations.
//! Ordinary comments are not preserved; build constraints, toolchain
//! directives and cgo preambles are.

use crate::language::ast::*;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrintError {
    #[error("cannot print an empty {0}")]
    Empty(&'static str),
    #[error("cannot print {what}: {reason}")]
    Invalid { what: &'static str, reason: String },
}

fn invalid(what: &'static str, reason: impl Into<String>) -> PrintError {
    PrintError::Invalid {
        what,
        reason: reason.into(),
    }
}

pub fn print_file(file: &File) -> Result<String, PrintError> {
    let mut printer = Printer::default();
    printer.file(file)?;
    Ok(printer.out)
}

pub fn print_expr(expr: &Expr) -> Result<String, PrintError> {
    let mut printer = Printer::default();
    printer.expr(expr)?;
    Ok(printer.out)
}

pub fn print_type(ty: &Type) -> Result<String, PrintError> {
    let mut printer = Printer::default();
    printer.ty(ty)?;
    Ok(printer.out)
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn write(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn tabs(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push('\t');
        }
    }

    fn nested(&self) -> Printer {
        Printer {
            out: String::new(),
            indent: self.indent,
        }
    }

    fn file(&mut self, file: &File) -> Result<(), PrintError> {
        if !file.build_constraints.is_empty() {
            self.lines(&file.build_constraints);
            self.write("\n");
        }
        self.write("package ");
        self.ident(&file.package)?;
        self.write("\n");

        let (cgo, imports): (Vec<&ImportSpec>, Vec<&ImportSpec>) = file
            .imports
            .iter()
            .partition(|import| !import.preamble.is_empty());
        match imports.as_slice() {
            [] => {}
            [single] => {
                self.write("\nimport ");
                self.import(single)?;
                self.write("\n");
            }
            imports => {
                self.write("\nimport (\n");
                for import in imports {
                    self.write("\t");
                    self.import(import)?;
                    self.write("\n");
                }
                self.write(")\n");
            }
        }
        for import in cgo {
            self.write("\n");
            self.lines(&import.preamble);
            self.write("import ");
            self.import(import)?;
            self.write("\n");
        }

        for decl in &file.decls {
            self.write("\n");
            match decl {
                Decl::Func(func) => {
                    self.lines(&func.directives);
                    self.func_decl(func)?;
                }
                Decl::Gen(decl) => {
                    self.lines(&decl.directives);
                    self.gen_decl(decl)?;
                }
            }
            self.write("\n");
        }
        Ok(())
    }

    fn lines(&mut self, lines: &[String]) {
        for line in lines {
            self.write(line);
            self.write("\n");
        }
    }

    fn import(&mut self, import: &ImportSpec) -> Result<(), PrintError> {
        if import.path.is_empty() {
            return Err(PrintError::Empty("import path"));
        }
        if let Some(alias) = &import.alias {
            self.write(alias);
            self.write(" ");
        }
        self.write("\"");
        self.write(&import.path);
        self.write("\"");
        Ok(())
    }

    fn ident(&mut self, ident: &Ident) -> Result<(), PrintError> {
        if ident.name.is_empty() {
            return Err(PrintError::Empty("identifier"));
        }
        self.write(&ident.name);
        Ok(())
    }

    fn func_decl(&mut self, func: &FuncDecl) -> Result<(), PrintError> {
        self.write("func ");
        if let Some(recv) = &func.recv {
            self.write("(");
            self.field(recv)?;
            self.write(") ");
        }
        self.ident(&func.name)?;
        self.type_params(&func.type_params)?;
        self.signature(&func.sig)?;
        if let Some(body) = &func.body {
            self.write(" ");
            self.block(body)?;
        }
        Ok(())
    }

    fn type_params(&mut self, params: &[Field]) -> Result<(), PrintError> {
        if params.is_empty() {
            return Ok(());
        }
        self.write("[");
        self.field_list(params)?;
        self.write("]");
        Ok(())
    }

    fn signature(&mut self, sig: &Signature) -> Result<(), PrintError> {
        self.write("(");
        self.field_list(&sig.params)?;
        self.write(")");
        match sig.results.as_slice() {
            [] => {}
            [single] if single.names.is_empty() && !matches!(single.ty, Type::Func(_)) => {
                self.write(" ");
                self.ty(&single.ty)?;
            }
            results => {
                self.write(" (");
                self.field_list(results)?;
                self.write(")");
            }
        }
        Ok(())
    }

    fn field_list(&mut self, fields: &[Field]) -> Result<(), PrintError> {
        for (index, field) in fields.iter().enumerate() {
            if index > 0 {
                self.write(", ");
            }
            self.field(field)?;
        }
        Ok(())
    }

    fn field(&mut self, field: &Field) -> Result<(), PrintError> {
        for (index, name) in field.names.iter().enumerate() {
            if index > 0 {
                self.write(", ");
            }
            self.ident(name)?;
        }
        if !field.names.is_empty() {
            self.write(" ");
        }
        self.ty(&field.ty)?;
        if let Some(tag) = &field.tag {
            self.write(" ");
            self.write(tag);
        }
        Ok(())
    }

    fn gen_decl(&mut self, decl: &GenDecl) -> Result<(), PrintError> {
        self.write(match decl.kind {
            GenKind::Var => "var",
            GenKind::Const => "const",
            GenKind::Type => "type",
        });
        if decl.grouped || decl.specs.len() != 1 {
            self.write(" (\n");
            self.indent += 1;
            for spec in &decl.specs {
                self.tabs(self.indent);
                self.spec(spec)?;
                self.write("\n");
            }
            self.indent -= 1;
            self.tabs(self.indent);
            self.write(")");
        } else {
            self.write(" ");
            self.spec(&decl.specs[0])?;
        }
        Ok(())
    }

    fn spec(&mut self, spec: &Spec) -> Result<(), PrintError> {
        match spec {
            Spec::Value(spec) => {
                if spec.names.is_empty() {
                    return Err(PrintError::Empty("value declaration"));
                }
                self.ident_list(&spec.names)?;
                if let Some(ty) = &spec.ty {
                    self.write(" ");
                    self.ty(ty)?;
                }
                if !spec.values.is_empty() {
                    self.write(" = ");
                    self.expr_list(&spec.values)?;
                }
            }
            Spec::Type(spec) => {
                self.ident(&spec.name)?;
                self.type_params(&spec.type_params)?;
                self.write(if spec.alias { " = " } else { " " });
                self.ty(&spec.ty)?;
            }
        }
        Ok(())
    }

    fn ident_list(&mut self, idents: &[Ident]) -> Result<(), PrintError> {
        for (index, ident) in idents.iter().enumerate() {
            if index > 0 {
                self.write(", ");
            }
            self.ident(ident)?;
        }
        Ok(())
    }

    fn ty(&mut self, ty: &Type) -> Result<(), PrintError> {
        match ty {
            Type::Name { pkg, name, args } => {
                if name.is_empty() {
                    return Err(PrintError::Empty("type name"));
                }
                if let Some(pkg) = pkg {
                    self.write(pkg);
                    self.write(".");
                }
                self.write(name);
                if !args.is_empty() {
                    self.write("[");
                    for (index, arg) in args.iter().enumerate() {
                        if index > 0 {
                            self.write(", ");
                        }
                        self.ty(arg)?;
                    }
                    self.write("]");
                }
            }
            Type::Pointer(inner) => {
                self.write("*");
                self.ty(inner)?;
            }
            Type::Slice(elem) => {
                self.write("[]");
                self.ty(elem)?;
            }
            Type::Array { len, elem } => {
                self.write("[");
                match len {
                    Some(len) => self.expr(len)?,
                    None => self.write("..."),
                }
                self.write("]");
                self.ty(elem)?;
            }
            Type::Map { key, value } => {
                self.write("map[");
                self.ty(key)?;
                self.write("]");
                self.ty(value)?;
            }
            Type::Chan { dir, elem } => {
                self.write(match dir {
                    ChanDir::Both => "chan ",
                    ChanDir::Send => "chan<- ",
                    ChanDir::Recv => "<-chan ",
                });
                let needs_parens =
                    *dir == ChanDir::Both && matches!(**elem, Type::Chan { dir: ChanDir::Recv, .. });
                if needs_parens {
                    self.write("(");
                    self.ty(elem)?;
                    self.write(")");
                } else {
                    self.ty(elem)?;
                }
            }
            Type::Func(sig) => {
                self.write("func");
                self.signature(sig)?;
            }
            Type::Struct(fields) => {
                if fields.is_empty() {
                    self.write("struct{}");
                    return Ok(());
                }
                self.write("struct {\n");
                self.indent += 1;
                for field in fields {
                    self.tabs(self.indent);
                    self.field(field)?;
                    self.write("\n");
                }
                self.indent -= 1;
                self.tabs(self.indent);
                self.write("}");
            }
            Type::Interface(elems) => {
                if elems.is_empty() {
                    self.write("interface{}");
                    return Ok(());
                }
                self.write("interface {\n");
                self.indent += 1;
                for elem in elems {
                    self.tabs(self.indent);
                    match elem {
                        InterfaceElem::Method { name, sig } => {
                            self.ident(name)?;
                            self.signature(sig)?;
                        }
                        InterfaceElem::Embedded(ty) => self.ty(ty)?,
                    }
                    self.write("\n");
                }
                self.indent -= 1;
                self.tabs(self.indent);
                self.write("}");
            }
            Type::Ellipsis(elem) => {
                self.write("...");
                self.ty(elem)?;
            }
            Type::Union(terms) => {
                if terms.is_empty() {
                    return Err(PrintError::Empty("type union"));
                }
                for (index, term) in terms.iter().enumerate() {
                    if index > 0 {
                        self.write(" | ");
                    }
                    if term.tilde {
                        self.write("~");
                    }
                    self.ty(&term.ty)?;
                }
            }
            Type::Paren(inner) => {
                self.write("(");
                self.ty(inner)?;
                self.write(")");
            }
        }
        Ok(())
    }

    fn block(&mut self, block: &Block) -> Result<(), PrintError> {
        self.write("{\n");
        self.indent += 1;
        for stmt in &block.stmts {
            self.stmt_line(stmt)?;
        }
        self.indent -= 1;
        self.tabs(self.indent);
        self.write("}");
        Ok(())
    }

    fn stmt_line(&mut self, stmt: &Stmt) -> Result<(), PrintError> {
        match stmt {
            Stmt::Empty(_) => Ok(()),
            Stmt::Labeled { label, stmt, .. } => {
                self.tabs(self.indent.saturating_sub(1));
                self.ident(label)?;
                self.write(":\n");
                if matches!(**stmt, Stmt::Empty(_)) {
                    self.tabs(self.indent);
                    self.write(";\n");
                    return Ok(());
                }
                self.stmt_line(stmt)
            }
            other => {
                self.tabs(self.indent);
                self.stmt(other)?;
                self.write("\n");
                Ok(())
            }
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), PrintError> {
        match stmt {
            Stmt::Decl(decl) => self.gen_decl(decl)?,
            Stmt::Labeled { .. } | Stmt::Empty(_) => {
                return Err(invalid("statement", "label or empty statement in expression position"))
            }
            Stmt::Expr(expr) => self.expr(expr)?,
            Stmt::Send { chan, value, .. } => {
                self.expr(chan)?;
                self.write(" <- ");
                self.expr(value)?;
            }
            Stmt::IncDec { x, inc, .. } => {
                self.expr_at(x, 2)?;
                self.write(if *inc { "++" } else { "--" });
            }
            Stmt::Assign { lhs, op, rhs, .. } => {
                if lhs.is_empty() || rhs.is_empty() {
                    return Err(PrintError::Empty("assignment"));
                }
                let depth = if lhs.len() > 1 && rhs.len() > 1 { 2 } else { 1 };
                self.expr_list_at(lhs, depth)?;
                self.write(" ");
                self.write(op.symbol());
                self.write(" ");
                self.expr_list_at(rhs, depth)?;
            }
            Stmt::Go { call, .. } => {
                self.require_call(call, "go statement")?;
                self.write("go ");
                self.expr(call)?;
            }
            Stmt::Defer { call, .. } => {
                self.require_call(call, "defer statement")?;
                self.write("defer ");
                self.expr(call)?;
            }
            Stmt::Return { results, .. } => {
                self.write("return");
                if !results.is_empty() {
                    self.write(" ");
                    self.expr_list(results)?;
                }
            }
            Stmt::Branch { kind, label, .. } => {
                self.write(kind.keyword());
                if let Some(label) = label {
                    self.write(" ");
                    self.ident(label)?;
                }
            }
            Stmt::Block(block) => self.block(block)?,
            Stmt::If(stmt) => self.if_stmt(stmt)?,
            Stmt::Switch(stmt) => {
                self.write("switch ");
                if let Some(init) = &stmt.init {
                    self.stmt(init)?;
                    self.write("; ");
                }
                if let Some(tag) = &stmt.tag {
                    self.expr(tag)?;
                    self.write(" ");
                }
                self.case_clauses(&stmt.clauses)?;
            }
            Stmt::TypeSwitch(stmt) => {
                self.write("switch ");
                if let Some(init) = &stmt.init {
                    self.stmt(init)?;
                    self.write("; ");
                }
                if let Some(binding) = &stmt.binding {
                    self.ident(binding)?;
                    self.write(" := ");
                }
                self.postfix_operand(&stmt.subject, 1)?;
                self.write(".(type) ");
                self.case_clauses(&stmt.clauses)?;
            }
            Stmt::Select(stmt) => {
                self.write("select {\n");
                for clause in &stmt.clauses {
                    self.tabs(self.indent);
                    match &clause.comm {
                        Some(comm) => {
                            self.write("case ");
                            self.stmt(comm)?;
                            self.write(":\n");
                        }
                        None => self.write("default:\n"),
                    }
                    self.clause_body(&clause.body)?;
                }
                self.tabs(self.indent);
                self.write("}");
            }
            Stmt::For(stmt) => {
                self.write("for ");
                let three_clause = stmt.init.is_some() || stmt.post.is_some();
                if three_clause {
                    if let Some(init) = &stmt.init {
                        self.stmt(init)?;
                    }
                    self.write("; ");
                    if let Some(cond) = &stmt.cond {
                        self.expr(cond)?;
                    }
                    self.write("; ");
                    if let Some(post) = &stmt.post {
                        self.stmt(post)?;
                        self.write(" ");
                    }
                } else if let Some(cond) = &stmt.cond {
                    self.expr(cond)?;
                    self.write(" ");
                }
                self.block(&stmt.body)?;
            }
            Stmt::Range(stmt) => {
                self.write("for ");
                if let Some(key) = &stmt.key {
                    self.expr(key)?;
                    if let Some(value) = &stmt.value {
                        self.write(", ");
                        self.expr(value)?;
                    }
                    self.write(if stmt.define { " := " } else { " = " });
                }
                self.write("range ");
                self.expr(&stmt.expr)?;
                self.write(" ");
                self.block(&stmt.body)?;
            }
        }
        Ok(())
    }

    fn require_call(&self, expr: &Expr, what: &'static str) -> Result<(), PrintError> {
        match expr {
            Expr::Call { .. } => Ok(()),
            Expr::Paren(inner, _) => self.require_call(inner, what),
            _ => Err(invalid(what, "operand is not a function call")),
        }
    }

    fn if_stmt(&mut self, stmt: &IfStmt) -> Result<(), PrintError> {
        self.write("if ");
        if let Some(init) = &stmt.init {
            self.stmt(init)?;
            self.write("; ");
        }
        self.expr(&stmt.cond)?;
        self.write(" ");
        self.block(&stmt.then)?;
        if let Some(els) = &stmt.els {
            self.write(" else ");
            match els.as_ref() {
                Stmt::If(nested) => self.if_stmt(nested)?,
                Stmt::Block(block) => self.block(block)?,
                _ => return Err(invalid("else branch", "expected if statement or block")),
            }
        }
        Ok(())
    }

    fn case_clauses(&mut self, clauses: &[CaseClause]) -> Result<(), PrintError> {
        self.write("{\n");
        for clause in clauses {
            self.tabs(self.indent);
            match &clause.list {
                Some(list) => {
                    if list.is_empty() {
                        return Err(PrintError::Empty("case list"));
                    }
                    self.write("case ");
                    self.expr_list(list)?;
                    self.write(":\n");
                }
                None => self.write("default:\n"),
            }
            self.clause_body(&clause.body)?;
        }
        self.tabs(self.indent);
        self.write("}");
        Ok(())
    }

    fn clause_body(&mut self, body: &[Stmt]) -> Result<(), PrintError> {
        self.indent += 1;
        for stmt in body {
            self.stmt_line(stmt)?;
        }
        self.indent -= 1;
        Ok(())
    }

    fn expr_list(&mut self, exprs: &[Expr]) -> Result<(), PrintError> {
        self.expr_list_at(exprs, 1)
    }

    fn expr_list_at(&mut self, exprs: &[Expr], depth: usize) -> Result<(), PrintError> {
        for (index, expr) in exprs.iter().enumerate() {
            if index > 0 {
                self.write(", ");
            }
            self.expr_at(expr, depth)?;
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), PrintError> {
        self.expr_at(expr, 1)
    }

    /// `depth` is gofmt's nesting depth, which decides whether binary
    /// operators get blanks around them.
    fn expr_at(&mut self, expr: &Expr, depth: usize) -> Result<(), PrintError> {
        match expr {
            Expr::Ident(ident) => self.ident(ident)?,
            Expr::Lit(lit) => {
                if lit.raw.is_empty() {
                    return Err(PrintError::Empty("literal"));
                }
                self.write(&lit.raw);
            }
            Expr::Composite(lit) => {
                if let Some(ty) = &lit.ty {
                    self.expr(ty)?;
                }
                self.write("{");
                self.expr_list(&lit.elts)?;
                self.write("}");
            }
            Expr::FuncLit(lit) => {
                self.write("func");
                self.signature(&lit.sig)?;
                self.write(" ");
                self.block(&lit.body)?;
            }
            Expr::Paren(inner, _) => {
                if matches!(**inner, Expr::Paren(..)) {
                    self.expr_at(inner, depth)?;
                } else {
                    self.write("(");
                    self.expr_at(inner, reduce_depth(depth))?;
                    self.write(")");
                }
            }
            Expr::Selector { x, sel, .. } => {
                self.postfix_operand(x, depth)?;
                self.write(".");
                self.ident(sel)?;
            }
            Expr::Index { x, indices, .. } => {
                if indices.is_empty() {
                    return Err(PrintError::Empty("index expression"));
                }
                self.postfix_operand(x, 1)?;
                self.write("[");
                self.expr_list_at(indices, depth + 1)?;
                self.write("]");
            }
            Expr::Slice {
                x,
                low,
                high,
                max,
                slice3,
                ..
            } => {
                if *slice3 && max.is_none() {
                    return Err(invalid("slice expression", "missing max index"));
                }
                self.postfix_operand(x, 1)?;
                self.write("[");
                let mut indices = vec![low.as_deref(), high.as_deref()];
                if *slice3 {
                    indices.push(max.as_deref());
                }
                let present = indices.iter().flatten().count();
                let binaries = indices
                    .iter()
                    .flatten()
                    .any(|index| matches!(index, Expr::Binary { .. }));
                let blanks = depth <= 1 && present > 1 && binaries;
                for (position, index) in indices.iter().enumerate() {
                    if position > 0 {
                        if blanks && indices[position - 1].is_some() {
                            self.write(" ");
                        }
                        self.write(":");
                        if blanks && index.is_some() {
                            self.write(" ");
                        }
                    }
                    if let Some(index) = index {
                        self.expr_at(index, depth + 1)?;
                    }
                }
                self.write("]");
            }
            Expr::TypeAssert { x, ty, .. } => {
                self.postfix_operand(x, 1)?;
                self.write(".(");
                match ty {
                    Some(ty) => self.ty(ty)?,
                    None => self.write("type"),
                }
                self.write(")");
            }
            Expr::Call {
                fun,
                args,
                ellipsis,
                ..
            } => {
                let depth = if args.len() > 1 { depth + 1 } else { depth };
                self.postfix_operand(fun, depth)?;
                self.write("(");
                self.expr_list_at(args, depth)?;
                if *ellipsis {
                    if args.is_empty() {
                        return Err(invalid("call", "'...' without arguments"));
                    }
                    self.write("...");
                }
                self.write(")");
            }
            Expr::Star { x, .. } => {
                self.write("*");
                self.unary_operand(x, '*', 1)?;
            }
            Expr::Unary { op, x, .. } => {
                self.write(op.symbol());
                let last = op.symbol().chars().last().unwrap_or(' ');
                self.unary_operand(x, last, depth)?;
            }
            Expr::Binary { op, x, y, .. } => {
                let prec = op.precedence();
                let blanks = prec < binary_cutoff(expr, depth);
                let left_depth = match **x {
                    Expr::Binary { op: left, .. } if left.precedence() == prec => depth,
                    _ => depth + 1,
                };
                self.binary_operand(x, prec, false, left_depth)?;
                if blanks {
                    self.write(" ");
                }
                self.write(op.symbol());
                if blanks {
                    self.write(" ");
                }
                self.binary_operand(y, prec, true, depth + 1)?;
            }
            Expr::KeyValue { key, value, .. } => {
                self.expr(key)?;
                self.write(": ");
                self.expr(value)?;
            }
            Expr::Type(ty, _) => self.ty(ty)?,
        }
        Ok(())
    }

    /// Operand of a selector, index, call or assertion.
    fn postfix_operand(&mut self, expr: &Expr, depth: usize) -> Result<(), PrintError> {
        let needs_parens = match expr {
            Expr::Binary { .. } | Expr::Unary { .. } | Expr::Star { .. } => true,
            Expr::Type(ty, _) => matches!(
                **ty,
                Type::Func(_) | Type::Chan { .. } | Type::Pointer(_)
            ),
            _ => false,
        };
        self.maybe_parens(expr, needs_parens, depth)
    }

    fn unary_operand(&mut self, expr: &Expr, op_last: char, depth: usize) -> Result<(), PrintError> {
        if matches!(expr, Expr::Binary { .. }) {
            return self.maybe_parens(expr, true, depth);
        }
        let rendered = {
            let mut nested = self.nested();
            nested.expr_at(expr, depth)?;
            nested.out
        };
        // `- -x` and `& &x` must not fuse into `--x` and `&&x`.
        let fuses = matches!(
            (op_last, rendered.chars().next()),
            ('-', Some('-')) | ('+', Some('+')) | ('&', Some('&'))
        );
        if fuses {
            self.write("(");
            self.write(&rendered);
            self.write(")");
        } else {
            self.write(&rendered);
        }
        Ok(())
    }

    fn binary_operand(
        &mut self,
        expr: &Expr,
        parent: u8,
        right: bool,
        depth: usize,
    ) -> Result<(), PrintError> {
        let needs_parens = match expr {
            Expr::Binary { op, .. } => {
                let prec = op.precedence();
                prec < parent || (right && prec == parent)
            }
            _ => false,
        };
        self.maybe_parens(expr, needs_parens, depth)
    }

    fn maybe_parens(&mut self, expr: &Expr, parens: bool, depth: usize) -> Result<(), PrintError> {
        if parens {
            self.write("(");
            self.expr_at(expr, reduce_depth(depth))?;
            self.write(")");
            Ok(())
        } else {
            self.expr_at(expr, depth)
        }
    }
}

/// Parentheses undo one level of depth.
fn reduce_depth(depth: usize) -> usize {
    depth.saturating_sub(1).max(1)
}

/// Operators of a precedence below the cutoff are printed with blanks.
fn binary_cutoff(expr: &Expr, depth: usize) -> u8 {
    let shape = binary_shape(expr);
    if shape.problem > 0 {
        return shape.problem + 1;
    }
    match (shape.has_add, shape.has_mul, depth) {
        (true, true, 1) => 5,
        (true, true, _) => 4,
        (_, _, 1) => 6,
        _ => 4,
    }
}

#[derive(Default)]
struct BinaryShape {
    /// Some operator of precedence 4 (`+ - | ^`) prints unparenthesized.
    has_add: bool,
    /// Some operator of precedence 5 (`* / % << >> & &^`) does.
    has_mul: bool,
    /// Lowest precedence that must keep blanks so tokens do not fuse.
    problem: u8,
}

fn binary_shape(expr: &Expr) -> BinaryShape {
    let mut shape = BinaryShape::default();
    let Expr::Binary { op, x, y, .. } = expr else {
        return shape;
    };
    let prec = op.precedence();
    shape.has_add = prec == 4;
    shape.has_mul = prec == 5;
    let absorb = |inner: BinaryShape, shape: &mut BinaryShape| {
        shape.has_add |= inner.has_add;
        shape.has_mul |= inner.has_mul;
        shape.problem = shape.problem.max(inner.problem);
    };
    if let Expr::Binary { op: left, .. } = x.as_ref() {
        if left.precedence() >= prec {
            absorb(binary_shape(x), &mut shape);
        }
    }
    match y.as_ref() {
        Expr::Binary { op: right, .. } if right.precedence() > prec => {
            absorb(binary_shape(y), &mut shape);
        }
        Expr::Star { .. } if *op == BinaryOp::Quo => shape.problem = 5,
        Expr::Unary { op: unary, .. } => match (op.symbol(), unary.symbol()) {
            ("/", "*") | ("&", "&") | ("&", "^") => shape.problem = 5,
            ("+", "+") | ("-", "-") => shape.problem = shape.problem.max(4),
            _ => {}
        },
        _ => {}
    }
    shape
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{parser::parse_file, span::Span};

    fn roundtrip(source: &str) -> String {
        let file = parse_file(source).expect("parse");
        print_file(&file).expect("print")
    }

    #[test]
    fn prints_canonical_layout() {
        let source = "package main\n\nimport (\n\t\"fmt\"\n\t\"strings\"\n)\n\nfunc main() {\n\tx := strings.ToUpper(\"a\")\n\tif x != \"\" {\n\t\tfmt.Println(x)\n\t} else {\n\t\treturn\n\t}\n}\n";
        assert_eq!(roundtrip(source), source);
    }

    #[test]
    fn printing_is_stable() {
        let source = "package p\ntype Pair[K comparable, V any] struct {\n K K\n V V `json:\"v\"`\n}\nfunc (p *Pair[K, V]) Get() (V, bool) { return p.V, true }\nfunc f(ch <-chan int, out chan<- string) {\n switch v := any(1).(type) {\n case int:\n  _ = v\n default:\n }\n for i := 0; i < 3; i++ {\n  select {\n  case n := <-ch:\n   out <- fmt.Sprint(n)\n  default:\n  }\n }\n m := map[string][]int{\"a\": {1, 2}}\n _ = m[\"a\"][1:2]\n}\n";
        let first = roundtrip(source);
        let second = roundtrip(&first);
        assert_eq!(first, second);
        assert!(first.contains("\tswitch v := any(1).(type) {\n\tcase int:\n\t\t_ = v\n"));
        assert!(first.contains("func (p *Pair[K, V]) Get() (V, bool) {"));
        assert!(first.contains("m := map[string][]int{\"a\": {1, 2}}"));
    }

    #[test]
    fn preserves_literals_verbatim() {
        let out = roundtrip("package p\nvar s = `raw\n\\n`\nvar r = '\\x41'\nvar h = 0x_FF\n");
        assert!(out.contains("var s = `raw\n\\n`"));
        assert!(out.contains("var r = '\\x41'"));
        assert!(out.contains("var h = 0x_FF"));
    }

    #[test]
    fn binary_spacing_follows_nesting_depth() {
        let out = roundtrip(
            "package p\nfunc f() {\n\thttp.Error(w, \"x: \" + err.Error(), 400)\n\tprintln(a + b)\n\tg(a * b + c, d)\n\tx := a * b + c\n\ti, j = i + 1, j - 1\n\tg(a / *p, d)\n\t_ = s[a + 1 : b]\n\tk := (a + b) * c\n}\n",
        );
        assert!(out.contains("\thttp.Error(w, \"x: \"+err.Error(), 400)\n"));
        assert!(out.contains("\tprintln(a + b)\n"));
        assert!(out.contains("\tg(a*b+c, d)\n"));
        assert!(out.contains("\tx := a*b + c\n"));
        assert!(out.contains("\ti, j = i+1, j-1\n"));
        assert!(out.contains("\tg(a / *p, d)\n"));
        assert!(out.contains("\t_ = s[a+1 : b]\n"));
        assert!(out.contains("\tk := (a + b) * c\n"));
    }

    #[test]
    fn parenthesizes_synthesized_binary_operands() {
        let sum = Expr::Binary {
            op: BinaryOp::Add,
            x: Box::new(Expr::Ident(Ident::synthetic("a"))),
            y: Box::new(Expr::Ident(Ident::synthetic("b"))),
            span: Span::synthetic(),
        };
        let product = Expr::Binary {
            op: BinaryOp::Mul,
            x: Box::new(sum.clone()),
            y: Box::new(Expr::Ident(Ident::synthetic("c"))),
            span: Span::synthetic(),
        };
        assert_eq!(print_expr(&product).unwrap(), "(a + b) * c");
        let neg = Expr::Unary {
            op: UnaryOp::Neg,
            x: Box::new(Expr::Unary {
                op: UnaryOp::Neg,
                x: Box::new(Expr::Ident(Ident::synthetic("x"))),
                span: Span::synthetic(),
            }),
            span: Span::synthetic(),
        };
        assert_eq!(print_expr(&neg).unwrap(), "-(-x)");
    }

    #[test]
    fn rejects_empty_identifier() {
        let expr = Expr::Ident(Ident::synthetic(""));
        assert_eq!(print_expr(&expr), Err(PrintError::Empty("identifier")));
    }

    #[test]
    fn rejects_go_statement_without_call() {
        let file = File {
            build_constraints: Vec::new(),
            package: Ident::synthetic("main"),
            imports: Vec::new(),
            decls: vec![Decl::Func(FuncDecl {
                recv: None,
                name: Ident::synthetic("main"),
                type_params: Vec::new(),
                sig: Signature::default(),
                body: Some(Block::new(vec![Stmt::Go {
                    call: Expr::Ident(Ident::synthetic("f")),
                    span: Span::synthetic(),
                }])),
                directives: Vec::new(),
                span: Span::synthetic(),
            })],
        };
        assert!(matches!(
            print_file(&file),
            Err(PrintError::Invalid { what: "go statement", .. })
        ));
    }

    #[test]
    fn keeps_directives_and_cgo_preamble() {
        let source = "//go:build linux\n\n// Package doc.\npackage main\n\n// #include <stdlib.h>\n// #cgo LDFLAGS: -lm\nimport \"C\"\n\nimport _ \"embed\"\n\n// hello is embedded.\n//go:embed hello.txt\nvar hello string\n\n// Add is exported to C.\n//\n//export Add\nfunc Add(a, b C.int) C.int {\n\t// inside\n\treturn a + b\n}\n\n// plain doc\nfunc main() {\n}\n";
        let out = roundtrip(source);
        assert_eq!(
            out,
            "//go:build linux\n\npackage main\n\nimport _ \"embed\"\n\n// #include <stdlib.h>\n// #cgo LDFLAGS: -lm\nimport \"C\"\n\n//go:embed hello.txt\nvar hello string\n\n//export Add\nfunc Add(a, b C.int) C.int {\n\treturn a + b\n}\n\nfunc main() {\n}\n"
        );
    }

    #[test]
    fn detached_comments_are_not_directives() {
        let out = roundtrip("package main\n\nimport \"fmt\" // #include <stdio.h>\nimport \"C\"\n\n//go:noinline\n\nfunc f() {\n\tfmt.Println(C.int(1))\n}\n");
        assert_eq!(
            out,
            "package main\n\nimport (\n\t\"fmt\"\n\t\"C\"\n)\n\nfunc f() {\n\tfmt.Println(C.int(1))\n}\n"
        );
    }

    #[test]
    fn prints_labels_outdented() {
        let out = roundtrip("package p\nfunc f() {\nouter:\n\tfor {\n\t\tbreak outer\n\t}\n}\n");
        assert!(out.contains("func f() {\nouter:\n\tfor {\n\t\tbreak outer\n\t}\n}"));
    }
}
