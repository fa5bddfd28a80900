use crate::language::{
    ast::*,
    errors::{SyntaxError, SyntaxErrors},
    lexer::{lex_with_comments, Comment},
    span::Span,
    token::{Token, TokenKind},
};

pub fn parse_file(source: &str) -> Result<File, SyntaxErrors> {
    let (tokens, comments) = match lex_with_comments(source) {
        Ok(lexed) => lexed,
        Err(errors) => {
            let errs = errors
                .into_iter()
                .map(|err| SyntaxError::new(err.message, err.span))
                .collect();
            return Err(SyntaxErrors::new(errs));
        }
    };
    Parser::new(source, tokens, comments).parse()
}

struct Parser<'src> {
    source: &'src str,
    tokens: Vec<Token>,
    pos: usize,
    comments: Vec<Comment>,
    /// First comment not yet attached or passed over.
    next_comment: usize,
    errors: Vec<SyntaxError>,
    /// Set while parsing `if`/`for`/`switch` headers, where `T {` opens the
    /// body rather than a composite literal.
    suppress_composite: bool,
}

/// One entry of a parameter list before names and types are grouped.
enum ParamEntry {
    /// A lone identifier: either a parameter name or a type name.
    Bare(Ident),
    Named(Ident, Type),
    Typed(Type, Span),
}

impl<'src> Parser<'src> {
    fn new(source: &'src str, tokens: Vec<Token>, comments: Vec<Comment>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            comments,
            next_comment: 0,
            errors: Vec::new(),
            suppress_composite: false,
        }
    }

    fn parse(mut self) -> Result<File, SyntaxErrors> {
        while self.matches(TokenKind::Semi) {}
        let build_constraints = self
            .take_comments(self.current_span_start())
            .into_iter()
            .filter(Comment::is_build_constraint)
            .map(|comment| comment.text)
            .collect();
        let package = match self.parse_package_clause() {
            Ok(package) => package,
            Err(err) => return Err(SyntaxErrors::new(vec![err])),
        };

        let mut imports = Vec::new();
        let mut decls = Vec::new();

        while !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }

            if self.check(TokenKind::Import) {
                if !decls.is_empty() {
                    let err = self.error_here("imports must appear before other declarations");
                    self.report(err);
                }
                match self.parse_import_decl() {
                    Ok(specs) => imports.extend(specs),
                    Err(err) => {
                        self.report(err);
                        self.synchronize_decl();
                    }
                }
                continue;
            }

            match self.parse_top_level_decl() {
                Ok(decl) => decls.push(decl),
                Err(err) => {
                    self.report(err);
                    self.synchronize_decl();
                }
            }
        }

        if self.errors.is_empty() {
            Ok(File {
                build_constraints,
                package,
                imports,
                decls,
            })
        } else {
            Err(SyntaxErrors::new(self.errors))
        }
    }

    fn parse_package_clause(&mut self) -> Result<Ident, SyntaxError> {
        while self.matches(TokenKind::Semi) {}
        self.expect(TokenKind::Package)?;
        let name = self.expect_identifier("Expected package name")?;
        self.expect_terminator()?;
        Ok(name)
    }

    fn parse_import_decl(&mut self) -> Result<Vec<ImportSpec>, SyntaxError> {
        let doc = self.leading_group(self.current_span_start());
        self.expect(TokenKind::Import)?;
        let mut specs = Vec::new();
        if self.matches(TokenKind::LParen) {
            while !self.check(TokenKind::RParen) && !self.is_eof() {
                if self.matches(TokenKind::Semi) {
                    continue;
                }
                let doc = self.leading_group(self.current_span_start());
                specs.push(self.parse_import_spec(doc)?);
                if !self.check(TokenKind::RParen) {
                    self.expect(TokenKind::Semi)?;
                }
            }
            self.expect(TokenKind::RParen)?;
        } else {
            specs.push(self.parse_import_spec(doc)?);
        }
        self.expect_terminator()?;
        Ok(specs)
    }

    /// `doc` is the comment group directly above the spec; it is kept only
    /// as the cgo preamble of `import "C"`.
    fn parse_import_spec(&mut self, doc: Vec<Comment>) -> Result<ImportSpec, SyntaxError> {
        let start = self.current_span_start();
        let alias = match self.peek_kind() {
            Some(TokenKind::Identifier(name)) => {
                self.advance();
                Some(name)
            }
            Some(TokenKind::Dot) => {
                self.advance();
                Some(".".to_string())
            }
            _ => None,
        };
        let raw = self.expect_string_literal("Expected import path string")?;
        let path = unquote(&raw);
        if path.is_empty() {
            return Err(SyntaxError::new("Empty import path", self.span_from(start)));
        }
        let preamble = if path == "C" {
            doc.into_iter().map(|comment| comment.text).collect()
        } else {
            Vec::new()
        };
        Ok(ImportSpec {
            alias,
            path,
            preamble,
            span: self.span_from(start),
        })
    }

    fn parse_top_level_decl(&mut self) -> Result<Decl, SyntaxError> {
        let directives: Vec<String> = self
            .leading_group(self.current_span_start())
            .into_iter()
            .filter(Comment::is_directive)
            .map(|comment| comment.text)
            .collect();
        let decl = match self.peek_kind() {
            Some(TokenKind::Func) => Decl::Func(FuncDecl {
                directives,
                ..self.parse_func_decl()?
            }),
            Some(TokenKind::Var) => Decl::Gen(GenDecl {
                directives,
                ..self.parse_gen_decl(GenKind::Var)?
            }),
            Some(TokenKind::Const) => Decl::Gen(GenDecl {
                directives,
                ..self.parse_gen_decl(GenKind::Const)?
            }),
            Some(TokenKind::Type) => Decl::Gen(GenDecl {
                directives,
                ..self.parse_gen_decl(GenKind::Type)?
            }),
            _ => return Err(self.error_here("Expected declaration")),
        };
        self.expect_terminator()?;
        Ok(decl)
    }

    fn parse_func_decl(&mut self) -> Result<FuncDecl, SyntaxError> {
        let start = self.expect(TokenKind::Func)?.span.start;
        let recv = if self.check(TokenKind::LParen) {
            let recv_start = self.current_span_start();
            let mut params = self.parse_parameters(TokenKind::LParen, TokenKind::RParen)?;
            if params.len() != 1 || params[0].names.len() > 1 {
                return Err(SyntaxError::new(
                    "Method must have exactly one receiver",
                    self.span_from(recv_start),
                ));
            }
            params.pop()
        } else {
            None
        };
        let name = self.expect_identifier("Expected function name")?;
        let type_params = if self.check(TokenKind::LBracket) {
            if recv.is_some() {
                return Err(self.error_here("Methods cannot have type parameters"));
            }
            self.parse_type_params()?
        } else {
            Vec::new()
        };
        let sig = self.parse_signature()?;
        let body = if self.check(TokenKind::LBrace) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(FuncDecl {
            recv,
            name,
            type_params,
            sig,
            body,
            directives: Vec::new(),
            span: self.span_from(start),
        })
    }

    fn parse_gen_decl(&mut self, kind: GenKind) -> Result<GenDecl, SyntaxError> {
        let start = self.current_span_start();
        self.advance();
        let mut specs = Vec::new();
        let grouped = self.matches(TokenKind::LParen);
        if grouped {
            while !self.check(TokenKind::RParen) && !self.is_eof() {
                if self.matches(TokenKind::Semi) {
                    continue;
                }
                specs.push(self.parse_spec(kind)?);
                if !self.check(TokenKind::RParen) {
                    self.expect(TokenKind::Semi)?;
                }
            }
            self.expect(TokenKind::RParen)?;
        } else {
            specs.push(self.parse_spec(kind)?);
        }
        Ok(GenDecl {
            kind,
            specs,
            grouped,
            directives: Vec::new(),
            span: self.span_from(start),
        })
    }

    fn parse_spec(&mut self, kind: GenKind) -> Result<Spec, SyntaxError> {
        match kind {
            GenKind::Type => self.parse_type_spec().map(Spec::Type),
            GenKind::Var | GenKind::Const => self.parse_value_spec(kind).map(Spec::Value),
        }
    }

    fn parse_value_spec(&mut self, kind: GenKind) -> Result<ValueSpec, SyntaxError> {
        let start = self.current_span_start();
        let mut names = vec![self.expect_identifier("Expected name")?];
        while self.matches(TokenKind::Comma) {
            names.push(self.expect_identifier("Expected name after ','")?);
        }
        let ty = if self.check(TokenKind::Eq)
            || self.check(TokenKind::Semi)
            || self.check(TokenKind::RParen)
        {
            None
        } else {
            Some(self.parse_type()?)
        };
        let values = if self.matches(TokenKind::Eq) {
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        if kind == GenKind::Var && ty.is_none() && values.is_empty() {
            return Err(SyntaxError::new(
                "Variable declaration needs a type or an initializer",
                self.span_from(start),
            ));
        }
        Ok(ValueSpec {
            names,
            ty,
            values,
            span: self.span_from(start),
        })
    }

    fn parse_type_spec(&mut self) -> Result<TypeSpec, SyntaxError> {
        let name = self.expect_identifier("Expected type name")?;
        let start = name.span.start;
        let type_params = if self.check(TokenKind::LBracket) && self.type_params_follow() {
            self.parse_type_params()?
        } else {
            Vec::new()
        };
        let alias = self.matches(TokenKind::Eq);
        let ty = self.parse_type()?;
        Ok(TypeSpec {
            name,
            type_params,
            alias,
            ty,
            span: self.span_from(start),
        })
    }

    /// Distinguishes `type L[T any] ...` from the array type in `type A [N]int`.
    fn type_params_follow(&self) -> bool {
        matches!(self.peek_kind_n(1), Some(TokenKind::Identifier(_)))
            && matches!(
                self.peek_kind_n(2),
                Some(
                    TokenKind::Identifier(_)
                        | TokenKind::Comma
                        | TokenKind::Interface
                        | TokenKind::Tilde
                        | TokenKind::Star
                        | TokenKind::LBracket
                        | TokenKind::Map
                        | TokenKind::Chan
                        | TokenKind::Func
                        | TokenKind::Struct
                )
            )
    }

    fn parse_type_params(&mut self) -> Result<Vec<Field>, SyntaxError> {
        self.expect(TokenKind::LBracket)?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBracket) && !self.is_eof() {
            let start = self.current_span_start();
            let mut names = vec![self.expect_identifier("Expected type parameter name")?];
            while self.matches(TokenKind::Comma) {
                names.push(self.expect_identifier("Expected type parameter name")?);
            }
            let ty = self.parse_constraint()?;
            fields.push(Field {
                names,
                ty,
                tag: None,
                span: self.span_from(start),
            });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        if fields.is_empty() {
            return Err(self.error_here("Empty type parameter list"));
        }
        Ok(fields)
    }

    fn parse_constraint(&mut self) -> Result<Type, SyntaxError> {
        let mut terms = Vec::new();
        loop {
            let tilde = self.matches(TokenKind::Tilde);
            let ty = self.parse_type()?;
            terms.push(UnionTerm { tilde, ty });
            if !self.matches(TokenKind::Pipe) {
                break;
            }
        }
        if terms.len() == 1 && !terms[0].tilde {
            return Ok(terms.remove(0).ty);
        }
        Ok(Type::Union(terms))
    }

    fn parse_signature(&mut self) -> Result<Signature, SyntaxError> {
        let params = self.parse_parameters(TokenKind::LParen, TokenKind::RParen)?;
        let results = if self.check(TokenKind::LParen) {
            self.parse_parameters(TokenKind::LParen, TokenKind::RParen)?
        } else if self.starts_type() {
            vec![Field::unnamed(self.parse_type()?)]
        } else {
            Vec::new()
        };
        Ok(Signature { params, results })
    }

    fn parse_parameters(
        &mut self,
        open: TokenKind,
        close: TokenKind,
    ) -> Result<Vec<Field>, SyntaxError> {
        self.expect(open)?;
        let mut entries = Vec::new();
        while !self.check(close.clone()) && !self.is_eof() {
            entries.push(self.parse_param_entry()?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        self.group_params(entries)
    }

    fn parse_param_entry(&mut self) -> Result<ParamEntry, SyntaxError> {
        let start = self.current_span_start();
        if let Some(TokenKind::Identifier(name)) = self.peek_kind() {
            let named = match self.peek_kind_n(1) {
                Some(TokenKind::Comma | TokenKind::RParen) => {
                    let span = self.advance().span;
                    return Ok(ParamEntry::Bare(Ident::new(name, span)));
                }
                Some(TokenKind::Dot) => false,
                Some(TokenKind::LBracket) => !self.bracket_closes_entry(self.pos + 1),
                _ => true,
            };
            if named {
                let ident = self.expect_identifier("Expected parameter name")?;
                let ty = self.parse_type()?;
                return Ok(ParamEntry::Named(ident, ty));
            }
        }
        let ty = self.parse_type()?;
        Ok(ParamEntry::Typed(ty, self.span_from(start)))
    }

    /// Whether the bracket group opening at `open` is followed by the end of
    /// a parameter entry, as in `List[int]`, rather than by an element type.
    fn bracket_closes_entry(&self, open: usize) -> bool {
        let mut depth = 0usize;
        for (index, token) in self.tokens.iter().enumerate().skip(open) {
            match token.kind {
                TokenKind::LBracket => depth += 1,
                TokenKind::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(index + 1).map(|t| &t.kind),
                            Some(TokenKind::Comma | TokenKind::RParen)
                        );
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
        }
        false
    }

    fn group_params(&self, entries: Vec<ParamEntry>) -> Result<Vec<Field>, SyntaxError> {
        let named = entries
            .iter()
            .any(|entry| matches!(entry, ParamEntry::Named(..)));

        if !named {
            return Ok(entries
                .into_iter()
                .map(|entry| match entry {
                    ParamEntry::Bare(ident) => Field {
                        span: ident.span,
                        names: Vec::new(),
                        ty: Type::named(ident.name),
                        tag: None,
                    },
                    ParamEntry::Typed(ty, span) => Field {
                        names: Vec::new(),
                        ty,
                        tag: None,
                        span,
                    },
                    ParamEntry::Named(ident, ty) => Field {
                        span: ident.span,
                        names: vec![ident],
                        ty,
                        tag: None,
                    },
                })
                .collect());
        }

        let mut fields = Vec::new();
        let mut pending: Vec<Ident> = Vec::new();
        for entry in entries {
            match entry {
                ParamEntry::Bare(ident) => pending.push(ident),
                ParamEntry::Named(ident, ty) => {
                    let start = pending.first().map(|p| p.span).unwrap_or(ident.span);
                    let span = start.union(ident.span);
                    pending.push(ident);
                    fields.push(Field {
                        names: std::mem::take(&mut pending),
                        ty,
                        tag: None,
                        span,
                    });
                }
                ParamEntry::Typed(_, span) => {
                    return Err(SyntaxError::new("Mixed named and unnamed parameters", span));
                }
            }
        }
        if let Some(last) = pending.last() {
            return Err(SyntaxError::new(
                "Missing type for parameter",
                last.span,
            ));
        }
        Ok(fields)
    }

    fn starts_type(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::Identifier(_)
                    | TokenKind::Star
                    | TokenKind::LBracket
                    | TokenKind::Map
                    | TokenKind::Chan
                    | TokenKind::Func
                    | TokenKind::Struct
                    | TokenKind::Interface
                    | TokenKind::Arrow
                    | TokenKind::LParen
            )
        )
    }

    fn parse_type(&mut self) -> Result<Type, SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::Identifier(first)) => {
                self.advance();
                let (pkg, name) = if self.matches(TokenKind::Dot) {
                    let name = self.expect_identifier("Expected type name after '.'")?;
                    (Some(first), name.name)
                } else {
                    (None, first)
                };
                let args = if self.check(TokenKind::LBracket)
                    && !matches!(self.peek_kind_n(1), Some(TokenKind::RBracket))
                {
                    self.parse_type_args()?
                } else {
                    Vec::new()
                };
                Ok(Type::Name { pkg, name, args })
            }
            Some(TokenKind::Star) => {
                self.advance();
                Ok(Type::Pointer(Box::new(self.parse_type()?)))
            }
            Some(TokenKind::LBracket) => {
                self.advance();
                if self.matches(TokenKind::RBracket) {
                    return Ok(Type::Slice(Box::new(self.parse_type()?)));
                }
                let len = if self.matches(TokenKind::Ellipsis) {
                    None
                } else {
                    let saved = self.suppress_composite;
                    self.suppress_composite = false;
                    let len = self.parse_expr();
                    self.suppress_composite = saved;
                    Some(Box::new(len?))
                };
                self.expect(TokenKind::RBracket)?;
                Ok(Type::Array {
                    len,
                    elem: Box::new(self.parse_type()?),
                })
            }
            Some(TokenKind::Map) => {
                self.advance();
                self.expect(TokenKind::LBracket)?;
                let key = self.parse_type()?;
                self.expect(TokenKind::RBracket)?;
                Ok(Type::Map {
                    key: Box::new(key),
                    value: Box::new(self.parse_type()?),
                })
            }
            Some(TokenKind::Chan) => {
                self.advance();
                let dir = if self.matches(TokenKind::Arrow) {
                    ChanDir::Send
                } else {
                    ChanDir::Both
                };
                Ok(Type::Chan {
                    dir,
                    elem: Box::new(self.parse_type()?),
                })
            }
            Some(TokenKind::Arrow) => {
                self.advance();
                self.expect(TokenKind::Chan)?;
                Ok(Type::Chan {
                    dir: ChanDir::Recv,
                    elem: Box::new(self.parse_type()?),
                })
            }
            Some(TokenKind::Func) => {
                self.advance();
                Ok(Type::Func(Box::new(self.parse_signature()?)))
            }
            Some(TokenKind::Struct) => {
                self.advance();
                self.parse_struct_fields().map(Type::Struct)
            }
            Some(TokenKind::Interface) => {
                self.advance();
                self.parse_interface_elems().map(Type::Interface)
            }
            Some(TokenKind::Ellipsis) => {
                self.advance();
                Ok(Type::Ellipsis(Box::new(self.parse_type()?)))
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let inner = self.parse_type()?;
                self.expect(TokenKind::RParen)?;
                Ok(Type::Paren(Box::new(inner)))
            }
            _ => Err(self.error_here("Expected type")),
        }
    }

    fn parse_type_args(&mut self) -> Result<Vec<Type>, SyntaxError> {
        self.expect(TokenKind::LBracket)?;
        let mut args = Vec::new();
        while !self.check(TokenKind::RBracket) && !self.is_eof() {
            args.push(self.parse_type()?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(args)
    }

    fn parse_struct_fields(&mut self) -> Result<Vec<Field>, SyntaxError> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            let start = self.current_span_start();
            let embedded = match (self.peek_kind(), self.peek_kind_n(1)) {
                (Some(TokenKind::Star), _) => true,
                (
                    Some(TokenKind::Identifier(_)),
                    Some(TokenKind::Dot | TokenKind::Semi | TokenKind::RBrace | TokenKind::String(_)),
                ) => true,
                _ => false,
            };
            let (names, ty) = if embedded {
                (Vec::new(), self.parse_type()?)
            } else {
                let mut names = vec![self.expect_identifier("Expected field name")?];
                while self.matches(TokenKind::Comma) {
                    names.push(self.expect_identifier("Expected field name after ','")?);
                }
                (names, self.parse_type()?)
            };
            let tag = match self.peek_kind() {
                Some(TokenKind::String(raw)) => {
                    self.advance();
                    Some(raw)
                }
                _ => None,
            };
            fields.push(Field {
                names,
                ty,
                tag,
                span: self.span_from(start),
            });
            if !self.check(TokenKind::RBrace) {
                self.expect(TokenKind::Semi)?;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(fields)
    }

    fn parse_interface_elems(&mut self) -> Result<Vec<InterfaceElem>, SyntaxError> {
        self.expect(TokenKind::LBrace)?;
        let mut elems = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            let is_method = matches!(self.peek_kind(), Some(TokenKind::Identifier(_)))
                && matches!(self.peek_kind_n(1), Some(TokenKind::LParen));
            if is_method {
                let name = self.expect_identifier("Expected method name")?;
                let sig = self.parse_signature()?;
                elems.push(InterfaceElem::Method { name, sig });
            } else {
                elems.push(InterfaceElem::Embedded(self.parse_constraint()?));
            }
            if !self.check(TokenKind::RBrace) {
                self.expect(TokenKind::Semi)?;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(elems)
    }

    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let start = self.expect(TokenKind::LBrace)?.span.start;
        let saved = self.suppress_composite;
        self.suppress_composite = false;
        let stmts = self.parse_stmt_list();
        self.suppress_composite = saved;
        let stmts = stmts?;
        self.expect(TokenKind::RBrace)?;
        Ok(Block {
            stmts,
            span: self.span_from(start),
        })
    }

    fn parse_stmt_list(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::RBrace | TokenKind::Case | TokenKind::Default | TokenKind::Eof)
                | None => break,
                Some(TokenKind::Semi) => {
                    self.advance();
                }
                _ => {
                    stmts.push(self.parse_stmt()?);
                    if !matches!(
                        self.peek_kind(),
                        Some(TokenKind::RBrace | TokenKind::Case | TokenKind::Default)
                    ) {
                        self.expect_terminator()?;
                    }
                }
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.current_span_start();
        match self.peek_kind() {
            Some(TokenKind::Var) => self.parse_gen_decl(GenKind::Var).map(Stmt::Decl),
            Some(TokenKind::Const) => self.parse_gen_decl(GenKind::Const).map(Stmt::Decl),
            Some(TokenKind::Type) => self.parse_gen_decl(GenKind::Type).map(Stmt::Decl),
            Some(TokenKind::Go) => {
                self.advance();
                let call = self.parse_expr()?;
                self.require_call(&call, "go")?;
                Ok(Stmt::Go {
                    call,
                    span: self.span_from(start),
                })
            }
            Some(TokenKind::Defer) => {
                self.advance();
                let call = self.parse_expr()?;
                self.require_call(&call, "defer")?;
                Ok(Stmt::Defer {
                    call,
                    span: self.span_from(start),
                })
            }
            Some(TokenKind::Return) => {
                self.advance();
                let results = if matches!(
                    self.peek_kind(),
                    Some(TokenKind::Semi | TokenKind::RBrace)
                ) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                Ok(Stmt::Return {
                    results,
                    span: self.span_from(start),
                })
            }
            Some(TokenKind::Break) => self.parse_branch(BranchKind::Break),
            Some(TokenKind::Continue) => self.parse_branch(BranchKind::Continue),
            Some(TokenKind::Goto) => self.parse_branch(BranchKind::Goto),
            Some(TokenKind::Fallthrough) => self.parse_branch(BranchKind::Fallthrough),
            Some(TokenKind::LBrace) => self.parse_block().map(Stmt::Block),
            Some(TokenKind::If) => self.parse_if().map(Stmt::If),
            Some(TokenKind::Switch) => self.parse_switch(),
            Some(TokenKind::Select) => self.parse_select().map(Stmt::Select),
            Some(TokenKind::For) => self.parse_for(),
            Some(TokenKind::Semi) => Ok(Stmt::Empty(Span::new(start, start))),
            Some(TokenKind::Identifier(name))
                if matches!(self.peek_kind_n(1), Some(TokenKind::Colon)) =>
            {
                let span = self.advance().span;
                self.advance();
                while self.matches(TokenKind::Semi) {}
                let stmt = if matches!(self.peek_kind(), Some(TokenKind::RBrace)) {
                    let here = self.current_span_start();
                    Stmt::Empty(Span::new(here, here))
                } else {
                    self.parse_stmt()?
                };
                Ok(Stmt::Labeled {
                    label: Ident::new(name, span),
                    stmt: Box::new(stmt),
                    span: self.span_from(start),
                })
            }
            _ => self.parse_simple_stmt(),
        }
    }

    fn require_call(&self, expr: &Expr, keyword: &str) -> Result<(), SyntaxError> {
        let mut inner = expr;
        while let Expr::Paren(paren, _) = inner {
            inner = paren;
        }
        if matches!(inner, Expr::Call { .. }) {
            Ok(())
        } else {
            Err(SyntaxError::new(
                format!("Expression in {keyword} must be a function call"),
                expr.span(),
            ))
        }
    }

    fn parse_branch(&mut self, kind: BranchKind) -> Result<Stmt, SyntaxError> {
        let start = self.current_span_start();
        self.advance();
        let label = match (kind, self.peek_kind()) {
            (BranchKind::Fallthrough, _) => None,
            (_, Some(TokenKind::Identifier(name))) => {
                let span = self.advance().span;
                Some(Ident::new(name, span))
            }
            (BranchKind::Goto, _) => return Err(self.error_here("Expected label after goto")),
            _ => None,
        };
        Ok(Stmt::Branch {
            kind,
            label,
            span: self.span_from(start),
        })
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let lhs = self.parse_expr_list()?;
        self.finish_simple_stmt(lhs)
    }

    fn finish_simple_stmt(&mut self, mut lhs: Vec<Expr>) -> Result<Stmt, SyntaxError> {
        let start = lhs[0].span();
        if let Some(op) = self.current_assign_op() {
            self.advance();
            let rhs = self.parse_expr_list()?;
            let span = start.union(self.previous_span());
            if op == AssignOp::Define {
                if let Some(bad) = lhs.iter().find(|expr| !matches!(expr, Expr::Ident(_))) {
                    return Err(SyntaxError::new(
                        "Non-name on left side of :=",
                        bad.span(),
                    ));
                }
            }
            if op != AssignOp::Define && op != AssignOp::Assign && (lhs.len() != 1 || rhs.len() != 1) {
                return Err(SyntaxError::new(
                    format!("Operator {} requires single-valued expressions", op.symbol()),
                    span,
                ));
            }
            return Ok(Stmt::Assign { lhs, op, rhs, span });
        }

        if lhs.len() > 1 {
            return Err(self.error_here("Expected assignment after expression list"));
        }
        let x = lhs.remove(0);
        match self.peek_kind() {
            Some(TokenKind::Arrow) => {
                self.advance();
                let value = self.parse_expr()?;
                Ok(Stmt::Send {
                    span: start.union(value.span()),
                    chan: x,
                    value,
                })
            }
            Some(TokenKind::PlusPlus | TokenKind::MinusMinus) => {
                let inc = self.check(TokenKind::PlusPlus);
                let end = self.advance().span;
                Ok(Stmt::IncDec {
                    x,
                    inc,
                    span: start.union(end),
                })
            }
            _ => Ok(Stmt::Expr(x)),
        }
    }

    fn current_assign_op(&self) -> Option<AssignOp> {
        Some(match self.peek_kind()? {
            TokenKind::ColonEq => AssignOp::Define,
            TokenKind::Eq => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::Add,
            TokenKind::MinusEq => AssignOp::Sub,
            TokenKind::StarEq => AssignOp::Mul,
            TokenKind::SlashEq => AssignOp::Quo,
            TokenKind::PercentEq => AssignOp::Rem,
            TokenKind::AmpersandEq => AssignOp::And,
            TokenKind::PipeEq => AssignOp::Or,
            TokenKind::CaretEq => AssignOp::Xor,
            TokenKind::ShlEq => AssignOp::Shl,
            TokenKind::ShrEq => AssignOp::Shr,
            TokenKind::AndNotEq => AssignOp::AndNot,
            _ => return None,
        })
    }

    /// Parses a control-clause header statement with composite literals of
    /// bare type names disabled.
    fn parse_header_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let saved = self.suppress_composite;
        self.suppress_composite = true;
        let stmt = self.parse_simple_stmt();
        self.suppress_composite = saved;
        stmt
    }

    fn parse_header_expr(&mut self) -> Result<Expr, SyntaxError> {
        let saved = self.suppress_composite;
        self.suppress_composite = true;
        let expr = self.parse_expr();
        self.suppress_composite = saved;
        expr
    }

    fn parse_if(&mut self) -> Result<IfStmt, SyntaxError> {
        let start = self.expect(TokenKind::If)?.span.start;
        if self.check(TokenKind::LBrace) {
            return Err(self.error_here("Missing condition in if statement"));
        }
        let (init, cond) = if self.check(TokenKind::Semi) {
            self.advance();
            (None, self.parse_header_expr()?)
        } else {
            let first = self.parse_header_stmt()?;
            if self.matches(TokenKind::Semi) {
                (Some(Box::new(first)), self.parse_header_expr()?)
            } else {
                (None, self.stmt_as_condition(first)?)
            }
        };
        let then = self.parse_block()?;
        let els = if self.matches(TokenKind::Else) {
            match self.peek_kind() {
                Some(TokenKind::If) => Some(Box::new(Stmt::If(self.parse_if()?))),
                Some(TokenKind::LBrace) => Some(Box::new(Stmt::Block(self.parse_block()?))),
                _ => return Err(self.error_here("Expected if statement or block after else")),
            }
        } else {
            None
        };
        Ok(IfStmt {
            init,
            cond,
            then,
            els,
            span: self.span_from(start),
        })
    }

    fn stmt_as_condition(&self, stmt: Stmt) -> Result<Expr, SyntaxError> {
        match stmt {
            Stmt::Expr(expr) => Ok(expr),
            other => Err(SyntaxError::new(
                "Expected boolean expression, found statement",
                other.span(),
            )),
        }
    }

    fn parse_switch(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.expect(TokenKind::Switch)?.span.start;
        let mut init = None;
        let mut header = None;
        if !self.check(TokenKind::LBrace) {
            let first = if self.check(TokenKind::Semi) {
                None
            } else {
                Some(self.parse_header_stmt()?)
            };
            if self.matches(TokenKind::Semi) {
                init = first.map(Box::new);
                if !self.check(TokenKind::LBrace) {
                    header = Some(self.parse_header_stmt()?);
                }
            } else {
                header = first;
            }
        }

        let type_switch = match header.take() {
            Some(Stmt::Assign {
                lhs,
                op: AssignOp::Define,
                mut rhs,
                span,
            }) if lhs.len() == 1 && rhs.len() == 1 && is_type_guard(&rhs[0]) => {
                let Some(binding) = lhs[0].as_ident().cloned() else {
                    return Err(SyntaxError::new("Expected identifier in type switch", span));
                };
                Some((Some(binding), rhs.remove(0)))
            }
            Some(Stmt::Expr(expr)) if is_type_guard(&expr) => Some((None, expr)),
            other => {
                header = other;
                None
            }
        };

        if let Some((binding, guard)) = type_switch {
            let subject = match guard {
                Expr::TypeAssert { x, .. } => *x,
                other => other,
            };
            let clauses = self.parse_case_clauses(true)?;
            return Ok(Stmt::TypeSwitch(TypeSwitchStmt {
                init,
                binding,
                subject,
                clauses,
                span: self.span_from(start),
            }));
        }

        let tag = match header {
            Some(stmt) => Some(self.stmt_as_condition(stmt)?),
            None => None,
        };
        let clauses = self.parse_case_clauses(false)?;
        Ok(Stmt::Switch(SwitchStmt {
            init,
            tag,
            clauses,
            span: self.span_from(start),
        }))
    }

    fn parse_case_clauses(&mut self, types: bool) -> Result<Vec<CaseClause>, SyntaxError> {
        self.expect(TokenKind::LBrace)?;
        let mut clauses = Vec::new();
        let mut seen_default = false;
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            let start = self.current_span_start();
            let list = if self.matches(TokenKind::Default) {
                if seen_default {
                    return Err(SyntaxError::new(
                        "Multiple defaults in switch",
                        self.previous_span(),
                    ));
                }
                seen_default = true;
                None
            } else {
                self.expect(TokenKind::Case)?;
                let mut list = Vec::new();
                loop {
                    if types {
                        let ty_start = self.current_span_start();
                        let ty = self.parse_type()?;
                        list.push(Expr::Type(Box::new(ty), self.span_from(ty_start)));
                    } else {
                        list.push(self.parse_expr()?);
                    }
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                Some(list)
            };
            self.expect(TokenKind::Colon)?;
            let body = self.parse_stmt_list()?;
            clauses.push(CaseClause {
                list,
                body,
                span: self.span_from(start),
            });
        }
        self.expect(TokenKind::RBrace)?;
        Ok(clauses)
    }

    fn parse_select(&mut self) -> Result<SelectStmt, SyntaxError> {
        let start = self.expect(TokenKind::Select)?.span.start;
        self.expect(TokenKind::LBrace)?;
        let mut clauses = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            let clause_start = self.current_span_start();
            let comm = if self.matches(TokenKind::Default) {
                None
            } else {
                self.expect(TokenKind::Case)?;
                let stmt = self.parse_simple_stmt()?;
                if !is_comm_stmt(&stmt) {
                    return Err(SyntaxError::new(
                        "Select case must be a send or receive",
                        stmt.span(),
                    ));
                }
                Some(Box::new(stmt))
            };
            self.expect(TokenKind::Colon)?;
            let body = self.parse_stmt_list()?;
            clauses.push(CommClause {
                comm,
                body,
                span: self.span_from(clause_start),
            });
        }
        self.expect(TokenKind::RBrace)?;
        Ok(SelectStmt {
            clauses,
            span: self.span_from(start),
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.expect(TokenKind::For)?.span.start;
        let saved = self.suppress_composite;
        self.suppress_composite = true;
        let header = self.parse_for_header();
        self.suppress_composite = saved;

        match header? {
            ForHeader::Range {
                key,
                value,
                define,
                expr,
            } => {
                let body = self.parse_block()?;
                Ok(Stmt::Range(RangeStmt {
                    key,
                    value,
                    define,
                    expr,
                    body,
                    span: self.span_from(start),
                }))
            }
            ForHeader::Loop { init, cond, post } => {
                let body = self.parse_block()?;
                Ok(Stmt::For(ForStmt {
                    init,
                    cond,
                    post,
                    body,
                    span: self.span_from(start),
                }))
            }
        }
    }

    fn parse_for_header(&mut self) -> Result<ForHeader, SyntaxError> {
        if self.check(TokenKind::LBrace) {
            return Ok(ForHeader::Loop {
                init: None,
                cond: None,
                post: None,
            });
        }
        if self.matches(TokenKind::Range) {
            return Ok(ForHeader::Range {
                key: None,
                value: None,
                define: false,
                expr: self.parse_expr()?,
            });
        }

        let first = if self.check(TokenKind::Semi) {
            None
        } else {
            let mut lhs = self.parse_expr_list()?;
            let define = self.check(TokenKind::ColonEq);
            if (define || self.check(TokenKind::Eq))
                && matches!(self.peek_kind_n(1), Some(TokenKind::Range))
            {
                self.advance();
                self.advance();
                if lhs.len() > 2 {
                    return Err(SyntaxError::new(
                        "Range clause permits at most two iteration variables",
                        lhs[2].span(),
                    ));
                }
                let value = if lhs.len() == 2 { lhs.pop() } else { None };
                let key = lhs.pop();
                return Ok(ForHeader::Range {
                    key,
                    value,
                    define,
                    expr: self.parse_expr()?,
                });
            }
            Some(self.finish_simple_stmt(lhs)?)
        };

        if !self.matches(TokenKind::Semi) {
            let cond = match first {
                Some(stmt) => Some(self.stmt_as_condition(stmt)?),
                None => None,
            };
            return Ok(ForHeader::Loop {
                init: None,
                cond,
                post: None,
            });
        }

        let cond = if self.check(TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::Semi)?;
        let post = if self.check(TokenKind::LBrace) {
            None
        } else {
            Some(Box::new(self.parse_simple_stmt()?))
        };
        Ok(ForHeader::Loop {
            init: first.map(Box::new),
            cond,
            post,
        })
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.matches(TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.current_binary_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_binary(prec + 1)?;
            let span = left.span().union(right.span());
            left = Expr::Binary {
                op,
                x: Box::new(left),
                y: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn current_binary_op(&self) -> Option<BinaryOp> {
        Some(match self.peek_kind()? {
            TokenKind::PipePipe => BinaryOp::LOr,
            TokenKind::AmpersandAmpersand => BinaryOp::LAnd,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::BangEq => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::LtEq => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::GtEq => BinaryOp::Ge,
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Pipe => BinaryOp::Or,
            TokenKind::Caret => BinaryOp::Xor,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Quo,
            TokenKind::Percent => BinaryOp::Rem,
            TokenKind::Shl => BinaryOp::Shl,
            TokenKind::Shr => BinaryOp::Shr,
            TokenKind::Ampersand => BinaryOp::And,
            TokenKind::AndNot => BinaryOp::AndNot,
            _ => return None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.current_span_start();
        let op = match self.peek_kind() {
            Some(TokenKind::Plus) => UnaryOp::Plus,
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Bang) => UnaryOp::Not,
            Some(TokenKind::Caret) => UnaryOp::Xor,
            Some(TokenKind::Ampersand) => UnaryOp::Addr,
            Some(TokenKind::Arrow) => {
                if matches!(self.peek_kind_n(1), Some(TokenKind::Chan)) {
                    let ty = self.parse_type()?;
                    return self.parse_postfix(Expr::Type(Box::new(ty), self.span_from(start)));
                }
                UnaryOp::Recv
            }
            Some(TokenKind::Star) => {
                self.advance();
                let x = self.parse_unary()?;
                return Ok(Expr::Star {
                    span: self.span_from(start),
                    x: Box::new(x),
                });
            }
            _ => return self.parse_primary(),
        };
        self.advance();
        let x = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            span: self.span_from(start),
            x: Box::new(x),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let operand = self.parse_operand()?;
        self.parse_postfix(operand)
    }

    fn parse_operand(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.current_span_start();
        match self.peek_kind() {
            Some(TokenKind::Identifier(name)) => {
                let span = self.advance().span;
                Ok(Expr::Ident(Ident::new(name, span)))
            }
            Some(TokenKind::Int(raw)) => Ok(self.literal(LitKind::Int, raw)),
            Some(TokenKind::Float(raw)) => Ok(self.literal(LitKind::Float, raw)),
            Some(TokenKind::Imag(raw)) => Ok(self.literal(LitKind::Imag, raw)),
            Some(TokenKind::Char(raw)) => Ok(self.literal(LitKind::Char, raw)),
            Some(TokenKind::String(raw)) => Ok(self.literal(LitKind::String, raw)),
            Some(TokenKind::LParen) => {
                self.advance();
                let saved = self.suppress_composite;
                self.suppress_composite = false;
                let inner = self.parse_expr();
                self.suppress_composite = saved;
                let inner = inner?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(inner), self.span_from(start)))
            }
            Some(TokenKind::Func) => {
                self.advance();
                let sig = self.parse_signature()?;
                if self.check(TokenKind::LBrace) {
                    let body = self.parse_block()?;
                    Ok(Expr::FuncLit(FuncLit {
                        sig,
                        body,
                        span: self.span_from(start),
                    }))
                } else {
                    Ok(Expr::Type(
                        Box::new(Type::Func(Box::new(sig))),
                        self.span_from(start),
                    ))
                }
            }
            Some(
                TokenKind::LBracket
                | TokenKind::Map
                | TokenKind::Chan
                | TokenKind::Struct
                | TokenKind::Interface,
            ) => {
                let ty = self.parse_type()?;
                Ok(Expr::Type(Box::new(ty), self.span_from(start)))
            }
            _ => Err(self.error_here("Expected expression")),
        }
    }

    fn literal(&mut self, kind: LitKind, raw: String) -> Expr {
        let span = self.advance().span;
        Expr::Lit(BasicLit { kind, raw, span })
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, SyntaxError> {
        loop {
            let start = expr.span();
            match self.peek_kind() {
                Some(TokenKind::Dot) => {
                    self.advance();
                    if self.matches(TokenKind::LParen) {
                        let ty = if self.matches(TokenKind::Type) {
                            None
                        } else {
                            Some(Box::new(self.parse_type()?))
                        };
                        self.expect(TokenKind::RParen)?;
                        expr = Expr::TypeAssert {
                            x: Box::new(expr),
                            ty,
                            span: start.union(self.previous_span()),
                        };
                    } else {
                        let sel = self.expect_identifier("Expected selector after '.'")?;
                        expr = Expr::Selector {
                            span: start.union(sel.span),
                            x: Box::new(expr),
                            sel,
                        };
                    }
                }
                Some(TokenKind::LBracket) => {
                    self.advance();
                    let saved = self.suppress_composite;
                    self.suppress_composite = false;
                    let result = self.parse_index_or_slice(expr);
                    self.suppress_composite = saved;
                    expr = result?;
                }
                Some(TokenKind::LParen) => {
                    self.advance();
                    let saved = self.suppress_composite;
                    self.suppress_composite = false;
                    let result = self.parse_call_args();
                    self.suppress_composite = saved;
                    let (args, ellipsis) = result?;
                    expr = Expr::Call {
                        fun: Box::new(expr),
                        args,
                        ellipsis,
                        span: start.union(self.previous_span()),
                    };
                }
                Some(TokenKind::LBrace) if self.composite_allowed(&expr) => {
                    let (elts, end) = self.parse_composite_body()?;
                    expr = Expr::Composite(CompositeLit {
                        ty: Some(Box::new(expr)),
                        elts,
                        span: start.union(end),
                    });
                }
                _ => return Ok(expr),
            }
        }
    }

    fn composite_allowed(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Type(ty, _) => !matches!(**ty, Type::Func(_) | Type::Chan { .. }),
            Expr::Ident(_) => !self.suppress_composite,
            Expr::Selector { x, .. } => {
                !self.suppress_composite && matches!(x.as_ref(), Expr::Ident(_))
            }
            Expr::Index { x, .. } => {
                !self.suppress_composite
                    && matches!(x.as_ref(), Expr::Ident(_) | Expr::Selector { .. })
            }
            _ => false,
        }
    }

    fn parse_index_or_slice(&mut self, x: Expr) -> Result<Expr, SyntaxError> {
        let start = x.span();
        let low = if self.check(TokenKind::Colon) {
            None
        } else {
            Some(self.parse_expr()?)
        };

        if self.matches(TokenKind::Colon) {
            let high = if self.check(TokenKind::Colon) || self.check(TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            let mut slice3 = false;
            let mut max = None;
            if self.matches(TokenKind::Colon) {
                slice3 = true;
                if high.is_none() {
                    return Err(self.error_here("Middle index required in 3-index slice"));
                }
                max = Some(Box::new(self.parse_expr()?));
            }
            self.expect(TokenKind::RBracket)?;
            return Ok(Expr::Slice {
                x: Box::new(x),
                low: low.map(Box::new),
                high,
                max,
                slice3,
                span: start.union(self.previous_span()),
            });
        }

        let mut indices = match low {
            Some(index) => vec![index],
            None => return Err(self.error_here("Expected index expression")),
        };
        while self.matches(TokenKind::Comma) {
            if self.check(TokenKind::RBracket) {
                break;
            }
            indices.push(self.parse_expr()?);
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::Index {
            x: Box::new(x),
            indices,
            span: start.union(self.previous_span()),
        })
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, bool), SyntaxError> {
        let mut args = Vec::new();
        let mut ellipsis = false;
        while !self.check(TokenKind::RParen) && !self.is_eof() {
            args.push(self.parse_expr()?);
            if self.matches(TokenKind::Ellipsis) {
                ellipsis = true;
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok((args, ellipsis))
    }

    fn parse_composite_body(&mut self) -> Result<(Vec<Expr>, Span), SyntaxError> {
        self.expect(TokenKind::LBrace)?;
        let saved = self.suppress_composite;
        self.suppress_composite = false;
        let elts = self.parse_composite_elements();
        self.suppress_composite = saved;
        let elts = elts?;
        let end = self.expect(TokenKind::RBrace)?.span;
        Ok((elts, end))
    }

    fn parse_composite_elements(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut elts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            let element = self.parse_element()?;
            let element = if self.matches(TokenKind::Colon) {
                let value = self.parse_element()?;
                Expr::KeyValue {
                    span: element.span().union(value.span()),
                    key: Box::new(element),
                    value: Box::new(value),
                }
            } else {
                element
            };
            elts.push(element);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        Ok(elts)
    }

    fn parse_element(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(TokenKind::LBrace) {
            let start = self.current_span_start();
            let (elts, end) = self.parse_composite_body()?;
            return Ok(Expr::Composite(CompositeLit {
                ty: None,
                elts,
                span: Span::new(start, end.end),
            }));
        }
        self.parse_expr()
    }

    fn expect_identifier(&mut self, msg: &str) -> Result<Ident, SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::Identifier(name)) => {
                let span = self.advance().span;
                Ok(Ident::new(name, span))
            }
            _ => Err(self.error_here(msg)),
        }
    }

    fn expect_string_literal(&mut self, msg: &str) -> Result<String, SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::String(raw)) => {
                self.advance();
                Ok(raw)
            }
            _ => Err(self.error_here(msg)),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token, SyntaxError> {
        if self.check(kind.clone()) {
            Ok(self.advance())
        } else {
            let found = self
                .peek_kind()
                .map(|found| found.describe())
                .unwrap_or_else(|| "end of file".into());
            Err(self
                .error_here(&format!("Expected {}, found {found}", kind.describe()))
                .with_label(format!("expected {}", kind.describe())))
        }
    }

    /// A declaration or statement ends at `;`, a newline, or before a
    /// closing `)` or `}`.
    fn expect_terminator(&mut self) -> Result<(), SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::Semi) => {
                self.advance();
                Ok(())
            }
            Some(TokenKind::RParen | TokenKind::RBrace | TokenKind::Eof) | None => Ok(()),
            Some(found) => Err(self
                .error_here(&format!(
                    "Unexpected {} at end of statement",
                    found.describe()
                ))
                .with_help("statements are separated by newlines or ';'")),
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        matches!(self.tokens.get(self.pos), Some(token) if token.kind == kind)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind.clone())
    }

    fn peek_kind_n(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + n).map(|t| t.kind.clone())
    }

    fn advance(&mut self) -> &Token {
        let index = self.pos.min(self.tokens.len().saturating_sub(1));
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[index]
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Eof) | None)
    }

    fn current_span_start(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.span.start)
            .unwrap_or_else(|| self.tokens.last().map(|t| t.span.end).unwrap_or(0))
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            Span::new(0, 0)
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    /// Every comment not yet consumed that ends before `offset`.
    fn take_comments(&mut self, offset: usize) -> Vec<Comment> {
        let first = self.next_comment;
        while self
            .comments
            .get(self.next_comment)
            .is_some_and(|comment| comment.span.end <= offset)
        {
            self.next_comment += 1;
        }
        self.comments[first..self.next_comment].to_vec()
    }

    /// The run of comments directly above `offset`, with no blank line
    /// inside it or between it and `offset`. Earlier comments are dropped.
    fn leading_group(&mut self, offset: usize) -> Vec<Comment> {
        let mut comments = self.take_comments(offset);
        let mut next = offset;
        let mut keep = comments.len();
        while keep > 0 {
            let span = comments[keep - 1].span;
            let gap = self.source.get(span.end..next).unwrap_or("");
            let line_start = self.source[..span.start].rfind('\n').map_or(0, |i| i + 1);
            let own_line = self.source[line_start..span.start].trim().is_empty();
            if !own_line || gap.matches('\n').count() > 1 || !gap.trim().is_empty() {
                break;
            }
            keep -= 1;
            next = comments[keep].span.start;
        }
        comments.drain(..keep);
        comments
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.previous_span().end.max(start))
    }

    fn error_here(&self, message: &str) -> SyntaxError {
        let span = self
            .tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or_else(|| {
                self.tokens
                    .last()
                    .map(|t| t.span)
                    .unwrap_or_else(|| Span::new(0, 0))
            });
        SyntaxError::new(message.to_string(), span)
    }

    fn report(&mut self, err: SyntaxError) {
        self.errors.push(err);
    }

    /// Skips to the next top-level `func`, `type` or `import` that starts a line.
    fn synchronize_decl(&mut self) {
        if !self.is_eof() {
            self.advance();
        }
        while !self.is_eof() {
            let after_semi = matches!(
                self.pos.checked_sub(1).map(|prev| &self.tokens[prev].kind),
                Some(TokenKind::Semi)
            );
            if after_semi
                && matches!(
                    self.peek_kind(),
                    Some(TokenKind::Func | TokenKind::Type | TokenKind::Import)
                )
            {
                return;
            }
            self.advance();
        }
    }
}

enum ForHeader {
    Range {
        key: Option<Expr>,
        value: Option<Expr>,
        define: bool,
        expr: Expr,
    },
    Loop {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
    },
}

fn is_type_guard(expr: &Expr) -> bool {
    matches!(expr, Expr::TypeAssert { ty: None, .. })
}

fn is_comm_stmt(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Send { .. } => true,
        Stmt::Expr(expr) => is_receive(expr),
        Stmt::Assign { op, rhs, .. } => {
            matches!(op, AssignOp::Define | AssignOp::Assign)
                && rhs.len() == 1
                && is_receive(&rhs[0])
        }
        _ => false,
    }
}

fn is_receive(expr: &Expr) -> bool {
    match expr {
        Expr::Unary {
            op: UnaryOp::Recv, ..
        } => true,
        Expr::Paren(inner, _) => is_receive(inner),
        _ => false,
    }
}

/// Strips the quotes from an interpreted or raw string literal.
pub fn unquote(raw: &str) -> String {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('`').and_then(|s| s.strip_suffix('`')))
        .unwrap_or(raw);
    inner.replace("\\\"", "\"").replace("\\\\", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> File {
        match parse_file(source) {
            Ok(file) => file,
            Err(errors) => panic!(
                "parse failed: {:?}",
                errors
                    .errors
                    .iter()
                    .map(|err| err.message.clone())
                    .collect::<Vec<_>>()
            ),
        }
    }

    fn body_of<'a>(file: &'a File, name: &str) -> &'a [Stmt] {
        let func = file
            .functions()
            .find(|func| func.name.name == name)
            .expect("function");
        &func.body.as_ref().expect("body").stmts
    }

    #[test]
    fn parses_package_and_imports() {
        let file = parse(
            "package main\n\nimport (\n\t\"fmt\"\n\tj \"encoding/json\"\n\t_ \"embed\"\n)\nimport \"os\"\n",
        );
        assert_eq!(file.package.name, "main");
        let paths: Vec<_> = file.imports.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["fmt", "encoding/json", "embed", "os"]);
        assert_eq!(file.imports[1].alias.as_deref(), Some("j"));
        assert_eq!(file.imports[2].local_name(), "_");
    }

    #[test]
    fn groups_parameter_names() {
        let file = parse("package p\nfunc f(a, b int, c chan string, opts ...string) (int, error) { return 0, nil }\n");
        let func = file.functions().next().unwrap();
        assert_eq!(func.sig.params.len(), 3);
        assert_eq!(func.sig.params[0].names.len(), 2);
        assert!(func.sig.params[1].ty.chan_elem().is_some());
        assert!(matches!(func.sig.params[2].ty, Type::Ellipsis(_)));
        assert_eq!(func.sig.results.len(), 2);
        assert!(func.sig.results[0].names.is_empty());
    }

    #[test]
    fn unnamed_parameters_stay_types() {
        let file = parse("package p\nfunc f(int, string) {}\n");
        let func = file.functions().next().unwrap();
        assert!(func.sig.params.iter().all(|p| p.names.is_empty()));
        assert!(func.sig.params[0].ty.is_named("int"));
    }

    #[test]
    fn distinguishes_generic_type_from_array_parameter() {
        let file = parse("package p\nfunc f(List[int], []byte) {}\nfunc g(a [4]int, xs []byte) {}\n");
        let f = file.functions().next().unwrap();
        assert!(f.sig.params[0].names.is_empty());
        assert!(matches!(&f.sig.params[0].ty, Type::Name { args, .. } if args.len() == 1));
        let g = file.functions().nth(1).unwrap();
        assert_eq!(g.sig.params[0].names[0].name, "a");
        assert!(matches!(g.sig.params[0].ty, Type::Array { .. }));
        assert!(g.sig.params[1].ty.is_byte_slice());
        assert!(parse_file("package p\nfunc h(a [4]int, List[int]) {}\n").is_err());
    }

    #[test]
    fn parses_generic_function() {
        let file = parse("package p\nfunc Map[T any, U comparable](xs []T, f func(T) U) []U { return nil }\n");
        let func = file.functions().next().unwrap();
        assert_eq!(func.type_params.len(), 2);
        assert_eq!(func.sig.params.len(), 2);
    }

    #[test]
    fn parses_go_statement_and_send() {
        let file = parse(
            "package main\nfunc worker(x int, out chan int) {\n\tout <- x * 2\n}\nfunc main() {\n\tc := make(chan int)\n\tgo worker(3, c)\n\tfmt.Println(<-c)\n}\n",
        );
        let worker = body_of(&file, "worker");
        assert!(matches!(worker[0], Stmt::Send { .. }));
        let main = body_of(&file, "main");
        assert!(matches!(main[1], Stmt::Go { .. }));
        if let Stmt::Assign { rhs, .. } = &main[0] {
            if let Expr::Call { args, .. } = &rhs[0] {
                assert!(matches!(args[0], Expr::Type(_, _)));
            } else {
                panic!("expected make call");
            }
        } else {
            panic!("expected assignment");
        }
    }

    #[test]
    fn composite_literal_is_not_taken_from_if_header() {
        let file = parse(
            "package p\ntype T struct{ A int }\nfunc f(x T) {\n\tif x == (T{A: 1}) {\n\t}\n\tfor _, v := range []int{1, 2} {\n\t\t_ = v\n\t}\n\ty := T{A: 2}\n\t_ = y\n}\n",
        );
        let body = body_of(&file, "f");
        assert!(matches!(body[0], Stmt::If(_)));
        assert!(matches!(body[1], Stmt::Range(_)));
        assert!(matches!(&body[2], Stmt::Assign { rhs, .. } if matches!(rhs[0], Expr::Composite(_))));
    }

    #[test]
    fn parses_type_switch_with_binding() {
        let file = parse(
            "package p\nfunc f(v any) {\n\tswitch t := v.(type) {\n\tcase int, string:\n\t\t_ = t\n\tcase nil:\n\tdefault:\n\t}\n}\n",
        );
        let body = body_of(&file, "f");
        match &body[0] {
            Stmt::TypeSwitch(stmt) => {
                assert_eq!(stmt.binding.as_ref().unwrap().name, "t");
                assert_eq!(stmt.clauses.len(), 3);
                assert!(stmt.clauses[2].list.is_none());
            }
            other => panic!("expected type switch, got {other:?}"),
        }
    }

    #[test]
    fn parses_select_clauses() {
        let file = parse(
            "package p\nfunc f(a, b chan int) {\n\tselect {\n\tcase v := <-a:\n\t\t_ = v\n\tcase b <- 1:\n\tdefault:\n\t}\n}\n",
        );
        match &body_of(&file, "f")[0] {
            Stmt::Select(select) => {
                assert_eq!(select.clauses.len(), 3);
                assert!(matches!(
                    select.clauses[1].comm.as_deref(),
                    Some(Stmt::Send { .. })
                ));
            }
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn parses_loops() {
        let file = parse(
            "package p\nfunc f(ch chan int) {\n\tfor i := 0; i < 3; i++ {\n\t}\n\tfor {\n\t\tbreak\n\t}\n\tfor v := range ch {\n\t\t_ = v\n\t}\n\tfor range ch {\n\t}\n}\n",
        );
        let body = body_of(&file, "f");
        assert!(matches!(&body[0], Stmt::For(f) if f.init.is_some() && f.post.is_some()));
        assert!(matches!(&body[1], Stmt::For(f) if f.cond.is_none()));
        assert!(matches!(&body[2], Stmt::Range(r) if r.define && r.key.is_some()));
        assert!(matches!(&body[3], Stmt::Range(r) if r.key.is_none()));
    }

    #[test]
    fn parses_struct_tags_and_embedding() {
        let file = parse(
            "package p\ntype T struct {\n\tsync.Mutex\n\tName string `json:\"name\"`\n\tA, B int\n}\n",
        );
        let Decl::Gen(decl) = &file.decls[0] else {
            panic!("expected type decl");
        };
        let Spec::Type(spec) = &decl.specs[0] else {
            panic!("expected type spec");
        };
        let Type::Struct(fields) = &spec.ty else {
            panic!("expected struct");
        };
        assert!(fields[0].names.is_empty());
        assert_eq!(fields[1].tag.as_deref(), Some("`json:\"name\"`"));
        assert_eq!(fields[2].names.len(), 2);
    }

    #[test]
    fn reports_syntax_errors_with_spans() {
        let errors = parse_file("package main\nfunc main() {\n\tx := \n}\n").unwrap_err();
        assert!(!errors.errors.is_empty());
        assert!(errors.errors[0].message.contains("Expected expression"));
    }

    #[test]
    fn go_requires_call() {
        let errors = parse_file("package main\nfunc main() {\n\tgo x\n}\n").unwrap_err();
        assert!(errors.errors[0].message.contains("must be a function call"));
    }

    #[test]
    fn recovers_and_reports_multiple_declarations() {
        let errors = parse_file("package main\nfunc a() { ) }\nfunc b() { ( }\n").unwrap_err();
        assert_eq!(errors.errors.len(), 2);
    }
}
