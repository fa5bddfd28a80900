//! Turns an extracted function into a standalone program that runs the
//! function once per inbound request and reports its channel values back to
//! the controller.

use super::{
    analyzer::{data_param_name, endpoint_name},
    globals::dependencies,
    scope::{declared_names, gen_decl_names},
    sends::check_single_send,
    template::{fresh_name, go_string, parse_decls, render_type},
};
use crate::{
    config::Config,
    error::{KompileError, KompileResult},
    language::{
        ast::*,
        fold::{self, Fold},
        imports::reconcile_imports,
        printer::print_file,
        span::Span,
        visit::{walk_block, walk_expr, walk_stmt, Visitor},
    },
    program::{FunctionSymbol, ParamKind, Program},
};
use std::collections::HashMap;
use tracing::{debug, info};

pub const SERVICE_RUNTIME: &str = include_str!("embeds/service_runtime.go");
pub const CALLBACK_HELPER: &str = "kompileCallback";
/// Posts an `error` as its message so the controller can rebuild it.
pub const ERROR_CALLBACK_HELPER: &str = "kompileCallbackError";

/// Port every generated service listens on.
pub const SERVICE_PORT: u16 = 8080;

#[derive(Clone, Debug, PartialEq)]
pub struct EntryParam {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallbackChannel {
    pub function: String,
    pub param: String,
    pub elem: Type,
    pub endpoint: String,
}

/// How the data arguments of one run travel in the trigger request.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Empty,
    /// A single `[]byte` argument, sent as the raw body.
    Bytes,
    /// A single `string` argument, sent as the raw body.
    Text,
    /// Every argument as one JSON object.
    Json(Vec<PayloadField>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PayloadField {
    pub param: String,
    /// Exported Go field name in the service's request struct.
    pub field: String,
    pub ty: Type,
}

impl Payload {
    pub fn for_params(params: &[EntryParam]) -> Self {
        match params {
            [] => Payload::Empty,
            [param] if param.ty.is_byte_slice() => Payload::Bytes,
            [param] if param.ty.is_named("string") => Payload::Text,
            params => {
                let mut fields: Vec<PayloadField> = Vec::new();
                for param in params {
                    let base = exported(&param.name);
                    let field = fresh_name(&base, &|name| fields.iter().any(|f| f.field == name));
                    fields.push(PayloadField {
                        param: param.name.clone(),
                        field,
                        ty: param.ty.clone(),
                    });
                }
                Payload::Json(fields)
            }
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::Empty | Payload::Bytes => "application/octet-stream",
            Payload::Text => "text/plain; charset=utf-8",
            Payload::Json(_) => "application/json",
        }
    }
}

fn exported(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() => first.to_uppercase().chain(chars).collect(),
        _ => format!("P{name}"),
    }
}

#[derive(Clone, Debug)]
pub struct ServiceArtifact {
    /// Name of the extracted function, which also names the service.
    pub name: String,
    pub params: Vec<EntryParam>,
    pub payload: Payload,
    pub callbacks: Vec<CallbackChannel>,
    pub file: File,
    pub source: String,
}

/// Parameters the service entry point keeps, in declaration order.
pub fn entry_params(symbol: &FunctionSymbol) -> Vec<EntryParam> {
    symbol
        .params
        .iter()
        .enumerate()
        .filter(|(_, param)| !param.is_channel())
        .map(|(position, param)| EntryParam {
            name: data_param_name(param.name.as_deref(), position),
            ty: param.ty.clone(),
        })
        .collect()
}

pub fn synthesize(
    program: &Program,
    symbol: &FunctionSymbol,
    config: &Config,
) -> KompileResult<ServiceArtifact> {
    let name = symbol.name.clone();
    let Some(body) = symbol.decl.body.clone() else {
        return Err(KompileError::Build {
            artifact: name,
            message: "function has no body".into(),
        });
    };

    let callbacks: Vec<CallbackChannel> = symbol
        .params
        .iter()
        .filter_map(|param| match (&param.name, &param.kind) {
            (Some(param_name), ParamKind::CallbackChannel { elem }) => {
                Some(CallbackChannel {
                    function: name.clone(),
                    param: param_name.clone(),
                    elem: elem.clone(),
                    endpoint: endpoint_name(&name, param_name),
                })
            }
            _ => None,
        })
        .collect();
    let channels: Vec<String> = callbacks.iter().map(|c| c.param.clone()).collect();

    let body = ReturnStripper {
        arity: result_arity(&symbol.decl.sig),
    }
    .fold_block(body);
    check_channel_uses(&name, &body, &channels)?;
    check_single_send(&body, &channels).map_err(|extra| KompileError::TooManySends {
        function: name.clone(),
        channel: extra.channel,
        span: extra.span,
    })?;

    let urls = callbacks
        .iter()
        .map(|c| {
            let url = format!("{}/{}", config.controller_url(), c.endpoint);
            let helper = if c.elem.is_named("error") {
                ERROR_CALLBACK_HELPER
            } else {
                CALLBACK_HELPER
            };
            (c.param.clone(), (url, helper))
        })
        .collect();
    let mut body = CallbackRewriter { urls }.fold_block(body);
    body.stmts.splice(0..0, named_result_decls(&symbol.decl.sig));

    let params = entry_params(symbol);
    let function = FuncDecl {
        recv: None,
        name: symbol.decl.name.clone(),
        type_params: Vec::new(),
        sig: Signature {
            params: params
                .iter()
                .map(|param| Field::named(&param.name, param.ty.clone()))
                .collect(),
            results: Vec::new(),
        },
        body: Some(body),
        directives: symbol.decl.directives.clone(),
        span: symbol.decl.span,
    };

    let mut decls =
        dependencies(&program.file, &function).map_err(|global| KompileError::GlobalStateReference {
            function: name.clone(),
            name: global.name,
            span: global.span,
        })?;
    debug!(service = %name, copied = decls.len(), "collected package-level dependencies");

    let payload = Payload::for_params(&params);
    let taken = |candidate: &str| {
        candidate == name || decls.iter().any(|decl| declares(decl, candidate))
    };
    let handler = fresh_name("kompileHandler", &taken);
    let request = fresh_name("kompileRequest", &taken);
    let entry = entry_source(&name, &handler, &request, &payload)?;

    decls.push(Decl::Func(function));
    decls.extend(parse_decls(&name, &entry)?);

    let mut file = File {
        build_constraints: program.file.build_constraints.clone(),
        package: Ident::synthetic("main"),
        imports: program.file.imports.clone(),
        decls,
    };
    reconcile_imports(&mut file, &["encoding/json", "io", "log", "net/http"]);
    let source = print_file(&file).map_err(|error| KompileError::Print {
        artifact: name.clone(),
        error,
    })?;
    info!(service = %name, callbacks = callbacks.len(), "synthesized service");

    Ok(ServiceArtifact {
        name,
        params,
        payload,
        callbacks,
        file,
        source,
    })
}

fn declares(decl: &Decl, name: &str) -> bool {
    match decl {
        Decl::Func(func) => func.recv.is_none() && func.name.name == name,
        Decl::Gen(gen) => gen_decl_names(gen).contains(&name),
    }
}

/// Named results become locals so assignments to them keep compiling once
/// the results are gone.
fn named_result_decls(sig: &Signature) -> Vec<Stmt> {
    let named: Vec<&Field> = sig
        .results
        .iter()
        .filter(|field| field.names.iter().any(|name| !name.is_blank()))
        .collect();
    let decls = named.iter().map(|field| {
        Stmt::Decl(GenDecl {
            kind: GenKind::Var,
            specs: vec![Spec::Value(ValueSpec {
                names: field.names.clone(),
                ty: Some(field.ty.clone()),
                values: Vec::new(),
                span: Span::synthetic(),
            })],
            grouped: false,
            directives: Vec::new(),
            span: Span::synthetic(),
        })
    });
    let uses = named
        .iter()
        .flat_map(|field| field.names.iter().filter(|name| !name.is_blank()))
        .map(|name| Stmt::Assign {
            lhs: vec![Expr::Ident(Ident::synthetic("_"))],
            op: AssignOp::Assign,
            rhs: vec![Expr::Ident(Ident::synthetic(name.name.clone()))],
            span: Span::synthetic(),
        });
    decls.chain(uses).collect()
}

/// Source of the request handler and `main` for a service.
fn entry_source(
    function: &str,
    handler: &str,
    request: &str,
    payload: &Payload,
) -> KompileResult<String> {
    let mut out = String::new();
    let (decode, args) = match payload {
        Payload::Empty => (String::new(), String::new()),
        Payload::Bytes | Payload::Text => {
            let arg = if matches!(payload, Payload::Text) {
                "string(body)"
            } else {
                "body"
            };
            let decode = "\tbody, err := io.ReadAll(r.Body)\n\
                          \tif err != nil {\n\
                          \t\thttp.Error(w, \"could not read request body\", http.StatusBadRequest)\n\
                          \t\treturn\n\
                          \t}\n"
                .to_string();
            (decode, arg.to_string())
        }
        Payload::Json(fields) => {
            out.push_str(&format!("type {request} struct {{\n"));
            for field in fields {
                let ty = render_type(function, &field.ty)?;
                out.push_str(&format!(
                    "\t{} {} `json:\"{}\"`\n",
                    field.field, ty, field.param
                ));
            }
            out.push_str("}\n\n");
            let decode = format!(
                "\tvar request {request}\n\
                 \tif err := json.NewDecoder(r.Body).Decode(&request); err != nil {{\n\
                 \t\thttp.Error(w, \"could not decode request: \"+err.Error(), http.StatusBadRequest)\n\
                 \t\treturn\n\
                 \t}}\n"
            );
            let args = fields
                .iter()
                .map(|field| format!("request.{}", field.field))
                .collect::<Vec<_>>()
                .join(", ");
            (decode, args)
        }
    };

    out.push_str(&format!(
        "func {handler}(w http.ResponseWriter, r *http.Request) {{\n\
         \tif r.Method != http.MethodPost {{\n\
         \t\thttp.Error(w, \"only POST is supported\", http.StatusMethodNotAllowed)\n\
         \t\treturn\n\
         \t}}\n\
         {decode}\
         \tgo {function}({args})\n\
         \tw.WriteHeader(http.StatusAccepted)\n\
         }}\n\n"
    ));
    out.push_str(&format!(
        "func main() {{\n\
         \thttp.HandleFunc(\"/\", {handler})\n\
         \tlog.Printf(\"serving {function} on :{SERVICE_PORT}\")\n\
         \tlog.Fatal(http.ListenAndServe(\":{SERVICE_PORT}\", nil))\n\
         }}\n"
    ));
    Ok(out)
}

/// Drops `return` statements everywhere except inside function literals,
/// whose returns belong to the literal. Returned values are still evaluated
/// and discarded, so locals that were only returned stay used.
struct ReturnStripper {
    arity: usize,
}

impl Fold for ReturnStripper {
    fn fold_stmt(&mut self, stmt: Stmt) -> Vec<Stmt> {
        match stmt {
            Stmt::Return { results, span } => {
                let spread = results.len() == 1 && self.arity > 1;
                let rhs: Vec<Expr> = results
                    .into_iter()
                    .filter(|expr| !matches!(expr.as_ident(), Some(ident) if ident.name == "nil"))
                    .collect();
                if rhs.is_empty() {
                    return Vec::new();
                }
                let width = if spread { self.arity } else { rhs.len() };
                let lhs = (0..width)
                    .map(|_| Expr::Ident(Ident::synthetic("_")))
                    .collect();
                vec![Stmt::Assign {
                    lhs,
                    op: AssignOp::Assign,
                    rhs,
                    span,
                }]
            }
            stmt => vec![fold::walk_stmt(self, stmt)],
        }
    }

    fn fold_func_lit(&mut self, lit: FuncLit) -> FuncLit {
        lit
    }
}

fn result_arity(sig: &Signature) -> usize {
    sig.results.iter().map(|field| field.names.len().max(1)).sum()
}

/// Replaces sends on callback channels with callback posts and drops
/// `close` calls on them.
struct CallbackRewriter {
    /// Callback URL and posting helper per channel parameter.
    urls: HashMap<String, (String, &'static str)>,
}

impl CallbackRewriter {
    fn channel<'e>(&self, expr: &'e Expr) -> Option<&'e Ident> {
        expr.as_ident().filter(|ident| self.urls.contains_key(&ident.name))
    }
}

impl Fold for CallbackRewriter {
    fn fold_stmt(&mut self, stmt: Stmt) -> Vec<Stmt> {
        match stmt {
            Stmt::Send { chan, value, span } => match self.channel(&chan).map(|c| c.name.clone()) {
                Some(channel) => {
                    let (url, helper) = self.urls[&channel].clone();
                    let call = Expr::Call {
                        fun: Box::new(Expr::Ident(Ident::new(helper, span))),
                        args: vec![
                            Expr::Lit(BasicLit {
                                kind: LitKind::String,
                                raw: go_string(&url),
                                span: Span::synthetic(),
                            }),
                            self.fold_expr(value),
                        ],
                        ellipsis: false,
                        span,
                    };
                    vec![Stmt::Expr(call)]
                }
                None => vec![fold::walk_stmt(self, Stmt::Send { chan, value, span })],
            },
            Stmt::Expr(expr) if close_target(&expr).is_some_and(|c| self.urls.contains_key(c)) => {
                Vec::new()
            }
            stmt => vec![fold::walk_stmt(self, stmt)],
        }
    }
}

fn close_target(expr: &Expr) -> Option<&str> {
    let Expr::Call { fun, args, .. } = expr else {
        return None;
    };
    match (fun.as_ident(), args.as_slice()) {
        (Some(fun), [arg]) if fun.name == "close" => arg.as_ident().map(|a| a.name.as_str()),
        _ => None,
    }
}

fn check_channel_uses(function: &str, body: &Block, channels: &[String]) -> KompileResult<()> {
    let mut checker = ChannelUses {
        channels,
        error: None,
    };
    walk_block(&mut checker, body);
    match checker.error {
        Some((channel, reason, span)) => Err(KompileError::UnsupportedChannelUse {
            function: function.to_string(),
            channel,
            reason,
            span,
        }),
        None => Ok(()),
    }
}

struct ChannelUses<'c> {
    channels: &'c [String],
    error: Option<(String, String, Span)>,
}

impl<'c> ChannelUses<'c> {
    fn fail(&mut self, channel: &str, reason: &str, span: Span) {
        if self.error.is_none() {
            self.error = Some((channel.to_string(), reason.to_string(), span));
        }
    }

    fn is_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|channel| channel == name)
    }

    fn tracked<'e>(&self, expr: &'e Expr) -> Option<&'e Ident> {
        expr.as_ident().filter(|ident| self.is_channel(&ident.name))
    }

    fn check_shadowing<'n>(&mut self, names: impl IntoIterator<Item = &'n str>, span: Span) {
        for name in names {
            if self.is_channel(name) {
                self.fail(name, "it is redeclared inside the function", span);
            }
        }
    }
}

impl<'c, 'ast> Visitor<'ast> for ChannelUses<'c> {
    fn visit_stmt(&mut self, stmt: &'ast Stmt) {
        self.check_shadowing(declared_names(stmt), stmt.span());
        match stmt {
            Stmt::Range(range) if range.define => {
                let names = range.key.iter().chain(&range.value).filter_map(|e| e.as_ident());
                self.check_shadowing(names.map(|i| i.name.as_str()), range.span);
            }
            Stmt::TypeSwitch(switch) => {
                if let Some(binding) = &switch.binding {
                    self.check_shadowing([binding.name.as_str()], binding.span);
                }
            }
            Stmt::Send { chan, value, .. } if self.tracked(chan).is_some() => {
                self.visit_expr(value);
                return;
            }
            Stmt::Expr(expr) if close_target(expr).is_some_and(|c| self.is_channel(c)) => return,
            Stmt::Select(select) => {
                for clause in &select.clauses {
                    if let Some(Stmt::Send { chan, .. }) = clause.comm.as_deref() {
                        if let Some(ident) = self.tracked(chan) {
                            self.fail(&ident.name, "it is sent on inside a select case", ident.span);
                        }
                    }
                }
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'ast Expr) {
        if let Expr::Ident(ident) = expr {
            if self.is_channel(&ident.name) {
                self.fail(&ident.name, "it is used other than as a send target", ident.span);
            }
            return;
        }
        walk_expr(self, expr);
    }

    fn visit_func_lit(&mut self, lit: &'ast FuncLit) {
        let names: Vec<&str> = lit
            .sig
            .params
            .iter()
            .chain(&lit.sig.results)
            .flat_map(|field| field.names.iter().map(|n| n.name.as_str()))
            .collect();
        self.check_shadowing(names, lit.span);
        walk_block(self, &lit.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::load;
    use std::path::Path;

    fn synth(source: &str, function: &str) -> KompileResult<ServiceArtifact> {
        let program = load(Path::new("main.go"), source).unwrap();
        let symbol = program.symbols.get(function).unwrap().clone();
        synthesize(&program, &symbol, &Config::default())
    }

    const RESIZE: &str = r#"package main

import (
	"fmt"
	"log"
	"strings"
)

func resize(data []byte, result chan<- string) {
	if len(data) == 0 {
		log.Println("empty input")
		return
	}
	id := strings.ToUpper(fmt.Sprint(len(data)))
	result <- id
	log.Println("done")
}

func main() {
	ch := make(chan string)
	go resize([]byte("abc"), ch)
	fmt.Println(<-ch)
}
"#;

    #[test]
    fn entry_keeps_data_parameters_and_posts_callbacks() {
        let service = synth(RESIZE, "resize").unwrap();
        assert_eq!(service.payload, Payload::Bytes);
        assert_eq!(service.callbacks[0].endpoint, "resize_result");
        assert!(service.source.contains("func resize(data []byte) {"));
        assert!(service
            .source
            .contains("kompileCallback(\"http://kompile-controller:8080/resize_result\", id)"));
        assert!(!service.source.contains("result <-"));
        assert!(!service.source.contains("return\n\t}\n\tid"));
        assert!(service.source.contains("go resize(body)"));
        assert!(service.source.contains("http.ListenAndServe(\":8080\", nil)"));
        assert!(!service.source.contains("func main() {\n\tch :="));
    }

    #[test]
    fn imports_follow_use() {
        let service = synth(RESIZE, "resize").unwrap();
        let paths: Vec<_> = service.file.imports.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["fmt", "io", "log", "net/http", "strings"]);
    }

    #[test]
    fn multiple_parameters_travel_as_json() {
        let service = synth(
            "package main\nfunc scale(name string, factor int, _ bool, out chan float64) {\n\tout <- float64(factor)\n}\nfunc main() {}\n",
            "scale",
        )
        .unwrap();
        let Payload::Json(fields) = &service.payload else {
            panic!("expected json payload");
        };
        let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["Name", "Factor", "Arg2"]);
        assert!(service.source.contains("Factor int `json:\"factor\"`"));
        assert!(service.source.contains("go scale(request.Name, request.Factor, request.Arg2)"));
        assert!(service.source.contains("\"encoding/json\""));
    }

    #[test]
    fn rejects_second_send_on_one_path() {
        let err = synth(
            "package main\nfunc f(out chan int) {\n\tout <- 1\n\tout <- 2\n}\nfunc main() {}\n",
            "f",
        )
        .unwrap_err();
        assert!(matches!(err, KompileError::TooManySends { ref channel, .. } if channel == "out"));
    }

    #[test]
    fn stripped_early_returns_can_merge_paths() {
        let err = synth(
            "package main\nfunc f(ok bool, out chan int) {\n\tif !ok {\n\t\tout <- 0\n\t\treturn\n\t}\n\tout <- 1\n}\nfunc main() {}\n",
            "f",
        )
        .unwrap_err();
        assert!(matches!(err, KompileError::TooManySends { .. }));
    }

    #[test]
    fn rejects_other_channel_uses() {
        let err = synth(
            "package main\nfunc relay(c chan int) {}\nfunc f(out chan int) {\n\trelay(out)\n}\nfunc main() {}\n",
            "f",
        )
        .unwrap_err();
        assert!(matches!(err, KompileError::UnsupportedChannelUse { .. }));

        let err = synth(
            "package main\nfunc f(out chan int) {\n\tselect {\n\tcase out <- 1:\n\tdefault:\n\t}\n}\nfunc main() {}\n",
            "f",
        )
        .unwrap_err();
        assert!(err.to_string().contains("select"));
    }

    #[test]
    fn close_is_dropped_and_literals_are_rewritten() {
        let service = synth(
            "package main\nfunc f(out chan int) {\n\tdefer close(out)\n\tfunc() {\n\t\tout <- 1\n\t}()\n}\nfunc main() {}\n",
            "f",
        );
        // `defer close(out)` is a use outside a plain statement.
        assert!(service.is_err());

        let service = synth(
            "package main\nfunc f(out chan int) {\n\tfunc() {\n\t\tout <- 1\n\t}()\n\tclose(out)\n}\nfunc main() {}\n",
            "f",
        )
        .unwrap();
        assert!(service.source.contains("\t\tkompileCallback("));
        assert!(!service.source.contains("close("));
    }

    #[test]
    fn named_results_become_locals() {
        let service = synth(
            "package main\nfunc f(out chan int) (n int, err error) {\n\tn = 2\n\tout <- n\n\treturn n, nil\n}\nfunc main() {}\n",
            "f",
        )
        .unwrap();
        assert!(service
            .source
            .contains("func f() {\n\tvar n int\n\tvar err error\n\t_ = n\n\t_ = err\n\tn = 2\n"));
        assert!(service.source.contains("\t_ = n\n}"));
    }

    #[test]
    fn error_channels_post_the_message() {
        let service = synth(
            "package main\nimport \"errors\"\nfunc f(n int, out chan int, failed chan error) {\n\tif n < 0 {\n\t\tfailed <- errors.New(\"negative\")\n\t} else {\n\t\tfailed <- nil\n\t}\n\tout <- n\n}\nfunc main() {}\n",
            "f",
        )
        .unwrap();
        let source = &service.source;
        assert!(source.contains(
            "\t\tkompileCallbackError(\"http://kompile-controller:8080/f_failed\", errors.New(\"negative\"))\n"
        ));
        assert!(source.contains("\t\tkompileCallbackError(\"http://kompile-controller:8080/f_failed\", nil)\n"));
        assert!(source.contains("\tkompileCallback(\"http://kompile-controller:8080/f_out\", n)\n"));
        assert!(SERVICE_RUNTIME.contains("func kompileCallbackError(url string, err error) {"));
    }

    #[test]
    fn package_variables_are_rejected() {
        let err = synth(
            "package main\nvar prefix = \"job-\"\nfunc f(out chan string) {\n\tout <- prefix\n}\nfunc main() {}\n",
            "f",
        )
        .unwrap_err();
        assert!(matches!(err, KompileError::GlobalStateReference { ref name, .. } if name == "prefix"));
    }
}
