//! Rewrites the input program into the controller: launches become remote
//! dispatches, and the channels they fed are replaced by routing slots that
//! generated HTTP handlers fill when a service calls back.

use super::{
    analyzer::{Analysis, ChannelBinding, LaunchSite},
    scope::{
        declared_names, is_channel_decl, is_make_chan, opens_scope, value_spec_declares_channel,
    },
    service::{Payload, ServiceArtifact},
    template::{fresh_name, go_string, parse_decls, parse_stmts, render_expr, render_type},
};
use crate::{
    error::{KompileError, KompileResult},
    language::{
        ast::*,
        fold::{self, Fold},
        imports::reconcile_imports,
        printer::print_file,
        span::Span,
        visit::{walk_decl, walk_expr, Visitor},
    },
    program::Program,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

pub const CONTROLLER_RUNTIME: &str = include_str!("embeds/controller_runtime.go");
pub const ROUTES_VAR: &str = "kompileRoutes";
const ARTIFACT: &str = "controller";

/// One callback endpoint served by the controller.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub endpoint: String,
    pub elem: Type,
    pub handler: String,
}

#[derive(Clone, Debug)]
pub struct ControllerArtifact {
    pub file: File,
    pub source: String,
    pub routes: Vec<Route>,
    /// Services the controller dispatches to, in order of first dispatch.
    pub services: Vec<String>,
}

pub fn rewrite(
    program: &Program,
    analysis: &Analysis,
    services: &[ServiceArtifact],
) -> KompileResult<ControllerArtifact> {
    let payloads: HashMap<&str, &Payload> = services
        .iter()
        .map(|service| (service.name.as_str(), &service.payload))
        .collect();
    let mut rewriter = CallSiteRewriter {
        analysis,
        payloads,
        results: Vec::new(),
        bindings: Vec::new(),
        dispatched: Vec::new(),
        error: None,
    };

    let mut decls = Vec::with_capacity(program.file.decls.len());
    for decl in program.file.decls.iter().cloned() {
        match decl {
            Decl::Func(mut func) => {
                if let Some(body) = func.body.take() {
                    let has_results = !func.sig.results.is_empty();
                    func.body = Some(rewriter.function_body(body, has_results));
                }
                decls.push(Decl::Func(func));
            }
            Decl::Gen(gen) => decls.push(Decl::Gen(fold::walk_gen_decl(&mut rewriter, gen))),
        }
    }
    if let Some(error) = rewriter.error {
        return Err(error);
    }

    let mut routes: BTreeMap<String, Type> = BTreeMap::new();
    for site in &analysis.sites {
        for channel in &site.channels {
            routes
                .entry(channel.endpoint.clone())
                .or_insert_with(|| channel.elem.clone());
        }
    }

    let extracted: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
    let mut file = File {
        build_constraints: program.file.build_constraints.clone(),
        package: program.file.package.clone(),
        imports: program.file.imports.clone(),
        decls,
    };
    remove_unreferenced(&mut file, &extracted);

    let routes = if routes.is_empty() {
        Vec::new()
    } else {
        let routes = name_handlers(&file, routes);
        file.decls.extend(routing_decls(&routes)?);
        routes
    };
    reconcile_imports(
        &mut file,
        &["bytes", "encoding/json", "errors", "log", "net/http", "strings"],
    );
    let source = print_file(&file).map_err(|error| KompileError::Print {
        artifact: ARTIFACT.into(),
        error,
    })?;
    info!(
        dispatches = rewriter.dispatched.len(),
        routes = routes.len(),
        "rewrote controller"
    );

    let mut dispatched = Vec::new();
    for service in rewriter.dispatched {
        if !dispatched.contains(&service) {
            dispatched.push(service);
        }
    }
    Ok(ControllerArtifact {
        file,
        source,
        routes,
        services: dispatched,
    })
}

/// Replaces launch statements and, once a function body is done, the uses
/// of the channels its launches were given.
struct CallSiteRewriter<'a> {
    analysis: &'a Analysis,
    payloads: HashMap<&'a str, &'a Payload>,
    /// Whether each enclosing function has results, innermost last.
    results: Vec<bool>,
    /// Channel bindings of launches rewritten in each enclosing function.
    bindings: Vec<Vec<ChannelBinding>>,
    dispatched: Vec<String>,
    error: Option<KompileError>,
}

impl<'a> CallSiteRewriter<'a> {
    fn function_body(&mut self, body: Block, has_results: bool) -> Block {
        self.results.push(has_results);
        self.bindings.push(Vec::new());
        let body = self.fold_block(body);
        let bindings = self.bindings.pop().unwrap_or_default();
        self.results.pop();
        if bindings.is_empty() {
            return body;
        }
        UseSiteRewriter::new(&bindings).fold_block(body)
    }

    fn dispatch(&mut self, site: &LaunchSite) -> KompileResult<Vec<Stmt>> {
        let service = &site.callee;
        let payload = self
            .payloads
            .get(service.as_str())
            .copied()
            .ok_or_else(|| KompileError::Build {
                artifact: service.clone(),
                message: "launch refers to a service that was not synthesized".into(),
            })?;
        let call = match payload {
            Payload::Json(fields) => {
                let mut entries = Vec::new();
                for (field, arg) in fields.iter().zip(&site.data_args) {
                    let value = render_expr(service, &arg.arg)?;
                    entries.push(format!("{}: {value}", go_string(&field.param)));
                }
                format!(
                    "kompileDispatchJSON({}, map[string]any{{{}}})",
                    go_string(service),
                    entries.join(", ")
                )
            }
            payload => {
                let reader = match (payload, site.data_args.first()) {
                    (Payload::Bytes, Some(arg)) => {
                        format!("bytes.NewReader({})", render_expr(service, &arg.arg)?)
                    }
                    (Payload::Text, Some(arg)) => {
                        format!("strings.NewReader({})", render_expr(service, &arg.arg)?)
                    }
                    _ => "http.NoBody".to_string(),
                };
                format!(
                    "kompileDispatch({}, {}, {reader})",
                    go_string(service),
                    go_string(payload.content_type())
                )
            }
        };
        let failure = if self.results.last().copied().unwrap_or(false) {
            "\tpanic(err)".to_string()
        } else {
            format!(
                "\tlog.Printf({}, err)\n\treturn",
                go_string(&format!("kompile: dispatch to {service} failed: %v"))
            )
        };
        let source = format!("if err := {call}; err != nil {{\n{failure}\n}}");
        parse_stmts(service, &source)
    }
}

impl<'a> Fold for CallSiteRewriter<'a> {
    fn fold_stmt(&mut self, stmt: Stmt) -> Vec<Stmt> {
        let analysis = self.analysis;
        let site = match &stmt {
            Stmt::Go { span, .. } => analysis.site_at(*span),
            _ => None,
        };
        let Some(site) = site else {
            return vec![fold::walk_stmt(self, stmt)];
        };
        let span = site.span;
        match self.dispatch(site) {
            Ok(stmts) => {
                debug!(service = %site.callee, offset = span.start, "replaced launch with dispatch");
                self.dispatched.push(site.callee.clone());
                if let Some(bindings) = self.bindings.last_mut() {
                    bindings.extend(site.channels.iter().cloned());
                }
                stmts
            }
            Err(error) => {
                self.error.get_or_insert(error);
                vec![stmt]
            }
        }
    }

    fn fold_func_lit(&mut self, lit: FuncLit) -> FuncLit {
        let has_results = !lit.sig.results.is_empty();
        FuncLit {
            body: self.function_body(lit.body, has_results),
            sig: lit.sig,
            span: lit.span,
        }
    }
}

/// `kompileRoutes["<endpoint>"].(chan T)`
pub fn route_slot(endpoint: &str, elem: &Type, span: Span) -> Expr {
    Expr::TypeAssert {
        x: Box::new(Expr::Index {
            x: Box::new(Expr::Ident(Ident::new(ROUTES_VAR, span))),
            indices: vec![Expr::Lit(BasicLit {
                kind: LitKind::String,
                raw: go_string(endpoint),
                span: Span::synthetic(),
            })],
            span,
        }),
        ty: Some(Box::new(Type::Chan {
            dir: ChanDir::Both,
            elem: Box::new(elem.clone()),
        })),
        span,
    }
}

/// Deletes the declarations of launch channels and points every use that
/// resolves to one of them at the channel's routing slot.
struct UseSiteRewriter {
    /// Routes keyed by the span of the channel declaration they replace.
    decls: HashMap<Span, Vec<(String, Slot)>>,
    /// Names that may refer to a route.
    names: HashSet<String>,
    /// What each of `names` resolves to in each open scope; `None` when a
    /// declaration not fed to a launch hides the route.
    frames: Vec<HashMap<String, Option<Slot>>>,
}

/// Endpoint and element type of a routed channel.
type Slot = (String, Type);

impl UseSiteRewriter {
    fn new(bindings: &[ChannelBinding]) -> Self {
        let mut decls: HashMap<Span, Vec<(String, Slot)>> = HashMap::new();
        for binding in bindings {
            decls.entry(binding.decl).or_default().push((
                binding.arg.clone(),
                (binding.endpoint.clone(), binding.elem.clone()),
            ));
        }
        Self {
            decls,
            names: bindings.iter().map(|b| b.arg.clone()).collect(),
            frames: vec![HashMap::new()],
        }
    }

    fn resolve(&self, name: &str) -> Option<&Slot> {
        if !self.names.contains(name) {
            return None;
        }
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .and_then(Option::as_ref)
    }

    fn bind(&mut self, name: &str, route: Option<Slot>) {
        if self.names.contains(name) {
            if let Some(frame) = self.frames.last_mut() {
                frame.insert(name.to_string(), route);
            }
        }
    }

    fn shadow_implicit(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Range(range) if range.define => {
                let names: Vec<String> = range
                    .key
                    .iter()
                    .chain(&range.value)
                    .filter_map(|expr| expr.as_ident().map(|i| i.name.clone()))
                    .collect();
                for name in names {
                    self.bind(&name, None);
                }
            }
            Stmt::TypeSwitch(switch) => {
                if let Some(binding) = &switch.binding {
                    let name = binding.name.clone();
                    self.bind(&name, None);
                }
            }
            _ => {}
        }
    }

    /// Channels `stmt` removes: those whose launch declaration it is, and
    /// re-allocations `name = make(chan T)` of a routed name.
    fn doomed(&self, stmt: &Stmt) -> Vec<(String, Slot)> {
        let declared = self
            .decls
            .get(&stmt.span())
            .into_iter()
            .flatten()
            .filter(|(name, _)| is_channel_decl(stmt, name))
            .cloned();
        let reassigned = match stmt {
            Stmt::Assign {
                lhs,
                op: AssignOp::Assign,
                rhs,
                ..
            } if lhs.len() == rhs.len() => lhs
                .iter()
                .zip(rhs)
                .filter(|(_, value)| is_make_chan(value))
                .filter_map(|(target, _)| {
                    let name = &target.as_ident()?.name;
                    let route = self.resolve(name)?;
                    Some((name.clone(), route.clone()))
                })
                .collect(),
            _ => Vec::new(),
        };
        declared.chain(reassigned).collect()
    }

    /// Removes the declarations of `doomed` from `stmt`; `None` when
    /// nothing of the statement is left.
    fn strip_channel_decls(stmt: Stmt, doomed: &HashSet<&str>) -> Option<Stmt> {
        match stmt {
            Stmt::Assign {
                lhs,
                op: op @ (AssignOp::Define | AssignOp::Assign),
                rhs,
                span,
            } if lhs.len() == rhs.len() => {
                let (lhs, rhs): (Vec<Expr>, Vec<Expr>) = lhs
                    .into_iter()
                    .zip(rhs)
                    .filter(|(target, value)| {
                        !(target.as_ident().is_some_and(|i| doomed.contains(i.name.as_str()))
                            && is_make_chan(value))
                    })
                    .unzip();
                (!lhs.is_empty()).then_some(Stmt::Assign { lhs, op, rhs, span })
            }
            Stmt::Decl(decl) if decl.kind == GenKind::Var => {
                let specs: Vec<Spec> = decl
                    .specs
                    .into_iter()
                    .filter_map(|spec| match spec {
                        Spec::Value(spec) => strip_value_spec(spec, doomed).map(Spec::Value),
                        other => Some(other),
                    })
                    .collect();
                (!specs.is_empty()).then_some(Stmt::Decl(GenDecl { specs, ..decl }))
            }
            other => Some(other),
        }
    }
}

fn strip_value_spec(mut spec: ValueSpec, doomed: &HashSet<&str>) -> Option<ValueSpec> {
    let removed: Vec<String> = spec
        .names
        .iter()
        .filter(|ident| {
            doomed.contains(ident.name.as_str()) && value_spec_declares_channel(&spec, &ident.name)
        })
        .map(|ident| ident.name.clone())
        .collect();
    if removed.is_empty() {
        return Some(spec);
    }
    let has_values = !spec.values.is_empty();
    let mut values = std::mem::take(&mut spec.values).into_iter();
    let mut names = Vec::new();
    let mut kept_values = Vec::new();
    for ident in std::mem::take(&mut spec.names) {
        let value = if has_values { values.next() } else { None };
        if removed.contains(&ident.name) {
            continue;
        }
        names.push(ident);
        kept_values.extend(value);
    }
    if names.is_empty() {
        return None;
    }
    spec.names = names;
    spec.values = kept_values;
    Some(spec)
}

impl Fold for UseSiteRewriter {
    fn fold_stmt(&mut self, stmt: Stmt) -> Vec<Stmt> {
        let doomed = self.doomed(&stmt);
        let stmt = if doomed.is_empty() {
            Some(stmt)
        } else {
            let names: HashSet<&str> = doomed.iter().map(|(name, _)| name.as_str()).collect();
            Self::strip_channel_decls(stmt, &names)
        };
        let Some(stmt) = stmt else {
            for (name, route) in doomed {
                self.bind(&name, Some(route));
            }
            return Vec::new();
        };
        let declared: Vec<String> = declared_names(&stmt).into_iter().map(String::from).collect();
        let scoped = opens_scope(&stmt);
        if scoped {
            self.frames.push(HashMap::new());
            self.shadow_implicit(&stmt);
        }
        let folded = match stmt {
            // New names on the left of `:=` are declarations, not uses.
            Stmt::Assign {
                lhs,
                op: AssignOp::Define,
                rhs,
                span,
            } => Stmt::Assign {
                lhs,
                op: AssignOp::Define,
                rhs: rhs.into_iter().map(|e| self.fold_expr(e)).collect(),
                span,
            },
            Stmt::Range(range) if range.define => Stmt::Range(RangeStmt {
                expr: self.fold_expr(range.expr),
                body: self.fold_block(range.body),
                key: range.key,
                value: range.value,
                define: true,
                span: range.span,
            }),
            other => fold::walk_stmt(self, other),
        };
        if scoped {
            self.frames.pop();
        }
        for name in &declared {
            self.bind(name, None);
        }
        for (name, route) in doomed {
            self.bind(&name, Some(route));
        }
        vec![folded]
    }

    fn fold_expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Ident(ident) => match self.resolve(&ident.name) {
                Some((endpoint, elem)) => route_slot(endpoint, elem, ident.span),
                None => Expr::Ident(ident),
            },
            expr => fold::walk_expr(self, expr),
        }
    }

    fn fold_func_lit(&mut self, lit: FuncLit) -> FuncLit {
        self.frames.push(HashMap::new());
        let names: Vec<String> = lit
            .sig
            .params
            .iter()
            .chain(&lit.sig.results)
            .flat_map(|field| field.names.iter().map(|n| n.name.clone()))
            .collect();
        for name in names {
            self.bind(&name, None);
        }
        let lit = fold::walk_func_lit(self, lit);
        self.frames.pop();
        lit
    }
}

/// Drops extracted functions that nothing in the rewritten program mentions
/// any more.
fn remove_unreferenced(file: &mut File, extracted: &HashSet<&str>) {
    let mut names = IdentNames::default();
    for decl in &file.decls {
        walk_decl(&mut names, decl);
    }
    file.decls.retain(|decl| match decl {
        Decl::Func(func) if func.recv.is_none() && extracted.contains(func.name.name.as_str()) => {
            let keep = names.names.contains(&func.name.name);
            if !keep {
                debug!(function = %func.name.name, "removing extracted function from controller");
            }
            keep
        }
        _ => true,
    });
}

#[derive(Default)]
struct IdentNames {
    names: BTreeSet<String>,
}

impl<'ast> Visitor<'ast> for IdentNames {
    fn visit_expr(&mut self, expr: &'ast Expr) {
        if let Expr::Ident(ident) = expr {
            self.names.insert(ident.name.clone());
        }
        walk_expr(self, expr);
    }
}

fn name_handlers(file: &File, routes: BTreeMap<String, Type>) -> Vec<Route> {
    let mut taken: HashSet<String> = file
        .decls
        .iter()
        .flat_map(|decl| match decl {
            Decl::Func(func) if func.recv.is_none() => vec![func.name.name.clone()],
            Decl::Func(_) => Vec::new(),
            Decl::Gen(gen) => super::scope::gen_decl_names(gen)
                .into_iter()
                .map(String::from)
                .collect(),
        })
        .collect();
    routes
        .into_iter()
        .map(|(endpoint, elem)| {
            let handler = fresh_name(&format!("{endpoint}Handler"), &|name| taken.contains(name));
            taken.insert(handler.clone());
            Route {
                endpoint,
                elem,
                handler,
            }
        })
        .collect()
}

fn routing_decls(routes: &[Route]) -> KompileResult<Vec<Decl>> {
    let mut source = format!("var {ROUTES_VAR} = map[string]any{{\n");
    for route in routes {
        let elem = render_type(ARTIFACT, &route.elem)?;
        source.push_str(&format!(
            "\t{}: make(chan {elem}, 1),\n",
            go_string(&route.endpoint)
        ));
    }
    source.push_str("}\n\n");

    for route in routes {
        let elem = render_type(ARTIFACT, &route.elem)?;
        let slot = go_string(&route.endpoint);
        // An error arrives as its message, or null when it was nil.
        let (decoded, rebuild) = if route.elem.is_named("error") {
            (
                "message",
                "\tvar value error\n\
                 \tif message != nil {\n\
                 \t\tvalue = errors.New(*message)\n\
                 \t}\n"
                    .to_string(),
            )
        } else {
            ("value", String::new())
        };
        let declared = if rebuild.is_empty() {
            format!("var value {elem}")
        } else {
            "var message *string".to_string()
        };
        source.push_str(&format!(
            "func {handler}(w http.ResponseWriter, r *http.Request) {{\n\
             \t{declared}\n\
             \tif err := json.NewDecoder(r.Body).Decode(&{decoded}); err != nil {{\n\
             \t\thttp.Error(w, \"could not decode callback: \"+err.Error(), http.StatusBadRequest)\n\
             \t\treturn\n\
             \t}}\n\
             {rebuild}\
             \t{ROUTES_VAR}[{slot}].(chan {elem}) <- value\n\
             \tw.WriteHeader(http.StatusOK)\n\
             }}\n\n",
            handler = route.handler,
        ));
    }

    source.push_str("func init() {\n");
    for route in routes {
        source.push_str(&format!(
            "\thttp.HandleFunc({}, {})\n",
            go_string(&format!("/{}", route.endpoint)),
            route.handler
        ));
    }
    source.push_str("\tgo kompileListen()\n}\n");
    parse_decls(ARTIFACT, &source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        kompiler::{analyzer::find_launch_sites, service::synthesize},
        program::load,
    };
    use std::path::Path;

    fn controller(source: &str) -> ControllerArtifact {
        let program = load(Path::new("main.go"), source).unwrap();
        let analysis = find_launch_sites(&program.file, &program.symbols);
        let services: Vec<_> = analysis
            .callees()
            .into_iter()
            .map(|callee| {
                let symbol = program.symbols.get(callee).unwrap();
                synthesize(&program, symbol, &Config::default()).unwrap()
            })
            .collect();
        rewrite(&program, &analysis, &services).unwrap()
    }

    #[test]
    fn replaces_launch_declaration_and_receive() {
        let artifact = controller(
            r#"package main

import "fmt"

func resize(data []byte, result chan string) {
	result <- string(data)
}

func main() {
	body := []byte("img")
	ch := make(chan string)
	go resize(body, ch)
	id := <-ch
	fmt.Println(id)
}
"#,
        );
        let source = &artifact.source;
        assert!(source.contains(
            "\tif err := kompileDispatch(\"resize\", \"application/octet-stream\", bytes.NewReader(body)); err != nil {\n\t\tlog.Printf(\"kompile: dispatch to resize failed: %v\", err)\n\t\treturn\n\t}\n"
        ));
        assert!(!source.contains("make(chan string)\n"));
        assert!(source.contains("\tid := <-kompileRoutes[\"resize_result\"].(chan string)\n"));
        assert!(!source.contains("func resize("));
        assert!(source.contains("\"resize_result\": make(chan string, 1)"));
        assert!(source.contains("func resize_resultHandler(w http.ResponseWriter, r *http.Request) {"));
        assert!(source.contains("\thttp.HandleFunc(\"/resize_result\", resize_resultHandler)\n"));
        assert!(source.contains("\tgo kompileListen()\n}\n"));
        assert_eq!(artifact.services, vec!["resize"]);
        let paths: Vec<_> = artifact.file.imports.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["bytes", "encoding/json", "fmt", "log", "net/http"]);
    }

    #[test]
    fn functions_with_results_panic_on_failed_dispatch() {
        let artifact = controller(
            "package main\nfunc work(n int, out chan int) { out <- n }\nfunc run() int {\n\tvar ch = make(chan int)\n\tgo work(1, ch)\n\treturn <-ch\n}\nfunc main() { println(run()) }\n",
        );
        assert!(artifact.source.contains("\t\tpanic(err)\n"));
        assert!(artifact
            .source
            .contains("kompileDispatchJSON(\"work\", map[string]any{\"n\": 1})"));
        assert!(artifact
            .source
            .contains("\treturn <-kompileRoutes[\"work_out\"].(chan int)\n"));
        assert!(!artifact.source.contains("var ch"));
    }

    #[test]
    fn keeps_extracted_functions_still_called_directly() {
        let artifact = controller(
            "package main\nfunc work(out chan int) { out <- 1 }\nfunc main() {\n\tch := make(chan int)\n\tgo work(ch)\n\t<-ch\n\tlocal := make(chan int, 1)\n\twork(local)\n}\n",
        );
        assert!(artifact.source.contains("func work(out chan int) {"));
        assert!(artifact.source.contains("\twork(local)\n"));
    }

    #[test]
    fn shadowed_channel_names_are_left_alone() {
        let artifact = controller(
            "package main\nfunc work(out chan int) { out <- 1 }\nfunc main() {\n\tch := make(chan int)\n\tgo work(ch)\n\tfunc(ch chan int) {\n\t\tclose(ch)\n\t}(make(chan int))\n\tfor ch := range []int{1} {\n\t\tprintln(ch)\n\t}\n\tselect {\n\tcase v := <-ch:\n\t\tprintln(v)\n\t}\n}\n",
        );
        let source = &artifact.source;
        assert!(source.contains("\t\tclose(ch)\n"));
        assert!(source.contains("\t\tprintln(ch)\n"));
        assert!(source.contains("\tcase v := <-kompileRoutes[\"work_out\"].(chan int):\n"));
    }

    #[test]
    fn unrelated_channels_with_the_routed_name_are_kept() {
        let artifact = controller(
            "package main\nfunc work(out chan int) { out <- 1 }\nfunc main() {\n\tch := make(chan int)\n\tgo work(ch)\n\tprintln(<-ch)\n\t{\n\t\tch := make(chan string, 1)\n\t\tch <- \"x\"\n\t\tprintln(<-ch)\n\t}\n}\n",
        );
        let source = &artifact.source;
        assert!(source.contains("\tprintln(<-kompileRoutes[\"work_out\"].(chan int))\n"));
        assert!(source.contains("\t\tch := make(chan string, 1)\n"));
        assert!(source.contains("\t\tch <- \"x\"\n"));
        assert!(source.contains("\t\tprintln(<-ch)\n"));
        assert!(!source.contains("\tch := make(chan int)\n"));
    }

    #[test]
    fn routes_start_at_the_launched_declaration() {
        let artifact = controller(
            "package main\nfunc work(out chan int) { out <- 1 }\nfunc main() {\n\tch := make(chan string, 1)\n\tch <- \"a\"\n\t{\n\t\tch := make(chan int)\n\t\tgo work(ch)\n\t\tprintln(<-ch)\n\t}\n\tprintln(<-ch)\n}\n",
        );
        let source = &artifact.source;
        assert!(source.contains("\tch := make(chan string, 1)\n\tch <- \"a\"\n"));
        assert!(source.contains("\t\tprintln(<-kompileRoutes[\"work_out\"].(chan int))\n\t}\n\tprintln(<-ch)\n}\n"));
        assert!(!source.contains("make(chan int)\n"));
    }

    #[test]
    fn error_routes_rebuild_the_error() {
        let artifact = controller(
            "package main\nfunc check(n int, failed chan error) { failed <- nil }\nfunc main() {\n\terrs := make(chan error)\n\tgo check(1, errs)\n\tif err := <-errs; err != nil {\n\t\tprintln(err.Error())\n\t}\n}\n",
        );
        let source = &artifact.source;
        assert!(source.contains(
            "func check_failedHandler(w http.ResponseWriter, r *http.Request) {\n\tvar message *string\n\tif err := json.NewDecoder(r.Body).Decode(&message); err != nil {"
        ));
        assert!(source.contains(
            "\tvar value error\n\tif message != nil {\n\t\tvalue = errors.New(*message)\n\t}\n\tkompileRoutes[\"check_failed\"].(chan error) <- value\n"
        ));
        let paths: Vec<_> = artifact.file.imports.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"errors"));
    }

    #[test]
    fn multi_name_declarations_keep_other_names() {
        let artifact = controller(
            "package main\nfunc work(out chan int) { out <- 1 }\nfunc main() {\n\tn, ch := 2, make(chan int)\n\tgo work(ch)\n\tprintln(n + <-ch)\n}\n",
        );
        assert!(artifact.source.contains("\tn := 2\n"));
    }

    #[test]
    fn programs_without_launches_are_unchanged() {
        let source = "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"hi\")\n}\n";
        let artifact = controller(source);
        assert_eq!(artifact.source, source);
        assert!(artifact.routes.is_empty());
        assert!(artifact.services.is_empty());
    }

    #[test]
    fn embed_directives_survive() {
        let source = "package main\n\nimport _ \"embed\"\n\n//go:embed hello.txt\nvar hello string\n\nfunc main() {\n\tprintln(hello)\n}\n";
        assert_eq!(controller(source).source, source);

        let artifact = controller(
            "package main\n\nimport _ \"embed\"\n\n//go:embed hello.txt\nvar hello string\n\nfunc work(out chan int) { out <- 1 }\n\nfunc main() {\n\tch := make(chan int)\n\tgo work(ch)\n\tprintln(hello, <-ch)\n}\n",
        );
        assert!(artifact.source.contains("\n//go:embed hello.txt\nvar hello string\n"));
    }
}
