//! Finds `go` statements that launch a known function and decides, per
//! parameter of the callee, whether the argument is data to forward or a
//! channel to turn into a callback.

use super::scope::{opens_scope, Scopes};
use crate::{
    language::{
        ast::*,
        span::Span,
        visit::{walk_block, walk_stmt, Visitor},
    },
    program::{FunctionSymbol, ParamKind, SymbolTable},
};
use std::{collections::HashSet, fmt};
use tracing::{debug, warn};

/// Directory name the rewritten program is written to; a function of the
/// same name cannot become a service.
pub const CONTROLLER_NAME: &str = "controller";

#[derive(Clone, Debug, PartialEq)]
pub struct LaunchSite {
    pub callee: String,
    /// Span of the `go` statement, used to find it again during rewriting.
    pub span: Span,
    pub data_args: Vec<DataArg>,
    pub channels: Vec<ChannelBinding>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataArg {
    pub param: String,
    pub ty: Type,
    pub arg: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelBinding {
    pub param: String,
    /// Identifier passed for the channel at the launch site.
    pub arg: String,
    /// Span of the statement that declared the channel `arg` names at the
    /// launch site.
    pub decl: Span,
    pub elem: Type,
    pub endpoint: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedSite {
    pub span: Span,
    pub callee: Option<String>,
    pub reason: SkipReason,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    UnresolvedCallee,
    ArgumentCount { expected: usize, found: usize },
    SpreadCall,
    Variadic,
    Generic,
    ReservedName,
    NoBody,
    NoChannelParam,
    UnnamedChannel { position: usize },
    ChannelArgNotIdent { param: String },
    DuplicateChannelArg { arg: String },
    SharedChannel { arg: String },
    ChannelNotLocal { arg: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnresolvedCallee => write!(f, "callee is not a top-level function"),
            SkipReason::ArgumentCount { expected, found } => {
                write!(f, "expected {expected} arguments, found {found}")
            }
            SkipReason::SpreadCall => write!(f, "arguments are spread with `...`"),
            SkipReason::Variadic => write!(f, "callee is variadic"),
            SkipReason::Generic => write!(f, "callee has type parameters"),
            SkipReason::ReservedName => {
                write!(f, "`{CONTROLLER_NAME}` and `main` cannot become services")
            }
            SkipReason::NoBody => write!(f, "callee has no body"),
            SkipReason::NoChannelParam => write!(f, "callee has no channel parameter"),
            SkipReason::UnnamedChannel { position } => {
                write!(f, "channel parameter {position} has no name")
            }
            SkipReason::ChannelArgNotIdent { param } => {
                write!(f, "argument for channel `{param}` is not a variable")
            }
            SkipReason::DuplicateChannelArg { arg } => {
                write!(f, "`{arg}` is passed for more than one channel parameter")
            }
            SkipReason::SharedChannel { arg } => {
                write!(f, "`{arg}` already carries results of another launch")
            }
            SkipReason::ChannelNotLocal { arg } => {
                write!(f, "`{arg}` is not created in the launching function")
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Analysis {
    pub sites: Vec<LaunchSite>,
    pub skipped: Vec<SkippedSite>,
}

impl Analysis {
    /// Distinct callees in order of their first launch.
    pub fn callees(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.sites
            .iter()
            .map(|site| site.callee.as_str())
            .filter(|callee| seen.insert(*callee))
            .collect()
    }

    pub fn site_at(&self, span: Span) -> Option<&LaunchSite> {
        self.sites.iter().find(|site| site.span == span)
    }
}

pub fn endpoint_name(function: &str, param: &str) -> String {
    format!("{function}_{param}")
}

/// Name a data parameter is known by in the generated service. Unnamed and
/// blank parameters are named after their position.
pub fn data_param_name(name: Option<&str>, position: usize) -> String {
    match name {
        Some(name) => name.to_string(),
        None => format!("arg{position}"),
    }
}

pub fn find_launch_sites(file: &File, symbols: &SymbolTable) -> Analysis {
    let mut finder = SiteFinder {
        symbols,
        analysis: Analysis::default(),
        claimed: HashSet::new(),
        scopes: Scopes::new(),
    };
    for func in file.functions() {
        let Some(body) = &func.body else {
            continue;
        };
        finder.scopes = Scopes::new();
        finder.scopes.bind_type_params(&func.type_params);
        if let Some(recv) = &func.recv {
            for name in &recv.names {
                finder.scopes.bind(&name.name);
            }
        }
        finder.scopes.bind_signature(&func.sig);
        walk_block(&mut finder, body);
    }
    debug!(
        sites = finder.analysis.sites.len(),
        skipped = finder.analysis.skipped.len(),
        "launch site analysis finished"
    );
    finder.analysis
}

struct SiteFinder<'a> {
    symbols: &'a SymbolTable,
    analysis: Analysis,
    /// Channel declarations already bound to a launch.
    claimed: HashSet<Span>,
    scopes: Scopes,
}

impl<'a> SiteFinder<'a> {
    fn launch(&mut self, span: Span, call: &Expr) {
        match self.classify(span, call) {
            Ok(site) => {
                debug!(
                    callee = %site.callee,
                    data = site.data_args.len(),
                    channels = site.channels.len(),
                    "found launch site"
                );
                self.claimed
                    .extend(site.channels.iter().map(|channel| channel.decl));
                self.analysis.sites.push(site);
            }
            Err(skipped) => {
                warn!(
                    callee = skipped.callee.as_deref().unwrap_or("<dynamic>"),
                    offset = span.start,
                    reason = %skipped.reason,
                    "leaving goroutine in place"
                );
                self.analysis.skipped.push(skipped);
            }
        }
    }

    fn classify(&self, span: Span, call: &Expr) -> Result<LaunchSite, SkippedSite> {
        let skip = |callee: Option<&str>, reason| SkippedSite {
            span,
            callee: callee.map(str::to_string),
            reason,
        };
        let Expr::Call {
            fun,
            args,
            ellipsis,
            ..
        } = call
        else {
            return Err(skip(None, SkipReason::UnresolvedCallee));
        };
        let symbol = match fun.as_ident() {
            Some(ident) if !self.scopes.is_local(&ident.name) => self.symbols.get(&ident.name),
            _ => None,
        };
        let Some(symbol) = symbol else {
            let name = fun.as_ident().map(|ident| ident.name.as_str());
            return Err(skip(name, SkipReason::UnresolvedCallee));
        };
        let callee = Some(symbol.name.as_str());
        check_callee(symbol).map_err(|reason| skip(callee, reason))?;
        if *ellipsis {
            return Err(skip(callee, SkipReason::SpreadCall));
        }
        if args.len() != symbol.params.len() {
            return Err(skip(
                callee,
                SkipReason::ArgumentCount {
                    expected: symbol.params.len(),
                    found: args.len(),
                },
            ));
        }

        let mut data_args = Vec::new();
        let mut channels: Vec<ChannelBinding> = Vec::new();
        for (position, (param, arg)) in symbol.params.iter().zip(args).enumerate() {
            match &param.kind {
                ParamKind::Plain => data_args.push(DataArg {
                    param: data_param_name(param.name.as_deref(), position),
                    ty: param.ty.clone(),
                    arg: arg.clone(),
                }),
                ParamKind::CallbackChannel { elem } => {
                    let Some(name) = &param.name else {
                        return Err(skip(callee, SkipReason::UnnamedChannel { position }));
                    };
                    let ident = match arg.as_ident() {
                        Some(ident) if !ident.is_blank() => ident,
                        _ => {
                            return Err(skip(
                                callee,
                                SkipReason::ChannelArgNotIdent {
                                    param: name.clone(),
                                },
                            ))
                        }
                    };
                    if channels.iter().any(|c| c.arg == ident.name) {
                        return Err(skip(
                            callee,
                            SkipReason::DuplicateChannelArg {
                                arg: ident.name.clone(),
                            },
                        ));
                    }
                    let decl = self
                        .channel_origin(&ident.name)
                        .map_err(|reason| skip(callee, reason))?;
                    channels.push(ChannelBinding {
                        param: name.clone(),
                        arg: ident.name.clone(),
                        decl,
                        elem: elem.clone(),
                        endpoint: endpoint_name(&symbol.name, name),
                    });
                }
            }
        }

        Ok(LaunchSite {
            callee: symbol.name.clone(),
            span,
            data_args,
            channels,
        })
    }

    /// The declaration `arg` resolves to, which must make a channel in the
    /// launching function and not feed another launch.
    fn channel_origin(&self, arg: &str) -> Result<Span, SkipReason> {
        let decl = self
            .scopes
            .channel_decl(arg)
            .ok_or_else(|| SkipReason::ChannelNotLocal { arg: arg.into() })?;
        if self.claimed.contains(&decl) {
            return Err(SkipReason::SharedChannel { arg: arg.into() });
        }
        Ok(decl)
    }
}

fn check_callee(symbol: &FunctionSymbol) -> Result<(), SkipReason> {
    if symbol.name == CONTROLLER_NAME || symbol.name == "main" {
        return Err(SkipReason::ReservedName);
    }
    if symbol.decl.body.is_none() {
        return Err(SkipReason::NoBody);
    }
    if symbol.generic {
        return Err(SkipReason::Generic);
    }
    if symbol.variadic {
        return Err(SkipReason::Variadic);
    }
    if symbol.channel_params().next().is_none() {
        return Err(SkipReason::NoChannelParam);
    }
    Ok(())
}

impl<'a, 'ast> Visitor<'ast> for SiteFinder<'a> {
    fn visit_stmt(&mut self, stmt: &'ast Stmt) {
        if let Stmt::Go { call, span } = stmt {
            self.launch(*span, call);
        }
        let scoped = opens_scope(stmt);
        if scoped {
            self.scopes.push();
            self.scopes.bind_implicit(stmt);
        }
        walk_stmt(self, stmt);
        if scoped {
            self.scopes.pop();
        }
        self.scopes.bind_declared(stmt);
    }

    fn visit_func_lit(&mut self, lit: &'ast FuncLit) {
        self.scopes.push_function();
        self.scopes.bind_signature(&lit.sig);
        walk_block(self, &lit.body);
        self.scopes.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::load;
    use std::path::Path;

    fn analyze(source: &str) -> Analysis {
        let program = load(Path::new("main.go"), source).unwrap();
        find_launch_sites(&program.file, &program.symbols)
    }

    #[test]
    fn classifies_data_and_channel_arguments() {
        let analysis = analyze(
            r#"package main

func resize(data []byte, result chan<- string) {
	result <- "ok"
}

func main() {
	body := []byte("x")
	ch := make(chan string)
	go resize(body, ch)
	println(<-ch)
}
"#,
        );
        assert!(analysis.skipped.is_empty());
        let site = &analysis.sites[0];
        assert_eq!(site.callee, "resize");
        assert_eq!(site.data_args.len(), 1);
        assert_eq!(site.data_args[0].param, "data");
        assert!(site.data_args[0].ty.is_byte_slice());
        assert_eq!(site.channels[0].arg, "ch");
        assert_eq!(site.channels[0].endpoint, "resize_result");
        assert!(site.channels[0].elem.is_named("string"));
        assert_eq!(analysis.callees(), vec!["resize"]);
    }

    #[test]
    fn identical_parameter_names_get_distinct_endpoints() {
        let analysis = analyze(
            r#"package main

func funcA(result chan int) { result <- 1 }
func funcB(result chan int) { result <- 2 }

func main() {
	a := make(chan int)
	b := make(chan int)
	go funcA(a)
	go funcB(b)
	println(<-a + <-b)
}
"#,
        );
        let endpoints: Vec<_> = analysis
            .sites
            .iter()
            .map(|site| site.channels[0].endpoint.as_str())
            .collect();
        assert_eq!(endpoints, vec!["funcA_result", "funcB_result"]);
    }

    #[test]
    fn leaves_dynamic_and_shadowed_callees_alone() {
        let analysis = analyze(
            r#"package main

func work(out chan int) { out <- 1 }

func main() {
	ch := make(chan int)
	f := work
	go f(ch)
	go func() { ch <- 2 }()
	{
		work := func(c chan int) {}
		go work(ch)
	}
	<-ch
}
"#,
        );
        assert!(analysis.sites.is_empty());
        assert_eq!(analysis.skipped.len(), 3);
        assert!(analysis
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::UnresolvedCallee));
    }

    #[test]
    fn reports_skip_reasons() {
        let analysis = analyze(
            r#"package main

func plain(n int) {}
func sum(out chan int, xs ...int) {}
func pair(a, b chan int) {}
func work(out chan int) {}

func main() {
	go plain(1)
	ch := make(chan int)
	go sum(ch, 1, 2)
	go pair(ch, ch)
	go work(chans[0])
	go work(ch)
	go work(ch)
}

func helper(ch chan int) {
	go work(ch)
}
"#,
        );
        let reasons: Vec<_> = analysis.skipped.iter().map(|s| s.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::NoChannelParam,
                SkipReason::Variadic,
                SkipReason::DuplicateChannelArg { arg: "ch".into() },
                SkipReason::ChannelArgNotIdent { param: "out".into() },
                SkipReason::SharedChannel { arg: "ch".into() },
                SkipReason::ChannelNotLocal { arg: "ch".into() },
            ]
        );
        assert_eq!(analysis.sites.len(), 1);
    }

    #[test]
    fn binds_the_declaration_in_scope_at_the_launch() {
        let source = "package main\n\nfunc work(out chan int) { out <- 1 }\n\nfunc main() {\n\tch := make(chan int)\n\t{\n\t\tch := make(chan int)\n\t\tgo work(ch)\n\t\t<-ch\n\t}\n\tgo work(ch)\n\t<-ch\n}\n";
        let analysis = analyze(source);
        assert!(analysis.skipped.is_empty());
        let decls: Vec<_> = analysis
            .sites
            .iter()
            .map(|site| &source[site.channels[0].decl.start..site.channels[0].decl.end])
            .collect();
        assert_eq!(decls, vec!["ch := make(chan int)", "ch := make(chan int)"]);
        assert_ne!(
            analysis.sites[0].channels[0].decl,
            analysis.sites[1].channels[0].decl
        );
        assert!(analysis.sites[1].channels[0].decl.start < analysis.sites[0].channels[0].decl.start);
    }

    #[test]
    fn finds_launches_inside_function_literals() {
        let analysis = analyze(
            r#"package main

func work(n int, out chan int) { out <- n }

func main() {
	run := func() {
		ch := make(chan int)
		go work(3, ch)
		println(<-ch)
	}
	run()
}
"#,
        );
        assert_eq!(analysis.sites.len(), 1);
        assert_eq!(analysis.sites[0].data_args[0].param, "n");
    }

    #[test]
    fn names_unnamed_data_parameters_by_position() {
        let analysis = analyze(
            r#"package main

func work(_ string, out chan int) { out <- 1 }

func main() {
	ch := make(chan int)
	go work("x", ch)
	<-ch
}
"#,
        );
        assert_eq!(analysis.sites[0].data_args[0].param, "arg0");
    }
}
