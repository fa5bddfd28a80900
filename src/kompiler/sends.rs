//! Path-sensitive counting of sends on callback channels.
//!
//! A dispatch delivers exactly one value per endpoint, so no execution path
//! through an extracted function may send twice on the same channel.

use crate::language::{
    ast::*,
    span::Span,
    visit::{walk_expr, Visitor},
};
use std::collections::BTreeMap;

/// The send that made a path exceed one value on `channel`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraSend {
    pub channel: String,
    pub span: Span,
}

pub fn check_single_send(body: &Block, channels: &[String]) -> Result<(), ExtraSend> {
    let mut counter = Counter::new(channels);
    counter.stmts(&body.stmts, PathState::default())?;
    Ok(())
}

#[derive(Clone, Debug, Default)]
struct PathState {
    counts: BTreeMap<String, (u32, Span)>,
    terminated: bool,
}

/// Joins the paths leaving a branching statement. Terminated paths do not
/// continue, so only live ones contribute.
fn merge(states: Vec<PathState>) -> PathState {
    let live: Vec<_> = states.into_iter().filter(|s| !s.terminated).collect();
    if live.is_empty() {
        return PathState {
            counts: BTreeMap::new(),
            terminated: true,
        };
    }
    let mut merged = PathState::default();
    for state in live {
        for (channel, (count, span)) in state.counts {
            let entry = merged.counts.entry(channel).or_insert((0, span));
            if count > entry.0 {
                *entry = (count, span);
            }
        }
    }
    merged
}

/// A statement `break` or `continue` can leave, with the paths that did.
struct Target {
    label: Option<String>,
    is_loop: bool,
    breaks: Vec<PathState>,
    continues: Vec<PathState>,
}

struct Counter<'c> {
    channels: &'c [String],
    /// Highest count seen on any path, terminated or not.
    peak: BTreeMap<String, (u32, Span)>,
    /// Enclosing loops, switches and selects, innermost last.
    targets: Vec<Target>,
}

impl<'c> Counter<'c> {
    fn new(channels: &'c [String]) -> Self {
        Self {
            channels,
            peak: BTreeMap::new(),
            targets: Vec::new(),
        }
    }

    fn record(&mut self, state: &mut PathState, channel: &str, span: Span) -> Result<(), ExtraSend> {
        let entry = state.counts.entry(channel.to_string()).or_insert((0, span));
        entry.0 += 1;
        entry.1 = span;
        if entry.0 > 1 {
            return Err(ExtraSend {
                channel: channel.to_string(),
                span,
            });
        }
        let peak = self.peak.entry(channel.to_string()).or_insert((0, span));
        if entry.0 > peak.0 {
            *peak = *entry;
        }
        Ok(())
    }

    fn stmts(&mut self, stmts: &[Stmt], mut state: PathState) -> Result<PathState, ExtraSend> {
        for stmt in stmts {
            if state.terminated {
                break;
            }
            state = self.stmt(stmt, state)?;
        }
        Ok(state)
    }

    fn optional(&mut self, stmt: Option<&Stmt>, state: PathState) -> Result<PathState, ExtraSend> {
        match stmt {
            Some(stmt) => self.stmt(stmt, state),
            None => Ok(state),
        }
    }

    fn stmt(&mut self, stmt: &Stmt, state: PathState) -> Result<PathState, ExtraSend> {
        self.labeled(stmt, None, state)
    }

    fn labeled(
        &mut self,
        stmt: &Stmt,
        label: Option<&str>,
        mut state: PathState,
    ) -> Result<PathState, ExtraSend> {
        match stmt {
            Stmt::Send { chan, value, span } => {
                state = self.exprs([chan, value], state)?;
                if let Some(ident) = chan.as_ident() {
                    if self.channels.contains(&ident.name) {
                        self.record(&mut state, &ident.name, *span)?;
                    }
                }
                Ok(state)
            }
            Stmt::Expr(expr) => {
                state = self.exprs([expr], state)?;
                if is_terminating_call(expr) {
                    state.terminated = true;
                }
                Ok(state)
            }
            Stmt::Return { results, .. } => {
                state = self.exprs(results, state)?;
                state.terminated = true;
                Ok(state)
            }
            Stmt::Decl(decl) => {
                let values = decl.specs.iter().flat_map(|spec| match spec {
                    Spec::Value(spec) => spec.values.as_slice(),
                    Spec::Type(_) => &[][..],
                });
                self.exprs(values, state)
            }
            Stmt::Assign { lhs, rhs, .. } => self.exprs(lhs.iter().chain(rhs), state),
            Stmt::IncDec { x, .. } => self.exprs([x], state),
            Stmt::Go { call, .. } | Stmt::Defer { call, .. } => self.exprs([call], state),
            Stmt::Labeled { label, stmt, .. } => self.labeled(stmt, Some(label.name.as_str()), state),
            Stmt::Block(block) => self.stmts(&block.stmts, state),
            Stmt::Branch { kind, label, .. } => {
                self.branch(*kind, label.as_ref().map(|l| l.name.as_str()), &mut state);
                Ok(state)
            }
            Stmt::Empty(_) => Ok(state),
            Stmt::If(stmt) => {
                state = self.optional(stmt.init.as_deref(), state)?;
                state = self.exprs([&stmt.cond], state)?;
                let then = self.stmts(&stmt.then.stmts, state.clone())?;
                let els = self.optional(stmt.els.as_deref(), state)?;
                Ok(merge(vec![then, els]))
            }
            Stmt::Switch(stmt) => {
                state = self.optional(stmt.init.as_deref(), state)?;
                state = self.exprs(stmt.tag.iter(), state)?;
                self.enter(label, false);
                let outcome = self.clauses(&stmt.clauses, state);
                self.leave_switch(outcome)
            }
            Stmt::TypeSwitch(stmt) => {
                state = self.optional(stmt.init.as_deref(), state)?;
                state = self.exprs([&stmt.subject], state)?;
                self.enter(label, false);
                let outcome = self.clauses(&stmt.clauses, state);
                self.leave_switch(outcome)
            }
            Stmt::Select(stmt) => {
                self.enter(label, false);
                let outcome = self.select(stmt, state);
                self.leave_switch(outcome)
            }
            Stmt::For(stmt) => {
                state = self.optional(stmt.init.as_deref(), state)?;
                state = self.exprs(stmt.cond.iter(), state)?;
                self.loop_stmt(
                    &stmt.body,
                    stmt.post.as_deref(),
                    stmt.cond.is_some(),
                    label,
                    state,
                )
            }
            Stmt::Range(stmt) => {
                state = self.exprs([&stmt.expr], state)?;
                self.loop_stmt(&stmt.body, None, true, label, state)
            }
        }
    }

    fn enter(&mut self, label: Option<&str>, is_loop: bool) {
        self.targets.push(Target {
            label: label.map(str::to_string),
            is_loop,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
    }

    fn leave_switch(
        &mut self,
        outcome: Result<PathState, ExtraSend>,
    ) -> Result<PathState, ExtraSend> {
        let target = self.targets.pop();
        let mut exits = vec![outcome?];
        exits.extend(target.into_iter().flat_map(|t| t.breaks));
        Ok(merge(exits))
    }

    /// Ends the path at a `break` or `continue`, handing it to the statement
    /// the branch leaves. `goto` is not followed.
    fn branch(&mut self, kind: BranchKind, label: Option<&str>, state: &mut PathState) {
        let wants_loop = match kind {
            BranchKind::Break => false,
            BranchKind::Continue => true,
            BranchKind::Goto | BranchKind::Fallthrough => return,
        };
        let target = self.targets.iter_mut().rev().find(|target| match label {
            Some(label) => target.label.as_deref() == Some(label),
            None => target.is_loop || !wants_loop,
        });
        if let Some(target) = target {
            if wants_loop {
                target.continues.push(state.clone());
            } else {
                target.breaks.push(state.clone());
            }
        }
        state.terminated = true;
    }

    /// Runs the body twice, the second time from the state the first
    /// iteration hands to the next, so a send repeated across iterations is
    /// caught. Paths that `break` leave the loop.
    fn loop_stmt(
        &mut self,
        body: &Block,
        post: Option<&Stmt>,
        may_skip: bool,
        label: Option<&str>,
        entry: PathState,
    ) -> Result<PathState, ExtraSend> {
        let mut exits = Vec::new();
        if may_skip {
            exits.push(entry.clone());
        }
        let mut state = entry;
        for _ in 0..2 {
            if state.terminated {
                break;
            }
            self.enter(label, true);
            let finished = self.stmts(&body.stmts, state);
            let target = self.targets.pop();
            let finished = finished?;
            let (breaks, continues) = target
                .map(|t| (t.breaks, t.continues))
                .unwrap_or_default();
            exits.extend(breaks);
            let mut next = vec![finished];
            next.extend(continues);
            state = merge(next);
            if !state.terminated {
                state = self.optional(post, state)?;
            }
            if may_skip {
                exits.push(state.clone());
            }
        }
        Ok(merge(exits))
    }

    fn select(&mut self, stmt: &SelectStmt, state: PathState) -> Result<PathState, ExtraSend> {
        let mut outcomes = Vec::new();
        for clause in &stmt.clauses {
            let entry = self.optional(clause.comm.as_deref(), state.clone())?;
            outcomes.push(self.stmts(&clause.body, entry)?);
        }
        Ok(merge(outcomes))
    }

    fn clauses(&mut self, clauses: &[CaseClause], state: PathState) -> Result<PathState, ExtraSend> {
        let mut outcomes = Vec::new();
        let mut carried: Option<PathState> = None;
        for clause in clauses {
            let mut entry = state.clone();
            for expr in clause.list.iter().flatten() {
                entry = self.exprs([expr], entry)?;
            }
            if let Some(previous) = carried.take() {
                entry = merge(vec![entry, previous]);
            }
            let exit = self.stmts(&clause.body, entry)?;
            if ends_in_fallthrough(&clause.body) {
                carried = Some(exit);
            } else {
                outcomes.push(exit);
            }
        }
        outcomes.extend(carried);
        if !clauses.iter().any(|clause| clause.list.is_none()) {
            outcomes.push(state);
        }
        Ok(merge(outcomes))
    }

    /// Function literals are counted once where they appear, with the most
    /// sends any of their paths makes.
    fn exprs<'e>(
        &mut self,
        exprs: impl IntoIterator<Item = &'e Expr>,
        mut state: PathState,
    ) -> Result<PathState, ExtraSend> {
        let mut finder = LitFinder::default();
        for expr in exprs {
            finder.visit_expr(expr);
        }
        for lit in finder.lits {
            let mut inner = Counter::new(self.channels);
            inner.stmts(&lit.body.stmts, PathState::default())?;
            for (channel, (count, span)) in inner.peak {
                if count > 0 {
                    self.record(&mut state, &channel, span)?;
                }
            }
        }
        Ok(state)
    }
}

fn ends_in_fallthrough(body: &[Stmt]) -> bool {
    matches!(
        body.last(),
        Some(Stmt::Branch {
            kind: BranchKind::Fallthrough,
            ..
        })
    )
}

/// Calls after which the current path never continues.
pub fn is_terminating_call(expr: &Expr) -> bool {
    let Expr::Call { fun, .. } = expr else {
        return false;
    };
    if let Some(ident) = fun.as_ident() {
        return ident.name == "panic";
    }
    matches!(
        fun.as_qualified(),
        Some(("os", "Exit"))
            | Some(("runtime", "Goexit"))
            | Some(("log", "Fatal" | "Fatalf" | "Fatalln" | "Panic" | "Panicf" | "Panicln"))
    )
}

#[derive(Default)]
struct LitFinder<'ast> {
    lits: Vec<&'ast FuncLit>,
}

impl<'ast> Visitor<'ast> for LitFinder<'ast> {
    fn visit_expr(&mut self, expr: &'ast Expr) {
        walk_expr(self, expr);
    }

    fn visit_func_lit(&mut self, lit: &'ast FuncLit) {
        self.lits.push(lit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::parser::parse_file;

    fn check(body: &str) -> Result<(), ExtraSend> {
        let file = parse_file(&format!(
            "package main\nfunc f(out chan int, err chan error) {{\n{body}\n}}\n"
        ))
        .unwrap();
        let body = file.functions().next().unwrap().body.clone().unwrap();
        check_single_send(&body, &["out".to_string(), "err".to_string()])
    }

    #[test]
    fn one_send_per_channel_is_fine() {
        assert!(check("out <- 1\nerr <- nil").is_ok());
    }

    #[test]
    fn sequential_sends_are_rejected() {
        let extra = check("out <- 1\nx := 2\nout <- x").unwrap_err();
        assert_eq!(extra.channel, "out");
    }

    #[test]
    fn branches_take_the_maximum() {
        assert!(check("if a {\n\tout <- 1\n} else if b {\n\tout <- 2\n} else {\n\tout <- 3\n}").is_ok());
        assert!(check("switch x {\ncase 1:\n\tout <- 1\ndefault:\n\tout <- 2\n}").is_ok());
        assert!(check("if a {\n\tout <- 1\n}\nout <- 2").is_err());
    }

    #[test]
    fn fallthrough_joins_clauses() {
        assert!(check("switch x {\ncase 1:\n\tout <- 1\n\tfallthrough\ncase 2:\n\tout <- 2\n}").is_err());
    }

    #[test]
    fn terminating_calls_end_the_path() {
        assert!(check("if bad {\n\tout <- 0\n\tpanic(\"bad\")\n}\nout <- 1").is_ok());
        assert!(check("if bad {\n\tout <- 0\n\tlog.Fatalf(\"%v\", e)\n}\nout <- 1").is_ok());
    }

    #[test]
    fn sends_repeated_across_iterations_are_rejected() {
        let extra = check("for i := 0; i < 3; i++ {\n\tif i == 2 {\n\t\tout <- i\n\t}\n}").unwrap_err();
        assert_eq!(extra.channel, "out");
        assert!(check("for _, v := range xs {\n\terr <- v\n}").is_err());
        assert!(check("for {\n\tout <- 1\n}").is_err());
        assert!(check("for i := 0; i < 3; i++ {\n\tprintln(i)\n}\nout <- 1").is_ok());
    }

    #[test]
    fn break_after_a_send_leaves_the_loop() {
        assert!(check("for _, x := range xs {\n\tif x > 2 {\n\t\tout <- x\n\t\tbreak\n\t}\n}").is_ok());
        assert!(check("for {\n\tout <- 1\n\tbreak\n}").is_ok());
        assert!(check("for _, x := range xs {\n\tif x < 0 {\n\t\tcontinue\n\t}\n\tout <- x\n\tbreak\n}").is_ok());
        assert!(check("for _, x := range xs {\n\tif x > 2 {\n\t\tout <- x\n\t\tbreak\n\t}\n}\nout <- 0").is_err());
    }

    #[test]
    fn break_targets_the_innermost_switch_or_label() {
        assert!(check("for _, x := range xs {\n\tswitch {\n\tcase x > 2:\n\t\tout <- x\n\t\tbreak\n\t}\n}").is_err());
        assert!(check("outer:\nfor _, x := range xs {\n\tfor {\n\t\tout <- x\n\t\tbreak outer\n\t}\n}").is_ok());
        assert!(check("for _, x := range xs {\n\tout <- x\n\tos.Exit(0)\n}").is_ok());
    }

    #[test]
    fn function_literals_count_once() {
        assert!(check("go func() {\n\tif a {\n\t\tout <- 1\n\t\treturn\n\t}\n\tout <- 2\n}()").is_ok());
        assert!(check("defer func() { out <- 1 }()\nout <- 2").is_err());
    }

    #[test]
    fn select_clauses_are_alternatives() {
        assert!(check("select {\ncase v := <-in:\n\tout <- v\ncase <-done:\n\tout <- 0\n}").is_ok());
    }
}
