// pyreplay - Python Execution Replay
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Line analyzer for Python source built on `rustpython-parser`.
//!
//! Every name is attributed to the line on which its enclosing statement starts. For
//! compound statements only the header expressions belong to the header line; bodies
//! are walked statement by statement.

use std::collections::HashSet;

use indexmap::IndexSet;
use rustpython_ast::{
    Arguments, BoolOp, CmpOp, Comprehension, Constant, ExceptHandler, Expr, ExprSubscript, Mod,
    Ranged, Stmt, StmtIf, UnaryOp,
};
use rustpython_parser::{parse, Mode};
use tracing::trace;

use crate::analysis::{
    AnalysisError, CompareOp, ComprehensionInfo, Condition, FileAnalysis, LineAnalyzer,
    LineControl, StatementKind, SubscriptKey, SubscriptTarget,
};

/// [`LineAnalyzer`] for Python 3 source
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonAnalyzer;

impl PythonAnalyzer {
    /// Create a new analyzer
    pub fn new() -> Self {
        Self
    }
}

impl LineAnalyzer for PythonAnalyzer {
    fn analyze(&self, filename: &str, source: &str) -> Result<FileAnalysis, AnalysisError> {
        let module = parse(source, Mode::Module, filename).map_err(|e| AnalysisError::Parse {
            filename: filename.to_string(),
            message: e.to_string(),
        })?;

        let mut collector = FileCollector::new(filename, source);
        if let Mod::Module(module) = module {
            collector.visit_body(&module.body, None);
        }

        trace!(
            filename,
            lines = collector.analysis.lines.len(),
            functions = collector.analysis.function_locals.len(),
            "analyzed python source"
        );
        Ok(collector.analysis)
    }
}

/// Names found while walking the expressions of one statement
#[derive(Debug, Default)]
struct ExprFacts {
    assigned: IndexSet<String>,
    referenced: IndexSet<String>,
    calls: IndexSet<String>,
    subscripts: Vec<SubscriptTarget>,
    comp_targets: IndexSet<String>,
    has_comprehension: bool,
}

impl ExprFacts {
    fn add_subscript(&mut self, target: SubscriptTarget) {
        if !self.subscripts.contains(&target) {
            self.subscripts.push(target);
        }
    }

    /// Walk an expression in load context
    fn load(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(name) => {
                self.referenced.insert(name.id.to_string());
            }
            Expr::Call(call) => {
                match &*call.func {
                    Expr::Name(name) => {
                        self.calls.insert(name.id.to_string());
                    }
                    Expr::Attribute(attr) => {
                        self.calls.insert(attr.attr.to_string());
                        self.load(&attr.value);
                    }
                    other => self.load(other),
                }
                for arg in &call.args {
                    self.load(arg);
                }
                for keyword in &call.keywords {
                    self.load(&keyword.value);
                }
            }
            Expr::Subscript(sub) => {
                if let Some(target) = subscript_target(sub, false) {
                    self.add_subscript(target);
                }
                self.load(&sub.value);
                self.load(&sub.slice);
            }
            Expr::Attribute(attr) => self.load(&attr.value),
            Expr::NamedExpr(named) => {
                self.store(&named.target);
                self.load(&named.value);
            }
            Expr::BoolOp(op) => op.values.iter().for_each(|v| self.load(v)),
            Expr::BinOp(op) => {
                self.load(&op.left);
                self.load(&op.right);
            }
            Expr::UnaryOp(op) => self.load(&op.operand),
            Expr::Compare(cmp) => {
                self.load(&cmp.left);
                cmp.comparators.iter().for_each(|c| self.load(c));
            }
            Expr::IfExp(ifexp) => {
                self.load(&ifexp.test);
                self.load(&ifexp.body);
                self.load(&ifexp.orelse);
            }
            Expr::Lambda(lambda) => {
                let mut inner = Self::default();
                inner.load(&lambda.body);
                let params = argument_names(&lambda.args);
                for name in inner.referenced {
                    if !params.contains(&name) {
                        self.referenced.insert(name);
                    }
                }
                self.calls.extend(inner.calls);
            }
            Expr::Dict(dict) => {
                dict.keys.iter().flatten().for_each(|k| self.load(k));
                dict.values.iter().for_each(|v| self.load(v));
            }
            Expr::Set(set) => set.elts.iter().for_each(|e| self.load(e)),
            Expr::List(list) => list.elts.iter().for_each(|e| self.load(e)),
            Expr::Tuple(tuple) => tuple.elts.iter().for_each(|e| self.load(e)),
            Expr::ListComp(comp) => self.comprehension(&[&*comp.elt], &comp.generators),
            Expr::SetComp(comp) => self.comprehension(&[&*comp.elt], &comp.generators),
            Expr::GeneratorExp(comp) => self.comprehension(&[&*comp.elt], &comp.generators),
            Expr::DictComp(comp) => {
                self.comprehension(&[&*comp.key, &*comp.value], &comp.generators)
            }
            Expr::Await(aw) => self.load(&aw.value),
            Expr::Yield(y) => {
                if let Some(value) = &y.value {
                    self.load(value);
                }
            }
            Expr::YieldFrom(y) => self.load(&y.value),
            Expr::FormattedValue(fv) => {
                self.load(&fv.value);
                if let Some(spec) = &fv.format_spec {
                    self.load(spec);
                }
            }
            Expr::JoinedStr(js) => js.values.iter().for_each(|v| self.load(v)),
            Expr::Starred(starred) => self.load(&starred.value),
            Expr::Slice(slice) => {
                for part in [&slice.lower, &slice.upper, &slice.step].into_iter().flatten() {
                    self.load(part);
                }
            }
            _ => {}
        }
    }

    /// Walk an assignment target
    fn store(&mut self, target: &Expr) {
        match target {
            Expr::Name(name) => {
                self.assigned.insert(name.id.to_string());
            }
            Expr::Tuple(tuple) => tuple.elts.iter().for_each(|e| self.store(e)),
            Expr::List(list) => list.elts.iter().for_each(|e| self.store(e)),
            Expr::Starred(starred) => self.store(&starred.value),
            Expr::Subscript(sub) => {
                if let Some(target) = subscript_target(sub, true) {
                    self.add_subscript(target);
                }
                self.load(&sub.value);
                self.load(&sub.slice);
            }
            Expr::Attribute(attr) => self.load(&attr.value),
            other => self.load(other),
        }
    }

    fn comprehension(&mut self, elts: &[&Expr], generators: &[Comprehension]) {
        self.has_comprehension = true;

        let mut targets = IndexSet::new();
        let mut inner = Self::default();
        for generator in generators {
            target_names(&generator.target, &mut targets);
            inner.load(&generator.iter);
            generator.ifs.iter().for_each(|cond| inner.load(cond));
        }
        for elt in elts {
            inner.load(elt);
        }

        for name in inner.referenced {
            if !targets.contains(&name) {
                self.referenced.insert(name);
            }
        }
        self.assigned.extend(inner.assigned);
        self.calls.extend(inner.calls);
        for sub in inner.subscripts {
            if !targets.contains(&sub.object) {
                self.add_subscript(sub);
            }
        }
        self.comp_targets.extend(inner.comp_targets);
        self.comp_targets.extend(targets);
    }
}

/// Walks one module, filling a [`FileAnalysis`]
struct FileCollector<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
    analysis: FileAnalysis,
}

impl<'a> FileCollector<'a> {
    fn new(filename: &str, source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        let analysis = FileAnalysis {
            filename: filename.to_string(),
            source_lines: source.lines().map(String::from).collect(),
            ..Default::default()
        };
        Self { source, line_starts, analysis }
    }

    /// 1-based line of a byte offset
    fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }

    fn column_of(&self, offset: usize) -> usize {
        let line = self.line_of(offset);
        offset - self.line_starts[line - 1]
    }

    fn start_line(&self, stmt: &Stmt) -> usize {
        self.line_of(stmt.range().start().to_usize())
    }

    fn end_line(&self, stmt: &Stmt) -> usize {
        self.line_of(stmt.range().end().to_usize().saturating_sub(1))
    }

    fn line_text(&self, line: usize) -> &str {
        let start = self.line_starts[line - 1];
        let end = self.line_starts.get(line).copied().unwrap_or(self.source.len());
        &self.source[start..end]
    }

    /// Register a statement starting at `offset` and return its line
    fn begin(&mut self, offset: usize, kind: StatementKind, guard: Option<usize>) -> usize {
        let line = self.line_of(offset);
        let indent = self.column_of(offset);
        self.analysis.lines.entry(line).or_default();
        self.analysis.control.entry(line).or_insert(LineControl {
            kind,
            indent,
            guard,
            condition: None,
            dead_range: None,
        });
        line
    }

    fn record(&mut self, line: usize, facts: ExprFacts) {
        if facts.has_comprehension {
            let comp = self.analysis.comprehensions.entry(line).or_default();
            comp.assigned_names.extend(facts.assigned.iter().cloned());
            comp.referenced_names.extend(facts.referenced.iter().cloned());
            comp.comp_targets.extend(facts.comp_targets.iter().cloned());
        }

        let info = self.analysis.lines.entry(line).or_default();
        info.assigned.extend(facts.assigned);
        info.referenced.extend(facts.referenced);
        info.function_calls.extend(facts.calls);
        for sub in facts.subscripts {
            if !info.subscripts.contains(&sub) {
                info.subscripts.push(sub);
            }
        }
    }

    /// Walk a block. `guard` is the `if`/`elif`/`while` header owning the block; it is
    /// attached to every statement of the block until one rebinds a name the header's
    /// condition reads.
    fn visit_body(&mut self, body: &[Stmt], guard: Option<usize>) {
        let last_line = body.last().map(|stmt| self.end_line(stmt));
        let guarded_names = guard.map(|line| self.condition_names(line)).unwrap_or_default();
        let mut guard = guard;
        for (i, stmt) in body.iter().enumerate() {
            self.visit_stmt(stmt, guard);
            if guard.is_some() && self.rebinds_any(stmt, &guarded_names) {
                guard = None;
            }

            if !is_block_exit(stmt) || i + 1 == body.len() {
                continue;
            }
            let first_dead = self.end_line(stmt) + 1;
            if let Some(last) = last_line.filter(|&last| last >= first_dead) {
                let line = self.start_line(stmt);
                if let Some(control) = self.analysis.control.get_mut(&line) {
                    control.dead_range = Some((first_dead, last));
                }
            }
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt, guard: Option<usize>) {
        let offset = stmt.range().start().to_usize();
        let line = self.begin(offset, statement_kind(stmt), guard);
        let mut facts = ExprFacts::default();

        match stmt {
            Stmt::FunctionDef(func) => {
                facts.load_all(&func.decorator_list);
                facts.load_defaults(&func.args);
                self.record(line, facts);
                self.visit_function(stmt, func.name.as_str(), &func.args, &func.body);
            }
            Stmt::AsyncFunctionDef(func) => {
                facts.load_all(&func.decorator_list);
                facts.load_defaults(&func.args);
                self.record(line, facts);
                self.visit_function(stmt, func.name.as_str(), &func.args, &func.body);
            }
            Stmt::ClassDef(class) => {
                facts.load_all(&class.decorator_list);
                facts.load_all(&class.bases);
                class.keywords.iter().for_each(|k| facts.load(&k.value));
                self.record(line, facts);
                self.visit_body(&class.body, None);
            }
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    facts.load(value);
                }
                self.record(line, facts);
            }
            Stmt::Delete(delete) => {
                facts.load_all(&delete.targets);
                self.record(line, facts);
            }
            Stmt::Assign(assign) => {
                assign.targets.iter().for_each(|t| facts.store(t));
                facts.load(&assign.value);
                self.record(line, facts);
            }
            Stmt::AugAssign(aug) => {
                facts.store(&aug.target);
                facts.load(&aug.target);
                facts.load(&aug.value);
                self.record(line, facts);
            }
            Stmt::AnnAssign(ann) => {
                if let Some(value) = &ann.value {
                    facts.store(&ann.target);
                    facts.load(value);
                }
                self.record(line, facts);
            }
            Stmt::For(for_stmt) => {
                self.visit_for(line, facts, &for_stmt.target, &for_stmt.iter);
                self.visit_body(&for_stmt.body, None);
                self.visit_body(&for_stmt.orelse, None);
            }
            Stmt::AsyncFor(for_stmt) => {
                self.visit_for(line, facts, &for_stmt.target, &for_stmt.iter);
                self.visit_body(&for_stmt.body, None);
                self.visit_body(&for_stmt.orelse, None);
            }
            Stmt::While(while_stmt) => {
                facts.load(&while_stmt.test);
                self.record(line, facts);
                self.set_condition(line, &while_stmt.test);
                self.visit_body(&while_stmt.body, Some(line));
                self.visit_body(&while_stmt.orelse, None);
            }
            Stmt::If(if_stmt) => self.visit_if(line, if_stmt),
            Stmt::With(with) => {
                for item in &with.items {
                    facts.load(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        facts.store(vars);
                    }
                }
                self.record(line, facts);
                self.visit_body(&with.body, None);
            }
            Stmt::AsyncWith(with) => {
                for item in &with.items {
                    facts.load(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        facts.store(vars);
                    }
                }
                self.record(line, facts);
                self.visit_body(&with.body, None);
            }
            Stmt::Raise(raise) => {
                for part in [&raise.exc, &raise.cause].into_iter().flatten() {
                    facts.load(part);
                }
                self.record(line, facts);
            }
            Stmt::Try(try_stmt) => {
                self.visit_body(&try_stmt.body, None);
                self.visit_handlers(&try_stmt.handlers);
                self.visit_body(&try_stmt.orelse, None);
                self.visit_body(&try_stmt.finalbody, None);
            }
            Stmt::TryStar(try_stmt) => {
                self.visit_body(&try_stmt.body, None);
                self.visit_handlers(&try_stmt.handlers);
                self.visit_body(&try_stmt.orelse, None);
                self.visit_body(&try_stmt.finalbody, None);
            }
            Stmt::Assert(assert) => {
                facts.load(&assert.test);
                if let Some(msg) = &assert.msg {
                    facts.load(msg);
                }
                self.record(line, facts);
            }
            Stmt::Expr(expr) => {
                facts.load(&expr.value);
                self.record(line, facts);
            }
            _ => {}
        }
    }

    fn visit_for(&mut self, line: usize, mut facts: ExprFacts, target: &Expr, iter: &Expr) {
        facts.store(target);
        facts.load(iter);
        self.record(line, facts);
    }

    fn visit_if(&mut self, line: usize, if_stmt: &StmtIf) {
        let mut facts = ExprFacts::default();
        facts.load(&if_stmt.test);
        self.record(line, facts);
        self.set_condition(line, &if_stmt.test);
        self.visit_body(&if_stmt.body, Some(line));

        match if_stmt.orelse.as_slice() {
            [Stmt::If(elif)] if self.is_elif(elif) => {
                let offset = elif.range.start().to_usize();
                let elif_line = self.begin(offset, StatementKind::Elif, None);
                self.visit_if(elif_line, elif);
            }
            orelse => self.visit_body(orelse, None),
        }
    }

    fn is_elif(&self, if_stmt: &StmtIf) -> bool {
        let line = self.line_of(if_stmt.range.start().to_usize());
        self.line_text(line).trim_start().starts_with("elif")
    }

    fn visit_handlers(&mut self, handlers: &[ExceptHandler]) {
        for handler in handlers {
            let ExceptHandler::ExceptHandler(h) = handler;
            let line = self.begin(h.range.start().to_usize(), StatementKind::Other, None);
            let mut facts = ExprFacts::default();
            if let Some(type_) = &h.type_ {
                facts.load(type_);
            }
            if let Some(name) = &h.name {
                facts.assigned.insert(name.to_string());
            }
            self.record(line, facts);
            self.visit_body(&h.body, None);
        }
    }

    fn visit_function(&mut self, stmt: &Stmt, name: &str, args: &Arguments, body: &[Stmt]) {
        self.analysis.defined_functions.insert(name.to_string());

        if let Some(first) = body.first() {
            let start = self.start_line(first);
            for line in start..=self.end_line(stmt) {
                self.analysis.line_functions.insert(line, name.to_string());
            }
        }

        let mut locals: IndexSet<String> = argument_names(args).into_iter().collect();
        let mut declared = HashSet::new();
        collect_bindings(body, &mut locals, &mut declared);
        locals.retain(|local| !declared.contains(local));
        self.analysis.function_locals.insert(name.to_string(), locals.into_iter().collect());

        self.visit_body(body, None);
    }

    fn condition_names(&self, line: usize) -> HashSet<String> {
        self.analysis
            .control
            .get(&line)
            .and_then(|control| control.condition.as_ref())
            .map(Condition::names)
            .unwrap_or_default()
    }

    /// Whether any line of `stmt` assigns one of `names`
    fn rebinds_any(&self, stmt: &Stmt, names: &HashSet<String>) -> bool {
        self.analysis
            .lines
            .range(self.start_line(stmt)..=self.end_line(stmt))
            .any(|(_, info)| info.assigned.iter().any(|name| names.contains(name)))
    }

    fn set_condition(&mut self, line: usize, test: &Expr) {
        if let Some(control) = self.analysis.control.get_mut(&line) {
            control.condition = parse_condition(test);
        }
    }
}

impl ExprFacts {
    fn load_all(&mut self, exprs: &[Expr]) {
        exprs.iter().for_each(|e| self.load(e));
    }

    fn load_defaults(&mut self, args: &Arguments) {
        for arg in args.posonlyargs.iter().chain(&args.args).chain(&args.kwonlyargs) {
            if let Some(default) = &arg.default {
                self.load(default);
            }
        }
    }
}

fn statement_kind(stmt: &Stmt) -> StatementKind {
    match stmt {
        Stmt::Break(_) => StatementKind::Break,
        Stmt::Continue(_) => StatementKind::Continue,
        Stmt::Return(_) => StatementKind::Return,
        Stmt::Raise(_) => StatementKind::Raise,
        Stmt::If(_) => StatementKind::If,
        Stmt::While(_) => StatementKind::While,
        Stmt::For(_) | Stmt::AsyncFor(_) => StatementKind::For,
        Stmt::FunctionDef(_) | Stmt::AsyncFunctionDef(_) | Stmt::ClassDef(_) => {
            StatementKind::Def
        }
        _ => StatementKind::Other,
    }
}

fn is_block_exit(stmt: &Stmt) -> bool {
    statement_kind(stmt).exits_block()
}

/// Parameter names in slot order
fn argument_names(args: &Arguments) -> Vec<String> {
    let mut names: Vec<String> = args
        .posonlyargs
        .iter()
        .chain(&args.args)
        .chain(&args.kwonlyargs)
        .map(|arg| arg.def.arg.to_string())
        .collect();
    for extra in [&args.vararg, &args.kwarg].into_iter().flatten() {
        names.push(extra.arg.to_string());
    }
    names
}

/// Names bound by an assignment target
fn target_names(target: &Expr, out: &mut IndexSet<String>) {
    match target {
        Expr::Name(name) => {
            out.insert(name.id.to_string());
        }
        Expr::Tuple(tuple) => tuple.elts.iter().for_each(|e| target_names(e, out)),
        Expr::List(list) => list.elts.iter().for_each(|e| target_names(e, out)),
        Expr::Starred(starred) => target_names(&starred.value, out),
        _ => {}
    }
}

/// Local bindings of a function body in order of first appearance, not descending
/// into nested scopes. `global`/`nonlocal` names go to `declared`.
fn collect_bindings(body: &[Stmt], out: &mut IndexSet<String>, declared: &mut HashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign(assign) => assign.targets.iter().for_each(|t| target_names(t, out)),
            Stmt::AugAssign(aug) => target_names(&aug.target, out),
            Stmt::AnnAssign(ann) => {
                if ann.value.is_some() {
                    target_names(&ann.target, out);
                }
            }
            Stmt::For(for_stmt) => {
                target_names(&for_stmt.target, out);
                collect_bindings(&for_stmt.body, out, declared);
                collect_bindings(&for_stmt.orelse, out, declared);
            }
            Stmt::AsyncFor(for_stmt) => {
                target_names(&for_stmt.target, out);
                collect_bindings(&for_stmt.body, out, declared);
                collect_bindings(&for_stmt.orelse, out, declared);
            }
            Stmt::While(while_stmt) => {
                collect_bindings(&while_stmt.body, out, declared);
                collect_bindings(&while_stmt.orelse, out, declared);
            }
            Stmt::If(if_stmt) => {
                collect_bindings(&if_stmt.body, out, declared);
                collect_bindings(&if_stmt.orelse, out, declared);
            }
            Stmt::With(with) => {
                for vars in with.items.iter().filter_map(|item| item.optional_vars.as_ref()) {
                    target_names(vars, out);
                }
                collect_bindings(&with.body, out, declared);
            }
            Stmt::Try(try_stmt) => {
                collect_bindings(&try_stmt.body, out, declared);
                for handler in &try_stmt.handlers {
                    let ExceptHandler::ExceptHandler(h) = handler;
                    if let Some(name) = &h.name {
                        out.insert(name.to_string());
                    }
                    collect_bindings(&h.body, out, declared);
                }
                collect_bindings(&try_stmt.orelse, out, declared);
                collect_bindings(&try_stmt.finalbody, out, declared);
            }
            Stmt::FunctionDef(func) => {
                out.insert(func.name.to_string());
            }
            Stmt::AsyncFunctionDef(func) => {
                out.insert(func.name.to_string());
            }
            Stmt::ClassDef(class) => {
                out.insert(class.name.to_string());
            }
            Stmt::Import(import) => {
                for alias in &import.names {
                    let bound = alias.asname.as_ref().unwrap_or(&alias.name);
                    let root = bound.as_str().split('.').next().unwrap_or_default();
                    out.insert(root.to_string());
                }
            }
            Stmt::ImportFrom(import) => {
                for alias in &import.names {
                    let bound = alias.asname.as_ref().unwrap_or(&alias.name);
                    out.insert(bound.to_string());
                }
            }
            Stmt::Global(global) => declared.extend(global.names.iter().map(|n| n.to_string())),
            Stmt::Nonlocal(nonlocal) => {
                declared.extend(nonlocal.names.iter().map(|n| n.to_string()))
            }
            _ => {}
        }
    }
}

fn subscript_target(sub: &ExprSubscript, store: bool) -> Option<SubscriptTarget> {
    let Expr::Name(object) = &*sub.value else {
        return None;
    };
    let key = match &*sub.slice {
        Expr::Name(name) => SubscriptKey::Name(name.id.to_string()),
        Expr::Constant(c) => match &c.value {
            Constant::Str(s) => SubscriptKey::Str(s.clone()),
            Constant::Int(i) => SubscriptKey::Int(i.to_string().parse().ok()?),
            _ => return None,
        },
        Expr::UnaryOp(op) if matches!(op.op, UnaryOp::USub) => match &*op.operand {
            Expr::Constant(c) => match &c.value {
                Constant::Int(i) => SubscriptKey::Int(-i.to_string().parse::<i64>().ok()?),
                _ => return None,
            },
            _ => return None,
        },
        _ => return None,
    };
    Some(SubscriptTarget { object: object.id.to_string(), key, store })
}

fn numeric_literal(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Constant(c) => match &c.value {
            Constant::Int(i) => i.to_string().parse().ok(),
            Constant::Float(f) => Some(*f),
            _ => None,
        },
        Expr::UnaryOp(op) => match op.op {
            UnaryOp::USub => numeric_literal(&op.operand).map(|v| -v),
            UnaryOp::UAdd => numeric_literal(&op.operand),
            _ => None,
        },
        _ => None,
    }
}

fn compare_op(op: &CmpOp) -> Option<CompareOp> {
    Some(match op {
        CmpOp::Eq => CompareOp::Eq,
        CmpOp::NotEq => CompareOp::NotEq,
        CmpOp::Lt => CompareOp::Lt,
        CmpOp::LtE => CompareOp::LtE,
        CmpOp::Gt => CompareOp::Gt,
        CmpOp::GtE => CompareOp::GtE,
        _ => return None,
    })
}

/// Parse a header test into a [`Condition`], if it has the supported shape
fn parse_condition(test: &Expr) -> Option<Condition> {
    match test {
        Expr::BoolOp(op) => {
            let parts = op.values.iter().map(parse_condition).collect::<Option<Vec<_>>>()?;
            Some(match op.op {
                BoolOp::And => Condition::And(parts),
                BoolOp::Or => Condition::Or(parts),
            })
        }
        Expr::Compare(cmp) if cmp.ops.len() == 1 && cmp.comparators.len() == 1 => {
            let op = compare_op(&cmp.ops[0])?;
            match (&*cmp.left, &cmp.comparators[0]) {
                (Expr::Name(name), rhs) => Some(Condition::Compare {
                    name: name.id.to_string(),
                    op,
                    value: numeric_literal(rhs)?,
                }),
                (lhs, Expr::Name(name)) => Some(Condition::Compare {
                    name: name.id.to_string(),
                    op: op.flipped(),
                    value: numeric_literal(lhs)?,
                }),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> FileAnalysis {
        PythonAnalyzer::new().analyze("/main.py", source).unwrap()
    }

    fn names(set: &IndexSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_assigned_and_referenced() {
        let analysis = analyze("n = 4\nprint(n)\ntotal = n + 1\ntotal += n\n");
        assert_eq!(names(&analysis.lines[&1].assigned), vec!["n"]);
        assert!(analysis.lines[&1].referenced.is_empty());
        assert_eq!(names(&analysis.lines[&2].referenced), vec!["n"]);
        assert_eq!(names(&analysis.lines[&2].function_calls), vec!["print"]);
        assert_eq!(names(&analysis.lines[&3].assigned), vec!["total"]);
        assert_eq!(names(&analysis.lines[&4].assigned), vec!["total"]);
        assert_eq!(names(&analysis.lines[&4].referenced), vec!["total", "n"]);
    }

    #[test]
    fn test_comprehension_facts() {
        let analysis = analyze("limit = 3\nsquares = [x * x for x in range(limit)]\n");
        let comp = &analysis.comprehensions[&2];
        assert_eq!(names(&comp.assigned_names), vec!["squares"]);
        assert_eq!(names(&comp.referenced_names), vec!["limit"]);
        assert_eq!(names(&comp.comp_targets), vec!["x"]);
        assert!(!analysis.lines[&2].referenced.contains("x"));
    }

    #[test]
    fn test_subscripts() {
        let analysis = analyze("beats = {1: 'a'}\nbeats[1] = 'b'\nprint(beats[-1], d['k'])\n");
        let store = &analysis.lines[&2].subscripts;
        assert_eq!(store.len(), 1);
        assert!(store[0].store);
        assert_eq!(store[0].label(), "beats[1]");
        assert!(analysis.lines[&2].referenced.contains("beats"));

        let loads: Vec<_> = analysis.lines[&3].subscripts.iter().map(|s| s.label()).collect();
        assert_eq!(loads, vec!["beats[-1]", "d['k']"]);
    }

    #[test]
    fn test_function_locals_and_line_functions() {
        let source = "\
def add(a, b=1, *rest):
    global counter
    total = a + b
    counter = total
    for item in rest:
        total += item
    return total

x = add(1)
";
        let analysis = analyze(source);
        assert_eq!(analysis.function_locals["add"], vec!["a", "b", "rest", "total", "item"]);
        assert!(analysis.defined_functions.contains("add"));
        assert!(!analysis.lines[&1].assigned.contains("add"));
        for line in 2..=7 {
            assert_eq!(analysis.line_functions.get(&line).map(String::as_str), Some("add"));
        }
        assert!(!analysis.line_functions.contains_key(&1));
        assert!(!analysis.line_functions.contains_key(&9));
        assert_eq!(analysis.control[&7].kind, StatementKind::Return);
    }

    #[test]
    fn test_control_flow_metadata() {
        let source = "\
for i in range(10):
    if i > 3:
        break
        print('never')
    elif 0 < i:
        continue
    while i != 2 and i < 9:
        i += 1
";
        let analysis = analyze(source);
        assert_eq!(analysis.control[&1].kind, StatementKind::For);
        assert_eq!(analysis.control[&2].kind, StatementKind::If);
        assert_eq!(analysis.control[&3].guard, Some(2));
        assert_eq!(analysis.control[&3].dead_range, Some((4, 4)));
        assert_eq!(analysis.control[&4].guard, Some(2));
        assert_eq!(analysis.control[&5].kind, StatementKind::Elif);
        assert_eq!(analysis.control[&6].guard, Some(5));
        assert_eq!(analysis.control[&6].indent, 8);
        assert_eq!(
            analysis.control[&5].condition,
            Some(Condition::Compare { name: "i".into(), op: CompareOp::Gt, value: 0.0 })
        );
        assert!(matches!(
            analysis.control[&7].condition,
            Some(Condition::And(ref parts)) if parts.len() == 2
        ));
        assert_eq!(analysis.control[&8].guard, Some(7));
    }

    #[test]
    fn test_guard_covers_body_until_condition_name_is_rebound() {
        let source = "\
n = 0
while n < 3:
    print(n)
    total = n * 2
    n += 1
    print(total)
";
        let analysis = analyze(source);
        assert_eq!(analysis.control[&3].guard, Some(2));
        assert_eq!(analysis.control[&4].guard, Some(2));
        assert_eq!(analysis.control[&5].guard, Some(2));
        assert_eq!(analysis.control[&6].guard, None);
    }

    #[test]
    fn test_parse_error() {
        let err = PythonAnalyzer::new().analyze("/broken.py", "def (:\n").unwrap_err();
        assert!(
            matches!(err, AnalysisError::Parse { ref filename, .. } if filename == "/broken.py")
        );
    }
}
