//! Whole-program legality check for the static profiles.
//!
//! The partial evaluator only meets the constructs it actually runs, so a
//! callable nobody calls, an `if` arm that folds to false or a loop that runs
//! zero times would otherwise slip past the validator. This pass walks every
//! callable that survived `@Config`, every branch and every loop body, and
//! asks the validator about the constructs it can recognise without running
//! anything: result comparisons, branches and loops on measurement-dependent
//! values, run-time qubit array sizes and recursion.
//!
//! Measurement dependence is tracked per callable by variable name and
//! ignores statement order. A variable is measured when it holds results
//! produced by `M` or by a callable returning `Result`; it is dynamic when
//! its value is computed from one, or assigned under a branch on one.

use rustc_hash::FxHashSet;
use tracing::debug;

use qirc_syntax::ast::{BinOp, Block, Expr, ExprKind, QubitInit, Span, Stmt, StmtKind, Ty};

use crate::error::LoweringResult;
use crate::profile::ConstructKind;

use super::Session;
use super::callgraph;
use super::resolve::{Callee, CallableTable, Intrinsic, UserCallable};

/// Check every callable in `table` against the session's profile.
pub(crate) fn check_program(session: &Session<'_>, table: &CallableTable<'_>) -> LoweringResult<()> {
    if let Some(site) = callgraph::program_recursion(session, table) {
        session.check(ConstructKind::Recursion, site)?;
    }

    for &callable in table.in_source_order() {
        let mut scan = Scan::new(session, table, callable);
        scan.settle();
        scan.report = true;
        scan.block(&callable.callable.body, false)?;
    }
    debug!(callables = table.in_source_order().len(), "static legality check passed");
    Ok(())
}

fn holds_result(ty: &Ty) -> bool {
    match ty {
        Ty::Result => true,
        Ty::Array(item) => holds_result(item),
        _ => false,
    }
}

struct Scan<'s, 'p> {
    session: &'s Session<'s>,
    table: &'s CallableTable<'p>,
    current: UserCallable<'p>,
    measured: FxHashSet<&'p str>,
    dynamic: FxHashSet<&'p str>,
    /// Whether this walk reports to the validator or only collects names.
    report: bool,
    changed: bool,
}

impl<'s, 'p> Scan<'s, 'p> {
    fn new(session: &'s Session<'s>, table: &'s CallableTable<'p>, current: UserCallable<'p>) -> Self {
        let measured = current
            .callable
            .params
            .iter()
            .filter(|p| holds_result(&p.ty))
            .map(|p| p.name.name.as_str())
            .collect();
        Self {
            session,
            table,
            current,
            measured,
            dynamic: FxHashSet::default(),
            report: false,
            changed: false,
        }
    }

    /// Collect measured and dynamic names until nothing new is found.
    fn settle(&mut self) {
        let callable = self.current.callable;
        let body = &callable.body;
        loop {
            self.changed = false;
            // Nothing is reported while collecting, so the walk cannot fail.
            let _ = self.block(body, false);
            if !self.changed {
                break;
            }
        }
    }

    fn flag(&self, kind: ConstructKind, span: Span) -> LoweringResult<()> {
        if self.report {
            self.session.check(kind, span)
        } else {
            Ok(())
        }
    }

    fn bind(&mut self, name: &'p str, value: &Expr, guarded: bool) {
        let added = if self.is_measured(value) {
            self.measured.insert(name)
        } else if guarded || self.is_dynamic(value) {
            self.dynamic.insert(name)
        } else {
            false
        };
        self.changed |= added;
    }

    fn callee(&self, path: &[String], span: Span) -> Option<Callee<'p>> {
        self.table.resolve(self.session, self.current.ns, path, span).ok()
    }

    /// Whether `expr` evaluates to results that come from a measurement.
    fn is_measured(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Call { callee, .. } => match self.callee(callee, expr.span) {
                Some(Callee::Intrinsic(Intrinsic::Measure)) => true,
                Some(Callee::User(user)) => holds_result(&user.callable.output),
                _ => false,
            },
            ExprKind::Path(path) => match path.as_slice() {
                [name] => self.measured.contains(name.as_str()),
                _ => false,
            },
            ExprKind::Index { target, .. } => self.is_measured(target),
            ExprKind::Array(items) => items.iter().any(|item| self.is_measured(item)),
            ExprKind::Binary {
                op: BinOp::Add,
                lhs,
                rhs,
            } => self.is_measured(lhs) || self.is_measured(rhs),
            ExprKind::Paren(inner) => self.is_measured(inner),
            _ => false,
        }
    }

    /// Whether the value of `expr` depends on a measurement.
    fn is_dynamic(&self, expr: &Expr) -> bool {
        if self.is_measured(expr) {
            return true;
        }
        match &expr.kind {
            ExprKind::Path(path) => match path.as_slice() {
                [name] => self.dynamic.contains(name.as_str()),
                _ => false,
            },
            ExprKind::Call { callee, args } => match self.callee(callee, expr.span) {
                Some(Callee::Intrinsic(Intrinsic::Length)) => false,
                _ => args.iter().any(|arg| self.is_dynamic(arg)),
            },
            ExprKind::Index { target, index } => self.is_dynamic(target) || self.is_dynamic(index),
            ExprKind::Array(items) => items.iter().any(|item| self.is_dynamic(item)),
            ExprKind::Range { start, end } => self.is_dynamic(start) || self.is_dynamic(end),
            ExprKind::Unary { operand, .. } => self.is_dynamic(operand),
            ExprKind::Binary { lhs, rhs, .. } => self.is_dynamic(lhs) || self.is_dynamic(rhs),
            ExprKind::Paren(inner) => self.is_dynamic(inner),
            ExprKind::Int(_) | ExprKind::Double(_) | ExprKind::Bool(_) | ExprKind::Result(_) => false,
        }
    }

    fn block(&mut self, block: &'p Block, guarded: bool) -> LoweringResult<()> {
        for stmt in &block.stmts {
            self.stmt(stmt, guarded)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &'p Stmt, guarded: bool) -> LoweringResult<()> {
        match &stmt.kind {
            StmtKind::Use { init, .. } => {
                if let QubitInit::Array(size) = init {
                    self.expr(size)?;
                    if self.is_dynamic(size) {
                        self.flag(ConstructKind::DynamicQubitAllocation, size.span)?;
                    }
                }
            }
            StmtKind::Let { name, value }
            | StmtKind::Mutable { name, value }
            | StmtKind::Set { name, value } => {
                self.expr(value)?;
                self.bind(&name.name, value, guarded);
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                let mut guard = guarded;
                for (cond, body) in branches {
                    self.expr(cond)?;
                    if self.is_dynamic(cond) {
                        self.flag(ConstructKind::MeasurementBranch, cond.span)?;
                        guard = true;
                    }
                    self.block(body, guard)?;
                }
                if let Some(body) = otherwise {
                    self.block(body, guard)?;
                }
            }
            StmtKind::For { var, iter, body } => {
                self.expr(iter)?;
                if matches!(iter.kind, ExprKind::Range { .. }) && self.is_dynamic(iter) {
                    self.flag(ConstructKind::DynamicLoop, iter.span)?;
                }
                self.flag(ConstructKind::ClassicalLoop, stmt.span)?;
                let name = var.name.as_str();
                let added = if self.is_measured(iter) {
                    self.measured.insert(name)
                } else if self.is_dynamic(iter) {
                    self.dynamic.insert(name)
                } else {
                    false
                };
                self.changed |= added;
                self.block(body, guarded)?;
            }
            StmtKind::While { cond, body } => {
                self.flag(ConstructKind::ClassicalLoop, stmt.span)?;
                self.expr(cond)?;
                let dynamic = self.is_dynamic(cond);
                if dynamic {
                    self.flag(ConstructKind::DynamicLoop, cond.span)?;
                }
                self.block(body, guarded || dynamic)?;
            }
            StmtKind::Return(Some(value)) | StmtKind::Expr(value) => self.expr(value)?,
            StmtKind::Return(None) => {}
        }
        Ok(())
    }

    fn expr(&mut self, expr: &'p Expr) -> LoweringResult<()> {
        match &expr.kind {
            ExprKind::Binary { op, lhs, rhs } if matches!(op, BinOp::And | BinOp::Or) => {
                self.expr(lhs)?;
                if self.is_dynamic(lhs) {
                    self.flag(ConstructKind::MeasurementBranch, expr.span)?;
                }
                self.expr(rhs)?;
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                let compares = matches!(op, BinOp::Eq | BinOp::NotEq);
                if compares && (self.is_measured(lhs) || self.is_measured(rhs)) {
                    self.flag(ConstructKind::MeasurementComparison, expr.span)?;
                }
            }
            ExprKind::Call { args, .. } | ExprKind::Array(args) => {
                for arg in args {
                    self.expr(arg)?;
                }
            }
            ExprKind::Index { target, index } => {
                self.expr(target)?;
                self.expr(index)?;
            }
            ExprKind::Range { start, end } => {
                self.expr(start)?;
                self.expr(end)?;
            }
            ExprKind::Unary { operand, .. } | ExprKind::Paren(operand) => self.expr(operand)?,
            ExprKind::Int(_)
            | ExprKind::Double(_)
            | ExprKind::Bool(_)
            | ExprKind::Result(_)
            | ExprKind::Path(_) => {}
        }
        Ok(())
    }
}
