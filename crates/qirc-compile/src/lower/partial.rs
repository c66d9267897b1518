//! Compile-time evaluation for the Base and Adaptive profiles.
//!
//! The entry point is run by an interpreter whose effects are IR
//! instructions. Classical values are folded, callables inlined and loops
//! unrolled; qubits and results receive static ids. A value that depends on
//! a measurement becomes [`Value::Dynamic`], and a branch on one splits the
//! entry function into real blocks joined by `phi`s.
//!
//! A statically infinite loop keeps this evaluator running forever; the
//! supervisor's deadline is what stops it.

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use tracing::debug;

use qirc_ir::{BinaryOp, FunctionBuilder, IntPredicate, Module, Operand, Type};
use qirc_syntax::ast::{
    BinOp, Block, Expr, ExprKind, QubitInit, Span, Stmt, StmtKind, Ty, UnOp,
};

use crate::error::LoweringResult;
use crate::profile::ConstructKind;

use super::resolve::{Callee, CallableTable, Intrinsic, UserCallable};
use super::runtime::{self, no_label};
use super::{ENTRY_POINT_GROUP, ENTRY_POINT_SYMBOL, ResourceUsage, Session, unimplemented};

/// Evaluate `entry` into the module's single entry function.
pub(crate) fn lower_entry<'p>(
    session: &Session<'_>,
    table: &CallableTable<'p>,
    entry: UserCallable<'p>,
    module: &mut Module,
) -> LoweringResult<Option<ResourceUsage>> {
    let builder = FunctionBuilder::new(ENTRY_POINT_SYMBOL, vec![], Type::Void)
        .with_attributes(ENTRY_POINT_GROUP);

    let mut eval = Evaluator {
        session,
        table,
        module,
        builder,
        frames: Vec::new(),
        qubits: QubitAllocator::default(),
        next_result: 0,
    };

    eval.emit(runtime::INITIALIZE, vec![no_label()])?;
    let value = eval.invoke(entry, Vec::new(), entry.callable.name.span)?;
    eval.record_output(&value, &entry.callable.output, entry.callable.name.span)?;
    eval.builder.ret(None)?;

    let usage = ResourceUsage {
        qubits: eval.qubits.high_watermark(),
        results: eval.next_result,
    };
    debug!(qubits = usage.qubits, results = usage.results, "static evaluation finished");

    let Evaluator { builder, module, .. } = eval;
    module.add_function(builder.finish())?;
    Ok(Some(usage))
}

/// Result of a measurement or a literal.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ResultValue {
    Lit(bool),
    Measured(u64),
}

/// A compile-time value.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Unit,
    Int(i64),
    Double(f64),
    Bool(bool),
    Result(ResultValue),
    Qubit(u64),
    Array(Vec<Value>),
    /// Run-time `i64` or `i1` derived from a measurement.
    Dynamic(Operand),
}

impl Value {
    fn type_name(&self) -> String {
        match self {
            Value::Unit => "Unit".into(),
            Value::Int(_) => "Int".into(),
            Value::Double(_) => "Double".into(),
            Value::Bool(_) => "Bool".into(),
            Value::Result(_) => "Result".into(),
            Value::Qubit(_) => "Qubit".into(),
            Value::Array(items) => match items.first() {
                Some(first) => format!("{}[]", first.type_name()),
                None => "array".into(),
            },
            Value::Dynamic(op) => match op.ty() {
                Type::I1 => "Bool".into(),
                _ => "Int".into(),
            },
        }
    }

    fn matches(&self, ty: &Ty) -> bool {
        match (self, ty) {
            (Value::Unit, Ty::Unit)
            | (Value::Int(_), Ty::Int)
            | (Value::Double(_), Ty::Double)
            | (Value::Bool(_), Ty::Bool)
            | (Value::Result(_), Ty::Result)
            | (Value::Qubit(_), Ty::Qubit) => true,
            (Value::Dynamic(op), Ty::Int) => op.ty() == Type::I64,
            (Value::Dynamic(op), Ty::Bool) => op.ty() == Type::I1,
            (Value::Array(items), Ty::Array(inner)) => items.iter().all(|v| v.matches(inner)),
            _ => false,
        }
    }

    /// `i64` operand for an `Int` value.
    fn as_int_operand(&self) -> Option<Operand> {
        match self {
            Value::Int(v) => Some(Operand::i64(*v)),
            Value::Dynamic(op) if op.ty() == Type::I64 => Some(op.clone()),
            _ => None,
        }
    }

    /// `i1` operand for a `Bool` value.
    fn as_bool_operand(&self) -> Option<Operand> {
        match self {
            Value::Bool(b) => Some(Operand::Bool(*b)),
            Value::Dynamic(op) if op.ty() == Type::I1 => Some(op.clone()),
            _ => None,
        }
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, Value::Dynamic(_))
    }
}

/// Static qubit ids. Released ids are reused lowest first.
#[derive(Debug, Clone, Default)]
struct QubitAllocator {
    free: BTreeSet<u64>,
    next: u64,
}

impl QubitAllocator {
    fn allocate(&mut self) -> u64 {
        if let Some(id) = self.free.pop_first() {
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    fn release(&mut self, id: u64) {
        self.free.insert(id);
    }

    fn high_watermark(&self) -> u64 {
        self.next
    }

    /// Rewind to `snapshot` while keeping every id handed out since then
    /// available for reuse.
    fn rewind(&mut self, snapshot: &QubitAllocator) {
        let high = self.next.max(snapshot.next);
        let mut free = snapshot.free.clone();
        free.extend(snapshot.next..high);
        self.free = free;
        self.next = high;
    }
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    vars: FxHashMap<String, Binding>,
    qubits: Vec<u64>,
}

/// One inlined call.
#[derive(Debug, Clone)]
struct Frame {
    ns: String,
    scopes: Vec<Scope>,
}

enum Flow {
    Next,
    Return(Value),
}

struct Evaluator<'s, 'p> {
    session: &'s Session<'s>,
    table: &'s CallableTable<'p>,
    module: &'s mut Module,
    builder: FunctionBuilder,
    frames: Vec<Frame>,
    qubits: QubitAllocator,
    next_result: u64,
}

impl<'p> Evaluator<'_, 'p> {
    fn emit(&mut self, callee: &str, args: Vec<Operand>) -> LoweringResult<Option<Operand>> {
        runtime::call(self.module, &mut self.builder, callee, args)
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames
            .last_mut()
            .unwrap_or_else(|| unreachable!("evaluation always runs inside a frame"))
    }

    fn current_ns(&self) -> &str {
        self.frames.last().map_or("", |f| f.ns.as_str())
    }

    fn push_scope(&mut self) {
        self.frame().scopes.push(Scope::default());
    }

    fn pop_scope(&mut self) {
        if let Some(scope) = self.frame().scopes.pop() {
            for id in scope.qubits {
                self.qubits.release(id);
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.frames
            .last()?
            .scopes
            .iter()
            .rev()
            .find_map(|s| s.vars.get(name))
    }

    fn declare(&mut self, name: &str, value: Value, mutable: bool, span: Span) -> LoweringResult<()> {
        if self.lookup(name).is_some() {
            return Err(crate::error::LoweringError::Duplicate {
                name: name.to_string(),
                location: self.session.loc(span),
            });
        }
        let scope = self
            .frame()
            .scopes
            .last_mut()
            .unwrap_or_else(|| unreachable!("frames always hold a scope"));
        scope.vars.insert(name.to_string(), Binding { value, mutable });
        Ok(())
    }

    fn assign(&mut self, name: &str, value: Value, span: Span) -> LoweringResult<()> {
        let session = self.session;
        let binding = self
            .frame()
            .scopes
            .iter_mut()
            .rev()
            .find_map(|s| s.vars.get_mut(name))
            .ok_or_else(|| session.unresolved(name, "not a variable in scope", span))?;
        if !binding.mutable {
            return Err(session.unresolved(name, "cannot assign to an immutable binding", span));
        }
        if binding.value.type_name() != value.type_name()
            && !matches!((&binding.value, &value), (Value::Array(_), Value::Array(_)))
        {
            return Err(session.mismatch(binding.value.type_name(), value.type_name(), span));
        }
        binding.value = value;
        Ok(())
    }

    /// Inline a user callable.
    fn invoke(&mut self, callee: UserCallable<'p>, args: Vec<Value>, span: Span) -> LoweringResult<Value> {
        let callable = callee.callable;
        if args.len() != callable.params.len() {
            return Err(self.session.mismatch(
                format!("{} arguments to {}", callable.params.len(), callable.name.name),
                format!("{}", args.len()),
                span,
            ));
        }

        let mut scope = Scope::default();
        for (param, arg) in callable.params.iter().zip(args) {
            if !arg.matches(&param.ty) {
                return Err(self.session.mismatch(param.ty.to_string(), arg.type_name(), span));
            }
            scope.vars.insert(
                param.name.name.clone(),
                Binding {
                    value: arg,
                    mutable: false,
                },
            );
        }

        self.frames.push(Frame {
            ns: callee.ns.to_string(),
            scopes: vec![scope],
        });
        let flow = self.eval_block(&callable.body);
        self.frames.pop();

        let value = match flow? {
            Flow::Return(value) => value,
            Flow::Next => Value::Unit,
        };
        if !value.matches(&callable.output) {
            if value == Value::Unit {
                return Err(self.session.eval_error(
                    format!("'{}' ended without returning a value", callable.name.name),
                    callable.name.span,
                ));
            }
            return Err(self.session.mismatch(callable.output.to_string(), value.type_name(), span));
        }
        Ok(value)
    }

    fn eval_block(&mut self, block: &Block) -> LoweringResult<Flow> {
        self.push_scope();
        for stmt in &block.stmts {
            match self.eval_stmt(stmt) {
                Ok(Flow::Next) => {}
                other => {
                    self.pop_scope();
                    return other;
                }
            }
        }
        self.pop_scope();
        Ok(Flow::Next)
    }

    fn eval_stmt(&mut self, stmt: &Stmt) -> LoweringResult<Flow> {
        match &stmt.kind {
            StmtKind::Use { name, init } => {
                let value = self.allocate(init, stmt.span)?;
                self.declare(&name.name, value, false, name.span)?;
            }
            StmtKind::Let { name, value } => {
                let value = self.eval_expr(value)?;
                self.declare(&name.name, value, false, name.span)?;
            }
            StmtKind::Mutable { name, value } => {
                let value = self.eval_expr(value)?;
                self.declare(&name.name, value, true, name.span)?;
            }
            StmtKind::Set { name, value } => {
                let value = self.eval_expr(value)?;
                self.assign(&name.name, value, name.span)?;
            }
            StmtKind::If {
                branches,
                otherwise,
            } => return self.eval_if(branches, otherwise.as_ref()),
            StmtKind::For { var, iter, body } => {
                return self.eval_for(&var.name, iter, body, stmt.span);
            }
            StmtKind::While { cond, body } => {
                self.session.check(ConstructKind::ClassicalLoop, stmt.span)?;
                loop {
                    match self.eval_expr(cond)? {
                        Value::Bool(true) => {
                            if let Flow::Return(v) = self.eval_block(body)? {
                                return Ok(Flow::Return(v));
                            }
                        }
                        Value::Bool(false) => break,
                        Value::Dynamic(op) if op.ty() == Type::I1 => {
                            self.session.check(ConstructKind::DynamicLoop, cond.span)?;
                            return Err(unimplemented("measurement-dependent loop"));
                        }
                        other => return Err(self.session.mismatch("Bool", other.type_name(), cond.span)),
                    }
                }
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Unit,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Expr(expr) => {
                self.eval_expr(expr)?;
            }
        }
        Ok(Flow::Next)
    }

    fn allocate(&mut self, init: &QubitInit, span: Span) -> LoweringResult<Value> {
        let value = match init {
            QubitInit::Single => {
                self.session.check(ConstructKind::QubitAllocation, span)?;
                let id = self.qubits.allocate();
                self.frame_scope_qubits().push(id);
                Value::Qubit(id)
            }
            QubitInit::Array(size) => match self.eval_expr(size)? {
                Value::Int(n) => {
                    self.session.check(ConstructKind::QubitAllocation, span)?;
                    if n < 0 {
                        return Err(self.session.eval_error(
                            format!("cannot allocate {n} qubits"),
                            size.span,
                        ));
                    }
                    let mut items = Vec::new();
                    for _ in 0..n {
                        let id = self.qubits.allocate();
                        self.frame_scope_qubits().push(id);
                        items.push(Value::Qubit(id));
                    }
                    Value::Array(items)
                }
                Value::Dynamic(op) if op.ty() == Type::I64 => {
                    self.session.check(ConstructKind::DynamicQubitAllocation, size.span)?;
                    return Err(unimplemented("qubit allocation with a run-time size"));
                }
                other => return Err(self.session.mismatch("Int", other.type_name(), size.span)),
            },
        };
        debug!(watermark = self.qubits.high_watermark(), "allocated qubits");
        Ok(value)
    }

    fn frame_scope_qubits(&mut self) -> &mut Vec<u64> {
        &mut self
            .frame()
            .scopes
            .last_mut()
            .unwrap_or_else(|| unreachable!("frames always hold a scope"))
            .qubits
    }

    fn eval_for(&mut self, var: &str, iter: &Expr, body: &Block, span: Span) -> LoweringResult<Flow> {
        let items: Box<dyn Iterator<Item = Value>> = match &iter.kind {
            ExprKind::Range { start, end } => {
                let start_value = self.eval_expr(start)?;
                let end_value = self.eval_expr(end)?;
                match (start_value, end_value) {
                    (Value::Int(a), Value::Int(b)) => Box::new((a..=b).map(Value::Int)),
                    (a, b) if a.is_dynamic() || b.is_dynamic() => {
                        self.session.check(ConstructKind::DynamicLoop, iter.span)?;
                        return Err(unimplemented("loop over a measurement-dependent range"));
                    }
                    (Value::Int(_), other) | (other, _) => {
                        return Err(self.session.mismatch("Int", other.type_name(), iter.span));
                    }
                }
            }
            _ => match self.eval_expr(iter)? {
                Value::Array(items) => Box::new(items.into_iter()),
                other => return Err(self.session.mismatch("array or range", other.type_name(), iter.span)),
            },
        };

        self.session.check(ConstructKind::ClassicalLoop, span)?;
        for item in items {
            self.push_scope();
            let declared = self.declare(var, item, false, span);
            let flow = declared.and_then(|()| self.eval_block(body));
            self.pop_scope();
            if let Flow::Return(v) = flow? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Next)
    }

    fn eval_if(&mut self, branches: &[(Expr, Block)], otherwise: Option<&Block>) -> LoweringResult<Flow> {
        let Some(((cond, body), rest)) = branches.split_first() else {
            return match otherwise {
                Some(block) => self.eval_block(block),
                None => Ok(Flow::Next),
            };
        };

        match self.eval_expr(cond)? {
            Value::Bool(true) => self.eval_block(body),
            Value::Bool(false) => self.eval_if(rest, otherwise),
            Value::Dynamic(op) if op.ty() == Type::I1 => {
                self.session.check(ConstructKind::MeasurementBranch, cond.span)?;
                self.dynamic_if(op, body, rest, otherwise, cond.span)
            }
            other => Err(self.session.mismatch("Bool", other.type_name(), cond.span)),
        }
    }

    /// Split on a run-time condition and merge the two resulting states.
    fn dynamic_if(
        &mut self,
        cond: Operand,
        body: &Block,
        rest: &[(Expr, Block)],
        otherwise: Option<&Block>,
        span: Span,
    ) -> LoweringResult<Flow> {
        let then_label = self.builder.add_block("then");
        let else_label = self.builder.add_block("else");
        let merge_label = self.builder.add_block("continue");
        self.builder.cond_br(cond, &then_label, &else_label)?;

        let frames_before = self.frames.clone();
        let qubits_before = self.qubits.clone();

        self.builder.position_at(&then_label)?;
        if let Flow::Return(_) = self.eval_block(body)? {
            return Err(unimplemented("return from a measurement-dependent branch"));
        }
        let then_end = self.builder.current_block().to_string();
        self.builder.br(&merge_label)?;
        let then_frames = std::mem::replace(&mut self.frames, frames_before);
        self.qubits.rewind(&qubits_before);

        self.builder.position_at(&else_label)?;
        if let Flow::Return(_) = self.eval_if(rest, otherwise)? {
            return Err(unimplemented("return from a measurement-dependent branch"));
        }
        let else_end = self.builder.current_block().to_string();
        self.builder.br(&merge_label)?;
        self.qubits.rewind(&qubits_before);

        self.builder.position_at(&merge_label)?;
        self.merge_frames(&then_frames, &then_end, &else_end, span)?;
        Ok(Flow::Next)
    }

    /// Replace every variable whose value differs between the branches with a `phi`.
    fn merge_frames(&mut self, then_frames: &[Frame], then_end: &str, else_end: &str, span: Span) -> LoweringResult<()> {
        let mut else_frames = std::mem::take(&mut self.frames);
        for (frame, then_frame) in else_frames.iter_mut().zip(then_frames) {
            for (scope, then_scope) in frame.scopes.iter_mut().zip(&then_frame.scopes) {
                let mut names: Vec<&String> = scope.vars.keys().collect();
                names.sort();
                let names: Vec<String> = names.into_iter().cloned().collect();
                for name in names {
                    let Some(then_binding) = then_scope.vars.get(&name) else {
                        continue;
                    };
                    let Some(binding) = scope.vars.get_mut(&name) else {
                        continue;
                    };
                    if binding.value != then_binding.value {
                        binding.value = self.merge_value(
                            &name,
                            &then_binding.value,
                            then_end,
                            &binding.value,
                            else_end,
                            span,
                        )?;
                    }
                }
            }
        }
        self.frames = else_frames;
        Ok(())
    }

    fn merge_value(
        &mut self,
        name: &str,
        then_value: &Value,
        then_end: &str,
        else_value: &Value,
        else_end: &str,
        span: Span,
    ) -> LoweringResult<Value> {
        if let (Some(a), Some(b)) = (then_value.as_int_operand(), else_value.as_int_operand()) {
            self.session.check(ConstructKind::DynamicClassicalValue, span)?;
            let phi = self.builder.phi(
                name,
                Type::I64,
                vec![(a, then_end.to_string()), (b, else_end.to_string())],
            )?;
            return Ok(Value::Dynamic(phi));
        }
        if let (Some(a), Some(b)) = (then_value.as_bool_operand(), else_value.as_bool_operand()) {
            self.session.check(ConstructKind::DynamicClassicalValue, span)?;
            let phi = self.builder.phi(
                name,
                Type::I1,
                vec![(a, then_end.to_string()), (b, else_end.to_string())],
            )?;
            return Ok(Value::Dynamic(phi));
        }
        match (then_value, else_value) {
            (Value::Double(_), Value::Double(_)) => {
                self.session.check(ConstructKind::DynamicDoubleValue, span)?;
                Err(unimplemented("merging Double values across a measurement-dependent branch"))
            }
            (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
                let mut merged = Vec::with_capacity(a.len());
                for (x, y) in a.iter().zip(b) {
                    merged.push(if x == y {
                        x.clone()
                    } else {
                        self.merge_value(name, x, then_end, y, else_end, span)?
                    });
                }
                Ok(Value::Array(merged))
            }
            _ => Err(unimplemented(format!(
                "merging {} values across a measurement-dependent branch",
                then_value.type_name()
            ))),
        }
    }

    fn eval_expr(&mut self, expr: &Expr) -> LoweringResult<Value> {
        match &expr.kind {
            ExprKind::Int(v) => Ok(Value::Int(*v)),
            ExprKind::Double(v) => Ok(Value::Double(*v)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Result(one) => Ok(Value::Result(ResultValue::Lit(*one))),
            ExprKind::Path(path) => match path.as_slice() {
                [name] => self
                    .lookup(name)
                    .map(|b| b.value.clone())
                    .ok_or_else(|| self.session.unresolved(name.as_str(), "not a variable in scope", expr.span)),
                _ => Err(self.session.unresolved(
                    path.join("."),
                    "callables cannot be used as values",
                    expr.span,
                )),
            },
            ExprKind::Paren(inner) => self.eval_expr(inner),
            ExprKind::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item)?);
                }
                Ok(Value::Array(values))
            }
            ExprKind::Index { target, index } => {
                let target_value = self.eval_expr(target)?;
                let index_value = self.eval_expr(index)?;
                match (target_value, index_value) {
                    (Value::Array(items), Value::Int(i)) => usize::try_from(i)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .ok_or_else(|| {
                            self.session.eval_error(
                                format!("index {i} is out of range for an array of length {}", items.len()),
                                index.span,
                            )
                        }),
                    (Value::Array(_), Value::Dynamic(_)) => {
                        self.session.check(ConstructKind::DynamicClassicalValue, index.span)?;
                        Err(unimplemented("array indexing with a measurement-dependent index"))
                    }
                    (Value::Array(_), other) => Err(self.session.mismatch("Int", other.type_name(), index.span)),
                    (other, _) => Err(self.session.mismatch("array", other.type_name(), target.span)),
                }
            }
            ExprKind::Range { .. } => Err(unimplemented("range value outside a for loop")),
            ExprKind::Unary { op, operand } => {
                let value = self.eval_expr(operand)?;
                self.eval_unary(*op, value, expr.span)
            }
            ExprKind::Binary { op, lhs, rhs } if matches!(op, BinOp::And | BinOp::Or) => {
                self.eval_short_circuit(*op, lhs, rhs, expr.span)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval_expr(lhs)?;
                let r = self.eval_expr(rhs)?;
                self.eval_binary(*op, l, r, expr.span)
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, expr.span),
        }
    }

    fn eval_unary(&mut self, op: UnOp, value: Value, span: Span) -> LoweringResult<Value> {
        match (op, value) {
            (UnOp::Neg, Value::Int(v)) => v
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| self.session.eval_error("integer overflow in negation", span)),
            (UnOp::Neg, Value::Double(v)) => Ok(Value::Double(-v)),
            (UnOp::Neg, Value::Dynamic(op)) if op.ty() == Type::I64 => {
                self.session.check(ConstructKind::DynamicClassicalValue, span)?;
                Ok(Value::Dynamic(self.builder.binary(BinaryOp::Sub, Operand::i64(0), op)?))
            }
            (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnOp::Not, Value::Dynamic(op)) if op.ty() == Type::I1 => {
                self.session.check(ConstructKind::DynamicClassicalValue, span)?;
                Ok(Value::Dynamic(self.builder.binary(BinaryOp::Xor, op, Operand::Bool(true))?))
            }
            (UnOp::Neg, other) => Err(self.session.mismatch("Int or Double", other.type_name(), span)),
            (UnOp::Not, other) => Err(self.session.mismatch("Bool", other.type_name(), span)),
        }
    }

    fn eval_short_circuit(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, span: Span) -> LoweringResult<Value> {
        let is_and = op == BinOp::And;
        match self.eval_expr(lhs)? {
            Value::Bool(b) if b != is_and => Ok(Value::Bool(b)),
            Value::Bool(_) => match self.eval_expr(rhs)? {
                v @ Value::Bool(_) => Ok(v),
                Value::Dynamic(op) if op.ty() == Type::I1 => Ok(Value::Dynamic(op)),
                other => Err(self.session.mismatch("Bool", other.type_name(), rhs.span)),
            },
            Value::Dynamic(cond) if cond.ty() == Type::I1 => {
                self.session.check(ConstructKind::MeasurementBranch, span)?;
                let from = self.builder.current_block().to_string();
                let rhs_label = self.builder.add_block("rhs");
                let merge_label = self.builder.add_block("sc");
                if is_and {
                    self.builder.cond_br(cond, &rhs_label, &merge_label)?;
                } else {
                    self.builder.cond_br(cond, &merge_label, &rhs_label)?;
                }

                self.builder.position_at(&rhs_label)?;
                let r = self.eval_expr(rhs)?;
                let r = r
                    .as_bool_operand()
                    .ok_or_else(|| self.session.mismatch("Bool", r.type_name(), rhs.span))?;
                let rhs_end = self.builder.current_block().to_string();
                self.builder.br(&merge_label)?;

                self.builder.position_at(&merge_label)?;
                let phi = self.builder.phi(
                    if is_and { "and" } else { "or" },
                    Type::I1,
                    vec![(Operand::Bool(!is_and), from), (r, rhs_end)],
                )?;
                Ok(Value::Dynamic(phi))
            }
            other => Err(self.session.mismatch("Bool", other.type_name(), lhs.span)),
        }
    }

    fn eval_binary(&mut self, op: BinOp, l: Value, r: Value, span: Span) -> LoweringResult<Value> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => self.int_binary(op, a, b, span),
            (Value::Double(a), Value::Double(b)) => double_binary(op, a, b)
                .ok_or_else(|| self.session.mismatch("arithmetic or comparison operator", op.to_string(), span)),
            (Value::Bool(a), Value::Bool(b)) => match op {
                BinOp::Eq => Ok(Value::Bool(a == b)),
                BinOp::NotEq => Ok(Value::Bool(a != b)),
                _ => Err(self.session.mismatch("== or != on Bool", op.to_string(), span)),
            },
            (Value::Result(a), Value::Result(b)) if matches!(op, BinOp::Eq | BinOp::NotEq) => {
                self.compare_results(op, a, b, span)
            }
            (Value::Array(mut a), Value::Array(b)) if op == BinOp::Add => {
                a.extend(b);
                Ok(Value::Array(a))
            }
            (l, r) if l.is_dynamic() || r.is_dynamic() => self.dynamic_binary(op, &l, &r, span),
            (l, r) => Err(self.session.mismatch(l.type_name(), r.type_name(), span)),
        }
    }

    fn int_binary(&self, op: BinOp, a: i64, b: i64, span: Span) -> LoweringResult<Value> {
        let overflow = || self.session.eval_error(format!("integer overflow in {a} {op} {b}"), span);
        let value = match op {
            BinOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
            BinOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
            BinOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
            BinOp::Div | BinOp::Mod if b == 0 => {
                return Err(self.session.eval_error("division by zero", span));
            }
            BinOp::Div => Value::Int(a.checked_div(b).ok_or_else(overflow)?),
            BinOp::Mod => Value::Int(a.checked_rem(b).ok_or_else(overflow)?),
            BinOp::Eq => Value::Bool(a == b),
            BinOp::NotEq => Value::Bool(a != b),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::LtEq => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::GtEq => Value::Bool(a >= b),
            BinOp::And | BinOp::Or => return Err(self.session.mismatch("Bool", "Int", span)),
        };
        Ok(value)
    }

    /// `i1` holding whether result `r` is `One`.
    fn read_result(&mut self, r: ResultValue) -> LoweringResult<Operand> {
        match r {
            ResultValue::Lit(one) => Ok(Operand::Bool(one)),
            ResultValue::Measured(id) => self
                .emit(runtime::READ_RESULT, vec![Operand::ResultId(id)])?
                .ok_or_else(|| unimplemented("read_result without a value")),
        }
    }

    fn compare_results(&mut self, op: BinOp, a: ResultValue, b: ResultValue, span: Span) -> LoweringResult<Value> {
        let equal = match (a, b) {
            (ResultValue::Lit(x), ResultValue::Lit(y)) => {
                return Ok(Value::Bool((x == y) == (op == BinOp::Eq)));
            }
            (ResultValue::Measured(x), ResultValue::Measured(y)) if x == y => {
                return Ok(Value::Bool(op == BinOp::Eq));
            }
            _ => {
                self.session.check(ConstructKind::MeasurementComparison, span)?;
                let x = self.read_result(a)?;
                let y = self.read_result(b)?;
                match (x, y) {
                    (Operand::Bool(true), v) | (v, Operand::Bool(true)) => v,
                    (Operand::Bool(false), v) | (v, Operand::Bool(false)) => {
                        self.builder.binary(BinaryOp::Xor, v, Operand::Bool(true))?
                    }
                    (x, y) => self.builder.icmp(IntPredicate::Eq, x, y)?,
                }
            }
        };
        if op == BinOp::Eq {
            Ok(Value::Dynamic(equal))
        } else {
            Ok(Value::Dynamic(self.builder.binary(BinaryOp::Xor, equal, Operand::Bool(true))?))
        }
    }

    /// Arithmetic or comparison with at least one run-time operand.
    fn dynamic_binary(&mut self, op: BinOp, l: &Value, r: &Value, span: Span) -> LoweringResult<Value> {
        if matches!(l, Value::Double(_)) || matches!(r, Value::Double(_)) {
            self.session.check(ConstructKind::DynamicDoubleValue, span)?;
            return Err(unimplemented("Double arithmetic on a measurement-dependent value"));
        }
        self.session.check(ConstructKind::DynamicClassicalValue, span)?;

        if let (Some(a), Some(b)) = (l.as_int_operand(), r.as_int_operand()) {
            let value = match op {
                BinOp::Add => self.builder.binary(BinaryOp::Add, a, b)?,
                BinOp::Sub => self.builder.binary(BinaryOp::Sub, a, b)?,
                BinOp::Mul => self.builder.binary(BinaryOp::Mul, a, b)?,
                BinOp::Div | BinOp::Mod if b == Operand::i64(0) => {
                    return Err(self.session.eval_error("division by zero", span));
                }
                BinOp::Div => self.builder.binary(BinaryOp::SDiv, a, b)?,
                BinOp::Mod => self.builder.binary(BinaryOp::SRem, a, b)?,
                BinOp::Eq => self.builder.icmp(IntPredicate::Eq, a, b)?,
                BinOp::NotEq => self.builder.icmp(IntPredicate::Ne, a, b)?,
                BinOp::Lt => self.builder.icmp(IntPredicate::Slt, a, b)?,
                BinOp::LtEq => self.builder.icmp(IntPredicate::Sle, a, b)?,
                BinOp::Gt => self.builder.icmp(IntPredicate::Sgt, a, b)?,
                BinOp::GtEq => self.builder.icmp(IntPredicate::Sge, a, b)?,
                BinOp::And | BinOp::Or => return Err(self.session.mismatch("Bool", "Int", span)),
            };
            return Ok(Value::Dynamic(value));
        }

        if let (Some(a), Some(b)) = (l.as_bool_operand(), r.as_bool_operand()) {
            let value = match op {
                BinOp::Eq => self.builder.icmp(IntPredicate::Eq, a, b)?,
                BinOp::NotEq => self.builder.icmp(IntPredicate::Ne, a, b)?,
                _ => return Err(self.session.mismatch("== or != on Bool", op.to_string(), span)),
            };
            return Ok(Value::Dynamic(value));
        }

        Err(self.session.mismatch(l.type_name(), r.type_name(), span))
    }

    fn eval_call(&mut self, path: &[String], args: &[Expr], span: Span) -> LoweringResult<Value> {
        let ns = self.current_ns().to_string();
        let callee = self.table.resolve(self.session, &ns, path, span)?;

        let arity = match callee {
            Callee::Intrinsic(intrinsic) => intrinsic.arity(),
            Callee::User(user) => user.callable.params.len(),
        };
        if args.len() != arity {
            return Err(self.session.mismatch(
                format!("{arity} arguments to {}", path.join(".")),
                args.len().to_string(),
                span,
            ));
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg)?);
        }

        match callee {
            Callee::User(user) => {
                self.session.check(ConstructKind::CallableInvocation, span)?;
                self.invoke(user, values, span)
            }
            Callee::Intrinsic(intrinsic) => self.eval_intrinsic(intrinsic, values, args, span),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn eval_intrinsic(&mut self, intrinsic: Intrinsic, values: Vec<Value>, args: &[Expr], span: Span) -> LoweringResult<Value> {
        match intrinsic {
            Intrinsic::Gate { qis, angles, .. } => {
                self.session.check(ConstructKind::QuantumGate, span)?;
                let mut operands = Vec::with_capacity(values.len());
                let mut used = Vec::new();
                for (i, (value, arg)) in values.into_iter().zip(args).enumerate() {
                    match value {
                        Value::Double(v) if i < angles => operands.push(Operand::Double(v)),
                        Value::Qubit(id) if i >= angles => {
                            if used.contains(&id) {
                                return Err(self.session.eval_error(
                                    format!("qubit {id} is used twice in one gate"),
                                    arg.span,
                                ));
                            }
                            used.push(id);
                            operands.push(Operand::QubitId(id));
                        }
                        other => {
                            let expected = if i < angles { "Double" } else { "Qubit" };
                            return Err(self.session.mismatch(expected, other.type_name(), arg.span));
                        }
                    }
                }
                self.emit(&runtime::gate_symbol(qis), operands)?;
                Ok(Value::Unit)
            }
            Intrinsic::Measure => {
                self.session.check(ConstructKind::Measurement, span)?;
                let q = self.expect_qubit(&values[0], &args[0])?;
                let id = self.next_result;
                self.next_result += 1;
                self.emit(runtime::MZ, vec![Operand::QubitId(q), Operand::ResultId(id)])?;
                Ok(Value::Result(ResultValue::Measured(id)))
            }
            Intrinsic::Reset => {
                self.session.check(ConstructKind::QubitReset, span)?;
                let q = self.expect_qubit(&values[0], &args[0])?;
                self.emit(runtime::RESET, vec![Operand::QubitId(q)])?;
                Ok(Value::Unit)
            }
            Intrinsic::Length => match &values[0] {
                Value::Array(items) => Ok(Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX))),
                other => Err(self.session.mismatch("array", other.type_name(), args[0].span)),
            },
            Intrinsic::IntAsDouble => match &values[0] {
                Value::Int(v) => Ok(Value::Double(*v as f64)),
                Value::Dynamic(op) if op.ty() == Type::I64 => {
                    self.session.check(ConstructKind::DynamicDoubleValue, span)?;
                    Err(unimplemented("IntAsDouble on a measurement-dependent value"))
                }
                other => Err(self.session.mismatch("Int", other.type_name(), args[0].span)),
            },
        }
    }

    fn expect_qubit(&self, value: &Value, arg: &Expr) -> LoweringResult<u64> {
        match value {
            Value::Qubit(id) => Ok(*id),
            other => Err(self.session.mismatch("Qubit", other.type_name(), arg.span)),
        }
    }

    /// Record the entry point's return value.
    fn record_output(&mut self, value: &Value, ty: &Ty, span: Span) -> LoweringResult<()> {
        match value {
            Value::Unit => Ok(()),
            Value::Array(items) => {
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                if matches!(ty, Ty::Array(inner) if matches!(**inner, Ty::Int | Ty::Bool | Ty::Double)) {
                    self.session.check(ConstructKind::ClassicalOutput, span)?;
                }
                self.emit(runtime::ARRAY_RECORD_OUTPUT, vec![Operand::i64(len), no_label()])?;
                for item in items {
                    if matches!(item, Value::Array(_)) {
                        return Err(unimplemented("output recording of nested arrays"));
                    }
                    let item_ty = match ty {
                        Ty::Array(inner) => inner.as_ref(),
                        other => other,
                    };
                    self.record_output(item, item_ty, span)?;
                }
                Ok(())
            }
            Value::Result(ResultValue::Measured(id)) => {
                self.emit(runtime::RESULT_RECORD_OUTPUT, vec![Operand::ResultId(*id), no_label()])?;
                Ok(())
            }
            Value::Result(ResultValue::Lit(_)) => Err(unimplemented("output recording of a constant Result")),
            Value::Qubit(_) => Err(unimplemented("output recording of Qubit values")),
            Value::Int(_) | Value::Bool(_) | Value::Double(_) | Value::Dynamic(_) => {
                self.session.check(ConstructKind::ClassicalOutput, span)?;
                let (callee, operand) = match value {
                    Value::Int(v) => (runtime::INT_RECORD_OUTPUT, Operand::i64(*v)),
                    Value::Bool(b) => (runtime::BOOL_RECORD_OUTPUT, Operand::Bool(*b)),
                    Value::Double(v) => (runtime::DOUBLE_RECORD_OUTPUT, Operand::Double(*v)),
                    Value::Dynamic(op) if op.ty() == Type::I1 => (runtime::BOOL_RECORD_OUTPUT, op.clone()),
                    Value::Dynamic(op) => (runtime::INT_RECORD_OUTPUT, op.clone()),
                    _ => unreachable!("matched above"),
                };
                self.emit(callee, vec![operand, no_label()])?;
                Ok(())
            }
        }
    }
}

fn double_binary(op: BinOp, a: f64, b: f64) -> Option<Value> {
    Some(match op {
        BinOp::Add => Value::Double(a + b),
        BinOp::Sub => Value::Double(a - b),
        BinOp::Mul => Value::Double(a * b),
        BinOp::Div => Value::Double(a / b),
        BinOp::Mod => Value::Double(a % b),
        BinOp::Eq => Value::Bool(a == b),
        BinOp::NotEq => Value::Bool(a != b),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::LtEq => Value::Bool(a <= b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::GtEq => Value::Bool(a >= b),
        BinOp::And | BinOp::Or => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qubit_ids_reused_lowest_first() {
        let mut alloc = QubitAllocator::default();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        alloc.release(c);
        alloc.release(a);
        assert_eq!(alloc.allocate(), a);
        assert_eq!(alloc.allocate(), c);
        assert_eq!(b, 1);
        assert_eq!(alloc.high_watermark(), 3);
    }

    #[test]
    fn test_rewind_keeps_new_ids_free() {
        let mut alloc = QubitAllocator::default();
        alloc.allocate();
        let snapshot = alloc.clone();
        let extra = alloc.allocate();
        alloc.release(extra);
        alloc.rewind(&snapshot);
        assert_eq!(alloc.high_watermark(), 2);
        assert_eq!(alloc.allocate(), 1);
    }

    #[test]
    fn test_value_matches_type() {
        assert!(Value::Int(1).matches(&Ty::Int));
        assert!(Value::Dynamic(Operand::local("x", Type::I1)).matches(&Ty::Bool));
        assert!(!Value::Dynamic(Operand::local("x", Type::I1)).matches(&Ty::Int));
        assert!(Value::Array(vec![]).matches(&Ty::Array(Box::new(Ty::Qubit))));
        assert!(!Value::Array(vec![Value::Int(1)]).matches(&Ty::Array(Box::new(Ty::Qubit))));
    }

    #[test]
    fn test_double_ops() {
        assert_eq!(double_binary(BinOp::Mul, 2.0, 1.5), Some(Value::Double(3.0)));
        assert_eq!(double_binary(BinOp::Lt, 1.0, 2.0), Some(Value::Bool(true)));
        assert_eq!(double_binary(BinOp::And, 1.0, 2.0), None);
    }
}
