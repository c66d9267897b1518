//! Direct code generation for the Full profile.
//!
//! Every reachable callable becomes an internal function. Mutable variables
//! live in stack slots allocated at the top of the entry block, qubits are
//! allocated through the runtime and released when their scope closes, and
//! source control flow maps one-to-one onto basic blocks.

use rustc_hash::FxHashMap;
use tracing::debug;

use qirc_ir::{BinaryOp, FloatPredicate, FunctionBuilder, IntPredicate, Linkage, Module, Operand, Type};
use qirc_syntax::ast::{BinOp, Block, Expr, ExprKind, QubitInit, Span, Stmt, StmtKind, Ty, UnOp};

use crate::error::{LoweringError, LoweringResult};
use crate::profile::ConstructKind;

use super::callgraph::CallGraph;
use super::resolve::{Callee, CallableTable, Intrinsic, UserCallable};
use super::runtime::{self, no_label};
use super::{ENTRY_POINT_GROUP, ENTRY_POINT_SYMBOL, ResourceUsage, Session, unimplemented};

/// Emit the entry wrapper followed by one function per reachable callable,
/// in source order.
pub(crate) fn lower_program<'p>(
    session: &Session<'_>,
    table: &CallableTable<'p>,
    graph: &CallGraph<'p>,
    entry: UserCallable<'p>,
    module: &mut Module,
) -> LoweringResult<Option<ResourceUsage>> {
    let (wrapper, mut next_id) = lower_wrapper(session, entry, module)?;
    module.add_function(wrapper)?;

    let reachable = table.in_source_order().iter().filter(|c| graph.reaches(c));
    for &callable in reachable {
        let mut lowerer = FunctionLowerer::new(session, table, module, callable, next_id)?;
        lowerer.lower_body()?;
        let FunctionLowerer { builder, .. } = lowerer;
        next_id = builder.next_id();
        debug!(function = %builder.name(), "lowered callable");
        module.add_function(builder.finish())?;
    }

    Ok(None)
}

/// IR type of a source type.
fn ir_type(ty: &Ty) -> Type {
    match ty {
        Ty::Unit => Type::Void,
        Ty::Int => Type::I64,
        Ty::Double => Type::Double,
        Ty::Bool => Type::I1,
        Ty::Result => Type::Result,
        Ty::Qubit => Type::Qubit,
        Ty::Array(_) => Type::Array,
    }
}

/// Byte size of one array element as passed to `array_create_1d`.
fn element_size(ty: &Ty) -> i32 {
    match ty {
        Ty::Bool => 1,
        _ => 8,
    }
}

/// Whether a value of type `found` may be used where `expected` is required.
/// `Unit[]` is the type of `[]` and fits any array.
fn compatible(expected: &Ty, found: &Ty) -> bool {
    match (expected, found) {
        (Ty::Array(a), Ty::Array(b)) => **a == Ty::Unit || **b == Ty::Unit || compatible(a, b),
        (a, b) => a == b,
    }
}

/// `@ENTRYPOINT__main`: initialize, call the entry callable, record its value.
fn lower_wrapper(session: &Session<'_>, entry: UserCallable<'_>, module: &mut Module) -> LoweringResult<(qirc_ir::Function, u32)> {
    let mut b = FunctionBuilder::new(ENTRY_POINT_SYMBOL, vec![], Type::Void).with_attributes(ENTRY_POINT_GROUP);
    runtime::call(module, &mut b, runtime::INITIALIZE, vec![no_label()])?;

    let output = &entry.callable.output;
    let value = b.call(&entry.symbol(), ir_type(output), vec![])?;
    if let Some(value) = value {
        record(session, module, &mut b, value, output, entry.callable.name.span)?;
    }
    b.ret(None)?;
    let next = b.next_id();
    Ok((b.finish(), next))
}

/// Emit output recording for a value of source type `ty`.
fn record(
    session: &Session<'_>,
    module: &mut Module,
    b: &mut FunctionBuilder,
    value: Operand,
    ty: &Ty,
    span: Span,
) -> LoweringResult<()> {
    let callee = match ty {
        Ty::Unit => return Ok(()),
        Ty::Result => runtime::RESULT_RECORD_OUTPUT,
        Ty::Int => runtime::INT_RECORD_OUTPUT,
        Ty::Bool => runtime::BOOL_RECORD_OUTPUT,
        Ty::Double => runtime::DOUBLE_RECORD_OUTPUT,
        Ty::Qubit => return Err(unimplemented("output recording of Qubit values")),
        Ty::Array(inner) => {
            if matches!(**inner, Ty::Array(_) | Ty::Qubit | Ty::Unit) {
                return Err(unimplemented(format!("output recording of {ty}")));
            }
            return record_array(session, module, b, value, inner, span);
        }
    };
    if callee != runtime::RESULT_RECORD_OUTPUT {
        session.check(ConstructKind::ClassicalOutput, span)?;
    }
    runtime::call(module, b, callee, vec![value, no_label()])?;
    Ok(())
}

/// Record an array by looping over its elements at run time.
fn record_array(
    session: &Session<'_>,
    module: &mut Module,
    b: &mut FunctionBuilder,
    array: Operand,
    element: &Ty,
    span: Span,
) -> LoweringResult<()> {
    let size = runtime::call(module, b, runtime::ARRAY_GET_SIZE_1D, vec![array.clone()])?
        .ok_or_else(|| unimplemented("array size without a value"))?;
    runtime::call(module, b, runtime::ARRAY_RECORD_OUTPUT, vec![size.clone(), no_label()])?;

    let slot = b.entry_alloca("idx", Type::I64);
    b.store(Operand::i64(0), slot.clone())?;
    let header = b.add_block("rec.header");
    let body = b.add_block("rec.body");
    let exit = b.add_block("rec.exit");
    b.br(&header)?;

    b.position_at(&header)?;
    let index = b.load("i", Type::I64, slot.clone())?;
    let more = b.icmp(IntPredicate::Slt, index.clone(), size)?;
    b.cond_br(more, &body, &exit)?;

    b.position_at(&body)?;
    let item = load_element(module, b, array, index.clone(), element)?;
    record(session, module, b, item, element, span)?;
    let next = b.binary(BinaryOp::Add, index, Operand::i64(1))?;
    b.store(next, slot)?;
    b.br(&header)?;

    b.position_at(&exit)?;
    Ok(())
}

/// Load element `index` of `array`.
fn load_element(
    module: &mut Module,
    b: &mut FunctionBuilder,
    array: Operand,
    index: Operand,
    element: &Ty,
) -> LoweringResult<Operand> {
    let raw = runtime::call(module, b, runtime::ARRAY_GET_ELEMENT_PTR_1D, vec![array, index])?
        .ok_or_else(|| unimplemented("element pointer without a value"))?;
    let ty = ir_type(element);
    let ptr = b.bitcast(raw, Type::ptr(ty.clone()))?;
    Ok(b.load("elem", ty, ptr)?)
}

/// A lowered value with its source type.
#[derive(Debug, Clone)]
struct Typed {
    op: Operand,
    ty: Ty,
}

#[derive(Debug, Clone)]
enum Var {
    Value(Typed),
    /// A `mutable` binding backed by a stack slot.
    Slot { ptr: Operand, ty: Ty },
}

#[derive(Debug)]
enum Release {
    Qubit(Operand),
    Array(Operand),
}

#[derive(Debug, Default)]
struct Scope {
    vars: FxHashMap<String, Var>,
    releases: Vec<Release>,
}

struct FunctionLowerer<'s, 'p> {
    session: &'s Session<'s>,
    table: &'s CallableTable<'p>,
    module: &'s mut Module,
    callable: UserCallable<'p>,
    builder: FunctionBuilder,
    scopes: Vec<Scope>,
}

impl<'s, 'p> FunctionLowerer<'s, 'p> {
    fn new(
        session: &'s Session<'s>,
        table: &'s CallableTable<'p>,
        module: &'s mut Module,
        callable: UserCallable<'p>,
        first_id: u32,
    ) -> LoweringResult<Self> {
        let mut params = Vec::with_capacity(callable.callable.params.len());
        let mut scope = Scope::default();
        for param in &callable.callable.params {
            if param.ty == Ty::Unit {
                return Err(session.mismatch("a parameter type other than Unit", "Unit", param.name.span));
            }
            let ty = ir_type(&param.ty);
            let name = param.name.name.clone();
            params.push((name.clone(), ty.clone()));
            scope.vars.insert(
                name.clone(),
                Var::Value(Typed {
                    op: Operand::local(name, ty),
                    ty: param.ty.clone(),
                }),
            );
        }

        let builder = FunctionBuilder::new(callable.symbol(), params, ir_type(&callable.callable.output))
            .with_linkage(Linkage::Internal)
            .with_first_id(first_id);

        Ok(Self {
            session,
            table,
            module,
            callable,
            builder,
            scopes: vec![scope],
        })
    }

    fn lower_body(&mut self) -> LoweringResult<()> {
        let body = &self.callable.callable.body;
        self.lower_block(body)?;
        if !self.builder.is_terminated() {
            self.release_all()?;
            if self.callable.callable.output == Ty::Unit {
                self.builder.ret(None)?;
            } else {
                self.builder.terminate(qirc_ir::Terminator::Unreachable)?;
            }
        }
        Ok(())
    }

    fn emit(&mut self, callee: &str, args: Vec<Operand>) -> LoweringResult<Option<Operand>> {
        runtime::call(self.module, &mut self.builder, callee, args)
    }

    fn emit_value(&mut self, callee: &str, args: Vec<Operand>) -> LoweringResult<Operand> {
        self.emit(callee, args)?
            .ok_or_else(|| LoweringError::InvalidIr(format!("@{callee} returns void")))
    }

    fn lookup(&self, name: &str) -> Option<&Var> {
        self.scopes.iter().rev().find_map(|s| s.vars.get(name))
    }

    fn declare(&mut self, name: &str, var: Var, span: Span) -> LoweringResult<()> {
        if self.lookup(name).is_some() {
            return Err(LoweringError::Duplicate {
                name: name.to_string(),
                location: self.session.loc(span),
            });
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.insert(name.to_string(), var);
        }
        Ok(())
    }

    fn emit_releases(&mut self, index: usize) -> LoweringResult<()> {
        let releases: Vec<(bool, Operand)> = self.scopes[index]
            .releases
            .iter()
            .rev()
            .map(|r| match r {
                Release::Qubit(q) => (false, q.clone()),
                Release::Array(a) => (true, a.clone()),
            })
            .collect();
        for (is_array, op) in releases {
            let callee = if is_array {
                runtime::QUBIT_RELEASE_ARRAY
            } else {
                runtime::QUBIT_RELEASE
            };
            self.emit(callee, vec![op])?;
        }
        Ok(())
    }

    /// Release every live qubit, innermost scope first.
    fn release_all(&mut self) -> LoweringResult<()> {
        for index in (0..self.scopes.len()).rev() {
            self.emit_releases(index)?;
        }
        Ok(())
    }

    fn pop_scope(&mut self) -> LoweringResult<()> {
        if !self.builder.is_terminated() {
            self.emit_releases(self.scopes.len() - 1)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn lower_block(&mut self, block: &Block) -> LoweringResult<()> {
        self.scopes.push(Scope::default());
        for stmt in &block.stmts {
            if self.builder.is_terminated() {
                break;
            }
            if let Err(e) = self.lower_stmt(stmt) {
                self.scopes.pop();
                return Err(e);
            }
        }
        self.pop_scope()
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> LoweringResult<()> {
        match &stmt.kind {
            StmtKind::Use { name, init } => {
                let var = self.allocate(init, stmt.span)?;
                self.declare(&name.name, Var::Value(var), name.span)
            }
            StmtKind::Let { name, value } => {
                let value = self.value(value)?;
                self.declare(&name.name, Var::Value(value), name.span)
            }
            StmtKind::Mutable { name, value } => {
                let value = self.value(value)?;
                let ptr = self.builder.entry_alloca(&name.name, ir_type(&value.ty));
                self.builder.store(value.op, ptr.clone())?;
                self.declare(&name.name, Var::Slot { ptr, ty: value.ty }, name.span)
            }
            StmtKind::Set { name, value } => {
                let new_value = self.value(value)?;
                let (ptr, ty) = match self.lookup(&name.name) {
                    Some(Var::Slot { ptr, ty }) => (ptr.clone(), ty.clone()),
                    Some(Var::Value(_)) => {
                        return Err(self.session.unresolved(
                            name.name.as_str(),
                            "cannot assign to an immutable binding",
                            name.span,
                        ));
                    }
                    None => {
                        return Err(self.session.unresolved(name.name.as_str(), "not a variable in scope", name.span));
                    }
                };
                if !compatible(&ty, &new_value.ty) {
                    return Err(self.session.mismatch(ty.to_string(), new_value.ty.to_string(), value.span));
                }
                self.builder.store(new_value.op, ptr)?;
                Ok(())
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                let mut open = Vec::new();
                self.lower_if(branches, otherwise.as_ref(), &mut open)?;
                let merge = self.builder.add_block("continue");
                for label in open {
                    self.builder.position_at(&label)?;
                    self.builder.br(&merge)?;
                }
                self.builder.position_at(&merge)?;
                Ok(())
            }
            StmtKind::For { var, iter, body } => self.lower_for(&var.name, var.span, iter, body, stmt.span),
            StmtKind::While { cond, body } => {
                self.session.check(ConstructKind::ClassicalLoop, stmt.span)?;
                self.session.check(ConstructKind::DynamicLoop, cond.span)?;
                let header = self.builder.add_block("while.header");
                let body_label = self.builder.add_block("while.body");
                let exit = self.builder.add_block("while.exit");
                self.builder.br(&header)?;

                self.builder.position_at(&header)?;
                let c = self.expect(cond, &Ty::Bool)?;
                self.builder.cond_br(c, &body_label, &exit)?;

                self.builder.position_at(&body_label)?;
                self.lower_block(body)?;
                if !self.builder.is_terminated() {
                    self.builder.br(&header)?;
                }
                self.builder.position_at(&exit)?;
                Ok(())
            }
            StmtKind::Return(value) => {
                let output = self.callable.callable.output.clone();
                let op = match value {
                    Some(expr) if output != Ty::Unit => Some(self.expect(expr, &output)?),
                    Some(expr) => {
                        if let Some(v) = self.lower_expr(expr)? {
                            return Err(self.session.mismatch("Unit", v.ty.to_string(), expr.span));
                        }
                        None
                    }
                    None if output == Ty::Unit => None,
                    None => return Err(self.session.mismatch(output.to_string(), "Unit", stmt.span)),
                };
                self.release_all()?;
                self.builder.ret(op)?;
                Ok(())
            }
            StmtKind::Expr(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
        }
    }

    fn allocate(&mut self, init: &QubitInit, span: Span) -> LoweringResult<Typed> {
        match init {
            QubitInit::Single => {
                self.session.check(ConstructKind::QubitAllocation, span)?;
                let q = self.emit_value(runtime::QUBIT_ALLOCATE, vec![])?;
                self.push_release(Release::Qubit(q.clone()));
                Ok(Typed { op: q, ty: Ty::Qubit })
            }
            QubitInit::Array(size) => {
                let n = self.expect(size, &Ty::Int)?;
                let kind = if n.is_constant() {
                    ConstructKind::QubitAllocation
                } else {
                    ConstructKind::DynamicQubitAllocation
                };
                self.session.check(kind, size.span)?;
                let array = self.emit_value(runtime::QUBIT_ALLOCATE_ARRAY, vec![n])?;
                self.push_release(Release::Array(array.clone()));
                Ok(Typed {
                    op: array,
                    ty: Ty::Array(Box::new(Ty::Qubit)),
                })
            }
        }
    }

    fn push_release(&mut self, release: Release) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.releases.push(release);
        }
    }

    /// Lower an `if`/`elif`/`else` chain. Labels of arms that fall through
    /// are collected in `open`.
    fn lower_if(&mut self, branches: &[(Expr, Block)], otherwise: Option<&Block>, open: &mut Vec<String>) -> LoweringResult<()> {
        let Some(((cond, body), rest)) = branches.split_first() else {
            if let Some(block) = otherwise {
                self.lower_block(block)?;
            }
            if !self.builder.is_terminated() {
                open.push(self.builder.current_block().to_string());
            }
            return Ok(());
        };

        let c = self.expect(cond, &Ty::Bool)?;
        let then_label = self.builder.add_block("then");
        let else_label = self.builder.add_block("else");
        self.builder.cond_br(c, &then_label, &else_label)?;

        self.builder.position_at(&then_label)?;
        self.lower_block(body)?;
        if !self.builder.is_terminated() {
            open.push(self.builder.current_block().to_string());
        }

        self.builder.position_at(&else_label)?;
        self.lower_if(rest, otherwise, open)
    }

    fn lower_for(&mut self, var: &str, var_span: Span, iter: &Expr, body: &Block, span: Span) -> LoweringResult<()> {
        self.session.check(ConstructKind::ClassicalLoop, span)?;

        let (start, bound, array) = match &iter.kind {
            ExprKind::Range { start, end } => {
                let start = self.expect(start, &Ty::Int)?;
                let end = self.expect(end, &Ty::Int)?;
                if !(start.is_constant() && end.is_constant()) {
                    self.session.check(ConstructKind::DynamicLoop, iter.span)?;
                }
                (start, end, None)
            }
            _ => {
                let array = self.value(iter)?;
                let Ty::Array(element) = array.ty.clone() else {
                    return Err(self.session.mismatch("array or range", array.ty.to_string(), iter.span));
                };
                if *element == Ty::Unit {
                    // Looping over `[]` runs zero times.
                    return Ok(());
                }
                let size = self.emit_value(runtime::ARRAY_GET_SIZE_1D, vec![array.op.clone()])?;
                (Operand::i64(0), size, Some((array.op, *element)))
            }
        };

        let slot = self.builder.entry_alloca("idx", Type::I64);
        self.builder.store(start, slot.clone())?;
        let header = self.builder.add_block("for.header");
        let body_label = self.builder.add_block("for.body");
        let exit = self.builder.add_block("for.exit");
        self.builder.br(&header)?;

        self.builder.position_at(&header)?;
        let index = self.builder.load("i", Type::I64, slot.clone())?;
        let pred = if array.is_some() {
            IntPredicate::Slt
        } else {
            IntPredicate::Sle
        };
        let more = self.builder.icmp(pred, index.clone(), bound)?;
        self.builder.cond_br(more, &body_label, &exit)?;

        self.builder.position_at(&body_label)?;
        let item = match array {
            Some((op, element)) => Typed {
                op: load_element(self.module, &mut self.builder, op, index.clone(), &element)?,
                ty: element,
            },
            None => Typed {
                op: index.clone(),
                ty: Ty::Int,
            },
        };
        self.scopes.push(Scope::default());
        let lowered = self
            .declare(var, Var::Value(item), var_span)
            .and_then(|()| self.lower_block(body));
        if let Err(e) = lowered {
            self.scopes.pop();
            return Err(e);
        }
        self.pop_scope()?;
        if !self.builder.is_terminated() {
            let next = self.builder.binary(BinaryOp::Add, index, Operand::i64(1))?;
            self.builder.store(next, slot)?;
            self.builder.br(&header)?;
        }

        self.builder.position_at(&exit)?;
        Ok(())
    }

    /// Lower an expression that must produce a value.
    fn value(&mut self, expr: &Expr) -> LoweringResult<Typed> {
        self.lower_expr(expr)?
            .ok_or_else(|| self.session.mismatch("a value", "Unit", expr.span))
    }

    /// Lower an expression of type `ty`.
    fn expect(&mut self, expr: &Expr, ty: &Ty) -> LoweringResult<Operand> {
        let v = self.value(expr)?;
        if compatible(ty, &v.ty) {
            Ok(v.op)
        } else {
            Err(self.session.mismatch(ty.to_string(), v.ty.to_string(), expr.span))
        }
    }

    fn lower_expr(&mut self, expr: &Expr) -> LoweringResult<Option<Typed>> {
        let typed = |op, ty| Ok(Some(Typed { op, ty }));
        match &expr.kind {
            ExprKind::Int(v) => typed(Operand::i64(*v), Ty::Int),
            ExprKind::Double(v) => typed(Operand::Double(*v), Ty::Double),
            ExprKind::Bool(b) => typed(Operand::Bool(*b), Ty::Bool),
            ExprKind::Result(one) => {
                let callee = if *one {
                    runtime::RESULT_GET_ONE
                } else {
                    runtime::RESULT_GET_ZERO
                };
                typed(self.emit_value(callee, vec![])?, Ty::Result)
            }
            ExprKind::Path(path) => match path.as_slice() {
                [name] => match self.lookup(name).cloned() {
                    Some(Var::Value(v)) => Ok(Some(v)),
                    Some(Var::Slot { ptr, ty }) => {
                        let op = self.builder.load(name, ir_type(&ty), ptr)?;
                        typed(op, ty)
                    }
                    None => Err(self.session.unresolved(name.as_str(), "not a variable in scope", expr.span)),
                },
                _ => Err(self.session.unresolved(path.join("."), "callables cannot be used as values", expr.span)),
            },
            ExprKind::Paren(inner) => self.lower_expr(inner),
            ExprKind::Array(items) => self.lower_array(items).map(Some),
            ExprKind::Index { target, index } => {
                let array = self.value(target)?;
                let Ty::Array(element) = array.ty else {
                    return Err(self.session.mismatch("array", array.ty.to_string(), target.span));
                };
                if *element == Ty::Unit {
                    return Err(self.session.eval_error("index into an empty array", index.span));
                }
                let i = self.expect(index, &Ty::Int)?;
                let op = load_element(self.module, &mut self.builder, array.op, i, &element)?;
                typed(op, *element)
            }
            ExprKind::Range { .. } => Err(unimplemented("range value outside a for loop")),
            ExprKind::Unary { op, operand } => {
                let v = self.value(operand)?;
                let result = match (op, &v.ty) {
                    (UnOp::Neg, Ty::Int) => self.builder.binary(BinaryOp::Sub, Operand::i64(0), v.op)?,
                    (UnOp::Neg, Ty::Double) => self.builder.fneg(v.op)?,
                    (UnOp::Not, Ty::Bool) => self.builder.binary(BinaryOp::Xor, v.op, Operand::Bool(true))?,
                    (UnOp::Neg, other) => return Err(self.session.mismatch("Int or Double", other.to_string(), operand.span)),
                    (UnOp::Not, other) => return Err(self.session.mismatch("Bool", other.to_string(), operand.span)),
                };
                typed(result, v.ty)
            }
            ExprKind::Binary { op, lhs, rhs } if matches!(op, BinOp::And | BinOp::Or) => {
                self.lower_short_circuit(*op, lhs, rhs).map(Some)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.value(lhs)?;
                let r = self.value(rhs)?;
                self.lower_binary(*op, l, r, expr.span).map(Some)
            }
            ExprKind::Call { callee, args } => self.lower_call(callee, args, expr.span),
        }
    }

    fn lower_array(&mut self, items: &[Expr]) -> LoweringResult<Typed> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push((self.value(item)?, item.span));
        }
        let element = values.first().map_or(Ty::Unit, |(v, _)| v.ty.clone());
        for (v, span) in &values {
            if !compatible(&element, &v.ty) {
                return Err(self.session.mismatch(element.to_string(), v.ty.to_string(), *span));
            }
        }

        let len = i64::try_from(values.len()).unwrap_or(i64::MAX);
        let array = self.emit_value(
            runtime::ARRAY_CREATE_1D,
            vec![Operand::i32(element_size(&element)), Operand::i64(len)],
        )?;
        for (i, (v, _)) in values.into_iter().enumerate() {
            let index = Operand::i64(i64::try_from(i).unwrap_or(i64::MAX));
            let raw = self.emit_value(runtime::ARRAY_GET_ELEMENT_PTR_1D, vec![array.clone(), index])?;
            let ptr = self.builder.bitcast(raw, Type::ptr(ir_type(&element)))?;
            self.builder.store(v.op, ptr)?;
        }
        Ok(Typed {
            op: array,
            ty: Ty::Array(Box::new(element)),
        })
    }

    fn lower_short_circuit(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> LoweringResult<Typed> {
        let is_and = op == BinOp::And;
        let l = self.expect(lhs, &Ty::Bool)?;
        let from = self.builder.current_block().to_string();
        let rhs_label = self.builder.add_block(if is_and { "and.rhs" } else { "or.rhs" });
        let merge = self.builder.add_block(if is_and { "and.end" } else { "or.end" });
        if is_and {
            self.builder.cond_br(l, &rhs_label, &merge)?;
        } else {
            self.builder.cond_br(l, &merge, &rhs_label)?;
        }

        self.builder.position_at(&rhs_label)?;
        let r = self.expect(rhs, &Ty::Bool)?;
        let rhs_end = self.builder.current_block().to_string();
        self.builder.br(&merge)?;

        self.builder.position_at(&merge)?;
        let phi = self.builder.phi(
            if is_and { "and" } else { "or" },
            Type::I1,
            vec![(Operand::Bool(!is_and), from), (r, rhs_end)],
        )?;
        Ok(Typed { op: phi, ty: Ty::Bool })
    }

    fn lower_binary(&mut self, op: BinOp, l: Typed, r: Typed, span: Span) -> LoweringResult<Typed> {
        let b = &mut self.builder;
        let (result, ty) = match (&l.ty, &r.ty) {
            (Ty::Int, Ty::Int) => {
                if matches!(op, BinOp::Div | BinOp::Mod) && r.op == Operand::i64(0) {
                    return Err(self.session.eval_error("division by zero", span));
                }
                match op {
                    BinOp::Add => (b.binary(BinaryOp::Add, l.op, r.op)?, Ty::Int),
                    BinOp::Sub => (b.binary(BinaryOp::Sub, l.op, r.op)?, Ty::Int),
                    BinOp::Mul => (b.binary(BinaryOp::Mul, l.op, r.op)?, Ty::Int),
                    BinOp::Div => (b.binary(BinaryOp::SDiv, l.op, r.op)?, Ty::Int),
                    BinOp::Mod => (b.binary(BinaryOp::SRem, l.op, r.op)?, Ty::Int),
                    BinOp::Eq => (b.icmp(IntPredicate::Eq, l.op, r.op)?, Ty::Bool),
                    BinOp::NotEq => (b.icmp(IntPredicate::Ne, l.op, r.op)?, Ty::Bool),
                    BinOp::Lt => (b.icmp(IntPredicate::Slt, l.op, r.op)?, Ty::Bool),
                    BinOp::LtEq => (b.icmp(IntPredicate::Sle, l.op, r.op)?, Ty::Bool),
                    BinOp::Gt => (b.icmp(IntPredicate::Sgt, l.op, r.op)?, Ty::Bool),
                    BinOp::GtEq => (b.icmp(IntPredicate::Sge, l.op, r.op)?, Ty::Bool),
                    BinOp::And | BinOp::Or => return Err(self.session.mismatch("Bool", "Int", span)),
                }
            }
            (Ty::Double, Ty::Double) => match op {
                BinOp::Add => (b.binary(BinaryOp::FAdd, l.op, r.op)?, Ty::Double),
                BinOp::Sub => (b.binary(BinaryOp::FSub, l.op, r.op)?, Ty::Double),
                BinOp::Mul => (b.binary(BinaryOp::FMul, l.op, r.op)?, Ty::Double),
                BinOp::Div => (b.binary(BinaryOp::FDiv, l.op, r.op)?, Ty::Double),
                BinOp::Mod => return Err(unimplemented("remainder on Double values")),
                BinOp::Eq => (b.fcmp(FloatPredicate::Oeq, l.op, r.op)?, Ty::Bool),
                BinOp::NotEq => (b.fcmp(FloatPredicate::One, l.op, r.op)?, Ty::Bool),
                BinOp::Lt => (b.fcmp(FloatPredicate::Olt, l.op, r.op)?, Ty::Bool),
                BinOp::LtEq => (b.fcmp(FloatPredicate::Ole, l.op, r.op)?, Ty::Bool),
                BinOp::Gt => (b.fcmp(FloatPredicate::Ogt, l.op, r.op)?, Ty::Bool),
                BinOp::GtEq => (b.fcmp(FloatPredicate::Oge, l.op, r.op)?, Ty::Bool),
                BinOp::And | BinOp::Or => return Err(self.session.mismatch("Bool", "Double", span)),
            },
            (Ty::Bool, Ty::Bool) => match op {
                BinOp::Eq => (b.icmp(IntPredicate::Eq, l.op, r.op)?, Ty::Bool),
                BinOp::NotEq => (b.icmp(IntPredicate::Ne, l.op, r.op)?, Ty::Bool),
                _ => return Err(self.session.mismatch("== or != on Bool", op.to_string(), span)),
            },
            (Ty::Result, Ty::Result) if matches!(op, BinOp::Eq | BinOp::NotEq) => {
                self.session.check(ConstructKind::MeasurementComparison, span)?;
                let equal = self.emit_value(runtime::RESULT_EQUAL, vec![l.op, r.op])?;
                if op == BinOp::Eq {
                    (equal, Ty::Bool)
                } else {
                    let b = &mut self.builder;
                    (b.binary(BinaryOp::Xor, equal, Operand::Bool(true))?, Ty::Bool)
                }
            }
            (Ty::Array(_), Ty::Array(_)) if op == BinOp::Add && compatible(&l.ty, &r.ty) => {
                let ty = if matches!(&l.ty, Ty::Array(inner) if **inner == Ty::Unit) {
                    r.ty.clone()
                } else {
                    l.ty.clone()
                };
                (self.emit_value(runtime::ARRAY_CONCATENATE, vec![l.op, r.op])?, ty)
            }
            (lt, rt) => return Err(self.session.mismatch(lt.to_string(), rt.to_string(), span)),
        };
        Ok(Typed { op: result, ty })
    }

    fn lower_call(&mut self, path: &[String], args: &[Expr], span: Span) -> LoweringResult<Option<Typed>> {
        let callee = self.table.resolve(self.session, self.callable.ns, path, span)?;
        match callee {
            Callee::Intrinsic(intrinsic) => self.lower_intrinsic(intrinsic, path, args, span),
            Callee::User(user) => {
                self.session.check(ConstructKind::CallableInvocation, span)?;
                let params = &user.callable.params;
                if args.len() != params.len() {
                    return Err(self.session.mismatch(
                        format!("{} arguments to {}", params.len(), path.join(".")),
                        args.len().to_string(),
                        span,
                    ));
                }
                let mut operands = Vec::with_capacity(args.len());
                for (arg, param) in args.iter().zip(params) {
                    operands.push(self.expect(arg, &param.ty)?);
                }
                let output = user.callable.output.clone();
                let result = self.builder.call(&user.symbol(), ir_type(&output), operands)?;
                Ok(result.map(|op| Typed { op, ty: output }))
            }
        }
    }

    fn lower_intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        path: &[String],
        args: &[Expr],
        span: Span,
    ) -> LoweringResult<Option<Typed>> {
        if args.len() != intrinsic.arity() {
            return Err(self.session.mismatch(
                format!("{} arguments to {}", intrinsic.arity(), path.join(".")),
                args.len().to_string(),
                span,
            ));
        }

        match intrinsic {
            Intrinsic::Gate { qis, angles, .. } => {
                self.session.check(ConstructKind::QuantumGate, span)?;
                let mut operands = Vec::with_capacity(args.len());
                for (i, arg) in args.iter().enumerate() {
                    let ty = if i < angles { Ty::Double } else { Ty::Qubit };
                    operands.push(self.expect(arg, &ty)?);
                }
                self.emit(&runtime::gate_symbol(qis), operands)?;
                Ok(None)
            }
            Intrinsic::Measure => {
                self.session.check(ConstructKind::Measurement, span)?;
                let q = self.expect(&args[0], &Ty::Qubit)?;
                let r = self.emit_value(runtime::M, vec![q])?;
                Ok(Some(Typed { op: r, ty: Ty::Result }))
            }
            Intrinsic::Reset => {
                self.session.check(ConstructKind::QubitReset, span)?;
                let q = self.expect(&args[0], &Ty::Qubit)?;
                self.emit(runtime::RESET, vec![q])?;
                Ok(None)
            }
            Intrinsic::Length => {
                let array = self.value(&args[0])?;
                if !matches!(array.ty, Ty::Array(_)) {
                    return Err(self.session.mismatch("array", array.ty.to_string(), args[0].span));
                }
                let size = self.emit_value(runtime::ARRAY_GET_SIZE_1D, vec![array.op])?;
                Ok(Some(Typed { op: size, ty: Ty::Int }))
            }
            Intrinsic::IntAsDouble => {
                let v = self.expect(&args[0], &Ty::Int)?;
                let d = self.builder.sitofp(v)?;
                Ok(Some(Typed { op: d, ty: Ty::Double }))
            }
        }
    }
}
