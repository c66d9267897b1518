//! Call graph of the callables reachable from the entry point, and the
//! recursion check over every callable in the program.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::debug;

use qirc_syntax::ast::{Block, Callable, Expr, ExprKind, QubitInit, Span, StmtKind};

use crate::error::LoweringResult;

use super::Session;
use super::resolve::{Callee, CallableTable, UserCallable};

/// Reachable callables and the first recursive call site, if any.
#[derive(Debug)]
pub(crate) struct CallGraph<'p> {
    /// Reachable callables in discovery order, entry point first.
    pub reachable: Vec<UserCallable<'p>>,
    /// Call site that closes a cycle, earliest in the source.
    pub recursion: Option<Span>,
}

impl CallGraph<'_> {
    pub(crate) fn reaches(&self, callable: &UserCallable<'_>) -> bool {
        self.reachable.iter().any(|c| c.key() == callable.key())
    }
}

type Graph<'p> = DiGraph<UserCallable<'p>, Span>;

/// Walk the program from `entry`, resolving every call.
pub(crate) fn analyze<'p>(
    session: &Session<'_>,
    table: &CallableTable<'p>,
    entry: UserCallable<'p>,
) -> LoweringResult<CallGraph<'p>> {
    let graph = walk(session, table, &[entry], false)?;
    let recursion = earliest_cycle(&graph);

    let reachable: Vec<_> = graph.node_indices().map(|i| graph[i]).collect();
    debug!(
        callables = reachable.len(),
        recursive = recursion.is_some(),
        "call graph built"
    );

    Ok(CallGraph {
        reachable,
        recursion,
    })
}

/// Earliest recursive call site among all callables, used or not.
///
/// Calls that do not resolve are skipped; they only become errors once the
/// caller is actually lowered.
pub(crate) fn program_recursion(session: &Session<'_>, table: &CallableTable<'_>) -> Option<Span> {
    walk(session, table, table.in_source_order(), true)
        .ok()
        .and_then(|graph| earliest_cycle(&graph))
}

fn walk<'p>(
    session: &Session<'_>,
    table: &CallableTable<'p>,
    roots: &[UserCallable<'p>],
    skip_unresolved: bool,
) -> LoweringResult<Graph<'p>> {
    let mut graph: Graph<'p> = DiGraph::new();
    let mut nodes: FxHashMap<*const Callable, NodeIndex> = FxHashMap::default();
    let mut queue = VecDeque::new();

    for &root in roots {
        nodes.entry(root.key()).or_insert_with(|| {
            let idx = graph.add_node(root);
            queue.push_back(idx);
            idx
        });
    }

    while let Some(node) = queue.pop_front() {
        let caller = graph[node];
        let mut sites = Vec::new();
        collect_block(&caller.callable.body, &mut sites);

        for (path, span) in sites {
            let callee = match table.resolve(session, caller.ns, path, span) {
                Ok(Callee::User(callee)) => callee,
                Ok(Callee::Intrinsic(_)) => continue,
                Err(_) if skip_unresolved => continue,
                Err(err) => return Err(err),
            };
            let target = *nodes.entry(callee.key()).or_insert_with(|| {
                let idx = graph.add_node(callee);
                queue.push_back(idx);
                idx
            });
            graph.add_edge(node, target, span);
        }
    }
    Ok(graph)
}

fn earliest_cycle(graph: &Graph<'_>) -> Option<Span> {
    let mut recursion: Option<Span> = None;
    for scc in tarjan_scc(graph) {
        let cyclic = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
        if !cyclic {
            continue;
        }
        for &from in &scc {
            for edge in graph.edges(from) {
                if scc.contains(&edge.target()) {
                    let span = *edge.weight();
                    if recursion.is_none_or(|best| span.lo < best.lo) {
                        recursion = Some(span);
                    }
                }
            }
        }
    }
    recursion
}

fn collect_block<'a>(block: &'a Block, out: &mut Vec<(&'a [String], Span)>) {
    for stmt in &block.stmts {
        match &stmt.kind {
            StmtKind::Use { init, .. } => {
                if let QubitInit::Array(size) = init {
                    collect_expr(size, out);
                }
            }
            StmtKind::Let { value, .. }
            | StmtKind::Mutable { value, .. }
            | StmtKind::Set { value, .. }
            | StmtKind::Expr(value)
            | StmtKind::Return(Some(value)) => collect_expr(value, out),
            StmtKind::Return(None) => {}
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    collect_expr(cond, out);
                    collect_block(body, out);
                }
                if let Some(body) = otherwise {
                    collect_block(body, out);
                }
            }
            StmtKind::For { iter, body, .. } => {
                collect_expr(iter, out);
                collect_block(body, out);
            }
            StmtKind::While { cond, body } => {
                collect_expr(cond, out);
                collect_block(body, out);
            }
        }
    }
}

fn collect_expr<'a>(expr: &'a Expr, out: &mut Vec<(&'a [String], Span)>) {
    match &expr.kind {
        ExprKind::Call { callee, args } => {
            out.push((callee.as_slice(), expr.span));
            for arg in args {
                collect_expr(arg, out);
            }
        }
        ExprKind::Index { target, index } => {
            collect_expr(target, out);
            collect_expr(index, out);
        }
        ExprKind::Array(items) => {
            for item in items {
                collect_expr(item, out);
            }
        }
        ExprKind::Range { start, end } => {
            collect_expr(start, out);
            collect_expr(end, out);
        }
        ExprKind::Unary { operand, .. } => collect_expr(operand, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_expr(lhs, out);
            collect_expr(rhs, out);
        }
        ExprKind::Paren(inner) => collect_expr(inner, out),
        ExprKind::Int(_)
        | ExprKind::Double(_)
        | ExprKind::Bool(_)
        | ExprKind::Result(_)
        | ExprKind::Path(_) => {}
    }
}
