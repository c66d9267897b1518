//! Program representation for the qirc source language.
//!
//! The tree is produced by [`crate::parse`] and consumed read-only by the
//! lowering engines. Every node that can be blamed in a diagnostic carries
//! a byte [`Span`] into the original source.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte range into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub lo: u32,
    pub hi: u32,
}

impl Span {
    /// Create a span from byte offsets.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(lo: usize, hi: usize) -> Self {
        Self {
            lo: lo as u32,
            hi: hi as u32,
        }
    }

    /// Smallest span covering both `self` and `other`.
    #[must_use]
    pub fn to(self, other: Span) -> Span {
        Span {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }
}

/// 1-based line/column position, resolved from a [`Span`] through a
/// [`crate::LineIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A complete source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    /// Namespaces in source order.
    pub namespaces: Vec<Namespace>,
}

impl Program {
    /// Iterate over every callable together with its namespace name, in source order.
    pub fn callables(&self) -> impl Iterator<Item = (&str, &Callable)> + '_ {
        self.namespaces
            .iter()
            .flat_map(|ns| ns.items.iter().map(move |c| (ns.name.as_str(), c)))
    }
}

/// `namespace Name { ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    /// Dotted namespace name, e.g. `Sample.Inner`.
    pub name: String,
    pub items: Vec<Callable>,
    pub span: Span,
}

/// An identifier with its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// `@Name(arg)` attribute on a callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attr {
    pub name: String,
    /// The single bare-identifier argument, if any (`@Config(Base)`).
    pub arg: Option<String>,
    pub span: Span,
}

/// Operation or function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallableKind {
    Operation,
    Function,
}

/// A callable declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Callable {
    pub attrs: Vec<Attr>,
    pub kind: CallableKind,
    pub name: Ident,
    pub params: Vec<Param>,
    pub output: Ty,
    pub body: Block,
    pub span: Span,
}

impl Callable {
    /// Find an attribute by name.
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Whether this callable is marked `@EntryPoint()`.
    pub fn is_entry_point(&self) -> bool {
        self.attr("EntryPoint").is_some()
    }
}

/// `name : Type`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Ident,
    pub ty: Ty,
}

/// Source-level types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    Unit,
    Int,
    Double,
    Bool,
    Result,
    Qubit,
    Array(Box<Ty>),
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Unit => write!(f, "Unit"),
            Ty::Int => write!(f, "Int"),
            Ty::Double => write!(f, "Double"),
            Ty::Bool => write!(f, "Bool"),
            Ty::Result => write!(f, "Result"),
            Ty::Qubit => write!(f, "Qubit"),
            Ty::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

/// `{ stmt* }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

/// Right-hand side of a `use` statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QubitInit {
    /// `Qubit()`
    Single,
    /// `Qubit[n]`
    Array(Expr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    /// `use q = Qubit();` / `use qs = Qubit[n];`
    Use { name: Ident, init: QubitInit },
    /// `let x = e;`
    Let { name: Ident, value: Expr },
    /// `mutable x = e;`
    Mutable { name: Ident, value: Expr },
    /// `set x = e;` (compound forms are desugared by the parser)
    Set { name: Ident, value: Expr },
    /// `if c { } elif c { } else { }`
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    /// `for x in iterable { }`
    For { var: Ident, iter: Expr, body: Block },
    /// `while c { }`
    While { cond: Expr, body: Block },
    /// `return e;` / `return;`
    Return(Option<Expr>),
    /// Expression statement, typically a call.
    Expr(Expr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    Int(i64),
    Double(f64),
    Bool(bool),
    /// `Zero` (false) or `One` (true).
    Result(bool),
    /// Identifier or dotted path.
    Path(Vec<String>),
    Call { callee: Vec<String>, args: Vec<Expr> },
    Index { target: Box<Expr>, index: Box<Expr> },
    Array(Vec<Expr>),
    /// Inclusive range `start..end`.
    Range { start: Box<Expr>, end: Box<Expr> },
    Unary { op: UnOp, operand: Box<Expr> },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Paren(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinOp {
    /// Whether the operator yields a `Bool` from two comparable operands.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        };
        f.write_str(s)
    }
}
