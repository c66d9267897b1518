//! Parser for the qirc source language.

use tracing::debug;

use crate::ast::{
    Attr, BinOp, Block, Callable, CallableKind, Expr, ExprKind, Ident, Namespace, Param, Program,
    QubitInit, Span, Stmt, StmtKind, Ty, UnOp,
};
use crate::error::{ParseError, ParseResult};
use crate::lexer::{SpannedToken, Token, tokenize};
use crate::source::LineIndex;

/// Parse a source string into a [`Program`].
pub fn parse(source: &str) -> ParseResult<Program> {
    let mut parser = Parser::new(source)?;
    let program = parser.parse_program()?;
    debug!(
        namespaces = program.namespaces.len(),
        callables = program.callables().count(),
        "parsed program"
    );
    Ok(program)
}

/// Parser state.
struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    lines: LineIndex,
    source_len: usize,
}

#[allow(clippy::unnecessary_wraps)]
impl Parser {
    /// Create a new parser from source.
    fn new(source: &str) -> ParseResult<Self> {
        let lines = LineIndex::new(source);
        let mut tokens = Vec::new();

        for result in tokenize(source) {
            match result {
                Ok(t) => tokens.push(t),
                Err((span, message)) => {
                    return Err(ParseError::LexerError {
                        location: lines.span_location(Span::new(span.start, span.end)),
                        message,
                    });
                }
            }
        }

        Ok(Self {
            tokens,
            pos: 0,
            lines,
            source_len: source.len(),
        })
    }

    /// Check if we've reached the end.
    fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Peek at the current token.
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    /// Span of the current token, or an empty span at end of input.
    fn current_span(&self) -> Span {
        self.tokens.get(self.pos).map_or_else(
            || Span::new(self.source_len, self.source_len),
            |t| Span::new(t.span.start, t.span.end),
        )
    }

    /// Span of the most recently consumed token.
    fn previous_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or_else(Span::default, |t| Span::new(t.span.start, t.span.end))
    }

    /// Advance and return the current token.
    fn advance(&mut self) -> Option<Token> {
        if self.is_eof() {
            return None;
        }
        let token = self.tokens[self.pos].token.clone();
        self.pos += 1;
        Some(token)
    }

    fn unexpected(&self, expected: &str, found: &Token, span: Span) -> ParseError {
        ParseError::UnexpectedToken {
            location: self.lines.span_location(span),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Expect a specific token.
    #[allow(clippy::needless_pass_by_value)]
    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        let span = self.current_span();
        let found = self
            .advance()
            .ok_or_else(|| ParseError::UnexpectedEof(expected.to_string()))?;

        if std::mem::discriminant(&found) != std::mem::discriminant(&expected) {
            return Err(self.unexpected(&expected.to_string(), &found, span));
        }
        Ok(())
    }

    /// Check if current token matches.
    fn check(&self, token: &Token) -> bool {
        self.peek()
            .is_some_and(|t| std::mem::discriminant(t) == std::mem::discriminant(token))
    }

    /// Consume token if it matches.
    fn consume(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Parse the entire program.
    fn parse_program(&mut self) -> ParseResult<Program> {
        let mut namespaces = Vec::new();
        while !self.is_eof() {
            namespaces.push(self.parse_namespace()?);
        }
        Ok(Program { namespaces })
    }

    /// `namespace A.B { item* }`
    fn parse_namespace(&mut self) -> ParseResult<Namespace> {
        let start = self.current_span();
        self.expect(Token::Namespace)?;
        let name = self.parse_path()?.join(".");
        self.expect(Token::LBrace)?;

        let mut items = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.is_eof() {
                return Err(ParseError::UnexpectedEof("}".into()));
            }
            items.push(self.parse_callable()?);
        }
        self.expect(Token::RBrace)?;

        Ok(Namespace {
            name,
            items,
            span: start.to(self.previous_span()),
        })
    }

    /// `attr* (operation | function) Name(params) : Type { ... }`
    fn parse_callable(&mut self) -> ParseResult<Callable> {
        let start = self.current_span();

        let mut attrs = Vec::new();
        while self.check(&Token::At) {
            attrs.push(self.parse_attr()?);
        }

        let span = self.current_span();
        let kind = match self.advance() {
            Some(Token::Operation) => CallableKind::Operation,
            Some(Token::Function) => CallableKind::Function,
            Some(other) => return Err(self.unexpected("operation or function", &other, span)),
            None => return Err(ParseError::UnexpectedEof("callable declaration".into())),
        };

        let name = self.parse_ident()?;

        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            params.push(self.parse_param()?);
            while self.consume(&Token::Comma) {
                params.push(self.parse_param()?);
            }
        }
        self.expect(Token::RParen)?;

        self.expect(Token::Colon)?;
        let output = self.parse_type()?;
        let body = self.parse_block()?;

        Ok(Callable {
            attrs,
            kind,
            name,
            params,
            output,
            span: start.to(body.span),
            body,
        })
    }

    /// `@Name()` or `@Name(Arg)`
    fn parse_attr(&mut self) -> ParseResult<Attr> {
        let start = self.current_span();
        self.expect(Token::At)?;
        let name = self.parse_ident()?.name;
        self.expect(Token::LParen)?;
        let arg = if self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_ident()?.name)
        };
        self.expect(Token::RParen)?;
        Ok(Attr {
            name,
            arg,
            span: start.to(self.previous_span()),
        })
    }

    /// `name : Type`
    fn parse_param(&mut self) -> ParseResult<Param> {
        let name = self.parse_ident()?;
        self.expect(Token::Colon)?;
        let ty = self.parse_type()?;
        Ok(Param { name, ty })
    }

    /// `Base ([])*` or `()`
    fn parse_type(&mut self) -> ParseResult<Ty> {
        let mut ty = if self.consume(&Token::LParen) {
            self.expect(Token::RParen)?;
            Ty::Unit
        } else {
            let ident = self.parse_ident()?;
            match ident.name.as_str() {
                "Unit" => Ty::Unit,
                "Int" => Ty::Int,
                "Double" => Ty::Double,
                "Bool" => Ty::Bool,
                "Result" => Ty::Result,
                "Qubit" => Ty::Qubit,
                _ => {
                    return Err(ParseError::UnknownType {
                        location: self.lines.span_location(ident.span),
                        name: ident.name,
                    });
                }
            }
        };

        while self.check(&Token::LBracket) {
            self.advance();
            self.expect(Token::RBracket)?;
            ty = Ty::Array(Box::new(ty));
        }
        Ok(ty)
    }

    /// `{ stmt* }`
    fn parse_block(&mut self) -> ParseResult<Block> {
        let start = self.current_span();
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.is_eof() {
                return Err(ParseError::UnexpectedEof("}".into()));
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(Token::RBrace)?;
        Ok(Block {
            stmts,
            span: start.to(self.previous_span()),
        })
    }

    /// Parse a statement.
    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.current_span();
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| ParseError::UnexpectedEof("statement".into()))?;

        let kind = match token {
            Token::Use => self.parse_use()?,
            Token::Let => {
                self.advance();
                let (name, value) = self.parse_binding()?;
                StmtKind::Let { name, value }
            }
            Token::Mutable => {
                self.advance();
                let (name, value) = self.parse_binding()?;
                StmtKind::Mutable { name, value }
            }
            Token::Set => self.parse_set()?,
            Token::If => self.parse_if()?,
            Token::For => self.parse_for()?,
            Token::While => {
                self.advance();
                let cond = self.parse_expression()?;
                let body = self.parse_block()?;
                StmtKind::While { cond, body }
            }
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(Token::Semicolon)?;
                StmtKind::Return(value)
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect(Token::Semicolon)?;
                StmtKind::Expr(expr)
            }
        };

        Ok(Stmt {
            kind,
            span: start.to(self.previous_span()),
        })
    }

    /// `use name = Qubit();` / `use name = Qubit[n];`
    fn parse_use(&mut self) -> ParseResult<StmtKind> {
        self.expect(Token::Use)?;
        let name = self.parse_ident()?;
        self.expect(Token::Eq)?;

        let ctor = self.parse_ident()?;
        if ctor.name != "Qubit" {
            return Err(ParseError::UnexpectedToken {
                location: self.lines.span_location(ctor.span),
                expected: "Qubit".into(),
                found: ctor.name,
            });
        }

        let init = if self.consume(&Token::LBracket) {
            let size = self.parse_expression()?;
            self.expect(Token::RBracket)?;
            QubitInit::Array(size)
        } else {
            self.expect(Token::LParen)?;
            self.expect(Token::RParen)?;
            QubitInit::Single
        };
        self.expect(Token::Semicolon)?;
        Ok(StmtKind::Use { name, init })
    }

    /// `name = expr;` after `let` / `mutable`.
    fn parse_binding(&mut self) -> ParseResult<(Ident, Expr)> {
        let name = self.parse_ident()?;
        self.expect(Token::Eq)?;
        let value = self.parse_expression()?;
        self.expect(Token::Semicolon)?;
        Ok((name, value))
    }

    /// `set x = e;` and the compound forms `+=`, `-=`, `*=`.
    fn parse_set(&mut self) -> ParseResult<StmtKind> {
        self.expect(Token::Set)?;
        let name = self.parse_ident()?;

        let span = self.current_span();
        let compound = match self.advance() {
            Some(Token::Eq) => None,
            Some(Token::PlusEq) => Some(BinOp::Add),
            Some(Token::MinusEq) => Some(BinOp::Sub),
            Some(Token::StarEq) => Some(BinOp::Mul),
            Some(other) => return Err(self.unexpected("assignment operator", &other, span)),
            None => return Err(ParseError::UnexpectedEof("assignment operator".into())),
        };

        let rhs = self.parse_expression()?;
        self.expect(Token::Semicolon)?;

        let value = match compound {
            None => rhs,
            Some(op) => {
                let span = name.span.to(rhs.span);
                Expr::new(
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(Expr::new(ExprKind::Path(vec![name.name.clone()]), name.span)),
                        rhs: Box::new(rhs),
                    },
                    span,
                )
            }
        };
        Ok(StmtKind::Set { name, value })
    }

    /// `if c { } (elif c { })* (else { })?`
    fn parse_if(&mut self) -> ParseResult<StmtKind> {
        self.expect(Token::If)?;
        let mut branches = vec![(self.parse_expression()?, self.parse_block()?)];

        while self.consume(&Token::Elif) {
            let cond = self.parse_expression()?;
            let body = self.parse_block()?;
            branches.push((cond, body));
        }

        let otherwise = if self.consume(&Token::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    /// `for x in a..b { }` / `for x in array { }`
    fn parse_for(&mut self) -> ParseResult<StmtKind> {
        self.expect(Token::For)?;
        let var = self.parse_ident()?;
        self.expect(Token::In)?;

        let start = self.parse_expression()?;
        let iter = if self.consume(&Token::DotDot) {
            let end = self.parse_expression()?;
            let span = start.span.to(end.span);
            Expr::new(
                ExprKind::Range {
                    start: Box::new(start),
                    end: Box::new(end),
                },
                span,
            )
        } else {
            start
        };

        let body = self.parse_block()?;
        Ok(StmtKind::For { var, iter, body })
    }

    /// Parse an expression.
    fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.parse_binary_expr(0)
    }

    /// Parse binary expression with precedence climbing.
    fn parse_binary_expr(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut left = self.parse_unary_expr()?;

        while let Some(op) = self.peek_binary_op() {
            let prec = op_precedence(op);
            if prec < min_prec {
                break;
            }
            self.advance();

            let right = self.parse_binary_expr(prec + 1)?;
            let span = left.span.to(right.span);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(left),
                    rhs: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse unary expression.
    fn parse_unary_expr(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let op = if self.consume(&Token::Minus) {
            Some(UnOp::Neg)
        } else if self.consume(&Token::Not) {
            Some(UnOp::Not)
        } else {
            None
        };

        match op {
            Some(UnOp::Neg) if matches!(self.peek(), Some(Token::IntLiteral(_))) => {
                self.parse_negative_literal(start)
            }
            Some(op) => {
                let operand = self.parse_unary_expr()?;
                let span = start.to(operand.span);
                Ok(Expr::new(
                    ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            None => self.parse_postfix_expr(),
        }
    }

    /// `-` directly followed by an integer literal, folded so that
    /// `-9223372036854775808` is in range.
    fn parse_negative_literal(&mut self, start: Span) -> ParseResult<Expr> {
        let literal_span = self.current_span();
        let Some(Token::IntLiteral(v)) = self.advance() else {
            return Err(ParseError::UnexpectedEof("integer literal".into()));
        };
        let span = start.to(literal_span);
        let value = 0i64.checked_sub_unsigned(v).ok_or_else(|| ParseError::IntegerOutOfRange {
            location: self.lines.span_location(span),
            literal: format!("-{v}"),
        })?;
        Ok(Expr::new(ExprKind::Int(value), span))
    }

    /// Primary expression followed by any number of `[index]` suffixes.
    fn parse_postfix_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary_expr()?;
        while self.consume(&Token::LBracket) {
            let index = self.parse_expression()?;
            self.expect(Token::RBracket)?;
            let span = expr.span.to(self.previous_span());
            expr = Expr::new(
                ExprKind::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                },
                span,
            );
        }
        Ok(expr)
    }

    /// Parse primary expression.
    fn parse_primary_expr(&mut self) -> ParseResult<Expr> {
        let span = self.current_span();
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| ParseError::UnexpectedEof("expression".into()))?;

        let kind = match token {
            Token::IntLiteral(v) => {
                self.advance();
                let value = i64::try_from(v).map_err(|_| ParseError::IntegerOutOfRange {
                    location: self.lines.span_location(span),
                    literal: v.to_string(),
                })?;
                ExprKind::Int(value)
            }
            Token::DoubleLiteral(v) => {
                self.advance();
                ExprKind::Double(v)
            }
            Token::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            Token::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            Token::Zero => {
                self.advance();
                ExprKind::Result(false)
            }
            Token::One => {
                self.advance();
                ExprKind::Result(true)
            }
            Token::Identifier(_) => {
                let path = self.parse_path()?;
                if self.consume(&Token::LParen) {
                    let args = self.parse_expression_list(&Token::RParen)?;
                    self.expect(Token::RParen)?;
                    ExprKind::Call { callee: path, args }
                } else {
                    ExprKind::Path(path)
                }
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                ExprKind::Paren(Box::new(inner))
            }
            Token::LBracket => {
                self.advance();
                let items = self.parse_expression_list(&Token::RBracket)?;
                self.expect(Token::RBracket)?;
                ExprKind::Array(items)
            }
            other => return Err(self.unexpected("expression", &other, span)),
        };

        Ok(Expr::new(kind, span.to(self.previous_span())))
    }

    /// Peek at binary operator.
    fn peek_binary_op(&self) -> Option<BinOp> {
        match self.peek()? {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            Token::Star => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            Token::Percent => Some(BinOp::Mod),
            Token::EqEq => Some(BinOp::Eq),
            Token::NotEq => Some(BinOp::NotEq),
            Token::Lt => Some(BinOp::Lt),
            Token::LtEq => Some(BinOp::LtEq),
            Token::Gt => Some(BinOp::Gt),
            Token::GtEq => Some(BinOp::GtEq),
            Token::And => Some(BinOp::And),
            Token::Or => Some(BinOp::Or),
            _ => None,
        }
    }

    /// Comma-separated expressions up to (not including) `close`.
    fn parse_expression_list(&mut self, close: &Token) -> ParseResult<Vec<Expr>> {
        if self.check(close) {
            return Ok(vec![]);
        }
        let mut exprs = vec![self.parse_expression()?];
        while self.consume(&Token::Comma) {
            exprs.push(self.parse_expression()?);
        }
        Ok(exprs)
    }

    /// `Ident (. Ident)*`
    fn parse_path(&mut self) -> ParseResult<Vec<String>> {
        let mut segments = vec![self.parse_ident()?.name];
        while self.consume(&Token::Dot) {
            segments.push(self.parse_ident()?.name);
        }
        Ok(segments)
    }

    /// Parse an identifier.
    fn parse_ident(&mut self) -> ParseResult<Ident> {
        let span = self.current_span();
        match self.advance() {
            Some(Token::Identifier(name)) => Ok(Ident { name, span }),
            Some(other) => Err(self.unexpected("identifier", &other, span)),
            None => Err(ParseError::UnexpectedEof("identifier".into())),
        }
    }
}

/// Get operator precedence.
fn op_precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Or => 1,
        BinOp::And => 2,
        BinOp::Eq | BinOp::NotEq => 3,
        BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => 4,
        BinOp::Add | BinOp::Sub => 5,
        BinOp::Mul | BinOp::Div | BinOp::Mod => 6,
    }
}
