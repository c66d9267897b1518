//! Lexer for the qirc source language.

use logos::Logos;

/// Tokens of the source language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*[^*]*\*+(?:[^/*][^*]*\*+)*/")]
pub enum Token {
    // Keywords
    #[token("namespace")]
    Namespace,

    #[token("operation")]
    Operation,

    #[token("function")]
    Function,

    #[token("use")]
    Use,

    #[token("let")]
    Let,

    #[token("mutable")]
    Mutable,

    #[token("set")]
    Set,

    #[token("if")]
    If,

    #[token("elif")]
    Elif,

    #[token("else")]
    Else,

    #[token("for")]
    For,

    #[token("in")]
    In,

    #[token("while")]
    While,

    #[token("return")]
    Return,

    #[token("not")]
    Not,

    #[token("and")]
    And,

    #[token("or")]
    Or,

    // Literals
    #[token("true")]
    True,

    #[token("false")]
    False,

    #[token("Zero")]
    Zero,

    #[token("One")]
    One,

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    DoubleLiteral(f64),

    /// Kept unsigned; the parser range-checks against `i64`.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u64>().ok())]
    IntLiteral(u64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    // Operators and punctuation
    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("==")]
    EqEq,

    #[token("!=")]
    NotEq,

    #[token("<")]
    Lt,

    #[token("<=")]
    LtEq,

    #[token(">")]
    Gt,

    #[token(">=")]
    GtEq,

    #[token("=")]
    Eq,

    #[token("+=")]
    PlusEq,

    #[token("-=")]
    MinusEq,

    #[token("*=")]
    StarEq,

    #[token("@")]
    At,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(";")]
    Semicolon,

    #[token(":")]
    Colon,

    #[token(",")]
    Comma,

    #[token("..")]
    DotDot,

    #[token(".")]
    Dot,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Namespace => write!(f, "namespace"),
            Token::Operation => write!(f, "operation"),
            Token::Function => write!(f, "function"),
            Token::Use => write!(f, "use"),
            Token::Let => write!(f, "let"),
            Token::Mutable => write!(f, "mutable"),
            Token::Set => write!(f, "set"),
            Token::If => write!(f, "if"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::While => write!(f, "while"),
            Token::Return => write!(f, "return"),
            Token::Not => write!(f, "not"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Zero => write!(f, "Zero"),
            Token::One => write!(f, "One"),
            Token::DoubleLiteral(v) => write!(f, "{v}"),
            Token::IntLiteral(v) => write!(f, "{v}"),
            Token::Identifier(s) => write!(f, "{s}"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::LtEq => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::GtEq => write!(f, ">="),
            Token::Eq => write!(f, "="),
            Token::PlusEq => write!(f, "+="),
            Token::MinusEq => write!(f, "-="),
            Token::StarEq => write!(f, "*="),
            Token::At => write!(f, "@"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Semicolon => write!(f, ";"),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
            Token::DotDot => write!(f, ".."),
            Token::Dot => write!(f, "."),
        }
    }
}

/// A token with its byte span.
#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: std::ops::Range<usize>,
}

/// Tokenize a source string.
pub fn tokenize(source: &str) -> Vec<Result<SpannedToken, (std::ops::Range<usize>, String)>> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        if let Ok(token) = result {
            tokens.push(Ok(SpannedToken { token, span }));
        } else {
            let slice = &source[span.clone()];
            tokens.push(Err((span, format!("Invalid token: '{slice}'"))));
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .into_iter()
            .filter_map(Result::ok)
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_use_statement() {
        let tokens = ok_tokens("use q = Qubit();");
        assert_eq!(tokens[0], Token::Use);
        assert!(matches!(tokens[1], Token::Identifier(ref s) if s == "q"));
        assert_eq!(tokens[2], Token::Eq);
        assert!(matches!(tokens[3], Token::Identifier(ref s) if s == "Qubit"));
        assert_eq!(tokens[4], Token::LParen);
        assert_eq!(tokens[5], Token::RParen);
        assert_eq!(tokens[6], Token::Semicolon);
    }

    #[test]
    fn test_range_is_not_a_double() {
        let tokens = ok_tokens("0..3");
        assert_eq!(
            tokens,
            vec![Token::IntLiteral(0), Token::DotDot, Token::IntLiteral(3)]
        );
    }

    #[test]
    fn test_double_literals() {
        let tokens = ok_tokens("1.5 2e3");
        assert!(matches!(tokens[0], Token::DoubleLiteral(v) if (v - 1.5).abs() < 1e-12));
        assert!(matches!(tokens[1], Token::DoubleLiteral(v) if (v - 2000.0).abs() < 1e-12));
    }

    #[test]
    fn test_result_literals_and_keywords() {
        let tokens = ok_tokens("r == One and not done");
        assert_eq!(tokens[1], Token::EqEq);
        assert_eq!(tokens[2], Token::One);
        assert_eq!(tokens[3], Token::And);
        assert_eq!(tokens[4], Token::Not);
    }

    #[test]
    fn test_comments_skipped() {
        let source = r"
            // line comment
            let x = 1;
            /* block
               comment */
            set x += 2;
        ";
        assert_eq!(ok_tokens(source).len(), 10);
    }

    #[test]
    fn test_invalid_character() {
        let results = tokenize("let x = $;");
        assert!(results.iter().any(Result::is_err));
    }
}
