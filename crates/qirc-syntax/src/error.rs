//! Error types for the qirc parser.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::Location;

/// Errors that can occur during parsing.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ParseError {
    /// Lexer error (invalid token).
    #[error("Lexer error at {location}: {message}")]
    LexerError { location: Location, message: String },

    /// Unexpected token.
    #[error("Unexpected token at {location}: expected {expected}, found {found}")]
    UnexpectedToken {
        location: Location,
        expected: String,
        found: String,
    },

    /// Unexpected end of input.
    #[error("Unexpected end of input: expected {0}")]
    UnexpectedEof(String),

    /// Integer literal does not fit in a signed 64-bit integer.
    #[error("Integer literal {literal} at {location} does not fit in a 64-bit Int")]
    IntegerOutOfRange { location: Location, literal: String },

    /// Unknown type name.
    #[error("Unknown type '{name}' at {location}")]
    UnknownType { location: Location, name: String },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;
