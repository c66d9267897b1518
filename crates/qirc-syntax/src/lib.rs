//! Front end for the qirc quantum source language.
//!
//! This crate turns source text into the [`ast::Program`] consumed by the
//! lowering engines in `qirc-compile`. It is a structural parser only: names
//! are not resolved and types are not checked here.
//!
//! # Example
//!
//! ```rust
//! use qirc_syntax::parse;
//!
//! let program = parse(r#"
//!     namespace Sample {
//!         @EntryPoint()
//!         operation Main() : Result {
//!             use q = Qubit();
//!             H(q);
//!             return M(q);
//!         }
//!     }
//! "#).unwrap();
//!
//! let (ns, main) = program.callables().next().unwrap();
//! assert_eq!(ns, "Sample");
//! assert!(main.is_entry_point());
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod source;

pub use error::{ParseError, ParseResult};
pub use parser::parse;
pub use source::LineIndex;
