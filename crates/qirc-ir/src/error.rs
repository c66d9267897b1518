//! Error types for the IR crate.

use thiserror::Error;

/// Errors that can occur while building or verifying IR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum IrError {
    /// An instruction or terminator was added to a block that already ends.
    #[error("Block '{block}' is already terminated")]
    BlockTerminated { block: String },

    /// A branch or positioning request named a block that does not exist.
    #[error("Unknown block '{block}' in function '{function}'")]
    UnknownBlock { function: String, block: String },

    /// A block has no terminator.
    #[error("Block '{block}' in function '{function}' has no terminator")]
    MissingTerminator { function: String, block: String },

    /// A non-entry block has no predecessor.
    #[error("Block '{block}' in function '{function}' has no predecessor")]
    UnreachableBlock { function: String, block: String },

    /// Two blocks in one function share a label.
    #[error("Duplicate block label '{block}' in function '{function}'")]
    DuplicateBlock { function: String, block: String },

    /// A phi names an incoming block that does not branch to it.
    #[error("Phi in block '{block}' of '{function}' lists '{incoming}', which is not a predecessor")]
    InvalidPhi {
        function: String,
        block: String,
        incoming: String,
    },

    /// The same external function was declared with two signatures.
    #[error("Conflicting declarations for '@{0}'")]
    ConflictingDeclaration(String),

    /// Two function definitions share a name.
    #[error("Duplicate function definition '@{0}'")]
    DuplicateFunction(String),
}

/// Result type for IR operations.
pub type IrResult<T> = Result<T, IrError>;
