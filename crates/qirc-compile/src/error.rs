//! Error types for lowering and for the compile front door.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use qirc_ir::IrError;
use qirc_syntax::ParseError;
use qirc_syntax::ast::Location;

use crate::profile::{ConstructKind, TargetProfile};

/// Errors that can occur while lowering a program to QIR.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LoweringError {
    /// The program uses a construct the requested profile forbids.
    #[error("Cannot use {kind} with the {profile} profile (at {location})")]
    UnsupportedConstruct {
        kind: ConstructKind,
        profile: TargetProfile,
        location: Location,
    },

    /// The construct has no lowering rule.
    #[error("Code generation is not implemented for {kind}")]
    Unimplemented { kind: String },

    /// A name could not be resolved.
    #[error("Cannot resolve '{name}' at {location}: {reason}")]
    Unresolved {
        name: String,
        location: Location,
        reason: String,
    },

    #[error("Type mismatch at {location}: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        location: Location,
    },

    /// Compile-time evaluation failed (overflow, division by zero, bad index).
    #[error("Evaluation error at {location}: {message}")]
    Evaluation { message: String, location: Location },

    #[error("No entry point: mark a callable with @EntryPoint() or name it Main")]
    MissingEntryPoint,

    #[error("Duplicate declaration of '{name}' at {location}")]
    Duplicate { name: String, location: Location },

    /// Lowering produced structurally invalid IR. Always an internal bug.
    #[error("Invalid IR: {0}")]
    InvalidIr(String),
}

impl From<IrError> for LoweringError {
    fn from(err: IrError) -> Self {
        LoweringError::InvalidIr(err.to_string())
    }
}

/// Result type for lowering operations.
pub type LoweringResult<T> = Result<T, LoweringError>;

/// Any failure of [`crate::generate_ir`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] ParseError),

    #[error(transparent)]
    Lowering(#[from] LoweringError),
}

impl CompileError {
    /// The construct and profile if this is a profile violation.
    pub fn unsupported_construct(&self) -> Option<(ConstructKind, TargetProfile)> {
        match self {
            CompileError::Lowering(LoweringError::UnsupportedConstruct { kind, profile, .. }) => {
                Some((*kind, *profile))
            }
            _ => None,
        }
    }

    /// Whether this is a missing lowering rule rather than a user error.
    pub fn is_unimplemented(&self) -> bool {
        matches!(
            self,
            CompileError::Lowering(LoweringError::Unimplemented { .. } | LoweringError::InvalidIr(_))
        )
    }
}

/// Result type for [`crate::generate_ir`].
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_names_construct_and_profile() {
        let err = LoweringError::UnsupportedConstruct {
            kind: ConstructKind::MeasurementBranch,
            profile: TargetProfile::Base,
            location: Location { line: 4, column: 9 },
        };
        assert_eq!(
            err.to_string(),
            "Cannot use branching on a measurement result with the Base profile (at 4:9)"
        );
    }

    #[test]
    fn test_compile_error_roundtrips_through_json() {
        let err = CompileError::Lowering(LoweringError::Unimplemented {
            kind: "nested array output".into(),
        });
        let json = serde_json::to_string(&err).unwrap();
        let back: CompileError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert!(back.is_unimplemented());
    }

    #[test]
    fn test_ir_error_is_internal() {
        let err: LoweringError = IrError::DuplicateFunction("f".into()).into();
        assert!(matches!(err, LoweringError::InvalidIr(_)));
    }
}
