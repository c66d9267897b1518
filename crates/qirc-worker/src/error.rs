//! Error types for the worker boundary and the supervisor.

use thiserror::Error;

use qirc_compile::{CompileError, TargetProfile};

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failures of a single worker process or its pipes.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkerError {
    /// The worker program could not be started.
    #[error("Failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A handle accepts exactly one request.
    #[error("Worker {0} already has a request in flight")]
    AlreadySubmitted(uuid::Uuid),

    /// The handle was terminated before the request was submitted.
    #[error("Worker {0} has been terminated")]
    Terminated(uuid::Uuid),

    /// The worker closed its output without writing a response.
    #[error("Worker exited without a response")]
    NoResponse,

    /// The worker exited unsuccessfully, whatever it wrote before.
    #[error("Worker exited with {0}")]
    Exited(String),

    /// The worker wrote something that is not a valid response.
    #[error("Malformed worker response: {0}")]
    Protocol(String),

    /// The I/O task went away before producing a result.
    #[error("Worker I/O task ended unexpectedly")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for supervised compilation.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Outcome of a supervised request that did not produce IR.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SupervisorError {
    /// The worker ran and reported a compilation error.
    #[error("Compilation failed: {0}")]
    CompilationFailed(CompileError),

    /// The deadline passed before the worker answered.
    #[error("Compilation timed out after {deadline_ms} ms")]
    Timeout { deadline_ms: u64 },

    /// The worker crashed, could not be started or answered garbage.
    #[error("Isolation fault: {0}")]
    IsolationFault(#[from] WorkerError),
}

/// Shown for failures whose detail is internal.
fn generic_failure(profile: TargetProfile) -> String {
    format!(
        "Code generation failed. Please ensure the code is compatible with the QIR {} profile \
         by setting the target QIR profile to '{}' and fixing any errors.",
        profile.as_str(),
        profile.as_str()
    )
}

impl SupervisorError {
    /// Message suitable for an end user.
    ///
    /// Profile violations and user errors are shown as-is. Missing lowering
    /// rules and isolation faults collapse to one generic message; their
    /// detail only goes to the log.
    pub fn user_message(&self, profile: TargetProfile) -> String {
        match self {
            SupervisorError::CompilationFailed(err) if err.is_unimplemented() => generic_failure(profile),
            SupervisorError::CompilationFailed(err) => err.to_string(),
            SupervisorError::Timeout { .. } => "Code generation took too long; the program likely contains \
                 an infinite loop or another non-terminating construct."
                .to_string(),
            SupervisorError::IsolationFault(_) => generic_failure(profile),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SupervisorError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qirc_compile::{ConstructKind, LoweringError, generate_ir};

    #[test]
    fn test_user_message_hides_internal_detail() {
        let fault = SupervisorError::IsolationFault(WorkerError::Protocol("garbage at byte 3".into()));
        let msg = fault.user_message(TargetProfile::Base);
        assert!(msg.starts_with("Code generation failed."));
        assert!(msg.contains("QIR base profile"));
        assert!(!msg.contains("garbage"));

        let unimpl = SupervisorError::CompilationFailed(CompileError::Lowering(LoweringError::Unimplemented {
            kind: "nested array output".into(),
        }));
        assert_eq!(unimpl.user_message(TargetProfile::Base), msg);
    }

    #[test]
    fn test_timeout_message() {
        let err = SupervisorError::Timeout { deadline_ms: 50 };
        assert_eq!(err.to_string(), "Compilation timed out after 50 ms");
        assert!(err.user_message(TargetProfile::Full).contains("took too long"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_unsupported_construct_is_verbatim() {
        let source = "namespace S {\n    @EntryPoint()\n    operation Main() : Int {\n        return 1;\n    }\n}\n";
        let inner = generate_ir("s.qs", source, TargetProfile::Base).unwrap_err();
        assert_eq!(
            inner.unsupported_construct(),
            Some((ConstructKind::ClassicalOutput, TargetProfile::Base))
        );
        let expected = inner.to_string();
        let err = SupervisorError::CompilationFailed(inner);
        assert_eq!(err.user_message(TargetProfile::Base), expected);
        assert!(expected.contains("Base profile"));
    }
}
