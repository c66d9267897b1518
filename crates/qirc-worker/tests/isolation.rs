//! End-to-end tests of the worker process boundary.
//!
//! These drive the real `qirc-worker` binary (and a few shell stand-ins for
//! misbehaving workers) through the [`Supervisor`].

use std::path::Path;
use std::time::{Duration, Instant};

use futures::future::join_all;
use qirc_compile::{ConstructKind, TargetProfile, generate_ir};
use qirc_worker::{
    Request, Supervisor, SupervisorError, SupervisorState, Worker, WorkerCommand, WorkerError,
    WorkerHandle,
};

/// Helper: command for the worker binary built alongside these tests.
fn worker_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_qirc-worker"))
}

/// Helper: command running a shell snippet in place of a worker.
fn shell(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh").arg("-c").arg(script)
}

const BELL: &str = r"
namespace Bell {
    @EntryPoint()
    operation Main() : Result[] {
        use qs = Qubit[2];
        H(qs[0]);
        CNOT(qs[0], qs[1]);
        return [M(qs[0]), M(qs[1])];
    }
}
";

/// Never terminates under the static profiles, which evaluate loops at compile time.
const SPIN: &str = r"
namespace Spin {
    @EntryPoint()
    operation Main() : Unit {
        while true {
        }
    }
}
";

const BRANCH: &str = r"
namespace Branch {
    @EntryPoint()
    operation Main() : Unit {
        use q = Qubit();
        if M(q) == One {
            X(q);
        }
    }
}
";

// ============================================================================
// Successful runs
// ============================================================================

#[tokio::test]
async fn test_worker_matches_in_process_output() {
    let supervisor = Supervisor::new(worker_command());
    let (result, report) = supervisor
        .run_observed(Request::new("bell.qs", BELL, TargetProfile::Base), Duration::from_secs(20))
        .await;

    let expected = generate_ir("bell.qs", BELL, TargetProfile::Base).unwrap();
    assert_eq!(result.unwrap(), expected);
    assert_eq!(
        report.transitions,
        vec![
            SupervisorState::Idle,
            SupervisorState::Submitted,
            SupervisorState::Completed,
            SupervisorState::Terminated
        ]
    );
    assert_eq!(report.terminate_calls, 1);
    assert!(report.pid.is_some());
}

#[tokio::test]
async fn test_concurrent_requests_match_single_output() {
    let supervisor = Supervisor::new(worker_command()).with_deadline(Duration::from_secs(30));
    let profiles = [TargetProfile::Base, TargetProfile::Adaptive, TargetProfile::Full];

    let runs = (0..9).map(|i| {
        let profile = profiles[i % profiles.len()];
        let supervisor = &supervisor;
        async move { (profile, supervisor.run(Request::new("bell.qs", BELL, profile)).await) }
    });

    for (profile, result) in join_all(runs).await {
        let expected = generate_ir("bell.qs", BELL, profile).unwrap();
        assert_eq!(result.unwrap(), expected, "profile {profile}");
    }
}

// ============================================================================
// Compilation failures
// ============================================================================

#[tokio::test]
async fn test_profile_violation_is_reported() {
    let supervisor = Supervisor::new(worker_command());
    let err = supervisor
        .run(Request::new("branch.qs", BRANCH, TargetProfile::Base))
        .await
        .unwrap_err();

    match &err {
        SupervisorError::CompilationFailed(inner) => {
            assert_eq!(
                inner.unsupported_construct().map(|(_, profile)| profile),
                Some(TargetProfile::Base)
            );
            assert!(matches!(
                inner.unsupported_construct(),
                Some((ConstructKind::MeasurementComparison | ConstructKind::MeasurementBranch, _))
            ));
        }
        other => panic!("expected a compilation failure, got {other:?}"),
    }
    assert!(err.user_message(TargetProfile::Base).contains("Base profile"));
}

// ============================================================================
// Deadlines
// ============================================================================

#[tokio::test]
async fn test_timeout_kills_worker() {
    let deadline = Duration::from_millis(500);
    let supervisor = Supervisor::new(worker_command());
    let started = Instant::now();
    let (result, report) = supervisor
        .run_observed(Request::new("spin.qs", SPIN, TargetProfile::Base), deadline)
        .await;

    assert!(matches!(result, Err(SupervisorError::Timeout { deadline_ms: 500 })));
    assert!(started.elapsed() < deadline + Duration::from_secs(5));
    assert_eq!(report.final_state, SupervisorState::Terminated);
    assert!(report.transitions.contains(&SupervisorState::TimedOut));
    assert_eq!(report.terminate_calls, 1);

    let pid = report.pid.unwrap();
    if cfg!(target_os = "linux") {
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }
}

#[tokio::test]
async fn test_full_profile_does_not_spin() {
    // Full emits the loop instead of evaluating it.
    let supervisor = Supervisor::new(worker_command());
    let ir = supervisor
        .run_with_timeout(Request::new("spin.qs", SPIN, TargetProfile::Full), Duration::from_secs(20))
        .await
        .unwrap();
    assert!(ir.contains("while.header"));
}

// ============================================================================
// Isolation faults
// ============================================================================

#[tokio::test]
async fn test_crashing_worker_is_isolation_fault() {
    let supervisor = Supervisor::new(shell("exit 3"));
    let err = supervisor
        .run_with_timeout(Request::new("bell.qs", BELL, TargetProfile::Base), Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::IsolationFault(_)));
    assert!(err.user_message(TargetProfile::Base).starts_with("Code generation failed."));
}

#[tokio::test]
async fn test_malformed_output_is_isolation_fault() {
    let supervisor = Supervisor::new(shell("cat > /dev/null; echo not-json"));
    let err = supervisor
        .run_with_timeout(Request::new("bell.qs", BELL, TargetProfile::Base), Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::IsolationFault(WorkerError::Protocol(_))));
}

#[tokio::test]
async fn test_reply_then_failing_exit_is_isolation_fault() {
    // Answers with a well-formed reply for the request's id, then fails.
    let script = r#"read -r line
id=$(printf '%s' "$line" | sed 's/.*"id":"\([^"]*\)".*/\1/')
printf '{"id":"%s","outcome":{"ir":"unused"}}\n' "$id"
exit 3"#;
    let supervisor = Supervisor::new(shell(script));
    let (result, report) = supervisor
        .run_observed(Request::new("bell.qs", BELL, TargetProfile::Base), Duration::from_secs(10))
        .await;

    match result {
        Err(SupervisorError::IsolationFault(WorkerError::Exited(status))) => {
            assert!(status.contains('3'), "{status}");
        }
        other => panic!("expected an isolation fault, got {other:?}"),
    }
    assert!(!report.transitions.contains(&SupervisorState::Completed));
    assert_eq!(report.final_state, SupervisorState::Terminated);
    assert_eq!(report.terminate_calls, 1);
}

#[tokio::test]
async fn test_reply_then_clean_exit_completes() {
    let script = r#"read -r line
id=$(printf '%s' "$line" | sed 's/.*"id":"\([^"]*\)".*/\1/')
printf '{"id":"%s","outcome":{"ir":"from-shell"}}\n' "$id""#;
    let supervisor = Supervisor::new(shell(script));
    let ir = supervisor
        .run_with_timeout(Request::new("bell.qs", BELL, TargetProfile::Base), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(ir, "from-shell");
}

#[tokio::test]
async fn test_missing_worker_program() {
    let supervisor = Supervisor::new(WorkerCommand::new("/nonexistent/qirc-worker"));
    let (result, report) = supervisor
        .run_observed(Request::new("bell.qs", BELL, TargetProfile::Base), Duration::from_secs(1))
        .await;
    assert!(matches!(result, Err(SupervisorError::IsolationFault(WorkerError::Spawn { .. }))));
    assert_eq!(report.final_state, SupervisorState::Terminated);
}

// ============================================================================
// Handle lifecycle
// ============================================================================

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let mut worker = WorkerHandle::spawn(&shell("sleep 30")).unwrap();
    let pid = worker.pid().unwrap();
    let _pending = worker
        .submit(Request::new("bell.qs", BELL, TargetProfile::Base))
        .unwrap();

    worker.terminate().await.unwrap();
    worker.terminate().await.unwrap();
    assert!(worker.is_terminated());
    if cfg!(target_os = "linux") {
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }
}

#[tokio::test]
async fn test_terminate_before_submit() {
    let mut worker = WorkerHandle::spawn(&worker_command()).unwrap();
    worker.terminate().await.unwrap();
    let err = worker
        .submit(Request::new("bell.qs", BELL, TargetProfile::Base))
        .unwrap_err();
    assert!(matches!(err, WorkerError::Terminated(_)));
}

#[tokio::test]
async fn test_second_submit_rejected() {
    let mut worker = WorkerHandle::spawn(&worker_command()).unwrap();
    let pending = worker
        .submit(Request::new("bell.qs", BELL, TargetProfile::Base))
        .unwrap();
    let err = worker
        .submit(Request::new("bell.qs", BELL, TargetProfile::Base))
        .unwrap_err();
    assert!(matches!(err, WorkerError::AlreadySubmitted(_)));

    let response = pending.await.unwrap();
    assert!(matches!(response.outcome, qirc_worker::Outcome::Ir(_)));
    worker.terminate().await.unwrap();
}
