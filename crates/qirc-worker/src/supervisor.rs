//! Deadline enforcement around a single worker.
//!
//! Each request gets its own worker and walks this state machine:
//!
//! ```text
//!   Idle ──→ Submitted ──┬──→ Completed ──┐
//!     │                  ├──→ Failed    ──┼──→ Terminated
//!     └──────────────────┴──→ TimedOut  ──┘
//! ```
//!
//! Whatever the outcome, the worker is terminated exactly once before
//! [`Supervisor::run_with_timeout`] returns.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{SupervisorError, SupervisorResult};
use crate::protocol::{Outcome, Request};
use crate::worker::{ProcessSpawner, Worker, WorkerCommand, WorkerSpawner};

/// Deadline applied when none is configured.
pub const DEFAULT_DEADLINE_MS: u64 = 30_000;

/// Lifecycle of one supervised request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SupervisorState {
    Idle,
    Submitted,
    Completed,
    Failed,
    TimedOut,
    Terminated,
}

impl SupervisorState {
    /// Whether the request has an outcome.
    pub fn is_outcome(self) -> bool {
        matches!(
            self,
            SupervisorState::Completed | SupervisorState::Failed | SupervisorState::TimedOut
        )
    }

    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::{Completed, Failed, Idle, Submitted, Terminated, TimedOut};
        matches!(
            (self, next),
            (Idle, Submitted | Failed)
                | (Submitted, Completed | Failed | TimedOut)
                | (Completed | Failed | TimedOut, Terminated)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened during one supervised run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// `None` if no worker could be spawned.
    pub worker_id: Option<Uuid>,
    pub pid: Option<u32>,
    pub final_state: SupervisorState,
    /// Every state visited, starting with `Idle`.
    pub transitions: Vec<SupervisorState>,
    pub terminate_calls: u32,
    pub elapsed: Duration,
}

/// Records transitions for one run.
struct Run {
    started: Instant,
    transitions: Vec<SupervisorState>,
    worker_id: Option<Uuid>,
    pid: Option<u32>,
    terminate_calls: u32,
}

impl Run {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            transitions: vec![SupervisorState::Idle],
            worker_id: None,
            pid: None,
            terminate_calls: 0,
        }
    }

    fn state(&self) -> SupervisorState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SupervisorState::Idle)
    }

    fn advance(&mut self, next: SupervisorState) {
        debug_assert!(
            self.state().can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state()
        );
        debug!(from = %self.state(), to = %next, "supervisor transition");
        self.transitions.push(next);
    }

    fn report(self) -> RunReport {
        RunReport {
            worker_id: self.worker_id,
            pid: self.pid,
            final_state: self.state(),
            transitions: self.transitions,
            terminate_calls: self.terminate_calls,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Runs requests in fresh workers under a deadline.
#[derive(Debug, Clone)]
pub struct Supervisor<S = ProcessSpawner> {
    spawner: S,
    deadline: Duration,
}

impl Supervisor<ProcessSpawner> {
    /// Supervise worker processes started with `command`.
    pub fn new(command: WorkerCommand) -> Self {
        Self::with_spawner(ProcessSpawner::new(command))
    }
}

impl<S: WorkerSpawner> Supervisor<S> {
    pub fn with_spawner(spawner: S) -> Self {
        Self {
            spawner,
            deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
        }
    }

    /// Set the deadline used by [`Supervisor::run`].
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Compile `request` under the configured deadline.
    pub async fn run(&self, request: Request) -> SupervisorResult<String> {
        self.run_with_timeout(request, self.deadline).await
    }

    /// Compile `request` in a fresh worker, giving up after `deadline`.
    pub async fn run_with_timeout(&self, request: Request, deadline: Duration) -> SupervisorResult<String> {
        self.run_observed(request, deadline).await.0
    }

    /// Like [`Supervisor::run_with_timeout`], also returning a [`RunReport`].
    #[instrument(skip(self, request), fields(request = %request.id, profile = %request.profile))]
    pub async fn run_observed(&self, request: Request, deadline: Duration) -> (SupervisorResult<String>, RunReport) {
        let mut run = Run::new();

        let mut worker = match self.spawner.spawn().await {
            Ok(worker) => worker,
            Err(err) => {
                error!("isolation fault: could not spawn worker: {err}");
                run.advance(SupervisorState::Failed);
                run.advance(SupervisorState::Terminated);
                return (Err(SupervisorError::IsolationFault(err)), run.report());
            }
        };
        run.worker_id = Some(worker.id());
        run.pid = worker.pid();

        let (state, result) = drive(&mut worker, &mut run, request, deadline).await;
        run.advance(state);

        run.terminate_calls += 1;
        if let Err(err) = worker.terminate().await {
            warn!(worker = %worker.id(), "terminate failed: {err}");
        }
        run.advance(SupervisorState::Terminated);

        let report = run.report();
        info!(
            worker = %worker.id(),
            outcome = %state,
            elapsed_ms = report.elapsed.as_millis(),
            "supervised run finished"
        );
        (result, report)
    }
}

/// Submit and wait for an outcome. Never terminates the worker itself.
async fn drive<W: Worker>(
    worker: &mut W,
    run: &mut Run,
    request: Request,
    deadline: Duration,
) -> (SupervisorState, SupervisorResult<String>) {
    let pending = match worker.submit(request) {
        Ok(pending) => pending,
        Err(err) => {
            error!(worker = %worker.id(), "isolation fault: submit failed: {err}");
            return (SupervisorState::Failed, Err(SupervisorError::IsolationFault(err)));
        }
    };
    run.advance(SupervisorState::Submitted);

    match tokio::time::timeout(deadline, pending).await {
        Ok(Ok(response)) => match response.outcome {
            Outcome::Ir(ir) => (SupervisorState::Completed, Ok(ir)),
            Outcome::Error(err) => {
                if err.is_unimplemented() {
                    error!(worker = %worker.id(), "codegen gap: {err}");
                } else {
                    debug!(worker = %worker.id(), "compilation failed: {err}");
                }
                (SupervisorState::Failed, Err(SupervisorError::CompilationFailed(err)))
            }
        },
        Ok(Err(err)) => {
            error!(worker = %worker.id(), "isolation fault: {err}");
            (SupervisorState::Failed, Err(SupervisorError::IsolationFault(err)))
        }
        Err(_) => {
            let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
            warn!(worker = %worker.id(), deadline_ms, "worker timed out");
            (SupervisorState::TimedOut, Err(SupervisorError::Timeout { deadline_ms }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use qirc_compile::{CompileError, LoweringError, TargetProfile};
    use tokio::sync::oneshot;

    use crate::error::{WorkerError, WorkerResult};
    use crate::protocol::Response;
    use crate::worker::PendingResponse;

    #[derive(Debug, Clone)]
    enum Behavior {
        Reply(Outcome),
        Hang,
        Crash,
        RefuseSpawn,
    }

    #[derive(Clone)]
    struct FakeSpawner {
        behavior: Behavior,
        terminations: Arc<AtomicUsize>,
    }

    impl FakeSpawner {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                terminations: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct FakeWorker {
        id: Uuid,
        behavior: Behavior,
        terminations: Arc<AtomicUsize>,
        held: Option<oneshot::Sender<WorkerResult<Response>>>,
    }

    #[async_trait]
    impl Worker for FakeWorker {
        fn id(&self) -> Uuid {
            self.id
        }

        fn pid(&self) -> Option<u32> {
            None
        }

        fn submit(&mut self, request: Request) -> WorkerResult<PendingResponse> {
            let (tx, pending) = PendingResponse::channel();
            match self.behavior.clone() {
                Behavior::Reply(outcome) => {
                    let _ = tx.send(Ok(Response { id: request.id, outcome }));
                }
                Behavior::Crash => {
                    let _ = tx.send(Err(WorkerError::NoResponse));
                }
                Behavior::Hang | Behavior::RefuseSpawn => self.held = Some(tx),
            }
            Ok(pending)
        }

        async fn terminate(&mut self) -> WorkerResult<()> {
            self.held = None;
            self.terminations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl WorkerSpawner for FakeSpawner {
        type Worker = FakeWorker;

        async fn spawn(&self) -> WorkerResult<FakeWorker> {
            if matches!(self.behavior, Behavior::RefuseSpawn) {
                return Err(WorkerError::Spawn {
                    program: "fake".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            Ok(FakeWorker {
                id: Uuid::new_v4(),
                behavior: self.behavior.clone(),
                terminations: self.terminations.clone(),
                held: None,
            })
        }
    }

    fn request() -> Request {
        Request::new("t.qs", "", TargetProfile::Base)
    }

    #[tokio::test]
    async fn test_completed() {
        let spawner = FakeSpawner::new(Behavior::Reply(Outcome::Ir("ir".into())));
        let supervisor = Supervisor::with_spawner(spawner.clone());
        let (result, report) = supervisor.run_observed(request(), Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), "ir");
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
        assert_eq!(spawner.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compilation_failure() {
        let err = CompileError::Lowering(LoweringError::MissingEntryPoint);
        let spawner = FakeSpawner::new(Behavior::Reply(Outcome::Error(err.clone())));
        let supervisor = Supervisor::with_spawner(spawner.clone());
        let (result, report) = supervisor.run_observed(request(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SupervisorError::CompilationFailed(e)) if e == err));
        assert!(report.transitions.contains(&SupervisorState::Failed));
        assert_eq!(spawner.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_terminates_once() {
        let spawner = FakeSpawner::new(Behavior::Hang);
        let supervisor = Supervisor::with_spawner(spawner.clone()).with_deadline(Duration::from_millis(250));
        let (result, report) = supervisor.run_observed(request(), supervisor.deadline()).await;
        assert!(matches!(result, Err(SupervisorError::Timeout { deadline_ms: 250 })));
        assert_eq!(report.final_state, SupervisorState::Terminated);
        assert_eq!(report.transitions[2], SupervisorState::TimedOut);
        assert_eq!(spawner.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_crash_is_isolation_fault() {
        let spawner = FakeSpawner::new(Behavior::Crash);
        let supervisor = Supervisor::with_spawner(spawner.clone());
        let result = supervisor.run(request()).await;
        assert!(matches!(result, Err(SupervisorError::IsolationFault(WorkerError::NoResponse))));
        assert_eq!(spawner.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let spawner = FakeSpawner::new(Behavior::RefuseSpawn);
        let supervisor = Supervisor::with_spawner(spawner.clone());
        let (result, report) = supervisor.run_observed(request(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SupervisorError::IsolationFault(WorkerError::Spawn { .. }))));
        assert_eq!(report.worker_id, None);
        assert_eq!(report.terminate_calls, 0);
        assert_eq!(
            report.transitions,
            vec![
                SupervisorState::Idle,
                SupervisorState::Failed,
                SupervisorState::Terminated
            ]
        );
    }

    #[test]
    fn test_transition_table() {
        use SupervisorState::*;
        assert!(Idle.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(TimedOut));
        assert!(TimedOut.can_transition_to(Terminated));
        assert!(!Idle.can_transition_to(Completed));
        assert!(!Terminated.can_transition_to(Idle));
        assert!(!Completed.can_transition_to(Failed));
        assert!(Failed.is_outcome());
        assert!(!Terminated.is_outcome());
    }

    #[test]
    fn test_default_deadline() {
        let supervisor = Supervisor::new(WorkerCommand::new("qirc-worker"));
        assert_eq!(supervisor.deadline(), Duration::from_millis(DEFAULT_DEADLINE_MS));
        assert_eq!(supervisor.spawner().command().program, std::path::PathBuf::from("qirc-worker"));
    }
}
