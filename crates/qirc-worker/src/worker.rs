//! Worker processes.
//!
//! A worker is a child process that compiles exactly one request and
//! exits. Running the compiler out of process is what makes a hard
//! deadline enforceable: a thread stuck in an endless loop cannot be
//! stopped, a process can.
//!
//! ```text
//!   spawn() ──→ submit() ──→ PendingResponse ──→ terminate()
//!   (pipes)     (I/O task)     (oneshot)          (kill + wait)
//! ```
//!
//! The I/O task owns the child while a request is in flight. A reply only
//! counts once the child has also exited with status zero.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};
use crate::protocol::{Request, Response, decode_response, encode_line};

/// How long to keep draining a reaped worker's stderr.
const STDERR_DRAIN: Duration = Duration::from_millis(200);

/// A running worker that accepts one request.
#[async_trait]
pub trait Worker: Send {
    fn id(&self) -> Uuid;

    /// OS process id, if the worker is a process that is still owned.
    fn pid(&self) -> Option<u32>;

    /// Send `request` without waiting for the answer.
    ///
    /// Fails with [`WorkerError::AlreadySubmitted`] on a second call.
    fn submit(&mut self, request: Request) -> WorkerResult<PendingResponse>;

    /// Stop the worker and release everything it holds.
    ///
    /// Safe to call before, during or after a request, and any number of
    /// times.
    async fn terminate(&mut self) -> WorkerResult<()>;
}

/// Creates fresh workers. Workers are never reused.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    type Worker: Worker;

    async fn spawn(&self) -> WorkerResult<Self::Worker>;
}

/// The answer to a submitted request, once it arrives.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<WorkerResult<Response>>,
}

impl PendingResponse {
    /// A pending response and the sender that completes it.
    pub fn channel() -> (oneshot::Sender<WorkerResult<Response>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl Future for PendingResponse {
    type Output = WorkerResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(WorkerError::Disconnected)))
    }
}

/// Program and arguments that start a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Re-run the current executable with `subcommand`, e.g. `qirc worker`.
    pub fn current_exe(subcommand: &str) -> WorkerResult<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(subcommand))
    }
}

/// A worker child process.
///
/// The child is started with piped stdio and `kill_on_drop`, so dropping
/// the handle without calling [`Worker::terminate`] still kills it.
#[derive(Debug)]
pub struct WorkerHandle {
    id: Uuid,
    pid: Option<u32>,
    /// Held here until [`Worker::submit`] moves it into the I/O task.
    child: Option<Child>,
    /// Hands the child back once the exchange is over or stopped.
    io_task: Option<JoinHandle<Child>>,
    stop: Option<oneshot::Sender<()>>,
    stderr_task: Option<JoinHandle<()>>,
    submitted: bool,
    terminated: bool,
}

impl WorkerHandle {
    /// Start a worker process.
    pub fn spawn(command: &WorkerCommand) -> WorkerResult<Self> {
        let id = Uuid::new_v4();
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                program: command.program.display().to_string(),
                source,
            })?;
        let pid = child.id();
        debug!(worker = %id, pid = ?pid, program = %command.program.display(), "worker spawned");

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "qirc_worker::child", worker = %id, "{line}");
                }
            })
        });

        Ok(Self {
            id,
            pid,
            child: Some(child),
            io_task: None,
            stop: None,
            stderr_task,
            submitted: false,
            terminated: false,
        })
    }

    /// Whether [`Worker::terminate`] has run.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Take the child back, stopping the I/O task first if one is running.
    async fn reclaim_child(&mut self) -> Option<Child> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.io_task.take() {
            Some(task) => task.await.ok(),
            None => self.child.take(),
        }
    }
}

/// Write the request, close stdin, read the reply to EOF and wait for the
/// child to exit.
async fn exchange(
    child: &mut Child,
    mut stdin: ChildStdin,
    mut stdout: ChildStdout,
    line: Vec<u8>,
    expected: Uuid,
) -> WorkerResult<Response> {
    stdin.write_all(&line).await?;
    stdin.shutdown().await?;
    drop(stdin);

    let mut output = Vec::new();
    stdout.read_to_end(&mut output).await?;
    trace!(bytes = output.len(), "worker output read");

    let status = child.wait().await?;
    if !status.success() {
        return Err(WorkerError::Exited(status.to_string()));
    }
    decode_response(&output, expected)
}

#[async_trait]
impl Worker for WorkerHandle {
    fn id(&self) -> Uuid {
        self.id
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn submit(&mut self, request: Request) -> WorkerResult<PendingResponse> {
        if self.submitted {
            return Err(WorkerError::AlreadySubmitted(self.id));
        }
        if self.terminated {
            return Err(WorkerError::Terminated(self.id));
        }
        let line = encode_line(&request)?;
        let mut child = self.child.take().ok_or(WorkerError::Disconnected)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            self.child = Some(child);
            return Err(WorkerError::Disconnected);
        };
        self.submitted = true;

        let expected = request.id;
        let worker = self.id;
        let (tx, pending) = PendingResponse::channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        self.stop = Some(stop_tx);
        self.io_task = Some(tokio::spawn(async move {
            let result = tokio::select! {
                result = exchange(&mut child, stdin, stdout, line, expected) => Some(result),
                _ = &mut stop_rx => None,
            };
            match result {
                Some(result) => {
                    if let Err(err) = &result {
                        debug!(%worker, "exchange failed: {err}");
                    }
                    let _ = tx.send(result);
                }
                None => trace!(%worker, "exchange stopped"),
            }
            child
        }));
        debug!(worker = %self.id, request = %expected, "request submitted");
        Ok(pending)
    }

    async fn terminate(&mut self) -> WorkerResult<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        let Some(mut child) = self.reclaim_child().await else {
            return Ok(());
        };

        let status = match child.try_wait()? {
            Some(status) => status,
            None => {
                child.start_kill()?;
                child.wait().await?
            }
        };
        debug!(worker = %self.id, pid = ?self.pid, %status, "worker reaped");

        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN, &mut task).await.is_err() {
                task.abort();
            }
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Aborting drops the child inside the task, which kills it.
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Spawns [`WorkerHandle`]s from a fixed command.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    command: WorkerCommand,
}

impl ProcessSpawner {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    type Worker = WorkerHandle;

    async fn spawn(&self) -> WorkerResult<WorkerHandle> {
        WorkerHandle::spawn(&self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Outcome;

    #[tokio::test]
    async fn test_pending_response_resolves() {
        let (tx, pending) = PendingResponse::channel();
        let id = Uuid::new_v4();
        tx.send(Ok(Response { id, outcome: Outcome::Ir("x".into()) })).unwrap();
        assert_eq!(pending.await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_dropped_sender_is_disconnected() {
        let (tx, pending) = PendingResponse::channel();
        drop(tx);
        assert!(matches!(pending.await, Err(WorkerError::Disconnected)));
    }

    #[test]
    fn test_command_builder() {
        let cmd = WorkerCommand::new("/bin/qirc").arg("worker");
        assert_eq!(cmd.args, vec!["worker".to_string()]);
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let err = WorkerHandle::spawn(&WorkerCommand::new("/nonexistent/qirc-worker")).unwrap_err();
        assert!(matches!(err, WorkerError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/qirc-worker"));
    }
}
