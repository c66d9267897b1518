//! Isolated compilation for qirc.
//!
//! Lowering can loop forever on a pathological program (the static
//! profiles evaluate loops at compile time), and a thread cannot be killed.
//! This crate therefore runs each compilation in its own child process and
//! supervises it with a deadline.
//!
//! - [`protocol`]: one JSON line in, one JSON line out.
//! - [`serve`]: the loop running inside the worker process.
//! - [`worker`]: spawning, submitting to and terminating a worker.
//! - [`supervisor`]: the deadline state machine around one worker.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use qirc_compile::TargetProfile;
//! use qirc_worker::{Request, Supervisor, WorkerCommand};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let supervisor = Supervisor::new(WorkerCommand::new("qirc-worker"));
//! let request = Request::new("main.qs", "namespace A { operation Main() : Unit {} }", TargetProfile::Base);
//! match supervisor.run_with_timeout(request, Duration::from_secs(10)).await {
//!     Ok(ir) => println!("{ir}"),
//!     Err(err) => eprintln!("{}", err.user_message(TargetProfile::Base)),
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod protocol;
pub mod serve;
pub mod supervisor;
pub mod worker;

pub use error::{SupervisorError, SupervisorResult, WorkerError, WorkerResult};
pub use protocol::{Outcome, Request, Response};
pub use serve::{handle, serve, serve_stdio};
pub use supervisor::{DEFAULT_DEADLINE_MS, RunReport, Supervisor, SupervisorState};
pub use worker::{PendingResponse, ProcessSpawner, Worker, WorkerCommand, WorkerHandle, WorkerSpawner};
