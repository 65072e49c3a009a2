//! Gridprobe core library.
//!
//! This library provides the machinery behind the `gridprobe` binary:
//! - Error-database classification of command output
//! - Supervised command execution in detached process groups
//! - Run-scoped cancellation with a global deadline
//! - Check dispatch and composite aggregation
//! - Result rendering and publishing
//! - Logging and exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod aggregate;
pub mod cancel;
pub mod context;
pub mod dispatch;
pub mod errdb;
pub mod exit_codes;
pub mod logging;
pub mod output;
pub mod publish;
pub mod supervisor;

pub use aggregate::{AggregateResult, Aggregator};
pub use cancel::{CancelToken, ProcessGroup};
pub use context::RunContext;
pub use dispatch::{CheckEnv, CheckError, CheckImpl, CheckReturn, Dispatcher};
pub use errdb::{ErrorDatabase, IniSource, MatchHit};
pub use exit_codes::ExitCode;
pub use publish::{PassiveResult, ResultSink};
pub use supervisor::{SpawnOutput, Supervisor, SupervisorError};
