//! Structured event vocabulary for logging.
//!
//! Events are emitted with the event name as the tracing target so the
//! JSONL layer can report it verbatim in the `event` field.

use serde::{Deserialize, Serialize};

/// Log levels as they appear in JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Phases of a probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup, configuration and error database loading.
    Init,
    /// Running a single check.
    Check,
    /// Walking a wrapper's ordered children.
    Aggregate,
    /// Handing results to the sink.
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Check => "check",
            Stage::Aggregate => "aggregate",
            Stage::Publish => "publish",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Config/init
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_INVALID: &str = "config.invalid";
    pub const ERRDB_LOADED: &str = "errdb.loaded";
    pub const ERRDB_INTEGRITY: &str = "errdb.integrity";

    // Checks
    pub const CHECK_STARTED: &str = "check.started";
    pub const CHECK_FINISHED: &str = "check.finished";
    pub const CHECK_MASKED: &str = "check.masked";
    pub const CHECK_PANICKED: &str = "check.panicked";

    // Supervised processes
    pub const PROCESS_SPAWNED: &str = "process.spawned";
    pub const PROCESS_READ_TIMEOUT: &str = "process.read_timeout";
    pub const PROCESS_KILLED: &str = "process.killed";

    // Deadline
    pub const DEADLINE_FIRED: &str = "deadline.fired";
    pub const GRACE_EXPIRED: &str = "deadline.grace_expired";

    // Publication
    pub const PUBLISH_FAILED: &str = "publish.failed";
}
