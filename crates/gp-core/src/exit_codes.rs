//! Exit codes for the gridprobe CLI.
//!
//! gridprobe follows the monitoring-plugin convention so the exit status
//! alone carries the verdict:
//! - 0: OK
//! - 1: WARNING
//! - 2: CRITICAL
//! - 3: UNKNOWN (also used for argument and configuration errors)

use gp_common::Severity;

/// Exit codes for gridprobe runs.
///
/// These codes are a stable contract with the monitoring scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    Warning = 1,
    Critical = 2,
    /// Unknown verdict, or the probe itself could not run.
    Unknown = 3,
}

impl ExitCode {
    /// Invalid command-line arguments. clap's usage error code (2) would
    /// read as CRITICAL to the scheduler, so it is remapped here.
    pub const ARGS_ERROR: ExitCode = ExitCode::Unknown;

    /// Unreadable or invalid configuration.
    pub const CONFIG_ERROR: ExitCode = ExitCode::Unknown;

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == ExitCode::Ok
    }

    /// Name used in structured logs.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Ok => "OK",
            ExitCode::Warning => "WARNING",
            ExitCode::Critical => "CRITICAL",
            ExitCode::Unknown => "UNKNOWN",
        }
    }
}

impl From<Severity> for ExitCode {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Ok => ExitCode::Ok,
            Severity::Warning => ExitCode::Warning,
            Severity::Critical => ExitCode::Critical,
            Severity::Unknown => ExitCode::Unknown,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
