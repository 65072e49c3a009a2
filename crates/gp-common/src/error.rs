//! Error types for gridprobe.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - The severity each error degrades to when it reaches a check boundary
//!
//! # Human-Facing Output
//!
//! ```text
//! UNKNOWN: Configuration Error
//!   Reason: check 'probe-All' lists unknown child 'probe-Foo'
//!   Fix: Fix the [[checks]] table in gridprobe.toml
//! ```

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for gridprobe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Probe configuration and error database problems.
    Config,
    /// Output classification.
    Classification,
    /// Spawning or supervising external commands.
    Process,
    /// Check lookup and execution.
    Check,
    /// Result publication.
    Publish,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Classification => write!(f, "classification"),
            ErrorCategory::Process => write!(f, "process"),
            ErrorCategory::Check => write!(f, "check"),
            ErrorCategory::Publish => write!(f, "publish"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for gridprobe.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid error database: {0}")]
    InvalidErrorDb(String),

    // Classification errors (20-29)
    #[error("no error pattern matched the command output")]
    ClassificationMiss,

    // Process errors (30-39)
    #[error("failed to start command: {0}")]
    Spawn(String),

    #[error("timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    // Check errors (40-49)
    #[error("check {name} does not exist")]
    UnknownCheck { name: String },

    #[error("check failed: {0}")]
    CheckFailed(String),

    // Publish errors (50-59)
    #[error("failed to publish results: {0}")]
    Publish(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Classification errors
    /// - 30-39: Process errors
    /// - 40-49: Check errors
    /// - 50-59: Publish errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidErrorDb(_) => 11,
            Error::ClassificationMiss => 20,
            Error::Spawn(_) => 30,
            Error::TimedOut { .. } => 31,
            Error::UnknownCheck { .. } => 40,
            Error::CheckFailed(_) => 41,
            Error::Publish(_) => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidErrorDb(_) => ErrorCategory::Config,
            Error::ClassificationMiss => ErrorCategory::Classification,
            Error::Spawn(_) | Error::TimedOut { .. } => ErrorCategory::Process,
            Error::UnknownCheck { .. } | Error::CheckFailed(_) => ErrorCategory::Check,
            Error::Publish(_) => ErrorCategory::Publish,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Severity this error is reported as when it reaches a check boundary.
    ///
    /// A timeout degrades to WARNING and an unmatched failure to CRITICAL;
    /// everything else is UNKNOWN.
    pub fn severity(&self) -> Severity {
        match self {
            Error::TimedOut { .. } => Severity::Warning,
            Error::ClassificationMiss | Error::CheckFailed(_) => Severity::Critical,
            _ => Severity::Unknown,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidErrorDb(_) => "Invalid Error Database",
            Error::ClassificationMiss => "Unclassified Failure",
            Error::Spawn(_) => "Command Spawn Failed",
            Error::TimedOut { .. } => "Timed Out",
            Error::UnknownCheck { .. } => "Unknown Check",
            Error::CheckFailed(_) => "Check Failed",
            Error::Publish(_) => "Publication Failed",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "Serialization Error",
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => "Fix the [[checks]] table or [probe] section in gridprobe.toml.",
            Error::InvalidErrorDb(_) => {
                "Check the error database file: every section needs at least one non-empty pattern."
            }
            Error::ClassificationMiss => {
                "Add a pattern for this failure to the error database to classify it."
            }
            Error::Spawn(_) => "Check that the command exists and is executable.",
            Error::TimedOut { .. } => "Increase the global timeout with '--timeout'.",
            Error::UnknownCheck { .. } => "List the registered checks with '--list'.",
            Error::CheckFailed(_) => "Inspect the check details for the failing step.",
            Error::Publish(_) => "Check the publish destination and command file permissions.",
            Error::Io(_) => "Check file permissions and that the paths exist.",
            Error::Json(_) => "Invalid JSON data; this is likely a bug.",
        }
    }

    /// Multi-line human output.
    pub fn format_human(&self) -> String {
        format!(
            "{}: {}\n  Reason: {}\n  Fix: {}",
            self.severity(),
            self.headline(),
            self,
            self.remediation()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_grouped_by_category() {
        let cases: Vec<(Error, ErrorCategory, u32)> = vec![
            (Error::Config("x".into()), ErrorCategory::Config, 10),
            (Error::ClassificationMiss, ErrorCategory::Classification, 20),
            (Error::Spawn("x".into()), ErrorCategory::Process, 30),
            (
                Error::UnknownCheck { name: "x".into() },
                ErrorCategory::Check,
                40,
            ),
            (Error::Publish("x".into()), ErrorCategory::Publish, 50),
        ];
        for (err, category, code) in cases {
            assert_eq!(err.category(), category);
            assert_eq!(err.code(), code);
            assert_eq!(err.code() / 10, code / 10);
        }
    }

    #[test]
    fn test_taxonomy_severities() {
        assert_eq!(Error::TimedOut { seconds: 5 }.severity(), Severity::Warning);
        assert_eq!(Error::ClassificationMiss.severity(), Severity::Critical);
        assert_eq!(Error::Spawn("x".into()).severity(), Severity::Unknown);
        assert_eq!(
            Error::UnknownCheck { name: "x".into() }.severity(),
            Severity::Unknown
        );
    }

    #[test]
    fn test_format_human() {
        let err = Error::UnknownCheck {
            name: "nonexistent-check".into(),
        };
        let text = err.format_human();
        assert!(text.starts_with("UNKNOWN: Unknown Check"));
        assert!(text.contains("nonexistent-check"));
        assert!(text.contains("Fix:"));
    }
}
