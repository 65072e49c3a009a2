//! Result sinks.
//!
//! Every child result and the final composite are handed to a
//! [`ResultSink`] as [`PassiveResult`]s, in check order. The sink decides
//! where they go:
//! - [`ActiveSink`]: printed to stdout for interactive runs
//! - [`CommandFileSink`]: appended to the monitoring daemon's command pipe
//! - [`NullSink`]: dropped
//! - [`MemorySink`]: kept in memory for embedders and tests

use crate::output::sanitize;
use gp_common::{ExecutionResult, Severity};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Errors raised while publishing.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed opening command file {path}: {source}")]
    CommandFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[from] io::Error),
}

impl From<PublishError> for gp_common::Error {
    fn from(err: PublishError) -> Self {
        gp_common::Error::Publish(err.to_string())
    }
}

/// One result addressed to a host/service pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveResult {
    pub host: String,
    pub service: String,
    pub severity: Severity,
    pub summary: String,
    pub details: String,
}

impl PassiveResult {
    pub fn new(
        host: impl Into<String>,
        service: impl Into<String>,
        severity: Severity,
        summary: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            severity,
            summary: summary.into(),
            details: details.into(),
        }
    }

    pub fn from_result(host: &str, service: impl Into<String>, result: &ExecutionResult) -> Self {
        Self::new(
            host,
            service,
            result.severity,
            result.summary.clone(),
            result.details.clone(),
        )
    }

    /// Copy with pipes replaced in summary and details.
    pub fn sanitized(&self) -> Self {
        Self {
            summary: sanitize(&self.summary),
            details: sanitize(&self.details),
            ..self.clone()
        }
    }

    /// `host;service;code;summary\ndetails` with newlines escaped.
    pub fn passive_line(&self) -> String {
        format!(
            "{};{};{};{}\\n{}",
            self.host,
            self.service,
            self.severity.exit_code(),
            self.summary,
            escape_newlines(&self.details)
        )
    }
}

/// Service name as registered with the monitoring backend: `<check>-<vo>`.
pub fn service_name(check: &str, vo: &str) -> String {
    if vo.is_empty() {
        check.to_string()
    } else {
        format!("{}-{}", check, vo)
    }
}

fn escape_newlines(text: &str) -> String {
    text.replace('\n', "\\n")
}

/// Destination for check results.
pub trait ResultSink: Send + Sync {
    fn publish(&self, results: &[PassiveResult]) -> Result<(), PublishError>;
}

/// Prints results to a writer (stdout by default).
pub struct ActiveSink<W: Write + Send = io::Stdout> {
    writer: Mutex<W>,
}

impl ActiveSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ActiveSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> ResultSink for ActiveSink<W> {
    fn publish(&self, results: &[PassiveResult]) -> Result<(), PublishError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        for r in results {
            writeln!(writer, "metric results >>> <{},{}>", r.host, r.service)?;
            writeln!(writer, "{}", r.summary)?;
            writeln!(writer, "{}", r.details)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Appends external-command lines to the daemon's command file.
///
/// The file (normally a FIFO) must already exist; it is never created.
#[derive(Debug, Clone)]
pub struct CommandFileSink {
    path: PathBuf,
}

impl CommandFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CommandFileSink {
    fn publish(&self, results: &[PassiveResult]) -> Result<(), PublishError> {
        if results.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| PublishError::CommandFile {
                path: self.path.clone(),
                source,
            })?;
        let now = chrono::Utc::now().timestamp();
        for r in results {
            writeln!(file, "[{}] PROCESS_SERVICE_CHECK_RESULT;{}", now, r.passive_line())?;
            file.flush()?;
        }
        debug!(path = %self.path.display(), count = results.len(), "wrote passive results");
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn publish(&self, _results: &[PassiveResult]) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Records results in publication order.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<PassiveResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<PassiveResult> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn services(&self) -> Vec<String> {
        self.results().into_iter().map(|r| r.service).collect()
    }

    pub fn find(&self, service: &str) -> Option<PassiveResult> {
        self.results().into_iter().find(|r| r.service == service)
    }
}

impl ResultSink for MemorySink {
    fn publish(&self, results: &[PassiveResult]) -> Result<(), PublishError> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(results);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample() -> PassiveResult {
        PassiveResult::new(
            "se01.example.org",
            "probe-Put-ops",
            Severity::Critical,
            "CRITICAL: copy | failed",
            "line one\nline two",
        )
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_name("probe-Put", "ops"), "probe-Put-ops");
        assert_eq!(service_name("probe-Put", ""), "probe-Put");
    }

    #[test]
    fn test_passive_line_escapes_details() {
        assert_eq!(
            sample().passive_line(),
            "se01.example.org;probe-Put-ops;2;CRITICAL: copy | failed\\nline one\\nline two"
        );
    }

    #[test]
    fn test_sanitized() {
        let r = sample().sanitized();
        assert_eq!(r.summary, "CRITICAL: copy OR failed");
        assert_eq!(r.service, "probe-Put-ops");
    }

    #[test]
    fn test_active_sink_format() {
        let sink = ActiveSink::new(Vec::new());
        sink.publish(&[sample()]).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            text,
            "metric results >>> <se01.example.org,probe-Put-ops>\n\
             CRITICAL: copy | failed\n\
             line one\nline two\n"
        );
    }

    #[test]
    fn test_command_file_sink_appends() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nagios.cmd");
        fs::write(&path, "").unwrap();
        let sink = CommandFileSink::new(&path);
        sink.publish(&[sample(), sample()]).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].contains("] PROCESS_SERVICE_CHECK_RESULT;se01.example.org;probe-Put-ops;2;"));
    }

    #[test]
    fn test_command_file_sink_requires_existing_file() {
        let tmp = TempDir::new().unwrap();
        let sink = CommandFileSink::new(tmp.path().join("missing.cmd"));
        let err = sink.publish(&[sample()]).unwrap_err();
        assert!(matches!(err, PublishError::CommandFile { .. }));
        assert!(!tmp.path().join("missing.cmd").exists());
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        let mut second = sample();
        second.service = "probe-Get-ops".to_string();
        sink.publish(&[sample()]).unwrap();
        sink.publish(&[second]).unwrap();
        assert_eq!(sink.services(), vec!["probe-Put-ops", "probe-Get-ops"]);
        assert!(sink.find("probe-Get-ops").is_some());
    }
}
