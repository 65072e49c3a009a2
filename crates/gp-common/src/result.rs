//! Per-invocation check results and performance data.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rendering of a performance value that was never reported.
pub const EMPTY_PERF_VALUE: &str = "0;;";

/// Value of a single performance metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerfValue {
    Number(f64),
    Text(String),
    /// Value with thresholds/bounds, e.g. `[value, warn, crit, min, max]`.
    Sequence(Vec<String>),
}

impl PerfValue {
    /// Plugin-style rendering: scalars gain a `;;` suffix, sequences are
    /// joined with `;`.
    pub fn render(&self) -> String {
        match self {
            PerfValue::Number(n) => format!("{};;", n),
            PerfValue::Text(s) => format!("{};;", s),
            PerfValue::Sequence(items) => items.join(";"),
        }
    }
}

impl From<f64> for PerfValue {
    fn from(v: f64) -> Self {
        PerfValue::Number(v)
    }
}

impl From<i64> for PerfValue {
    fn from(v: i64) -> Self {
        PerfValue::Text(v.to_string())
    }
}

impl From<&str> for PerfValue {
    fn from(v: &str) -> Self {
        PerfValue::Text(v.to_string())
    }
}

impl From<Vec<String>> for PerfValue {
    fn from(v: Vec<String>) -> Self {
        PerfValue::Sequence(v)
    }
}

/// One named performance metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfMetric {
    pub name: String,
    /// `None` renders as the empty value `0;;`.
    pub value: Option<PerfValue>,
}

impl PerfMetric {
    pub fn new(name: impl Into<String>, value: impl Into<PerfValue>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn render(&self) -> String {
        let value = self
            .value
            .as_ref()
            .map(PerfValue::render)
            .unwrap_or_else(|| EMPTY_PERF_VALUE.to_string());
        format!("{}={}", self.name, value)
    }
}

/// Render an ordered metric list as a single space separated string.
///
/// Metrics with an empty name are skipped; order is preserved.
pub fn render_perf(metrics: &[PerfMetric]) -> String {
    metrics
        .iter()
        .filter(|m| !m.name.is_empty())
        .map(PerfMetric::render)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Metric collector with a fixed key order.
///
/// Keys are declared up front; values set for undeclared keys are ignored
/// and declared keys that were never set render as `0;;`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerfData {
    keys: Vec<String>,
    values: HashMap<String, PerfValue>,
}

impl PerfData {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            values: HashMap::new(),
        }
    }

    /// Returns false when `key` was not declared.
    pub fn set(&mut self, key: &str, value: impl Into<PerfValue>) -> bool {
        if !self.keys.iter().any(|k| k == key) {
            return false;
        }
        self.values.insert(key.to_string(), value.into());
        true
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Metrics in declaration order.
    pub fn metrics(&self) -> Vec<PerfMetric> {
        self.keys
            .iter()
            .map(|k| PerfMetric {
                name: k.clone(),
                value: self.values.get(k).cloned(),
            })
            .collect()
    }
}

/// Outcome of one check invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Name of the check that produced this result.
    pub check: String,
    pub severity: Severity,
    /// Single-line summary, prefixed with the severity token.
    pub summary: String,
    /// Multi-line details, prefixed with the severity token.
    pub details: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub perf: Vec<PerfMetric>,
    /// The global deadline fired while this check was running.
    #[serde(default)]
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn new(
        check: impl Into<String>,
        severity: Severity,
        summary: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            check: check.into(),
            severity,
            summary: summary.into(),
            details: details.into(),
            perf: Vec::new(),
            timed_out: false,
        }
    }

    /// UNKNOWN result whose details repeat the summary.
    pub fn unknown(check: impl Into<String>, summary: impl Into<String>) -> Self {
        let summary = with_severity_prefix(Severity::Unknown, &summary.into());
        let details = summary.clone();
        Self::new(check, Severity::Unknown, summary, details)
    }

    pub fn with_perf(mut self, perf: Vec<PerfMetric>) -> Self {
        self.perf = perf;
        self
    }

    pub fn perf_data(&self) -> String {
        render_perf(&self.perf)
    }
}

/// Prefix `text` with `SEVERITY: ` unless it already starts with it.
pub fn with_severity_prefix(severity: Severity, text: &str) -> String {
    let token = format!("{}:", severity.as_str());
    if text.starts_with(&token) {
        text.to_string()
    } else {
        format!("{} {}", token, text)
    }
}
