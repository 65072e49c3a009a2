//! Per-invocation output accumulation and plugin-style rendering.
//!
//! A check implementation gets its own [`OutputAccumulator`] and writes
//! verbose details into it as it runs. The dispatcher pulls the summary
//! and details back out when the implementation returns only a severity.

pub mod render;

pub use render::{render, Rendered, EMPTY_RENDER_SUMMARY};

/// Replace pipe characters, which the monitoring backend reads as the
/// start of performance data.
pub fn sanitize(text: &str) -> String {
    text.replace("||", "OR").replace('|', "OR")
}

/// Verbosity-gated buffer for a check's summary and details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputAccumulator {
    verbosity: u8,
    summary: Option<String>,
    details: String,
}

impl OutputAccumulator {
    pub fn new(verbosity: u8) -> Self {
        Self {
            verbosity,
            summary: None,
            details: String::new(),
        }
    }

    /// Add a details line if `level` is within the active verbosity.
    pub fn detail(&mut self, text: &str, level: u8) {
        if level <= self.verbosity {
            self.details.push_str(text);
            self.details.push('\n');
        }
    }

    /// Like [`detail`](Self::detail) without the trailing newline.
    pub fn detail_raw(&mut self, text: &str, level: u8) {
        if level <= self.verbosity {
            self.details.push_str(text);
        }
    }

    pub fn summary(&mut self, text: impl Into<String>) {
        self.summary = Some(text.into());
    }

    pub fn current_summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn has_details(&self) -> bool {
        !self.details.is_empty()
    }

    /// Buffered details, falling back to the summary when none were written.
    pub fn details(&self) -> String {
        if self.details.is_empty() {
            self.summary.clone().unwrap_or_default()
        } else {
            self.details.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a || b | c"), "a OR b OR c");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn test_verbosity_gate() {
        let mut out = OutputAccumulator::new(1);
        out.detail("always", 0);
        out.detail("verbose", 1);
        out.detail("debug", 2);
        out.detail_raw("tail", 1);
        assert_eq!(out.details(), "always\nverbose\ntail");
    }

    #[test]
    fn test_details_fall_back_to_summary() {
        let mut out = OutputAccumulator::new(0);
        assert_eq!(out.details(), "");
        out.summary("copied file");
        assert_eq!(out.details(), "copied file");
        out.detail("step 1", 0);
        assert_eq!(out.details(), "step 1\n");
    }
}
