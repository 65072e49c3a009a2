//! Plugin-style rendering of a final result.
//!
//! ```text
//! CRITICAL: CHECK FAILED [probe-Put]: CRITICAL: copy failed
//! CRITICAL: Invoking check: [2026-01-01T00:00:00Z] probe-Put
//! ...|time=0.25;; size=0;;
//! ```

use super::sanitize;
use crate::exit_codes::ExitCode;
use gp_common::{with_severity_prefix, ExecutionResult, Severity};

/// Summary printed when there is nothing to render.
pub const EMPTY_RENDER_SUMMARY: &str = "No results given to render.";

/// Rendered text plus the exit code the process should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub exit_code: ExitCode,
}

/// Render `result`: summary line, details, perf data after `|`.
pub fn render(result: Option<&ExecutionResult>, sanitize_text: bool) -> Rendered {
    let Some(result) = result else {
        return Rendered {
            text: with_severity_prefix(Severity::Unknown, EMPTY_RENDER_SUMMARY),
            exit_code: ExitCode::Unknown,
        };
    };

    let clean = |s: &str| {
        if sanitize_text {
            sanitize(s)
        } else {
            s.to_string()
        }
    };

    let mut text = clean(result.summary.trim_end());
    let details = result.details.trim_end();
    if !details.is_empty() && details != result.summary.trim_end() {
        text.push('\n');
        text.push_str(&clean(details));
    }
    if !result.perf.is_empty() {
        text.push('|');
        text.push_str(&result.perf_data());
    }

    Rendered {
        text,
        exit_code: ExitCode::from(result.severity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gp_common::PerfMetric;

    #[test]
    fn test_empty_is_unknown() {
        let rendered = render(None, true);
        assert_eq!(rendered.text, "UNKNOWN: No results given to render.");
        assert_eq!(rendered.exit_code, ExitCode::Unknown);
    }

    #[test]
    fn test_summary_details_and_perf() {
        let result = ExecutionResult::new(
            "probe-Put",
            Severity::Warning,
            "WARNING: slow | retry",
            "WARNING: step one\nstep two\n",
        )
        .with_perf(vec![PerfMetric::new("time", 0.5)]);
        let rendered = render(Some(&result), true);
        assert_eq!(
            rendered.text,
            "WARNING: slow OR retry\nWARNING: step one\nstep two|time=0.5;;"
        );
        assert_eq!(rendered.exit_code.as_i32(), 1);
    }

    #[test]
    fn test_details_equal_to_summary_printed_once() {
        let result = ExecutionResult::unknown("x", "Check x does not exist.");
        let rendered = render(Some(&result), false);
        assert_eq!(rendered.text, "UNKNOWN: Check x does not exist.");
    }

    #[test]
    fn test_unsanitized_keeps_pipes() {
        let result = ExecutionResult::new("x", Severity::Ok, "OK: a|b", "");
        assert_eq!(render(Some(&result), false).text, "OK: a|b");
    }
}
