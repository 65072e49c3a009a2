//! Composite status over an ordered list of child checks.
//!
//! Children run strictly in order and every result is published as soon
//! as it is known. A failing node check (one with `children`) or a
//! timed-out check masks its children and ends the walk; a failing
//! `critical` leaf can only make the composite worse; any other failure is
//! published and otherwise ignored. Once the run is cancelled no further
//! child starts, and the child that was running is reported as timed out.

use crate::context::RunContext;
use crate::dispatch::{timed_out_result, Dispatcher};
use crate::logging::{event_names, Stage};
use crate::publish::{service_name, PassiveResult};
use chrono::{SecondsFormat, Utc};
use gp_common::{with_severity_prefix, ExecutionResult, Severity};
use serde::Serialize;
use tracing::{info, info_span, warn};

/// Composite summary when no child altered it.
pub const DEFAULT_SUMMARY: &str = "success.";

/// Summary used when publication outlives the grace period.
pub const PUBLISH_TIMEOUT_SUMMARY: &str = "Timed out while publishing check results.";

/// Outcome of [`Aggregator::run_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub severity: Severity,
    pub summary: String,
    pub details: String,
    /// Last child that altered the composite (or was running when the
    /// grace period ran out).
    pub last_check: Option<String>,
    /// Child results in execution order.
    pub results: Vec<ExecutionResult>,
    /// The walk stopped because the run was cancelled.
    pub timed_out: bool,
}

impl Default for AggregateResult {
    fn default() -> Self {
        Self {
            severity: Severity::Ok,
            summary: DEFAULT_SUMMARY.to_string(),
            details: String::new(),
            last_check: None,
            results: Vec::new(),
            timed_out: false,
        }
    }
}

impl AggregateResult {
    fn fail(&mut self, name: &str, result: &ExecutionResult) {
        self.severity = result.severity;
        self.summary = format!("CHECK FAILED [{}]: {}", name, result.summary);
        self.details.push_str(&self.summary);
        self.details.push('\n');
        self.last_check = Some(name.to_string());
    }

    /// Result for the wrapper check that ran this aggregate.
    pub fn into_execution_result(self, wrapper: &str) -> ExecutionResult {
        let summary = with_severity_prefix(self.severity, &self.summary);
        let details = format!("{}\n{}", summary, self.details.trim_end());
        let mut result = ExecutionResult::new(wrapper, self.severity, summary, details);
        result.timed_out = self.timed_out;
        result
    }
}

/// Walks a wrapper's ordered children.
pub struct Aggregator<'a> {
    dispatcher: &'a Dispatcher,
    ctx: &'a RunContext,
}

impl<'a> Aggregator<'a> {
    pub fn new(dispatcher: &'a Dispatcher, ctx: &'a RunContext) -> Self {
        Self { dispatcher, ctx }
    }

    pub fn run_all<S: AsRef<str>>(&self, order: &[S]) -> AggregateResult {
        let span = info_span!("aggregate", run_id = %self.ctx.run_id, stage = %Stage::Aggregate);
        let _enter = span.enter();

        let mut agg = AggregateResult::default();
        let mut last: Option<(String, String)> = None;

        for name in order.iter().map(AsRef::as_ref) {
            if self.ctx.cancel_token().grace_expired() {
                return publish_timeout(agg, last);
            }
            if self.ctx.cancel_token().is_cancelled() {
                warn!(check = name, "run cancelled, not starting remaining checks");
                agg.fail(name, &timed_out_result(name, ""));
                agg.timed_out = true;
                return agg;
            }

            agg.details.push_str(&format!(
                "Invoking check: [{}] {}\n",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                name
            ));
            let mut result = self.dispatcher.run(self.ctx, name);
            if self.ctx.cancel_token().is_cancelled() && !result.timed_out {
                // The deadline fired while a body that never spawned was running.
                result = timed_out_result(name, &result.details);
            }
            last = Some((name.to_string(), result.details.clone()));

            self.publish(name, &result);
            if self.ctx.cancel_token().grace_expired() {
                agg.results.push(result);
                return publish_timeout(agg, last);
            }

            agg.results.push(result.clone());
            if result.severity.is_ok() {
                continue;
            }

            let descriptor = self.dispatcher.descriptor(name);
            let is_node = descriptor.is_some_and(|d| d.is_node());

            if is_node || result.timed_out {
                if let Some(d) = descriptor {
                    self.mask_children(name, &d.children, &result);
                }
                agg.fail(name, &result);
                agg.timed_out = result.timed_out;
                info!(
                    check = name,
                    severity = %agg.severity,
                    timed_out = result.timed_out,
                    "node check failed, stopping"
                );
                return agg;
            }

            if descriptor.is_some_and(|d| d.critical) {
                let worse = agg.severity.worse(result.severity);
                if worse != agg.severity {
                    agg.fail(name, &result);
                }
            }
        }

        agg
    }

    fn publish(&self, name: &str, result: &ExecutionResult) {
        let service = service_name(name, &self.ctx.vo);
        self.ctx
            .publish(&[PassiveResult::from_result(&self.ctx.publish_host, service, result)]);
    }

    /// Publish `children` as WARNING without running them.
    fn mask_children(&self, failed: &str, children: &[String], result: &ExecutionResult) {
        if children.is_empty() {
            return;
        }
        let summary = with_severity_prefix(
            Severity::Warning,
            &format!("Masked by {} - \"{}\"", failed, result.summary),
        );
        let masked: Vec<PassiveResult> = children
            .iter()
            .map(|child| {
                PassiveResult::new(
                    self.ctx.publish_host.clone(),
                    service_name(child, &self.ctx.vo),
                    Severity::Warning,
                    summary.clone(),
                    String::new(),
                )
            })
            .collect();
        info!(
            target: event_names::CHECK_MASKED,
            masked_by = failed,
            count = masked.len(),
            "children masked"
        );
        self.ctx.publish(&masked);
    }
}

fn publish_timeout(mut agg: AggregateResult, last: Option<(String, String)>) -> AggregateResult {
    warn!(
        target: event_names::GRACE_EXPIRED,
        last_check = last.as_ref().map(|(n, _)| n.as_str()),
        "grace period expired before results were published"
    );
    agg.severity = Severity::Unknown;
    agg.timed_out = true;
    agg.summary = PUBLISH_TIMEOUT_SUMMARY.to_string();
    agg.details.push_str(PUBLISH_TIMEOUT_SUMMARY);
    agg.details.push('\n');
    agg.details.push_str(&"=".repeat(25));
    agg.details.push('\n');
    if let Some((name, details)) = last {
        agg.details
            .push_str(&format!("* Last check: {}\n* Details data:\n{}", name, details));
        agg.last_check = Some(name);
    }
    agg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{CheckImpl, CheckReturn};
    use crate::publish::MemorySink;
    use gp_common::CheckDescriptor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn fixed(severity: Severity) -> CheckImpl {
        CheckImpl::native(move |_| Ok(CheckReturn::Summary(severity, "done".into())))
    }

    fn setup(checks: Vec<(CheckDescriptor, CheckImpl)>) -> (Dispatcher, RunContext, Arc<MemorySink>) {
        let mut d = Dispatcher::new();
        for (descriptor, implementation) in checks {
            d.register(descriptor, implementation).unwrap();
        }
        let sink = Arc::new(MemorySink::new());
        let ctx = RunContext::new("se01").with_vo("").with_sink(sink.clone());
        (d, ctx, sink)
    }

    #[test]
    fn test_all_ok_keeps_default_summary() {
        let (d, ctx, sink) = setup(vec![
            (CheckDescriptor::new("a").critical(true), fixed(Severity::Ok)),
            (CheckDescriptor::new("b"), fixed(Severity::Ok)),
        ]);
        let agg = Aggregator::new(&d, &ctx).run_all(&["a", "b"]);
        assert_eq!(agg.severity, Severity::Ok);
        assert_eq!(agg.summary, "success.");
        assert_eq!(agg.last_check, None);
        assert_eq!(sink.services(), vec!["a", "b"]);
        assert_eq!(agg.details.matches("Invoking check: [").count(), 2);
    }

    #[test]
    fn test_critical_never_downgraded() {
        let (d, ctx, _) = setup(vec![
            (CheckDescriptor::new("c").critical(true), fixed(Severity::Critical)),
            (CheckDescriptor::new("w").critical(true), fixed(Severity::Warning)),
        ]);
        let agg = Aggregator::new(&d, &ctx).run_all(&["c", "w"]);
        assert_eq!(agg.severity, Severity::Critical);
        assert_eq!(agg.last_check.as_deref(), Some("c"));
        assert_eq!(agg.summary, "CHECK FAILED [c]: CRITICAL: done");
    }

    #[test]
    fn test_unknown_is_worse_than_critical() {
        let (d, ctx, _) = setup(vec![
            (CheckDescriptor::new("c").critical(true), fixed(Severity::Critical)),
            (CheckDescriptor::new("u").critical(true), fixed(Severity::Unknown)),
        ]);
        let agg = Aggregator::new(&d, &ctx).run_all(&["c", "u"]);
        assert_eq!(agg.severity, Severity::Unknown);
        assert_eq!(agg.last_check.as_deref(), Some("u"));
    }

    #[test]
    fn test_non_critical_failure_only_published() {
        let (d, ctx, sink) = setup(vec![(CheckDescriptor::new("w"), fixed(Severity::Warning))]);
        let agg = Aggregator::new(&d, &ctx).run_all(&["w"]);
        assert_eq!(agg.severity, Severity::Ok);
        assert_eq!(sink.find("w").unwrap().severity, Severity::Warning);
    }

    #[test]
    fn test_timed_out_leaf_stops_walk() {
        let timed_out = CheckImpl::native(|_| {
            Err(crate::dispatch::CheckError::TimedOut {
                output: "partial".into(),
            })
        });
        let (d, ctx, sink) = setup(vec![
            (CheckDescriptor::new("slow"), timed_out),
            (CheckDescriptor::new("next"), fixed(Severity::Ok)),
        ]);
        let agg = Aggregator::new(&d, &ctx).run_all(&["slow", "next"]);
        assert_eq!(agg.severity, Severity::Warning);
        assert!(agg.summary.starts_with("CHECK FAILED [slow]: WARNING: Timed out."));
        assert_eq!(sink.services(), vec!["slow"]);
        assert!(agg.results[0].details.contains("partial"));
    }

    #[test]
    fn test_deadline_during_native_body_stops_walk() {
        let sibling_ran = Arc::new(AtomicBool::new(false));
        let flag = sibling_ran.clone();
        let slow = CheckImpl::native(|_| {
            thread::sleep(Duration::from_millis(400));
            Ok(CheckReturn::Summary(Severity::Ok, "slow done".into()))
        });
        let sibling = CheckImpl::native(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(CheckReturn::Summary(Severity::Critical, "broken".into()))
        });
        let (d, ctx, sink) = setup(vec![
            (CheckDescriptor::new("slow"), slow),
            (CheckDescriptor::new("crit").critical(true), sibling),
        ]);
        let _deadline = ctx
            .cancel_token()
            .arm_deadline(Duration::from_millis(100), Duration::from_secs(5));

        let agg = Aggregator::new(&d, &ctx).run_all(&["slow", "crit"]);

        assert!(!sibling_ran.load(Ordering::SeqCst));
        assert!(agg.timed_out);
        assert_eq!(agg.severity, Severity::Warning);
        assert_eq!(agg.last_check.as_deref(), Some("slow"));
        assert_eq!(sink.services(), vec!["slow"]);
        let published = sink.find("slow").unwrap();
        assert_eq!(published.severity, Severity::Warning);
        assert!(published
            .summary
            .starts_with("WARNING: Timed out. Run deadline reached while executing slow."));
        assert!(agg.results[0].timed_out);
    }

    #[test]
    fn test_cancelled_before_walk_runs_nothing() {
        let (d, ctx, sink) = setup(vec![(CheckDescriptor::new("a"), fixed(Severity::Ok))]);
        ctx.cancel_token().cancel();
        let agg = Aggregator::new(&d, &ctx).run_all(&["a"]);
        assert!(agg.timed_out);
        assert_eq!(agg.severity, Severity::Warning);
        assert!(agg.results.is_empty());
        assert!(sink.services().is_empty());
    }

    #[test]
    fn test_nested_timeout_stops_outer_walk() {
        let timed_out = CheckImpl::native(|_| {
            Err(crate::dispatch::CheckError::TimedOut {
                output: String::new(),
            })
        });
        let (d, ctx, sink) = setup(vec![
            (CheckDescriptor::new("inner").with_order(["slow"]), CheckImpl::Wrapper),
            (CheckDescriptor::new("slow"), timed_out),
            (CheckDescriptor::new("after"), fixed(Severity::Ok)),
        ]);
        let agg = Aggregator::new(&d, &ctx).run_all(&["inner", "after"]);
        assert!(agg.timed_out);
        assert_eq!(agg.last_check.as_deref(), Some("inner"));
        assert_eq!(sink.services(), vec!["slow", "inner"]);
    }

    #[test]
    fn test_results_addressed_to_publish_host() {
        let (d, ctx, sink) = setup(vec![
            (
                CheckDescriptor::new("node").with_children(["leaf"]),
                fixed(Severity::Critical),
            ),
            (CheckDescriptor::new("leaf"), fixed(Severity::Ok)),
        ]);
        let ctx = ctx.with_publish_host("passive.example.org");
        Aggregator::new(&d, &ctx).run_all(&["node", "leaf"]);
        let hosts: Vec<String> = sink.results().into_iter().map(|r| r.host).collect();
        assert_eq!(hosts, vec!["passive.example.org", "passive.example.org"]);
        assert_eq!(sink.services(), vec!["node", "leaf"]);
    }

    #[test]
    fn test_into_execution_result() {
        let agg = AggregateResult {
            severity: Severity::Critical,
            summary: "CHECK FAILED [x]: CRITICAL: boom".into(),
            details: "Invoking check: [t] x\n".into(),
            last_check: Some("x".into()),
            results: Vec::new(),
            timed_out: false,
        };
        let result = agg.into_execution_result("All");
        assert_eq!(result.check, "All");
        assert_eq!(result.summary, "CRITICAL: CHECK FAILED [x]: CRITICAL: boom");
        assert_eq!(
            result.details,
            "CRITICAL: CHECK FAILED [x]: CRITICAL: boom\nInvoking check: [t] x"
        );
    }

    #[test]
    fn test_publish_timeout_details() {
        let agg = publish_timeout(
            AggregateResult::default(),
            Some(("probe-Put".into(), "WARNING: partial".into())),
        );
        assert_eq!(agg.severity, Severity::Unknown);
        assert_eq!(agg.summary, PUBLISH_TIMEOUT_SUMMARY);
        assert!(agg.details.contains("* Last check: probe-Put\n* Details data:\nWARNING: partial"));
        assert_eq!(agg.last_check.as_deref(), Some("probe-Put"));
    }
}
