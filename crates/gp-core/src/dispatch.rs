//! Check registry and single-check execution.
//!
//! The [`Dispatcher`] maps check names to a [`CheckDescriptor`] and a
//! [`CheckImpl`]. [`Dispatcher::run`] is the containment boundary: an
//! unknown name, an implementation error, a panic or a cancelled run all
//! come back as an [`ExecutionResult`], never as an error.

use crate::aggregate::Aggregator;
use crate::context::RunContext;
use crate::logging::{event_names, Stage};
use crate::output::OutputAccumulator;
use crate::publish::{service_name, PassiveResult};
use crate::supervisor::{expand_verbosity, SpawnOutput, SupervisorError};
use gp_common::{
    with_severity_prefix, CheckDescriptor, ExecutionResult, PerfData, PerfMetric, Severity,
};
use gp_config::ProbeConfig;
use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

/// Summary template used for a command that exited 0 when the descriptor
/// has none.
const DEFAULT_OK_MESSAGE: &str = "success.";

/// What a check implementation hands back.
///
/// Parts that are left out are taken from the invocation's
/// [`OutputAccumulator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckReturn {
    Status(Severity),
    Summary(Severity, String),
    Full(Severity, String, String),
}

impl CheckReturn {
    pub fn severity(&self) -> Severity {
        match self {
            CheckReturn::Status(s) | CheckReturn::Summary(s, _) | CheckReturn::Full(s, _, _) => *s,
        }
    }
}

impl From<Severity> for CheckReturn {
    fn from(severity: Severity) -> Self {
        CheckReturn::Status(severity)
    }
}

/// Errors a check implementation may return.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("failed to start command: {0}")]
    Spawn(String),

    /// The run's deadline fired while the check was running.
    #[error("timed out")]
    TimedOut { output: String },

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CheckError {
    /// Severity the failure is reported with.
    pub fn severity(&self) -> Severity {
        match self {
            CheckError::TimedOut { .. } => Severity::Warning,
            _ => Severity::Unknown,
        }
    }
}

impl From<SupervisorError> for CheckError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::EmptyCommand => CheckError::Spawn(err.to_string()),
            SupervisorError::SpawnFailed(msg) => CheckError::Spawn(msg),
            SupervisorError::Cancelled { output } => CheckError::TimedOut { output },
            SupervisorError::Io(e) => CheckError::Io(e),
        }
    }
}

/// Errors raised while building a dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("check {0} is already registered")]
    Duplicate(String),

    #[error("check {0} is not registered")]
    NotRegistered(String),
}

impl From<DispatchError> for gp_common::Error {
    fn from(err: DispatchError) -> Self {
        gp_common::Error::Config(err.to_string())
    }
}

/// Native check body.
pub type NativeCheck =
    Box<dyn Fn(&mut CheckEnv<'_>) -> Result<CheckReturn, CheckError> + Send + Sync>;

/// How a check is executed.
pub enum CheckImpl {
    /// Shell command line, classified by exit code and error database.
    Command(String),
    /// Runs the descriptor's `order` through the aggregator.
    Wrapper,
    Native(NativeCheck),
    /// Declared in configuration without a body; see [`Dispatcher::attach`].
    Unbound,
}

impl CheckImpl {
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&mut CheckEnv<'_>) -> Result<CheckReturn, CheckError> + Send + Sync + 'static,
    {
        CheckImpl::Native(Box::new(f))
    }

    fn kind(&self) -> &'static str {
        match self {
            CheckImpl::Command(_) => "command",
            CheckImpl::Wrapper => "wrapper",
            CheckImpl::Native(_) => "native",
            CheckImpl::Unbound => "unbound",
        }
    }
}

impl std::fmt::Debug for CheckImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckImpl::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Everything a check body can reach during one invocation.
pub struct CheckEnv<'a> {
    pub ctx: &'a RunContext,
    pub descriptor: &'a CheckDescriptor,
    pub out: OutputAccumulator,
    pub perf: Vec<PerfMetric>,
}

impl<'a> CheckEnv<'a> {
    fn new(ctx: &'a RunContext, descriptor: &'a CheckDescriptor) -> Self {
        Self {
            ctx,
            descriptor,
            out: OutputAccumulator::new(ctx.verbosity),
            perf: Vec::new(),
        }
    }

    /// Run a command line under the run's supervisor.
    ///
    /// The `{verbose}` slot is filled from the active verbosity.
    pub fn spawn(&mut self, template: &str) -> Result<SpawnOutput, CheckError> {
        let command = expand_verbosity(template, self.ctx.verbosity);
        self.out.detail(&format!("Running: {}", command), 2);
        match self.ctx.supervisor().spawn(&command) {
            Ok(output) => Ok(output),
            Err(err) => {
                if let SupervisorError::Cancelled { output } = &err {
                    self.out.detail_raw(output, 0);
                }
                Err(err.into())
            }
        }
    }

    /// Run a command and turn its outcome into a verdict.
    ///
    /// Exit 0 is OK. Any other exit is matched against the error
    /// database: a hit gives the pattern's severity, a miss CRITICAL.
    pub fn run_command(&mut self, template: &str) -> Result<CheckReturn, CheckError> {
        let outcome = self.spawn(template)?;
        let output = outcome.output.trim_end_matches('\n');

        if outcome.success() {
            let message = self.template_or(Severity::Ok, DEFAULT_OK_MESSAGE);
            let details = format!("{}\n{}", message, output);
            return Ok(CheckReturn::Full(Severity::Ok, message, details));
        }

        let (severity, message) = match self.ctx.errdb().classify(output) {
            Some(hit) => {
                debug!(exit_code = outcome.exit_code, hit = %hit, "failure classified");
                let message = format!("{} [ErrDB:{}]", self.template_or(hit.severity, ""), hit);
                (hit.severity, message)
            }
            None => {
                debug!(exit_code = outcome.exit_code, "failure not in error database");
                (Severity::Critical, self.template_or(Severity::Critical, ""))
            }
        };
        let details = format!("{}\n{}", message, output);
        Ok(CheckReturn::Full(severity, message, details))
    }

    /// Report the metrics of `perf` in its declared key order.
    ///
    /// Keys that were never set render as `0`.
    pub fn record_perf(&mut self, perf: &PerfData) {
        self.perf = perf.metrics();
    }

    fn template_or(&self, severity: Severity, fallback: &str) -> String {
        let template = self.descriptor.status_message(severity).unwrap_or(fallback);
        with_severity_prefix(severity, template).trim_end().to_string()
    }
}

struct Registered {
    descriptor: CheckDescriptor,
    implementation: CheckImpl,
}

/// Name → (descriptor, implementation) registry.
#[derive(Default)]
pub struct Dispatcher {
    checks: HashMap<String, Registered>,
    /// Registration order, used for listing.
    names: Vec<String>,
    service_type: Option<String>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[[checks]]` tables.
    ///
    /// Checks with an `order` become wrappers, checks with a `command`
    /// become command checks, and the rest are registered unbound so that
    /// an embedder can [`attach`](Self::attach) a native body.
    pub fn from_config(config: &ProbeConfig) -> Result<Self, DispatchError> {
        let mut dispatcher = Self::new().with_service_type(&config.probe.service_type);
        for def in &config.checks {
            let implementation = if def.descriptor.is_wrapper() {
                CheckImpl::Wrapper
            } else if let Some(cmd) = &def.command {
                CheckImpl::Command(cmd.clone())
            } else {
                CheckImpl::Unbound
            };
            dispatcher.register(def.descriptor.clone(), implementation)?;
        }
        Ok(dispatcher)
    }

    /// Service type reported with every listed check.
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    pub fn register(
        &mut self,
        descriptor: CheckDescriptor,
        implementation: CheckImpl,
    ) -> Result<(), DispatchError> {
        let name = descriptor.name.clone();
        if self.checks.contains_key(&name) {
            return Err(DispatchError::Duplicate(name));
        }
        debug!(check = %name, kind = implementation.kind(), "check registered");
        self.names.push(name.clone());
        self.checks.insert(
            name,
            Registered {
                descriptor,
                implementation,
            },
        );
        Ok(())
    }

    /// Replace the implementation of an already registered check.
    pub fn attach(&mut self, name: &str, implementation: CheckImpl) -> Result<(), DispatchError> {
        let entry = self
            .checks
            .get_mut(name)
            .ok_or_else(|| DispatchError::NotRegistered(name.to_string()))?;
        entry.implementation = implementation;
        Ok(())
    }

    pub fn descriptor(&self, name: &str) -> Option<&CheckDescriptor> {
        self.checks.get(name).map(|r| &r.descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    /// Check names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Descriptor listing: `key: value` lines per check, then `EOT`.
    pub fn listing(&self) -> String {
        let mut text = String::new();
        for name in &self.names {
            if let Some(entry) = self.checks.get(name) {
                for (key, value) in entry.descriptor.listing() {
                    text.push_str(&format!("{}: {}\n", key, value));
                }
                if let Some(service_type) = &self.service_type {
                    text.push_str(&format!("serviceType: {}\n", service_type));
                }
                text.push_str("EOT\n");
            }
        }
        text
    }

    /// Run one check. Never fails.
    pub fn run(&self, ctx: &RunContext, name: &str) -> ExecutionResult {
        let span = info_span!(
            "check",
            run_id = %ctx.run_id,
            check = name,
            stage = %Stage::Check
        );
        let _enter = span.enter();

        if ctx.cancel_token().is_cancelled() {
            warn!(check = name, "run already cancelled, not starting check");
            return timed_out_result(name, "");
        }

        let Some(entry) = self.checks.get(name) else {
            warn!(check = name, "check does not exist");
            return ExecutionResult::unknown(name, format!("Check {} does not exist.", name));
        };

        info!(
            target: event_names::CHECK_STARTED,
            kind = entry.implementation.kind(),
            "check started"
        );

        let result = match &entry.implementation {
            CheckImpl::Wrapper => self.run_wrapper(ctx, &entry.descriptor),
            CheckImpl::Unbound => ExecutionResult::unknown(
                name,
                format!("Check {} has no implementation.", name),
            ),
            CheckImpl::Command(cmd) => {
                let mut env = CheckEnv::new(ctx, &entry.descriptor);
                let outcome = contain(|| env.run_command(cmd));
                finish(ctx, env, outcome)
            }
            CheckImpl::Native(body) => {
                let mut env = CheckEnv::new(ctx, &entry.descriptor);
                let outcome = contain(|| body(&mut env));
                finish(ctx, env, outcome)
            }
        };

        info!(
            target: event_names::CHECK_FINISHED,
            severity = %result.severity,
            timed_out = result.timed_out,
            "check finished"
        );
        result
    }

    /// Run a check and publish its result as the final composite.
    pub fn run_and_publish(&self, ctx: &RunContext, name: &str) -> ExecutionResult {
        let result = self.run(ctx, name);
        let service = service_name(name, &ctx.vo);
        ctx.publish(&[PassiveResult::from_result(&ctx.publish_host, service, &result)]);
        result
    }

    fn run_wrapper(&self, ctx: &RunContext, descriptor: &CheckDescriptor) -> ExecutionResult {
        let aggregate = Aggregator::new(self, ctx).run_all(&descriptor.order);
        aggregate.into_execution_result(&descriptor.name)
    }
}

type Contained = Result<Result<CheckReturn, CheckError>, String>;

/// Run a check body, turning a panic into its message.
fn contain<F>(body: F) -> Contained
where
    F: FnOnce() -> Result<CheckReturn, CheckError>,
{
    panic::catch_unwind(AssertUnwindSafe(body)).map_err(|payload| panic_message(&*payload))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// WARNING result for a check abandoned because the run was cancelled.
pub(crate) fn timed_out_result(name: &str, partial: &str) -> ExecutionResult {
    let summary = with_severity_prefix(
        Severity::Warning,
        &format!("Timed out. Run deadline reached while executing {}.", name),
    );
    let details = format!("{}\n{}", summary, partial);
    let mut result = ExecutionResult::new(name, Severity::Warning, summary, details);
    result.timed_out = true;
    result
}

/// Turn a contained outcome into a prefixed result.
fn finish(ctx: &RunContext, env: CheckEnv<'_>, outcome: Contained) -> ExecutionResult {
    let name = env.descriptor.name.clone();
    let perf = env.perf;
    let out = env.out;

    let ret = match outcome {
        Ok(Ok(ret)) => ret,
        Ok(Err(CheckError::TimedOut { output })) => {
            warn!(check = %name, "check abandoned, run cancelled");
            let partial = if out.has_details() {
                out.details()
            } else {
                output
            };
            return timed_out_result(&name, &partial).with_perf(perf);
        }
        Ok(Err(err)) => {
            error!(check = %name, error = %err, "check failed with an error");
            let mut result = ExecutionResult::unknown(
                name,
                format!("Check raised an error: {}", err),
            );
            let partial = out.details();
            if !partial.is_empty() {
                result.details = format!("{}\n{}", result.details, partial);
            }
            return result;
        }
        Err(message) => {
            error!(
                target: event_names::CHECK_PANICKED,
                check = %name,
                panic = %message,
                "check implementation panicked"
            );
            return ExecutionResult::unknown(
                name,
                format!("Unhandled error while gathering check results: {}", message),
            );
        }
    };

    let (severity, summary, details) = match ret {
        CheckReturn::Status(severity) => {
            let summary = out
                .current_summary()
                .map(str::to_string)
                .unwrap_or_default();
            (severity, summary, out.details())
        }
        CheckReturn::Summary(severity, summary) => {
            let details = if out.has_details() {
                out.details()
            } else {
                summary.clone()
            };
            (severity, summary, details)
        }
        CheckReturn::Full(severity, summary, details) => (severity, summary, details),
    };
    let (summary, details) = prefix_output(ctx, severity, &summary, details);

    ExecutionResult::new(name, severity, summary, details).with_perf(perf)
}

/// Prefix summary and details with the severity token. Details that lack
/// it get the summary (and the optional header) in front.
fn prefix_output(
    ctx: &RunContext,
    severity: Severity,
    summary: &str,
    details: String,
) -> (String, String) {
    let summary = if summary.is_empty() {
        format!("{}:", severity.as_str())
    } else {
        with_severity_prefix(severity, summary)
    };
    let token = format!("{}:", severity.as_str());
    let details = if details.starts_with(&token) {
        details
    } else {
        match ctx.details_header_line() {
            Some(header) => format!("{}\n{}\n{}", summary, header, details),
            None => format!("{}\n{}", summary, details),
        }
    };
    (summary, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errdb::{ErrorDatabase, IniSource};
    use std::sync::Arc;

    fn ctx() -> RunContext {
        RunContext::new("se01.example.org")
    }

    fn native<F>(name: &str, body: F) -> Dispatcher
    where
        F: Fn(&mut CheckEnv<'_>) -> Result<CheckReturn, CheckError> + Send + Sync + 'static,
    {
        let mut d = Dispatcher::new();
        d.register(CheckDescriptor::new(name), CheckImpl::native(body))
            .unwrap();
        d
    }

    #[test]
    fn test_unknown_check_is_unknown() {
        let d = Dispatcher::new();
        let result = d.run(&ctx(), "nonexistent-check");
        assert_eq!(result.severity, Severity::Unknown);
        assert_eq!(result.summary, "UNKNOWN: Check nonexistent-check does not exist.");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut d = Dispatcher::new();
        d.register(CheckDescriptor::new("a"), CheckImpl::Wrapper).unwrap();
        let err = d
            .register(CheckDescriptor::new("a"), CheckImpl::Wrapper)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Duplicate(ref n) if n == "a"));
    }

    #[test]
    fn test_status_only_pulls_from_accumulator() {
        let d = native("probe-Ls", |env| {
            env.out.summary("listing done");
            env.out.detail("entry one", 0);
            env.out.detail("debug noise", 3);
            Ok(Severity::Ok.into())
        });
        let result = d.run(&ctx(), "probe-Ls");
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(result.summary, "OK: listing done");
        assert_eq!(result.details, "OK: listing done\nentry one\n");
    }

    #[test]
    fn test_full_return_keeps_prefixed_details() {
        let d = native("x", |_| {
            Ok(CheckReturn::Full(
                Severity::Warning,
                "slow".into(),
                "WARNING: took 12s".into(),
            ))
        });
        let result = d.run(&ctx(), "x");
        assert_eq!(result.summary, "WARNING: slow");
        assert_eq!(result.details, "WARNING: took 12s");
    }

    #[test]
    fn test_error_and_panic_are_unknown() {
        let d = native("err", |_| Err(CheckError::Failed("no proxy".into())));
        let result = d.run(&ctx(), "err");
        assert_eq!(result.severity, Severity::Unknown);
        assert!(result.summary.contains("no proxy"));

        let d = native("boom", |_| panic!("index out of range"));
        let result = d.run(&ctx(), "boom");
        assert_eq!(result.severity, Severity::Unknown);
        assert!(result.summary.contains("index out of range"));
    }

    #[test]
    fn test_cancelled_run_does_not_start_check() {
        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = started.clone();
        let d = native("probe-Late", move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(Severity::Ok.into())
        });
        let ctx = ctx();
        ctx.cancel_token().cancel();

        let result = d.run(&ctx, "probe-Late");
        assert_eq!(result.severity, Severity::Warning);
        assert!(result.timed_out);
        assert_eq!(
            result.summary,
            "WARNING: Timed out. Run deadline reached while executing probe-Late."
        );
        assert!(!started.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_recorded_perf_keeps_declared_order() {
        let d = native("probe-Put", |env| {
            let mut perf = PerfData::new(["put", "get"]);
            perf.set("get", 0.5);
            env.record_perf(&perf);
            Ok(CheckReturn::Summary(Severity::Ok, "copied".into()))
        });
        let result = d.run(&ctx(), "probe-Put");
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(result.perf_data(), "put=0;; get=0.5;;");
    }

    #[test]
    fn test_unbound_then_attach() {
        let mut d = Dispatcher::new();
        d.register(CheckDescriptor::new("later"), CheckImpl::Unbound)
            .unwrap();
        assert_eq!(d.run(&ctx(), "later").severity, Severity::Unknown);

        d.attach("later", CheckImpl::native(|_| Ok(Severity::Ok.into())))
            .unwrap();
        assert_eq!(d.run(&ctx(), "later").severity, Severity::Ok);
        assert!(d.attach("ghost", CheckImpl::Wrapper).is_err());
    }

    #[test]
    fn test_command_exit_zero_uses_ok_template() {
        let mut d = Dispatcher::new();
        d.register(
            CheckDescriptor::new("probe-Put").with_status_message(Severity::Ok, "File copied."),
            CheckImpl::Command("echo copied".into()),
        )
        .unwrap();
        let result = d.run(&ctx(), "probe-Put");
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(result.summary, "OK: File copied.");
        assert_eq!(result.details, "OK: File copied.\ncopied");
    }

    #[test]
    fn test_command_failure_classified_by_errdb() {
        let source = IniSource::parse("[srm]\nnospace = no space left\nnospace_status = WARNING\n");
        let errdb = Arc::new(ErrorDatabase::build(&source, &["srm"]));
        let ctx = ctx().with_errdb(errdb);

        let mut d = Dispatcher::new();
        d.register(
            CheckDescriptor::new("probe-Put"),
            CheckImpl::Command("echo 'ERROR: No space left on device'; exit 1".into()),
        )
        .unwrap();
        d.register(
            CheckDescriptor::new("probe-Get")
                .with_status_message(Severity::Critical, "Copy failed."),
            CheckImpl::Command("echo 'connection refused'; exit 1".into()),
        )
        .unwrap();

        let put = d.run(&ctx, "probe-Put");
        assert_eq!(put.severity, Severity::Warning);
        assert_eq!(put.summary, "WARNING: [ErrDB:(srm, nospace, WARNING)]");
        assert!(put.details.ends_with("ERROR: No space left on device"));

        let get = d.run(&ctx, "probe-Get");
        assert_eq!(get.severity, Severity::Critical);
        assert_eq!(get.summary, "CRITICAL: Copy failed.");
    }

    #[test]
    fn test_details_header_inserted() {
        let d = native("h", |_| Ok(CheckReturn::Summary(Severity::Ok, "fine".into())));
        let ctx = ctx().with_details_header(true);
        let result = d.run(&ctx, "h");
        let lines: Vec<&str> = result.details.lines().collect();
        assert_eq!(lines[0], "OK: fine");
        assert!(lines[1].starts_with("Testing from: "));
        assert_eq!(lines[2], "fine");
    }

    #[test]
    fn test_listing() {
        let mut d = Dispatcher::new();
        d.register(
            CheckDescriptor::new("probe-Ls").with_description("List a directory"),
            CheckImpl::Command("ls".into()),
        )
        .unwrap();
        let listing = d.listing();
        assert!(listing.starts_with("checkName: probe-Ls\n"));
        assert!(listing.contains("checkDescription: List a directory\n"));
        assert!(listing.ends_with("EOT\n"));
        assert!(!listing.contains("serviceType"));

        let mut typed = Dispatcher::new().with_service_type("Storage");
        typed
            .register(CheckDescriptor::new("probe-Ls"), CheckImpl::Command("ls".into()))
            .unwrap();
        assert!(typed.listing().ends_with("serviceType: Storage\nEOT\n"));
    }
}
