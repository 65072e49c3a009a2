//! Run-scoped state shared by the dispatcher and aggregator.
//!
//! One [`RunContext`] exists per probe run. It carries the cancellation
//! token, the result sink and the error database, so two runs in the same
//! process (tests, embedders) never share process tables or sinks.

use crate::cancel::CancelToken;
use crate::errdb::ErrorDatabase;
use crate::logging::event_names;
use crate::logging::generate_run_id;
use crate::publish::{NullSink, PassiveResult, ResultSink};
use crate::supervisor::{Supervisor, SupervisorBuilder, DEFAULT_READ_TIMEOUT_SECS};
use gp_config::ProbeConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Per-run configuration and collaborators.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    /// Host the checks are run against.
    pub host: String,
    /// Host published results are addressed to.
    pub publish_host: String,
    /// Suffix appended to published service names.
    pub vo: String,
    pub verbosity: u8,
    pub read_timeout: Duration,
    /// Insert `Testing from: <hostname>` between summary and details.
    pub details_header: bool,
    /// Replace pipes in published summaries and details.
    pub sanitize: bool,
    cancel: CancelToken,
    sink: Arc<dyn ResultSink>,
    errdb: Arc<ErrorDatabase>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("host", &self.host)
            .field("publish_host", &self.publish_host)
            .field("vo", &self.vo)
            .field("verbosity", &self.verbosity)
            .field("read_timeout", &self.read_timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("errdb_patterns", &self.errdb.len())
            .finish()
    }
}

impl RunContext {
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            run_id: generate_run_id(),
            publish_host: host.clone(),
            host,
            vo: "ops".to_string(),
            verbosity: 0,
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            details_header: false,
            sanitize: true,
            cancel: CancelToken::new(),
            sink: Arc::new(NullSink),
            errdb: Arc::new(ErrorDatabase::default()),
        }
    }

    /// Context populated from the `[probe]` section.
    pub fn from_config(config: &ProbeConfig) -> Self {
        let probe = &config.probe;
        let mut ctx = Self::new(probe.host.clone().unwrap_or_else(local_hostname));
        ctx.vo = probe.vo.clone();
        ctx.verbosity = probe.verbosity;
        ctx.read_timeout = Duration::from_secs(probe.read_timeout_secs);
        ctx.details_header = probe.details_header;
        ctx.sanitize = probe.sanitize;
        if let Some(host) = &config.publish.hostname {
            ctx.publish_host = host.clone();
        }
        ctx
    }

    pub fn with_publish_host(mut self, host: impl Into<String>) -> Self {
        self.publish_host = host.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_errdb(mut self, errdb: Arc<ErrorDatabase>) -> Self {
        self.errdb = errdb;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_vo(mut self, vo: impl Into<String>) -> Self {
        self.vo = vo.into();
        self
    }

    pub fn with_details_header(mut self, enabled: bool) -> Self {
        self.details_header = enabled;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn errdb(&self) -> &ErrorDatabase {
        &self.errdb
    }

    /// Supervisor bound to this run's token and read timeout.
    pub fn supervisor(&self) -> Supervisor {
        SupervisorBuilder::new()
            .read_timeout(self.read_timeout)
            .build(self.cancel.clone())
    }

    /// Hand results to the sink. Failures are logged, never raised.
    pub fn publish(&self, results: &[PassiveResult]) -> bool {
        let outgoing: Vec<PassiveResult> = if self.sanitize {
            results.iter().map(PassiveResult::sanitized).collect()
        } else {
            results.to_vec()
        };
        match self.sink.publish(&outgoing) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: event_names::PUBLISH_FAILED,
                    error = %e,
                    count = outgoing.len(),
                    "failed to publish results"
                );
                false
            }
        }
    }

    /// `Testing from: <hostname>` when the header is enabled.
    pub fn details_header_line(&self) -> Option<String> {
        self.details_header
            .then(|| format!("Testing from: {}", local_hostname()))
    }
}

/// Name of the machine the probe runs on.
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let name = String::from_utf8_lossy(&buf[..end]).into_owned();
        if !name.is_empty() {
            return name;
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
