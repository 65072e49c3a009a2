//! Gridprobe - supervised health checks for remote services.
//!
//! The main entry point for gridprobe, handling:
//! - Configuration loading with CLI overrides
//! - Check listing
//! - Running one check (or wrapper) under a global deadline
//! - Publishing child results and rendering the final verdict

use clap::error::ErrorKind;
use clap::Parser;
use gp_config::{load_config, ProbeConfig, PublishDest};
use gp_core::errdb::ErrorDatabase;
use gp_core::exit_codes::ExitCode;
use gp_core::logging::{event_names, init_logging, LogConfig, LogFormat, LogLevel, Stage};
use gp_core::output::render;
use gp_core::publish::{ActiveSink, CommandFileSink, NullSink, ResultSink};
use gp_core::{Dispatcher, RunContext};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span};

/// Gridprobe - run a tree of health checks against a service
#[derive(Parser, Debug)]
#[command(name = "gridprobe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to gridprobe.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host under test
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Check (or wrapper) to run; defaults to the first wrapper
    #[arg(short = 'm', long)]
    check: Option<String>,

    /// Global deadline for the whole run, in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Detail verbosity (0-3)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=3))]
    verbose: Option<u8>,

    /// Error database file
    #[arg(long)]
    errdb: Option<PathBuf>,

    /// Extra error database topics (comma separated)
    #[arg(long, value_delimiter = ',')]
    err_topics: Vec<String>,

    /// Where child results go: active, nagcmd or none
    #[arg(long)]
    publish: Option<PublishDest>,

    /// Monitoring daemon command file
    #[arg(long)]
    nagcmd_file: Option<PathBuf>,

    /// Keep pipe characters in published output
    #[arg(long)]
    no_sanitize: bool,

    /// List the registered checks and exit
    #[arg(short, long)]
    list: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Log format (human, jsonl)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Ok,
                _ => ExitCode::ARGS_ERROR,
            };
            let _ = e.print();
            std::process::exit(code.as_i32());
        }
    };

    init_logging(&LogConfig::from_env(cli.log_level, cli.log_format));

    let exit_code = run(&cli);
    std::process::exit(exit_code.as_i32());
}

fn run(cli: &Cli) -> ExitCode {
    let loaded = match load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => return config_failure(e.into()),
    };
    info!(
        target: event_names::CONFIG_LOADED,
        source = %loaded.source,
        checks = loaded.config.checks.len(),
        "configuration loaded"
    );

    let mut config = loaded.config;
    apply_overrides(&mut config, cli);

    let dispatcher = match Dispatcher::from_config(&config) {
        Ok(d) => d,
        Err(e) => return config_failure(e.into()),
    };

    if cli.list {
        print!("{}", dispatcher.listing());
        return ExitCode::Ok;
    }

    let Some(name) = cli
        .check
        .clone()
        .or_else(|| config.default_check().map(str::to_string))
    else {
        println!("UNKNOWN: No check given and none defined in the configuration.");
        return ExitCode::Unknown;
    };

    let errdb = Arc::new(ErrorDatabase::load(&config.errdb.path, &config.errdb.topics));
    let ctx = RunContext::from_config(&config)
        .with_sink(sink_for(&config))
        .with_errdb(errdb);

    let span = info_span!("run", run_id = %ctx.run_id, stage = %Stage::Init);
    let _enter = span.enter();
    info!(
        target: event_names::RUN_STARTED,
        check = %name,
        namespace = %config.probe.namespace,
        service_type = %config.probe.service_type,
        host = %ctx.host,
        publish_host = %ctx.publish_host,
        timeout_secs = config.probe.timeout_secs,
        "run started"
    );

    let deadline = ctx.cancel_token().arm_deadline(
        Duration::from_secs(config.probe.timeout_secs),
        Duration::from_secs(config.probe.grace_secs),
    );
    let result = dispatcher.run_and_publish(&ctx, &name);
    deadline.disarm();

    let rendered = render(Some(&result), ctx.sanitize);
    println!("{}", rendered.text);

    info!(
        target: event_names::RUN_FINISHED,
        severity = %result.severity,
        exit_code = rendered.exit_code.as_i32(),
        "run finished"
    );
    rendered.exit_code
}

/// Print the plugin-style verdict for a configuration problem.
fn config_failure(err: gp_common::Error) -> ExitCode {
    error!(
        target: event_names::CONFIG_INVALID,
        code = err.code(),
        category = %err.category(),
        "{}",
        err.format_human()
    );
    println!("UNKNOWN: Configuration error: {}", config_reason(&err));
    ExitCode::CONFIG_ERROR
}

fn config_reason(err: &gp_common::Error) -> String {
    match err {
        gp_common::Error::Config(reason) => reason.clone(),
        other => other.to_string(),
    }
}

fn apply_overrides(config: &mut ProbeConfig, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.probe.host = Some(host.clone());
    }
    if let Some(timeout) = cli.timeout.filter(|t| *t > 0) {
        config.probe.timeout_secs = timeout;
    }
    if let Some(verbosity) = cli.verbose {
        config.set_verbosity(verbosity);
    }
    if let Some(path) = &cli.errdb {
        config.errdb.path = path.clone();
    }
    config.add_topics(cli.err_topics.iter().map(String::as_str));
    if let Some(dest) = cli.publish {
        config.publish.dest = dest;
    }
    if let Some(path) = &cli.nagcmd_file {
        config.publish.nagcmd_file = path.clone();
    }
    if cli.no_sanitize {
        config.probe.sanitize = false;
    }
}

fn sink_for(config: &ProbeConfig) -> Arc<dyn ResultSink> {
    match config.publish.dest {
        PublishDest::Active => Arc::new(ActiveSink::stdout()),
        PublishDest::Nagcmd => Arc::new(CommandFileSink::new(&config.publish.nagcmd_file)),
        PublishDest::None => Arc::new(NullSink),
    }
}
