//! End-to-end check tree scenarios with real commands and an in-memory sink.

use gp_common::{CheckDescriptor, Severity};
use gp_config::ProbeConfig;
use gp_core::dispatch::{CheckImpl, CheckReturn, Dispatcher};
use gp_core::errdb::{ErrorDatabase, IniSource};
use gp_core::publish::MemorySink;
use gp_core::{Aggregator, RunContext};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn context(sink: &Arc<MemorySink>) -> RunContext {
    RunContext::new("se01.example.org")
        .with_vo("ops")
        .with_sink(sink.clone())
}

#[test]
fn scenario_critical_and_non_critical_leaves() {
    let mut d = Dispatcher::new();
    d.register(
        CheckDescriptor::new("leafA").critical(true),
        CheckImpl::Command("echo 'transfer aborted'; exit 2".into()),
    )
    .unwrap();
    d.register(
        CheckDescriptor::new("leafB"),
        CheckImpl::native(|_| Ok(CheckReturn::Summary(Severity::Warning, "slow".into()))),
    )
    .unwrap();

    let sink = Arc::new(MemorySink::new());
    let ctx = context(&sink);
    let agg = Aggregator::new(&d, &ctx).run_all(&["leafA", "leafB"]);

    assert_eq!(agg.severity, Severity::Critical);
    assert_eq!(agg.last_check.as_deref(), Some("leafA"));
    assert!(agg.summary.starts_with("CHECK FAILED [leafA]: CRITICAL"));
    assert_eq!(sink.services(), vec!["leafA-ops", "leafB-ops"]);
    assert_eq!(sink.find("leafA-ops").unwrap().severity, Severity::Critical);
    assert_eq!(sink.find("leafB-ops").unwrap().severity, Severity::Warning);
}

#[test]
fn scenario_failed_node_masks_children_and_stops() {
    let tmp = TempDir::new().unwrap();
    let ran = tmp.path().join("ran");
    let touch = |name: &str| format!("echo {} >> {}", name, ran.display());

    let mut d = Dispatcher::new();
    d.register(
        CheckDescriptor::new("node").with_children(["grandA", "grandB"]),
        CheckImpl::Command("echo 'host unreachable'; exit 1".into()),
    )
    .unwrap();
    d.register(CheckDescriptor::new("grandA"), CheckImpl::Command(touch("grandA")))
        .unwrap();
    d.register(CheckDescriptor::new("grandB"), CheckImpl::Command(touch("grandB")))
        .unwrap();
    d.register(CheckDescriptor::new("sibling"), CheckImpl::Command(touch("sibling")))
        .unwrap();

    let sink = Arc::new(MemorySink::new());
    let ctx = context(&sink);
    let agg = Aggregator::new(&d, &ctx).run_all(&["node", "grandA", "grandB", "sibling"]);

    assert_eq!(agg.severity, Severity::Critical);
    assert_eq!(agg.results.len(), 1);
    assert!(!ran.exists(), "masked or later checks were executed");

    assert_eq!(sink.services(), vec!["node-ops", "grandA-ops", "grandB-ops"]);
    for child in ["grandA-ops", "grandB-ops"] {
        let masked = sink.find(child).unwrap();
        assert_eq!(masked.severity, Severity::Warning);
        assert!(masked.summary.starts_with("WARNING: Masked by node - \""));
        assert!(masked.details.is_empty());
    }
}

#[test]
fn scenario_nonexistent_check() {
    let d = Dispatcher::new();
    let sink = Arc::new(MemorySink::new());
    let ctx = context(&sink);

    let result = d.run(&ctx, "nonexistent-check");
    assert_eq!(result.severity, Severity::Unknown);
    assert!(result.summary.contains("nonexistent-check"));

    let agg = Aggregator::new(&d, &ctx).run_all(&["nonexistent-check"]);
    assert_eq!(agg.severity, Severity::Ok);
    assert_eq!(sink.find("nonexistent-check-ops").unwrap().severity, Severity::Unknown);
}

#[test]
fn wrapper_from_config_classifies_with_errdb() {
    let tmp = TempDir::new().unwrap();
    let errdb_path = tmp.path().join("gridprobe.errdb");
    fs::write(
        &errdb_path,
        "[srm]\n\
         nospace = no space left on device|quota exceeded\n\
         nospace_status = WARNING\n",
    )
    .unwrap();

    let config = ProbeConfig::parse(
        r#"
[probe]
host = "se01.example.org"

[[checks]]
name = "SRM-All"
order = ["SRM-Ping", "SRM-Put"]

[[checks]]
name = "SRM-Ping"
command = "echo pong"
children = ["SRM-Put"]

[[checks]]
name = "SRM-Put"
critical = true
command = "echo 'ERROR: No space left on device' >&2; exit 1"

[checks.status_messages]
WARNING = "File was NOT copied."
"#,
    )
    .unwrap();

    let dispatcher = Dispatcher::from_config(&config).unwrap();
    let errdb = ErrorDatabase::build(
        &IniSource::from_file(&errdb_path).unwrap(),
        &["srm"],
    );
    let sink = Arc::new(MemorySink::new());
    let ctx = RunContext::from_config(&config)
        .with_sink(sink.clone())
        .with_errdb(Arc::new(errdb));

    let result = dispatcher.run_and_publish(&ctx, "SRM-All");

    assert_eq!(result.severity, Severity::Warning);
    assert_eq!(
        result.summary,
        "WARNING: CHECK FAILED [SRM-Put]: WARNING: File was NOT copied. \
         [ErrDB:(srm, nospace, WARNING)]"
    );
    assert!(result.details.contains("Invoking check: ["));
    assert!(result.details.contains("] SRM-Ping\n"));
    assert_eq!(
        sink.services(),
        vec!["SRM-Ping-ops", "SRM-Put-ops", "SRM-All-ops"]
    );
}
