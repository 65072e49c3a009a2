//! Fuzz target for passive result formatting.
//!
//! A formatted line must stay on one physical line and keep the
//! `host;service;code;` prefix intact after sanitizing.

#![no_main]

use arbitrary::Arbitrary;
use gp_common::Severity;
use gp_core::publish::PassiveResult;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    summary: String,
    details: String,
    code: u8,
}

fuzz_target!(|input: Input| {
    let severity = match input.code % 4 {
        0 => Severity::Ok,
        1 => Severity::Warning,
        2 => Severity::Critical,
        _ => Severity::Unknown,
    };
    let result = PassiveResult::new("host", "svc-ops", severity, input.summary, input.details)
        .sanitized();
    let line = result.passive_line();
    assert!(line.starts_with("host;svc-ops;"));
    assert!(!line.contains('|'));
});
