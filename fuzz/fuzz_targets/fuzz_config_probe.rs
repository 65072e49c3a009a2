//! Fuzz target for gridprobe.toml parsing and validation.

#![no_main]

use gp_config::ProbeConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Parse errors are expected; panics are not.
        let _ = ProbeConfig::parse(text);
    }
});
