//! Fuzz target for the error database INI reader.
//!
//! The file is operator-maintained, so malformed sections, stray
//! continuation lines and odd encodings must never panic.

#![no_main]

use gp_core::errdb::{ErrorDatabase, IniSource};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let source = IniSource::parse(&text);
    let _ = ErrorDatabase::build::<&str>(&source, &[]);
});
