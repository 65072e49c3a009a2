//! Fuzz target for matching command output against the error database.

#![no_main]

use arbitrary::Arbitrary;
use gp_core::errdb::{ErrorDatabase, IniSource};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    errdb: String,
    output: String,
    match_all: bool,
}

fuzz_target!(|input: Input| {
    let db = ErrorDatabase::build::<&str>(&IniSource::parse(&input.errdb), &[]);
    let hits = db.matches(&input.output, input.match_all);
    if !input.match_all {
        assert!(hits.len() <= 1);
    }
});
