//! Gridprobe common types and errors.
//!
//! This crate provides the value types shared by every gridprobe crate:
//! - [`Severity`], the totally ordered check verdict
//! - [`CheckDescriptor`], the static metadata of a registered check
//! - [`ExecutionResult`] and [`PerfMetric`], the outcome of one invocation
//! - The shared [`Error`] type with stable codes

pub mod descriptor;
pub mod error;
pub mod result;
pub mod severity;

pub use descriptor::{CheckDescriptor, CliOption};
pub use error::{Error, ErrorCategory, Result};
pub use result::{
    render_perf, with_severity_prefix, ExecutionResult, PerfData, PerfMetric, PerfValue,
};
pub use severity::Severity;
