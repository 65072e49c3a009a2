//! Configuration validation errors and semantic validation of the check tree.

use crate::probe::{ProbeConfig, VERBOSITY_MAX};
use std::collections::HashSet;
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Duplicate check name: {0}")]
    DuplicateCheck(String),

    #[error("Check '{check}' references unknown check '{target}'")]
    UnknownReference { check: String, target: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 12,
            ValidationError::SemanticError(_) => 13,
            ValidationError::InvalidValue { .. } => 14,
            ValidationError::DuplicateCheck(_) => 15,
            ValidationError::UnknownReference { .. } => 16,
        }
    }
}

impl From<ValidationError> for gp_common::Error {
    fn from(err: ValidationError) -> Self {
        gp_common::Error::Config(err.to_string())
    }
}

/// Validate a parsed configuration.
///
/// Checks numeric ranges, that check names are unique, that every
/// `children`/`order` entry names a configured check, and that no wrapper
/// lists itself in its own order.
pub fn validate_config(config: &ProbeConfig) -> ValidationResult<()> {
    let probe = &config.probe;

    for (field, value) in [
        ("probe.timeout_secs", probe.timeout_secs),
        ("probe.read_timeout_secs", probe.read_timeout_secs),
    ] {
        if value == 0 {
            return Err(ValidationError::InvalidValue {
                field: field.to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
    }

    if probe.verbosity > VERBOSITY_MAX {
        return Err(ValidationError::InvalidValue {
            field: "probe.verbosity".to_string(),
            message: format!("Must be in [0, {}], got {}", VERBOSITY_MAX, probe.verbosity),
        });
    }

    let mut names = HashSet::new();
    for check in &config.checks {
        let name = check.descriptor.name.as_str();
        if name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "checks.name".to_string(),
                message: "Must not be empty".to_string(),
            });
        }
        if !names.insert(name) {
            return Err(ValidationError::DuplicateCheck(name.to_string()));
        }
    }

    for check in &config.checks {
        let d = &check.descriptor;
        for target in d.children.iter().chain(d.order.iter()) {
            if !names.contains(target.as_str()) {
                return Err(ValidationError::UnknownReference {
                    check: d.name.clone(),
                    target: target.clone(),
                });
            }
        }
        if d.order.iter().any(|o| o == &d.name) {
            return Err(ValidationError::SemanticError(format!(
                "Wrapper check '{}' lists itself in its order",
                d.name
            )));
        }
        if d.is_wrapper() && check.command.is_some() {
            return Err(ValidationError::SemanticError(format!(
                "Check '{}' has both an order and a command",
                d.name
            )));
        }
    }

    Ok(())
}
