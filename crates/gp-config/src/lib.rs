//! Gridprobe configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for `gridprobe.toml`
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation of the check tree

pub mod probe;
pub mod resolve;
pub mod validate;

pub use probe::{
    CheckDef, ErrDbSection, ProbeConfig, ProbeSection, PublishDest, PublishSection,
    VERBOSITY_MAX, VERBOSITY_MIN,
};
pub use resolve::{resolve_config, ConfigSource, ResolvedPath};
pub use validate::{validate_config, ValidationError, ValidationResult};

use std::path::{Path, PathBuf};

/// A loaded configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ProbeConfig,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Resolve, read and validate the probe configuration.
///
/// Falls back to built-in defaults when no file is found. Environment
/// overrides (`NAGIOS_COMMANDFILE`, `NAGIOS_HOSTNAME`) are applied
/// after parsing.
pub fn load_config(cli_path: Option<&Path>) -> ValidationResult<LoadedConfig> {
    let resolved = resolve_config(cli_path);
    let mut config = match &resolved.path {
        Some(path) => ProbeConfig::from_file(path)?,
        None => ProbeConfig::default(),
    };
    config.apply_env();
    validate_config(&config)?;

    tracing::debug!(
        source = %resolved.source,
        path = ?resolved.path,
        checks = config.checks.len(),
        "probe configuration loaded"
    );

    Ok(LoadedConfig {
        config,
        path: resolved.path,
        source: resolved.source,
    })
}
