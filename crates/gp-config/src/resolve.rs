//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! system config → built-in defaults.

use std::path::{Path, PathBuf};

/// Where the configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via `--config`.
    CliArgument,

    /// `GRIDPROBE_CONFIG` or `GRIDPROBE_CONFIG_DIR`.
    Environment,

    /// Found in the XDG config directory.
    XdgConfig,

    /// Found in /etc/gridprobe/.
    SystemConfig,

    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// A resolved configuration path and its provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPath {
    /// `None` when falling back to built-in defaults.
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

pub const ENV_CONFIG_PATH: &str = "GRIDPROBE_CONFIG";
pub const ENV_CONFIG_DIR: &str = "GRIDPROBE_CONFIG_DIR";

pub const CONFIG_FILENAME: &str = "gridprobe.toml";

const APP_NAME: &str = "gridprobe";

/// Resolve the probe configuration path.
///
/// 1. Explicit CLI path (returned even if missing, so loading reports it)
/// 2. `GRIDPROBE_CONFIG`
/// 3. `GRIDPROBE_CONFIG_DIR` + `gridprobe.toml`
/// 4. XDG config directory (~/.config/gridprobe/)
/// 5. System config (/etc/gridprobe/)
/// 6. Built-in defaults (None)
pub fn resolve_config(cli_path: Option<&Path>) -> ResolvedPath {
    if let Some(path) = cli_path {
        return found(path.to_path_buf(), ConfigSource::CliArgument);
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::XdgConfig);
        }
    }

    let system_path = system_config_dir().join(CONFIG_FILENAME);
    if system_path.exists() {
        return found(system_path, ConfigSource::SystemConfig);
    }

    ResolvedPath::default()
}

fn found(path: PathBuf, source: ConfigSource) -> ResolvedPath {
    ResolvedPath {
        path: Some(path),
        source,
    }
}

/// XDG config directory for gridprobe.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}
