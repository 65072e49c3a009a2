//! Probe configuration file structure.
//!
//! ```toml
//! [probe]
//! namespace = "org.example"
//! service_type = "Storage"
//! host = "se01.example.org"
//! timeout_secs = 600
//!
//! [errdb]
//! path = "/etc/gridprobe/gridprobe.errdb"
//! topics = ["default", "storage"]
//!
//! [publish]
//! dest = "nagcmd"
//!
//! [[checks]]
//! name = "Storage-All"
//! order = ["Storage-Ping", "Storage-Put"]
//!
//! [[checks]]
//! name = "Storage-Ping"
//! command = "ping -c 1 se01.example.org {verbose}"
//! children = ["Storage-Put"]
//! ```

use crate::validate::{ValidationError, ValidationResult};
use gp_common::CheckDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const VERBOSITY_MIN: u8 = 0;
pub const VERBOSITY_MAX: u8 = 3;

/// Env var that overrides the command file path.
pub const ENV_NAGIOS_COMMANDFILE: &str = "NAGIOS_COMMANDFILE";

/// Env var that overrides the host results are published under.
pub const ENV_NAGIOS_HOSTNAME: &str = "NAGIOS_HOSTNAME";

/// Top-level probe configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub probe: ProbeSection,
    pub errdb: ErrDbSection,
    pub publish: PublishSection,
    pub checks: Vec<CheckDef>,
}

/// `[probe]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub namespace: String,
    pub service_type: String,
    /// Host of the service under test.
    pub host: Option<String>,
    /// Global deadline for one run.
    pub timeout_secs: u64,
    /// Per-read timeout while waiting on command output.
    pub read_timeout_secs: u64,
    /// Grace period after cancellation for unwind and publication.
    pub grace_secs: u64,
    pub verbosity: u8,
    pub sanitize: bool,
    pub details_header: bool,
    /// Suffix appended to published check names.
    pub vo: String,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            namespace: "org.gridprobe".to_string(),
            service_type: "Undefined".to_string(),
            host: None,
            timeout_secs: 600,
            read_timeout_secs: 30,
            grace_secs: 3,
            verbosity: VERBOSITY_MIN,
            sanitize: true,
            details_header: true,
            vo: "ops".to_string(),
        }
    }
}

/// `[errdb]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrDbSection {
    pub path: PathBuf,
    /// Empty means every topic in the file.
    pub topics: Vec<String>,
}

impl Default for ErrDbSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/gridprobe/gridprobe.errdb"),
            topics: vec!["default".to_string()],
        }
    }
}

/// Where per-check results are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishDest {
    /// Print to stdout.
    #[default]
    Active,
    /// Append to the monitoring command file.
    Nagcmd,
    /// Discard.
    None,
}

impl std::str::FromStr for PublishDest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" | "stdout" => Ok(PublishDest::Active),
            "nagcmd" | "cmdfile" => Ok(PublishDest::Nagcmd),
            "none" | "off" => Ok(PublishDest::None),
            _ => Err(format!(
                "--publish must be one of <active|nagcmd|none>, {} given",
                s
            )),
        }
    }
}

impl std::fmt::Display for PublishDest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishDest::Active => write!(f, "active"),
            PublishDest::Nagcmd => write!(f, "nagcmd"),
            PublishDest::None => write!(f, "none"),
        }
    }
}

/// `[publish]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSection {
    pub dest: PublishDest,
    pub nagcmd_file: PathBuf,
    /// Host name results are published under; defaults to the checked host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            dest: PublishDest::Active,
            nagcmd_file: PathBuf::from("/var/nagios/rw/nagios.cmd"),
            hostname: None,
        }
    }
}

/// One `[[checks]]` entry: a descriptor plus an optional command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDef {
    #[serde(flatten)]
    pub descriptor: CheckDescriptor,
    /// Shell command line; `{verbose}` is replaced per verbosity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ProbeConfig {
    /// Read and parse a TOML configuration file.
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ValidationError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ValidationResult<Self> {
        toml::from_str(content).map_err(|e| ValidationError::ParseError(e.to_string()))
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(ENV_NAGIOS_COMMANDFILE) {
            if !path.is_empty() {
                self.publish.nagcmd_file = PathBuf::from(path);
            }
        }
        if let Ok(host) = std::env::var(ENV_NAGIOS_HOSTNAME) {
            if !host.is_empty() {
                self.publish.hostname = Some(host);
            }
        }
    }

    pub fn check(&self, name: &str) -> Option<&CheckDef> {
        self.checks.iter().find(|c| c.descriptor.name == name)
    }

    /// Name of the wrapper check run when none is requested: the first
    /// check with an `order`, else the first check.
    pub fn default_check(&self) -> Option<&str> {
        self.checks
            .iter()
            .find(|c| c.descriptor.is_wrapper())
            .or_else(|| self.checks.first())
            .map(|c| c.descriptor.name.as_str())
    }

    /// Clamp verbosity into the supported range.
    pub fn set_verbosity(&mut self, verbosity: u8) {
        self.probe.verbosity = verbosity.clamp(VERBOSITY_MIN, VERBOSITY_MAX);
    }

    /// Add topics, skipping duplicates and empty names.
    pub fn add_topics<'a, I>(&mut self, topics: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for topic in topics {
            let topic = topic.trim();
            if !topic.is_empty() && !self.errdb.topics.iter().any(|t| t == topic) {
                self.errdb.topics.push(topic.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gp_common::Severity;

    const SAMPLE: &str = r#"
[probe]
namespace = "org.example"
service_type = "Storage"
host = "se01.example.org"
timeout_secs = 120
verbosity = 2

[errdb]
topics = ["default", "storage"]

[publish]
dest = "nagcmd"

[[checks]]
name = "Storage-All"
type = "wrapper"
order = ["Storage-Ping", "Storage-Put"]

[[checks]]
name = "Storage-Ping"
command = "ping -c 1 se01 {verbose}"
children = ["Storage-Put"]
critical = true
status_messages = { OK = "host reachable", CRITICAL = "host unreachable" }

[[checks]]
name = "Storage-Put"
command = "true"
"#;

    #[test]
    fn test_parse_sample() {
        let config = ProbeConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.probe.namespace, "org.example");
        assert_eq!(config.probe.timeout_secs, 120);
        assert_eq!(config.probe.read_timeout_secs, 30);
        assert_eq!(config.publish.dest, PublishDest::Nagcmd);
        assert_eq!(config.errdb.topics, vec!["default", "storage"]);
        assert_eq!(config.checks.len(), 3);

        let ping = config.check("Storage-Ping").unwrap();
        assert!(ping.descriptor.critical);
        assert_eq!(ping.descriptor.children, vec!["Storage-Put"]);
        assert_eq!(
            ping.descriptor.status_message(Severity::Critical),
            Some("host unreachable")
        );
        assert_eq!(ping.command.as_deref(), Some("ping -c 1 se01 {verbose}"));

        let all = config.check("Storage-All").unwrap();
        assert_eq!(all.descriptor.check_type, "wrapper");
        assert!(all.command.is_none());
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = ProbeConfig::parse("").unwrap();
        assert_eq!(config, ProbeConfig::default());
        assert_eq!(config.probe.timeout_secs, 600);
        assert_eq!(config.errdb.topics, vec!["default"]);
        assert!(config.probe.sanitize);
    }

    #[test]
    fn test_default_check_prefers_wrapper() {
        let config = ProbeConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.default_check(), Some("Storage-All"));
        assert_eq!(ProbeConfig::default().default_check(), None);
    }

    #[test]
    fn test_parse_error() {
        let err = ProbeConfig::parse("[probe\nnamespace=").unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn test_verbosity_is_clamped() {
        let mut config = ProbeConfig::default();
        config.set_verbosity(9);
        assert_eq!(config.probe.verbosity, VERBOSITY_MAX);
    }

    #[test]
    fn test_add_topics_dedups() {
        let mut config = ProbeConfig::default();
        config.add_topics("default,storage,,storage".split(','));
        assert_eq!(config.errdb.topics, vec!["default", "storage"]);
    }

    #[test]
    fn test_publish_dest_parse() {
        assert_eq!("active".parse::<PublishDest>().unwrap(), PublishDest::Active);
        assert_eq!("NAGCMD".parse::<PublishDest>().unwrap(), PublishDest::Nagcmd);
        assert!("nsca".parse::<PublishDest>().is_err());
    }
}
