//! Error database: classifies free-text command output into a severity.
//!
//! The database file is section/option based. Each section is a topic,
//! each plain option holds `|`-separated patterns and the paired
//! `<option>_status` option holds the severity reported on a match:
//!
//! ```text
//! [storage]
//! nospace_status = WARNING
//! nospace:
//!  disk full|
//!  no space left
//!
//! [network]
//! timeout:
//!  connection timed out
//! ```
//!
//! Build rules:
//! - empty plain options are dropped together with their status option
//! - an empty or missing status defaults to CRITICAL
//! - topics left without options are removed
//! - a status option without its plain option is an integrity violation;
//!   it is logged and dropped, and the rest of the database is kept
//!
//! Matching is case-insensitive and runs against the text with newlines
//! flattened to spaces. Iteration over topics and options is unordered: when
//! several patterns match, which one a first-match lookup returns is not
//! defined.

use crate::logging::event_names;
use gp_common::Severity;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Suffix marking the severity option paired with a pattern option.
pub const STATUS_SUFFIX: &str = "_status";

/// Severity assigned when a status option is empty or missing.
pub const DEFAULT_STATUS: Severity = Severity::Critical;

const DEFAULT_SECTION: &str = "DEFAULT";

#[derive(Debug, Error)]
pub enum ErrDbError {
    #[error("failed to read error database {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parsed section/option/value source, in file order.
///
/// Option names are lower-cased. Values keep the newlines of continuation
/// lines; the database builder removes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniSource {
    defaults: Vec<(String, String)>,
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl IniSource {
    /// Read and parse a file. Malformed lines are logged and skipped.
    pub fn from_file(path: &Path) -> Result<Self, ErrDbError> {
        let text = std::fs::read_to_string(path).map_err(|source| ErrDbError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse section/option text.
    ///
    /// Accepts `key = value` and `key: value`, indented continuation lines,
    /// and `#`/`;` comment lines. A `;` preceded by whitespace starts an
    /// inline comment. Options in `[DEFAULT]` apply to every section.
    pub fn parse(text: &str) -> Self {
        let mut source = IniSource::default();
        // Some(None) while inside [DEFAULT]
        let mut current: Option<Option<usize>> = None;
        let mut last_option: Option<String> = None;

        for (idx, line) in text.lines().enumerate() {
            let lineno = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indented = line.starts_with(char::is_whitespace);
            if indented {
                if let (Some(section), Some(option)) = (current, last_option.as_deref()) {
                    if let Some(value) = source.value_mut(section, option) {
                        value.push('\n');
                        value.push_str(trimmed);
                    }
                    continue;
                }
            }

            if let Some(name) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                let name = name.trim();
                current = Some(if name == DEFAULT_SECTION {
                    None
                } else {
                    Some(source.section_index(name))
                });
                last_option = None;
                continue;
            }

            let Some(section) = current else {
                warn!(
                    target: event_names::ERRDB_INTEGRITY,
                    line = lineno,
                    "option outside of any section, skipped"
                );
                continue;
            };

            let Some(pos) = trimmed.find(&['=', ':'][..]) else {
                warn!(
                    target: event_names::ERRDB_INTEGRITY,
                    line = lineno,
                    content = trimmed,
                    "unparseable line, skipped"
                );
                continue;
            };

            let name = trimmed[..pos].trim().to_lowercase();
            if name.is_empty() {
                warn!(
                    target: event_names::ERRDB_INTEGRITY,
                    line = lineno,
                    "option without a name, skipped"
                );
                continue;
            }
            let value = strip_inline_comment(trimmed[pos + 1..].trim()).to_string();
            source.set(section, &name, value);
            last_option = Some(name);
        }

        source
    }

    /// Topic names in file order, excluding `[DEFAULT]`.
    pub fn sections(&self) -> Vec<&str> {
        self.sections.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|(n, _)| n == name)
    }

    /// Options of a section merged over the `[DEFAULT]` options.
    pub fn options(&self, section: &str) -> Option<Vec<(String, String)>> {
        let (_, own) = self.sections.iter().find(|(n, _)| n == section)?;
        let mut merged = self.defaults.clone();
        for (name, value) in own {
            match merged.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = value.clone(),
                None => merged.push((name.clone(), value.clone())),
            }
        }
        Some(merged)
    }

    fn section_index(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.sections.push((name.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        }
    }

    fn options_mut(&mut self, section: Option<usize>) -> &mut Vec<(String, String)> {
        match section {
            Some(idx) => &mut self.sections[idx].1,
            None => &mut self.defaults,
        }
    }

    fn set(&mut self, section: Option<usize>, name: &str, value: String) {
        let options = self.options_mut(section);
        match options.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => options.push((name.to_string(), value)),
        }
    }

    fn value_mut(&mut self, section: Option<usize>, name: &str) -> Option<&mut String> {
        self.options_mut(section)
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

fn strip_inline_comment(value: &str) -> &str {
    value
        .char_indices()
        .find(|&(i, c)| c == ';' && i > 0 && value[..i].ends_with(char::is_whitespace))
        .map(|(i, _)| value[..i].trim_end())
        .unwrap_or(value)
}

/// One compiled pattern.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    pub topic: String,
    pub name: String,
    pub severity: Severity,
    matcher: Regex,
}

impl ErrorPattern {
    pub fn is_match(&self, flattened: &str) -> bool {
        self.matcher.is_match(flattened)
    }

    pub fn as_str(&self) -> &str {
        self.matcher.as_str()
    }
}

/// A pattern that matched some text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchHit {
    pub topic: String,
    pub pattern: String,
    pub severity: Severity,
}

impl std::fmt::Display for MatchHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.topic, self.pattern, self.severity)
    }
}

/// Compiled pattern database, immutable after [`ErrorDatabase::build`].
#[derive(Debug, Clone, Default)]
pub struct ErrorDatabase {
    topics: HashMap<String, HashMap<String, ErrorPattern>>,
}

impl ErrorDatabase {
    /// Build from a parsed source, restricted to `topics` unless empty.
    ///
    /// Never fails: invalid entries are logged and dropped.
    pub fn build<S: AsRef<str>>(source: &IniSource, topics: &[S]) -> Self {
        let selected: Vec<&str> = if topics.is_empty() {
            source.sections()
        } else {
            topics.iter().map(AsRef::as_ref).collect()
        };

        let mut db = HashMap::new();
        for topic in selected {
            let Some(options) = source.options(topic) else {
                warn!(
                    target: event_names::ERRDB_INTEGRITY,
                    topic,
                    "requested topic not present in error database"
                );
                continue;
            };
            let patterns = build_topic(topic, options);
            if !patterns.is_empty() {
                db.insert(topic.to_string(), patterns);
            }
        }

        let database = ErrorDatabase { topics: db };
        debug!(
            target: event_names::ERRDB_LOADED,
            topics = database.topics.len(),
            patterns = database.len(),
            "error database built"
        );
        database
    }

    /// Read, parse and build a database file.
    ///
    /// An unreadable file yields an empty database and a warning, so that
    /// failures still classify as CRITICAL instead of aborting the run.
    pub fn load<S: AsRef<str>>(path: &Path, topics: &[S]) -> Self {
        match IniSource::from_file(path) {
            Ok(source) => Self::build(&source, topics),
            Err(err) => {
                warn!(target: event_names::ERRDB_INTEGRITY, error = %err, "using empty error database");
                Self::default()
            }
        }
    }

    /// Match `text` against the database.
    ///
    /// With `match_all == false` at most one hit is returned, the first one
    /// found in unspecified iteration order.
    pub fn matches(&self, text: &str, match_all: bool) -> Vec<MatchHit> {
        let flattened = text.replace('\n', " ");
        let mut hits = Vec::new();
        for pattern in self.topics.values().flat_map(HashMap::values) {
            if pattern.is_match(&flattened) {
                hits.push(MatchHit {
                    topic: pattern.topic.clone(),
                    pattern: pattern.name.clone(),
                    severity: pattern.severity,
                });
                if !match_all {
                    break;
                }
            }
        }
        hits
    }

    /// First match, if any.
    pub fn classify(&self, text: &str) -> Option<MatchHit> {
        self.matches(text, false).into_iter().next()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &ErrorPattern> {
        self.topics.values().flat_map(HashMap::values)
    }

    /// Number of patterns across all topics.
    pub fn len(&self) -> usize {
        self.topics.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

fn build_topic(topic: &str, options: Vec<(String, String)>) -> HashMap<String, ErrorPattern> {
    let values: HashMap<String, String> = options
        .into_iter()
        .map(|(name, value)| (name, value.replace('\n', "")))
        .collect();

    for name in values.keys() {
        if let Some(plain) = name.strip_suffix(STATUS_SUFFIX) {
            if !values.contains_key(plain) {
                warn!(
                    target: event_names::ERRDB_INTEGRITY,
                    topic,
                    option = name.as_str(),
                    "status option without a pattern option, dropped"
                );
            }
        }
    }

    let mut patterns = HashMap::new();
    for (name, value) in &values {
        if name.ends_with(STATUS_SUFFIX) || value.trim().is_empty() {
            continue;
        }

        let status_key = format!("{}{}", name, STATUS_SUFFIX);
        let severity = match values.get(&status_key).map(|s| s.trim()) {
            None | Some("") => DEFAULT_STATUS,
            Some(status) => match status.parse::<Severity>() {
                Ok(severity) => severity,
                Err(_) => {
                    warn!(
                        target: event_names::ERRDB_INTEGRITY,
                        topic,
                        option = status_key.as_str(),
                        status,
                        "unrecognised status, using CRITICAL"
                    );
                    DEFAULT_STATUS
                }
            },
        };

        let Some(matcher) = compile_alternation(value) else {
            warn!(
                target: event_names::ERRDB_INTEGRITY,
                topic,
                option = name.as_str(),
                "pattern has no usable alternatives, dropped"
            );
            continue;
        };

        patterns.insert(
            name.clone(),
            ErrorPattern {
                topic: topic.to_string(),
                name: name.clone(),
                severity,
                matcher,
            },
        );
    }
    patterns
}

/// Compile `a|b|c` into one case-insensitive search.
///
/// Each alternative is used as a regular expression when it parses as one
/// and as a literal otherwise. Blank alternatives are ignored so a trailing
/// `|` cannot turn the pattern into a match-everything.
fn compile_alternation(value: &str) -> Option<Regex> {
    let alternatives: Vec<String> = value
        .split('|')
        .filter(|piece| !piece.trim().is_empty())
        .map(|piece| {
            if Regex::new(piece).is_ok() {
                format!("(?:{})", piece)
            } else {
                format!("(?:{})", regex::escape(piece))
            }
        })
        .collect();

    if alternatives.is_empty() {
        return None;
    }
    Regex::new(&format!("(?i){}", alternatives.join("|"))).ok()
}
