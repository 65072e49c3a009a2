//! Static check metadata.
//!
//! A [`CheckDescriptor`] is built once when a check is registered and is
//! read-only afterwards. Descriptors deserialize directly from the
//! `[[checks]]` tables of the probe configuration.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_locality() -> String {
    "remote".to_string()
}

fn default_type() -> String {
    "status".to_string()
}

/// A command-line option understood by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliOption {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

/// Metadata describing one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDescriptor {
    /// Unique within a dispatcher.
    pub name: String,

    #[serde(default = "default_locality")]
    pub locality: String,

    #[serde(default = "default_type", rename = "type")]
    pub check_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub options: Vec<CliOption>,

    /// Checks masked when this one fails.
    #[serde(default)]
    pub children: Vec<String>,

    /// Ordered checks run by a wrapper check.
    #[serde(default)]
    pub order: Vec<String>,

    /// Whether a failure of this check may worsen its parent's composite.
    #[serde(default)]
    pub critical: bool,

    /// Status-message templates keyed by severity name.
    #[serde(default)]
    pub status_messages: BTreeMap<String, String>,
}

impl CheckDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locality: default_locality(),
            check_type: default_type(),
            description: String::new(),
            options: Vec::new(),
            children: Vec::new(),
            order: Vec::new(),
            critical: false,
            status_messages: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_locality(mut self, locality: impl Into<String>) -> Self {
        self.locality = locality.into();
        self
    }

    pub fn with_type(mut self, check_type: impl Into<String>) -> Self {
        self.check_type = check_type.into();
        self
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, required: bool) -> Self {
        self.options.push(CliOption {
            name: name.into(),
            required,
        });
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_status_message(mut self, severity: Severity, template: impl Into<String>) -> Self {
        self.status_messages
            .insert(severity.as_str().to_string(), template.into());
        self
    }

    /// Template for a severity; keys are matched case-insensitively.
    pub fn status_message(&self, severity: Severity) -> Option<&str> {
        self.status_messages
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(severity.as_str()))
            .map(|(_, v)| v.as_str())
    }

    /// A node check masks its children when it fails.
    pub fn is_node(&self) -> bool {
        !self.children.is_empty()
    }

    /// A wrapper check runs `order` through the aggregator.
    pub fn is_wrapper(&self) -> bool {
        !self.order.is_empty()
    }

    pub fn required_options(&self) -> impl Iterator<Item = &CliOption> {
        self.options.iter().filter(|o| o.required)
    }

    /// `key: value` pairs used when listing checks.
    pub fn listing(&self) -> Vec<(&'static str, String)> {
        vec![
            ("checkName", self.name.clone()),
            ("checkLocality", self.locality.clone()),
            ("checkType", self.check_type.clone()),
            ("checkDescription", self.description.clone()),
        ]
    }
}
