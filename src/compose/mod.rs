//! Command composition: turns container and batch-job option mappings into
//! command-line fragments for `docker run`, `singularity run` and `srun`.
//!
//! Every function here is pure. Fragments are joined with single spaces by
//! the caller to form a shell command line.

pub mod container;
pub mod slurm;

use serde_yaml::{Mapping, Value};
use thiserror::Error;

pub use container::{container_args, run_flags, Runtime};
pub use slurm::{batch_flags, build_command};

/// Errors raised while composing a command from configuration
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("Missing mandatory option '{0}'")]
    MissingOption(String),

    #[error(
        "Unsupported option '{0}'. Only environment, volumes, ports, image, commands, \
         working_dir and container_name are supported."
    )]
    UnsupportedOption(String),

    #[error("Cannot override option '{0}': it is not present in the configuration")]
    UnknownOverride(String),

    #[error("Invalid value for option '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ComposeError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// An ordered option mapping as read from the configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSet(Mapping);

impl OptionSet {
    pub fn new(mapping: Mapping) -> Self {
        Self(mapping)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.0.iter()
    }

    /// Return a copy with `overrides` substituted in place and `ignore`d keys
    /// removed. Overriding a key that is not already present is an error;
    /// ignoring an absent key is not.
    pub fn with_overrides(
        &self,
        overrides: &[(&str, Value)],
        ignore: &[&str],
    ) -> Result<Self, ComposeError> {
        let mut mapping = self.0.clone();

        for (key, value) in overrides {
            match mapping.get_mut(*key) {
                Some(slot) => *slot = value.clone(),
                None => return Err(ComposeError::UnknownOverride(key.to_string())),
            }
        }

        let mapping = mapping
            .into_iter()
            .filter(|(key, _)| !key.as_str().is_some_and(|k| ignore.contains(&k)))
            .collect();

        Ok(Self(mapping))
    }
}

impl From<Mapping> for OptionSet {
    fn from(mapping: Mapping) -> Self {
        Self::new(mapping)
    }
}

/// Option keys must be strings.
pub(crate) fn option_name(key: &Value) -> Result<&str, ComposeError> {
    key.as_str()
        .ok_or_else(|| ComposeError::UnsupportedOption(display_value(key)))
}

/// Render a scalar YAML value as text. Sequences and mappings are rejected.
pub(crate) fn scalar(key: &str, value: &Value) -> Result<String, ComposeError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(v) => Ok(v.to_string()),
        Value::Number(v) => Ok(v.to_string()),
        Value::String(v) => Ok(v.clone()),
        Value::Tagged(tagged) => scalar(key, &tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => {
            Err(ComposeError::invalid(key, "expected a scalar value"))
        }
    }
}

/// Render a sequence of scalars, e.g. `volumes` or `commands`.
pub(crate) fn string_list(key: &str, value: &Value) -> Result<Vec<String>, ComposeError> {
    match value {
        Value::Sequence(items) => items.iter().map(|item| scalar(key, item)).collect(),
        _ => Err(ComposeError::invalid(key, "expected a list")),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        _ => serde_yaml::to_string(value)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Shell-escape a string for safe inclusion in a shell command
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().any(|c| " \t\n\"'\\$`!*?[]{}();<>&|#~".contains(c)) {
        format!("'{}'", s.replace('\'', "'\\''"))
    } else {
        s.to_string()
    }
}
