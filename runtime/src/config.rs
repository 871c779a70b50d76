//! Registry configuration.
//!
//! # Example
//!
//! ```
//! use rendezvous_runtime::config::RegistryConfig;
//!
//! let config = RegistryConfig::default()
//!     .with_capture_traces(false)
//!     .with_timeout_label("ORIGIN");
//!
//! assert!(!config.capture_traces);
//! assert_eq!(config.timeout_label, "ORIGIN");
//! ```

use rendezvous_core::DEFAULT_SEPARATOR;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable toggling creation-trace capture
pub const ENV_CAPTURE_TRACES: &str = "RENDEZVOUS_CAPTURE_TRACES";

/// Environment variable overriding the timeout splice label
pub const ENV_TIMEOUT_LABEL: &str = "RENDEZVOUS_TIMEOUT_LABEL";

/// Environment variable overriding the splice separator
pub const ENV_SEPARATOR: &str = "RENDEZVOUS_TRACE_SEPARATOR";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to a value that cannot be parsed
    #[error("Invalid value '{value}' for {var}")]
    InvalidValue {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },
}

/// Configuration for a [`PendingRegistry`](crate::registry::PendingRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Capture a creation trace for every operation.
    ///
    /// Disabling this makes `create` cheaper; timeout errors then carry only
    /// the separator line.
    pub capture_traces: bool,
    /// Label spliced between the timer trace and the creation trace
    pub timeout_label: String,
    /// Separator wrapped around the label
    pub separator: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capture_traces: true,
            timeout_label: "CREATE".to_string(),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl RegistryConfig {
    /// Enable or disable creation-trace capture
    #[must_use]
    pub const fn with_capture_traces(mut self, capture: bool) -> Self {
        self.capture_traces = capture;
        self
    }

    /// Set the timeout splice label
    #[must_use]
    pub fn with_timeout_label(mut self, label: impl Into<String>) -> Self {
        self.timeout_label = label.into();
        self
    }

    /// Set the splice separator
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Load from `RENDEZVOUS_*` environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a boolean variable is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a boolean variable is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_CAPTURE_TRACES) {
            config.capture_traces = parse_bool(ENV_CAPTURE_TRACES, &value)?;
        }
        if let Some(label) = lookup(ENV_TIMEOUT_LABEL) {
            config.timeout_label = label;
        }
        if let Some(separator) = lookup(ENV_SEPARATOR) {
            config.separator = separator;
        }

        Ok(config)
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert!(config.capture_traces);
        assert_eq!(config.timeout_label, "CREATE");
        assert_eq!(config.separator, "--------");
    }

    #[test]
    fn test_from_lookup_without_variables_is_default() {
        let config = RegistryConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RegistryConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RegistryConfig::from_lookup(lookup(&[
            (ENV_CAPTURE_TRACES, "off"),
            (ENV_TIMEOUT_LABEL, "ORIGIN"),
            (ENV_SEPARATOR, "=="),
        ]))
        .unwrap();

        assert!(!config.capture_traces);
        assert_eq!(config.timeout_label, "ORIGIN");
        assert_eq!(config.separator, "==");
    }

    #[test]
    fn test_from_lookup_rejects_malformed_bool() {
        let err = RegistryConfig::from_lookup(lookup(&[(ENV_CAPTURE_TRACES, "maybe")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: ENV_CAPTURE_TRACES.to_string(),
                value: "maybe".to_string(),
            }
        );
    }
}
