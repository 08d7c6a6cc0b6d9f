//! Client configuration
//!
//! Defaults, then an optional TOML file, then `SIGNON_*` environment
//! variables. Call [`ClientConfig::validate`] after merging; the client
//! constructors do so as well.

use crate::errors::{Result, SignonError};
use crate::types::SecurityContext;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Well-known bus name of the signon daemon
pub const DEFAULT_SERVICE_NAME: &str = "com.google.code.AccountsSSO.SingleSignOn";

/// Object path of the daemon's service object
pub const DEFAULT_OBJECT_PATH: &str = "/com/google/code/AccountsSSO/SingleSignOn";

/// Prefix of the environment variables read by [`ClientConfig::merge_with_env`]
pub const ENV_PREFIX: &str = "SIGNON_";

/// Configuration shared by every handle created from one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Context sent with every registration request
    pub security_context: SecurityContext,
    /// Automatic retries of a registration that failed because the daemon
    /// was not yet on the bus. Spent once per handle lifetime.
    pub transient_retries: u32,
    /// Capacity of the per-handle event channels
    pub event_buffer: usize,
    pub service_name: String,
    pub object_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            security_context: SecurityContext::from_values(None, Some("*")),
            transient_retries: 1,
            event_buffer: 64,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            object_path: DEFAULT_OBJECT_PATH.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SignonError::invalid_config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        toml::from_str(&content)
            .map_err(|e| SignonError::invalid_config(format!("Invalid TOML: {}", e)))
    }

    /// Merge `SIGNON_*` variables from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Merge `SIGNON_*` entries from an arbitrary variable list.
    ///
    /// Variables without the prefix are ignored, unknown keys are rejected.
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            if let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) {
                self.set_from_string(&name.to_lowercase(), value.as_ref())?;
            }
        }
        Ok(())
    }

    /// Set one value by its snake_case key
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "system_context" => self.security_context.system_context = value.to_string(),
            "application_context" => {
                self.security_context.application_context = value.to_string()
            }
            "transient_retries" => self.transient_retries = parse_number(key, value)?,
            "event_buffer" => self.event_buffer = parse_number(key, value)?,
            "service_name" => self.service_name = value.to_string(),
            "object_path" => self.object_path = value.to_string(),
            _ => {
                return Err(SignonError::invalid_config(format!(
                    "Unknown configuration key: {}",
                    key
                )))
            }
        }
        Ok(())
    }

    /// Overlay every field of `other` that differs from the default
    pub fn merge_with(&mut self, other: &Self) {
        let defaults = Self::default();
        if other.security_context != defaults.security_context {
            self.security_context = other.security_context.clone();
        }
        if other.transient_retries != defaults.transient_retries {
            self.transient_retries = other.transient_retries;
        }
        if other.event_buffer != defaults.event_buffer {
            self.event_buffer = other.event_buffer;
        }
        if other.service_name != defaults.service_name {
            self.service_name = other.service_name.clone();
        }
        if other.object_path != defaults.object_path {
            self.object_path = other.object_path.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(SignonError::invalid_config(
                "event_buffer must be greater than zero",
            ));
        }
        if self.service_name.is_empty() {
            return Err(SignonError::invalid_config("service_name cannot be empty"));
        }
        if !self.object_path.starts_with('/') {
            return Err(SignonError::invalid_config(format!(
                "object_path must be absolute, got {:?}",
                self.object_path
            )));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        SignonError::invalid_config(format!("{} expects a number, got {:?}", key, value))
    })
}
