//! Engine configuration.

use std::env;

/// Names and prefixes the engine uses when talking to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Table holding task rows
    pub table: String,
    /// Prefix for notification channel keys
    pub channel_prefix: String,
    /// Channel key token for the unscoped collection
    pub unscoped_token: String,
    /// Prefix marking temporary record identifiers
    pub temp_id_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            table: "todos".to_string(),
            channel_prefix: "todos-channel".to_string(),
            unscoped_token: "all-items".to_string(),
            temp_id_prefix: "temp-".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &'static str, default: String| match lookup(key) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::Empty(key)),
            Some(value) => Ok(value),
            None => Ok(default),
        };

        let unscoped_token = read("TASKSYNC_UNSCOPED_TOKEN", defaults.unscoped_token)?;
        // List channel keys are tagged with `list:`; a colon here could collide.
        if unscoped_token.contains(':') {
            return Err(ConfigError::Invalid("TASKSYNC_UNSCOPED_TOKEN", "must not contain ':'"));
        }

        Ok(Self {
            table: read("TASKSYNC_TABLE", defaults.table)?,
            channel_prefix: read("TASKSYNC_CHANNEL_PREFIX", defaults.channel_prefix)?,
            unscoped_token,
            temp_id_prefix: read("TASKSYNC_TEMP_PREFIX", defaults.temp_id_prefix)?,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_keys_use_defaults() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let vars: HashMap<&str, &str> = [
            ("TASKSYNC_TABLE", "tasks"),
            ("TASKSYNC_CHANNEL_PREFIX", "tasks-channel"),
        ]
        .into_iter()
        .collect();

        let config =
            EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.table, "tasks");
        assert_eq!(config.channel_prefix, "tasks-channel");
        assert_eq!(config.unscoped_token, "all-items");
    }

    #[test]
    fn empty_values_are_rejected() {
        let err = EngineConfig::from_lookup(|key| {
            (key == "TASKSYNC_TEMP_PREFIX").then(|| "  ".to_string())
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::Empty("TASKSYNC_TEMP_PREFIX"));
        assert_eq!(err.to_string(), "TASKSYNC_TEMP_PREFIX must not be empty");
    }

    #[test]
    fn unscoped_token_cannot_contain_colon() {
        let err = EngineConfig::from_lookup(|key| {
            (key == "TASKSYNC_UNSCOPED_TOKEN").then(|| "list:x".to_string())
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "TASKSYNC_UNSCOPED_TOKEN must not contain ':'"
        );
    }
}
