//! Configuration for the demo session.

use std::env;
use std::time::Duration;

use tasksync_engine::EngineConfig;

/// Demo configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// User the demo sessions sign in as
    pub user_id: String,
    /// List the scoped collection tracks
    pub list_id: String,
    /// How long to wait for notifications to settle between steps
    pub settle: Duration,
    /// Engine naming (table, channel prefix, temp-id prefix)
    pub engine: EngineConfig,
}

impl DemoConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let user_id = env::var("DEMO_USER_ID").unwrap_or_else(|_| "demo-user".to_string());
        let list_id = env::var("DEMO_LIST_ID").unwrap_or_else(|_| "groceries".to_string());

        let settle_ms: u64 = env::var("DEMO_SETTLE_MS")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidSettle)?;

        let engine = EngineConfig::from_env()?;

        Ok(Self {
            user_id,
            list_id,
            settle: Duration::from_millis(settle_ms),
            engine,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid DEMO_SETTLE_MS value")]
    InvalidSettle,

    #[error(transparent)]
    Engine(#[from] tasksync_engine::ConfigError),
}
