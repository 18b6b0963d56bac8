//! Daemon configuration
//!
//! Layered: environment defaults, then an optional TOML file, then CLI flags
//! (applied by `main`). Missing keys in the file keep their env/default value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tasker::SchedulerConfig;
use thiserror::Error;

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Chat bridge endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatBridgeConfig {
    pub url: String,
    /// Bearer token forwarded to the bridge
    pub token: Option<String>,
    /// Channel that receives dispositions
    pub reporting_channel: String,
}

impl Default for ChatBridgeConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("SECURITYBOT_CHAT_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".into()),
            token: std::env::var("SLACK_API_TOKEN").ok(),
            reporting_channel: std::env::var("REPORTING_CHANNEL")
                .unwrap_or_else(|_| "security-alerts".into()),
        }
    }
}

/// Push-auth bridge endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthBridgeConfig {
    pub url: String,
    pub integration_key: String,
    pub secret_key: String,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Seconds between scheduler ticks
    pub tick_interval_secs: u64,
    /// Bound on each store call
    pub store_timeout_secs: u64,
    /// Bound on each chat/auth call
    pub collaborator_timeout_secs: u64,
    /// Record a no-response default after this long (unset = wait forever)
    pub response_timeout_secs: Option<u64>,
    /// RocksDB directory (requires the `heavy-state` feature)
    pub state_path: Option<PathBuf>,
    /// Listen address of the HTTP API served by `run`
    pub api_addr: String,
    pub chat: ChatBridgeConfig,
    /// Push-auth corroboration; disabled when unset
    pub auth: Option<AuthBridgeConfig>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: env_u64("SECURITYBOT_TICK_SECS").unwrap_or(5),
            store_timeout_secs: env_u64("SECURITYBOT_STORE_TIMEOUT_SECS").unwrap_or(10),
            collaborator_timeout_secs: env_u64("SECURITYBOT_COLLAB_TIMEOUT_SECS").unwrap_or(30),
            response_timeout_secs: env_u64("SECURITYBOT_RESPONSE_TIMEOUT_SECS"),
            state_path: std::env::var("SECURITYBOT_STATE_PATH").ok().map(PathBuf::from),
            api_addr: std::env::var("SECURITYBOT_API_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8888".into()),
            chat: ChatBridgeConfig::default(),
            auth: Self::auth_from_env(),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

impl BotConfig {
    /// Environment defaults only
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Auth is enabled only when all three `DUO_*` variables are set.
    fn auth_from_env() -> Option<AuthBridgeConfig> {
        let integration_key = std::env::var("DUO_INTEGRATION_KEY").ok()?;
        let secret_key = std::env::var("DUO_SECRET_KEY").ok()?;
        let url = std::env::var("DUO_ENDPOINT").ok()?;
        Some(AuthBridgeConfig {
            url,
            integration_key,
            secret_key,
        })
    }

    /// Parse a TOML document over the environment defaults.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            let config = Self::from_env();
            config.validate()?;
            return Ok(config);
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("tick_interval_secs must be positive".into()));
        }
        if self.store_timeout_secs == 0 || self.collaborator_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.api_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "api_addr must be host:port, got {:?}",
                self.api_addr
            )));
        }
        if self.chat.url.trim().is_empty() {
            return Err(ConfigError::Invalid("chat.url must be set".into()));
        }
        if let Some(auth) = &self.auth {
            if auth.url.trim().is_empty() || auth.integration_key.is_empty() {
                return Err(ConfigError::Invalid("auth requires url and integration_key".into()));
            }
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            collaborator_timeout: Duration::from_secs(self.collaborator_timeout_secs),
            response_timeout: self.response_timeout_secs.map(Duration::from_secs),
            store_timeout: self.store_timeout(),
        }
    }
}
