use muse_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable holding the bot token
pub const TOKEN_ENV: &str = "TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarMissing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Token from .env (not in YAML)
    #[serde(skip)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Initial gateway URL; READY may replace it at runtime
    pub url: String,
    /// REST API base URL
    pub api_url: String,
    pub intents: u64,
    pub reconnect_interval_ms: u64,
    /// Upper bound on one reactor wait
    pub poll_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
            api_url: "https://discord.com/api/v10".to_string(),
            // GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
            intents: (1 << 0) | (1 << 9) | (1 << 15),
            reconnect_interval_ms: 5000,
            poll_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_agent: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agent: "Muse (https://github.com/DaCurse/muse, 1.0)".to_string(),
            browser: "muse".to_string(),
            device: "muse".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            handshake_timeout_ms: 10_000,
            max_redirects: 10,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            identity: IdentityConfig::default(),
            http: HttpConfig::default(),
            log_level: default_log_level(),
            token: String::new(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file, token from the environment
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml(&yaml_content)?;

        config.token = std::env::var(TOKEN_ENV)
            .map_err(|_| ConfigError::EnvVarMissing(TOKEN_ENV.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without touching the environment
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::ValidationError("token must not be empty".to_string()));
        }

        if self.gateway.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "gateway.url must not be empty".to_string(),
            ));
        }

        if self.identity.user_agent.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "identity.user_agent must not be empty".to_string(),
            ));
        }

        if self.gateway.reconnect_interval_ms == 0 || self.gateway.poll_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "gateway intervals must be greater than 0".to_string(),
            ));
        }

        if self.http.connect_timeout_ms == 0
            || self.http.request_timeout_ms == 0
            || self.http.handshake_timeout_ms == 0
        {
            return Err(ConfigError::ValidationError(
                "http timeouts must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.gateway.reconnect_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.poll_timeout_ms)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::new(&self.identity.user_agent)
            .with_connect_timeout(Duration::from_millis(self.http.connect_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.http.request_timeout_ms))
            .with_handshake_timeout(Duration::from_millis(self.http.handshake_timeout_ms))
            .with_max_redirects(self.http.max_redirects)
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!("  Gateway URL: {}", self.gateway.url);
        info!("  API URL: {}", self.gateway.api_url);
        info!("  Intents: {}", self.gateway.intents);
        info!("  Reconnect interval: {} ms", self.gateway.reconnect_interval_ms);
        info!("  User agent: {}", self.identity.user_agent);
        info!("  Log level: {}", self.log_level);
    }
}
