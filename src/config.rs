use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    pub bot: BotConfig,
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub bot_token: String,
    #[serde(default = "default_use_privileged_intents")]
    pub use_privileged_intents: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotConfig {
    /// Channel every notification and alert is mirrored to.
    pub log_channel_id: u64,
    #[serde(default = "default_connected_message")]
    pub connected_message: String,
    #[serde(default = "default_mention_response")]
    pub mention_response: String,
}

/// A named membership level gated by a minimum donation amount.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TierConfig {
    pub name: String,
    pub min_amount: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
    /// Local hour of day (0-23) the expiration sweep runs at.
    #[serde(default = "default_sweep_hour")]
    pub hour: u32,
    /// Days between sweeps.
    #[serde(default = "default_sweep_interval_days")]
    pub interval_days: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            hour: default_sweep_hour(),
            interval_days: default_sweep_interval_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.bot_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_token cannot be empty".to_string(),
            ));
        }

        if self.bot.log_channel_id == 0 {
            return Err(ConfigError::InvalidConfig(
                "bot.log_channel_id cannot be zero".to_string(),
            ));
        }

        if self.tiers.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one tier must be configured".to_string(),
            ));
        }

        if self.sweep.hour > 23 {
            return Err(ConfigError::InvalidConfig(
                "sweep.hour must be between 0 and 23".to_string(),
            ));
        }

        if self.sweep.interval_days < 1 {
            return Err(ConfigError::InvalidConfig(
                "sweep.interval_days must be at least 1".to_string(),
            ));
        }

        // Duplicate thresholds are legal; the last configured tier wins.
        for (i, tier) in self.tiers.iter().enumerate() {
            if self.tiers[..i]
                .iter()
                .any(|t| t.min_amount == tier.min_amount)
            {
                warn!(
                    "tiers {:?} share min_amount {}; the last configured one wins",
                    tier.name, tier.min_amount
                );
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("KOFI_BRIDGE_BOT_TOKEN") {
            self.auth.bot_token = value;
        }
    }
}

fn default_use_privileged_intents() -> bool {
    true
}

fn default_connected_message() -> String {
    ":white_check_mark: Donation bridge connected and listening.".to_string()
}

fn default_mention_response() -> String {
    "I'm watching for Ko-fi donations and keeping membership roles in sync.".to_string()
}

fn default_store_path() -> String {
    "database.json".to_string()
}

fn default_sweep_hour() -> u32 {
    6
}

fn default_sweep_interval_days() -> i64 {
    1
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
