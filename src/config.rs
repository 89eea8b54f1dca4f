//! Configuration system for the presence client
//!
//! Configuration is loaded from a TOML file and validated once at startup.
//! Credentials are never stored here; only the names of the environment
//! variables that hold them.

use crate::protocol::{validate_client_id, validate_topic, GeoPoint};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main presence client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceConfig {
    pub client: ClientSection,
    pub mqtt: MqttSection,
    pub topics: TopicsSection,
    #[serde(default)]
    pub timing: TimingSection,
    /// Static location attached to presence messages (optional)
    pub geo: Option<GeoPoint>,
}

/// Client section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Prefix for the generated client identity (must match [a-zA-Z0-9._-]+)
    pub id_prefix: String,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keep alive interval in seconds (default: 30)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Time allowed for ConnAck before an attempt fails (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// Topic section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    /// Base status topic for presence messages
    pub status: String,
    /// Command topic subscribed after every successful connect
    pub command: String,
    /// Suffix the status topic with the client identity (default: true)
    #[serde(default = "default_per_instance_status")]
    pub per_instance_status: bool,
}

fn default_per_instance_status() -> bool {
    true
}

/// Timer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSection {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_presence_debounce_ms")]
    pub presence_debounce_ms: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_presence_debounce_ms() -> u64 {
    500
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            presence_debounce_ms: default_presence_debounce_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl TimingSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn presence_debounce(&self) -> Duration {
        Duration::from_millis(self.presence_debounce_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid client ID prefix: {0}")]
    InvalidIdPrefix(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PresenceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PresenceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field the coordinator relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.client.id_prefix).map_err(|e| {
            ConfigError::InvalidIdPrefix(format!(
                "'{}' must match pattern [a-zA-Z0-9._-]+ ({e})",
                self.client.id_prefix
            ))
        })?;

        for topic in [&self.topics.status, &self.topics.command] {
            validate_topic(topic).map_err(|e| ConfigError::InvalidTopic(e.to_string()))?;
        }

        let url = Url::parse(&self.mqtt.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.mqtt.broker_url.clone()))?;
        if !matches!(url.scheme(), "mqtt" | "mqtts") || url.host_str().is_none() {
            return Err(ConfigError::InvalidBrokerUrl(self.mqtt.broker_url.clone()));
        }

        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let timing = &self.timing;
        if timing.reconnect_delay_ms == 0
            || timing.presence_debounce_ms == 0
            || timing.heartbeat_interval_secs == 0
        {
            return Err(ConfigError::InvalidConfig(
                "timing values must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[client]
id_prefix = "test-device"

[mqtt]
broker_url = "mqtt://localhost:1883"

[topics]
status = "clients/status"
command = "clients/commands"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
