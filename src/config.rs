//! Configuration for the MQTT binding extension
//!
//! The host reads a TOML file with an `[mqtt]` section describing the broker
//! connection and any number of `[[functions]]` declaring trigger and output
//! bindings. Credentials are never stored in the file; the section names the
//! environment variables that hold them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Complete host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub functions: Vec<FunctionConfig>,
}

/// Broker connection section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_tls")]
    pub tls: bool,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnection attempts
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Upper bound on waiting for the broker's ConnAck
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound on a whole publish batch and on close
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Give up after this many consecutive failed reconnections; unset retries forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_port() -> u16 {
    8883
}

fn default_tls() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

/// One handler declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionConfig {
    pub name: String,
    pub trigger_topic: String,
    /// Declared parameter shape: "message", "string" or "binary"
    #[serde(default = "default_data_type")]
    pub data_type: String,
    pub output_topic: Option<String>,
}

fn default_data_type() -> String {
    "message".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HostConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt.validate()?;

        let mut names = HashSet::new();
        for function in &self.functions {
            if function.name.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "function name cannot be empty".to_string(),
                ));
            }
            if !names.insert(function.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate function name '{}'",
                    function.name
                )));
            }
            if function.trigger_topic.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "function '{}' has an empty trigger_topic",
                    function.name
                )));
            }
            if matches!(&function.output_topic, Some(topic) if topic.trim().is_empty()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "function '{}' has an empty output_topic",
                    function.name
                )));
            }
        }

        Ok(())
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.port must be greater than 0".to_string(),
            ));
        }
        if self.keep_alive_secs != 0 && self.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be 0 (disabled) or at least 5".to_string(),
            ));
        }
        if self.max_reconnect_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "mqtt.max_reconnect_attempts must be greater than 0 when set".to_string(),
            ));
        }
        for (field, value) in [
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("publish_timeout_ms", self.publish_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "mqtt.{field} must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn username(&self) -> Option<String> {
        Self::get_env_var_optional(self.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn password(&self) -> Option<String> {
        Self::get_env_var_optional(self.password_env.as_ref())
    }

    /// Resolve credentials and build the shared connection options
    ///
    /// A configured `username_env` that is missing from the environment is an
    /// error; a missing password resolves to none.
    pub fn client_options(&self) -> Result<ClientOptions, ConfigError> {
        self.validate()?;

        let username = match &self.username_env {
            Some(name) => Some(
                self.username()
                    .ok_or_else(|| ConfigError::EnvVarNotFound(name.clone()))?,
            ),
            None => None,
        };

        Ok(ClientOptions {
            host: self.host.clone(),
            port: self.port,
            username,
            password: self.password(),
            tls: self.tls,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
        })
    }
}

/// Connection parameters shared by every topic client
///
/// Built once, wrapped in an [`Arc`] by the pool and borrowed by each client.
#[derive(Clone, PartialEq)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub max_reconnect_attempts: Option<u32>,
}

impl ClientOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: default_tls(),
            keep_alive: Duration::from_secs(default_keep_alive_secs()),
            reconnect_delay: Duration::from_millis(default_reconnect_delay_ms()),
            connect_timeout: Duration::from_millis(default_connect_timeout_ms()),
            publish_timeout: Duration::from_millis(default_publish_timeout_ms()),
            max_reconnect_attempts: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, publish_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Stop reconnecting after `max_attempts` consecutive failures; `None` retries forever
    pub fn with_max_reconnect_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tls", &self.tls)
            .field("keep_alive", &self.keep_alive)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("connect_timeout", &self.connect_timeout)
            .field("publish_timeout", &self.publish_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[mqtt]
host = "broker.example.com"
port = 8883
username_env = "MQTT_BINDINGS_TEST_USER"
password_env = "MQTT_BINDINGS_TEST_PASS"
reconnect_delay_ms = 2000

[[functions]]
name = "echo"
trigger_topic = "topic/one"
data_type = "string"
output_topic = "topic/two"

[[functions]]
name = "raw"
trigger_topic = "topic/#"
data_type = "binary"
"#;

    #[test]
    fn test_full_config() {
        let config = HostConfig::from_toml_str(FULL_CONFIG).unwrap();
        assert_eq!(config.mqtt.host, "broker.example.com");
        assert_eq!(config.mqtt.reconnect_delay_ms, 2000);
        assert_eq!(config.functions.len(), 2);
        assert_eq!(config.functions[0].output_topic.as_deref(), Some("topic/two"));
        assert_eq!(config.functions[1].output_topic, None);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"
"#,
        )
        .unwrap();

        assert_eq!(config.mqtt.port, 8883);
        assert!(config.mqtt.tls);
        assert_eq!(config.mqtt.reconnect_delay_ms, 5000);
        assert_eq!(config.mqtt.connect_timeout_ms, 10_000);
        assert_eq!(config.mqtt.publish_timeout_ms, 5000);
        assert_eq!(config.mqtt.max_reconnect_attempts, None);
        assert!(config.functions.is_empty());
    }

    #[test]
    fn test_function_data_type_defaults_to_message() {
        let config = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"

[[functions]]
name = "f"
trigger_topic = "a/b"
"#,
        )
        .unwrap();
        assert_eq!(config.functions[0].data_type, "message");
    }

    #[test]
    fn test_empty_host_rejected() {
        let result = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "  "
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"
publish_timeout_ms = 0
"#,
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("publish_timeout_ms"));
    }

    #[test]
    fn test_max_reconnect_attempts() {
        let config = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"
max_reconnect_attempts = 3
"#,
        )
        .unwrap();
        assert_eq!(config.mqtt.max_reconnect_attempts, Some(3));
        assert_eq!(
            config.mqtt.client_options().unwrap().max_reconnect_attempts,
            Some(3)
        );

        let zero = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"
max_reconnect_attempts = 0
"#,
        );
        assert!(matches!(zero, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_short_keep_alive_rejected() {
        let result = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"
keep_alive_secs = 2
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));

        let disabled = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"
keep_alive_secs = 0
"#,
        );
        assert!(disabled.is_ok());
    }

    #[test]
    fn test_duplicate_function_names_rejected() {
        let result = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"

[[functions]]
name = "f"
trigger_topic = "a"

[[functions]]
name = "f"
trigger_topic = "b"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_trigger_topic_rejected() {
        let result = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"

[[functions]]
name = "f"
trigger_topic = ""
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let result = HostConfig::from_toml_str("[mqtt\nhost = ");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_client_options_missing_username_env() {
        let config = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"
username_env = "MQTT_BINDINGS_SURELY_UNSET_VAR"
"#,
        )
        .unwrap();

        let result = config.mqtt.client_options();
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
    }

    #[test]
    fn test_client_options_resolves_credentials_from_env() {
        std::env::set_var("MQTT_BINDINGS_UNIT_USER", "sensor-7");
        let config = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"
username_env = "MQTT_BINDINGS_UNIT_USER"
password_env = "MQTT_BINDINGS_UNIT_PASS_UNSET"
"#,
        )
        .unwrap();

        assert_eq!(config.mqtt.username().as_deref(), Some("sensor-7"));
        let options = config.mqtt.client_options().unwrap();
        assert_eq!(options.username.as_deref(), Some("sensor-7"));
        assert_eq!(options.password, None);
    }

    #[test]
    fn test_client_options_without_credentials() {
        let config = HostConfig::from_toml_str(
            r#"
[mqtt]
host = "localhost"
port = 1883
tls = false
"#,
        )
        .unwrap();

        let options = config.mqtt.client_options().unwrap();
        assert_eq!(options.host, "localhost");
        assert_eq!(options.port, 1883);
        assert!(!options.tls);
        assert_eq!(options.username, None);
        assert_eq!(options.publish_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_debug_redacts_password() {
        let options = ClientOptions::new("localhost", 1883).with_credentials("user", "hunter2");
        let rendered = format!("{options:?}");
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
