//! Pure connection state management for MQTT sessions
//!
//! This module contains pure functions for connection state management,
//! reconnection policy and rumqttc option construction.

use crate::config::ClientOptions;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Connection state of a broker session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Broker acknowledged the connection
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - closed by the owner or retries exhausted
    Closed(String),
}

/// Reconnection policy: fixed delay between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before every reconnection attempt
    pub delay: Duration,
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn from_options(options: &ClientOptions) -> Self {
        Self::fixed(options.reconnect_delay).with_max_attempts(options.max_reconnect_attempts)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("No connection acknowledgement within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Publishing to '{topic}' failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Publishing to '{topic}' timed out after {timeout:?}")]
    PublishTimeout { topic: String, timeout: Duration },
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker rejected subscription to '{topic}': {reason}")]
    SubscriptionRejected { topic: String, reason: String },
    #[error("No SubAck for '{topic}' within {timeout:?}")]
    SubscribeTimeout { topic: String, timeout: Duration },
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Client for topic '{0}' is closed")]
    Closed(String),
}

/// Fresh client identifier for every connection, so sessions never collide on the broker
pub fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}

/// Pure function to configure rumqttc options from the shared client options
pub fn configure_mqtt_options(client_id: &str, options: &ClientOptions) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(client_id, options.host.clone(), options.port);

    if options.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &options.username {
        let password = options.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_start(true);

    mqtt_options
}
