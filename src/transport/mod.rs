//! Transport abstraction for topic clients
//!
//! A [`Connector`] opens broker [`Session`]s; the rumqttc-backed
//! implementation lives in [`mqtt`]. Topic clients only talk to these traits,
//! which keeps the lifecycle logic testable without a broker.

use crate::config::ClientOptions;
use crate::error::ExtensionResult;
use crate::message::{MqttMessage, QoS};
use std::time::Duration;
use tokio::sync::mpsc;

pub mod mqtt;

use mqtt::{ConnectionState, MqttError};

/// Channel on which a session delivers inbound publishes
pub type InboundSender = mpsc::Sender<MqttMessage>;

/// Opens broker connections
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect with the given client identifier and wait for the broker to
    /// acknowledge, bounded by `options.connect_timeout`
    async fn connect(
        &self,
        options: &ClientOptions,
        client_id: &str,
        inbound: InboundSender,
    ) -> Result<Box<dyn Session>, MqttError>;
}

/// One live broker connection
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Subscribe once the broker accepts the filter, and keep the subscription across reconnects
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError>;

    /// Hand one message to the client for delivery using its own topic, QoS and retain flag
    async fn publish(&self, message: &MqttMessage) -> Result<(), MqttError>;

    /// Disconnect and stop reconnecting
    async fn disconnect(&self) -> Result<(), MqttError>;

    fn connection_state(&self) -> ConnectionState;

    /// Wait until the connection is usable again, or fail after `timeout`
    async fn wait_connected(&self, timeout: Duration) -> Result<(), MqttError>;
}

/// Anything that can publish a batch of messages
///
/// Implemented by [`TopicClient`](mqtt::TopicClient); output collectors depend
/// only on this trait.
#[async_trait::async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, messages: Vec<MqttMessage>) -> ExtensionResult<()>;
}
