//! MQTT topic clients and the rumqttc-backed session
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - connection state, reconnect policy and rumqttc options
//! - [`message_handler`] - routing of raw rumqttc events
//! - [`health_monitor`] - state transitions and reconnection decisions
//! - [`session`] - the event loop supervisor behind [`RumqttcConnector`]
//! - [`client`] - [`TopicClient`], one connection scoped to one topic
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_bindings::config::ClientOptions;
//! use mqtt_bindings::message::MqttMessage;
//! use mqtt_bindings::transport::mqtt::{RumqttcConnector, TopicClient};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let options = ClientOptions::new("broker.example.com", 8883).shared();
//! let client = TopicClient::new("topic/one", options, Arc::new(RumqttcConnector::new()));
//!
//! client
//!     .send(vec![MqttMessage::from("hello").with_topic("topic/two")])
//!     .await?;
//! client.close().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod session;

pub use client::{HandlerId, InboundHandler, TopicClient, TopicClientState};
pub use connection::{ConnectionState, MqttError, ReconnectPolicy};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
pub use session::{RumqttcConnector, RumqttcSession};
