//! MQTT bindings for a serverless function host
//!
//! Lets functions be triggered by messages arriving on MQTT topics and
//! publish messages to MQTT topics as output.
//!
//! # Overview
//!
//! - [`MqttMessage`]: the message model and its text/byte conversions
//! - [`ClientPool`]: one shared [`TopicClient`] per topic
//! - [`TriggerBinding`] and [`Listener`]: subscribe a topic and dispatch each
//!   message to a function executor
//! - [`MessageCollector`]: buffer a handler's output and publish it on flush
//! - [`MqttExtension`]: entry point tying the pieces together
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_bindings::{BoundArgument, MqttMessage, TriggerBinding};
//!
//! let binding = TriggerBinding::for_type::<String>("sensors/temperature").unwrap();
//! let data = binding.bind(MqttMessage::new("sensors/temperature", "21.5")).unwrap();
//!
//! assert_eq!(data.argument, BoundArgument::Text("21.5".to_string()));
//! assert_eq!(data.invoke_string, "byte[4]");
//! assert_eq!(data.binding_data.topic, "sensors/temperature");
//! ```

pub mod binding;
pub mod collector;
pub mod config;
pub mod error;
pub mod extension;
pub mod listener;
pub mod message;
pub mod observability;
pub mod pool;
pub mod testing;
pub mod transport;

pub use binding::{
    BindingData, BindingDataType, BindingValue, BoundArgument, ParameterDescriptor,
    ParameterShape, TriggerBinding, TriggerData, TriggerValue,
};
pub use collector::MessageCollector;
pub use config::{ClientOptions, ConfigError, FunctionConfig, HostConfig, MqttConfig};
pub use error::{ExtensionError, ExtensionResult};
pub use extension::MqttExtension;
pub use listener::{
    FunctionResult, Listener, ListenerState, TriggeredFunctionData, TriggeredFunctionExecutor,
};
pub use message::{MqttMessage, QoS};
pub use pool::ClientPool;
pub use transport::mqtt::{RumqttcConnector, TopicClient};
pub use transport::{Connector, MessageSender, Session};
