//! Extension entry point
//!
//! [`MqttExtension`] owns the client pool and hands out trigger bindings,
//! listeners and output collectors that share it.

use crate::binding::TriggerBinding;
use crate::collector::MessageCollector;
use crate::config::{ClientOptions, FunctionConfig};
use crate::error::{ensure_not_blank, ExtensionResult};
use crate::listener::{Listener, TriggeredFunctionExecutor};
use crate::message::MqttMessage;
use crate::pool::ClientPool;
use crate::transport::Connector;
use std::sync::Arc;
use tracing::info;

pub struct MqttExtension {
    pool: Arc<ClientPool>,
}

impl MqttExtension {
    /// Extension backed by real broker connections
    pub fn new(options: ClientOptions) -> Self {
        Self {
            pool: Arc::new(ClientPool::new(options)),
        }
    }

    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        Self {
            pool: Arc::new(ClientPool::with_connector(options, connector)),
        }
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    /// Trigger binding for parameter type `T`
    pub fn trigger_binding<T: 'static>(&self, topic: &str) -> ExtensionResult<TriggerBinding> {
        TriggerBinding::for_type::<T>(topic)
    }

    /// Trigger binding for a configured function
    pub fn trigger_binding_for(&self, function: &FunctionConfig) -> ExtensionResult<TriggerBinding> {
        TriggerBinding::from_declared(function.trigger_topic.clone(), &function.data_type)
    }

    pub fn create_listener(
        &self,
        binding: &TriggerBinding,
        executor: Arc<dyn TriggeredFunctionExecutor>,
    ) -> ExtensionResult<Listener> {
        binding.create_listener(self.pool.clone(), executor)
    }

    /// Fresh collector publishing to `topic` through that topic's pooled client
    pub fn collector(&self, topic: &str) -> ExtensionResult<MessageCollector> {
        let client = self.pool.get_or_create_client(topic)?;
        MessageCollector::new(client, topic)
    }

    /// Empty message addressed to `topic`, for input bindings
    pub fn input_message(&self, topic: &str) -> ExtensionResult<MqttMessage> {
        ensure_not_blank("topic", topic)?;
        Ok(MqttMessage::new(topic, Vec::new()))
    }

    /// Close every pooled connection
    pub async fn shutdown(&self) {
        info!(clients = self.pool.len(), "Shutting down MQTT extension");
        self.pool.close_all().await;
    }
}
