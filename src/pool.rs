//! Per-topic client pool
//!
//! One [`TopicClient`] per exact topic string, created on first request and
//! kept until the pool is dropped. Creating a pool or a client never touches
//! the network.

use crate::config::ClientOptions;
use crate::error::{ensure_not_blank, ExtensionResult};
use crate::transport::mqtt::{RumqttcConnector, TopicClient};
use crate::transport::Connector;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ClientPool {
    options: Arc<ClientOptions>,
    connector: Arc<dyn Connector>,
    clients: Mutex<HashMap<String, Arc<TopicClient>>>,
}

impl ClientPool {
    /// Pool backed by real broker connections
    pub fn new(options: ClientOptions) -> Self {
        Self::with_connector(options, Arc::new(RumqttcConnector::new()))
    }

    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        Self {
            options: options.shared(),
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &Arc<ClientOptions> {
        &self.options
    }

    /// Return the client for `topic`, creating it if this is the first request
    ///
    /// Lookup and insert happen under one lock, so concurrent first callers
    /// all receive the same instance.
    pub fn get_or_create_client(&self, topic: &str) -> ExtensionResult<Arc<TopicClient>> {
        ensure_not_blank("topic", topic)?;

        let mut clients = self.clients.lock();
        let client = clients
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!(topic = %topic, "Creating topic client");
                Arc::new(TopicClient::new(
                    topic,
                    self.options.clone(),
                    self.connector.clone(),
                ))
            })
            .clone();
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.clients.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Close every pooled client; entries stay in the pool as `Closed`
    pub async fn close_all(&self) {
        let clients: Vec<Arc<TopicClient>> = self.clients.lock().values().cloned().collect();
        info!(clients = clients.len(), "Closing all topic clients");

        for client in clients {
            client.close().await;
        }
    }
}
