//! Topic client: one broker connection scoped to one topic
//!
//! The client connects lazily. The first handler registration performs the
//! connect-and-subscribe handshake under a single async mutex; later
//! registrations only record the handler. Publishing to other topics goes
//! through the same connection.

use super::connection::{generate_client_id, MqttError};
use crate::config::ClientOptions;
use crate::error::{ExtensionError, ExtensionResult};
use crate::message::{MqttMessage, QoS};
use crate::observability::metrics::metrics;
use crate::transport::{Connector, MessageSender, Session};
use async_trait::async_trait;
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Inbound channel depth between the session and the dispatch task
///
/// Handlers run one message at a time. Once this many messages are waiting
/// the session stops reading from the broker until the handlers catch up.
const INBOUND_CHANNEL_CAPACITY: usize = 100;

/// QoS requested for the topic subscription
const SUBSCRIPTION_QOS: QoS = QoS::AtMostOnce;

/// Receives messages arriving on a topic client's subscription
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, message: MqttMessage) -> ExtensionResult<()>;
}

/// Identifies a registered handler so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Lifecycle of a topic client. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicClientState {
    Created,
    Connecting,
    /// Connected without a subscription (output-only use)
    Ready,
    Subscribed,
    Closed,
}

type HandlerTable = Arc<RwLock<BTreeMap<HandlerId, Arc<dyn InboundHandler>>>>;

/// State guarded by the connect mutex
#[derive(Default)]
struct Connection {
    session: Option<Arc<dyn Session>>,
    subscribed: bool,
    dispatch_task: Option<JoinHandle<()>>,
}

pub struct TopicClient {
    topic: String,
    options: Arc<ClientOptions>,
    connector: Arc<dyn Connector>,
    connection: Mutex<Connection>,
    handlers: HandlerTable,
    next_handler_id: AtomicU64,
    state: SyncMutex<TopicClientState>,
}

impl fmt::Debug for TopicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicClient")
            .field("topic", &self.topic)
            .field("state", &self.state())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl TopicClient {
    /// Create a client; nothing touches the network until first use
    pub fn new(
        topic: impl Into<String>,
        options: Arc<ClientOptions>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            topic: topic.into(),
            options,
            connector,
            connection: Mutex::new(Connection::default()),
            handlers: Arc::new(RwLock::new(BTreeMap::new())),
            next_handler_id: AtomicU64::new(1),
            state: SyncMutex::new(TopicClientState::Created),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> TopicClientState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == TopicClientState::Closed
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    fn set_state(&self, next: TopicClientState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(topic = %self.topic, from = ?*state, to = ?next, "Topic client state change");
            *state = next;
        }
    }

    fn closed_error(&self) -> ExtensionError {
        MqttError::Closed(self.topic.clone()).into()
    }

    /// Register a handler for inbound messages
    ///
    /// The first call connects and subscribes; concurrent first callers wait
    /// on the same handshake. If the handshake fails the handler is not kept.
    pub async fn register_handler(
        &self,
        handler: Arc<dyn InboundHandler>,
    ) -> ExtensionResult<HandlerId> {
        let mut connection = self.connection.lock().await;
        let session = self.ensure_session(&mut connection).await?;

        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().insert(id, handler);

        if !connection.subscribed {
            if let Err(e) = session.subscribe(&self.topic, SUBSCRIPTION_QOS).await {
                self.handlers.write().remove(&id);
                error!(topic = %self.topic, error = %e, "Subscription failed");
                return Err(e.into());
            }
            connection.subscribed = true;
            self.set_state(TopicClientState::Subscribed);
        }

        debug!(topic = %self.topic, handler = %id, "Handler registered");
        Ok(id)
    }

    /// Remove a handler; the subscription and connection stay up
    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            debug!(topic = %self.topic, handler = %id, "Handler unregistered");
        }
        removed
    }

    /// Publish each message using its own topic, QoS and retain flag
    ///
    /// Connects first if needed, bounded by `connect_timeout`. After that the
    /// whole batch, including any wait for a reconnect, shares one
    /// `publish_timeout` deadline. Failures are returned, never retried here.
    pub async fn send(&self, messages: Vec<MqttMessage>) -> ExtensionResult<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if messages.is_empty() {
            return Ok(());
        }
        if let Some(position) = messages.iter().position(|m| !m.has_topic()) {
            return Err(ExtensionError::invalid_argument(
                "messages",
                format!("message at position {position} has no topic"),
            ));
        }

        let session = {
            let mut connection = self.connection.lock().await;
            self.ensure_session(&mut connection).await?
        };

        let timeout = self.options.publish_timeout;
        let deadline = Instant::now() + timeout;
        session.wait_connected(timeout).await?;

        for message in &messages {
            match tokio::time::timeout_at(deadline, session.publish(message)).await {
                Ok(Ok(())) => {
                    metrics().mqtt_message_published();
                    debug!(
                        target: "mqtt_transport",
                        topic = %message.topic,
                        qos = message.qos.level(),
                        retain = message.retain,
                        bytes = message.payload.len(),
                        "Published message"
                    );
                }
                Ok(Err(e)) => {
                    metrics().mqtt_publish_failed();
                    return Err(e.into());
                }
                Err(_) => {
                    metrics().mqtt_publish_failed();
                    return Err(MqttError::PublishTimeout {
                        topic: message.topic.clone(),
                        timeout,
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    /// Unsubscribe, disconnect and move to `Closed`
    ///
    /// Idempotent. The teardown is bounded by `publish_timeout`; failures are
    /// logged since there is nothing left for the caller to do about them.
    pub async fn close(&self) {
        let mut connection = self.connection.lock().await;
        if self.is_closed() {
            return;
        }
        self.set_state(TopicClientState::Closed);
        self.handlers.write().clear();

        let subscribed = std::mem::take(&mut connection.subscribed);
        if let Some(session) = connection.session.take() {
            let topic = self.topic.as_str();
            let teardown = async {
                if subscribed {
                    session.unsubscribe(topic).await?;
                }
                session.disconnect().await
            };

            match tokio::time::timeout(self.options.publish_timeout, teardown).await {
                Ok(Ok(())) => info!(topic = %self.topic, "Topic client closed"),
                Ok(Err(e)) => warn!(topic = %self.topic, error = %e, "Error while closing topic client"),
                Err(_) => warn!(
                    topic = %self.topic,
                    timeout_ms = self.options.publish_timeout.as_millis() as u64,
                    "Timed out closing topic client"
                ),
            }
        }

        if let Some(task) = connection.dispatch_task.take() {
            task.abort();
        }
    }

    /// Return the live session, performing the handshake if there is none
    ///
    /// Callers hold the connect mutex, so only one handshake runs at a time.
    async fn ensure_session(
        &self,
        connection: &mut Connection,
    ) -> ExtensionResult<Arc<dyn Session>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if let Some(session) = &connection.session {
            return Ok(session.clone());
        }

        self.set_state(TopicClientState::Connecting);
        let client_id = generate_client_id();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let session: Arc<dyn Session> = match self
            .connector
            .connect(&self.options, &client_id, inbound_tx)
            .await
        {
            Ok(session) => Arc::from(session),
            Err(e) => {
                self.set_state(TopicClientState::Created);
                error!(topic = %self.topic, client_id = %client_id, error = %e, "Connection failed");
                return Err(e.into());
            }
        };

        info!(topic = %self.topic, client_id = %client_id, "Topic client connected");
        connection.dispatch_task = Some(tokio::spawn(dispatch_inbound(
            self.topic.clone(),
            inbound_rx,
            self.handlers.clone(),
        )));
        connection.session = Some(session.clone());
        self.set_state(TopicClientState::Ready);
        Ok(session)
    }
}

/// Deliver inbound messages to the registered handlers in arrival order
async fn dispatch_inbound(
    topic: String,
    mut inbound: mpsc::Receiver<MqttMessage>,
    handlers: HandlerTable,
) {
    while let Some(message) = inbound.recv().await {
        let targets: Vec<(HandlerId, Arc<dyn InboundHandler>)> = handlers
            .read()
            .iter()
            .map(|(id, handler)| (*id, handler.clone()))
            .collect();

        if targets.is_empty() {
            debug!(topic = %topic, message_topic = %message.topic, "No handler registered, message dropped");
            continue;
        }

        for (id, handler) in targets {
            if let Err(e) = handler.handle(message.clone()).await {
                error!(
                    topic = %topic,
                    handler = %id,
                    message_topic = %message.topic,
                    error = %e,
                    "Message dispatch failed"
                );
            }
        }
    }
    debug!(topic = %topic, "Inbound dispatch finished");
}

#[async_trait]
impl MessageSender for TopicClient {
    async fn send(&self, messages: Vec<MqttMessage>) -> ExtensionResult<()> {
        TopicClient::send(self, messages).await
    }
}

impl Drop for TopicClient {
    fn drop(&mut self) {
        // The session's own Drop stops its supervisor
        if let Some(task) = self.connection.get_mut().dispatch_task.take() {
            task.abort();
        }
    }
}
