//! Mock implementations for testing
//!
//! Provides a mock broker connector, a recording message sender and a
//! scriptable function executor, so the lifecycle and dispatch logic can be
//! exercised without a running broker.

use crate::config::ClientOptions;
use crate::error::ExtensionResult;
use crate::listener::{FunctionResult, TriggeredFunctionData, TriggeredFunctionExecutor};
use crate::message::{MqttMessage, QoS};
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{Connector, InboundSender, MessageSender, Session};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything the mock broker has observed
#[derive(Default)]
struct BrokerState {
    client_ids: Vec<String>,
    published: Vec<MqttMessage>,
    subscriptions: Vec<String>,
    unsubscriptions: Vec<String>,
    disconnects: usize,
    inbound: Vec<InboundSender>,
    sessions: Vec<Arc<Mutex<ConnectionState>>>,
}

/// Faults applied by every session, toggled through the connector
#[derive(Default)]
struct SessionFaults {
    fail_publish: AtomicBool,
    reject_subscribe: AtomicBool,
    hang_publish: AtomicBool,
    hang_disconnect: AtomicBool,
}

/// Never completes; stands in for a broker that stopped answering
async fn hang() {
    std::future::pending::<()>().await
}

/// Mock connector standing in for a broker
#[derive(Default)]
pub struct MockConnector {
    connects: AtomicUsize,
    fail_connect: AtomicBool,
    faults: Arc<SessionFaults>,
    connect_delay: Option<Duration>,
    broker: Arc<Mutex<BrokerState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every handshake take `delay`, widening race windows
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.faults.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Answer every SUBSCRIBE with a rejecting SubAck
    pub fn set_reject_subscribe(&self, reject: bool) {
        self.faults.reject_subscribe.store(reject, Ordering::SeqCst);
    }

    /// Make publish never complete
    pub fn set_hang_publish(&self, hang: bool) {
        self.faults.hang_publish.store(hang, Ordering::SeqCst);
    }

    /// Make unsubscribe and disconnect never complete
    pub fn set_hang_disconnect(&self, hang: bool) {
        self.faults.hang_disconnect.store(hang, Ordering::SeqCst);
    }

    /// Number of handshakes attempted
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.broker.lock().client_ids.clone()
    }

    pub fn published(&self) -> Vec<MqttMessage> {
        self.broker.lock().published.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.broker.lock().subscriptions.clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.broker.lock().unsubscriptions.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.broker.lock().disconnects
    }

    /// Deliver `message` to every live session; returns how many accepted it
    pub async fn inject(&self, message: MqttMessage) -> usize {
        let senders: Vec<InboundSender> = self.broker.lock().inbound.clone();

        let mut delivered = 0;
        for sender in senders {
            if sender.send(message.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Put every session into a disconnected state that never recovers
    pub fn drop_connections(&self) {
        for session in &self.broker.lock().sessions {
            *session.lock() = ConnectionState::Disconnected("Mock connection dropped".to_string());
        }
    }

    pub fn restore_connections(&self) {
        for session in &self.broker.lock().sessions {
            *session.lock() = ConnectionState::Connected;
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _options: &ClientOptions,
        client_id: &str,
        inbound: InboundSender,
    ) -> Result<Box<dyn Session>, MqttError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(MqttError::ConnectionFailedStr(
                "Mock connection failure".to_string(),
            ));
        }

        let state = Arc::new(Mutex::new(ConnectionState::Connected));
        {
            let mut broker = self.broker.lock();
            broker.client_ids.push(client_id.to_string());
            broker.inbound.push(inbound);
            broker.sessions.push(state.clone());
        }

        Ok(Box::new(MockSession {
            state,
            broker: self.broker.clone(),
            faults: self.faults.clone(),
        }))
    }
}

/// Session handed out by [`MockConnector`]
pub struct MockSession {
    state: Arc<Mutex<ConnectionState>>,
    broker: Arc<Mutex<BrokerState>>,
    faults: Arc<SessionFaults>,
}

#[async_trait]
impl Session for MockSession {
    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), MqttError> {
        if self.faults.reject_subscribe.load(Ordering::SeqCst) {
            return Err(MqttError::SubscriptionRejected {
                topic: topic.to_string(),
                reason: "Subscription failed with reason codes: [NotAuthorized]".to_string(),
            });
        }
        self.broker.lock().subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        if self.faults.hang_disconnect.load(Ordering::SeqCst) {
            hang().await;
        }
        self.broker.lock().unsubscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, message: &MqttMessage) -> Result<(), MqttError> {
        if self.faults.hang_publish.load(Ordering::SeqCst) {
            hang().await;
        }
        if self.faults.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed {
                topic: message.topic.clone(),
                source: "Mock publish failure".into(),
            });
        }
        self.broker.lock().published.push(message.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        if self.faults.hang_disconnect.load(Ordering::SeqCst) {
            hang().await;
        }
        *self.state.lock() = ConnectionState::Closed("Client disconnected".to_string());
        self.broker.lock().disconnects += 1;
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    async fn wait_connected(&self, timeout: Duration) -> Result<(), MqttError> {
        if self.connection_state() == ConnectionState::Connected {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        match self.connection_state() {
            ConnectionState::Connected => Ok(()),
            state => Err(MqttError::NotConnected { state }),
        }
    }
}

/// Mock sender recording every batch
#[derive(Default)]
pub struct MockSender {
    batches: Mutex<Vec<Vec<MqttMessage>>>,
    fail: AtomicBool,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<MqttMessage>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl MessageSender for MockSender {
    async fn send(&self, messages: Vec<MqttMessage>) -> ExtensionResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MqttError::ConnectionFailedStr("Mock send failure".to_string()).into());
        }
        self.batches.lock().push(messages);
        Ok(())
    }
}

/// Mock function executor recording trigger values
#[derive(Debug, Default)]
pub struct MockExecutor {
    invocations: Mutex<Vec<MqttMessage>>,
    failure: Option<String>,
    delay: Option<Duration>,
    cancelled_on_return: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor whose every run fails with `error`
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            failure: Some(error.into()),
            ..Self::default()
        }
    }

    /// Simulate a handler that takes `delay` to run
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn invocations(&self) -> Vec<MqttMessage> {
        self.invocations.lock().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Runs that finished with their cancellation token raised
    pub fn cancelled_count(&self) -> usize {
        self.cancelled_on_return.load(Ordering::SeqCst)
    }

    /// Poll until `count` invocations were seen or `timeout` passes
    pub async fn wait_for_invocations(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.invocation_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.invocation_count() >= count
    }
}

#[async_trait]
impl TriggeredFunctionExecutor for MockExecutor {
    async fn try_execute(
        &self,
        input: TriggeredFunctionData,
        cancel: CancellationToken,
    ) -> FunctionResult {
        self.invocations.lock().push(input.trigger_value);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if cancel.is_cancelled() {
            self.cancelled_on_return.fetch_add(1, Ordering::SeqCst);
        }

        match &self.failure {
            Some(error) => FunctionResult::failure(error.clone()),
            None => FunctionResult::success(),
        }
    }
}
