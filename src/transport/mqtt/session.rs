//! Impure I/O for broker sessions
//!
//! [`RumqttcConnector`] opens a rumqttc v5 connection and spawns a supervisor
//! task that polls the event loop, forwards inbound publishes, resubscribes
//! after every ConnAck and waits a fixed delay between reconnection attempts.
//!
//! Subscribing waits for the broker's SubAck, so a rejected topic filter
//! surfaces as an error instead of a silent subscription that never delivers.
//!
//! Inbound publishes go through a bounded queue. When a handler falls behind
//! and the queue fills, the supervisor stops polling until there is room, so
//! nothing is dropped but keep-alive pings wait too. A handler stalled longer
//! than the keep-alive interval will cost the connection.

use super::connection::{
    configure_mqtt_options, ConnectionState, MqttError, ReconnectPolicy,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ClientOptions;
use crate::mqtt_span;
use crate::message::{MqttMessage, QoS};
use crate::observability::metrics::metrics;
use crate::transport::{Connector, InboundSender, Session};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// How long `disconnect` waits for the supervisor task to wind down
const SUPERVISOR_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type SubscriptionTable = Arc<Mutex<HashMap<String, QoS>>>;

type SubAckOutcome = Result<(), String>;

/// A SUBSCRIBE waiting for its SubAck
struct PendingSubscribe {
    topic: String,
    /// `None` for resubscriptions issued by the supervisor itself
    waiter: Option<oneshot::Sender<SubAckOutcome>>,
}

/// Matches SUBSCRIBE requests to the SubAcks that answer them
///
/// Requests are queued in the order they enter the rumqttc request channel.
/// The event loop reports each packet id as the request goes out, and the
/// SubAck carrying that id settles it.
#[derive(Default)]
struct SubAckTracker {
    queued: VecDeque<PendingSubscribe>,
    in_flight: HashMap<u16, PendingSubscribe>,
}

impl SubAckTracker {
    fn queue(&mut self, topic: &str, waiter: Option<oneshot::Sender<SubAckOutcome>>) {
        self.queued.push_back(PendingSubscribe {
            topic: topic.to_string(),
            waiter,
        });
    }

    /// Undo the last `queue` when the request never reached the channel
    fn unqueue_last(&mut self) {
        self.queued.pop_back();
    }

    /// Returns false if no request was waiting for this packet id
    fn sent(&mut self, packet_id: u16) -> bool {
        match self.queued.pop_front() {
            Some(pending) => {
                self.in_flight.insert(packet_id, pending);
                true
            }
            None => false,
        }
    }

    fn acknowledged(&mut self, packet_id: u16) -> Option<PendingSubscribe> {
        self.in_flight.remove(&packet_id)
    }

    /// A new connection never answers packets sent on the old one; dropping
    /// the waiters fails their callers
    fn connection_reset(&mut self) -> usize {
        let dropped = self.in_flight.len();
        self.in_flight.clear();
        dropped
    }
}

type SharedSubAckTracker = Arc<Mutex<SubAckTracker>>;

/// Opens rumqttc-backed sessions
#[derive(Debug, Clone, Default)]
pub struct RumqttcConnector;

impl RumqttcConnector {
    pub fn new() -> Self {
        Self
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }
}

#[async_trait]
impl Connector for RumqttcConnector {
    async fn connect(
        &self,
        options: &ClientOptions,
        client_id: &str,
        inbound: InboundSender,
    ) -> Result<Box<dyn Session>, MqttError> {
        let span = mqtt_span!(operation = "connect", client_id = %client_id);
        Self::open_session(options, client_id, inbound)
            .instrument(span)
            .await
    }
}

impl RumqttcConnector {
    async fn open_session(
        options: &ClientOptions,
        client_id: &str,
        inbound: InboundSender,
    ) -> Result<Box<dyn Session>, MqttError> {
        metrics().mqtt_connection_attempt();
        info!(
            host = %options.host,
            port = options.port,
            client_id = %client_id,
            tls = options.tls,
            "Connecting to MQTT broker"
        );

        let mqtt_options = configure_mqtt_options(client_id, options);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        let subscriptions: SubscriptionTable = Arc::new(Mutex::new(HashMap::new()));
        let acks: SharedSubAckTracker = Arc::new(Mutex::new(SubAckTracker::default()));

        let supervisor = Supervisor {
            client_id: client_id.to_string(),
            client: client.clone(),
            state_tx: state_tx.clone(),
            shutdown_rx,
            subscriptions: subscriptions.clone(),
            acks: acks.clone(),
            policy: ReconnectPolicy::from_options(options),
            inbound,
        };
        let handle = tokio::spawn(supervisor.run(event_loop));

        if let Err(e) = wait_for_connection(state_rx.clone(), options.connect_timeout).await {
            metrics().mqtt_connection_failed();
            let _ = shutdown_tx.send(true);
            handle.abort();
            return Err(e);
        }

        Ok(Box::new(RumqttcSession {
            client,
            state_tx,
            state_rx,
            shutdown_tx,
            subscriptions,
            acks,
            ack_timeout: options.connect_timeout,
            handle: Mutex::new(Some(handle)),
        }))
    }
}

/// Wait for the connection to reach `Connected`, bounded by `timeout`
///
/// Transient disconnects while waiting are tolerated; the supervisor keeps
/// retrying until the deadline.
async fn wait_for_connection(
    mut state_rx: watch::Receiver<ConnectionState>,
    timeout: Duration,
) -> Result<(), MqttError> {
    let mut last_state = state_rx.borrow().clone();

    let wait = async {
        loop {
            match &*state_rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed(reason) => {
                    return Err(MqttError::ConnectionFailedStr(reason.clone()))
                }
                state => last_state = state.clone(),
            }
            if state_rx.changed().await.is_err() {
                return Err(MqttError::ConnectionFailedStr(
                    "State channel closed".to_string(),
                ));
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => match last_state {
            ConnectionState::Disconnected(reason) => Err(MqttError::ConnectionFailedStr(format!(
                "No connection within {timeout:?}: {reason}"
            ))),
            _ => Err(MqttError::ConnectTimeout(timeout)),
        },
    }
}

/// Apply a connection event and log the transition
fn transition(state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
    let next = HealthMonitor::determine_next_state(event);
    let previous = state_tx.send_replace(next.clone());
    if previous != next {
        HealthMonitor::log_state_transition(&previous, &next);
    }
}

/// Event loop supervisor owned by the spawned task
struct Supervisor {
    client_id: String,
    client: AsyncClient,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    subscriptions: SubscriptionTable,
    acks: SharedSubAckTracker,
    policy: ReconnectPolicy,
    inbound: InboundSender,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        debug!(client_id = %self.client_id, "Starting MQTT event loop supervisor");
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!(client_id = %self.client_id, "Shutdown signal received, stopping supervisor");
                        break;
                    }
                }
                event = event_loop.poll() => {
                    let keep_running = match event {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route, &mut reconnect_attempts).await
                        }
                        Err(e) => {
                            error!(client_id = %self.client_id, error = %e, "MQTT event loop error");
                            metrics().mqtt_connection_lost();
                            transition(&self.state_tx, ConnectionEvent::NetworkError(e.to_string()));
                            self.pause_before_reconnect(&mut reconnect_attempts).await
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        debug!(client_id = %self.client_id, "MQTT event loop supervisor stopped");
    }

    /// Returns true to continue the loop, false to break
    async fn process_event_route(&self, route: EventRoute, reconnect_attempts: &mut u32) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                metrics().mqtt_connection_established();
                transition(&self.state_tx, ConnectionEvent::ConnAckReceived);
                *reconnect_attempts = 0;
                self.resubscribe();
                true
            }
            EventRoute::MessageReceived(message) => {
                metrics().mqtt_message_received();
                debug!(target: "mqtt_transport", topic = %message.topic, "Received MQTT message");
                forward_inbound(&self.inbound, message).await;
                true
            }
            EventRoute::Disconnected => {
                metrics().mqtt_connection_lost();
                transition(&self.state_tx, ConnectionEvent::DisconnectedByBroker);
                self.pause_before_reconnect(reconnect_attempts).await
            }
            EventRoute::SubscribeSent { packet_id } => {
                if !self.acks.lock().sent(packet_id) {
                    debug!(target: "mqtt_transport", packet_id, "Untracked SUBSCRIBE sent");
                }
                true
            }
            EventRoute::SubscriptionConfirmed { packet_id, outcome } => {
                self.settle_subscription(packet_id, outcome);
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Sleep the fixed reconnect delay; returns false if the supervisor should stop
    async fn pause_before_reconnect(&self, reconnect_attempts: &mut u32) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            &self.policy,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay } => {
                *reconnect_attempts = attempt;
                transition(&self.state_tx, ConnectionEvent::ReconnectionStarted(attempt));
                info!(
                    client_id = %self.client_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting to MQTT broker"
                );
                interruptible_sleep(self.shutdown_rx.clone(), delay).await
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                transition(
                    &self.state_tx,
                    ConnectionEvent::Closed(format!(
                        "Max reconnection attempts ({}) exceeded",
                        *reconnect_attempts
                    )),
                );
                false
            }
        }
    }

    fn settle_subscription(&self, packet_id: u16, outcome: SubAckOutcome) {
        let Some(pending) = self.acks.lock().acknowledged(packet_id) else {
            debug!(target: "mqtt_transport", packet_id, "SubAck for untracked packet");
            return;
        };

        match &outcome {
            Ok(()) => {
                debug!(target: "mqtt_transport", topic = %pending.topic, packet_id, "Subscription confirmed")
            }
            Err(reason) => warn!(
                client_id = %self.client_id,
                topic = %pending.topic,
                packet_id,
                reason = %reason,
                "Broker rejected subscription"
            ),
        }

        match pending.waiter {
            Some(waiter) => {
                if waiter.send(outcome).is_err() {
                    debug!(target: "mqtt_transport", topic = %pending.topic, "Subscriber stopped waiting for SubAck");
                }
            }
            None => {
                if outcome.is_err() {
                    self.subscriptions.lock().remove(&pending.topic);
                    error!(topic = %pending.topic, "Re-subscription rejected, topic dropped");
                }
            }
        }
    }

    fn resubscribe(&self) {
        let topics: Vec<(String, QoS)> = self
            .subscriptions
            .lock()
            .iter()
            .map(|(topic, qos)| (topic.clone(), *qos))
            .collect();

        let mut acks = self.acks.lock();
        let dropped = acks.connection_reset();
        if dropped > 0 {
            debug!(target: "mqtt_transport", dropped, "Discarded SUBSCRIBEs unanswered before reconnect");
        }

        for (topic, qos) in topics {
            acks.queue(&topic, None);
            match self.client.try_subscribe(topic.clone(), qos.into()) {
                Ok(()) => debug!(target: "mqtt_transport", topic = %topic, "Re-subscribing"),
                Err(e) => {
                    acks.unqueue_last();
                    error!(topic = %topic, error = %e, "Failed to re-subscribe");
                }
            }
        }
    }
}

/// Queue an inbound message for the topic client
///
/// Never drops: a full queue parks the event loop until a handler makes room.
async fn forward_inbound(inbound: &InboundSender, message: MqttMessage) {
    match inbound.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(message)) => {
            metrics().mqtt_inbound_backpressure();
            warn!(
                target: "mqtt_transport",
                topic = %message.topic,
                "Inbound queue full, event loop paused until handlers catch up"
            );
            if inbound.send(message).await.is_err() {
                debug!(target: "mqtt_transport", "Inbound receiver dropped, message discarded");
            }
        }
        Err(TrySendError::Closed(_)) => {
            debug!(target: "mqtt_transport", "Inbound receiver dropped, message discarded");
        }
    }
}

/// Wait for the broker's verdict on a SUBSCRIBE, bounded by `timeout`
async fn await_suback(
    topic: &str,
    ack: oneshot::Receiver<SubAckOutcome>,
    timeout: Duration,
) -> Result<(), MqttError> {
    match tokio::time::timeout(timeout, ack).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(reason))) => Err(MqttError::SubscriptionRejected {
            topic: topic.to_string(),
            reason,
        }),
        Ok(Err(_)) => Err(MqttError::SubscriptionFailed(
            format!("Connection reset before SubAck for '{topic}'").into(),
        )),
        Err(_) => Err(MqttError::SubscribeTimeout {
            topic: topic.to_string(),
            timeout,
        }),
    }
}

/// Returns true if the sleep completed, false if shutdown was requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => {
            !(changed.is_err() || *shutdown_rx.borrow())
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Live rumqttc session
pub struct RumqttcSession {
    client: AsyncClient,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    subscriptions: SubscriptionTable,
    acks: SharedSubAckTracker,
    /// Bound on waiting for a SubAck
    ack_timeout: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Session for RumqttcSession {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            // Held across try_subscribe so tracker order matches request channel order
            let mut acks = self.acks.lock();
            acks.queue(topic, Some(ack_tx));
            if let Err(e) = self.client.try_subscribe(topic.to_string(), qos.into()) {
                acks.unqueue_last();
                return Err(MqttError::SubscriptionFailed(Box::new(e)));
            }
        }

        await_suback(topic, ack_rx, self.ack_timeout).await?;
        self.subscriptions.lock().insert(topic.to_string(), qos);
        info!(topic = %topic, qos = qos.level(), "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.subscriptions.lock().remove(topic);
        self.client
            .unsubscribe(topic.to_string())
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
        info!(topic = %topic, "Unsubscribed");
        Ok(())
    }

    async fn publish(&self, message: &MqttMessage) -> Result<(), MqttError> {
        self.client
            .publish(
                message.topic.clone(),
                message.qos.into(),
                message.retain,
                message.payload.clone(),
            )
            .await
            .map_err(|e| MqttError::PublishFailed {
                topic: message.topic.clone(),
                source: Box::new(e),
            })
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| MqttError::ConnectionFailed(Box::new(e)));

        let _ = self.shutdown_tx.send(true);
        transition(
            &self.state_tx,
            ConnectionEvent::Closed("Client disconnected".to_string()),
        );

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(SUPERVISOR_SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!("Event loop supervisor shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Err(_) => warn!("Event loop supervisor didn't shut down gracefully"),
                _ => {}
            }
        }

        result
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    async fn wait_connected(&self, timeout: Duration) -> Result<(), MqttError> {
        let state = self.connection_state();
        if HealthMonitor::can_publish(&state) {
            return Ok(());
        }
        if !HealthMonitor::may_recover(&state) {
            return Err(MqttError::NotConnected { state });
        }
        wait_for_connection(self.state_rx.clone(), timeout).await
    }
}

impl Drop for RumqttcSession {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}
