//! Listener: binds a topic's inbound messages to a function executor
//!
//! Lifecycle is `Idle -> Running -> Stopped`, with `Disposed` reachable from
//! any state. Every public call checks the state first.

use crate::error::{ensure_not_blank, ExtensionError, ExtensionResult};
use crate::message::MqttMessage;
use crate::observability::metrics::metrics;
use crate::pool::ClientPool;
use crate::transport::mqtt::{HandlerId, InboundHandler, TopicClient};
use crate::{dispatch_span, lifecycle_span};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Input handed to the function executor for one message
#[derive(Debug, Clone)]
pub struct TriggeredFunctionData {
    pub trigger_value: MqttMessage,
}

/// Outcome of one function execution
#[derive(Debug)]
pub struct FunctionResult {
    pub succeeded: bool,
    pub error: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FunctionResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            error: None,
        }
    }

    pub fn failure<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

/// The host's function execution framework
#[async_trait]
pub trait TriggeredFunctionExecutor: Send + Sync {
    async fn try_execute(
        &self,
        input: TriggeredFunctionData,
        cancel: CancellationToken,
    ) -> FunctionResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    /// Handler registration in progress
    Starting,
    Running,
    Stopped,
    Disposed,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Idle => "idle",
            ListenerState::Starting => "starting",
            ListenerState::Running => "running",
            ListenerState::Stopped => "stopped",
            ListenerState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

struct Registration {
    client: Arc<TopicClient>,
    handler: HandlerId,
}

struct ListenerInner {
    state: ListenerState,
    cancel: CancellationToken,
    registration: Option<Registration>,
}

pub struct Listener {
    topic: String,
    pool: Arc<ClientPool>,
    executor: Arc<dyn TriggeredFunctionExecutor>,
    inner: Mutex<ListenerInner>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("topic", &self.topic)
            .field("state", &self.state())
            .finish()
    }
}

impl Listener {
    pub fn new(
        topic: impl Into<String>,
        pool: Arc<ClientPool>,
        executor: Arc<dyn TriggeredFunctionExecutor>,
    ) -> ExtensionResult<Self> {
        let topic = topic.into();
        ensure_not_blank("topic", &topic)?;

        Ok(Self {
            topic,
            pool,
            executor,
            inner: Mutex::new(ListenerInner {
                state: ListenerState::Idle,
                cancel: CancellationToken::new(),
                registration: None,
            }),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ListenerState {
        self.inner.lock().state
    }

    /// Token raised by `cancel`, `stop` and `dispose`
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.lock().cancel.clone()
    }

    fn throw_if_disposed(state: ListenerState) -> ExtensionResult<()> {
        if state == ListenerState::Disposed {
            return Err(ExtensionError::object_disposed("Listener"));
        }
        Ok(())
    }

    /// Register with the pooled topic client; `Running` only once that succeeds
    pub async fn start(&self) -> ExtensionResult<()> {
        let span = lifecycle_span!(operation = "listener_start", topic = %self.topic);
        self.start_registration().instrument(span).await
    }

    async fn start_registration(&self) -> ExtensionResult<()> {
        let (previous, cancel) = {
            let mut inner = self.inner.lock();
            Self::throw_if_disposed(inner.state)?;
            if matches!(inner.state, ListenerState::Running | ListenerState::Starting) {
                return Err(ExtensionError::invalid_operation(
                    "The listener has already been started.",
                ));
            }
            let previous = inner.state;
            inner.state = ListenerState::Starting;
            inner.cancel = CancellationToken::new();
            (previous, inner.cancel.clone())
        };

        let registered = self.register(cancel).await;

        let mut inner = self.inner.lock();
        match registered {
            Ok(registration) if inner.state == ListenerState::Disposed => {
                registration.client.unregister_handler(registration.handler);
                Err(ExtensionError::object_disposed("Listener"))
            }
            Ok(registration) => {
                inner.registration = Some(registration);
                inner.state = ListenerState::Running;
                metrics().listener_started();
                info!(topic = %self.topic, "Listener started");
                Ok(())
            }
            Err(e) => {
                if inner.state == ListenerState::Starting {
                    inner.state = previous;
                }
                if e.is_programming_error() {
                    error!(topic = %self.topic, error = %e, "Listener failed to start");
                } else {
                    warn!(topic = %self.topic, error = %e, "Listener failed to start");
                }
                Err(e)
            }
        }
    }

    async fn register(&self, cancel: CancellationToken) -> ExtensionResult<Registration> {
        let client = self.pool.get_or_create_client(&self.topic)?;
        let dispatch = Arc::new(ListenerDispatch {
            topic: self.topic.clone(),
            executor: self.executor.clone(),
            cancel,
        });
        let handler = client.register_handler(dispatch).await?;
        Ok(Registration { client, handler })
    }

    /// Raise cancellation and remove this listener's handler
    ///
    /// The pooled connection stays open for other listeners and collectors.
    pub fn stop(&self) -> ExtensionResult<()> {
        let mut inner = self.inner.lock();
        Self::throw_if_disposed(inner.state)?;
        if inner.state != ListenerState::Running {
            return Err(ExtensionError::invalid_operation(
                "The listener has not yet been started or has already been stopped.",
            ));
        }

        inner.cancel.cancel();
        if let Some(registration) = inner.registration.take() {
            registration.client.unregister_handler(registration.handler);
        }
        inner.state = ListenerState::Stopped;
        metrics().listener_stopped();
        info!(topic = %self.topic, "Listener stopped");
        Ok(())
    }

    /// Raise cancellation without stopping
    pub fn cancel(&self) -> ExtensionResult<()> {
        let inner = self.inner.lock();
        Self::throw_if_disposed(inner.state)?;
        inner.cancel.cancel();
        debug!(topic = %self.topic, "Listener cancelled");
        Ok(())
    }

    /// Cancel pending work and release the topic client; safe to repeat
    pub fn dispose(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ListenerState::Disposed {
            return;
        }

        inner.cancel.cancel();
        if let Some(registration) = inner.registration.take() {
            registration.client.unregister_handler(registration.handler);
        }
        if inner.state == ListenerState::Running {
            metrics().listener_stopped();
        }
        inner.state = ListenerState::Disposed;
        debug!(topic = %self.topic, "Listener disposed");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Handler registered with the topic client on `start`
struct ListenerDispatch {
    topic: String,
    executor: Arc<dyn TriggeredFunctionExecutor>,
    cancel: CancellationToken,
}

impl ListenerDispatch {
    /// Invoke the executor; a failure is fatal unless cancellation was raised
    async fn dispatch(&self, message: MqttMessage) -> ExtensionResult<()> {
        let started = Instant::now();
        let input = TriggeredFunctionData {
            trigger_value: message,
        };

        let result = self.executor.try_execute(input, self.cancel.clone()).await;
        let elapsed = started.elapsed();

        if result.succeeded {
            metrics().message_dispatched(elapsed);
            return Ok(());
        }

        if self.cancel.is_cancelled() {
            metrics().dispatch_cancelled();
            debug!(topic = %self.topic, "Function failed after cancellation, ignoring");
            return Ok(());
        }

        metrics().dispatch_failed(elapsed);
        let error = result
            .error
            .unwrap_or_else(|| "function reported failure without an error".into());
        Err(ExtensionError::FunctionFailed(error))
    }
}

#[async_trait]
impl InboundHandler for ListenerDispatch {
    async fn handle(&self, message: MqttMessage) -> ExtensionResult<()> {
        let span = dispatch_span!(
            topic = %self.topic,
            message_topic = %message.topic,
            bytes = message.payload.len()
        );
        self.dispatch(message).instrument(span).await
    }
}
