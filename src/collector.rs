//! Output collector: buffers a handler's outbound messages for one invocation

use crate::error::{ensure_not_blank, ExtensionError, ExtensionResult};
use crate::message::MqttMessage;
use crate::transport::MessageSender;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Collects messages during one invocation and publishes them on `flush`
///
/// Every added message is addressed to the collector's topic, whatever
/// topic it carried. Messages still buffered when the collector is dropped
/// are discarded.
pub struct MessageCollector {
    sender: Arc<dyn MessageSender>,
    topic: String,
    messages: Vec<MqttMessage>,
}

impl MessageCollector {
    pub fn new(sender: Arc<dyn MessageSender>, topic: impl Into<String>) -> ExtensionResult<Self> {
        let topic = topic.into();
        ensure_not_blank("topic", &topic)?;
        Ok(Self {
            sender,
            topic,
            messages: Vec::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn pending(&self) -> &[MqttMessage] {
        &self.messages
    }

    /// Buffer a message; `None` is rejected
    pub fn add<M: Into<Option<MqttMessage>>>(&mut self, message: M) -> ExtensionResult<()> {
        let message = message.into().ok_or_else(|| {
            ExtensionError::invalid_argument("message", "Value cannot be null.")
        })?;
        self.messages.push(message.with_topic(self.topic.clone()));
        Ok(())
    }

    pub fn add_text(&mut self, text: impl Into<String>) -> ExtensionResult<()> {
        self.add(MqttMessage::from(text.into()))
    }

    pub fn add_bytes(&mut self, bytes: impl Into<Vec<u8>>) -> ExtensionResult<()> {
        self.add(MqttMessage::from(bytes.into()))
    }

    /// Serialize `value` as JSON text and buffer it
    pub fn add_json<T: Serialize + ?Sized>(&mut self, value: &T) -> ExtensionResult<()> {
        self.add(MqttMessage::from_json(value)?)
    }

    /// Send everything buffered in one batch, in insertion order
    ///
    /// The buffer is emptied before sending, so a failed flush does not
    /// deliver the same messages twice on a later flush.
    pub async fn flush(&mut self) -> ExtensionResult<()> {
        if self.messages.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.messages);
        debug!(topic = %self.topic, messages = batch.len(), "Flushing output messages");
        self.sender.send(batch).await
    }
}

impl std::fmt::Debug for MessageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCollector")
            .field("topic", &self.topic)
            .field("pending", &self.messages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::QoS;
    use crate::testing::MockSender;
    use serde_json::json;

    fn collector() -> (MessageCollector, Arc<MockSender>) {
        let sender = Arc::new(MockSender::new());
        let collector = MessageCollector::new(sender.clone(), "topic/two").unwrap();
        (collector, sender)
    }

    #[tokio::test]
    async fn test_flush_sends_once_in_order() {
        let (mut collector, sender) = collector();

        collector.add(MqttMessage::from("first")).unwrap();
        collector.add(MqttMessage::from("second")).unwrap();
        collector.flush().await.unwrap();

        let batches = sender.batches();
        assert_eq!(batches.len(), 1);
        let payloads: Vec<_> = batches[0].iter().map(|m| m.to_text().unwrap()).collect();
        assert_eq!(payloads, vec!["first", "second"]);
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_empty_flush_sends_nothing() {
        let (mut collector, sender) = collector();

        collector.flush().await.unwrap();

        assert!(sender.batches().is_empty());
    }

    #[test]
    fn test_add_none_rejected() {
        let (mut collector, _) = collector();

        let result = collector.add(None::<MqttMessage>);

        assert!(matches!(
            result,
            Err(ExtensionError::InvalidArgument { name: "message", .. })
        ));
        assert!(collector.is_empty());
    }

    #[test]
    fn test_binding_topic_wins() {
        let (mut collector, _) = collector();

        collector
            .add(
                MqttMessage::new("somewhere/else", "x")
                    .with_qos(QoS::AtLeastOnce)
                    .with_retain(true),
            )
            .unwrap();

        let pending = &collector.pending()[0];
        assert_eq!(pending.topic, "topic/two");
        assert_eq!(pending.qos, QoS::AtLeastOnce);
        assert!(pending.retain);
    }

    #[test]
    fn test_typed_helpers() {
        let (mut collector, _) = collector();

        collector.add_text("hello").unwrap();
        collector.add_bytes(vec![1u8, 2, 3]).unwrap();
        collector.add_json(&json!({"a": 1})).unwrap();

        let pending = collector.pending();
        assert_eq!(pending[0].payload, b"hello");
        assert_eq!(pending[1].payload, vec![1, 2, 3]);
        assert_eq!(pending[2].to_text().unwrap(), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_failed_flush_clears_buffer() {
        let (mut collector, sender) = collector();
        sender.set_fail(true);
        collector.add_text("x").unwrap();

        assert!(collector.flush().await.is_err());
        assert!(collector.is_empty());
    }

    #[test]
    fn test_blank_topic_rejected() {
        let result = MessageCollector::new(Arc::new(MockSender::new()), "");
        assert!(matches!(result, Err(ExtensionError::InvalidArgument { .. })));
    }
}
