//! Output collector tests against a pooled topic client
//!
//! The collector must hand its whole buffer to the client in one `send`,
//! in insertion order, addressed to the output binding's topic.

use mqtt_bindings::testing::{MockConnector, MockSender};
use mqtt_bindings::{ClientOptions, MessageCollector, MqttExtension, MqttMessage, QoS};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn extension() -> (MqttExtension, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new());
    let options = ClientOptions::new("localhost", 1883)
        .with_tls(false)
        .with_timeouts(Duration::from_millis(200), Duration::from_millis(50));
    (MqttExtension::with_connector(options, connector.clone()), connector)
}

#[tokio::test]
async fn test_two_adds_then_flush_sends_one_ordered_batch() {
    // Arrange
    let sender = Arc::new(MockSender::new());
    let mut collector = MessageCollector::new(sender.clone(), "topic/two").unwrap();

    // Act
    collector.add(MqttMessage::from("first")).unwrap();
    collector.add(MqttMessage::from("second")).unwrap();
    collector.flush().await.unwrap();

    // Assert
    let batches = sender.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[0][0].payload, b"first");
    assert_eq!(batches[0][1].payload, b"second");
    assert!(batches[0].iter().all(|m| m.topic == "topic/two"));
    assert!(collector.is_empty());
}

#[tokio::test]
async fn test_flush_publishes_through_pooled_client() {
    let (extension, connector) = extension();
    let mut collector = extension.collector("out/topic").unwrap();

    collector.add_text("text").unwrap();
    collector.add_bytes(vec![1u8, 2]).unwrap();
    collector.add_json(&json!({"ok": true})).unwrap();
    collector
        .add(MqttMessage::new("ignored/topic", "qos").with_qos(QoS::AtLeastOnce))
        .unwrap();
    collector.flush().await.unwrap();

    let published = connector.published();
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(published.len(), 4);
    assert!(published.iter().all(|m| m.topic == "out/topic"));
    assert_eq!(published[2].to_text().unwrap(), r#"{"ok":true}"#);
    assert_eq!(published[3].qos, QoS::AtLeastOnce);
}

#[tokio::test]
async fn test_collectors_share_the_topic_connection() {
    let (extension, connector) = extension();

    for i in 0..3 {
        let mut collector = extension.collector("out/topic").unwrap();
        collector.add_text(format!("message {i}")).unwrap();
        collector.flush().await.unwrap();
    }

    assert_eq!(connector.connect_count(), 1);
    assert_eq!(connector.published().len(), 3);
}

#[tokio::test]
async fn test_publish_failure_surfaces_from_flush() {
    let (extension, connector) = extension();
    connector.set_fail_publish(true);
    let mut collector = extension.collector("out/topic").unwrap();
    collector.add_text("lost").unwrap();

    let result = collector.flush().await;

    assert!(result.is_err());
    assert!(collector.is_empty());
    assert!(connector.published().is_empty());
}

#[tokio::test]
async fn test_unflushed_messages_are_discarded() {
    let (extension, connector) = extension();

    {
        let mut collector = extension.collector("out/topic").unwrap();
        collector.add_text("never sent").unwrap();
    }

    assert!(connector.published().is_empty());
    assert_eq!(connector.connect_count(), 0);
}
