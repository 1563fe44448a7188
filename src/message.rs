//! MQTT message model and payload conversions
//!
//! [`MqttMessage`] is the value exchanged with the broker in both directions.
//! Handlers can receive it as raw bytes, as UTF-8 text or as the structured
//! message itself, and produce outbound messages from any of those shapes or
//! from a serializable object.
//!
//! # Examples
//! ```
//! use mqtt_bindings::message::{MqttMessage, QoS};
//!
//! let message = MqttMessage::from("hello").with_topic("topic/two");
//! assert_eq!(message.payload, b"hello");
//! assert_eq!(message.qos, QoS::AtMostOnce);
//! assert!(!message.retain);
//! assert_eq!(message.text().unwrap(), "hello");
//! ```

use crate::error::ExtensionResult;
use rumqttc::v5::mqttbytes::QoS as WireQoS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker delivery guarantee attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery (fire and forget)
    #[default]
    AtMostOnce = 0,
    /// At least once delivery (acknowledged delivery)
    AtLeastOnce = 1,
    /// Exactly once delivery (assured delivery)
    ExactlyOnce = 2,
}

impl QoS {
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("invalid QoS level {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.level()
    }
}

impl From<QoS> for WireQoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => WireQoS::AtMostOnce,
            QoS::AtLeastOnce => WireQoS::AtLeastOnce,
            QoS::ExactlyOnce => WireQoS::ExactlyOnce,
        }
    }
}

impl From<WireQoS> for QoS {
    fn from(qos: WireQoS) -> Self {
        match qos {
            WireQoS::AtMostOnce => QoS::AtMostOnce,
            WireQoS::AtLeastOnce => QoS::AtLeastOnce,
            WireQoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Message exchanged with the broker
///
/// The JSON form uses the field names `topic`, `payload` (base64),
/// `qosLevel` and `retain`. An empty `topic` means the topic is not set yet;
/// outbound messages get theirs from the output binding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MqttMessage {
    #[serde(default)]
    pub topic: String,
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    #[serde(rename = "qosLevel", default)]
    pub qos: QoS,
    #[serde(default)]
    pub retain: bool,
}

impl MqttMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn has_topic(&self) -> bool {
        !self.topic.is_empty()
    }

    /// Payload bytes, unchanged
    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.payload
    }

    /// Strict UTF-8 view of the payload
    ///
    /// Invalid UTF-8 is an [`Encoding`](crate::ExtensionError::Encoding)
    /// error; bytes are never replaced.
    pub fn text(&self) -> ExtensionResult<&str> {
        Ok(std::str::from_utf8(&self.payload)?)
    }

    pub fn to_text(&self) -> ExtensionResult<String> {
        self.text().map(str::to_owned)
    }

    /// Serialize `value` to JSON text and wrap it as a QoS 0, non-retained message
    pub fn from_json<T: Serialize + ?Sized>(value: &T) -> ExtensionResult<Self> {
        let text = serde_json::to_string(value)?;
        Ok(Self::from(text))
    }

    /// Interpret a JSON value as the structured message shape
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Diagnostic form used when logging a function invocation
    pub fn invoke_string(&self) -> String {
        format!("byte[{}]", self.payload.len())
    }
}

impl From<Vec<u8>> for MqttMessage {
    fn from(payload: Vec<u8>) -> Self {
        Self {
            topic: String::new(),
            payload,
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

impl From<&[u8]> for MqttMessage {
    fn from(payload: &[u8]) -> Self {
        Self::from(payload.to_vec())
    }
}

impl From<String> for MqttMessage {
    fn from(text: String) -> Self {
        Self::from(text.into_bytes())
    }
}

impl From<&str> for MqttMessage {
    fn from(text: &str) -> Self {
        Self::from(text.as_bytes())
    }
}

impl From<MqttMessage> for Vec<u8> {
    fn from(message: MqttMessage) -> Self {
        message.payload
    }
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ topic: {}, payload: byte[{}], qosLevel: {}, retain: {} }}",
            self.topic,
            self.payload.len(),
            self.qos.level(),
            self.retain
        )
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtensionError;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_bytes_to_message_defaults() {
        let message = MqttMessage::from(vec![1u8, 2, 3]);
        assert_eq!(message.payload, vec![1, 2, 3]);
        assert_eq!(message.qos, QoS::AtMostOnce);
        assert!(!message.retain);
        assert!(!message.has_topic());
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let message = MqttMessage::from(Vec::new());
        assert!(message.bytes().is_empty());
        assert_eq!(message.text().unwrap(), "");
    }

    #[test]
    fn test_text_round_trip() {
        let message = MqttMessage::from("héllo wörld");
        assert_eq!(message.to_text().unwrap(), "héllo wörld");
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let message = MqttMessage::from(vec![0x68, 0x69, 0xff, 0xfe]);
        let result = message.text();
        assert!(matches!(result, Err(ExtensionError::Encoding(_))));
    }

    #[test]
    fn test_from_json_serializes_object() {
        #[derive(Serialize)]
        struct Reading {
            sensor: &'static str,
            value: f64,
        }

        let message = MqttMessage::from_json(&Reading {
            sensor: "t1",
            value: 21.5,
        })
        .unwrap();
        assert_eq!(message.text().unwrap(), r#"{"sensor":"t1","value":21.5}"#);
        assert_eq!(message.qos, QoS::AtMostOnce);
        assert!(!message.retain);
    }

    #[test]
    fn test_from_json_reports_serialization_error() {
        let mut unencodable = BTreeMap::new();
        unencodable.insert(vec![1u8, 2], 3u8);

        let result = MqttMessage::from_json(&unencodable);
        assert!(matches!(result, Err(ExtensionError::Serialization(_))));
    }

    #[test]
    fn test_json_wire_shape() {
        let message = MqttMessage::new("sensors/t1", "hi")
            .with_qos(QoS::AtLeastOnce)
            .with_retain(true);

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"topic": "sensors/t1", "payload": "aGk=", "qosLevel": 1, "retain": true})
        );
    }

    #[test]
    fn test_from_value_requires_payload() {
        assert!(MqttMessage::from_value(json!({"topic": "t"})).is_err());
        assert!(MqttMessage::from_value(json!(42)).is_err());

        let message = MqttMessage::from_value(json!({"payload": "aGk="})).unwrap();
        assert_eq!(message.payload, b"hi");
        assert_eq!(message.qos, QoS::AtMostOnce);
    }

    #[test]
    fn test_invalid_qos_level_rejected() {
        let result = MqttMessage::from_value(json!({"payload": "", "qosLevel": 3}));
        assert!(result.is_err());
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
    }

    #[test]
    fn test_wire_qos_mapping() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            let wire: WireQoS = qos.into();
            assert_eq!(QoS::from(wire), qos);
        }
    }

    #[test]
    fn test_display_and_invoke_string() {
        let message = MqttMessage::new("t", vec![0u8; 5]);
        assert_eq!(message.invoke_string(), "byte[5]");
        assert_eq!(
            message.to_string(),
            "{ topic: t, payload: byte[5], qosLevel: 0, retain: false }"
        );
    }

    proptest! {
        #[test]
        fn prop_bytes_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let message = MqttMessage::from(bytes.clone());
            prop_assert_eq!(&message.payload, &bytes);
            prop_assert_eq!(Vec::<u8>::from(message), bytes);
        }

        #[test]
        fn prop_text_round_trip(text in ".*") {
            let message = MqttMessage::from(text.clone());
            prop_assert_eq!(message.to_text().unwrap(), text);
        }
    }
}
