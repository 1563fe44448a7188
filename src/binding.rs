//! Trigger binding: turns a dispatched value into a handler argument
//!
//! A [`TriggerBinding`] is built once per trigger parameter. Construction
//! validates the topic and the declared parameter shape, so configuration
//! errors surface before any subscription starts. [`TriggerBinding::bind`]
//! then runs per message.

use crate::error::{ensure_not_blank, ExtensionError, ExtensionResult};
use crate::listener::{Listener, TriggeredFunctionExecutor};
use crate::message::{MqttMessage, QoS};
use crate::pool::ClientPool;
use serde::Serialize;
use std::any::{type_name, TypeId};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Parameter shapes a trigger can bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParameterShape {
    /// The whole [`MqttMessage`]
    #[serde(rename = "message")]
    StructuredMessage,
    /// Payload decoded as UTF-8
    #[serde(rename = "string")]
    Text,
    /// Raw payload bytes
    #[serde(rename = "binary")]
    ByteSequence,
}

impl ParameterShape {
    /// Shape for a Rust parameter type, if it is one of the supported ones
    pub fn of<T: 'static>() -> Option<Self> {
        let id = TypeId::of::<T>();
        if id == TypeId::of::<MqttMessage>() {
            Some(ParameterShape::StructuredMessage)
        } else if id == TypeId::of::<String>() {
            Some(ParameterShape::Text)
        } else if id == TypeId::of::<Vec<u8>>() {
            Some(ParameterShape::ByteSequence)
        } else {
            None
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            ParameterShape::StructuredMessage => "MqttMessage",
            ParameterShape::Text => "String",
            ParameterShape::ByteSequence => "Vec<u8>",
        }
    }
}

impl fmt::Display for ParameterShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for ParameterShape {
    type Err = ExtensionError;

    /// Parse a declared data type: `message`, `string` or `binary`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "message" => Ok(ParameterShape::StructuredMessage),
            "string" => Ok(ParameterShape::Text),
            "binary" => Ok(ParameterShape::ByteSequence),
            _ => Err(ExtensionError::UnsupportedBindingType(s.to_string())),
        }
    }
}

/// A value handed to [`TriggerBinding::bind`]
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerValue {
    Message(MqttMessage),
    Text(String),
    Bytes(Vec<u8>),
    /// A JSON value that must have the message shape
    Json(serde_json::Value),
}

impl fmt::Display for TriggerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerValue::Message(message) => write!(f, "{message}"),
            TriggerValue::Text(text) => write!(f, "{text:?}"),
            TriggerValue::Bytes(bytes) => write!(f, "byte[{}]", bytes.len()),
            TriggerValue::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<MqttMessage> for TriggerValue {
    fn from(message: MqttMessage) -> Self {
        TriggerValue::Message(message)
    }
}

impl From<String> for TriggerValue {
    fn from(text: String) -> Self {
        TriggerValue::Text(text)
    }
}

impl From<&str> for TriggerValue {
    fn from(text: &str) -> Self {
        TriggerValue::Text(text.to_string())
    }
}

impl From<Vec<u8>> for TriggerValue {
    fn from(bytes: Vec<u8>) -> Self {
        TriggerValue::Bytes(bytes)
    }
}

impl From<serde_json::Value> for TriggerValue {
    fn from(value: serde_json::Value) -> Self {
        TriggerValue::Json(value)
    }
}

/// The argument produced for the handler parameter
#[derive(Debug, Clone, PartialEq)]
pub enum BoundArgument {
    Message(MqttMessage),
    Text(String),
    Bytes(Vec<u8>),
}

impl BoundArgument {
    pub fn shape(&self) -> ParameterShape {
        match self {
            BoundArgument::Message(_) => ParameterShape::StructuredMessage,
            BoundArgument::Text(_) => ParameterShape::Text,
            BoundArgument::Bytes(_) => ParameterShape::ByteSequence,
        }
    }

    pub fn as_message(&self) -> Option<&MqttMessage> {
        match self {
            BoundArgument::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            BoundArgument::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BoundArgument::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Types of the contextual values in [`BindingData`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingDataType {
    Byte,
    Bool,
    String,
}

/// A single contextual value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingValue {
    Byte(u8),
    Bool(bool),
    String(String),
}

impl fmt::Display for BindingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingValue::Byte(value) => write!(f, "{value}"),
            BindingValue::Bool(value) => write!(f, "{value}"),
            BindingValue::String(value) => f.write_str(value),
        }
    }
}

const BINDING_DATA_CONTRACT: [(&str, BindingDataType); 3] = [
    ("QualityOfServiceLevel", BindingDataType::Byte),
    ("Retain", BindingDataType::Bool),
    ("Topic", BindingDataType::String),
];

/// Per-invocation contextual values derived from the dispatched message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BindingData {
    pub quality_of_service_level: u8,
    pub retain: bool,
    pub topic: String,
}

impl BindingData {
    pub fn from_message(message: &MqttMessage) -> Self {
        Self {
            quality_of_service_level: message.qos.level(),
            retain: message.retain,
            topic: message.topic.clone(),
        }
    }

    /// Look up a value by name, ignoring ASCII case
    pub fn get(&self, name: &str) -> Option<BindingValue> {
        if name.eq_ignore_ascii_case("QualityOfServiceLevel") {
            Some(BindingValue::Byte(self.quality_of_service_level))
        } else if name.eq_ignore_ascii_case("Retain") {
            Some(BindingValue::Bool(self.retain))
        } else if name.eq_ignore_ascii_case("Topic") {
            Some(BindingValue::String(self.topic.clone()))
        } else {
            None
        }
    }

    /// All values in contract order
    pub fn entries(&self) -> Vec<(&'static str, BindingValue)> {
        BINDING_DATA_CONTRACT
            .iter()
            .filter_map(|(name, _)| self.get(name).map(|value| (*name, value)))
            .collect()
    }
}

/// Result of binding one dispatched value
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerData {
    pub argument: BoundArgument,
    pub binding_data: BindingData,
    /// Diagnostic rendering of the argument, `byte[<payload length>]`
    pub invoke_string: String,
}

/// Hints a host can show when invoking the function by hand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayHints {
    pub prompt: String,
    pub description: String,
}

/// Describes the trigger parameter to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub topic: String,
    pub shape: ParameterShape,
    pub display_hints: DisplayHints,
}

impl ParameterDescriptor {
    pub fn trigger_reason(&self) -> String {
        format!("New MQTT message detected on topic '{}'.", self.topic)
    }
}

/// Binding for one trigger parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBinding {
    topic: String,
    shape: ParameterShape,
}

impl TriggerBinding {
    pub fn new(topic: impl Into<String>, shape: ParameterShape) -> ExtensionResult<Self> {
        let topic = topic.into();
        Self::validate(&topic)?;
        Ok(Self { topic, shape })
    }

    /// Binding for parameter type `T`; only `MqttMessage`, `String` and
    /// `Vec<u8>` are accepted
    pub fn for_type<T: 'static>(topic: impl Into<String>) -> ExtensionResult<Self> {
        let shape = ParameterShape::of::<T>()
            .ok_or_else(|| ExtensionError::UnsupportedBindingType(type_name::<T>().to_string()))?;
        Self::new(topic, shape)
    }

    /// Binding for a declared data type name (`message`, `string`, `binary`)
    pub fn from_declared(topic: impl Into<String>, data_type: &str) -> ExtensionResult<Self> {
        let shape = data_type.parse()?;
        Self::new(topic, shape)
    }

    /// Reject an empty topic name
    pub fn validate(topic: &str) -> ExtensionResult<()> {
        ensure_not_blank("topic", topic)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn shape(&self) -> ParameterShape {
        self.shape
    }

    pub fn binding_data_contract() -> &'static [(&'static str, BindingDataType)] {
        &BINDING_DATA_CONTRACT
    }

    /// Normalize `value` into a message and project it onto the parameter shape
    ///
    /// Raw text and bytes are addressed to this binding's topic with QoS 0
    /// and no retain flag.
    pub fn bind(&self, value: impl Into<TriggerValue>) -> ExtensionResult<TriggerData> {
        let message = self.to_message(value.into())?;
        let binding_data = BindingData::from_message(&message);
        let invoke_string = message.invoke_string();

        let argument = match self.shape {
            ParameterShape::StructuredMessage => BoundArgument::Message(message),
            ParameterShape::Text => BoundArgument::Text(message.to_text()?),
            ParameterShape::ByteSequence => BoundArgument::Bytes(message.into_bytes()),
        };

        Ok(TriggerData {
            argument,
            binding_data,
            invoke_string,
        })
    }

    fn to_message(&self, value: TriggerValue) -> ExtensionResult<MqttMessage> {
        match value {
            TriggerValue::Message(message) => Ok(message),
            TriggerValue::Text(text) => Ok(self.wrap(text.into_bytes())),
            TriggerValue::Bytes(bytes) => Ok(self.wrap(bytes)),
            TriggerValue::Json(value) => {
                let rendered = value.to_string();
                MqttMessage::from_value(value)
                    .map_err(|_| ExtensionError::binding(rendered, self.shape.type_name()))
            }
        }
    }

    fn wrap(&self, payload: Vec<u8>) -> MqttMessage {
        MqttMessage::new(self.topic.clone(), payload)
            .with_qos(QoS::AtMostOnce)
            .with_retain(false)
    }

    pub fn to_parameter_descriptor(&self, name: impl Into<String>) -> ParameterDescriptor {
        ParameterDescriptor {
            name: name.into(),
            topic: self.topic.clone(),
            shape: self.shape,
            display_hints: DisplayHints {
                prompt: "Enter the MQTT message payload".to_string(),
                description: format!("receive from '{}'", self.topic),
            },
        }
    }

    /// Listener subscribed to this binding's topic
    pub fn create_listener(
        &self,
        pool: Arc<ClientPool>,
        executor: Arc<dyn TriggeredFunctionExecutor>,
    ) -> ExtensionResult<Listener> {
        Listener::new(self.topic.clone(), pool, executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_text_scenario() {
        let binding = TriggerBinding::for_type::<String>("t").unwrap();
        let message = MqttMessage::new("t", "hello");

        let data = binding.bind(message).unwrap();

        assert_eq!(data.argument, BoundArgument::Text("hello".to_string()));
        assert_eq!(
            data.binding_data,
            BindingData {
                topic: "t".to_string(),
                retain: false,
                quality_of_service_level: 0,
            }
        );
        assert_eq!(data.invoke_string, "byte[5]");
    }

    #[test]
    fn test_bind_message_passes_through() {
        let binding = TriggerBinding::for_type::<MqttMessage>("topic/#").unwrap();
        let message = MqttMessage::new("topic/one", vec![1, 2, 3])
            .with_qos(QoS::ExactlyOnce)
            .with_retain(true);

        let data = binding.bind(message.clone()).unwrap();

        assert_eq!(data.argument, BoundArgument::Message(message));
        assert_eq!(data.binding_data.quality_of_service_level, 2);
        assert!(data.binding_data.retain);
        assert_eq!(data.binding_data.topic, "topic/one");
    }

    #[test]
    fn test_bind_bytes_keeps_payload() {
        let binding = TriggerBinding::for_type::<Vec<u8>>("t").unwrap();
        let payload = vec![0xff, 0x00, 0x7f];

        let data = binding.bind(MqttMessage::new("t", payload.clone())).unwrap();

        assert_eq!(data.argument.as_bytes(), Some(payload.as_slice()));
    }

    #[test]
    fn test_raw_string_is_wrapped_with_binding_topic() {
        let binding = TriggerBinding::for_type::<MqttMessage>("topic/one").unwrap();

        let data = binding.bind("raw").unwrap();

        let message = data.argument.as_message().unwrap();
        assert_eq!(message.topic, "topic/one");
        assert_eq!(message.payload, b"raw");
        assert_eq!(message.qos, QoS::AtMostOnce);
        assert!(!message.retain);
    }

    #[test]
    fn test_json_message_shape_binds() {
        let binding = TriggerBinding::for_type::<String>("t").unwrap();
        let value = json!({
            "topic": "t/json",
            "payload": "aGVsbG8=",
            "qosLevel": 1,
            "retain": true
        });

        let data = binding.bind(value).unwrap();

        assert_eq!(data.argument.as_text(), Some("hello"));
        assert_eq!(data.binding_data.topic, "t/json");
        assert_eq!(data.binding_data.quality_of_service_level, 1);
    }

    #[test]
    fn test_unconvertible_value_is_binding_error() {
        let binding = TriggerBinding::for_type::<String>("t").unwrap();

        for value in [json!(42), json!([1, 2]), json!({"payload": 7})] {
            let err = binding.bind(value).unwrap_err();
            assert!(matches!(err, ExtensionError::Binding { .. }));
            assert!(err.to_string().contains("to type 'String'"), "got: {err}");
        }
    }

    #[test]
    fn test_invalid_utf8_text_is_encoding_error() {
        let binding = TriggerBinding::for_type::<String>("t").unwrap();
        let result = binding.bind(MqttMessage::new("t", vec![0xc3, 0x28]));
        assert!(matches!(result, Err(ExtensionError::Encoding(_))));
    }

    #[test]
    fn test_unsupported_type_rejected_at_setup() {
        let err = TriggerBinding::for_type::<u64>("t").unwrap_err();
        assert!(matches!(err, ExtensionError::UnsupportedBindingType(ref name) if name == "u64"));

        let err = TriggerBinding::from_declared("t", "stream").unwrap_err();
        assert!(matches!(err, ExtensionError::UnsupportedBindingType(_)));
    }

    #[test]
    fn test_blank_topic_rejected() {
        assert!(matches!(
            TriggerBinding::new("", ParameterShape::Text),
            Err(ExtensionError::InvalidArgument { .. })
        ));
        assert!(TriggerBinding::validate("  ").is_err());
    }

    #[test]
    fn test_declared_shapes() {
        assert_eq!(
            "Message".parse::<ParameterShape>().unwrap(),
            ParameterShape::StructuredMessage
        );
        assert_eq!(
            "string".parse::<ParameterShape>().unwrap(),
            ParameterShape::Text
        );
        assert_eq!(
            " binary ".parse::<ParameterShape>().unwrap(),
            ParameterShape::ByteSequence
        );
    }

    #[test]
    fn test_binding_data_lookup_ignores_case() {
        let data = BindingData::from_message(&MqttMessage::new("a/b", "x").with_retain(true));

        assert_eq!(data.get("topic"), Some(BindingValue::String("a/b".into())));
        assert_eq!(data.get("RETAIN"), Some(BindingValue::Bool(true)));
        assert_eq!(
            data.get("qualityofservicelevel"),
            Some(BindingValue::Byte(0))
        );
        assert_eq!(data.get("payload"), None);
        assert_eq!(data.entries().len(), 3);
    }

    #[test]
    fn test_binding_data_contract() {
        let contract = TriggerBinding::binding_data_contract();
        assert_eq!(
            contract,
            &[
                ("QualityOfServiceLevel", BindingDataType::Byte),
                ("Retain", BindingDataType::Bool),
                ("Topic", BindingDataType::String),
            ]
        );
    }

    #[test]
    fn test_binding_data_serializes_with_contract_names() {
        let data = BindingData::from_message(&MqttMessage::new("t", "x"));
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(
            json,
            json!({"QualityOfServiceLevel": 0, "Retain": false, "Topic": "t"})
        );
    }

    #[test]
    fn test_parameter_descriptor() {
        let binding = TriggerBinding::for_type::<String>("topic/one").unwrap();
        let descriptor = binding.to_parameter_descriptor("input");

        assert_eq!(descriptor.name, "input");
        assert_eq!(
            descriptor.trigger_reason(),
            "New MQTT message detected on topic 'topic/one'."
        );
        assert_eq!(descriptor.display_hints.description, "receive from 'topic/one'");
    }
}
