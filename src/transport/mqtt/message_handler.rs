//! Pure routing of rumqttc events
//!
//! Turns raw v5 events into routing decisions the session supervisor acts on.

use crate::message::MqttMessage;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(MqttMessage {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    qos: publish.qos.into(),
                    retain: publish.retain,
                }),
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    outcome: Self::validate_subscription_success(&suback.return_codes),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeSent {
                packet_id: *pkid,
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(codes: &[SubscribeReasonCode]) -> Result<(), String> {
        if codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
        {
            Ok(())
        } else {
            Err(format!("Subscription failed with reason codes: {codes:?}"))
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived(MqttMessage),
    /// MQTT broker disconnected
    Disconnected,
    /// SUBSCRIBE written to the wire with its packet id
    SubscribeSent { packet_id: u16 },
    /// SubAck from the broker; `Err` carries the rejecting reason codes
    SubscriptionConfirmed {
        packet_id: u16,
        outcome: Result<(), String>,
    },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::QoS;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish, SubAck,
    };
    use rumqttc::v5::mqttbytes::QoS as WireQoS;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: WireQoS::AtLeastOnce,
            retain: true,
            topic: Bytes::from("topic/one"),
            pkid: 1,
            payload: Bytes::from("hello"),
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&publish) {
            EventRoute::MessageReceived(message) => {
                assert_eq!(message.topic, "topic/one");
                assert_eq!(message.payload, b"hello");
                assert_eq!(message.qos, QoS::AtLeastOnce);
                assert!(message.retain);
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_outgoing_subscribe_carries_packet_id() {
        let sent = Event::Outgoing(Outgoing::Subscribe(7));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&sent),
            EventRoute::SubscribeSent { packet_id: 7 }
        ));

        let ping = Event::Outgoing(Outgoing::PingReq);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&ping),
            EventRoute::OutgoingEvent
        ));
    }

    #[test]
    fn test_route_rejected_suback() {
        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 3,
            return_codes: vec![SubscribeReasonCode::NotAuthorized],
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&suback) {
            EventRoute::SubscriptionConfirmed { packet_id, outcome } => {
                assert_eq!(packet_id, 3);
                assert!(outcome.unwrap_err().contains("NotAuthorized"));
            }
            other => panic!("Expected SubscriptionConfirmed route, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_subscription_success() {
        assert!(MessageHandler::validate_subscription_success(&[
            SubscribeReasonCode::Success(WireQoS::AtMostOnce),
            SubscribeReasonCode::Success(WireQoS::ExactlyOnce),
        ])
        .is_ok());

        assert!(MessageHandler::validate_subscription_success(&[
            SubscribeReasonCode::Success(WireQoS::AtMostOnce),
            SubscribeReasonCode::NotAuthorized,
        ])
        .is_err());
    }
}
