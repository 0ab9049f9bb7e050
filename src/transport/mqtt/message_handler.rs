//! Pure message routing and publish shaping for MQTT events
//!
//! This module contains pure functions that turn rumqttc events into routing
//! decisions and outbound messages into MQTT v5 publish properties.

use crate::protocol::{PublishReason, SendResult};
use crate::transport::OutboundMessage;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties, SubscribeReasonCode};
use rumqttc::v5::{ClientError, Event};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected(format!(
                    "Broker disconnected: {:?}",
                    disconnect.reason_code
                )),
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged(
                    Self::validate_subscription_success(&suback.return_codes),
                ),
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(
        return_codes: &[SubscribeReasonCode],
    ) -> Result<(), String> {
        if return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
        {
            Ok(())
        } else {
            Err(format!(
                "Subscription failed with return codes: {return_codes:?}"
            ))
        }
    }

    /// MQTT v5 properties for an outbound message (pure function)
    pub fn publish_properties(message: &OutboundMessage) -> PublishProperties {
        PublishProperties {
            content_type: Some(message.content_type.clone()),
            message_expiry_interval: message.message_expiry,
            ..Default::default()
        }
    }

    /// Map a client-side publish failure onto a send result (pure function)
    pub fn publish_failure(error: &ClientError) -> SendResult {
        let reason = match error {
            ClientError::TryRequest(_) => PublishReason::QuotaExceeded,
            _ => PublishReason::UnspecifiedError,
        };
        SendResult::from_reason(reason, error.to_string())
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// MQTT broker disconnected
    Disconnected(String),
    /// SubAck with its validated outcome
    SubscriptionAcknowledged(Result<(), String>),
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::QoS;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish,
    };

    fn outbound(message_expiry: Option<u32>) -> OutboundMessage {
        OutboundMessage {
            topic: "telemetry".to_string(),
            payload: Bytes::from_static(b"21.5"),
            content_type: "text/plain; charset=\"utf-8\"".to_string(),
            qos: QoS::AtMostOnce,
            retain: false,
            message_expiry,
        }
    }

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
            reason_code: DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        }));
        match MessageHandler::route_mqtt_event(&disconnect) {
            EventRoute::Disconnected(reason) => assert!(reason.contains("ServerShuttingDown")),
            other => panic!("Expected Disconnected route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("command///q//setBrightness"),
            pkid: 1,
            payload: Bytes::from("80"),
            properties: None,
        }));

        if let EventRoute::MessageReceived { topic, payload } =
            MessageHandler::route_mqtt_event(&publish)
        {
            assert_eq!(topic, "command///q//setBrightness");
            assert_eq!(payload, Bytes::from("80"));
        } else {
            panic!("Expected MessageReceived route");
        }
    }

    #[test]
    fn test_validate_subscription_success() {
        let granted = vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)];
        assert!(MessageHandler::validate_subscription_success(&granted).is_ok());

        let refused = vec![SubscribeReasonCode::NotAuthorized];
        assert!(MessageHandler::validate_subscription_success(&refused).is_err());

        let mixed = vec![
            SubscribeReasonCode::Success(QoS::AtMostOnce),
            SubscribeReasonCode::Unspecified,
        ];
        assert!(MessageHandler::validate_subscription_success(&mixed).is_err());
    }

    #[test]
    fn test_publish_properties_carry_content_type_and_expiry() {
        let props = MessageHandler::publish_properties(&outbound(Some(6000)));
        assert_eq!(
            props.content_type.as_deref(),
            Some("text/plain; charset=\"utf-8\"")
        );
        assert_eq!(props.message_expiry_interval, Some(6000));
    }

    #[test]
    fn test_publish_properties_without_expiry() {
        let props = MessageHandler::publish_properties(&outbound(None));
        assert_eq!(props.message_expiry_interval, None);
        assert!(props.user_properties.is_empty());
    }

    #[test]
    fn test_publish_is_accepted_before_any_broker_ack() {
        use rumqttc::v5::{AsyncClient, MqttOptions};

        // Nothing polls the event loop, so no broker is ever contacted
        let (client, _event_loop) = AsyncClient::new(MqttOptions::new("d", "localhost", 1883), 1);
        let message = outbound(Some(60));
        let publish = || {
            client.try_publish_with_properties(
                message.topic.clone(),
                message.qos,
                message.retain,
                message.payload.clone(),
                MessageHandler::publish_properties(&message),
            )
        };

        assert!(publish().is_ok());
        let error = publish().expect_err("request channel should be full");
        assert_eq!(
            MessageHandler::publish_failure(&error).result_code,
            PublishReason::QuotaExceeded.code()
        );
    }
}
