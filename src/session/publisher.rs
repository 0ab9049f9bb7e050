//! Outbound message shaping for telemetry, events and command responses

use crate::protocol::{Command, PublishReason, SendResult, TopicTable};
use crate::transport::{OutboundMessage, QoS, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Content type used when the caller does not name one
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=\"utf-8\"";

/// Publishes on the topics of one device
pub struct Publisher<T: Transport> {
    transport: Arc<T>,
    topics: Arc<TopicTable>,
    message_expiry: u32,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: Arc<T>, topics: Arc<TopicTable>, message_expiry: u32) -> Self {
        Self {
            transport,
            topics,
            message_expiry,
        }
    }

    /// Telemetry: QoS 0, not retained, expires
    pub fn telemetry_message(&self, payload: Bytes, content_type: &str) -> OutboundMessage {
        OutboundMessage {
            topic: self.topics.telemetry().to_string(),
            payload,
            content_type: content_type.to_string(),
            qos: QoS::AtMostOnce,
            retain: false,
            message_expiry: Some(self.message_expiry),
        }
    }

    /// Event: QoS 1, no expiry
    pub fn event_message(&self, payload: Bytes, content_type: &str) -> OutboundMessage {
        OutboundMessage {
            topic: self.topics.event().to_string(),
            payload,
            content_type: content_type.to_string(),
            qos: QoS::AtLeastOnce,
            retain: false,
            message_expiry: None,
        }
    }

    /// Command response: QoS 0, not retained, expires
    pub fn response_message(
        &self,
        request_id: &str,
        status: u16,
        payload: Bytes,
        content_type: &str,
    ) -> OutboundMessage {
        OutboundMessage {
            topic: self.topics.command_response(request_id, status),
            payload,
            content_type: content_type.to_string(),
            qos: QoS::AtMostOnce,
            retain: false,
            message_expiry: Some(self.message_expiry),
        }
    }

    pub async fn send_telemetry(&self, payload: Bytes, content_type: &str) -> SendResult {
        debug!(
            "Send telemetry with payload '{}'",
            String::from_utf8_lossy(&payload)
        );
        let message = self.telemetry_message(payload, content_type);
        self.transport.publish(message).await
    }

    pub async fn send_event(&self, payload: Bytes, content_type: &str) -> SendResult {
        debug!(
            "Send event with payload '{}'",
            String::from_utf8_lossy(&payload)
        );
        let message = self.event_message(payload, content_type);
        self.transport.publish(message).await
    }

    /// Respond to a request/response command and record the status on it
    pub async fn send_command_response(
        &self,
        command: &mut Command,
        status: u16,
        payload: Bytes,
        content_type: &str,
    ) -> SendResult {
        let Some(request_id) = command.request_id.clone() else {
            warn!(
                command = command.name(),
                "Command is one-way, no response is sent"
            );
            return SendResult::from_reason(
                PublishReason::ImplementationSpecificError,
                "One-way commands do not take a response",
            );
        };

        command.status = Some(status.to_string());
        debug!(
            request_id = %request_id,
            status,
            "Send response for command '{}'",
            command.name()
        );
        let message = self.response_message(&request_id, status, payload, content_type);
        self.transport.publish(message).await
    }
}
