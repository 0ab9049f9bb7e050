//! Transport layer for device messaging
//!
//! This module provides the transport abstraction the device session drives
//! and its MQTT implementation. Framing, TLS and QoS delivery guarantees all
//! live behind [`Transport`].

use crate::protocol::SendResult;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

pub use rumqttc::v5::mqttbytes::QoS;

/// Transport trait for device communication
///
/// This trait provides an abstraction over the publish/subscribe connection
/// so the session can be exercised against a mock in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Register where connection events and inbound messages are delivered
    async fn set_event_sender(&self, sender: mpsc::UnboundedSender<TransportEvent>);

    /// Open the connection; resolves once the broker acknowledged it
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the connection without triggering a reconnect
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Subscribe to a topic filter; resolves once the broker acknowledged it
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError>;

    /// Publish a message. Failures are reported in the result, never as `Err`.
    ///
    /// Success means the message was accepted into the client's outgoing
    /// queue. It does not wait for PUBACK, so an at-least-once message can
    /// still be lost if the link drops before the broker acknowledges it.
    async fn publish(&self, message: OutboundMessage) -> SendResult;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;
}

/// Events a transport reports to its session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection acknowledged by the broker
    Connected,
    /// An established connection was lost
    Disconnected(String),
    /// Message delivered on a subscribed topic
    Message { topic: String, payload: Bytes },
}

/// A fully shaped outbound publish
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub content_type: String,
    pub qos: QoS,
    pub retain: bool,
    /// MQTT v5 message expiry interval in seconds
    pub message_expiry: Option<u32>,
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}
