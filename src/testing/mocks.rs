//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] that records every operation in order and
//! lets tests inject inbound commands and connection loss.

use crate::protocol::SendResult;
use crate::transport::{OutboundMessage, QoS, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// One call made against the mock, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOp {
    Connect,
    Disconnect,
    Subscribe { filter: String, qos: QoS },
    Publish(OutboundMessage),
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    operations: Mutex<Vec<TransportOp>>,
    event_sender: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    publish_result: Mutex<Option<SendResult>>,
    connected: AtomicBool,
    failing_connects: AtomicUsize,
    fail_subscribe: AtomicBool,
    subscribe_delay: Mutex<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connect attempts fail
    pub fn with_failing_connects(count: usize) -> Self {
        let transport = Self::new();
        transport.fail_next_connects(count);
        transport
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Hold every following subscribe for `delay` before it is acknowledged
    pub async fn set_subscribe_delay(&self, delay: Duration) {
        *self.subscribe_delay.lock().await = delay;
    }

    /// Result returned by every following publish (default: success)
    pub async fn set_publish_result(&self, result: SendResult) {
        *self.publish_result.lock().await = Some(result);
    }

    pub async fn operations(&self) -> Vec<TransportOp> {
        self.operations.lock().await.clone()
    }

    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.operations
            .lock()
            .await
            .iter()
            .filter_map(|op| match op {
                TransportOp::Publish(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.operations
            .lock()
            .await
            .iter()
            .filter_map(|op| match op {
                TransportOp::Subscribe { filter, .. } => Some(filter.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn connect_attempts(&self) -> usize {
        self.operations
            .lock()
            .await
            .iter()
            .filter(|op| matches!(op, TransportOp::Connect))
            .count()
    }

    pub async fn clear_history(&self) {
        self.operations.lock().await.clear();
    }

    /// Deliver an inbound message as if the broker had sent it
    pub async fn inject_message(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.emit(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        })
        .await
    }

    /// Drop the connection as if the broker had gone away
    pub async fn inject_disconnect(&self, reason: &str) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Disconnected(reason.to_string()))
            .await
    }

    /// Poll until at least `count` operations were recorded
    pub async fn wait_for_operations(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.operations.lock().await.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    async fn record(&self, op: TransportOp) {
        self.operations.lock().await.push(op);
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        match self.event_sender.lock().await.as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn set_event_sender(&self, sender: mpsc::UnboundedSender<TransportEvent>) {
        *self.event_sender.lock().await = Some(sender);
    }

    /// Recorded once the outcome is known, so a recorded successful
    /// `Connect` always has its `Connected` event queued already.
    async fn connect(&self) -> Result<(), TransportError> {
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            self.record(TransportOp::Connect).await;
            return Err(TransportError::ConnectionFailed(
                "Mock connection failure".to_string(),
            ));
        }

        self.connected.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Connected).await;
        self.record(TransportOp::Connect).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.record(TransportOp::Disconnect).await;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Recorded when the subscription is acknowledged or refused
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        let delay = *self.subscribe_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.record(TransportOp::Subscribe {
            filter: filter.to_string(),
            qos,
        })
        .await;

        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::SubscriptionFailed(
                "Mock subscription failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> SendResult {
        self.record(TransportOp::Publish(message)).await;
        self.publish_result
            .lock()
            .await
            .clone()
            .unwrap_or_else(SendResult::success)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
