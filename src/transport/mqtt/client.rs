//! Impure I/O operations for the MQTT transport
//!
//! This module owns the rumqttc client and event loop. Each `connect()` builds
//! a fresh client/event-loop pair and spawns a poll task that forwards
//! connection changes and inbound publishes to the session.

use super::connection::{configure_mqtt_options, LinkState};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::{DeviceConfig, DeviceSection, MqttSection};
use crate::protocol::{PublishReason, SendResult};
use crate::transport::{OutboundMessage, QoS, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 64;
/// Time the poll task gets to flush DISCONNECT before it is aborted
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type SubAckResult = Option<Result<(), String>>;

/// MQTT transport for a single Hono device
pub struct MqttTransport {
    device: DeviceSection,
    mqtt: MqttSection,
    password: Option<String>,
    ack_timeout: Duration,
    client: Mutex<Option<AsyncClient>>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
    link: Arc<PollContext>,
}

/// State shared between the transport and its poll task
struct PollContext {
    link_tx: watch::Sender<LinkState>,
    suback_tx: watch::Sender<SubAckResult>,
    event_sender: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    closing: AtomicBool,
}

impl PollContext {
    async fn emit(&self, event: TransportEvent) {
        if let Some(sender) = self.event_sender.lock().await.as_ref() {
            if sender.send(event).is_err() {
                debug!(target: "mqtt_transport", "Event receiver dropped");
            }
        }
    }

    /// Record the end of a link; only established links are reported as lost
    async fn close(&self, established: bool, reason: String) {
        self.link_tx.send_replace(LinkState::Closed(reason.clone()));
        if established && !self.closing.load(Ordering::SeqCst) {
            self.emit(TransportEvent::Disconnected(reason)).await;
        }
    }
}

impl MqttTransport {
    pub fn new(
        device: DeviceSection,
        mqtt: MqttSection,
        password: Option<String>,
    ) -> Result<Self, TransportError> {
        // Fail fast on a bad broker URL instead of at first connect
        configure_mqtt_options(&device, &mqtt, password.as_deref())?;

        let ack_timeout = Duration::from_secs(mqtt.connect_timeout_secs);
        let (link_tx, _) = watch::channel(LinkState::Idle);
        let (suback_tx, _) = watch::channel(None);

        Ok(Self {
            device,
            mqtt,
            password,
            ack_timeout,
            client: Mutex::new(None),
            poll_handle: Mutex::new(None),
            link: Arc::new(PollContext {
                link_tx,
                suback_tx,
                event_sender: Mutex::new(None),
                closing: AtomicBool::new(false),
            }),
        })
    }

    /// Build a transport from configuration, resolving the password env var
    pub fn from_config(config: &DeviceConfig) -> Result<Self, TransportError> {
        Self::new(
            config.device.clone(),
            config.mqtt.clone(),
            config.get_password(),
        )
    }

    /// Current link state of the active connection
    pub fn link_state(&self) -> LinkState {
        self.link.link_tx.borrow().clone()
    }

    /// Wait for the poll task to report CONNACK
    async fn wait_for_connack(
        mut link_rx: watch::Receiver<LinkState>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                let state = link_rx.borrow_and_update().clone();
                match state {
                    LinkState::Connected => return Ok(()),
                    LinkState::Closed(reason) => {
                        return Err(TransportError::ConnectionFailed(reason));
                    }
                    LinkState::Idle | LinkState::Connecting => {}
                }
                if link_rx.changed().await.is_err() {
                    return Err(TransportError::ConnectionFailed(
                        "Link state channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        outcome.unwrap_or(Err(TransportError::Timeout("CONNACK")))
    }

    /// Wait for the poll task to report the next SUBACK
    async fn wait_for_suback(
        mut suback_rx: watch::Receiver<SubAckResult>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                if suback_rx.changed().await.is_err() {
                    return Err(TransportError::SubscriptionFailed(
                        "SubAck channel closed".to_string(),
                    ));
                }
                if let Some(result) = suback_rx.borrow_and_update().clone() {
                    return result.map_err(TransportError::SubscriptionFailed);
                }
            }
        })
        .await;

        outcome.unwrap_or(Err(TransportError::Timeout("SUBACK")))
    }

    /// Drive one connection's event loop until it ends
    async fn run_event_loop(mut event_loop: EventLoop, link: Arc<PollContext>) {
        let mut established = false;

        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => {
                        established = true;
                        link.link_tx.send_replace(LinkState::Connected);
                        link.emit(TransportEvent::Connected).await;
                    }
                    EventRoute::MessageReceived { topic, payload } => {
                        debug!(target: "mqtt_transport", "Received message topic: {}", topic);
                        link.emit(TransportEvent::Message { topic, payload }).await;
                    }
                    EventRoute::Disconnected(reason) => {
                        link.close(established, reason).await;
                        break;
                    }
                    EventRoute::SubscriptionAcknowledged(result) => {
                        debug!(target: "mqtt_transport", "Subscription acknowledged: {:?}", result);
                        link.suback_tx.send_replace(Some(result));
                    }
                    EventRoute::InfrastructureEvent(event_str) => {
                        debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(e) => {
                    link.close(established, e.to_string()).await;
                    break;
                }
            }
        }
        debug!(target: "mqtt_transport", "MQTT event loop stopped");
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn set_event_sender(&self, sender: mpsc::UnboundedSender<TransportEvent>) {
        *self.link.event_sender.lock().await = Some(sender);
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let options =
            configure_mqtt_options(&self.device, &self.mqtt, self.password.as_deref())?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        // A previous link may still be winding down
        if let Some(previous) = self.poll_handle.lock().await.take() {
            previous.abort();
        }

        self.link.closing.store(false, Ordering::SeqCst);
        let link_rx = self.link.link_tx.subscribe();
        self.link.link_tx.send_replace(LinkState::Connecting);
        *self.client.lock().await = Some(client);

        info!(
            broker = %self.mqtt.broker_url,
            device_id = %self.device.device_id,
            "Connecting to MQTT adapter"
        );
        let handle = tokio::spawn(Self::run_event_loop(event_loop, self.link.clone()));
        *self.poll_handle.lock().await = Some(handle);

        match Self::wait_for_connack(link_rx, self.ack_timeout).await {
            Ok(()) => {
                info!("Connected to MQTT adapter");
                Ok(())
            }
            Err(e) => {
                if let Some(handle) = self.poll_handle.lock().await.take() {
                    handle.abort();
                }
                self.client.lock().await.take();
                self.link
                    .link_tx
                    .send_replace(LinkState::Closed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.link.closing.store(true, Ordering::SeqCst);

        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.disconnect().await {
                warn!("Failed to send DISCONNECT: {}", e);
            }
        }

        if let Some(mut handle) = self.poll_handle.lock().await.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                handle.abort();
            }
        }

        self.link
            .link_tx
            .send_replace(LinkState::Closed("Client disconnected".to_string()));
        info!("MQTT client disconnected");
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let suback_rx = self.link.suback_tx.subscribe();
        client.subscribe(filter, qos).await.map_err(|e| {
            TransportError::SubscriptionFailed(format!("Failed to subscribe to {filter}: {e}"))
        })?;

        Self::wait_for_suback(suback_rx, self.ack_timeout).await?;
        info!("Subscribed to {}", filter);
        Ok(())
    }

    /// Hands the message to rumqttc without waiting; a full request channel
    /// is reported as quota exceeded
    async fn publish(&self, message: OutboundMessage) -> SendResult {
        if !self.is_connected() {
            return SendResult::from_reason(
                PublishReason::ImplementationSpecificError,
                "Not connected to MQTT adapter",
            );
        }
        let Some(client) = self.client.lock().await.clone() else {
            return SendResult::from_reason(
                PublishReason::ImplementationSpecificError,
                "Not connected to MQTT adapter",
            );
        };

        let properties = MessageHandler::publish_properties(&message);
        match client.try_publish_with_properties(
            message.topic.clone(),
            message.qos,
            message.retain,
            message.payload,
            properties,
        ) {
            Ok(()) => {
                debug!(topic = %message.topic, qos = ?message.qos, "Published message");
                SendResult::success()
            }
            Err(e) => {
                warn!(topic = %message.topic, "Publish failed: {}", e);
                MessageHandler::publish_failure(&e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        matches!(self.link_state(), LinkState::Connected)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // Async disconnect is not possible here; only stop the poll task
        if let Some(handle) = self.poll_handle.get_mut().take() {
            handle.abort();
        }
    }
}
