//! Device session
//!
//! A [`DeviceSession`] owns one transport connection to the Hono MQTT adapter.
//! It subscribes to the command topic, queues every inbound command in arrival
//! order, and publishes telemetry, events and command responses.
//!
//! A single driver task consumes transport events in order. A lost connection
//! is retried after a fixed delay, without limit, until it succeeds or the
//! session is shut down. The command subscription is restored on every
//! reconnect before any later inbound message is handled.

pub mod publisher;
pub mod queue;
pub mod state;

pub use publisher::{Publisher, DEFAULT_CONTENT_TYPE};
pub use queue::CommandQueue;
pub use state::ConnectionState;

use crate::config::{DeviceConfig, MqttSection};
use crate::protocol::{parse_command_topic, AuthMode, Command, SendResult, TopicTable};
use crate::transport::mqtt::MqttTransport;
use crate::transport::{QoS, Transport, TransportError, TransportEvent};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Receive cancelled")]
    Cancelled,
    #[error("No command received within {0:?}")]
    Timeout(Duration),
    #[error("Session closed")]
    Closed,
}

/// Tunables of a device session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Expiry for telemetry and command responses, in seconds
    pub message_expiry_secs: u32,
    /// Fixed wait before each reconnect attempt
    pub reconnect_delay: Duration,
    /// QoS requested for the command subscription
    pub subscribe_qos: QoS,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            message_expiry_secs: 6000,
            reconnect_delay: Duration::from_secs(5),
            subscribe_qos: QoS::AtLeastOnce,
        }
    }
}

impl From<&MqttSection> for SessionSettings {
    fn from(mqtt: &MqttSection) -> Self {
        Self {
            message_expiry_secs: mqtt.message_expiry_secs,
            reconnect_delay: Duration::from_secs(mqtt.reconnect_delay_secs),
            ..Self::default()
        }
    }
}

/// Connection, command queue and publishing for one Hono device
pub struct DeviceSession<T: Transport> {
    tenant_id: String,
    device_id: String,
    transport: Arc<T>,
    topics: Arc<TopicTable>,
    publisher: Publisher<T>,
    queue: Arc<CommandQueue>,
    settings: SessionSettings,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSession<MqttTransport> {
    /// Build an MQTT-backed session. The password is resolved once so the
    /// topic forms always agree with the credentials sent on CONNECT.
    pub fn from_config(config: &DeviceConfig) -> Result<Self, SessionError> {
        let password = config.get_password();
        let auth_mode = AuthMode::from_credentials(password.as_deref());
        let transport = MqttTransport::new(config.device.clone(), config.mqtt.clone(), password)?;

        Ok(Self::new(
            transport,
            &config.device.tenant_id,
            &config.device.device_id,
            auth_mode,
            SessionSettings::from(&config.mqtt),
        ))
    }
}

impl<T: Transport> DeviceSession<T> {
    pub fn new(
        transport: T,
        tenant_id: &str,
        device_id: &str,
        auth_mode: AuthMode,
        settings: SessionSettings,
    ) -> Self {
        let transport = Arc::new(transport);
        let topics = Arc::new(TopicTable::new(tenant_id, device_id, auth_mode));
        let publisher = Publisher::new(
            transport.clone(),
            topics.clone(),
            settings.message_expiry_secs,
        );
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            tenant_id: tenant_id.to_string(),
            device_id: device_id.to_string(),
            transport,
            topics,
            publisher,
            queue: Arc::new(CommandQueue::new()),
            settings,
            state_tx: Arc::new(state_tx),
            shutdown: CancellationToken::new(),
            driver: Mutex::new(None),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.topics.auth_mode()
    }

    pub fn topics(&self) -> &TopicTable {
        &self.topics
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Number of received commands not yet taken by a consumer
    pub async fn pending_commands(&self) -> usize {
        self.queue.len().await
    }

    /// Connect, subscribe to the command topic and start handling events.
    ///
    /// Fails if the initial connect or subscribe fails; no retry happens in
    /// that case. Once this returns `Ok`, connection loss is handled by the
    /// reconnect loop.
    pub async fn connect_and_subscribe(&self) -> Result<(), SessionError> {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        if self.shutdown.is_cancelled() {
            return Err(SessionError::Closed);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.transport.set_event_sender(event_tx).await;

        info!(
            tenant_id = %self.tenant_id,
            device_id = %self.device_id,
            authenticated = self.auth_mode().is_authenticated(),
            "Connecting to MQTT adapter..."
        );
        self.state_tx.send_replace(ConnectionState::Connecting);

        let established = tokio::select! {
            result = self.establish() => result,
            _ = self.shutdown.cancelled() => Err(SessionError::Closed),
        };
        if let Err(e) = established {
            self.state_tx.send_replace(ConnectionState::Disconnected);
            return Err(e);
        }
        self.state_tx.send_replace(ConnectionState::Connected);

        let span = crate::session_span!(
            tenant_id = %self.tenant_id,
            device_id = %self.device_id
        );
        let session_driver = SessionDriver {
            transport: self.transport.clone(),
            topics: self.topics.clone(),
            queue: self.queue.clone(),
            state_tx: self.state_tx.clone(),
            shutdown: self.shutdown.clone(),
            reconnect_delay: self.settings.reconnect_delay,
            subscribe_qos: self.settings.subscribe_qos,
            subscribed: true,
        };
        *driver = Some(tokio::spawn(session_driver.run(event_rx).instrument(span)));
        Ok(())
    }

    async fn establish(&self) -> Result<(), SessionError> {
        self.transport.connect().await?;
        info!("Connected.");

        let filter = self.topics.command_filter();
        info!("Subscribing to command topic '{}'...", filter);
        if let Err(e) = self
            .transport
            .subscribe(filter, self.settings.subscribe_qos)
            .await
        {
            if let Err(disconnect_error) = self.transport.disconnect().await {
                debug!("Disconnect after failed subscribe: {}", disconnect_error);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Take the oldest queued command, waiting until one arrives
    pub async fn receive_command(&self) -> Result<Command, SessionError> {
        self.queue
            .pop(&self.shutdown)
            .await
            .ok_or(SessionError::Closed)
    }

    /// Like [`receive_command`](Self::receive_command), but gives up when
    /// `cancel` fires. A command is never lost to cancellation.
    pub async fn receive_command_until(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Command, SessionError> {
        tokio::select! {
            command = self.receive_command() => command,
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
        }
    }

    pub async fn receive_command_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Command, SessionError> {
        tokio::time::timeout(timeout, self.receive_command())
            .await
            .map_err(|_| SessionError::Timeout(timeout))?
    }

    /// Respond to a request/response command.
    ///
    /// The status is recorded on `command`. One-way commands are rejected
    /// without publishing.
    pub async fn send_command_response(
        &self,
        command: &mut Command,
        status: u16,
        payload: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> SendResult {
        self.publisher
            .send_command_response(
                command,
                status,
                payload.into(),
                content_type.unwrap_or(DEFAULT_CONTENT_TYPE),
            )
            .await
    }

    pub async fn send_telemetry(
        &self,
        payload: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> SendResult {
        self.publisher
            .send_telemetry(payload.into(), content_type.unwrap_or(DEFAULT_CONTENT_TYPE))
            .await
    }

    pub async fn send_event(
        &self,
        payload: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> SendResult {
        self.publisher
            .send_event(payload.into(), content_type.unwrap_or(DEFAULT_CONTENT_TYPE))
            .await
    }

    /// Stop reconnecting, release blocked consumers and close the connection
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        info!("Shutting down device session");
        self.shutdown.cancel();

        if let Some(handle) = self.driver.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Session driver task failed: {}", e);
            }
        }
        if !self.queue.is_empty().await {
            warn!(
                pending = self.queue.len().await,
                "Shutting down with commands nobody received"
            );
        }

        let result = self.transport.disconnect().await;
        self.state_tx.send_replace(ConnectionState::Disconnected);
        result.map_err(SessionError::from)
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Consumes transport events for one session, in arrival order
struct SessionDriver<T: Transport> {
    transport: Arc<T>,
    topics: Arc<TopicTable>,
    queue: Arc<CommandQueue>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
    reconnect_delay: Duration,
    subscribe_qos: QoS,
    /// Whether the current link carries the command subscription
    subscribed: bool,
}

impl<T: Transport> SessionDriver<T> {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(TransportEvent::Connected) => {
                    if !self.on_connected().await {
                        break;
                    }
                }
                Some(TransportEvent::Disconnected(reason)) => {
                    self.subscribed = false;
                    if !self.reconnect(&reason).await {
                        break;
                    }
                }
                Some(TransportEvent::Message { topic, payload }) => {
                    self.on_message_received(&topic, payload).await;
                }
                None => break,
            }
        }
        debug!("Session driver stopped");
    }

    /// A link that came up without going through [`reconnect`](Self::reconnect)
    /// still needs the command subscription. Returns `false` on shutdown.
    async fn on_connected(&mut self) -> bool {
        if self.subscribed {
            return true;
        }
        match self.resubscribe().await {
            Ok(()) => {
                self.mark_subscribed();
                true
            }
            Err(e) => {
                self.drop_link(&e).await;
                self.reconnect(&format!("command subscription failed: {e}"))
                    .await
            }
        }
    }

    /// Reconnect and restore the command subscription, retrying until both
    /// succeed. Returns `false` on shutdown.
    async fn reconnect(&mut self, reason: &str) -> bool {
        error!("Disconnected from MQTT adapter: {}", reason);

        loop {
            self.state_tx.send_replace(ConnectionState::Disconnected);
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }

            self.state_tx.send_replace(ConnectionState::Connecting);
            info!("Reconnecting to MQTT adapter...");
            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                result = self.transport.connect() => result,
            };
            if let Err(e) = attempt {
                error!("Reconnecting failed: {}", e);
                continue;
            }

            let subscribed = tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                result = self.resubscribe() => result,
            };
            match subscribed {
                Ok(()) => {
                    info!("Reconnected.");
                    self.mark_subscribed();
                    return true;
                }
                Err(e) => self.drop_link(&e).await,
            }
        }
    }

    async fn resubscribe(&self) -> Result<(), TransportError> {
        let filter = self.topics.command_filter();
        debug!("Subscribing to command topic '{}'", filter);
        self.transport.subscribe(filter, self.subscribe_qos).await
    }

    /// `Connected` is only reported once the command subscription is in place
    fn mark_subscribed(&mut self) {
        self.subscribed = true;
        self.state_tx.send_replace(ConnectionState::Connected);
    }

    /// A link without the command subscription cannot deliver commands
    async fn drop_link(&mut self, error: &TransportError) {
        error!("Subscribing to command topic failed: {}", error);
        self.subscribed = false;
        if let Err(e) = self.transport.disconnect().await {
            debug!("Disconnect after failed subscribe: {}", e);
        }
    }

    async fn on_message_received(&self, topic: &str, payload: Bytes) {
        debug!("Received message on topic '{}'", topic);
        let command = parse_command_topic(topic).with_payload(payload);
        self.queue.push(command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{MockTransport, TransportOp};

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            reconnect_delay: Duration::from_millis(20),
            ..SessionSettings::default()
        }
    }

    fn session(transport: MockTransport) -> DeviceSession<MockTransport> {
        DeviceSession::new(
            transport,
            "DEFAULT_TENANT",
            "4711",
            AuthMode::Unauthenticated,
            fast_settings(),
        )
    }

    #[test]
    fn test_settings_from_mqtt_section() {
        let mut config = DeviceConfig::test_config();
        config.mqtt.message_expiry_secs = 60;
        config.mqtt.reconnect_delay_secs = 1;

        let settings = SessionSettings::from(&config.mqtt);
        assert_eq!(settings.message_expiry_secs, 60);
        assert_eq!(settings.reconnect_delay, Duration::from_secs(1));
        assert_eq!(settings.subscribe_qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.message_expiry_secs, 6000);
        assert_eq!(settings.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_from_config_without_password_is_unauthenticated() {
        let config = DeviceConfig::test_config();
        let session = DeviceSession::from_config(&config).expect("session should build");
        assert_eq!(session.auth_mode(), AuthMode::Unauthenticated);
        assert_eq!(session.topics().telemetry(), "telemetry/DEFAULT_TENANT/4711");
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_and_subscribe_order() {
        let session = session(MockTransport::new());
        session.connect_and_subscribe().await.unwrap();

        let ops = session.transport().operations().await;
        assert_eq!(ops[0], TransportOp::Connect);
        assert_eq!(
            ops[1],
            TransportOp::Subscribe {
                filter: "command/DEFAULT_TENANT/4711/req/#".to_string(),
                qos: QoS::AtLeastOnce,
            }
        );
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let session = session(MockTransport::new());
        session.connect_and_subscribe().await.unwrap();
        assert!(matches!(
            session.connect_and_subscribe().await,
            Err(SessionError::AlreadyStarted)
        ));
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_reported() {
        let session = session(MockTransport::with_failing_connects(1));
        let result = session.connect_and_subscribe().await;

        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.transport().connect_attempts().await, 1);
    }

    #[tokio::test]
    async fn test_initial_subscribe_failure_disconnects() {
        let transport = MockTransport::new();
        transport.fail_subscriptions(true);
        let session = session(transport);

        let result = session.connect_and_subscribe().await;
        assert!(matches!(
            result,
            Err(SessionError::Transport(TransportError::SubscriptionFailed(_)))
        ));
        let ops = session.transport().operations().await;
        assert_eq!(ops.last(), Some(&TransportOp::Disconnect));
    }

    #[tokio::test]
    async fn test_inbound_message_is_queued_with_payload() {
        let session = session(MockTransport::new());
        session.connect_and_subscribe().await.unwrap();

        session
            .transport()
            .inject_message("command///q/42/setBrightness?unit=pct", "80")
            .await;

        let command = session
            .receive_command_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(command.name(), "setBrightness");
        assert_eq!(command.request_id.as_deref(), Some("42"));
        assert_eq!(command.property("unit"), Some("pct"));
        assert_eq!(command.payload, Bytes::from_static(b"80"));
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_topic_is_still_queued() {
        let session = session(MockTransport::new());
        session.connect_and_subscribe().await.unwrap();

        session.transport().inject_message("foo/bar", "x").await;

        let command = session
            .receive_command_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(command.command_name.is_none());
        assert_eq!(command.payload, Bytes::from_static(b"x"));
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let session = session(MockTransport::new());
        session.connect_and_subscribe().await.unwrap();

        let result = session
            .receive_command_timeout(Duration::from_millis(30))
            .await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_cancelled() {
        let session = session(MockTransport::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = session.receive_command_until(&cancel).await;
        assert!(matches!(result, Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_receiver() {
        let session = Arc::new(session(MockTransport::new()));
        session.connect_and_subscribe().await.unwrap();

        let receiver = session.clone();
        let waiter = tokio::spawn(async move { receiver.receive_command().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        session.shutdown().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("receiver should be released")
            .expect("receiver task should not panic");
        assert!(matches!(result, Err(SessionError::Closed)));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    fn driver(transport: Arc<MockTransport>, subscribed: bool) -> SessionDriver<MockTransport> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        SessionDriver {
            transport,
            topics: Arc::new(TopicTable::new("t", "d", AuthMode::Authenticated)),
            queue: Arc::new(CommandQueue::new()),
            state_tx: Arc::new(state_tx),
            shutdown: CancellationToken::new(),
            reconnect_delay: Duration::from_millis(20),
            subscribe_qos: QoS::AtLeastOnce,
            subscribed,
        }
    }

    #[tokio::test]
    async fn test_connected_event_subscribes_unsubscribed_link() {
        let transport = Arc::new(MockTransport::new());
        let driver = driver(transport.clone(), false);
        let mut state = driver.state_tx.subscribe();
        let shutdown = driver.shutdown.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(TransportEvent::Connected).unwrap();
        let handle = tokio::spawn(driver.run(rx));

        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .expect("link should be reported connected")
        .unwrap();
        assert_eq!(transport.subscriptions().await, vec!["command/+/+/req/#"]);

        // Already subscribed: a repeated Connected is not another subscribe
        tx.send(TransportEvent::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(transport.subscriptions().await.len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_connected_event_with_refused_subscription_reconnects() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_subscriptions(true);
        let driver = driver(transport.clone(), false);
        let mut state = driver.state_tx.subscribe();
        let shutdown = driver.shutdown.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(TransportEvent::Connected).unwrap();
        let handle = tokio::spawn(driver.run(rx));

        assert!(transport.wait_for_operations(2, Duration::from_secs(1)).await);
        let ops = transport.operations().await;
        assert!(matches!(ops[0], TransportOp::Subscribe { .. }));
        assert_eq!(ops[1], TransportOp::Disconnect);
        assert_ne!(*state.borrow(), ConnectionState::Connected);

        transport.fail_subscriptions(false);
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .expect("subscription should be restored")
        .unwrap();

        let ops = transport.operations().await;
        let n = ops.len();
        assert_eq!(ops[n - 2], TransportOp::Connect);
        assert!(matches!(ops[n - 1], TransportOp::Subscribe { .. }));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_keeps_unreceived_commands() {
        let session = session(MockTransport::new());
        session.connect_and_subscribe().await.unwrap();
        session.transport().inject_message("command///q//late", "").await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while session.pending_commands().await == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("command should be queued");

        session.shutdown().await.unwrap();

        assert_eq!(session.pending_commands().await, 1);
        assert_eq!(session.receive_command().await.unwrap().name(), "late");
        assert!(matches!(
            session.receive_command().await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_is_rejected() {
        let session = session(MockTransport::new());
        session.shutdown().await.unwrap();
        assert!(matches!(
            session.connect_and_subscribe().await,
            Err(SessionError::Closed)
        ));
    }
}
