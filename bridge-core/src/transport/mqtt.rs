//! MQTT session transport (C1): a rumqttc `AsyncClient`/`EventLoop` split
//! with a reconnect/backoff loop run off the event loop task, generalized
//! to an arbitrary peer broker with per-device QoS bookkeeping.

use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// A message arriving on a subscribed topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
    pub timestamp: DateTime<Utc>,
}

pub type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Connection parameters for one peer's MQTT broker (spec §4.8).
#[derive(Debug, Clone)]
pub struct MqttSessionConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub use_tls: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

#[async_trait]
pub trait MqttSessionTrait: Send + Sync {
    async fn connect(&mut self) -> TransportResult<()>;
    async fn disconnect(&mut self) -> TransportResult<()>;
    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> TransportResult<()>;
    async fn subscribe(&self, topic: &str, qos: u8) -> TransportResult<()>;
    async fn unsubscribe(&self, topic: &str) -> TransportResult<()>;
    fn status(&self) -> SessionStatus;
    fn set_message_callback(&self, callback: MessageCallback);
}

/// Validates a topic name against length, control-character, and
/// reserved-prefix rules (e.g. IoT Hub's `$iothub/` convention).
pub fn validate_topic(topic: &str, reserved_prefix: &str) -> TransportResult<()> {
    if topic.is_empty() {
        return Err(TransportError::TopicValidation("topic cannot be empty".to_string()));
    }
    if topic.len() > 256 {
        return Err(TransportError::TopicValidation("topic too long (max 256 characters)".to_string()));
    }
    if topic.contains('\0') || topic.contains('\n') || topic.contains('\r') {
        return Err(TransportError::TopicValidation("topic contains invalid characters".to_string()));
    }
    if topic.starts_with('$') && !topic.starts_with(reserved_prefix) {
        return Err(TransportError::TopicValidation("invalid reserved topic prefix".to_string()));
    }
    Ok(())
}

fn to_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

pub struct MqttSession {
    config: MqttSessionConfig,
    reserved_prefix: String,
    client: Option<AsyncClient>,
    status: Arc<RwLock<SessionStatus>>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    message_callback: Arc<RwLock<Option<MessageCallback>>>,
    reconnect_attempts: Arc<RwLock<u32>>,
}

impl MqttSession {
    pub fn new(config: MqttSessionConfig, reserved_prefix: impl Into<String>) -> Self {
        Self {
            config,
            reserved_prefix: reserved_prefix.into(),
            client: None,
            status: Arc::new(RwLock::new(SessionStatus::Disconnected)),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            message_callback: Arc::new(RwLock::new(None)),
            reconnect_attempts: Arc::new(RwLock::new(0)),
        }
    }

    fn build_options(&self) -> TransportResult<MqttOptions> {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(self.config.clean_session);

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        if self.config.use_tls {
            let tls_config = build_tls_config()?;
            options.set_transport(Transport::Tls(tls_config));
        }

        Ok(options)
    }

    /// Spawns the event-loop task, reacting to ConnAck/Publish/Disconnect
    /// and retrying with exponential backoff up to `max_reconnect_attempts`.
    fn start_event_loop(
        mut event_loop: EventLoop,
        status: Arc<RwLock<SessionStatus>>,
        message_callback: Arc<RwLock<Option<MessageCallback>>>,
        reconnect_attempts: Arc<RwLock<u32>>,
        max_attempts: u32,
        reconnect_delay: Duration,
    ) {
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt session connected");
                        *status.write().await = SessionStatus::Connected;
                        *reconnect_attempts.write().await = 0;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, "mqtt message received");
                        let message = InboundMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                            qos: publish.qos as u8,
                            retain: publish.retain,
                            timestamp: Utc::now(),
                        };
                        if let Some(callback) = message_callback.read().await.as_ref() {
                            callback(message);
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("mqtt session disconnected");
                        *status.write().await = SessionStatus::Disconnected;
                    }
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt event loop error");
                        *status.write().await = SessionStatus::Error;

                        let attempts = *reconnect_attempts.read().await;
                        if attempts < max_attempts {
                            *status.write().await = SessionStatus::Reconnecting;
                            let delay = reconnect_delay * 2_u32.pow(attempts.min(5));
                            warn!(?delay, attempt = attempts + 1, "reconnecting");
                            sleep(delay).await;
                            *reconnect_attempts.write().await = attempts + 1;
                        } else {
                            error!("max reconnection attempts reached, giving up");
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl MqttSessionTrait for MqttSession {
    async fn connect(&mut self) -> TransportResult<()> {
        info!(host = %self.config.host, "connecting mqtt session");
        *self.status.write().await = SessionStatus::Connecting;

        let options = self.build_options()?;
        let (client, event_loop) = AsyncClient::new(options, 10);
        self.client = Some(client);

        Self::start_event_loop(
            event_loop,
            Arc::clone(&self.status),
            Arc::clone(&self.message_callback),
            Arc::clone(&self.reconnect_attempts),
            self.config.max_reconnect_attempts,
            self.config.reconnect_delay,
        );

        let timeout = Duration::from_secs(30);
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            match *self.status.read().await {
                SessionStatus::Connected => return Ok(()),
                SessionStatus::Error => return Err(TransportError::Connection("failed to connect".to_string())),
                _ => sleep(Duration::from_millis(100)).await,
            }
        }
        Err(TransportError::Timeout("connection timeout".to_string()))
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        if let Some(client) = &self.client {
            client
                .disconnect()
                .await
                .map_err(|e| TransportError::Connection(format!("disconnect failed: {e}")))?;
        }
        *self.status.write().await = SessionStatus::Disconnected;
        self.client = None;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> TransportResult<()> {
        validate_topic(topic, &self.reserved_prefix)?;
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .publish(topic, to_qos(qos), false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: u8) -> TransportResult<()> {
        validate_topic(topic, &self.reserved_prefix)?;
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .subscribe(topic, to_qos(qos))
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        self.subscriptions.write().await.insert(topic.to_string(), to_qos(qos));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> TransportResult<()> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        self.subscriptions.write().await.remove(topic);
        Ok(())
    }

    fn status(&self) -> SessionStatus {
        match self.status.try_read() {
            Ok(status) => *status,
            Err(_) => SessionStatus::Disconnected,
        }
    }

    fn set_message_callback(&self, callback: MessageCallback) {
        if let Ok(mut cb) = self.message_callback.try_write() {
            *cb = Some(callback);
        }
    }
}

fn build_tls_config() -> TransportResult<TlsConfiguration> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(TlsConfiguration::Rustls(Arc::new(client_config)))
}

/// In-memory mock used by `bridge-tests` and adapter unit tests.
pub struct MockMqttSession {
    status: Arc<RwLock<SessionStatus>>,
    published: Arc<Mutex<Vec<(String, Vec<u8>, u8)>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

impl Default for MockMqttSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMqttSession {
    pub fn new() -> Self {
        Self {
            status: Arc::new(RwLock::new(SessionStatus::Disconnected)),
            published: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn published_messages(&self) -> Vec<(String, Vec<u8>, u8)> {
        self.published.lock().await.clone()
    }

    pub async fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    /// A cloneable handle onto this session's shared state, so a caller
    /// that only has a `Box<dyn MqttSessionTrait>` handed out through a
    /// session factory can still inspect what got published/subscribed
    /// after the box has been moved into an adapter's session map.
    pub fn handle(&self) -> MockMqttSessionHandle {
        MockMqttSessionHandle {
            status: Arc::clone(&self.status),
            published: Arc::clone(&self.published),
            subscriptions: Arc::clone(&self.subscriptions),
        }
    }
}

/// Shares `MockMqttSession`'s state without owning the trait object itself
/// (see `MockMqttSession::handle`).
#[derive(Clone)]
pub struct MockMqttSessionHandle {
    status: Arc<RwLock<SessionStatus>>,
    published: Arc<Mutex<Vec<(String, Vec<u8>, u8)>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

impl MockMqttSessionHandle {
    pub async fn published_messages(&self) -> Vec<(String, Vec<u8>, u8)> {
        self.published.lock().await.clone()
    }

    pub async fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub fn status(&self) -> SessionStatus {
        match self.status.try_read() {
            Ok(status) => *status,
            Err(_) => SessionStatus::Disconnected,
        }
    }
}

#[async_trait]
impl MqttSessionTrait for MockMqttSession {
    async fn connect(&mut self) -> TransportResult<()> {
        *self.status.write().await = SessionStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        *self.status.write().await = SessionStatus::Disconnected;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> TransportResult<()> {
        self.published.lock().await.push((topic.to_string(), payload.to_vec(), qos));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: u8) -> TransportResult<()> {
        self.subscriptions.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> TransportResult<()> {
        self.subscriptions.lock().await.retain(|t| t != topic);
        Ok(())
    }

    fn status(&self) -> SessionStatus {
        match self.status.try_read() {
            Ok(status) => *status,
            Err(_) => SessionStatus::Disconnected,
        }
    }

    fn set_message_callback(&self, _callback: MessageCallback) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_session_records_publish_and_subscribe() {
        let mut session = MockMqttSession::new();
        session.connect().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Connected);

        session.subscribe("devices/dev1/messages/devicebound/#", 1).await.unwrap();
        assert_eq!(session.subscribed_topics().await, vec!["devices/dev1/messages/devicebound/#"]);

        session.publish("devices/dev1/messages/events", b"payload", 1).await.unwrap();
        let published = session.published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "devices/dev1/messages/events");
    }

    #[test]
    fn topic_validation_rejects_malformed_topics() {
        assert!(validate_topic("devices/dev1/messages/events", "$iothub/").is_ok());
        assert!(validate_topic("", "$iothub/").is_err());
        assert!(validate_topic("topic\0with\0nulls", "$iothub/").is_err());
        assert!(validate_topic("$invalid/reserved", "$iothub/").is_err());
        assert!(validate_topic("$iothub/twin/res/#", "$iothub/").is_ok());
        let long_topic = "a".repeat(257);
        assert!(validate_topic(&long_topic, "$iothub/").is_err());
    }
}
