//! MQTT peer adapter (C9 exemplar): the concrete `PeerAdapter` for an
//! IoT-Hub-shaped MQTT broker: per-device sessions, signed-token
//! credentials, and the topic layout in `topics.rs` (spec §4.8).

use crate::credentials;
use crate::reconnect;
use crate::topics;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bridge_core::adapter::{prefixed_name_from_topic, ApiResponse, InboundCommand, PeerAdapter};
use bridge_core::attribute_dispatcher::AttributeDispatcher;
use bridge_core::config::PeerConfig;
use bridge_core::correlation::CorrelationTable;
use bridge_core::credential_service::CredentialService;
use bridge_core::endpoint_registry::EndpointTypeRegistry;
use bridge_core::fanout::run_registration_fanout;
use bridge_core::metrics::BridgeMetrics;
use bridge_core::orchestrator::DeregistrationPolicy;
use bridge_core::session_table::SessionTable;
use bridge_core::source_cloud::{DeviceRequestOutcome, DeviceSummary, SourceCloudClient};
use bridge_core::transport::mqtt::{InboundMessage, MessageCallback, MqttSession, MqttSessionConfig, MqttSessionTrait};
use bridge_core::types::{AsyncCorrelationRecord, CoapVerb, DeviceRecord, NotificationEvent, PrefixPolicy, SessionMeta, TopicEntry};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, warn};

/// Builds a concrete MQTT session for a device. Production code builds real
/// `MqttSession`s over `rumqttc`; tests substitute a factory that hands back
/// `MockMqttSession`s.
pub trait MqttSessionFactory: Send + Sync {
    fn build(&self, config: MqttSessionConfig) -> Box<dyn MqttSessionTrait>;
}

pub struct ProductionSessionFactory {
    reserved_topic_prefix: String,
}

impl ProductionSessionFactory {
    pub fn new(reserved_topic_prefix: impl Into<String>) -> Self {
        Self { reserved_topic_prefix: reserved_topic_prefix.into() }
    }
}

impl MqttSessionFactory for ProductionSessionFactory {
    fn build(&self, config: MqttSessionConfig) -> Box<dyn MqttSessionTrait> {
        Box::new(MqttSession::new(config, self.reserved_topic_prefix.clone()))
    }
}

pub struct MqttPeerAdapter {
    config: PeerConfig,
    max_workers: usize,
    deregistration_policy: DeregistrationPolicy,
    reconnect_sleep: Duration,
    session_table: Arc<SessionTable>,
    endpoint_registry: Arc<EndpointTypeRegistry>,
    correlation: Arc<CorrelationTable>,
    source_cloud: Arc<SourceCloudClient>,
    attribute_dispatcher: Arc<AttributeDispatcher>,
    credential_service: Arc<CredentialService>,
    metrics: Arc<BridgeMetrics>,
    prefix_policy: PrefixPolicy,
    sessions: RwLock<HashMap<String, Arc<Mutex<Box<dyn MqttSessionTrait>>>>>,
    session_factory: Arc<dyn MqttSessionFactory>,
    // A weak self-reference, set once via `attach_self` right after
    // construction, so the sync MQTT message callback and the fan-out
    // worker closures (both of which must be `'static`) can call back into
    // adapter methods without threading `Arc<Self>` through `PeerAdapter`'s
    // `&self` signature.
    self_ref: OnceCell<Weak<MqttPeerAdapter>>,
}

impl MqttPeerAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PeerConfig,
        max_workers: usize,
        deregistration_policy: DeregistrationPolicy,
        reconnect_sleep: Duration,
        session_table: Arc<SessionTable>,
        endpoint_registry: Arc<EndpointTypeRegistry>,
        correlation: Arc<CorrelationTable>,
        source_cloud: Arc<SourceCloudClient>,
        attribute_dispatcher: Arc<AttributeDispatcher>,
        credential_service: Arc<CredentialService>,
        metrics: Arc<BridgeMetrics>,
        session_factory: Arc<dyn MqttSessionFactory>,
    ) -> Self {
        let prefix_policy = PrefixPolicy {
            enabled: config.enable_device_id_prefix,
            prefix: config.device_id_prefix.clone(),
            separator: "-".to_string(),
        };
        Self {
            config,
            max_workers,
            deregistration_policy,
            reconnect_sleep,
            session_table,
            endpoint_registry,
            correlation,
            source_cloud,
            attribute_dispatcher,
            credential_service,
            metrics,
            prefix_policy,
            sessions: RwLock::new(HashMap::new()),
            session_factory,
            self_ref: OnceCell::new(),
        }
    }

    pub fn attach_self(self: &Arc<Self>) {
        let _ = self.self_ref.set(Arc::downgrade(self));
    }

    fn mqtt_host_port(&self) -> (String, u16) {
        match &self.config.mqtt_address {
            Some(addr) => match addr.split_once(':') {
                Some((host, port)) => (host.to_string(), port.parse().unwrap_or(8883)),
                None => (addr.clone(), 8883),
            },
            None => (String::new(), 8883),
        }
    }

    async fn build_session(&self, prefixed_name: &str) -> Box<dyn MqttSessionTrait> {
        let creds = credentials::derive(&self.config, &self.credential_service, prefixed_name);
        let (host, port) = self.mqtt_host_port();
        let session_config = MqttSessionConfig {
            client_id: prefixed_name.to_string(),
            host,
            port,
            username: Some(creds.username),
            password: Some(creds.password),
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            use_tls: true,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(2),
        };
        let session = self.session_factory.build(session_config);

        if let Some(adapter) = self.self_ref.get().and_then(Weak::upgrade) {
            let callback: MessageCallback = Arc::new(move |message: InboundMessage| {
                let adapter = Arc::clone(&adapter);
                tokio::spawn(async move {
                    adapter
                        .on_message_receive(InboundCommand { topic: message.topic, message: message.payload })
                        .await;
                });
            });
            session.set_message_callback(callback);
        }

        session
    }

    async fn process_registration_batch(&self, evt: &NotificationEvent) {
        let entries = match evt {
            NotificationEvent::Registration(entries) | NotificationEvent::ReRegistration(entries) => entries,
            _ => return,
        };
        let Some(adapter) = self.self_ref.get().and_then(Weak::upgrade) else {
            error!("adapter self-reference not attached; skipping registration fan-out");
            return;
        };

        let devices: Vec<DeviceSummary> = entries
            .iter()
            .map(|e| DeviceSummary { id: e.ep.clone(), endpoint_name: Some(e.ep.clone()), endpoint_type: e.ept.clone() })
            .collect();

        let source_cloud = Arc::clone(&self.source_cloud);
        let attribute_dispatcher = Arc::clone(&self.attribute_dispatcher);
        let endpoint_registry = Arc::clone(&self.endpoint_registry);

        let metrics = Arc::clone(&self.metrics);
        run_registration_fanout(devices, self.max_workers, source_cloud, attribute_dispatcher, move |device, resources, metadata| {
            let adapter = Arc::clone(&adapter);
            let endpoint_registry = Arc::clone(&endpoint_registry);
            let metrics = Arc::clone(&metrics);
            async move {
                let endpoint_type = endpoint_registry.get(&device.id).await.unwrap_or_else(|| "default".to_string());
                let mut record = DeviceRecord::new(device.id.clone(), endpoint_type);
                record.resources = resources;
                record.metadata = metadata;
                adapter.register_new_device(&record).await;
                metrics.record_registration_processed();
            }
        })
        .await;
    }

    async fn process_teardown_batch(&self, evt: &NotificationEvent) {
        let ids = match evt {
            NotificationEvent::Deregistration(ids) | NotificationEvent::RegistrationsExpired(ids) => ids,
            _ => return,
        };
        for id in ids {
            match self.deregistration_policy {
                DeregistrationPolicy::RemoveShadow => {
                    self.delete_device(id).await;
                }
                DeregistrationPolicy::DisconnectOnly => {
                    let prefixed_name = self.prefix_policy.add_prefix(id);
                    if let Some(session) = self.sessions.read().await.get(&prefixed_name).cloned() {
                        let _ = session.lock().await.disconnect().await;
                    }
                }
            }
            self.metrics.record_deregistration_processed();
        }
    }

    /// Runs the stop-listener / hard-disconnect / delete-shadow / sleep /
    /// recreate-shadow / sleep / reconnect sequence for one device (spec
    /// §4.8). Returns `false` without touching the session table if the
    /// device has no live session to begin with.
    pub async fn reconnect_device(&self, device_id: &str) -> bool {
        let prefixed_name = self.prefix_policy.add_prefix(device_id);
        let Some(meta) = self.session_table.get(&prefixed_name).await else {
            return false;
        };
        let Some(session) = self.sessions.read().await.get(&prefixed_name).cloned() else {
            return false;
        };

        reconnect::run_reconnect(
            self.reconnect_sleep,
            || async {
                session.lock().await.set_message_callback(Arc::new(|_| {}));
            },
            || async {
                let _ = session.lock().await.disconnect().await;
            },
            || async {
                self.session_table.remove_session(&prefixed_name).await;
            },
            || async {
                let _ = self
                    .session_table
                    .add_session(SessionMeta {
                        prefixed_name: prefixed_name.clone(),
                        endpoint_type: meta.endpoint_type.clone(),
                        subscribed_topics: meta.subscribed_topics.clone(),
                        last_state: meta.last_state.clone(),
                    })
                    .await;
            },
            || async {
                let mut fresh = self.build_session(&prefixed_name).await;
                if fresh.connect().await.is_err() {
                    return false;
                }
                for topic in &meta.subscribed_topics {
                    if fresh.subscribe(&topic.topic, topic.qos).await.is_err() {
                        return false;
                    }
                }
                self.sessions.write().await.insert(prefixed_name.clone(), Arc::new(Mutex::new(fresh)));
                true
            },
        )
        .await
    }
}

#[async_trait]
impl PeerAdapter for MqttPeerAdapter {
    async fn register_new_device(&self, record: &DeviceRecord) -> bool {
        let prefixed_name = self.prefix_policy.add_prefix(&record.device_id);

        if self.session_table.is_at_capacity().await && !self.session_table.has_session(&prefixed_name).await {
            self.metrics.record_shadow_cap_rejection();
            warn!(device_id = %record.device_id, "shadow fleet at capacity, rejecting registration");
            return false;
        }

        let mut session = self.build_session(&prefixed_name).await;
        if let Err(err) = session.connect().await {
            error!(device_id = %record.device_id, error = %err, "mqtt session connect failed");
            return false;
        }

        let command_topic = topics::command_topic(&prefixed_name);
        if session.subscribe(&command_topic, topics::COMMAND_TOPIC_QOS).await.is_err()
            || session.subscribe(topics::twin_topic(), topics::TWIN_TOPIC_QOS).await.is_err()
        {
            error!(device_id = %record.device_id, "failed to subscribe device topics");
            let _ = session.disconnect().await;
            return false;
        }

        let subscribed_topics = vec![
            TopicEntry { topic: command_topic, qos: topics::COMMAND_TOPIC_QOS },
            TopicEntry { topic: topics::twin_topic().to_string(), qos: topics::TWIN_TOPIC_QOS },
        ];

        if self
            .session_table
            .add_session(SessionMeta {
                prefixed_name: prefixed_name.clone(),
                endpoint_type: record.endpoint_type.clone(),
                subscribed_topics,
                last_state: None,
            })
            .await
            .is_err()
        {
            self.metrics.record_shadow_cap_rejection();
            let _ = session.disconnect().await;
            return false;
        }

        self.sessions.write().await.insert(prefixed_name, Arc::new(Mutex::new(session)));
        self.metrics.record_session_created();
        true
    }

    async fn delete_device(&self, device_id: &str) -> bool {
        let prefixed_name = self.prefix_policy.add_prefix(device_id);
        if let Some(session) = self.sessions.write().await.remove(&prefixed_name) {
            let _ = session.lock().await.disconnect().await;
        }
        self.session_table.remove_session(&prefixed_name).await;
        self.endpoint_registry.remove(device_id).await;
        self.metrics.record_session_removed();
        true
    }

    async fn process_notification(&self, evt: &NotificationEvent) {
        let NotificationEvent::Notification(entries) = evt else { return };
        for entry in entries {
            let prefixed_name = self.prefix_policy.add_prefix(&entry.id);
            let Some(session) = self.sessions.read().await.get(&prefixed_name).cloned() else {
                debug!(device_id = %entry.id, "notification for device with no active session, dropping");
                continue;
            };
            let topic = topics::observation_topic(&self.config.observe_notification_topic, &prefixed_name);
            let body = serde_json::json!({ "path": entry.path, "payload": entry.payload_b64, "ct": entry.ct });
            let Ok(payload) = serde_json::to_vec(&body) else { continue };
            if session.lock().await.publish(&topic, &payload, topics::OBSERVATION_QOS).await.is_err() {
                warn!(device_id = %entry.id, "failed to publish notification");
                continue;
            }
            self.metrics.record_notification_published();
        }
    }

    async fn process_async_response(&self, evt: &NotificationEvent) {
        let NotificationEvent::AsyncResponse(entries) = evt else { return };
        for entry in entries {
            let Some(record) = self.correlation.take(&entry.id).await else {
                debug!(async_id = %entry.id, "async response with no pending correlation, dropping");
                continue;
            };
            let prefixed_name = self.prefix_policy.add_prefix(&record.device_id);
            let Some(session) = self.sessions.read().await.get(&prefixed_name).cloned() else { continue };
            let body = serde_json::json!({ "status": entry.status, "payload": entry.payload_b64, "uri": record.uri });
            let Ok(payload) = serde_json::to_vec(&body) else { continue };
            let _ = session.lock().await.publish(&record.reply_topic, &payload, topics::COMMAND_TOPIC_QOS).await;
        }
    }

    async fn process_new_registration(&self, evt: &NotificationEvent) {
        self.process_registration_batch(evt).await;
    }

    async fn process_re_registration(&self, evt: &NotificationEvent) {
        self.process_registration_batch(evt).await;
    }

    async fn process_deregistrations(&self, evt: &NotificationEvent) {
        self.process_teardown_batch(evt).await;
    }

    async fn process_registrations_expired(&self, evt: &NotificationEvent) {
        self.process_teardown_batch(evt).await;
    }

    async fn process_device_deletions(&self, device_ids: &[String]) {
        if device_ids.is_empty() {
            for prefixed_name in self.session_table.all_prefixed_names().await {
                if let Some(session) = self.sessions.write().await.remove(&prefixed_name) {
                    let _ = session.lock().await.disconnect().await;
                }
                self.session_table.remove_session(&prefixed_name).await;
            }
            return;
        }
        for id in device_ids {
            self.delete_device(id).await;
        }
    }

    async fn process_api_request_operation(&self, uri: &str, body: &[u8], verb: CoapVerb, request_id: &str) -> ApiResponse {
        let mut segments = uri.trim_start_matches('/').splitn(2, '/');
        let Some(device_id) = segments.next().filter(|s| !s.is_empty()) else {
            return ApiResponse::error(400, "missing device id in uri");
        };
        let resource_uri = format!("/{}", segments.next().unwrap_or_default());
        let payload_b64 = (!body.is_empty()).then(|| BASE64.encode(body));

        match self.source_cloud.device_request(device_id, &resource_uri, verb, payload_b64.as_deref()).await {
            Ok(DeviceRequestOutcome::Synchronous { status, body_b64 }) => {
                ApiResponse { status, body: serde_json::json!({ "payload": body_b64, "request_id": request_id }) }
            }
            Ok(DeviceRequestOutcome::Queued { async_response_id }) => {
                ApiResponse::ok(serde_json::json!({ "async_response_id": async_response_id, "request_id": request_id }))
            }
            Err(err) => ApiResponse::error(502, &err.to_string()),
        }
    }

    async fn process_endpoint_resource_operation(&self, verb: CoapVerb, device_id: &str, uri: &str, value: Option<&str>) -> String {
        let payload_b64 = value.map(|v| BASE64.encode(v.as_bytes()));
        match self.source_cloud.device_request(device_id, uri, verb, payload_b64.as_deref()).await {
            Ok(DeviceRequestOutcome::Synchronous { body_b64, .. }) => body_b64,
            Ok(DeviceRequestOutcome::Queued { async_response_id }) => async_response_id,
            Err(err) => {
                error!(error = %err, "device request relay failed");
                String::new()
            }
        }
    }

    async fn on_message_receive(&self, command: InboundCommand) {
        let Some(prefixed_name) = prefixed_name_from_topic(&command.topic) else { return };
        let device_id = self.prefix_policy.remove_prefix(prefixed_name);

        if topics::is_twin_topic(&command.topic) {
            self.handle_twin_notification(prefixed_name, &device_id, &command).await;
            return;
        }

        let body: Option<Value> = serde_json::from_slice(&command.message).ok();

        if let Some(api_request) = body.as_ref().and_then(parse_api_request) {
            let response = self
                .process_api_request_operation(&api_request.uri, &api_request.body, api_request.verb, &api_request.request_id)
                .await;
            let reply_topic = topics::api_response_topic(&self.config.observe_notification_topic, prefixed_name);
            if let (Ok(payload), Some(session)) =
                (serde_json::to_vec(&response.body), self.sessions.read().await.get(prefixed_name).cloned())
            {
                let _ = session.lock().await.publish(&reply_topic, &payload, topics::COMMAND_TOPIC_QOS).await;
            }
            return;
        }

        let query = command.topic.split("devicebound/").nth(1).map(parse_query).unwrap_or_default();

        // Path and verb come from the JSON body first (spec §4.8 "extract
        // coap_verb, path ... new_value, ep, options"), falling back to the
        // topic's `coap_verb=`/`coap_uri=` query parameters.
        let verb = body
            .as_ref()
            .and_then(|v| v.get("coap_verb"))
            .and_then(Value::as_str)
            .or_else(|| query.get("coap_verb").map(String::as_str))
            .and_then(CoapVerb::parse);
        let Some(verb) = verb else {
            debug!(topic = %command.topic, "inbound command missing a recognized coap_verb, dropping");
            return;
        };
        let uri = body
            .as_ref()
            .and_then(|v| v.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| query.get("coap_uri").cloned())
            .unwrap_or_default();
        let new_value = body.as_ref().and_then(|v| v.get("new_value")).and_then(Value::as_str);
        let payload_b64 = new_value
            .map(|v| BASE64.encode(v.as_bytes()))
            .or_else(|| (!command.message.is_empty()).then(|| BASE64.encode(&command.message)));

        match self.source_cloud.device_request(&device_id, &uri, verb, payload_b64.as_deref()).await {
            // Only a GET's synchronous response is published as an
            // observation envelope (spec §4.8); a synchronous PUT/POST/
            // DELETE result has no defined destination topic.
            Ok(DeviceRequestOutcome::Synchronous { status, body_b64 }) if verb == CoapVerb::Get => {
                let reply_topic = topics::cmd_response_topic(&self.config.observe_notification_topic, prefixed_name);
                let body = serde_json::json!({ "status": status, "payload": body_b64 });
                if let (Ok(payload), Some(session)) =
                    (serde_json::to_vec(&body), self.sessions.read().await.get(prefixed_name).cloned())
                {
                    let _ = session.lock().await.publish(&reply_topic, &payload, topics::COMMAND_TOPIC_QOS).await;
                }
            }
            Ok(DeviceRequestOutcome::Synchronous { .. }) => {}
            // Only GET/PUT queued requests get a correlation record (spec
            // §4.8); a queued POST/DELETE has no async-response shape to
            // resolve back into.
            Ok(DeviceRequestOutcome::Queued { async_response_id }) if verb == CoapVerb::Get || verb == CoapVerb::Put => {
                let reply_topic = topics::cmd_response_topic(&self.config.observe_notification_topic, prefixed_name);
                self.correlation
                    .insert(AsyncCorrelationRecord {
                        async_id: async_response_id,
                        verb,
                        inbound_topic: command.topic.clone(),
                        reply_topic,
                        original_message: command.message.clone(),
                        device_id,
                        uri,
                    })
                    .await;
            }
            Ok(DeviceRequestOutcome::Queued { .. }) => {}
            Err(err) => {
                warn!(error = %err, topic = %command.topic, "device request relay failed");
            }
        }
    }
}

impl MqttPeerAdapter {
    /// Handles an inbound `$iothub/twin/...` message: relays the reported
    /// value downstream as a CoAP PUT, then acks with a twin-PATCH so the
    /// peer's digital twin reflects the new reported property (spec §4.8;
    /// exact PATCH body format is left to adapter-specific tests per §9).
    async fn handle_twin_notification(&self, prefixed_name: &str, device_id: &str, command: &InboundCommand) {
        let body: Value = serde_json::from_slice(&command.message).unwrap_or(Value::Null);
        let uri = body.get("uri").and_then(Value::as_str).unwrap_or("/3/0/0").to_string();
        let new_value = body.get("value").and_then(Value::as_str);
        let payload_b64 = new_value.map(|v| BASE64.encode(v.as_bytes()));

        if let Err(err) = self.source_cloud.device_request(device_id, &uri, CoapVerb::Put, payload_b64.as_deref()).await {
            warn!(error = %err, %device_id, "twin-driven device request failed");
        }

        let request_id = command
            .topic
            .split_once('?')
            .and_then(|(_, query)| parse_query(query).get("$rid").cloned())
            .unwrap_or_default();
        let ack_topic = topics::twin_patch_topic(&request_id);
        let ack_body = serde_json::json!({ "reported": { uri: new_value } });
        if let (Ok(payload), Some(session)) =
            (serde_json::to_vec(&ack_body), self.sessions.read().await.get(prefixed_name).cloned())
        {
            let _ = session.lock().await.publish(&ack_topic, &payload, topics::TWIN_TOPIC_QOS).await;
        }
    }
}

/// An inbound API-request envelope: distinguished from a CoAP command by
/// carrying `uri`/`verb` rather than `path`/`coap_verb` (spec §4.8
/// "if the message JSON is an API request").
struct ParsedApiRequest {
    uri: String,
    body: Vec<u8>,
    verb: CoapVerb,
    request_id: String,
}

fn parse_api_request(message: &Value) -> Option<ParsedApiRequest> {
    let uri = message.get("uri")?.as_str()?.to_string();
    let verb = message.get("verb")?.as_str().and_then(CoapVerb::parse)?;
    let body = message
        .get("body")
        .and_then(Value::as_str)
        .and_then(|b64| BASE64.decode(b64).ok())
        .unwrap_or_default();
    let request_id = message.get("request_id").and_then(Value::as_str).unwrap_or_default().to_string();
    Some(ParsedApiRequest { uri, body, verb, request_id })
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::transport::https::MockHttpsClient;
    use bridge_core::transport::mqtt::MockMqttSession;
    use bridge_core::types::{AsyncResponseEntry, NotificationEntry, RegistrationEntry};

    struct MockSessionFactory;

    impl MqttSessionFactory for MockSessionFactory {
        fn build(&self, _config: MqttSessionConfig) -> Box<dyn MqttSessionTrait> {
            Box::new(MockMqttSession::new())
        }
    }

    fn peer_config() -> PeerConfig {
        PeerConfig {
            name: "iot_event_hub".to_string(),
            connect_string: None,
            sas_token: Some("static-token".to_string()),
            hub_name: Some("myhub".to_string()),
            max_shadows: 25_000,
            enable_device_id_prefix: true,
            device_id_prefix: "fleet".to_string(),
            version_tag: "api-version=2018-06-30".to_string(),
            mqtt_address: Some("myhub.azure-devices.net:8883".to_string()),
            mqtt_username_override: None,
            mqtt_password_override: None,
            observe_notification_topic: "devices/__EPNAME__/messages/events/__OBSERVATION_KEY__".to_string(),
            coap_cmd_topic: "devices/__EPNAME__/messages/devicebound/#".to_string(),
        }
    }

    fn adapter() -> Arc<MqttPeerAdapter> {
        let config = peer_config();
        let https = Arc::new(MockHttpsClient::new());
        let source_cloud = Arc::new(SourceCloudClient::new(https, "key", 100, false));
        let adapter = MqttPeerAdapter::new(
            config.clone(),
            10,
            DeregistrationPolicy::RemoveShadow,
            Duration::from_millis(1),
            Arc::new(SessionTable::new(10)),
            Arc::new(EndpointTypeRegistry::new()),
            Arc::new(CorrelationTable::new()),
            source_cloud,
            Arc::new(AttributeDispatcher::new(Arc::new(SourceCloudClient::new(Arc::new(MockHttpsClient::new()), "key", 100, false)), Vec::new())),
            Arc::new(CredentialService::from_peer_config(&config).unwrap()),
            Arc::new(BridgeMetrics::default()),
            Arc::new(MockSessionFactory),
        );
        let adapter = Arc::new(adapter);
        adapter.attach_self();
        adapter
    }

    #[tokio::test]
    async fn register_new_device_creates_session_and_subscribes() {
        let adapter = adapter();
        let record = DeviceRecord::new("dev1", "sensor");

        assert!(adapter.register_new_device(&record).await);
        assert!(adapter.session_table.has_session("fleet-dev1").await);
        assert!(adapter.sessions.read().await.contains_key("fleet-dev1"));
    }

    #[tokio::test]
    async fn delete_device_tears_down_session_and_registry_entry() {
        let adapter = adapter();
        adapter.register_new_device(&DeviceRecord::new("dev1", "sensor")).await;
        adapter.endpoint_registry.set("dev1", "sensor").await;

        assert!(adapter.delete_device("dev1").await);
        assert!(!adapter.session_table.has_session("fleet-dev1").await);
        assert_eq!(adapter.endpoint_registry.get("dev1").await, None);
    }

    #[tokio::test]
    async fn process_notification_drops_silently_without_a_live_session() {
        let adapter = adapter();
        let evt = NotificationEvent::Notification(vec![NotificationEntry {
            id: "dev1".to_string(),
            path: "/3/0/0".to_string(),
            payload_b64: "MQ==".to_string(),
            ct: None,
        }]);

        adapter.process_notification(&evt).await;
        assert_eq!(adapter.metrics.snapshot().notifications_published, 0);
    }

    #[tokio::test]
    async fn process_async_response_resolves_pending_correlation() {
        let adapter = adapter();
        adapter.register_new_device(&DeviceRecord::new("dev1", "sensor")).await;
        adapter
            .correlation
            .insert(AsyncCorrelationRecord {
                async_id: "ar-1".to_string(),
                verb: CoapVerb::Get,
                inbound_topic: "devices/fleet-dev1/messages/devicebound/coap_verb=get".to_string(),
                reply_topic: "devices/fleet-dev1/messages/events/cmd-response".to_string(),
                original_message: Vec::new(),
                device_id: "dev1".to_string(),
                uri: "/3/0/0".to_string(),
            })
            .await;

        let evt = NotificationEvent::AsyncResponse(vec![AsyncResponseEntry {
            id: "ar-1".to_string(),
            status: Some(200),
            payload_b64: Some("NDI=".to_string()),
        }]);
        adapter.process_async_response(&evt).await;

        assert!(!adapter.correlation.contains("ar-1").await);
    }

    #[tokio::test]
    async fn process_new_registration_creates_a_session_for_each_device() {
        let adapter = adapter();
        let evt = NotificationEvent::Registration(vec![RegistrationEntry {
            ep: "dev1".to_string(),
            ept: Some("sensor".to_string()),
            resources: Vec::new(),
        }]);

        adapter.process_new_registration(&evt).await;
        assert!(adapter.session_table.has_session("fleet-dev1").await);
    }

    #[tokio::test]
    async fn reconnect_device_keeps_the_session_table_entry() {
        let adapter = adapter();
        adapter.register_new_device(&DeviceRecord::new("dev1", "sensor")).await;

        assert!(adapter.reconnect_device("dev1").await);
        assert!(adapter.session_table.has_session("fleet-dev1").await);
        assert!(adapter.sessions.read().await.contains_key("fleet-dev1"));
    }

    #[tokio::test]
    async fn reconnect_device_is_a_no_op_for_an_unknown_device() {
        let adapter = adapter();
        assert!(!adapter.reconnect_device("ghost").await);
    }
}
