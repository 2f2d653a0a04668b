//! Shared test fixtures: a mocked source-cloud client, a `MockMqttSession`
//! factory, and a one-call builder that wires an `Orchestrator` to a single
//! `MqttPeerAdapter` the way a running bridge process would at start-up.

use bridge_core::config::PeerConfig;
use bridge_core::correlation::CorrelationTable;
use bridge_core::credential_service::CredentialService;
use bridge_core::endpoint_registry::EndpointTypeRegistry;
use bridge_core::metrics::BridgeMetrics;
use bridge_core::orchestrator::{DeregistrationPolicy, Orchestrator};
use bridge_core::session_table::SessionTable;
use bridge_core::source_cloud::SourceCloudClient;
use bridge_core::transport::https::MockHttpsClient;
use bridge_core::transport::mqtt::{MockMqttSession, MockMqttSessionHandle, MqttSessionConfig, MqttSessionTrait};
use bridge_core::attribute_dispatcher::AttributeDispatcher;
use bridge_mqtt_peer::{MqttPeerAdapter, MqttSessionFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

/// A session factory that, besides handing back a fresh `MockMqttSession`
/// per device, keeps a handle onto each one's shared state so a test can
/// inspect what got published/subscribed after the box has been moved
/// into the adapter's own session map (spec §8 scenario assertions).
#[derive(Default)]
pub struct RecordingSessionFactory {
    handles: StdMutex<HashMap<String, MockMqttSessionHandle>>,
}

impl RecordingSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_for(&self, client_id: &str) -> Option<MockMqttSessionHandle> {
        self.handles.lock().unwrap().get(client_id).cloned()
    }
}

impl MqttSessionFactory for RecordingSessionFactory {
    fn build(&self, config: MqttSessionConfig) -> Box<dyn MqttSessionTrait> {
        let session = MockMqttSession::new();
        let handle = session.handle();
        self.handles.lock().unwrap().insert(config.client_id, handle);
        Box::new(session)
    }
}

pub fn peer_config() -> PeerConfig {
    PeerConfig {
        name: "iot_event_hub".to_string(),
        connect_string: None,
        sas_token: Some("static-token".to_string()),
        hub_name: Some("myhub".to_string()),
        max_shadows: 10,
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

/// A fully wired bridge: one orchestrator fanning out to one MQTT adapter,
/// both backed by a shared mocked source-cloud HTTPS client so a test can
/// script upstream responses and observe downstream session/topic effects.
pub struct TestBridge {
    pub https: Arc<MockHttpsClient>,
    pub source_cloud: Arc<SourceCloudClient>,
    pub endpoint_registry: Arc<EndpointTypeRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub adapter: Arc<MqttPeerAdapter>,
    pub sessions: Arc<RecordingSessionFactory>,
}

/// Builds the wiring above and registers the adapter with the orchestrator,
/// the way a bridge process does at start-up before the notification
/// channel's first event arrives.
pub async fn build_bridge(max_shadows: usize, enable_device_request_api: bool) -> TestBridge {
    let https = Arc::new(MockHttpsClient::new());
    let source_cloud = Arc::new(SourceCloudClient::new(Arc::clone(&https) as Arc<_>, "test-key", 100, enable_device_request_api));
    let endpoint_registry = Arc::new(EndpointTypeRegistry::new());

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&source_cloud),
        Arc::clone(&endpoint_registry),
        DeregistrationPolicy::RemoveShadow,
        "default",
    ));

    let config = peer_config();
    let attribute_source_cloud = Arc::clone(&source_cloud);
    let sessions = Arc::new(RecordingSessionFactory::new());
    let adapter = Arc::new(MqttPeerAdapter::new(
        config.clone(),
        10,
        DeregistrationPolicy::RemoveShadow,
        Duration::from_millis(1),
        Arc::new(SessionTable::new(max_shadows)),
        Arc::clone(&endpoint_registry),
        Arc::new(CorrelationTable::new()),
        Arc::clone(&source_cloud),
        Arc::new(AttributeDispatcher::new(attribute_source_cloud, vec!["/3/0/0".to_string(), "/3/0/1".to_string(), "/3/0/2".to_string()])),
        Arc::new(CredentialService::from_peer_config(&config).unwrap()),
        Arc::new(BridgeMetrics::default()),
        Arc::clone(&sessions) as Arc<dyn MqttSessionFactory>,
    ));
    adapter.attach_self();
    orchestrator.register_adapter(Arc::clone(&adapter) as Arc<dyn bridge_core::adapter::PeerAdapter>).await;

    TestBridge { https, source_cloud, endpoint_registry, orchestrator, adapter, sessions }
}
