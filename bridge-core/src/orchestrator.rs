//! Orchestrator (C10): the single process-wide hub that fans decoded
//! events from the notification channel (C3) out to every registered peer
//! adapter (C9), and relays device-request calls back through the
//! source-cloud client (C4) (spec §4.9).

use crate::adapter::PeerAdapter;
use crate::endpoint_registry::EndpointTypeRegistry;
use crate::notification::EventSink;
use crate::source_cloud::SourceCloudClient;
use crate::types::{sanitize_endpoint_type, NotificationEvent, RegistrationEntry};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Policy for how a de-registration/expiry event is handled (spec §4.8,
/// §4.9 `deviceRemovedOnDeRegistration`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregistrationPolicy {
    /// Unsubscribe, disconnect, and delete the peer-side shadow.
    RemoveShadow,
    /// Disconnect the MQTT session only; keep the peer-side shadow.
    DisconnectOnly,
}

pub struct Orchestrator {
    source_cloud: Arc<SourceCloudClient>,
    endpoint_registry: Arc<EndpointTypeRegistry>,
    adapters: RwLock<Vec<Arc<dyn PeerAdapter>>>,
    policy: DeregistrationPolicy,
    default_endpoint_type: String,
    shutdown_requested: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        source_cloud: Arc<SourceCloudClient>,
        endpoint_registry: Arc<EndpointTypeRegistry>,
        policy: DeregistrationPolicy,
        default_endpoint_type: impl Into<String>,
    ) -> Self {
        Self {
            source_cloud,
            endpoint_registry,
            adapters: RwLock::new(Vec::new()),
            policy,
            default_endpoint_type: default_endpoint_type.into(),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    /// Registers an adapter. Serialized with respect to `shutdown`/`reset`
    /// via the adapters lock (spec §5 "Shared-resource policy").
    pub async fn register_adapter(&self, adapter: Arc<dyn PeerAdapter>) {
        self.adapters.write().await.push(adapter);
    }

    pub fn deregistration_policy(&self) -> DeregistrationPolicy {
        self.policy
    }

    pub fn source_cloud(&self) -> &Arc<SourceCloudClient> {
        &self.source_cloud
    }

    pub fn endpoint_registry(&self) -> &Arc<EndpointTypeRegistry> {
        &self.endpoint_registry
    }

    /// Full teardown + re-init (spec §4.9 `reset()`): every adapter
    /// processes a synthetic full-fleet deletion, then the adapter list is
    /// cleared so callers can re-register fresh instances.
    pub async fn reset(&self) {
        let adapters = self.adapters.read().await.clone();
        for adapter in &adapters {
            adapter.process_device_deletions(&[]).await;
        }
        self.adapters.write().await.clear();
    }

    /// Teardown only, the counterpart to `reset()` that does not re-init
    /// (spec §C "Structured shutdown"). Sets the halt flag any
    /// long-running worker referencing this orchestrator should observe.
    pub async fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.adapters.write().await.clear();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    async fn record_endpoint_types(&self, devices: &[RegistrationEntry]) {
        for device in devices {
            let sanitized = sanitize_endpoint_type(device.ept.as_deref(), &self.default_endpoint_type);
            self.endpoint_registry.set(&device.ep, &sanitized).await;
        }
    }

    /// Fans one decoded event out to every adapter. Event fan-out is
    /// concurrent across adapters but sequential within a single adapter
    /// (spec §5 "Ordering guarantees").
    async fn fan_out<'a, F, Fut>(&'a self, per_adapter: F)
    where
        F: Fn(Arc<dyn PeerAdapter>) -> Fut + 'a,
        Fut: std::future::Future<Output = ()> + Send + 'a,
    {
        let adapters = self.adapters.read().await.clone();
        let futures: Vec<_> = adapters.into_iter().map(per_adapter).collect();
        futures_util::future::join_all(futures).await;
    }
}

#[async_trait]
impl EventSink for Orchestrator {
    async fn dispatch(&self, event: NotificationEvent) {
        match &event {
            NotificationEvent::Registration(devices) | NotificationEvent::ReRegistration(devices) => {
                self.record_endpoint_types(devices).await;
            }
            NotificationEvent::Deregistration(ids) | NotificationEvent::RegistrationsExpired(ids) => {
                if self.policy == DeregistrationPolicy::RemoveShadow {
                    for id in ids {
                        self.endpoint_registry.remove(id).await;
                    }
                }
            }
            _ => {}
        }

        let event = Arc::new(event);
        self.fan_out(move |adapter| {
            let event = Arc::clone(&event);
            async move {
                match event.as_ref() {
                    NotificationEvent::Registration(_) => adapter.process_new_registration(&event).await,
                    NotificationEvent::ReRegistration(_) => adapter.process_re_registration(&event).await,
                    NotificationEvent::Deregistration(_) => adapter.process_deregistrations(&event).await,
                    NotificationEvent::RegistrationsExpired(_) => adapter.process_registrations_expired(&event).await,
                    NotificationEvent::Notification(_) => adapter.process_notification(&event).await,
                    NotificationEvent::AsyncResponse(_) => adapter.process_async_response(&event).await,
                }
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ApiResponse, InboundCommand};
    use crate::transport::https::MockHttpsClient;
    use crate::types::{CoapVerb, DeviceRecord};
    use std::sync::atomic::AtomicUsize;

    struct CountingAdapter {
        registrations: AtomicUsize,
    }

    #[async_trait]
    impl PeerAdapter for CountingAdapter {
        async fn register_new_device(&self, _record: &DeviceRecord) -> bool {
            true
        }
        async fn delete_device(&self, _device_id: &str) -> bool {
            true
        }
        async fn process_notification(&self, _evt: &NotificationEvent) {}
        async fn process_async_response(&self, _evt: &NotificationEvent) {}
        async fn process_new_registration(&self, _evt: &NotificationEvent) {
            self.registrations.fetch_add(1, Ordering::SeqCst);
        }
        async fn process_re_registration(&self, _evt: &NotificationEvent) {}
        async fn process_deregistrations(&self, _evt: &NotificationEvent) {}
        async fn process_registrations_expired(&self, _evt: &NotificationEvent) {}
        async fn process_device_deletions(&self, _device_ids: &[String]) {}
        async fn process_api_request_operation(&self, _uri: &str, _body: &[u8], _verb: CoapVerb, _request_id: &str) -> ApiResponse {
            ApiResponse::ok(serde_json::json!({}))
        }
        async fn process_endpoint_resource_operation(&self, _verb: CoapVerb, _device_id: &str, _uri: &str, _value: Option<&str>) -> String {
            String::new()
        }
        async fn on_message_receive(&self, _command: InboundCommand) {}
    }

    fn orchestrator() -> Orchestrator {
        let https = Arc::new(MockHttpsClient::new());
        let source_cloud = Arc::new(SourceCloudClient::new(https, "key", 100, false));
        Orchestrator::new(source_cloud, Arc::new(EndpointTypeRegistry::new()), DeregistrationPolicy::RemoveShadow, "default")
    }

    #[tokio::test]
    async fn registration_event_updates_endpoint_registry_and_fans_out() {
        let orchestrator = orchestrator();
        let adapter = Arc::new(CountingAdapter { registrations: AtomicUsize::new(0) });
        orchestrator.register_adapter(adapter.clone()).await;

        orchestrator
            .dispatch(NotificationEvent::Registration(vec![RegistrationEntry {
                ep: "dev1".to_string(),
                ept: Some("sensor".to_string()),
                resources: Vec::new(),
            }]))
            .await;

        assert_eq!(orchestrator.endpoint_registry().get("dev1").await, Some("sensor".to_string()));
        assert_eq!(adapter.registrations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deregistration_clears_registry_under_remove_shadow_policy() {
        let orchestrator = orchestrator();
        orchestrator.endpoint_registry().set("dev1", "sensor").await;

        orchestrator.dispatch(NotificationEvent::Deregistration(vec!["dev1".to_string()])).await;

        assert_eq!(orchestrator.endpoint_registry().get("dev1").await, None);
    }

    #[tokio::test]
    async fn shutdown_clears_adapters_and_sets_flag() {
        let orchestrator = orchestrator();
        let adapter = Arc::new(CountingAdapter { registrations: AtomicUsize::new(0) });
        orchestrator.register_adapter(adapter).await;

        orchestrator.shutdown().await;

        assert!(orchestrator.is_shutdown());
        assert!(orchestrator.adapters.read().await.is_empty());
    }
}
