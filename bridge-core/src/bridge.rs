//! Structured shutdown (spec §C): the single entry point that halts every
//! background worker a running bridge process owns (the notification
//! channel, each peer's credential-refresh loop, and the orchestrator's
//! adapters) without tearing down and re-initializing the way `reset()`
//! does.

use crate::credential_service::CredentialService;
use crate::notification::poll::PollHandle;
use crate::notification::websocket::WebSocketChannel;
use crate::orchestrator::Orchestrator;
use std::sync::Arc;

/// One of the three notification-channel transports a bridge may have
/// started (spec §4.3); webhook mode owns no background task here since
/// its inbound `axum` router is driven by the embedding application.
pub enum NotificationWorker {
    Poll(Arc<PollHandle>),
    WebSocket(Arc<WebSocketChannel>),
    Webhook,
}

/// Composes the long-lived pieces of a running bridge process so a single
/// call can halt all of them. Construction happens after every peer
/// adapter has been registered with `orchestrator` and its credential
/// service's refresh loop has been spawned.
pub struct Bridge {
    orchestrator: Arc<Orchestrator>,
    credential_services: Vec<Arc<CredentialService>>,
    notification_worker: NotificationWorker,
}

impl Bridge {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        credential_services: Vec<Arc<CredentialService>>,
        notification_worker: NotificationWorker,
    ) -> Self {
        Self { orchestrator, credential_services, notification_worker }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Halts the notification channel and every credential-refresh loop,
    /// then tears down the orchestrator's adapters (teardown only, unlike
    /// `Orchestrator::reset()` which also re-initializes).
    pub async fn shutdown(&self) {
        match &self.notification_worker {
            NotificationWorker::Poll(handle) => handle.halt(),
            NotificationWorker::WebSocket(channel) => channel.stop().await,
            NotificationWorker::Webhook => {}
        }
        for service in &self.credential_services {
            service.halt();
        }
        self.orchestrator.shutdown().await;
    }

    pub fn is_shutdown(&self) -> bool {
        self.orchestrator.is_shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::endpoint_registry::EndpointTypeRegistry;
    use crate::orchestrator::DeregistrationPolicy;
    use crate::source_cloud::SourceCloudClient;
    use crate::transport::https::MockHttpsClient;

    fn peer_config() -> PeerConfig {
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

    #[tokio::test]
    async fn shutdown_halts_the_poll_worker_and_every_credential_service() {
        let https = Arc::new(MockHttpsClient::new());
        let source_cloud = Arc::new(SourceCloudClient::new(https, "key", 100, false));
        let orchestrator = Arc::new(Orchestrator::new(
            source_cloud,
            Arc::new(EndpointTypeRegistry::new()),
            DeregistrationPolicy::RemoveShadow,
            "default",
        ));
        let credential_service = Arc::new(CredentialService::from_peer_config(&peer_config()).unwrap());
        let poll_handle = Arc::new(PollHandle::default());

        let bridge = Bridge::new(
            Arc::clone(&orchestrator),
            vec![Arc::clone(&credential_service)],
            NotificationWorker::Poll(Arc::clone(&poll_handle)),
        );

        bridge.shutdown().await;

        assert!(credential_service.is_halted());
        assert!(bridge.is_shutdown());
    }
}
