pub mod adapter;
pub mod attribute_dispatcher;
pub mod bridge;
pub mod config;
pub mod correlation;
pub mod credential_service;
pub mod endpoint_registry;
pub mod error;
pub mod fanout;
pub mod logging;
pub mod metrics;
pub mod notification;
pub mod orchestrator;
pub mod session_table;
pub mod source_cloud;
pub mod transport;
pub mod types;

pub use adapter::{ApiResponse, InboundCommand, PeerAdapter};
pub use bridge::{Bridge, NotificationWorker};
pub use config::{NotificationMode, PeerConfig, SourceCloudConfig};
pub use credential_service::{ConnectionString, CredentialService};
pub use endpoint_registry::EndpointTypeRegistry;
pub use error::*;
pub use logging::*;
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use orchestrator::{DeregistrationPolicy, Orchestrator};
pub use session_table::{SessionTable, SessionTableError};
pub use source_cloud::SourceCloudClient;
pub use transport::{
    HttpsClient, HttpsClientTrait, MockHttpsClient, MockMqttSession, MockMqttSessionHandle, MqttSession, MqttSessionTrait,
};
pub use types::*;
