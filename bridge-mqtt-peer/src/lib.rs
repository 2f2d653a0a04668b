//! MQTT exemplar peer (C9): a concrete `bridge_core::PeerAdapter`
//! implementation shaped like an IoT-Hub-style broker: one MQTT session
//! per device, signed-token credentials, and a `__EPNAME__`/
//! `__OBSERVATION_KEY__`-templated topic layout (spec §4.8).

pub mod adapter;
pub mod credentials;
pub mod reconnect;
pub mod topics;

pub use adapter::{MqttPeerAdapter, MqttSessionFactory, ProductionSessionFactory};
pub use credentials::DeviceCredentials;
