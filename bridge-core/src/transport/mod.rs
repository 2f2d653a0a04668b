//! Peer transport abstractions (C1): an MQTT session trait that a peer
//! adapter drives, and an HTTPS client used by both the source-cloud client
//! (C4) and the webhook bring-up retry loop (C3).

pub mod https;
pub mod mqtt;

pub use https::{HttpsClient, HttpsClientTrait, MockHttpsClient};
pub use mqtt::{MessageCallback, MockMqttSession, MockMqttSessionHandle, MqttSession, MqttSessionTrait};
