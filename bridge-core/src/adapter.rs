//! Peer Adapter Contract (C9): the interface every peer (exemplified by
//! the MQTT adapter in `bridge-mqtt-peer`) must satisfy (spec §4.8).
//!
//! Per the collapsed-inheritance design note (spec §9), this is a single
//! trait plus composable helpers (template substitution below; session
//! table, prefix policy, and async correlation live in their own modules)
//! rather than a base-class hierarchy.

use crate::types::{CoapVerb, DeviceRecord, NotificationEvent};
use async_trait::async_trait;
use serde_json::Value;

/// Result of a forwarded API request (spec §4.8
/// `processApiRequestOperation`).
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u16, api_execute_status: &str) -> Self {
        Self { status, body: serde_json::json!({ "api_execute_status": api_execute_status }) }
    }
}

/// A raw inbound message on a device's command topic, decoded enough to
/// dispatch without committing to a transport-specific representation.
#[derive(Debug, Clone)]
pub struct InboundCommand {
    pub topic: String,
    pub message: Vec<u8>,
}

#[async_trait]
pub trait PeerAdapter: Send + Sync {
    /// Creates the peer-side shadow identity and an MQTT (or equivalent)
    /// session for it.
    async fn register_new_device(&self, record: &DeviceRecord) -> bool;

    /// Stops the listener, disconnects, removes the peer-side shadow, and
    /// clears the device's entry from the endpoint-type registry.
    async fn delete_device(&self, device_id: &str) -> bool;

    /// Telemetry fan-out: decode, re-serialize, publish at QoS 0.
    async fn process_notification(&self, evt: &NotificationEvent);

    /// Resolves a pending async correlation record and publishes the
    /// observation it was waiting on (spec §4.4 scenario 3).
    async fn process_async_response(&self, evt: &NotificationEvent);

    /// New-registration batch: triggers attribute retrieval per device
    /// under the shadow cap.
    async fn process_new_registration(&self, evt: &NotificationEvent);

    /// Treated identically to `process_new_registration` (spec §4.8).
    async fn process_re_registration(&self, evt: &NotificationEvent);

    async fn process_deregistrations(&self, evt: &NotificationEvent);

    async fn process_registrations_expired(&self, evt: &NotificationEvent);

    /// Unconditional teardown: unsubscribe, disconnect, delete shadow,
    /// clear registry entry.
    async fn process_device_deletions(&self, device_ids: &[String]);

    async fn process_api_request_operation(
        &self,
        uri: &str,
        body: &[u8],
        verb: CoapVerb,
        request_id: &str,
    ) -> ApiResponse;

    async fn process_endpoint_resource_operation(
        &self,
        verb: CoapVerb,
        device_id: &str,
        uri: &str,
        value: Option<&str>,
    ) -> String;

    async fn on_message_receive(&self, command: InboundCommand);
}

/// Substitutes `__KEY__`-style placeholders in a topic template, the
/// pattern behind `__EPNAME__`, `__OBSERVATION_KEY__`, etc. (spec §4.8).
pub fn substitute_template(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in replacements {
        result = result.replace(key, value);
    }
    result
}

/// Extracts the peer-prefixed device name from an inbound topic, taken as
/// the second `/`-separated segment (spec §4.8 "Inbound handling":
/// `devices/<prefixed_name>/messages/...`).
pub fn prefixed_name_from_topic(topic: &str) -> Option<&str> {
    topic.split('/').nth(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_every_placeholder() {
        let result = substitute_template(
            "devices/__EPNAME__/messages/events/__OBSERVATION_KEY__",
            &[("__EPNAME__", "dev1"), ("__OBSERVATION_KEY__", "obs")],
        );
        assert_eq!(result, "devices/dev1/messages/events/obs");
    }

    #[test]
    fn extracts_prefixed_name_as_second_segment() {
        assert_eq!(
            prefixed_name_from_topic("devices/fleet-dev1/messages/devicebound/coap_verb=get"),
            Some("fleet-dev1")
        );
        assert_eq!(prefixed_name_from_topic("devices"), None);
    }
}
