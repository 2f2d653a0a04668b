//! Attribute Retrieval Dispatcher (C6): for a device whose resources
//! include the device-info path, fetches a configured list of `/3/0/x`
//! URIs through the source-cloud client and collates the results into
//! well-known metadata keys before shadow creation (spec §4.5).

use crate::source_cloud::SourceCloudClient;
use crate::types::{CoapVerb, DeviceMetadata};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Well-known `/3/0/x` resource indices (spec §4.5).
const URI_MANUFACTURER: &str = "/3/0/0";
const URI_MODEL: &str = "/3/0/1";
const URI_SERIAL: &str = "/3/0/2";

/// Tracks which devices have a retrieval in flight so a second request
/// while one is pending is a no-op (spec §4.5 invariant).
pub struct AttributeDispatcher {
    source_cloud: Arc<SourceCloudClient>,
    uri_list: Vec<String>,
    in_flight: Mutex<std::collections::HashSet<String>>,
}

impl AttributeDispatcher {
    pub fn new(source_cloud: Arc<SourceCloudClient>, uri_list: Vec<String>) -> Self {
        Self { source_cloud, uri_list, in_flight: Mutex::new(std::collections::HashSet::new()) }
    }

    /// Attempts to start a retrieval for `device_id`. Returns `false`
    /// without doing any work if one is already pending.
    pub async fn try_start(&self, device_id: &str) -> bool {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains(device_id) {
            return false;
        }
        in_flight.insert(device_id.to_string());
        true
    }

    /// Issues one GET per configured URI and collates the results into a
    /// `DeviceMetadata` bag, then marks the device's retrieval complete.
    /// GETs that fail or return a non-2xx status are skipped; attribute
    /// retrieval is best-effort, not a gate on shadow creation.
    pub async fn retrieve(&self, device_id: &str) -> DeviceMetadata {
        let mut values = HashMap::new();
        for uri in &self.uri_list {
            if let Ok(outcome) = self.source_cloud.device_request(device_id, uri, CoapVerb::Get, None).await {
                if let crate::source_cloud::DeviceRequestOutcome::Synchronous { status, body_b64 } = outcome {
                    if (200..300).contains(&status) {
                        values.insert(uri.clone(), decode_scalar(&body_b64));
                    }
                }
            }
        }

        self.in_flight.lock().await.remove(device_id);
        collate(values)
    }
}

/// Decodes a base64 scalar payload back to its displayable text form,
/// falling back to the raw base64 string if it isn't valid UTF-8.
fn decode_scalar(body_b64: &str) -> String {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    match BASE64.decode(body_b64) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| body_b64.to_string()),
        Err(_) => body_b64.to_string(),
    }
}

fn collate(values: HashMap<String, String>) -> DeviceMetadata {
    DeviceMetadata {
        meta_mfg: values.get(URI_MANUFACTURER).cloned(),
        meta_model: values.get(URI_MODEL).cloned(),
        meta_serial: values.get(URI_SERIAL).cloned(),
        meta_time: None,
        extra: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::https::MockHttpsClient;

    fn dispatcher() -> AttributeDispatcher {
        let https = Arc::new(MockHttpsClient::new());
        let source_cloud = Arc::new(SourceCloudClient::new(https, "key", 100, false));
        AttributeDispatcher::new(source_cloud, vec![URI_MANUFACTURER.to_string(), URI_MODEL.to_string(), URI_SERIAL.to_string()])
    }

    #[tokio::test]
    async fn second_request_while_pending_is_a_no_op() {
        let dispatcher = dispatcher();
        assert!(dispatcher.try_start("dev1").await);
        assert!(!dispatcher.try_start("dev1").await);
    }

    #[tokio::test]
    async fn retrieve_clears_in_flight_marker() {
        let dispatcher = dispatcher();
        dispatcher.try_start("dev1").await;
        dispatcher.retrieve("dev1").await;
        assert!(dispatcher.try_start("dev1").await);
    }
}
