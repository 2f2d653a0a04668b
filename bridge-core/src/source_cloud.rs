//! Source-Cloud Client (C4): discovery, resource listing, bulk
//! subscription, device-request relay, and tenant lookup against the
//! upstream device-management REST API (spec §4.4, §6).
//!
//! Built on the `HttpsClientTrait` (C1); retry/backoff for the webhook
//! bring-up handshake lives in `transport::https`.

use crate::error::{CloudError, CloudResult};
use crate::transport::https::HttpsClientTrait;
use crate::types::{CoapVerb, Resource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSummary {
    pub id: String,
    #[serde(default)]
    pub endpoint_name: Option<String>,
    #[serde(default)]
    pub endpoint_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DevicesPage {
    data: Vec<DeviceSummary>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantInfo {
    pub id: String,
    pub display_name: String,
}

/// Either a synchronous payload or a queued async-response id (spec §4.4).
#[derive(Debug, Clone)]
pub enum DeviceRequestOutcome {
    Synchronous { status: u16, body_b64: String },
    Queued { async_response_id: String },
}

pub struct SourceCloudClient {
    https: Arc<dyn HttpsClientTrait>,
    api_key: String,
    pagination_limit: u32,
    enable_device_request_api: bool,
    tenant: OnceCell<TenantInfo>,
}

impl SourceCloudClient {
    pub fn new(https: Arc<dyn HttpsClientTrait>, api_key: impl Into<String>, pagination_limit: u32, enable_device_request_api: bool) -> Self {
        Self {
            https,
            api_key: api_key.into(),
            pagination_limit,
            enable_device_request_api,
            tenant: OnceCell::new(),
        }
    }

    fn auth_header(&self) -> (&'static str, String) {
        ("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Paginated device discovery (spec §4.4): follows pages while
    /// `has_more=true`, combining them into one list preserving per-page
    /// order (spec §8 "Pagination combine" law).
    pub async fn discover_devices(&self) -> CloudResult<Vec<DeviceSummary>> {
        let mut all = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut path = format!(
                "/v3/devices?filter=state=registered&limit={}&order=ASC",
                self.pagination_limit
            );
            if let Some(cursor) = &after {
                path.push_str(&format!("&after={cursor}"));
            }

            let bearer = self.auth_header();
            let response = self.https.get(&path, &[(bearer.0, &bearer.1)]).await?;
            if response.status != 200 {
                return Err(CloudError::UnexpectedStatus { status: response.status, path });
            }

            let page: DevicesPage = serde_json::from_slice(&response.body)
                .map_err(|e| CloudError::MalformedResponse(e.to_string()))?;
            let has_more = page.has_more;
            let next_after = page.after.clone();
            all.extend(page.data);

            if !has_more {
                break;
            }
            after = next_after.or_else(|| all.last().map(|d| d.id.clone()));
            if after.is_none() {
                return Err(CloudError::MissingCursor);
            }
        }

        Ok(all)
    }

    /// Per-device resource discovery (spec §4.4): `GET /v2/endpoints/<id>`.
    pub async fn discover_resources(&self, device_id: &str) -> CloudResult<Vec<Resource>> {
        let path = format!("/v2/endpoints/{device_id}");
        let bearer = self.auth_header();
        let response = self.https.get(&path, &[(bearer.0, &bearer.1)]).await?;
        if response.status != 200 {
            return Err(CloudError::UnexpectedStatus { status: response.status, path });
        }
        serde_json::from_slice(&response.body).map_err(|e| CloudError::MalformedResponse(e.to_string()))
    }

    /// Bulk subscribe (spec §4.4): `PUT /v2/subscriptions` with a
    /// wildcard body; success is HTTP 204.
    pub async fn bulk_subscribe(&self) -> CloudResult<()> {
        let bearer = self.auth_header();
        let body = serde_json::to_vec(&serde_json::json!([{"endpoint-name": "*"}]))
            .map_err(|e| CloudError::MalformedResponse(e.to_string()))?;
        let response = self
            .https
            .put("/v2/subscriptions", &[(bearer.0, &bearer.1), ("Content-Type", "application/json")], body)
            .await?;
        if response.status != 204 {
            return Err(CloudError::UnexpectedStatus { status: response.status, path: "/v2/subscriptions".to_string() });
        }
        Ok(())
    }

    /// Issues a device-request command for a relayed CoAP verb (spec
    /// §4.4). Direct mode hits `/v2/endpoints/<id><uri>` with the verb
    /// mapped to its HTTP method; queued mode POSTs a device-request with
    /// a time-based UUID and returns a synthetic async-response id.
    pub async fn device_request(
        &self,
        device_id: &str,
        uri: &str,
        verb: CoapVerb,
        payload_b64: Option<&str>,
    ) -> CloudResult<DeviceRequestOutcome> {
        let bearer = self.auth_header();

        if !self.enable_device_request_api {
            let path = format!("/v2/endpoints/{device_id}{uri}");
            let headers = [(bearer.0, bearer.1.as_str())];
            let response = match verb {
                CoapVerb::Get => self.https.get(&path, &headers).await,
                CoapVerb::Put => self.https.put(&path, &headers, body_bytes(payload_b64)).await,
                CoapVerb::Post => self.https.post(&path, &headers, body_bytes(payload_b64)).await,
                CoapVerb::Delete => self.https.delete(&path, &headers).await,
            }
            .map_err(CloudError::Transport)?;

            return Ok(DeviceRequestOutcome::Synchronous {
                status: response.status,
                body_b64: base64_of(&response.body),
            });
        }

        let async_id = Uuid::now_v7().to_string();
        let path = format!("/v2/device-requests/{device_id}?async-id={async_id}");
        let body = serde_json::to_vec(&serde_json::json!({
            "method": verb_name(verb),
            "uri": uri,
            "payload-b64": payload_b64,
        }))
        .map_err(|e| CloudError::MalformedResponse(e.to_string()))?;

        let response = self
            .https
            .post(&path, &[(bearer.0, &bearer.1), ("Content-Type", "application/json")], body)
            .await?;
        if response.status >= 400 {
            return Err(CloudError::UnexpectedStatus { status: response.status, path });
        }

        Ok(DeviceRequestOutcome::Queued { async_response_id: async_id })
    }

    /// Tenant lookup (spec §4.4), cached for the process lifetime since the
    /// account identity rarely changes across a bridge's runtime.
    pub async fn tenant(&self) -> CloudResult<&TenantInfo> {
        self.tenant
            .get_or_try_init(|| async {
                let bearer = self.auth_header();
                let response = self.https.get("/v3/accounts/me", &[(bearer.0, &bearer.1)]).await?;
                if response.status != 200 {
                    return Err(CloudError::UnexpectedStatus { status: response.status, path: "/v3/accounts/me".to_string() });
                }
                let value: Value = serde_json::from_slice(&response.body)
                    .map_err(|e| CloudError::MalformedResponse(e.to_string()))?;
                Ok(TenantInfo {
                    id: value["id"].as_str().unwrap_or_default().to_string(),
                    display_name: value["display_name"].as_str().unwrap_or_default().to_string(),
                })
            })
            .await
    }
}

fn verb_name(verb: CoapVerb) -> &'static str {
    match verb {
        CoapVerb::Get => "GET",
        CoapVerb::Put => "PUT",
        CoapVerb::Post => "POST",
        CoapVerb::Delete => "DELETE",
    }
}

fn body_bytes(payload_b64: Option<&str>) -> Vec<u8> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    payload_b64.and_then(|p| BASE64.decode(p).ok()).unwrap_or_default()
}

fn base64_of(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::https::{HttpResponse, MockHttpsClient};
    use std::collections::HashMap;

    fn client(https: Arc<MockHttpsClient>) -> SourceCloudClient {
        SourceCloudClient::new(https, "test-key", 2, false)
    }

    #[tokio::test]
    async fn discovers_devices_across_pages_preserving_order() {
        let https = Arc::new(MockHttpsClient::new());
        https
            .stub(
                "/v3/devices?filter=state=registered&limit=2&order=ASC",
                HttpResponse {
                    status: 200,
                    body: serde_json::to_vec(&serde_json::json!({
                        "data": [{"id": "dev1"}, {"id": "dev2"}],
                        "has_more": true,
                        "after": "dev2"
                    }))
                    .unwrap(),
                    headers: HashMap::new(),
                },
            )
            .await;
        https
            .stub(
                "/v3/devices?filter=state=registered&limit=2&order=ASC&after=dev2",
                HttpResponse {
                    status: 200,
                    body: serde_json::to_vec(&serde_json::json!({
                        "data": [{"id": "dev3"}],
                        "has_more": false
                    }))
                    .unwrap(),
                    headers: HashMap::new(),
                },
            )
            .await;

        let client = client(https);
        let devices = client.discover_devices().await.unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["dev1", "dev2", "dev3"]);
    }

    #[tokio::test]
    async fn bulk_subscribe_requires_204() {
        let https = Arc::new(MockHttpsClient::new());
        https
            .stub("/v2/subscriptions", HttpResponse { status: 204, body: Vec::new(), headers: HashMap::new() })
            .await;
        let client = client(https);
        assert!(client.bulk_subscribe().await.is_ok());
    }

    #[tokio::test]
    async fn bulk_subscribe_surfaces_unexpected_status() {
        let https = Arc::new(MockHttpsClient::new());
        https
            .stub("/v2/subscriptions", HttpResponse { status: 500, body: Vec::new(), headers: HashMap::new() })
            .await;
        let client = client(https);
        let err = client.bulk_subscribe().await.unwrap_err();
        assert!(matches!(err, CloudError::UnexpectedStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn device_request_direct_mode_returns_synchronous_outcome() {
        let https = Arc::new(MockHttpsClient::new());
        https
            .stub("/v2/endpoints/dev1/3/0/0", HttpResponse { status: 200, body: b"42".to_vec(), headers: HashMap::new() })
            .await;
        let client = client(https);
        let outcome = client.device_request("dev1", "/3/0/0", CoapVerb::Get, None).await.unwrap();
        match outcome {
            DeviceRequestOutcome::Synchronous { status, .. } => assert_eq!(status, 200),
            _ => panic!("expected synchronous outcome"),
        }
    }

    #[tokio::test]
    async fn device_request_queued_mode_returns_async_id() {
        let https = Arc::new(MockHttpsClient::new());
        let client = SourceCloudClient::new(https, "test-key", 2, true);
        let outcome = client.device_request("dev1", "/3/0/0", CoapVerb::Get, None).await.unwrap();
        match outcome {
            DeviceRequestOutcome::Queued { async_response_id } => assert!(!async_response_id.is_empty()),
            _ => panic!("expected queued outcome"),
        }
    }

    #[tokio::test]
    async fn tenant_lookup_is_cached() {
        let https = Arc::new(MockHttpsClient::new());
        https
            .stub(
                "/v3/accounts/me",
                HttpResponse {
                    status: 200,
                    body: serde_json::to_vec(&serde_json::json!({"id": "acct-1", "display_name": "Acme"})).unwrap(),
                    headers: HashMap::new(),
                },
            )
            .await;
        let client = client(Arc::clone(&https));

        let first = client.tenant().await.unwrap().clone();
        let second = client.tenant().await.unwrap().clone();
        assert_eq!(first.id, second.id);
        assert_eq!(https.requests().await.len(), 1);
    }
}
