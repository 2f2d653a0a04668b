//! HTTPS client transport (C1), used by the source-cloud client (C4) and
//! the webhook bring-up retry loop (C3): a `reqwest::Client` built with an
//! explicit timeout, wrapped in a retry-with-backoff loop for calls that may
//! need to wait out a cloud-side warm-up window.

use crate::error::TransportResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

#[async_trait]
pub trait HttpsClientTrait: Send + Sync {
    async fn get(&self, path: &str, headers: &[(&str, &str)]) -> TransportResult<HttpResponse>;
    async fn post(&self, path: &str, headers: &[(&str, &str)], body: Vec<u8>) -> TransportResult<HttpResponse>;
    async fn put(&self, path: &str, headers: &[(&str, &str)], body: Vec<u8>) -> TransportResult<HttpResponse>;
    async fn delete(&self, path: &str, headers: &[(&str, &str)]) -> TransportResult<HttpResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

pub struct HttpsClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.into() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> TransportResult<HttpResponse> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, body, headers })
    }

    fn apply_headers(mut request: reqwest::RequestBuilder, headers: &[(&str, &str)]) -> reqwest::RequestBuilder {
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        request
    }
}

#[async_trait]
impl HttpsClientTrait for HttpsClient {
    async fn get(&self, path: &str, headers: &[(&str, &str)]) -> TransportResult<HttpResponse> {
        let request = Self::apply_headers(self.client.get(self.url(path)), headers);
        self.send(request).await
    }

    async fn post(&self, path: &str, headers: &[(&str, &str)], body: Vec<u8>) -> TransportResult<HttpResponse> {
        let request = Self::apply_headers(self.client.post(self.url(path)), headers).body(body);
        self.send(request).await
    }

    async fn put(&self, path: &str, headers: &[(&str, &str)], body: Vec<u8>) -> TransportResult<HttpResponse> {
        let request = Self::apply_headers(self.client.put(self.url(path)), headers).body(body);
        self.send(request).await
    }

    async fn delete(&self, path: &str, headers: &[(&str, &str)]) -> TransportResult<HttpResponse> {
        let request = Self::apply_headers(self.client.delete(self.url(path)), headers);
        self.send(request).await
    }
}

/// Retries `operation` up to `max_retries` times with a fixed wait between
/// attempts. Used by the webhook bring-up handshake (§4.3), where the
/// source cloud's webhook registration endpoint can 5xx briefly while it
/// warms up.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    wait: Duration,
    mut operation: F,
) -> TransportResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = TransportResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries => {
                attempt += 1;
                warn!(attempt, max_retries, error = %err, "retrying after failure");
                tokio::time::sleep(wait).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// In-memory mock used by `bridge-tests` to script source-cloud responses.
pub struct MockHttpsClient {
    responses: Mutex<HashMap<String, HttpResponse>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl Default for MockHttpsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHttpsClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn stub(&self, path: &str, response: HttpResponse) {
        self.responses.lock().await.insert(path.to_string(), response);
    }

    pub async fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().await.clone()
    }

    async fn respond(&self, method: &str, path: &str) -> TransportResult<HttpResponse> {
        self.requests.lock().await.push((method.to_string(), path.to_string()));
        Ok(self
            .responses
            .lock()
            .await
            .get(path)
            .cloned()
            .unwrap_or(HttpResponse { status: 404, body: Vec::new(), headers: HashMap::new() }))
    }
}

#[async_trait]
impl HttpsClientTrait for MockHttpsClient {
    async fn get(&self, path: &str, _headers: &[(&str, &str)]) -> TransportResult<HttpResponse> {
        self.respond("GET", path).await
    }

    async fn post(&self, path: &str, _headers: &[(&str, &str)], _body: Vec<u8>) -> TransportResult<HttpResponse> {
        self.respond("POST", path).await
    }

    async fn put(&self, path: &str, _headers: &[(&str, &str)], _body: Vec<u8>) -> TransportResult<HttpResponse> {
        self.respond("PUT", path).await
    }

    async fn delete(&self, path: &str, _headers: &[(&str, &str)]) -> TransportResult<HttpResponse> {
        self.respond("DELETE", path).await
    }
}
