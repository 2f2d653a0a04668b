//! Webhook notification mode (spec §4.3). Bring-up does delete-pull,
//! delete-callback, put-callback, verify-callback against the source
//! cloud, retrying the whole sequence on failure; the listener side is a
//! small `axum` service that validates the `Authentication` header and
//! always ACKs with an empty JSON 200.

use crate::config::SourceCloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::metrics::BridgeMetrics;
use crate::notification::{parse_and_dispatch, DuplicateFilter, EventSink};
use crate::transport::https::{retry_with_backoff, HttpsClientTrait};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

/// Recomputes the `Authentication` header value the bridge put into the
/// callback descriptor, so inbound requests can be validated without
/// storing the value anywhere but deriving it from `api_key` + `url`.
pub fn compute_auth_hash(api_key: &str, callback_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(b":");
    hasher.update(callback_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Runs the callback bring-up handshake (spec §4.3): delete any
/// pre-existing pull channel, delete any existing callback, PUT the new
/// descriptor, then verify by GETting it back and comparing `url`.
pub async fn establish_callback(https: &dyn HttpsClientTrait, config: &SourceCloudConfig) -> CloudResult<()> {
    let bearer = format!("Bearer {}", config.api_key);
    let auth_header = ("Authorization", bearer.as_str());
    let url = config.webhook_callback_url();
    let auth_hash = compute_auth_hash(&config.api_key, &url);

    let _ = https.delete("/v2/notification/pull", &[auth_header]).await;
    let _ = https.delete("/v2/notification/callback", &[auth_header]).await;

    let body = serde_json::to_vec(&json!({
        "url": url,
        "headers": { "Authentication": auth_hash },
    }))
    .map_err(|e| CloudError::MalformedResponse(e.to_string()))?;

    let response = https
        .put("/v2/notification/callback", &[auth_header, ("Content-Type", "application/json")], body)
        .await
        .map_err(CloudError::Transport)?;
    if response.status >= 300 {
        return Err(CloudError::UnexpectedStatus { status: response.status, path: "/v2/notification/callback".to_string() });
    }

    let verify = https.get("/v2/notification/callback", &[auth_header]).await.map_err(CloudError::Transport)?;
    if verify.status != 200 {
        return Err(CloudError::UnexpectedStatus { status: verify.status, path: "/v2/notification/callback".to_string() });
    }
    let descriptor: serde_json::Value =
        serde_json::from_slice(&verify.body).map_err(|e| CloudError::MalformedResponse(e.to_string()))?;
    if descriptor.get("url").and_then(|v| v.as_str()) != Some(url.as_str()) {
        return Err(CloudError::MalformedResponse("callback url mismatch on verify".to_string()));
    }

    Ok(())
}

/// Retries `establish_callback` up to `config.webhook_num_retries` times
/// with `config.webhook_retry_wait` between attempts (spec §4.3, §7
/// "Webhook bring-up retries"). Terminal failure is the caller's cue to
/// invoke the orchestrator's `reset()`.
pub async fn establish_callback_with_retries(
    https: Arc<dyn HttpsClientTrait>,
    config: Arc<SourceCloudConfig>,
    metrics: Arc<BridgeMetrics>,
) -> CloudResult<()> {
    retry_with_backoff(config.webhook_num_retries, config.webhook_retry_wait, move || {
        let https = Arc::clone(&https);
        let config = Arc::clone(&config);
        let metrics = Arc::clone(&metrics);
        async move {
            establish_callback(https.as_ref(), &config).await.map_err(|_| {
                metrics.record_webhook_bringup_retry();
                crate::error::TransportError::Connection("callback bring-up failed".to_string())
            })
        }
    })
    .await
    .map_err(|_| CloudError::UnexpectedStatus { status: 0, path: "/v2/notification/callback".to_string() })
}

struct WebhookState {
    auth_hash: Option<String>,
    filter: Mutex<DuplicateFilter>,
    sink: Arc<dyn EventSink>,
}

/// Builds the inbound webhook router: a single POST endpoint that
/// validates the `Authentication` header when present (push-URL mode
/// accepts requests with the header absent), dispatches decoded events,
/// and always ACKs `200 {}` regardless of processing outcome.
pub fn router(auth_hash: Option<String>, sink: Arc<dyn EventSink>, metrics: Arc<BridgeMetrics>) -> Router {
    let state = Arc::new(WebhookState { auth_hash, filter: Mutex::new(DuplicateFilter::with_metrics(metrics)), sink });
    Router::new().route("/notify", post(handle_notify)).layer(TraceLayer::new_for_http()).with_state(state)
}

async fn handle_notify(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let authorized = match (&state.auth_hash, headers.get("Authentication")) {
        (Some(expected), Some(actual)) => actual.to_str().map(|v| v == expected).unwrap_or(false),
        (Some(_), None) => true, // push-URL mode: header absent is accepted (spec §4.3).
        (None, _) => true,
    };

    if authorized {
        let mut filter = state.filter.lock().await;
        if let Err(e) = parse_and_dispatch(&mut filter, state.sink.as_ref(), &body).await {
            tracing::warn!(error = %e, "failed to decode webhook body");
        }
    } else {
        tracing::warn!("rejected webhook request with invalid Authentication header");
    }

    (StatusCode::OK, Json(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_hash_is_deterministic() {
        let a = compute_auth_hash("key", "https://gw/notify");
        let b = compute_auth_hash("key", "https://gw/notify");
        assert_eq!(a, b);
        assert_ne!(a, compute_auth_hash("key", "https://gw/other"));
    }
}
