//! Data model (spec §3): device records, peer-prefixed names, notification
//! events, async correlation, and credential records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Endpoint types that are reserved and can never be a sanitized result
/// (spec §8 invariant: "T is non-empty and not in the reserved set").
pub const RESERVED_ENDPOINT_TYPES: [&str; 3] = ["reg-update", "null", ""];

/// Sanitizes a raw endpoint type, substituting `default` when the raw value
/// is missing, empty, or collides with a reserved lifecycle keyword.
pub fn sanitize_endpoint_type(raw: Option<&str>, default: &str) -> String {
    match raw {
        Some(value) if !RESERVED_ENDPOINT_TYPES.contains(&value) => value.to_string(),
        _ => default.to_string(),
    }
}

/// A single LWM2M-style resource on a device, as returned by resource
/// discovery (§4.4 "Resource discovery").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub path: String,
    #[serde(default)]
    pub rt: String,
    #[serde(default)]
    pub obs: bool,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl Resource {
    /// The device-info resource path that gates attribute retrieval (§4.5).
    pub const DEVICE_INFO_PATH: &'static str = "/3/0";

    pub fn is_device_info(&self) -> bool {
        self.path == Self::DEVICE_INFO_PATH
    }
}

/// Well-known attribute keys populated by the attribute retrieval
/// dispatcher (C6) from `/3/0/x` resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub meta_mfg: Option<String>,
    pub meta_model: Option<String>,
    pub meta_serial: Option<String>,
    pub meta_time: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

/// The canonical device record (spec §3), keyed by `device_id`, created on
/// first sighting and destroyed on deletion or expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub endpoint_type: String,
    pub etag: Option<String>,
    pub dev_url: Option<String>,
    pub resources: Vec<Resource>,
    pub metadata: DeviceMetadata,
    /// Correlation id of the adapter handling this device's attribute
    /// retrieval, captured during §4.5's async workflow. Ownership of the
    /// adapter itself stays with the orchestrator (§9's note on weak
    /// back-references); this is a lookup key, not a reference.
    pub peer_processor: Option<String>,
}

impl DeviceRecord {
    pub fn new(device_id: impl Into<String>, endpoint_type: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            endpoint_type: endpoint_type.into(),
            etag: None,
            dev_url: None,
            resources: Vec::new(),
            metadata: DeviceMetadata::default(),
            peer_processor: None,
        }
    }

    pub fn needs_attribute_retrieval(&self) -> bool {
        self.resources.iter().any(Resource::is_device_info)
    }
}

/// Per-peer prefix policy (spec §3 "Peer-prefixed name").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixPolicy {
    pub enabled: bool,
    pub prefix: String,
    pub separator: String,
}

impl PrefixPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            prefix: String::new(),
            separator: String::new(),
        }
    }

    /// `addPrefix`: maps a bare `device_id` to its peer-prefixed name.
    pub fn add_prefix(&self, device_id: &str) -> String {
        if !self.enabled || self.prefix.is_empty() {
            return device_id.to_string();
        }
        let marker = format!("{}{}", self.prefix, self.separator);
        if device_id.starts_with(&marker) {
            return device_id.to_string();
        }
        format!("{marker}{device_id}")
    }

    /// `removePrefix`: inverse of `add_prefix`.
    pub fn remove_prefix(&self, prefixed_name: &str) -> String {
        if !self.enabled || self.prefix.is_empty() {
            return prefixed_name.to_string();
        }
        let marker = format!("{}{}", self.prefix, self.separator);
        prefixed_name
            .strip_prefix(&marker)
            .unwrap_or(prefixed_name)
            .to_string()
    }
}

/// A live per-device shadow session (spec §3), excluding the transport
/// handle and listener task which the session table owns directly rather
/// than threading through a plain data type.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub prefixed_name: String,
    pub endpoint_type: String,
    pub subscribed_topics: Vec<TopicEntry>,
    pub last_state: Option<String>,
}

/// One subscribed (or published-to) topic and its QoS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicEntry {
    pub topic: String,
    pub qos: u8,
}

/// Credential kind (spec §3 "Credential record").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialKind {
    SignedToken,
    StaticSecret,
}

/// A derived or supplied credential, with its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub kind: CredentialKind,
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub validity: Duration,
}

impl CredentialRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let validity = chrono::Duration::from_std(self.validity).unwrap_or(chrono::Duration::zero());
        now >= self.issued_at + validity
    }
}

/// A CoAP verb relayed from the peer to the source cloud (§4.4, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoapVerb {
    Get,
    Put,
    Post,
    Delete,
}

impl CoapVerb {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "get" => Some(CoapVerb::Get),
            "put" => Some(CoapVerb::Put),
            "post" => Some(CoapVerb::Post),
            "delete" => Some(CoapVerb::Delete),
            _ => None,
        }
    }

    pub fn as_http_method(&self) -> reqwest::Method {
        match self {
            CoapVerb::Get => reqwest::Method::GET,
            CoapVerb::Put => reqwest::Method::PUT,
            CoapVerb::Post => reqwest::Method::POST,
            CoapVerb::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Per-pending-async-request correlation record (spec §3).
#[derive(Debug, Clone)]
pub struct AsyncCorrelationRecord {
    pub async_id: String,
    pub verb: CoapVerb,
    pub inbound_topic: String,
    pub reply_topic: String,
    pub original_message: Vec<u8>,
    pub device_id: String,
    pub uri: String,
}

/// One entry inside a `notifications` list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationEntry {
    pub id: String,
    pub path: String,
    #[serde(rename = "payload")]
    pub payload_b64: String,
    #[serde(default)]
    pub ct: Option<String>,
}

/// One entry inside an `async-responses` list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AsyncResponseEntry {
    pub id: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(rename = "payload", default)]
    pub payload_b64: Option<String>,
}

/// A single device summary as carried in `registrations`/`reg-updates`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrationEntry {
    pub ep: String,
    #[serde(default)]
    pub ept: Option<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Decoded notification event (spec §3 "Notification event" sum type).
/// Decoded exactly once, by the notification channel (C3).
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    Registration(Vec<RegistrationEntry>),
    ReRegistration(Vec<RegistrationEntry>),
    Deregistration(Vec<String>),
    RegistrationsExpired(Vec<String>),
    Notification(Vec<NotificationEntry>),
    AsyncResponse(Vec<AsyncResponseEntry>),
}

/// Configuration for structured logging levels, shared with `logging.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Trace => write!(f, "TRACE"),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_endpoint_type_substitutes_reserved_and_missing() {
        assert_eq!(sanitize_endpoint_type(None, "default"), "default");
        assert_eq!(sanitize_endpoint_type(Some(""), "default"), "default");
        assert_eq!(sanitize_endpoint_type(Some("reg-update"), "default"), "default");
        assert_eq!(sanitize_endpoint_type(Some("null"), "default"), "default");
        assert_eq!(sanitize_endpoint_type(Some("sensor"), "default"), "sensor");
    }

    #[test]
    fn prefix_roundtrip_is_idempotent() {
        let policy = PrefixPolicy {
            enabled: true,
            prefix: "fleet".to_string(),
            separator: "-".to_string(),
        };

        let prefixed = policy.add_prefix("dev1");
        assert_eq!(prefixed, "fleet-dev1");
        assert_eq!(policy.remove_prefix(&prefixed), "dev1");

        // addPrefix is idempotent: re-applying it is a no-op.
        assert_eq!(policy.add_prefix(&prefixed), prefixed);
    }

    #[test]
    fn prefix_disabled_is_identity() {
        let policy = PrefixPolicy::disabled();
        assert_eq!(policy.add_prefix("dev1"), "dev1");
        assert_eq!(policy.remove_prefix("dev1"), "dev1");
    }

    #[test]
    fn coap_verb_parse_is_case_insensitive() {
        assert_eq!(CoapVerb::parse("GET"), Some(CoapVerb::Get));
        assert_eq!(CoapVerb::parse("put"), Some(CoapVerb::Put));
        assert_eq!(CoapVerb::parse("frobnicate"), None);
    }

    #[test]
    fn credential_expiry() {
        let issued = Utc::now() - chrono::Duration::days(2);
        let record = CredentialRecord {
            kind: CredentialKind::SignedToken,
            value: "token".to_string(),
            issued_at: issued,
            validity: Duration::from_secs(86400),
        };
        assert!(record.is_expired(Utc::now()));
    }
}
