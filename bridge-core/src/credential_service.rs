//! Credential Service (C2): parses peer connection strings and derives
//! per-device signed tokens via HMAC-SHA256, refreshing them on a timer
//! before they expire (spec §4.2).

use crate::config::PeerConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::types::{CredentialKind, CredentialRecord};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use ring::hmac;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A parsed `HostName=...;SharedAccessKeyName=...;SharedAccessKey=...`
/// connection string (spec §3 "Connection string").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub host_name: String,
    pub shared_access_key_name: String,
    pub shared_access_key: Vec<u8>,
}

const PLACEHOLDER_VALUES: [&str; 2] = ["xxx-your-connect-string-goes-here", "changeme"];

/// The sentinel the source template ships in `SharedAccessKey` before an
/// operator fills in a real value (spec §7 "Auth mis-config").
const SENTINEL_SUBSTRING: &str = "Goes_Here";

impl ConnectionString {
    /// Parses a semicolon-delimited connection string. Rejects missing
    /// fields and the well-known placeholder values a peer's template
    /// config ships with, so a bridge left unconfigured fails fast with a
    /// `ConfigError` rather than trying to sign tokens with a dummy key.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let mut host_name = None;
        let mut key_name = None;
        let mut key = None;

        for field in raw.split(';').filter(|s| !s.is_empty()) {
            let (name, value) = field
                .split_once('=')
                .ok_or(ConfigError::ConnectionStringField("HostName"))?;
            match name {
                "HostName" => host_name = Some(value.to_string()),
                "SharedAccessKeyName" => key_name = Some(value.to_string()),
                "SharedAccessKey" => key = Some(value.to_string()),
                _ => {}
            }
        }

        let host_name = host_name.ok_or(ConfigError::ConnectionStringField("HostName"))?;
        let shared_access_key_name =
            key_name.ok_or(ConfigError::ConnectionStringField("SharedAccessKeyName"))?;
        let key_b64 = key.ok_or(ConfigError::ConnectionStringField("SharedAccessKey"))?;

        if PLACEHOLDER_VALUES.contains(&key_b64.as_str())
            || PLACEHOLDER_VALUES.contains(&host_name.as_str())
            || key_b64.contains(SENTINEL_SUBSTRING)
        {
            return Err(ConfigError::PlaceholderValue("SharedAccessKey"));
        }

        let shared_access_key = BASE64
            .decode(key_b64.as_bytes())
            .map_err(|e| ConfigError::InvalidValue {
                key: "SharedAccessKey",
                reason: e.to_string(),
            })?;

        Ok(Self {
            host_name,
            shared_access_key_name,
            shared_access_key,
        })
    }

    /// Strips the `.azure-devices.net`-style suffix a peer's host name may
    /// carry, leaving the bare hub name used in derived MQTT usernames.
    pub fn hub_name(&self) -> &str {
        self.host_name.split('.').next().unwrap_or(&self.host_name)
    }
}

/// Derives and refreshes signed tokens for one peer's devices.
///
/// Grounded on the HMAC-SHA256 signing in `SecurityManager::generate_hmac`:
/// the algorithm is unchanged, only the thing being signed (a
/// `resourceUri\nexpiry`) and the output encoding (a SAS-token string
/// rather than a raw tag) differ.
pub struct CredentialService {
    connection: Option<ConnectionString>,
    static_token: Option<String>,
    validity: Duration,
    halted: AtomicBool,
}

impl CredentialService {
    pub fn from_peer_config(config: &PeerConfig) -> ConfigResult<Self> {
        let connection = config
            .connect_string
            .as_deref()
            .map(ConnectionString::parse)
            .transpose()?;

        if connection.is_none() && config.sas_token.is_none() {
            return Err(ConfigError::MissingKey("connect_string"));
        }

        Ok(Self {
            connection,
            static_token: config.sas_token.clone(),
            validity: PeerConfig::credential_validity(),
            halted: AtomicBool::new(false),
        })
    }

    /// Derives a signed token scoped to `resource_uri` (typically
    /// `<hub>.azure-devices.net/devices/<device_id>`), valid until `issued_at
    /// + validity`. Falls back to the statically configured token when no
    /// connection string was supplied.
    pub fn derive_token(&self, resource_uri: &str) -> CredentialRecord {
        let issued_at = Utc::now();

        let value = match &self.connection {
            Some(conn) => {
                let expiry = (issued_at + chrono::Duration::from_std(self.validity).unwrap_or_default())
                    .timestamp();
                let to_sign = format!("{resource_uri}\n{expiry}");
                let key = hmac::Key::new(hmac::HMAC_SHA256, &conn.shared_access_key);
                let tag = hmac::sign(&key, to_sign.as_bytes());
                let signature = BASE64.encode(tag.as_ref());
                format!(
                    "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
                    urlencode(resource_uri),
                    urlencode(&signature),
                    expiry,
                    conn.shared_access_key_name
                )
            }
            None => self
                .static_token
                .clone()
                .expect("constructor guarantees connection or static_token is present"),
        };

        CredentialRecord {
            kind: if self.connection.is_some() {
                CredentialKind::SignedToken
            } else {
                CredentialKind::StaticSecret
            },
            value,
            issued_at,
            validity: self.validity,
        }
    }

    pub fn hub_name(&self) -> Option<&str> {
        self.connection.as_ref().map(ConnectionString::hub_name)
    }

    /// Halts the background refresh loop (spec §4.2 "halt flag").
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

/// Runs `refresh` on an interval until `service.halt()` is called,
/// re-deriving the token for every active session before its validity
/// window lapses (spec §4.2's refresh worker, default interval 360 days
/// against a one-year validity).
pub async fn run_refresh_loop<F, Fut>(service: Arc<CredentialService>, interval: Duration, mut refresh: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; consume it.
    loop {
        ticker.tick().await;
        if service.is_halted() {
            break;
        }
        refresh().await;
    }
}

/// Minimal RFC 3986 percent-encoding for the handful of reserved characters
/// that show up in a resource URI or signature (`:`, `/`, `&`, `=`, `+`).
fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_connection_string() -> String {
        let key = BASE64.encode(b"0123456789abcdef0123456789abcdef");
        format!("HostName=myhub.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey={key}")
    }

    #[test]
    fn parses_well_formed_connection_string() {
        let parsed = ConnectionString::parse(&sample_connection_string()).unwrap();
        assert_eq!(parsed.host_name, "myhub.azure-devices.net");
        assert_eq!(parsed.shared_access_key_name, "iothubowner");
        assert_eq!(parsed.hub_name(), "myhub");
    }

    #[test]
    fn rejects_missing_field() {
        let err = ConnectionString::parse("HostName=myhub.azure-devices.net").unwrap_err();
        assert!(matches!(err, ConfigError::ConnectionStringField(_)));
    }

    #[test]
    fn rejects_unfilled_sentinel_key() {
        let raw = "HostName=myhub.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey=Goes_Here";
        let err = ConnectionString::parse(raw).unwrap_err();
        assert!(matches!(err, ConfigError::PlaceholderValue(_)));
    }

    #[test]
    fn rejects_placeholder_key() {
        let raw = "HostName=myhub.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey=changeme";
        let err = ConnectionString::parse(raw).unwrap_err();
        assert!(matches!(err, ConfigError::PlaceholderValue(_)));
    }

    #[test]
    fn derives_token_with_expiry_at_validity_boundary() {
        let connection = ConnectionString::parse(&sample_connection_string()).unwrap();
        let service = CredentialService {
            connection: Some(connection),
            static_token: None,
            validity: Duration::from_secs(3600),
            halted: AtomicBool::new(false),
        };

        let record = service.derive_token("myhub.azure-devices.net/devices/dev1");
        assert_eq!(record.kind, CredentialKind::SignedToken);
        assert!(record.value.starts_with("SharedAccessSignature sr="));
        assert!(!record.is_expired(Utc::now()));
        assert!(record.is_expired(Utc::now() + chrono::Duration::hours(2)));
    }

    #[test]
    fn falls_back_to_static_token_without_connection_string() {
        let service = CredentialService {
            connection: None,
            static_token: Some("static-secret".to_string()),
            validity: Duration::from_secs(3600),
            halted: AtomicBool::new(false),
        };

        let record = service.derive_token("irrelevant");
        assert_eq!(record.kind, CredentialKind::StaticSecret);
        assert_eq!(record.value, "static-secret");
    }

    #[test]
    fn halt_flag_is_observable() {
        let service = CredentialService {
            connection: None,
            static_token: Some("x".to_string()),
            validity: Duration::from_secs(1),
            halted: AtomicBool::new(false),
        };
        assert!(!service.is_halted());
        service.halt();
        assert!(service.is_halted());
    }
}
