//! Recognized configuration keys (§6) and their defaults, read from
//! environment variables. No config-file crate is introduced; configuration
//! is read straight from `std::env`.

use crate::error::{ConfigError, ConfigResult};
use std::env;
use std::time::Duration;

/// `notification_type` (spec §4.3): selects exactly one of three channel
/// implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationMode {
    Webhook,
    WebSocket,
    Poll,
}

impl NotificationMode {
    /// Resolves the explicit `mds_notification_type` string, falling back to
    /// the legacy booleans with priority websocket > long-poll > webhook.
    fn resolve(
        explicit: Option<&str>,
        enable_web_socket: bool,
        enable_long_poll: bool,
    ) -> Self {
        match explicit.map(str::to_ascii_lowercase).as_deref() {
            Some("webhook") => return NotificationMode::Webhook,
            Some("websocket") => return NotificationMode::WebSocket,
            Some("poll") => return NotificationMode::Poll,
            _ => {}
        }
        if enable_web_socket {
            NotificationMode::WebSocket
        } else if enable_long_poll {
            NotificationMode::Poll
        } else {
            NotificationMode::Webhook
        }
    }
}

/// Source-cloud ingestion configuration (C3, C4).
#[derive(Debug, Clone)]
pub struct SourceCloudConfig {
    pub api_host: String,
    pub api_port: u16,
    pub api_key: String,
    pub notification_mode: NotificationMode,
    pub long_poll_uri: String,
    pub webhook_gw_address: String,
    pub webhook_gw_port: u16,
    pub webhook_context_path: String,
    pub webhook_events_path: String,
    pub webhook_num_retries: u32,
    pub webhook_retry_wait: Duration,
    pub skip_validation_checks: bool,
    pub enable_device_request_api: bool,
    pub enable_attribute_gets: bool,
    pub attribute_uri_list: Vec<String>,
    pub max_shadow_create_threads: usize,
    pub default_endpoint_type: String,
    pub remove_on_deregistration: bool,
    pub pagination_limit: u32,
}

impl SourceCloudConfig {
    /// Reads the `mds_*` recognized keys (spec §6) from the environment.
    /// Fails with `ConfigError::MissingKey` only for `api_key`/`mds_address`,
    /// matching §7's "Auth mis-config" policy. Every other key has a
    /// documented default.
    pub fn from_env() -> ConfigResult<Self> {
        let api_host = env_first(&["mds_address", "api_endpoint_address"])
            .ok_or(ConfigError::MissingKey("mds_address"))?;
        let api_key = env_string("api_key").ok_or(ConfigError::MissingKey("api_key"))?;

        let attribute_uri_list = match env::var("mds_attribute_uri_list") {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                key: "mds_attribute_uri_list",
                reason: e.to_string(),
            })?,
            Err(_) => vec![
                "/3/0/0".to_string(),
                "/3/0/1".to_string(),
                "/3/0/2".to_string(),
            ],
        };

        Ok(Self {
            api_host,
            api_port: env_parsed("mds_port").unwrap_or(443),
            api_key,
            notification_mode: NotificationMode::resolve(
                env::var("mds_notification_type").ok().as_deref(),
                env_bool("mds_enable_web_socket").unwrap_or(false),
                env_bool("mds_enable_long_poll").unwrap_or(false),
            ),
            long_poll_uri: env_string("mds_long_poll_uri")
                .unwrap_or_else(|| "/v2/notification/pull".to_string()),
            webhook_gw_address: env_string("mds_gw_address").unwrap_or_else(|| "localhost".to_string()),
            webhook_gw_port: env_parsed("mds_gw_port").unwrap_or(8080),
            webhook_context_path: env_string("mds_gw_context_path").unwrap_or_default(),
            webhook_events_path: env_string("mds_gw_events_path")
                .unwrap_or_else(|| "/notify".to_string()),
            webhook_num_retries: env_parsed("mds_webhook_num_retries").unwrap_or(25),
            webhook_retry_wait: Duration::from_millis(
                env_parsed("mds_webhook_retry_wait_ms").unwrap_or(1000),
            ),
            skip_validation_checks: env_bool("mds_skip_validation_checks").unwrap_or(false),
            enable_device_request_api: env_bool("mds_enable_device_request_api").unwrap_or(false),
            enable_attribute_gets: env_bool("mds_enable_attribute_gets").unwrap_or(true),
            attribute_uri_list,
            max_shadow_create_threads: env_parsed("mds_max_shadow_create_threads").unwrap_or(100),
            default_endpoint_type: env_string("mds_def_ep_type")
                .unwrap_or_else(|| "default".to_string()),
            remove_on_deregistration: env_bool("mds_remove_on_deregistration").unwrap_or(false),
            pagination_limit: env_parsed("pelion_pagination_limit").unwrap_or(100),
        })
    }

    pub fn webhook_callback_url(&self) -> String {
        format!(
            "http://{}:{}{}{}",
            self.webhook_gw_address, self.webhook_gw_port, self.webhook_context_path, self.webhook_events_path
        )
    }

    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.api_host, self.api_port)
    }
}

/// Per-peer configuration (C2, C9). One instance per configured peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub name: String,
    pub connect_string: Option<String>,
    pub sas_token: Option<String>,
    pub hub_name: Option<String>,
    pub max_shadows: usize,
    pub enable_device_id_prefix: bool,
    pub device_id_prefix: String,
    pub version_tag: String,
    pub mqtt_address: Option<String>,
    pub mqtt_username_override: Option<String>,
    pub mqtt_password_override: Option<String>,
    pub observe_notification_topic: String,
    pub coap_cmd_topic: String,
}

impl PeerConfig {
    /// Reads the `iot_event_hub_*` keys (spec §6) for a peer named `prefix`,
    /// e.g. `prefix = "iot_event_hub"` reads `iot_event_hub_connect_string`.
    pub fn from_env(name: &str, prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            connect_string: env_string(&format!("{prefix}_connect_string")),
            sas_token: env_string(&format!("{prefix}_sas_token")),
            hub_name: env_string(&format!("{prefix}_name")),
            max_shadows: env_parsed(&format!("{prefix}_max_shadows")).unwrap_or(25_000),
            enable_device_id_prefix: env_bool(&format!("{prefix}_enable_device_id_prefix"))
                .unwrap_or(false),
            device_id_prefix: env_string(&format!("{prefix}_device_id_prefix")).unwrap_or_default(),
            version_tag: env_string(&format!("{prefix}_version_tag"))
                .unwrap_or_else(|| "api-version=2018-06-30".to_string()),
            mqtt_address: env_string(&format!("{prefix}_mqtt_ip_address")),
            mqtt_username_override: env_string(&format!("{prefix}_mqtt_username")),
            mqtt_password_override: env_string(&format!("{prefix}_mqtt_password")),
            observe_notification_topic: env_string(&format!("{prefix}_observe_notification_topic"))
                .unwrap_or_else(|| "devices/__EPNAME__/messages/events/__OBSERVATION_KEY__".to_string()),
            coap_cmd_topic: env_string(&format!("{prefix}_coap_cmd_topic"))
                .unwrap_or_else(|| "devices/__EPNAME__/messages/devicebound/#".to_string()),
        }
    }

    /// Validity window for derived signed tokens (§4.2 default one year).
    pub fn credential_validity() -> Duration {
        Duration::from_secs(365 * 24 * 60 * 60)
    }

    /// Refresh interval for the credential service (§4.2 default 360 days,
    /// always strictly less than the validity window).
    pub fn credential_refresh_interval() -> Duration {
        Duration::from_secs(360 * 24 * 60 * 60)
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env_string(k))
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_mode_prefers_explicit_string() {
        assert_eq!(
            NotificationMode::resolve(Some("poll"), true, true),
            NotificationMode::Poll
        );
    }

    #[test]
    fn notification_mode_legacy_priority_is_websocket_then_poll() {
        assert_eq!(
            NotificationMode::resolve(None, true, true),
            NotificationMode::WebSocket
        );
        assert_eq!(
            NotificationMode::resolve(None, false, true),
            NotificationMode::Poll
        );
        assert_eq!(
            NotificationMode::resolve(None, false, false),
            NotificationMode::Webhook
        );
    }
}
