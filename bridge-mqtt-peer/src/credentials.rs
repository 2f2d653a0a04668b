//! Per-device MQTT credential derivation: username carries the hub name,
//! prefixed device name, and API version tag; password is a signed token
//! from the shared `CredentialService` (spec §4.2, §4.8).

use bridge_core::config::PeerConfig;
use bridge_core::credential_service::CredentialService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCredentials {
    pub username: String,
    pub password: String,
}

/// Builds the MQTT username/password pair for one device's session.
/// Config-level overrides win outright (spec §6 `*_mqtt_username` /
/// `*_mqtt_password`); otherwise the username follows `<hub>/<device>/?<tag>`
/// and the password is a freshly derived signed token scoped to the
/// device's resource URI.
pub fn derive(config: &PeerConfig, credential_service: &CredentialService, prefixed_name: &str) -> DeviceCredentials {
    let hub_name = credential_service
        .hub_name()
        .map(str::to_string)
        .or_else(|| config.hub_name.clone())
        .unwrap_or_default();

    let username = config.mqtt_username_override.clone().unwrap_or_else(|| {
        format!("{hub_name}/{prefixed_name}/?{}", config.version_tag)
    });

    let password = config.mqtt_password_override.clone().unwrap_or_else(|| {
        let resource_uri = format!("{hub_name}/devices/{prefixed_name}");
        credential_service.derive_token(&resource_uri).value
    });

    DeviceCredentials { username, password }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    fn config() -> PeerConfig {
        PeerConfig {
            name: "iot_event_hub".to_string(),
            connect_string: Some(format!(
                "HostName=myhub.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey={}",
                BASE64.encode(b"0123456789abcdef0123456789abcdef")
            )),
            sas_token: None,
            hub_name: None,
            max_shadows: 25_000,
            enable_device_id_prefix: false,
            device_id_prefix: String::new(),
            version_tag: "api-version=2018-06-30".to_string(),
            mqtt_address: Some("myhub.azure-devices.net".to_string()),
            mqtt_username_override: None,
            mqtt_password_override: None,
            observe_notification_topic: "devices/__EPNAME__/messages/events/__OBSERVATION_KEY__".to_string(),
            coap_cmd_topic: "devices/__EPNAME__/messages/devicebound/#".to_string(),
        }
    }

    #[test]
    fn derives_username_and_signed_token_password() {
        let config = config();
        let service = CredentialService::from_peer_config(&config).unwrap();

        let creds = derive(&config, &service, "fleet-dev1");
        assert_eq!(creds.username, "myhub/fleet-dev1/?api-version=2018-06-30");
        assert!(creds.password.starts_with("SharedAccessSignature sr="));
    }

    #[test]
    fn config_overrides_win_outright() {
        let mut config = config();
        config.mqtt_username_override = Some("static-user".to_string());
        config.mqtt_password_override = Some("static-pass".to_string());
        let service = CredentialService::from_peer_config(&config).unwrap();

        let creds = derive(&config, &service, "fleet-dev1");
        assert_eq!(creds.username, "static-user");
        assert_eq!(creds.password, "static-pass");
    }
}
