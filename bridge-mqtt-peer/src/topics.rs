//! Topic layout for the MQTT exemplar peer (spec §4.8).

use bridge_core::adapter::substitute_template;

pub const COMMAND_TOPIC_QOS: u8 = 1;
pub const TWIN_TOPIC_QOS: u8 = 1;
pub const OBSERVATION_QOS: u8 = 0;

const EPNAME_PLACEHOLDER: &str = "__EPNAME__";
const OBSERVATION_KEY_PLACEHOLDER: &str = "__OBSERVATION_KEY__";

const OBSERVATION_KEY: &str = "observations";
const CMD_RESPONSE_KEY: &str = "cmd-response";
const API_RESPONSE_KEY: &str = "api-response";

/// `devices/<prefixed_name>/messages/devicebound/#`, QoS 1.
pub fn command_topic(prefixed_name: &str) -> String {
    format!("devices/{prefixed_name}/messages/devicebound/#")
}

const TWIN_PREFIX: &str = "$iothub/twin/";

/// `$iothub/twin/res/#`, QoS 1, fixed rather than per-device.
pub fn twin_topic() -> &'static str {
    "$iothub/twin/res/#"
}

/// Whether an inbound topic falls under the digital-twin namespace (spec
/// §4.8 "Inbound handling": dispatched to twin handling rather than the
/// CoAP command path).
pub fn is_twin_topic(topic: &str) -> bool {
    topic.starts_with(TWIN_PREFIX)
}

pub fn twin_patch_topic(request_id: &str) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={request_id}")
}

/// Builds the outbound observation topic from the configured template
/// (`observe_notification_topic`), substituting `__EPNAME__` and the
/// observation key (spec §4.8).
pub fn observation_topic(template: &str, prefixed_name: &str) -> String {
    substitute_template(template, &[(EPNAME_PLACEHOLDER, prefixed_name), (OBSERVATION_KEY_PLACEHOLDER, OBSERVATION_KEY)])
}

/// The reply topic for a synchronous CoAP command response: the
/// observation topic with its key swapped to `cmd-response` (spec §4.8
/// "reply topics swap a known substring").
pub fn cmd_response_topic(template: &str, prefixed_name: &str) -> String {
    substitute_template(template, &[(EPNAME_PLACEHOLDER, prefixed_name), (OBSERVATION_KEY_PLACEHOLDER, CMD_RESPONSE_KEY)])
}

/// The reply topic for an API-request response: the observation topic
/// with its key swapped to `api-response`.
pub fn api_response_topic(template: &str, prefixed_name: &str) -> String {
    substitute_template(template, &[(EPNAME_PLACEHOLDER, prefixed_name), (OBSERVATION_KEY_PLACEHOLDER, API_RESPONSE_KEY)])
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "devices/__EPNAME__/messages/events/__OBSERVATION_KEY__";

    #[test]
    fn command_and_twin_topics_are_fixed_shape() {
        assert_eq!(command_topic("fleet-dev1"), "devices/fleet-dev1/messages/devicebound/#");
        assert_eq!(twin_topic(), "$iothub/twin/res/#");
    }

    #[test]
    fn twin_topic_detection_matches_the_reserved_namespace_only() {
        assert!(is_twin_topic("$iothub/twin/res/200/?$rid=1"));
        assert!(!is_twin_topic("devices/fleet-dev1/messages/devicebound/coap_verb=get"));
    }

    #[test]
    fn observation_and_reply_topics_share_the_same_base_with_swapped_key() {
        let observation = observation_topic(TEMPLATE, "fleet-dev1");
        let cmd_response = cmd_response_topic(TEMPLATE, "fleet-dev1");
        let api_response = api_response_topic(TEMPLATE, "fleet-dev1");

        assert_eq!(observation, "devices/fleet-dev1/messages/events/observations");
        assert_eq!(cmd_response, "devices/fleet-dev1/messages/events/cmd-response");
        assert_eq!(api_response, "devices/fleet-dev1/messages/events/api-response");
    }
}
