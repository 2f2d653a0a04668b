//! Shared fixtures for the device-shadow bridge's integration tests: a
//! mocked source-cloud HTTPS client, a mocked MQTT session factory, and a
//! one-call builder that wires an `Orchestrator` to a single
//! `MqttPeerAdapter` (spec §8's scenarios run against this wiring).

pub mod fixtures;
