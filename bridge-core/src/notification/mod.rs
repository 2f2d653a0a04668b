//! Notification Channel (C3): decodes one raw body into an ordered list of
//! lifecycle/telemetry events and runs duplicate suppression, regardless of
//! which of the three transports (webhook, long-poll, web-socket) produced
//! the body (spec §4.3).

pub mod poll;
pub mod webhook;
pub mod websocket;

use crate::metrics::BridgeMetrics;
use crate::types::{AsyncResponseEntry, NotificationEntry, NotificationEvent, RegistrationEntry};
use async_trait::async_trait;
use std::sync::Arc;

/// Lifecycle keys that participate in duplicate suppression, in dispatch
/// order (spec §4.3 "Dispatch").
const LIFECYCLE_KEYS: [&str; 4] = ["de-registrations", "registrations-expired", "registrations", "reg-updates"];

/// Receives decoded events; implemented by the orchestrator (C10).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn dispatch(&self, event: NotificationEvent);
}

/// Decodes one inbound body into its component events, in the fixed order
/// `notifications, registrations, reg-updates, de-registrations,
/// registrations-expired, async-responses` (spec §4.3). Any key absent
/// from the body produces no event for that key.
pub fn decode_body(body: &[u8]) -> Result<Vec<NotificationEvent>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let mut events = Vec::new();

    if let Some(notifications) = value.get("notifications") {
        let entries: Vec<NotificationEntry> = serde_json::from_value(notifications.clone())?;
        events.push(NotificationEvent::Notification(entries));
    }
    if let Some(registrations) = value.get("registrations") {
        let entries: Vec<RegistrationEntry> = serde_json::from_value(registrations.clone())?;
        events.push(NotificationEvent::Registration(entries));
    }
    if let Some(reg_updates) = value.get("reg-updates") {
        let entries: Vec<RegistrationEntry> = serde_json::from_value(reg_updates.clone())?;
        events.push(NotificationEvent::ReRegistration(entries));
    }
    if let Some(de_registrations) = value.get("de-registrations") {
        let ids: Vec<String> = serde_json::from_value(de_registrations.clone())?;
        events.push(NotificationEvent::Deregistration(ids));
    }
    if let Some(expired) = value.get("registrations-expired") {
        let ids: Vec<String> = serde_json::from_value(expired.clone())?;
        events.push(NotificationEvent::RegistrationsExpired(ids));
    }
    if let Some(async_responses) = value.get("async-responses") {
        let entries: Vec<AsyncResponseEntry> = serde_json::from_value(async_responses.clone())?;
        events.push(NotificationEvent::AsyncResponse(entries));
    }

    Ok(events)
}

fn body_contains_any_lifecycle_key(body: &[u8]) -> bool {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return false;
    };
    LIFECYCLE_KEYS.iter().any(|key| value.get(key).is_some())
}

/// Remembers the last raw body and drops byte-equal repeats that carry a
/// lifecycle key (spec §4.3 "Duplicate suppression"). Pure telemetry
/// duplicates are never dropped, since a `notifications`-only body has no
/// lifecycle key and always passes through.
pub struct DuplicateFilter {
    last_body: Option<Vec<u8>>,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self { last_body: None, metrics: None }
    }

    /// Same as `new()`, but records a counter bump on every drop. Used by
    /// the three transport entry points once a `BridgeMetrics` is wired in.
    pub fn with_metrics(metrics: Arc<BridgeMetrics>) -> Self {
        Self { last_body: None, metrics: Some(metrics) }
    }

    /// Returns `true` if `body` should be dropped as a duplicate.
    pub fn observe(&mut self, body: &[u8]) -> bool {
        let is_duplicate = self.last_body.as_deref() == Some(body) && body_contains_any_lifecycle_key(body);
        self.last_body = Some(body.to_vec());
        if is_duplicate {
            if let Some(metrics) = &self.metrics {
                metrics.record_duplicate_body_dropped();
            }
        }
        is_duplicate
    }
}

/// Dispatches every event decoded from `body` to `sink`, honoring
/// duplicate suppression first. Returns `true` if the body was processed
/// (not dropped).
pub async fn parse_and_dispatch(
    filter: &mut DuplicateFilter,
    sink: &dyn EventSink,
    body: &[u8],
) -> Result<bool, serde_json::Error> {
    if filter.observe(body) {
        tracing::debug!("dropping duplicate lifecycle notification body");
        return Ok(false);
    }

    for event in decode_body(body)? {
        sink.dispatch(event).await;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn dispatch(&self, event: NotificationEvent) {
            let label = match event {
                NotificationEvent::Registration(_) => "registration",
                NotificationEvent::ReRegistration(_) => "re-registration",
                NotificationEvent::Deregistration(_) => "deregistration",
                NotificationEvent::RegistrationsExpired(_) => "expired",
                NotificationEvent::Notification(_) => "notification",
                NotificationEvent::AsyncResponse(_) => "async-response",
            };
            self.events.lock().unwrap().push(label.to_string());
        }
    }

    #[test]
    fn decode_body_preserves_dispatch_order() {
        let body = br#"{"registrations":[],"notifications":[],"de-registrations":[]}"#;
        let events = decode_body(body).unwrap();
        let labels: Vec<&str> = events
            .iter()
            .map(|e| match e {
                NotificationEvent::Notification(_) => "notifications",
                NotificationEvent::Registration(_) => "registrations",
                NotificationEvent::Deregistration(_) => "de-registrations",
                _ => "other",
            })
            .collect();
        assert_eq!(labels, vec!["notifications", "registrations", "de-registrations"]);
    }

    #[tokio::test]
    async fn duplicate_lifecycle_body_is_dropped() {
        let mut filter = DuplicateFilter::new();
        let sink = RecordingSink { events: Mutex::new(Vec::new()) };
        let body = br#"{"de-registrations":["dev1"]}"#;

        assert!(parse_and_dispatch(&mut filter, &sink, body).await.unwrap());
        assert!(!parse_and_dispatch(&mut filter, &sink, body).await.unwrap());
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_telemetry_body_is_never_dropped() {
        let mut filter = DuplicateFilter::new();
        let sink = RecordingSink { events: Mutex::new(Vec::new()) };
        let body = br#"{"notifications":[]}"#;

        assert!(parse_and_dispatch(&mut filter, &sink, body).await.unwrap());
        assert!(parse_and_dispatch(&mut filter, &sink, body).await.unwrap());
        assert_eq!(sink.events.lock().unwrap().len(), 2);
    }
}
