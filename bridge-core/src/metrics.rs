//! In-process counters surfaced as a point-in-time snapshot (spec §C).
//! No external metrics exporter is wired up. This is the ambient
//! "how many sessions / how many drops" visibility a bridge operator
//! reads off logs or a future admin surface, not an observability
//! pipeline in its own right.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BridgeMetrics {
    sessions_created: AtomicU64,
    sessions_removed: AtomicU64,
    registrations_processed: AtomicU64,
    deregistrations_processed: AtomicU64,
    notifications_published: AtomicU64,
    shadow_cap_rejections: AtomicU64,
    duplicate_bodies_dropped: AtomicU64,
    webhook_bringup_retries: AtomicU64,
}

/// A consistent-enough read of all counters at one instant. Each field is
/// loaded independently, so this is a snapshot in the same sense `/proc`
/// counters are, not a transactional view across fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub sessions_removed: u64,
    pub registrations_processed: u64,
    pub deregistrations_processed: u64,
    pub notifications_published: u64,
    pub shadow_cap_rejections: u64,
    pub duplicate_bodies_dropped: u64,
    pub webhook_bringup_retries: u64,
}

impl BridgeMetrics {
    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_removed(&self) {
        self.sessions_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration_processed(&self) {
        self.registrations_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deregistration_processed(&self) {
        self.deregistrations_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_published(&self) {
        self.notifications_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shadow_cap_rejection(&self) {
        self.shadow_cap_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_body_dropped(&self) {
        self.duplicate_bodies_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_webhook_bringup_retry(&self) {
        self.webhook_bringup_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_removed: self.sessions_removed.load(Ordering::Relaxed),
            registrations_processed: self.registrations_processed.load(Ordering::Relaxed),
            deregistrations_processed: self.deregistrations_processed.load(Ordering::Relaxed),
            notifications_published: self.notifications_published.load(Ordering::Relaxed),
            shadow_cap_rejections: self.shadow_cap_rejections.load(Ordering::Relaxed),
            duplicate_bodies_dropped: self.duplicate_bodies_dropped.load(Ordering::Relaxed),
            webhook_bringup_retries: self.webhook_bringup_retries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let metrics = BridgeMetrics::default();
        metrics.record_session_created();
        metrics.record_session_created();
        metrics.record_shadow_cap_rejection();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_created, 2);
        assert_eq!(snapshot.shadow_cap_rejections, 1);
        assert_eq!(snapshot.sessions_removed, 0);
    }
}
