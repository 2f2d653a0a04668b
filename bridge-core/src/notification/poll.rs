//! Long-poll notification mode (spec §4.3): a single task repeatedly GETs
//! the long-poll URL, feeding each returned body through the same
//! parse/dispatch path as webhook bodies.

use crate::metrics::BridgeMetrics;
use crate::notification::{parse_and_dispatch, DuplicateFilter, EventSink};
use crate::transport::https::HttpsClientTrait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative halt flag the poll loop checks before each suspension
/// point (spec §5 "Cancellation & timeouts").
#[derive(Default)]
pub struct PollHandle {
    halted: AtomicBool,
}

impl PollHandle {
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

/// Runs the long-poll loop until `handle.halt()` is called. A GET failure
/// is logged and retried after `retry_wait` rather than escalated (spec §7
/// "Transient network").
pub async fn run_poll_loop(
    https: Arc<dyn HttpsClientTrait>,
    poll_path: String,
    bearer: String,
    sink: Arc<dyn EventSink>,
    handle: Arc<PollHandle>,
    retry_wait: Duration,
    metrics: Arc<BridgeMetrics>,
) {
    let mut filter = DuplicateFilter::with_metrics(metrics);

    while !handle.is_halted() {
        let response = https.get(&poll_path, &[("Authorization", &bearer)]).await;
        match response {
            Ok(response) if response.status == 200 => {
                if let Err(e) = parse_and_dispatch(&mut filter, sink.as_ref(), &response.body).await {
                    tracing::warn!(error = %e, "failed to decode long-poll body");
                }
            }
            Ok(response) => {
                tracing::warn!(status = response.status, "unexpected long-poll response status");
                tokio::time::sleep(retry_wait).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "long-poll request failed");
                tokio::time::sleep(retry_wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::https::{HttpResponse, MockHttpsClient};
    use crate::types::NotificationEvent;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<u32>);

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn dispatch(&self, _event: NotificationEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn halt_flag_stops_the_loop() {
        let https = Arc::new(MockHttpsClient::new());
        https
            .stub(
                "/v2/notification/pull",
                HttpResponse { status: 200, body: br#"{"notifications":[]}"#.to_vec(), headers: HashMap::new() },
            )
            .await;
        let sink = Arc::new(RecordingSink(Mutex::new(0)));
        let handle = Arc::new(PollHandle::default());

        handle.halt();
        run_poll_loop(
            https,
            "/v2/notification/pull".to_string(),
            "Bearer key".to_string(),
            sink.clone(),
            handle,
            Duration::from_millis(1),
            Arc::new(BridgeMetrics::default()),
        )
        .await;

        assert_eq!(*sink.0.lock().unwrap(), 0);
    }
}
