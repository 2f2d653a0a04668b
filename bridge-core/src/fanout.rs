//! Shadow Fan-out Scheduler (C8): drains a queue of discovered devices
//! through at most `K` concurrent workers, each doing resource discovery →
//! attribute dispatch → shadow create (spec §4.7).

use crate::source_cloud::{DeviceSummary, SourceCloudClient};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;

/// Runs `setup` for each device in `devices`, with at most `max_workers`
/// running concurrently. The scheduler terminates once the queue is
/// drained and every in-flight worker has finished (spec §4.7).
pub async fn run_fanout<F, Fut>(devices: Vec<DeviceSummary>, max_workers: usize, setup: F)
where
    F: Fn(DeviceSummary) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let max_workers = max_workers.max(1);
    let mut queue = devices.into_iter();
    let mut in_flight = FuturesUnordered::new();

    for device in queue.by_ref().take(max_workers) {
        in_flight.push(tokio::spawn(setup(device)));
    }

    while in_flight.next().await.is_some() {
        if let Some(device) = queue.next() {
            in_flight.push(tokio::spawn(setup(device)));
        }
    }
}

/// Convenience wrapper binding the worker body to resource discovery +
/// attribute dispatch + a caller-supplied `on_ready` shadow-create
/// callback, the concrete sequence spec §4.7 describes per worker.
pub async fn run_registration_fanout<Ready, ReadyFut>(
    devices: Vec<DeviceSummary>,
    max_workers: usize,
    source_cloud: Arc<SourceCloudClient>,
    attribute_dispatcher: Arc<crate::attribute_dispatcher::AttributeDispatcher>,
    on_ready: Ready,
) where
    Ready: Fn(DeviceSummary, Vec<crate::types::Resource>, crate::types::DeviceMetadata) -> ReadyFut + Send + Sync + 'static,
    ReadyFut: Future<Output = ()> + Send + 'static,
{
    let on_ready = Arc::new(on_ready);
    run_fanout(devices, max_workers, move |device| {
        let source_cloud = Arc::clone(&source_cloud);
        let attribute_dispatcher = Arc::clone(&attribute_dispatcher);
        let on_ready = Arc::clone(&on_ready);
        async move {
            let resources = source_cloud.discover_resources(&device.id).await.unwrap_or_default();
            let needs_attributes = resources.iter().any(crate::types::Resource::is_device_info);

            let metadata = if needs_attributes && attribute_dispatcher.try_start(&device.id).await {
                attribute_dispatcher.retrieve(&device.id).await
            } else {
                crate::types::DeviceMetadata::default()
            };

            on_ready(device, resources, metadata).await;
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drains_the_full_queue_with_bounded_concurrency() {
        let devices: Vec<DeviceSummary> =
            (0..10).map(|i| DeviceSummary { id: format!("dev{i}"), endpoint_name: None, endpoint_type: None }).collect();

        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = Arc::clone(&processed);

        run_fanout(devices, 3, move |_device| {
            let processed = Arc::clone(&processed_clone);
            async move {
                processed.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(processed.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn empty_queue_completes_immediately() {
        run_fanout(Vec::<DeviceSummary>::new(), 5, |_device| async move {}).await;
    }
}
