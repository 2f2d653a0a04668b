//! Web-socket notification mode (spec §4.3): enable the channel once with
//! a PUT, then run a single listener task against the socket, with a
//! `reconnect()` that tears the old task down before starting a new one.

use crate::metrics::BridgeMetrics;
use crate::notification::{parse_and_dispatch, DuplicateFilter, EventSink};
use crate::transport::https::HttpsClientTrait;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// PUTs `/notification/websocket` once to enable the channel before any
/// socket is opened (spec §4.3).
pub async fn enable_channel(https: &dyn HttpsClientTrait, bearer: &str) -> crate::error::TransportResult<()> {
    https
        .put("/v2/notification/websocket", &[("Authorization", bearer)], Vec::new())
        .await
        .map(|_| ())
}

/// Owns the single listener task for a web-socket notification channel.
pub struct WebSocketChannel {
    ws_url: String,
    sink: Arc<dyn EventSink>,
    metrics: Arc<BridgeMetrics>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketChannel {
    pub fn new(ws_url: impl Into<String>, sink: Arc<dyn EventSink>, metrics: Arc<BridgeMetrics>) -> Self {
        Self { ws_url: ws_url.into(), sink, metrics, task: Mutex::new(None) }
    }

    /// Starts the listener task. No-op if one is already running; callers
    /// go through `reconnect()` to replace a live task.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        *task = Some(self.spawn_listener());
    }

    /// Disconnects, joins the old listener task, then starts a new one
    /// (spec §4.3's `reconnect()`).
    pub async fn reconnect(&self) {
        self.stop().await;
        let mut task = self.task.lock().await;
        *task = Some(self.spawn_listener());
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
    }

    fn spawn_listener(&self) -> JoinHandle<()> {
        let url = self.ws_url.clone();
        let sink = Arc::clone(&self.sink);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let mut filter = DuplicateFilter::with_metrics(metrics);
            match connect_async(&url).await {
                Ok((mut stream, _response)) => {
                    while let Some(message) = stream.next().await {
                        match message {
                            Ok(Message::Text(text)) => {
                                if let Err(e) = parse_and_dispatch(&mut filter, sink.as_ref(), text.as_bytes()).await {
                                    tracing::warn!(error = %e, "failed to decode websocket notification body");
                                }
                            }
                            Ok(Message::Binary(bytes)) => {
                                if let Err(e) = parse_and_dispatch(&mut filter, sink.as_ref(), &bytes).await {
                                    tracing::warn!(error = %e, "failed to decode websocket notification body");
                                }
                            }
                            Ok(Message::Close(_)) => break,
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "websocket read error");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "websocket connect failed");
                }
            }
        })
    }
}
