//! Reconnect sequence for a single device session (spec §4.8): stop the
//! listener, hard-disconnect, delete the peer-side shadow, sleep, re-create
//! the shadow, sleep again, then bring up a fresh session with its
//! subscriptions restored. Expressed as an ordered sequence of caller-
//! supplied steps so the adapter can drive it against real transport calls
//! while tests drive it against a recording stub.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Runs the six-step reconnect sequence in order, returning whatever the
/// final `reconnect_session` step returns (typically whether the new
/// session came up).
pub async fn run_reconnect<StopFut, DisconnectFut, DeleteFut, RecreateFut, ConnectFut, T>(
    reconnect_sleep: Duration,
    stop_listener: impl FnOnce() -> StopFut,
    hard_disconnect: impl FnOnce() -> DisconnectFut,
    delete_shadow: impl FnOnce() -> DeleteFut,
    recreate_shadow: impl FnOnce() -> RecreateFut,
    reconnect_session: impl FnOnce() -> ConnectFut,
) -> T
where
    StopFut: Future<Output = ()>,
    DisconnectFut: Future<Output = ()>,
    DeleteFut: Future<Output = ()>,
    RecreateFut: Future<Output = ()>,
    ConnectFut: Future<Output = T>,
{
    stop_listener().await;
    hard_disconnect().await;
    delete_shadow().await;
    sleep(reconnect_sleep).await;
    recreate_shadow().await;
    sleep(reconnect_sleep).await;
    reconnect_session().await
}
