//! Background loop plumbing shared by the scheduler, dispatcher and
//! retention manager.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Handle to a spawned background loop.
///
/// Dropping the handle detaches the loop; call [`LoopHandle::shutdown`] for
/// a clean stop that waits for the current iteration to finish.
pub struct LoopHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Signal the loop to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Spawn a named loop that runs `tick` on a fixed interval until shut down.
///
/// Missed ticks are skipped, not bunched; a slow iteration never causes a
/// burst of catch-up iterations.
pub(crate) fn spawn_loop<F, Fut>(name: &'static str, period: Duration, tick: F) -> LoopHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (tx, mut rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(worker = name, period_secs = period.as_secs(), "loop started");

        loop {
            tokio::select! {
                _ = rx.changed() => break,
                _ = interval.tick() => tick().await,
            }
        }

        info!(worker = name, "loop stopped");
    });

    LoopHandle { shutdown: tx, join }
}
