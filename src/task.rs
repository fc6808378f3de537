//! Cancellable periodic background tasks.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest period a task will tick at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a periodic task. Stopping or dropping the handle ends the loop
/// at its next await point.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `tick` every `period`. The first tick runs one period after
    /// start. `on_shutdown` runs once after the loop ends.
    ///
    /// A tick in flight is abandoned when the task is stopped. Periods
    /// shorter than [`MIN_PERIOD`] are raised to it.
    pub fn spawn<F, Fut, S, SFut>(name: &'static str, period: Duration, mut tick: F, on_shutdown: S) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: FnOnce() -> SFut + Send + 'static,
        SFut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        if period < MIN_PERIOD {
            tracing::warn!(task = name, period_ms = period.as_millis() as u64, "period too short, using 1ms");
        }
        let period = period.max(MIN_PERIOD);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = tick() => {}
                }
            }
            tracing::debug!(task = name, "background task shutdown");
            on_shutdown().await;
        });

        Self {
            name,
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            tracing::error!(task = self.name, error = %e, "background task join error");
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        // Dropping the sender also resolves the receiver, ending the loop
        self.shutdown.take();
    }
}
