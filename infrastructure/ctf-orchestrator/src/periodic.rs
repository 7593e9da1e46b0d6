use log::{debug, warn};
use std::{
    fmt::Display,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

/// A recurring action running on its own tokio task until cancelled.
///
/// The first invocation happens one `interval` after [`PeriodicTask::start`].
/// A failing invocation is logged and the schedule keeps going.
pub struct PeriodicTask {
    name: String,
    cancelled: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn start<F, Fut, E>(name: &str, interval: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let cancelled = Arc::new(AtomicBool::new(false));
        let stop = cancelled.clone();
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                // a tick that raced with cancel must not run
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = action().await {
                    warn!("Periodic task {} failed, with error: {}", task_name, e);
                }
            }
            debug!("Periodic task {} stopped", task_name);
        });

        Self {
            name: name.to_string(),
            cancelled,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stops the schedule and waits for an in-flight invocation to finish.
    /// Calling it again is a no-op.
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let mut handle = self.handle.lock().await;
        if let Some(handle) = handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Periodic task {} panicked, with error: {}", self.name, e);
                }
            }
            debug!("Periodic task {} cancelled", self.name);
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
