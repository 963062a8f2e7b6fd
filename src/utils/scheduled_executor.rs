//! Periodic background task runner.
//!
//! Used for the maintenance loops: daily report rollup, DLQ compaction,
//! extraction-cache pruning, and the inactive-listing sweep.

use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A task that runs periodically until shutdown.
pub trait ScheduledTask: Send + Sync + 'static {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>>;
}

impl<T: ScheduledTask> ScheduledTask for Arc<T> {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        (**self).run()
    }
}

/// Handle used to stop every executor sharing the same shutdown channel.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a [`ScheduledTask`] on a fixed interval with optional startup jitter.
pub struct ScheduledExecutor {
    task_name: String,
    interval: Duration,
    jitter: Duration,
}

impl ScheduledExecutor {
    pub fn new(task_name: impl Into<String>, interval: Duration) -> Self {
        Self { task_name: task_name.into(), interval, jitter: Duration::ZERO }
    }

    /// Delay the first run by a random amount in `[0, jitter)` so several
    /// executors started together do not fire in lockstep.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Spawn the periodic loop. The loop exits when `shutdown` flips true.
    pub fn spawn<T>(self, task: T, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where
        T: ScheduledTask,
    {
        let Self { task_name, interval, jitter } = self;

        tokio::spawn(async move {
            tracing::info!("starting scheduled task '{}' every {:?}", task_name, interval);

            if !jitter.is_zero() {
                let delay = rand::thread_rng().gen_range(Duration::ZERO..jitter);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval() fires immediately; skip that first tick so the task
            // starts one full period after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        if let Err(e) = task.run().await {
                            tracing::error!("scheduled task '{}' failed: {:#}", task_name, e);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("scheduled task '{}' stopped", task_name);
        })
    }
}
