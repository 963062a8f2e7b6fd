//! Bounded work queue and worker pool for the processing service.
//!
//! Producers never block: a full queue is reported back as backpressure
//! (the HTTP layer turns it into 429). Workers drain into the pipeline
//! and repository; on shutdown the queue stops accepting and drains
//! until the timeout, after which remaining items are dropped.

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::services::processing::{PipelineInput, ProcessingPipeline};
use crate::services::repository::PropertyRepository;

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub source: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Accepted; position is the queue depth after insertion
    Queued { position: usize },
    /// Bounded buffer is full; caller sees structured backpressure
    Full,
}

struct QueueShared {
    depth: AtomicUsize,
    accepting: std::sync::atomic::AtomicBool,
}

/// Producer half.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
    shared: Arc<QueueShared>,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WorkItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            shared: Arc::new(QueueShared {
                depth: AtomicUsize::new(0),
                accepting: std::sync::atomic::AtomicBool::new(true),
            }),
            capacity: capacity.max(1),
        };
        (queue, rx)
    }

    /// Non-blocking enqueue.
    pub fn try_enqueue(&self, item: WorkItem) -> EnqueueOutcome {
        if !self.shared.accepting.load(Ordering::Relaxed) {
            return EnqueueOutcome::Full;
        }
        match self.tx.try_send(item) {
            Ok(()) => {
                let position = self.shared.depth.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::gauge!("work_queue_depth", position as f64);
                EnqueueOutcome::Queued { position }
            }
            Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) => {
                metrics::counter!("work_queue_rejections_total", 1);
                EnqueueOutcome::Full
            }
        }
    }

    /// Stop accepting new work (shutdown has begun).
    pub fn stop_accepting(&self) {
        self.shared.accepting.store(false, Ordering::Relaxed);
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Relaxed)
    }

    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy in [0, 1], for readiness checks.
    pub fn occupancy(&self) -> f64 {
        self.depth() as f64 / self.capacity as f64
    }
}

/// Consumer half: a pool of workers draining into the pipeline.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        workers: usize,
        rx: mpsc::Receiver<WorkItem>,
        queue: WorkQueue,
        pipeline: Arc<ProcessingPipeline>,
        repository: Arc<PropertyRepository>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let queue = queue.clone();
                let pipeline = Arc::clone(&pipeline);
                let repository = Arc::clone(&repository);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    enum Next {
                        Item(WorkItem),
                        Signal,
                        Closed,
                    }

                    loop {
                        if *shutdown.borrow() {
                            // Shutdown has begun: consume what is already
                            // queued without waiting for more.
                            match rx.lock().await.try_recv() {
                                Ok(item) => {
                                    queue.shared.depth.fetch_sub(1, Ordering::Relaxed);
                                    process_item(&pipeline, &repository, item, worker_id).await;
                                    continue;
                                }
                                Err(_) => break,
                            }
                        }

                        let next = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                item = rx.recv() => match item {
                                    Some(item) => Next::Item(item),
                                    None => Next::Closed,
                                },
                                _ = shutdown.changed() => Next::Signal,
                            }
                        };

                        match next {
                            Next::Item(item) => {
                                queue.shared.depth.fetch_sub(1, Ordering::Relaxed);
                                process_item(&pipeline, &repository, item, worker_id).await;
                            }
                            Next::Signal => continue,
                            Next::Closed => break,
                        }
                    }
                    tracing::debug!(worker_id, "worker stopped");
                })
            })
            .collect();

        Self { handles }
    }

    /// Wait for the pool to finish draining, up to `timeout`; stragglers
    /// are cancelled.
    pub async fn join(self, timeout: Duration) {
        let drain = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            tracing::warn!("worker pool drain timed out, cancelling remaining work");
        }
    }
}

async fn process_item(
    pipeline: &Arc<ProcessingPipeline>,
    repository: &PropertyRepository,
    item: WorkItem,
    worker_id: usize,
) {
    // HTML payloads arrive as {"html": "..."}, structured records as the
    // raw source object.
    let input = match item.data.get("html").and_then(Value::as_str) {
        Some(html) => PipelineInput::Html(html.to_string()),
        None => PipelineInput::Json(item.data.clone()),
    };

    let result = match input {
        PipelineInput::Html(html) => pipeline.process_html(html, &item.source).await,
        PipelineInput::Json(json) => pipeline.process_json(json, &item.source).await,
    };

    if result.is_valid {
        if let Some(property) = &result.property {
            match repository.upsert(property).await {
                Ok((id, created)) => {
                    tracing::debug!(worker_id, property_id = %id, created, "work item stored");
                }
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "failed to store work item");
                }
            }
        }
    } else {
        // The pipeline already classified, retried, and dead-lettered as
        // appropriate; nothing left to do but account for it.
        tracing::debug!(
            worker_id,
            source = %item.source,
            error = result.error.as_deref().unwrap_or("unknown"),
            "work item failed processing"
        );
    }
}
