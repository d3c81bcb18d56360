//! Bounded FIFO job queue feeding a fixed pool of ingestion workers.
//!
//! Submissions and scheduled re-checks share one queue. Admission waits at
//! most `admission_timeout` for space, then fails with
//! [`DispatchError::QueueFull`]. Retries are re-enqueued through the same
//! queue after their backoff delay; a retry that cannot be re-admitted ends
//! its attempt as `Failed`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;

use crate::config::DispatcherConfig;
use crate::pipeline::{IngestJob, IngestionPipeline, OutcomeStatus, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("QueueFull: the ingestion queue is full, try again later")]
    QueueFull,

    #[error("the dispatcher is shut down")]
    Closed,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time queue and worker figures.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DispatcherStats {
    pub workers: usize,
    pub queue_capacity: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub retries: u64,
}

pub struct Dispatcher {
    tx: Mutex<Option<mpsc::Sender<IngestJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    queue_capacity: usize,
    admission_timeout: Duration,
    counters: Arc<Counters>,
    ctx: WorkerContext,
}

/// What every worker and retry task needs.
#[derive(Clone)]
struct WorkerContext {
    pipeline: Arc<IngestionPipeline>,
    retry_tx: mpsc::WeakSender<IngestJob>,
    admission_timeout: Duration,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Spawns the worker pool. Must be called inside a tokio runtime.
    pub fn start(pipeline: Arc<IngestionPipeline>, config: &DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());
        let ctx = WorkerContext {
            pipeline,
            retry_tx: tx.downgrade(),
            admission_timeout: config.admission_timeout(),
            counters: counters.clone(),
        };

        let workers = (0..config.workers)
            .map(|worker| tokio::spawn(worker_loop(worker, rx.clone(), ctx.clone())))
            .collect();

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "dispatcher started"
        );

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            worker_count: config.workers,
            queue_capacity: config.queue_capacity,
            admission_timeout: config.admission_timeout(),
            counters,
            ctx,
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<IngestJob>, DispatchError> {
        self.tx
            .lock()
            .ok()
            .and_then(|tx| tx.clone())
            .ok_or(DispatchError::Closed)
    }

    /// Admits `job` to the queue, waiting at most the admission timeout.
    pub async fn submit(&self, job: IngestJob) -> Result<(), DispatchError> {
        let tx = self.sender()?;
        let material_id = job.material_id;
        match tx.send_timeout(job, self.admission_timeout).await {
            Ok(()) => {
                tracing::debug!(%material_id, "job admitted");
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(%material_id, "ingestion queue full; job rejected");
                Err(DispatchError::QueueFull)
            }
            Err(SendTimeoutError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Admits `job` once `delay` has passed, the way retries are re-admitted.
    /// A job that cannot be admitted by then ends as `Failed`.
    pub fn submit_after(&self, job: IngestJob, delay: Duration) -> Result<(), DispatchError> {
        self.sender()?;
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            readmit(job, &ctx).await;
        });
        Ok(())
    }

    pub fn stats(&self) -> DispatcherStats {
        let queued = self
            .tx
            .lock()
            .ok()
            .and_then(|tx| tx.as_ref().map(|tx| tx.max_capacity() - tx.capacity()))
            .unwrap_or(0);
        DispatcherStats {
            workers: self.worker_count,
            queue_capacity: self.queue_capacity,
            queued,
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    /// Stops admission, lets workers drain the queue, and waits for them.
    /// Retries still waiting out their backoff end as `Failed`.
    pub async fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "ingestion worker panicked");
            }
        }
        tracing::info!("dispatcher stopped");
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<IngestJob>>>,
    ctx: WorkerContext,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        ctx.counters.in_flight.fetch_add(1, Ordering::Relaxed);
        let step = ctx.pipeline.run(&job).await;
        ctx.counters.in_flight.fetch_sub(1, Ordering::Relaxed);

        match step {
            Step::Finished(outcome) => {
                let counter = match outcome.status {
                    OutcomeStatus::Completed => &ctx.counters.completed,
                    OutcomeStatus::Failed => &ctx.counters.failed,
                    OutcomeStatus::Skipped => &ctx.counters.skipped,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                job.complete(outcome);
            }
            Step::Retry { delay } => {
                ctx.counters.retries.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(requeue_after(job, delay, ctx.clone()));
            }
        }
    }
    tracing::debug!(worker, "ingestion worker exiting");
}

async fn requeue_after(mut job: IngestJob, delay: Duration, ctx: WorkerContext) {
    tokio::time::sleep(delay).await;
    job.retries_used += 1;
    readmit(job, &ctx).await;
}

async fn readmit(job: IngestJob, ctx: &WorkerContext) {
    let Some(tx) = ctx.retry_tx.upgrade() else {
        fail_retry(job, ctx, "Interrupted: dispatcher shut down before retry").await;
        return;
    };

    match tx.send_timeout(job, ctx.admission_timeout).await {
        Ok(()) => {}
        Err(SendTimeoutError::Timeout(job)) => {
            let msg = DispatchError::QueueFull.to_string();
            fail_retry(job, ctx, &msg).await;
        }
        Err(SendTimeoutError::Closed(job)) => {
            fail_retry(job, ctx, "Interrupted: dispatcher shut down before retry").await;
        }
    }
}

async fn fail_retry(job: IngestJob, ctx: &WorkerContext, reason: &str) {
    tracing::warn!(material_id = %job.material_id, reason, "retry not re-admitted");
    let outcome = ctx.pipeline.mark_failed(job.material_id, reason).await;
    ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
    job.complete(outcome);
}
