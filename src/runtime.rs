//! Service wiring shared by the HTTP server and the CLI.
//!
//! [`Runtime::start`] opens the SQLite store, builds the standard fetchers,
//! starts the dispatcher's worker pool and recovers interrupted work.
//! [`Runtime::assemble`] does the same wiring around any store, fetcher set
//! and extractor, which is how the integration tests run the full stack in
//! memory.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use finsight_core::models::StatusFields;
use finsight_core::status::MaterialStatus;
use finsight_core::store::{ItemStore, MaterialStore, ScheduleStore};

use crate::config::Config;
use crate::db;
use crate::dispatcher::Dispatcher;
use crate::extract::{ContentExtractor, KindExtractor};
use crate::fetch::FetcherSet;
use crate::migrate;
use crate::pipeline::{IngestJob, IngestionPipeline};
use crate::scheduler::ScheduleEngine;
use crate::sqlite_store::SqliteStore;

/// Handles every request path needs.
#[derive(Clone)]
pub struct Services {
    pub materials: Arc<dyn MaterialStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub items: Arc<dyn ItemStore>,
    pub dispatcher: Arc<Dispatcher>,
}

/// What [`Runtime::recover`] did with unfinished materials.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub interrupted: usize,
}

pub struct Runtime {
    pub services: Services,
    pub engine: Arc<ScheduleEngine>,
    config: Config,
    shutdown_tx: watch::Sender<bool>,
    engine_task: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    /// Opens the configured database, applies migrations and starts the
    /// worker pool. The schedule engine is started separately with
    /// [`start_scheduler`](Self::start_scheduler).
    pub async fn start(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool)
            .await
            .context("Failed to apply database migrations")?;
        let store = Arc::new(SqliteStore::new(pool));
        let fetchers = FetcherSet::from_config(config).context("Failed to build HTTP client")?;

        let runtime = Self::assemble(config, store, fetchers, Arc::new(KindExtractor));
        let report = runtime.recover().await?;
        if report.requeued + report.interrupted > 0 {
            tracing::info!(
                requeued = report.requeued,
                interrupted = report.interrupted,
                "recovered unfinished materials"
            );
        }
        Ok(runtime)
    }

    /// Wires a runtime around `store`. Must be called inside a tokio runtime.
    pub fn assemble<S>(
        config: &Config,
        store: Arc<S>,
        fetchers: FetcherSet,
        extractor: Arc<dyn ContentExtractor>,
    ) -> Self
    where
        S: MaterialStore + ScheduleStore + ItemStore + 'static,
    {
        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            fetchers,
            extractor,
            config.pipeline.retry_policy(),
            config.fetch.timeout(),
        ));
        let dispatcher = Arc::new(Dispatcher::start(pipeline, &config.dispatcher));
        let engine = Arc::new(ScheduleEngine::new(
            store.clone(),
            dispatcher.clone(),
            std::time::Duration::from_secs(config.scheduler.scan_interval_secs),
            config.claim_ttl(),
            config.scheduler.batch_limit,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            services: Services {
                materials: store.clone(),
                schedules: store.clone(),
                items: store,
                dispatcher,
            },
            engine,
            config: config.clone(),
            shutdown_tx,
            engine_task: Mutex::new(None),
        }
    }

    /// Re-enqueues materials left `Pending` or `Retrying` by a previous
    /// process and fails those caught mid-fetch or mid-extraction.
    /// `Retrying` materials are admitted after the backoff delay they were
    /// waiting out.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let unfinished = self.services.materials.list_unfinished().await?;
        let mut report = RecoveryReport::default();

        for material in unfinished {
            match material.status {
                MaterialStatus::Pending | MaterialStatus::Retrying => {
                    let mut job = IngestJob::initial(material.id);
                    let admitted = if material.status == MaterialStatus::Retrying {
                        // Resume the backoff the previous process was waiting out.
                        job.retries_used = material.attempts;
                        let delay = self
                            .config
                            .pipeline
                            .retry_policy()
                            .delay_for(material.attempts.saturating_sub(1));
                        self.services.dispatcher.submit_after(job, delay)
                    } else {
                        self.services.dispatcher.submit(job).await
                    };
                    match admitted {
                        Ok(()) => report.requeued += 1,
                        Err(err) => {
                            self.interrupt(&material.id, &err.to_string()).await?;
                            report.interrupted += 1;
                        }
                    }
                }
                MaterialStatus::Fetching | MaterialStatus::Extracting => {
                    self.interrupt(
                        &material.id,
                        &format!("Interrupted: service stopped while {}", material.status),
                    )
                    .await?;
                    report.interrupted += 1;
                }
                MaterialStatus::Completed | MaterialStatus::Failed => {}
            }
        }
        Ok(report)
    }

    async fn interrupt(&self, id: &uuid::Uuid, reason: &str) -> Result<()> {
        self.services
            .materials
            .update_status(
                *id,
                MaterialStatus::Failed,
                StatusFields {
                    last_error: Some(Some(reason.to_string())),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Spawns the periodic schedule scan unless `[scheduler].enabled` is off.
    pub fn start_scheduler(&self) {
        if !self.config.scheduler.enabled {
            tracing::info!("schedule engine disabled by configuration");
            return;
        }
        let task = tokio::spawn(self.engine.clone().run(self.shutdown_tx.subscribe()));
        if let Ok(mut slot) = self.engine_task.lock() {
            *slot = Some(task);
        }
    }

    /// Stops the schedule engine, then drains the dispatcher.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.engine_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }
        self.services.dispatcher.shutdown().await;
    }
}
