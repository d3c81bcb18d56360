//! Fetch → Extract → Persist for one material attempt.
//!
//! The pipeline owns every status transition of an attempt and persists
//! each one before starting the next stage. It never sleeps: a transient
//! fetch failure returns [`Step::Retry`] and the dispatcher re-enqueues the
//! job after the delay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use finsight_core::error::{ExtractError, FetchError, StoreError};
use finsight_core::models::{utc_now, ExtractedFields, Material, StatusFields};
use finsight_core::retry::RetryPolicy;
use finsight_core::status::MaterialStatus;
use finsight_core::store::MaterialStore;

use crate::extract::ContentExtractor;
use crate::fetch::FetcherSet;

/// Why a job was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// First ingestion after submission.
    Initial,
    /// Scheduled re-check.
    Recheck { schedule_id: Uuid },
}

/// One unit of work for the dispatcher.
#[derive(Debug)]
pub struct IngestJob {
    pub material_id: Uuid,
    pub trigger: Trigger,
    /// Retries already spent in this attempt.
    pub retries_used: u32,
    /// Receives the outcome once the attempt ends.
    pub completion: Option<oneshot::Sender<AttemptOutcome>>,
}

impl IngestJob {
    pub fn initial(material_id: Uuid) -> Self {
        Self {
            material_id,
            trigger: Trigger::Initial,
            retries_used: 0,
            completion: None,
        }
    }

    pub fn recheck(material_id: Uuid, schedule_id: Uuid) -> Self {
        Self {
            material_id,
            trigger: Trigger::Recheck { schedule_id },
            retries_used: 0,
            completion: None,
        }
    }

    /// Attaches a completion channel and returns its receiver.
    pub fn with_completion(mut self) -> (Self, oneshot::Receiver<AttemptOutcome>) {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        (self, rx)
    }

    /// Delivers `outcome` to the completion channel, if any.
    pub fn complete(self, outcome: AttemptOutcome) {
        if let Some(tx) = self.completion {
            let _ = tx.send(outcome);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Completed,
    Failed,
    /// The material was already being processed; nothing was done.
    Skipped,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub material_id: Uuid,
    pub status: OutcomeStatus,
    /// Fingerprint stored before this attempt.
    pub previous_fingerprint: Option<String>,
    /// Fingerprint produced by this attempt, on `Completed`.
    pub fingerprint: Option<String>,
    pub error: Option<String>,
}

impl AttemptOutcome {
    fn skipped(material_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            material_id,
            status: OutcomeStatus::Skipped,
            previous_fingerprint: None,
            fingerprint: None,
            error: Some(reason.into()),
        }
    }

    fn failed(material: &Material, error: impl Into<String>) -> Self {
        Self {
            material_id: material.id,
            status: OutcomeStatus::Failed,
            previous_fingerprint: material.content_fingerprint.clone(),
            fingerprint: None,
            error: Some(error.into()),
        }
    }

    /// Completed with a fingerprint different from a previously stored one.
    pub fn content_changed(&self) -> bool {
        self.status == OutcomeStatus::Completed
            && self.previous_fingerprint.is_some()
            && self.previous_fingerprint != self.fingerprint
    }
}

/// Result of running one job.
#[derive(Debug)]
pub enum Step {
    Finished(AttemptOutcome),
    /// Transient fetch failure; re-enqueue after `delay`.
    Retry { delay: Duration },
}

pub struct IngestionPipeline {
    materials: Arc<dyn MaterialStore>,
    fetchers: FetcherSet,
    extractor: Arc<dyn ContentExtractor>,
    policy: RetryPolicy,
    fetch_timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(
        materials: Arc<dyn MaterialStore>,
        fetchers: FetcherSet,
        extractor: Arc<dyn ContentExtractor>,
        policy: RetryPolicy,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            materials,
            fetchers,
            extractor,
            policy,
            fetch_timeout,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs one pass of `job`: a full attempt, or one fetch of it when the
    /// fetch fails transiently.
    pub async fn run(&self, job: &IngestJob) -> Step {
        match self.try_run(job).await {
            Ok(step) => step,
            Err(StoreError::InvalidTransition { from, to, .. }) => {
                tracing::info!(
                    material_id = %job.material_id,
                    %from,
                    %to,
                    "material already in flight; skipping"
                );
                Step::Finished(AttemptOutcome::skipped(
                    job.material_id,
                    format!("material is {}", from),
                ))
            }
            Err(err @ StoreError::NotFound { .. }) => {
                tracing::warn!(material_id = %job.material_id, error = %err, "job for unknown material");
                Step::Finished(AttemptOutcome::skipped(job.material_id, err.to_string()))
            }
            Err(err) => {
                tracing::error!(material_id = %job.material_id, error = %err, "store failure during ingestion");
                Step::Finished(self.mark_failed(job.material_id, &err.to_string()).await)
            }
        }
    }

    async fn try_run(&self, job: &IngestJob) -> Result<Step, StoreError> {
        let mut material = self.materials.get(job.material_id).await?;

        if job.retries_used == 0 {
            if let Trigger::Recheck { .. } = job.trigger {
                if !material.status.is_terminal() {
                    return Ok(Step::Finished(AttemptOutcome::skipped(
                        material.id,
                        format!("material is {}", material.status),
                    )));
                }
                material = self
                    .materials
                    .update_status(
                        material.id,
                        MaterialStatus::Pending,
                        StatusFields {
                            attempts: Some(0),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        let material = self
            .materials
            .update_status(
                material.id,
                MaterialStatus::Fetching,
                StatusFields {
                    last_checked_at: Some(utc_now()),
                    attempts: Some(material.attempts + 1),
                    ..Default::default()
                },
            )
            .await?;
        tracing::debug!(
            material_id = %material.id,
            attempt = material.attempts,
            source = material.source.kind().as_str(),
            "fetching"
        );

        let fetched = match tokio::time::timeout(
            self.fetch_timeout,
            self.fetchers.fetch(&material.source),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(format!(
                "fetch did not finish within {:?}",
                self.fetch_timeout
            ))),
        };

        let raw = match fetched {
            Ok(raw) => raw,
            Err(err) => return self.on_fetch_error(&material, job.retries_used, err).await,
        };

        self.materials
            .update_status(material.id, MaterialStatus::Extracting, StatusFields::default())
            .await?;

        let extractor = self.extractor.clone();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&raw))
            .await
            .unwrap_or_else(|e| Err(ExtractError::Internal(e.to_string())));

        let extracted = match extracted {
            Ok(extracted) => extracted,
            Err(err) => {
                tracing::warn!(material_id = %material.id, error = %err, "extraction failed");
                self.materials
                    .update_status(
                        material.id,
                        MaterialStatus::Failed,
                        StatusFields {
                            last_error: Some(Some(err.to_string())),
                            ..Default::default()
                        },
                    )
                    .await?;
                return Ok(Step::Finished(AttemptOutcome::failed(&material, err.to_string())));
            }
        };

        let title = extracted
            .title
            .clone()
            .filter(|_| material.has_default_title());
        let done = self
            .materials
            .update_status(
                material.id,
                MaterialStatus::Completed,
                StatusFields {
                    title,
                    last_error: Some(None),
                    extracted: Some(ExtractedFields {
                        content: extracted.text,
                        fingerprint: extracted.fingerprint.clone(),
                        title: extracted.title,
                    }),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            material_id = %done.id,
            attempts = done.attempts,
            fingerprint = %extracted.fingerprint,
            "material completed"
        );
        Ok(Step::Finished(AttemptOutcome {
            material_id: done.id,
            status: OutcomeStatus::Completed,
            previous_fingerprint: material.content_fingerprint.clone(),
            fingerprint: Some(extracted.fingerprint),
            error: None,
        }))
    }

    async fn on_fetch_error(
        &self,
        material: &Material,
        retries_used: u32,
        err: FetchError,
    ) -> Result<Step, StoreError> {
        let delay = err
            .is_transient()
            .then(|| self.policy.next_delay(retries_used))
            .flatten();

        if let Some(delay) = delay {
            tracing::warn!(
                material_id = %material.id,
                error = %err,
                retry = retries_used + 1,
                delay_ms = delay.as_millis() as u64,
                "transient fetch failure; retrying"
            );
            self.materials
                .update_status(
                    material.id,
                    MaterialStatus::Retrying,
                    StatusFields {
                        last_error: Some(Some(err.to_string())),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(Step::Retry { delay });
        }

        tracing::warn!(
            material_id = %material.id,
            error = %err,
            transient = err.is_transient(),
            "fetch failed"
        );
        self.materials
            .update_status(
                material.id,
                MaterialStatus::Failed,
                StatusFields {
                    last_error: Some(Some(err.to_string())),
                    ..Default::default()
                },
            )
            .await?;
        Ok(Step::Finished(AttemptOutcome::failed(material, err.to_string())))
    }

    /// Ends the current attempt as `Failed`, e.g. when a retry could not be
    /// re-admitted to the queue.
    pub async fn mark_failed(&self, material_id: Uuid, error: &str) -> AttemptOutcome {
        let fields = StatusFields {
            last_error: Some(Some(error.to_string())),
            ..Default::default()
        };
        match self
            .materials
            .update_status(material_id, MaterialStatus::Failed, fields)
            .await
        {
            Ok(material) => AttemptOutcome::failed(&material, error),
            Err(err) => {
                tracing::error!(%material_id, error = %err, "could not mark material failed");
                AttemptOutcome {
                    material_id,
                    status: OutcomeStatus::Failed,
                    previous_fingerprint: None,
                    fingerprint: None,
                    error: Some(error.to_string()),
                }
            }
        }
    }
}
