//! Recurring re-checks of monitored materials.
//!
//! Each scan claims due schedules in the store, submits one re-check job per
//! claim through the [`Dispatcher`], and never fetches inline. When a job
//! ends, the run is recorded with `next_run_at = run_start + interval`
//! whatever the outcome, and a changed fingerprint is broadcast as an
//! [`UpdateDetected`] event.
//!
//! Claims carry an expiry (`claimed_until`) instead of living in engine
//! memory, so several engines may scan the same store and a crashed engine
//! only delays its schedules until the claim lapses. While a re-check waits
//! in the queue or runs, its claim is renewed every third of the claim
//! lifetime, so a long queue never lets a second scan take the schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use finsight_core::error::StoreError;
use finsight_core::models::{utc_now, Schedule};
use finsight_core::store::ScheduleStore;

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::pipeline::{AttemptOutcome, IngestJob, OutcomeStatus};

const EVENT_BUFFER: usize = 64;

/// A re-check produced content different from what was stored before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateDetected {
    pub schedule_id: Uuid,
    pub material_id: Uuid,
    pub previous_fingerprint: String,
    pub fingerprint: String,
    pub detected_at: DateTime<Utc>,
}

/// What a single scan did.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Schedules claimed and handed to the dispatcher.
    pub enqueued: usize,
    /// Schedules claimed but not admitted; their run was recorded anyway.
    pub deferred: usize,
    /// One task per enqueued schedule, finishing after its run is recorded.
    pub runs: Vec<JoinHandle<()>>,
}

impl ScanReport {
    /// Waits until every enqueued run has been recorded.
    pub async fn wait(self) {
        for run in self.runs {
            let _ = run.await;
        }
    }
}

pub struct ScheduleEngine {
    schedules: Arc<dyn ScheduleStore>,
    dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<UpdateDetected>,
    scan_interval: Duration,
    claim_ttl: chrono::Duration,
    renew_every: Duration,
    batch_limit: usize,
}

impl ScheduleEngine {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        dispatcher: Arc<Dispatcher>,
        scan_interval: Duration,
        claim_ttl: Duration,
        batch_limit: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            schedules,
            dispatcher,
            events,
            scan_interval,
            claim_ttl: chrono::Duration::from_std(claim_ttl).unwrap_or(chrono::Duration::MAX),
            renew_every: (claim_ttl / 3).max(Duration::from_secs(1)),
            batch_limit,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateDetected> {
        self.events.subscribe()
    }

    /// Claims the schedules due at `now` and enqueues their re-checks.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<ScanReport, StoreError> {
        let claim_until = now
            .checked_add_signed(self.claim_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let claimed = self
            .schedules
            .claim_due(now, claim_until, self.batch_limit)
            .await?;

        let mut report = ScanReport::default();
        for schedule in claimed {
            let (job, outcome_rx) =
                IngestJob::recheck(schedule.material_id, schedule.id).with_completion();

            let claim = Claim {
                schedules: self.schedules.clone(),
                held_until: schedule.claimed_until.unwrap_or(claim_until),
                schedule,
                run_started_at: now,
                started: Instant::now(),
                ttl: self.claim_ttl,
                renew_every: self.renew_every,
            };

            match self.dispatcher.submit(job).await {
                Ok(()) => {
                    report.enqueued += 1;
                    let events = self.events.clone();
                    report.runs.push(tokio::spawn(async move {
                        let (claim, outcome) = claim.hold_until(outcome_rx).await;
                        finish_run(&claim, &events, outcome).await;
                    }));
                }
                Err(err) => {
                    report.deferred += 1;
                    match err {
                        DispatchError::QueueFull => tracing::warn!(
                            schedule_id = %claim.schedule.id,
                            material_id = %claim.schedule.material_id,
                            "queue full; re-check skipped until next interval"
                        ),
                        DispatchError::Closed => tracing::info!(
                            schedule_id = %claim.schedule.id,
                            "dispatcher closed; re-check skipped"
                        ),
                    }
                    finish_run(&claim, &self.events, None).await;
                }
            }
        }

        if report.enqueued + report.deferred > 0 {
            tracing::info!(
                enqueued = report.enqueued,
                deferred = report.deferred,
                "schedule scan"
            );
        }
        Ok(report)
    }

    /// Scans every `scan_interval` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.scan_interval.as_secs(), "schedule engine started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.scan_once(utc_now()).await {
                        tracing::error!(error = %err, "schedule scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("schedule engine stopped");
    }
}

/// A claimed schedule whose run is not recorded yet.
struct Claim {
    schedules: Arc<dyn ScheduleStore>,
    schedule: Schedule,
    held_until: DateTime<Utc>,
    run_started_at: DateTime<Utc>,
    started: Instant,
    ttl: chrono::Duration,
    renew_every: Duration,
}

impl Claim {
    /// Keeps the claim alive until the re-check reports its outcome.
    async fn hold_until(
        mut self,
        mut outcome_rx: oneshot::Receiver<AttemptOutcome>,
    ) -> (Self, Option<AttemptOutcome>) {
        let mut renew = tokio::time::interval_at(self.started + self.renew_every, self.renew_every);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut held = true;

        let outcome = loop {
            tokio::select! {
                outcome = &mut outcome_rx => break outcome.ok(),
                _ = renew.tick(), if held => {
                    held = self.renew().await;
                }
            }
        };
        (self, outcome)
    }

    async fn renew(&mut self) -> bool {
        // Run start plus monotonic elapsed time, so renewals follow the
        // same clock the scan used.
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or(chrono::Duration::zero());
        let until = elapsed
            .checked_add(&self.ttl)
            .and_then(|ahead| self.run_started_at.checked_add_signed(ahead))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .trunc_subsecs(3);

        match self
            .schedules
            .renew_claim(self.schedule.id, self.held_until, until)
            .await
        {
            Ok(true) => {
                tracing::debug!(schedule_id = %self.schedule.id, %until, "claim renewed");
                self.held_until = until;
                true
            }
            Ok(false) => {
                tracing::warn!(schedule_id = %self.schedule.id, "claim lost while re-check in flight");
                false
            }
            Err(err) => {
                tracing::error!(schedule_id = %self.schedule.id, error = %err, "could not renew claim");
                true
            }
        }
    }
}

async fn finish_run(
    claim: &Claim,
    events: &broadcast::Sender<UpdateDetected>,
    outcome: Option<AttemptOutcome>,
) {
    let schedule = &claim.schedule;
    if let Some(outcome) = &outcome {
        tracing::debug!(
            schedule_id = %schedule.id,
            material_id = %outcome.material_id,
            status = ?outcome.status,
            "re-check finished"
        );
        if outcome.content_changed() {
            if let (Some(previous), Some(current)) =
                (&outcome.previous_fingerprint, &outcome.fingerprint)
            {
                let event = UpdateDetected {
                    schedule_id: schedule.id,
                    material_id: schedule.material_id,
                    previous_fingerprint: previous.clone(),
                    fingerprint: current.clone(),
                    detected_at: utc_now(),
                };
                tracing::info!(
                    schedule_id = %event.schedule_id,
                    material_id = %event.material_id,
                    previous = %event.previous_fingerprint,
                    current = %event.fingerprint,
                    "update detected"
                );
                let _ = events.send(event);
            }
        } else if outcome.status == OutcomeStatus::Failed {
            tracing::warn!(
                schedule_id = %schedule.id,
                error = outcome.error.as_deref().unwrap_or(""),
                "re-check failed"
            );
        }
    }

    match claim
        .schedules
        .complete_run(schedule.id, claim.held_until, claim.run_started_at)
        .await
    {
        Ok(Some(_)) => {}
        Ok(None) => tracing::warn!(
            schedule_id = %schedule.id,
            "claim taken over; run left to the new holder"
        ),
        Err(err) => {
            tracing::error!(schedule_id = %schedule.id, error = %err, "could not record schedule run")
        }
    }
}
