//! Repository traits for FinSight.
//!
//! Materials, schedules and legacy items live behind these traits so the
//! pipeline, the schedule engine and the HTTP layer can run against either
//! the SQLite backend in the root crate or [`memory::InMemoryStore`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Atomicity
//!
//! | Method | Guarantee |
//! |--------|-----------|
//! | [`MaterialStore::update_status`] | check-and-set on the current status, per material |
//! | [`ScheduleStore::claim_due`] | each due schedule is returned to at most one caller per claim |
//! | [`ScheduleStore::renew_claim`] | extends a claim only while `claimed_until` still matches the holder's |
//! | [`ScheduleStore::complete_run`] | advances `next_run_at` and releases the claim in one write, only for the holder |
//!
//! A claim is identified by its `claimed_until` value. Whoever claimed or
//! last renewed a schedule passes that value back, so a run whose claim
//! lapsed and was taken over cannot release the newer claim.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Item, Material, Schedule, StatusFields};
use crate::status::MaterialStatus;

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable repository of [`Material`] records.
#[async_trait]
pub trait MaterialStore: Send + Sync {
    /// Persist a new material. Visible to [`list_recent`](Self::list_recent)
    /// as soon as this returns.
    async fn insert(&self, material: &Material) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Material>;

    /// Move a material to `status`, applying `fields` in the same write.
    ///
    /// Fails with [`StoreError::InvalidTransition`] when the current status
    /// does not allow the move. Returns the updated record.
    async fn update_status(
        &self,
        id: Uuid,
        status: MaterialStatus,
        fields: StatusFields,
    ) -> StoreResult<Material>;

    /// Up to `limit` materials, newest `created_at` first, ties by id.
    async fn list_recent(&self, limit: usize) -> StoreResult<Vec<Material>>;

    /// Materials whose attempt has not reached a terminal status, oldest
    /// first. Used to recover work interrupted by a restart.
    async fn list_unfinished(&self) -> StoreResult<Vec<Material>>;
}

/// Durable repository of monitoring [`Schedule`]s.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()>;

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Schedule>;

    /// Schedules ordered by `created_at`, active ones only unless
    /// `include_inactive`.
    async fn list_schedules(&self, include_inactive: bool) -> StoreResult<Vec<Schedule>>;

    /// Marks a schedule inactive. Idempotent. Returns the updated record.
    async fn deactivate_schedule(&self, id: Uuid) -> StoreResult<Schedule>;

    /// Claims up to `limit` active schedules due at `now` whose claim is
    /// absent or expired, holding them until `claim_until`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Schedule>>;

    /// Moves a held claim from `held_until` to `claim_until`. Returns
    /// `false` when the schedule is no longer held with `held_until`.
    async fn renew_claim(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Records a finished run: `last_run_at = run_started_at`,
    /// `next_run_at = run_started_at + interval`, claim released.
    ///
    /// Writes nothing and returns `None` when the claim identified by
    /// `held_until` has been taken over.
    async fn complete_run(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<Option<Schedule>>;
}

/// Storage for the legacy `/items/` resource.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn insert_item(&self, item: &Item) -> StoreResult<()>;
}

/// Sort order shared by every [`MaterialStore::list_recent`] implementation.
pub fn recency_order(a: &Material, b: &Material) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}
