//! Monitoring schedule operations and the `finsight schedule` commands.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use finsight_core::error::{StoreError, ValidationError};
use finsight_core::models::{utc_now, Schedule};
use finsight_core::store::ScheduleStore;

use crate::config::Config;
use crate::db;
use crate::get::format_ts_iso;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Body of `POST /schedules/`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSchedule {
    pub material_id: Uuid,
    pub interval_secs: u64,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScheduleResponse {
    pub id: Uuid,
    pub material_id: Uuid,
    pub interval_secs: u64,
    pub next_run_at: String,
    pub active: bool,
    pub claimed_until: Option<String>,
    pub last_run_at: Option<String>,
    pub created_at: String,
}

impl From<&Schedule> for ScheduleResponse {
    fn from(s: &Schedule) -> Self {
        Self {
            id: s.id,
            material_id: s.material_id,
            interval_secs: s.interval_secs,
            next_run_at: format_ts_iso(s.next_run_at),
            active: s.active,
            claimed_until: s.claimed_until.map(format_ts_iso),
            last_run_at: s.last_run_at.map(format_ts_iso),
            created_at: format_ts_iso(s.created_at),
        }
    }
}

/// Creates an active schedule for an existing material.
pub async fn create_schedule(
    store: &dyn ScheduleStore,
    request: CreateSchedule,
) -> Result<Schedule, ScheduleError> {
    let schedule = Schedule::new(
        request.material_id,
        request.interval_secs,
        request.start_at,
        utc_now(),
    )?;
    store.insert_schedule(&schedule).await?;
    tracing::info!(
        schedule_id = %schedule.id,
        material_id = %schedule.material_id,
        interval_secs = schedule.interval_secs,
        next_run_at = %schedule.next_run_at,
        "schedule created"
    );
    Ok(schedule)
}

/// Deactivates a schedule. The record is kept.
pub async fn cancel_schedule(store: &dyn ScheduleStore, id: Uuid) -> Result<Schedule, StoreError> {
    let schedule = store.deactivate_schedule(id).await?;
    tracing::info!(schedule_id = %id, "schedule cancelled");
    Ok(schedule)
}

async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(SqliteStore::new(pool))
}

fn print_schedule(s: &Schedule) {
    let last = s.last_run_at.map(format_ts_iso).unwrap_or_else(|| "-".to_string());
    println!(
        "{}  material={}  every {}s  next={}  last={}  {}",
        s.id,
        s.material_id,
        s.interval_secs,
        format_ts_iso(s.next_run_at),
        last,
        if s.active { "active" } else { "inactive" }
    );
}

/// `finsight schedule create`.
pub async fn run_create(
    config: &Config,
    material_id: &str,
    interval_secs: u64,
    start_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let material_id = Uuid::parse_str(material_id)
        .map_err(|_| anyhow::anyhow!("invalid material id: {}", material_id))?;
    let store = open_store(config).await?;
    let result = create_schedule(
        &store,
        CreateSchedule {
            material_id,
            interval_secs,
            start_at,
        },
    )
    .await;
    store.pool().close().await;
    print_schedule(&result?);
    Ok(())
}

/// `finsight schedule list`.
pub async fn run_list(config: &Config, include_inactive: bool) -> Result<()> {
    let store = open_store(config).await?;
    let schedules = store.list_schedules(include_inactive).await;
    store.pool().close().await;
    let schedules = schedules?;
    if schedules.is_empty() {
        println!("No schedules.");
    }
    for s in &schedules {
        print_schedule(s);
    }
    Ok(())
}

/// `finsight schedule cancel`.
pub async fn run_cancel(config: &Config, id: &str) -> Result<()> {
    let id = Uuid::parse_str(id).map_err(|_| anyhow::anyhow!("invalid schedule id: {}", id))?;
    let store = open_store(config).await?;
    let result = cancel_schedule(&store, id).await;
    store.pool().close().await;
    print_schedule(&result?);
    Ok(())
}
