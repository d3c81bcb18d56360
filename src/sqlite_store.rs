//! SQLite-backed repositories.
//!
//! Every status change is one `UPDATE ... WHERE status IN (...) RETURNING`
//! statement, and a schedule claim is one conditional `UPDATE`, so
//! concurrent writers never observe a half-applied transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use finsight_core::error::StoreError;
use finsight_core::models::{utc_now, Item, Material, Schedule, SourceKind, SourceRef, StatusFields};
use finsight_core::status::MaterialStatus;
use finsight_core::store::{ItemStore, MaterialStore, ScheduleStore, StoreResult};

const MATERIAL_COLUMNS: &str = "id, title, source_kind, source_location, status, \
    extracted_title, extracted_content, content_fingerprint, attempts, last_error, \
    created_at, updated_at, last_checked_at";

const SCHEDULE_COLUMNS: &str = "id, material_id, interval_secs, next_run_at, active, \
    claimed_until, last_run_at, created_at";

/// SQLite implementation of the material, schedule and item repositories.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.into())
}

fn corrupt(what: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("corrupt row: {}", what))
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| corrupt(format!("timestamp {}", ms)))
}

fn opt_from_millis(ms: Option<i64>) -> StoreResult<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn parse_id(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| corrupt(format!("id '{}'", raw)))
}

fn material_from_row(row: &SqliteRow) -> StoreResult<Material> {
    let id: String = row.try_get("id").map_err(backend)?;
    let kind: String = row.try_get("source_kind").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    let attempts: i64 = row.try_get("attempts").map_err(backend)?;

    let kind = SourceKind::parse(&kind).ok_or_else(|| corrupt(format!("source kind '{}'", kind)))?;
    let status: MaterialStatus = status.parse().map_err(corrupt)?;

    Ok(Material {
        id: parse_id(&id)?,
        title: row.try_get("title").map_err(backend)?,
        source: SourceRef::new(
            kind,
            row.try_get::<String, _>("source_location").map_err(backend)?,
        ),
        status,
        extracted_title: row.try_get("extracted_title").map_err(backend)?,
        extracted_content: row.try_get("extracted_content").map_err(backend)?,
        content_fingerprint: row.try_get("content_fingerprint").map_err(backend)?,
        attempts: u32::try_from(attempts).map_err(|_| corrupt("attempts"))?,
        last_error: row.try_get("last_error").map_err(backend)?,
        created_at: from_millis(row.try_get("created_at").map_err(backend)?)?,
        updated_at: from_millis(row.try_get("updated_at").map_err(backend)?)?,
        last_checked_at: opt_from_millis(row.try_get("last_checked_at").map_err(backend)?)?,
    })
}

fn schedule_from_row(row: &SqliteRow) -> StoreResult<Schedule> {
    let id: String = row.try_get("id").map_err(backend)?;
    let material_id: String = row.try_get("material_id").map_err(backend)?;
    let interval: i64 = row.try_get("interval_secs").map_err(backend)?;
    let active: i64 = row.try_get("active").map_err(backend)?;

    Ok(Schedule {
        id: parse_id(&id)?,
        material_id: parse_id(&material_id)?,
        interval_secs: u64::try_from(interval).map_err(|_| corrupt("interval_secs"))?,
        next_run_at: from_millis(row.try_get("next_run_at").map_err(backend)?)?,
        active: active != 0,
        claimed_until: opt_from_millis(row.try_get("claimed_until").map_err(backend)?)?,
        last_run_at: opt_from_millis(row.try_get("last_run_at").map_err(backend)?)?,
        created_at: from_millis(row.try_get("created_at").map_err(backend)?)?,
    })
}

#[async_trait]
impl MaterialStore for SqliteStore {
    async fn insert(&self, material: &Material) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO materials (id, title, source_kind, source_location, status,
                                   extracted_title, extracted_content, content_fingerprint,
                                   attempts, last_error, created_at, updated_at, last_checked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(material.id.to_string())
        .bind(&material.title)
        .bind(material.source.kind().as_str())
        .bind(material.source.location())
        .bind(material.status.as_str())
        .bind(&material.extracted_title)
        .bind(&material.extracted_content)
        .bind(&material.content_fingerprint)
        .bind(material.attempts as i64)
        .bind(&material.last_error)
        .bind(to_millis(material.created_at))
        .bind(to_millis(material.updated_at))
        .bind(material.last_checked_at.map(to_millis))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Material> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM materials WHERE id = ?",
            MATERIAL_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => material_from_row(&row),
            None => Err(StoreError::material_not_found(id)),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: MaterialStatus,
        fields: StatusFields,
    ) -> StoreResult<Material> {
        let allowed = MaterialStatus::predecessors(status);
        if allowed.is_empty() {
            let current = self.get(id).await?;
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }
        let placeholders = vec!["?"; allowed.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE materials SET
                status = ?,
                updated_at = ?,
                title = COALESCE(?, title),
                last_checked_at = COALESCE(?, last_checked_at),
                attempts = COALESCE(?, attempts),
                last_error = CASE WHEN ? THEN ? ELSE last_error END,
                extracted_content = CASE WHEN ? THEN ? ELSE extracted_content END,
                content_fingerprint = CASE WHEN ? THEN ? ELSE content_fingerprint END,
                extracted_title = CASE WHEN ? THEN ? ELSE extracted_title END
            WHERE id = ? AND status IN ({})
            RETURNING {}
            "#,
            placeholders, MATERIAL_COLUMNS
        );

        let set_error = fields.last_error.is_some();
        let error = fields.last_error.clone().flatten();
        let extracted = fields.extracted.as_ref();

        let mut query = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(to_millis(utc_now()))
            .bind(fields.title.clone())
            .bind(fields.last_checked_at.map(to_millis))
            .bind(fields.attempts.map(|a| a as i64))
            .bind(set_error)
            .bind(error)
            .bind(extracted.is_some())
            .bind(extracted.map(|e| e.content.clone()))
            .bind(extracted.is_some())
            .bind(extracted.map(|e| e.fingerprint.clone()))
            .bind(extracted.is_some())
            .bind(extracted.and_then(|e| e.title.clone()))
            .bind(id.to_string());
        for from in &allowed {
            query = query.bind(from.as_str());
        }

        let row = query.fetch_optional(&self.pool).await.map_err(backend)?;
        match row {
            Some(row) => material_from_row(&row),
            None => {
                // Either the row is gone or its status did not allow the move.
                let current = self.get(id).await?;
                Err(StoreError::InvalidTransition {
                    id,
                    from: current.status,
                    to: status,
                })
            }
        }
    }

    async fn list_recent(&self, limit: usize) -> StoreResult<Vec<Material>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM materials ORDER BY created_at DESC, id ASC LIMIT ?",
            MATERIAL_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(material_from_row).collect()
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Material>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM materials WHERE status NOT IN (?, ?) ORDER BY created_at ASC, id ASC",
            MATERIAL_COLUMNS
        ))
        .bind(MaterialStatus::Completed.as_str())
        .bind(MaterialStatus::Failed.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(material_from_row).collect()
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM materials WHERE id = ?")
            .bind(schedule.material_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        if !exists {
            return Err(StoreError::material_not_found(schedule.material_id));
        }

        sqlx::query(
            r#"
            INSERT INTO schedules (id, material_id, interval_secs, next_run_at, active,
                                   claimed_until, last_run_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.material_id.to_string())
        .bind(schedule.interval_secs as i64)
        .bind(to_millis(schedule.next_run_at))
        .bind(schedule.active)
        .bind(schedule.claimed_until.map(to_millis))
        .bind(schedule.last_run_at.map(to_millis))
        .bind(to_millis(schedule.created_at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Schedule> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM schedules WHERE id = ?",
            SCHEDULE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => schedule_from_row(&row),
            None => Err(StoreError::schedule_not_found(id)),
        }
    }

    async fn list_schedules(&self, include_inactive: bool) -> StoreResult<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM schedules WHERE active = 1 OR ? ORDER BY created_at ASC, id ASC",
            SCHEDULE_COLUMNS
        ))
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(schedule_from_row).collect()
    }

    async fn deactivate_schedule(&self, id: Uuid) -> StoreResult<Schedule> {
        let row = sqlx::query(&format!(
            "UPDATE schedules SET active = 0 WHERE id = ? RETURNING {}",
            SCHEDULE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => schedule_from_row(&row),
            None => Err(StoreError::schedule_not_found(id)),
        }
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Schedule>> {
        let now = to_millis(now);
        // The outer predicate repeats the subselect's so that a row claimed by
        // a concurrent writer between the two is left alone.
        let rows = sqlx::query(&format!(
            r#"
            UPDATE schedules SET claimed_until = ?
            WHERE id IN (
                SELECT id FROM schedules
                WHERE active = 1 AND next_run_at <= ?
                  AND (claimed_until IS NULL OR claimed_until <= ?)
                ORDER BY next_run_at ASC, id ASC
                LIMIT ?
            )
              AND active = 1 AND next_run_at <= ?
              AND (claimed_until IS NULL OR claimed_until <= ?)
            RETURNING {}
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(to_millis(claim_until))
        .bind(now)
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut claimed = rows
            .iter()
            .map(schedule_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        claimed.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then_with(|| a.id.cmp(&b.id)));
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE schedules SET claimed_until = ? WHERE id = ? AND claimed_until = ?",
        )
        .bind(to_millis(claim_until))
        .bind(id.to_string())
        .bind(to_millis(held_until))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            self.get_schedule(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn complete_run(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<Option<Schedule>> {
        let started = to_millis(run_started_at);
        let row = sqlx::query(&format!(
            r#"
            UPDATE schedules SET
                last_run_at = ?,
                next_run_at = ? + interval_secs * 1000,
                claimed_until = NULL
            WHERE id = ? AND claimed_until = ?
            RETURNING {}
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(started)
        .bind(started)
        .bind(id.to_string())
        .bind(to_millis(held_until))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => schedule_from_row(&row).map(Some),
            None => {
                // Distinguishes a missing schedule from a claim taken over.
                self.get_schedule(id).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn insert_item(&self, item: &Item) -> StoreResult<()> {
        sqlx::query("INSERT INTO items (id, name, description) VALUES (?, ?, ?)")
            .bind(item.id.to_string())
            .bind(&item.name)
            .bind(&item.description)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
