//! In-memory repository backend for tests and single-process use.
//!
//! Each material sits behind its own mutex so status updates are atomic per
//! record without serializing unrelated materials. Schedules share one
//! mutex, which makes a claim a single critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{utc_now, Item, Material, Schedule, StatusFields};
use crate::status::MaterialStatus;

use super::{recency_order, ItemStore, MaterialStore, ScheduleStore, StoreResult};

#[derive(Default)]
pub struct InMemoryStore {
    materials: RwLock<HashMap<Uuid, Arc<Mutex<Material>>>>,
    schedules: Mutex<HashMap<Uuid, Schedule>>,
    items: Mutex<Vec<Item>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn material_cell(&self, id: Uuid) -> StoreResult<Arc<Mutex<Material>>> {
        let materials = self.materials.read().map_err(poisoned)?;
        materials
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::material_not_found(id))
    }

    /// Number of stored items. Used by tests.
    pub fn item_count(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl MaterialStore for InMemoryStore {
    async fn insert(&self, material: &Material) -> StoreResult<()> {
        let mut materials = self.materials.write().map_err(poisoned)?;
        if materials.contains_key(&material.id) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "material {} already exists",
                material.id
            )));
        }
        materials.insert(material.id, Arc::new(Mutex::new(material.clone())));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Material> {
        let cell = self.material_cell(id)?;
        let material = cell.lock().map_err(poisoned)?;
        Ok(material.clone())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: MaterialStatus,
        fields: StatusFields,
    ) -> StoreResult<Material> {
        let cell = self.material_cell(id)?;
        let mut material = cell.lock().map_err(poisoned)?;
        if !material.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: material.status,
                to: status,
            });
        }
        fields.apply(&mut material, status, utc_now());
        Ok(material.clone())
    }

    async fn list_recent(&self, limit: usize) -> StoreResult<Vec<Material>> {
        let cells: Vec<Arc<Mutex<Material>>> = {
            let materials = self.materials.read().map_err(poisoned)?;
            materials.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.lock().map_err(poisoned)?.clone());
        }
        out.sort_by(recency_order);
        out.truncate(limit);
        Ok(out)
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Material>> {
        let cells: Vec<Arc<Mutex<Material>>> = {
            let materials = self.materials.read().map_err(poisoned)?;
            materials.values().cloned().collect()
        };
        let mut out = Vec::new();
        for cell in cells {
            let material = cell.lock().map_err(poisoned)?;
            if !material.status.is_terminal() {
                out.push(material.clone());
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        self.material_cell(schedule.material_id)?;
        let mut schedules = self.schedules.lock().map_err(poisoned)?;
        schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Schedule> {
        let schedules = self.schedules.lock().map_err(poisoned)?;
        schedules
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::schedule_not_found(id))
    }

    async fn list_schedules(&self, include_inactive: bool) -> StoreResult<Vec<Schedule>> {
        let schedules = self.schedules.lock().map_err(poisoned)?;
        let mut out: Vec<Schedule> = schedules
            .values()
            .filter(|s| include_inactive || s.active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn deactivate_schedule(&self, id: Uuid) -> StoreResult<Schedule> {
        let mut schedules = self.schedules.lock().map_err(poisoned)?;
        let schedule = schedules
            .get_mut(&id)
            .ok_or_else(|| StoreError::schedule_not_found(id))?;
        schedule.active = false;
        Ok(schedule.clone())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Schedule>> {
        let mut schedules = self.schedules.lock().map_err(poisoned)?;
        let mut due: Vec<&mut Schedule> = schedules
            .values_mut()
            .filter(|s| s.is_claimable(now))
            .collect();
        due.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then_with(|| a.id.cmp(&b.id)));
        Ok(due
            .into_iter()
            .take(limit)
            .map(|s| {
                s.claimed_until = Some(claim_until);
                s.clone()
            })
            .collect())
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut schedules = self.schedules.lock().map_err(poisoned)?;
        let schedule = schedules
            .get_mut(&id)
            .ok_or_else(|| StoreError::schedule_not_found(id))?;
        if schedule.claimed_until != Some(held_until) {
            return Ok(false);
        }
        schedule.claimed_until = Some(claim_until);
        Ok(true)
    }

    async fn complete_run(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<Option<Schedule>> {
        let mut schedules = self.schedules.lock().map_err(poisoned)?;
        let schedule = schedules
            .get_mut(&id)
            .ok_or_else(|| StoreError::schedule_not_found(id))?;
        if schedule.claimed_until != Some(held_until) {
            return Ok(None);
        }
        schedule.last_run_at = Some(run_started_at);
        schedule.next_run_at = schedule.next_run_after(run_started_at);
        schedule.claimed_until = None;
        Ok(Some(schedule.clone()))
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn insert_item(&self, item: &Item) -> StoreResult<()> {
        self.items.lock().map_err(poisoned)?.push(item.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractedFields, SourceRef};
    use chrono::Duration;

    fn material_at(ts: DateTime<Utc>) -> Material {
        Material::new("doc", SourceRef::Url("https://a.test".into()), ts)
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_recent_orders_newest_first_with_id_tiebreak() {
        let store = InMemoryStore::new();
        let t0 = utc_now();
        let old = material_at(t0 - Duration::seconds(10));
        let tie_a = material_at(t0);
        let tie_b = material_at(t0);
        for m in [&old, &tie_a, &tie_b] {
            store.insert(m).await.unwrap();
        }

        let listed = store.list_recent(10).await.unwrap();
        assert_eq!(listed.len(), 3);
        let (first, second) = if tie_a.id < tie_b.id {
            (tie_a.id, tie_b.id)
        } else {
            (tie_b.id, tie_a.id)
        };
        assert_eq!(listed[0].id, first);
        assert_eq!(listed[1].id, second);
        assert_eq!(listed[2].id, old.id);

        let again = store.list_recent(10).await.unwrap();
        assert_eq!(listed, again);
        assert_eq!(store.list_recent(2).await.unwrap().len(), 2);
        assert!(store.list_recent(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let store = InMemoryStore::new();
        let m = material_at(utc_now());
        store.insert(&m).await.unwrap();

        let err = store
            .update_status(m.id, MaterialStatus::Completed, StatusFields::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: MaterialStatus::Pending,
                to: MaterialStatus::Completed,
                ..
            }
        ));
        assert_eq!(store.get(m.id).await.unwrap().status, MaterialStatus::Pending);
    }

    #[tokio::test]
    async fn completion_writes_extracted_fields() {
        let store = InMemoryStore::new();
        let m = material_at(utc_now());
        store.insert(&m).await.unwrap();

        store
            .update_status(m.id, MaterialStatus::Fetching, StatusFields::default())
            .await
            .unwrap();
        store
            .update_status(m.id, MaterialStatus::Extracting, StatusFields::default())
            .await
            .unwrap();
        let done = store
            .update_status(
                m.id,
                MaterialStatus::Completed,
                StatusFields {
                    extracted: Some(ExtractedFields {
                        content: "hello".into(),
                        fingerprint: "abc".into(),
                        title: Some("Hello".into()),
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(done.status, MaterialStatus::Completed);
        assert_eq!(done.extracted_content.as_deref(), Some("hello"));
        assert_eq!(done.extracted_title.as_deref(), Some("Hello"));
        assert_eq!(done.title, "doc");
    }

    #[tokio::test]
    async fn unfinished_excludes_terminal_materials() {
        let store = InMemoryStore::new();
        let pending = material_at(utc_now());
        let failed = material_at(utc_now());
        store.insert(&pending).await.unwrap();
        store.insert(&failed).await.unwrap();
        store
            .update_status(failed.id, MaterialStatus::Failed, StatusFields::default())
            .await
            .unwrap();

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, pending.id);
    }

    #[tokio::test]
    async fn schedule_requires_existing_material() {
        let store = InMemoryStore::new();
        let s = Schedule::new(Uuid::new_v4(), 60, None, utc_now()).unwrap();
        assert!(store.insert_schedule(&s).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn due_schedule_is_claimed_once() {
        let store = Arc::new(InMemoryStore::new());
        let now = utc_now();
        let m = material_at(now);
        store.insert(&m).await.unwrap();
        let s = Schedule::new(m.id, 60, Some(now), now).unwrap();
        store.insert_schedule(&s).await.unwrap();

        let until = now + Duration::minutes(5);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.claim_due(now, until, 10).await },
            ));
        }
        let mut claimed = 0;
        for h in handles {
            claimed += h.await.unwrap().unwrap().len();
        }
        assert_eq!(claimed, 1);

        // Claim expiry makes it claimable again.
        let later = store.claim_due(until, until + Duration::minutes(5), 10).await.unwrap();
        assert_eq!(later.len(), 1);
    }

    #[tokio::test]
    async fn complete_run_advances_from_run_start() {
        let store = InMemoryStore::new();
        let now = utc_now();
        let m = material_at(now);
        store.insert(&m).await.unwrap();
        let s = Schedule::new(m.id, 120, Some(now), now).unwrap();
        store.insert_schedule(&s).await.unwrap();

        let until = now + Duration::minutes(5);
        store.claim_due(now, until, 10).await.unwrap();
        let done = store.complete_run(s.id, until, now).await.unwrap().unwrap();
        assert_eq!(done.next_run_at, now + Duration::seconds(120));
        assert_eq!(done.last_run_at, Some(now));
        assert_eq!(done.claimed_until, None);
        assert!(store.claim_due(now, now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn superseded_claim_cannot_renew_or_complete() {
        let store = InMemoryStore::new();
        let now = utc_now();
        let m = material_at(now);
        store.insert(&m).await.unwrap();
        let s = Schedule::new(m.id, 60, Some(now), now).unwrap();
        store.insert_schedule(&s).await.unwrap();

        let first = now + Duration::minutes(1);
        store.claim_due(now, first, 10).await.unwrap();
        let renewed = first + Duration::minutes(1);
        assert!(store.renew_claim(s.id, first, renewed).await.unwrap());
        assert!(!store.renew_claim(s.id, first, renewed).await.unwrap());

        // The renewed claim lapses and another scan takes it.
        let second = renewed + Duration::minutes(5);
        assert_eq!(store.claim_due(renewed, second, 10).await.unwrap().len(), 1);

        assert!(store.complete_run(s.id, renewed, now).await.unwrap().is_none());
        let held = store.get_schedule(s.id).await.unwrap();
        assert_eq!(held.claimed_until, Some(second));
        assert_eq!(held.last_run_at, None);

        let done = store.complete_run(s.id, second, renewed).await.unwrap().unwrap();
        assert_eq!(done.claimed_until, None);
        assert_eq!(done.next_run_at, renewed + Duration::seconds(60));
    }

    #[tokio::test]
    async fn deactivated_schedules_are_hidden_and_never_claimed() {
        let store = InMemoryStore::new();
        let now = utc_now();
        let m = material_at(now);
        store.insert(&m).await.unwrap();
        let s = Schedule::new(m.id, 60, Some(now), now).unwrap();
        store.insert_schedule(&s).await.unwrap();

        let off = store.deactivate_schedule(s.id).await.unwrap();
        assert!(!off.active);
        assert!(store.list_schedules(false).await.unwrap().is_empty());
        assert_eq!(store.list_schedules(true).await.unwrap().len(), 1);
        assert!(store
            .claim_due(now, now + Duration::minutes(1), 10)
            .await
            .unwrap()
            .is_empty());
    }
}
