//! In-memory entity state store with reconciliation

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{EntityState, StateEvent};

/// What `apply` did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// First observation of the entity
    Inserted,
    /// State value changed
    Changed { previous: String },
    /// Same value, newer timestamp
    Refreshed,
    /// Older than, or identical to, what is cached
    Ignored,
}

impl ApplyResult {
    pub fn was_applied(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Entities whose cached state disagreed with the snapshot and was replaced
    pub overwritten: Vec<String>,
    /// Entities seen for the first time
    pub added: Vec<String>,
    /// Entities dropped after too many consecutive missing snapshots
    pub removed: Vec<String>,
    /// Entities missing from this snapshot but still retained
    pub missing: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.overwritten.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entities: HashMap<String, EntityState>,
    /// Consecutive reconciliations an entity was absent from
    missing_cycles: HashMap<String, u32>,
}

/// Single-writer, many-reader entity state cache.
///
/// Every method is synchronous and performs no I/O.
#[derive(Debug, Default)]
pub struct EntityStateCache {
    inner: RwLock<CacheInner>,
}

impl EntityStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Upsert an entity from a stream or catch-up event.
    ///
    /// `last_updated` always advances to the event timestamp; `last_changed`
    /// only moves when the value differs. Events older than the cached
    /// `last_updated`, and exact repeats, are ignored so that replayed
    /// history can never move timestamps backward.
    pub fn apply(&self, event: &StateEvent) -> ApplyResult {
        let mut guard = self.write();
        let inner = &mut *guard;
        inner.missing_cycles.remove(&event.entity_id);

        if !inner.entities.contains_key(&event.entity_id) {
            inner.entities.insert(
                event.entity_id.clone(),
                EntityState {
                    entity_id: event.entity_id.clone(),
                    state: event.state.clone(),
                    attributes: event.attributes.clone(),
                    last_changed: event.timestamp,
                    last_updated: event.timestamp,
                },
            );
            return ApplyResult::Inserted;
        }
        let Some(cached) = inner.entities.get_mut(&event.entity_id) else {
            return ApplyResult::Ignored;
        };

        if event.timestamp < cached.last_updated
            || (event.timestamp == cached.last_updated && event.state == cached.state)
        {
            return ApplyResult::Ignored;
        }

        cached.last_updated = event.timestamp;
        cached.attributes.clone_from(&event.attributes);
        if cached.state == event.state {
            ApplyResult::Refreshed
        } else {
            let previous = std::mem::replace(&mut cached.state, event.state.clone());
            cached.last_changed = event.timestamp;
            ApplyResult::Changed { previous }
        }
    }

    /// Replace the cache contents with a startup snapshot.
    ///
    /// The controller's own `last_changed` is kept so grace periods account
    /// for time spent in a bad state before the process started.
    pub fn seed(&self, states: Vec<EntityState>) {
        let mut inner = self.write();
        inner.missing_cycles.clear();
        inner.entities = states
            .into_iter()
            .map(|s| (s.entity_id.clone(), s))
            .collect();
    }

    /// Point lookup.
    pub fn snapshot(&self, entity_id: &str) -> Option<EntityState> {
        self.read().entities.get(entity_id).cloned()
    }

    /// Copy of every cached entity.
    pub fn all(&self) -> Vec<EntityState> {
        self.read().entities.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entities.is_empty()
    }

    /// Ids of every cached entity, sorted.
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().entities.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.read().entities.contains_key(entity_id)
    }

    /// Latest `last_updated` across all entities.
    pub fn latest_update(&self) -> Option<DateTime<Utc>> {
        self.read().entities.values().map(|e| e.last_updated).max()
    }

    /// Correct drift against a full controller snapshot fetched at `fetched_at`.
    ///
    /// A disagreeing entry is only overwritten when it was not updated after
    /// the snapshot was taken. Entities absent for `missing_limit`
    /// consecutive calls are removed and reported.
    pub fn reconcile(
        &self,
        snapshot: &[EntityState],
        fetched_at: DateTime<Utc>,
        missing_limit: u32,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut inner = self.write();
        let CacheInner {
            entities,
            missing_cycles,
        } = &mut *inner;

        let mut seen = std::collections::HashSet::with_capacity(snapshot.len());
        for fresh in snapshot {
            seen.insert(fresh.entity_id.as_str());
            missing_cycles.remove(&fresh.entity_id);

            match entities.get_mut(&fresh.entity_id) {
                None => {
                    entities.insert(fresh.entity_id.clone(), fresh.clone());
                    report.added.push(fresh.entity_id.clone());
                }
                Some(cached) if cached.state != fresh.state => {
                    if cached.last_updated < fetched_at {
                        debug!(
                            entity_id = %fresh.entity_id,
                            cached = %cached.state,
                            controller = %fresh.state,
                            "Reconciliation overwriting drifted entity"
                        );
                        cached.state.clone_from(&fresh.state);
                        cached.attributes.clone_from(&fresh.attributes);
                        cached.last_changed = cached.last_changed.max(fresh.last_changed);
                        cached.last_updated = cached.last_updated.max(fresh.last_updated);
                        report.overwritten.push(fresh.entity_id.clone());
                    }
                }
                Some(cached) => {
                    if fresh.last_updated > cached.last_updated {
                        cached.last_updated = fresh.last_updated;
                        cached.attributes.clone_from(&fresh.attributes);
                    }
                }
            }
        }

        let absent: Vec<String> = entities
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();
        for entity_id in absent {
            let cycles = missing_cycles.entry(entity_id.clone()).or_insert(0);
            *cycles += 1;
            if *cycles >= missing_limit {
                missing_cycles.remove(&entity_id);
                entities.remove(&entity_id);
                warn!(entity_id = %entity_id, cycles = missing_limit, "Entity missing from controller snapshots, removed from cache");
                report.removed.push(entity_id);
            } else {
                report.missing += 1;
            }
        }

        report
    }

    /// Drop an entity, e.g. when it is no longer monitored.
    pub fn remove(&self, entity_id: &str) -> Option<EntityState> {
        let mut inner = self.write();
        inner.missing_cycles.remove(entity_id);
        inner.entities.remove(entity_id)
    }
}
