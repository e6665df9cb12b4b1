//! In-memory data managers with per-command compensation.
//!
//! One `MemoryDataManager<T>` holds the live map for one entity type. Writes
//! go straight into the live map (visible to other threads immediately), and
//! the manager records enough in a per-command log to undo inserts and
//! deletes if the command fails. Updates overwrite in place and are not
//! logged; a failed command keeps updated values (see `update`).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;
use uuid::Uuid;

use crate::error::CmmnError;
use crate::store::{CommandContext, CommandOutcome, CommandParticipant, Entity, IdGenerator};

// ─── Compensation log ─────────────────────────────────────────

/// What one command changed in one manager. Enough to undo inserts and
/// deletes; nothing else.
struct CompensationLog<T> {
    inserted: HashMap<String, T>,
    deleted: HashMap<String, T>,
}

impl<T> Default for CompensationLog<T> {
    fn default() -> Self {
        Self {
            inserted: HashMap::new(),
            deleted: HashMap::new(),
        }
    }
}

// ─── Manager ──────────────────────────────────────────────────

struct StoreInner<T: Entity> {
    object_type: &'static str,
    live: RwLock<HashMap<String, T>>,
    /// Per-command compensation logs, keyed by command id.
    logs: RwLock<HashMap<Uuid, CompensationLog<T>>>,
    insert_count: AtomicU64,
}

/// Keyed in-memory store for one entity type. Cheap to clone — clones share
/// the same underlying map.
pub struct MemoryDataManager<T: Entity> {
    inner: Arc<StoreInner<T>>,
    id_generator: Arc<dyn IdGenerator>,
}

impl<T: Entity> Clone for MemoryDataManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            id_generator: self.id_generator.clone(),
        }
    }
}

impl<T: Entity> MemoryDataManager<T> {
    pub fn new(object_type: &'static str, id_generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                object_type,
                live: RwLock::new(HashMap::new()),
                logs: RwLock::new(HashMap::new()),
                insert_count: AtomicU64::new(0),
            }),
            id_generator,
        }
    }

    pub fn object_type(&self) -> &'static str {
        self.inner.object_type
    }

    /// Inserts with compensation tracking. An empty id is replaced by a
    /// generated one; a colliding id is rejected rather than overwritten.
    pub fn insert(&self, ctx: &CommandContext, entity: T) -> Result<T, CmmnError> {
        self.insert_with_tracking(ctx, entity, true)
    }

    /// Insert variant used where the caller manages compensation itself
    /// (`tracked = false` skips the command log, never the live map).
    pub fn insert_with_tracking(
        &self,
        ctx: &CommandContext,
        mut entity: T,
        tracked: bool,
    ) -> Result<T, CmmnError> {
        if entity.id().is_empty() {
            entity.set_id(self.id_generator.next_id());
        }
        let id = entity.id().to_string();
        {
            let mut live = self.write_live();
            if live.contains_key(&id) {
                return Err(CmmnError::IllegalState(format!(
                    "{} with id '{}' already exists",
                    self.inner.object_type, id
                )));
            }
            live.insert(id.clone(), entity.clone());
        }
        self.inner.insert_count.fetch_add(1, AtomicOrdering::SeqCst);
        if tracked {
            self.log_mut(ctx, |log| {
                log.inserted.insert(id.clone(), entity.clone());
            });
            self.enlist(ctx);
        }
        debug!(object_type = self.inner.object_type, id = %id, tracked, "inserted");
        Ok(entity)
    }

    /// Overwrites an existing entity and bumps its revision.
    ///
    /// Updates are not recorded in the compensation log: if the command
    /// later fails, inserts and deletes are undone but updated values stay.
    /// Restoring prior images would need copy-on-write snapshots here.
    pub fn update(&self, _ctx: &CommandContext, mut entity: T) -> Result<T, CmmnError> {
        if entity.id().is_empty() {
            return Err(CmmnError::IllegalState(format!(
                "cannot update a {} that has no id",
                self.inner.object_type
            )));
        }
        let id = entity.id().to_string();
        let mut live = self.write_live();
        if !live.contains_key(&id) {
            return Err(CmmnError::not_found(self.inner.object_type, id));
        }
        entity.bump_revision();
        live.insert(id.clone(), entity.clone());
        debug!(object_type = self.inner.object_type, id = %id, revision = entity.revision(), "updated");
        Ok(entity)
    }

    /// Removes by id. The removed entity is flagged deleted and kept in the
    /// command log, so the same command can still find it and a failed
    /// command restores it.
    pub fn delete(&self, ctx: &CommandContext, id: &str) -> Result<(), CmmnError> {
        let mut removed = {
            let mut live = self.write_live();
            live.remove(id)
                .ok_or_else(|| CmmnError::not_found(self.inner.object_type, id))?
        };
        removed.set_deleted(true);
        self.log_mut(ctx, |log| {
            log.deleted.insert(id.to_string(), removed);
        });
        self.enlist(ctx);
        debug!(object_type = self.inner.object_type, id = %id, "deleted");
        Ok(())
    }

    pub fn delete_entity(&self, ctx: &CommandContext, entity: &T) -> Result<(), CmmnError> {
        self.delete(ctx, entity.id())
    }

    /// Lookup order: live map, then this command's delete log (a deleted
    /// entity stays findable until the command ends), then its insert log.
    pub fn find_by_id(&self, ctx: &CommandContext, id: &str) -> Option<T> {
        if let Some(entity) = self.read_live().get(id) {
            return Some(entity.clone());
        }
        let logs = self.read_logs();
        let log = logs.get(&ctx.command_id())?;
        log.deleted
            .get(id)
            .or_else(|| log.inserted.get(id))
            .cloned()
    }

    /// Like `find_by_id` but with the typed not-found error.
    pub fn get_by_id(&self, ctx: &CommandContext, id: &str) -> Result<T, CmmnError> {
        self.find_by_id(ctx, id)
            .ok_or_else(|| CmmnError::not_found(self.inner.object_type, id))
    }

    /// Snapshot of the live map values.
    pub fn find_all(&self) -> Vec<T> {
        self.read_live().values().cloned().collect()
    }

    pub fn find_by(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.read_live()
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.read_live().len()
    }

    /// Total inserts since construction (tracked and untracked).
    pub fn insert_count(&self) -> u64 {
        self.inner.insert_count.load(AtomicOrdering::SeqCst)
    }

    fn enlist(&self, ctx: &CommandContext) {
        ctx.enlist(self.inner.clone());
    }

    fn log_mut(&self, ctx: &CommandContext, f: impl FnOnce(&mut CompensationLog<T>)) {
        let mut logs = self
            .inner
            .logs
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(logs.entry(ctx.command_id()).or_default());
    }

    // Lock poisoning only follows a panic in another command; the data is
    // plain entity values, so recovering the inner state is sound.
    fn read_live(&self) -> RwLockReadGuard<'_, HashMap<String, T>> {
        self.inner.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_live(&self) -> RwLockWriteGuard<'_, HashMap<String, T>> {
        self.inner.live.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_logs(&self) -> RwLockReadGuard<'_, HashMap<Uuid, CompensationLog<T>>> {
        self.inner.logs.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Entity> CommandParticipant for StoreInner<T> {
    /// Close event: on failure, restore deletes first and then drop inserts,
    /// so an entity inserted and deleted in the same command nets to absent.
    fn command_closed(&self, command_id: Uuid, outcome: CommandOutcome) {
        let log = {
            let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
            logs.remove(&command_id)
        };
        let Some(log) = log else { return };
        if outcome == CommandOutcome::Failure {
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            for (id, mut entity) in log.deleted {
                entity.set_deleted(false);
                live.insert(id, entity);
            }
            for id in log.inserted.keys() {
                live.remove(id);
            }
            debug!(object_type = self.object_type, command_id = %command_id, "compensated failed command");
        }
    }
}

// ─── Sorting and pagination ───────────────────────────────────

/// Sorts (when a comparator is given) and applies offset/limit.
///
/// A negative offset or limit disables pagination and returns the full
/// sorted list. An offset at or past the end yields an empty list; the end
/// index is clamped to the list length.
pub fn sort_and_paginate<T>(
    mut items: Vec<T>,
    comparator: Option<&(dyn Fn(&T, &T) -> Ordering + Send + Sync)>,
    offset: i32,
    limit: i32,
) -> Vec<T> {
    if let Some(cmp) = comparator {
        items.sort_by(|a, b| cmp(a, b));
    }
    if offset < 0 || limit < 0 {
        return items;
    }
    let offset = offset as usize;
    if offset >= items.len() {
        return Vec::new();
    }
    let end = offset.saturating_add(limit as usize).min(items.len());
    items.drain(..offset);
    items.truncate(end - offset);
    items
}
