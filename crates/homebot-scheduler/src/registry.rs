//! One pending task per owner.
//!
//! Tasks live in a [`DashMap`], so mutations for one owner serialize on that
//! key's shard while different owners proceed independently. A task removes
//! its own entry when it fires, which keeps the table bounded by the number
//! of pending tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::{Clock, OwnerId, TaskCallback, TaskHandle, TaskScheduler};

/// A pending callback for one owner.
#[derive(Debug)]
pub struct ScheduledTask {
    /// Registry-unique id; lets a firing task clear only its own entry.
    pub id: u64,
    pub owner: OwnerId,
    pub fire_at: DateTime<Utc>,
    handle: TaskHandle,
}

/// Tracks the single live task of each owner.
pub struct TaskRegistry {
    scheduler: Arc<dyn TaskScheduler>,
    clock: Arc<dyn Clock>,
    tasks: Arc<DashMap<OwnerId, ScheduledTask>>,
    next_id: AtomicU64,
}

impl TaskRegistry {
    pub fn new(scheduler: Arc<dyn TaskScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            scheduler,
            clock,
            tasks: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Schedule `callback` at `fire_at`, cancelling the owner's previous task.
    ///
    /// Returns the id of the new task.
    pub fn schedule_or_replace(
        &self,
        owner: OwnerId,
        fire_at: DateTime<Utc>,
        callback: TaskCallback,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delay = (fire_at - self.clock.now()).to_std().unwrap_or_default();

        let tasks = Arc::clone(&self.tasks);
        let on_fire: TaskCallback = Box::new(move || {
            tasks.remove_if(&owner, |_, task| task.id == id);
            callback()
        });

        // The entry guard holds the shard lock until the new task is stored.
        match self.tasks.entry(owner) {
            Entry::Occupied(mut occupied) => {
                let handle = self.scheduler.schedule(delay, on_fire);
                let previous = occupied.insert(ScheduledTask {
                    id,
                    owner,
                    fire_at,
                    handle,
                });
                previous.handle.cancel();
                debug!(
                    %owner,
                    %fire_at,
                    replaced = previous.id,
                    "replaced scheduled task"
                );
            }
            Entry::Vacant(vacant) => {
                let handle = self.scheduler.schedule(delay, on_fire);
                vacant.insert(ScheduledTask {
                    id,
                    owner,
                    fire_at,
                    handle,
                });
                debug!(%owner, %fire_at, "scheduled task");
            }
        }

        id
    }

    /// Cancel the owner's pending task. Returns whether there was one.
    pub fn cancel(&self, owner: OwnerId) -> bool {
        match self.tasks.remove(&owner) {
            Some((_, task)) => {
                task.handle.cancel();
                debug!(%owner, task = task.id, "cancelled scheduled task");
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let owners: Vec<OwnerId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        owners.into_iter().filter(|owner| self.cancel(*owner)).count()
    }

    /// Fire instant of the owner's pending task, if any.
    pub fn pending(&self, owner: OwnerId) -> Option<DateTime<Utc>> {
        self.tasks
            .get(&owner)
            .filter(|task| !task.handle.is_done())
            .map(|task| task.fire_at)
    }

    /// Id of the owner's pending task, if any.
    pub fn pending_id(&self, owner: OwnerId) -> Option<u64> {
        self.tasks
            .get(&owner)
            .filter(|task| !task.handle.is_done())
            .map(|task| task.id)
    }

    /// Number of owners with a pending task.
    pub fn pending_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| !task.handle.is_done())
            .count()
    }
}
