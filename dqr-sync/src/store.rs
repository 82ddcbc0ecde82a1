//! File record store
//!
//! Owns the three review queues. All writes go through `replace_queue*`,
//! `move_record` and the optimistic pair `begin_optimistic` /
//! `revert_optimistic`; each runs under a single write lock with no
//! suspension inside, so observers never see a half-applied change.
//!
//! Snapshot ordering uses ticks from a shared monotonic clock. Refresh
//! requests and optimistic moves both draw ticks from it, which lets a
//! replacement tell whether its data predates a local action (the action
//! survives) or was requested after it (the snapshot wins).
//!
//! A guard outlives a successful remote call only while some fetch issued
//! before the move is still outstanding; once those settle it is dropped.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use dqr_common::events::{EventBus, ReviewEvent};
use dqr_common::{FileRecord, QueueName, RecordPatch};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// One queue: insertion-ordered records plus an id index
#[derive(Debug, Default)]
struct QueueSlot {
    records: Vec<FileRecord>,
    index: HashMap<String, usize>,
    /// Bumped on every change to this queue
    revision: u64,
    /// Bumped on every authoritative replacement of this queue
    epoch: u64,
}

impl QueueSlot {
    fn contains(&self, object_id: &str) -> bool {
        self.index.contains_key(object_id)
    }

    fn take(&mut self, object_id: &str) -> Option<FileRecord> {
        let pos = self.index.remove(object_id)?;
        let record = self.records.remove(pos);
        for (i, r) in self.records.iter().enumerate().skip(pos) {
            self.index.insert(r.object_id.clone(), i);
        }
        Some(record)
    }

    /// Append, or overwrite in place if the id is already present
    fn append(&mut self, record: FileRecord) {
        match self.index.get(&record.object_id) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.index.insert(record.object_id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Drop every record whose id satisfies `claimed`; returns the dropped ids
    fn evict(&mut self, claimed: impl Fn(&str) -> bool) -> Vec<String> {
        let mut evicted = Vec::new();
        self.records.retain(|r| {
            if claimed(&r.object_id) {
                evicted.push(r.object_id.clone());
                false
            } else {
                true
            }
        });
        if !evicted.is_empty() {
            self.reindex();
        }
        evicted
    }

    fn reindex(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.object_id.clone(), i))
            .collect();
    }
}

/// Local action protected from snapshots that were requested before it
#[derive(Debug, Clone)]
struct OptimisticGuard {
    mutation_id: Uuid,
    origin: QueueName,
    target: QueueName,
    /// Record as placed into `target`
    placed: FileRecord,
    /// Record as it was in `origin`, for exact revert
    original: FileRecord,
    submitted_tick: u64,
    /// Remote accepted the action
    confirmed: bool,
}

#[derive(Debug, Default)]
struct QueueSet {
    slots: [QueueSlot; 3],
    guards: HashMap<String, OptimisticGuard>,
    /// Ticks of fetches issued but not yet settled
    outstanding: BTreeSet<u64>,
}

impl QueueSet {
    fn slot(&self, queue: QueueName) -> &QueueSlot {
        &self.slots[queue.index()]
    }

    fn slot_mut(&mut self, queue: QueueName) -> &mut QueueSlot {
        &mut self.slots[queue.index()]
    }

    fn move_record(
        &mut self,
        object_id: &str,
        from: QueueName,
        to: QueueName,
        patch: &RecordPatch,
    ) -> Result<FileRecord> {
        let previous = self
            .slot_mut(from)
            .take(object_id)
            .ok_or_else(|| Error::StaleTarget {
                object_id: object_id.to_string(),
                expected: from,
            })?;

        let mut record = previous.clone();
        patch.apply(&mut record);
        self.slot_mut(to).append(record);

        self.slot_mut(from).revision += 1;
        self.slot_mut(to).revision += 1;
        Ok(previous)
    }

    /// Drop confirmed guards no outstanding fetch predates
    fn prune_confirmed(&mut self) -> usize {
        let oldest = self.outstanding.iter().next().copied();
        let before = self.guards.len();
        self.guards.retain(|_, guard| {
            !guard.confirmed || oldest.map(|t| t < guard.submitted_tick).unwrap_or(false)
        });
        before - self.guards.len()
    }
}

/// An issued fetch; settles when dropped, whatever became of the response
pub struct FetchTicket<'a> {
    store: &'a RecordStore,
    tick: u64,
}

impl FetchTicket<'_> {
    pub fn tick(&self) -> u64 {
        self.tick
    }
}

impl Drop for FetchTicket<'_> {
    fn drop(&mut self) {
        let mut set = self.store.write();
        set.outstanding.remove(&self.tick);
        let dropped = set.prune_confirmed();
        if dropped > 0 {
            debug!(tick = self.tick, dropped, "Released confirmed optimistic guards");
        }
    }
}

/// Result of an authoritative queue replacement
#[derive(Debug, Clone, Default)]
pub struct Replacement {
    pub queue: Option<QueueName>,
    /// Records in the queue after the swap
    pub record_count: usize,
    /// Records removed from other queues because this snapshot claims them
    pub evicted: Vec<(QueueName, String)>,
    /// Optimistic actions this snapshot overrode
    pub superseded: Vec<Uuid>,
    /// Records kept at their optimistic placement because the snapshot predates the action
    pub preserved: Vec<String>,
}

/// Result of an optimistic move
#[derive(Debug, Clone)]
pub struct OptimisticMove {
    /// Record as it was before the move
    pub previous: FileRecord,
    /// Clock tick the action was stamped with
    pub tick: u64,
}

/// What `revert_optimistic` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    /// Record moved back to its origin queue with its original attributes
    Reverted,
    /// A newer snapshot already placed the record; nothing changed
    Superseded,
    /// Guard was live but the record had left the target queue
    Missing,
}

/// Canonical per-queue collections of file records
pub struct RecordStore {
    inner: RwLock<QueueSet>,
    clock: AtomicU64,
    events: EventBus,
}

impl RecordStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: RwLock::new(QueueSet::default()),
            clock: AtomicU64::new(0),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, QueueSet> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, QueueSet> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Next tick of the shared ordering clock (strictly increasing, starts at 1)
    pub fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stamp a fetch about to be sent; confirmed guards it predates are
    /// kept until the returned ticket is dropped
    pub fn issue_fetch(&self) -> FetchTicket<'_> {
        let mut set = self.write();
        let tick = self.next_tick();
        set.outstanding.insert(tick);
        FetchTicket { store: self, tick }
    }

    /// Replace a queue with a snapshot that is authoritative as of now
    pub fn replace_queue(&self, queue: QueueName, records: Vec<FileRecord>) -> Replacement {
        let issued = self.next_tick();
        self.replace_queue_issued(queue, records, issued)
    }

    /// Replace a queue with a snapshot whose request was issued at tick `issued`
    ///
    /// The swap is atomic. Ids in the snapshot are evicted from the other two
    /// queues. Duplicate ids inside the snapshot collapse to the last
    /// occurrence at the first occurrence's position.
    pub fn replace_queue_issued(
        &self,
        queue: QueueName,
        records: Vec<FileRecord>,
        issued: u64,
    ) -> Replacement {
        let mut records = records;
        let mut superseded = Vec::new();
        let mut preserved = Vec::new();

        let mut set = self.write();

        // Snapshot requested after the action: authoritative for that record
        set.guards.retain(|object_id, guard| {
            let newer = issued > guard.submitted_tick;
            let relevant = queue == guard.origin
                || queue == guard.target
                || records.iter().any(|r| &r.object_id == object_id);
            if newer && relevant {
                superseded.push(guard.mutation_id);
                false
            } else {
                true
            }
        });

        // Snapshot requested before the action: keep the local placement
        for (object_id, guard) in &set.guards {
            if guard.submitted_tick < issued {
                continue;
            }
            if queue == guard.target {
                if !records.iter().any(|r| &r.object_id == object_id) {
                    records.push(guard.placed.clone());
                    preserved.push(object_id.clone());
                }
            } else {
                let before = records.len();
                records.retain(|r| &r.object_id != object_id);
                if records.len() != before {
                    preserved.push(object_id.clone());
                }
            }
        }

        let mut slot = QueueSlot::default();
        for record in records {
            slot.append(record);
        }

        let mut evicted = Vec::new();
        for other in QueueName::ALL.into_iter().filter(|q| *q != queue) {
            let other_slot = set.slot_mut(other);
            let dropped = other_slot.evict(|id| slot.contains(id));
            if !dropped.is_empty() {
                other_slot.revision += 1;
                evicted.extend(dropped.into_iter().map(|id| (other, id)));
            }
        }

        let old = set.slot(queue);
        slot.revision = old.revision + 1;
        slot.epoch = old.epoch + 1;
        let record_count = slot.records.len();
        *set.slot_mut(queue) = slot;
        drop(set);

        let mut evicted_from: Vec<QueueName> = evicted.iter().map(|(q, _)| *q).collect();
        evicted_from.dedup();
        debug!(
            queue = %queue,
            records = record_count,
            evicted = evicted.len(),
            superseded = superseded.len(),
            preserved = preserved.len(),
            "Queue replaced"
        );
        self.events.emit_lossy(ReviewEvent::QueueReplaced {
            queue,
            record_count,
            evicted_from,
            timestamp: Utc::now(),
        });

        Replacement {
            queue: Some(queue),
            record_count,
            evicted,
            superseded,
            preserved,
        }
    }

    /// Move a record between queues, merging `patch` into it
    ///
    /// Returns the record as it was before the move, or `StaleTarget` (with
    /// no state change) when the record is not in `from`.
    pub fn move_record(
        &self,
        object_id: &str,
        from: QueueName,
        to: QueueName,
        patch: &RecordPatch,
    ) -> Result<FileRecord> {
        if from == to {
            return Err(Error::Validation(format!(
                "cannot move {} from {} to itself",
                object_id, from
            )));
        }

        let previous = self.write().move_record(object_id, from, to, patch)?;
        self.emit_moved(object_id, from, to);
        Ok(previous)
    }

    /// Optimistic move that later snapshots predating it cannot undo
    pub fn begin_optimistic(
        &self,
        mutation_id: Uuid,
        object_id: &str,
        from: QueueName,
        to: QueueName,
        patch: &RecordPatch,
    ) -> Result<OptimisticMove> {
        if from == to {
            return Err(Error::Validation(format!(
                "cannot move {} from {} to itself",
                object_id, from
            )));
        }

        let mut set = self.write();
        let previous = set.move_record(object_id, from, to, patch)?;
        let tick = self.next_tick();

        let mut placed = previous.clone();
        patch.apply(&mut placed);
        set.guards.insert(
            object_id.to_string(),
            OptimisticGuard {
                mutation_id,
                origin: from,
                target: to,
                placed,
                original: previous.clone(),
                submitted_tick: tick,
                confirmed: false,
            },
        );
        drop(set);

        self.emit_moved(object_id, from, to);
        Ok(OptimisticMove { previous, tick })
    }

    /// Undo an optimistic move unless a newer snapshot already superseded it
    pub fn revert_optimistic(&self, object_id: &str, mutation_id: Uuid) -> RevertOutcome {
        let mut set = self.write();
        let guard = match set.guards.remove(object_id) {
            Some(guard) if guard.mutation_id == mutation_id => guard,
            Some(other) => {
                set.guards.insert(object_id.to_string(), other);
                return RevertOutcome::Superseded;
            }
            None => return RevertOutcome::Superseded,
        };

        let patch = RecordPatch::restore(&guard.original);
        match set.move_record(object_id, guard.target, guard.origin, &patch) {
            Ok(_) => {
                drop(set);
                self.emit_moved(object_id, guard.target, guard.origin);
                RevertOutcome::Reverted
            }
            Err(_) => RevertOutcome::Missing,
        }
    }

    /// Mark the optimistic action as accepted by the remote
    ///
    /// The guard is released at once unless a fetch issued before the move
    /// is still outstanding.
    pub fn confirm_optimistic(&self, object_id: &str, mutation_id: Uuid) {
        let mut set = self.write();
        if let Some(guard) = set.guards.get_mut(object_id) {
            if guard.mutation_id == mutation_id {
                guard.confirmed = true;
            }
        }
        set.prune_confirmed();
    }

    /// Optimistic actions currently shielded from older snapshots
    pub fn guard_count(&self) -> usize {
        self.read().guards.len()
    }

    /// Whether the optimistic action `mutation_id` still governs `object_id`
    pub fn is_guarded(&self, object_id: &str, mutation_id: Uuid) -> bool {
        self.read()
            .guards
            .get(object_id)
            .map(|g| g.mutation_id == mutation_id)
            .unwrap_or(false)
    }

    fn emit_moved(&self, object_id: &str, from: QueueName, to: QueueName) {
        debug!(object_id = %object_id, from = %from, to = %to, "Record moved");
        self.events.emit_lossy(ReviewEvent::RecordMoved {
            object_id: object_id.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        });
    }

    /// Clone of a queue's records in order
    pub fn snapshot(&self, queue: QueueName) -> Vec<FileRecord> {
        self.read().slot(queue).records.clone()
    }

    /// Run `f` over a queue's revision and records under one read lock
    pub fn with_queue<R>(&self, queue: QueueName, f: impl FnOnce(u64, &[FileRecord]) -> R) -> R {
        let set = self.read();
        let slot = set.slot(queue);
        f(slot.revision, &slot.records)
    }

    /// Queue currently holding `object_id`
    pub fn locate(&self, object_id: &str) -> Option<QueueName> {
        let set = self.read();
        QueueName::ALL
            .into_iter()
            .find(|q| set.slot(*q).contains(object_id))
    }

    pub fn get(&self, object_id: &str) -> Option<(QueueName, FileRecord)> {
        let set = self.read();
        QueueName::ALL.into_iter().find_map(|q| {
            let slot = set.slot(q);
            slot.index
                .get(object_id)
                .map(|&pos| (q, slot.records[pos].clone()))
        })
    }

    pub fn revision(&self, queue: QueueName) -> u64 {
        self.read().slot(queue).revision
    }

    pub fn epoch(&self, queue: QueueName) -> u64 {
        self.read().slot(queue).epoch
    }

    pub fn len(&self, queue: QueueName) -> usize {
        self.read().slot(queue).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().slots.iter().all(|s| s.records.is_empty())
    }

    /// Record counts in `QueueName::ALL` order
    pub fn counts(&self) -> [usize; 3] {
        let set = self.read();
        [
            set.slots[0].records.len(),
            set.slots[1].records.len(),
            set.slots[2].records.len(),
        ]
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}
