//! Per-sink, per-phase submission bookkeeping
//!
//! Each (sink, phase) pair owns one [`QueueStatus`] behind its own mutex. The
//! registry map itself is read-mostly: entries are added the first time a sink
//! is seen and never removed while the process runs.

use crate::domain::{QueuePhase, SinkId};
use crate::error::Result;
use crate::port::StatusCount;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::task::JoinHandle;

/// How chunks reach a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitMode {
    /// Chunks are sent the moment they become ready
    #[default]
    Direct,
    /// Only the periodic sweep sends
    Bulk,
    /// Sweeps continue until the backlog stays empty
    TransitionToDirect,
}

impl SubmitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitMode::Direct => "DIRECT",
            SubmitMode::Bulk => "BULK",
            SubmitMode::TransitionToDirect => "TRANSITION_TO_DIRECT",
        }
    }
}

impl fmt::Display for SubmitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a finished sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepResult {
    Pushed(u64),
    Failed,
}

/// Handle of a sweep running on the pool
pub type SweepHandle = JoinHandle<Result<u64>>;

/// Counters and mode of one (sink, phase)
#[derive(Debug, Default)]
pub struct QueueStatus {
    /// Rows in the phase's READY status
    pub ready_for_queue: u64,
    /// Messages sent (or reserved) and not yet confirmed
    pub jms_enqueued: u64,
    pub mode: SubmitMode,
    pub clean_sweeps: u32,
    pub pending_sweep: Option<SweepHandle>,
}

impl QueueStatus {
    /// Fold a harvested sweep into the mode. Returns true when the entry is
    /// DIRECT afterwards and no new sweep should be launched.
    pub fn advance(
        &mut self,
        harvested: Option<SweepResult>,
        queue_capacity: u64,
        clean_sweeps_to_direct: u32,
    ) -> bool {
        if self.mode == SubmitMode::TransitionToDirect {
            match harvested {
                Some(SweepResult::Pushed(0)) => self.clean_sweeps += 1,
                Some(_) => self.clean_sweeps = 0,
                None => {}
            }
            if self.clean_sweeps >= clean_sweeps_to_direct && self.ready_for_queue == 0 {
                self.mode = SubmitMode::Direct;
                self.clean_sweeps = 0;
                return true;
            }
        }
        if self.mode == SubmitMode::Bulk
            && below_transition_threshold(self.ready_for_queue, queue_capacity)
        {
            self.mode = SubmitMode::TransitionToDirect;
            self.clean_sweeps = 0;
        }
        false
    }

    pub fn space(&self, capacity: u64) -> u64 {
        capacity.saturating_sub(self.jms_enqueued)
    }
}

/// BULK starts moving back to DIRECT once the ready backlog drops under a
/// third of the queue capacity. An empty backlog always qualifies.
pub fn below_transition_threshold(ready_for_queue: u64, queue_capacity: u64) -> bool {
    ready_for_queue == 0 || ready_for_queue.saturating_mul(3) < queue_capacity
}

/// Outcome of a direct-mode slot reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    /// Entry is not DIRECT; the sweep owns submission
    NotDirect,
    /// Cap reached; the entry was switched to BULK
    AtCapacity,
}

/// Point-in-time view of one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusSnapshot {
    pub sink_id: SinkId,
    pub phase: QueuePhase,
    pub ready_for_queue: u64,
    pub jms_enqueued: u64,
    pub mode: SubmitMode,
    pub clean_sweeps: u32,
    pub sweep_pending: bool,
}

type Entry = Arc<Mutex<QueueStatus>>;

/// Injected registry of every (sink, phase) entry
pub struct QueueStatusRegistry {
    capacity: u64,
    entries: RwLock<HashMap<(SinkId, QueuePhase), Entry>>,
}

fn lock(entry: &Entry) -> MutexGuard<'_, QueueStatus> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueueStatusRegistry {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Entry for (sink, phase), created DIRECT on first use
    pub fn entry(&self, sink_id: SinkId, phase: QueuePhase) -> Entry {
        let key = (sink_id, phase);
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key).or_default())
    }

    pub fn keys(&self) -> Vec<(SinkId, QueuePhase)> {
        let mut keys: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        keys.sort();
        keys
    }

    /// Reserve a slot for a direct send
    pub fn try_reserve(&self, sink_id: SinkId, phase: QueuePhase) -> Reservation {
        let entry = self.entry(sink_id, phase);
        let mut status = lock(&entry);
        if status.mode != SubmitMode::Direct {
            return Reservation::NotDirect;
        }
        if status.jms_enqueued >= self.capacity {
            status.mode = SubmitMode::Bulk;
            status.clean_sweeps = 0;
            return Reservation::AtCapacity;
        }
        status.jms_enqueued += 1;
        Reservation::Reserved
    }

    /// Reserve a slot for a sweep send (mode is not checked)
    pub fn reserve_for_sweep(&self, sink_id: SinkId, phase: QueuePhase) -> bool {
        let entry = self.entry(sink_id, phase);
        let mut status = lock(&entry);
        if status.jms_enqueued >= self.capacity {
            return false;
        }
        status.jms_enqueued += 1;
        true
    }

    /// Give back a slot: lost race, failed send or confirmed completion
    pub fn release(&self, sink_id: SinkId, phase: QueuePhase) {
        let entry = self.entry(sink_id, phase);
        let mut status = lock(&entry);
        status.jms_enqueued = status.jms_enqueued.saturating_sub(1);
    }

    pub fn ready_incr(&self, sink_id: SinkId, phase: QueuePhase) {
        let entry = self.entry(sink_id, phase);
        lock(&entry).ready_for_queue += 1;
    }

    pub fn ready_decr(&self, sink_id: SinkId, phase: QueuePhase) {
        let entry = self.entry(sink_id, phase);
        let mut status = lock(&entry);
        status.ready_for_queue = status.ready_for_queue.saturating_sub(1);
    }

    pub fn force_bulk(&self, sink_id: SinkId, phase: QueuePhase) {
        let entry = self.entry(sink_id, phase);
        let mut status = lock(&entry);
        status.mode = SubmitMode::Bulk;
        status.clean_sweeps = 0;
    }

    pub fn mode(&self, sink_id: SinkId, phase: QueuePhase) -> SubmitMode {
        lock(&self.entry(sink_id, phase)).mode
    }

    pub fn snapshot(&self) -> Vec<QueueStatusSnapshot> {
        self.keys()
            .into_iter()
            .map(|(sink_id, phase)| {
                let entry = self.entry(sink_id, phase);
                let status = lock(&entry);
                QueueStatusSnapshot {
                    sink_id,
                    phase,
                    ready_for_queue: status.ready_for_queue,
                    jms_enqueued: status.jms_enqueued,
                    mode: status.mode,
                    clean_sweeps: status.clean_sweeps,
                    sweep_pending: status.pending_sweep.is_some(),
                }
            })
            .collect()
    }

    /// Rebuild counters from persisted row counts. Entries with a ready
    /// backlog start in BULK so the sweep drains them.
    pub fn restore(&self, counts: &[StatusCount]) {
        for count in counts {
            let Some(phase) = QueuePhase::of_status(count.status) else {
                continue;
            };
            let n = u64::try_from(count.count).unwrap_or(0);
            let entry = self.entry(count.sink_id, phase);
            let mut status = lock(&entry);
            if count.status == phase.ready_status() {
                status.ready_for_queue = n;
            } else {
                status.jms_enqueued = n;
            }
        }
        for (sink_id, phase) in self.keys() {
            let entry = self.entry(sink_id, phase);
            let mut status = lock(&entry);
            status.mode = if status.ready_for_queue > 0 {
                SubmitMode::Bulk
            } else {
                SubmitMode::Direct
            };
            status.clean_sweeps = 0;
        }
    }
}
