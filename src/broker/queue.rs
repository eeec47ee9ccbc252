use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use crate::broker::client::ClientId;
use crate::broker::job::{Job, JobId, Priority};

/// Heap entry for a pending job. Ordered so the max-heap yields the highest
/// priority first and, within a priority tier, the smallest id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    pub priority: Priority,
    pub id: JobId,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A named queue: a heap of pending job entries plus a FIFO of blocked
/// clients. Created lazily on first reference, never destroyed.
///
/// The heap holds `(priority, id)` entries only. Deleting a job leaves its
/// entry behind as a tombstone; `peek_live` discards tombstones as they
/// surface by checking ids against the job table.
#[derive(Debug, Default)]
pub struct Queue {
    pub name: String,
    pending: BinaryHeap<PendingEntry>,
    waiting: VecDeque<ClientId>,
}

impl Queue {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn push_pending(&mut self, priority: Priority, id: JobId) {
        self.pending.push(PendingEntry { priority, id });
    }

    /// Top live pending entry, discarding stale entries that surface.
    pub fn peek_live(&mut self, jobs: &HashMap<JobId, Job>) -> Option<PendingEntry> {
        while let Some(top) = self.pending.peek() {
            if jobs.contains_key(&top.id) {
                return Some(*top);
            }
            self.pending.pop();
        }
        None
    }

    /// Remove the top entry. Callers peek first, so the top is live.
    pub fn pop_top(&mut self) -> Option<PendingEntry> {
        self.pending.pop()
    }

    pub fn push_waiter(&mut self, client: ClientId) {
        self.waiting.push_back(client);
    }

    pub fn front_waiter(&self) -> Option<ClientId> {
        self.waiting.front().copied()
    }

    pub fn pop_front_waiter(&mut self) -> Option<ClientId> {
        self.waiting.pop_front()
    }

    /// Remove every waiter-list occurrence of `client` (a get may name the
    /// same queue more than once).
    pub fn remove_waiter(&mut self, client: ClientId) {
        self.waiting.retain(|&waiting| waiting != client);
    }

    /// Ids of live pending entries, tombstones filtered out.
    pub fn live_pending(&self, jobs: &HashMap<JobId, Job>) -> Vec<JobId> {
        self.pending
            .iter()
            .filter(|entry| jobs.contains_key(&entry.id))
            .map(|entry| entry.id)
            .collect()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }
}
