//! Shared priority queue feeding the worker pool.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::job::{JobPriority, WorkerJob};

/// Ordering key: higher tier first, then submission order within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKey {
    pub priority: JobPriority,
    pub sequence: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Entry {
    job: WorkerJob,
    /// Held back until this instant (requeue after a circuit-open rejection).
    not_before: Option<Instant>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<QueueKey, Entry>,
    next_sequence: u64,
    closed: bool,
}

#[derive(Default)]
pub struct JobQueue {
    state: Mutex<State>,
    ready: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job queue lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn push(&self, job: WorkerJob) -> QueueKey {
        self.insert(job, None)
    }

    /// Queues a job that may not be claimed before `delay` has passed.
    pub fn push_delayed(&self, job: WorkerJob, delay: Duration) -> QueueKey {
        self.insert(job, Some(Instant::now() + delay))
    }

    fn insert(&self, job: WorkerJob, not_before: Option<Instant>) -> QueueKey {
        let mut state = self.lock();
        let key = QueueKey {
            priority: job.priority,
            sequence: state.next_sequence,
        };
        state.next_sequence += 1;
        state.entries.insert(key, Entry { job, not_before });
        drop(state);
        self.ready.notify_one();
        key
    }

    /// Takes the first claimable job, waiting up to `timeout` for one.
    /// Returns `None` on timeout or once the queue is closed.
    pub fn claim(&self, timeout: Duration) -> Option<WorkerJob> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            let now = Instant::now();
            let ready_key = state
                .entries
                .iter()
                .find(|(_, e)| e.not_before.map_or(true, |t| t <= now))
                .map(|(k, _)| *k);
            if let Some(key) = ready_key {
                return state.entries.remove(&key).map(|e| e.job);
            }
            if now >= deadline {
                return None;
            }

            // Wake for the earliest held-back entry or the caller's deadline.
            let wake_at = state
                .entries
                .values()
                .filter_map(|e| e.not_before)
                .min()
                .map_or(deadline, |t| t.min(deadline));
            let wait = wake_at.saturating_duration_since(now);
            state = match self.ready.wait_timeout(state, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes every waiting worker; further claims return `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
