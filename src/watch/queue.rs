//! Global rebuild queue.
//!
//! Jobs run strictly in submission order, one at a time. Each target key has
//! at most one scheduled job and at most one job in flight:
//!
//! ```text
//! Idle --submit--> Scheduled --next--> InFlight --complete--> Idle
//!                   |    ^                |
//!                   `----' submit         `--submit--> InFlight + Scheduled
//!                 (replace in place)
//! ```
//!
//! A submission for a key that is already scheduled merges into the
//! scheduled job: the job keeps the queue position of the first pending
//! submission and accumulates every submitted path.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use crate::build::{BuilderId, Invalidation};

/// One pending or running rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildJob {
    /// Target key
    pub target: BuilderId,
    /// Changed paths of the last submission for this slot
    pub invalidate: Invalidation,
    /// Changed paths of every submission merged into this slot
    pub changed: Invalidation,
    /// How many earlier submissions this job replaced
    pub replaced: usize,
    /// When the slot was first submitted
    pub queued_at: Instant,
}

impl RebuildJob {
    fn new(target: BuilderId, invalidate: Invalidation) -> Self {
        Self { target, changed: invalidate.clone(), invalidate, replaced: 0, queued_at: Instant::now() }
    }

    /// Invalidation set to pass to `build()`: every path changed since the
    /// slot was first submitted.
    pub fn build_hint(&self) -> Invalidation {
        self.changed.clone()
    }

    /// Whether this job absorbed earlier submissions.
    pub fn is_coalesced(&self) -> bool {
        self.replaced > 0
    }
}

/// What [`RebuildQueue::submit`] did with a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Appended to the end of the queue
    Queued,
    /// Replaced the key's scheduled job in place
    Replaced,
}

/// Lifecycle of one target key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Nothing scheduled or running
    Idle,
    /// Waiting in the queue
    Scheduled,
    /// Running, nothing queued behind it
    InFlight,
    /// Running, with a follow-up queued
    InFlightAndScheduled,
}

/// Counters since the queue was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Submissions accepted
    pub submitted: u64,
    /// Submissions that replaced a scheduled job
    pub replaced: u64,
    /// Jobs handed out by `next()`
    pub started: u64,
    /// Jobs marked complete
    pub completed: u64,
}

/// FIFO queue with per-key replacement coalescing and a single job in flight.
#[derive(Debug, Default)]
pub struct RebuildQueue {
    pending: IndexMap<BuilderId, RebuildJob>,
    in_flight: Option<BuilderId>,
    stats: QueueStats,
}

impl RebuildQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a rebuild of `target` for the changed paths in `invalidate`.
    pub fn submit(&mut self, target: BuilderId, invalidate: Invalidation) -> Submission {
        self.stats.submitted += 1;
        match self.pending.get_mut(&target) {
            Some(job) => {
                job.changed.extend(invalidate.iter().cloned());
                job.invalidate = invalidate;
                job.replaced += 1;
                self.stats.replaced += 1;
                tracing::debug!(target = %target, replaced = job.replaced, "coalesced rebuild");
                Submission::Replaced
            }
            None => {
                tracing::debug!(target = %target, position = self.pending.len(), "queued rebuild");
                self.pending.insert(target.clone(), RebuildJob::new(target, invalidate));
                Submission::Queued
            }
        }
    }

    /// Take the next job, or `None` when empty or a job is still in flight.
    pub fn next(&mut self) -> Option<RebuildJob> {
        if self.in_flight.is_some() {
            return None;
        }
        let (target, job) = self.pending.shift_remove_index(0)?;
        self.in_flight = Some(target);
        self.stats.started += 1;
        Some(job)
    }

    /// Mark the in-flight job for `target` finished.
    ///
    /// Returns `false` if `target` was not in flight.
    pub fn complete(&mut self, target: &BuilderId) -> bool {
        if self.in_flight.as_ref() != Some(target) {
            return false;
        }
        self.in_flight = None;
        self.stats.completed += 1;
        true
    }

    /// Current state of a key.
    pub fn state(&self, target: &BuilderId) -> JobState {
        let running = self.in_flight.as_ref() == Some(target);
        match (running, self.pending.contains_key(target)) {
            (false, false) => JobState::Idle,
            (false, true) => JobState::Scheduled,
            (true, false) => JobState::InFlight,
            (true, true) => JobState::InFlightAndScheduled,
        }
    }

    /// Whether a job for `target` is waiting (not yet started) and already
    /// covers every path in `paths`.
    pub fn covers(&self, target: &BuilderId, paths: &HashSet<PathBuf>) -> bool {
        self.pending.get(target).is_some_and(|job| paths.is_subset(&job.changed))
    }

    /// Key of the job in flight.
    pub fn in_flight(&self) -> Option<&BuilderId> {
        self.in_flight.as_ref()
    }

    /// Scheduled keys in execution order.
    pub fn pending(&self) -> impl Iterator<Item = &BuilderId> {
        self.pending.keys()
    }

    /// Whether `next()` would hand out a job.
    pub fn is_ready(&self) -> bool {
        self.in_flight.is_none() && !self.pending.is_empty()
    }

    /// Nothing scheduled and nothing running.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }

    /// Number of scheduled jobs.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no job is scheduled.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Counters.
    pub fn stats(&self) -> QueueStats {
        self.stats
    }
}
