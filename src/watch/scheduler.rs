//! Rebuild scheduler: turns file changes into rebuild jobs.
//!
//! The scheduler owns the two pieces of process-wide mutable state, the
//! [`DependencyIndex`] and the [`RebuildQueue`], behind one mutex. Change
//! notifications may arrive from any thread; jobs run either synchronously
//! through [`Scheduler::drain`] or on a runner thread started by
//! [`Scheduler::spawn`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::build::{paths, BuildError, Builder, BuilderId, ResourceSet, TransformCache};
use crate::watch::index::DependencyIndex;
use crate::watch::queue::{QueueStats, RebuildJob, RebuildQueue};
use crate::watch::WatchError;

/// Kind of file-system change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A file the index did not know about appeared
    Created,
    /// A known file was modified
    Changed,
    /// A file disappeared
    Removed,
}

/// One file-system change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Change {
    /// Normalized path
    pub path: PathBuf,
    /// What happened
    pub kind: ChangeKind,
}

impl Change {
    /// Create a change record.
    pub fn new(path: impl AsRef<Path>, kind: ChangeKind) -> Self {
        Self { path: paths::normalize(path.as_ref()), kind }
    }

    /// Modification of an existing file.
    pub fn changed(path: impl AsRef<Path>) -> Self {
        Self::new(path, ChangeKind::Changed)
    }
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Window in which repeated notifications for one path collapse
    pub debounce: Duration,
    /// Directories whose changes are never scheduled (the output directory)
    pub ignore: Vec<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(100), ignore: Vec::new() }
    }
}

/// Result of running one job.
#[derive(Debug)]
pub struct JobReport {
    /// The job that ran
    pub job: RebuildJob,
    /// How it ended
    pub outcome: Result<(), BuildError>,
    /// Wall time of the handler
    pub duration: Duration,
}

struct State {
    index: DependencyIndex,
    queue: RebuildQueue,
    last_seen: HashMap<PathBuf, Instant>,
    shutdown: bool,
}

struct Inner {
    state: Mutex<State>,
    ready: Condvar,
    config: SchedulerConfig,
    cache: Option<TransformCache>,
}

/// Debounce, index lookup and the global job queue.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler without a transform cache.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a scheduler that evicts stale `cache` entries on change and
    /// before each job runs.
    pub fn with_cache(config: SchedulerConfig, cache: TransformCache) -> Self {
        Self::build(config, Some(cache))
    }

    fn build(mut config: SchedulerConfig, cache: Option<TransformCache>) -> Self {
        config.ignore = config.ignore.iter().map(|p| paths::normalize(p)).collect();
        let state = State {
            index: DependencyIndex::new(),
            queue: RebuildQueue::new(),
            last_seen: HashMap::new(),
            shutdown: false,
        };
        Self { inner: Arc::new(Inner { state: Mutex::new(state), ready: Condvar::new(), config, cache }) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a handler panicked mid-job; the index
        // and queue are still consistent.
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a built target in the index.
    ///
    /// Builders whose output is a directory also get an alias entry for
    /// that directory.
    pub fn register(&self, builder: &dyn Builder) {
        let mut state = self.lock();
        state.index.apply(builder.id(), builder.resources());
        if let Some(output) = builder.output_path().filter(|p| p.is_dir()) {
            state.index.set_alias(builder.id(), output);
        }
    }

    /// Trigger `target` on changes reported at exactly `output`, even inside
    /// an ignored directory.
    pub fn alias(&self, target: &BuilderId, output: &Path) {
        self.lock().index.set_alias(target, output);
    }

    /// Record `resources` for `target`.
    pub fn record(&self, target: &BuilderId, resources: &ResourceSet) {
        self.lock().index.apply(target, resources);
    }

    /// Add `resources` to `target`'s entries, keeping the existing ones.
    pub fn extend(&self, target: &BuilderId, resources: &ResourceSet) {
        self.lock().index.extend(target, resources);
    }

    /// Drop `target` from the index.
    pub fn forget(&self, target: &BuilderId) {
        self.lock().index.remove(target);
    }

    /// Classify a change at `path` by existence and index membership.
    pub fn classify(&self, path: &Path) -> Change {
        let kind = if !path.exists() {
            ChangeKind::Removed
        } else if self.lock().index.contains(path) {
            ChangeKind::Changed
        } else {
            ChangeKind::Created
        };
        Change::new(path, kind)
    }

    /// Whether changes under `path` are ignored.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let path = paths::normalize(path);
        self.inner.config.ignore.iter().any(|dir| path.starts_with(dir))
    }

    /// Schedule rebuilds for every target depending on `change.path`.
    ///
    /// Returns the targets submitted. Changes inside an ignored directory
    /// are dropped unless the path is a registered alias. A repeat
    /// notification for a path within the debounce window is dropped when
    /// every affected target already has a scheduled job covering that path.
    pub fn notify(&self, change: Change) -> Vec<BuilderId> {
        let now = Instant::now();
        let debounce = self.inner.config.debounce;
        let mut state = self.lock();
        if self.is_ignored(&change.path) && state.index.alias_owner(&change.path).is_none() {
            tracing::trace!(path = %change.path.display(), "ignored change");
            return Vec::new();
        }
        if let Some(cache) = &self.inner.cache {
            cache.evict(&HashSet::from([change.path.clone()]));
        }

        let targets: BTreeSet<BuilderId> = state.index.lookup(&change.path);
        state.last_seen.retain(|_, seen| now.duration_since(*seen) < debounce);
        let recent = state.last_seen.insert(change.path.clone(), now).is_some();
        let invalidate = HashSet::from([change.path.clone()]);
        if recent && targets.iter().all(|t| state.queue.covers(t, &invalidate)) {
            tracing::trace!(path = %change.path.display(), "debounced change");
            return Vec::new();
        }

        let submitted: Vec<BuilderId> = targets.into_iter().collect();
        for target in &submitted {
            state.queue.submit(target.clone(), invalidate.clone());
        }
        drop(state);

        if !submitted.is_empty() {
            tracing::info!(path = %change.path.display(), kind = ?change.kind, targets = submitted.len(), "change scheduled");
            self.inner.ready.notify_all();
        }
        submitted
    }

    /// Run every runnable job on the calling thread until the queue is empty.
    ///
    /// `handler` rebuilds the job's target and returns its new resource set;
    /// on success the index is updated, on failure the previous entries stay
    /// so the target is retried on its next change.
    pub fn drain<F>(&self, mut handler: F) -> Vec<JobReport>
    where
        F: FnMut(&RebuildJob) -> Result<ResourceSet, BuildError>,
    {
        let mut reports = Vec::new();
        loop {
            let Some(job) = self.lock().queue.next() else { break };
            reports.push(self.run(job, &mut handler));
        }
        reports
    }

    fn run<F>(&self, job: RebuildJob, handler: &mut F) -> JobReport
    where
        F: FnMut(&RebuildJob) -> Result<ResourceSet, BuildError>,
    {
        let span = tracing::info_span!("rebuild", target = %job.target, coalesced = job.is_coalesced());
        let _guard = span.enter();
        // Entries cached by the previous job may predate these changes.
        if let Some(cache) = &self.inner.cache {
            cache.evict(&job.changed);
        }
        let started = Instant::now();
        let result = handler(&job);
        let duration = started.elapsed();

        let mut state = self.lock();
        let outcome = match result {
            Ok(resources) => {
                state.index.apply(&job.target, &resources);
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "rebuild failed");
                Err(err)
            }
        };
        state.queue.complete(&job.target);
        drop(state);
        self.inner.ready.notify_all();
        JobReport { job, outcome, duration }
    }

    /// Run the queue on a dedicated thread until [`SchedulerHandle::shutdown`].
    pub fn spawn<F>(&self, mut handler: F) -> Result<SchedulerHandle, WatchError>
    where
        F: FnMut(&RebuildJob) -> Result<ResourceSet, BuildError> + Send + 'static,
    {
        let scheduler = self.clone();
        let thread = std::thread::Builder::new()
            .name("keel-rebuild".to_string())
            .spawn(move || {
                while let Some(job) = scheduler.wait_for_job() {
                    let _ = scheduler.run(job, &mut handler);
                }
                tracing::debug!("rebuild runner stopped");
            })
            .map_err(|e| WatchError::Runner(e.to_string()))?;
        Ok(SchedulerHandle { scheduler: self.clone(), thread: Some(thread) })
    }

    /// Block until a job is runnable; `None` once shut down.
    fn wait_for_job(&self) -> Option<RebuildJob> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(job) = state.queue.next() {
                return Some(job);
            }
            state = self.inner.ready.wait(state).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Block until nothing is scheduled or running, or `timeout` elapses.
    /// Returns whether the queue went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.queue.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.inner.ready.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Targets depending on `path`.
    pub fn dependents(&self, path: &Path) -> BTreeSet<BuilderId> {
        self.lock().index.lookup(path)
    }

    /// Every path the index watches.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock().index.paths().cloned().collect();
        paths.sort();
        paths
    }

    /// Scheduled targets in execution order.
    pub fn pending(&self) -> Vec<BuilderId> {
        self.lock().queue.pending().cloned().collect()
    }

    /// Queue counters.
    pub fn stats(&self) -> QueueStats {
        self.lock().queue.stats()
    }

    /// Paths currently inside the debounce window.
    pub fn debounced_paths(&self) -> usize {
        self.lock().last_seen.len()
    }

    fn stop(&self) {
        self.lock().shutdown = true;
        self.inner.ready.notify_all();
    }
}

/// Handle to a running scheduler thread.
#[derive(Debug)]
pub struct SchedulerHandle {
    scheduler: Scheduler,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Scheduler the thread drains.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stop after the job in flight (if any) and wait for the thread.
    pub fn shutdown(mut self) -> Result<(), WatchError> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<(), WatchError> {
        self.scheduler.stop();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| WatchError::Runner("rebuild thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.stop_and_join();
    }
}
