//! Watch mode for automatic rebuilds on file changes
//!
//! A [`WatchSession`] owns the top-level builders of a `keel watch` run,
//! the session's transform cache and the [`Scheduler`]. File-system events
//! from `notify` (debounced by `notify-debouncer-mini`) are turned into
//! rebuild jobs; jobs run one at a time on the scheduler's runner thread.

pub mod index;
pub mod queue;
pub mod scheduler;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::build::progress::{attach, format_duration, ProgressReporter};
use crate::build::{
    paths, BuildContext, BuildError, BuildResult, Builder, BuilderId, BuilderOptions, ResourceSet, TransformCache,
};
use crate::builders;
use crate::config::WatchConfig;

pub use index::{DependencyIndex, IndexDelta};
pub use queue::{JobState, QueueStats, RebuildJob, RebuildQueue, Submission};
pub use scheduler::{Change, ChangeKind, JobReport, Scheduler, SchedulerConfig, SchedulerHandle};

/// Error during watch mode
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchError {
    /// Failed to initialize file watcher
    #[error("Failed to initialize file watcher: {0}")]
    WatcherInit(#[source] notify::Error),
    /// Failed to add watch path
    #[error("Failed to watch path: {0}")]
    WatchPath(#[source] notify::Error),
    /// Channel receive error
    #[error("Watch channel error: {0}")]
    ChannelError(String),
    /// Rebuild runner thread failure
    #[error("Rebuild runner error: {0}")]
    Runner(String),
    /// Project root not found
    #[error("Project root not found: {}", .0.display())]
    RootNotFound(PathBuf),
    /// A target has no input
    #[error("Watch target has no input")]
    MissingInput,
}

/// Tracks targets with errors across rebuilds for recovery detection
#[derive(Debug, Default)]
pub struct ErrorTracker {
    /// Inputs whose last build failed
    files_with_errors: HashSet<PathBuf>,
}

impl ErrorTracker {
    /// Create a new error tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the tracker with the targets in `result`; returns the inputs
    /// that failed before and succeeded now.
    ///
    /// Targets absent from `result` keep their previous state.
    pub fn update(&mut self, result: &BuildResult) -> Vec<PathBuf> {
        let mut fixed = Vec::new();
        for target in &result.targets {
            if target.is_success() {
                if self.files_with_errors.remove(&target.input) {
                    fixed.push(target.input.clone());
                }
            } else {
                self.files_with_errors.insert(target.input.clone());
            }
        }
        fixed
    }

    /// Check if there are any tracked errors
    pub fn has_errors(&self) -> bool {
        !self.files_with_errors.is_empty()
    }

    /// Get the number of inputs with errors
    pub fn error_count(&self) -> usize {
        self.files_with_errors.len()
    }
}

/// Options for watch mode
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Project root, watched recursively
    pub root: PathBuf,
    /// Output directory; changes inside it are ignored
    pub out_dir: PathBuf,
    /// One entry per top-level builder
    pub targets: Vec<BuilderOptions>,
    /// Watch configuration (debounce, clear screen, extra roots)
    pub config: WatchConfig,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            out_dir: PathBuf::from("dist"),
            targets: Vec::new(),
            config: WatchConfig::default(),
        }
    }
}

/// Clear the terminal screen
fn clear_screen() {
    // ANSI escape code to clear screen and move cursor to top-left
    print!("\x1B[2J\x1B[1;1H");
}

/// Get current timestamp for logging
fn timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs() % 86400; // seconds since midnight
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

struct Target {
    input: PathBuf,
    builder: Box<dyn Builder>,
}

/// Top-level builders of a watch run plus the state shared between rebuilds.
pub struct WatchSession {
    options: WatchOptions,
    scheduler: Scheduler,
    cache: TransformCache,
    targets: HashMap<BuilderId, Target>,
    order: Vec<BuilderId>,
    tracker: ErrorTracker,
    interactive: bool,
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession").field("root", &self.options.root).field("targets", &self.order).finish()
    }
}

impl WatchSession {
    /// Create and set up one builder per target, sharing a fresh transform cache.
    pub fn new(options: WatchOptions, reporter: Arc<dyn ProgressReporter>) -> Result<Self, WatchError> {
        if !options.root.is_dir() {
            return Err(WatchError::RootNotFound(options.root.clone()));
        }
        let root = paths::normalize(&options.root);
        let out_dir = paths::resolve(&root, &options.out_dir);
        let cache = TransformCache::new();
        let ctx = BuildContext::default().with_cache(cache.clone());
        let scheduler = Scheduler::with_cache(
            SchedulerConfig {
                debounce: Duration::from_millis(u64::from(options.config.debounce_ms)),
                ignore: vec![out_dir.clone()],
            },
            cache.clone(),
        );

        let mut targets = HashMap::new();
        let mut order = Vec::new();
        for target in &options.targets {
            let input = target.input.as_deref().ok_or(WatchError::MissingInput)?;
            let input = paths::resolve(&root, input);
            let mut builder = builders::for_input(&input, &ctx);
            attach(Arc::clone(&reporter), builder.events());
            if let Err(err) = builder.setup(target.clone().with_root(&root)) {
                tracing::error!(input = %input.display(), error = %err, "target setup failed");
            }
            order.push(builder.id().clone());
            targets.insert(builder.id().clone(), Target { input, builder });
        }

        let options = WatchOptions { root, out_dir, ..options };
        Ok(Self { options, scheduler, cache, targets, order, tracker: ErrorTracker::new(), interactive: false })
    }

    /// Print timestamped status lines (and clear the screen if configured).
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Scheduler handle (shared with the runner thread once running).
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Session transform cache.
    pub fn cache(&self) -> &TransformCache {
        &self.cache
    }

    /// Top-level builder for `id`.
    pub fn builder(&self, id: &BuilderId) -> Option<&dyn Builder> {
        self.targets.get(id).map(|t| t.builder.as_ref())
    }

    /// Identities of the top-level builders in target order.
    pub fn target_ids(&self) -> &[BuilderId] {
        &self.order
    }

    /// Build every target once and index the results.
    ///
    /// A target that fails is indexed on its watch inputs (its own input
    /// and every referenced file) so that fixing any of them retries it.
    pub fn initial_build(&mut self) -> BuildResult {
        let started = Instant::now();
        if self.interactive {
            if self.options.config.clear_screen {
                clear_screen();
            }
            println!("[{}] Building...", timestamp());
        }
        let mut result = BuildResult::new();
        for id in self.order.clone() {
            let Some(target) = self.targets.get_mut(&id) else { continue };
            let (target_result, outcome) =
                builders::run_target(target.builder.as_mut(), &target.input, &Default::default());
            match outcome {
                Ok(()) => self.scheduler.register(target.builder.as_ref()),
                Err(_) => {
                    let mut inputs = target.builder.watch_inputs();
                    inputs.insert(&target.input);
                    self.scheduler.record(&id, &inputs);
                }
            }
            result.add_result(target_result);
        }
        let result = result.with_duration(started.elapsed());
        self.report(&result);
        result
    }

    /// Handle one file-system change; returns the targets scheduled.
    pub fn notify(&self, path: &Path) -> Vec<BuilderId> {
        schedule(&self.scheduler, path, self.interactive)
    }

    /// Run one job: rebuild and rewrite its target.
    ///
    /// On failure the target's watch inputs are added to its index entry,
    /// so a file it references but could not read still triggers a retry.
    pub fn rebuild(&mut self, job: &RebuildJob) -> Result<ResourceSet, BuildError> {
        let started = Instant::now();
        let Some(target) = self.targets.get_mut(&job.target) else {
            return Err(BuildError::config(format!("unknown watch target {}", job.target)));
        };
        if self.interactive {
            if self.options.config.clear_screen {
                clear_screen();
            }
            println!("[{}] Building {}...", timestamp(), target.input.display());
        }
        let (target_result, outcome) = builders::run_target(target.builder.as_mut(), &target.input, &job.build_hint());
        let resources = target.builder.resources().clone();
        if outcome.is_err() {
            self.scheduler.extend(&job.target, &target.builder.watch_inputs());
        }
        let mut result = BuildResult::new();
        result.add_result(target_result);
        self.report(&result.with_duration(started.elapsed()));
        outcome.map(|()| resources)
    }

    /// Run every scheduled job on the calling thread.
    pub fn drain(&mut self) -> Vec<JobReport> {
        let scheduler = self.scheduler.clone();
        scheduler.drain(|job| self.rebuild(job))
    }

    fn report(&mut self, result: &BuildResult) {
        let fixed = self.tracker.update(result);
        if !self.interactive {
            return;
        }
        for input in &fixed {
            if let Some(name) = input.file_name() {
                println!("[{}] Fixed: {}", timestamp(), name.to_string_lossy());
            }
        }
        let duration = format_duration(result.total_duration.as_millis() as u64);
        if result.is_success() {
            println!("[{}] Build complete ({}) - {} file(s)", timestamp(), duration, result.all_outputs().len());
        } else {
            let error_count = result.failed_count();
            println!(
                "[{}] Build failed ({}) - {} error{}",
                timestamp(),
                duration,
                error_count,
                if error_count == 1 { "" } else { "s" }
            );
        }
        for warning in result.all_warnings() {
            eprintln!("[{}] Warning: {}", timestamp(), warning);
        }
        println!("[{}] Watching {} for changes...", timestamp(), self.options.root.display());
    }

    /// Directories to watch: the root, configured extra roots, and the
    /// parent of every indexed file outside them.
    pub fn watch_roots(&self) -> Vec<(PathBuf, RecursiveMode)> {
        let mut roots: Vec<(PathBuf, RecursiveMode)> = vec![(self.options.root.clone(), RecursiveMode::Recursive)];
        for extra in &self.options.config.roots {
            roots.push((paths::resolve(&self.options.root, extra), RecursiveMode::Recursive));
        }
        let recursive: Vec<PathBuf> = roots.iter().map(|(p, _)| p.clone()).collect();
        let mut outside: Vec<PathBuf> = self
            .scheduler
            .watched_paths()
            .into_iter()
            .filter(|p| !recursive.iter().any(|root| p.starts_with(root)))
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect();
        outside.sort();
        outside.dedup();
        roots.extend(outside.into_iter().map(|dir| (dir, RecursiveMode::NonRecursive)));
        roots
    }

    /// Watch for changes and rebuild until the event channel closes.
    ///
    /// This blocks; jobs run on the scheduler's runner thread.
    pub fn run(self) -> Result<(), WatchError> {
        let (tx, rx) = channel();
        let debounce = Duration::from_millis(u64::from(self.options.config.debounce_ms));
        let mut debouncer = new_debouncer(debounce, tx).map_err(WatchError::WatcherInit)?;
        for (dir, mode) in self.watch_roots() {
            if dir.is_dir() {
                debouncer.watcher().watch(&dir, mode).map_err(WatchError::WatchPath)?;
            }
        }

        let scheduler = self.scheduler.clone();
        let root = self.options.root.clone();
        let interactive = self.interactive;
        let mut session = self;
        let handle = scheduler.spawn(move |job| session.rebuild(job))?;
        if interactive {
            println!("[{}] Watching {} for changes...", timestamp(), root.display());
        }

        loop {
            match rx.recv() {
                Ok(Ok(events)) => {
                    for event in events.iter().filter(|e| matches!(e.kind, DebouncedEventKind::Any)) {
                        schedule(&scheduler, &event.path, interactive);
                    }
                }
                Ok(Err(error)) => {
                    // Watch error (non-fatal) - log but continue watching
                    tracing::warn!(error = ?error, "watch error");
                    eprintln!("[{}] Watch error: {:?}", timestamp(), error);
                }
                Err(e) => {
                    handle.shutdown()?;
                    return Err(WatchError::ChannelError(e.to_string()));
                }
            }
        }
    }
}

/// Classify `path` and schedule its dependents.
fn schedule(scheduler: &Scheduler, path: &Path, interactive: bool) -> Vec<BuilderId> {
    let change = scheduler.classify(path);
    let name = change.path.file_name().map(|n| n.to_string_lossy().into_owned());
    let targets = scheduler.notify(change);
    if interactive && !targets.is_empty() {
        if let Some(name) = name {
            println!("[{}] Changed: {}", timestamp(), name);
        }
    }
    targets
}

/// Build every target once, then watch for changes and rebuild.
///
/// This function blocks and runs until interrupted (Ctrl+C).
///
/// # Example
/// ```ignore
/// let options = WatchOptions {
///     root: PathBuf::from("."),
///     out_dir: PathBuf::from("dist"),
///     targets: vec![BuilderOptions::new("src/index.html").with_output_dir("dist")],
///     config: WatchConfig::default(),
/// };
/// watch_and_rebuild(options, Arc::new(ConsoleProgress::new()))?;
/// ```
pub fn watch_and_rebuild(options: WatchOptions, reporter: Arc<dyn ProgressReporter>) -> Result<(), WatchError> {
    let out_dir = paths::resolve(&options.root, &options.out_dir);
    if !out_dir.exists() {
        std::fs::create_dir_all(&out_dir).ok();
    }
    let mut session = WatchSession::new(options, reporter)?.interactive(true);
    session.initial_build();
    session.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::progress::NullProgress;
    use crate::build::TargetResult;
    use tempfile::TempDir;

    fn result(targets: &[(&str, bool)]) -> BuildResult {
        let mut result = BuildResult::new();
        for (input, ok) in targets {
            let id = BuilderId::new(format!("copy:{}", input));
            result.add_result(if *ok {
                TargetResult::success(id, PathBuf::from(input), Default::default(), Duration::ZERO)
            } else {
                TargetResult::failed(id, PathBuf::from(input), &BuildError::config("bad"), Duration::ZERO)
            });
        }
        result
    }

    #[test]
    fn test_watch_options_default() {
        let options = WatchOptions::default();
        assert_eq!(options.out_dir, PathBuf::from("dist"));
        assert_eq!(options.config.debounce_ms, 100);
        assert!(options.config.clear_screen);
    }

    #[test]
    fn test_error_tracker_detects_fixed_files() {
        let mut tracker = ErrorTracker::new();
        assert!(tracker.update(&result(&[("a.css", false), ("b.js", false)])).is_empty());
        assert_eq!(tracker.error_count(), 2);

        let fixed = tracker.update(&result(&[("a.css", true)]));
        assert_eq!(fixed, vec![PathBuf::from("a.css")]);
        assert!(tracker.has_errors());

        tracker.update(&result(&[("b.js", true)]));
        assert!(!tracker.has_errors());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert_eq!(ts.len(), 8);
        assert_eq!(ts.matches(':').count(), 2);
    }

    #[test]
    fn test_root_not_found() {
        let options = WatchOptions { root: PathBuf::from("/nonexistent/keel/root"), ..Default::default() };
        let result = WatchSession::new(options, Arc::new(NullProgress::new()));
        assert!(matches!(result, Err(WatchError::RootNotFound(_))));
    }

    #[test]
    fn test_target_without_input_is_rejected() {
        let temp = TempDir::new().unwrap();
        let options = WatchOptions {
            root: temp.path().to_path_buf(),
            targets: vec![BuilderOptions::default().with_output_dir("dist")],
            ..Default::default()
        };
        let result = WatchSession::new(options, Arc::new(NullProgress::new()));
        assert!(matches!(result, Err(WatchError::MissingInput)));
    }

    #[test]
    fn test_session_rebuilds_changed_style() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.css"), ".a { color: red; }\n").unwrap();
        let options = WatchOptions {
            root: temp.path().to_path_buf(),
            out_dir: PathBuf::from("dist"),
            targets: vec![BuilderOptions::new("a.css").with_output_dir("dist")],
            config: WatchConfig { debounce_ms: 0, ..Default::default() },
        };
        let mut session = WatchSession::new(options, Arc::new(NullProgress::new())).unwrap();
        assert!(session.initial_build().is_success());

        std::fs::write(temp.path().join("a.css"), ".a { color: blue; }\n").unwrap();
        let scheduled = session.notify(&temp.path().join("a.css"));
        assert_eq!(scheduled.len(), 1);
        assert!(session.notify(&temp.path().join("dist/a.css")).is_empty());

        let reports = session.drain();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].outcome.is_ok());
        let css = std::fs::read_to_string(temp.path().join("dist/a.css")).unwrap();
        assert!(css.contains("blue"));
    }

    #[test]
    fn test_failed_initial_build_is_retried_on_fix() {
        let temp = TempDir::new().unwrap();
        let options = WatchOptions {
            root: temp.path().to_path_buf(),
            targets: vec![BuilderOptions::new("late.js").with_output_dir("dist")],
            config: WatchConfig { debounce_ms: 0, ..Default::default() },
            ..Default::default()
        };
        let mut session = WatchSession::new(options, Arc::new(NullProgress::new())).unwrap();
        assert!(!session.initial_build().is_success());

        std::fs::write(temp.path().join("late.js"), "console.log('here');\n").unwrap();
        assert_eq!(session.notify(&temp.path().join("late.js")).len(), 1);
        let reports = session.drain();
        assert!(reports[0].outcome.is_ok());
        assert!(temp.path().join("dist/late.js").exists());
        assert!(!session.tracker.has_errors());
    }

    fn page_session(temp: &TempDir, page: &str) -> WatchSession {
        std::fs::write(temp.path().join("index.html"), page).unwrap();
        let options = WatchOptions {
            root: temp.path().to_path_buf(),
            targets: vec![BuilderOptions::new("index.html").with_output_dir("dist")],
            config: WatchConfig { debounce_ms: 0, ..Default::default() },
            ..Default::default()
        };
        WatchSession::new(options, Arc::new(NullProgress::new())).unwrap()
    }

    #[test]
    fn test_page_with_missing_stylesheet_retries_when_it_appears() {
        let temp = TempDir::new().unwrap();
        let mut session =
            page_session(&temp, "<html><head><link rel=\"stylesheet\" href=\"a.css\"></head><body></body></html>");
        assert!(!session.initial_build().is_success());

        std::fs::write(temp.path().join("a.css"), ".a { color: red; }\n").unwrap();
        assert_eq!(session.notify(&temp.path().join("a.css")).len(), 1);
        let reports = session.drain();
        assert!(reports[0].outcome.is_ok());
        assert!(temp.path().join("dist/a.css").exists());
        assert!(temp.path().join("dist/index.html").exists());
    }

    #[test]
    fn test_failed_rebuild_watches_newly_referenced_file() {
        let temp = TempDir::new().unwrap();
        let mut session = page_session(&temp, "<html><head></head><body></body></html>");
        assert!(session.initial_build().is_success());

        std::fs::write(
            temp.path().join("index.html"),
            "<html><head><script type=\"module\" src=\"app.js\"></script></head><body></body></html>",
        )
        .unwrap();
        assert_eq!(session.notify(&temp.path().join("index.html")).len(), 1);
        assert!(session.drain()[0].outcome.is_err());
        assert!(session.scheduler().watched_paths().contains(&temp.path().join("index.html")));

        std::fs::write(temp.path().join("app.js"), "console.log('app');\n").unwrap();
        assert_eq!(session.notify(&temp.path().join("app.js")).len(), 1);
        assert!(session.drain()[0].outcome.is_ok());
        assert!(temp.path().join("dist/app.js").exists());
    }
}
