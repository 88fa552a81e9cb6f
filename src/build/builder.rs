//! The builder contract.
//!
//! A builder turns one input asset into one output artifact plus a
//! [`ResourceSet`]. Its lifecycle is `setup()` → `build()` → `write()`, with
//! `build()` and `write()` repeatable across a watch session:
//!
//! ```text
//! Unconfigured --setup--> Configured --build--> Built --write--> Written
//!        \                    \                   \                /
//!         `------------------- any failure ---> Error <-----------'
//! ```
//!
//! Concrete builders keep their shared bookkeeping in a [`BuilderCore`].

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::build::{
    BuildError, BuildEvent, BuilderOptions, ErrorKind, EventEmitter, OutputRule, ResolvedOptions,
    ResourceSet, WriteError,
};

/// Set of changed paths passed to `build()`; empty means "rebuild everything".
pub type Invalidation = HashSet<PathBuf>;

/// Stable identity of a builder; the key used by the dependency index and
/// the rebuild queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BuilderId(String);

impl BuilderId {
    /// Wrap a raw identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity of a top-level builder for an input.
    pub fn root(kind: BuilderKind, input: &Path) -> Self {
        Self(format!("{}:{}", kind, input.display()))
    }

    /// Identity of the `index`-th child of `kind` under this builder.
    pub fn child(&self, kind: BuilderKind, index: usize) -> Self {
        Self(format!("{}>{}#{}", self.0, kind, index))
    }

    /// Raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BuilderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuilderKind {
    /// Verbatim file copy
    Copy,
    /// Script bundle
    Script,
    /// Style sheet
    Style,
    /// Image fan-out into icon sizes
    Icon,
    /// HTML document
    Html,
    /// Web app manifest
    WebManifest,
    /// Offline-cache service worker
    ServiceWorker,
}

impl std::fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderKind::Copy => write!(f, "copy"),
            BuilderKind::Script => write!(f, "script"),
            BuilderKind::Style => write!(f, "style"),
            BuilderKind::Icon => write!(f, "icon"),
            BuilderKind::Html => write!(f, "html"),
            BuilderKind::WebManifest => write!(f, "webmanifest"),
            BuilderKind::ServiceWorker => write!(f, "service-worker"),
        }
    }
}

/// Lifecycle state of a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderState {
    /// Created, `setup()` not yet called (or it failed)
    Unconfigured,
    /// Options validated
    Configured,
    /// Last `build()` succeeded
    Built,
    /// Last `write()` succeeded
    Written,
    /// Last operation failed
    Error,
}

impl std::fmt::Display for BuilderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderState::Unconfigured => write!(f, "unconfigured"),
            BuilderState::Configured => write!(f, "configured"),
            BuilderState::Built => write!(f, "built"),
            BuilderState::Written => write!(f, "written"),
            BuilderState::Error => write!(f, "error"),
        }
    }
}

/// One file produced by `write()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    /// Absolute path written
    pub path: PathBuf,
    /// Size in bytes
    pub bytes: u64,
}

/// What `write()` committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Files written, in write order
    pub outputs: Vec<OutputFile>,
}

impl WriteReport {
    /// Empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a written file.
    pub fn push(&mut self, path: impl Into<PathBuf>, bytes: u64) {
        self.outputs.push(OutputFile { path: path.into(), bytes });
    }

    /// Append another report.
    pub fn extend(&mut self, other: WriteReport) {
        self.outputs.extend(other.outputs);
    }

    /// Main output location (the last file written).
    pub fn location(&self) -> Option<&Path> {
        self.outputs.last().map(|o| o.path.as_path())
    }

    /// Total bytes across every output.
    pub fn total_bytes(&self) -> u64 {
        self.outputs.iter().map(|o| o.bytes).sum()
    }
}

/// The unit of work.
pub trait Builder: Send {
    /// Stable identity.
    fn id(&self) -> &BuilderId;

    /// Builder kind.
    fn kind(&self) -> BuilderKind;

    /// Validate and normalize options; resets the resource set.
    fn setup(&mut self, options: BuilderOptions) -> Result<(), BuildError>;

    /// Produce a fresh result. `invalidate` lists changed paths; empty means
    /// everything may have changed.
    fn build(&mut self, invalidate: &Invalidation) -> Result<(), BuildError>;

    /// Commit the last result to the configured output.
    fn write(&mut self) -> Result<WriteReport, BuildError>;

    /// Files the last successful build depended on.
    fn resources(&self) -> &ResourceSet;

    /// Current lifecycle state.
    fn state(&self) -> BuilderState;

    /// Event stream.
    fn events(&self) -> &EventEmitter;

    /// Configured output location, once set up.
    fn output_path(&self) -> Option<&Path>;

    /// Configured input file, once set up; `None` for inline sources.
    fn input_path(&self) -> Option<&Path>;

    /// Child builders owned by this builder, in registration order.
    fn children(&self) -> Vec<&dyn Builder> {
        Vec::new()
    }

    /// Files whose change should trigger a retry: the last resource set
    /// plus the configured input of this builder and of every child.
    ///
    /// Unlike [`Builder::resources`] this is populated after a failed build,
    /// so a missing referenced file is watched until it appears.
    fn watch_inputs(&self) -> ResourceSet {
        let mut inputs = self.resources().clone();
        if let Some(input) = self.input_path() {
            inputs.insert(input);
        }
        for child in self.children() {
            inputs.merge(&child.watch_inputs());
        }
        inputs
    }
}

/// Bookkeeping shared by every builder implementation.
#[derive(Debug)]
pub struct BuilderCore {
    id: BuilderId,
    kind: BuilderKind,
    state: BuilderState,
    options: Option<ResolvedOptions>,
    resources: ResourceSet,
    events: EventEmitter,
    built: bool,
}

impl BuilderCore {
    /// Fresh, unconfigured core.
    pub fn new(id: BuilderId, kind: BuilderKind) -> Self {
        let events = EventEmitter::new(id.clone());
        Self {
            id,
            kind,
            state: BuilderState::Unconfigured,
            options: None,
            resources: ResourceSet::new(),
            events,
            built: false,
        }
    }

    /// Identity.
    pub fn id(&self) -> &BuilderId {
        &self.id
    }

    /// Kind.
    pub fn kind(&self) -> BuilderKind {
        self.kind
    }

    /// Lifecycle state.
    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// Event emitter.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Resource set of the last successful build.
    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    /// Whether the last build succeeded.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Resolve and store options; clears the resource set.
    pub fn configure(&mut self, options: &BuilderOptions, rule: &OutputRule) -> Result<(), BuildError> {
        self.resources.clear();
        self.built = false;
        match options.resolve(rule) {
            Ok(resolved) => {
                tracing::debug!(builder = %self.id, output = %resolved.output.display(), "configured");
                self.options = Some(resolved);
                self.state = BuilderState::Configured;
                Ok(())
            }
            Err(err) => {
                self.options = None;
                self.state = BuilderState::Unconfigured;
                self.events.emit(BuildEvent::Error { message: err.to_string() });
                Err(err)
            }
        }
    }

    /// Resolved options, failing if `setup()` has not succeeded.
    pub fn options(&self) -> Result<&ResolvedOptions, BuildError> {
        self.options
            .as_ref()
            .ok_or_else(|| BuildError::config(format!("{} has not been set up", self.id)))
    }

    /// Configured output location.
    pub fn output_path(&self) -> Option<&Path> {
        self.options.as_ref().map(|o| o.output.as_path())
    }

    /// Configured input file, unless the source is inline.
    pub fn input_path(&self) -> Option<&Path> {
        self.options.as_ref().filter(|o| !o.is_inline()).map(|o| o.input.as_path())
    }

    /// Begin a build: checks configuration and input existence, emits `build-start`.
    pub fn begin_build(&mut self) -> Result<(ResolvedOptions, Instant), BuildError> {
        let options = match self.options() {
            Ok(options) => options.clone(),
            Err(err) => return self.fail(err),
        };
        self.events.emit(BuildEvent::BuildStart { input: options.input.clone() });
        if !options.is_inline() && !options.input.is_file() {
            return self.fail(BuildError::InputNotFound(options.input.clone()));
        }
        Ok((options, Instant::now()))
    }

    /// Begin a build for builders whose input may be generated.
    pub fn begin_build_optional_input(&mut self) -> Result<(ResolvedOptions, Instant), BuildError> {
        let options = match self.options() {
            Ok(options) => options.clone(),
            Err(err) => return self.fail(err),
        };
        self.events.emit(BuildEvent::BuildStart { input: options.input.clone() });
        Ok((options, Instant::now()))
    }

    /// Finish a successful build: store resources, emit `build-end`.
    pub fn finish_build(&mut self, resources: ResourceSet, started: Instant) {
        self.resources = resources;
        self.built = true;
        self.state = BuilderState::Built;
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(builder = %self.id, resources = self.resources.len(), duration_ms, "built");
        self.events.emit(BuildEvent::BuildEnd { duration_ms, resources: self.resources.len() });
    }

    /// Add paths discovered after the build (e.g. by a write-time child).
    pub fn extend_resources(&mut self, other: &ResourceSet) {
        self.resources.merge(other);
    }

    /// Begin a write: fails unless the last build succeeded, emits `write-start`.
    pub fn begin_write(&mut self) -> Result<ResolvedOptions, BuildError> {
        if !self.built {
            return self.fail(WriteError::NotBuilt(self.id.clone()).into());
        }
        let options = match self.options() {
            Ok(options) => options.clone(),
            Err(err) => return self.fail(err),
        };
        self.events.emit(BuildEvent::WriteStart);
        Ok(options)
    }

    /// Write bytes to `path`, creating parent directories, and report progress.
    pub fn write_file(&self, path: &Path, contents: &[u8], report: &mut WriteReport) -> Result<(), BuildError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        std::fs::write(path, contents).map_err(|e| BuildError::io(path, e))?;
        let bytes = contents.len() as u64;
        report.push(path, bytes);
        self.events.emit(BuildEvent::WriteProgress { path: path.to_path_buf(), bytes });
        Ok(())
    }

    /// Finish a successful write, emit `write-end`.
    pub fn finish_write(&mut self, report: WriteReport) -> WriteReport {
        self.state = BuilderState::Written;
        self.events.emit(BuildEvent::WriteEnd { outputs: report.outputs.clone() });
        report
    }

    /// Record a failure: state becomes `Error`, an `error` event is emitted.
    ///
    /// Child failures were already forwarded by the child's own emitter and
    /// are not emitted twice.
    pub fn fail<T>(&mut self, err: BuildError) -> Result<T, BuildError> {
        self.state = BuilderState::Error;
        if err.kind() != ErrorKind::Write {
            self.built = false;
        }
        if !matches!(err, BuildError::Child { .. }) {
            self.events.emit(BuildEvent::Error { message: err.to_string() });
        }
        tracing::warn!(builder = %self.id, error = %err, "builder failed");
        Err(err)
    }
}
