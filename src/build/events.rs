//! Builder event stream.
//!
//! Every builder owns an [`EventEmitter`]. Observers register closures with
//! [`EventEmitter::subscribe`]; a composite builder calls
//! [`EventEmitter::forward_from`] once per child so that the child's events
//! reach the parent's observers tagged with the parent's identity, without the
//! child knowing about its parent.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::build::{BuilderId, OutputFile};
use crate::transform::{AnalysisReport, Diagnostic};

/// Something that happened inside a builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BuildEvent {
    /// `build()` started
    BuildStart {
        /// Input being built
        input: PathBuf,
    },
    /// A sub-item finished building
    BuildProgress {
        /// Description of the sub-item
        item: String,
    },
    /// `build()` succeeded
    BuildEnd {
        /// Duration in milliseconds
        duration_ms: u64,
        /// Size of the new resource set
        resources: usize,
    },
    /// `write()` started
    WriteStart,
    /// One output file was written
    WriteProgress {
        /// File written
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },
    /// `write()` succeeded
    WriteEnd {
        /// Every file written
        outputs: Vec<OutputFile>,
    },
    /// Non-fatal problem
    Warning {
        /// Warning text
        message: String,
    },
    /// Fatal problem for the current operation
    Error {
        /// Error text
        message: String,
    },
    /// Lint diagnostics for the last build
    LintResult {
        /// Diagnostics reported by the transform
        diagnostics: Vec<Diagnostic>,
    },
    /// Dependency size analysis for the last build
    Analysis {
        /// Size report
        report: AnalysisReport,
    },
}

impl BuildEvent {
    /// Stable event name (`build-start`, `write-end`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            BuildEvent::BuildStart { .. } => "build-start",
            BuildEvent::BuildProgress { .. } => "build-progress",
            BuildEvent::BuildEnd { .. } => "build-end",
            BuildEvent::WriteStart => "write-start",
            BuildEvent::WriteProgress { .. } => "write-progress",
            BuildEvent::WriteEnd { .. } => "write-end",
            BuildEvent::Warning { .. } => "warning",
            BuildEvent::Error { .. } => "error",
            BuildEvent::LintResult { .. } => "lint-result",
            BuildEvent::Analysis { .. } => "analysis",
        }
    }
}

/// An event together with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Builder that emitted the event
    pub source: BuilderId,
    /// Ancestors the event was forwarded through, innermost first
    pub via: Vec<BuilderId>,
    /// The event itself
    #[serde(flatten)]
    pub event: BuildEvent,
}

impl Envelope {
    /// The outermost builder that has seen this event.
    pub fn outermost(&self) -> &BuilderId {
        self.via.last().unwrap_or(&self.source)
    }
}

/// Handle returned by [`EventEmitter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Observer registry owned by a builder.
///
/// Cloning yields another handle onto the same registry.
#[derive(Clone)]
pub struct EventEmitter {
    owner: BuilderId,
    listeners: Arc<Mutex<Vec<(SubscriptionId, Listener)>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("owner", &self.owner)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventEmitter {
    /// Create an emitter for a builder.
    pub fn new(owner: BuilderId) -> Self {
        Self { owner, listeners: Arc::new(Mutex::new(Vec::new())), next_id: Arc::new(AtomicU64::new(0)) }
    }

    /// Identity stamped on emitted events.
    pub fn owner(&self) -> &BuilderId {
        &self.owner
    }

    /// Register an observer.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    /// Remove an observer. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.listeners.lock() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(sid, _)| *sid != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    /// Number of registered observers.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Emit an event originating from the owner.
    pub fn emit(&self, event: BuildEvent) {
        self.dispatch(&Envelope { source: self.owner.clone(), via: Vec::new(), event });
    }

    /// Deliver an envelope to every observer.
    ///
    /// The listener list is snapshotted first so observers may subscribe or
    /// emit without deadlocking.
    pub fn dispatch(&self, envelope: &Envelope) {
        let snapshot: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(envelope);
        }
    }

    /// Re-emit every event of `child` through this emitter, tagged with this owner.
    pub fn forward_from(&self, child: &EventEmitter) -> SubscriptionId {
        let parent = self.clone();
        child.subscribe(move |envelope| {
            let mut tagged = envelope.clone();
            tagged.via.push(parent.owner.clone());
            parent.dispatch(&tagged);
        })
    }

    /// Shorthand for a warning event.
    pub fn warn(&self, message: impl Into<String>) {
        self.emit(BuildEvent::Warning { message: message.into() });
    }
}

/// Collects envelopes in memory; handy for tests and summaries.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Envelope>>>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe this log to an emitter.
    pub fn attach(&self, emitter: &EventEmitter) -> SubscriptionId {
        let events = Arc::clone(&self.events);
        emitter.subscribe(move |envelope| {
            if let Ok(mut events) = events.lock() {
                events.push(envelope.clone());
            }
        })
    }

    /// Snapshot of recorded envelopes.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Names of recorded events in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.envelopes().iter().map(|e| e.event.name()).collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}
