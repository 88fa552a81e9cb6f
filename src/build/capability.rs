//! Optional behaviours attached to transform-backed builders.
//!
//! Script and style builders pick their capabilities at `setup()` from the
//! build flags and run them, in order, after every successful transform.

use std::path::{Path, PathBuf};

use crate::build::{BuildError, BuildEvent, BuildFlags, EventEmitter};
use crate::transform::{AnalysisEntry, AnalysisReport, Diagnostic, Severity};

/// What a capability gets to look at after a transform.
#[derive(Debug, Clone, Copy)]
pub struct TransformReport<'a> {
    /// Input that was transformed
    pub input: &'a Path,
    /// Diagnostics reported by the collaborator
    pub diagnostics: &'a [Diagnostic],
    /// Size analysis reported by the collaborator, if any
    pub analysis: Option<&'a AnalysisReport>,
    /// Files the transform read
    pub dependencies: &'a [PathBuf],
}

/// A post-transform step.
pub trait Capability: Send + Sync + std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Inspect the report, emit events, and optionally fail the build.
    fn apply(&self, report: &TransformReport<'_>, events: &EventEmitter) -> Result<(), BuildError>;
}

/// Publishes lint diagnostics; fails on errors when blocking.
#[derive(Debug, Clone, Copy, Default)]
pub struct LintCapability {
    /// Error-severity diagnostics fail the build
    pub blocking: bool,
}

impl Capability for LintCapability {
    fn name(&self) -> &'static str {
        "lint"
    }

    fn apply(&self, report: &TransformReport<'_>, events: &EventEmitter) -> Result<(), BuildError> {
        events.emit(BuildEvent::LintResult { diagnostics: report.diagnostics.to_vec() });
        let errors = report.diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
        if self.blocking && errors > 0 {
            return Err(BuildError::LintViolation { path: report.input.to_path_buf(), count: errors });
        }
        Ok(())
    }
}

/// Publishes a dependency size report.
///
/// Uses the collaborator's own analysis when it has one, otherwise measures
/// the dependency files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisCapability;

impl Capability for AnalysisCapability {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn apply(&self, report: &TransformReport<'_>, events: &EventEmitter) -> Result<(), BuildError> {
        let analysis = match report.analysis {
            Some(analysis) => analysis.clone(),
            None => AnalysisReport::from_entries(
                report
                    .dependencies
                    .iter()
                    .filter_map(|path| {
                        let bytes = std::fs::metadata(path).ok()?.len();
                        Some(AnalysisEntry { path: path.clone(), bytes })
                    })
                    .collect(),
            ),
        };
        events.emit(BuildEvent::Analysis { report: analysis });
        Ok(())
    }
}

/// Capabilities implied by a set of flags, in execution order.
pub fn capabilities_for(flags: &BuildFlags) -> Vec<Box<dyn Capability>> {
    let mut capabilities: Vec<Box<dyn Capability>> = Vec::new();
    if flags.wants_lint() {
        capabilities.push(Box::new(LintCapability { blocking: flags.lint_blocks }));
    }
    if flags.analyze {
        capabilities.push(Box::new(AnalysisCapability));
    }
    capabilities
}
