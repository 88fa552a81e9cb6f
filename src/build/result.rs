//! Build result types.
//!
//! Contains types for representing the outcome of build runs, one-shot or
//! triggered by the rebuild scheduler.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::build::{BuildError, BuilderId, OutputFile, WriteReport};

/// Status of a single builder run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum BuildStatus {
    /// Build and write succeeded
    Success,
    /// Build or write failed with error
    Failed(String),
}

impl BuildStatus {
    /// Check if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success)
    }

    /// Check if the status indicates failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, BuildStatus::Failed(_))
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Success => write!(f, "success"),
            BuildStatus::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Result of running one top-level builder.
#[derive(Debug, Clone, Serialize)]
pub struct TargetResult {
    /// Builder that ran
    pub builder: BuilderId,
    /// Input it was built from
    pub input: PathBuf,
    /// Outcome
    #[serde(flatten)]
    pub status: BuildStatus,
    /// Output files written
    pub outputs: Vec<OutputFile>,
    /// Wall-clock time
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Warning messages (if any)
    pub warnings: Vec<String>,
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl TargetResult {
    /// Create a successful result.
    pub fn success(builder: BuilderId, input: PathBuf, report: WriteReport, duration: Duration) -> Self {
        Self { builder, input, status: BuildStatus::Success, outputs: report.outputs, duration, warnings: vec![] }
    }

    /// Create a failed result.
    pub fn failed(builder: BuilderId, input: PathBuf, error: &BuildError, duration: Duration) -> Self {
        Self {
            builder,
            input,
            status: BuildStatus::Failed(error.to_string()),
            outputs: vec![],
            duration,
            warnings: vec![],
        }
    }

    /// Add warnings to the result.
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Check if this result is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Total bytes written.
    pub fn total_bytes(&self) -> u64 {
        self.outputs.iter().map(|o| o.bytes).sum()
    }
}

/// Result of a complete build run.
#[derive(Debug, Default, Serialize)]
pub struct BuildResult {
    /// Results for each top-level builder
    pub targets: Vec<TargetResult>,
    /// Total build duration
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub total_duration: Duration,
}

impl BuildResult {
    /// Create a new empty build result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target result.
    pub fn add_result(&mut self, result: TargetResult) {
        self.targets.push(result);
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.total_duration = duration;
        self
    }

    /// Get the number of successful targets.
    pub fn success_count(&self) -> usize {
        self.targets.iter().filter(|r| r.is_success()).count()
    }

    /// Get the number of failed targets.
    pub fn failed_count(&self) -> usize {
        self.targets.iter().filter(|r| r.status.is_failure()).count()
    }

    /// Check if the overall build succeeded (no failures).
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Get all outputs produced.
    pub fn all_outputs(&self) -> Vec<&OutputFile> {
        self.targets.iter().flat_map(|r| r.outputs.iter()).collect()
    }

    /// Get all warnings.
    pub fn all_warnings(&self) -> Vec<&String> {
        self.targets.iter().flat_map(|r| r.warnings.iter()).collect()
    }

    /// Get failed target results.
    pub fn failures(&self) -> Vec<&TargetResult> {
        self.targets.iter().filter(|r| r.status.is_failure()).collect()
    }

    /// Format a summary of the build result.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let success = self.success_count();
        let failed = self.failed_count();
        let total = self.targets.len();

        if failed > 0 {
            lines.push(format!("Build failed: {} succeeded, {} failed ({} total)", success, failed, total));
            for target in self.failures() {
                lines.push(format!("  - {}: {}", target.builder, target.status));
            }
        } else {
            let files = self.all_outputs().len();
            lines.push(format!(
                "Build succeeded: {} entr{}, {} file{} written in {:?}",
                total,
                if total == 1 { "y" } else { "ies" },
                files,
                if files == 1 { "" } else { "s" },
                self.total_duration
            ));
        }

        let warnings = self.all_warnings();
        if !warnings.is_empty() {
            lines.push(format!("Warnings ({}): ", warnings.len()));
            for warning in warnings.iter().take(5) {
                lines.push(format!("  - {}", warning));
            }
            if warnings.len() > 5 {
                lines.push(format!("  ... and {} more", warnings.len() - 5));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(files: &[(&str, u64)]) -> WriteReport {
        let mut report = WriteReport::new();
        for (path, bytes) in files {
            report.push(*path, *bytes);
        }
        report
    }

    #[test]
    fn test_build_status_display() {
        assert_eq!(BuildStatus::Success.to_string(), "success");
        assert_eq!(BuildStatus::Failed("error".to_string()).to_string(), "failed: error");
    }

    #[test]
    fn test_target_result_success() {
        let result = TargetResult::success(
            BuilderId::new("html:/src/index.html"),
            PathBuf::from("/src/index.html"),
            report(&[("/dist/a.css", 10), ("/dist/index.html", 20)]),
            Duration::from_millis(100),
        );

        assert!(result.is_success());
        assert_eq!(result.outputs.len(), 2);
        assert_eq!(result.total_bytes(), 30);
    }

    #[test]
    fn test_target_result_failed() {
        let result = TargetResult::failed(
            BuilderId::new("style:/src/a.css"),
            PathBuf::from("/src/a.css"),
            &BuildError::InputNotFound(PathBuf::from("/src/a.css")),
            Duration::from_millis(50),
        );

        assert!(!result.is_success());
        assert!(result.outputs.is_empty());
    }

    #[test]
    fn test_build_result_counts() {
        let mut result = BuildResult::new();
        result.add_result(TargetResult::success(
            BuilderId::new("a"),
            PathBuf::from("/a"),
            WriteReport::new(),
            Duration::ZERO,
        ));
        result.add_result(TargetResult::failed(
            BuilderId::new("c"),
            PathBuf::from("/c"),
            &BuildError::config("bad"),
            Duration::ZERO,
        ));

        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert!(!result.is_success());
        assert!(result.summary().contains("Build failed"));
    }

    #[test]
    fn test_build_result_summary() {
        let mut result = BuildResult::new();
        result.add_result(
            TargetResult::success(
                BuilderId::new("html:/src/index.html"),
                PathBuf::from("/src/index.html"),
                report(&[("/dist/index.html", 20)]),
                Duration::from_millis(100),
            )
            .with_warnings(vec!["unknown link".to_string()]),
        );

        let summary = result.with_duration(Duration::from_millis(100)).summary();
        assert!(summary.contains("Build succeeded"));
        assert!(summary.contains("1 entry, 1 file written"));
        assert!(summary.contains("unknown link"));
    }

    #[test]
    fn test_serializes_for_json_output() {
        let result = TargetResult::failed(
            BuilderId::new("copy:/a.txt"),
            PathBuf::from("/a.txt"),
            &BuildError::config("missing"),
            Duration::from_millis(7),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["duration_ms"], 7);
        assert_eq!(json["builder"], "copy:/a.txt");
    }
}
