//! Build progress reporting.
//!
//! Reporters are builder event listeners: [`attach`] subscribes one to a
//! builder's [`EventEmitter`], and since composite builders forward their
//! children's events, attaching to the top-level builder is enough to see the
//! whole tree. Two outputs are provided, console (with colors) and JSON lines.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use keel::build::progress::{attach, ConsoleProgress};
//!
//! let reporter = Arc::new(ConsoleProgress::new().with_verbose(true));
//! attach(reporter.clone(), builder.events());
//! builder.build(&Default::default())?;
//! builder.write()?;
//! ```

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::build::{BuildEvent, BuildResult, Envelope, EventEmitter, SubscriptionId};
use crate::transform::Severity;

/// Trait for progress reporters.
pub trait ProgressReporter: Send + Sync {
    /// Report a builder event.
    fn report(&self, envelope: &Envelope);

    /// Report the outcome of a whole run.
    fn summary(&self, result: &BuildResult);

    /// Check if this reporter wants verbose output.
    fn is_verbose(&self) -> bool {
        false
    }
}

/// Subscribe `reporter` to every event of `emitter`.
pub fn attach(reporter: Arc<dyn ProgressReporter>, emitter: &EventEmitter) -> SubscriptionId {
    emitter.subscribe(move |envelope| reporter.report(envelope))
}

/// A progress reporter that discards all events.
#[derive(Debug, Default)]
pub struct NullProgress;

impl NullProgress {
    /// Create a new null progress reporter.
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for NullProgress {
    fn report(&self, _envelope: &Envelope) {}

    fn summary(&self, _result: &BuildResult) {}
}

/// Console progress reporter with optional colors.
pub struct ConsoleProgress {
    /// Whether to use colors
    use_colors: bool,
    /// Whether to show verbose output
    verbose: bool,
    /// Output writer (for testing)
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ConsoleProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleProgress")
            .field("use_colors", &self.use_colors)
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl ConsoleProgress {
    /// Create a console reporter on stderr; colors only when stderr is a terminal.
    pub fn new() -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stderr),
            verbose: false,
            output: Mutex::new(Box::new(std::io::stderr())),
        }
    }

    /// Create a console progress reporter that writes to a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self { use_colors: false, verbose: false, output: Mutex::new(Box::new(output)) }
    }

    /// Set whether to use colors.
    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn color(&self, text: &str, color: &str) -> String {
        if self.use_colors {
            format!("{}{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn green(&self, text: &str) -> String {
        self.color(text, "\x1b[32m")
    }

    fn yellow(&self, text: &str) -> String {
        self.color(text, "\x1b[33m")
    }

    fn red(&self, text: &str) -> String {
        self.color(text, "\x1b[31m")
    }

    fn cyan(&self, text: &str) -> String {
        self.color(text, "\x1b[36m")
    }

    fn bold(&self, text: &str) -> String {
        self.color(text, "\x1b[1m")
    }

    fn writeln(&self, line: &str) {
        if let Ok(mut output) = self.output.lock() {
            let _ = writeln!(output, "{}", line);
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ConsoleProgress {
    fn report(&self, envelope: &Envelope) {
        let source = &envelope.source;
        // Children are only narrated in verbose mode; problems always are.
        let top_level = envelope.via.is_empty();
        match &envelope.event {
            BuildEvent::BuildStart { .. } if self.verbose => {
                self.writeln(&format!("{} {}...", self.cyan("[build]"), source));
            }
            BuildEvent::BuildEnd { duration_ms, resources } if self.verbose || top_level => {
                self.writeln(&format!(
                    "{} {} {} ({} resource{}, {})",
                    self.cyan("[build]"),
                    self.green("ok"),
                    source,
                    resources,
                    if *resources == 1 { "" } else { "s" },
                    format_duration(*duration_ms)
                ));
            }
            BuildEvent::WriteProgress { path, bytes } if self.verbose => {
                self.writeln(&format!("{} {} ({})", self.cyan("[write]"), path.display(), format_bytes(*bytes)));
            }
            BuildEvent::WriteEnd { outputs } if top_level => {
                let total: u64 = outputs.iter().map(|o| o.bytes).sum();
                self.writeln(&format!(
                    "{} {} file{} ({})",
                    self.cyan("[write]"),
                    outputs.len(),
                    if outputs.len() == 1 { "" } else { "s" },
                    format_bytes(total)
                ));
            }
            BuildEvent::Warning { message } => {
                self.writeln(&format!("{} {}: {}", self.yellow("[warn]"), source, message));
            }
            BuildEvent::Error { message } => {
                self.writeln(&format!("{} {}: {}", self.red("[error]"), source, message));
            }
            BuildEvent::LintResult { diagnostics } => {
                for diagnostic in diagnostics {
                    let label = match diagnostic.severity {
                        Severity::Error => self.red("[lint]"),
                        Severity::Warning => self.yellow("[lint]"),
                    };
                    self.writeln(&format!("{} {}", label, diagnostic));
                }
            }
            BuildEvent::Analysis { report } => {
                self.writeln(&format!("{} {} total", self.cyan("[size]"), self.bold(&format_bytes(report.total_bytes))));
                for entry in report.entries.iter().take(10) {
                    self.writeln(&format!("        {:>10}  {}", format_bytes(entry.bytes), entry.path.display()));
                }
                if report.entries.len() > 10 {
                    self.writeln(&format!("        ... and {} more", report.entries.len() - 10));
                }
            }
            _ => {}
        }
    }

    fn summary(&self, result: &BuildResult) {
        let duration = format_duration(result.total_duration.as_millis() as u64);
        if result.is_success() {
            let files = result.all_outputs().len();
            self.writeln(&format!(
                "\n{} {} {} written in {}",
                self.green("[done]"),
                self.bold(&files.to_string()),
                if files == 1 { "file" } else { "files" },
                duration
            ));
        } else {
            let failed = result.failed_count();
            self.writeln(&format!(
                "\n{} Build failed: {} succeeded, {} {} in {}",
                self.red("[error]"),
                result.success_count(),
                failed,
                if failed == 1 { "failure" } else { "failures" },
                duration
            ));
            for target in result.failures() {
                self.writeln(&format!("        {}", self.red(&target.status.to_string())));
            }
        }
    }

    fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// JSON progress reporter for machine-readable output (one object per line).
pub struct JsonProgress {
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonProgress").finish()
    }
}

impl JsonProgress {
    /// Create a new JSON progress reporter writing to stderr.
    pub fn new() -> Self {
        Self { output: Mutex::new(Box::new(std::io::stderr())) }
    }

    /// Create a JSON progress reporter that writes to a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self { output: Mutex::new(Box::new(output)) }
    }

    fn write_json(&self, value: &impl serde::Serialize) {
        let Ok(line) = serde_json::to_string(value) else {
            return;
        };
        if let Ok(mut output) = self.output.lock() {
            let _ = writeln!(output, "{}", line);
        }
    }
}

impl Default for JsonProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, envelope: &Envelope) {
        self.write_json(envelope);
    }

    fn summary(&self, result: &BuildResult) {
        self.write_json(&serde_json::json!({
            "event": "summary",
            "success": result.is_success(),
            "result": result,
        }));
    }
}

/// Format a duration in milliseconds to a human-readable string.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let minutes = ms / 60_000;
        let seconds = (ms % 60_000) / 1000;
        format!("{}m {}s", minutes, seconds)
    }
}

/// Format a byte count with a binary unit.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuilderId, OutputFile, TargetResult, WriteReport};
    use crate::transform::Diagnostic;
    use std::path::PathBuf;
    use std::time::Duration;

    fn envelope(source: &str, via: &[&str], event: BuildEvent) -> Envelope {
        Envelope {
            source: BuilderId::new(source),
            via: via.iter().map(|v| BuilderId::new(*v)).collect(),
            event,
        }
    }

    fn capture() -> (Arc<Mutex<Vec<u8>>>, TestWriter) {
        let output = Arc::new(Mutex::new(Vec::new()));
        let writer = TestWriter(Arc::clone(&output));
        (output, writer)
    }

    fn text(output: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8_lossy(&output.lock().unwrap()).into_owned()
    }

    #[test]
    fn test_null_progress() {
        let reporter = NullProgress::new();
        reporter.report(&envelope("a", &[], BuildEvent::WriteStart));
        reporter.summary(&BuildResult::new());
        assert!(!reporter.is_verbose());
    }

    #[test]
    fn test_console_progress_quiet_skips_children() {
        let (output, writer) = capture();
        let reporter = ConsoleProgress::with_output(writer);
        reporter.report(&envelope("html:/i.html>style#0", &["html:/i.html"], BuildEvent::BuildEnd {
            duration_ms: 3,
            resources: 1,
        }));
        reporter.report(&envelope("html:/i.html", &[], BuildEvent::BuildEnd { duration_ms: 150, resources: 4 }));

        let text = text(&output);
        assert!(!text.contains("style#0"));
        assert!(text.contains("ok html:/i.html (4 resources, 150ms)"));
    }

    #[test]
    fn test_console_progress_verbose_shows_children() {
        let (output, writer) = capture();
        let reporter = ConsoleProgress::with_output(writer).with_verbose(true);
        reporter.report(&envelope("html:/i.html>style#0", &["html:/i.html"], BuildEvent::BuildStart {
            input: PathBuf::from("/a.css"),
        }));
        assert!(text(&output).contains("[build] html:/i.html>style#0..."));
        assert!(reporter.is_verbose());
    }

    #[test]
    fn test_console_progress_errors_and_warnings() {
        let (output, writer) = capture();
        let reporter = ConsoleProgress::with_output(writer);
        reporter.report(&envelope("script:/b.js", &["html:/i.html"], BuildEvent::Error {
            message: "input not found: /b.js".to_string(),
        }));
        reporter.report(&envelope("html:/i.html", &[], BuildEvent::Warning { message: "odd link".to_string() }));

        let text = text(&output);
        assert!(text.contains("[error] script:/b.js: input not found: /b.js"));
        assert!(text.contains("[warn] html:/i.html: odd link"));
    }

    #[test]
    fn test_console_progress_lint_lines() {
        let (output, writer) = capture();
        let reporter = ConsoleProgress::with_output(writer);
        reporter.report(&envelope("script:/a.js", &[], BuildEvent::LintResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                rule: "no-debugger".to_string(),
                message: "unexpected 'debugger' statement".to_string(),
                file: PathBuf::from("/a.js"),
                line: Some(2),
            }],
        }));
        assert!(text(&output).contains("[lint] /a.js:2 [no-debugger]"));
    }

    #[test]
    fn test_console_progress_write_end() {
        let (output, writer) = capture();
        let reporter = ConsoleProgress::with_output(writer);
        reporter.report(&envelope("copy:/a.txt", &[], BuildEvent::WriteEnd {
            outputs: vec![OutputFile { path: PathBuf::from("/dist/a.txt"), bytes: 2048 }],
        }));
        assert!(text(&output).contains("1 file (2.0 KiB)"));
    }

    #[test]
    fn test_console_progress_summary() {
        let (output, writer) = capture();
        let reporter = ConsoleProgress::with_output(writer);
        let mut result = BuildResult::new();
        result.add_result(TargetResult::failed(
            BuilderId::new("copy:/a"),
            PathBuf::from("/a"),
            &crate::build::BuildError::config("no output"),
            Duration::ZERO,
        ));
        reporter.summary(&result);
        let text = text(&output);
        assert!(text.contains("Build failed: 0 succeeded, 1 failure"));
        assert!(text.contains("no output"));
    }

    #[test]
    fn test_json_progress_lines() {
        let (output, writer) = capture();
        let reporter = JsonProgress::with_output(writer);
        reporter.report(&envelope("style:/a.css", &["html:/i.html"], BuildEvent::BuildEnd {
            duration_ms: 5,
            resources: 2,
        }));
        let mut result = BuildResult::new();
        result.add_result(TargetResult::success(
            BuilderId::new("style:/a.css"),
            PathBuf::from("/a.css"),
            WriteReport::new(),
            Duration::ZERO,
        ));
        reporter.summary(&result);

        let text = text(&output);
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines[0]["event"], "build-end");
        assert_eq!(lines[0]["via"][0], "html:/i.html");
        assert_eq!(lines[1]["event"], "summary");
        assert_eq!(lines[1]["success"], true);
    }

    #[test]
    fn test_attach_forwards_events() {
        let (output, writer) = capture();
        let reporter: Arc<dyn ProgressReporter> = Arc::new(JsonProgress::with_output(writer));
        let emitter = EventEmitter::new(BuilderId::new("copy:/a"));
        attach(reporter, &emitter);
        emitter.warn("hello");
        assert!(text(&output).contains("\"message\":\"hello\""));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(500), "500ms");
        assert_eq!(format_duration(1500), "1.5s");
        assert_eq!(format_duration(90_000), "1m 30s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(12), "12 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    struct TestWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
