//! Build System Test Suite
//!
//! Integration tests for the keel build system:
//!
//! - HTML entry builds (children, outputs, resource sets)
//! - Composite write ordering and error propagation
//! - Dependency index consistency
//! - Rebuild scheduling (coalescing, fan-out, runner thread)
//! - Watch sessions
//! - Progress reporting

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serial_test::serial;
use tempfile::TempDir;

use keel::build::progress::{attach, JsonProgress, NullProgress, ProgressReporter};
use keel::build::{
    BuildContext, BuildError, BuildEvent, Builder, BuilderId, BuilderOptions, BuilderState, ErrorKind, EventLog,
    Invalidation, ResourceSet, WriteError,
};
use keel::builders::{self, HtmlBuilder};
use keel::config::WatchConfig;
use keel::watch::{Change, DependencyIndex, Scheduler, SchedulerConfig, WatchOptions, WatchSession};

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a test file with content.
fn create_test_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// A page with one stylesheet and one module script.
fn create_site(dir: &Path) {
    create_test_file(
        dir,
        "index.html",
        r#"<!doctype html>
<html>
<head><link rel="stylesheet" href="a.css"></head>
<body><script type="module" src="b.js"></script></body>
</html>"#,
    );
    create_test_file(dir, "a.css", ".a { color: red; }\n");
    create_test_file(dir, "b.js", "console.log('b');\n");
}

fn html_builder(dir: &Path) -> Box<dyn Builder> {
    let ctx = BuildContext::default();
    let mut builder = builders::for_input(&dir.join("index.html"), &ctx);
    builder.setup(BuilderOptions::new("index.html").with_output_dir("dist").with_root(dir)).unwrap();
    builder
}

/// Test writer for capturing output.
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

// ============================================================================
// Entry Builds
// ============================================================================

#[test]
fn test_html_entry_builds_children_into_output_dir() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());

    let mut builder = html_builder(temp.path());
    builder.build(&Invalidation::new()).unwrap();
    let report = builder.write().unwrap();

    let dist = temp.path().join("dist");
    assert!(dist.join("index.html").exists());
    assert!(dist.join("a.css").exists());
    assert!(dist.join("b.js").exists());
    assert!(report.outputs.iter().any(|o| o.path == dist.join("index.html")));
    assert_eq!(builder.state(), BuilderState::Written);
    assert_eq!(builder.children().len(), 2);

    let expected: ResourceSet =
        ["index.html", "a.css", "b.js"].iter().map(|name| temp.path().join(name)).collect();
    for path in &expected {
        assert!(builder.resources().contains(path), "{} missing from resources", path.display());
    }

    let html = fs::read_to_string(dist.join("index.html")).unwrap();
    assert!(html.contains(r#"href="a.css""#));
    assert!(html.contains(r#"src="b.js""#));
}

#[test]
fn test_composite_writes_children_before_document() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());

    let mut builder = html_builder(temp.path());
    let log = EventLog::new();
    log.attach(builder.events());
    builder.build(&Invalidation::new()).unwrap();
    builder.write().unwrap();

    let sources: Vec<String> = log
        .envelopes()
        .into_iter()
        .filter(|e| matches!(e.event, BuildEvent::WriteEnd { .. }))
        .map(|e| e.source.to_string())
        .collect();
    assert_eq!(sources.len(), 3);
    assert!(sources[0].ends_with(">style#0"), "{:?}", sources);
    assert!(sources[1].ends_with(">script#1"), "{:?}", sources);
    assert_eq!(&sources[2], builder.id().as_str());
}

#[test]
fn test_write_before_build_is_rejected() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());

    let mut builder = html_builder(temp.path());
    let err = builder.write().unwrap_err();
    assert!(matches!(err, BuildError::Write(WriteError::NotBuilt(_))));
    assert_eq!(err.kind(), ErrorKind::Write);
    assert!(!temp.path().join("dist/index.html").exists());
}

#[test]
fn test_missing_child_input_fails_whole_build() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());
    fs::remove_file(temp.path().join("b.js")).unwrap();

    let mut builder = html_builder(temp.path());
    let err = builder.build(&Invalidation::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputNotFound);
    assert_eq!(err.child_path().len(), 1);
    assert_eq!(builder.state(), BuilderState::Error);
    assert!(!temp.path().join("dist/index.html").exists());
}

#[test]
#[serial]
fn test_relative_paths_resolve_against_working_directory() {
    let temp = TempDir::new().unwrap();
    create_test_file(temp.path(), "robots.txt", "User-agent: *\n");
    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(temp.path()).unwrap();

    let ctx = BuildContext::default();
    let mut builder = builders::for_input(Path::new("robots.txt"), &ctx);
    let outcome = builder
        .setup(BuilderOptions::new("robots.txt").with_output_dir("out"))
        .and_then(|()| builder.build(&Invalidation::new()))
        .and_then(|()| builder.write());

    std::env::set_current_dir(previous).unwrap();
    outcome.unwrap();
    assert_eq!(fs::read_to_string(temp.path().join("out/robots.txt")).unwrap(), "User-agent: *\n");
}

// ============================================================================
// Dependency Index
// ============================================================================

#[test]
fn test_index_tracks_builder_resources() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());
    let mut builder = html_builder(temp.path());
    builder.build(&Invalidation::new()).unwrap();

    let mut index = DependencyIndex::new();
    index.apply(builder.id(), builder.resources());
    for path in builder.resources() {
        assert!(index.lookup(path).contains(builder.id()));
    }
    assert_eq!(index.len(), builder.resources().len());

    // Shrinking the resource set prunes the index.
    let shrunk: ResourceSet = [temp.path().join("index.html")].into_iter().collect();
    let delta = index.apply(builder.id(), &shrunk);
    assert_eq!(delta.removed.len(), builder.resources().len() - 1);
    assert!(index.lookup(&temp.path().join("a.css")).is_empty());
}

// ============================================================================
// Rebuild Scheduling
// ============================================================================

fn scheduler_for(root: &Path) -> Scheduler {
    Scheduler::new(SchedulerConfig { debounce: Duration::ZERO, ignore: vec![root.join("dist")] })
}

#[test]
fn test_changes_to_one_target_coalesce() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());
    let mut builder = html_builder(temp.path());
    builder.build(&Invalidation::new()).unwrap();
    builder.write().unwrap();

    let scheduler = scheduler_for(temp.path());
    scheduler.register(builder.as_ref());
    assert_eq!(scheduler.notify(Change::changed(temp.path().join("a.css"))).len(), 1);
    assert_eq!(scheduler.notify(Change::changed(temp.path().join("b.js"))).len(), 1);
    assert_eq!(scheduler.pending(), vec![builder.id().clone()]);

    let mut hints: Vec<Invalidation> = Vec::new();
    let reports = scheduler.drain(|job| {
        hints.push(job.build_hint());
        builder.build(&job.build_hint())?;
        builder.write()?;
        Ok(builder.resources().clone())
    });
    assert_eq!(reports.len(), 1);
    assert!(reports[0].job.is_coalesced());
    assert_eq!(hints[0].len(), 2);
    assert!(hints[0].contains(&temp.path().join("a.css")));
    assert!(hints[0].contains(&temp.path().join("b.js")));
    assert!(reports[0].outcome.is_ok());
    assert_eq!(scheduler.stats().replaced, 1);
}

#[test]
fn test_shared_dependency_fans_out_to_every_dependent() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());
    let mut page = html_builder(temp.path());
    page.build(&Invalidation::new()).unwrap();

    let ctx = BuildContext::default();
    let mut sheet = builders::for_input(&temp.path().join("a.css"), &ctx);
    sheet.setup(BuilderOptions::new("a.css").with_output_dir("dist/standalone").with_root(temp.path())).unwrap();
    sheet.build(&Invalidation::new()).unwrap();

    let scheduler = scheduler_for(temp.path());
    scheduler.register(page.as_ref());
    scheduler.register(sheet.as_ref());

    let scheduled = scheduler.notify(Change::changed(temp.path().join("a.css")));
    assert_eq!(scheduled.len(), 2);
    assert!(scheduled.contains(page.id()) && scheduled.contains(sheet.id()));

    let only_page = scheduler.notify(Change::changed(temp.path().join("b.js")));
    assert_eq!(only_page, vec![page.id().clone()]);
    assert_eq!(scheduler.pending().len(), 2);
}

#[test]
fn test_changes_in_output_dir_are_ignored() {
    let temp = TempDir::new().unwrap();
    let scheduler = scheduler_for(temp.path());
    let id = BuilderId::new("copy:x");
    scheduler.record(&id, &[temp.path().join("dist/a.css")].into_iter().collect());
    assert!(scheduler.notify(Change::changed(temp.path().join("dist/a.css"))).is_empty());
}

#[test]
fn test_runner_thread_executes_jobs_in_order() {
    let temp = TempDir::new().unwrap();
    let scheduler = scheduler_for(temp.path());
    let (first, second) = (BuilderId::new("copy:first"), BuilderId::new("copy:second"));
    scheduler.record(&first, &[temp.path().join("first.txt")].into_iter().collect());
    scheduler.record(&second, &[temp.path().join("second.txt")].into_iter().collect());

    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    let handle = scheduler
        .spawn(move |job| {
            seen.lock().unwrap().push(job.target.clone());
            std::thread::sleep(Duration::from_millis(5));
            Ok(job.invalidate.iter().collect())
        })
        .unwrap();

    scheduler.notify(Change::changed(temp.path().join("first.txt")));
    scheduler.notify(Change::changed(temp.path().join("second.txt")));
    assert!(scheduler.wait_idle(Duration::from_secs(5)));
    handle.shutdown().unwrap();

    assert_eq!(*order.lock().unwrap(), vec![first, second]);
    assert_eq!(scheduler.stats().completed, 2);
}

#[test]
fn test_failed_job_keeps_target_watched() {
    let temp = TempDir::new().unwrap();
    let scheduler = scheduler_for(temp.path());
    let id = BuilderId::new("style:a");
    let input = temp.path().join("a.css");
    scheduler.record(&id, &[&input].into_iter().collect());

    scheduler.notify(Change::changed(&input));
    let reports = scheduler.drain(|_| Err(BuildError::InputNotFound(input.clone())));
    assert!(reports[0].outcome.is_err());
    assert_eq!(scheduler.dependents(&input).len(), 1);
    assert_eq!(scheduler.notify(Change::changed(&input)), vec![id]);
}

// ============================================================================
// Watch Sessions
// ============================================================================

#[test]
fn test_watch_session_rebuilds_page_on_stylesheet_change() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());
    let options = WatchOptions {
        root: temp.path().to_path_buf(),
        out_dir: PathBuf::from("dist"),
        targets: vec![BuilderOptions::new("index.html").with_output_dir("dist")],
        config: WatchConfig { debounce_ms: 0, ..Default::default() },
    };
    let mut session = WatchSession::new(options, Arc::new(NullProgress::new())).unwrap();
    assert!(session.initial_build().is_success());

    create_test_file(temp.path(), "a.css", ".a { color: green; }\n");
    let scheduled = session.notify(&temp.path().join("a.css"));
    assert_eq!(scheduled.as_slice(), session.target_ids());

    let reports = session.drain();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].outcome.is_ok());
    assert!(fs::read_to_string(temp.path().join("dist/a.css")).unwrap().contains("green"));
}

#[test]
fn test_watch_session_picks_up_new_references() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());
    let options = WatchOptions {
        root: temp.path().to_path_buf(),
        targets: vec![BuilderOptions::new("index.html").with_output_dir("dist")],
        config: WatchConfig { debounce_ms: 0, ..Default::default() },
        ..Default::default()
    };
    let mut session = WatchSession::new(options, Arc::new(NullProgress::new())).unwrap();
    session.initial_build();

    create_test_file(temp.path(), "c.css", ".c { margin: 0; }\n");
    create_test_file(
        temp.path(),
        "index.html",
        r#"<html><head><link rel="stylesheet" href="a.css"><link rel="stylesheet" href="c.css"></head><body></body></html>"#,
    );
    session.notify(&temp.path().join("index.html"));
    session.drain();

    assert!(temp.path().join("dist/c.css").exists());
    let watched: HashSet<PathBuf> = session.scheduler().watched_paths().into_iter().collect();
    assert!(watched.contains(&temp.path().join("c.css")));
    assert!(!watched.contains(&temp.path().join("b.js")));
}

// ============================================================================
// Progress Reporting
// ============================================================================

#[test]
fn test_json_progress_emits_one_object_per_event() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let reporter: Arc<dyn ProgressReporter> = Arc::new(JsonProgress::with_output(TestWriter(buffer.clone())));

    let mut builder = html_builder(temp.path());
    attach(reporter, builder.events());
    builder.build(&Invalidation::new()).unwrap();
    builder.write().unwrap();

    let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    let events: Vec<serde_json::Value> =
        output.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert!(events.iter().any(|e| e["event"] == "build-start"));
    assert!(events.iter().any(|e| e["event"] == "write-end" && e["source"] == builder.id().as_str()));
}

#[test]
fn test_html_builder_exposes_rendered_document() {
    let temp = TempDir::new().unwrap();
    create_site(temp.path());
    let mut builder = HtmlBuilder::new(BuilderId::new("html:index"), BuildContext::default());
    builder.setup(BuilderOptions::new("index.html").with_output_dir("dist").with_root(temp.path())).unwrap();
    builder.build(&Invalidation::new()).unwrap();
    let rendered = builder.rendered().unwrap();
    assert!(rendered.contains("<!doctype html>"));
}
