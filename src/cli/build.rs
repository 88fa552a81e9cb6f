//! Build command implementations (build, watch)

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use super::{BuildArgs, EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::progress::{attach, ConsoleProgress, JsonProgress, ProgressReporter};
use crate::build::{BuildContext, BuildResult, BuilderOptions, ErrorKind};
use crate::builders;
use crate::config::{load_project, merge_cli_overrides, resolve_path, KeelConfig};

/// What a command builds, resolved from keel.toml plus flags.
#[derive(Debug)]
pub(crate) struct Plan {
    pub root: PathBuf,
    pub entry: PathBuf,
    pub out_dir: PathBuf,
    pub options: BuilderOptions,
    pub config: KeelConfig,
}

/// Load configuration and resolve the entry builder's options.
pub(crate) fn plan(args: &BuildArgs, cwd: &Path) -> Result<Plan, String> {
    let loaded = load_project(args.config.as_deref(), cwd).map_err(|e| e.to_string())?;
    if args.verbose {
        match &loaded.path {
            Some(path) => println!("Using config: {}", path.display()),
            None => println!("No keel.toml found, using defaults"),
        }
    }

    let mut config = loaded.config;
    merge_cli_overrides(&mut config, &args.overrides());
    if let Some(error) = config.validate().into_iter().next() {
        return Err(error.to_string());
    }

    // An explicit entry is relative to where the command runs.
    let entry = match &args.entry {
        Some(entry) => resolve_path(cwd, entry),
        None => resolve_path(&loaded.root, &config.project.entry),
    };
    let out_dir = match &args.out {
        Some(out) => resolve_path(cwd, out),
        None => resolve_path(&loaded.root, &config.project.out),
    };
    let options = BuilderOptions::new(&entry)
        .with_output_dir(&out_dir)
        .with_root(&loaded.root)
        .with_flags(config.build.flags())
        .with_html(config.html.options());

    Ok(Plan { root: loaded.root, entry, out_dir, options, config })
}

fn reporter(args: &BuildArgs) -> Arc<dyn ProgressReporter> {
    if args.json {
        Arc::new(JsonProgress::new())
    } else {
        Arc::new(ConsoleProgress::new().with_verbose(args.verbose))
    }
}

/// Run the build command
pub fn run_build(args: &BuildArgs) -> ExitCode {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let plan = match plan(args, &cwd) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };
    if !plan.entry.exists() {
        eprintln!("Error: Entry not found: {}", plan.entry.display());
        eprintln!("Pass an entry path or set [project] entry in keel.toml");
        return ExitCode::from(EXIT_INVALID_ARGS);
    }
    let (result, exit) = build_once(&plan, reporter(args));
    tracing::info!(targets = result.targets.len(), success = result.is_success(), "build finished");
    exit
}

/// Set up, build and write the entry once, reporting through `reporter`.
pub(crate) fn build_once(plan: &Plan, reporter: Arc<dyn ProgressReporter>) -> (BuildResult, ExitCode) {
    let started = Instant::now();
    let ctx = BuildContext::default();
    let mut builder = builders::for_input(&plan.entry, &ctx);
    attach(Arc::clone(&reporter), builder.events());

    if let Err(e) = builder.setup(plan.options.clone()) {
        eprintln!("Error: {}", e);
        let code = if e.kind() == ErrorKind::Configuration { EXIT_INVALID_ARGS } else { EXIT_ERROR };
        return (BuildResult::new(), ExitCode::from(code));
    }

    let (target, _) = builders::run_target(builder.as_mut(), &plan.entry, &Default::default());
    let mut result = BuildResult::new();
    result.add_result(target);
    let result = result.with_duration(started.elapsed());
    reporter.summary(&result);

    let code = if result.is_success() { EXIT_SUCCESS } else { EXIT_ERROR };
    (result, ExitCode::from(code))
}

/// Run the watch command
pub fn run_watch(args: &BuildArgs) -> ExitCode {
    use crate::watch::{watch_and_rebuild, WatchOptions};

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let plan = match plan(args, &cwd) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let options = WatchOptions {
        root: plan.root.clone(),
        out_dir: plan.out_dir.clone(),
        targets: vec![plan.options.clone()],
        config: plan.config.watch.clone(),
    };

    println!("Starting watch mode...");
    println!("Press Ctrl+C to stop");
    println!();

    match watch_and_rebuild(options, reporter(args)) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Watch error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
