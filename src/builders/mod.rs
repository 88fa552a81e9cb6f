//! Concrete builders.
//!
//! Leaf builders (copy, script, style, icon) wrap one collaborator each;
//! composite builders (html, webmanifest, service worker) own child builders
//! through [`Children`].

pub mod composite;
pub mod copy;
pub mod html;
pub mod icon;
pub mod script;
pub mod service_worker;
pub mod style;
pub mod webmanifest;

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::build::{
    paths, BuildContext, BuildError, BuildEvent, Builder, BuilderCore, BuilderId, BuilderKind, Capability,
    EventLog, Invalidation, ResolvedOptions, ResourceSet, TargetResult, TransformReport, WriteReport,
};
use crate::transform::{AnalysisReport, Diagnostic};

pub use composite::Children;
pub use copy::CopyBuilder;
pub use html::HtmlBuilder;
pub use icon::IconBuilder;
pub use script::ScriptBuilder;
pub use service_worker::ServiceWorkerBuilder;
pub use style::StyleBuilder;
pub use webmanifest::{ManifestData, WebManifestBuilder};

/// Pick the builder kind for an input by its extension.
pub fn kind_for(path: &Path) -> BuilderKind {
    match paths::extension(path).as_deref() {
        Some("html" | "htm") => BuilderKind::Html,
        Some("css" | "scss" | "sass" | "less") => BuilderKind::Style,
        Some("js" | "mjs" | "cjs" | "ts" | "tsx" | "jsx") => BuilderKind::Script,
        Some("webmanifest") => BuilderKind::WebManifest,
        Some("png" | "jpg" | "jpeg" | "svg" | "gif" | "webp") => BuilderKind::Icon,
        _ => BuilderKind::Copy,
    }
}

/// Create a builder of `kind` with identity `id`.
pub fn create(kind: BuilderKind, id: BuilderId, ctx: &BuildContext) -> Box<dyn Builder> {
    match kind {
        BuilderKind::Copy => Box::new(CopyBuilder::new(id)),
        BuilderKind::Script => Box::new(ScriptBuilder::new(id, ctx.clone())),
        BuilderKind::Style => Box::new(StyleBuilder::new(id, ctx.clone())),
        BuilderKind::Icon => Box::new(IconBuilder::new(id, ctx.clone())),
        BuilderKind::Html => Box::new(HtmlBuilder::new(id, ctx.clone())),
        BuilderKind::WebManifest => Box::new(WebManifestBuilder::new(id, ctx.clone())),
        BuilderKind::ServiceWorker => Box::new(ServiceWorkerBuilder::new(id, ctx.clone())),
    }
}

/// Create the top-level builder for an input file.
pub fn for_input(input: &Path, ctx: &BuildContext) -> Box<dyn Builder> {
    let kind = kind_for(input);
    create(kind, BuilderId::root(kind, &paths::normalize(input)), ctx)
}

/// Build then write a top-level builder, recording the outcome and every
/// warning raised anywhere in its tree.
pub fn run_target(
    builder: &mut dyn Builder,
    input: &Path,
    invalidate: &Invalidation,
) -> (TargetResult, Result<(), BuildError>) {
    let started = Instant::now();
    let log = EventLog::new();
    let subscription = log.attach(builder.events());
    let outcome = builder.build(invalidate).and_then(|()| builder.write());
    builder.events().unsubscribe(subscription);

    let warnings: Vec<String> = log
        .envelopes()
        .into_iter()
        .filter_map(|e| match e.event {
            BuildEvent::Warning { message } => Some(format!("{}: {}", e.source, message)),
            _ => None,
        })
        .collect();
    let id = builder.id().clone();
    let duration = started.elapsed();
    match outcome {
        Ok(report) => (TargetResult::success(id, input.to_path_buf(), report, duration).with_warnings(warnings), Ok(())),
        Err(err) => {
            let result = TargetResult::failed(id, input.to_path_buf(), &err, duration).with_warnings(warnings);
            (result, Err(err))
        }
    }
}

/// Resource set of a transform-backed build: the input itself (unless it is
/// inline) plus every reported dependency that still exists.
pub(crate) fn collect_resources(options: &ResolvedOptions, dependencies: &[PathBuf]) -> ResourceSet {
    let mut resources = ResourceSet::new();
    if !options.is_inline() {
        resources.insert(&options.input);
    }
    resources.extend(dependencies);
    resources.retain_existing();
    resources
}

/// Run capabilities in order; the first failure wins.
pub(crate) fn run_capabilities(
    core: &BuilderCore,
    capabilities: &[Box<dyn Capability>],
    input: &Path,
    diagnostics: &[Diagnostic],
    analysis: Option<&AnalysisReport>,
    dependencies: &[PathBuf],
) -> Result<(), BuildError> {
    let report = TransformReport { input, diagnostics, analysis, dependencies };
    for capability in capabilities {
        tracing::trace!(builder = %core.id(), capability = capability.name(), "running capability");
        capability.apply(&report, core.events())?;
    }
    Ok(())
}

/// Write a generated file and, when present, its companion source map.
///
/// `comment` renders the `sourceMappingURL` trailer for the map's file name.
pub(crate) fn write_with_map(
    core: &BuilderCore,
    output: &Path,
    body: &str,
    map: Option<&str>,
    comment: impl Fn(&str) -> String,
    report: &mut WriteReport,
) -> Result<(), BuildError> {
    match map {
        Some(map) => {
            let map_path = PathBuf::from(format!("{}.map", output.display()));
            let map_name = map_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let mut contents = body.trim_end().to_string();
            contents.push('\n');
            contents.push_str(&comment(&map_name));
            contents.push('\n');
            core.write_file(output, contents.as_bytes(), report)?;
            core.write_file(&map_path, map.as_bytes(), report)
        }
        None => core.write_file(output, body.as_bytes(), report),
    }
}

/// Emit a `build-progress` event for a finished sub-item.
pub(crate) fn progress(core: &BuilderCore, item: impl Into<String>) {
    core.events().emit(BuildEvent::BuildProgress { item: item.into() });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_target_reports_outputs_and_failures() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("robots.txt"), "User-agent: *\n").unwrap();
        let ctx = BuildContext::default();

        let input = temp.path().join("robots.txt");
        let mut builder = for_input(&input, &ctx);
        builder.setup(crate::build::BuilderOptions::new(&input).with_output_dir(temp.path().join("dist"))).unwrap();
        let (result, outcome) = run_target(builder.as_mut(), &input, &Invalidation::new());
        assert!(outcome.is_ok());
        assert!(result.is_success());
        assert_eq!(result.outputs.len(), 1);

        std::fs::remove_file(&input).unwrap();
        let (result, outcome) = run_target(builder.as_mut(), &input, &Invalidation::new());
        assert!(!result.is_success());
        assert_eq!(outcome.unwrap_err().kind(), crate::build::ErrorKind::InputNotFound);
    }

    #[test]
    fn test_kind_for_extensions() {
        assert_eq!(kind_for(Path::new("index.HTML")), BuilderKind::Html);
        assert_eq!(kind_for(Path::new("theme.scss")), BuilderKind::Style);
        assert_eq!(kind_for(Path::new("app.tsx")), BuilderKind::Script);
        assert_eq!(kind_for(Path::new("site.webmanifest")), BuilderKind::WebManifest);
        assert_eq!(kind_for(Path::new("logo.svg")), BuilderKind::Icon);
        assert_eq!(kind_for(Path::new("robots.txt")), BuilderKind::Copy);
        assert_eq!(kind_for(Path::new("LICENSE")), BuilderKind::Copy);
    }

    #[test]
    fn test_for_input_identity() {
        let builder = for_input(Path::new("/site/./index.html"), &BuildContext::default());
        assert_eq!(builder.kind(), BuilderKind::Html);
        assert_eq!(builder.id().as_str(), "html:/site/index.html");
    }
}
