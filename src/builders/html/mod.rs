//! HTML document builder.
//!
//! The builder parses the document, registers one child per referenced
//! file, rewrites every reference to the child's output location, and
//! back-fills `<head>` metadata from the web manifest.
//!
//! Children are registered (and written) in this order: copied links,
//! style sheets, scripts, media sources, then the favicon set and the
//! manifest. A service worker declared by the manifest is a second-order
//! child created at write time, once the rest of the site is on disk.

pub mod discover;
pub mod document;

use rayon::join;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::build::{
    paths, BuildContext, BuildError, Builder, BuilderCore, BuilderId, BuilderKind, BuilderOptions, BuilderState,
    EventEmitter, Invalidation, ModuleFormat, OutputRule, ResolvedOptions, ResourceSet, WriteReport,
};
use crate::builders::composite::{build_optional, write_optional};
use crate::builders::webmanifest::manifest_output;
use crate::builders::{create, progress, Children, IconBuilder, ManifestData, ServiceWorkerBuilder, WebManifestBuilder};
use crate::transform::{default_favicons, TransformError};

use discover::{discover, Reference, ResourceKind};
use document::Document;

/// Builds an HTML document and everything it references.
#[derive(Debug)]
pub struct HtmlBuilder {
    core: BuilderCore,
    ctx: BuildContext,
    children: Children,
    icon: Option<IconBuilder>,
    manifest: Option<WebManifestBuilder>,
    manifest_source: Option<PathBuf>,
    worker: Option<ServiceWorkerBuilder>,
    /// Document with references rewritten, before manifest back-fill
    layout: Option<Document>,
    rendered: Option<String>,
}

impl HtmlBuilder {
    /// Create an unconfigured HTML builder.
    pub fn new(id: BuilderId, ctx: BuildContext) -> Self {
        let core = BuilderCore::new(id, BuilderKind::Html);
        let children = Children::new(core.events());
        Self {
            core,
            ctx,
            children,
            icon: None,
            manifest: None,
            manifest_source: None,
            worker: None,
            layout: None,
            rendered: None,
        }
    }

    /// Serialized document from the last successful build.
    pub fn rendered(&self) -> Option<&str> {
        self.rendered.as_deref()
    }

    /// Manifest fields from the last successful build, if there is a manifest.
    pub fn manifest_data(&self) -> Option<&ManifestData> {
        self.manifest.as_ref().and_then(|m| m.data())
    }

    fn child_id(&self, kind: BuilderKind) -> BuilderId {
        let offset = self.icon.is_some() as usize + self.manifest.is_some() as usize;
        self.core.id().child(kind, self.children.len() + offset)
    }

    /// Register a child for `input` writing to `output`.
    fn register(
        &mut self,
        kind: BuilderKind,
        options: BuilderOptions,
    ) -> Result<(), BuildError> {
        let id = self.child_id(kind);
        let index = self.children.register(create(kind, id.clone(), &self.ctx));
        match self.children.get_mut(index) {
            Some(child) => child.setup(options).map_err(|err| err.in_child(&id)),
            None => Err(BuildError::config(format!("{} was not registered", id))),
        }
    }

    /// Parse the document, register children and rewrite references.
    fn plan(&mut self, options: &ResolvedOptions) -> Result<Document, BuildError> {
        let transform_error = |source| BuildError::Transform { path: options.input.clone(), source };
        let source = match &options.inline {
            Some(code) => code.clone(),
            None => std::fs::read_to_string(&options.input)
                .map_err(|source| transform_error(TransformError::Read { path: options.input.clone(), source }))?,
        };
        let mut doc = Document::parse(&source).map_err(transform_error)?;

        let base = options.input_dir();
        let out_dir = options.output_dir();
        let stem = options.input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let found = discover(&doc, &base, options.html.unknown_links);
        if let Some((_, href)) = found.unclassified.first() {
            return Err(transform_error(TransformError::Other(format!(
                "cannot classify <link href=\"{}\">: it has no rel and no known extension",
                href
            ))));
        }

        self.children.clear();
        self.icon = None;
        self.manifest = None;
        self.manifest_source = None;
        self.worker = None;

        // Distinct sources that mirror to the same place (same-named files
        // outside the input directory) get numbered siblings.
        let mut outputs: HashMap<(ResourceKind, PathBuf), PathBuf> = HashMap::new();
        let mut taken: HashSet<PathBuf> = HashSet::new();
        for kind in [ResourceKind::Link, ResourceKind::Style, ResourceKind::Script, ResourceKind::Source] {
            let (builder_kind, extension) = match kind {
                ResourceKind::Style => (BuilderKind::Style, Some("css")),
                ResourceKind::Script => (BuilderKind::Script, Some("js")),
                _ => (BuilderKind::Copy, None),
            };
            for reference in found.references.iter().filter(|r| r.kind == kind) {
                let key = (kind, reference.path.clone());
                let output = match outputs.get(&key) {
                    Some(output) => output.clone(),
                    None => {
                        let mirrored = paths::mirror(&base, &out_dir, &reference.path, extension);
                        let output = paths::disambiguate(&mirrored, &taken);
                        if output != mirrored {
                            tracing::warn!(
                                source = %reference.path.display(),
                                output = %output.display(),
                                "output name already taken, renamed"
                            );
                        }
                        taken.insert(output.clone());
                        let child = child_options(options, BuilderOptions::new(&reference.path), &output)
                            .with_format(reference.format);
                        self.register(builder_kind, child)?;
                        outputs.insert(key, output.clone());
                        output
                    }
                };
                rewrite(&mut doc, reference, &out_dir, &output);
            }

            let (inline, extension, markup): (&[(usize, String)], &str, fn(&str) -> String) = match kind {
                ResourceKind::Style => (&found.inline_styles, "css", stylesheet_link),
                ResourceKind::Script => (&found.inline_modules, "js", module_script),
                _ => continue,
            };
            if inline.is_empty() {
                continue;
            }
            let code = inline.iter().map(|(_, code)| code.as_str()).collect::<Vec<_>>().join("\n");
            let virtual_path = base.join(format!("{}.inline.{}", stem, extension));
            let output = paths::disambiguate(&paths::mirror(&base, &out_dir, &virtual_path, Some(extension)), &taken);
            taken.insert(output.clone());
            let child = child_options(options, BuilderOptions::inline(code, &virtual_path), &output)
                .with_format(ModuleFormat::Esm);
            self.register(builder_kind, child)?;

            let url = paths::relative_url(&out_dir, &output);
            for (position, (node, _)) in inline.iter().enumerate() {
                if position == 0 {
                    doc.replace(*node, markup(&url));
                } else {
                    doc.remove(*node);
                }
            }
        }

        // Index-based edits are done; insertions below shift node indices.
        let icon_links: Vec<&Reference> = found.references.iter().filter(|r| r.kind == ResourceKind::Icon).collect();
        let icon_source = icon_links.first().map(|r| r.path.clone()).or_else(|| options.html.icon.clone());
        for reference in &icon_links {
            doc.remove(reference.node);
        }

        let manifest_links: Vec<&Reference> =
            found.references.iter().filter(|r| r.kind == ResourceKind::Manifest).collect();
        let manifest_source = manifest_links.first().map(|r| r.path.clone()).or_else(|| options.html.manifest.clone());
        if let Some(source) = &manifest_source {
            let output = manifest_output(&base, &out_dir, source);
            for reference in &manifest_links {
                rewrite(&mut doc, reference, &out_dir, &output);
            }
            if manifest_links.is_empty() {
                let url = paths::relative_url(&out_dir, &output);
                doc.insert_in_head(&format!("<link rel=\"manifest\" href=\"{}\">", url));
            }
        }

        if let Some(source) = &icon_source {
            let id = self.child_id(BuilderKind::Icon);
            let mut icon = IconBuilder::new(id.clone(), self.ctx.clone());
            self.core.events().forward_from(icon.events());
            let icon_options = BuilderOptions::new(source)
                .with_output_dir(&out_dir)
                .with_root(&options.root)
                .with_flags(options.flags.clone());
            icon.setup(icon_options).map_err(|err| err.in_child(&id))?;
            for spec in default_favicons() {
                let url = paths::relative_url(&out_dir, &out_dir.join(&spec.name));
                doc.insert_in_head(&format!(
                    "<link rel=\"{}\" type=\"{}\" sizes=\"{}\" href=\"{}\">",
                    spec.rel.as_deref().unwrap_or("icon"),
                    spec.kind.mime(),
                    spec.sizes(),
                    url
                ));
            }
            self.icon = Some(icon);
        }

        if let Some(source) = &manifest_source {
            let id = self.child_id(BuilderKind::WebManifest);
            let mut manifest = WebManifestBuilder::new(id.clone(), self.ctx.clone());
            self.core.events().forward_from(manifest.events());
            let mut manifest_options =
                child_options(options, BuilderOptions::new(source), &manifest_output(&base, &out_dir, source));
            manifest_options.manifest_icon = icon_source.clone();
            manifest.setup(manifest_options).map_err(|err| err.in_child(&id))?;
            self.manifest = Some(manifest);
            self.manifest_source = Some(source.clone());
        }

        tracing::debug!(
            builder = %self.core.id(),
            children = self.children.len(),
            icon = self.icon.is_some(),
            manifest = self.manifest.is_some(),
            "planned document"
        );
        Ok(doc)
    }

    fn build_children(&mut self, invalidate: &Invalidation) -> Result<(), BuildError> {
        let Self { children, icon, manifest, .. } = self;
        let (links, (icon, manifest)) = join(
            || children.build_all(invalidate),
            || join(|| build_optional(icon, invalidate), || build_optional(manifest, invalidate)),
        );
        links.and(icon).and(manifest)
    }

    fn try_build(&mut self, options: &ResolvedOptions, invalidate: &Invalidation) -> Result<ResourceSet, BuildError> {
        let full = invalidate.is_empty() || invalidate.contains(&options.input) || self.layout.is_none();
        if full {
            self.layout = None;
            let layout = self.plan(options)?;
            self.layout = Some(layout);
            self.build_children(&Invalidation::new())?;
        } else {
            self.build_children(invalidate)?;
        }
        progress(&self.core, format!("{} resource(s)", self.children.len()));

        let mut doc = match &self.layout {
            Some(layout) => layout.clone(),
            None => return Err(BuildError::config(format!("{} has no planned document", self.core.id()))),
        };
        if let Some(data) = self.manifest_data() {
            backfill(&mut doc, data);
        }
        self.rendered = Some(doc.serialize());

        let mut resources = ResourceSet::new();
        if !options.is_inline() {
            resources.insert(&options.input);
        }
        resources.merge(&self.children.resources());
        if let Some(icon) = &self.icon {
            resources.merge(icon.resources());
        }
        if let Some(manifest) = &self.manifest {
            resources.merge(manifest.resources());
        }
        Ok(resources)
    }

    /// Build and write the manifest's service worker next to the manifest.
    fn write_worker(&mut self, options: &ResolvedOptions, report: &mut WriteReport) -> Result<(), BuildError> {
        let declared = self
            .manifest_data()
            .and_then(|d| d.serviceworker_src())
            .filter(|src| !paths::is_remote(src))
            .map(|src| paths::strip_query(src).trim_start_matches('/').to_string());
        let Some(src) = declared else {
            self.worker = None;
            return Ok(());
        };
        let (Some(source), Some(output)) =
            (&self.manifest_source, self.manifest.as_ref().and_then(|m| m.output_path()))
        else {
            return Ok(());
        };
        let input = paths::resolve(source.parent().unwrap_or(&options.root), Path::new(&src));
        let output = paths::resolve(output.parent().unwrap_or(&options.root), Path::new(&src));

        let id = self.child_id(BuilderKind::ServiceWorker);
        let mut worker = ServiceWorkerBuilder::new(id.clone(), self.ctx.clone());
        self.core.events().forward_from(worker.events());
        let worker_options = child_options(options, BuilderOptions::new(input), &output)
            .with_precache_root(options.output_dir());
        let result = worker
            .setup(worker_options)
            .and_then(|()| worker.build(&Invalidation::new()))
            .and_then(|()| worker.write())
            .map_err(|err| err.in_child(&id));
        self.core.extend_resources(worker.resources());
        self.worker = Some(worker);
        report.extend(result?);
        Ok(())
    }

    fn try_write(&mut self, options: &ResolvedOptions) -> Result<WriteReport, BuildError> {
        let mut report = self.children.write_all()?;
        write_optional(&mut self.icon, &mut report)?;
        write_optional(&mut self.manifest, &mut report)?;
        let rendered = self.rendered.clone().unwrap_or_default();
        self.core.write_file(&options.output, rendered.as_bytes(), &mut report)?;
        self.write_worker(options, &mut report)?;
        Ok(report)
    }
}

fn stylesheet_link(url: &str) -> String {
    format!("<link rel=\"stylesheet\" href=\"{}\">", url)
}

fn module_script(url: &str) -> String {
    format!("<script type=\"module\" src=\"{}\"></script>", url)
}

/// Options for a child: same root and flags, explicit output.
fn child_options(options: &ResolvedOptions, base: BuilderOptions, output: &Path) -> BuilderOptions {
    base.with_output(output).with_root(&options.root).with_flags(options.flags.clone())
}

/// Point a reference at `output`, keeping its query string and fragment.
fn rewrite(doc: &mut Document, reference: &Reference, from_dir: &Path, output: &Path) {
    let url = format!("{}{}", paths::relative_url(from_dir, output), reference.suffix);
    if let Some(element) = doc.element_mut(reference.node) {
        if element.attr(reference.attr).as_deref() != Some(url.as_str()) {
            element.set_attr(reference.attr, &url);
        }
    }
}

/// Fill `<head>` metadata the author did not declare.
fn backfill(doc: &mut Document, data: &ManifestData) {
    if let Some(title) = data.title() {
        doc.ensure_title(title);
    }
    if let Some(description) = &data.description {
        doc.ensure_meta("description", description);
    }
    if let Some(theme_color) = &data.theme_color {
        doc.ensure_meta("theme-color", theme_color);
    }
    if let Some(scope) = &data.scope {
        doc.ensure_base(scope);
    }
    if let Some(lang) = &data.lang {
        doc.ensure_lang(lang);
    }
}

impl Builder for HtmlBuilder {
    fn id(&self) -> &BuilderId {
        self.core.id()
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::Html
    }

    fn setup(&mut self, options: BuilderOptions) -> Result<(), BuildError> {
        self.children.clear();
        self.icon = None;
        self.manifest = None;
        self.manifest_source = None;
        self.worker = None;
        self.layout = None;
        self.rendered = None;
        self.core.configure(&options, &OutputRule::same_name())
    }

    fn build(&mut self, invalidate: &Invalidation) -> Result<(), BuildError> {
        let (options, started) = self.core.begin_build()?;
        let span = tracing::debug_span!("html", builder = %self.core.id());
        let _guard = span.enter();
        match self.try_build(&options, invalidate) {
            Ok(resources) => {
                self.core.finish_build(resources, started);
                Ok(())
            }
            Err(err) => {
                self.rendered = None;
                self.core.fail(err)
            }
        }
    }

    fn write(&mut self) -> Result<WriteReport, BuildError> {
        let options = self.core.begin_write()?;
        match self.try_write(&options) {
            Ok(report) => Ok(self.core.finish_write(report)),
            Err(err) => self.core.fail(err),
        }
    }

    fn resources(&self) -> &ResourceSet {
        self.core.resources()
    }

    fn state(&self) -> BuilderState {
        self.core.state()
    }

    fn events(&self) -> &EventEmitter {
        self.core.events()
    }

    fn output_path(&self) -> Option<&Path> {
        self.core.output_path()
    }

    fn input_path(&self) -> Option<&Path> {
        self.core.input_path()
    }

    fn children(&self) -> Vec<&dyn Builder> {
        let mut children: Vec<&dyn Builder> = self.children.iter().collect();
        if let Some(icon) = &self.icon {
            children.push(icon);
        }
        if let Some(manifest) = &self.manifest {
            children.push(manifest);
        }
        if let Some(worker) = &self.worker {
            children.push(worker);
        }
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{ErrorKind, EventLog, HtmlOptions, LinkPolicy};
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn build(temp: &TempDir, options: BuilderOptions) -> (HtmlBuilder, EventLog) {
        let mut builder = HtmlBuilder::new(BuilderId::new("html:index"), BuildContext::default());
        let log = EventLog::new();
        log.attach(builder.events());
        builder.setup(options.with_root(temp.path())).unwrap();
        builder.build(&Invalidation::new()).unwrap();
        builder.write().unwrap();
        (builder, log)
    }

    #[test]
    fn test_styles_and_scripts_rewritten() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "styles/a.css", ".a { color: red; }\n");
        write(temp.path(), "lib/dep.js", "export const x = 1;\n");
        write(temp.path(), "b.ts", "import { x } from './lib/dep.js';\nconsole.log(x);\n");
        write(
            temp.path(),
            "index.html",
            r#"<html><head><link rel="stylesheet" href="styles/a.css?v=3"></head>
<body><script type="module" src="b.ts"></script><img src="https://example.com/x.png"></body></html>"#,
        );

        let (builder, _log) = build(&temp, BuilderOptions::new("index.html").with_output_dir("dist"));
        let html = std::fs::read_to_string(temp.path().join("dist/index.html")).unwrap();
        assert!(html.contains(r#"href="styles/a.css?v=3""#));
        assert!(html.contains(r#"<script type="module" src="b.js"></script>"#));
        assert!(html.contains(r#"<img src="https://example.com/x.png">"#));
        assert!(temp.path().join("dist/styles/a.css").exists());
        assert!(temp.path().join("dist/b.js").exists());

        for file in ["index.html", "styles/a.css", "b.ts", "lib/dep.js"] {
            assert!(builder.resources().contains(&temp.path().join(file)), "{} missing", file);
        }
    }

    #[test]
    fn test_inline_blocks_are_extracted() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "util.js", "export const y = 2;\n");
        write(
            temp.path(),
            "page.html",
            r#"<head><style>.a { color: red; }</style><style>.b { color: blue; }</style></head>
<body><script type="module">import { y } from './util.js'; console.log(y);</script><script>var classic = 1;</script></body>"#,
        );

        build(&temp, BuilderOptions::new("page.html").with_output_dir("dist"));
        let html = std::fs::read_to_string(temp.path().join("dist/page.html")).unwrap();
        assert_eq!(html.matches("<style>").count(), 0);
        assert!(html.contains(r#"<link rel="stylesheet" href="page.inline.css">"#));
        assert!(html.contains(r#"<script type="module" src="page.inline.js"></script>"#));
        assert!(html.contains("<script>var classic = 1;</script>"));

        let css = std::fs::read_to_string(temp.path().join("dist/page.inline.css")).unwrap();
        assert!(css.contains(".a") && css.contains(".b"));
        let js = std::fs::read_to_string(temp.path().join("dist/page.inline.js")).unwrap();
        assert!(js.contains("const y = 2"));
    }

    #[test]
    fn test_same_named_files_outside_input_dir_get_distinct_outputs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a/x.css", ".from-a { color: red; }\n");
        write(temp.path(), "b/x.css", ".from-b { color: blue; }\n");
        write(
            temp.path(),
            "site/index.html",
            r#"<head><link rel="stylesheet" href="../a/x.css"><link rel="stylesheet" href="../b/x.css"></head>"#,
        );

        build(&temp, BuilderOptions::new("site/index.html").with_output_dir("dist"));
        let html = std::fs::read_to_string(temp.path().join("dist/index.html")).unwrap();
        assert!(html.contains(r#"href="x.css""#));
        assert!(html.contains(r#"href="x-1.css""#));
        let first = std::fs::read_to_string(temp.path().join("dist/x.css")).unwrap();
        let second = std::fs::read_to_string(temp.path().join("dist/x-1.css")).unwrap();
        assert!(first.contains(".from-a"));
        assert!(second.contains(".from-b"));
    }

    #[test]
    fn test_write_order_follows_registration() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.css", "a { color: red; }\n");
        write(temp.path(), "b.js", "console.log(1);\n");
        write(temp.path(), "logo.svg", "<svg></svg>");
        write(temp.path(), "robots.txt", "User-agent: *\n");
        write(
            temp.path(),
            "index.html",
            r#"<script src="b.js"></script><img src="logo.svg"><link rel="stylesheet" href="a.css"><link rel="alternate" href="robots.txt">"#,
        );

        let (_builder, log) = build(&temp, BuilderOptions::new("index.html").with_output_dir("dist"));
        let writers: Vec<String> = log
            .envelopes()
            .into_iter()
            .filter(|e| e.event.name() == "write-end")
            .map(|e| e.source.to_string())
            .collect();
        assert_eq!(
            writers,
            vec!["html:index>copy#0", "html:index>style#1", "html:index>script#2", "html:index>copy#3", "html:index"]
        );
    }

    #[test]
    fn test_manifest_backfill_and_service_worker() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "app.webmanifest",
            r##"{"name": "Keel", "description": "Demo", "theme_color": "#123456", "lang": "en", "serviceworker": {"src": "sw.js"}}"##,
        );
        write(
            temp.path(),
            "index.html",
            r#"<html><head><meta name="description" content="Mine"><link rel="manifest" href="app.webmanifest"></head><body></body></html>"#,
        );

        let (builder, _log) = build(&temp, BuilderOptions::new("index.html").with_output_dir("dist"));
        let html = std::fs::read_to_string(temp.path().join("dist/index.html")).unwrap();
        assert!(html.contains("<title>Keel</title>"));
        assert!(html.contains(r#"content="Mine""#));
        assert!(!html.contains(r#"content="Demo""#));
        assert!(html.contains(r##"<meta name="theme-color" content="#123456">"##));
        assert!(html.contains(r#"<html lang="en">"#));

        let sw = std::fs::read_to_string(temp.path().join("dist/sw.js")).unwrap();
        assert!(sw.contains(r#""url":"index.html""#));
        assert!(sw.contains(r#""url":"app.webmanifest""#));
        assert_eq!(builder.children().len(), 2);
    }

    #[test]
    fn test_implied_icon_and_manifest() {
        let temp = TempDir::new().unwrap();
        RgbaImage::from_pixel(48, 48, Rgba([200, 0, 0, 255])).save(temp.path().join("logo.png")).unwrap();
        write(temp.path(), "site.webmanifest", r#"{"name": "Implied"}"#);
        write(temp.path(), "index.html", "<html><head></head><body></body></html>");

        let html_options = HtmlOptions {
            icon: Some(PathBuf::from("logo.png")),
            manifest: Some(PathBuf::from("site.webmanifest")),
            unknown_links: LinkPolicy::Ignore,
        };
        build(&temp, BuilderOptions::new("index.html").with_output_dir("dist").with_html(html_options));

        let html = std::fs::read_to_string(temp.path().join("dist/index.html")).unwrap();
        assert!(html.contains(r#"<link rel="manifest" href="site.webmanifest">"#));
        assert!(html.contains(r#"<link rel="icon" type="image/png" sizes="16x16" href="favicon-16x16.png">"#));
        assert!(html.contains(r#"rel="apple-touch-icon""#));
        assert!(temp.path().join("dist/favicon-32x32.png").exists());
        assert!(temp.path().join("dist/icon-192x192.png").exists());

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(temp.path().join("dist/site.webmanifest")).unwrap()).unwrap();
        assert_eq!(manifest["icons"].as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn test_child_failure_aborts_build() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", r#"<link rel="stylesheet" href="missing.css">"#);

        let mut builder = HtmlBuilder::new(BuilderId::new("html:index"), BuildContext::default());
        let log = EventLog::new();
        log.attach(builder.events());
        builder.setup(BuilderOptions::new("index.html").with_output_dir("dist").with_root(temp.path())).unwrap();
        let err = builder.build(&Invalidation::new()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InputNotFound);
        assert_eq!(err.child_path(), vec![&BuilderId::new("html:index>style#0")]);
        assert_eq!(builder.state(), BuilderState::Error);
        let errors: Vec<_> = log.envelopes().into_iter().filter(|e| e.event.name() == "error").collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].via, vec![BuilderId::new("html:index")]);
        assert!(builder.write().is_err());
    }

    #[test]
    fn test_unknown_link_policy_error() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", r#"<link href="LICENSE">"#);
        write(temp.path(), "LICENSE", "MIT");

        let mut builder = HtmlBuilder::new(BuilderId::new("html:index"), BuildContext::default());
        let html = HtmlOptions { unknown_links: LinkPolicy::Error, ..Default::default() };
        builder
            .setup(BuilderOptions::new("index.html").with_output_dir("dist").with_root(temp.path()).with_html(html))
            .unwrap();
        assert_eq!(builder.build(&Invalidation::new()).unwrap_err().kind(), ErrorKind::Transform);
    }

    #[test]
    fn test_partial_rebuild_touches_only_affected_child() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.css", ".a { color: red; }\n");
        write(temp.path(), "b.js", "console.log(1);\n");
        write(temp.path(), "index.html", r#"<link rel="stylesheet" href="a.css"><script src="b.js"></script>"#);

        let (mut builder, log) = build(&temp, BuilderOptions::new("index.html").with_output_dir("dist"));
        log.clear();
        write(temp.path(), "a.css", ".a { color: blue; }\n");
        let changed: Invalidation = [temp.path().join("a.css")].into_iter().collect();
        builder.build(&changed).unwrap();

        let started: Vec<String> = log
            .envelopes()
            .into_iter()
            .filter(|e| e.event.name() == "build-start")
            .map(|e| e.source.to_string())
            .collect();
        assert_eq!(started, vec!["html:index", "html:index>style#0"]);
    }
}
