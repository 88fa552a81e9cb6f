//! Web app manifest builder.

use rayon::join;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::build::{
    paths, BuildContext, BuildError, Builder, BuilderCore, BuilderId, BuilderKind, BuilderOptions, BuilderState,
    EventEmitter, Invalidation, OutputRule, ResolvedOptions, ResourceSet, WriteReport,
};
use crate::builders::composite::{build_optional, write_optional};
use crate::builders::{progress, Children, CopyBuilder, IconBuilder};
use crate::transform::{default_manifest_icons, TransformError};

/// Companion service worker declared by a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceWorkerRef {
    /// Script location, relative to the manifest
    pub src: Option<String>,
    /// Registration scope
    pub scope: Option<String>,
}

/// The manifest fields other builders care about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManifestData {
    /// Application name
    pub name: Option<String>,
    /// Short application name
    pub short_name: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Theme colour
    pub theme_color: Option<String>,
    /// Splash background colour
    pub background_color: Option<String>,
    /// Navigation scope
    pub scope: Option<String>,
    /// Primary language
    pub lang: Option<String>,
    /// Start URL
    pub start_url: Option<String>,
    /// Companion service worker
    pub serviceworker: Option<ServiceWorkerRef>,
}

impl ManifestData {
    /// Name to use as a document title.
    pub fn title(&self) -> Option<&str> {
        self.name.as_deref().or(self.short_name.as_deref())
    }

    /// Declared service worker script, if any.
    pub fn serviceworker_src(&self) -> Option<&str> {
        self.serviceworker.as_ref().and_then(|sw| sw.src.as_deref()).filter(|s| !s.trim().is_empty())
    }
}

/// Parsed manifest plus where each local icon was sent.
#[derive(Debug, Clone)]
struct Parsed {
    source: Value,
    /// `(icons[] index, child index, query suffix)`
    icons: Vec<(usize, usize, String)>,
}

/// Builds a `.webmanifest`: copies local icons, optionally generates the
/// standard icon sizes from a source image, and rewrites every icon `src`
/// to point at its output.
#[derive(Debug)]
pub struct WebManifestBuilder {
    core: BuilderCore,
    ctx: BuildContext,
    children: Children,
    icon: Option<IconBuilder>,
    parsed: Option<Parsed>,
    rendered: Option<String>,
    data: Option<ManifestData>,
}

impl WebManifestBuilder {
    /// Create an unconfigured manifest builder.
    pub fn new(id: BuilderId, ctx: BuildContext) -> Self {
        let core = BuilderCore::new(id, BuilderKind::WebManifest);
        let children = Children::new(core.events());
        Self { core, ctx, children, icon: None, parsed: None, rendered: None, data: None }
    }

    /// Manifest fields from the last successful build.
    pub fn data(&self) -> Option<&ManifestData> {
        self.data.as_ref()
    }

    fn parse(&mut self, options: &ResolvedOptions) -> Result<Parsed, BuildError> {
        let text = match &options.inline {
            Some(code) => code.clone(),
            None => std::fs::read_to_string(&options.input)
                .map_err(|source| transform_error(options, TransformError::Read { path: options.input.clone(), source }))?,
        };
        let source: Value = serde_json::from_str(&text).map_err(|e| {
            transform_error(options, TransformError::Parse { path: options.input.clone(), message: e.to_string() })
        })?;
        if !source.is_object() {
            return Err(transform_error(
                options,
                TransformError::Parse { path: options.input.clone(), message: "manifest must be a JSON object".into() },
            ));
        }

        self.children.clear();
        let input_dir = options.input_dir();
        let output_dir = options.output_dir();
        let mut icons = Vec::new();
        let entries = source.get("icons").and_then(Value::as_array).cloned().unwrap_or_default();
        for (index, entry) in entries.iter().enumerate() {
            let Some(src) = entry.get("src").and_then(Value::as_str) else { continue };
            if paths::is_remote(src) {
                continue;
            }
            let file = paths::strip_query(src);
            let path = paths::resolve(&input_dir, Path::new(file));
            if !path.is_file() {
                self.core.events().warn(format!("manifest icon not found: {}", path.display()));
                continue;
            }
            let id = self.core.id().child(BuilderKind::Copy, self.children.len());
            let mut child = CopyBuilder::new(id);
            let output = paths::mirror(&input_dir, &output_dir, &path, None);
            child.setup(options_for_child(options, &path, &output))?;
            let child_index = self.children.register(Box::new(child));
            icons.push((index, child_index, src[file.len()..].to_string()));
        }

        self.icon = match &options.manifest_icon {
            Some(source_image) => {
                let id = self.core.id().child(BuilderKind::Icon, self.children.len());
                let mut icon = IconBuilder::new(id, self.ctx.clone());
                self.core.events().forward_from(icon.events());
                icon.setup(
                    BuilderOptions::new(source_image)
                        .with_root(&options.root)
                        .with_flags(options.flags.clone())
                        .with_output_dir(&output_dir)
                        .with_icons(default_manifest_icons()),
                )?;
                Some(icon)
            }
            None => None,
        };
        Ok(Parsed { source, icons })
    }

    /// Rewrite icon sources and append generated icons.
    fn render(&self, parsed: &Parsed, options: &ResolvedOptions) -> Result<(String, ManifestData), BuildError> {
        let output_dir = options.output_dir();
        let mut manifest = parsed.source.clone();
        if let Some(entries) = manifest.get_mut("icons").and_then(Value::as_array_mut) {
            for (index, child, suffix) in &parsed.icons {
                let target = self.children.get(*child).and_then(|c| c.output_path());
                if let (Some(entry), Some(target)) = (entries.get_mut(*index), target) {
                    entry["src"] = Value::String(format!("{}{}", paths::relative_url(&output_dir, target), suffix));
                }
            }
        }
        if let Some(icon) = &self.icon {
            let generated: Vec<Value> = icon
                .icon_outputs()
                .into_iter()
                .map(|(spec, path)| {
                    json!({
                        "src": paths::relative_url(&output_dir, &path),
                        "sizes": spec.sizes(),
                        "type": spec.kind.mime(),
                    })
                })
                .collect();
            match manifest.get_mut("icons").and_then(Value::as_array_mut) {
                Some(entries) => entries.extend(generated),
                None => manifest["icons"] = Value::Array(generated),
            }
        }

        let data: ManifestData = serde_json::from_value(manifest.clone()).map_err(|e| {
            transform_error(options, TransformError::Parse { path: options.input.clone(), message: e.to_string() })
        })?;
        let text = serde_json::to_string_pretty(&manifest)
            .map_err(|e| transform_error(options, TransformError::Other(e.to_string())))?;
        Ok((text, data))
    }

    fn build_children(&mut self, invalidate: &Invalidation) -> Result<(), BuildError> {
        let Self { children, icon, .. } = self;
        let (links, icon) = join(|| children.build_all(invalidate), || build_optional(icon, invalidate));
        links.and(icon)
    }

    fn try_build(&mut self, options: &ResolvedOptions, invalidate: &Invalidation) -> Result<ResourceSet, BuildError> {
        let full = invalidate.is_empty() || invalidate.contains(&options.input) || self.parsed.is_none();
        if full {
            self.parsed = None;
            let parsed = self.parse(options)?;
            self.parsed = Some(parsed);
            self.build_children(&Invalidation::new())?;
        } else {
            self.build_children(invalidate)?;
        }
        progress(&self.core, format!("{} icon(s)", self.children.len()));

        let Some(parsed) = &self.parsed else {
            return Err(BuildError::config(format!("{} has no parsed manifest", self.core.id())));
        };
        let (text, data) = self.render(parsed, options)?;
        self.rendered = Some(text);
        self.data = Some(data);

        let mut resources = ResourceSet::new();
        if !options.is_inline() {
            resources.insert(&options.input);
        }
        resources.merge(&self.children.resources());
        if let Some(icon) = &self.icon {
            resources.merge(icon.resources());
        }
        Ok(resources)
    }
}

fn transform_error(options: &ResolvedOptions, source: TransformError) -> BuildError {
    BuildError::Transform { path: options.input.clone(), source }
}

fn options_for_child(options: &ResolvedOptions, input: &Path, output: &Path) -> BuilderOptions {
    BuilderOptions::new(input).with_output(output).with_root(&options.root).with_flags(options.flags.clone())
}

impl Builder for WebManifestBuilder {
    fn id(&self) -> &BuilderId {
        self.core.id()
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::WebManifest
    }

    fn setup(&mut self, options: BuilderOptions) -> Result<(), BuildError> {
        self.children.clear();
        self.icon = None;
        self.parsed = None;
        self.rendered = None;
        self.data = None;
        self.core.configure(&options, &OutputRule::extension("webmanifest"))
    }

    fn build(&mut self, invalidate: &Invalidation) -> Result<(), BuildError> {
        let (options, started) = self.core.begin_build()?;
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
        let mut report = match self.children.write_all() {
            Ok(report) => report,
            Err(err) => return self.core.fail(err),
        };
        if let Err(err) = write_optional(&mut self.icon, &mut report) {
            return self.core.fail(err);
        }
        let text = self.rendered.clone().unwrap_or_default();
        if let Err(err) = self.core.write_file(&options.output, text.as_bytes(), &mut report) {
            return self.core.fail(err);
        }
        Ok(self.core.finish_write(report))
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
        children
    }
}

/// Output path a manifest at `input` gets under `output_dir`.
pub(crate) fn manifest_output(input_dir: &Path, output_dir: &Path, input: &Path) -> PathBuf {
    paths::mirror(input_dir, output_dir, input, Some("webmanifest"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{ErrorKind, EventLog};
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn site() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("img")).unwrap();
        std::fs::write(temp.path().join("img/app.png"), b"png").unwrap();
        std::fs::write(
            temp.path().join("site.json"),
            r##"{
  "name": "Keel Demo",
  "theme_color": "#336699",
  "icons": [
    {"src": "img/app.png?v=2", "sizes": "48x48"},
    {"src": "https://cdn.example.com/remote.png"}
  ],
  "serviceworker": {"src": "sw.js"}
}"##,
        )
        .unwrap();
        temp
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_icons_copied_and_rewritten() {
        let temp = site();
        let mut builder = WebManifestBuilder::new(BuilderId::new("webmanifest:site"), BuildContext::default());
        builder
            .setup(BuilderOptions::new(temp.path().join("site.json")).with_output_dir(temp.path().join("dist")))
            .unwrap();
        builder.build(&Invalidation::new()).unwrap();
        builder.write().unwrap();

        let out = temp.path().join("dist/site.webmanifest");
        let manifest = read_json(&out);
        assert_eq!(manifest["icons"][0]["src"], "img/app.png?v=2");
        assert_eq!(manifest["icons"][1]["src"], "https://cdn.example.com/remote.png");
        assert!(temp.path().join("dist/img/app.png").exists());

        let data = builder.data().unwrap();
        assert_eq!(data.title(), Some("Keel Demo"));
        assert_eq!(data.serviceworker_src(), Some("sw.js"));
        assert!(builder.resources().contains(&temp.path().join("img/app.png")));
    }

    #[test]
    fn test_generated_icons_appended() {
        let temp = site();
        let logo = temp.path().join("logo.png");
        RgbaImage::from_pixel(32, 32, Rgba([10, 20, 30, 255])).save(&logo).unwrap();

        let mut builder = WebManifestBuilder::new(BuilderId::new("webmanifest:site"), BuildContext::default());
        builder
            .setup(
                BuilderOptions::new(temp.path().join("site.json"))
                    .with_output_dir(temp.path().join("dist"))
                    .with_manifest_icon(&logo),
            )
            .unwrap();
        builder.build(&Invalidation::new()).unwrap();
        builder.write().unwrap();

        let manifest = read_json(&temp.path().join("dist/site.webmanifest"));
        let icons = manifest["icons"].as_array().unwrap();
        assert_eq!(icons.len(), 4);
        assert_eq!(icons[3]["src"], "icon-512x512.png");
        assert_eq!(icons[3]["sizes"], "512x512");
        assert_eq!(icons[3]["type"], "image/png");
        assert!(temp.path().join("dist/icon-192x192.png").exists());
        assert_eq!(builder.children().len(), 2);
    }

    #[test]
    fn test_invalid_json_is_transform_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("bad.webmanifest"), "{ nope").unwrap();
        let mut builder = WebManifestBuilder::new(BuilderId::new("webmanifest:bad"), BuildContext::default());
        builder
            .setup(BuilderOptions::new(temp.path().join("bad.webmanifest")).with_output_dir(temp.path().join("dist")))
            .unwrap();
        let err = builder.build(&Invalidation::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transform);
    }

    #[test]
    fn test_icon_change_rebuilds_only_that_child() {
        let temp = site();
        let mut builder = WebManifestBuilder::new(BuilderId::new("webmanifest:site"), BuildContext::default());
        builder
            .setup(BuilderOptions::new(temp.path().join("site.json")).with_output_dir(temp.path().join("dist")))
            .unwrap();
        builder.build(&Invalidation::new()).unwrap();

        let log = EventLog::new();
        log.attach(builder.events());
        let changed: Invalidation = [temp.path().join("img/app.png")].into_iter().collect();
        builder.build(&changed).unwrap();

        let starts: Vec<_> = log
            .envelopes()
            .into_iter()
            .filter(|e| e.event.name() == "build-start")
            .map(|e| e.source)
            .collect();
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[1], BuilderId::new("webmanifest:site>copy#0"));
    }
}
