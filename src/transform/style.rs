//! Default style collaborator built on `lightningcss`.
//!
//! Relative `@import`s are inlined recursively before parsing, so the printed
//! sheet is self-contained. `url()` references inside imported sheets are
//! rebased onto the entry's directory.

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use regex::{Captures, Regex};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::build::paths;
use crate::transform::{line_of, Diagnostic, Entry, Severity, StyleOutput, StyleRequest, TransformError};

/// Turns an entry stylesheet into a single stylesheet.
pub trait StyleTransform: Send + Sync {
    /// Transform the entry described by `request`.
    fn transform(&self, request: &StyleRequest<'_>) -> Result<StyleOutput, TransformError>;
}

struct Patterns {
    import: Regex,
    url: Regex,
    important: Regex,
    empty_rule: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, TransformError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| TransformError::Other(format!("failed to compile pattern: {e}")))
        };
        Ok(Self {
            import: compile(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?\s*([^;]*);"#)?,
            url: compile(r#"url\(\s*["']?([^"')]+)["']?\s*\)"#)?,
            important: compile(r"!\s*important")?,
            empty_rule: compile(r"[^{};\s][^{};]*\{\s*\}")?,
        })
    }
}

/// Sheets read while inlining, in the order they were first seen.
#[derive(Default)]
struct Inliner {
    sources: Vec<(PathBuf, String)>,
    assets: Vec<PathBuf>,
    visiting: HashSet<PathBuf>,
}

/// `@import`-inlining, `lightningcss`-printing style transform.
#[derive(Debug, Clone, Default)]
pub struct LightningStyle;

impl LightningStyle {
    /// Create the transform.
    pub fn new() -> Self {
        Self
    }

    fn resolve_import(importer: &Path, specifier: &str) -> Option<PathBuf> {
        let dir = importer.parent().unwrap_or_else(|| Path::new("/"));
        let base = paths::resolve(dir, Path::new(paths::strip_query(specifier)));
        if base.is_file() {
            return Some(base);
        }
        // Preprocessor-style partials: `foo` -> `foo.<ext>` / `_foo.<ext>`.
        let ext = importer.extension().and_then(|e| e.to_str()).unwrap_or("css");
        let mut with_ext = base.clone().into_os_string();
        with_ext.push(".");
        with_ext.push(ext);
        let with_ext = PathBuf::from(with_ext);
        if with_ext.is_file() {
            return Some(with_ext);
        }
        let name = with_ext.file_name()?.to_string_lossy().into_owned();
        let partial = with_ext.with_file_name(format!("_{}", name));
        partial.is_file().then_some(partial)
    }

    fn rebase_urls(re: &Patterns, dir: &Path, entry_dir: &Path, text: &str, assets: &mut Vec<PathBuf>) -> String {
        re.url
            .replace_all(text, |caps: &Captures<'_>| {
                let reference = &caps[1];
                if paths::is_remote(reference) {
                    return caps[0].to_string();
                }
                let bare = paths::strip_query(reference);
                let asset = paths::resolve(dir, Path::new(bare));
                if asset.is_file() {
                    assets.push(asset.clone());
                }
                if dir == entry_dir {
                    caps[0].to_string()
                } else {
                    format!("url(\"{}{}\")", paths::relative_url(entry_dir, &asset), &reference[bare.len()..])
                }
            })
            .into_owned()
    }

    fn inline(
        re: &Patterns,
        entry_dir: &Path,
        path: &Path,
        source: &str,
        state: &mut Inliner,
    ) -> Result<String, TransformError> {
        state.visiting.insert(path.to_path_buf());
        state.sources.push((path.to_path_buf(), source.to_string()));
        let dir = path.parent().unwrap_or_else(|| Path::new("/")).to_path_buf();

        let mut out = String::with_capacity(source.len());
        let mut last = 0;
        for caps in re.import.captures_iter(source) {
            let specifier = &caps[1];
            if paths::is_remote(specifier) {
                continue;
            }
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&Self::rebase_urls(re, &dir, entry_dir, &source[last..whole.start()], &mut state.assets));
            last = whole.end();

            let Some(imported) = Self::resolve_import(path, specifier) else {
                return Err(TransformError::Parse {
                    path: path.to_path_buf(),
                    message: format!("cannot resolve @import '{}'", specifier),
                });
            };
            if state.visiting.contains(&imported) || state.sources.iter().any(|(p, _)| *p == imported) {
                continue;
            }
            let imported_source = Entry::File(&imported).read()?;
            let body = Self::inline(re, entry_dir, &imported, &imported_source, state)?;
            let media = caps[2].trim();
            if media.is_empty() {
                out.push_str(&body);
            } else {
                out.push_str(&format!("@media {} {{\n{}\n}}", media, body));
            }
            out.push('\n');
        }
        out.push_str(&Self::rebase_urls(re, &dir, entry_dir, &source[last..], &mut state.assets));
        state.visiting.remove(path);
        Ok(out)
    }

    fn lint(re: &Patterns, sources: &[(PathBuf, String)]) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for (path, source) in sources {
            for m in re.important.find_iter(source) {
                diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    rule: "no-important".to_string(),
                    message: "avoid '!important'".to_string(),
                    file: path.clone(),
                    line: Some(line_of(source, m.start())),
                });
            }
            for m in re.empty_rule.find_iter(source) {
                diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    rule: "block-no-empty".to_string(),
                    message: "empty rule block".to_string(),
                    file: path.clone(),
                    line: Some(line_of(source, m.start())),
                });
            }
        }
        diagnostics
    }
}

impl StyleTransform for LightningStyle {
    fn transform(&self, request: &StyleRequest<'_>) -> Result<StyleOutput, TransformError> {
        let re = Patterns::compile()?;
        let entry_path = paths::normalize(request.entry.path());
        let entry_dir = entry_path.parent().unwrap_or_else(|| Path::new("/")).to_path_buf();
        let source = request.entry.read()?;

        let mut state = Inliner::default();
        let combined = Self::inline(&re, &entry_dir, &entry_path, &source, &mut state)?;

        let flags = request.flags;
        let css = {
            let options = ParserOptions { filename: entry_path.to_string_lossy().into_owned(), ..Default::default() };
            let mut sheet = StyleSheet::parse(&combined, options)
                .map_err(|e| TransformError::Parse { path: entry_path.clone(), message: e.to_string() })?;
            if flags.production {
                sheet
                    .minify(MinifyOptions::default())
                    .map_err(|e| TransformError::Parse { path: entry_path.clone(), message: e.to_string() })?;
            }
            let printed = sheet
                .to_css(PrinterOptions { minify: flags.production, ..Default::default() })
                .map_err(|e| TransformError::Parse { path: entry_path.clone(), message: e.to_string() })?;
            printed.code
        };

        let map = flags.sourcemap.then(|| {
            let sources: Vec<String> =
                state.sources.iter().map(|(p, _)| paths::relative_url(&entry_dir, p)).collect();
            let contents: Vec<&str> = state.sources.iter().map(|(_, s)| s.as_str()).collect();
            json!({
                "version": 3,
                "file": paths::with_extension(Path::new(&entry_path.file_name().unwrap_or_default()), "css")
                    .to_string_lossy(),
                "sources": sources,
                "sourcesContent": contents,
                "names": [],
                "mappings": "",
            })
            .to_string()
        });

        let diagnostics = if flags.wants_lint() { Self::lint(&re, &state.sources) } else { Vec::new() };

        let mut dependencies: Vec<PathBuf> = state
            .sources
            .iter()
            .map(|(p, _)| p.clone())
            .filter(|p| matches!(request.entry, Entry::File(_)) || *p != entry_path)
            .collect();
        for asset in state.assets {
            if !dependencies.contains(&asset) {
                dependencies.push(asset);
            }
        }

        Ok(StyleOutput { css, map, dependencies, diagnostics })
    }
}
