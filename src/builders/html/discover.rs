//! Find the resources an HTML document references.

use std::path::{Path, PathBuf};

use crate::build::{paths, LinkPolicy, ModuleFormat};
use crate::builders::html::document::{Document, Element};

/// Resource category. Declaration order is the child registration (and
/// therefore write) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Any other local file a `<link>` points at; copied verbatim
    Link,
    /// Style sheet
    Style,
    /// External script
    Script,
    /// Media referenced by `img`/`source`/`video`/`audio`/`track`
    Source,
    /// Favicon source image
    Icon,
    /// Web app manifest
    Manifest,
}

/// One attribute that points at a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Category
    pub kind: ResourceKind,
    /// Node index of the element in the document
    pub node: usize,
    /// Attribute holding the reference
    pub attr: &'static str,
    /// Absolute, normalized file path
    pub path: PathBuf,
    /// Query string and fragment to keep when rewriting
    pub suffix: String,
    /// Module format for scripts
    pub format: ModuleFormat,
}

/// Everything found in one pass over a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// External references in document order
    pub references: Vec<Reference>,
    /// `<style>` elements with their content
    pub inline_styles: Vec<(usize, String)>,
    /// `<script type="module">` elements without `src`, with their content
    pub inline_modules: Vec<(usize, String)>,
    /// `<link>` elements the policy could not classify, as `(node, href)`
    pub unclassified: Vec<(usize, String)>,
}

const STYLE_EXTENSIONS: [&str; 4] = ["css", "scss", "sass", "less"];
const SCRIPT_EXTENSIONS: [&str; 6] = ["js", "mjs", "cjs", "ts", "tsx", "jsx"];
const ICON_RELS: [&str; 4] = ["icon", "shortcut icon", "apple-touch-icon", "mask-icon"];

/// Scan `doc` for local references, resolving relative ones against `base_dir`.
///
/// Root-relative references (`/x.css`) resolve against `base_dir` as well.
pub fn discover(doc: &Document, base_dir: &Path, policy: LinkPolicy) -> Discovery {
    let mut found = Discovery::default();
    for (node, element) in doc.elements() {
        match element.name.as_str() {
            "link" => classify_link(&mut found, node, element, base_dir, policy),
            "script" => match (element.attr("src"), script_format(element)) {
                (Some(src), Some(format)) => {
                    if let Some((path, suffix)) = local(&src, base_dir) {
                        found.references.push(Reference {
                            kind: ResourceKind::Script,
                            node,
                            attr: "src",
                            path,
                            suffix,
                            format,
                        });
                    }
                }
                (None, Some(ModuleFormat::Esm)) => {
                    found.inline_modules.push((node, element.content().unwrap_or_default().to_string()));
                }
                _ => {}
            },
            "style" => found.inline_styles.push((node, element.content().unwrap_or_default().to_string())),
            "img" | "source" | "video" | "audio" | "track" => {
                for attr in ["src", "poster"] {
                    let Some(value) = element.attr(attr) else { continue };
                    if let Some((path, suffix)) = local(&value, base_dir) {
                        found.references.push(Reference {
                            kind: ResourceKind::Source,
                            node,
                            attr,
                            path,
                            suffix,
                            format: ModuleFormat::Esm,
                        });
                    }
                }
            }
            _ => {}
        }
    }
    found
}

fn classify_link(found: &mut Discovery, node: usize, element: &Element, base_dir: &Path, policy: LinkPolicy) {
    let Some(href) = element.attr("href") else { return };
    let Some((path, suffix)) = local(&href, base_dir) else { return };
    let rel = element.attr("rel").map(|r| r.trim().to_ascii_lowercase()).filter(|r| !r.is_empty());
    let ext = paths::extension(&path).unwrap_or_default();

    let kind = match rel.as_deref() {
        Some("stylesheet") => Some(ResourceKind::Style),
        Some("manifest") => Some(ResourceKind::Manifest),
        Some("modulepreload") => Some(ResourceKind::Script),
        Some(rel) if ICON_RELS.contains(&rel) => Some(ResourceKind::Icon),
        Some(_) => path.is_file().then_some(ResourceKind::Link),
        None if STYLE_EXTENSIONS.contains(&ext.as_str()) => Some(ResourceKind::Style),
        None if SCRIPT_EXTENSIONS.contains(&ext.as_str()) => Some(ResourceKind::Script),
        None if ext == "webmanifest" => Some(ResourceKind::Manifest),
        None => match policy {
            LinkPolicy::Ignore => None,
            LinkPolicy::Copy => path.is_file().then_some(ResourceKind::Link),
            LinkPolicy::Error => {
                found.unclassified.push((node, href.clone()));
                None
            }
        },
    };
    if let Some(kind) = kind {
        found.references.push(Reference { kind, node, attr: "href", path, suffix, format: ModuleFormat::Esm });
    }
}

/// `Some(format)` for JavaScript script elements, `None` for data blocks
/// and templates.
fn script_format(element: &Element) -> Option<ModuleFormat> {
    match element.attr("type").map(|t| t.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("text/javascript") | Some("application/javascript") => Some(ModuleFormat::Iife),
        Some("module") => Some(ModuleFormat::Esm),
        Some(_) => None,
    }
}

/// Split a local reference into its absolute path and query/fragment suffix.
fn local(reference: &str, base_dir: &Path) -> Option<(PathBuf, String)> {
    let reference = reference.trim();
    if reference.is_empty() || paths::is_remote(reference) {
        return None;
    }
    let file = paths::strip_query(reference);
    if file.is_empty() {
        return None;
    }
    let suffix = reference[file.len()..].to_string();
    let path = paths::resolve(base_dir, Path::new(file.trim_start_matches('/')));
    Some((path, suffix))
}
