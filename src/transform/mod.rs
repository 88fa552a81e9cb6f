//! External transform collaborators.
//!
//! Leaf builders never transform content themselves; they call out to one of
//! the traits below. [`Transforms`] bundles one implementation of each and is
//! shared (cheaply cloned) by every builder of a session. The default
//! implementations live in the submodules.

pub mod color;
pub mod precache;
pub mod raster;
pub mod script;
pub mod style;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::build::{BuildFlags, ModuleFormat};

pub use precache::{PrecacheInjector, WorkboxInjector, PRECACHE_PLACEHOLDER};
pub use raster::{default_favicons, default_manifest_icons, ImageCompositor, RasterCompositor};
pub use script::{ModuleGraphBundler, ScriptTransform};
pub use style::{LightningStyle, StyleTransform};

/// Failure inside a collaborator.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransformError {
    /// Could not read a source file
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// Source could not be parsed
    #[error("{}: {message}", path.display())]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// Parser message
        message: String,
    },
    /// Image decode/encode failure
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    /// Anything else the collaborator reports
    #[error("{0}")]
    Other(String),
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks the build when lint is configured to block
    Error,
    /// Informational
    Warning,
}

/// One lint finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// Rule identifier, e.g. `no-debugger`
    pub rule: String,
    /// Human readable message
    pub message: String,
    /// File the finding is in
    pub file: PathBuf,
    /// 1-indexed line, if known
    pub line: Option<usize>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file.display())?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        write!(f, " [{}] {}", self.rule, self.message)
    }
}

/// Size of one dependency in an analysis report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisEntry {
    /// Dependency path
    pub path: PathBuf,
    /// Bytes contributed
    pub bytes: u64,
}

/// Dependency-size analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Entries sorted by size, largest first
    pub entries: Vec<AnalysisEntry>,
    /// Sum of all entries
    pub total_bytes: u64,
}

impl AnalysisReport {
    /// Build a report from unsorted entries.
    pub fn from_entries(mut entries: Vec<AnalysisEntry>) -> Self {
        entries.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.path.cmp(&b.path)));
        let total_bytes = entries.iter().map(|e| e.bytes).sum();
        Self { entries, total_bytes }
    }
}

/// Where a transform reads its entry from.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    /// A file on disk
    File(&'a Path),
    /// In-memory code pretending to live at a path
    Inline {
        /// Source text
        code: &'a str,
        /// Virtual location used to resolve relative references
        path: &'a Path,
    },
}

impl<'a> Entry<'a> {
    /// Path of the entry (virtual for inline code).
    pub fn path(&self) -> &'a Path {
        match self {
            Entry::File(path) => path,
            Entry::Inline { path, .. } => path,
        }
    }

    /// Read the entry source.
    pub fn read(&self) -> Result<String, TransformError> {
        match self {
            Entry::File(path) => std::fs::read_to_string(path)
                .map_err(|source| TransformError::Read { path: path.to_path_buf(), source }),
            Entry::Inline { code, .. } => Ok(code.to_string()),
        }
    }
}

/// Input to a script transform.
#[derive(Debug, Clone, Copy)]
pub struct ScriptRequest<'a> {
    /// Entry module
    pub entry: Entry<'a>,
    /// Feature flags (target, production, jsx pragma...)
    pub flags: &'a BuildFlags,
    /// Output module format
    pub format: ModuleFormat,
}

/// Result of a script transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    /// Generated code
    pub code: String,
    /// Source map JSON, if requested
    pub map: Option<String>,
    /// Every file read while transforming
    pub dependencies: Vec<PathBuf>,
    /// Lint findings
    pub diagnostics: Vec<Diagnostic>,
    /// Size analysis
    pub analysis: Option<AnalysisReport>,
}

/// Input to a style transform.
#[derive(Debug, Clone, Copy)]
pub struct StyleRequest<'a> {
    /// Entry stylesheet
    pub entry: Entry<'a>,
    /// Feature flags
    pub flags: &'a BuildFlags,
}

/// Result of a style transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleOutput {
    /// Generated CSS
    pub css: String,
    /// Source map JSON, if requested
    pub map: Option<String>,
    /// `@import`ed files and referenced local assets
    pub dependencies: Vec<PathBuf>,
    /// Lint findings
    pub diagnostics: Vec<Diagnostic>,
}

/// Encoded image type of an icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IconType {
    /// `image/png`
    #[default]
    Png,
    /// `image/x-icon`
    Ico,
}

impl IconType {
    /// MIME type string.
    pub fn mime(&self) -> &'static str {
        match self {
            IconType::Png => "image/png",
            IconType::Ico => "image/x-icon",
        }
    }
}

/// One output of an icon fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IconSpec {
    /// Output file name
    pub name: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Background colour (`#rrggbb`), transparent when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    /// Encoded type
    #[serde(default, rename = "type")]
    pub kind: IconType,
    /// `rel` used when the icon is linked from HTML
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
}

impl IconSpec {
    /// Square PNG icon.
    pub fn square(name: impl Into<String>, size: u32) -> Self {
        Self { name: name.into(), width: size, height: size, background: None, kind: IconType::Png, rel: None }
    }

    /// Set the background colour.
    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = Some(background.into());
        self
    }

    /// Set the HTML `rel`.
    pub fn with_rel(mut self, rel: impl Into<String>) -> Self {
        self.rel = Some(rel.into());
        self
    }

    /// `WxH` sizes attribute value.
    pub fn sizes(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// The set of collaborators used by a session.
#[derive(Clone)]
pub struct Transforms {
    /// Script transform
    pub script: Arc<dyn ScriptTransform>,
    /// Style transform
    pub style: Arc<dyn StyleTransform>,
    /// Image compositor
    pub image: Arc<dyn ImageCompositor>,
    /// Offline-cache injector
    pub precache: Arc<dyn PrecacheInjector>,
}

impl Default for Transforms {
    fn default() -> Self {
        Self {
            script: Arc::new(ModuleGraphBundler::new()),
            style: Arc::new(LightningStyle::new()),
            image: Arc::new(RasterCompositor::new()),
            precache: Arc::new(WorkboxInjector::new()),
        }
    }
}

impl std::fmt::Debug for Transforms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transforms").finish_non_exhaustive()
    }
}

impl Transforms {
    /// Replace the script transform.
    pub fn with_script(mut self, script: Arc<dyn ScriptTransform>) -> Self {
        self.script = script;
        self
    }

    /// Replace the style transform.
    pub fn with_style(mut self, style: Arc<dyn StyleTransform>) -> Self {
        self.style = style;
        self
    }

    /// Replace the image compositor.
    pub fn with_image(mut self, image: Arc<dyn ImageCompositor>) -> Self {
        self.image = image;
        self
    }

    /// Replace the precache injector.
    pub fn with_precache(mut self, precache: Arc<dyn PrecacheInjector>) -> Self {
        self.precache = precache;
        self
    }
}

/// 1-indexed line number of a byte offset.
pub(crate) fn line_of(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())].matches('\n').count() + 1
}
