//! Builder configuration records.
//!
//! [`BuilderOptions`] is what a command or parent builder hands to `setup()`.
//! Each builder resolves it into [`ResolvedOptions`] with an [`OutputRule`]
//! describing how its output location is derived.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::build::{paths, BuildError};
use crate::transform::IconSpec;

/// Module format emitted by the script transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    /// ES module output
    #[default]
    Esm,
    /// Classic script wrapped in an immediately invoked function
    Iife,
}

/// What to do with a `<link>` that has no `rel` and no recognizable extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkPolicy {
    /// Leave the element untouched
    #[default]
    Ignore,
    /// Copy the referenced file next to the document and rewrite the link
    Copy,
    /// Fail the build
    Error,
}

/// Feature flags shared by a builder and the children it creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildFlags {
    /// Production mode (minify, drop comments)
    pub production: bool,
    /// Emit companion source map files
    pub sourcemap: bool,
    /// Run lint diagnostics
    pub lint: bool,
    /// Treat lint errors as build failures
    pub lint_blocks: bool,
    /// Emit a dependency size analysis
    pub analyze: bool,
    /// Target environment hint passed to transforms (e.g. "es2020")
    pub target: String,
    /// JSX factory pragma
    pub jsx_pragma: Option<String>,
    /// JSX fragment pragma
    pub jsx_fragment: Option<String>,
}

impl Default for BuildFlags {
    fn default() -> Self {
        Self {
            production: false,
            sourcemap: true,
            lint: false,
            lint_blocks: false,
            analyze: false,
            target: "es2020".to_string(),
            jsx_pragma: None,
            jsx_fragment: None,
        }
    }
}

impl BuildFlags {
    /// Whether lint diagnostics are wanted at all (reported or blocking).
    pub fn wants_lint(&self) -> bool {
        self.lint || self.lint_blocks
    }
}

/// In-memory source used instead of a file (inline `<script>`/`<style>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineSource {
    /// Source text
    pub code: String,
    /// Path the code pretends to live at; relative imports resolve from its directory
    pub virtual_path: PathBuf,
}

/// HTML-specific options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlOptions {
    /// Source image for the favicon set, implied even without an icon link
    pub icon: Option<PathBuf>,
    /// Web manifest, implied even without a manifest link
    pub manifest: Option<PathBuf>,
    /// Handling of unclassifiable `<link>` elements
    pub unknown_links: LinkPolicy,
}

/// Unresolved configuration passed to `setup()`.
#[derive(Debug, Clone, Default)]
pub struct BuilderOptions {
    /// Input file
    pub input: Option<PathBuf>,
    /// Inline source used instead of `input`
    pub inline: Option<InlineSource>,
    /// Output file (or directory for directory-backed builders)
    pub output: Option<PathBuf>,
    /// Output directory; the file name is inferred from the input
    pub output_dir: Option<PathBuf>,
    /// Working directory relative paths resolve against (defaults to the process cwd)
    pub root: Option<PathBuf>,
    /// Feature flags
    pub flags: BuildFlags,
    /// Script module format
    pub format: ModuleFormat,
    /// Icon output specifications (icon builders)
    pub icons: Vec<IconSpec>,
    /// HTML options (HTML builders)
    pub html: HtmlOptions,
    /// Source image for manifest icons (web manifest builders)
    pub manifest_icon: Option<PathBuf>,
    /// Directory whose files are precached (service worker builders)
    pub precache_root: Option<PathBuf>,
}

impl BuilderOptions {
    /// Options for an input file.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self { input: Some(input.into()), ..Default::default() }
    }

    /// Options for an inline source.
    pub fn inline(code: impl Into<String>, virtual_path: impl Into<PathBuf>) -> Self {
        Self {
            inline: Some(InlineSource { code: code.into(), virtual_path: virtual_path.into() }),
            ..Default::default()
        }
    }

    /// Set the output file.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set the working directory.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Set the feature flags.
    pub fn with_flags(mut self, flags: BuildFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the script module format.
    pub fn with_format(mut self, format: ModuleFormat) -> Self {
        self.format = format;
        self
    }

    /// Set icon specifications.
    pub fn with_icons(mut self, icons: Vec<IconSpec>) -> Self {
        self.icons = icons;
        self
    }

    /// Set HTML options.
    pub fn with_html(mut self, html: HtmlOptions) -> Self {
        self.html = html;
        self
    }

    /// Set the manifest icon source.
    pub fn with_manifest_icon(mut self, icon: impl Into<PathBuf>) -> Self {
        self.manifest_icon = Some(icon.into());
        self
    }

    /// Set the precache root.
    pub fn with_precache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.precache_root = Some(root.into());
        self
    }

    /// Options for a child builder: same flags and root, new input and output.
    pub fn child(&self, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: Some(input.into()),
            output: Some(output.into()),
            root: self.root.clone(),
            flags: self.flags.clone(),
            ..Default::default()
        }
    }

    /// Validate and normalize into [`ResolvedOptions`].
    pub fn resolve(&self, rule: &OutputRule) -> Result<ResolvedOptions, BuildError> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()
                .map_err(|e| BuildError::config(format!("cannot determine working directory: {}", e)))?,
        };
        let root = paths::normalize(&root);

        let (input, inline) = match (&self.inline, &self.input) {
            (Some(inline), _) => (paths::resolve(&root, &inline.virtual_path), Some(inline.code.clone())),
            (None, Some(input)) => {
                let input = paths::resolve(&root, input);
                if input.is_dir() {
                    return Err(BuildError::config(format!(
                        "input {} is a directory, expected a file",
                        input.display()
                    )));
                }
                (input, None)
            }
            (None, None) if rule.input_optional => (root.clone(), None),
            (None, None) => return Err(BuildError::config("missing required option `input`")),
        };

        let output = if rule.output_is_dir {
            let dir = self
                .output_dir
                .as_ref()
                .or(self.output.as_ref())
                .ok_or_else(|| BuildError::config("missing required option `output_dir`"))?;
            let dir = paths::resolve(&root, dir);
            if dir.is_file() {
                return Err(BuildError::config(format!(
                    "output {} is a file, expected a directory",
                    dir.display()
                )));
            }
            dir
        } else {
            let inferred = rule.infer_name(&input);
            match (&self.output, &self.output_dir) {
                (Some(output), _) => {
                    let output = paths::resolve(&root, output);
                    if output.is_dir() {
                        output.join(inferred)
                    } else {
                        output
                    }
                }
                (None, Some(dir)) => paths::resolve(&root, dir).join(inferred),
                (None, None) => {
                    return Err(BuildError::config("missing required option `output` or `output_dir`"))
                }
            }
        };

        Ok(ResolvedOptions {
            input,
            inline,
            output,
            root: root.clone(),
            flags: self.flags.clone(),
            format: self.format,
            icons: self.icons.clone(),
            html: HtmlOptions {
                icon: self.html.icon.as_ref().map(|p| paths::resolve(&root, p)),
                manifest: self.html.manifest.as_ref().map(|p| paths::resolve(&root, p)),
                unknown_links: self.html.unknown_links,
            },
            manifest_icon: self.manifest_icon.as_ref().map(|p| paths::resolve(&root, p)),
            precache_root: self.precache_root.as_ref().map(|p| paths::resolve(&root, p)),
        })
    }
}

/// How a builder derives its output location.
#[derive(Debug, Clone, Default)]
pub struct OutputRule {
    /// Extension of the inferred output file (`None` keeps the input's)
    pub extension: Option<&'static str>,
    /// Fixed output file name, overriding inference
    pub file_name: Option<&'static str>,
    /// Output names a directory rather than a file
    pub output_is_dir: bool,
    /// The builder can run without an input (generated content)
    pub input_optional: bool,
}

impl OutputRule {
    /// Keep the input's file name.
    pub fn same_name() -> Self {
        Self::default()
    }

    /// Replace the input's extension.
    pub fn extension(extension: &'static str) -> Self {
        Self { extension: Some(extension), ..Default::default() }
    }

    /// Use a fixed file name.
    pub fn named(file_name: &'static str) -> Self {
        Self { file_name: Some(file_name), ..Default::default() }
    }

    /// Output is a directory.
    pub fn directory() -> Self {
        Self { output_is_dir: true, ..Default::default() }
    }

    /// Allow a missing input.
    pub fn allow_missing_input(mut self) -> Self {
        self.input_optional = true;
        self
    }

    fn infer_name(&self, input: &Path) -> PathBuf {
        if let Some(name) = self.file_name {
            return PathBuf::from(name);
        }
        let base = input.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("index"));
        match self.extension {
            Some(ext) => paths::with_extension(&base, ext),
            None => base,
        }
    }
}

/// Validated, absolute configuration held by a configured builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    /// Absolute input path (virtual for inline sources)
    pub input: PathBuf,
    /// Inline code, when the builder reads from memory
    pub inline: Option<String>,
    /// Absolute output file or directory
    pub output: PathBuf,
    /// Absolute working directory
    pub root: PathBuf,
    /// Feature flags
    pub flags: BuildFlags,
    /// Script module format
    pub format: ModuleFormat,
    /// Icon specifications
    pub icons: Vec<IconSpec>,
    /// HTML options with absolute paths
    pub html: HtmlOptions,
    /// Absolute manifest icon source
    pub manifest_icon: Option<PathBuf>,
    /// Absolute precache root
    pub precache_root: Option<PathBuf>,
}

impl ResolvedOptions {
    /// Directory containing the output file.
    pub fn output_dir(&self) -> PathBuf {
        self.output.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone())
    }

    /// Directory containing the input file.
    pub fn input_dir(&self) -> PathBuf {
        self.input.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone())
    }

    /// Whether the builder reads from memory.
    pub fn is_inline(&self) -> bool {
        self.inline.is_some()
    }
}
