//! Configuration schema types for `keel.toml`
//!
//! Defines the structure and validation rules for keel project configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::build::{BuildFlags, HtmlOptions, LinkPolicy};

/// Project metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    #[serde(default = "default_name")]
    pub name: String,
    /// Entry asset built by `keel build` when no entry is given
    #[serde(default = "default_entry")]
    pub entry: PathBuf,
    /// Build output directory
    #[serde(default = "default_out")]
    pub out: PathBuf,
    /// Directory relative paths resolve against (defaults to the config file's directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

fn default_name() -> String {
    "site".to_string()
}

fn default_entry() -> PathBuf {
    PathBuf::from("src/index.html")
}

fn default_out() -> PathBuf {
    PathBuf::from("dist")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { name: default_name(), entry: default_entry(), out: default_out(), root: None }
    }
}

/// Feature flags applied to every builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Minify and drop comments
    #[serde(default)]
    pub production: bool,
    /// Emit source map files
    #[serde(default = "default_true")]
    pub sourcemap: bool,
    /// Report lint diagnostics
    #[serde(default)]
    pub lint: bool,
    /// Fail the build on lint errors
    #[serde(default)]
    pub lint_blocks: bool,
    /// Report per-dependency sizes
    #[serde(default)]
    pub analyze: bool,
    /// Target environment passed to transforms
    #[serde(default = "default_target")]
    pub target: String,
    /// JSX factory pragma
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsx_pragma: Option<String>,
    /// JSX fragment pragma
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsx_fragment: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_target() -> String {
    "es2020".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            production: false,
            sourcemap: true,
            lint: false,
            lint_blocks: false,
            analyze: false,
            target: default_target(),
            jsx_pragma: None,
            jsx_fragment: None,
        }
    }
}

impl BuildConfig {
    /// Builder flags for this section.
    pub fn flags(&self) -> BuildFlags {
        BuildFlags {
            production: self.production,
            sourcemap: self.sourcemap,
            lint: self.lint,
            lint_blocks: self.lint_blocks,
            analyze: self.analyze,
            target: self.target.clone(),
            jsx_pragma: self.jsx_pragma.clone(),
            jsx_fragment: self.jsx_fragment.clone(),
        }
    }
}

/// HTML document settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HtmlConfig {
    /// Source image for the favicon set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<PathBuf>,
    /// Web manifest linked from every document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    /// Handling of `<link>` elements without `rel` or a known extension
    #[serde(default)]
    pub unknown_links: LinkPolicy,
}

impl HtmlConfig {
    /// Builder options for this section.
    pub fn options(&self) -> HtmlOptions {
        HtmlOptions { icon: self.icon.clone(), manifest: self.manifest.clone(), unknown_links: self.unknown_links }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Clear terminal between rebuilds
    #[serde(default = "default_true")]
    pub clear_screen: bool,
    /// Directories watched in addition to the project root
    #[serde(default)]
    pub roots: Vec<PathBuf>,
}

fn default_debounce_ms() -> u32 {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms(), clear_screen: true, roots: Vec::new() }
    }
}

/// Complete keel.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeelConfig {
    /// Project metadata
    #[serde(default)]
    pub project: ProjectConfig,
    /// Build flags
    #[serde(default)]
    pub build: BuildConfig,
    /// HTML settings
    #[serde(default)]
    pub html: HtmlConfig,
    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "watch.debounce_ms")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "keel.toml: '{}' {}", self.field, self.message)
    }
}

impl KeelConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.project.name.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "project.name".to_string(),
                message: "must be a non-empty string".to_string(),
            });
        }

        if self.project.entry.as_os_str().is_empty() {
            errors.push(ConfigValidationError {
                field: "project.entry".to_string(),
                message: "must be a path".to_string(),
            });
        }

        if self.project.out.as_os_str().is_empty() {
            errors.push(ConfigValidationError {
                field: "project.out".to_string(),
                message: "must be a path".to_string(),
            });
        } else if self.project.out == self.project.entry {
            errors.push(ConfigValidationError {
                field: "project.out".to_string(),
                message: "must differ from project.entry".to_string(),
            });
        }

        if self.build.target.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "build.target".to_string(),
                message: "must be a non-empty string".to_string(),
            });
        }

        if self.build.lint_blocks && !self.build.lint {
            errors.push(ConfigValidationError {
                field: "build.lint_blocks".to_string(),
                message: "requires build.lint = true".to_string(),
            });
        }

        if self.watch.debounce_ms > 60_000 {
            errors.push(ConfigValidationError {
                field: "watch.debounce_ms".to_string(),
                message: "must be at most 60000".to_string(),
            });
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}
