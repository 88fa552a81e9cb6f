//! Configuration loading and discovery for `keel.toml`
//!
//! Provides functions to find, load, and merge configuration.

use super::schema::KeelConfig;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up while walking up from the working directory.
pub const CONFIG_FILE: &str = "keel.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse keel.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override entry asset
    pub entry: Option<PathBuf>,
    /// Override output directory
    pub out: Option<PathBuf>,
    /// Force production mode
    pub production: Option<bool>,
    /// Enable or disable source maps
    pub sourcemap: Option<bool>,
    /// Enable lint reporting
    pub lint: Option<bool>,
    /// Make lint errors fatal
    pub lint_blocks: Option<bool>,
    /// Enable size analysis
    pub analyze: Option<bool>,
}

/// A loaded configuration and the directory it applies to.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Parsed and validated configuration
    pub config: KeelConfig,
    /// File it came from, if any
    pub path: Option<PathBuf>,
    /// Directory relative paths in the configuration resolve against
    pub root: PathBuf,
}

/// Find keel.toml by walking up from the current working directory.
pub fn find_config() -> Option<PathBuf> {
    env::current_dir().ok().and_then(find_config_from)
}

/// Find keel.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.is_file() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from a keel.toml file.
///
/// If a path is provided, loads from that file. Otherwise, uses `find_config()`
/// to locate the config file. If no config file is found, returns the
/// default configuration.
///
/// # Example
/// ```ignore
/// let config = load_config(None)?;
/// let config = load_config(Some(Path::new("site/keel.toml")))?;
/// ```
pub fn load_config(path: Option<&Path>) -> Result<KeelConfig, ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => load_config_file(&p),
        None => Ok(KeelConfig::default()),
    }
}

/// Load configuration and work out the project root it applies to.
///
/// The root is `[project] root` resolved against the config file's directory,
/// or that directory itself; without a config file it is `cwd`.
pub fn load_project(path: Option<&Path>, cwd: &Path) -> Result<LoadedConfig, ConfigError> {
    let config_path = match path {
        Some(p) => Some(resolve_path(cwd, p)),
        None => find_config_from(cwd.to_path_buf()),
    };
    let Some(config_path) = config_path else {
        tracing::debug!(cwd = %cwd.display(), "no keel.toml found, using defaults");
        return Ok(LoadedConfig { config: KeelConfig::default(), path: None, root: cwd.to_path_buf() });
    };

    let config = load_config_file(&config_path)?;
    let base = project_root(&config_path).unwrap_or(cwd).to_path_buf();
    let root = match &config.project.root {
        Some(root) => resolve_path(&base, root),
        None => base,
    };
    tracing::debug!(config = %config_path.display(), root = %root.display(), "loaded configuration");
    Ok(LoadedConfig { config, path: Some(config_path), root })
}

/// Load configuration from a specific file path.
fn load_config_file(path: &Path) -> Result<KeelConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config: KeelConfig = toml::from_str(&contents)?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }

    Ok(config)
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut KeelConfig, overrides: &CliOverrides) {
    if let Some(ref entry) = overrides.entry {
        config.project.entry = entry.clone();
    }
    if let Some(ref out) = overrides.out {
        config.project.out = out.clone();
    }
    if let Some(production) = overrides.production {
        config.build.production = production;
    }
    if let Some(sourcemap) = overrides.sourcemap {
        config.build.sourcemap = sourcemap;
    }
    if let Some(lint) = overrides.lint {
        config.build.lint = lint;
    }
    // Blocking lint implies lint.
    if let Some(lint_blocks) = overrides.lint_blocks {
        config.build.lint_blocks = lint_blocks;
        config.build.lint |= lint_blocks;
    }
    if let Some(analyze) = overrides.analyze {
        config.build.analyze = analyze;
    }
}

/// Get the project root directory from a config file path.
///
/// Returns the parent directory of the keel.toml file.
pub fn project_root(config_path: &Path) -> Option<&Path> {
    config_path.parent()
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, contents).expect("should write config content");
        path
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "[project]\nname = \"test\"");

        let subdir = temp.path().join("src").join("styles");
        fs::create_dir_all(&subdir).expect("should create subdirectories");

        assert_eq!(find_config_from(subdir), Some(config_path.clone()));
        assert_eq!(find_config_from(temp.path().to_path_buf()), Some(config_path));
    }

    #[test]
    fn test_find_config_not_found() {
        let temp = TempDir::new().expect("should create temp dir");
        assert_eq!(find_config_from(temp.path().to_path_buf()), None);
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(
            temp.path(),
            r#"
[project]
name = "test-project"
entry = "web/index.html"

[build]
production = true
"#,
        );

        let config = load_config(Some(&config_path)).expect("should load valid config");
        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.entry, PathBuf::from("web/index.html"));
        assert!(config.build.production);
    }

    #[test]
    fn test_load_config_missing_file_errors() {
        let temp = TempDir::new().expect("should create temp dir");
        let result = load_config(Some(&temp.path().join("nonexistent.toml")));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "this is not valid toml {{{");
        assert!(matches!(load_config(Some(&config_path)), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_validation_error() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "[project]\nname = \"\"\n");
        let result = load_config(Some(&config_path));
        match result {
            Err(ConfigError::Validation(errors)) => assert!(errors[0].contains("project.name")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_project_root_from_config_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        write_config(temp.path(), "[project]\nroot = \"site\"\n");
        let nested = temp.path().join("site").join("pages");
        fs::create_dir_all(&nested).expect("should create subdirectories");

        let loaded = load_project(None, &nested).expect("should load project");
        assert_eq!(loaded.path, Some(temp.path().join(CONFIG_FILE)));
        assert_eq!(loaded.root, temp.path().join("site"));
    }

    #[test]
    fn test_load_project_without_config_uses_cwd() {
        let temp = TempDir::new().expect("should create temp dir");
        let loaded = load_project(None, temp.path()).expect("should load defaults");
        assert!(loaded.path.is_none());
        assert_eq!(loaded.root, temp.path());
        assert_eq!(loaded.config.project.out, PathBuf::from("dist"));
    }

    #[test]
    fn test_merge_cli_overrides() {
        let mut config = KeelConfig::default();
        let overrides = CliOverrides {
            out: Some(PathBuf::from("public")),
            sourcemap: Some(false),
            lint_blocks: Some(true),
            ..Default::default()
        };

        merge_cli_overrides(&mut config, &overrides);
        assert_eq!(config.project.out, PathBuf::from("public"));
        assert!(!config.build.sourcemap);
        assert!(config.build.lint && config.build.lint_blocks);
        assert!(config.is_valid());
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/project");
        assert_eq!(resolve_path(root, Path::new("/other/path")), PathBuf::from("/other/path"));
        assert_eq!(resolve_path(root, Path::new("src/index.html")), PathBuf::from("/project/src/index.html"));
    }

    #[test]
    fn test_project_root() {
        assert_eq!(project_root(Path::new("/project/keel.toml")), Some(Path::new("/project")));
    }
}
