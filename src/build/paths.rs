//! Path helpers shared by builders.
//!
//! Every path that ends up in a resource set or in the dependency index goes
//! through [`normalize`] so that `a/./b.css` and `a/x/../b.css` compare equal.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path, removing `.` and resolving `..` components.
///
/// Does not touch the file system, so symlinks are not resolved.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `path` against `base` when relative, then normalize.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Check whether a reference points outside the local file system.
pub fn is_remote(reference: &str) -> bool {
    let lower = reference.trim().to_ascii_lowercase();
    lower.starts_with("http:")
        || lower.starts_with("https:")
        || lower.starts_with("//")
        || lower.starts_with("data:")
        || lower.starts_with("blob:")
        || lower.starts_with("mailto:")
        || lower.starts_with('#')
}

/// Strip a query string or fragment from a reference.
pub fn strip_query(reference: &str) -> &str {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    &reference[..end]
}

/// Build a `/`-separated URL that reaches `target` from the directory `from_dir`.
///
/// Both paths are expected to be absolute and normalized.
pub fn relative_url(from_dir: &Path, target: &Path) -> String {
    let from: Vec<Component<'_>> = from_dir.components().collect();
    let to: Vec<Component<'_>> = target.components().collect();

    let common = from.iter().zip(to.iter()).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for component in &to[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Replace the extension of a file name, keeping its stem.
pub fn with_extension(file_name: &Path, extension: &str) -> PathBuf {
    let stem = file_name.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    if extension.is_empty() {
        PathBuf::from(stem)
    } else {
        PathBuf::from(format!("{}.{}", stem, extension))
    }
}

/// Map a source file to its place under `output_dir`, keeping its location
/// relative to `input_dir`. Files outside `input_dir` land at the top level.
/// `extension` replaces the file's extension when given.
pub fn mirror(input_dir: &Path, output_dir: &Path, path: &Path, extension: Option<&str>) -> PathBuf {
    let relative = path
        .strip_prefix(input_dir)
        .ok()
        .filter(|rel| !rel.components().any(|c| matches!(c, Component::ParentDir)))
        .map(Path::to_path_buf)
        .or_else(|| path.file_name().map(PathBuf::from))
        .unwrap_or_default();
    let relative = match (extension, relative.file_name()) {
        (Some(ext), Some(name)) => relative.with_file_name(with_extension(Path::new(name), ext)),
        _ => relative,
    };
    output_dir.join(relative)
}

/// `path` itself when nobody has claimed it, otherwise the first free
/// `stem-N.ext` sibling.
pub fn disambiguate(path: &Path, taken: &HashSet<PathBuf>) -> PathBuf {
    if !taken.contains(path) {
        return path.to_path_buf();
    }
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    (1usize..)
        .map(|n| match &extension {
            Some(ext) => path.with_file_name(format!("{}-{}.{}", stem, n, ext)),
            None => path.with_file_name(format!("{}-{}", stem, n)),
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| path.to_path_buf())
}

/// Lower-cased extension of a path, if any.
pub fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_removes_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c.css")), PathBuf::from("/a/c.css"));
        assert_eq!(normalize(Path::new("a/b/../../c")), PathBuf::from("c"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Path::new("/project/src");
        assert_eq!(resolve(base, Path::new("../a.css")), PathBuf::from("/project/a.css"));
        assert_eq!(resolve(base, Path::new("/abs/b.js")), PathBuf::from("/abs/b.js"));
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://cdn.example.com/a.js"));
        assert!(is_remote("//cdn.example.com/a.js"));
        assert!(is_remote("data:image/png;base64,AAAA"));
        assert!(!is_remote("a.css"));
        assert!(!is_remote("../styles/a.css"));
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query("a.css?v=1"), "a.css");
        assert_eq!(strip_query("icons.svg#home"), "icons.svg");
        assert_eq!(strip_query("plain.js"), "plain.js");
    }

    #[test]
    fn test_relative_url_same_dir() {
        assert_eq!(relative_url(Path::new("/dist"), Path::new("/dist/a.css")), "a.css");
    }

    #[test]
    fn test_relative_url_nested_and_parent() {
        assert_eq!(
            relative_url(Path::new("/dist"), Path::new("/dist/assets/logo.png")),
            "assets/logo.png"
        );
        assert_eq!(relative_url(Path::new("/dist/pages"), Path::new("/dist/a.css")), "../a.css");
    }

    #[test]
    fn test_mirror_keeps_relative_layout() {
        let out = mirror(Path::new("/src"), Path::new("/dist"), Path::new("/src/styles/a.scss"), Some("css"));
        assert_eq!(out, PathBuf::from("/dist/styles/a.css"));
        let out = mirror(Path::new("/src"), Path::new("/dist"), Path::new("/shared/logo.png"), None);
        assert_eq!(out, PathBuf::from("/dist/logo.png"));
    }

    #[test]
    fn test_disambiguate_skips_claimed_names() {
        let mut taken = HashSet::new();
        let out = Path::new("/dist/x.css");
        assert_eq!(disambiguate(out, &taken), PathBuf::from("/dist/x.css"));

        taken.insert(PathBuf::from("/dist/x.css"));
        taken.insert(PathBuf::from("/dist/x-1.css"));
        assert_eq!(disambiguate(out, &taken), PathBuf::from("/dist/x-2.css"));

        taken.insert(PathBuf::from("/dist/LICENSE"));
        assert_eq!(disambiguate(Path::new("/dist/LICENSE"), &taken), PathBuf::from("/dist/LICENSE-1"));
    }

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension(Path::new("app.ts"), "js"), PathBuf::from("app.js"));
        assert_eq!(with_extension(Path::new("theme.scss"), "css"), PathBuf::from("theme.css"));
    }
}
