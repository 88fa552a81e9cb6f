//! Per-builder resource bookkeeping.
//!
//! A [`ResourceSet`] records the absolute paths that contributed to a
//! builder's last output. Insertion order is preserved for diagnostics but
//! carries no meaning for invalidation.

use indexmap::IndexSet;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::build::paths;

/// Ordered, duplicate-free set of absolute file paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    paths: IndexSet<PathBuf>,
}

impl ResourceSet {
    /// Create an empty resource set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a path (normalized). Returns `true` if it was not present.
    pub fn insert(&mut self, path: impl AsRef<Path>) -> bool {
        self.paths.insert(paths::normalize(path.as_ref()))
    }

    /// Insert every path from an iterator.
    pub fn extend<I, P>(&mut self, iter: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in iter {
            self.insert(path);
        }
    }

    /// Merge another set into this one.
    pub fn merge(&mut self, other: &ResourceSet) {
        for path in &other.paths {
            self.paths.insert(path.clone());
        }
    }

    /// Check membership.
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(&paths::normalize(path))
    }

    /// Check whether any path in `changed` belongs to this set.
    pub fn intersects(&self, changed: &HashSet<PathBuf>) -> bool {
        if changed.len() < self.paths.len() {
            changed.iter().any(|p| self.paths.contains(p))
        } else {
            self.paths.iter().any(|p| changed.contains(p))
        }
    }

    /// Drop paths that no longer exist on disk.
    pub fn retain_existing(&mut self) {
        self.paths.retain(|p| p.exists());
    }

    /// Remove every path.
    pub fn clear(&mut self) {
        self.paths.clear();
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    /// Number of paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Copy the paths into a `Vec`.
    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.paths.iter().cloned().collect()
    }
}

impl<P: AsRef<Path>> FromIterator<P> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut set = ResourceSet::new();
        set.extend(iter);
        set
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type Item = &'a PathBuf;
    type IntoIter = indexmap::set::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_insert_deduplicates_normalized_paths() {
        let mut set = ResourceSet::new();
        assert!(set.insert("/src/a.css"));
        assert!(!set.insert("/src/./a.css"));
        assert!(!set.insert("/src/x/../a.css"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_preserves_insertion_order() {
        let set: ResourceSet = ["/c.js", "/a.js", "/b.js"].into_iter().collect();
        let order: Vec<_> = set.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(order, vec!["/c.js", "/a.js", "/b.js"]);
    }

    #[test]
    fn test_intersects() {
        let set: ResourceSet = ["/src/a.css", "/src/b.css"].into_iter().collect();
        let mut changed = HashSet::new();
        changed.insert(PathBuf::from("/src/z.css"));
        assert!(!set.intersects(&changed));
        changed.insert(PathBuf::from("/src/b.css"));
        assert!(set.intersects(&changed));
    }

    #[test]
    fn test_merge() {
        let mut a: ResourceSet = ["/a"].into_iter().collect();
        let b: ResourceSet = ["/a", "/b"].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.len(), 2);
        assert!(a.contains(Path::new("/b")));
    }

    #[test]
    fn test_retain_existing() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("here.js");
        std::fs::write(&present, "x").unwrap();

        let mut set = ResourceSet::new();
        set.insert(&present);
        set.insert(temp.path().join("gone.js"));
        set.retain_existing();

        assert_eq!(set.len(), 1);
        assert!(set.contains(&present));
    }
}
