//! Dependency index: which builders depend on which files.
//!
//! The index keeps a forward map (builder → paths) next to the reverse map
//! (path → builders) so that applying a builder's new resource set only
//! touches the paths that actually changed membership. Entries whose
//! dependent set becomes empty are pruned.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::build::{paths, BuilderId, ResourceSet};

/// Paths that entered and left a builder's entry during [`DependencyIndex::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDelta {
    /// Paths newly mapped to the builder
    pub added: Vec<PathBuf>,
    /// Paths no longer mapped to the builder
    pub removed: Vec<PathBuf>,
}

impl IndexDelta {
    /// Whether the builder's entry was left untouched.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Reverse map from file path to the builders whose last successful build
/// read that file.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    forward: HashMap<BuilderId, HashSet<PathBuf>>,
    reverse: HashMap<PathBuf, BTreeSet<BuilderId>>,
    /// Declared output path → builder, for directory-backed builders
    aliases: HashMap<PathBuf, BuilderId>,
}

impl DependencyIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `id`'s entries with `resources`, touching only the difference.
    pub fn apply(&mut self, id: &BuilderId, resources: &ResourceSet) -> IndexDelta {
        let next: HashSet<PathBuf> = resources.iter().cloned().collect();
        let previous = self.forward.remove(id).unwrap_or_default();

        let mut delta = IndexDelta::default();
        for path in previous.difference(&next) {
            self.unlink(path, id);
            delta.removed.push(path.clone());
        }
        for path in next.difference(&previous) {
            self.reverse.entry(path.clone()).or_default().insert(id.clone());
            delta.added.push(path.clone());
        }
        delta.added.sort();
        delta.removed.sort();

        if !next.is_empty() {
            self.forward.insert(id.clone(), next);
        }
        tracing::trace!(builder = %id, added = delta.added.len(), removed = delta.removed.len(), "index updated");
        delta
    }

    /// Add `resources` to `id`'s entries without dropping any.
    pub fn extend(&mut self, id: &BuilderId, resources: &ResourceSet) -> IndexDelta {
        let mut delta = IndexDelta::default();
        let entry = self.forward.entry(id.clone()).or_default();
        for path in resources.iter() {
            if entry.insert(path.clone()) {
                self.reverse.entry(path.clone()).or_default().insert(id.clone());
                delta.added.push(path.clone());
            }
        }
        if entry.is_empty() {
            self.forward.remove(id);
        }
        delta.added.sort();
        delta
    }

    /// Builder registered under the alias `path`, if any.
    pub fn alias_owner(&self, path: &Path) -> Option<&BuilderId> {
        self.aliases.get(&paths::normalize(path))
    }

    /// Register `output` as an alias: a change reported at exactly that path
    /// triggers `id` even though it is not in its resource set.
    pub fn set_alias(&mut self, id: &BuilderId, output: &Path) {
        self.aliases.retain(|_, owner| owner != id);
        self.aliases.insert(paths::normalize(output), id.clone());
    }

    /// Drop every entry (and alias) of `id`.
    pub fn remove(&mut self, id: &BuilderId) {
        if let Some(previous) = self.forward.remove(id) {
            for path in &previous {
                self.unlink(path, id);
            }
        }
        self.aliases.retain(|_, owner| owner != id);
    }

    /// Builders affected by a change at `path`: its dependents plus the
    /// builder aliased to that path, if any.
    pub fn lookup(&self, path: &Path) -> BTreeSet<BuilderId> {
        let path = paths::normalize(path);
        let mut found = self.reverse.get(&path).cloned().unwrap_or_default();
        if let Some(owner) = self.aliases.get(&path) {
            found.insert(owner.clone());
        }
        found
    }

    /// Group a batch of changed paths by affected builder.
    pub fn affected<'a, I>(&self, changed: I) -> BTreeMap<BuilderId, HashSet<PathBuf>>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut affected: BTreeMap<BuilderId, HashSet<PathBuf>> = BTreeMap::new();
        for path in changed {
            for id in self.lookup(path) {
                affected.entry(id).or_default().insert(paths::normalize(path));
            }
        }
        affected
    }

    /// Builders depending on `path` (exact match only).
    pub fn dependents(&self, path: &Path) -> Option<&BTreeSet<BuilderId>> {
        self.reverse.get(&paths::normalize(path))
    }

    /// Paths currently recorded for `id`.
    pub fn resources_of(&self, id: &BuilderId) -> Option<&HashSet<PathBuf>> {
        self.forward.get(id)
    }

    /// Whether any builder depends on `path`.
    pub fn contains(&self, path: &Path) -> bool {
        self.reverse.contains_key(&paths::normalize(path))
    }

    /// Every watched path.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.reverse.keys()
    }

    /// Number of distinct watched paths.
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    /// Whether nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Number of builders with at least one entry.
    pub fn builder_count(&self) -> usize {
        self.forward.len()
    }

    fn unlink(&mut self, path: &Path, id: &BuilderId) {
        if let Some(dependents) = self.reverse.get_mut(path) {
            dependents.remove(id);
            if dependents.is_empty() {
                self.reverse.remove(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> ResourceSet {
        let mut set = ResourceSet::new();
        set.extend(paths.iter().map(Path::new));
        set
    }

    #[test]
    fn test_rebuild_with_new_resources_prunes_and_adds() {
        let mut index = DependencyIndex::new();
        let x = BuilderId::new("html:/site/index.html");
        index.apply(&x, &set(&["/site/a", "/site/b"]));

        let delta = index.apply(&x, &set(&["/site/b", "/site/c"]));

        assert_eq!(delta.added, vec![PathBuf::from("/site/c")]);
        assert_eq!(delta.removed, vec![PathBuf::from("/site/a")]);
        assert!(!index.contains(Path::new("/site/a")));
        assert!(index.dependents(Path::new("/site/a")).is_none());
        assert_eq!(index.lookup(Path::new("/site/b")), BTreeSet::from([x.clone()]));
        assert_eq!(index.lookup(Path::new("/site/c")), BTreeSet::from([x]));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_shared_path_survives_one_builder_leaving() {
        let mut index = DependencyIndex::new();
        let a = BuilderId::new("style:/site/a.css");
        let b = BuilderId::new("style:/site/b.css");
        index.apply(&a, &set(&["/site/a.css", "/site/vars.css"]));
        index.apply(&b, &set(&["/site/b.css", "/site/vars.css"]));

        assert_eq!(index.lookup(Path::new("/site/vars.css")).len(), 2);
        index.remove(&a);
        assert_eq!(index.lookup(Path::new("/site/vars.css")), BTreeSet::from([b]));
        assert!(!index.contains(Path::new("/site/a.css")));
        assert_eq!(index.builder_count(), 1);
    }

    #[test]
    fn test_unchanged_resources_give_empty_delta() {
        let mut index = DependencyIndex::new();
        let id = BuilderId::new("script:/site/app.js");
        index.apply(&id, &set(&["/site/app.js"]));
        assert!(index.apply(&id, &set(&["/site/app.js"])).is_empty());

        index.apply(&id, &ResourceSet::new());
        assert!(index.is_empty());
        assert!(index.resources_of(&id).is_none());
    }

    #[test]
    fn test_alias_matches_declared_output() {
        let mut index = DependencyIndex::new();
        let icons = BuilderId::new("icon:/site/logo.png");
        index.apply(&icons, &set(&["/site/logo.png"]));
        index.set_alias(&icons, Path::new("/site/dist/icons"));

        assert_eq!(index.lookup(Path::new("/site/dist/icons")), BTreeSet::from([icons.clone()]));
        assert!(index.lookup(Path::new("/site/dist/icons/a.png")).is_empty());

        assert_eq!(index.alias_owner(Path::new("/site/dist/icons")), Some(&icons));

        index.set_alias(&icons, Path::new("/site/dist/favicons"));
        assert!(index.lookup(Path::new("/site/dist/icons")).is_empty());
        assert!(index.alias_owner(Path::new("/site/dist/icons")).is_none());
    }

    #[test]
    fn test_extend_only_adds() {
        let mut index = DependencyIndex::new();
        let page = BuilderId::new("html:/site/index.html");
        index.apply(&page, &set(&["/site/index.html", "/site/b.js"]));

        let delta = index.extend(&page, &set(&["/site/index.html", "/site/a.css"]));
        assert_eq!(delta.added, vec![PathBuf::from("/site/a.css")]);
        assert!(delta.removed.is_empty());
        assert!(index.lookup(Path::new("/site/b.js")).contains(&page));
        assert!(index.lookup(Path::new("/site/a.css")).contains(&page));

        assert!(index.extend(&BuilderId::new("copy:/site/x"), &ResourceSet::new()).is_empty());
        assert_eq!(index.builder_count(), 1);
    }

    #[test]
    fn test_affected_groups_changes_by_builder() {
        let mut index = DependencyIndex::new();
        let html = BuilderId::new("html:/site/index.html");
        let style = BuilderId::new("style:/site/a.css");
        index.apply(&html, &set(&["/site/index.html", "/site/a.css", "/site/b.js"]));
        index.apply(&style, &set(&["/site/a.css"]));

        let changed = [PathBuf::from("/site/a.css"), PathBuf::from("/site/b.js"), PathBuf::from("/site/x")];
        let affected = index.affected(changed.iter().map(PathBuf::as_path));

        assert_eq!(affected.len(), 2);
        assert_eq!(affected[&html].len(), 2);
        assert_eq!(affected[&style], HashSet::from([PathBuf::from("/site/a.css")]));
    }
}
