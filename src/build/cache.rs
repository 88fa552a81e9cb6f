//! Session-owned memo of transform results.
//!
//! A watch session keeps one [`TransformCache`] and hands it to every builder
//! through the [`BuildContext`](crate::build::BuildContext). Entries are keyed
//! by input path plus a fingerprint of everything else that affects the
//! output (flags, format, inline code). The scheduler evicts entries touched
//! by a change before it enqueues rebuilds, so a cached result is never older
//! than the files it was computed from.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::build::paths;
use crate::transform::{ScriptOutput, StyleOutput};

/// Key of a cached transform result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Normalized input (or virtual) path
    pub input: PathBuf,
    /// Hash of the options that shape the output
    pub fingerprint: u64,
}

impl CacheKey {
    /// Build a key from an input path and any hashable option bundle.
    pub fn new(input: &Path, options: &impl Hash) -> Self {
        let mut hasher = DefaultHasher::new();
        options.hash(&mut hasher);
        Self { input: paths::normalize(input), fingerprint: hasher.finish() }
    }
}

/// A memoized collaborator result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedTransform {
    /// Script transform output
    Script(ScriptOutput),
    /// Style transform output
    Style(StyleOutput),
}

impl CachedTransform {
    fn dependencies(&self) -> &[PathBuf] {
        match self {
            CachedTransform::Script(out) => &out.dependencies,
            CachedTransform::Style(out) => &out.dependencies,
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that missed
    pub misses: u64,
    /// Entries currently held
    pub entries: usize,
}

/// Shared transform cache. Clones refer to the same storage.
#[derive(Debug, Clone, Default)]
pub struct TransformCache {
    entries: Arc<Mutex<HashMap<CacheKey, CachedTransform>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl TransformCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a result.
    pub fn get(&self, key: &CacheKey) -> Option<CachedTransform> {
        let found = self.entries.lock().ok().and_then(|entries| entries.get(key).cloned());
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store a result.
    pub fn insert(&self, key: CacheKey, value: CachedTransform) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, value);
        }
    }

    /// Drop every entry whose input or dependency list contains a changed path.
    /// Returns the number of entries removed.
    pub fn evict(&self, changed: &HashSet<PathBuf>) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|key, value| {
            !changed.contains(&key.input) && !value.dependencies().iter().any(|d| changed.contains(d))
        });
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, "evicted cached transforms");
        }
        removed
    }

    /// Remove everything.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
