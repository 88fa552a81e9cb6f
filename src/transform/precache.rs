//! Default offline-cache collaborator.
//!
//! Injects a precache manifest (`[{url, revision}]`) into a service worker
//! script in place of the placeholder expression Workbox uses.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::build::paths;
use crate::transform::TransformError;

/// Expression replaced by the precache manifest.
pub const PRECACHE_PLACEHOLDER: &str = "self.__WB_MANIFEST";

/// Hex digits of the content hash kept as the revision.
const REVISION_LEN: usize = 16;

/// Injects a precache manifest into a worker script.
pub trait PrecacheInjector: Send + Sync {
    /// Return `script` with the manifest of every file under `root` (except
    /// `exclude`) injected.
    fn inject(&self, script: &str, root: &Path, exclude: &[PathBuf]) -> Result<String, TransformError>;
}

/// One precached file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecacheEntry {
    /// URL relative to the worker scope
    pub url: String,
    /// Content hash prefix
    pub revision: String,
}

/// Workbox-compatible manifest injector.
#[derive(Debug, Clone, Default)]
pub struct WorkboxInjector;

impl WorkboxInjector {
    /// Create the injector.
    pub fn new() -> Self {
        Self
    }

    /// List precache entries for every file under `root`, sorted by URL.
    /// Source maps and `exclude`d files are skipped.
    pub fn entries(root: &Path, exclude: &[PathBuf]) -> Result<Vec<PrecacheEntry>, TransformError> {
        let pattern = format!("{}/**/*", glob::Pattern::escape(&root.to_string_lossy()));
        let walker = glob::glob(&pattern).map_err(|e| TransformError::Other(format!("bad precache root: {}", e)))?;
        let exclude: Vec<PathBuf> = exclude.iter().map(|p| paths::normalize(p)).collect();

        let mut entries = Vec::new();
        for path in walker.flatten() {
            if !path.is_file() || path.extension().is_some_and(|e| e == "map") {
                continue;
            }
            let path = paths::normalize(&path);
            if exclude.contains(&path) {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|source| TransformError::Read { path: path.clone(), source })?;
            let mut revision = format!("{:x}", Sha256::digest(&bytes));
            revision.truncate(REVISION_LEN);
            entries.push(PrecacheEntry { url: paths::relative_url(root, &path), revision });
        }
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(entries)
    }
}

impl PrecacheInjector for WorkboxInjector {
    fn inject(&self, script: &str, root: &Path, exclude: &[PathBuf]) -> Result<String, TransformError> {
        if !script.contains(PRECACHE_PLACEHOLDER) {
            return Err(TransformError::Other(format!(
                "service worker does not reference `{}`",
                PRECACHE_PLACEHOLDER
            )));
        }
        let entries = Self::entries(root, exclude)?;
        let manifest = serde_json::to_string(&entries).map_err(|e| TransformError::Other(e.to_string()))?;
        tracing::debug!(root = %root.display(), entries = entries.len(), "injecting precache manifest");
        Ok(script.replace(PRECACHE_PLACEHOLDER, &manifest))
    }
}
