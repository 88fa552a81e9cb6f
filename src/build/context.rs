//! Build context shared by every builder of a session.

use crate::build::TransformCache;
use crate::transform::Transforms;

/// Collaborators and session state handed to builders at construction.
///
/// Composite builders pass a clone of their own context to every child they
/// create, so a whole builder tree shares one set of collaborators and (in
/// watch mode) one transform cache.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// External transform collaborators
    transforms: Transforms,
    /// Transform cache, present only in long-lived sessions
    cache: Option<TransformCache>,
}

impl BuildContext {
    /// Create a context with the given collaborators and no cache.
    pub fn new(transforms: Transforms) -> Self {
        Self { transforms, cache: None }
    }

    /// Attach a session-owned cache.
    pub fn with_cache(mut self, cache: TransformCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Get the collaborators.
    pub fn transforms(&self) -> &Transforms {
        &self.transforms
    }

    /// Get the cache, if the session has one.
    pub fn cache(&self) -> Option<&TransformCache> {
        self.cache.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_context_default_has_no_cache() {
        let ctx = BuildContext::default();
        assert!(ctx.cache().is_none());
    }

    #[test]
    fn test_build_context_with_cache_is_shared() {
        let cache = TransformCache::new();
        let ctx = BuildContext::new(Transforms::default()).with_cache(cache.clone());
        let child = ctx.clone();
        assert!(child.cache().is_some());
        cache.clear();
        assert_eq!(child.cache().map(|c| c.len()), Some(0));
    }
}
