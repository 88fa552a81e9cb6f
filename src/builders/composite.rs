//! Child bookkeeping for composite builders.
//!
//! A composite builder registers its children here. Builds fan out across
//! the rayon pool and join before the composite continues; writes run one
//! child at a time in registration order so the files a parent references
//! exist before the parent itself is written.

use rayon::prelude::*;

use crate::build::{BuildError, Builder, BuilderState, EventEmitter, Invalidation, ResourceSet, WriteReport};

/// Ordered set of child builders owned by a composite.
pub struct Children {
    events: EventEmitter,
    builders: Vec<Box<dyn Builder>>,
}

impl std::fmt::Debug for Children {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.builders.iter().map(|b| b.id())).finish()
    }
}

impl Children {
    /// Empty set whose children forward their events through `parent`.
    pub fn new(parent: &EventEmitter) -> Self {
        Self { events: parent.clone(), builders: Vec::new() }
    }

    /// Add a child; its events are forwarded from now on. Returns its index.
    pub fn register(&mut self, child: Box<dyn Builder>) -> usize {
        self.events.forward_from(child.events());
        self.builders.push(child);
        self.builders.len() - 1
    }

    /// Drop every child.
    pub fn clear(&mut self) {
        self.builders.clear();
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    /// Whether there are no children.
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Child at `index`.
    pub fn get(&self, index: usize) -> Option<&dyn Builder> {
        self.builders.get(index).map(|b| b.as_ref())
    }

    /// Mutable child at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Builder + 'static)> {
        self.builders.get_mut(index).map(|b| b.as_mut())
    }

    /// Children in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Builder> {
        self.builders.iter().map(|b| b.as_ref())
    }

    /// Build every child that needs it, concurrently, and wait for all of them.
    ///
    /// With a non-empty `invalidate`, children that are already built and
    /// whose resources are untouched are skipped. Every child runs to
    /// completion even when a sibling fails; the error reported is the first
    /// one in registration order, tagged with the child's identity.
    pub fn build_all(&mut self, invalidate: &Invalidation) -> Result<(), BuildError> {
        let results: Vec<Result<(), BuildError>> = self
            .builders
            .par_iter_mut()
            .map(|child| {
                if !needs_build(child.as_ref(), invalidate) {
                    tracing::trace!(child = %child.id(), "child unaffected, skipping");
                    return Ok(());
                }
                child.build(invalidate).map_err(|err| err.in_child(child.id()))
            })
            .collect();
        results.into_iter().collect()
    }

    /// Write every child in registration order; stops at the first failure.
    pub fn write_all(&mut self) -> Result<WriteReport, BuildError> {
        let mut report = WriteReport::new();
        for child in &mut self.builders {
            let written = child.write().map_err(|err| err.in_child(child.id()))?;
            report.extend(written);
        }
        Ok(report)
    }

    /// Union of every child's resources.
    pub fn resources(&self) -> ResourceSet {
        let mut resources = ResourceSet::new();
        for child in &self.builders {
            resources.merge(child.resources());
        }
        resources
    }
}

/// Whether a child must be rebuilt for `invalidate`: it has no usable
/// result yet, everything is invalidated, or one of its resources changed.
pub(crate) fn needs_build(builder: &dyn Builder, invalidate: &Invalidation) -> bool {
    let built = matches!(builder.state(), BuilderState::Built | BuilderState::Written);
    !built || invalidate.is_empty() || builder.resources().intersects(invalidate)
}

/// Build an optional typed child if [`needs_build`] says so, tagging its
/// error with its identity.
pub(crate) fn build_optional<B: Builder>(child: &mut Option<B>, invalidate: &Invalidation) -> Result<(), BuildError> {
    match child {
        Some(child) if needs_build(&*child, invalidate) => {
            let id = child.id().clone();
            child.build(invalidate).map_err(|err| err.in_child(&id))
        }
        _ => Ok(()),
    }
}

/// Write an optional typed child, tagging its error with its identity.
pub(crate) fn write_optional<B: Builder>(child: &mut Option<B>, report: &mut WriteReport) -> Result<(), BuildError> {
    if let Some(child) = child {
        let id = child.id().clone();
        report.extend(child.write().map_err(|err| err.in_child(&id))?);
    }
    Ok(())
}
