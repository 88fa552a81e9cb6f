//! Verbatim copy of one file.

use std::path::Path;

use crate::build::{
    BuildError, Builder, BuilderCore, BuilderId, BuilderKind, BuilderOptions, BuilderState, EventEmitter,
    Invalidation, OutputRule, ResourceSet, WriteReport,
};

/// Copies its input to the output unchanged.
///
/// The content is snapshotted at `build()`, so `write()` commits exactly what
/// was built even if the input changes in between.
#[derive(Debug)]
pub struct CopyBuilder {
    core: BuilderCore,
    contents: Option<Vec<u8>>,
}

impl CopyBuilder {
    /// Create an unconfigured copy builder.
    pub fn new(id: BuilderId) -> Self {
        Self { core: BuilderCore::new(id, BuilderKind::Copy), contents: None }
    }
}

impl Builder for CopyBuilder {
    fn id(&self) -> &BuilderId {
        self.core.id()
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::Copy
    }

    fn setup(&mut self, options: BuilderOptions) -> Result<(), BuildError> {
        self.contents = None;
        self.core.configure(&options, &OutputRule::same_name())
    }

    fn build(&mut self, _invalidate: &Invalidation) -> Result<(), BuildError> {
        let (options, started) = self.core.begin_build()?;
        let contents = match &options.inline {
            Some(code) => code.clone().into_bytes(),
            None => match std::fs::read(&options.input) {
                Ok(bytes) => bytes,
                Err(_) => return self.core.fail(BuildError::InputNotFound(options.input.clone())),
            },
        };
        self.contents = Some(contents);

        let mut resources = ResourceSet::new();
        if !options.is_inline() {
            resources.insert(&options.input);
        }
        self.core.finish_build(resources, started);
        Ok(())
    }

    fn write(&mut self) -> Result<WriteReport, BuildError> {
        let options = self.core.begin_write()?;
        let mut report = WriteReport::new();
        let contents = self.contents.as_deref().unwrap_or_default();
        if let Err(err) = self.core.write_file(&options.output, contents, &mut report) {
            return self.core.fail(err);
        }
        Ok(self.core.finish_write(report))
    }

    fn resources(&self) -> &ResourceSet {
        self.core.resources()
    }

    fn state(&self) -> BuilderState {
        self.core.state()
    }

    fn events(&self) -> &EventEmitter {
        self.core.events()
    }

    fn output_path(&self) -> Option<&Path> {
        self.core.output_path()
    }

    fn input_path(&self) -> Option<&Path> {
        self.core.input_path()
    }
}
