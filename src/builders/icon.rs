//! Icon fan-out builder: one source image, several sized outputs.

use std::path::{Path, PathBuf};

use crate::build::{
    BuildContext, BuildError, Builder, BuilderCore, BuilderId, BuilderKind, BuilderOptions, BuilderState,
    EventEmitter, Invalidation, OutputRule, ResourceSet, WriteError, WriteReport,
};
use crate::builders::progress;
use crate::transform::{default_favicons, IconSpec, TransformError};

/// Renders every configured [`IconSpec`] from one source image into the
/// output directory.
///
/// A source that cannot be decoded fails the build. A single spec that
/// cannot be rendered only produces a warning; its file is skipped and
/// `write()` reports a partial failure after writing the rest.
#[derive(Debug)]
pub struct IconBuilder {
    core: BuilderCore,
    ctx: BuildContext,
    specs: Vec<IconSpec>,
    rendered: Vec<Result<Vec<u8>, String>>,
}

impl IconBuilder {
    /// Create an unconfigured icon builder.
    pub fn new(id: BuilderId, ctx: BuildContext) -> Self {
        Self { core: BuilderCore::new(id, BuilderKind::Icon), ctx, specs: Vec::new(), rendered: Vec::new() }
    }

    /// Icons rendered by the last build with their output paths.
    pub fn icon_outputs(&self) -> Vec<(&IconSpec, PathBuf)> {
        let Some(dir) = self.core.output_path() else {
            return Vec::new();
        };
        self.specs
            .iter()
            .zip(&self.rendered)
            .filter(|(_, rendered)| rendered.is_ok())
            .map(|(spec, _)| (spec, dir.join(&spec.name)))
            .collect()
    }
}

impl Builder for IconBuilder {
    fn id(&self) -> &BuilderId {
        self.core.id()
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::Icon
    }

    fn setup(&mut self, options: BuilderOptions) -> Result<(), BuildError> {
        self.rendered.clear();
        self.specs = if options.icons.is_empty() { default_favicons() } else { options.icons.clone() };
        if let Some(spec) = self.specs.iter().find(|s| s.width == 0 || s.height == 0 || s.name.is_empty()) {
            let err = BuildError::config(format!("invalid icon spec `{}` ({})", spec.name, spec.sizes()));
            self.specs.clear();
            return Err(err);
        }
        self.core.configure(&options, &OutputRule::directory())
    }

    fn build(&mut self, _invalidate: &Invalidation) -> Result<(), BuildError> {
        let (options, started) = self.core.begin_build()?;
        self.rendered.clear();

        let results = match self.ctx.transforms().image.composite(&options.input, &self.specs) {
            Ok(results) => results,
            Err(source) => return self.core.fail(BuildError::Transform { path: options.input.clone(), source }),
        };
        if results.len() != self.specs.len() {
            let source = TransformError::Other(format!(
                "compositor returned {} images for {} icon specs",
                results.len(),
                self.specs.len()
            ));
            return self.core.fail(BuildError::Transform { path: options.input.clone(), source });
        }

        for (spec, result) in self.specs.iter().zip(results) {
            match result {
                Ok(bytes) => {
                    progress(&self.core, spec.name.clone());
                    self.rendered.push(Ok(bytes));
                }
                Err(err) => {
                    let message = format!("{}: {}", spec.name, err);
                    self.core.events().warn(message.clone());
                    self.rendered.push(Err(message));
                }
            }
        }

        let resources: ResourceSet = [&options.input].into_iter().collect();
        self.core.finish_build(resources, started);
        Ok(())
    }

    fn write(&mut self) -> Result<WriteReport, BuildError> {
        let options = self.core.begin_write()?;
        let mut report = WriteReport::new();
        let mut failures = Vec::new();
        for (spec, rendered) in self.specs.iter().zip(&self.rendered) {
            match rendered {
                Ok(bytes) => {
                    if let Err(err) = self.core.write_file(&options.output.join(&spec.name), bytes, &mut report) {
                        failures.push(err.to_string());
                    }
                }
                Err(message) => failures.push(message.clone()),
            }
        }
        if !failures.is_empty() {
            let attempted = self.specs.len();
            return self.core.fail(WriteError::Partial { attempted, failures }.into());
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
