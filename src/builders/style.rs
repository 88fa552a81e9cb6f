//! Style sheet builder.

use std::path::Path;

use crate::build::{
    capabilities_for, BuildContext, BuildError, Builder, BuilderCore, BuilderId, BuilderKind, BuilderOptions,
    BuilderState, CacheKey, CachedTransform, Capability, EventEmitter, Invalidation, OutputRule, ResourceSet,
    WriteReport,
};
use crate::builders::{collect_resources, run_capabilities, write_with_map};
use crate::transform::{Entry, StyleOutput, StyleRequest, TransformError};

/// Compiles a style sheet through the session's
/// [`StyleTransform`](crate::transform::StyleTransform).
///
/// Resources are the sheet, every `@import`ed sheet and the local assets the
/// sheets reference with `url()`.
#[derive(Debug)]
pub struct StyleBuilder {
    core: BuilderCore,
    ctx: BuildContext,
    capabilities: Vec<Box<dyn Capability>>,
    output: Option<StyleOutput>,
}

impl StyleBuilder {
    /// Create an unconfigured style builder.
    pub fn new(id: BuilderId, ctx: BuildContext) -> Self {
        Self { core: BuilderCore::new(id, BuilderKind::Style), ctx, capabilities: Vec::new(), output: None }
    }

    /// Output of the last successful build.
    pub fn output(&self) -> Option<&StyleOutput> {
        self.output.as_ref()
    }

    fn transform(&self, request: &StyleRequest<'_>, key: CacheKey) -> Result<StyleOutput, TransformError> {
        let cache = self.ctx.cache();
        if let Some(CachedTransform::Style(output)) = cache.and_then(|c| c.get(&key)) {
            return Ok(output);
        }
        let output = self.ctx.transforms().style.transform(request)?;
        if let Some(cache) = cache {
            cache.insert(key, CachedTransform::Style(output.clone()));
        }
        Ok(output)
    }
}

impl Builder for StyleBuilder {
    fn id(&self) -> &BuilderId {
        self.core.id()
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::Style
    }

    fn setup(&mut self, options: BuilderOptions) -> Result<(), BuildError> {
        self.output = None;
        self.capabilities = capabilities_for(&options.flags);
        self.core.configure(&options, &OutputRule::extension("css"))
    }

    fn build(&mut self, invalidate: &Invalidation) -> Result<(), BuildError> {
        let (options, started) = self.core.begin_build()?;
        if let Some(cache) = self.ctx.cache() {
            cache.evict(invalidate);
        }

        let entry = match &options.inline {
            Some(code) => Entry::Inline { code, path: &options.input },
            None => Entry::File(&options.input),
        };
        let request = StyleRequest { entry, flags: &options.flags };
        let key = CacheKey::new(&options.input, &(&options.flags, &options.inline));
        let output = match self.transform(&request, key) {
            Ok(output) => output,
            Err(source) => return self.core.fail(BuildError::Transform { path: options.input.clone(), source }),
        };

        if let Err(err) = run_capabilities(
            &self.core,
            &self.capabilities,
            &options.input,
            &output.diagnostics,
            None,
            &output.dependencies,
        ) {
            return self.core.fail(err);
        }

        let resources = collect_resources(&options, &output.dependencies);
        self.output = Some(output);
        self.core.finish_build(resources, started);
        Ok(())
    }

    fn write(&mut self) -> Result<WriteReport, BuildError> {
        let options = self.core.begin_write()?;
        let mut report = WriteReport::new();
        let (css, map) = match &self.output {
            Some(output) => (output.css.as_str(), output.map.as_deref().filter(|_| options.flags.sourcemap)),
            None => ("", None),
        };
        let written = write_with_map(
            &self.core,
            &options.output,
            css,
            map,
            |name| format!("/*# sourceMappingURL={} */", name),
            &mut report,
        );
        if let Err(err) = written {
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
