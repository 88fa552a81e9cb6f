//! Script bundle builder.

use std::path::Path;

use crate::build::{
    capabilities_for, BuildContext, BuildError, Builder, BuilderCore, BuilderId, BuilderKind, BuilderOptions,
    BuilderState, CacheKey, CachedTransform, Capability, EventEmitter, Invalidation, OutputRule, ResourceSet,
    WriteReport,
};
use crate::builders::{collect_resources, run_capabilities, write_with_map};
use crate::transform::{Entry, ScriptOutput, ScriptRequest};

/// Bundles a script entry (file or inline code) through the session's
/// [`ScriptTransform`](crate::transform::ScriptTransform).
///
/// Output is `<name>.js` plus `<name>.js.map` when source maps are enabled.
/// The resource set is the entry plus every module the transform read.
#[derive(Debug)]
pub struct ScriptBuilder {
    core: BuilderCore,
    ctx: BuildContext,
    capabilities: Vec<Box<dyn Capability>>,
    output: Option<ScriptOutput>,
}

impl ScriptBuilder {
    /// Create an unconfigured script builder.
    pub fn new(id: BuilderId, ctx: BuildContext) -> Self {
        Self { core: BuilderCore::new(id, BuilderKind::Script), ctx, capabilities: Vec::new(), output: None }
    }

    /// Output of the last successful build.
    pub fn output(&self) -> Option<&ScriptOutput> {
        self.output.as_ref()
    }
}

impl Builder for ScriptBuilder {
    fn id(&self) -> &BuilderId {
        self.core.id()
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::Script
    }

    fn setup(&mut self, options: BuilderOptions) -> Result<(), BuildError> {
        self.output = None;
        self.capabilities = capabilities_for(&options.flags);
        self.core.configure(&options, &OutputRule::extension("js"))
    }

    fn build(&mut self, invalidate: &Invalidation) -> Result<(), BuildError> {
        let (options, started) = self.core.begin_build()?;
        let entry = match &options.inline {
            Some(code) => Entry::Inline { code, path: &options.input },
            None => Entry::File(&options.input),
        };
        let request = ScriptRequest { entry, flags: &options.flags, format: options.format };

        let cache = self.ctx.cache();
        let key = CacheKey::new(&options.input, &(&options.flags, options.format, &options.inline));
        if let Some(cache) = cache {
            cache.evict(invalidate);
        }
        let output = match cache.and_then(|c| c.get(&key)) {
            Some(CachedTransform::Script(output)) => output,
            _ => match self.ctx.transforms().script.transform(&request) {
                Ok(output) => {
                    if let Some(cache) = cache {
                        cache.insert(key, CachedTransform::Script(output.clone()));
                    }
                    output
                }
                Err(source) => {
                    return self.core.fail(BuildError::Transform { path: options.input.clone(), source })
                }
            },
        };

        if let Err(err) = run_capabilities(
            &self.core,
            &self.capabilities,
            &options.input,
            &output.diagnostics,
            output.analysis.as_ref(),
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
        let (code, map) = match &self.output {
            Some(output) => (output.code.as_str(), output.map.as_deref().filter(|_| options.flags.sourcemap)),
            None => ("", None),
        };
        let written = write_with_map(
            &self.core,
            &options.output,
            code,
            map,
            |name| format!("//# sourceMappingURL={}", name),
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
