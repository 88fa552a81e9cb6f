//! Offline-cache service worker builder.

use std::path::{Path, PathBuf};

use crate::build::{
    BuildContext, BuildError, Builder, BuilderCore, BuilderId, BuilderKind, BuilderOptions, BuilderState,
    EventEmitter, Invalidation, ModuleFormat, OutputRule, ResolvedOptions, ResourceSet, WriteReport,
};
use crate::builders::ScriptBuilder;

/// Worker generated when no source script exists.
pub const DEFAULT_WORKER: &str = r#"const PRECACHE = 'keel-precache-v1';
const MANIFEST = self.__WB_MANIFEST;

self.addEventListener('install', (event) => {
  event.waitUntil(
    caches.open(PRECACHE).then((cache) => cache.addAll(MANIFEST.map((entry) => entry.url)))
  );
  self.skipWaiting();
});

self.addEventListener('activate', (event) => {
  event.waitUntil(
    caches.keys().then((keys) =>
      Promise.all(keys.filter((key) => key !== PRECACHE).map((key) => caches.delete(key)))
    )
  );
  self.clients.claim();
});

self.addEventListener('fetch', (event) => {
  if (event.request.method !== 'GET') {
    return;
  }
  event.respondWith(
    caches.match(event.request).then((cached) => cached || fetch(event.request))
  );
});
"#;

/// Bundles a worker script as a classic script, then injects the precache
/// manifest of the precache root into the written file.
///
/// The input is optional; without one (or when it does not exist) the
/// [`DEFAULT_WORKER`] template is used.
#[derive(Debug)]
pub struct ServiceWorkerBuilder {
    core: BuilderCore,
    ctx: BuildContext,
    script: ScriptBuilder,
}

impl ServiceWorkerBuilder {
    /// Create an unconfigured service worker builder.
    pub fn new(id: BuilderId, ctx: BuildContext) -> Self {
        let core = BuilderCore::new(id, BuilderKind::ServiceWorker);
        let script = ScriptBuilder::new(core.id().child(BuilderKind::Script, 0), ctx.clone());
        core.events().forward_from(script.events());
        Self { core, ctx, script }
    }

    fn script_options(options: &ResolvedOptions) -> BuilderOptions {
        let base = if options.input.is_file() {
            BuilderOptions::new(&options.input)
        } else {
            let virtual_path = if options.input.is_dir() { options.input.join("sw.js") } else { options.input.clone() };
            BuilderOptions::inline(DEFAULT_WORKER, virtual_path)
        };
        base.with_output(&options.output)
            .with_root(&options.root)
            .with_flags(options.flags.clone())
            .with_format(ModuleFormat::Iife)
    }

    fn precache_root(options: &ResolvedOptions) -> PathBuf {
        options.precache_root.clone().unwrap_or_else(|| options.output_dir())
    }
}

impl Builder for ServiceWorkerBuilder {
    fn id(&self) -> &BuilderId {
        self.core.id()
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::ServiceWorker
    }

    fn setup(&mut self, options: BuilderOptions) -> Result<(), BuildError> {
        let rule = if options.input.is_none() && options.inline.is_none() {
            OutputRule::named("sw.js").allow_missing_input()
        } else {
            OutputRule::extension("js").allow_missing_input()
        };
        self.core.configure(&options, &rule)
    }

    fn build(&mut self, invalidate: &Invalidation) -> Result<(), BuildError> {
        let (options, started) = self.core.begin_build_optional_input()?;
        let id = self.script.id().clone();
        let result = self
            .script
            .setup(Self::script_options(&options))
            .and_then(|()| self.script.build(invalidate))
            .map_err(|err| err.in_child(&id));
        if let Err(err) = result {
            return self.core.fail(err);
        }
        let resources = self.script.resources().clone();
        self.core.finish_build(resources, started);
        Ok(())
    }

    fn write(&mut self) -> Result<WriteReport, BuildError> {
        let options = self.core.begin_write()?;
        let id = self.script.id().clone();
        let written = match self.script.write() {
            Ok(report) => report,
            Err(err) => return self.core.fail(err.in_child(&id)),
        };

        let script = match std::fs::read_to_string(&options.output) {
            Ok(script) => script,
            Err(source) => return self.core.fail(BuildError::io(&options.output, source)),
        };
        let map = PathBuf::from(format!("{}.map", options.output.display()));
        let root = Self::precache_root(&options);
        let injected = match self.ctx.transforms().precache.inject(&script, &root, &[options.output.clone(), map]) {
            Ok(injected) => injected,
            Err(source) => return self.core.fail(BuildError::Transform { path: options.input.clone(), source }),
        };

        let mut report = WriteReport::new();
        report.outputs.extend(written.outputs.into_iter().filter(|o| o.path != options.output));
        if let Err(err) = self.core.write_file(&options.output, injected.as_bytes(), &mut report) {
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

    fn children(&self) -> Vec<&dyn Builder> {
        vec![&self.script]
    }
}
