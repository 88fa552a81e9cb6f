//! Default script collaborator: a module-graph concatenating bundler.
//!
//! Follows relative module specifiers from the entry, emits every local
//! module once in dependency order with its local import statements removed,
//! and leaves bare (package) specifiers untouched. No syntax lowering is
//! performed; `target` and the JSX pragmas are passed through as hints only.

use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::build::{paths, ModuleFormat};
use crate::transform::{
    line_of, AnalysisEntry, AnalysisReport, Diagnostic, Entry, ScriptOutput, ScriptRequest, Severity,
    TransformError,
};

/// Extensions tried, in order, when a specifier has none.
pub const MODULE_EXTENSIONS: &[&str] = &["js", "mjs", "ts", "tsx", "jsx"];

/// Turns an entry module into a single script.
pub trait ScriptTransform: Send + Sync {
    /// Transform the entry described by `request`.
    fn transform(&self, request: &ScriptRequest<'_>) -> Result<ScriptOutput, TransformError>;
}

/// One module read while walking the graph.
#[derive(Debug, Clone)]
struct Module {
    path: PathBuf,
    source: String,
    body: String,
}

fn compile(pattern: &str) -> Result<Regex, TransformError> {
    Regex::new(pattern).map_err(|e| TransformError::Other(format!("failed to compile pattern: {e}")))
}

struct Patterns {
    static_import: Regex,
    dynamic_import: Regex,
    require: Regex,
    export_decl: Regex,
    export_list: Regex,
    line_comment: Regex,
    block_comment: Regex,
    debugger: Regex,
    var_decl: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, TransformError> {
        Ok(Self {
            static_import: compile(
                r#"(?m)^[ \t]*(?:import|export)\s+(?:[\w$*{}\s,]+?\s+from\s+)?["']([^"']+)["'][ \t]*;?[ \t]*\r?\n?"#,
            )?,
            dynamic_import: compile(r#"\bimport\(\s*["']([^"']+)["']\s*\)"#)?,
            require: compile(r#"\brequire\(\s*["']([^"']+)["']\s*\)"#)?,
            export_decl: compile(
                r"(?m)^([ \t]*)export\s+(?:default\s+)?(async\s+function|function|class|const|let|var)\b",
            )?,
            export_list: compile(r"(?m)^[ \t]*export\s*\{[^}]*\}[ \t]*;?[ \t]*\r?\n?")?,
            line_comment: compile(r"(?m)^[ \t]*//.*$")?,
            block_comment: compile(r"(?s)/\*.*?\*/")?,
            debugger: compile(r"\bdebugger\s*;?")?,
            var_decl: compile(r"(?m)^[ \t]*var\s+")?,
        })
    }
}

/// Concatenating bundler over relative `import`/`export from`/`import()`/`require()`.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraphBundler;

impl ModuleGraphBundler {
    /// Create the bundler.
    pub fn new() -> Self {
        Self
    }

    /// Resolve a relative specifier from `importer`. Bare specifiers yield `None`.
    pub fn resolve_specifier(importer: &Path, specifier: &str) -> Result<Option<PathBuf>, TransformError> {
        if !(specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')) {
            return Ok(None);
        }
        let dir = importer.parent().unwrap_or_else(|| Path::new("/"));
        let base = paths::resolve(dir, Path::new(specifier));
        if base.is_file() {
            return Ok(Some(base));
        }
        for ext in MODULE_EXTENSIONS {
            let mut candidate = base.clone().into_os_string();
            candidate.push(".");
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        for ext in MODULE_EXTENSIONS {
            let candidate = base.join(format!("index.{}", ext));
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        Err(TransformError::Parse {
            path: importer.to_path_buf(),
            message: format!("cannot resolve module '{}'", specifier),
        })
    }

    fn specifiers(re: &Patterns, source: &str) -> Vec<String> {
        let mut found = Vec::new();
        for pattern in [&re.static_import, &re.dynamic_import, &re.require] {
            for caps in pattern.captures_iter(source) {
                found.push(caps[1].to_string());
            }
        }
        found
    }

    /// Depth-first walk; modules are pushed after their dependencies.
    fn visit(
        re: &Patterns,
        path: &Path,
        source: String,
        is_entry: bool,
        format: ModuleFormat,
        visited: &mut HashSet<PathBuf>,
        out: &mut Vec<Module>,
    ) -> Result<(), TransformError> {
        visited.insert(path.to_path_buf());
        for specifier in Self::specifiers(re, &source) {
            let Some(dep) = Self::resolve_specifier(path, &specifier)? else {
                continue;
            };
            if visited.contains(&dep) {
                continue;
            }
            let dep_source = Entry::File(&dep).read()?;
            Self::visit(re, &dep, dep_source, false, format, visited, out)?;
        }
        let body = Self::strip_module_syntax(re, path, &source, is_entry && format == ModuleFormat::Esm);
        out.push(Module { path: path.to_path_buf(), source, body });
        Ok(())
    }

    /// Remove local imports; drop `export` keywords unless the module keeps them.
    fn strip_module_syntax(re: &Patterns, path: &Path, source: &str, keep_exports: bool) -> String {
        let stripped = re.static_import.replace_all(source, |caps: &regex::Captures<'_>| {
            match Self::resolve_specifier(path, &caps[1]) {
                Ok(Some(_)) => String::new(),
                _ => caps[0].to_string(),
            }
        });
        if keep_exports {
            return stripped.into_owned();
        }
        let stripped = re.export_list.replace_all(&stripped, "");
        re.export_decl.replace_all(&stripped, "$1$2").into_owned()
    }

    fn minify(re: &Patterns, code: &str) -> String {
        let code = re.block_comment.replace_all(code, "");
        let code = re.line_comment.replace_all(&code, "");
        code.lines().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join("\n")
    }

    fn lint(re: &Patterns, modules: &[Module]) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for module in modules {
            for m in re.debugger.find_iter(&module.source) {
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    rule: "no-debugger".to_string(),
                    message: "unexpected 'debugger' statement".to_string(),
                    file: module.path.clone(),
                    line: Some(line_of(&module.source, m.start())),
                });
            }
            for m in re.var_decl.find_iter(&module.source) {
                diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    rule: "no-var".to_string(),
                    message: "use 'let' or 'const' instead of 'var'".to_string(),
                    file: module.path.clone(),
                    line: Some(line_of(&module.source, m.start())),
                });
            }
        }
        diagnostics
    }

    fn source_map(entry: &Path, modules: &[Module]) -> String {
        let base = entry.parent().unwrap_or_else(|| Path::new("/"));
        let sources: Vec<String> = modules.iter().map(|m| paths::relative_url(base, &m.path)).collect();
        let contents: Vec<&str> = modules.iter().map(|m| m.source.as_str()).collect();
        let file = entry.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        json!({
            "version": 3,
            "file": paths::with_extension(Path::new(&file), "js").to_string_lossy(),
            "sources": sources,
            "sourcesContent": contents,
            "names": [],
            "mappings": "",
        })
        .to_string()
    }
}

impl ScriptTransform for ModuleGraphBundler {
    fn transform(&self, request: &ScriptRequest<'_>) -> Result<ScriptOutput, TransformError> {
        let entry_path = paths::normalize(request.entry.path());
        let source = request.entry.read()?;

        let re = Patterns::compile()?;
        let mut visited = HashSet::new();
        let mut modules = Vec::new();
        Self::visit(&re, &entry_path, source, true, request.format, &mut visited, &mut modules)?;

        let flags = request.flags;
        let base = entry_path.parent().unwrap_or_else(|| Path::new("/"));
        let mut code = String::new();
        for module in &modules {
            if !flags.production && modules.len() > 1 {
                code.push_str(&format!("// {}\n", paths::relative_url(base, &module.path)));
            }
            code.push_str(module.body.trim_end());
            code.push('\n');
        }
        if flags.production {
            code = Self::minify(&re, &code);
            code.push('\n');
        }
        if request.format == ModuleFormat::Iife {
            code = format!("(function () {{\n'use strict';\n{}}})();\n", code);
        }

        // Inline code has no file of its own to depend on.
        let dependencies = modules
            .iter()
            .filter(|m| matches!(request.entry, Entry::File(_)) || m.path != entry_path)
            .map(|m| m.path.clone())
            .collect();
        let diagnostics = if flags.wants_lint() { Self::lint(&re, &modules) } else { Vec::new() };
        let analysis = flags.analyze.then(|| {
            AnalysisReport::from_entries(
                modules
                    .iter()
                    .map(|m| AnalysisEntry { path: m.path.clone(), bytes: m.source.len() as u64 })
                    .collect(),
            )
        });
        let map = flags.sourcemap.then(|| Self::source_map(&entry_path, &modules));

        Ok(ScriptOutput { code, map, dependencies, diagnostics, analysis })
    }
}
