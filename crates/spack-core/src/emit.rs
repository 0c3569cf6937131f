// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bundle emission.
//!
//! Partitions the graph into chunks (one per entry point; modules
//! reachable from two or more entries are hoisted into a single `shared`
//! chunk that entry chunks require to be loaded first), rewrites each
//! module's ESM syntax into registry calls keyed by ModuleId, and wraps
//! every chunk in a small runtime.
//!
//! The runtime keeps the module registry and the execution-record cache
//! on `globalThis`, scoped to the build output rather than to one chunk
//! file, so a module executes at most once no matter how many chunks or
//! importers reference it. A require of a module that is mid-execution
//! (a cycle) returns its partially-populated exports object instead of
//! re-entering it.
//!
//! The graph is an immutable value here; chunk membership lives in the
//! returned layout, not in the modules.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::EmitError;
use crate::extract::{ImportClause, SyntaxItemKind};
use crate::graph::{Module, ModuleGraph, ModuleId};
use crate::transform::EmittedAsset;

/// Name of the chunk holding modules shared between entry points.
pub const SHARED_CHUNK: &str = "shared";

/// One output unit's membership and load requirements.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk name (`shared` or the entry name)
    pub name: String,
    /// Output filename, from the configured pattern
    pub filename: String,
    /// Entry module executed when the chunk loads; `None` for `shared`
    pub entry: Option<ModuleId>,
    /// Member modules, dependencies before dependents
    pub modules: Vec<ModuleId>,
    /// Chunk names that must be loaded before this one
    pub prerequisites: Vec<String>,
}

/// A rendered chunk ready to write.
#[derive(Debug, Clone)]
pub struct ChunkFile {
    /// Chunk name
    pub name: String,
    /// Output filename
    pub filename: String,
    /// Complete chunk source
    pub code: String,
}

/// Everything one build emits.
#[derive(Debug, Clone)]
pub struct EmitOutput {
    /// Rendered chunks, `shared` (if present) first
    pub chunks: Vec<ChunkFile>,
    /// Auxiliary assets collected from the transform pipeline
    pub assets: Vec<EmittedAsset>,
    /// Chunk membership, for reporting and state updates
    pub layout: Vec<Chunk>,
}

/// Renders a built, transformed graph into chunks.
pub struct Emitter<'a> {
    graph: &'a ModuleGraph,
    config: &'a Config,
}

impl<'a> Emitter<'a> {
    /// Create an emitter over a finished graph.
    pub fn new(graph: &'a ModuleGraph, config: &'a Config) -> Self {
        Self { graph, config }
    }

    /// Partition, rewrite, and render every chunk.
    pub fn emit(&self) -> Result<EmitOutput, EmitError> {
        let layout = self.partition();

        let mut chunks = Vec::with_capacity(layout.len());
        for chunk in &layout {
            debug!(chunk = %chunk.name, modules = chunk.modules.len(), "rendering chunk");
            chunks.push(ChunkFile {
                name: chunk.name.clone(),
                filename: chunk.filename.clone(),
                code: self.render_chunk(chunk)?,
            });
        }

        let mut assets = Vec::new();
        for module in self.graph.modules() {
            if let Some(transformed) = &module.transformed {
                assets.extend(transformed.assets.iter().cloned());
            }
        }

        info!(chunks = chunks.len(), assets = assets.len(), "emission complete");
        Ok(EmitOutput { chunks, assets, layout })
    }

    /// Assign every module to a chunk.
    ///
    /// Policy: one chunk per entry; a module reachable from two or more
    /// entries goes to the single `shared` chunk, which all entry chunks
    /// list as a prerequisite. Assignment and ordering derive only from
    /// entry order and declaration order, so repeated builds of the same
    /// graph are byte-stable.
    fn partition(&self) -> Vec<Chunk> {
        let entries = self.graph.entries();

        // How many entries reach each module.
        let mut reach_count: BTreeMap<ModuleId, usize> = BTreeMap::new();
        for (_, entry_id) in entries {
            for id in self.reachable_from(*entry_id) {
                *reach_count.entry(id).or_insert(0) += 1;
            }
        }

        let shared: HashSet<ModuleId> = reach_count
            .iter()
            .filter(|(_, count)| **count >= 2)
            .map(|(id, _)| *id)
            .collect();

        let mut layout = Vec::new();

        if !shared.is_empty() {
            // Collect shared members in first-visit post-order across
            // entries, so dependencies still precede dependents.
            let mut members = Vec::new();
            let mut seen = HashSet::new();
            for (_, entry_id) in entries {
                self.post_order(*entry_id, &mut seen, &mut |id| {
                    if shared.contains(&id) {
                        members.push(id);
                    }
                });
            }
            layout.push(Chunk {
                name: SHARED_CHUNK.to_string(),
                filename: self.config.chunk_filename(SHARED_CHUNK),
                entry: None,
                modules: members,
                prerequisites: Vec::new(),
            });
        }

        for (name, entry_id) in entries.iter() {
            let mut members = Vec::new();
            let mut seen = HashSet::new();
            self.post_order(*entry_id, &mut seen, &mut |id| {
                if !shared.contains(&id) {
                    members.push(id);
                }
            });
            layout.push(Chunk {
                name: name.clone(),
                filename: self.config.chunk_filename(name),
                entry: Some(*entry_id),
                modules: members,
                prerequisites: if shared.is_empty() {
                    Vec::new()
                } else {
                    vec![SHARED_CHUNK.to_string()]
                },
            });
        }

        layout
    }

    fn reachable_from(&self, entry: ModuleId) -> Vec<ModuleId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        self.post_order(entry, &mut seen, &mut |id| order.push(id));
        order
    }

    /// Depth-first post-order over dependency edges in declaration
    /// order; cycle edges are skipped at the point of revisit.
    ///
    /// Explicit work stack, so import-chain depth is bounded by the
    /// heap rather than the call stack.
    fn post_order(
        &self,
        from: ModuleId,
        seen: &mut HashSet<ModuleId>,
        visit: &mut impl FnMut(ModuleId),
    ) {
        if !seen.insert(from) {
            return;
        }
        // (module, index of the next dependency edge to descend into)
        let mut stack: Vec<(ModuleId, usize)> = vec![(from, 0)];
        while let Some(frame) = stack.last_mut() {
            let (id, next) = *frame;
            let deps = &self.graph.module(id).dependencies;
            if let Some(dep) = deps.get(next) {
                frame.1 += 1;
                let dep_id = dep.id;
                if seen.insert(dep_id) {
                    stack.push((dep_id, 0));
                }
            } else {
                stack.pop();
                visit(id);
            }
        }
    }

    fn render_chunk(&self, chunk: &Chunk) -> Result<String, EmitError> {
        let mut modules_literal = String::new();
        for &id in &chunk.modules {
            let module = self.graph.module(id);
            let code = self.module_code(module)?;
            // Root-relative label keeps output independent of where the
            // project happens to live on disk.
            let label = module
                .path
                .strip_prefix(&self.config.root)
                .unwrap_or(&module.path);
            modules_literal.push_str(&format!(
                "\n/* {} */\n{}: function (module, exports, __spack_require__) {{\n{}\n}},\n",
                label.display(),
                id,
                code
            ));
        }

        let mut out = String::new();
        out.push_str(&format!("/*! spack v{} | chunk: {} */\n", crate::VERSION, chunk.name));
        out.push_str("(function (modules) {\n");
        out.push_str("    var root = typeof globalThis !== \"undefined\" ? globalThis : this;\n");
        out.push_str("    var registry = (root.__spack_modules__ = root.__spack_modules__ || {});\n");
        out.push_str("    var cache = (root.__spack_cache__ = root.__spack_cache__ || {});\n");
        out.push_str("    var loaded = (root.__spack_chunks__ = root.__spack_chunks__ || {});\n");
        for prerequisite in &chunk.prerequisites {
            out.push_str(&format!(
                "    if (!loaded[{0}]) {{\n        throw new Error(\"spack: chunk '{1}' requires chunk \" + {0} + \" to be loaded first\");\n    }}\n",
                js_string(prerequisite),
                chunk.name
            ));
        }
        out.push_str("    for (var id in modules) {\n        registry[id] = modules[id];\n    }\n");
        out.push_str(&format!("    loaded[{}] = true;\n", js_string(&chunk.name)));
        out.push_str(
            "    function __spack_require__(id) {\n\
             \x20       var record = cache[id];\n\
             \x20       if (record) {\n\
             \x20           return record.exports;\n\
             \x20       }\n\
             \x20       record = cache[id] = { id: id, loaded: false, exports: {} };\n\
             \x20       var factory = registry[id];\n\
             \x20       if (!factory) {\n\
             \x20           throw new Error(\"spack: unknown module id \" + id);\n\
             \x20       }\n\
             \x20       factory.call(record.exports, record, record.exports, __spack_require__);\n\
             \x20       record.loaded = true;\n\
             \x20       return record.exports;\n\
             \x20   }\n",
        );
        match chunk.entry {
            Some(entry) => out.push_str(&format!("    return __spack_require__({});\n", entry)),
            None => out.push_str("    // library chunk: registers modules, executes nothing\n"),
        }
        out.push_str("})({\n");
        out.push_str(&modules_literal);
        out.push_str("});\n");
        Ok(out)
    }

    /// The wrapped body for one module: the transformed output, with ESM
    /// syntax rewritten into registry calls when it passed through the
    /// pipeline untouched.
    fn module_code(&self, module: &Module) -> Result<String, EmitError> {
        let transformed = module.transformed.as_ref().ok_or_else(|| EmitError::MissingBody {
            path: module.path.clone(),
        })?;
        if transformed.esm_rewrite {
            if let Some(syntax) = &module.syntax {
                return Ok(rewrite_esm(&transformed.body, module, &syntax.items));
            }
        }
        Ok(transformed.body.clone())
    }
}

/// Rewrite recognized ESM constructs in `source` into `__spack_require__`
/// calls and `exports` assignments, by span replacement at the original
/// statement positions (which preserves side-effect execution order).
fn rewrite_esm(
    source: &str,
    module: &Module,
    items: &[crate::extract::SyntaxItem],
) -> String {
    let mut replacements: Vec<(std::ops::Range<usize>, String)> = Vec::new();
    let mut tail: Vec<String> = Vec::new();

    for item in items {
        match &item.kind {
            SyntaxItemKind::Import { specifier, clause } => {
                let Some(dep) = module.dependency_id(specifier) else { continue };
                replacements.push((item.span.clone(), import_bindings(dep, clause)));
            }
            SyntaxItemKind::SideEffectImport { specifier } => {
                let Some(dep) = module.dependency_id(specifier) else { continue };
                replacements.push((item.span.clone(), format!("__spack_require__({});", dep)));
            }
            SyntaxItemKind::DynamicImport { .. } => {
                // Deferred: left in place for the host environment.
            }
            SyntaxItemKind::ExportAllFrom { specifier } => {
                let Some(dep) = module.dependency_id(specifier) else { continue };
                let temp = temp_name(dep);
                replacements.push((
                    item.span.clone(),
                    format!(
                        "var {temp} = __spack_require__({dep}); Object.keys({temp}).forEach(function (key) {{ if (key !== \"default\") exports[key] = {temp}[key]; }});"
                    ),
                ));
            }
            SyntaxItemKind::ExportNamespaceFrom { specifier, name } => {
                let Some(dep) = module.dependency_id(specifier) else { continue };
                replacements.push((
                    item.span.clone(),
                    format!("exports.{} = __spack_require__({});", name, dep),
                ));
            }
            SyntaxItemKind::ExportNamedFrom { specifier, names } => {
                let Some(dep) = module.dependency_id(specifier) else { continue };
                let temp = temp_name(dep);
                let mut text = format!("var {temp} = __spack_require__({dep});");
                for (source_name, exported) in names {
                    text.push_str(&format!(" exports.{} = {}.{};", exported, temp, source_name));
                }
                replacements.push((item.span.clone(), text));
            }
            SyntaxItemKind::ExportDefault => {
                // Span covers only the `export default` keywords.
                replacements.push((item.span.clone(), "exports.default =".to_string()));
            }
            SyntaxItemKind::ExportDeclaration { name } => {
                let text = &source[item.span.clone()];
                let stripped = text
                    .strip_prefix("export")
                    .unwrap_or(text)
                    .trim_start()
                    .to_string();
                replacements.push((item.span.clone(), stripped));
                tail.push(format!("exports.{} = {};", name, name));
            }
            SyntaxItemKind::ExportNamed { names } => {
                replacements.push((item.span.clone(), String::new()));
                for (local, exported) in names {
                    tail.push(format!("exports.{} = {};", exported, local));
                }
            }
        }
    }

    let mut out = source.to_string();
    replacements.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    for (span, text) in replacements {
        out.replace_range(span, &text);
    }
    if !tail.is_empty() {
        out.push('\n');
        out.push_str(&tail.join("\n"));
        out.push('\n');
    }
    out
}

fn import_bindings(dep: ModuleId, clause: &ImportClause) -> String {
    let temp = temp_name(dep);
    let mut text = format!("var {} = __spack_require__({});", temp, dep);
    if let Some(default) = &clause.default {
        text.push_str(&format!(" var {} = {}.default;", default, temp));
    }
    if let Some(namespace) = &clause.namespace {
        text.push_str(&format!(" var {} = {};", namespace, temp));
    }
    for (imported, local) in &clause.named {
        text.push_str(&format!(" var {} = {}.{};", local, temp, imported));
    }
    text
}

fn temp_name(dep: ModuleId) -> String {
    format!("__spack_m{}", dep)
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
