// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dependency graph construction.
//!
//! Breadth-first from the entry points: resolve, read, extract, enqueue.
//! ModuleIds are assigned in discovery order from a single counter and
//! never renumbered, and a module is parsed exactly once no matter how
//! many importers reach it, which is also what bounds the work on cyclic
//! graphs: N distinct files, N parses.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{BuildError, BuildErrorKind, BundleError, ExtractError, Result};
use crate::extract::{extract, is_javascript, DependencyKind, ModuleSyntax};
use crate::fs::FileSystem;
use crate::resolver::Resolver;
use crate::transform::TransformedModule;

/// Stable module identifier, assigned in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a module within one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModuleState {
    /// Referenced by a specifier, path not yet fixed
    Pending,
    /// Absolute path assigned
    Resolved,
    /// Dependencies and exports known
    Parsed,
    /// Transformer pipeline output present
    Transformed,
    /// Placed in an output chunk
    Emitted,
}

/// A resolved dependency edge.
#[derive(Debug, Clone)]
pub struct Dependency {
    /// The specifier as written in the importing module
    pub specifier: String,
    /// The module it resolved to
    pub id: ModuleId,
    /// The declaration form it came from
    pub kind: DependencyKind,
}

/// A single source file after resolution.
#[derive(Debug)]
pub struct Module {
    /// Stable identifier
    pub id: ModuleId,
    /// Canonical path; the de-duplication key
    pub path: PathBuf,
    /// Lifecycle state
    pub state: ModuleState,
    /// Raw content as read from the filesystem
    pub raw: Vec<u8>,
    /// Resolved dependency edges, in declaration order
    pub dependencies: Vec<Dependency>,
    /// Dynamic `import()` specifiers, recorded but not resolved
    pub dynamic: Vec<String>,
    /// Exported binding names (including sentinels)
    pub exports: BTreeSet<String>,
    /// Whether the module has a default export
    pub has_default_export: bool,
    /// Recognized syntax, kept for emission-time rewriting
    pub syntax: Option<ModuleSyntax>,
    /// Pipeline output; absent until transformation completes
    pub transformed: Option<TransformedModule>,
    /// First importer, for error chains; `None` for entry points
    pub importer: Option<ModuleId>,
}

impl Module {
    fn new(id: ModuleId, path: PathBuf, importer: Option<ModuleId>) -> Self {
        Self {
            id,
            path,
            state: ModuleState::Resolved,
            raw: Vec::new(),
            dependencies: Vec::new(),
            dynamic: Vec::new(),
            exports: BTreeSet::new(),
            has_default_export: false,
            syntax: None,
            transformed: None,
            importer,
        }
    }

    /// First dependency edge declared with this specifier.
    pub fn dependency_id(&self, specifier: &str) -> Option<ModuleId> {
        self.dependencies
            .iter()
            .find(|d| d.specifier == specifier)
            .map(|d| d.id)
    }
}

/// The built module graph: ModuleId-to-Module map plus entry points.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    by_path: HashMap<PathBuf, ModuleId>,
    entries: Vec<(String, ModuleId)>,
}

impl ModuleGraph {
    /// Number of modules in the graph.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the graph holds no modules.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Look up a module by id.
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    /// Look up a module mutably by id.
    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0 as usize]
    }

    /// The id a path resolved to, if it is in the graph.
    pub fn id_for_path(&self, path: &Path) -> Option<ModuleId> {
        self.by_path.get(path).copied()
    }

    /// All modules in discovery order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Entry points as `(chunk name, module id)` in discovery order.
    pub fn entries(&self) -> &[(String, ModuleId)] {
        &self.entries
    }

    /// The chain of importers from `id`'s first importer back to an
    /// entry point, for error reporting.
    pub fn import_chain(&self, id: ModuleId) -> Vec<PathBuf> {
        let mut chain = Vec::new();
        let mut current = self.module(id).importer;
        while let Some(importer) = current {
            chain.push(self.module(importer).path.clone());
            current = self.module(importer).importer;
        }
        chain
    }

    fn ensure(&mut self, path: PathBuf, importer: Option<ModuleId>) -> ModuleId {
        if let Some(&id) = self.by_path.get(&path) {
            return id;
        }
        let id = ModuleId(self.modules.len() as u32);
        debug!(id = %id, module = %path.display(), "discovered module");
        self.modules.push(Module::new(id, path.clone(), importer));
        self.by_path.insert(path, id);
        id
    }
}

/// Builds a [`ModuleGraph`] from the configured entry points.
pub struct GraphBuilder<'a> {
    fs: &'a dyn FileSystem,
    resolver: Resolver<'a>,
    config: &'a Config,
}

impl<'a> GraphBuilder<'a> {
    /// Create a builder over a filesystem capability and build config.
    pub fn new(fs: &'a dyn FileSystem, config: &'a Config) -> Self {
        Self {
            fs,
            resolver: Resolver::new(fs, config),
            config,
        }
    }

    /// Build the graph. Any resolution or extraction failure on a module
    /// reachable from an entry point aborts the build.
    pub fn build(&self) -> Result<ModuleGraph> {
        let mut graph = ModuleGraph::default();
        let mut queue: VecDeque<ModuleId> = VecDeque::new();

        for (name, specifier) in self.config.entries() {
            let path = self
                .resolver
                .resolve_entry(&specifier, &self.config.root)
                .map_err(|e| {
                    BundleError::Build(BuildError {
                        kind: e.into(),
                        module: self.config.root.clone(),
                        chain: Vec::new(),
                    })
                })?;
            let id = graph.ensure(path, None);
            graph.entries.push((name, id));
            queue.push_back(id);
        }

        while let Some(id) = queue.pop_front() {
            if graph.module(id).state >= ModuleState::Parsed {
                // Already parsed via another importer: cycles and
                // diamonds land here.
                continue;
            }
            let path = graph.module(id).path.clone();
            debug!(id = %id, module = %path.display(), "parsing module");

            let raw = self.fs.read(&path).map_err(|source| {
                self.fatal(&graph, id, BuildErrorKind::Read { path: path.clone(), source })
            })?;

            if is_javascript(&path) {
                let text = std::str::from_utf8(&raw).map_err(|e| {
                    self.fatal(
                        &graph,
                        id,
                        ExtractError::Encoding { offset: e.valid_up_to() }.into(),
                    )
                })?;
                let syntax =
                    extract(text).map_err(|e| self.fatal(&graph, id, e.into()))?;
                let summary = syntax.summary();

                for request in summary.dependencies {
                    if request.kind == DependencyKind::Dynamic {
                        warn!(
                            module = %path.display(),
                            specifier = %request.specifier,
                            "dynamic import is not bundled; left for the host to load"
                        );
                        graph.module_mut(id).dynamic.push(request.specifier);
                        continue;
                    }
                    let target = self
                        .resolver
                        .resolve(&request.specifier, &path)
                        .map_err(|e| self.fatal(&graph, id, e.into()))?;
                    let dep_id = graph.ensure(target, Some(id));
                    graph.module_mut(id).dependencies.push(Dependency {
                        specifier: request.specifier,
                        id: dep_id,
                        kind: request.kind,
                    });
                    queue.push_back(dep_id);
                }

                let module = graph.module_mut(id);
                module.exports = summary.exports;
                module.has_default_export = summary.has_default_export;
                module.syntax = Some(syntax);
            }

            let module = graph.module_mut(id);
            module.raw = raw;
            module.state = ModuleState::Parsed;
        }

        info!(modules = graph.len(), entries = graph.entries.len(), "graph built");
        Ok(graph)
    }

    fn fatal(&self, graph: &ModuleGraph, id: ModuleId, kind: BuildErrorKind) -> BundleError {
        BundleError::Build(BuildError {
            kind,
            module: graph.module(id).path.clone(),
            chain: graph.import_chain(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use std::io;
    use std::sync::Mutex;

    fn config_at(root: &str, entry: &str) -> Config {
        Config {
            root: PathBuf::from(root),
            entry: crate::config::EntryConfig::Single(entry.to_string()),
            ..Config::default()
        }
    }

    /// Wraps a filesystem and counts reads per path.
    struct CountingFs {
        inner: MemoryFileSystem,
        reads: Mutex<HashMap<PathBuf, usize>>,
    }

    impl CountingFs {
        fn new(inner: MemoryFileSystem) -> Self {
            Self { inner, reads: Mutex::new(HashMap::new()) }
        }

        fn reads_of(&self, path: &str) -> usize {
            *self
                .reads
                .lock()
                .unwrap()
                .get(&PathBuf::from(path))
                .unwrap_or(&0)
        }
    }

    impl FileSystem for CountingFs {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            *self
                .reads
                .lock()
                .unwrap()
                .entry(path.to_path_buf())
                .or_insert(0) += 1;
            self.inner.read(path)
        }

        fn is_file(&self, path: &Path) -> bool {
            self.inner.is_file(path)
        }

        fn is_dir(&self, path: &Path) -> bool {
            self.inner.is_dir(path)
        }
    }

    #[test]
    fn test_ids_follow_discovery_order() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import './a'; import './b';")
            .add("/proj/src/a.js", "")
            .add("/proj/src/b.js", "");
        let config = config_at("/proj", "./src/index.js");

        let graph = GraphBuilder::new(&fs, &config).build().unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.module(ModuleId(0)).path, PathBuf::from("/proj/src/index.js"));
        assert_eq!(graph.module(ModuleId(1)).path, PathBuf::from("/proj/src/a.js"));
        assert_eq!(graph.module(ModuleId(2)).path, PathBuf::from("/proj/src/b.js"));
        assert_eq!(graph.entries(), &[("main".to_string(), ModuleId(0))]);
    }

    #[test]
    fn test_diamond_parsed_once() {
        let fs = CountingFs::new(
            MemoryFileSystem::new()
                .add("/proj/src/index.js", "import './b'; import './c';")
                .add("/proj/src/b.js", "import './d';")
                .add("/proj/src/c.js", "import './d';")
                .add("/proj/src/d.js", "export const shared = 1;"),
        );
        let config = config_at("/proj", "./src/index.js");

        let graph = GraphBuilder::new(&fs, &config).build().unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(fs.reads_of("/proj/src/d.js"), 1);

        // Both importers point at the same module.
        let b = graph.module(ModuleId(1));
        let c = graph.module(ModuleId(2));
        assert_eq!(b.dependency_id("./d"), c.dependency_id("./d"));
    }

    #[test]
    fn test_cycle_terminates() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/a.js", "import { b } from './b'; export const a = 1;")
            .add("/proj/src/b.js", "import { a } from './a'; export const b = 2;");
        let config = config_at("/proj", "./src/a.js");

        let graph = GraphBuilder::new(&fs, &config).build().unwrap();
        assert_eq!(graph.len(), 2);

        let a = graph.module(ModuleId(0));
        let b = graph.module(ModuleId(1));
        assert_eq!(a.dependency_id("./b"), Some(ModuleId(1)));
        assert_eq!(b.dependency_id("./a"), Some(ModuleId(0)));
        assert_eq!(a.state, ModuleState::Parsed);
        assert_eq!(b.state, ModuleState::Parsed);
    }

    #[test]
    fn test_unresolvable_specifier_is_fatal_with_chain() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import './lib';")
            .add("/proj/src/lib.js", "import './gone';");
        let config = config_at("/proj", "./src/index.js");

        let err = GraphBuilder::new(&fs, &config).build().unwrap_err();
        match err {
            BundleError::Build(build) => {
                assert_eq!(build.module, PathBuf::from("/proj/src/lib.js"));
                assert_eq!(build.chain, vec![PathBuf::from("/proj/src/index.js")]);
                assert!(build.to_string().contains("'./gone'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_syntax_error_in_dependency_is_fatal() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import './bad';")
            .add("/proj/src/bad.js", "/* unterminated");
        let config = config_at("/proj", "./src/index.js");

        let err = GraphBuilder::new(&fs, &config).build().unwrap_err();
        match err {
            BundleError::Build(build) => {
                assert!(matches!(build.kind, BuildErrorKind::Extract(_)));
                assert_eq!(build.module, PathBuf::from("/proj/src/bad.js"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_entry_fails_before_graphing() {
        let fs = MemoryFileSystem::new().add("/proj/src/other.js", "");
        let config = config_at("/proj", "./src/index.js");

        assert!(GraphBuilder::new(&fs, &config).build().is_err());
    }

    #[test]
    fn test_non_js_module_has_no_dependencies() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import './style.css';")
            .add("/proj/src/style.css", "body { color: import 'not-a-dep'; }");
        let config = config_at("/proj", "./src/index.js");

        let graph = GraphBuilder::new(&fs, &config).build().unwrap();
        let css = graph.module(ModuleId(1));
        assert!(css.dependencies.is_empty());
        assert!(css.syntax.is_none());
        assert_eq!(css.state, ModuleState::Parsed);
    }

    #[test]
    fn test_dynamic_import_recorded_not_resolved() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "const p = import('./lazy.js');");
        let config = config_at("/proj", "./src/index.js");

        // `./lazy.js` does not even exist; the build must still succeed.
        let graph = GraphBuilder::new(&fs, &config).build().unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.module(ModuleId(0)).dynamic, vec!["./lazy.js"]);
    }

    #[test]
    fn test_named_entries_in_name_order() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/app.js", "")
            .add("/proj/src/admin.js", "");
        let mut entries = std::collections::BTreeMap::new();
        entries.insert("app".to_string(), "./src/app.js".to_string());
        entries.insert("admin".to_string(), "./src/admin.js".to_string());
        let config = Config {
            root: PathBuf::from("/proj"),
            entry: crate::config::EntryConfig::Named(entries),
            ..Config::default()
        };

        let graph = GraphBuilder::new(&fs, &config).build().unwrap();
        let names: Vec<&str> = graph.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["admin", "app"]);
        assert_eq!(graph.module(ModuleId(0)).path, PathBuf::from("/proj/src/admin.js"));
    }
}
