// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The module transformer pipeline.
//!
//! Rules are evaluated in configuration order and the first rule whose
//! `test` pattern matches the module path is applied. A rule's transform
//! chain runs back-to-front: the last-declared transform sees the raw
//! content and feeds its output forward, the loader convention webpack
//! configs rely on.
//!
//! JavaScript needs no rule and passes through for emission-time import
//! rewriting. JSON support is built in, matching the bundler behavior
//! the configs in this corpus assume. Any other extension without a
//! matching rule is a hard `NoLoader` error.
//!
//! Transforms of distinct modules have no data dependency on each other,
//! so the pipeline fans out over a rayon thread pool and joins results
//! back in ModuleId order to keep output deterministic.

use rayon::prelude::*;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{BuildError, BundleError, Result, TransformError};
use crate::extract::is_javascript;
use crate::graph::{Module, ModuleGraph, ModuleState};

/// An auxiliary file produced by a transform (e.g. a copied asset).
#[derive(Debug, Clone)]
pub struct EmittedAsset {
    /// Filename relative to the output directory
    pub filename: String,
    /// File contents
    pub contents: Vec<u8>,
}

/// Pipeline output for one module.
#[derive(Debug, Clone)]
pub struct TransformedModule {
    /// JavaScript body to wrap into the bundle
    pub body: String,
    /// Whether the emitter should rewrite ESM syntax in `body`
    pub esm_rewrite: bool,
    /// Auxiliary files to emit next to the chunks
    pub assets: Vec<EmittedAsset>,
}

/// Content flowing through a transform chain.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Current content bytes
    pub content: Vec<u8>,
    /// Whether `content` is JavaScript the bundler can wrap
    pub javascript: bool,
    /// Auxiliary files accumulated along the chain
    pub assets: Vec<EmittedAsset>,
}

/// Metadata handed to each transform.
pub struct TransformContext<'a> {
    /// Path of the module being transformed
    pub path: &'a Path,
    /// Graph-wide build configuration
    pub config: &'a Config,
}

/// A named content transform.
pub trait Transform: Send + Sync {
    /// Name the configuration refers to this transform by.
    fn name(&self) -> &'static str;

    /// Rewrite the content, possibly emitting auxiliary files.
    fn apply(
        &self,
        ctx: &TransformContext<'_>,
        input: TransformOutput,
    ) -> std::result::Result<TransformOutput, TransformError>;
}

struct CompiledRule {
    test: Regex,
    chain: Vec<String>,
}

/// Evaluates transform rules against every module in the graph.
pub struct Pipeline<'a> {
    rules: Vec<CompiledRule>,
    registry: HashMap<&'static str, Box<dyn Transform>>,
    config: &'a Config,
}

impl<'a> Pipeline<'a> {
    /// Compile the configured rules and register the built-in transforms.
    pub fn new(config: &'a Config) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let test = Regex::new(&rule.test).map_err(|e| {
                BundleError::Config(format!("bad rule pattern '{}': {}", rule.test, e))
            })?;
            rules.push(CompiledRule { test, chain: rule.transforms.clone() });
        }

        let mut pipeline = Self { rules, registry: HashMap::new(), config };
        pipeline.register(Box::new(JsonTransform));
        pipeline.register(Box::new(RawTransform));
        pipeline.register(Box::new(AssetTransform));
        Ok(pipeline)
    }

    /// Register a transform under its name.
    pub fn register(&mut self, transform: Box<dyn Transform>) {
        self.registry.insert(transform.name(), transform);
    }

    /// Transform every module in the graph, in parallel, failing the
    /// build on the first (lowest-id) error.
    pub fn run(&self, graph: &mut ModuleGraph) -> Result<()> {
        let modules: Vec<&Module> = graph.modules().collect();
        let results: Vec<std::result::Result<TransformedModule, TransformError>> =
            modules.par_iter().map(|m| self.transform_module(m)).collect();

        let ids: Vec<crate::graph::ModuleId> = modules.iter().map(|m| m.id).collect();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(transformed) => {
                    let module = graph.module_mut(id);
                    module.transformed = Some(transformed);
                    module.state = ModuleState::Transformed;
                }
                Err(e) => {
                    return Err(BundleError::Build(BuildError {
                        kind: e.into(),
                        module: graph.module(id).path.clone(),
                        chain: graph.import_chain(id),
                    }));
                }
            }
        }
        info!(modules = graph.len(), "transform pipeline complete");
        Ok(())
    }

    fn transform_module(
        &self,
        module: &Module,
    ) -> std::result::Result<TransformedModule, TransformError> {
        let path_str = module.path.to_string_lossy();
        let ctx = TransformContext { path: &module.path, config: self.config };

        if let Some(rule) = self.rules.iter().find(|r| r.test.is_match(&path_str)) {
            debug!(module = %path_str, chain = ?rule.chain, "applying rule");
            let mut output = TransformOutput {
                content: module.raw.clone(),
                javascript: is_javascript(&module.path),
                assets: Vec::new(),
            };
            // Loader convention: last-declared transform runs first.
            for name in rule.chain.iter().rev() {
                let transform = self.registry.get(name.as_str()).ok_or_else(|| {
                    TransformError::UnknownTransform { name: name.clone() }
                })?;
                output = transform.apply(&ctx, output)?;
            }
            if !output.javascript {
                let last = rule.chain.first().cloned().unwrap_or_default();
                return Err(TransformError::Failed {
                    name: last,
                    path: module.path.to_path_buf(),
                    reason: "transform chain did not produce JavaScript".to_string(),
                });
            }
            return Ok(TransformedModule {
                body: String::from_utf8_lossy(&output.content).into_owned(),
                esm_rewrite: false,
                assets: output.assets,
            });
        }

        if is_javascript(&module.path) {
            // Untouched JavaScript: the emitter rewrites its imports.
            return Ok(TransformedModule {
                body: String::from_utf8_lossy(&module.raw).into_owned(),
                esm_rewrite: true,
                assets: Vec::new(),
            });
        }

        if module.path.extension().and_then(|e| e.to_str()) == Some("json") {
            // Built-in JSON module support, no rule needed.
            let output = JsonTransform.apply(
                &ctx,
                TransformOutput {
                    content: module.raw.clone(),
                    javascript: false,
                    assets: Vec::new(),
                },
            )?;
            return Ok(TransformedModule {
                body: String::from_utf8_lossy(&output.content).into_owned(),
                esm_rewrite: false,
                assets: output.assets,
            });
        }

        Err(TransformError::NoLoader { path: module.path.to_path_buf() })
    }
}

/// `json`: parse content as JSON and export it as a module.
struct JsonTransform;

impl Transform for JsonTransform {
    fn name(&self) -> &'static str {
        "json"
    }

    fn apply(
        &self,
        ctx: &TransformContext<'_>,
        input: TransformOutput,
    ) -> std::result::Result<TransformOutput, TransformError> {
        let value: serde_json::Value =
            serde_json::from_slice(&input.content).map_err(|e| TransformError::Failed {
                name: "json".to_string(),
                path: ctx.path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let literal = value.to_string();
        let mut body = format!("var data = {};\nexports.default = data;\n", literal);
        if let serde_json::Value::Object(map) = &value {
            for key in map.keys() {
                if is_identifier(key) {
                    body.push_str(&format!("exports.{} = data.{};\n", key, key));
                } else {
                    let quoted = serde_json::Value::String(key.clone()).to_string();
                    body.push_str(&format!("exports[{}] = data[{}];\n", quoted, quoted));
                }
            }
        }

        Ok(TransformOutput { content: body.into_bytes(), javascript: true, assets: input.assets })
    }
}

/// `raw`: export the content verbatim as a string.
struct RawTransform;

impl Transform for RawTransform {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn apply(
        &self,
        _ctx: &TransformContext<'_>,
        input: TransformOutput,
    ) -> std::result::Result<TransformOutput, TransformError> {
        let text = String::from_utf8_lossy(&input.content);
        let literal = serde_json::Value::String(text.into_owned()).to_string();
        let body = format!("exports.default = {};\n", literal);
        Ok(TransformOutput { content: body.into_bytes(), javascript: true, assets: input.assets })
    }
}

/// `asset`: emit the content under a content-hashed filename and export
/// its public path.
struct AssetTransform;

impl Transform for AssetTransform {
    fn name(&self) -> &'static str {
        "asset"
    }

    fn apply(
        &self,
        ctx: &TransformContext<'_>,
        mut input: TransformOutput,
    ) -> std::result::Result<TransformOutput, TransformError> {
        let digest = hex::encode(Sha256::digest(&input.content));
        let hash = &digest[..16];

        let stem = ctx
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "asset".to_string());
        let filename = match ctx.path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}.{}", stem, hash, ext),
            None => format!("{}.{}", stem, hash),
        };

        input.assets.push(EmittedAsset {
            filename: filename.clone(),
            contents: input.content,
        });

        let literal = serde_json::Value::String(filename).to_string();
        let body = format!("exports.default = {};\n", literal);
        Ok(TransformOutput { content: body.into_bytes(), javascript: true, assets: input.assets })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::fs::MemoryFileSystem;
    use crate::graph::{GraphBuilder, ModuleId};
    use std::path::PathBuf;

    fn build_graph(fs: &MemoryFileSystem, config: &Config) -> ModuleGraph {
        GraphBuilder::new(fs, config).build().unwrap()
    }

    fn config_with_rules(rules: Vec<RuleConfig>) -> Config {
        Config {
            root: PathBuf::from("/proj"),
            entry: crate::config::EntryConfig::Single("./src/index.js".to_string()),
            rules,
            ..Config::default()
        }
    }

    #[test]
    fn test_js_passes_through_for_rewriting() {
        let fs = MemoryFileSystem::new().add("/proj/src/index.js", "export const x = 1;");
        let config = config_with_rules(Vec::new());
        let mut graph = build_graph(&fs, &config);

        Pipeline::new(&config).unwrap().run(&mut graph).unwrap();
        let module = graph.module(ModuleId(0));
        let transformed = module.transformed.as_ref().unwrap();
        assert!(transformed.esm_rewrite);
        assert_eq!(transformed.body, "export const x = 1;");
        assert_eq!(module.state, ModuleState::Transformed);
    }

    #[test]
    fn test_builtin_json_module() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import cfg from './cfg.json';")
            .add("/proj/src/cfg.json", r#"{"name": "spack", "non-ident": 2}"#);
        let config = config_with_rules(Vec::new());
        let mut graph = build_graph(&fs, &config);

        Pipeline::new(&config).unwrap().run(&mut graph).unwrap();
        let body = &graph.module(ModuleId(1)).transformed.as_ref().unwrap().body;
        assert!(body.contains("exports.default = data;"));
        assert!(body.contains("exports.name = data.name;"));
        assert!(body.contains(r#"exports["non-ident"] = data["non-ident"];"#));
    }

    #[test]
    fn test_raw_rule_exports_string() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import css from './style.css';")
            .add("/proj/src/style.css", "body { color: red; }");
        let config = config_with_rules(vec![RuleConfig {
            test: r"\.css$".to_string(),
            transforms: vec!["raw".to_string()],
        }]);
        let mut graph = build_graph(&fs, &config);

        Pipeline::new(&config).unwrap().run(&mut graph).unwrap();
        let transformed = graph.module(ModuleId(1)).transformed.as_ref().unwrap();
        assert!(!transformed.esm_rewrite);
        assert!(transformed.body.contains(r#"exports.default = "body { color: red; }";"#));
    }

    #[test]
    fn test_asset_rule_emits_hashed_file() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import logo from './logo.png';")
            .add("/proj/src/logo.png", vec![0x89u8, 0x50, 0x4e, 0x47]);
        let config = config_with_rules(vec![RuleConfig {
            test: r"\.png$".to_string(),
            transforms: vec!["asset".to_string()],
        }]);
        let mut graph = build_graph(&fs, &config);

        Pipeline::new(&config).unwrap().run(&mut graph).unwrap();
        let transformed = graph.module(ModuleId(1)).transformed.as_ref().unwrap();
        assert_eq!(transformed.assets.len(), 1);
        let asset = &transformed.assets[0];
        assert!(asset.filename.starts_with("logo."));
        assert!(asset.filename.ends_with(".png"));
        assert_eq!(asset.contents, vec![0x89u8, 0x50, 0x4e, 0x47]);
        assert!(transformed.body.contains(&asset.filename));

        // Content-hashed name is stable across builds.
        let mut graph2 = build_graph(&fs, &config);
        Pipeline::new(&config).unwrap().run(&mut graph2).unwrap();
        assert_eq!(
            graph2.module(ModuleId(1)).transformed.as_ref().unwrap().assets[0].filename,
            asset.filename
        );
    }

    #[test]
    fn test_no_loader_is_fatal_with_chain() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import './photo.jpeg';")
            .add("/proj/src/photo.jpeg", vec![0xffu8, 0xd8]);
        let config = config_with_rules(Vec::new());
        let mut graph = build_graph(&fs, &config);

        let err = Pipeline::new(&config).unwrap().run(&mut graph).unwrap_err();
        match err {
            BundleError::Build(build) => {
                assert_eq!(build.module, PathBuf::from("/proj/src/photo.jpeg"));
                assert_eq!(build.chain, vec![PathBuf::from("/proj/src/index.js")]);
                assert!(build.to_string().contains("no loader"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_transform_name() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import './style.css';")
            .add("/proj/src/style.css", "");
        let config = config_with_rules(vec![RuleConfig {
            test: r"\.css$".to_string(),
            transforms: vec!["style-loader".to_string()],
        }]);
        let mut graph = build_graph(&fs, &config);

        let err = Pipeline::new(&config).unwrap().run(&mut graph).unwrap_err();
        assert!(err.to_string().contains("unknown transform 'style-loader'"));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import './data.txt';")
            .add("/proj/src/data.txt", "hello");
        let config = config_with_rules(vec![
            RuleConfig { test: r"\.txt$".to_string(), transforms: vec!["raw".to_string()] },
            RuleConfig { test: r"data".to_string(), transforms: vec!["asset".to_string()] },
        ]);
        let mut graph = build_graph(&fs, &config);

        Pipeline::new(&config).unwrap().run(&mut graph).unwrap();
        let transformed = graph.module(ModuleId(1)).transformed.as_ref().unwrap();
        // First rule (raw) applied; no asset emitted.
        assert!(transformed.assets.is_empty());
        assert!(transformed.body.contains(r#"exports.default = "hello";"#));
    }

    #[test]
    fn test_chain_applies_back_to_front() {
        struct Tag(&'static str);
        impl Transform for Tag {
            fn name(&self) -> &'static str {
                self.0
            }
            fn apply(
                &self,
                _ctx: &TransformContext<'_>,
                mut input: TransformOutput,
            ) -> std::result::Result<TransformOutput, TransformError> {
                input.content.extend_from_slice(self.0.as_bytes());
                input.javascript = true;
                Ok(input)
            }
        }

        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import './x.txt';")
            .add("/proj/src/x.txt", "|");
        let config = config_with_rules(vec![RuleConfig {
            test: r"\.txt$".to_string(),
            transforms: vec!["first".to_string(), "second".to_string()],
        }]);
        let mut graph = build_graph(&fs, &config);

        let mut pipeline = Pipeline::new(&config).unwrap();
        pipeline.register(Box::new(Tag("first")));
        pipeline.register(Box::new(Tag("second")));
        pipeline.run(&mut graph).unwrap();

        // "second" is declared last, so it runs first.
        let body = &graph.module(ModuleId(1)).transformed.as_ref().unwrap().body;
        assert_eq!(body, "|secondfirst");
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("name"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("$el"));
        assert!(!is_identifier("non-ident"));
        assert!(!is_identifier("1two"));
        assert!(!is_identifier(""));
    }
}
