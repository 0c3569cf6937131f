// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The build facade: graph build, transform, emit, write.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::emit::{EmitOutput, Emitter};
use crate::error::{BundleError, EmitError, Result};
use crate::fs::{FileSystem, OsFileSystem};
use crate::graph::{GraphBuilder, ModuleState};
use crate::transform::Pipeline;

/// Summary of one written chunk, for reporting.
#[derive(Debug, Clone)]
pub struct ChunkReport {
    /// Chunk name
    pub name: String,
    /// Path the chunk was written to
    pub path: PathBuf,
    /// Chunk size in bytes
    pub bytes: usize,
    /// Number of modules packaged in the chunk
    pub modules: usize,
}

/// Summary of a completed build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Written chunks
    pub chunks: Vec<ChunkReport>,
    /// Number of auxiliary assets written
    pub assets: usize,
    /// Total modules in the graph
    pub modules: usize,
}

/// Drives the whole pipeline for one configuration.
pub struct Bundler {
    config: Config,
    fs: Arc<dyn FileSystem>,
}

impl Bundler {
    /// Create a bundler over the real filesystem.
    pub fn new(config: Config) -> Self {
        Self::with_fs(config, Arc::new(OsFileSystem))
    }

    /// Create a bundler over an injected filesystem capability.
    pub fn with_fs(config: Config, fs: Arc<dyn FileSystem>) -> Self {
        Self { config, fs }
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run resolve, extract, transform, and emit, returning the rendered
    /// output without touching the output directory.
    pub fn bundle(&self) -> Result<EmitOutput> {
        self.config.validate()?;

        info!(root = %self.config.root.display(), "building module graph");
        let mut graph = GraphBuilder::new(self.fs.as_ref(), &self.config).build()?;

        Pipeline::new(&self.config)?.run(&mut graph)?;

        let output = Emitter::new(&graph, &self.config).emit()?;

        // The graph was immutable during emission; record placement now.
        for chunk in &output.layout {
            for &id in &chunk.modules {
                graph.module_mut(id).state = ModuleState::Emitted;
            }
        }
        Ok(output)
    }

    /// Run the pipeline and write chunks and assets to the output
    /// directory. Nothing is written if any stage fails.
    pub fn build(&self) -> Result<BuildReport> {
        let output = self.bundle()?;

        let out_dir = self.config.output_dir.clone();
        if self.config.clean && out_dir.is_dir() {
            debug!(dir = %out_dir.display(), "cleaning output directory");
            std::fs::remove_dir_all(&out_dir).map_err(|source| BundleError::Io {
                path: out_dir.clone(),
                source,
            })?;
        }
        std::fs::create_dir_all(&out_dir).map_err(|source| BundleError::Io {
            path: out_dir.clone(),
            source,
        })?;

        let mut chunks = Vec::with_capacity(output.chunks.len());
        for (chunk, placement) in output.chunks.iter().zip(output.layout.iter()) {
            let path = out_dir.join(&chunk.filename);
            write_file(&path, chunk.code.as_bytes())?;
            info!(chunk = %chunk.name, path = %path.display(), bytes = chunk.code.len(), "wrote chunk");
            chunks.push(ChunkReport {
                name: chunk.name.clone(),
                path,
                bytes: chunk.code.len(),
                modules: placement.modules.len(),
            });
        }

        for asset in &output.assets {
            let path = out_dir.join(&asset.filename);
            write_file(&path, &asset.contents)?;
            debug!(asset = %asset.filename, "wrote asset");
        }

        let modules = output.layout.iter().map(|c| c.modules.len()).sum();
        Ok(BuildReport { chunks, assets: output.assets.len(), modules })
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|source| {
        BundleError::Emit(EmitError::Io { path: path.to_path_buf(), source })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntryConfig;
    use crate::fs::MemoryFileSystem;

    #[test]
    fn test_bundle_in_memory() {
        let fs = MemoryFileSystem::new()
            .add("/proj/src/index.js", "import { x } from './x'; console.log(x);")
            .add("/proj/src/x.js", "export const x = 42;");
        let config = Config {
            root: PathBuf::from("/proj"),
            entry: EntryConfig::Single("./src/index.js".to_string()),
            ..Config::default()
        };

        let output = Bundler::with_fs(config, Arc::new(fs)).bundle().unwrap();
        assert_eq!(output.chunks.len(), 1);
        assert!(output.chunks[0].code.contains("var x = __spack_m1.x;"));
    }

    #[test]
    fn test_bundle_reports_fatal_errors() {
        let fs = MemoryFileSystem::new().add("/proj/src/index.js", "import './nope';");
        let config = Config {
            root: PathBuf::from("/proj"),
            entry: EntryConfig::Single("./src/index.js".to_string()),
            ..Config::default()
        };

        let err = Bundler::with_fs(config, Arc::new(fs)).bundle().unwrap_err();
        assert!(err.to_string().contains("'./nope'"));
    }
}
