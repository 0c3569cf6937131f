// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spack-core
//!
//! The core of spack, a minimal static module bundler: dependency-graph
//! construction and bundle emission for ECMAScript module trees.
//!
//! The pipeline runs leaf-to-root during resolution and root-to-leaf
//! during emission:
//!
//! 1. [`resolver`] turns specifier strings into canonical file paths,
//!    with extension inference and `node_modules`-style package walks.
//! 2. [`extract`] pulls the static import/export declarations out of
//!    each module's source, in declaration order.
//! 3. [`graph`] builds the de-duplicated module graph breadth-first
//!    from the entry points, tolerating cycles.
//! 4. [`transform`] applies configured loader chains to non-JavaScript
//!    modules (JSON support is built in).
//! 5. [`emit`] partitions the graph into chunks and wraps them in a
//!    module-registry runtime that resolves references by stable
//!    ModuleId, never by path.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spack_core::{Bundler, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Path::new("spack.config.json"))?;
//!     let report = Bundler::new(config).build()?;
//!     println!("wrote {} chunks", report.chunks.len());
//!     Ok(())
//! }
//! ```
//!
//! Failures are total: a resolution, parse, or transform error anywhere
//! reachable from an entry point aborts the build with the full import
//! chain, and no output files are written.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bundler;
pub mod config;
pub mod emit;
pub mod error;
pub mod extract;
pub mod fs;
pub mod graph;
pub mod resolver;
pub mod transform;

// Re-exports
pub use bundler::{BuildReport, Bundler, ChunkReport};
pub use config::{Config, EntryConfig, RuleConfig};
pub use emit::{Chunk, ChunkFile, EmitOutput, Emitter};
pub use error::{
    BuildError, BuildErrorKind, BundleError, EmitError, ExtractError, ResolveError, Result,
    TransformError,
};
pub use extract::{DependencyKind, ModuleSummary};
pub use fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use graph::{GraphBuilder, Module, ModuleGraph, ModuleId, ModuleState};
pub use transform::{EmittedAsset, Pipeline, Transform, TransformedModule};

/// Version of the spack core.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
