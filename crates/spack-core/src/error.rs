// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the bundler

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for bundler operations
pub type Result<T> = std::result::Result<T, BundleError>;

/// Errors produced while resolving a specifier to a file path
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No candidate file matched the specifier
    #[error("cannot find module '{specifier}' (imported from {from})")]
    NotFound {
        /// The specifier as written in the source
        specifier: String,
        /// The file (or config root) the specifier was written in
        from: PathBuf,
    },

    /// A configuration listed the same extension twice and it matched
    #[error("ambiguous resolution for '{specifier}': extension '{extension}' is configured more than once")]
    Ambiguous {
        /// The specifier as written in the source
        specifier: String,
        /// The duplicated extension entry
        extension: String,
    },
}

/// Errors produced while extracting imports/exports from source text
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Malformed source text
    #[error("syntax error at line {line}: {message}")]
    Syntax {
        /// 1-based line number of the offending construct
        line: usize,
        /// What was wrong
        message: String,
    },

    /// Source bytes were not valid UTF-8
    #[error("source is not valid UTF-8 (at byte {offset})")]
    Encoding {
        /// Byte offset of the first invalid sequence
        offset: usize,
    },
}

/// Errors produced by the transformer pipeline
#[derive(Debug, Error)]
pub enum TransformError {
    /// A non-JavaScript module matched no rule
    #[error("no loader configured for {path}")]
    NoLoader {
        /// Path of the module that nothing could interpret
        path: PathBuf,
    },

    /// A rule chain referenced a transform name that is not registered
    #[error("unknown transform '{name}'")]
    UnknownTransform {
        /// The unrecognized transform name
        name: String,
    },

    /// A transform ran and failed
    #[error("transform '{name}' failed on {path}: {reason}")]
    Failed {
        /// Name of the failing transform
        name: String,
        /// Module it was applied to
        path: PathBuf,
        /// Why it failed
        reason: String,
    },
}

/// Errors produced while emitting chunks and assets
#[derive(Debug, Error)]
pub enum EmitError {
    /// A module reached emission without a transformed body
    #[error("module {path} has no transformed body")]
    MissingBody {
        /// The untransformed module
        path: PathBuf,
    },

    /// Writing an output file failed
    #[error("failed to write {path}: {source}")]
    Io {
        /// Output path that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// The failure that aborted a graph build, without its import chain
#[derive(Debug, Error)]
pub enum BuildErrorKind {
    /// Specifier resolution failed
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Import/export extraction failed
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// The transformer pipeline failed
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Reading a module's content failed
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// A fatal build failure, locating the error within the import graph.
///
/// `module` is the module that was being processed when the failure
/// occurred; `chain` walks from its first importer back to the entry
/// point that reached it.
#[derive(Debug)]
pub struct BuildError {
    /// What went wrong
    pub kind: BuildErrorKind,
    /// The module being processed when the failure occurred
    pub module: PathBuf,
    /// Importers of `module`, nearest first, ending at an entry point
    pub chain: Vec<PathBuf>,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build failed in {}: {}", self.module.display(), self.kind)?;
        for (i, importer) in self.chain.iter().enumerate() {
            write!(f, "\n    imported by {}", importer.display())?;
            if i + 1 == self.chain.len() {
                write!(f, " (entry)")?;
            }
        }
        if self.chain.is_empty() {
            write!(f, "\n    (entry point)")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Top-level error type for a bundler invocation
#[derive(Debug, Error)]
pub enum BundleError {
    /// The graph build aborted
    #[error("{0}")]
    Build(#[from] BuildError),

    /// Chunk emission failed
    #[error("{0}")]
    Emit(#[from] EmitError),

    /// The configuration was unusable
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An I/O error outside the graph build (config load, output cleanup)
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved in the failing operation
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
