// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Specifier-to-path resolution.
//!
//! Relative specifiers resolve against the importer's directory. Bare
//! specifiers walk ancestor directories looking for a configured module
//! directory (`node_modules` by default) containing the named package,
//! whose manifest `main` field (or an index file) names the entry.
//!
//! Extension inference is config-order driven: for an extensionless
//! specifier the configured extensions are probed in order, and a file
//! match always beats directory-with-index resolution at the same name.
//! This precedence is the documented, deterministic answer to candidates
//! that would otherwise tie; `ResolveError::Ambiguous` is reserved for a
//! configuration that lists the same extension twice and sees it match.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::Config;
use crate::error::ResolveError;
use crate::fs::{normalize, FileSystem};

/// Minimal package manifest structure for resolution
#[derive(Debug, Deserialize)]
struct PackageManifest {
    main: Option<String>,
}

/// Resolves specifiers to canonical absolute paths.
///
/// Pure over the injected [`FileSystem`]; holds no mutable state.
pub struct Resolver<'a> {
    fs: &'a dyn FileSystem,
    extensions: Vec<String>,
    module_dirs: Vec<String>,
}

impl<'a> Resolver<'a> {
    /// Create a resolver over a filesystem capability and build config.
    pub fn new(fs: &'a dyn FileSystem, config: &Config) -> Self {
        Self {
            fs,
            extensions: config.resolve_extensions.clone(),
            module_dirs: config.module_directories.clone(),
        }
    }

    /// Resolve a specifier written in the file `from`.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let base = from.parent().unwrap_or(Path::new("."));
        self.resolve_from(specifier, base, from)
    }

    /// Resolve an entry specifier against the configured root directory.
    pub fn resolve_entry(&self, specifier: &str, root: &Path) -> Result<PathBuf, ResolveError> {
        self.resolve_from(specifier, root, root)
    }

    fn resolve_from(
        &self,
        specifier: &str,
        base: &Path,
        from: &Path,
    ) -> Result<PathBuf, ResolveError> {
        if specifier.starts_with("./") || specifier.starts_with("../") {
            self.resolve_path(&base.join(specifier), specifier, from)
        } else if Path::new(specifier).is_absolute() {
            self.resolve_path(Path::new(specifier), specifier, from)
        } else {
            self.resolve_package(specifier, base, from)
        }
    }

    /// Resolve a concrete path candidate: exact file, then extension
    /// probing in config order, then directory-with-index.
    fn resolve_path(
        &self,
        candidate: &Path,
        specifier: &str,
        from: &Path,
    ) -> Result<PathBuf, ResolveError> {
        let candidate = normalize(candidate);

        if self.fs.is_file(&candidate) {
            return Ok(candidate);
        }

        let mut hit: Option<PathBuf> = None;
        for ext in &self.extensions {
            let probed = append_extension(&candidate, ext);
            if self.fs.is_file(&probed) {
                match &hit {
                    None => hit = Some(probed),
                    // The same extension listed twice matches the same
                    // file at two equal-precedence positions.
                    Some(existing) if *existing == probed => {
                        return Err(ResolveError::Ambiguous {
                            specifier: specifier.to_string(),
                            extension: ext.clone(),
                        });
                    }
                    // A later, lower-precedence extension; first wins.
                    Some(_) => {}
                }
            }
        }
        if let Some(found) = hit {
            return Ok(found);
        }

        if self.fs.is_dir(&candidate) {
            return self.resolve_directory(&candidate, specifier, from);
        }

        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
        })
    }

    /// Resolve a directory: manifest `main` first, then index files.
    fn resolve_directory(
        &self,
        dir: &Path,
        specifier: &str,
        from: &Path,
    ) -> Result<PathBuf, ResolveError> {
        let manifest_path = dir.join("package.json");
        if self.fs.is_file(&manifest_path) {
            match self.read_manifest(&manifest_path) {
                Some(main) if !main.is_empty() => {
                    let main_candidate = dir.join(&main);
                    if let Ok(resolved) = self.resolve_path(&main_candidate, specifier, from) {
                        return Ok(resolved);
                    }
                    warn!(
                        manifest = %manifest_path.display(),
                        main = %main,
                        "manifest 'main' does not resolve, falling back to index"
                    );
                }
                _ => {}
            }
        }

        for ext in &self.extensions {
            let index = dir.join(format!("index{}", ext));
            if self.fs.is_file(&index) {
                return Ok(normalize(&index));
            }
        }

        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
        })
    }

    fn read_manifest(&self, path: &Path) -> Option<String> {
        let content = match self.fs.read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(manifest = %path.display(), error = %e, "failed to read manifest");
                return None;
            }
        };
        match serde_json::from_str::<PackageManifest>(&content) {
            Ok(manifest) => manifest.main,
            Err(e) => {
                warn!(manifest = %path.display(), error = %e, "malformed manifest");
                None
            }
        }
    }

    /// Resolve a bare specifier by walking ancestor module directories.
    fn resolve_package(
        &self,
        specifier: &str,
        base: &Path,
        from: &Path,
    ) -> Result<PathBuf, ResolveError> {
        let (name, subpath) = parse_package_specifier(specifier);

        let mut current = Some(base);
        while let Some(dir) = current {
            for module_dir in &self.module_dirs {
                let package_root = dir.join(module_dir).join(name);
                if self.fs.is_dir(&package_root) {
                    return match subpath {
                        Some(sub) => self.resolve_path(&package_root.join(sub), specifier, from),
                        None => self.resolve_directory(&normalize(&package_root), specifier, from),
                    };
                }
            }
            current = dir.parent();
        }

        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
        })
    }
}

/// Split a bare specifier into package name and optional subpath,
/// handling `@scope/name` packages.
fn parse_package_specifier(specifier: &str) -> (&str, Option<&str>) {
    if specifier.starts_with('@') {
        // Scoped package: @scope/name or @scope/name/subpath
        if let Some(slash_pos) = specifier[1..].find('/') {
            let after_scope = &specifier[slash_pos + 2..];
            if let Some(subpath_pos) = after_scope.find('/') {
                let name_end = slash_pos + 2 + subpath_pos;
                return (&specifier[..name_end], Some(&specifier[name_end + 1..]));
            }
        }
        (specifier, None)
    } else if let Some(slash_pos) = specifier.find('/') {
        (&specifier[..slash_pos], Some(&specifier[slash_pos + 1..]))
    } else {
        (specifier, None)
    }
}

/// Append an extension to the candidate's file name without replacing
/// an existing suffix (`./x.min` + `.js` = `./x.min.js`).
fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(ext);
    path.with_file_name(name)
}
