// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Static import/export extraction.
//!
//! Recognizes the static module syntax forms (`import ... from`,
//! side-effect `import`, the `export ... from` re-export family, and
//! local `export` declarations) with regexes over comment-masked source.
//! Dynamic `import()` is recorded as a distinct marker and never resolved
//! at build time.
//!
//! Matches are collected across all forms and sorted by byte offset, so
//! dependency order is source order. That ordering carries through the
//! graph into the emitted bundle, where it decides side-effect execution
//! order.

use regex::Regex;
use std::collections::BTreeSet;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::ExtractError;

/// Sentinel export name for a module's default export.
pub const DEFAULT_EXPORT: &str = "default";

/// Sentinel export name for `export * from` namespace re-export.
pub const NAMESPACE_EXPORT: &str = "*";

/// How a dependency was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// `import ... from 'spec'`
    Static,
    /// `import 'spec'` (execute for side effects only)
    SideEffectOnly,
    /// `export ... from 'spec'`
    ReExport,
    /// `import('spec')`; target unknowable until run time
    Dynamic,
}

/// One dependency declaration, in source order.
#[derive(Debug, Clone)]
pub struct DependencyRequest {
    /// The specifier string as written
    pub specifier: String,
    /// The declaration form it came from
    pub kind: DependencyKind,
}

/// Bindings pulled in by one `import ... from` statement.
#[derive(Debug, Clone, Default)]
pub struct ImportClause {
    /// `import name from ...`
    pub default: Option<String>,
    /// `import * as name from ...`
    pub namespace: Option<String>,
    /// `import { imported as local } from ...` as `(imported, local)`
    pub named: Vec<(String, String)>,
}

/// A recognized module-syntax construct.
#[derive(Debug, Clone)]
pub enum SyntaxItemKind {
    /// `import <clause> from 'specifier'`
    Import {
        /// Dependency specifier
        specifier: String,
        /// Bindings introduced
        clause: ImportClause,
    },
    /// `import 'specifier'`
    SideEffectImport {
        /// Dependency specifier
        specifier: String,
    },
    /// `import('specifier')` with a literal specifier
    DynamicImport {
        /// Dependency specifier
        specifier: String,
    },
    /// `export * from 'specifier'`
    ExportAllFrom {
        /// Dependency specifier
        specifier: String,
    },
    /// `export * as name from 'specifier'`
    ExportNamespaceFrom {
        /// Dependency specifier
        specifier: String,
        /// Name the namespace is exported under
        name: String,
    },
    /// `export { a, b as c } from 'specifier'` as `(source name, exported name)`
    ExportNamedFrom {
        /// Dependency specifier
        specifier: String,
        /// `(name in source module, exported name)` pairs
        names: Vec<(String, String)>,
    },
    /// `export default ...` (span covers the two keywords only)
    ExportDefault,
    /// `export const|let|var|function|class name ...`
    ExportDeclaration {
        /// The declared, exported binding
        name: String,
    },
    /// `export { a, b as c }` as `(local name, exported name)`
    ExportNamed {
        /// `(local name, exported name)` pairs
        names: Vec<(String, String)>,
    },
}

/// A construct plus its byte span in the source, for later rewriting.
#[derive(Debug, Clone)]
pub struct SyntaxItem {
    /// Byte range of the matched construct
    pub span: Range<usize>,
    /// What was matched
    pub kind: SyntaxItemKind,
}

/// All recognized constructs of one module, in source order.
#[derive(Debug, Clone, Default)]
pub struct ModuleSyntax {
    /// Constructs sorted by span start
    pub items: Vec<SyntaxItem>,
}

/// Flat summary of a module's dependencies and exported bindings.
#[derive(Debug, Clone, Default)]
pub struct ModuleSummary {
    /// Dependency declarations in source order
    pub dependencies: Vec<DependencyRequest>,
    /// Exported binding names, including the sentinels
    pub exports: BTreeSet<String>,
    /// Whether the module has a default export
    pub has_default_export: bool,
}

impl ModuleSyntax {
    /// Derive the dependency/export summary from the recognized items.
    pub fn summary(&self) -> ModuleSummary {
        let mut summary = ModuleSummary::default();
        for item in &self.items {
            match &item.kind {
                SyntaxItemKind::Import { specifier, .. } => {
                    summary.dependencies.push(DependencyRequest {
                        specifier: specifier.clone(),
                        kind: DependencyKind::Static,
                    });
                }
                SyntaxItemKind::SideEffectImport { specifier } => {
                    summary.dependencies.push(DependencyRequest {
                        specifier: specifier.clone(),
                        kind: DependencyKind::SideEffectOnly,
                    });
                }
                SyntaxItemKind::DynamicImport { specifier } => {
                    summary.dependencies.push(DependencyRequest {
                        specifier: specifier.clone(),
                        kind: DependencyKind::Dynamic,
                    });
                }
                SyntaxItemKind::ExportAllFrom { specifier } => {
                    summary.dependencies.push(DependencyRequest {
                        specifier: specifier.clone(),
                        kind: DependencyKind::ReExport,
                    });
                    summary.exports.insert(NAMESPACE_EXPORT.to_string());
                }
                SyntaxItemKind::ExportNamespaceFrom { specifier, name } => {
                    summary.dependencies.push(DependencyRequest {
                        specifier: specifier.clone(),
                        kind: DependencyKind::ReExport,
                    });
                    summary.exports.insert(name.clone());
                }
                SyntaxItemKind::ExportNamedFrom { specifier, names } => {
                    summary.dependencies.push(DependencyRequest {
                        specifier: specifier.clone(),
                        kind: DependencyKind::ReExport,
                    });
                    for (_, exported) in names {
                        if exported.as_str() == DEFAULT_EXPORT {
                            summary.has_default_export = true;
                        }
                        summary.exports.insert(exported.clone());
                    }
                }
                SyntaxItemKind::ExportDefault => {
                    summary.has_default_export = true;
                    summary.exports.insert(DEFAULT_EXPORT.to_string());
                }
                SyntaxItemKind::ExportDeclaration { name } => {
                    summary.exports.insert(name.clone());
                }
                SyntaxItemKind::ExportNamed { names } => {
                    for (_, exported) in names {
                        if exported.as_str() == DEFAULT_EXPORT {
                            summary.has_default_export = true;
                        }
                        summary.exports.insert(exported.clone());
                    }
                }
            }
        }
        summary
    }
}

/// Whether a path has a natively-understood JavaScript extension.
pub fn is_javascript(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("js" | "mjs" | "cjs" | "jsx")
    )
}

static EXPORT_NAMESPACE_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"export\s+\*\s+as\s+([A-Za-z_$][\w$]*)\s+from\s*['"]([^'"]+)['"]\s*;?"#,
    )
    .unwrap()
});

static EXPORT_ALL_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"export\s+\*\s+from\s*['"]([^'"]+)['"]\s*;?"#).unwrap()
});

static EXPORT_NAMED_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"export\s*\{([^}]*)\}\s*from\s*['"]([^'"]+)['"]\s*;?"#).unwrap()
});

static DYNAMIC_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap()
});

static IMPORT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"import\s+(?:([A-Za-z_$][\w$]*)(?:\s*,\s*(?:\{([^}]*)\}|\*\s+as\s+([A-Za-z_$][\w$]*)))?|\{([^}]*)\}|\*\s+as\s+([A-Za-z_$][\w$]*))\s*from\s*['"]([^'"]+)['"]\s*;?"#,
    )
    .unwrap()
});

static SIDE_EFFECT_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s*['"]([^'"]+)['"]\s*;?"#).unwrap()
});

static EXPORT_DEFAULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"export\s+default\b").unwrap());

static EXPORT_DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"export\s+(?:async\s+)?(?:const|let|var|function\s*\*?|class)\s+([A-Za-z_$][\w$]*)",
    )
    .unwrap()
});

static EXPORT_NAMED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"export\s*\{([^}]*)\}\s*;?").unwrap());

/// Extract all static module syntax from `source`.
pub fn extract(source: &str) -> Result<ModuleSyntax, ExtractError> {
    let mask = code_mask(source)?;
    let mut items: Vec<SyntaxItem> = Vec::new();
    let mut claimed: Vec<Range<usize>> = Vec::new();

    // More specific forms run first; a later regex never reclaims a span.
    collect(source, &mask, &mut items, &mut claimed, &EXPORT_NAMESPACE_FROM_RE, |cap| {
        Some(SyntaxItemKind::ExportNamespaceFrom {
            name: group(cap, 1),
            specifier: group(cap, 2),
        })
    });
    collect(source, &mask, &mut items, &mut claimed, &EXPORT_ALL_FROM_RE, |cap| {
        Some(SyntaxItemKind::ExportAllFrom { specifier: group(cap, 1) })
    });
    collect(source, &mask, &mut items, &mut claimed, &EXPORT_NAMED_FROM_RE, |cap| {
        Some(SyntaxItemKind::ExportNamedFrom {
            names: parse_binding_list(&group(cap, 1)),
            specifier: group(cap, 2),
        })
    });
    collect(source, &mask, &mut items, &mut claimed, &DYNAMIC_IMPORT_RE, |cap| {
        Some(SyntaxItemKind::DynamicImport { specifier: group(cap, 1) })
    });
    collect(source, &mask, &mut items, &mut claimed, &IMPORT_FROM_RE, |cap| {
        let mut clause = ImportClause {
            default: cap.get(1).map(|m| m.as_str().to_string()),
            namespace: cap
                .get(3)
                .or_else(|| cap.get(5))
                .map(|m| m.as_str().to_string()),
            named: Vec::new(),
        };
        if let Some(named) = cap.get(2).or_else(|| cap.get(4)) {
            clause.named = parse_binding_list(named.as_str());
        }
        Some(SyntaxItemKind::Import {
            specifier: group(cap, 6),
            clause,
        })
    });
    collect(source, &mask, &mut items, &mut claimed, &SIDE_EFFECT_IMPORT_RE, |cap| {
        Some(SyntaxItemKind::SideEffectImport { specifier: group(cap, 1) })
    });
    collect(source, &mask, &mut items, &mut claimed, &EXPORT_DEFAULT_RE, |_| {
        Some(SyntaxItemKind::ExportDefault)
    });
    collect(source, &mask, &mut items, &mut claimed, &EXPORT_DECLARATION_RE, |cap| {
        Some(SyntaxItemKind::ExportDeclaration { name: group(cap, 1) })
    });
    collect(source, &mask, &mut items, &mut claimed, &EXPORT_NAMED_RE, |cap| {
        Some(SyntaxItemKind::ExportNamed {
            names: parse_binding_list(&group(cap, 1)),
        })
    });

    items.sort_by_key(|item| item.span.start);
    Ok(ModuleSyntax { items })
}

fn group(cap: &regex::Captures<'_>, index: usize) -> String {
    cap.get(index).map(|m| m.as_str().to_string()).unwrap_or_default()
}

fn collect(
    source: &str,
    mask: &[bool],
    items: &mut Vec<SyntaxItem>,
    claimed: &mut Vec<Range<usize>>,
    re: &Regex,
    build: impl Fn(&regex::Captures<'_>) -> Option<SyntaxItemKind>,
) {
    for cap in re.captures_iter(source) {
        let span = match cap.get(0) {
            Some(m) => m.range(),
            None => continue,
        };
        if mask.get(span.start).copied().unwrap_or(false) {
            continue;
        }
        if claimed.iter().any(|c| c.start < span.end && span.start < c.end) {
            continue;
        }
        if let Some(kind) = build(&cap) {
            claimed.push(span.clone());
            items.push(SyntaxItem { span, kind });
        }
    }
}

/// Parse `a, b as c` into `(name, alias-or-name)` pairs.
fn parse_binding_list(list: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut split = part.splitn(2, " as ");
        let name = split.next().unwrap_or_default().trim().to_string();
        let alias = split
            .next()
            .map(|a| a.trim().to_string())
            .unwrap_or_else(|| name.clone());
        if !name.is_empty() {
            out.push((name, alias));
        }
    }
    out
}

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Code,
    LineComment,
    BlockComment,
    Single,
    Double,
    Template,
}

/// Build a per-byte exclusion mask covering comments and string/template
/// interiors, so matches starting inside them are ignored.
fn code_mask(source: &str) -> Result<Vec<bool>, ExtractError> {
    let bytes = source.as_bytes();
    let mut mask = vec![false; bytes.len()];
    let mut state = ScanState::Code;
    let mut open_at = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            ScanState::Code => match b {
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    state = ScanState::LineComment;
                    mask[i] = true;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    state = ScanState::BlockComment;
                    open_at = i;
                    mask[i] = true;
                }
                b'\'' => {
                    state = ScanState::Single;
                    open_at = i;
                }
                b'"' => {
                    state = ScanState::Double;
                    open_at = i;
                }
                b'`' => {
                    state = ScanState::Template;
                    open_at = i;
                    mask[i] = true;
                }
                _ => {}
            },
            ScanState::LineComment => {
                if b == b'\n' {
                    state = ScanState::Code;
                } else {
                    mask[i] = true;
                }
            }
            ScanState::BlockComment => {
                mask[i] = true;
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    mask[i + 1] = true;
                    i += 1;
                    state = ScanState::Code;
                }
            }
            ScanState::Single | ScanState::Double => {
                let close = if state == ScanState::Single { b'\'' } else { b'"' };
                if b == b'\\' {
                    mask[i] = true;
                    if i + 1 < bytes.len() {
                        mask[i + 1] = true;
                    }
                    i += 1;
                } else if b == close {
                    state = ScanState::Code;
                } else if b == b'\n' {
                    return Err(ExtractError::Syntax {
                        line: line_of(source, open_at),
                        message: "unterminated string literal".to_string(),
                    });
                } else {
                    mask[i] = true;
                }
            }
            ScanState::Template => {
                mask[i] = true;
                if b == b'\\' {
                    if i + 1 < bytes.len() {
                        mask[i + 1] = true;
                    }
                    i += 1;
                } else if b == b'`' {
                    state = ScanState::Code;
                }
            }
        }
        i += 1;
    }

    match state {
        ScanState::BlockComment => Err(ExtractError::Syntax {
            line: line_of(source, open_at),
            message: "unterminated block comment".to_string(),
        }),
        ScanState::Single | ScanState::Double => Err(ExtractError::Syntax {
            line: line_of(source, open_at),
            message: "unterminated string literal".to_string(),
        }),
        ScanState::Template => Err(ExtractError::Syntax {
            line: line_of(source, open_at),
            message: "unterminated template literal".to_string(),
        }),
        _ => Ok(mask),
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specifiers(summary: &ModuleSummary) -> Vec<&str> {
        summary.dependencies.iter().map(|d| d.specifier.as_str()).collect()
    }

    #[test]
    fn test_import_forms() {
        let source = r#"
            import foo from 'a';
            import { bar, baz as qux } from 'b';
            import * as ns from 'c';
            import dflt, { named } from 'd';
            import dflt2, * as ns2 from 'e';
            import 'f';
        "#;

        let syntax = extract(source).unwrap();
        let summary = syntax.summary();
        assert_eq!(specifiers(&summary), vec!["a", "b", "c", "d", "e", "f"]);
        assert_eq!(summary.dependencies[5].kind, DependencyKind::SideEffectOnly);

        match &syntax.items[1].kind {
            SyntaxItemKind::Import { clause, .. } => {
                assert_eq!(
                    clause.named,
                    vec![
                        ("bar".to_string(), "bar".to_string()),
                        ("baz".to_string(), "qux".to_string())
                    ]
                );
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn test_source_order_preserved_across_forms() {
        // Side-effect imports interleaved with named imports must keep
        // their declared order; it decides runtime execution order.
        let source = "import './a';\nimport x from './b';\nimport './c';\n";
        let summary = extract(source).unwrap().summary();
        assert_eq!(specifiers(&summary), vec!["./a", "./b", "./c"]);
    }

    #[test]
    fn test_multiline_named_import() {
        let source = "import {\n  one,\n  two as deux,\n} from './numbers';\n";
        let summary = extract(source).unwrap().summary();
        assert_eq!(specifiers(&summary), vec!["./numbers"]);
    }

    #[test]
    fn test_export_forms() {
        let source = r#"
            export default class User {}
            export const version = 1;
            export function greet() {}
            export { a, b as c };
            export { x } from './x';
            export * from './all';
            export * as util from './util';
        "#;

        let summary = extract(source).unwrap().summary();
        assert!(summary.has_default_export);
        for name in ["default", "version", "greet", "a", "c", "x", "*", "util"] {
            assert!(summary.exports.contains(name), "missing export {name}");
        }
        assert_eq!(specifiers(&summary), vec!["./x", "./all", "./util"]);
        assert!(summary
            .dependencies
            .iter()
            .all(|d| d.kind == DependencyKind::ReExport));
    }

    #[test]
    fn test_aliased_default_export_sets_flag() {
        let summary = extract("const main = 1;\nexport { main as default };")
            .unwrap()
            .summary();
        assert!(summary.has_default_export);
        assert!(summary.exports.contains("default"));

        let summary = extract("export { main as default } from './main';")
            .unwrap()
            .summary();
        assert!(summary.has_default_export);
    }

    #[test]
    fn test_dynamic_import_is_marked_not_static() {
        let source = "const page = import('./page.js');\nimport './boot';\n";
        let summary = extract(source).unwrap().summary();
        assert_eq!(summary.dependencies.len(), 2);
        assert_eq!(summary.dependencies[0].kind, DependencyKind::Dynamic);
        assert_eq!(summary.dependencies[0].specifier, "./page.js");
        assert_eq!(summary.dependencies[1].kind, DependencyKind::SideEffectOnly);
    }

    #[test]
    fn test_comments_and_strings_are_ignored() {
        let source = r#"
            // import fake from './commented';
            /* import 'also-commented'; */
            const s = "import 'in-string';";
            const t = `import 'in-template';`;
            import real from './real';
        "#;

        let summary = extract(source).unwrap().summary();
        assert_eq!(specifiers(&summary), vec!["./real"]);
    }

    #[test]
    fn test_unterminated_block_comment_is_syntax_error() {
        let source = "import a from './a';\n/* never closed\nmore text";
        let err = extract(source).unwrap_err();
        match err {
            ExtractError::Syntax { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("block comment"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_string_is_syntax_error() {
        let source = "const broken = 'no close\nimport x from './y';";
        assert!(matches!(
            extract(source),
            Err(ExtractError::Syntax { line: 1, .. })
        ));
    }

    #[test]
    fn test_is_javascript() {
        assert!(is_javascript(Path::new("a.js")));
        assert!(is_javascript(Path::new("a.mjs")));
        assert!(is_javascript(Path::new("a.cjs")));
        assert!(!is_javascript(Path::new("a.json")));
        assert!(!is_javascript(Path::new("a.css")));
        assert!(!is_javascript(Path::new("logo.png")));
    }
}
