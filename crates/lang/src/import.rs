// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spell import resolution.
//!
//! `import "lib/rebalance.spell" as lib` makes the imported file's blocks
//! available as `lib.<block>`. Resolution is a deterministic depth-first
//! walk; paths are relative to the importing file's directory, and a cycle
//! (the same canonical path re-entered) is an error naming the full chain.

use crate::ast::{BlockDecl, CatchBody, Spell, Stmt, StmtKind};
use crate::parser::{parse_spell, ParseError};
use crate::tokenizer::{tokenize, LexError};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot read import '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("in import '{path}': {source}")]
    Lex {
        path: String,
        #[source]
        source: LexError,
    },

    #[error("in import '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error("import cycle: {chain}")]
    Cycle { chain: String },
}

/// Resolve a spell's imports into a namespaced block map
/// (`alias.blockName` → template).
pub fn resolve_imports(
    spell: &Spell,
    base_dir: &Path,
) -> Result<IndexMap<String, BlockDecl>, ImportError> {
    let mut visiting = Vec::new();
    resolve(spell, base_dir, &mut visiting)
}

fn resolve(
    spell: &Spell,
    dir: &Path,
    visiting: &mut Vec<PathBuf>,
) -> Result<IndexMap<String, BlockDecl>, ImportError> {
    let mut out = IndexMap::new();
    for import in &spell.imports {
        let path = dir.join(&import.path);
        let canonical = path.canonicalize().map_err(|e| ImportError::Io {
            path: import.path.clone(),
            source: e,
        })?;
        if visiting.contains(&canonical) {
            let mut chain: Vec<String> = visiting
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            chain.push(canonical.display().to_string());
            return Err(ImportError::Cycle {
                chain: chain.join(" -> "),
            });
        }

        let alias = match &import.alias {
            Some(alias) => alias.clone(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| import.path.clone()),
        };

        let text = std::fs::read_to_string(&path).map_err(|e| ImportError::Io {
            path: import.path.clone(),
            source: e,
        })?;
        let tokens = tokenize(&text).map_err(|e| ImportError::Lex {
            path: import.path.clone(),
            source: e,
        })?;
        let imported = parse_spell(tokens).map_err(|e| ImportError::Parse {
            path: import.path.clone(),
            source: e,
        })?;

        visiting.push(canonical.clone());
        let parent = canonical.parent().unwrap_or(dir);
        let nested = resolve(&imported, parent, visiting)?;
        visiting.pop();

        // The imported file sees its own blocks bare plus its imports
        // namespaced; the importer sees all of it under `alias.`.
        let mut local: IndexMap<String, BlockDecl> = IndexMap::new();
        for block in &imported.blocks {
            local.insert(block.name.clone(), block.clone());
        }
        for (name, block) in nested {
            local.insert(name, block);
        }
        let visible: HashSet<String> = local.keys().cloned().collect();
        for (name, mut block) in local {
            qualify_do_names(&mut block.body, &visible, &alias);
            out.insert(format!("{alias}.{name}"), block);
        }
    }
    Ok(out)
}

/// Rewrite `do <name>` references so blocks inlined from a namespace still
/// resolve against that namespace.
fn qualify_do_names(stmts: &mut [Stmt], visible: &HashSet<String>, alias: &str) {
    for stmt in stmts {
        match &mut stmt.kind {
            StmtKind::Do { name, .. } => {
                if visible.contains(name.as_str()) {
                    *name = format!("{alias}.{name}");
                }
            }
            StmtKind::If {
                then_body,
                elifs,
                else_body,
                ..
            } => {
                qualify_do_names(then_body, visible, alias);
                for (_, body) in elifs {
                    qualify_do_names(body, visible, alias);
                }
                qualify_do_names(else_body, visible, alias);
            }
            StmtKind::For { body, .. }
            | StmtKind::Repeat { body, .. }
            | StmtKind::Until { body, .. }
            | StmtKind::Atomic { body, .. } => qualify_do_names(body, visible, alias),
            StmtKind::Try {
                body,
                catches,
                finally_body,
            } => {
                qualify_do_names(body, visible, alias);
                for clause in catches {
                    if let CatchBody::Steps(steps) = &mut clause.body {
                        qualify_do_names(steps, visible, alias);
                    }
                }
                if let Some(finally_body) = finally_body {
                    qualify_do_names(finally_body, visible, alias);
                }
            }
            StmtKind::Parallel { branches, .. } => {
                for (_, body) in branches {
                    qualify_do_names(body, visible, alias);
                }
            }
            StmtKind::Pipeline { stages, .. } => {
                for stage in stages {
                    qualify_do_names(&mut stage.body, visible, alias);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "import_tests.rs"]
mod tests;
