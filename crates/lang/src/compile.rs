// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compile drivers: source text → IR.
//!
//! `compile` handles a self-contained source string; `compile_file` also
//! resolves imports relative to the file's directory.

use crate::import::{resolve_imports, ImportError};
use crate::irgen::{generate, generate_at, CompilationError, CompilationWarning};
use crate::parser::{parse_spell, ParseError};
use crate::source::SpellSource;
use crate::tokenizer::{tokenize, LexError};
use crate::transform::{transform, transform_with_blocks, TransformError};
use grim_core::SpellIR;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("validation failed: {}", format_errors(errors))]
    Validation {
        errors: Vec<CompilationError>,
        warnings: Vec<CompilationWarning>,
    },
}

fn format_errors(errors: &[CompilationError]) -> String {
    errors
        .iter()
        .map(|e| format!("[{}] {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Compiled artifact plus any non-fatal warnings.
#[derive(Debug)]
pub struct Compiled {
    pub ir: SpellIR,
    pub warnings: Vec<CompilationWarning>,
}

/// Compile a self-contained spell source (no imports).
pub fn compile(source: &str) -> Result<Compiled, CompileError> {
    let spell_source = lower(source)?;
    finish(generate(&spell_source))
}

/// Compile with a pinned creation timestamp (deterministic artifacts).
pub fn compile_at(source: &str, created: &str) -> Result<Compiled, CompileError> {
    let spell_source = lower(source)?;
    finish(generate_at(&spell_source, created.to_string()))
}

/// Compile source text into the SpellSource intermediate only.
pub fn lower(source: &str) -> Result<SpellSource, CompileError> {
    let span = tracing::debug_span!("compile");
    let _guard = span.enter();
    let tokens = tokenize(source)?;
    let spell = parse_spell(tokens)?;
    Ok(transform(&spell)?)
}

/// Compile a spell file, resolving imports relative to its directory.
pub fn compile_file(path: &Path) -> Result<Compiled, CompileError> {
    let text = std::fs::read_to_string(path).map_err(|e| CompileError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let tokens = tokenize(&text)?;
    let spell = parse_spell(tokens)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let blocks = resolve_imports(&spell, base_dir)?;
    let spell_source = transform_with_blocks(&spell, &blocks)?;
    finish(generate(&spell_source))
}

fn finish(output: crate::irgen::GenerateOutput) -> Result<Compiled, CompileError> {
    match output.ir {
        Some(ir) => {
            for warning in &output.warnings {
                tracing::warn!(code = %warning.code, "{}", warning.message);
            }
            Ok(Compiled {
                ir,
                warnings: output.warnings,
            })
        }
        None => Err(CompileError::Validation {
            errors: output.errors,
            warnings: output.warnings,
        }),
    }
}
