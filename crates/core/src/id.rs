// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spell and run identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies a compiled spell artifact.
///
/// Spell IDs are `<name>-<content hash>`, so recompiling identical source
/// yields the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpellId(String);

/// Identifies a single run of a spell. Generated per run (UUID in
/// production, caller-supplied in tests).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl SpellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SpellId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generates unique identifiers
pub trait IdGen: Clone + Send + Sync {
    fn next(&self) -> String;
}

/// UUID-based ID generator for production use
#[derive(Clone, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn next(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Sequential ID generator for deterministic tests
#[derive(Clone, Default)]
pub struct SeqIdGen {
    counter: Arc<AtomicU64>,
}

impl SeqIdGen {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGen for SeqIdGen {
    fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("id-{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display() {
        let id = RunId::new("run-7");
        assert_eq!(id.to_string(), "run-7");
        assert_eq!(id.as_str(), "run-7");
        assert_eq!(id.as_ref(), "run-7");
    }

    #[test]
    fn spell_id_equality() {
        let a = SpellId::new("rotator-deadbeef");
        let b = SpellId::new("rotator-deadbeef");
        let c = SpellId::new("rotator-cafebabe");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn spell_id_serde_is_transparent() {
        let id = SpellId::new("yield-loop");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"yield-loop\"");
        let parsed: SpellId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn seq_id_gen_is_deterministic() {
        let id_gen = SeqIdGen::new();
        assert_eq!(id_gen.next(), "id-0");
        assert_eq!(id_gen.next(), "id-1");
        let clone = id_gen.clone();
        assert_eq!(clone.next(), "id-2");
    }

    #[test]
    fn uuid_id_gen_is_unique() {
        let id_gen = UuidIdGen;
        assert_ne!(id_gen.next(), id_gen.next());
    }
}
