// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State store abstraction.
//!
//! Three logical entities: per-spell state (keyed by spell id), run
//! records (keyed by spell id + run id, pruned to a maximum), and
//! per-run ledgers. Serialization is deterministic JSON with bigint
//! metrics as decimal strings.

use grim_core::{LedgerEntry, RunRecord, Value};
use thiserror::Error;

/// Run history is pruned to this many records unless configured otherwise.
pub const DEFAULT_MAX_RUNS: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt record for spell '{spell_id}': {message}")]
    Corrupt { spell_id: String, message: String },
}

/// Abstract persistence used by hosts around spell runs.
///
/// The engine touches the store exactly twice per run: the caller loads
/// persistent state before `execute`, and saves the final state, run
/// record, and ledger afterwards.
pub trait StateStore: Send + Sync {
    /// Load persistent state, or `None` if the spell has never run.
    fn load(&self, spell_id: &str) -> Result<Option<Value>, StoreError>;

    fn save(&self, spell_id: &str, state: &Value) -> Result<(), StoreError>;

    /// Record a run; history is pruned to the configured maximum, keeping
    /// the newest records.
    fn add_run(&self, spell_id: &str, run: &RunRecord) -> Result<(), StoreError>;

    /// Runs most-recent first, optionally limited.
    fn get_runs(&self, spell_id: &str, limit: Option<usize>) -> Result<Vec<RunRecord>, StoreError>;

    fn save_ledger(
        &self,
        spell_id: &str,
        run_id: &str,
        entries: &[LedgerEntry],
    ) -> Result<(), StoreError>;

    fn load_ledger(
        &self,
        spell_id: &str,
        run_id: &str,
    ) -> Result<Option<Vec<LedgerEntry>>, StoreError>;

    /// All known spell ids, sorted.
    fn list_spells(&self) -> Result<Vec<String>, StoreError>;
}
