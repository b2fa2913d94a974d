// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory state store for tests and embedding

use crate::store::{StateStore, StoreError, DEFAULT_MAX_RUNS};
use grim_core::{LedgerEntry, RunRecord, Value};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct SpellRecord {
    state: Option<Value>,
    /// Oldest first; pruned from the front.
    runs: Vec<RunRecord>,
    ledgers: HashMap<String, Vec<LedgerEntry>>,
}

/// Mutex-guarded map store. Cheap, durable for the process lifetime only.
pub struct MemoryStore {
    max_runs: usize,
    spells: Mutex<HashMap<String, SpellRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_runs(DEFAULT_MAX_RUNS)
    }

    pub fn with_max_runs(max_runs: usize) -> Self {
        Self {
            max_runs,
            spells: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, spell_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .spells
            .lock()
            .get(spell_id)
            .and_then(|record| record.state.clone()))
    }

    fn save(&self, spell_id: &str, state: &Value) -> Result<(), StoreError> {
        self.spells
            .lock()
            .entry(spell_id.to_string())
            .or_default()
            .state = Some(state.clone());
        Ok(())
    }

    fn add_run(&self, spell_id: &str, run: &RunRecord) -> Result<(), StoreError> {
        let mut spells = self.spells.lock();
        let record = spells.entry(spell_id.to_string()).or_default();
        record.runs.push(run.clone());
        if record.runs.len() > self.max_runs {
            let excess = record.runs.len() - self.max_runs;
            record.runs.drain(..excess);
        }
        Ok(())
    }

    fn get_runs(&self, spell_id: &str, limit: Option<usize>) -> Result<Vec<RunRecord>, StoreError> {
        let spells = self.spells.lock();
        let mut runs: Vec<RunRecord> = spells
            .get(spell_id)
            .map(|record| record.runs.clone())
            .unwrap_or_default();
        runs.reverse();
        if let Some(limit) = limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    fn save_ledger(
        &self,
        spell_id: &str,
        run_id: &str,
        entries: &[LedgerEntry],
    ) -> Result<(), StoreError> {
        self.spells
            .lock()
            .entry(spell_id.to_string())
            .or_default()
            .ledgers
            .insert(run_id.to_string(), entries.to_vec());
        Ok(())
    }

    fn load_ledger(
        &self,
        spell_id: &str,
        run_id: &str,
    ) -> Result<Option<Vec<LedgerEntry>>, StoreError> {
        Ok(self
            .spells
            .lock()
            .get(spell_id)
            .and_then(|record| record.ledgers.get(run_id).cloned()))
    }

    fn list_spells(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.spells.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
