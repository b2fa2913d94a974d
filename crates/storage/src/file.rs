// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON file store.
//!
//! One directory per spell under the root:
//!
//! ```text
//! <root>/<spell_id>/state.json          {"state": ..., "updated_at": ...}
//! <root>/<spell_id>/runs.json           [RunRecord, ...] oldest first
//! <root>/<spell_id>/ledger-<run>.json   [LedgerEntry, ...]
//! ```
//!
//! Writes go through a tmp file and rename so a crash never leaves a
//! half-written document behind.

use crate::store::{StateStore, StoreError, DEFAULT_MAX_RUNS};
use grim_core::{LedgerEntry, RunRecord, Value};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize)]
struct StateDoc {
    state: Value,
    updated_at: String,
}

pub struct FileStore {
    root: PathBuf,
    max_runs: usize,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_runs: DEFAULT_MAX_RUNS,
        }
    }

    pub fn with_max_runs(root: impl Into<PathBuf>, max_runs: usize) -> Self {
        Self {
            root: root.into(),
            max_runs,
        }
    }

    fn spell_dir(&self, spell_id: &str) -> PathBuf {
        self.root.join(spell_id)
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, StoreError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_runs(&self, spell_id: &str) -> Result<Vec<RunRecord>, StoreError> {
        Ok(self
            .read_json(&self.spell_dir(spell_id).join("runs.json"))?
            .unwrap_or_default())
    }
}

impl StateStore for FileStore {
    fn load(&self, spell_id: &str) -> Result<Option<Value>, StoreError> {
        let doc: Option<StateDoc> = self.read_json(&self.spell_dir(spell_id).join("state.json"))?;
        Ok(doc.map(|doc| doc.state))
    }

    fn save(&self, spell_id: &str, state: &Value) -> Result<(), StoreError> {
        let doc = StateDoc {
            state: state.clone(),
            updated_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };
        let content = serde_json::to_vec_pretty(&doc)?;
        self.write_atomic(&self.spell_dir(spell_id).join("state.json"), &content)?;
        tracing::debug!(spell = spell_id, "state saved");
        Ok(())
    }

    fn add_run(&self, spell_id: &str, run: &RunRecord) -> Result<(), StoreError> {
        let mut runs = self.read_runs(spell_id)?;
        runs.push(run.clone());
        if runs.len() > self.max_runs {
            let excess = runs.len() - self.max_runs;
            runs.drain(..excess);
        }
        let content = serde_json::to_vec_pretty(&runs)?;
        self.write_atomic(&self.spell_dir(spell_id).join("runs.json"), &content)
    }

    fn get_runs(&self, spell_id: &str, limit: Option<usize>) -> Result<Vec<RunRecord>, StoreError> {
        let mut runs = self.read_runs(spell_id)?;
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
        let content = serde_json::to_vec(&entries)?;
        self.write_atomic(
            &self.spell_dir(spell_id).join(format!("ledger-{run_id}.json")),
            &content,
        )
    }

    fn load_ledger(
        &self,
        spell_id: &str,
        run_id: &str,
    ) -> Result<Option<Vec<LedgerEntry>>, StoreError> {
        self.read_json(
            &self
                .spell_dir(spell_id)
                .join(format!("ledger-{run_id}.json")),
        )
    }

    fn list_spells(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
