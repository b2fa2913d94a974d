// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run execution context.
//!
//! The only writable shared state during a run. Clones share the
//! underlying maps (parallel branches write through the same context and
//! must touch disjoint keys); `fork_scope` isolates variable bindings for
//! per-element tasks (`pmap`, parallel loops).

use grim_core::{ExecutionMode, Ledger, RunId, RunMetrics, SpellIR, Value};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Snapshot of mutable state for try/atomic rollback.
#[derive(Debug, Clone)]
pub(crate) struct ContextSnapshot {
    vars: IndexMap<String, Value>,
    persistent: IndexMap<String, Value>,
    ephemeral: IndexMap<String, Value>,
}

#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub start_time_ms: u64,
    pub mode: ExecutionMode,
    /// Wallet address actions sign with, when live.
    pub vault: Option<String>,
    pub chain: Option<String>,
    pub trigger: Option<String>,
    pub advisor_tooling: Option<serde_json::Value>,
    pub ledger: Ledger,
    /// Effective parameters (schema defaults overridden by the caller).
    params: Arc<IndexMap<String, Value>>,
    vars: Arc<Mutex<IndexMap<String, Value>>>,
    persistent: Arc<Mutex<IndexMap<String, Value>>>,
    ephemeral: Arc<Mutex<IndexMap<String, Value>>>,
    step_outputs: Arc<Mutex<IndexMap<String, Value>>>,
    executed: Arc<Mutex<HashSet<String>>>,
    metrics: Arc<Mutex<RunMetrics>>,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: RunId,
        start_time_ms: u64,
        mode: ExecutionMode,
        spell: &SpellIR,
        params: IndexMap<String, Value>,
        persistent: IndexMap<String, Value>,
        ledger: Ledger,
        trigger: Option<String>,
    ) -> Self {
        // Ephemeral state starts zeroed from the schema on every run.
        let ephemeral: IndexMap<String, Value> = spell
            .state
            .ephemeral
            .iter()
            .map(|f| (f.key.clone(), f.initial_value.clone()))
            .collect();
        Self {
            run_id,
            start_time_ms,
            mode,
            vault: None,
            chain: None,
            trigger,
            advisor_tooling: None,
            ledger,
            params: Arc::new(params),
            vars: Arc::new(Mutex::new(IndexMap::new())),
            persistent: Arc::new(Mutex::new(persistent)),
            ephemeral: Arc::new(Mutex::new(ephemeral)),
            step_outputs: Arc::new(Mutex::new(IndexMap::new())),
            executed: Arc::new(Mutex::new(HashSet::new())),
            metrics: Arc::new(Mutex::new(RunMetrics::default())),
        }
    }

    /// New handle with isolated variable bindings and step outputs but
    /// shared state, metrics, and ledger. Used for per-element tasks.
    pub fn fork_scope(&self) -> Self {
        let mut fork = self.clone();
        fork.vars = Arc::new(Mutex::new(self.vars.lock().clone()));
        fork.step_outputs = Arc::new(Mutex::new(self.step_outputs.lock().clone()));
        fork
    }

    // -- variables --

    /// Bind a variable, mirroring into persistent/ephemeral state when the
    /// name is a declared state key.
    pub fn bind_variable(&self, name: &str, value: Value) {
        {
            let mut persistent = self.persistent.lock();
            if persistent.contains_key(name) {
                persistent.insert(name.to_string(), value.clone());
            }
        }
        {
            let mut ephemeral = self.ephemeral.lock();
            if ephemeral.contains_key(name) {
                ephemeral.insert(name.to_string(), value.clone());
            }
        }
        self.vars.lock().insert(name.to_string(), value);
    }

    /// Resolve an identifier: variables first, then ephemeral, then
    /// persistent state, then parameters.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.lock().get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.ephemeral.lock().get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.persistent.lock().get(name) {
            return Some(value.clone());
        }
        self.params.get(name).cloned()
    }

    pub fn params_object(&self) -> Value {
        Value::Object(self.params.as_ref().clone())
    }

    /// Merged state view, ephemeral shadowing persistent.
    pub fn state_object(&self) -> Value {
        let mut merged = self.persistent.lock().clone();
        for (key, value) in self.ephemeral.lock().iter() {
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }

    pub fn persistent_state(&self) -> Value {
        Value::Object(self.persistent.lock().clone())
    }

    // -- step bookkeeping --

    pub fn mark_step_executed(&self, step_id: &str) {
        self.executed.lock().insert(step_id.to_string());
    }

    pub fn is_step_executed(&self, step_id: &str) -> bool {
        self.executed.lock().contains(step_id)
    }

    pub fn executed_steps(&self) -> Vec<String> {
        self.executed.lock().iter().cloned().collect()
    }

    pub fn record_output(&self, step_id: &str, value: Value) {
        self.step_outputs.lock().insert(step_id.to_string(), value);
    }

    pub fn output(&self, step_id: &str) -> Option<Value> {
        self.step_outputs.lock().get(step_id).cloned()
    }

    // -- metrics --

    pub fn metrics(&self) -> RunMetrics {
        self.metrics.lock().clone()
    }

    pub fn increment_steps_executed(&self) {
        self.metrics.lock().steps_executed += 1;
    }

    pub fn increment_actions_executed(&self) {
        self.metrics.lock().actions_executed += 1;
    }

    pub fn add_gas_used(&self, gas: u128) {
        let mut metrics = self.metrics.lock();
        metrics.gas_used = metrics.gas_used.saturating_add(gas);
    }

    pub fn increment_advisory_calls(&self) {
        self.metrics.lock().advisory_calls += 1;
    }

    pub fn increment_errors(&self) {
        self.metrics.lock().errors += 1;
    }

    pub fn increment_retries(&self) {
        self.metrics.lock().retries += 1;
    }

    // -- rollback --

    pub(crate) fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            vars: self.vars.lock().clone(),
            persistent: self.persistent.lock().clone(),
            ephemeral: self.ephemeral.lock().clone(),
        }
    }

    pub(crate) fn restore(&self, snapshot: &ContextSnapshot) {
        *self.vars.lock() = snapshot.vars.clone();
        *self.persistent.lock() = snapshot.persistent.clone();
        *self.ephemeral.lock() = snapshot.ephemeral.clone();
    }
}
