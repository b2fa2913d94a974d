// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use grim_core::{Clock, FakeClock, Ledger, LedgerEvent, RunId, RunMetrics, SpellId};
use std::sync::Arc;

fn run(n: u64, gas: u128) -> RunRecord {
    RunRecord {
        run_id: RunId::new(format!("run-{n}")),
        timestamp: grim_core::iso8601(n * 1000),
        success: n % 2 == 0,
        error: None,
        duration: 42,
        metrics: RunMetrics {
            gas_used: gas,
            ..Default::default()
        },
        final_state: Value::Object(
            [("counter".to_string(), Value::Number(n as f64))]
                .into_iter()
                .collect(),
        ),
        provenance: None,
    }
}

#[test]
fn state_save_load_round_trips_deep_equal() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let state = Value::Object(
        [
            ("total".to_string(), Value::Number(1_500_000.0)),
            (
                "history".to_string(),
                Value::Array(vec![Value::String("a".into()), Value::Bool(true)]),
            ),
        ]
        .into_iter()
        .collect(),
    );
    store.save("spell-1", &state).unwrap();
    assert_eq!(store.load("spell-1").unwrap(), Some(state));
}

#[test]
fn missing_spell_loads_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    assert!(store.load("ghost").unwrap().is_none());
}

#[test]
fn gas_survives_json_round_trip_as_decimal_string() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let big = u128::MAX - 7;
    store.add_run("s", &run(1, big)).unwrap();

    // The on-disk document stores the metric as a string.
    let raw = std::fs::read_to_string(dir.path().join("s/runs.json")).unwrap();
    assert!(raw.contains(&big.to_string()));

    let runs = store.get_runs("s", None).unwrap();
    assert_eq!(runs[0].metrics.gas_used, big);
}

#[test]
fn run_history_prunes_keeping_newest() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::with_max_runs(dir.path(), 2);
    for n in 0..5 {
        store.add_run("s", &run(n, 0)).unwrap();
    }
    let runs = store.get_runs("s", None).unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run_id.as_str(), "run-4");
    assert_eq!(runs[1].run_id.as_str(), "run-3");
}

#[test]
fn ledger_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::at(7));
    let ledger = Ledger::new(SpellId::new("s"), RunId::new("r"), clock);
    ledger.record(LedgerEvent::Halt {
        reason: "done".into(),
    });
    let entries = ledger.into_entries();

    store.save_ledger("s", "r", &entries).unwrap();
    let loaded = store.load_ledger("s", "r").unwrap().unwrap();
    assert_eq!(loaded, entries);
    assert!(store.load_ledger("s", "other").unwrap().is_none());
}

#[test]
fn list_spells_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    store.save("zeta", &Value::Null).unwrap();
    store.save("alpha", &Value::Null).unwrap();
    store.save("mid", &Value::Null).unwrap();
    assert_eq!(store.list_spells().unwrap(), vec!["alpha", "mid", "zeta"]);
}

#[test]
fn empty_root_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("missing"));
    assert!(store.list_spells().unwrap().is_empty());
}
