// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory run ledger.
//!
//! Append-only during a run; handed off to the state store at the end.
//! Parallel branches append through the same serialized sink, so entries
//! are totally ordered by emission.

use crate::clock::Clock;
use crate::event::LedgerEvent;
use crate::id::{RunId, SpellId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One ledger entry. `id` is the emission sequence number within the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub run_id: RunId,
    pub spell_id: SpellId,
    pub event: LedgerEvent,
}

struct LedgerInner {
    next_id: u64,
    entries: Vec<LedgerEntry>,
}

/// Serialized event sink for one run. Cheap to clone; clones share the sink.
#[derive(Clone)]
pub struct Ledger {
    run_id: RunId,
    spell_id: SpellId,
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<LedgerInner>>,
}

impl Ledger {
    pub fn new(spell_id: SpellId, run_id: RunId, clock: Arc<dyn Clock>) -> Self {
        Self {
            run_id,
            spell_id,
            clock,
            inner: Arc::new(Mutex::new(LedgerInner {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Append an event; returns its sequence number.
    pub fn record(&self, event: LedgerEvent) -> u64 {
        tracing::debug!(event = %event.log_summary(), "ledger");
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(LedgerEntry {
            id,
            timestamp: self.clock.now_ms(),
            run_id: self.run_id.clone(),
            spell_id: self.spell_id.clone(),
            event,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Snapshot of all entries in emission order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().entries.clone()
    }

    /// Consume the ledger, yielding its entries for hand-off to the store.
    ///
    /// If other clones are still alive the entries are cloned out instead.
    pub fn into_entries(self) -> Vec<LedgerEntry> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().entries,
            Err(shared) => shared.lock().entries.clone(),
        }
    }

    /// True if any entry matches the predicate.
    pub fn contains(&self, predicate: impl Fn(&LedgerEvent) -> bool) -> bool {
        self.inner.lock().entries.iter().any(|e| predicate(&e.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn test_ledger(clock: FakeClock) -> Ledger {
        Ledger::new(SpellId::new("spell-1"), RunId::new("run-1"), Arc::new(clock))
    }

    #[test]
    fn entries_are_sequenced_in_emission_order() {
        let clock = FakeClock::at(1_000);
        let ledger = test_ledger(clock.clone());
        ledger.record(LedgerEvent::Halt {
            reason: "a".into(),
        });
        clock.advance_ms(5);
        ledger.record(LedgerEvent::Halt {
            reason: "b".into(),
        });

        let entries = ledger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 0);
        assert_eq!(entries[1].id, 1);
        assert_eq!(entries[0].timestamp, 1_000);
        assert_eq!(entries[1].timestamp, 1_005);
    }

    #[test]
    fn clones_share_the_sink() {
        let ledger = test_ledger(FakeClock::new());
        let clone = ledger.clone();
        clone.record(LedgerEvent::Halt {
            reason: "from clone".into(),
        });
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn into_entries_yields_everything() {
        let ledger = test_ledger(FakeClock::new());
        ledger.record(LedgerEvent::RunFailed {
            error: "boom".into(),
        });
        let entries = ledger.into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.name(), "run_failed");
    }

    #[test]
    fn entry_serde_round_trips() {
        let ledger = test_ledger(FakeClock::at(42));
        ledger.record(LedgerEvent::Wait {
            duration_secs: 3.0,
            skipped: true,
        });
        let entries = ledger.entries();
        let json = serde_json::to_string(&entries).unwrap();
        let back: Vec<LedgerEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entries);
    }
}
