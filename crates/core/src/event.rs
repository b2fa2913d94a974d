// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ledger event types

use crate::ir::GuardSeverity;
use crate::run::ExecutionMode;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Events appended to the run ledger.
///
/// Serializes with `{"type": "run_started", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    // -- run --
    RunStarted {
        spell: String,
        mode: ExecutionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trigger: Option<String>,
    },
    RunCompleted {
        duration_ms: u64,
        steps_executed: u64,
    },
    RunFailed {
        error: String,
    },

    // -- step --
    StepStarted {
        step_id: String,
        step_kind: String,
    },
    StepCompleted {
        step_id: String,
    },
    StepFailed {
        step_id: String,
        error: String,
        /// Source position, when the source map knows the step.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<u32>,
    },
    StepSkipped {
        step_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    // -- action --
    ActionSimulated {
        step_id: String,
        action_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        venue: Option<String>,
        /// Decimal string.
        gas_used: String,
    },
    ActionExecuted {
        step_id: String,
        action_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        venue: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx_hash: Option<String>,
        /// Decimal string.
        gas_used: String,
    },

    // -- guard --
    GuardPassed {
        guard_id: String,
    },
    GuardFailed {
        guard_id: String,
        severity: GuardSeverity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    // -- advisory --
    AdvisoryStarted {
        step_id: String,
        advisor: String,
    },
    AdvisoryCompleted {
        step_id: String,
        advisor: String,
        /// True when the fallback value was used instead of a live answer.
        fallback_used: bool,
    },

    // -- breaker --
    CircuitBreakerTripped {
        breaker: String,
        reason: String,
    },

    // -- control --
    Emit {
        event: String,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        data: IndexMap<String, Value>,
    },
    Wait {
        duration_secs: f64,
        /// True when simulate mode skipped the sleep.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        skipped: bool,
    },
    Halt {
        reason: String,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::RunStarted { .. } => "run_started",
            LedgerEvent::RunCompleted { .. } => "run_completed",
            LedgerEvent::RunFailed { .. } => "run_failed",
            LedgerEvent::StepStarted { .. } => "step_started",
            LedgerEvent::StepCompleted { .. } => "step_completed",
            LedgerEvent::StepFailed { .. } => "step_failed",
            LedgerEvent::StepSkipped { .. } => "step_skipped",
            LedgerEvent::ActionSimulated { .. } => "action_simulated",
            LedgerEvent::ActionExecuted { .. } => "action_executed",
            LedgerEvent::GuardPassed { .. } => "guard_passed",
            LedgerEvent::GuardFailed { .. } => "guard_failed",
            LedgerEvent::AdvisoryStarted { .. } => "advisory_started",
            LedgerEvent::AdvisoryCompleted { .. } => "advisory_completed",
            LedgerEvent::CircuitBreakerTripped { .. } => "circuit_breaker_tripped",
            LedgerEvent::Emit { .. } => "emit",
            LedgerEvent::Wait { .. } => "wait",
            LedgerEvent::Halt { .. } => "halt",
        }
    }

    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            LedgerEvent::RunStarted { spell, mode, .. } => {
                format!("{t} spell={spell} mode={mode}")
            }
            LedgerEvent::RunCompleted {
                duration_ms,
                steps_executed,
            } => format!("{t} duration_ms={duration_ms} steps={steps_executed}"),
            LedgerEvent::RunFailed { error } => format!("{t} error={error}"),
            LedgerEvent::StepStarted {
                step_id, step_kind, ..
            } => format!("{t} step={step_id} kind={step_kind}"),
            LedgerEvent::StepCompleted { step_id } => format!("{t} step={step_id}"),
            LedgerEvent::StepFailed {
                step_id,
                error,
                line,
                ..
            } => match line {
                Some(line) => format!("{t} step={step_id} line={line} error={error}"),
                None => format!("{t} step={step_id} error={error}"),
            },
            LedgerEvent::StepSkipped { step_id, .. } => format!("{t} step={step_id}"),
            LedgerEvent::ActionSimulated {
                step_id,
                action_type,
                ..
            }
            | LedgerEvent::ActionExecuted {
                step_id,
                action_type,
                ..
            } => format!("{t} step={step_id} action={action_type}"),
            LedgerEvent::GuardPassed { guard_id } => format!("{t} guard={guard_id}"),
            LedgerEvent::GuardFailed {
                guard_id, severity, ..
            } => format!("{t} guard={guard_id} severity={severity:?}"),
            LedgerEvent::AdvisoryStarted { step_id, advisor }
            | LedgerEvent::AdvisoryCompleted {
                step_id, advisor, ..
            } => format!("{t} step={step_id} advisor={advisor}"),
            LedgerEvent::CircuitBreakerTripped { breaker, .. } => format!("{t} breaker={breaker}"),
            LedgerEvent::Emit { event, .. } => format!("{t} event={event}"),
            LedgerEvent::Wait {
                duration_secs,
                skipped,
            } => format!("{t} duration={duration_secs}s skipped={skipped}"),
            LedgerEvent::Halt { reason } => format!("{t} reason={reason}"),
        }
    }

    /// Step this event belongs to, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            LedgerEvent::StepStarted { step_id, .. }
            | LedgerEvent::StepCompleted { step_id }
            | LedgerEvent::StepFailed { step_id, .. }
            | LedgerEvent::StepSkipped { step_id, .. }
            | LedgerEvent::ActionSimulated { step_id, .. }
            | LedgerEvent::ActionExecuted { step_id, .. }
            | LedgerEvent::AdvisoryStarted { step_id, .. }
            | LedgerEvent::AdvisoryCompleted { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}
