// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action execution boundary.
//!
//! The interpreter hands a fully-evaluated action request to an executor;
//! wallets, transaction builders, and venue SDKs live on the other side.

use async_trait::async_trait;
use grim_core::{ActionKind, ExecutionMode, Value};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Opaque reference to a signing wallet. Key material never crosses this
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRef {
    pub address: String,
}

/// Errors an action executor can surface. The variant maps to the error
/// kind try/catch blocks match on.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action rejected: {0}")]
    Rejected(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("slippage exceeded: {0}")]
    SlippageExceeded(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("deadline exceeded after {0}s")]
    DeadlineExceeded(f64),
}

impl ActionError {
    /// Error kind as seen by catch blocks.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Rejected(_) => "action_failed",
            ActionError::InsufficientFunds(_) => "insufficient_funds",
            ActionError::SlippageExceeded(_) => "slippage_exceeded",
            ActionError::Network(_) => "network",
            ActionError::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }
}

/// A fully-evaluated action, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub step_id: String,
    pub action: ActionKind,
    /// Evaluated amount, when the action carries one. `None` means the
    /// `max` sentinel: the adapter resolves the full balance.
    pub amount: Option<f64>,
    /// Evaluated constraint values (`max_slippage`, `min_output`, ...).
    pub constraints: IndexMap<String, Value>,
    pub mode: ExecutionMode,
    pub wallet: Option<WalletRef>,
}

/// What came back from the chain (or the simulator).
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub receipt: Option<serde_json::Value>,
    pub gas_used: u128,
    /// Value bound to the step's output binding.
    pub value: Value,
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: ActionRequest) -> Result<ActionOutcome, ActionError>;
}

/// Flat simulated gas cost per action kind.
fn simulated_gas(action: &ActionKind) -> u128 {
    match action.type_name() {
        "lend" => 180_000,
        "withdraw" => 120_000,
        "borrow" => 250_000,
        "repay" => 150_000,
        "stake" | "unstake" => 90_000,
        "claim" => 60_000,
        "swap" => 210_000,
        "bridge" => 400_000,
        "transfer" => 21_000,
        _ => 100_000,
    }
}

/// Deterministic executor used in simulate mode.
///
/// Succeeds with a fabricated transaction hash and a flat gas charge per
/// action kind. Failure injection (`fail_on`) lets tests exercise the
/// try/catch and circuit-breaker paths.
#[derive(Default)]
pub struct SimulatedExecutor {
    counter: AtomicU64,
    fail_on: Mutex<HashMap<String, String>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every action of `action_type` fail with the given error kind
    /// (one of the catchable kinds, e.g. `slippage_exceeded`).
    pub fn fail_on(&self, action_type: &str, error_kind: &str) {
        self.fail_on
            .lock()
            .insert(action_type.to_string(), error_kind.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_on.lock().clear();
    }
}

#[async_trait]
impl ActionExecutor for SimulatedExecutor {
    async fn execute(&self, request: ActionRequest) -> Result<ActionOutcome, ActionError> {
        let action_type = request.action.type_name().to_string();
        if let Some(kind) = self.fail_on.lock().get(&action_type) {
            return Err(match kind.as_str() {
                "insufficient_funds" => {
                    ActionError::InsufficientFunds(format!("simulated for {action_type}"))
                }
                "slippage_exceeded" => {
                    ActionError::SlippageExceeded(format!("simulated for {action_type}"))
                }
                "network" => ActionError::Network(format!("simulated for {action_type}")),
                "deadline_exceeded" => ActionError::DeadlineExceeded(0.0),
                _ => ActionError::Rejected(format!("simulated for {action_type}")),
            });
        }

        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let gas_used = simulated_gas(&request.action);
        tracing::debug!(step = %request.step_id, action = %action_type, gas = gas_used, "simulated");
        Ok(ActionOutcome {
            success: true,
            tx_hash: Some(format!("0x{:064x}", seq + 1)),
            receipt: None,
            gas_used,
            value: Value::Object(
                [
                    ("success".to_string(), Value::Bool(true)),
                    (
                        "amount".to_string(),
                        request.amount.map(Value::Number).unwrap_or(Value::Null),
                    ),
                ]
                .into_iter()
                .collect(),
            ),
        })
    }
}

/// Recording executor for tests: replays queued outcomes (success by
/// default) and remembers every request.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct FakeExecutor {
    requests: Mutex<Vec<ActionRequest>>,
    queued: Mutex<Vec<Result<ActionOutcome, ActionError>>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome; consumed in FIFO order.
    pub fn push_outcome(&self, outcome: Result<ActionOutcome, ActionError>) {
        self.queued.lock().push(outcome);
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl ActionExecutor for FakeExecutor {
    async fn execute(&self, request: ActionRequest) -> Result<ActionOutcome, ActionError> {
        self.requests.lock().push(request);
        let mut queued = self.queued.lock();
        if queued.is_empty() {
            Ok(ActionOutcome {
                success: true,
                tx_hash: Some("0xfake".to_string()),
                receipt: None,
                gas_used: 21_000,
                value: Value::Bool(true),
            })
        } else {
            queued.remove(0)
        }
    }
}
