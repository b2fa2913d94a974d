// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action dispatch.
//!
//! Amounts and constraints are evaluated here; the action itself crosses
//! the adapter boundary. The circuit-breaker manager is consulted before
//! dispatch and fed afterwards.

use crate::breaker::{BreakerEventKind, TimestampedEvent};
use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::eval::eval;
use crate::interpreter::Interpreter;
use crate::steps::StepOutcome;
use grim_adapters::{ActionRequest, WalletRef};
use grim_core::{ActionKind, Amount, ExecutionMode, Expression, LedgerEvent, Value};
use indexmap::IndexMap;
use std::time::Duration;

impl Interpreter {
    pub(crate) async fn exec_action(
        &self,
        id: &str,
        action: &ActionKind,
        constraints: &IndexMap<String, Expression>,
        output_binding: Option<&str>,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        // Breaker gate first: a tripped breaker fails the action before
        // anything is dispatched.
        if let Some(breaker) = &self.breaker {
            if let Err((name, reason)) = breaker.check() {
                ctx.ledger.record(LedgerEvent::CircuitBreakerTripped {
                    breaker: name,
                    reason: reason.clone(),
                });
                return Err(StepError::policy_violation(reason));
            }
        }

        let env = self.env(ctx);
        let amount = match action_amount(action) {
            Some(Amount::Max) | None => None,
            Some(Amount::Expr(expression)) => {
                let value = eval(expression, &env).await?;
                Some(value.as_number().ok_or_else(|| {
                    StepError::new(
                        "expression",
                        format!("action '{id}' amount is not a number ({})", value.type_name()),
                    )
                })?)
            }
        };

        let mut evaluated_constraints = IndexMap::new();
        for (key, expression) in constraints {
            evaluated_constraints.insert(key.clone(), eval(expression, &env).await?);
        }
        let timeout_secs = evaluated_constraints
            .get("timeout")
            .and_then(Value::as_number);

        let request = ActionRequest {
            step_id: id.to_string(),
            action: action.clone(),
            amount,
            constraints: evaluated_constraints,
            mode: ctx.mode,
            wallet: ctx.vault.clone().map(|address| WalletRef { address }),
        };

        let call = self.executor.execute(request);
        let outcome = match timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs_f64(secs), call)
                .await
                .map_err(|_| {
                    StepError::deadline_exceeded(format!("action '{id}' timed out after {secs}s"))
                })??,
            None => call.await?,
        };

        ctx.increment_actions_executed();
        ctx.add_gas_used(outcome.gas_used);
        let event = match ctx.mode {
            ExecutionMode::Simulate => LedgerEvent::ActionSimulated {
                step_id: id.to_string(),
                action_type: action.type_name().to_string(),
                venue: action.venue().map(str::to_string),
                gas_used: outcome.gas_used.to_string(),
            },
            ExecutionMode::Live => LedgerEvent::ActionExecuted {
                step_id: id.to_string(),
                action_type: action.type_name().to_string(),
                venue: action.venue().map(str::to_string),
                tx_hash: outcome.tx_hash.clone(),
                gas_used: outcome.gas_used.to_string(),
            },
        };
        ctx.ledger.record(event);

        if let Some(breaker) = &self.breaker {
            breaker.record(TimestampedEvent {
                timestamp_ms: self.clock.now_ms(),
                kind: BreakerEventKind::Gas,
                value: outcome.gas_used as f64,
            });
        }

        if let Some(binding) = output_binding {
            ctx.bind_variable(binding, outcome.value.clone());
        }
        ctx.record_output(id, outcome.value);
        Ok(StepOutcome::Completed)
    }
}

/// The amount field of an action, when the kind carries one.
fn action_amount(action: &ActionKind) -> Option<&Amount> {
    match action {
        ActionKind::Lend { amount, .. }
        | ActionKind::Withdraw { amount, .. }
        | ActionKind::Borrow { amount, .. }
        | ActionKind::Repay { amount, .. }
        | ActionKind::Stake { amount, .. }
        | ActionKind::Unstake { amount, .. }
        | ActionKind::Swap { amount, .. }
        | ActionKind::Bridge { amount, .. }
        | ActionKind::Transfer { amount, .. } => Some(amount),
        ActionKind::Claim { .. } | ActionKind::Custom { .. } => None,
    }
}
