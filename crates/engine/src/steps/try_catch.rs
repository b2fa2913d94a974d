// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! try / atomic execution.
//!
//! A snapshot of mutable state is taken on entry. Action-style catches
//! (skip, halt, rollback, retry) restore it before applying — the block is
//! atomic with respect to in-process state. Catches with handler steps run
//! against the partial state instead, so they can inspect it. On-chain
//! effects are never reversed; `rollback` propagates the failure so the
//! run aborts.

use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::interpreter::Interpreter;
use crate::steps::StepOutcome;
use grim_core::{BackoffKind, CatchAction, CatchBlock, LedgerEvent, RetrySpec};

impl Interpreter {
    pub(crate) async fn exec_try(
        &self,
        id: &str,
        try_steps: &[String],
        catch_blocks: &[CatchBlock],
        finally_steps: Option<&[String]>,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let snapshot = ctx.snapshot();

        let result = self.run_sequence(try_steps, ctx, false).await;
        let error = match result {
            Ok(outcome) => {
                self.run_finally(finally_steps, ctx).await?;
                return Ok(outcome);
            }
            Err(e) => e,
        };

        let matched = catch_blocks.iter().find(|c| error.matches(&c.error_type));
        let Some(block) = matched else {
            self.run_finally(finally_steps, ctx).await?;
            return Err(error);
        };
        tracing::debug!(step = id, kind = %error.kind, "caught");

        // Handler steps run against the partial state; everything else is
        // atomic and restores the snapshot first.
        if let Some(steps) = &block.steps {
            let outcome = self.run_sequence(steps, ctx, false).await?;
            self.run_finally(finally_steps, ctx).await?;
            return Ok(outcome);
        }

        match block.action.unwrap_or(CatchAction::Rollback) {
            CatchAction::Skip => {
                ctx.restore(&snapshot);
                ctx.ledger.record(LedgerEvent::StepSkipped {
                    step_id: id.to_string(),
                    reason: Some(error.to_string()),
                });
                self.run_finally(finally_steps, ctx).await?;
                Ok(StepOutcome::Completed)
            }
            CatchAction::Halt => {
                ctx.restore(&snapshot);
                self.run_finally(finally_steps, ctx).await?;
                Ok(StepOutcome::Halted {
                    reason: error.to_string(),
                })
            }
            CatchAction::Rollback => {
                ctx.restore(&snapshot);
                self.run_finally(finally_steps, ctx).await?;
                Err(error)
            }
            CatchAction::Retry => {
                let spec = block.retry.clone().unwrap_or_default();
                let result = self
                    .retry_steps(try_steps, &snapshot, &spec, error, ctx)
                    .await;
                self.run_finally(finally_steps, ctx).await?;
                result
            }
        }
    }

    /// Re-run the try body per the retry spec. The first failed attempt
    /// has already happened; this drives the remaining ones.
    async fn retry_steps(
        &self,
        try_steps: &[String],
        snapshot: &crate::context::ContextSnapshot,
        spec: &RetrySpec,
        first_error: StepError,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let mut last_error = first_error;
        for attempt in 1..spec.max_attempts {
            let delay = backoff_delay(spec, attempt);
            if delay > 0.0 {
                self.sleep_secs(ctx, delay).await;
            }
            ctx.restore(snapshot);
            ctx.increment_retries();
            tracing::debug!(attempt, "retrying");
            match self.run_sequence(try_steps, ctx, false).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    async fn run_finally(
        &self,
        finally_steps: Option<&[String]>,
        ctx: &ExecutionContext,
    ) -> Result<(), StepError> {
        if let Some(steps) = finally_steps {
            self.run_sequence(steps, ctx, false).await?;
        }
        Ok(())
    }
}

/// Delay before retry `attempt` (1-based), capped at `max_backoff`.
fn backoff_delay(spec: &RetrySpec, attempt: u32) -> f64 {
    let raw = match spec.backoff {
        BackoffKind::None => 0.0,
        BackoffKind::Linear => spec.backoff_base * attempt as f64,
        BackoffKind::Exponential => spec.backoff_base * 2f64.powi(attempt as i32 - 1),
    };
    raw.min(spec.max_backoff)
}
