// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! compute, conditional, wait, and emit executors

use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::eval::eval;
use crate::interpreter::Interpreter;
use crate::steps::StepOutcome;
use grim_core::{Assignment, Expression, LedgerEvent, Value};
use indexmap::IndexMap;

impl Interpreter {
    /// Evaluate each assignment in order, binding results as variables
    /// (mirrored into declared state). The step's output is the last
    /// assignment's value.
    pub(crate) async fn exec_compute(
        &self,
        id: &str,
        assignments: &[Assignment],
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let env = self.env(ctx);
        let mut last = Value::Null;
        for assignment in assignments {
            let value = eval(&assignment.expression, &env).await?;
            ctx.bind_variable(&assignment.variable, value.clone());
            last = value;
        }
        ctx.record_output(id, last);
        Ok(StepOutcome::Completed)
    }

    /// Evaluate the condition (advisory conditions consult the advisor
    /// through the evaluator), then run the selected branch.
    pub(crate) async fn exec_conditional(
        &self,
        condition: &Expression,
        then_steps: &[String],
        else_steps: &[String],
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let value = eval(condition, &self.env(ctx)).await?;
        let branch = if value.is_truthy() {
            then_steps
        } else {
            else_steps
        };
        self.run_sequence(branch, ctx, false).await
    }

    pub(crate) async fn exec_wait(
        &self,
        duration: f64,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let skipped = self.sleep_secs(ctx, duration).await;
        ctx.ledger.record(LedgerEvent::Wait {
            duration_secs: duration,
            skipped,
        });
        Ok(StepOutcome::Completed)
    }

    pub(crate) async fn exec_emit(
        &self,
        event: &str,
        data: &IndexMap<String, Expression>,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let env = self.env(ctx);
        let mut evaluated = IndexMap::new();
        for (name, expression) in data {
            evaluated.insert(name.clone(), eval(expression, &env).await?);
        }
        ctx.ledger.record(LedgerEvent::Emit {
            event: event.to_string(),
            data: evaluated,
        });
        Ok(StepOutcome::Completed)
    }
}
