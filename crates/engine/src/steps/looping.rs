// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loop execution: repeat, for, and until

use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::eval::eval;
use crate::interpreter::Interpreter;
use crate::steps::StepOutcome;
use grim_core::{LoopType, Value};
use tokio::task::JoinSet;

impl Interpreter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn exec_loop(
        &self,
        id: &str,
        loop_type: &LoopType,
        body_steps: &[String],
        max_iterations: u32,
        parallel: bool,
        output_binding: Option<&str>,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let outputs = match loop_type {
            LoopType::Repeat { count } => {
                let iterations = (*count).min(max_iterations);
                let mut outputs = Vec::new();
                for _ in 0..iterations {
                    match self.run_sequence(body_steps, ctx, false).await? {
                        StepOutcome::Halted { reason } => {
                            return Ok(StepOutcome::Halted { reason })
                        }
                        StepOutcome::Completed => {}
                    }
                    outputs.push(self.body_output(body_steps, ctx));
                }
                outputs
            }

            LoopType::For { variable, source } => {
                let value = eval(source, &self.env(ctx)).await?;
                let items = value
                    .as_array()
                    .ok_or_else(|| {
                        StepError::new(
                            "expression",
                            format!(
                                "loop '{id}' source is not iterable ({})",
                                value.type_name()
                            ),
                        )
                    })?
                    .to_vec();
                let capped: Vec<Value> =
                    items.into_iter().take(max_iterations as usize).collect();
                if parallel {
                    let (outputs, halted) = self
                        .parallel_iterations(variable, capped, body_steps, ctx)
                        .await?;
                    if let Some(reason) = halted {
                        return Ok(StepOutcome::Halted { reason });
                    }
                    outputs
                } else {
                    let mut outputs = Vec::new();
                    for item in capped {
                        ctx.bind_variable(variable, item);
                        match self.run_sequence(body_steps, ctx, false).await? {
                            StepOutcome::Halted { reason } => {
                                return Ok(StepOutcome::Halted { reason })
                            }
                            StepOutcome::Completed => {}
                        }
                        outputs.push(self.body_output(body_steps, ctx));
                    }
                    outputs
                }
            }

            LoopType::Until { condition } => {
                let mut outputs = Vec::new();
                let mut satisfied = false;
                for _ in 0..max_iterations {
                    match self.run_sequence(body_steps, ctx, false).await? {
                        StepOutcome::Halted { reason } => {
                            return Ok(StepOutcome::Halted { reason })
                        }
                        StepOutcome::Completed => {}
                    }
                    outputs.push(self.body_output(body_steps, ctx));
                    let value = eval(condition, &self.env(ctx)).await?;
                    if value.is_truthy() {
                        satisfied = true;
                        break;
                    }
                }
                if !satisfied {
                    return Err(StepError::new(
                        "loop_limit",
                        format!(
                            "loop '{id}' hit {max_iterations} iterations with its condition still false"
                        ),
                    ));
                }
                outputs
            }
        };

        let result = Value::Array(outputs);
        if let Some(binding) = output_binding {
            ctx.bind_variable(binding, result.clone());
        }
        ctx.record_output(id, result);
        Ok(StepOutcome::Completed)
    }

    /// Concurrent for-loop iterations, each in a forked variable scope.
    /// Returns the ordered outputs plus a halt reason if any iteration
    /// halted the run.
    async fn parallel_iterations(
        &self,
        variable: &str,
        items: Vec<Value>,
        body_steps: &[String],
        ctx: &ExecutionContext,
    ) -> Result<(Vec<Value>, Option<String>), StepError> {
        let mut set = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let interp = self.clone();
            let scope = ctx.fork_scope();
            let ids = body_steps.to_vec();
            let variable = variable.to_string();
            set.spawn(async move {
                scope.bind_variable(&variable, item);
                let result = interp.run_sequence(&ids, &scope, false).await;
                let output = interp.body_output(&ids, &scope);
                (index, result, output)
            });
        }

        let mut outputs: Vec<(usize, Value)> = Vec::new();
        let mut halted = None;
        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            let Ok((index, result, output)) = joined else {
                continue; // cancelled
            };
            match result {
                Ok(StepOutcome::Halted { reason }) => {
                    halted.get_or_insert(reason);
                    set.abort_all();
                }
                Ok(StepOutcome::Completed) => outputs.push((index, output)),
                Err(e) => {
                    failure.get_or_insert(e);
                    set.abort_all();
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        outputs.sort_by_key(|(index, _)| *index);
        Ok((
            outputs.into_iter().map(|(_, output)| output).collect(),
            halted,
        ))
    }

    /// The value a loop body produced this iteration: the last body
    /// step's output.
    pub(crate) fn body_output(&self, body_steps: &[String], ctx: &ExecutionContext) -> Value {
        body_steps
            .last()
            .and_then(|id| ctx.output(id))
            .unwrap_or(Value::Null)
    }
}
