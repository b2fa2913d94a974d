// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! parallel and pipeline execution.
//!
//! Branches and pmap element tasks are cooperative tokio tasks sharing the
//! run's context and ledger sink. Cancellation (join=any satisfied, or a
//! sibling failing under on_fail=abort) lands at the next suspension
//! point; partial writes of cancelled branches stay, as only try/atomic
//! rolls state back.

use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::eval::eval;
use crate::interpreter::Interpreter;
use crate::steps::StepOutcome;
use grim_core::{
    Branch, Expression, JoinPolicy, ParallelFailMode, PipelineStage, SortOrder, Value,
};
use tokio::task::JoinSet;

/// One branch's terminal state.
enum BranchResult {
    Completed(Value),
    Failed(StepError),
}

impl Interpreter {
    pub(crate) async fn exec_parallel(
        &self,
        id: &str,
        branches: &[Branch],
        join: &JoinPolicy,
        on_fail: ParallelFailMode,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let mut set = JoinSet::new();
        for (index, branch) in branches.iter().enumerate() {
            let interp = self.clone();
            let branch_ctx = ctx.clone();
            let ids = branch.steps.clone();
            set.spawn(async move {
                let result = interp.run_sequence(&ids, &branch_ctx, false).await;
                let value = interp.body_output(&ids, &branch_ctx);
                (index, result, value)
            });
        }

        let needed_successes = match join {
            JoinPolicy::Any { count } => Some(*count as usize),
            _ => None,
        };
        let mut results: Vec<Option<BranchResult>> = branches.iter().map(|_| None).collect();
        let mut successes = 0usize;
        let mut first_failure: Option<StepError> = None;
        let mut halted: Option<String> = None;

        while let Some(joined) = set.join_next().await {
            let Ok((index, result, value)) = joined else {
                continue; // aborted task
            };
            match result {
                Ok(StepOutcome::Halted { reason }) => {
                    // A halt inside any branch halts the whole run.
                    halted.get_or_insert(reason);
                    set.abort_all();
                }
                Ok(StepOutcome::Completed) => {
                    successes += 1;
                    results[index] = Some(BranchResult::Completed(value));
                    if let Some(needed) = needed_successes {
                        if successes >= needed {
                            set.abort_all();
                        }
                    }
                }
                Err(e) => {
                    results[index] = Some(BranchResult::Failed(e.clone()));
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                    if on_fail == ParallelFailMode::Abort {
                        set.abort_all();
                    }
                }
            }
        }

        if let Some(reason) = halted {
            return Ok(StepOutcome::Halted { reason });
        }

        match join {
            JoinPolicy::All => {
                if let Some(e) = first_failure {
                    let failed: Vec<&str> = branches
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| matches!(results[*i], Some(BranchResult::Failed(_))))
                        .map(|(_, b)| b.name.as_str())
                        .collect();
                    return Err(StepError::new(
                        e.kind.clone(),
                        format!("branch(es) {} failed: {}", failed.join(", "), e.message),
                    ));
                }
                let values: Vec<Value> = results
                    .into_iter()
                    .map(|r| match r {
                        Some(BranchResult::Completed(value)) => value,
                        _ => Value::Null,
                    })
                    .collect();
                ctx.record_output(id, Value::Array(values));
                Ok(StepOutcome::Completed)
            }

            JoinPolicy::Any { count } => {
                if successes >= *count as usize {
                    let values: Vec<Value> = results
                        .into_iter()
                        .filter_map(|r| match r {
                            Some(BranchResult::Completed(value)) => Some(value),
                            _ => None,
                        })
                        .collect();
                    ctx.record_output(id, Value::Array(values));
                    Ok(StepOutcome::Completed)
                } else {
                    Err(first_failure.unwrap_or_else(|| {
                        StepError::action_failed(format!(
                            "parallel '{id}' needed {count} successes, got {successes}"
                        ))
                    }))
                }
            }

            JoinPolicy::Best { metric, order } => {
                if first_failure.is_some() && on_fail == ParallelFailMode::Abort {
                    if let Some(e) = first_failure {
                        return Err(e);
                    }
                }
                let mut best: Option<(usize, f64, Value)> = None;
                for (index, result) in results.into_iter().enumerate() {
                    let Some(BranchResult::Completed(value)) = result else {
                        continue;
                    };
                    let score = self.branch_metric(metric, &value, ctx).await?;
                    let better = match (&best, order) {
                        (None, _) => true,
                        (Some((_, current, _)), SortOrder::Desc) => score > *current,
                        (Some((_, current, _)), SortOrder::Asc) => score < *current,
                    };
                    if better {
                        best = Some((index, score, value));
                    }
                }
                let Some((index, score, value)) = best else {
                    return Err(StepError::action_failed(format!(
                        "parallel '{id}' had no successful branch to pick from"
                    )));
                };
                let winner = Value::Object(
                    [
                        (
                            "branch".to_string(),
                            Value::String(branches[index].name.clone()),
                        ),
                        ("metric".to_string(), Value::Number(score)),
                        ("value".to_string(), value),
                    ]
                    .into_iter()
                    .collect(),
                );
                ctx.record_output(id, winner);
                Ok(StepOutcome::Completed)
            }
        }
    }

    /// Evaluate a best-join metric with `result` bound to the branch's
    /// value, in an isolated scope.
    async fn branch_metric(
        &self,
        metric: &Expression,
        value: &Value,
        ctx: &ExecutionContext,
    ) -> Result<f64, StepError> {
        let scope = ctx.fork_scope();
        scope.bind_variable("result", value.clone());
        let score = eval(metric, &self.env(&scope)).await?;
        score.as_number().ok_or_else(|| {
            StepError::new(
                "expression",
                format!("parallel metric is not a number ({})", score.type_name()),
            )
        })
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    pub(crate) async fn exec_pipeline(
        &self,
        id: &str,
        source: &Expression,
        stages: &[PipelineStage],
        output_binding: Option<&str>,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let value = eval(source, &self.env(ctx)).await?;
        let mut items = value
            .as_array()
            .ok_or_else(|| {
                StepError::new(
                    "expression",
                    format!("pipeline '{id}' source is not an array ({})", value.type_name()),
                )
            })?
            .to_vec();

        for stage in stages {
            items = match stage {
                PipelineStage::Map { step } => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.run_element(step, item, ctx).await?);
                    }
                    out
                }
                PipelineStage::Pmap { step } => self.pmap_elements(step, items, ctx).await?,
                PipelineStage::Filter { step } => {
                    let mut out = Vec::new();
                    for item in items {
                        let keep = self.run_element(step, item.clone(), ctx).await?;
                        if keep.is_truthy() {
                            out.push(item);
                        }
                    }
                    out
                }
                PipelineStage::Reduce { step, initial } => {
                    let mut acc = eval(initial, &self.env(ctx)).await?;
                    for item in items {
                        let scope = ctx.fork_scope();
                        scope.bind_variable("acc", acc);
                        scope.bind_variable("item", item);
                        let sub = self.step(step).ok_or_else(|| {
                            StepError::action_failed(format!("unknown stage step '{step}'"))
                        })?;
                        self.execute_step(sub, &scope).await?;
                        acc = scope.output(step).unwrap_or(Value::Null);
                    }
                    // A reduce collapses to its accumulator.
                    vec![acc]
                }
                PipelineStage::Take { count } => {
                    items.truncate(*count as usize);
                    items
                }
                PipelineStage::Skip { count } => {
                    items.drain(..(*count as usize).min(items.len()));
                    items
                }
                PipelineStage::Sort { by, order } => {
                    let mut keyed = Vec::with_capacity(items.len());
                    for item in items {
                        let key = match by {
                            Some(by) => {
                                let scope = ctx.fork_scope();
                                scope.bind_variable("item", item.clone());
                                eval(by, &self.env(&scope)).await?
                            }
                            None => item.clone(),
                        };
                        let key = key.as_number().ok_or_else(|| {
                            StepError::new(
                                "expression",
                                format!("sort key is not a number ({})", key.type_name()),
                            )
                        })?;
                        keyed.push((key, item));
                    }
                    keyed.sort_by(|(a, _), (b, _)| a.total_cmp(b));
                    if *order == SortOrder::Desc {
                        keyed.reverse();
                    }
                    keyed.into_iter().map(|(_, item)| item).collect()
                }
            };
        }

        // A reduce pipeline ends with a single accumulated value.
        let result = if matches!(stages.last(), Some(PipelineStage::Reduce { .. })) {
            items.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(items)
        };
        if let Some(binding) = output_binding {
            ctx.bind_variable(binding, result.clone());
        }
        ctx.record_output(id, result);
        Ok(StepOutcome::Completed)
    }

    /// Run a stage body step with `item` bound in an isolated scope and
    /// return its output.
    async fn run_element(
        &self,
        step_id: &str,
        item: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, StepError> {
        let scope = ctx.fork_scope();
        scope.bind_variable("item", item);
        let step = self
            .step(step_id)
            .ok_or_else(|| StepError::action_failed(format!("unknown stage step '{step_id}'")))?;
        self.execute_step(step, &scope).await?;
        Ok(scope.output(step_id).unwrap_or(Value::Null))
    }

    /// Parallel per-element map, preserving input order.
    async fn pmap_elements(
        &self,
        step_id: &str,
        items: Vec<Value>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Value>, StepError> {
        let mut set = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let interp = self.clone();
            let scope = ctx.fork_scope();
            let step_id = step_id.to_string();
            set.spawn(async move {
                let result = interp.run_element(&step_id, item, &scope).await;
                (index, result)
            });
        }
        let mut out: Vec<(usize, Value)> = Vec::new();
        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            let Ok((index, result)) = joined else {
                continue;
            };
            match result {
                Ok(value) => out.push((index, value)),
                Err(e) => {
                    failure.get_or_insert(e);
                    set.abort_all();
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        out.sort_by_key(|(index, _)| *index);
        Ok(out.into_iter().map(|(_, value)| value).collect())
    }
}
