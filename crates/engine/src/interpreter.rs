// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sequential driver over compiled spell steps.
//!
//! Walks `spell.steps` in authored order, dispatching each step to its
//! executor. Container steps execute their children and then mark every
//! transitive child as executed so the walk never re-runs them standalone.

use crate::breaker::CircuitBreakerManager;
use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::eval::{eval, EvalEnv};
use crate::steps::StepOutcome;
use grim_adapters::{
    ActionExecutor, AdvisorHandler, AdvisoryRequest, NullVenueReader, SimulatedExecutor,
    VenueReader, WalletRef,
};
use grim_core::{
    Clock, ExecutionMode, FailurePolicy, Guard, GuardCheck, GuardPhase, GuardSeverity, IdGen,
    Ledger, LedgerEntry, LedgerEvent, Provenance, RunId, RunMetrics, RunRecord, SpellIR, Step,
    SystemClock, UuidIdGen, Value,
};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::Instrument;

/// In simulate mode, waits longer than this many seconds are skipped.
const SIMULATE_WAIT_THRESHOLD_SECS: f64 = 1.0;

/// Per-run inputs.
#[derive(Default)]
pub struct ExecuteOptions {
    /// Explicit mode wins over the simulate flag and the wallet heuristic.
    pub mode: Option<ExecutionMode>,
    pub simulate: bool,
    pub wallet: Option<WalletRef>,
    /// Parameter overrides (merged over schema defaults).
    pub params: IndexMap<String, Value>,
    /// Persistent state loaded by the caller; merged over schema initial
    /// values, caller wins.
    pub persistent_state: Option<Value>,
    pub trigger: Option<String>,
    pub chain: Option<String>,
    pub advisor_tooling: Option<serde_json::Value>,
    /// Fixed run ID for deterministic tests; generated when absent.
    pub run_id: Option<RunId>,
}

/// What a run produced.
#[derive(Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub halted: bool,
    pub run_id: RunId,
    pub mode: ExecutionMode,
    pub start_time: u64,
    pub end_time: u64,
    /// Milliseconds.
    pub duration: u64,
    pub error: Option<String>,
    pub metrics: RunMetrics,
    /// Persistent state after the run.
    pub final_state: Value,
    pub ledger: Vec<LedgerEntry>,
}

impl ExecutionResult {
    /// Shape this result as a storable run record.
    pub fn run_record(&self, spell_hash: &str, trigger: Option<String>) -> RunRecord {
        RunRecord {
            run_id: self.run_id.clone(),
            timestamp: grim_core::iso8601(self.start_time),
            success: self.success,
            error: self.error.clone(),
            duration: self.duration,
            metrics: self.metrics.clone(),
            final_state: self.final_state.clone(),
            provenance: Some(Provenance {
                spell_hash: spell_hash.to_string(),
                trigger,
                mode: self.mode,
            }),
        }
    }
}

/// The spell interpreter. Cheap to clone; clones share the spell and
/// adapters (parallel branches run on clones).
#[derive(Clone)]
pub struct Interpreter {
    pub(crate) spell: Arc<SpellIR>,
    pub(crate) executor: Arc<dyn ActionExecutor>,
    pub(crate) advisor: Option<Arc<dyn AdvisorHandler>>,
    pub(crate) reader: Arc<dyn VenueReader>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) breaker: Option<Arc<CircuitBreakerManager>>,
    pub(crate) venues: Arc<HashSet<String>>,
    pub(crate) default_advisor: Arc<str>,
    pub(crate) simulate_wait_threshold: f64,
    id_gen: UuidIdGen,
}

impl Interpreter {
    pub fn new(spell: SpellIR) -> Self {
        let venues: HashSet<String> = spell.aliases.iter().map(|a| a.alias.clone()).collect();
        let default_advisor: Arc<str> = spell
            .advisors
            .first()
            .map(|a| a.name.as_str())
            .unwrap_or("default")
            .into();
        Self {
            spell: Arc::new(spell),
            executor: Arc::new(SimulatedExecutor::new()),
            advisor: None,
            reader: Arc::new(NullVenueReader),
            clock: Arc::new(SystemClock),
            breaker: None,
            venues: Arc::new(venues),
            default_advisor,
            simulate_wait_threshold: SIMULATE_WAIT_THRESHOLD_SECS,
            id_gen: UuidIdGen,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn AdvisorHandler>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_reader(mut self, reader: Arc<dyn VenueReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreakerManager>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn spell(&self) -> &SpellIR {
        &self.spell
    }

    pub(crate) fn step(&self, id: &str) -> Option<&Step> {
        self.spell.step(id)
    }

    pub(crate) fn env<'a>(&'a self, ctx: &'a ExecutionContext) -> EvalEnv<'a> {
        EvalEnv {
            ctx,
            venues: &self.venues,
            reader: self.reader.as_ref(),
            advisor: self.advisor.as_deref(),
            default_advisor: &self.default_advisor,
            clock: self.clock.as_ref(),
        }
    }

    // ------------------------------------------------------------------
    // Run driver
    // ------------------------------------------------------------------

    pub async fn execute(&self, mut opts: ExecuteOptions) -> ExecutionResult {
        // Mode resolution: explicit > simulate flag > wallet heuristic >
        // default simulate.
        let mode = opts.mode.unwrap_or(if opts.simulate {
            ExecutionMode::Simulate
        } else if opts.wallet.is_some() {
            ExecutionMode::Live
        } else {
            ExecutionMode::Simulate
        });
        let run_id = opts
            .run_id
            .take()
            .unwrap_or_else(|| RunId::new(self.id_gen.next()));
        let span = tracing::info_span!("run", spell = %self.spell.meta.name, run = %run_id);
        self.execute_inner(opts, mode, run_id).instrument(span).await
    }

    async fn execute_inner(
        &self,
        opts: ExecuteOptions,
        mode: ExecutionMode,
        run_id: RunId,
    ) -> ExecutionResult {
        let start_time = self.clock.now_ms();
        let ledger = Ledger::new(self.spell.id.clone(), run_id.clone(), self.clock.clone());

        // Effective params: schema defaults, caller overrides win.
        let mut params: IndexMap<String, Value> = self
            .spell
            .params
            .iter()
            .filter_map(|p| p.default.clone().map(|v| (p.name.clone(), v)))
            .collect();
        for (name, value) in opts.params {
            params.insert(name, value);
        }

        // Persistent state: schema initial values, caller-loaded state
        // wins.
        let mut persistent: IndexMap<String, Value> = self
            .spell
            .state
            .persistent
            .iter()
            .map(|f| (f.key.clone(), f.initial_value.clone()))
            .collect();
        if let Some(Value::Object(loaded)) = opts.persistent_state {
            for (key, value) in loaded {
                persistent.insert(key, value);
            }
        }

        let mut ctx = ExecutionContext::new(
            run_id.clone(),
            start_time,
            mode,
            &self.spell,
            params,
            persistent,
            ledger,
            opts.trigger.clone(),
        );
        ctx.vault = opts.wallet.map(|w| w.address);
        ctx.chain = opts.chain;
        ctx.advisor_tooling = opts.advisor_tooling;

        ctx.ledger.record(LedgerEvent::RunStarted {
            spell: self.spell.meta.name.clone(),
            mode,
            trigger: opts.trigger,
        });

        if let Err(message) = self.run_guards(GuardPhase::Pre, &ctx).await {
            return self.finish(ctx, start_time, false, false, Some(message));
        }

        let walk = self.run_top_level(&ctx).await;
        match walk {
            Ok(outcome) => {
                let halted = matches!(outcome, StepOutcome::Halted { .. });
                if !halted {
                    if let Err(message) = self.run_guards(GuardPhase::Post, &ctx).await {
                        return self.finish(ctx, start_time, false, false, Some(message));
                    }
                }
                self.finish(ctx, start_time, true, halted, None)
            }
            Err(e) => self.finish(ctx, start_time, false, false, Some(e.to_string())),
        }
    }

    fn finish(
        &self,
        ctx: ExecutionContext,
        start_time: u64,
        success: bool,
        halted: bool,
        error: Option<String>,
    ) -> ExecutionResult {
        let end_time = self.clock.now_ms();
        let metrics = ctx.metrics();
        if success {
            ctx.ledger.record(LedgerEvent::RunCompleted {
                duration_ms: end_time.saturating_sub(start_time),
                steps_executed: metrics.steps_executed,
            });
        } else {
            ctx.ledger.record(LedgerEvent::RunFailed {
                error: error.clone().unwrap_or_else(|| "unknown".to_string()),
            });
        }
        let final_state = ctx.persistent_state();
        let run_id = ctx.run_id.clone();
        let mode = ctx.mode;
        let ledger = ctx.ledger.clone();
        drop(ctx);
        ExecutionResult {
            success,
            halted,
            run_id,
            mode,
            start_time,
            end_time,
            duration: end_time.saturating_sub(start_time),
            error,
            metrics,
            final_state,
            ledger: ledger.into_entries(),
        }
    }

    async fn run_top_level(&self, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        for step in &self.spell.steps {
            // Already executed by a container earlier in this walk.
            if ctx.is_step_executed(step.id()) {
                continue;
            }
            for dep in step.depends_on() {
                if !ctx.is_step_executed(dep) {
                    return Err(StepError::new(
                        "dependency",
                        format!("step '{}' depends on '{dep}' which has not executed", step.id()),
                    ));
                }
            }
            match self.execute_step(step, ctx).await {
                Ok(StepOutcome::Halted { reason }) => {
                    return Ok(StepOutcome::Halted { reason })
                }
                Ok(StepOutcome::Completed) => {}
                Err(e) => self.handle_failure(step, e, ctx, true)?,
            }
        }
        Ok(StepOutcome::Completed)
    }

    /// Execute a list of child steps in order. `top_level` relaxes the
    /// `catch` failure policy (no parent try to hand the error to).
    pub(crate) fn run_sequence<'a>(
        &'a self,
        ids: &'a [String],
        ctx: &'a ExecutionContext,
        top_level: bool,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, StepError>> + Send + 'a>> {
        Box::pin(async move {
            for id in ids {
                let step = self.step(id).ok_or_else(|| {
                    StepError::new("action_failed", format!("unknown step '{id}'"))
                })?;
                match self.execute_step(step, ctx).await {
                    Ok(StepOutcome::Halted { reason }) => {
                        return Ok(StepOutcome::Halted { reason })
                    }
                    Ok(StepOutcome::Completed) => {}
                    Err(e) => self.handle_failure(step, e, ctx, top_level)?,
                }
            }
            Ok(StepOutcome::Completed)
        })
    }

    /// Apply a failed step's `onFailure` policy. `Ok(())` means the walk
    /// continues.
    fn handle_failure(
        &self,
        step: &Step,
        error: StepError,
        ctx: &ExecutionContext,
        top_level: bool,
    ) -> Result<(), StepError> {
        let policy = match step {
            Step::Action { on_failure, .. } => *on_failure,
            _ => FailurePolicy::Revert,
        };
        match policy {
            FailurePolicy::Skip => {
                ctx.ledger.record(LedgerEvent::StepSkipped {
                    step_id: step.id().to_string(),
                    reason: Some(error.to_string()),
                });
                Ok(())
            }
            FailurePolicy::Catch if top_level => Ok(()),
            _ => Err(error),
        }
    }

    /// Dispatch one step. Emits `step_started`/`step_completed`/
    /// `step_failed`, maintains the executed set, and marks container
    /// children so the sequential walk skips them.
    pub(crate) fn execute_step<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, StepError>> + Send + 'a>> {
        let span = tracing::debug_span!("step", id = step.id(), kind = step.kind_name());
        Box::pin(
            async move {
                let id = step.id();
                ctx.ledger.record(LedgerEvent::StepStarted {
                    step_id: id.to_string(),
                    step_kind: step.kind_name().to_string(),
                });

                let result = self.dispatch(step, ctx).await;
                match result {
                    Ok(outcome) => {
                        ctx.mark_step_executed(id);
                        self.mark_children(step, ctx);
                        ctx.increment_steps_executed();
                        ctx.ledger.record(LedgerEvent::StepCompleted {
                            step_id: id.to_string(),
                        });
                        Ok(outcome)
                    }
                    Err(e) => {
                        ctx.increment_errors();
                        let location = self.spell.source_map.get(id);
                        ctx.ledger.record(LedgerEvent::StepFailed {
                            step_id: id.to_string(),
                            error: e.to_string(),
                            line: location.map(|l| l.line),
                            column: location.map(|l| l.column),
                        });
                        Err(e)
                    }
                }
            }
            .instrument(span),
        )
    }

    fn mark_children(&self, step: &Step, ctx: &ExecutionContext) {
        for id in step.child_step_ids() {
            ctx.mark_step_executed(id);
            if let Some(child) = self.step(id) {
                self.mark_children(child, ctx);
            }
        }
    }

    async fn dispatch(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        match step {
            Step::Compute {
                id, assignments, ..
            } => self.exec_compute(id, assignments, ctx).await,
            Step::Conditional {
                condition,
                then_steps,
                else_steps,
                ..
            } => self.exec_conditional(condition, then_steps, else_steps, ctx).await,
            Step::Action {
                id,
                action,
                constraints,
                output_binding,
                ..
            } => {
                self.exec_action(id, action, constraints, output_binding.as_deref(), ctx)
                    .await
            }
            Step::Loop {
                id,
                loop_type,
                body_steps,
                max_iterations,
                parallel,
                output_binding,
                ..
            } => {
                self.exec_loop(
                    id,
                    loop_type,
                    body_steps,
                    *max_iterations,
                    *parallel,
                    output_binding.as_deref(),
                    ctx,
                )
                .await
            }
            Step::Try {
                id,
                try_steps,
                catch_blocks,
                finally_steps,
                ..
            } => {
                self.exec_try(id, try_steps, catch_blocks, finally_steps.as_deref(), ctx)
                    .await
            }
            Step::Parallel {
                id,
                branches,
                join,
                on_fail,
                ..
            } => self.exec_parallel(id, branches, join, *on_fail, ctx).await,
            Step::Pipeline {
                id,
                source,
                stages,
                output_binding,
                ..
            } => {
                self.exec_pipeline(id, source, stages, output_binding.as_deref(), ctx)
                    .await
            }
            Step::Advisory {
                id,
                prompt,
                advisor,
                output,
                timeout,
                fallback,
                output_schema,
                ..
            } => {
                self.exec_advisory(
                    id,
                    prompt,
                    advisor,
                    output.as_deref(),
                    *timeout,
                    fallback,
                    output_schema.as_ref(),
                    ctx,
                )
                .await
            }
            Step::Wait { duration, .. } => self.exec_wait(*duration, ctx).await,
            Step::Emit { event, data, .. } => self.exec_emit(event, data, ctx).await,
            Step::Halt { reason, .. } => {
                ctx.ledger.record(LedgerEvent::Halt {
                    reason: reason.clone(),
                });
                Ok(StepOutcome::Halted {
                    reason: reason.clone(),
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Guards
    // ------------------------------------------------------------------

    /// Run guards for one phase. `Err` carries the abort message.
    async fn run_guards(&self, phase: GuardPhase, ctx: &ExecutionContext) -> Result<(), String> {
        for guard in self.spell.guards.iter().filter(|g| g.phase == phase) {
            let passed = self.evaluate_guard(guard, ctx).await;
            if passed {
                ctx.ledger.record(LedgerEvent::GuardPassed {
                    guard_id: guard.id.clone(),
                });
                continue;
            }
            ctx.ledger.record(LedgerEvent::GuardFailed {
                guard_id: guard.id.clone(),
                severity: guard.severity,
                message: guard.message.clone(),
            });
            let aborts = match (phase, guard.severity) {
                (_, GuardSeverity::Warn) => false,
                (GuardPhase::Pre, _) => true,
                // Post-execution guards abort only on halt.
                (GuardPhase::Post, GuardSeverity::Halt) => true,
                (GuardPhase::Post, _) => false,
            };
            if aborts {
                return Err(guard
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("guard '{}' failed", guard.id)));
            }
            tracing::warn!(guard = %guard.id, "guard failed (non-fatal)");
        }
        Ok(())
    }

    async fn evaluate_guard(&self, guard: &Guard, ctx: &ExecutionContext) -> bool {
        match &guard.check {
            GuardCheck::Expression { expression } => {
                match eval(expression, &self.env(ctx)).await {
                    Ok(value) => value.is_truthy(),
                    Err(e) => {
                        tracing::warn!(guard = %guard.id, error = %e, "guard expression failed");
                        false
                    }
                }
            }
            GuardCheck::Advisory { prompt, advisor } => {
                let Some(handler) = &self.advisor else {
                    // No advisor wired in: the guard cannot be consulted;
                    // pass rather than dead-lock every run.
                    tracing::warn!(guard = %guard.id, "advisory guard skipped (no handler)");
                    return true;
                };
                ctx.increment_advisory_calls();
                let request = AdvisoryRequest {
                    step_id: format!("guard:{}", guard.id),
                    advisor: advisor.clone(),
                    prompt: prompt.clone(),
                    timeout: 30.0,
                    output_schema: None,
                    tooling: ctx.advisor_tooling.clone(),
                };
                match handler.advise(request).await {
                    Ok(value) => value.is_truthy(),
                    Err(e) => {
                        tracing::warn!(guard = %guard.id, error = %e, "advisory guard failed");
                        false
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers for executors
    // ------------------------------------------------------------------

    /// Sleep that honours simulate mode: long waits are skipped. Returns
    /// whether the sleep was skipped.
    pub(crate) async fn sleep_secs(&self, ctx: &ExecutionContext, secs: f64) -> bool {
        if ctx.mode == ExecutionMode::Simulate && secs > self.simulate_wait_threshold {
            tracing::debug!(secs, "wait skipped in simulate mode");
            return true;
        }
        if secs > 0.0 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
        }
        false
    }
}

#[cfg(test)]
#[path = "interpreter_tests.rs"]
mod tests;
