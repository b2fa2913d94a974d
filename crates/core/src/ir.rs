// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical IR consumed by the interpreter.
//!
//! The IR is a flat, content-addressed artifact: every step lives in
//! `SpellIR::steps` and container steps reference their children by ID.
//! Serialization is the persisted JSON contract.

use crate::expr::Expression;
use crate::id::SpellId;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cron string a `hourly` trigger lowers to.
pub const HOURLY_CRON: &str = "0 * * * *";
/// Cron string a `daily` trigger lowers to.
pub const DAILY_CRON: &str = "0 0 * * *";

/// Error kinds a `catch` block can name; anything else is reduced to `"*"`.
pub const CATCHABLE_ERROR_KINDS: &[&str] = &[
    "deadline_exceeded",
    "policy_violation",
    "insufficient_funds",
    "slippage_exceeded",
    "expression",
    "action_failed",
    "network",
    "*",
];

/// A compiled spell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellIR {
    pub id: SpellId,
    pub version: String,
    pub meta: SpellMeta,
    #[serde(default)]
    pub aliases: Vec<VenueAlias>,
    #[serde(default)]
    pub assets: Vec<AssetDef>,
    #[serde(default)]
    pub skills: Vec<SkillDef>,
    #[serde(default)]
    pub advisors: Vec<AdvisorDef>,
    #[serde(default)]
    pub params: Vec<ParamDef>,
    #[serde(default)]
    pub state: StateSchema,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub guards: Vec<Guard>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Step ID → source position, for error enrichment. Omitted when empty.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_map: BTreeMap<String, SourceLocation>,
}

impl SpellIR {
    /// Look up a step by ID.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id() == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// ISO-8601 creation timestamp of the artifact.
    pub created: String,
    /// 8 lowercase hex digits derived from the canonical source document.
    pub hash: String,
}

/// Position in the original spell source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

/// A venue alias, flattened from the `venues` section groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueAlias {
    pub alias: String,
    pub chain: String,
    pub address: String,
    /// Group name the alias was declared under (e.g. `lending`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDef {
    pub symbol: String,
    pub chain: String,
    pub address: String,
    pub decimals: u32,
}

/// A reusable capability binding. Kept loose: adapters and default
/// constraints are venue-specific configuration the engine passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Number,
    Bool,
    String,
    Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSchema {
    #[serde(default)]
    pub persistent: Vec<StateField>,
    #[serde(default)]
    pub ephemeral: Vec<StateField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateField {
    pub key: String,
    pub initial_value: Value,
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// When a spell is meant to run. Triggers are metadata: scheduling is the
/// host's responsibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Schedule {
        cron: String,
    },
    Condition {
        expression: Expression,
        /// Poll interval in seconds.
        poll_interval: f64,
    },
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Expression>,
    },
}

impl Trigger {
    /// Human summary for run provenance and logs.
    pub fn describe(&self) -> String {
        match self {
            Trigger::Manual => "manual".to_string(),
            Trigger::Schedule { cron } => format!("schedule({cron})"),
            Trigger::Condition { poll_interval, .. } => {
                format!("condition(every {poll_interval}s)")
            }
            Trigger::Event { event, .. } => format!("event({event})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardSeverity {
    Warn,
    Halt,
    Revert,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardPhase {
    #[default]
    Pre,
    Post,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardCheck {
    Expression { expression: Expression },
    Advisory { prompt: String, advisor: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guard {
    pub id: String,
    pub check: GuardCheck,
    pub severity: GuardSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub phase: GuardPhase,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// An action amount: an expression, or the `"max"` sentinel meaning "the
/// whole available balance" (resolved by the venue adapter).
#[derive(Debug, Clone, PartialEq)]
pub enum Amount {
    Max,
    Expr(Expression),
}

impl Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Amount::Max => serializer.serialize_str("max"),
            Amount::Expr(expr) => expr.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        if raw.as_str() == Some("max") {
            return Ok(Amount::Max);
        }
        let expr = Expression::deserialize(raw).map_err(serde::de::Error::custom)?;
        Ok(Amount::Expr(expr))
    }
}

/// Typed on-chain actions, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Lend {
        venue: String,
        asset: String,
        amount: Amount,
    },
    Withdraw {
        venue: String,
        asset: String,
        amount: Amount,
    },
    Borrow {
        venue: String,
        asset: String,
        amount: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collateral: Option<String>,
    },
    Repay {
        venue: String,
        asset: String,
        amount: Amount,
    },
    Stake {
        venue: String,
        asset: String,
        amount: Amount,
    },
    Unstake {
        venue: String,
        asset: String,
        amount: Amount,
    },
    Claim {
        venue: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        asset: Option<String>,
    },
    Swap {
        venue: String,
        from_asset: String,
        to_asset: String,
        amount: Amount,
    },
    Bridge {
        asset: String,
        amount: Amount,
        to_chain: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        venue: Option<String>,
    },
    Transfer {
        asset: String,
        amount: Amount,
        to: Expression,
    },
    /// Any method name outside the fixed mapping table passes through.
    Custom {
        venue: String,
        method: String,
        #[serde(default)]
        args: Vec<Expression>,
    },
}

impl ActionKind {
    pub fn type_name(&self) -> &str {
        match self {
            ActionKind::Lend { .. } => "lend",
            ActionKind::Withdraw { .. } => "withdraw",
            ActionKind::Borrow { .. } => "borrow",
            ActionKind::Repay { .. } => "repay",
            ActionKind::Stake { .. } => "stake",
            ActionKind::Unstake { .. } => "unstake",
            ActionKind::Claim { .. } => "claim",
            ActionKind::Swap { .. } => "swap",
            ActionKind::Bridge { .. } => "bridge",
            ActionKind::Transfer { .. } => "transfer",
            ActionKind::Custom { method, .. } => method,
        }
    }

    pub fn venue(&self) -> Option<&str> {
        match self {
            ActionKind::Lend { venue, .. }
            | ActionKind::Withdraw { venue, .. }
            | ActionKind::Borrow { venue, .. }
            | ActionKind::Repay { venue, .. }
            | ActionKind::Stake { venue, .. }
            | ActionKind::Unstake { venue, .. }
            | ActionKind::Claim { venue, .. }
            | ActionKind::Swap { venue, .. }
            | ActionKind::Custom { venue, .. } => Some(venue),
            ActionKind::Bridge { venue, .. } => venue.as_deref(),
            ActionKind::Transfer { .. } => None,
        }
    }
}

/// Per-step failure policy. `Catch` means a parent `try` owns the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Halt,
    #[default]
    Revert,
    Skip,
    Catch,
}

// ---------------------------------------------------------------------------
// Try / retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchAction {
    Skip,
    Halt,
    Rollback,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    None,
    Linear,
    Exponential,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    1.0
}

fn default_max_backoff() -> f64 {
    60.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySpec {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Base delay in seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    /// Delay cap in seconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff: f64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffKind::None,
            backoff_base: default_backoff_base(),
            max_backoff: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchBlock {
    /// Error kind this block matches; `"*"` matches everything.
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<CatchAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
}

// ---------------------------------------------------------------------------
// Loops, parallel, pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopType {
    Repeat { count: u32 },
    For { variable: String, source: Expression },
    Until { condition: Expression },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum JoinPolicy {
    #[default]
    All,
    Any {
        count: u32,
    },
    Best {
        metric: Expression,
        #[serde(default)]
        order: SortOrder,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelFailMode {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PipelineStage {
    Map { step: String },
    Pmap { step: String },
    Filter { step: String },
    Reduce { step: String, initial: Expression },
    Take { count: u64 },
    Skip { count: u64 },
    Sort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<Expression>,
        #[serde(default)]
        order: SortOrder,
    },
}

impl PipelineStage {
    /// Body step referenced by this stage, if it has one.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            PipelineStage::Map { step }
            | PipelineStage::Pmap { step }
            | PipelineStage::Filter { step }
            | PipelineStage::Reduce { step, .. } => Some(step),
            PipelineStage::Take { .. } | PipelineStage::Skip { .. } | PipelineStage::Sort { .. } => {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Advisory
// ---------------------------------------------------------------------------

/// Fallback for an advisory step when the advisor fails or is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdvisoryFallback {
    Literal { value: Value },
    Expression { expression: Expression },
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub variable: String,
    pub expression: Expression,
}

/// One unit of execution. Container variants reference children by step ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Compute {
        id: String,
        assignments: Vec<Assignment>,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Conditional {
        id: String,
        condition: Expression,
        #[serde(default)]
        then_steps: Vec<String>,
        #[serde(default)]
        else_steps: Vec<String>,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Action {
        id: String,
        action: ActionKind,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        constraints: IndexMap<String, Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_binding: Option<String>,
        #[serde(default)]
        on_failure: FailurePolicy,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Loop {
        id: String,
        loop_type: LoopType,
        body_steps: Vec<String>,
        max_iterations: u32,
        #[serde(default)]
        parallel: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_binding: Option<String>,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Try {
        id: String,
        try_steps: Vec<String>,
        catch_blocks: Vec<CatchBlock>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finally_steps: Option<Vec<String>>,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Parallel {
        id: String,
        branches: Vec<Branch>,
        #[serde(default)]
        join: JoinPolicy,
        #[serde(default)]
        on_fail: ParallelFailMode,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Pipeline {
        id: String,
        source: Expression,
        stages: Vec<PipelineStage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_binding: Option<String>,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Advisory {
        id: String,
        prompt: String,
        advisor: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        /// Seconds.
        timeout: f64,
        fallback: AdvisoryFallback,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_schema: Option<serde_json::Value>,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Wait {
        id: String,
        /// Seconds.
        duration: f64,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Emit {
        id: String,
        event: String,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        data: IndexMap<String, Expression>,
        #[serde(default)]
        depends_on: Vec<String>,
    },
    Halt {
        id: String,
        reason: String,
        #[serde(default)]
        depends_on: Vec<String>,
    },
}

impl Step {
    pub fn id(&self) -> &str {
        match self {
            Step::Compute { id, .. }
            | Step::Conditional { id, .. }
            | Step::Action { id, .. }
            | Step::Loop { id, .. }
            | Step::Try { id, .. }
            | Step::Parallel { id, .. }
            | Step::Pipeline { id, .. }
            | Step::Advisory { id, .. }
            | Step::Wait { id, .. }
            | Step::Emit { id, .. }
            | Step::Halt { id, .. } => id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Step::Compute { .. } => "compute",
            Step::Conditional { .. } => "conditional",
            Step::Action { .. } => "action",
            Step::Loop { .. } => "loop",
            Step::Try { .. } => "try",
            Step::Parallel { .. } => "parallel",
            Step::Pipeline { .. } => "pipeline",
            Step::Advisory { .. } => "advisory",
            Step::Wait { .. } => "wait",
            Step::Emit { .. } => "emit",
            Step::Halt { .. } => "halt",
        }
    }

    pub fn depends_on(&self) -> &[String] {
        match self {
            Step::Compute { depends_on, .. }
            | Step::Conditional { depends_on, .. }
            | Step::Action { depends_on, .. }
            | Step::Loop { depends_on, .. }
            | Step::Try { depends_on, .. }
            | Step::Parallel { depends_on, .. }
            | Step::Pipeline { depends_on, .. }
            | Step::Advisory { depends_on, .. }
            | Step::Wait { depends_on, .. }
            | Step::Emit { depends_on, .. }
            | Step::Halt { depends_on, .. } => depends_on,
        }
    }

    /// Direct child step IDs of a container step, in declaration order.
    ///
    /// The interpreter marks these executed after the container runs so they
    /// are not re-run standalone during the sequential walk.
    pub fn child_step_ids(&self) -> Vec<&str> {
        match self {
            Step::Conditional {
                then_steps,
                else_steps,
                ..
            } => then_steps
                .iter()
                .chain(else_steps.iter())
                .map(String::as_str)
                .collect(),
            Step::Loop { body_steps, .. } => body_steps.iter().map(String::as_str).collect(),
            Step::Try {
                try_steps,
                catch_blocks,
                finally_steps,
                ..
            } => try_steps
                .iter()
                .chain(catch_blocks.iter().filter_map(|c| c.steps.as_ref()).flatten())
                .chain(finally_steps.iter().flatten())
                .map(String::as_str)
                .collect(),
            Step::Parallel { branches, .. } => branches
                .iter()
                .flat_map(|b| b.steps.iter())
                .map(String::as_str)
                .collect(),
            Step::Pipeline { stages, .. } => {
                stages.iter().filter_map(PipelineStage::step_id).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "ir_tests.rs"]
mod tests;
