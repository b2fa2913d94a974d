// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SpellSource → IR generation.
//!
//! Validation errors are collected, not thrown: the generator walks the
//! whole document and reports everything it finds. On any error the IR is
//! withheld.

use crate::exprparse::parse_expression;
use crate::source::{SpellSource, SOURCE_LOCATION_KEY};
use grim_core::{
    content_hash, ActionKind, AdvisorDef, AdvisoryFallback, Amount, AssetDef, Assignment, Branch,
    CatchAction, CatchBlock, Expression, FailurePolicy, Guard, GuardCheck, GuardPhase,
    GuardSeverity, JoinPolicy, LoopType, ParallelFailMode, ParamDef, ParamType, PipelineStage,
    RetrySpec, SkillDef, SortOrder, SourceLocation, SpellIR, SpellId, SpellMeta, StateField,
    StateSchema, Step, Trigger, Value, VenueAlias, CATCHABLE_ERROR_KINDS,
};
use indexmap::IndexMap;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationWarning {
    pub code: String,
    pub message: String,
}

/// Result of IR generation. `ir` is present iff `errors` is empty.
#[derive(Debug)]
pub struct GenerateOutput {
    pub ir: Option<SpellIR>,
    pub errors: Vec<CompilationError>,
    pub warnings: Vec<CompilationWarning>,
}

impl GenerateOutput {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Generate IR stamped with the current time.
pub fn generate(source: &SpellSource) -> GenerateOutput {
    let created = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    generate_at(source, created)
}

/// Generate IR with an explicit creation timestamp (deterministic builds
/// and tests).
pub fn generate_at(source: &SpellSource, created: String) -> GenerateOutput {
    Generator::default().run(source, created)
}

#[derive(Default)]
struct Generator {
    errors: Vec<CompilationError>,
    warnings: Vec<CompilationWarning>,
    source_map: BTreeMap<String, SourceLocation>,
}

impl Generator {
    fn error(&mut self, code: &str, message: impl Into<String>) {
        self.errors.push(CompilationError {
            code: code.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, code: &str, message: impl Into<String>) {
        self.warnings.push(CompilationWarning {
            code: code.to_string(),
            message: message.into(),
        });
    }

    fn run(mut self, source: &SpellSource, created: String) -> GenerateOutput {
        let span = tracing::debug_span!("irgen", spell = %source.spell);
        let _guard = span.enter();

        let canonical = serde_json::to_value(source).unwrap_or(Json::Null);
        let hash = content_hash(&canonical);

        let aliases = source
            .venues
            .iter()
            .map(|(alias, v)| VenueAlias {
                alias: alias.clone(),
                chain: v.chain.clone(),
                address: v.address.clone(),
                label: v.label.clone(),
            })
            .collect();

        let assets = source
            .assets
            .iter()
            .map(|(symbol, a)| AssetDef {
                symbol: symbol.clone(),
                chain: a.chain.clone(),
                address: a.address.clone(),
                decimals: a.decimals,
            })
            .collect();

        let skills = source
            .skills
            .iter()
            .map(|(name, config)| SkillDef {
                name: name.clone(),
                venue: config
                    .get("venue")
                    .and_then(Json::as_str)
                    .map(str::to_string),
                config: config.clone(),
            })
            .collect();

        let advisors = source
            .advisors
            .iter()
            .map(|(name, config)| AdvisorDef {
                name: name.clone(),
                model: config
                    .get("model")
                    .and_then(Json::as_str)
                    .map(str::to_string),
                config: config.clone(),
            })
            .collect();

        let params = source
            .params
            .iter()
            .map(|(name, value)| self.param_def(name, value))
            .collect();

        let state = StateSchema {
            persistent: state_fields(&source.state.persistent),
            ephemeral: state_fields(&source.state.ephemeral),
        };

        let triggers = self.triggers(source.trigger.as_ref());
        let steps = self.steps(&source.steps);
        let guards = self.guards(source);

        self.check_references(&steps);

        if !self.errors.is_empty() {
            return GenerateOutput {
                ir: None,
                errors: self.errors,
                warnings: self.warnings,
            };
        }

        let ir = SpellIR {
            id: SpellId::new(format!("{}-{}", source.spell, hash)),
            version: source.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
            meta: SpellMeta {
                name: source.spell.clone(),
                description: source.description.clone(),
                created,
                hash,
            },
            aliases,
            assets,
            skills,
            advisors,
            params,
            state,
            steps,
            guards,
            triggers,
            source_map: self.source_map,
        };
        GenerateOutput {
            ir: Some(ir),
            errors: self.errors,
            warnings: self.warnings,
        }
    }

    // ------------------------------------------------------------------
    // Params / triggers / guards
    // ------------------------------------------------------------------

    fn param_def(&mut self, name: &str, value: &Json) -> ParamDef {
        // Extended form carries explicit type/description.
        if let Some(obj) = value.as_object() {
            let has_ext_keys = obj.contains_key("value")
                || obj.contains_key("default")
                || obj.contains_key("type");
            if has_ext_keys {
                let default = obj.get("value").or_else(|| obj.get("default"));
                let param_type = obj
                    .get("type")
                    .and_then(Json::as_str)
                    .map(parse_param_type)
                    .unwrap_or_else(|| default.map(infer_param_type).unwrap_or(ParamType::String));
                return ParamDef {
                    name: name.to_string(),
                    param_type,
                    default: default.cloned().map(Value::from),
                    description: obj
                        .get("description")
                        .and_then(Json::as_str)
                        .map(str::to_string),
                };
            }
        }
        ParamDef {
            name: name.to_string(),
            param_type: infer_param_type(value),
            default: Some(Value::from(value.clone())),
            description: None,
        }
    }

    fn triggers(&mut self, trigger: Option<&Json>) -> Vec<Trigger> {
        let Some(trigger) = trigger else {
            return Vec::new();
        };
        if let Some(list) = trigger.get("any").and_then(Json::as_array) {
            return list.iter().filter_map(|t| self.trigger(t)).collect();
        }
        self.trigger(trigger).into_iter().collect()
    }

    fn trigger(&mut self, value: &Json) -> Option<Trigger> {
        if value.get("type").and_then(Json::as_str) == Some("manual") {
            return Some(Trigger::Manual);
        }
        if let Some(cron) = value.get("schedule").and_then(Json::as_str) {
            return Some(Trigger::Schedule {
                cron: cron.to_string(),
            });
        }
        if let Some(condition) = value.get("condition").and_then(Json::as_str) {
            let expression = self.expr(condition, "trigger condition")?;
            let poll_interval = value.get("every").and_then(Json::as_f64).unwrap_or(60.0);
            return Some(Trigger::Condition {
                expression,
                poll_interval,
            });
        }
        if let Some(event) = value.get("event").and_then(Json::as_str) {
            let filter = match value.get("where").and_then(Json::as_str) {
                Some(text) => Some(self.expr(text, "event filter")?),
                None => None,
            };
            return Some(Trigger::Event {
                event: event.to_string(),
                filter,
            });
        }
        self.warn("UNKNOWN_TRIGGER", format!("unrecognized trigger {value}"));
        None
    }

    fn guards(&mut self, source: &SpellSource) -> Vec<Guard> {
        let mut out = Vec::new();
        for guard in &source.guards {
            if guard.id.is_empty() {
                self.error("MISSING_GUARD_ID", "guard with empty id");
                continue;
            }
            if guard.check.is_empty() {
                self.error(
                    "MISSING_GUARD_CHECK",
                    format!("guard '{}' has no check", guard.id),
                );
                continue;
            }
            let check = match &guard.advisor {
                Some(advisor) => GuardCheck::Advisory {
                    prompt: guard.check.clone(),
                    advisor: advisor.clone(),
                },
                None => match self.expr(&guard.check, &format!("guard '{}'", guard.id)) {
                    Some(expression) => GuardCheck::Expression { expression },
                    None => continue,
                },
            };
            let severity = match guard.severity.as_str() {
                "warn" => GuardSeverity::Warn,
                "halt" => GuardSeverity::Halt,
                "revert" => GuardSeverity::Revert,
                "pause" => GuardSeverity::Pause,
                other => {
                    self.error(
                        "INVALID_GUARD_SEVERITY",
                        format!("guard '{}' has unknown severity '{other}'", guard.id),
                    );
                    continue;
                }
            };
            let phase = match guard.phase.as_deref() {
                None | Some("pre") => GuardPhase::Pre,
                Some("post") => GuardPhase::Post,
                Some(other) => {
                    self.error(
                        "INVALID_GUARD_PHASE",
                        format!("guard '{}' has unknown phase '{other}'", guard.id),
                    );
                    continue;
                }
            };
            out.push(Guard {
                id: guard.id.clone(),
                check,
                severity,
                message: guard.message.clone(),
                phase,
            });
        }
        out
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    fn steps(&mut self, raw_steps: &[Json]) -> Vec<Step> {
        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for raw in raw_steps {
            let Some(id) = raw.get("id").and_then(Json::as_str).map(str::to_string) else {
                self.error("MISSING_STEP_ID", format!("step without id: {raw}"));
                continue;
            };
            if !seen.insert(id.clone()) {
                self.error("DUPLICATE_STEP_ID", format!("duplicate step id '{id}'"));
                continue;
            }
            if let Some(location) = raw.get(SOURCE_LOCATION_KEY) {
                if let (Some(line), Some(column)) = (
                    location.get("line").and_then(Json::as_u64),
                    location.get("column").and_then(Json::as_u64),
                ) {
                    self.source_map.insert(
                        id.clone(),
                        SourceLocation {
                            line: line as u32,
                            column: column as u32,
                        },
                    );
                }
            }
            let depends_on = string_list(raw.get("depends_on"));

            // A raw step that combines `if` with an inline `action` is split
            // into a gating conditional plus the action step.
            if raw.get("if").is_some() && raw.get("action").is_some() {
                self.warn(
                    "INLINE_ACTION_CONDITION",
                    format!("step '{id}' combines a condition with an inline action"),
                );
                let cond_id = format!("{id}_cond");
                if let Some(location) = self.source_map.get(&id).copied() {
                    self.source_map.insert(cond_id.clone(), location);
                }
                let condition = raw
                    .get("if")
                    .and_then(Json::as_str)
                    .and_then(|text| self.expr(text, &format!("step '{id}' condition")));
                let Some(condition) = condition else {
                    continue;
                };
                out.push(Step::Conditional {
                    id: cond_id,
                    condition,
                    then_steps: vec![id.clone()],
                    else_steps: Vec::new(),
                    depends_on: depends_on.clone(),
                });
                seen.insert(format!("{id}_cond"));
                if let Some(step) = self.action_step(&id, raw, Vec::new()) {
                    out.push(step);
                }
                continue;
            }

            let step = match SpellSource::step_discriminator(raw) {
                Some("compute") => self.compute_step(&id, raw, depends_on),
                Some("action") => self.action_step(&id, raw, depends_on),
                Some("if") => self.conditional_step(&id, raw, depends_on),
                Some("for") | Some("repeat") | Some("loop") => {
                    self.loop_step(&id, raw, depends_on)
                }
                Some("try") => self.try_step(&id, raw, depends_on),
                Some("parallel") => self.parallel_step(&id, raw, depends_on),
                Some("pipeline") => self.pipeline_step(&id, raw, depends_on),
                Some("advisory") => self.advisory_step(&id, raw, depends_on),
                Some("wait") => self.wait_step(&id, raw, depends_on),
                Some("emit") => self.emit_step(&id, raw, depends_on),
                Some("halt") => self.halt_step(&id, raw, depends_on),
                _ => {
                    self.error("UNKNOWN_STEP_TYPE", format!("step '{id}' has no known step key"));
                    None
                }
            };
            if let Some(step) = step {
                out.push(step);
            }
        }
        out
    }

    fn compute_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let compute = raw.get("compute")?;
        let mut assignments = Vec::new();
        match compute {
            Json::Array(entries) => {
                for entry in entries {
                    let variable = entry.get("variable").and_then(Json::as_str)?.to_string();
                    let expression =
                        self.expr_value(entry.get("expression")?, &format!("compute '{id}'"))?;
                    assignments.push(Assignment {
                        variable,
                        expression,
                    });
                }
            }
            // Hand-written documents may use the map form.
            Json::Object(entries) => {
                for (variable, value) in entries {
                    let expression = self.expr_value(value, &format!("compute '{id}'"))?;
                    assignments.push(Assignment {
                        variable: variable.clone(),
                        expression,
                    });
                }
            }
            _ => {
                self.error(
                    "INVALID_STEP",
                    format!("compute step '{id}' must carry assignments"),
                );
                return None;
            }
        }
        Some(Step::Compute {
            id: id.to_string(),
            assignments,
            depends_on,
        })
    }

    fn conditional_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let condition = raw.get("if").and_then(Json::as_str)?;
        let condition = self.expr(condition, &format!("step '{id}' condition"))?;
        Some(Step::Conditional {
            id: id.to_string(),
            condition,
            then_steps: string_list(raw.get("then")),
            else_steps: string_list(raw.get("else")),
            depends_on,
        })
    }

    fn action_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let spec = raw.get("action")?;
        let action_type = spec.get("type").and_then(Json::as_str).unwrap_or_default();
        let venue = || {
            spec.get("venue")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let asset = |key: &str| {
            spec.get(key)
                .and_then(Json::as_str)
                .map(str::to_string)
        };
        let context = format!("action '{id}'");

        let amount = match spec.get("amount") {
            Some(value) => Some(self.amount(value, &context)?),
            None => None,
        };
        let require_amount = |generator: &mut Self, amount: Option<Amount>| match amount {
            Some(amount) => Some(amount),
            None => {
                generator.error(
                    "ACTION_MISSING_FIELD",
                    format!("action '{id}' ({action_type}) is missing 'amount'"),
                );
                None
            }
        };
        let require_asset = |generator: &mut Self, key: &str| match asset(key) {
            Some(symbol) => Some(symbol),
            None => {
                generator.error(
                    "ACTION_MISSING_FIELD",
                    format!("action '{id}' ({action_type}) is missing '{key}'"),
                );
                None
            }
        };

        let action = match action_type {
            "lend" => ActionKind::Lend {
                venue: venue(),
                asset: require_asset(self, "asset")?,
                amount: require_amount(self, amount)?,
            },
            "withdraw" => ActionKind::Withdraw {
                venue: venue(),
                asset: require_asset(self, "asset")?,
                amount: require_amount(self, amount)?,
            },
            "borrow" => ActionKind::Borrow {
                venue: venue(),
                asset: require_asset(self, "asset")?,
                amount: require_amount(self, amount)?,
                collateral: asset("collateral"),
            },
            "repay" => ActionKind::Repay {
                venue: venue(),
                asset: require_asset(self, "asset")?,
                amount: require_amount(self, amount)?,
            },
            "stake" => ActionKind::Stake {
                venue: venue(),
                asset: require_asset(self, "asset")?,
                amount: require_amount(self, amount)?,
            },
            "unstake" => ActionKind::Unstake {
                venue: venue(),
                asset: require_asset(self, "asset")?,
                amount: require_amount(self, amount)?,
            },
            "claim" => ActionKind::Claim {
                venue: venue(),
                asset: asset("asset"),
            },
            "swap" => ActionKind::Swap {
                venue: venue(),
                from_asset: require_asset(self, "from_asset")?,
                to_asset: require_asset(self, "to_asset")?,
                amount: require_amount(self, amount)?,
            },
            "bridge" => {
                let Some(to_chain) = asset("to_chain") else {
                    self.error(
                        "ACTION_MISSING_FIELD",
                        format!("bridge action '{id}' requires 'to_chain'"),
                    );
                    return None;
                };
                ActionKind::Bridge {
                    asset: require_asset(self, "asset")?,
                    amount: require_amount(self, amount)?,
                    to_chain,
                    venue: asset("venue"),
                }
            }
            "transfer" => {
                let to = spec.get("to")?;
                ActionKind::Transfer {
                    asset: require_asset(self, "asset")?,
                    amount: require_amount(self, amount)?,
                    to: self.expr_value(to, &context)?,
                }
            }
            "" => {
                self.error("INVALID_STEP", format!("action '{id}' has no type"));
                return None;
            }
            method => {
                let mut args = Vec::new();
                if let Some(list) = spec.get("args").and_then(Json::as_array) {
                    for arg in list {
                        args.push(self.expr_value(arg, &context)?);
                    }
                }
                ActionKind::Custom {
                    venue: venue(),
                    method: method.to_string(),
                    args,
                }
            }
        };

        let mut constraints = IndexMap::new();
        if let Some(map) = raw.get("constraints").and_then(Json::as_object) {
            for (key, value) in map {
                let expression = self.expr_value(value, &format!("constraint '{key}' of '{id}'"))?;
                constraints.insert(key.clone(), expression);
            }
        }

        let on_failure = match raw.get("on_failure").and_then(Json::as_str) {
            None => FailurePolicy::Revert,
            Some("halt") => FailurePolicy::Halt,
            Some("revert") => FailurePolicy::Revert,
            Some("skip") => FailurePolicy::Skip,
            Some("catch") => FailurePolicy::Catch,
            Some(other) => {
                self.error(
                    "INVALID_STEP",
                    format!("action '{id}' has unknown on_failure '{other}'"),
                );
                return None;
            }
        };

        Some(Step::Action {
            id: id.to_string(),
            action,
            constraints,
            output_binding: raw
                .get("output_binding")
                .and_then(Json::as_str)
                .map(str::to_string),
            on_failure,
            depends_on,
        })
    }

    fn loop_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let loop_type = if let Some(spec) = raw.get("for") {
            let variable = spec.get("variable").and_then(Json::as_str)?.to_string();
            let source = spec.get("in").and_then(Json::as_str)?;
            LoopType::For {
                variable,
                source: self.expr(source, &format!("loop '{id}' source"))?,
            }
        } else if let Some(count) = raw.get("repeat") {
            LoopType::Repeat {
                count: count.as_u64().unwrap_or(0) as u32,
            }
        } else if let Some(spec) = raw.get("loop") {
            let condition = spec.get("until").and_then(Json::as_str)?;
            LoopType::Until {
                condition: self.expr(condition, &format!("loop '{id}' condition"))?,
            }
        } else {
            return None;
        };

        Some(Step::Loop {
            id: id.to_string(),
            loop_type,
            body_steps: string_list(raw.get("body")),
            max_iterations: raw.get("max").and_then(Json::as_u64).unwrap_or(100) as u32,
            parallel: raw
                .get("parallel")
                .and_then(Json::as_bool)
                .unwrap_or(false),
            output_binding: raw
                .get("output_binding")
                .and_then(Json::as_str)
                .map(str::to_string),
            depends_on,
        })
    }

    fn try_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let try_steps = string_list(raw.get("try"));
        let mut catch_blocks = Vec::new();
        for clause in raw.get("catch").and_then(Json::as_array).unwrap_or(&vec![]) {
            let error_type = clause
                .get("error")
                .and_then(Json::as_str)
                .unwrap_or("*");
            // Unknown error kinds widen to the wildcard.
            let error_type = if CATCHABLE_ERROR_KINDS.contains(&error_type) {
                error_type.to_string()
            } else {
                "*".to_string()
            };
            let action = match clause.get("action").and_then(Json::as_str) {
                None => None,
                Some("skip") => Some(CatchAction::Skip),
                Some("halt") => Some(CatchAction::Halt),
                // Surface `revert` is IR `rollback`.
                Some("revert") | Some("rollback") => Some(CatchAction::Rollback),
                Some("retry") => Some(CatchAction::Retry),
                Some(other) => {
                    self.error(
                        "INVALID_STEP",
                        format!("try '{id}' has unknown catch action '{other}'"),
                    );
                    return None;
                }
            };
            let retry: Option<RetrySpec> = match clause.get("retry") {
                Some(spec) => match serde_json::from_value(spec.clone()) {
                    Ok(spec) => Some(spec),
                    Err(e) => {
                        self.error(
                            "INVALID_STEP",
                            format!("try '{id}' has invalid retry spec: {e}"),
                        );
                        return None;
                    }
                },
                None => None,
            };
            let steps = clause.get("steps").map(|s| string_list(Some(s)));
            catch_blocks.push(CatchBlock {
                error_type,
                action,
                steps,
                retry,
            });
        }
        if catch_blocks.is_empty() {
            self.error("INVALID_STEP", format!("try '{id}' has no catch blocks"));
            return None;
        }
        Some(Step::Try {
            id: id.to_string(),
            try_steps,
            catch_blocks,
            finally_steps: raw.get("finally").map(|s| string_list(Some(s))),
            depends_on,
        })
    }

    fn parallel_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let mut branches = Vec::new();
        for branch in raw
            .get("parallel")
            .and_then(Json::as_array)
            .unwrap_or(&vec![])
        {
            let name = branch.get("name").and_then(Json::as_str)?.to_string();
            branches.push(Branch {
                name,
                steps: string_list(branch.get("steps")),
            });
        }
        let join = match raw.get("join") {
            None => JoinPolicy::All,
            Some(Json::String(s)) if s == "all" => JoinPolicy::All,
            Some(value) => {
                if let Some(count) = value.get("any").and_then(Json::as_u64) {
                    JoinPolicy::Any {
                        count: count as u32,
                    }
                } else if let Some(best) = value.get("best") {
                    let metric = best.get("metric").and_then(Json::as_str)?;
                    JoinPolicy::Best {
                        metric: self.expr(metric, &format!("parallel '{id}' metric"))?,
                        order: sort_order(best.get("order")),
                    }
                } else {
                    self.error(
                        "INVALID_STEP",
                        format!("parallel '{id}' has unknown join {value}"),
                    );
                    return None;
                }
            }
        };
        let on_fail = match raw.get("on_fail").and_then(Json::as_str) {
            None | Some("abort") => ParallelFailMode::Abort,
            Some("continue") => ParallelFailMode::Continue,
            Some(other) => {
                self.error(
                    "INVALID_STEP",
                    format!("parallel '{id}' has unknown on_fail '{other}'"),
                );
                return None;
            }
        };
        Some(Step::Parallel {
            id: id.to_string(),
            branches,
            join,
            on_fail,
            depends_on,
        })
    }

    fn pipeline_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let spec = raw.get("pipeline")?;
        let source = spec.get("source").and_then(Json::as_str)?;
        let source = self.expr(source, &format!("pipeline '{id}' source"))?;
        let mut stages = Vec::new();
        for stage in spec.get("stages").and_then(Json::as_array).unwrap_or(&vec![]) {
            let op = stage.get("op").and_then(Json::as_str).unwrap_or_default();
            let step = || {
                stage
                    .get("step")
                    .and_then(Json::as_str)
                    .map(str::to_string)
            };
            let lowered = match op {
                "map" => PipelineStage::Map { step: step()? },
                "pmap" => PipelineStage::Pmap { step: step()? },
                "filter" => PipelineStage::Filter { step: step()? },
                "reduce" => {
                    let initial = stage.get("initial")?;
                    PipelineStage::Reduce {
                        step: step()?,
                        initial: self.expr_value(initial, &format!("pipeline '{id}' reduce"))?,
                    }
                }
                "take" => PipelineStage::Take {
                    count: stage.get("count").and_then(Json::as_u64).unwrap_or(0),
                },
                "skip" => PipelineStage::Skip {
                    count: stage.get("count").and_then(Json::as_u64).unwrap_or(0),
                },
                "sort" => PipelineStage::Sort {
                    by: match stage.get("by").and_then(Json::as_str) {
                        Some(text) => Some(self.expr(text, &format!("pipeline '{id}' sort"))?),
                        None => None,
                    },
                    order: sort_order(stage.get("order")),
                },
                other => {
                    self.error(
                        "INVALID_STEP",
                        format!("pipeline '{id}' has unknown stage op '{other}'"),
                    );
                    return None;
                }
            };
            stages.push(lowered);
        }
        Some(Step::Pipeline {
            id: id.to_string(),
            source,
            stages,
            output_binding: raw
                .get("output_binding")
                .and_then(Json::as_str)
                .map(str::to_string),
            depends_on,
        })
    }

    fn advisory_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let spec = raw.get("advisory")?;
        let prompt = spec.get("prompt").and_then(Json::as_str)?.to_string();
        let Some(advisor) = spec.get("advisor").and_then(Json::as_str) else {
            self.error(
                "MISSING_ADVISOR",
                format!("advisory step '{id}' has no advisor"),
            );
            return None;
        };
        let fallback = match spec.get("fallback") {
            Some(fallback) => {
                if let Some(value) = fallback.get("__literal") {
                    AdvisoryFallback::Literal {
                        value: Value::from(value.clone()),
                    }
                } else if let Some(text) = fallback.get("__expr").and_then(Json::as_str) {
                    AdvisoryFallback::Expression {
                        expression: self.expr(text, &format!("advisory '{id}' fallback"))?,
                    }
                } else {
                    AdvisoryFallback::Literal {
                        value: Value::from(fallback.clone()),
                    }
                }
            }
            None => AdvisoryFallback::Literal { value: Value::Null },
        };
        Some(Step::Advisory {
            id: id.to_string(),
            prompt,
            advisor: advisor.to_string(),
            output: raw.get("output").and_then(Json::as_str).map(str::to_string),
            timeout: spec.get("timeout").and_then(Json::as_f64).unwrap_or(30.0),
            fallback,
            output_schema: spec.get("output_schema").cloned(),
            depends_on,
        })
    }

    fn wait_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let duration = raw.get("wait").and_then(Json::as_f64);
        let Some(duration) = duration else {
            self.error(
                "INVALID_STEP",
                format!("wait step '{id}' must carry a numeric duration"),
            );
            return None;
        };
        Some(Step::Wait {
            id: id.to_string(),
            duration,
            depends_on,
        })
    }

    fn emit_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        let spec = raw.get("emit")?;
        let event = spec.get("event").and_then(Json::as_str)?.to_string();
        let mut data = IndexMap::new();
        match spec.get("data") {
            Some(Json::Array(entries)) => {
                for entry in entries {
                    let name = entry.get("name").and_then(Json::as_str)?.to_string();
                    let expression =
                        self.expr_value(entry.get("expression")?, &format!("emit '{id}'"))?;
                    data.insert(name, expression);
                }
            }
            Some(Json::Object(entries)) => {
                for (name, value) in entries {
                    let expression = self.expr_value(value, &format!("emit '{id}'"))?;
                    data.insert(name.clone(), expression);
                }
            }
            _ => {}
        }
        Some(Step::Emit {
            id: id.to_string(),
            event,
            data,
            depends_on,
        })
    }

    fn halt_step(&mut self, id: &str, raw: &Json, depends_on: Vec<String>) -> Option<Step> {
        Some(Step::Halt {
            id: id.to_string(),
            reason: raw
                .get("halt")
                .and_then(Json::as_str)
                .unwrap_or("halted")
                .to_string(),
            depends_on,
        })
    }

    // ------------------------------------------------------------------
    // Cross-checks and expression helpers
    // ------------------------------------------------------------------

    /// Every child ID referenced by a container, and every dependency,
    /// must name an existing step.
    fn check_references(&mut self, steps: &[Step]) {
        let ids: HashSet<&str> = steps.iter().map(Step::id).collect();
        for step in steps {
            for child in step.child_step_ids() {
                if !ids.contains(child) {
                    self.error(
                        "UNKNOWN_STEP_REF",
                        format!("step '{}' references unknown step '{child}'", step.id()),
                    );
                }
            }
            for dep in step.depends_on() {
                if !ids.contains(dep.as_str()) {
                    self.error(
                        "UNKNOWN_DEPENDENCY",
                        format!("step '{}' depends on unknown step '{dep}'", step.id()),
                    );
                }
            }
        }
    }

    fn expr(&mut self, text: &str, context: &str) -> Option<Expression> {
        match parse_expression(text) {
            Ok(expr) => Some(expr),
            Err(e) => {
                self.error(
                    "EXPRESSION_PARSE_ERROR",
                    format!("{context}: {e} (in '{text}')"),
                );
                None
            }
        }
    }

    /// Numbers and booleans pass through as literals; strings re-parse.
    fn expr_value(&mut self, value: &Json, context: &str) -> Option<Expression> {
        match value {
            Json::Number(n) => Some(Expression::literal(n.as_f64().unwrap_or(f64::NAN))),
            Json::Bool(b) => Some(Expression::literal(*b)),
            Json::String(text) => self.expr(text, context),
            other => {
                self.error(
                    "EXPRESSION_PARSE_ERROR",
                    format!("{context}: expected expression, found {other}"),
                );
                None
            }
        }
    }

    fn amount(&mut self, value: &Json, context: &str) -> Option<Amount> {
        if value.as_str() == Some("max") {
            return Some(Amount::Max);
        }
        self.expr_value(value, context).map(Amount::Expr)
    }
}

fn state_fields(map: &IndexMap<String, Json>) -> Vec<StateField> {
    map.iter()
        .map(|(key, value)| StateField {
            key: key.clone(),
            initial_value: Value::from(value.clone()),
        })
        .collect()
}

fn string_list(value: Option<&Json>) -> Vec<String> {
    value
        .and_then(Json::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Json::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn sort_order(value: Option<&Json>) -> SortOrder {
    match value.and_then(Json::as_str) {
        Some("desc") => SortOrder::Desc,
        _ => SortOrder::Asc,
    }
}

fn parse_param_type(text: &str) -> ParamType {
    match text {
        "number" => ParamType::Number,
        "bool" | "boolean" => ParamType::Bool,
        "address" => ParamType::Address,
        _ => ParamType::String,
    }
}

fn infer_param_type(value: &Json) -> ParamType {
    match value {
        Json::Number(_) => ParamType::Number,
        Json::Bool(_) => ParamType::Bool,
        Json::String(s) if s.starts_with("0x") => ParamType::Address,
        _ => ParamType::String,
    }
}

#[cfg(test)]
#[path = "irgen_tests.rs"]
mod tests;
