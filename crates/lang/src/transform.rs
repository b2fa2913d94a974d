// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AST → SpellSource lowering.
//!
//! Pre-scans assets (for unit decimals) and venues (for skill label
//! resolution), inlines `block`/`do` templates, lowers sections and
//! triggers, and flattens the statement tree into step records. Container
//! steps are emitted before their children so the interpreter's sequential
//! walk reaches the container first.

use crate::ast::*;
use crate::source::{AssetSource, GuardSource, SpellSource, VenueSource, SOURCE_LOCATION_KEY};
use crate::unparse::{resolve_unit, unparse, UnparseError};
use grim_core::{DAILY_CRON, HOURLY_CRON};
use indexmap::IndexMap;
use serde_json::{json, Value as Json};
use thiserror::Error;

/// Inline expansion depth cap for `do`, against self-referential blocks.
const MAX_INLINE_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Unit(#[from] UnparseError),

    #[error("line {line}: unknown block '{name}'")]
    UnknownBlock { name: String, line: u32 },

    #[error("line {line}: block '{name}' takes {expected} arguments, {given} given")]
    BlockArity {
        name: String,
        expected: usize,
        given: usize,
        line: u32,
    },

    #[error("line {line}: block expansion too deep (cycle through '{name}'?)")]
    InlineDepth { name: String, line: u32 },

    #[error("invalid {section} section: {message}")]
    InvalidSection { section: String, message: String },

    #[error("line {line}: {message}")]
    InvalidStatement { message: String, line: u32 },

    #[error("line {line}: pipeline stage '{op}' {message}")]
    StageBody {
        op: String,
        message: String,
        line: u32,
    },
}

/// Lower a parsed spell with no imported blocks.
pub fn transform(spell: &Spell) -> Result<SpellSource, TransformError> {
    transform_with_blocks(spell, &IndexMap::new())
}

/// Lower a parsed spell. `imported_blocks` holds namespaced block templates
/// (`alias.name`) registered by import resolution.
pub fn transform_with_blocks(
    spell: &Spell,
    imported_blocks: &IndexMap<String, BlockDecl>,
) -> Result<SpellSource, TransformError> {
    let mut blocks = imported_blocks.clone();
    for block in &spell.blocks {
        blocks.insert(block.name.clone(), block.clone());
    }
    Transformer::new(blocks).run(spell)
}

struct Transformer {
    decimals: IndexMap<String, u32>,
    venues: IndexMap<String, VenueSource>,
    blocks: IndexMap<String, BlockDecl>,
    counters: IndexMap<&'static str, u32>,
    steps: Vec<Json>,
    inline_depth: usize,
}

impl Transformer {
    fn new(blocks: IndexMap<String, BlockDecl>) -> Self {
        Self {
            decimals: IndexMap::new(),
            venues: IndexMap::new(),
            blocks,
            counters: IndexMap::new(),
            steps: Vec::new(),
            inline_depth: 0,
        }
    }

    fn run(mut self, spell: &Spell) -> Result<SpellSource, TransformError> {
        let mut out = SpellSource {
            spell: spell.name.clone(),
            ..Default::default()
        };

        // Pre-scan: asset decimals for unit literals, venue labels for
        // skill resolution.
        for section in &spell.sections {
            match section.kind {
                SectionKind::Assets => self.scan_assets(section, &mut out)?,
                SectionKind::Venues => self.scan_venues(section, &mut out)?,
                _ => {}
            }
        }

        for section in &spell.sections {
            match section.kind {
                SectionKind::Assets | SectionKind::Venues => {} // already done
                SectionKind::Version => out.version = Some(self.scalar_string(section)?),
                SectionKind::Description => out.description = Some(self.scalar_string(section)?),
                SectionKind::Params => self.lower_params(section, &mut out, "")?,
                SectionKind::Limits => self.lower_params(section, &mut out, "limit_")?,
                SectionKind::State => self.lower_state(section, &mut out)?,
                SectionKind::Skills => self.lower_skills(section, &mut out)?,
                SectionKind::Advisors => {
                    for entry in &section.entries {
                        let value = self.section_value_json(&entry.value)?;
                        out.advisors.insert(entry.key.clone(), value);
                    }
                }
                SectionKind::Guards => self.lower_guards(section, &mut out)?,
            }
        }

        // Triggers: bodies concatenate into the step list; trigger metadata
        // collapses to {any: [...]} when there is more than one.
        let mut trigger_meta = Vec::new();
        for trigger in &spell.triggers {
            trigger_meta.push(self.trigger_json(&trigger.kind)?);
            self.lower_stmts(&trigger.body)?;
        }
        out.trigger = match trigger_meta.len() {
            0 => None,
            1 => trigger_meta.into_iter().next(),
            _ => Some(json!({ "any": trigger_meta })),
        };

        out.steps = self.steps;
        Ok(out)
    }

    fn next_id(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{prefix}_{counter}")
    }

    // ------------------------------------------------------------------
    // Sections
    // ------------------------------------------------------------------

    fn scalar_string(&self, section: &Section) -> Result<String, TransformError> {
        match section.entries.first().map(|e| &e.value) {
            Some(SectionValue::Expr(Expr {
                kind: ExprKind::Str(s),
                ..
            })) => Ok(s.clone()),
            _ => Err(TransformError::InvalidSection {
                section: section.kind.keyword().to_string(),
                message: "expected a string value".to_string(),
            }),
        }
    }

    fn scan_assets(
        &mut self,
        section: &Section,
        out: &mut SpellSource,
    ) -> Result<(), TransformError> {
        for entry in &section.entries {
            let fields = entry_fields(&entry.value).ok_or_else(|| TransformError::InvalidSection {
                section: "assets".to_string(),
                message: format!("asset '{}' must be a map", entry.key),
            })?;
            let mut chain = String::new();
            let mut address = String::new();
            let mut decimals = None;
            for (key, expr) in fields {
                match (key.as_str(), &expr.kind) {
                    ("chain", ExprKind::Str(s)) => chain = s.clone(),
                    ("address", ExprKind::Address(a)) => address = a.clone(),
                    ("address", ExprKind::Str(s)) => address = s.clone(),
                    ("decimals", ExprKind::Number(n)) => decimals = Some(*n as u32),
                    // Unknown fields are tolerated for forward compat.
                    _ => {}
                }
            }
            let decimals = decimals.ok_or_else(|| TransformError::InvalidSection {
                section: "assets".to_string(),
                message: format!("asset '{}' is missing 'decimals'", entry.key),
            })?;
            self.decimals.insert(entry.key.clone(), decimals);
            out.assets.insert(
                entry.key.clone(),
                AssetSource {
                    chain,
                    address,
                    decimals,
                },
            );
        }
        Ok(())
    }

    fn scan_venues(
        &mut self,
        section: &Section,
        out: &mut SpellSource,
    ) -> Result<(), TransformError> {
        // Groups flatten: every alias maps to {chain, address, label=group}.
        for group in &section.entries {
            let aliases = match &group.value {
                SectionValue::Map(entries) => entries,
                _ => {
                    return Err(TransformError::InvalidSection {
                        section: "venues".to_string(),
                        message: format!("venue group '{}' must be a map", group.key),
                    })
                }
            };
            for alias in aliases {
                let fields =
                    entry_fields(&alias.value).ok_or_else(|| TransformError::InvalidSection {
                        section: "venues".to_string(),
                        message: format!("venue '{}' must be a map", alias.key),
                    })?;
                let mut chain = String::new();
                let mut address = String::new();
                for (key, expr) in fields {
                    match (key.as_str(), &expr.kind) {
                        ("chain", ExprKind::Str(s)) => chain = s.clone(),
                        ("address", ExprKind::Address(a)) => address = a.clone(),
                        ("address", ExprKind::Str(s)) => address = s.clone(),
                        _ => {}
                    }
                }
                let venue = VenueSource {
                    chain,
                    address,
                    label: Some(group.key.clone()),
                };
                self.venues.insert(alias.key.clone(), venue.clone());
                out.venues.insert(alias.key.clone(), venue);
            }
        }
        Ok(())
    }

    fn lower_params(
        &mut self,
        section: &Section,
        out: &mut SpellSource,
        prefix: &str,
    ) -> Result<(), TransformError> {
        for entry in &section.entries {
            let name = format!("{prefix}{}", entry.key);
            let value = match &entry.value {
                SectionValue::Expr(expr) => {
                    self.literal_json(expr)?
                        .ok_or_else(|| TransformError::InvalidSection {
                            section: section.kind.keyword().to_string(),
                            message: format!("'{}' must be a literal value", entry.key),
                        })?
                }
                // Extended form: {value/default, type, description, ...}
                SectionValue::Map(_) => self.section_value_json(&entry.value)?,
                SectionValue::AdvisoryCheck { .. } => {
                    return Err(TransformError::InvalidSection {
                        section: section.kind.keyword().to_string(),
                        message: format!("'{}' cannot be an advisory", entry.key),
                    })
                }
            };
            out.params.insert(name, value);
        }
        Ok(())
    }

    fn lower_state(
        &mut self,
        section: &Section,
        out: &mut SpellSource,
    ) -> Result<(), TransformError> {
        for scope in &section.entries {
            let entries = match &scope.value {
                SectionValue::Map(entries) => entries,
                _ => {
                    return Err(TransformError::InvalidSection {
                        section: "state".to_string(),
                        message: format!("state scope '{}' must be a map", scope.key),
                    })
                }
            };
            let target: &mut IndexMap<String, Json> = match scope.key.as_str() {
                "persistent" => &mut out.state.persistent,
                "ephemeral" => &mut out.state.ephemeral,
                other => {
                    return Err(TransformError::InvalidSection {
                        section: "state".to_string(),
                        message: format!(
                            "unknown state scope '{other}' (expected persistent or ephemeral)"
                        ),
                    })
                }
            };
            for entry in entries {
                let value = match &entry.value {
                    SectionValue::Expr(expr) => self.literal_json(expr)?.ok_or_else(|| {
                        TransformError::InvalidSection {
                            section: "state".to_string(),
                            message: format!("'{}' must be a literal initial value", entry.key),
                        }
                    })?,
                    _ => {
                        return Err(TransformError::InvalidSection {
                            section: "state".to_string(),
                            message: format!("'{}' must be a literal initial value", entry.key),
                        })
                    }
                };
                target.insert(entry.key.clone(), value);
            }
        }
        Ok(())
    }

    fn lower_skills(
        &mut self,
        section: &Section,
        out: &mut SpellSource,
    ) -> Result<(), TransformError> {
        for entry in &section.entries {
            let mut value = self.section_value_json(&entry.value)?;
            // A skill may name a venue label rather than an alias; resolve
            // it to the first alias declared under that label.
            if let Some(venue) = value.get("venue").and_then(Json::as_str) {
                if !self.venues.contains_key(venue) {
                    let resolved = self
                        .venues
                        .iter()
                        .find(|(_, v)| v.label.as_deref() == Some(venue))
                        .map(|(alias, _)| alias.clone());
                    if let Some(alias) = resolved {
                        if let Some(obj) = value.as_object_mut() {
                            obj.insert("venue".to_string(), Json::String(alias));
                        }
                    }
                }
            }
            out.skills.insert(entry.key.clone(), value);
        }
        Ok(())
    }

    fn lower_guards(
        &mut self,
        section: &Section,
        out: &mut SpellSource,
    ) -> Result<(), TransformError> {
        for entry in &section.entries {
            let guard = match &entry.value {
                SectionValue::Expr(Expr {
                    kind: ExprKind::Advisory(_),
                    ..
                }) => {
                    return Err(TransformError::InvalidSection {
                        section: "guards".to_string(),
                        message: format!(
                            "advisory guard '{}' requires an advisor: use 'via <advisor>'",
                            entry.key
                        ),
                    })
                }
                SectionValue::Expr(expr) => GuardSource {
                    id: entry.key.clone(),
                    check: self.unparse(expr)?,
                    advisor: None,
                    severity: "halt".to_string(),
                    message: None,
                    phase: None,
                },
                SectionValue::AdvisoryCheck { prompt, advisor } => GuardSource {
                    id: entry.key.clone(),
                    check: prompt.clone(),
                    advisor: advisor.clone(),
                    severity: "halt".to_string(),
                    message: None,
                    phase: None,
                },
                SectionValue::Map(fields) => {
                    let mut check = None;
                    let mut advisor = None;
                    let mut severity = "halt".to_string();
                    let mut message = None;
                    let mut phase = None;
                    for field in fields {
                        match (field.key.as_str(), &field.value) {
                            ("check", SectionValue::AdvisoryCheck { prompt, advisor: a }) => {
                                check = Some(prompt.clone());
                                if a.is_some() {
                                    advisor = a.clone();
                                }
                            }
                            (
                                "check",
                                SectionValue::Expr(Expr {
                                    kind: ExprKind::Advisory(prompt),
                                    ..
                                }),
                            ) => check = Some(prompt.clone()),
                            ("check", SectionValue::Expr(expr)) => {
                                check = Some(self.unparse(expr)?)
                            }
                            ("advisor", SectionValue::Expr(expr)) => {
                                advisor = name_of(expr);
                            }
                            ("severity", SectionValue::Expr(expr)) => {
                                if let Some(s) = name_of(expr) {
                                    severity = s;
                                }
                            }
                            (
                                "message",
                                SectionValue::Expr(Expr {
                                    kind: ExprKind::Str(s),
                                    ..
                                }),
                            ) => message = Some(s.clone()),
                            ("phase", SectionValue::Expr(expr)) => phase = name_of(expr),
                            // Unknown guard fields are tolerated.
                            _ => {}
                        }
                    }
                    let check = check.ok_or_else(|| TransformError::InvalidSection {
                        section: "guards".to_string(),
                        message: format!("guard '{}' is missing 'check'", entry.key),
                    })?;
                    GuardSource {
                        id: entry.key.clone(),
                        check,
                        advisor,
                        severity,
                        message,
                        phase,
                    }
                }
            };
            out.guards.push(guard);
        }
        Ok(())
    }

    fn trigger_json(&mut self, kind: &TriggerKind) -> Result<Json, TransformError> {
        Ok(match kind {
            TriggerKind::Manual => json!({"type": "manual"}),
            TriggerKind::Hourly => json!({"schedule": HOURLY_CRON}),
            TriggerKind::Daily => json!({"schedule": DAILY_CRON}),
            TriggerKind::Cron(cron) => json!({"schedule": cron}),
            TriggerKind::Condition { expr, poll } => {
                json!({"condition": self.unparse(expr)?, "every": poll.unwrap_or(60.0)})
            }
            TriggerKind::Event { name, filter } => match filter {
                Some(filter) => json!({"event": name, "where": self.unparse(filter)?}),
                None => json!({"event": name}),
            },
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_stmts(&mut self, stmts: &[Stmt]) -> Result<Vec<String>, TransformError> {
        let mut ids = Vec::new();
        for stmt in stmts {
            ids.extend(self.lower_statement(stmt)?);
        }
        Ok(ids)
    }

    fn lower_statement(&mut self, stmt: &Stmt) -> Result<Vec<String>, TransformError> {
        let first_index = self.steps.len();
        let ids = self.lower_statement_inner(stmt)?;
        // Stamp the first step produced for this statement with its source
        // position.
        if let Some(step) = self.steps.get_mut(first_index) {
            if let Some(obj) = step.as_object_mut() {
                obj.insert(
                    SOURCE_LOCATION_KEY.to_string(),
                    json!({"line": stmt.span.start.line, "column": stmt.span.start.column}),
                );
            }
        }
        Ok(ids)
    }

    fn lower_statement_inner(&mut self, stmt: &Stmt) -> Result<Vec<String>, TransformError> {
        let line = stmt.span.start.line;
        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                let id = self.next_id("compute");
                let expr = self.expr_value(value)?;
                self.steps.push(json!({
                    "id": id,
                    "compute": [{"variable": target, "expression": expr}],
                }));
                Ok(vec![id])
            }

            StmtKind::Advise { binding, spec } => {
                let id = self.next_id("advisory");
                let fallback = match self.literal_json(&spec.fallback)? {
                    Some(value) => json!({ "__literal": value }),
                    None => json!({"__expr": self.unparse(&spec.fallback)?}),
                };
                let mut record = json!({
                    "id": id,
                    "advisory": {
                        "prompt": spec.prompt,
                        "advisor": spec.advisor,
                        "output_schema": self.expr_json(&spec.output)?,
                        "timeout": spec.timeout,
                        "fallback": fallback,
                    },
                });
                if let Some(binding) = binding {
                    record["output"] = json!(binding);
                }
                self.steps.push(record);
                Ok(vec![id])
            }

            StmtKind::MethodCall { .. } => self.lower_method_call(stmt),

            StmtKind::If {
                condition,
                then_body,
                elifs,
                else_body,
            } => {
                let id = self.lower_conditional(condition, then_body, elifs, else_body)?;
                Ok(vec![id])
            }

            StmtKind::For {
                variable,
                source,
                body,
            } => {
                let id = self.next_id("loop");
                let index = self.reserve();
                let body_ids = self.lower_stmts(body)?;
                self.steps[index] = json!({
                    "id": id,
                    "for": {"variable": variable, "in": self.unparse(source)?},
                    "body": body_ids,
                    "max": 100,
                });
                Ok(vec![id])
            }

            StmtKind::Repeat { count, body } => {
                let count = match count.kind {
                    ExprKind::Number(n) => n as u32,
                    _ => {
                        return Err(TransformError::InvalidStatement {
                            message: "repeat count must be a number literal".to_string(),
                            line,
                        })
                    }
                };
                let id = self.next_id("loop");
                let index = self.reserve();
                let body_ids = self.lower_stmts(body)?;
                self.steps[index] = json!({
                    "id": id,
                    "repeat": count,
                    "body": body_ids,
                    "max": 100,
                });
                Ok(vec![id])
            }

            StmtKind::Until {
                condition,
                max,
                body,
            } => {
                let id = self.next_id("loop");
                let index = self.reserve();
                let body_ids = self.lower_stmts(body)?;
                self.steps[index] = json!({
                    "id": id,
                    "loop": {"until": self.unparse(condition)?},
                    "body": body_ids,
                    "max": max.unwrap_or(100),
                });
                Ok(vec![id])
            }

            StmtKind::Try {
                body,
                catches,
                finally_body,
            } => {
                let id = self.next_id("try");
                let index = self.reserve();
                let try_ids = self.lower_stmts(body)?;
                let mut catch_records = Vec::new();
                for clause in catches {
                    catch_records.push(self.lower_catch(clause)?);
                }
                let mut record = json!({
                    "id": id,
                    "try": try_ids,
                    "catch": catch_records,
                });
                if let Some(finally_body) = finally_body {
                    let finally_ids = self.lower_stmts(finally_body)?;
                    record["finally"] = json!(finally_ids);
                }
                self.steps[index] = record;
                Ok(vec![id])
            }

            StmtKind::Atomic { mode, body } => {
                // `atomic` is a try with a wildcard catch whose action is
                // the chosen mode.
                let id = self.next_id("atomic");
                let index = self.reserve();
                let try_ids = self.lower_stmts(body)?;
                let action = match mode {
                    AtomicMode::Skip => "skip",
                    AtomicMode::Halt => "halt",
                    AtomicMode::Revert => "revert",
                };
                self.steps[index] = json!({
                    "id": id,
                    "try": try_ids,
                    "catch": [{"error": "*", "action": action}],
                });
                Ok(vec![id])
            }

            StmtKind::Parallel {
                branches,
                join,
                count,
                metric,
                order,
                on_fail,
            } => {
                let id = self.next_id("parallel");
                let index = self.reserve();
                let mut branch_records = Vec::new();
                for (name, body) in branches {
                    let ids = self.lower_stmts(body)?;
                    branch_records.push(json!({"name": name, "steps": ids}));
                }
                let join_value = match join.as_deref() {
                    None | Some("all") => json!("all"),
                    Some("any") => json!({"any": count.unwrap_or(1)}),
                    Some("best") => {
                        let metric = metric.as_ref().ok_or_else(|| {
                            TransformError::InvalidStatement {
                                message: "join=best requires metric=<expr>".to_string(),
                                line,
                            }
                        })?;
                        json!({"best": {
                            "metric": self.unparse(metric)?,
                            "order": order.as_deref().unwrap_or("desc"),
                        }})
                    }
                    Some(other) => {
                        return Err(TransformError::InvalidStatement {
                            message: format!("unknown join policy '{other}'"),
                            line,
                        })
                    }
                };
                self.steps[index] = json!({
                    "id": id,
                    "parallel": branch_records,
                    "join": join_value,
                    "on_fail": on_fail.as_deref().unwrap_or("abort"),
                });
                Ok(vec![id])
            }

            StmtKind::Pipeline {
                source,
                stages,
                output_binding,
            } => {
                let id = self.next_id("pipeline");
                let index = self.reserve();
                let mut stage_records = Vec::new();
                for stage in stages {
                    stage_records.push(self.lower_stage(stage)?);
                }
                let mut record = json!({
                    "id": id,
                    "pipeline": {
                        "source": self.unparse(source)?,
                        "stages": stage_records,
                    },
                });
                if let Some(binding) = output_binding {
                    record["output_binding"] = json!(binding);
                }
                self.steps[index] = record;
                Ok(vec![id])
            }

            StmtKind::Do { name, args } => self.inline_block(name, args, line),

            StmtKind::Emit { event, data } => {
                let id = self.next_id("emit");
                let mut fields = Vec::new();
                for (key, value) in data {
                    fields.push(json!({"name": key, "expression": self.expr_value(value)?}));
                }
                self.steps.push(json!({
                    "id": id,
                    "emit": {"event": event, "data": fields},
                }));
                Ok(vec![id])
            }

            StmtKind::Halt { reason } => {
                let id = self.next_id("halt");
                let reason = match reason {
                    Some(Expr {
                        kind: ExprKind::Str(s),
                        ..
                    }) => s.clone(),
                    Some(expr) => self.unparse(expr)?,
                    None => "halted".to_string(),
                };
                self.steps.push(json!({"id": id, "halt": reason}));
                Ok(vec![id])
            }

            StmtKind::Wait { duration } => {
                let seconds = match duration.kind {
                    ExprKind::Number(n) => n,
                    _ => {
                        return Err(TransformError::InvalidStatement {
                            message: "wait duration must be a number literal".to_string(),
                            line,
                        })
                    }
                };
                let id = self.next_id("wait");
                self.steps.push(json!({"id": id, "wait": seconds}));
                Ok(vec![id])
            }

            StmtKind::Pass => Ok(Vec::new()),

            // A bare advisory statement computes the advisory's answer.
            StmtKind::Advisory { prompt } => {
                let id = self.next_id("compute");
                let variable = format!("{id}_result");
                self.steps.push(json!({
                    "id": id,
                    "compute": [{"variable": variable, "expression": format!("**{prompt}**")}],
                }));
                Ok(vec![id])
            }

            StmtKind::ExprStmt(_) => Err(TransformError::InvalidStatement {
                message: "an expression is not a statement here".to_string(),
                line,
            }),
        }
    }

    /// Reserve a slot so the container precedes its children in step order.
    fn reserve(&mut self) -> usize {
        self.steps.push(Json::Null);
        self.steps.len() - 1
    }

    fn lower_conditional(
        &mut self,
        condition: &Expr,
        then_body: &[Stmt],
        elifs: &[(Expr, Vec<Stmt>)],
        else_body: &[Stmt],
    ) -> Result<String, TransformError> {
        let id = self.next_id("cond");
        let index = self.reserve();
        let then_ids = self.lower_stmts(then_body)?;
        // elif chains nest in the else arm.
        let else_ids = if let Some(((cond, body), rest)) = elifs.split_first() {
            vec![self.lower_conditional(cond, body, rest, else_body)?]
        } else {
            self.lower_stmts(else_body)?
        };
        self.steps[index] = json!({
            "id": id,
            "if": self.unparse(condition)?,
            "then": then_ids,
            "else": else_ids,
        });
        Ok(id)
    }

    fn lower_catch(&mut self, clause: &CatchClause) -> Result<Json, TransformError> {
        Ok(match &clause.body {
            CatchBody::Skip => json!({"error": clause.error_type, "action": "skip"}),
            CatchBody::Halt => json!({"error": clause.error_type, "action": "halt"}),
            CatchBody::Revert => json!({"error": clause.error_type, "action": "revert"}),
            CatchBody::Retry {
                attempts,
                backoff,
                base,
                max,
            } => {
                let mut retry = serde_json::Map::new();
                if let Some(attempts) = attempts {
                    retry.insert("max_attempts".to_string(), json!(attempts));
                }
                if let Some(backoff) = backoff {
                    retry.insert("backoff".to_string(), json!(backoff));
                }
                if let Some(base) = base {
                    retry.insert("backoff_base".to_string(), json!(base));
                }
                if let Some(max) = max {
                    retry.insert("max_backoff".to_string(), json!(max));
                }
                json!({"error": clause.error_type, "action": "retry", "retry": retry})
            }
            CatchBody::Steps(stmts) => {
                let ids = self.lower_stmts(stmts)?;
                json!({"error": clause.error_type, "steps": ids})
            }
        })
    }

    fn lower_stage(&mut self, stage: &StageDecl) -> Result<Json, TransformError> {
        let line = stage.span.start.line;
        let op = if stage.op == "where" {
            "filter".to_string()
        } else {
            stage.op.clone()
        };
        match op.as_str() {
            "take" | "skip" => {
                let count = match stage.arg.as_ref().map(|e| &e.kind) {
                    Some(ExprKind::Number(n)) => *n as u64,
                    _ => {
                        return Err(TransformError::StageBody {
                            op,
                            message: "requires a numeric count".to_string(),
                            line,
                        })
                    }
                };
                Ok(json!({"op": op, "count": count}))
            }
            "sort" => {
                let mut record = json!({"op": "sort", "order": stage.order.as_deref().unwrap_or("asc")});
                if let Some(by) = &stage.by {
                    record["by"] = json!(self.unparse(by)?);
                }
                Ok(record)
            }
            "map" | "pmap" | "filter" | "reduce" => {
                // One statement per stage; the surface grammar admits more
                // but the intermediate does not.
                if stage.body.len() != 1 {
                    return Err(TransformError::StageBody {
                        op,
                        message: format!(
                            "takes exactly one statement, found {}",
                            stage.body.len()
                        ),
                        line,
                    });
                }
                let body_ids = self.lower_stage_body(&stage.body[0])?;
                let step_id = body_ids.into_iter().next().ok_or_else(|| {
                    TransformError::StageBody {
                        op: op.clone(),
                        message: "requires a non-empty body".to_string(),
                        line,
                    }
                })?;
                let mut record = json!({"op": op, "step": step_id});
                if op == "reduce" {
                    let initial = stage.arg.as_ref().ok_or_else(|| TransformError::StageBody {
                        op: "reduce".to_string(),
                        message: "requires an initial value: reduce(<initial>)".to_string(),
                        line,
                    })?;
                    record["initial"] = json!(self.expr_value(initial)?);
                }
                Ok(record)
            }
            other => Err(TransformError::StageBody {
                op: other.to_string(),
                message: "is not a pipeline stage op".to_string(),
                line,
            }),
        }
    }

    /// A stage body statement lowers like any other, except a bare
    /// expression becomes a compute step bound to `<id>_result`.
    fn lower_stage_body(&mut self, stmt: &Stmt) -> Result<Vec<String>, TransformError> {
        if let StmtKind::ExprStmt(expr) = &stmt.kind {
            let id = self.next_id("compute");
            let variable = format!("{id}_result");
            let value = self.expr_value(expr)?;
            self.steps.push(json!({
                "id": id,
                "compute": [{"variable": variable, "expression": value}],
            }));
            return Ok(vec![id]);
        }
        self.lower_statement(stmt)
    }

    // ------------------------------------------------------------------
    // Method calls and actions
    // ------------------------------------------------------------------

    fn lower_method_call(&mut self, stmt: &Stmt) -> Result<Vec<String>, TransformError> {
        let line = stmt.span.start.line;
        let (object, method, args, kwargs, using, constraints, output_binding) = match &stmt.kind {
            StmtKind::MethodCall {
                object,
                method,
                args,
                kwargs,
                using,
                constraints,
                output_binding,
            } => (object, method, args, kwargs, using, constraints, output_binding),
            _ => {
                return Err(TransformError::InvalidStatement {
                    message: "expected a method call".to_string(),
                    line,
                })
            }
        };

        let venue = match &object.kind {
            ExprKind::VenueRef(name) => name.clone(),
            ExprKind::Identifier(name) => name.clone(),
            _ => self.unparse(object)?,
        };

        // Read-only query methods become compute steps.
        if matches!(method.as_str(), "get_rates" | "get_supply_rates") {
            let id = self.next_id("compute");
            let variable = output_binding
                .clone()
                .unwrap_or_else(|| format!("{id}_result"));
            let call = self.render_call(&venue, method, args)?;
            self.steps.push(json!({
                "id": id,
                "compute": [{"variable": variable, "expression": call}],
            }));
            return Ok(vec![id]);
        }

        let action_type = match method.as_str() {
            "deposit" | "supply" => "lend",
            "withdraw" => "withdraw",
            "borrow" => "borrow",
            "repay" => "repay",
            "stake" => "stake",
            "unstake" => "unstake",
            "claim" => "claim",
            "swap" => "swap",
            "bridge" => "bridge",
            "transfer" => "transfer",
            other => other,
        };

        let mut action = serde_json::Map::new();
        action.insert("type".to_string(), json!(action_type));
        action.insert("venue".to_string(), json!(venue));

        // Positional arguments are plucked per action kind.
        match action_type {
            "lend" | "withdraw" | "repay" | "stake" | "unstake" => {
                self.put_symbol(&mut action, "asset", args.first(), line)?;
                self.put_amount(&mut action, "amount", args.get(1))?;
            }
            "borrow" => {
                self.put_symbol(&mut action, "asset", args.first(), line)?;
                self.put_amount(&mut action, "amount", args.get(1))?;
                if let Some(collateral) = args.get(2) {
                    action.insert("collateral".to_string(), json!(self.symbol_of(collateral)));
                }
            }
            "claim" => {
                if let Some(asset) = args.first() {
                    action.insert("asset".to_string(), json!(self.symbol_of(asset)));
                }
            }
            "swap" => {
                self.put_symbol(&mut action, "from_asset", args.first(), line)?;
                self.put_symbol(&mut action, "to_asset", args.get(1), line)?;
                self.put_amount(&mut action, "amount", args.get(2))?;
            }
            "bridge" => {
                self.put_symbol(&mut action, "asset", args.first(), line)?;
                self.put_amount(&mut action, "amount", args.get(1))?;
                if let Some(chain) = args.get(2) {
                    action.insert("to_chain".to_string(), json!(self.symbol_of(chain)));
                }
            }
            "transfer" => {
                self.put_symbol(&mut action, "asset", args.first(), line)?;
                self.put_amount(&mut action, "amount", args.get(1))?;
                if let Some(to) = args.get(2) {
                    action.insert("to".to_string(), self.expr_value(to)?);
                }
            }
            _ => {
                let mut rendered = Vec::new();
                for arg in args {
                    rendered.push(self.expr_value(arg)?);
                }
                action.insert("args".to_string(), json!(rendered));
            }
        }

        // Keyword arguments override or extend the positional plucking.
        for (key, value) in kwargs {
            let rendered = match key.as_str() {
                "asset" | "from_asset" | "to_asset" | "collateral" | "to_chain" => {
                    json!(self.symbol_of(value))
                }
                "amount" => self.amount_value(value)?,
                _ => self.expr_value(value)?,
            };
            action.insert(key.clone(), rendered);
        }

        if let Some(skill) = using {
            action.insert("skill".to_string(), json!(skill));
        }

        let id = self.next_id("action");
        let mut record = json!({"id": id, "action": action});

        if !constraints.is_empty() {
            let mut map = serde_json::Map::new();
            for (key, value) in constraints {
                let key = match key.as_str() {
                    "slippage" => "max_slippage",
                    "min_out" => "min_output",
                    "max_in" => "max_input",
                    other => other,
                };
                map.insert(key.to_string(), self.expr_value(value)?);
            }
            record["constraints"] = Json::Object(map);
        }
        if let Some(binding) = output_binding {
            record["output_binding"] = json!(binding);
        }

        self.steps.push(record);
        Ok(vec![id])
    }

    fn render_call(
        &self,
        venue: &str,
        method: &str,
        args: &[Expr],
    ) -> Result<String, TransformError> {
        let mut out = format!("{venue}.{method}(");
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&self.unparse(arg)?);
        }
        out.push(')');
        Ok(out)
    }

    fn put_symbol(
        &self,
        action: &mut serde_json::Map<String, Json>,
        key: &str,
        expr: Option<&Expr>,
        line: u32,
    ) -> Result<(), TransformError> {
        let expr = expr.ok_or_else(|| TransformError::InvalidStatement {
            message: format!("action is missing its '{key}' argument"),
            line,
        })?;
        action.insert(key.to_string(), json!(self.symbol_of(expr)));
        Ok(())
    }

    fn put_amount(
        &self,
        action: &mut serde_json::Map<String, Json>,
        key: &str,
        expr: Option<&Expr>,
    ) -> Result<(), TransformError> {
        if let Some(expr) = expr {
            action.insert(key.to_string(), self.amount_value(expr)?);
        }
        Ok(())
    }

    /// `max` stays a sentinel string; everything else is an expression
    /// value.
    fn amount_value(&self, expr: &Expr) -> Result<Json, TransformError> {
        if matches!(&expr.kind, ExprKind::Identifier(name) if name == "max") {
            return Ok(json!("max"));
        }
        self.expr_value(expr)
    }

    fn symbol_of(&self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Identifier(name) | ExprKind::VenueRef(name) => name.clone(),
            ExprKind::Str(s) => s.clone(),
            _ => self.unparse(expr).unwrap_or_default(),
        }
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    fn inline_block(
        &mut self,
        name: &str,
        args: &[Expr],
        line: u32,
    ) -> Result<Vec<String>, TransformError> {
        let block = self
            .blocks
            .get(name)
            .cloned()
            .ok_or_else(|| TransformError::UnknownBlock {
                name: name.to_string(),
                line,
            })?;
        if block.params.len() != args.len() {
            return Err(TransformError::BlockArity {
                name: name.to_string(),
                expected: block.params.len(),
                given: args.len(),
                line,
            });
        }
        if self.inline_depth >= MAX_INLINE_DEPTH {
            return Err(TransformError::InlineDepth {
                name: name.to_string(),
                line,
            });
        }

        let mut ids = Vec::new();
        if !block.params.is_empty() {
            let id = self.next_id("compute");
            let mut assignments = Vec::new();
            for (param, arg) in block.params.iter().zip(args) {
                assignments.push(json!({"variable": param, "expression": self.expr_value(arg)?}));
            }
            self.steps.push(json!({"id": id, "compute": assignments}));
            ids.push(id);
        }

        self.inline_depth += 1;
        let body_ids = self.lower_stmts(&block.body);
        self.inline_depth -= 1;
        ids.extend(body_ids?);
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Expression helpers
    // ------------------------------------------------------------------

    fn unparse(&self, expr: &Expr) -> Result<String, TransformError> {
        Ok(unparse(expr, &self.decimals)?)
    }

    /// Numbers and booleans pass through as JSON scalars; everything else
    /// is carried as its canonical surface string.
    fn expr_value(&self, expr: &Expr) -> Result<Json, TransformError> {
        Ok(match &expr.kind {
            ExprKind::Number(n) => json!(n),
            ExprKind::Bool(b) => json!(b),
            ExprKind::Percentage(p) => json!(p),
            ExprKind::UnitLiteral { value, unit } => {
                json!(resolve_unit(*value, unit, &self.decimals)?)
            }
            _ => json!(self.unparse(expr)?),
        })
    }

    /// Strictly-literal JSON rendering, or None for anything computed.
    fn literal_json(&self, expr: &Expr) -> Result<Option<Json>, TransformError> {
        Ok(match &expr.kind {
            // Fold negated number literals.
            ExprKind::Unary { op, operand } if op == "-" => match &operand.kind {
                ExprKind::Number(n) => Some(json!(-n)),
                _ => None,
            },
            ExprKind::Number(n) => Some(json!(n)),
            ExprKind::Str(s) => Some(json!(s)),
            ExprKind::Bool(b) => Some(json!(b)),
            ExprKind::Address(a) => Some(json!(a)),
            ExprKind::Percentage(p) => Some(json!(p)),
            ExprKind::UnitLiteral { value, unit } => {
                Some(json!(resolve_unit(*value, unit, &self.decimals)?))
            }
            ExprKind::ArrayLiteral(items) => {
                let mut out = Vec::new();
                for item in items {
                    match self.literal_json(item)? {
                        Some(value) => out.push(value),
                        None => return Ok(None),
                    }
                }
                Some(Json::Array(out))
            }
            ExprKind::ObjectLiteral(fields) => {
                let mut out = serde_json::Map::new();
                for (key, value) in fields {
                    match self.literal_json(value)? {
                        Some(value) => {
                            out.insert(key.clone(), value);
                        }
                        None => return Ok(None),
                    }
                }
                Some(Json::Object(out))
            }
            _ => None,
        })
    }

    /// Recursive serialization for schema-shaped expressions: identifiers
    /// become their names, literals their values, anything else its
    /// canonical string.
    fn expr_json(&self, expr: &Expr) -> Result<Json, TransformError> {
        Ok(match &expr.kind {
            ExprKind::Identifier(name) => json!(name),
            ExprKind::ObjectLiteral(fields) => {
                let mut out = serde_json::Map::new();
                for (key, value) in fields {
                    out.insert(key.clone(), self.expr_json(value)?);
                }
                Json::Object(out)
            }
            ExprKind::ArrayLiteral(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.push(self.expr_json(item)?);
                }
                Json::Array(out)
            }
            _ => match self.literal_json(expr)? {
                Some(value) => value,
                None => json!(self.unparse(expr)?),
            },
        })
    }

    fn section_value_json(&self, value: &SectionValue) -> Result<Json, TransformError> {
        Ok(match value {
            SectionValue::Expr(expr) => self.expr_json(expr)?,
            SectionValue::AdvisoryCheck { prompt, advisor } => {
                let mut out = serde_json::Map::new();
                out.insert("prompt".to_string(), json!(prompt));
                if let Some(advisor) = advisor {
                    out.insert("advisor".to_string(), json!(advisor));
                }
                Json::Object(out)
            }
            SectionValue::Map(entries) => {
                let mut out = serde_json::Map::new();
                for entry in entries {
                    out.insert(entry.key.clone(), self.section_value_json(&entry.value)?);
                }
                Json::Object(out)
            }
        })
    }
}

/// Fields of a map-shaped section value, whether written as an indented
/// block or an inline object literal.
fn entry_fields(value: &SectionValue) -> Option<Vec<(String, Expr)>> {
    match value {
        SectionValue::Map(entries) => {
            let mut out = Vec::new();
            for entry in entries {
                match &entry.value {
                    SectionValue::Expr(expr) => out.push((entry.key.clone(), expr.clone())),
                    _ => return None,
                }
            }
            Some(out)
        }
        SectionValue::Expr(Expr {
            kind: ExprKind::ObjectLiteral(fields),
            ..
        }) => Some(fields.clone()),
        _ => None,
    }
}

fn name_of(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Identifier(name) => Some(name.clone()),
        ExprKind::Str(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;
