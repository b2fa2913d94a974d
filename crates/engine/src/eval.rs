// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Async expression evaluator.
//!
//! Deterministic and side-effect-free except for venue queries and advisor
//! callbacks, which suspend. Errors never escape as panics; every failure
//! is an `ExpressionError` surfaced by the calling executor.

use crate::context::ExecutionContext;
use grim_core::{BinaryOp, Clock, Expression, LedgerEvent, UnaryOp, Value};
use grim_adapters::{AdvisorHandler, AdvisoryRequest, VenueReader};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Default timeout for advisory expressions (advisory steps carry their
/// own).
const ADVISORY_EXPR_TIMEOUT_SECS: f64 = 30.0;

#[derive(Debug, Clone, Error)]
#[error("expression error: {message}")]
pub struct ExpressionError {
    pub message: String,
}

impl ExpressionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Everything an expression can reach at runtime.
pub struct EvalEnv<'a> {
    pub ctx: &'a ExecutionContext,
    /// Declared venue aliases, for dotted query dispatch.
    pub venues: &'a HashSet<String>,
    pub reader: &'a dyn VenueReader,
    pub advisor: Option<&'a dyn AdvisorHandler>,
    /// Advisor used by bare `**...**` expressions.
    pub default_advisor: &'a str,
    pub clock: &'a dyn Clock,
}

type EvalFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ExpressionError>> + Send + 'a>>;

/// Evaluate an expression against the environment.
pub fn eval<'a>(expr: &'a Expression, env: &'a EvalEnv<'a>) -> EvalFuture<'a> {
    Box::pin(async move {
        match expr {
            Expression::Literal { value } => Ok(value.clone()),

            Expression::Identifier { name } => match name.as_str() {
                "params" => Ok(env.ctx.params_object()),
                "state" => Ok(env.ctx.state_object()),
                _ => env
                    .ctx
                    .resolve(name)
                    .ok_or_else(|| ExpressionError::new(format!("unknown identifier '{name}'"))),
            },

            Expression::VenueRef { name } => Ok(Value::String(name.clone())),

            Expression::Advisory { prompt } => {
                let Some(advisor) = env.advisor else {
                    return Err(ExpressionError::new(format!(
                        "advisory '{prompt}' requires an advisor handler"
                    )));
                };
                env.ctx.ledger.record(LedgerEvent::AdvisoryStarted {
                    step_id: String::new(),
                    advisor: env.default_advisor.to_string(),
                });
                env.ctx.increment_advisory_calls();
                let request = AdvisoryRequest {
                    step_id: String::new(),
                    advisor: env.default_advisor.to_string(),
                    prompt: prompt.clone(),
                    timeout: ADVISORY_EXPR_TIMEOUT_SECS,
                    output_schema: None,
                    tooling: env.ctx.advisor_tooling.clone(),
                };
                let value = advisor
                    .advise(request)
                    .await
                    .map_err(|e| ExpressionError::new(e.to_string()))?;
                env.ctx.ledger.record(LedgerEvent::AdvisoryCompleted {
                    step_id: String::new(),
                    advisor: env.default_advisor.to_string(),
                    fallback_used: false,
                });
                Ok(value)
            }

            Expression::Binary { op, left, right } => eval_binary(*op, left, right, env).await,

            Expression::Unary { op, operand } => {
                let value = eval(operand, env).await?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value.as_number() {
                        Some(n) => Ok(Value::Number(-n)),
                        None => Err(ExpressionError::new(format!(
                            "cannot negate a {}",
                            value.type_name()
                        ))),
                    },
                }
            }

            Expression::Call {
                callee,
                args,
                kwargs,
            } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval(arg, env).await?);
                }
                // Keyword arguments evaluate in order but only venue
                // queries consume them, packed as a trailing object.
                let mut kwarg_values = Vec::new();
                for (key, value) in kwargs {
                    kwarg_values.push((key.clone(), eval(value, env).await?));
                }
                call(callee, values, kwarg_values, env).await
            }

            Expression::PropertyAccess { object, property } => {
                let value = eval(object, env).await?;
                property_of(&value, property)
            }

            Expression::ArrayAccess { array, index } => {
                let array_value = eval(array, env).await?;
                let index_value = eval(index, env).await?;
                let items = array_value.as_array().ok_or_else(|| {
                    ExpressionError::new(format!(
                        "cannot index a {}",
                        array_value.type_name()
                    ))
                })?;
                let index = index_value.as_number().ok_or_else(|| {
                    ExpressionError::new("array index must be a number")
                })? as usize;
                items.get(index).cloned().ok_or_else(|| {
                    ExpressionError::new(format!(
                        "index {index} out of bounds (len {})",
                        items.len()
                    ))
                })
            }

            Expression::ArrayLiteral { items } => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(eval(item, env).await?);
                }
                Ok(Value::Array(out))
            }

            Expression::ObjectLiteral { fields } => {
                let mut out = indexmap::IndexMap::new();
                for (key, value) in fields {
                    out.insert(key.clone(), eval(value, env).await?);
                }
                Ok(Value::Object(out))
            }

            Expression::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                let condition = eval(condition, env).await?;
                if condition.is_truthy() {
                    eval(then_expr, env).await
                } else {
                    eval(else_expr, env).await
                }
            }
        }
    })
}

async fn eval_binary(
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    env: &EvalEnv<'_>,
) -> Result<Value, ExpressionError> {
    // Boolean operators short-circuit.
    match op {
        BinaryOp::And => {
            let lhs = eval(left, env).await?;
            if !lhs.is_truthy() {
                return Ok(Value::Bool(false));
            }
            let rhs = eval(right, env).await?;
            return Ok(Value::Bool(rhs.is_truthy()));
        }
        BinaryOp::Or => {
            let lhs = eval(left, env).await?;
            if lhs.is_truthy() {
                return Ok(Value::Bool(true));
            }
            let rhs = eval(right, env).await?;
            return Ok(Value::Bool(rhs.is_truthy()));
        }
        _ => {}
    }

    let lhs = eval(left, env).await?;
    let rhs = eval(right, env).await?;

    // Equality is deep value equality, any types.
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => return Ok(Value::Bool(lhs != rhs)),
        _ => {}
    }

    // String concatenation.
    if op == BinaryOp::Add {
        if let (Value::String(a), Value::String(b)) = (&lhs, &rhs) {
            return Ok(Value::String(format!("{a}{b}")));
        }
    }

    let (a, b) = match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ExpressionError::new(format!(
                "operator '{}' needs numbers, got {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            )))
        }
    };
    Ok(match op {
        BinaryOp::Add => Value::Number(a + b),
        BinaryOp::Sub => Value::Number(a - b),
        BinaryOp::Mul => Value::Number(a * b),
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ExpressionError::new("division by zero"));
            }
            Value::Number(a / b)
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(ExpressionError::new("modulo by zero"));
            }
            Value::Number(a % b)
        }
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Ge => Value::Bool(a >= b),
        // Handled above.
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => unreachable!(),
    })
}

/// Field lookup with the known-property fallbacks for structured runtime
/// values: `.success`, `.error`, and `.value` resolve on any value.
fn property_of(value: &Value, property: &str) -> Result<Value, ExpressionError> {
    if let Value::Object(fields) = value {
        if let Some(found) = fields.get(property) {
            return Ok(found.clone());
        }
    }
    match property {
        "success" => Ok(Value::Bool(true)),
        "error" => Ok(Value::Null),
        "value" => Ok(value.clone()),
        _ => Err(ExpressionError::new(format!(
            "unknown property '{property}' on {}",
            value.type_name()
        ))),
    }
}

async fn call(
    callee: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    env: &EvalEnv<'_>,
) -> Result<Value, ExpressionError> {
    // Dotted targets are venue queries: `aave.get_rates(USDC)`.
    if let Some((venue, method)) = callee.split_once('.') {
        let venue = venue.trim_start_matches('@');
        if !env.venues.contains(venue) {
            return Err(ExpressionError::new(format!(
                "unknown venue '{venue}' in call '{callee}'"
            )));
        }
        let mut query_args = args;
        if !kwargs.is_empty() {
            query_args.push(Value::Object(kwargs.into_iter().collect()));
        }
        return env
            .reader
            .query(venue, method, &query_args)
            .await
            .map_err(|e| ExpressionError::new(e.to_string()));
    }

    builtin(callee, args, env)
}

fn builtin(name: &str, args: Vec<Value>, env: &EvalEnv<'_>) -> Result<Value, ExpressionError> {
    let numbers = |args: &[Value]| -> Result<Vec<f64>, ExpressionError> {
        // A single array argument spreads.
        let items: Vec<Value> = match args {
            [Value::Array(items)] => items.clone(),
            _ => args.to_vec(),
        };
        items
            .iter()
            .map(|v| {
                v.as_number().ok_or_else(|| {
                    ExpressionError::new(format!("{name}() needs numbers, got {}", v.type_name()))
                })
            })
            .collect()
    };
    let one_number = |args: &[Value]| -> Result<f64, ExpressionError> {
        match args {
            [value] => value.as_number().ok_or_else(|| {
                ExpressionError::new(format!("{name}() needs a number, got {}", value.type_name()))
            }),
            _ => Err(ExpressionError::new(format!(
                "{name}() takes exactly one argument"
            ))),
        }
    };

    match name {
        "min" => {
            let numbers = numbers(&args)?;
            numbers
                .into_iter()
                .reduce(f64::min)
                .map(Value::Number)
                .ok_or_else(|| ExpressionError::new("min() of nothing"))
        }
        "max" => {
            let numbers = numbers(&args)?;
            numbers
                .into_iter()
                .reduce(f64::max)
                .map(Value::Number)
                .ok_or_else(|| ExpressionError::new("max() of nothing"))
        }
        "abs" => Ok(Value::Number(one_number(&args)?.abs())),
        "floor" => Ok(Value::Number(one_number(&args)?.floor())),
        "ceil" => Ok(Value::Number(one_number(&args)?.ceil())),
        "round" => Ok(Value::Number(one_number(&args)?.round())),
        "sum" => Ok(Value::Number(numbers(&args)?.into_iter().sum())),
        "len" => match args.as_slice() {
            [Value::Array(items)] => Ok(Value::Number(items.len() as f64)),
            [Value::String(s)] => Ok(Value::Number(s.chars().count() as f64)),
            [Value::Object(fields)] => Ok(Value::Number(fields.len() as f64)),
            [other] => Err(ExpressionError::new(format!(
                "len() of a {}",
                other.type_name()
            ))),
            _ => Err(ExpressionError::new("len() takes exactly one argument")),
        },
        "any" => match args.as_slice() {
            [Value::Array(items)] => Ok(Value::Bool(items.iter().any(Value::is_truthy))),
            _ => Ok(Value::Bool(args.iter().any(Value::is_truthy))),
        },
        "all" => match args.as_slice() {
            [Value::Array(items)] => Ok(Value::Bool(items.iter().all(Value::is_truthy))),
            _ => Ok(Value::Bool(args.iter().all(Value::is_truthy))),
        },
        "pow" => match args.as_slice() {
            [base, exp] => match (base.as_number(), exp.as_number()) {
                (Some(base), Some(exp)) => Ok(Value::Number(base.powf(exp))),
                _ => Err(ExpressionError::new("pow() needs numbers")),
            },
            _ => Err(ExpressionError::new("pow() takes two arguments")),
        },
        "now" => Ok(Value::Number(env.clock.now_secs() as f64)),
        other => Err(ExpressionError::new(format!("unknown function '{other}'"))),
    }
}

#[cfg(test)]
#[path = "eval_tests.rs"]
mod tests;
