// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical expression stringification.
//!
//! Expressions embedded in a spell source document are carried as surface
//! strings; this module produces the canonical form the expression
//! re-parser accepts back. Unit literals are resolved to raw base-unit
//! integers here, which requires the asset decimals table.

use crate::ast::{Expr, ExprKind};
use grim_core::format_number;
use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnparseError {
    #[error("unknown unit '{unit}' (not a declared asset symbol)")]
    UnknownUnit { unit: String },
}

/// Resolve a unit literal to base units: `floor(value * 10^decimals)`.
/// `bps` and `bp` pass through as integers.
pub fn resolve_unit(value: f64, unit: &str, decimals: &IndexMap<String, u32>) -> Result<f64, UnparseError> {
    if unit == "bps" || unit == "bp" {
        return Ok(value.floor());
    }
    match decimals.get(unit) {
        Some(d) => Ok((value * 10f64.powi(*d as i32)).floor()),
        None => Err(UnparseError::UnknownUnit {
            unit: unit.to_string(),
        }),
    }
}

/// Render an expression to its canonical surface string.
pub fn unparse(expr: &Expr, decimals: &IndexMap<String, u32>) -> Result<String, UnparseError> {
    let mut out = String::new();
    write_expr(expr, decimals, &mut out)?;
    Ok(out)
}

fn write_expr(
    expr: &Expr,
    decimals: &IndexMap<String, u32>,
    out: &mut String,
) -> Result<(), UnparseError> {
    match &expr.kind {
        ExprKind::Number(n) => out.push_str(&format_number(*n)),
        ExprKind::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    '\r' => out.push_str("\\r"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
        ExprKind::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        ExprKind::Address(addr) => out.push_str(addr),
        ExprKind::Identifier(name) => out.push_str(name),
        ExprKind::VenueRef(name) => {
            out.push('@');
            out.push_str(name);
        }
        ExprKind::Advisory(prompt) => {
            out.push_str("**");
            out.push_str(prompt);
            out.push_str("**");
        }
        // Already divided by 100 at tokenize time.
        ExprKind::Percentage(p) => out.push_str(&format_number(*p)),
        ExprKind::UnitLiteral { value, unit } => {
            let base = resolve_unit(*value, unit, decimals)?;
            out.push_str(&format_number(base));
        }
        ExprKind::Binary { op, left, right } => {
            let op = match op.as_str() {
                "and" => "AND",
                "or" => "OR",
                other => other,
            };
            out.push('(');
            write_expr(left, decimals, out)?;
            out.push(' ');
            out.push_str(op);
            out.push(' ');
            write_expr(right, decimals, out)?;
            out.push(')');
        }
        ExprKind::Unary { op, operand } => {
            if op == "not" {
                out.push_str("not ");
            } else {
                out.push_str(op);
            }
            write_expr(operand, decimals, out)?;
        }
        ExprKind::Call {
            callee,
            args,
            kwargs,
        } => {
            write_expr(callee, decimals, out)?;
            out.push('(');
            let mut first = true;
            for arg in args {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                write_expr(arg, decimals, out)?;
            }
            for (key, value) in kwargs {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                out.push_str(key);
                out.push('=');
                write_expr(value, decimals, out)?;
            }
            out.push(')');
        }
        ExprKind::PropertyAccess { object, property } => {
            write_expr(object, decimals, out)?;
            out.push('.');
            out.push_str(property);
        }
        ExprKind::ArrayAccess { array, index } => {
            write_expr(array, decimals, out)?;
            out.push('[');
            write_expr(index, decimals, out)?;
            out.push(']');
        }
        ExprKind::ArrayLiteral(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(item, decimals, out)?;
            }
            out.push(']');
        }
        ExprKind::ObjectLiteral(fields) => {
            out.push('{');
            for (i, (key, value)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(key);
                out.push_str(": ");
                write_expr(value, decimals, out)?;
            }
            out.push('}');
        }
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            out.push('(');
            write_expr(condition, decimals, out)?;
            out.push_str(" ? ");
            write_expr(then_expr, decimals, out)?;
            out.push_str(" : ");
            write_expr(else_expr, decimals, out)?;
            out.push(')');
        }
    }
    Ok(())
}
