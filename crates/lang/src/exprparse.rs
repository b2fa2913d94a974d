// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expression re-parser.
//!
//! Rehydrates the canonical surface strings embedded in a spell source
//! document (conditions, compute right-hand sides, constraint values, emit
//! data) into typed `Expression` trees for the IR. Same grammar as the main
//! parser's expression rules, operating on a single line.

use crate::ast::{Expr, ExprKind};
use crate::parser::{parse_expression_tokens, ParseError};
use crate::tokenizer::{tokenize, LexError};
use grim_core::{BinaryOp, Expression, UnaryOp};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprParseError {
    #[error("{0}")]
    Lex(#[from] LexError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("unsupported in this position: {message}")]
    Unsupported { message: String },
}

/// Parse a single-line expression string into a typed tree.
pub fn parse_expression(text: &str) -> Result<Expression, ExprParseError> {
    let tokens = tokenize(text)?;
    let expr = parse_expression_tokens(tokens)?;
    lower(&expr)
}

fn lower(expr: &Expr) -> Result<Expression, ExprParseError> {
    Ok(match &expr.kind {
        ExprKind::Number(n) => Expression::literal(*n),
        ExprKind::Str(s) => Expression::literal(s.as_str()),
        ExprKind::Bool(b) => Expression::literal(*b),
        ExprKind::Address(addr) => Expression::literal(addr.as_str()),
        ExprKind::Percentage(p) => Expression::literal(*p),
        ExprKind::Identifier(name) => Expression::identifier(name.clone()),
        ExprKind::VenueRef(name) => Expression::VenueRef { name: name.clone() },
        ExprKind::Advisory(prompt) => Expression::Advisory {
            prompt: prompt.clone(),
        },
        ExprKind::UnitLiteral { unit, .. } => {
            // Canonical strings carry resolved base-unit integers.
            return Err(ExprParseError::Unsupported {
                message: format!("unit literal '{unit}' (units resolve at transform time)"),
            });
        }
        ExprKind::Binary { op, left, right } => Expression::Binary {
            op: binary_op(op)?,
            left: Box::new(lower(left)?),
            right: Box::new(lower(right)?),
        },
        ExprKind::Unary { op, operand } => Expression::Unary {
            op: match op.as_str() {
                "not" => UnaryOp::Not,
                "-" => UnaryOp::Neg,
                other => {
                    return Err(ExprParseError::Unsupported {
                        message: format!("unary operator '{other}'"),
                    })
                }
            },
            operand: Box::new(lower(operand)?),
        },
        ExprKind::Call {
            callee,
            args,
            kwargs,
        } => {
            let callee = callee_name(callee).ok_or_else(|| ExprParseError::Unsupported {
                message: "computed call targets".to_string(),
            })?;
            let mut lowered_args = Vec::new();
            for arg in args {
                lowered_args.push(lower(arg)?);
            }
            let mut lowered_kwargs = Vec::new();
            for (key, value) in kwargs {
                lowered_kwargs.push((key.clone(), lower(value)?));
            }
            Expression::Call {
                callee,
                args: lowered_args,
                kwargs: lowered_kwargs,
            }
        }
        ExprKind::PropertyAccess { object, property } => Expression::PropertyAccess {
            object: Box::new(lower(object)?),
            property: property.clone(),
        },
        ExprKind::ArrayAccess { array, index } => Expression::ArrayAccess {
            array: Box::new(lower(array)?),
            index: Box::new(lower(index)?),
        },
        ExprKind::ArrayLiteral(items) => {
            let mut lowered = Vec::new();
            for item in items {
                lowered.push(lower(item)?);
            }
            Expression::ArrayLiteral { items: lowered }
        }
        ExprKind::ObjectLiteral(fields) => {
            let mut lowered = Vec::new();
            for (key, value) in fields {
                lowered.push((key.clone(), lower(value)?));
            }
            Expression::ObjectLiteral { fields: lowered }
        }
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => Expression::Ternary {
            condition: Box::new(lower(condition)?),
            then_expr: Box::new(lower(then_expr)?),
            else_expr: Box::new(lower(else_expr)?),
        },
    })
}

/// A call target is an identifier or a dotted chain (`venue.method`).
fn callee_name(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Identifier(name) => Some(name.clone()),
        ExprKind::VenueRef(name) => Some(format!("@{name}")),
        ExprKind::PropertyAccess { object, property } => {
            let base = callee_name(object)?;
            Some(format!("{base}.{property}"))
        }
        _ => None,
    }
}

fn binary_op(op: &str) -> Result<BinaryOp, ExprParseError> {
    Ok(match op {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        ">" => BinaryOp::Gt,
        "<=" => BinaryOp::Le,
        ">=" => BinaryOp::Ge,
        "and" => BinaryOp::And,
        "or" => BinaryOp::Or,
        other => {
            return Err(ExprParseError::Unsupported {
                message: format!("binary operator '{other}'"),
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(parse_expression("42").unwrap(), Expression::literal(42.0));
        assert_eq!(
            parse_expression("\"hi\"").unwrap(),
            Expression::literal("hi")
        );
        assert_eq!(parse_expression("true").unwrap(), Expression::literal(true));
    }

    #[test]
    fn canonical_binary_round_trip() {
        let expr = parse_expression("(params.amount > 0)").unwrap();
        match expr {
            Expression::Binary { op, left, .. } => {
                assert_eq!(op, BinaryOp::Gt);
                match *left {
                    Expression::PropertyAccess { object, property } => {
                        assert_eq!(*object, Expression::identifier("params"));
                        assert_eq!(property, "amount");
                    }
                    other => panic!("unexpected lhs {other:?}"),
                }
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn uppercase_logicals_from_canonical_strings() {
        let expr = parse_expression("((a AND b) OR c)").unwrap();
        match expr {
            Expression::Binary { op, .. } => assert_eq!(op, BinaryOp::Or),
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn dotted_call_targets_flatten() {
        let expr = parse_expression("aave.get_rates(USDC)").unwrap();
        match expr {
            Expression::Call { callee, args, .. } => {
                assert_eq!(callee, "aave.get_rates");
                assert_eq!(args, vec![Expression::identifier("USDC")]);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn ternary_and_collections() {
        let expr = parse_expression("(x ? [1, 2] : {a: 1})").unwrap();
        assert!(matches!(expr, Expression::Ternary { .. }));
    }

    #[test]
    fn venue_and_advisory() {
        assert_eq!(
            parse_expression("@aave").unwrap(),
            Expression::VenueRef {
                name: "aave".into()
            }
        );
        assert_eq!(
            parse_expression("**is it safe**").unwrap(),
            Expression::Advisory {
                prompt: "is it safe".into()
            }
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression(")").is_err());
    }
}
