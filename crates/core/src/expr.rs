// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed expression trees carried by the IR

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Binary operators, lowest-precedence semantics live in the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Surface spelling of the operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A typed expression, produced by the expression re-parser and consumed by
/// the evaluator.
///
/// The serialized shape is the persisted IR contract: a `kind` tag plus the
/// variant fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Literal {
        value: Value,
    },
    Identifier {
        name: String,
    },
    /// `@alias` reference to a venue.
    VenueRef {
        name: String,
    },
    /// `**prompt**` evaluated through an advisor callback.
    Advisory {
        prompt: String,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Call {
        callee: String,
        args: Vec<Expression>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        kwargs: Vec<(String, Expression)>,
    },
    PropertyAccess {
        object: Box<Expression>,
        property: String,
    },
    ArrayAccess {
        array: Box<Expression>,
        index: Box<Expression>,
    },
    ArrayLiteral {
        items: Vec<Expression>,
    },
    ObjectLiteral {
        fields: Vec<(String, Expression)>,
    },
    Ternary {
        condition: Box<Expression>,
        then_expr: Box<Expression>,
        else_expr: Box<Expression>,
    },
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal {
            value: value.into(),
        }
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Expression::Identifier { name: name.into() }
    }

    /// True if evaluating this expression can reach an advisor callback.
    pub fn contains_advisory(&self) -> bool {
        match self {
            Expression::Advisory { .. } => true,
            Expression::Literal { .. }
            | Expression::Identifier { .. }
            | Expression::VenueRef { .. } => false,
            Expression::Binary { left, right, .. } => {
                left.contains_advisory() || right.contains_advisory()
            }
            Expression::Unary { operand, .. } => operand.contains_advisory(),
            Expression::Call { args, kwargs, .. } => {
                args.iter().any(Expression::contains_advisory)
                    || kwargs.iter().any(|(_, e)| e.contains_advisory())
            }
            Expression::PropertyAccess { object, .. } => object.contains_advisory(),
            Expression::ArrayAccess { array, index } => {
                array.contains_advisory() || index.contains_advisory()
            }
            Expression::ArrayLiteral { items } => items.iter().any(Expression::contains_advisory),
            Expression::ObjectLiteral { fields } => {
                fields.iter().any(|(_, e)| e.contains_advisory())
            }
            Expression::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                condition.contains_advisory()
                    || then_expr.contains_advisory()
                    || else_expr.contains_advisory()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_kind_tags() {
        let expr = Expression::Binary {
            op: BinaryOp::Gt,
            left: Box::new(Expression::identifier("x")),
            right: Box::new(Expression::literal(0.0)),
        };
        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(json["kind"], "binary");
        assert_eq!(json["op"], "gt");
        assert_eq!(json["left"]["kind"], "identifier");

        let back: Expression = serde_json::from_value(json).unwrap();
        assert_eq!(back, expr);
    }

    #[test]
    fn contains_advisory_walks_the_tree() {
        let plain = Expression::Call {
            callee: "max".into(),
            args: vec![Expression::literal(1.0), Expression::literal(2.0)],
            kwargs: vec![],
        };
        assert!(!plain.contains_advisory());

        let nested = Expression::Ternary {
            condition: Box::new(Expression::Advisory {
                prompt: "is it safe".into(),
            }),
            then_expr: Box::new(Expression::literal(1.0)),
            else_expr: Box::new(Expression::literal(0.0)),
        };
        assert!(nested.contains_advisory());
    }
}
