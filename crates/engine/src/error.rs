// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step failure type threaded through the executors

use crate::eval::ExpressionError;
use grim_adapters::{ActionError, AdvisorError, QueryError};
use thiserror::Error;

/// A failed step. `kind` is what catch blocks match on (one of the
/// catchable error kinds, or a wildcard-only kind).
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    pub kind: String,
    pub message: String,
}

impl StepError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn action_failed(message: impl Into<String>) -> Self {
        Self::new("action_failed", message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new("deadline_exceeded", message)
    }

    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::new("policy_violation", message)
    }

    /// True when a catch block naming `error_type` handles this error.
    pub fn matches(&self, error_type: &str) -> bool {
        error_type == "*" || error_type == self.kind
    }
}

impl From<ExpressionError> for StepError {
    fn from(e: ExpressionError) -> Self {
        Self::new("expression", e.to_string())
    }
}

impl From<ActionError> for StepError {
    fn from(e: ActionError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<AdvisorError> for StepError {
    fn from(e: AdvisorError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<QueryError> for StepError {
    fn from(e: QueryError) -> Self {
        Self::new("network", e.to_string())
    }
}
