// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisor boundary.
//!
//! Advisory steps, advisory expressions, and advisory guards all route
//! through one handler. Absent a handler the engine falls back to the
//! step's declared fallback value.

use async_trait::async_trait;
use grim_core::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("advisor '{0}' is not configured")]
    UnknownAdvisor(String),

    #[error("advisor call failed: {0}")]
    Failed(String),

    #[error("advisor call timed out after {0}s")]
    DeadlineExceeded(f64),
}

impl AdvisorError {
    pub fn kind(&self) -> &'static str {
        match self {
            AdvisorError::DeadlineExceeded(_) => "deadline_exceeded",
            _ => "action_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdvisoryRequest {
    pub step_id: String,
    pub advisor: String,
    pub prompt: String,
    /// Seconds.
    pub timeout: f64,
    pub output_schema: Option<serde_json::Value>,
    /// Advisor tooling configuration from the execution context.
    pub tooling: Option<serde_json::Value>,
}

#[async_trait]
pub trait AdvisorHandler: Send + Sync {
    async fn advise(&self, request: AdvisoryRequest) -> Result<Value, AdvisorError>;
}

/// Canned-answer advisor for tests: answers per advisor name and records
/// every prompt.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct FakeAdvisor {
    answers: Mutex<HashMap<String, Value>>,
    prompts: Mutex<Vec<(String, String)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, advisor: &str, value: Value) {
        self.answers.lock().insert(advisor.to_string(), value);
    }

    /// `(advisor, prompt)` pairs in call order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl AdvisorHandler for FakeAdvisor {
    async fn advise(&self, request: AdvisoryRequest) -> Result<Value, AdvisorError> {
        self.prompts
            .lock()
            .push((request.advisor.clone(), request.prompt.clone()));
        match self.answers.lock().get(&request.advisor) {
            Some(value) => Ok(value.clone()),
            None => Err(AdvisorError::UnknownAdvisor(request.advisor)),
        }
    }
}
