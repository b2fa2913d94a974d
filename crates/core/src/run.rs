// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run records persisted by the state store

use crate::id::RunId;
use crate::metrics::RunMetrics;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// How side-effecting actions are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Simulate,
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Simulate => write!(f, "simulate"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Where a stored run came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Content hash of the compiled spell.
    pub spell_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    pub mode: ExecutionMode,
}

/// One completed (or failed) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    /// ISO-8601 timestamp of run start.
    pub timestamp: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds.
    pub duration: u64,
    pub metrics: RunMetrics,
    pub final_state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

/// Format epoch milliseconds as an ISO-8601 UTC timestamp.
pub fn iso8601(epoch_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
