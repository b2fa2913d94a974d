// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SpellSource: the loose, transport-shaped intermediate.
//!
//! Produced by the transformer and consumed by the IR generator. Steps are
//! free-form JSON records distinguished by the presence of one of the keys
//! `compute|action|if|for|repeat|loop|try|parallel|pipeline|advisory|wait|
//! emit|halt`; expressions inside are carried as canonical surface strings
//! (see `unparse`). The document is human-visible and round-trippable.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Key under which the transformer stamps a step's source position.
pub const SOURCE_LOCATION_KEY: &str = "_sourceLocation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSource {
    pub chain: String,
    pub address: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueSource {
    pub chain: String,
    pub address: String,
    /// Group name the alias was declared under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSource {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub persistent: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub ephemeral: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardSource {
    pub id: String,
    /// Expression string, or the advisory prompt when `advisor` is set.
    pub check: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisor: Option<String>,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// The whole intermediate document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpellSource {
    pub spell: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub assets: IndexMap<String, AssetSource>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub venues: IndexMap<String, VenueSource>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "StateSource::is_empty")]
    pub state: StateSource,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub skills: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub advisors: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guards: Vec<GuardSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<serde_json::Value>,
    #[serde(default)]
    pub steps: Vec<serde_json::Value>,
}

impl StateSource {
    pub fn is_empty(&self) -> bool {
        self.persistent.is_empty() && self.ephemeral.is_empty()
    }
}

impl SpellSource {
    /// The discriminating key of a raw step record, if recognizable.
    pub fn step_discriminator(step: &serde_json::Value) -> Option<&'static str> {
        const KEYS: &[&str] = &[
            "compute", "action", "if", "for", "repeat", "loop", "try", "parallel", "pipeline",
            "advisory", "wait", "emit", "halt",
        ];
        let obj = step.as_object()?;
        KEYS.iter().find(|k| obj.contains_key(**k)).copied()
    }
}
