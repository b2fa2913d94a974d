// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run execution metrics

use serde::{Deserialize, Serialize};

/// Counters accumulated over one run.
///
/// `gas_used` serializes as a decimal string so it survives JSON stores
/// that cannot represent the full integer range.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub steps_executed: u64,
    pub actions_executed: u64,
    #[serde(with = "gas_string")]
    pub gas_used: u128,
    pub advisory_calls: u64,
    pub errors: u64,
    pub retries: u64,
}

/// Serde adapter: u128 as decimal string.
pub mod gas_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_used_serializes_as_decimal_string() {
        let metrics = RunMetrics {
            steps_executed: 3,
            actions_executed: 1,
            gas_used: 340_282_366_920_938_463_463_374_607_431_768_211_455, // u128::MAX
            advisory_calls: 0,
            errors: 0,
            retries: 0,
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(
            json["gas_used"],
            "340282366920938463463374607431768211455"
        );
        let back: RunMetrics = serde_json::from_value(json).unwrap();
        assert_eq!(back, metrics);
    }

    #[test]
    fn default_is_zeroed() {
        let metrics = RunMetrics::default();
        assert_eq!(metrics.steps_executed, 0);
        assert_eq!(metrics.gas_used, 0);
    }
}
