// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only venue queries.
//!
//! `venue.get_rates(...)` style calls compile to compute steps whose
//! expressions dispatch here. Real implementations wrap venue SDKs or RPC
//! reads; the engine only needs the trait.

use async_trait::async_trait;
use grim_core::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no venue reader configured (cannot call {venue}.{method})")]
    NotConfigured { venue: String, method: String },

    #[error("query {venue}.{method} failed: {message}")]
    Failed {
        venue: String,
        method: String,
        message: String,
    },
}

#[async_trait]
pub trait VenueReader: Send + Sync {
    async fn query(&self, venue: &str, method: &str, args: &[Value]) -> Result<Value, QueryError>;
}

/// Default reader: every query fails with a configuration error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullVenueReader;

#[async_trait]
impl VenueReader for NullVenueReader {
    async fn query(&self, venue: &str, method: &str, _args: &[Value]) -> Result<Value, QueryError> {
        Err(QueryError::NotConfigured {
            venue: venue.to_string(),
            method: method.to_string(),
        })
    }
}

/// Table-driven reader for tests: `(venue, method)` → value.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct FakeVenueReader {
    answers: Mutex<HashMap<(String, String), Value>>,
    calls: Mutex<Vec<(String, String, Vec<Value>)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeVenueReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, venue: &str, method: &str, value: Value) {
        self.answers
            .lock()
            .insert((venue.to_string(), method.to_string()), value);
    }

    pub fn calls(&self) -> Vec<(String, String, Vec<Value>)> {
        self.calls.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl VenueReader for FakeVenueReader {
    async fn query(&self, venue: &str, method: &str, args: &[Value]) -> Result<Value, QueryError> {
        self.calls
            .lock()
            .push((venue.to_string(), method.to_string(), args.to_vec()));
        match self
            .answers
            .lock()
            .get(&(venue.to_string(), method.to_string()))
        {
            Some(value) => Ok(value.clone()),
            None => Err(QueryError::Failed {
                venue: venue.to_string(),
                method: method.to_string(),
                message: "no canned answer".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_reader_reports_missing_configuration() {
        let err = NullVenueReader
            .query("aave", "get_rates", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("aave.get_rates"));
    }

    #[tokio::test]
    async fn fake_reader_serves_and_records() {
        let reader = FakeVenueReader::new();
        reader.answer("aave", "get_rates", Value::Number(3.5));
        let value = reader
            .query("aave", "get_rates", &[Value::String("USDC".into())])
            .await
            .unwrap();
        assert_eq!(value, Value::Number(3.5));
        assert_eq!(reader.calls().len(), 1);
    }
}
