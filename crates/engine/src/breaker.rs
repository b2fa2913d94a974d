// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit breakers over action telemetry.
//!
//! Each breaker watches one event kind (gas, slippage excess, loss, rate)
//! over a sliding window. The action executor consults `check()` before
//! dispatch and feeds `record()` afterwards; a tripped breaker fails
//! subsequent actions with a policy-violation error until its cooldown
//! passes, then allows one probe (half-open).

use grim_core::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerEventKind {
    Gas,
    SlippageExcess,
    Loss,
    Rate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Tripped,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct TimestampedEvent {
    pub timestamp_ms: u64,
    pub kind: BreakerEventKind,
    pub value: f64,
}

/// Trip when the sum of matching event values inside the window exceeds
/// the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerPolicy {
    pub name: String,
    pub event: BreakerEventKind,
    pub threshold: f64,
    pub window_secs: u64,
    pub cooldown_secs: u64,
}

struct Breaker {
    policy: BreakerPolicy,
    state: BreakerState,
    events: VecDeque<TimestampedEvent>,
    tripped_at_ms: u64,
}

impl Breaker {
    fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            state: BreakerState::Closed,
            events: VecDeque::new(),
            tripped_at_ms: 0,
        }
    }

    fn prune(&mut self, now_ms: u64) {
        let window_ms = self.policy.window_secs * 1000;
        while let Some(front) = self.events.front() {
            if front.timestamp_ms + window_ms < now_ms {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, event: &TimestampedEvent) {
        if event.kind != self.policy.event {
            return;
        }
        let now_ms = event.timestamp_ms;
        self.events.push_back(event.clone());
        self.prune(now_ms);
        let total: f64 = self.events.iter().map(|e| e.value).sum();
        if total > self.policy.threshold {
            // A half-open probe that exceeds again re-trips.
            self.state = BreakerState::Tripped;
            self.tripped_at_ms = now_ms;
            tracing::warn!(
                breaker = %self.policy.name,
                total,
                threshold = self.policy.threshold,
                "tripped"
            );
        } else if self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Closed;
        }
    }

    /// `Err` carries the denial reason.
    fn check(&mut self, now_ms: u64) -> Result<(), String> {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Tripped => {
                let cooldown_ms = self.policy.cooldown_secs * 1000;
                if now_ms >= self.tripped_at_ms + cooldown_ms {
                    self.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(format!(
                        "breaker '{}' tripped ({} over {}s window exceeded {})",
                        self.policy.name,
                        self.policy.event_name(),
                        self.policy.window_secs,
                        self.policy.threshold
                    ))
                }
            }
        }
    }
}

impl BreakerPolicy {
    fn event_name(&self) -> &'static str {
        match self.event {
            BreakerEventKind::Gas => "gas",
            BreakerEventKind::SlippageExcess => "slippage excess",
            BreakerEventKind::Loss => "loss",
            BreakerEventKind::Rate => "rate",
        }
    }
}

/// Shared manager consulted by the action executor.
pub struct CircuitBreakerManager {
    clock: Arc<dyn Clock>,
    breakers: Mutex<Vec<Breaker>>,
}

impl CircuitBreakerManager {
    pub fn new(policies: Vec<BreakerPolicy>, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            breakers: Mutex::new(policies.into_iter().map(Breaker::new).collect()),
        }
    }

    /// `Err((breaker_name, reason))` when any breaker denies the action.
    pub fn check(&self) -> Result<(), (String, String)> {
        let now_ms = self.clock.now_ms();
        let mut breakers = self.breakers.lock();
        for breaker in breakers.iter_mut() {
            if let Err(reason) = breaker.check(now_ms) {
                return Err((breaker.policy.name.clone(), reason));
            }
        }
        Ok(())
    }

    pub fn record(&self, event: TimestampedEvent) {
        let mut breakers = self.breakers.lock();
        for breaker in breakers.iter_mut() {
            breaker.record(&event);
        }
    }

    /// Current state of a named breaker, for diagnostics.
    pub fn state(&self, name: &str) -> Option<BreakerState> {
        self.breakers
            .lock()
            .iter()
            .find(|b| b.policy.name == name)
            .map(|b| b.state)
    }
}
