// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! grim-adapters: side-effect boundaries of the spell engine.
//!
//! Wallets, venue SDKs, RPC providers, and advisors live behind these
//! traits; the engine only ever sees the trait objects. The simulated
//! implementations are the default in simulate mode, and the fakes (behind
//! `test-support`) record calls for assertions.

pub mod action;
pub mod advisor;
pub mod query;

pub use action::{
    ActionError, ActionExecutor, ActionOutcome, ActionRequest, SimulatedExecutor, WalletRef,
};
pub use advisor::{AdvisorError, AdvisorHandler, AdvisoryRequest};
pub use query::{NullVenueReader, QueryError, VenueReader};

#[cfg(any(test, feature = "test-support"))]
pub use action::FakeExecutor;
#[cfg(any(test, feature = "test-support"))]
pub use advisor::FakeAdvisor;
#[cfg(any(test, feature = "test-support"))]
pub use query::FakeVenueReader;
