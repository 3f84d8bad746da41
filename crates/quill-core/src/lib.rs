// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The message-processing backbone: aggregation, deduplication, mode
//! routing, and the knowledge-base service pipeline that turns grouped
//! chat events into committed Markdown.
//!
//! Steady-state flow:
//!
//! ```text
//! IncomingEvent → Aggregator (idle window) → MessageGroup
//!              → Router (dedup gate, per-user ordering)
//!              → note / ask / task service
//!              → KB lock → git pull → agent → commit+push → status edit
//! ```

pub mod agent;
pub mod aggregate;
pub mod context;
pub mod error;
pub mod group;
pub mod handlers;
pub mod note;
pub mod ratelimit;
pub mod router;
pub mod service;

pub use agent::{AgentDriver, AgentError, AgentInvocation, AgentOutcome, Relation};
pub use aggregate::Aggregator;
pub use context::ContextStore;
pub use error::ServiceError;
pub use group::MessageGroup;
pub use handlers::Handlers;
pub use ratelimit::RateLimiter;
pub use router::Router;
pub use service::{mode_spec, ServiceDeps, ServiceReport, StatusHandle};
