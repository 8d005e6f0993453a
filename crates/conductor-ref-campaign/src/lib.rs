//! # conductor-ref-campaign
//!
//! Marketing-campaign reference runtime for the Conductor orchestrator.
//!
//! Demonstrates four scenarios using mock data:
//!
//! 1. **Campaign Planning Pipeline**: a well-formed brief walks every
//!    stage, including a data request routed between agents, and a second
//!    session is cancelled while idle.
//! 2. **Invalid Budget Abort**: planning hands off to insights, which aborts;
//!    the session fails at version 4 with its history intact.
//! 3. **Flaky Workspace API**: transient failures are retried with backoff,
//!    then exhaust the retry budget.
//! 4. **Tenant Capacity**: concurrent sessions share a small tenant budget
//!    through admission deferral.
//!
//! All data is hardcoded and fictional. No external API calls are made.

pub mod agents;
pub mod mock_data;
pub mod runtime;
pub mod scenarios;

// ── Tests ─────────────────────────────────────────────────────────────────────
