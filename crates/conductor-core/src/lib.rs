//! # conductor-core
//!
//! The checkpointed orchestration runtime for Conductor sessions.
//!
//! This crate provides:
//! - The collaborator traits (`Agent`, `StateStore`, `DurableExecution`,
//!   `AdmissionControl`, `MetricsSink`)
//! - The `Orchestrator` that walks the agent pipeline and checkpoints every
//!   transition
//! - `LocalBridge`, the in-process durable execution bridge (timeouts,
//!   bounded retry, at-most-once leases, admission deferral, per-agent
//!   circuit breakers)
//! - TOML configuration and ready-made metrics sinks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conductor_core::{Orchestrator, LocalBridge, config::ConductorConfig};
//!
//! let config = ConductorConfig::from_file(Path::new("conductor.toml"))?;
//! let bridge = LocalBridge::new(config.bridge.clone()).with_admission(governor);
//! let orchestrator = Orchestrator::new(store, Arc::new(bridge), roster, config.orchestrator);
//! let result = orchestrator.run_session(request).await?;
//! ```

pub mod bridge;
pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod traits;

pub use bridge::LocalBridge;
pub use orchestrator::Orchestrator;
