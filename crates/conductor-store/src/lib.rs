//! # conductor-store
//!
//! Versioned, checksummed session state storage for the Conductor runtime.
//!
//! ## Overview
//!
//! Every save bumps the session version by one and stamps a SHA-256 checksum
//! of the snapshot. Stale writes fail with `VersionConflict`; a snapshot whose
//! content no longer matches its checksum fails to load with
//! `CorruptedState`. Each save also appends a recovery checkpoint to a
//! bounded, hash-chained history.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conductor_store::InMemoryStateStore;
//! use conductor_core::traits::StateStore;
//!
//! let store = InMemoryStateStore::new(config.store.clone());
//! let state = store.create(AgentState::new("t1", "s1", None, task)).await?;
//! assert!(store.verify_history("t1", "s1")?);
//! ```

pub mod checksum;
pub mod memory;
pub mod record;

pub use checksum::{state_checksum, verify_history};
pub use memory::InMemoryStateStore;
pub use record::Checkpoint;

// ── Tests ─────────────────────────────────────────────────────────────────────
