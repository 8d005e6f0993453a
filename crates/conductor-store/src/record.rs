//! Stored record and checkpoint types.
//!
//! A `StoredRecord` is everything the store keeps for one session: the
//! latest snapshot, a bounded run of hash-chained `Checkpoint`s, and the
//! archival flag set when the session reaches a terminal stage.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conductor_contracts::state::{AgentState, WorkflowStage};

/// One recovery point: the snapshot written at `version`.
///
/// Modifying the snapshot, or any field of the checkpoint, invalidates
/// `this_hash` and every later `prev_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u64,
    pub stage: WorkflowStage,
    /// The snapshot's state checksum.
    pub checksum: String,
    pub saved_at: DateTime<Utc>,
    /// `this_hash` of the previous checkpoint, or `GENESIS_HASH`.
    pub prev_hash: String,
    pub this_hash: String,
    pub snapshot: AgentState,
}

impl Checkpoint {
    /// The `prev_hash` of a session's first checkpoint.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

#[derive(Debug, Clone)]
pub(crate) struct StoredRecord {
    pub(crate) state: AgentState,
    pub(crate) checkpoints: VecDeque<Checkpoint>,
    /// The `prev_hash` expected on the oldest retained checkpoint.
    pub(crate) anchor: String,
    pub(crate) archived_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    pub(crate) fn last_hash(&self) -> &str {
        self.checkpoints
            .back()
            .map(|c| c.this_hash.as_str())
            .unwrap_or(self.anchor.as_str())
    }
}
