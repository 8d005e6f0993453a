//! Snapshot checksums and checkpoint-chain primitives.
//!
//! A state checksum is the SHA-256 of the canonical JSON of the state with
//! its `checksum` field blanked. JSON objects inside the state are
//! `BTreeMap`-backed, so key order is stable across calls.
//!
//! Checkpoint hash input layout (bytes, in order):
//!   1. tenant_id as UTF-8 bytes, then a 0x00 separator
//!   2. session_id as UTF-8 bytes, then a 0x00 separator
//!   3. version as 8-byte little-endian
//!   4. state checksum as UTF-8 bytes (64 ASCII hex chars)
//!   5. prev_hash as UTF-8 bytes (64 ASCII hex chars)

use sha2::{Digest, Sha256};

use conductor_contracts::{
    error::{ConductorError, ConductorResult},
    state::AgentState,
};

use crate::record::Checkpoint;

/// Lowercase hex SHA-256 over `state` with its checksum blanked.
pub fn state_checksum(state: &AgentState) -> ConductorResult<String> {
    let canonical = serde_json::to_vec(&state.without_checksum())?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Recompute `state`'s checksum and compare it to the stored one.
pub fn verify_state(state: &AgentState) -> ConductorResult<()> {
    let recomputed = state_checksum(state)?;
    if recomputed != state.checksum() {
        return Err(ConductorError::CorruptedState {
            session_id: state.session_id().to_string(),
            reason: format!(
                "checksum mismatch at version {}: stored {}, computed {}",
                state.version(),
                state.checksum(),
                recomputed
            ),
        });
    }
    Ok(())
}

/// Hash linking one checkpoint to its predecessor.
pub fn hash_checkpoint(
    tenant_id: &str,
    session_id: &str,
    version: u64,
    state_checksum: &str,
    prev_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(session_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(version.to_le_bytes());
    hasher.update(state_checksum.as_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a run of checkpoints starting from `anchor`.
///
/// `anchor` is the `prev_hash` expected on the first checkpoint:
/// `Checkpoint::GENESIS_HASH` for a full history, or the hash of the last
/// checkpoint dropped by the retention bound. Each checkpoint must link to
/// its predecessor, carry a hash recomputed from its own fields, and hold a
/// snapshot whose checksum and version agree with it. An empty run is valid.
pub fn verify_history(anchor: &str, checkpoints: &[Checkpoint]) -> bool {
    let mut expected_prev = anchor.to_string();

    for checkpoint in checkpoints {
        if checkpoint.prev_hash != expected_prev {
            return false;
        }

        let snapshot = &checkpoint.snapshot;
        let recomputed = hash_checkpoint(
            snapshot.tenant_id(),
            snapshot.session_id(),
            checkpoint.version,
            &checkpoint.checksum,
            &checkpoint.prev_hash,
        );
        if checkpoint.this_hash != recomputed {
            return false;
        }

        if snapshot.version() != checkpoint.version || snapshot.checksum() != checkpoint.checksum {
            return false;
        }
        if verify_state(snapshot).is_err() {
            return false;
        }

        expected_prev = checkpoint.this_hash.clone();
    }

    true
}
