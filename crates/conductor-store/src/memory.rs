//! In-memory implementation of `StateStore`.
//!
//! `InMemoryStateStore` keeps one `StoredRecord` per `(tenant, session)` in a
//! `HashMap` behind a `Mutex`. Every write (create, save, append) runs its
//! version check, checksum, checkpoint append and replacement inside one
//! critical section, so a write either lands completely or not at all.
//! Reads clone the record under the lock and verify the checksum outside it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use conductor_contracts::{
    error::{ConductorError, ConductorResult},
    state::{AgentMessage, AgentState, SessionKey},
};
use conductor_core::{config::StoreConfig, traits::StateStore};

use crate::{
    checksum::{hash_checkpoint, state_checksum, verify_history, verify_state},
    record::{Checkpoint, StoredRecord},
};

pub struct InMemoryStateStore {
    config: StoreConfig,
    pub(crate) records: Arc<Mutex<HashMap<SessionKey, StoredRecord>>>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl InMemoryStateStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn records(&self) -> MutexGuard<'_, HashMap<SessionKey, StoredRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_record(&self, tenant_id: &str, session_id: &str) -> ConductorResult<StoredRecord> {
        self.records()
            .get(&SessionKey::new(tenant_id, session_id))
            .cloned()
            .ok_or_else(|| not_found(tenant_id, session_id))
    }

    /// Stamp `state` as `version`, append its checkpoint to `record`, and
    /// make it the record's latest snapshot.
    fn commit(
        &self,
        record: &mut StoredRecord,
        mut state: AgentState,
        version: u64,
    ) -> ConductorResult<AgentState> {
        state.mark_persisted(version, String::new());
        let checksum = state_checksum(&state)?;
        state.mark_persisted(version, checksum.clone());

        let prev_hash = record.last_hash().to_string();
        let this_hash = hash_checkpoint(
            state.tenant_id(),
            state.session_id(),
            version,
            &checksum,
            &prev_hash,
        );
        record.checkpoints.push_back(Checkpoint {
            version,
            stage: state.current_stage(),
            checksum,
            saved_at: Utc::now(),
            prev_hash,
            this_hash,
            snapshot: state.clone(),
        });
        while record.checkpoints.len() > self.config.checkpoint_history {
            if let Some(dropped) = record.checkpoints.pop_front() {
                record.anchor = dropped.this_hash;
            }
        }

        if state.is_terminal() && record.archived_at.is_none() {
            record.archived_at = Some(Utc::now());
            info!(
                session = %state.key(),
                stage = %state.current_stage(),
                version,
                "session archived"
            );
        }
        record.state = state.clone();
        Ok(state)
    }

    // ── Recovery checkpoints ─────────────────────────────────────────────────

    /// Retained checkpoints for a session, oldest first.
    pub fn checkpoints(&self, tenant_id: &str, session_id: &str) -> ConductorResult<Vec<Checkpoint>> {
        let record = self.read_record(tenant_id, session_id)?;
        Ok(record.checkpoints.into_iter().collect())
    }

    /// Check the session's checkpoint chain and every retained snapshot.
    pub fn verify_history(&self, tenant_id: &str, session_id: &str) -> ConductorResult<bool> {
        let record = self.read_record(tenant_id, session_id)?;
        let checkpoints: Vec<Checkpoint> = record.checkpoints.into_iter().collect();
        Ok(verify_history(&record.anchor, &checkpoints))
    }

    /// The snapshot stored at `version`, if it is still retained.
    pub fn recover(
        &self,
        tenant_id: &str,
        session_id: &str,
        version: u64,
    ) -> ConductorResult<Option<AgentState>> {
        let record = self.read_record(tenant_id, session_id)?;
        let Some(checkpoint) = record.checkpoints.into_iter().find(|c| c.version == version) else {
            debug!(tenant_id, session_id, version, "checkpoint not retained");
            return Ok(None);
        };
        verify_state(&checkpoint.snapshot)?;
        Ok(Some(checkpoint.snapshot))
    }

    // ── Listings ─────────────────────────────────────────────────────────────

    /// Session ids stored for `tenant_id`, sorted.
    pub fn sessions(&self, tenant_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records()
            .keys()
            .filter(|k| k.tenant_id == tenant_id)
            .map(|k| k.session_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Sessions archived strictly before `cutoff`, for external purging.
    pub fn archived_before(&self, cutoff: DateTime<Utc>) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self
            .records()
            .iter()
            .filter(|(_, r)| r.archived_at.is_some_and(|at| at < cutoff))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Archived sessions older than the configured retention window at `now`.
    pub fn purge_candidates(&self, now: DateTime<Utc>) -> Vec<SessionKey> {
        self.archived_before(now - Duration::days(i64::from(self.config.retention_days)))
    }

    /// Drop every purge candidate at `now` and return the removed keys.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<SessionKey> {
        let expired = self.purge_candidates(now);
        let mut records = self.records();
        for key in &expired {
            records.remove(key);
        }
        if !expired.is_empty() {
            info!(
                purged = expired.len(),
                retention_days = self.config.retention_days,
                "purged archived sessions"
            );
        }
        expired
    }

    /// When the session was archived, if it has been.
    pub fn archived_at(&self, tenant_id: &str, session_id: &str) -> ConductorResult<Option<DateTime<Utc>>> {
        Ok(self.read_record(tenant_id, session_id)?.archived_at)
    }
}

// ── StateStore impl ───────────────────────────────────────────────────────────

#[async_trait]
impl StateStore for InMemoryStateStore {
    /// Persist a new session as version 1.
    ///
    /// Fails with `VersionConflict` when the key is already taken, so two
    /// callers racing to start the same session cannot both win.
    async fn create(&self, state: AgentState) -> ConductorResult<AgentState> {
        let key = state.key();
        let mut records = self.records();
        if let Some(existing) = records.get(&key) {
            warn!(session = %key, "create on existing session rejected");
            return Err(ConductorError::VersionConflict {
                session_id: key.session_id,
                expected: 0,
                found: existing.state.version(),
            });
        }

        let mut record = StoredRecord {
            state: state.clone(),
            checkpoints: VecDeque::new(),
            anchor: Checkpoint::GENESIS_HASH.to_string(),
            archived_at: None,
        };
        let stored = self.commit(&mut record, state, 1)?;
        records.insert(key, record);
        debug!(session = %stored.key(), "session stored at version 1");
        Ok(stored)
    }

    async fn load(&self, tenant_id: &str, session_id: &str) -> ConductorResult<AgentState> {
        let state = self.read_record(tenant_id, session_id)?.state;
        verify_state(&state)?;
        Ok(state)
    }

    /// Replace the stored snapshot if `state.version()` is still current.
    async fn save(&self, state: AgentState) -> ConductorResult<AgentState> {
        let key = state.key();
        let mut records = self.records();
        let record = records
            .get_mut(&key)
            .ok_or_else(|| not_found(&key.tenant_id, &key.session_id))?;

        let stored_version = record.state.version();
        if stored_version != state.version() {
            warn!(
                session = %key,
                expected = state.version(),
                found = stored_version,
                "stale save rejected"
            );
            return Err(ConductorError::VersionConflict {
                session_id: key.session_id,
                expected: state.version(),
                found: stored_version,
            });
        }

        let saved = self.commit(record, state, stored_version + 1)?;
        debug!(session = %key, version = saved.version(), stage = %saved.current_stage(), "state saved");
        Ok(saved)
    }

    async fn append_message(
        &self,
        tenant_id: &str,
        session_id: &str,
        message: AgentMessage,
    ) -> ConductorResult<AgentState> {
        let key = SessionKey::new(tenant_id, session_id);
        let mut records = self.records();
        let record = records
            .get_mut(&key)
            .ok_or_else(|| not_found(tenant_id, session_id))?;

        verify_state(&record.state)?;
        let mut state = record.state.clone();
        state.push_message(message);
        let version = state.version() + 1;
        self.commit(record, state, version)
    }
}

fn not_found(tenant_id: &str, session_id: &str) -> ConductorError {
    ConductorError::NotFound {
        tenant_id: tenant_id.to_string(),
        session_id: session_id.to_string(),
    }
}
