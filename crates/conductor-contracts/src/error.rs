//! Runtime error types for the Conductor orchestration core.
//!
//! All fallible operations return `ConductorResult<T>`. Every variant maps to
//! one `ErrorClass`, which decides where the error is absorbed: transient and
//! capacity errors are retried by the bridge, integrity errors go straight to
//! the caller, fatal errors fail the session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used for retry decisions and error records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network or rate-limit class; retried with backoff.
    Transient,
    /// Checksum or version mismatch in the state store; never retried.
    DataIntegrity,
    /// Admission rejected by the resource governor; deferred and retried.
    Capacity,
    /// Abort, retry exhaustion, or an illegal command; fails the session.
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::DataIntegrity => "data_integrity",
            ErrorClass::Capacity => "capacity",
            ErrorClass::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

/// The unified error type for the Conductor runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConductorError {
    /// No session is stored under this `(tenant, session)` key.
    #[error("session '{session_id}' not found for tenant '{tenant_id}'")]
    NotFound { tenant_id: String, session_id: String },

    /// A save was attempted from a stale base version.
    ///
    /// Callers must re-load and retry.
    #[error("version conflict on session '{session_id}': expected base version {expected}, store holds {found}")]
    VersionConflict {
        session_id: String,
        expected: u64,
        found: u64,
    },

    /// The stored checksum does not match the stored content.
    #[error("corrupted state for session '{session_id}': {reason}")]
    CorruptedState { session_id: String, reason: String },

    /// Another stage execution already holds the lease for this session.
    #[error("stage execution already in progress for tenant '{tenant_id}' session '{session_id}'")]
    ConcurrentExecution { tenant_id: String, session_id: String },

    /// A retryable agent failure (network error, rate-limit response, timeout).
    #[error("transient failure in agent '{agent}': {reason}")]
    TransientAgent { agent: String, reason: String },

    /// The resource governor refused admission.
    #[error("over capacity for tenant '{tenant_id}': {reason}")]
    Capacity { tenant_id: String, reason: String },

    /// The operation's weight exceeds the tenant's whole budget, so no amount
    /// of waiting can admit it.
    #[error("tenant '{tenant_id}' cannot admit weight {weight}: budget is {budget}")]
    OverBudget {
        tenant_id: String,
        weight: u32,
        budget: u32,
    },

    /// The agent's circuit breaker is open after repeated failures.
    #[error("circuit open for agent '{agent}', retry in {retry_after_ms} ms")]
    CircuitOpen { agent: String, retry_after_ms: u64 },

    /// A non-recoverable workflow error. The session ends in `FAILED`.
    #[error("fatal workflow error in agent '{agent}': {reason}")]
    FatalWorkflow { agent: String, reason: String },

    /// The bridge gave up after the configured number of attempts.
    #[error("agent '{agent}' failed after {attempts} attempt(s): {reason}")]
    RetriesExhausted {
        agent: String,
        attempts: u32,
        reason: String,
    },

    /// A single stage attempt exceeded its deadline.
    #[error("agent '{agent}' timed out after {timeout_ms} ms")]
    StageTimeout { agent: String, timeout_ms: u64 },

    /// A stage move that the workflow order does not allow.
    #[error("illegal stage transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// State or command content could not be (de)serialized.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl ConductorError {
    /// The error class that governs how this error propagates.
    pub fn class(&self) -> ErrorClass {
        match self {
            ConductorError::TransientAgent { .. } | ConductorError::StageTimeout { .. } => {
                ErrorClass::Transient
            }
            ConductorError::VersionConflict { .. }
            | ConductorError::CorruptedState { .. }
            | ConductorError::NotFound { .. } => ErrorClass::DataIntegrity,
            ConductorError::Capacity { .. } => ErrorClass::Capacity,
            ConductorError::ConcurrentExecution { .. }
            | ConductorError::OverBudget { .. }
            | ConductorError::CircuitOpen { .. }
            | ConductorError::FatalWorkflow { .. }
            | ConductorError::RetriesExhausted { .. }
            | ConductorError::InvalidTransition { .. }
            | ConductorError::Config { .. }
            | ConductorError::Serialization { .. } => ErrorClass::Fatal,
        }
    }

    /// True for errors the bridge retries with backoff.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Short reason text without the variant prefix, used for error records.
    pub fn reason(&self) -> String {
        match self {
            ConductorError::TransientAgent { reason, .. }
            | ConductorError::Capacity { reason, .. }
            | ConductorError::FatalWorkflow { reason, .. }
            | ConductorError::RetriesExhausted { reason, .. }
            | ConductorError::CorruptedState { reason, .. }
            | ConductorError::Config { reason }
            | ConductorError::Serialization { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        ConductorError::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Convenience alias used throughout the Conductor crates.
pub type ConductorResult<T> = Result<T, ConductorError>;
