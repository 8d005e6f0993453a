//! Admission-control types shared by the bridge and the resource governor.
//!
//! A tenant's budget is a number of weighted execution units. Each stage
//! attempt reserves `weight` units for the duration of the attempt through an
//! `AdmissionPermit`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of work a stage performs, used to look up its weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// An LLM-backed call; the most expensive class.
    LlmCall,
    /// A fetch from an external data source.
    DataFetch,
    /// Validation-only work with no external calls.
    Validation,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            OperationKind::LlmCall => "llm_call",
            OperationKind::DataFetch => "data_fetch",
            OperationKind::Validation => "validation",
        };
        f.write_str(label)
    }
}

/// A handle for reserved execution capacity.
///
/// Returned by `AdmissionControl::acquire` and given back through
/// `AdmissionControl::release`. Releasing the same permit twice is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPermit {
    pub id: Uuid,
    pub tenant_id: String,
    pub weight: u32,
}

impl AdmissionPermit {
    pub fn new(tenant_id: impl Into<String>, weight: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            weight,
        }
    }
}

/// A point-in-time utilization reading for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantUtilization {
    pub tenant_id: String,
    pub in_use: u32,
    pub budget: u32,
    /// `in_use / budget`, 0.0 when the budget is zero.
    pub ratio: f64,
    pub admitted: u64,
    /// Capacity and over-budget rejections.
    pub rejected: u64,
    /// Attempts refused by the tenant's request-rate limits.
    pub rate_limited: u64,
}
