//! Governor configuration schema.
//!
//! A `GovernorConfig` is deserialized from TOML. Each tenant has a budget of
//! weighted execution units; tenants without an explicit entry get
//! `default_budget`. Every stage attempt is charged the weight of its
//! operation kind.
//!
//! Example:
//! ```toml
//! default_budget = 6
//!
//! [weights]
//! llm_call = 3
//! data_fetch = 2
//! validation = 1
//!
//! [[tenants]]
//! id = "acme"
//! budget = 12
//!
//! # Optional; omit the table to disable rate limiting.
//! [rate_limit]
//! requests_per_minute = 60
//! requests_per_second = 10
//! burst_allowance = 5
//! ```

use serde::{Deserialize, Serialize};

use conductor_contracts::{
    admission::OperationKind,
    error::{ConductorError, ConductorResult},
};

use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_budget")]
    pub default_budget: u32,

    #[serde(default)]
    pub weights: OperationWeights,

    /// Per-tenant budget overrides.
    #[serde(default)]
    pub tenants: Vec<TenantBudget>,

    /// Weighted request-rate limits applied to each tenant separately.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_budget() -> u32 {
    6
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            default_budget: default_budget(),
            weights: OperationWeights::default(),
            tenants: Vec::new(),
            rate_limit: None,
        }
    }
}

impl GovernorConfig {
    /// The budget for `tenant_id`: its override if present, else the default.
    pub fn budget_for(&self, tenant_id: &str) -> u32 {
        self.tenants
            .iter()
            .find(|t| t.id == tenant_id)
            .map(|t| t.budget)
            .unwrap_or(self.default_budget)
    }

    pub fn validate(&self) -> ConductorResult<()> {
        for kind in [
            OperationKind::LlmCall,
            OperationKind::DataFetch,
            OperationKind::Validation,
        ] {
            if self.weights.weight(kind) == 0 {
                return Err(ConductorError::Config {
                    reason: format!("weight for '{}' must be at least 1", kind),
                });
            }
        }
        if let Some(limits) = &self.rate_limit {
            let heaviest = self.weights.heaviest();
            if limits.max_admissible_weight() < heaviest {
                return Err(ConductorError::Config {
                    reason: format!(
                        "rate_limit admits at most {} units per window, below the heaviest operation weight {}",
                        limits.max_admissible_weight(),
                        heaviest
                    ),
                });
            }
        }
        for (i, tenant) in self.tenants.iter().enumerate() {
            if tenant.id.is_empty() {
                return Err(ConductorError::Config {
                    reason: format!("tenants[{}] has an empty id", i),
                });
            }
            if self.tenants[..i].iter().any(|t| t.id == tenant.id) {
                return Err(ConductorError::Config {
                    reason: format!("tenant '{}' is listed more than once", tenant.id),
                });
            }
        }
        Ok(())
    }
}

/// Execution-unit cost per `OperationKind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationWeights {
    pub llm_call: u32,
    pub data_fetch: u32,
    pub validation: u32,
}

impl Default for OperationWeights {
    fn default() -> Self {
        Self {
            llm_call: 3,
            data_fetch: 2,
            validation: 1,
        }
    }
}

impl OperationWeights {
    pub fn weight(&self, kind: OperationKind) -> u32 {
        match kind {
            OperationKind::LlmCall => self.llm_call,
            OperationKind::DataFetch => self.data_fetch,
            OperationKind::Validation => self.validation,
        }
    }

    pub fn heaviest(&self) -> u32 {
        self.llm_call.max(self.data_fetch).max(self.validation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantBudget {
    pub id: String,
    pub budget: u32,
}
