//! Wiring for a complete campaign runtime.
//!
//! `CampaignRuntime` assembles the in-memory store, the local bridge (with
//! optional tenant admission), the four campaign agents, and an orchestrator
//! that reports to an in-memory metrics sink the scenarios can inspect. The
//! bridge stays reachable so scenarios can read its circuit breakers.

use std::sync::Arc;

use conductor_contracts::{error::ConductorResult, task::TaskDescriptor};
use conductor_core::{
    config::ConductorConfig, metrics::InMemoryMetricsSink, traits::AgentRoster, LocalBridge,
    Orchestrator,
};
use conductor_governor::ResourceGovernor;
use conductor_store::InMemoryStateStore;
use serde_json::json;

use crate::agents::{InsightsAgent, PlanningAgent, SupervisorAgent, WorkspaceAgent};

/// Runtime settings shared by every scenario.
pub const CONDUCTOR_TOML: &str = include_str!("../config/conductor.toml");

/// Tenant budgets used by the capacity scenario.
pub const GOVERNOR_TOML: &str = include_str!("../config/governor.toml");

/// Parse the bundled runtime settings.
pub fn default_config() -> ConductorResult<ConductorConfig> {
    ConductorConfig::from_toml_str(CONDUCTOR_TOML)
}

/// The initial task every campaign session starts from.
pub fn plan_campaign(brief_id: &str) -> TaskDescriptor {
    TaskDescriptor::new("plan_campaign", json!({ "brief_id": brief_id }))
}

/// The agents a runtime dispatches to.
pub struct CampaignAgents {
    pub workspace: WorkspaceAgent,
    pub planning: PlanningAgent,
    pub insights: InsightsAgent,
    pub supervisor: SupervisorAgent,
}

impl Default for CampaignAgents {
    fn default() -> Self {
        Self {
            workspace: WorkspaceAgent::new(),
            planning: PlanningAgent::new(),
            insights: InsightsAgent::new(),
            supervisor: SupervisorAgent::new(),
        }
    }
}

impl CampaignAgents {
    fn into_roster(self) -> ConductorResult<AgentRoster> {
        AgentRoster::new(
            Arc::new(self.workspace),
            Arc::new(self.planning),
            Arc::new(self.insights),
            Arc::new(self.supervisor),
        )
    }
}

pub struct CampaignRuntime {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<InMemoryStateStore>,
    pub bridge: Arc<LocalBridge>,
    pub metrics: InMemoryMetricsSink,
    pub governor: Option<Arc<ResourceGovernor>>,
}

impl CampaignRuntime {
    pub fn new(
        config: &ConductorConfig,
        agents: CampaignAgents,
        governor: Option<Arc<ResourceGovernor>>,
    ) -> ConductorResult<Self> {
        config.validate()?;
        let metrics = InMemoryMetricsSink::new();
        let store = Arc::new(InMemoryStateStore::new(config.store.clone()));

        let mut bridge = LocalBridge::new(config.bridge.clone()).with_metrics(Arc::new(metrics.clone()));
        if let Some(governor) = &governor {
            bridge = bridge.with_admission(governor.clone());
        }

        let bridge = Arc::new(bridge);

        let orchestrator = Orchestrator::new(
            store.clone(),
            bridge.clone(),
            agents.into_roster()?,
            config.orchestrator.clone(),
        )
        .with_metrics(Arc::new(metrics.clone()));

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            store,
            bridge,
            metrics,
            governor,
        })
    }
}
