//! Scenario 4: Tenant Capacity
//!
//! The "boutique" tenant has a budget of 3 execution units, exactly one
//! planning or insights attempt. Three of its sessions are started at once.
//! Attempts that do not fit are deferred by the bridge and admitted as soon
//! as a running attempt releases its units, so all three sessions complete
//! and the tenant never exceeds its budget.
//!
//! A "northwind" session runs alongside on its own budget and is never
//! slowed by boutique's contention.

use std::sync::Arc;
use std::time::Duration;

use conductor_contracts::{
    error::{ConductorError, ConductorResult},
    execution::{SessionRequest, SessionResult},
};
use conductor_core::config::ConductorConfig;
use conductor_governor::ResourceGovernor;

use crate::agents::{InsightsAgent, PlanningAgent, SupervisorAgent, WorkspaceAgent};
use crate::runtime::{plan_campaign, CampaignAgents, CampaignRuntime, GOVERNOR_TOML};

pub const CONSTRAINED_TENANT: &str = "boutique";
pub const ROOMY_TENANT: &str = "northwind";
pub const CONCURRENT_SESSIONS: usize = 3;

const AGENT_LATENCY: Duration = Duration::from_millis(20);

fn slow_agents() -> CampaignAgents {
    CampaignAgents {
        workspace: WorkspaceAgent::new().with_latency(AGENT_LATENCY),
        planning: PlanningAgent::new().with_latency(AGENT_LATENCY),
        insights: InsightsAgent::new().with_latency(AGENT_LATENCY),
        supervisor: SupervisorAgent::new().with_latency(AGENT_LATENCY),
    }
}

/// Run every session concurrently and collect the results in start order.
pub(crate) async fn run_concurrently(
    runtime: &CampaignRuntime,
    requests: Vec<SessionRequest>,
) -> ConductorResult<Vec<SessionResult>> {
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let orchestrator = Arc::clone(&runtime.orchestrator);
            tokio::spawn(async move { orchestrator.run_session(request).await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = handle.await.map_err(|e| ConductorError::FatalWorkflow {
            agent: "scenario".to_string(),
            reason: format!("session task panicked: {}", e),
        })??;
        results.push(result);
    }
    Ok(results)
}

/// Run Scenario 4: Tenant Capacity.
pub async fn run_scenario(config: &ConductorConfig) -> ConductorResult<()> {
    println!("=== Scenario 4: Tenant Capacity ===");
    println!();

    let governor = Arc::new(ResourceGovernor::from_toml_str(GOVERNOR_TOML)?);
    println!(
        "  Budgets:  {} = {} units, {} = {} units",
        CONSTRAINED_TENANT,
        governor.config().budget_for(CONSTRAINED_TENANT),
        ROOMY_TENANT,
        governor.config().budget_for(ROOMY_TENANT)
    );
    println!(
        "  Weights:  llm_call = {}, data_fetch = {}, validation = {}",
        governor.config().weights.llm_call,
        governor.config().weights.data_fetch,
        governor.config().weights.validation
    );
    println!();

    let runtime = CampaignRuntime::new(config, slow_agents(), Some(governor.clone()))?;

    let mut requests: Vec<SessionRequest> = (1..=CONCURRENT_SESSIONS)
        .map(|i| {
            SessionRequest::new(
                CONSTRAINED_TENANT,
                format!("boutique-{}", i),
                plan_campaign("brief-lean"),
            )
        })
        .collect();
    requests.push(SessionRequest::new(
        ROOMY_TENANT,
        "northwind-1",
        plan_campaign("brief-spring"),
    ));

    let results = run_concurrently(&runtime, requests).await?;
    for result in &results {
        println!(
            "  {:<14} {:<10} {} at version {}",
            result.session_id, result.tenant_id, result.stage, result.version
        );
    }
    println!();

    println!(
        "  Deferred admissions: {}",
        runtime.metrics.counter_total("admission_rejections")
    );
    for usage in governor.utilization() {
        println!(
            "  {:<10} in use {}/{} (admitted {}, rejected {}, rate limited {})",
            usage.tenant_id,
            usage.in_use,
            usage.budget,
            usage.admitted,
            usage.rejected,
            usage.rate_limited
        );
    }
    println!("  Outstanding permits: {}", governor.outstanding_permits());
    println!();

    Ok(())
}
