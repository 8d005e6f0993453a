//! Scenario 2: Invalid Budget Abort
//!
//! The brief's budget cell holds -500. Planning cannot allocate it and hands
//! off straight to insights, which aborts the session with "invalid budget".
//! The session stops at version 4 and every earlier checkpoint survives:
//!
//!   v1 INTAKE → v2 WORKSPACE_ANALYSIS → v3 INSIGHTS (handoff) → v4 FAILED

use conductor_contracts::{error::ConductorResult, execution::SessionRequest};
use conductor_core::config::ConductorConfig;

use crate::runtime::{plan_campaign, CampaignAgents, CampaignRuntime};
use crate::scenarios::{print_checkpoints, print_outcome};

pub const TENANT: &str = "t1";
pub const SESSION: &str = "s1";

/// Run Scenario 2: Invalid Budget Abort.
pub async fn run_scenario(config: &ConductorConfig) -> ConductorResult<()> {
    println!("=== Scenario 2: Invalid Budget Abort ===");
    println!();
    println!("  Tenant:   {}", TENANT);
    println!("  Brief:    brief-negative (total_budget = -500)");
    println!("  Expected: planning hands off to insights, insights aborts");
    println!();

    let runtime = CampaignRuntime::new(config, CampaignAgents::default(), None)?;

    let request = SessionRequest::new(TENANT, SESSION, plan_campaign("brief-negative"));
    let result = runtime.orchestrator.run_session(request).await?;

    println!("  Checkpoints:");
    print_checkpoints(&runtime.store, TENANT, SESSION);
    println!();

    let handoff = runtime
        .store
        .checkpoints(TENANT, SESSION)?
        .last()
        .and_then(|c| {
            c.snapshot
                .agent_messages
                .iter()
                .find(|m| m.content.starts_with("handoff to"))
                .map(|m| m.content.clone())
        });
    if let Some(handoff) = handoff {
        println!("  Handoff:          {}", handoff);
    }
    print_outcome(&result);

    // A failed session is terminal: running it again changes nothing.
    let rerun = runtime.orchestrator.run(TENANT, SESSION).await?;
    println!(
        "  Re-run:           {} at version {} (unchanged)",
        rerun.stage, rerun.version
    );
    println!();

    Ok(())
}
