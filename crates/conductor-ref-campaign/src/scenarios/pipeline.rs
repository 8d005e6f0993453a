//! Scenario 1: Campaign Planning Pipeline
//!
//! Runs a well-formed brief through all four agents and shows the
//! checkpoint written after every transition:
//!
//!   v1 INTAKE → v2 WORKSPACE_ANALYSIS → v3 PLANNING
//!     → v4 PLANNING (insights asks the workspace for channel benchmarks)
//!     → v5 INSIGHTS → v6 SUPERVISION → v7 COMPLETE
//!
//! A second session for the same tenant is then cancelled before it runs,
//! showing that an idle session is failed immediately with the given reason.

use conductor_contracts::{error::ConductorResult, execution::SessionRequest};
use conductor_core::config::ConductorConfig;

use crate::agents::completion_score;
use crate::runtime::{plan_campaign, CampaignAgents, CampaignRuntime};
use crate::scenarios::{print_checkpoints, print_outcome};

pub const TENANT: &str = "northwind";
pub const SESSION: &str = "campaign-001";
pub const CANCELLED_SESSION: &str = "campaign-002";

/// Run Scenario 1: Campaign Planning Pipeline.
pub async fn run_scenario(config: &ConductorConfig) -> ConductorResult<()> {
    println!("=== Scenario 1: Campaign Planning Pipeline ===");
    println!();
    println!("  Tenant:   {}", TENANT);
    println!("  Brief:    brief-spring (Northwind Outdoor, 50 000 USD)");
    println!("  Pipeline: Workspace → Planning → Insights → Supervisor");
    println!();

    let runtime = CampaignRuntime::new(config, CampaignAgents::default(), None)?;

    let request = SessionRequest::new(TENANT, SESSION, plan_campaign("brief-spring"))
        .with_user("media-planner-7");
    let result = runtime.orchestrator.run_session(request).await?;

    println!("  Checkpoints:");
    print_checkpoints(&runtime.store, TENANT, SESSION);
    println!();

    let plan = &result.payload_sections.campaign_plan;
    if let Some(allocation) = plan.get("budget_allocation").and_then(|v| v.as_object()) {
        println!("  Budget allocation:");
        for (channel, spend) in allocation {
            println!("    {:<10} {:>10.0}", channel, spend.as_f64().unwrap_or(0.0));
        }
    }
    if let Some(conversions) = result.payload_sections.insights_data.get("projected_conversions") {
        println!("  Projected conversions: {}", conversions);
    }

    let checkpoints = runtime.store.checkpoints(TENANT, SESSION)?;
    if let Some(last) = checkpoints.last() {
        println!("  Completion score:      {:.1}", completion_score(&last.snapshot));
    }
    println!(
        "  History chain:         {}",
        if runtime.store.verify_history(TENANT, SESSION)? { "VERIFIED" } else { "BROKEN" }
    );
    print_outcome(&result);
    println!();

    // ── Cancelling an idle session ────────────────────────────────────────────

    println!("  Cancelling {} before it runs", CANCELLED_SESSION);
    runtime
        .orchestrator
        .start_session(SessionRequest::new(TENANT, CANCELLED_SESSION, plan_campaign("brief-lean")))
        .await?;
    let cancelled = runtime
        .orchestrator
        .cancel(TENANT, CANCELLED_SESSION, "client paused the campaign")
        .await?;
    print_outcome(&cancelled);
    println!();

    Ok(())
}
