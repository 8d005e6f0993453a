//! Scenario 3: Flaky Workspace API
//!
//! The workspace agent is rate limited. Two sessions show both sides of the
//! bridge's bounded retry:
//!
//! - 3a: the first two calls fail transiently; the third succeeds and the
//!   session completes. Two retries are recorded in the metrics.
//! - 3b: every call fails; after `max_attempts` the bridge gives up and the
//!   session fails with the attempt count in its error record.
//! - 3c: a second session against the same failing workspace opens the
//!   agent's circuit breaker. The remaining attempt is refused without
//!   calling the workspace at all.

use conductor_contracts::{error::ConductorResult, execution::SessionRequest, state::AgentRole};
use conductor_core::config::ConductorConfig;

use crate::agents::WorkspaceAgent;
use crate::runtime::{plan_campaign, CampaignAgents, CampaignRuntime};
use crate::scenarios::print_outcome;

pub const TENANT: &str = "fabrikam";

/// Run Scenario 3: Flaky Workspace API.
pub async fn run_scenario(config: &ConductorConfig) -> ConductorResult<()> {
    println!("=== Scenario 3: Flaky Workspace API ===");
    println!();
    println!("  Tenant:       {}", TENANT);
    println!("  Brief:        brief-lean");
    println!(
        "  Retry policy: {} attempt(s), {} ms initial backoff, x{} multiplier",
        config.bridge.max_attempts, config.bridge.initial_backoff_ms, config.bridge.backoff_multiplier
    );
    println!();

    // ── 3a: recovers within the retry budget ──────────────────────────────────

    let recovering = CampaignAgents {
        workspace: WorkspaceAgent::new().failing_first(2),
        ..CampaignAgents::default()
    };
    let runtime = CampaignRuntime::new(config, recovering, None)?;
    let result = runtime
        .orchestrator
        .run_session(SessionRequest::new(TENANT, "lean-recovers", plan_campaign("brief-lean")))
        .await?;

    println!("  3a: workspace fails twice, then recovers");
    println!("  Retries:          {}", runtime.metrics.counter_total("stage_retries"));
    print_outcome(&result);
    println!();

    // ── 3b: exhausts the retry budget ─────────────────────────────────────────

    let failing = CampaignAgents {
        workspace: WorkspaceAgent::new().failing_first(u32::MAX),
        ..CampaignAgents::default()
    };
    let runtime = CampaignRuntime::new(config, failing, None)?;
    let result = runtime
        .orchestrator
        .run_session(SessionRequest::new(TENANT, "lean-exhausted", plan_campaign("brief-lean")))
        .await?;

    println!("  3b: workspace never recovers");
    println!("  Retries:          {}", runtime.metrics.counter_total("stage_retries"));
    print_outcome(&result);
    println!();

    // ── 3c: repeated failures open the circuit ────────────────────────────────

    let result = runtime
        .orchestrator
        .run_session(SessionRequest::new(TENANT, "lean-tripped", plan_campaign("brief-lean")))
        .await?;

    println!(
        "  3c: breaker opens after {} consecutive failures",
        config.bridge.breaker_failure_threshold
    );
    println!(
        "  Circuit:          {}",
        runtime.bridge.circuit_state(AgentRole::Workspace)
    );
    println!(
        "  Refused attempts: {}",
        runtime.metrics.counter_total("circuit_rejections")
    );
    print_outcome(&result);
    println!();

    Ok(())
}
