//! The four campaign agents.
//!
//! Pipeline (default edges):
//!   WorkspaceAgent → PlanningAgent → InsightsAgent → SupervisorAgent
//!
//! Each agent reads the session state read-only and answers with an
//! `AgentReply`. Off the default path:
//!
//! - `PlanningAgent` hands off straight to insights when the brief's budget
//!   cannot be allocated, so insights can diagnose it.
//! - `InsightsAgent` aborts the session on an invalid budget, and otherwise
//!   asks the workspace agent for channel benchmarks with a `DataRequest`
//!   before projecting performance.
//! - `SupervisorAgent` scores the session and sends it back to whichever
//!   agent owns the first missing piece when the score is below threshold.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use conductor_contracts::{
    admission::OperationKind,
    command::{AgentReply, Command, WorkflowAction},
    error::{ConductorError, ConductorResult},
    state::{AgentRole, AgentState},
    task::TaskDescriptor,
};
use conductor_core::traits::Agent;

use crate::mock_data::{campaign_brief, channel_metrics, channel_weight};

/// Score at or above which the supervisor signs the session off.
pub const COMPLETION_THRESHOLD: f64 = 0.9;

const SHEETS_WEIGHT: f64 = 0.3;
const BUDGET_WEIGHT: f64 = 0.4;
const PERFORMANCE_WEIGHT: f64 = 0.3;

async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

fn fatal(role: AgentRole, reason: impl Into<String>) -> ConductorError {
    ConductorError::FatalWorkflow {
        agent: role.name().to_string(),
        reason: reason.into(),
    }
}

fn success(value: Value) -> ConductorResult<AgentReply> {
    match value {
        Value::Object(map) => Ok(AgentReply::Success(map)),
        _ => Ok(AgentReply::Success(Map::new())),
    }
}

/// The brief's total budget as recorded by the workspace agent.
fn total_budget(state: &AgentState) -> Option<f64> {
    state
        .workspace_data
        .get("campaign_data")
        .and_then(|brief| brief["total_budget"].as_f64())
}

// ── Workspace ─────────────────────────────────────────────────────────────────

/// Reads the campaign brief and channel benchmarks from the workspace.
///
/// `failing_first(n)` makes the first `n` calls fail with a transient
/// rate-limit error, the way a throttled spreadsheet API would.
#[derive(Debug, Default)]
pub struct WorkspaceAgent {
    latency: Duration,
    transient_failures: AtomicU32,
}

impl WorkspaceAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_first(self, failures: u32) -> Self {
        self.transient_failures.store(failures, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl Agent for WorkspaceAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Workspace
    }

    fn operation_kind(&self) -> OperationKind {
        OperationKind::DataFetch
    }

    async fn process_task(
        &self,
        _state: &AgentState,
        task: &TaskDescriptor,
    ) -> ConductorResult<AgentReply> {
        simulate_latency(self.latency).await;

        let throttled = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(ConductorError::TransientAgent {
                agent: AgentRole::Workspace.name().to_string(),
                reason: "workspace API rate limited (429)".to_string(),
            });
        }

        let brief_id = task.data["brief_id"]
            .as_str()
            .ok_or_else(|| fatal(AgentRole::Workspace, "task carries no brief_id"))?;
        let brief = campaign_brief(brief_id)
            .ok_or_else(|| fatal(AgentRole::Workspace, format!("unknown brief '{}'", brief_id)))?;

        let metrics: Map<String, Value> = brief["channels"]
            .as_array()
            .map(|channels| {
                channels
                    .iter()
                    .filter_map(|c| c.as_str())
                    .map(|c| (c.to_string(), channel_metrics(c)))
                    .collect()
            })
            .unwrap_or_default();

        debug!(brief_id, channels = metrics.len(), "workspace analysed");
        success(json!({
            "sheets": brief["sheets"].clone(),
            "channel_metrics": Value::Object(metrics),
            "campaign_data": brief,
        }))
    }
}

// ── Planning ──────────────────────────────────────────────────────────────────

/// Splits the brief's budget across its channels.
#[derive(Debug, Default)]
pub struct PlanningAgent {
    latency: Duration,
}

impl PlanningAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl Agent for PlanningAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Planning
    }

    async fn process_task(
        &self,
        state: &AgentState,
        _task: &TaskDescriptor,
    ) -> ConductorResult<AgentReply> {
        simulate_latency(self.latency).await;

        let budget = total_budget(state)
            .ok_or_else(|| fatal(AgentRole::Planning, "workspace data carries no total_budget"))?;

        if budget <= 0.0 {
            return Ok(AgentReply::Command(Command::handoff(
                AgentRole::Planning,
                AgentRole::Insights,
                json!({ "total_budget": budget, "issue": "budget_not_allocatable" }),
                "budget cannot be allocated",
            )));
        }

        let brief = state
            .workspace_data
            .get("campaign_data")
            .cloned()
            .unwrap_or(Value::Null);
        let channels: Vec<&str> = brief["channels"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|c| c.as_str()).collect())
            .unwrap_or_default();
        if channels.is_empty() {
            return Err(fatal(AgentRole::Planning, "brief lists no channels"));
        }

        let weight_sum: f64 = channels.iter().map(|c| channel_weight(c)).sum();
        let allocation: Map<String, Value> = channels
            .iter()
            .map(|c| {
                let share = (budget * channel_weight(c) / weight_sum).round();
                (c.to_string(), json!(share))
            })
            .collect();

        success(json!({
            "budget_allocation": Value::Object(allocation),
            "total_budget": budget,
            "timeline_weeks": brief["duration_weeks"].clone(),
            "plan_status": "draft",
        }))
    }
}

// ── Insights ──────────────────────────────────────────────────────────────────

/// Projects clicks and conversions for the allocated plan.
#[derive(Debug, Default)]
pub struct InsightsAgent {
    latency: Duration,
}

impl InsightsAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn project(state: &AgentState, benchmarks: &Value) -> ConductorResult<AgentReply> {
        let Some(allocation) = state.campaign_plan.get("budget_allocation").and_then(Value::as_object)
        else {
            return Err(fatal(AgentRole::Insights, "no budget allocation to analyse"));
        };

        let mut per_channel = Map::new();
        let mut total_conversions = 0.0;
        let mut best: Option<(&str, f64)> = None;
        for (channel, spend) in allocation {
            let spend = spend.as_f64().unwrap_or(0.0);
            let cpc = benchmarks[channel]["cpc"].as_f64().unwrap_or(1.0);
            let cvr = benchmarks[channel]["conversion_rate"].as_f64().unwrap_or(0.0);

            let clicks = (spend / cpc).round();
            let conversions = (clicks * cvr).round();
            let cpa = if conversions > 0.0 { spend / conversions } else { 0.0 };
            total_conversions += conversions;
            if conversions > 0.0 && best.map_or(true, |(_, b)| cpa < b) {
                best = Some((channel.as_str(), cpa));
            }
            per_channel.insert(
                channel.clone(),
                json!({ "spend": spend, "clicks": clicks, "conversions": conversions, "cpa": cpa }),
            );
        }

        let recommendation = match best {
            Some((channel, _)) => format!("shift incremental spend towards {}", channel),
            None => "collect more data before scaling spend".to_string(),
        };
        success(json!({
            "performance_metrics": Value::Object(per_channel),
            "projected_conversions": total_conversions,
            "recommendations": [recommendation],
        }))
    }
}

#[async_trait]
impl Agent for InsightsAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Insights
    }

    async fn process_task(
        &self,
        state: &AgentState,
        task: &TaskDescriptor,
    ) -> ConductorResult<AgentReply> {
        simulate_latency(self.latency).await;

        match task.task_type.as_str() {
            "data_response" => Self::project(state, &task.data["data"]["channel_metrics"]),
            "data_unavailable" => Ok(AgentReply::Command(Command::control(
                AgentRole::Insights,
                WorkflowAction::Abort,
                "channel benchmarks unavailable",
            ))),
            _ => {
                let budget = total_budget(state).unwrap_or(0.0);
                if budget <= 0.0 {
                    return Ok(AgentReply::Command(Command::control(
                        AgentRole::Insights,
                        WorkflowAction::Abort,
                        "invalid budget",
                    )));
                }
                Ok(AgentReply::Command(Command::data_request(
                    AgentRole::Insights,
                    AgentRole::Workspace,
                    vec!["channel_metrics".to_string()],
                    "channel benchmarks needed for projections",
                )))
            }
        }
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Scores the session and either signs it off or sends it back.
#[derive(Debug, Default)]
pub struct SupervisorAgent {
    latency: Duration,
}

impl SupervisorAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Weighted completeness of a session in `[0, 1]`.
///
/// Sheets analysed count 0.3, a budget allocation 0.4, performance
/// projections 0.3.
pub fn completion_score(state: &AgentState) -> f64 {
    let non_empty = |v: Option<&Value>| match v {
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        _ => false,
    };

    let mut score = 0.0;
    if non_empty(state.workspace_data.get("sheets")) {
        score += SHEETS_WEIGHT;
    }
    if non_empty(state.campaign_plan.get("budget_allocation")) {
        score += BUDGET_WEIGHT;
    }
    if non_empty(state.insights_data.get("performance_metrics")) {
        score += PERFORMANCE_WEIGHT;
    }
    score
}

#[async_trait]
impl Agent for SupervisorAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Supervisor
    }

    fn operation_kind(&self) -> OperationKind {
        OperationKind::Validation
    }

    async fn process_task(
        &self,
        state: &AgentState,
        _task: &TaskDescriptor,
    ) -> ConductorResult<AgentReply> {
        simulate_latency(self.latency).await;

        let score = completion_score(state);
        if score >= COMPLETION_THRESHOLD {
            return success(json!({
                "completion_score": score,
                "review": "approved",
            }));
        }

        let (target, missing) = if state.workspace_data.get("sheets").is_none() {
            (AgentRole::Workspace, "sheets")
        } else if state.campaign_plan.get("budget_allocation").is_none() {
            (AgentRole::Planning, "budget_allocation")
        } else {
            (AgentRole::Insights, "performance_metrics")
        };
        Ok(AgentReply::Command(Command::handoff(
            AgentRole::Supervisor,
            target,
            json!({ "completion_score": score, "missing": missing }),
            format!("completion score {:.1} below threshold, {} missing", score, missing),
        )))
    }
}
