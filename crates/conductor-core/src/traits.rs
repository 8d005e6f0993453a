//! Core trait definitions for the Conductor orchestration core.
//!
//! These traits are the seams between the orchestrator and its collaborators:
//!
//! - `Agent`:            untrusted stage logic (may be backed by an LLM)
//! - `StateStore`:       durable, optimistically-versioned session storage
//! - `DurableExecution`: runs one stage with timeout, retry, at-most-once
//! - `AdmissionControl`: per-tenant capacity budget
//! - `MetricsSink`:      push-only monitoring events
//!
//! The orchestrator wires them together; none of them call each other
//! directly except the bridge, which consults admission control.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use conductor_contracts::{
    admission::{AdmissionPermit, OperationKind},
    command::AgentReply,
    error::{ConductorError, ConductorResult},
    metrics::MetricEvent,
    state::{AgentMessage, AgentRole, AgentState},
    task::TaskDescriptor,
};

/// An agent that performs the work of one pipeline role.
///
/// Implementations receive the session state read-only. They report their
/// outcome as an `AgentReply`; the orchestrator applies it to the state.
/// Returning `ConductorError::TransientAgent` asks the bridge to retry.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The pipeline role this agent fills.
    fn role(&self) -> AgentRole;

    /// Cost class used by admission control to weigh each attempt.
    fn operation_kind(&self) -> OperationKind {
        OperationKind::LlmCall
    }

    /// Perform `task` against the current session state.
    async fn process_task(
        &self,
        state: &AgentState,
        task: &TaskDescriptor,
    ) -> ConductorResult<AgentReply>;
}

/// Durable storage for `AgentState` with optimistic concurrency.
///
/// Every successful write increments the version by one and stores a fresh
/// checksum. A write whose base version is stale fails with
/// `ConductorError::VersionConflict`; callers re-load and retry.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a brand-new session as version 1.
    async fn create(&self, state: AgentState) -> ConductorResult<AgentState>;

    /// Load the latest snapshot, verifying its checksum.
    async fn load(&self, tenant_id: &str, session_id: &str) -> ConductorResult<AgentState>;

    /// Atomically replace the stored snapshot. `state.version()` is the base.
    async fn save(&self, state: AgentState) -> ConductorResult<AgentState>;

    /// Append one message to the session's audit trail.
    async fn append_message(
        &self,
        tenant_id: &str,
        session_id: &str,
        message: AgentMessage,
    ) -> ConductorResult<AgentState>;
}

/// One stage's worth of work handed to the bridge.
#[derive(Clone)]
pub struct StageInvocation {
    pub agent: Arc<dyn Agent>,
    pub task: TaskDescriptor,
}

/// What the bridge reports for a stage that produced a reply.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub reply: AgentReply,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// The durable-execution boundary the orchestrator dispatches stages through.
#[async_trait]
pub trait DurableExecution: Send + Sync {
    /// Run one stage for `state`'s session.
    ///
    /// Must reject a second concurrent call for the same session with
    /// `ConductorError::ConcurrentExecution` rather than queueing it.
    async fn execute_stage(
        &self,
        state: &AgentState,
        invocation: StageInvocation,
    ) -> ConductorResult<StageOutcome>;
}

/// Per-tenant admission control.
///
/// `acquire` must be safe under concurrent calls from many sessions of the
/// same tenant, and `release` must tolerate a permit being released twice.
pub trait AdmissionControl: Send + Sync {
    /// Weight charged for one attempt of the given kind.
    fn weight_for(&self, kind: OperationKind) -> u32;

    /// Reserve `weight` units of `tenant_id`'s budget.
    ///
    /// Returns `ConductorError::Capacity` when the budget cannot fit it.
    fn acquire(&self, tenant_id: &str, weight: u32) -> ConductorResult<AdmissionPermit>;

    /// Give the permit's units back.
    fn release(&self, permit: AdmissionPermit);
}

/// Push-only sink for monitoring events.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, event: MetricEvent);
}

/// The closed set of agents, one per `AgentRole`.
#[derive(Clone)]
pub struct AgentRoster {
    workspace: Arc<dyn Agent>,
    planning: Arc<dyn Agent>,
    insights: Arc<dyn Agent>,
    supervisor: Arc<dyn Agent>,
}

impl AgentRoster {
    /// Build a roster, checking each agent reports the role of its slot.
    pub fn new(
        workspace: Arc<dyn Agent>,
        planning: Arc<dyn Agent>,
        insights: Arc<dyn Agent>,
        supervisor: Arc<dyn Agent>,
    ) -> ConductorResult<Self> {
        let roster = Self {
            workspace,
            planning,
            insights,
            supervisor,
        };
        for role in AgentRole::ALL {
            let actual = roster.get(role).role();
            if actual != role {
                return Err(ConductorError::Config {
                    reason: format!("agent in the '{}' slot reports role '{}'", role, actual),
                });
            }
        }
        Ok(roster)
    }

    pub fn get(&self, role: AgentRole) -> Arc<dyn Agent> {
        match role {
            AgentRole::Workspace => self.workspace.clone(),
            AgentRole::Planning => self.planning.clone(),
            AgentRole::Insights => self.insights.clone(),
            AgentRole::Supervisor => self.supervisor.clone(),
        }
    }
}
