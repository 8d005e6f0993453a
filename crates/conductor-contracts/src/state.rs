//! Agent state and workflow position types.
//!
//! `AgentState` is the versioned, tenant-scoped document threaded through
//! every stage of a session. The orchestrator is its only writer; agents
//! receive it by shared reference.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{ConductorError, ConductorResult, ErrorClass},
    task::TaskDescriptor,
};

/// An agent-owned payload section: string keys to arbitrary JSON.
pub type PayloadSection = BTreeMap<String, Value>;

// ── Workflow stage ───────────────────────────────────────────────────────────

/// One named step of the fixed agent pipeline.
///
/// The declared order is
/// `INTAKE → WORKSPACE_ANALYSIS → PLANNING → INSIGHTS → SUPERVISION → COMPLETE`,
/// with `FAILED` reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStage {
    Intake,
    WorkspaceAnalysis,
    Planning,
    Insights,
    Supervision,
    Complete,
    Failed,
}

impl WorkflowStage {
    /// The non-failure stages in declared order.
    pub const ORDER: [WorkflowStage; 6] = [
        WorkflowStage::Intake,
        WorkflowStage::WorkspaceAnalysis,
        WorkflowStage::Planning,
        WorkflowStage::Insights,
        WorkflowStage::Supervision,
        WorkflowStage::Complete,
    ];

    /// Position in the declared order. `Failed` sits outside it.
    pub fn ordinal(self) -> Option<usize> {
        Self::ORDER.iter().position(|s| *s == self)
    }

    /// True for `Complete` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStage::Complete | WorkflowStage::Failed)
    }

    /// The next stage in declared order, if any.
    pub fn successor(self) -> Option<WorkflowStage> {
        let idx = self.ordinal()?;
        Self::ORDER.get(idx + 1).copied()
    }

    /// The agent whose work moves the workflow out of this stage.
    ///
    /// This is the owner of the following stage. `Supervision` has none:
    /// reaching it means the supervisor's review is on record.
    pub fn dispatch_agent(self) -> Option<AgentRole> {
        match self {
            WorkflowStage::Intake => Some(AgentRole::Workspace),
            WorkflowStage::WorkspaceAnalysis => Some(AgentRole::Planning),
            WorkflowStage::Planning => Some(AgentRole::Insights),
            WorkflowStage::Insights => Some(AgentRole::Supervisor),
            WorkflowStage::Supervision | WorkflowStage::Complete | WorkflowStage::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` respects the workflow order.
    ///
    /// Terminal stages never move. `Failed` is reachable from anything else.
    /// Otherwise the move must be forward; staying put is allowed.
    pub fn can_transition_to(self, next: WorkflowStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == WorkflowStage::Failed {
            return true;
        }
        match (self.ordinal(), next.ordinal()) {
            (Some(from), Some(to)) => to >= from,
            _ => false,
        }
    }

    /// Stable upper-case label, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStage::Intake => "INTAKE",
            WorkflowStage::WorkspaceAnalysis => "WORKSPACE_ANALYSIS",
            WorkflowStage::Planning => "PLANNING",
            WorkflowStage::Insights => "INSIGHTS",
            WorkflowStage::Supervision => "SUPERVISION",
            WorkflowStage::Complete => "COMPLETE",
            WorkflowStage::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Agent role ───────────────────────────────────────────────────────────────

/// The closed set of agents in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Workspace,
    Planning,
    Insights,
    Supervisor,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Workspace,
        AgentRole::Planning,
        AgentRole::Insights,
        AgentRole::Supervisor,
    ];

    /// Lower-case name used as the key in `agent_results` / `agent_errors`.
    pub fn name(self) -> &'static str {
        match self {
            AgentRole::Workspace => "workspace",
            AgentRole::Planning => "planning",
            AgentRole::Insights => "insights",
            AgentRole::Supervisor => "supervisor",
        }
    }

    /// The stage this agent owns.
    pub fn owned_stage(self) -> WorkflowStage {
        match self {
            AgentRole::Workspace => WorkflowStage::WorkspaceAnalysis,
            AgentRole::Planning => WorkflowStage::Planning,
            AgentRole::Insights => WorkflowStage::Insights,
            AgentRole::Supervisor => WorkflowStage::Supervision,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Session key ──────────────────────────────────────────────────────────────

/// The `(tenant, session)` pair that identifies a session everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub tenant_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(tenant_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.session_id)
    }
}

// ── Audit trail entries ──────────────────────────────────────────────────────

/// One chronological entry in the session's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Agent name, or "orchestrator" / "user" for non-agent senders.
    pub sender: String,
    /// The agent the message is addressed to, if any.
    pub recipient: Option<AgentRole>,
    pub content: String,
    #[serde(default)]
    pub data: Value,
    pub sent_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: None,
            content: content.into(),
            data: Value::Null,
            sent_at: Utc::now(),
        }
    }

    pub fn to(mut self, recipient: AgentRole) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// The last error recorded against an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub class: ErrorClass,
    pub message: String,
    /// Attempts made before the error was recorded (1 when not retried).
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            attempts: 1,
            recorded_at: Utc::now(),
        }
    }

    /// Build a record from a runtime error, keeping only its reason text.
    pub fn from_error(err: &ConductorError) -> Self {
        let attempts = match err {
            ConductorError::RetriesExhausted { attempts, .. } => *attempts,
            _ => 1,
        };
        Self {
            attempts,
            ..Self::new(err.class(), err.reason())
        }
    }
}

// ── Agent state ──────────────────────────────────────────────────────────────

/// The unit of durable, shared context for one session.
///
/// Identity fields are private: once a session exists its tenant and session
/// ids cannot change. `version` and `checksum` are assigned by the state
/// store on every successful save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    tenant_id: String,
    session_id: String,
    pub user_id: Option<String>,

    current_stage: WorkflowStage,
    pub next_agent: Option<AgentRole>,

    pub workspace_data: PayloadSection,
    pub campaign_plan: PayloadSection,
    pub insights_data: PayloadSection,

    pub agent_messages: Vec<AgentMessage>,
    pub agent_results: BTreeMap<String, Value>,
    pub agent_errors: BTreeMap<String, ErrorRecord>,

    pub active_tasks: BTreeSet<String>,
    pub assigned_tasks: Vec<TaskDescriptor>,
    pub initial_task: TaskDescriptor,

    /// Re-entries of the current stage (retry commands, data requests).
    pub reentries: u32,
    /// Agent invocations made in this session.
    pub iterations: u32,
    pub paused: bool,

    version: u64,
    checksum: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    /// A fresh, unpersisted session at `INTAKE` with empty payload sections.
    pub fn new(
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
        user_id: Option<String>,
        initial_task: TaskDescriptor,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            user_id,
            current_stage: WorkflowStage::Intake,
            next_agent: None,
            workspace_data: PayloadSection::new(),
            campaign_plan: PayloadSection::new(),
            insights_data: PayloadSection::new(),
            agent_messages: Vec::new(),
            agent_results: BTreeMap::new(),
            agent_errors: BTreeMap::new(),
            active_tasks: BTreeSet::new(),
            assigned_tasks: Vec::new(),
            initial_task,
            reentries: 0,
            iterations: 0,
            paused: false,
            version: 0,
            checksum: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.tenant_id.clone(), self.session_id.clone())
    }

    pub fn current_stage(&self) -> WorkflowStage {
        self.current_stage
    }

    pub fn is_terminal(&self) -> bool {
        self.current_stage.is_terminal()
    }

    /// Version of the last persisted snapshot (0 = never persisted).
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Stamp the version and checksum assigned by a successful save.
    pub fn mark_persisted(&mut self, version: u64, checksum: String) {
        self.version = version;
        self.checksum = checksum;
    }

    /// A copy of this state with the checksum blanked, for hashing.
    pub fn without_checksum(&self) -> AgentState {
        AgentState {
            checksum: String::new(),
            ..self.clone()
        }
    }

    /// The agent that should run next: `next_agent`, else the stage default.
    pub fn pending_agent(&self) -> Option<AgentRole> {
        self.next_agent.or_else(|| self.current_stage.dispatch_agent())
    }

    /// Move to `stage`, enforcing the workflow order.
    ///
    /// Moving to the current stage is a no-op. Leaving a stage resets the
    /// re-entry counter.
    pub fn transition_to(&mut self, stage: WorkflowStage) -> ConductorResult<()> {
        if stage == self.current_stage && !stage.is_terminal() {
            return Ok(());
        }
        if !self.current_stage.can_transition_to(stage) {
            return Err(ConductorError::InvalidTransition {
                from: self.current_stage.to_string(),
                to: stage.to_string(),
            });
        }
        self.current_stage = stage;
        self.reentries = 0;
        self.touch();
        Ok(())
    }

    /// The payload section owned by `role`. The supervisor owns none.
    pub fn section(&self, role: AgentRole) -> Option<&PayloadSection> {
        match role {
            AgentRole::Workspace => Some(&self.workspace_data),
            AgentRole::Planning => Some(&self.campaign_plan),
            AgentRole::Insights => Some(&self.insights_data),
            AgentRole::Supervisor => None,
        }
    }

    /// Merge `data` into `role`'s owned section, overwriting existing keys.
    pub fn merge_section(&mut self, role: AgentRole, data: &Map<String, Value>) {
        let section = match role {
            AgentRole::Workspace => &mut self.workspace_data,
            AgentRole::Planning => &mut self.campaign_plan,
            AgentRole::Insights => &mut self.insights_data,
            AgentRole::Supervisor => return,
        };
        for (key, value) in data {
            section.insert(key.clone(), value.clone());
        }
        self.touch();
    }

    pub fn record_result(&mut self, role: AgentRole, result: Value) {
        self.agent_results.insert(role.name().to_string(), result);
        self.touch();
    }

    pub fn record_error(&mut self, role: AgentRole, record: ErrorRecord) {
        self.agent_errors.insert(role.name().to_string(), record);
        self.touch();
    }

    pub fn push_message(&mut self, message: AgentMessage) {
        self.agent_messages.push(message);
        self.touch();
    }

    /// Queue a task for its target agent and mark it in flight.
    pub fn enqueue_task(&mut self, task: TaskDescriptor) {
        self.active_tasks.insert(task.id.clone());
        self.assigned_tasks.push(task);
        self.touch();
    }

    /// Remove and return the oldest task queued for `role`.
    pub fn take_assigned_task(&mut self, role: AgentRole) -> Option<TaskDescriptor> {
        let idx = self
            .assigned_tasks
            .iter()
            .position(|t| t.assigned_to == Some(role))?;
        Some(self.assigned_tasks.remove(idx))
    }

    /// Drop `task_id` from the in-flight set.
    pub fn complete_task(&mut self, task_id: &str) {
        self.active_tasks.remove(task_id);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
