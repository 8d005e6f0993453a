//! The command protocol agents use to steer a session.
//!
//! An agent returns either a plain success or a `Command`. Commands are
//! immutable once built: all fields are private and only readable through
//! getters. The orchestrator is the only component that interprets them, and
//! it does so with an exhaustive match on `CommandKind`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::state::AgentRole;

/// Control actions carried by `CommandKind::WorkflowControl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    /// End the session in `FAILED`, recording the command's reason.
    Abort,
    /// Re-enter the current stage with the issuing agent.
    Retry,
    /// Finish the session in `COMPLETE` (supervisor only).
    Complete,
    /// Persist the session and stop until it is resumed.
    Pause,
}

impl std::fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            WorkflowAction::Abort => "abort",
            WorkflowAction::Retry => "retry",
            WorkflowAction::Complete => "complete",
            WorkflowAction::Pause => "pause",
        };
        f.write_str(label)
    }
}

/// The variant-specific part of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    /// Pass control to `target_agent`, advancing to the stage it owns.
    AgentHandoff,
    /// Ask for data from `target_agent`'s section. Empty `keys` = whole section.
    DataRequest { keys: Vec<String> },
    /// Queue a task of `task_type` for `target_agent`.
    TaskAssignment { task_type: String },
    /// Deliver the payload as the issuer's result, addressed to `target_agent`.
    ResultDelivery,
    /// Change workflow progression.
    WorkflowControl { action: WorkflowAction },
}

impl CommandKind {
    pub fn label(&self) -> &'static str {
        match self {
            CommandKind::AgentHandoff => "agent_handoff",
            CommandKind::DataRequest { .. } => "data_request",
            CommandKind::TaskAssignment { .. } => "task_assignment",
            CommandKind::ResultDelivery => "result_delivery",
            CommandKind::WorkflowControl { .. } => "workflow_control",
        }
    }
}

/// A typed directive issued by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    command_id: Uuid,
    issued_by: AgentRole,
    target_agent: Option<AgentRole>,
    payload: Value,
    reason: String,
    issued_at: DateTime<Utc>,
    kind: CommandKind,
}

impl Command {
    fn build(
        kind: CommandKind,
        issued_by: AgentRole,
        target_agent: Option<AgentRole>,
        payload: Value,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            issued_by,
            target_agent,
            payload,
            reason: reason.into(),
            issued_at: Utc::now(),
            kind,
        }
    }

    /// Hand control to `target`, carrying `payload` in the handoff message.
    pub fn handoff(
        issued_by: AgentRole,
        target: AgentRole,
        payload: Value,
        reason: impl Into<String>,
    ) -> Self {
        Self::build(CommandKind::AgentHandoff, issued_by, Some(target), payload, reason)
    }

    /// Request `keys` (or the whole section, when empty) from `target`.
    pub fn data_request(
        issued_by: AgentRole,
        target: AgentRole,
        keys: Vec<String>,
        reason: impl Into<String>,
    ) -> Self {
        let payload = Value::Array(keys.iter().cloned().map(Value::String).collect());
        Self::build(CommandKind::DataRequest { keys }, issued_by, Some(target), payload, reason)
    }

    /// Queue a `task_type` task with body `payload` for `target`.
    pub fn assign_task(
        issued_by: AgentRole,
        target: AgentRole,
        task_type: impl Into<String>,
        payload: Value,
        reason: impl Into<String>,
    ) -> Self {
        let kind = CommandKind::TaskAssignment {
            task_type: task_type.into(),
        };
        Self::build(kind, issued_by, Some(target), payload, reason)
    }

    /// Deliver `result` as the issuer's output, addressed to `target`.
    pub fn deliver_result(
        issued_by: AgentRole,
        target: AgentRole,
        result: Map<String, Value>,
        reason: impl Into<String>,
    ) -> Self {
        Self::build(
            CommandKind::ResultDelivery,
            issued_by,
            Some(target),
            Value::Object(result),
            reason,
        )
    }

    /// A workflow control command with no target.
    pub fn control(issued_by: AgentRole, action: WorkflowAction, reason: impl Into<String>) -> Self {
        Self::build(
            CommandKind::WorkflowControl { action },
            issued_by,
            None,
            Value::Null,
            reason,
        )
    }

    pub fn command_id(&self) -> Uuid {
        self.command_id
    }

    pub fn issued_by(&self) -> AgentRole {
        self.issued_by
    }

    pub fn target_agent(&self) -> Option<AgentRole> {
        self.target_agent
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Human-readable justification, kept for audit and debugging.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }
}

/// What an agent hands back from `process_task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentReply {
    /// Success; the map is merged into the agent's owned payload section.
    Success(Map<String, Value>),
    /// A directive for the orchestrator.
    Command(Command),
}
