//! Task descriptors handed to agents alongside the session state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::AgentRole;

/// A unit of work an agent is asked to perform.
///
/// The orchestrator derives one per stage from the session's initial task,
/// or hands over a task another agent queued with a `TaskAssignment` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique task identifier (UUID v4 string).
    pub id: String,
    /// Discriminant agents branch on (e.g. "planning_stage", "data_response").
    pub task_type: String,
    /// Arbitrary JSON body.
    pub data: Value,
    /// The agent the task is queued for, when it was assigned explicitly.
    #[serde(default)]
    pub assigned_to: Option<AgentRole>,
    /// The agent that queued the task, when it was assigned explicitly.
    #[serde(default)]
    pub assigned_by: Option<AgentRole>,
}

impl TaskDescriptor {
    /// Create an unassigned task with a fresh id.
    pub fn new(task_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            data,
            assigned_to: None,
            assigned_by: None,
        }
    }

    /// Address this task to `target`, recording who assigned it.
    pub fn assigned(mut self, target: AgentRole, by: AgentRole) -> Self {
        self.assigned_to = Some(target);
        self.assigned_by = Some(by);
        self
    }

    /// The default task for `role`'s stage, carrying the session's initial data.
    pub fn for_stage(role: AgentRole, initial: &TaskDescriptor) -> Self {
        Self::new(format!("{}_stage", role.name()), initial.data.clone())
    }
}
