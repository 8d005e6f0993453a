//! Session-level requests and results.
//!
//! `SessionRequest` is what a caller supplies to start or resume a session.
//! `SessionResult` is what it always receives back: a structured summary of
//! the stored state, never a raw error from inside a stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    state::{AgentState, ErrorRecord, PayloadSection, WorkflowStage},
    task::TaskDescriptor,
};

/// Input for starting (or resuming) a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub tenant_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub initial_task: TaskDescriptor,
}

impl SessionRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
        initial_task: TaskDescriptor,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            user_id: None,
            initial_task,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// The three agent-owned payload sections, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadSections {
    pub workspace_data: PayloadSection,
    pub campaign_plan: PayloadSection,
    pub insights_data: PayloadSection,
}

/// The structured outcome of running a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub tenant_id: String,
    pub session_id: String,
    pub stage: WorkflowStage,
    /// Version of the stored snapshot this result was built from.
    pub version: u64,
    pub paused: bool,
    pub payload_sections: PayloadSections,
    pub errors: BTreeMap<String, ErrorRecord>,
}

impl SessionResult {
    /// Summarize a (persisted) state.
    pub fn from_state(state: &AgentState) -> Self {
        Self {
            tenant_id: state.tenant_id().to_string(),
            session_id: state.session_id().to_string(),
            stage: state.current_stage(),
            version: state.version(),
            paused: state.paused,
            payload_sections: PayloadSections {
                workspace_data: state.workspace_data.clone(),
                campaign_plan: state.campaign_plan.clone(),
                insights_data: state.insights_data.clone(),
            },
            errors: state.agent_errors.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stage == WorkflowStage::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.stage == WorkflowStage::Failed
    }
}
