//! # conductor-contracts
//!
//! Shared types for the Conductor multi-agent orchestration core.
//!
//! All crates in the workspace import from here. Logic in this crate is
//! limited to the methods that keep `AgentState` invariants intact (forward-only
//! stage transitions, immutable tenant identity).

pub mod admission;
pub mod command;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod state;
pub mod task;

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use command::{AgentReply, Command, CommandKind, WorkflowAction};
    use error::{ConductorError, ErrorClass};
    use execution::SessionResult;
    use state::{AgentRole, AgentState, ErrorRecord, WorkflowStage};
    use task::TaskDescriptor;

    fn make_state() -> AgentState {
        AgentState::new(
            "t1",
            "s1",
            Some("u1".to_string()),
            TaskDescriptor::new("plan_campaign", json!({ "brief_id": "brief-spring" })),
        )
    }

    // ── WorkflowStage ordering ───────────────────────────────────────────────

    #[test]
    fn stage_successors_follow_declared_order() {
        let mut stage = WorkflowStage::Intake;
        let mut walked = vec![stage];
        while let Some(next) = stage.successor() {
            walked.push(next);
            stage = next;
        }
        assert_eq!(walked, WorkflowStage::ORDER.to_vec());
        assert_eq!(WorkflowStage::Failed.successor(), None);
    }

    #[test]
    fn stage_transitions_only_forward_or_to_failed() {
        use WorkflowStage::*;

        assert!(Intake.can_transition_to(Planning));
        assert!(Planning.can_transition_to(Planning));
        assert!(Insights.can_transition_to(Failed));
        assert!(!Insights.can_transition_to(WorkspaceAnalysis));
        assert!(!Complete.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Complete));
    }

    #[test]
    fn dispatch_agent_owns_the_following_stage() {
        for stage in [
            WorkflowStage::Intake,
            WorkflowStage::WorkspaceAnalysis,
            WorkflowStage::Planning,
            WorkflowStage::Insights,
        ] {
            let agent = stage.dispatch_agent().unwrap();
            assert_eq!(Some(agent.owned_stage()), stage.successor());
        }
        assert_eq!(WorkflowStage::Supervision.dispatch_agent(), None);
    }

    #[test]
    fn stage_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&WorkflowStage::WorkspaceAnalysis).unwrap();
        assert_eq!(json, "\"WORKSPACE_ANALYSIS\"");
    }

    // ── AgentState ───────────────────────────────────────────────────────────

    #[test]
    fn new_state_starts_at_intake_unpersisted() {
        let state = make_state();
        assert_eq!(state.current_stage(), WorkflowStage::Intake);
        assert_eq!(state.version(), 0);
        assert!(state.workspace_data.is_empty());
        assert_eq!(state.pending_agent(), Some(AgentRole::Workspace));
    }

    #[test]
    fn backward_transition_is_rejected() {
        let mut state = make_state();
        state.transition_to(WorkflowStage::Insights).unwrap();

        let err = state.transition_to(WorkflowStage::Planning).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidTransition { .. }));
        assert_eq!(state.current_stage(), WorkflowStage::Insights);
    }

    #[test]
    fn terminal_state_never_moves() {
        let mut state = make_state();
        state.transition_to(WorkflowStage::Failed).unwrap();
        assert!(state.transition_to(WorkflowStage::Failed).is_err());
        assert!(state.transition_to(WorkflowStage::Complete).is_err());
    }

    #[test]
    fn merge_section_targets_owner_only() {
        let mut state = make_state();
        let mut data = Map::new();
        data.insert("budget_allocation".to_string(), json!({ "search": 600 }));

        state.merge_section(AgentRole::Planning, &data);
        state.merge_section(AgentRole::Supervisor, &data);

        assert!(state.campaign_plan.contains_key("budget_allocation"));
        assert!(state.workspace_data.is_empty());
        assert!(state.insights_data.is_empty());
    }

    #[test]
    fn assigned_tasks_are_taken_oldest_first() {
        let mut state = make_state();
        let first = TaskDescriptor::new("audit", json!(1)).assigned(AgentRole::Insights, AgentRole::Planning);
        let second = TaskDescriptor::new("audit", json!(2)).assigned(AgentRole::Insights, AgentRole::Planning);
        let first_id = first.id.clone();
        state.enqueue_task(first);
        state.enqueue_task(second);

        assert_eq!(state.take_assigned_task(AgentRole::Workspace), None);
        let taken = state.take_assigned_task(AgentRole::Insights).unwrap();
        assert_eq!(taken.id, first_id);
        assert!(state.active_tasks.contains(&first_id));

        state.complete_task(&first_id);
        assert!(!state.active_tasks.contains(&first_id));
        assert_eq!(state.assigned_tasks.len(), 1);
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    #[test]
    fn handoff_carries_common_header() {
        let cmd = Command::handoff(
            AgentRole::Planning,
            AgentRole::Insights,
            json!({ "note": "skip" }),
            "budget needs insights review",
        );
        assert_eq!(cmd.issued_by(), AgentRole::Planning);
        assert_eq!(cmd.target_agent(), Some(AgentRole::Insights));
        assert_eq!(cmd.reason(), "budget needs insights review");
        assert_eq!(cmd.kind(), &CommandKind::AgentHandoff);
    }

    #[test]
    fn control_command_has_no_target() {
        let cmd = Command::control(AgentRole::Insights, WorkflowAction::Abort, "invalid budget");
        assert_eq!(cmd.target_agent(), None);
        assert_eq!(
            cmd.kind(),
            &CommandKind::WorkflowControl { action: WorkflowAction::Abort }
        );
    }

    #[test]
    fn command_ids_are_unique() {
        let a = Command::control(AgentRole::Supervisor, WorkflowAction::Retry, "again");
        let b = Command::control(AgentRole::Supervisor, WorkflowAction::Retry, "again");
        assert_ne!(a.command_id(), b.command_id());
    }

    #[test]
    fn agent_reply_command_round_trips() {
        let reply = AgentReply::Command(Command::data_request(
            AgentRole::Planning,
            AgentRole::Workspace,
            vec!["campaign_data".to_string()],
            "need campaign data",
        ));
        let json = serde_json::to_string(&reply).unwrap();
        let decoded: AgentReply = serde_json::from_str(&json).unwrap();
        assert_eq!(reply, decoded);
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn error_classes() {
        let transient = ConductorError::TransientAgent {
            agent: "workspace".to_string(),
            reason: "connection reset".to_string(),
        };
        let conflict = ConductorError::VersionConflict {
            session_id: "s1".to_string(),
            expected: 2,
            found: 3,
        };
        let capacity = ConductorError::Capacity {
            tenant_id: "t1".to_string(),
            reason: "OverCapacity".to_string(),
        };
        let fatal = ConductorError::FatalWorkflow {
            agent: "insights".to_string(),
            reason: "invalid budget".to_string(),
        };

        assert!(transient.is_transient());
        assert_eq!(conflict.class(), ErrorClass::DataIntegrity);
        assert_eq!(capacity.class(), ErrorClass::Capacity);
        assert_eq!(fatal.class(), ErrorClass::Fatal);
    }

    #[test]
    fn unadmittable_work_is_not_retried() {
        let over_budget = ConductorError::OverBudget {
            tenant_id: "t1".to_string(),
            weight: 3,
            budget: 2,
        };
        let open = ConductorError::CircuitOpen {
            agent: "workspace".to_string(),
            retry_after_ms: 500,
        };

        assert_eq!(over_budget.class(), ErrorClass::Fatal);
        assert!(!over_budget.is_transient());
        assert!(over_budget.reason().contains("budget is 2"));
        assert_eq!(open.class(), ErrorClass::Fatal);
        assert!(open.reason().contains("circuit open"));
    }

    #[test]
    fn error_record_keeps_reason_and_attempts() {
        let err = ConductorError::RetriesExhausted {
            agent: "workspace".to_string(),
            attempts: 3,
            reason: "rate limited".to_string(),
        };
        let record = ErrorRecord::from_error(&err);
        assert_eq!(record.message, "rate limited");
        assert_eq!(record.attempts, 3);
        assert_eq!(record.class, ErrorClass::Fatal);
    }

    #[test]
    fn version_conflict_display() {
        let err = ConductorError::VersionConflict {
            session_id: "s1".to_string(),
            expected: 2,
            found: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("version conflict"));
        assert!(msg.contains("s1"));
    }

    // ── SessionResult ────────────────────────────────────────────────────────

    #[test]
    fn session_result_summarizes_state() {
        let mut state = make_state();
        state.record_error(
            AgentRole::Insights,
            ErrorRecord::new(ErrorClass::Fatal, "invalid budget"),
        );
        state.transition_to(WorkflowStage::Failed).unwrap();

        let result = SessionResult::from_state(&state);
        assert!(result.is_failed());
        assert_eq!(result.errors["insights"].message, "invalid budget");
        assert_eq!(result, SessionResult::from_state(&state));
    }
}
