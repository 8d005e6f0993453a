//! The Conductor orchestrator: the checkpointed agent state machine.
//!
//! Each call to `step()` advances a session by exactly one agent invocation:
//!
//!   Load → Pick agent → Bridge (timeout, retry, admission) → Apply reply → Persist
//!
//! The orchestrator is the only writer of `AgentState`. Agents never see a
//! mutable state; they answer with an `AgentReply` and the orchestrator
//! interprets it. Every transition is saved through the `StateStore` before
//! the next agent runs, so a crashed process resumes from the last saved
//! stage and never re-applies a persisted transition.
//!
//! Errors from inside a stage are absorbed into the session: the session is
//! moved to `FAILED` with an error record and a `SessionResult` is returned.
//! Only errors that cannot be recorded in the session itself (missing session,
//! version conflict, corruption, concurrent execution) reach the caller.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use conductor_contracts::{
    command::{AgentReply, Command, CommandKind, WorkflowAction},
    error::{ConductorError, ConductorResult, ErrorClass},
    execution::{SessionRequest, SessionResult},
    metrics::{tags, MetricEvent},
    state::{AgentMessage, AgentRole, AgentState, ErrorRecord, SessionKey, WorkflowStage},
    task::TaskDescriptor,
};

use crate::config::OrchestratorConfig;
use crate::metrics::NoopMetricsSink;
use crate::traits::{AgentRoster, DurableExecution, MetricsSink, StageInvocation, StateStore};

/// Sender name and error key for decisions the orchestrator makes itself.
pub const ORCHESTRATOR: &str = "orchestrator";

/// Save attempts for a cancellation racing other writers.
const CANCEL_SAVE_ATTEMPTS: u32 = 5;

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    bridge: Arc<dyn DurableExecution>,
    roster: AgentRoster,
    metrics: Arc<dyn MetricsSink>,
    config: OrchestratorConfig,
    /// Sessions with a `run()` in progress in this process, with a count.
    active_runs: DashMap<SessionKey, usize>,
    /// Cancellation reasons not yet applied.
    cancellations: DashMap<SessionKey, String>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        bridge: Arc<dyn DurableExecution>,
        roster: AgentRoster,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            bridge,
            roster,
            metrics: Arc::new(NoopMetricsSink),
            config,
            active_runs: DashMap::new(),
            cancellations: DashMap::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Create and persist a new session at `INTAKE` (version 1).
    pub async fn start_session(&self, request: SessionRequest) -> ConductorResult<AgentState> {
        let SessionRequest {
            tenant_id,
            session_id,
            user_id,
            initial_task,
        } = request;

        let opening = AgentMessage::new("user", format!("requested {}", initial_task.task_type))
            .with_data(initial_task.data.clone());
        let mut state = AgentState::new(tenant_id, session_id, user_id, initial_task);
        state.push_message(opening);

        let state = self.store.create(state).await?;
        info!(
            session = %state.key(),
            version = state.version(),
            "session created"
        );
        self.emit_counter("sessions_started", &state);
        Ok(state)
    }

    /// Start the session if it does not exist yet, then run it.
    pub async fn run_session(&self, request: SessionRequest) -> ConductorResult<SessionResult> {
        let tenant_id = request.tenant_id.clone();
        let session_id = request.session_id.clone();

        match self.store.load(&tenant_id, &session_id).await {
            Ok(_) => {}
            Err(ConductorError::NotFound { .. }) => {
                self.start_session(request).await?;
            }
            Err(err) => return Err(err),
        }
        self.run(&tenant_id, &session_id).await
    }

    /// Drive a stored session until it is terminal or paused.
    ///
    /// Running a terminal session returns its result without side effects.
    pub async fn run(&self, tenant_id: &str, session_id: &str) -> ConductorResult<SessionResult> {
        let key = SessionKey::new(tenant_id, session_id);
        let outcome = {
            let _active = ActiveRun::enter(&self.active_runs, key.clone());
            self.drive(&key).await
        };
        let result = outcome?;

        if self.cancellations.contains_key(&key) {
            return self.apply_pending_cancellation(&key).await;
        }
        Ok(result)
    }

    async fn drive(&self, key: &SessionKey) -> ConductorResult<SessionResult> {
        let mut state = self.store.load(&key.tenant_id, &key.session_id).await?;
        debug!(
            session = %key,
            stage = %state.current_stage(),
            version = state.version(),
            "driving session"
        );
        while !state.is_terminal() && !state.paused {
            state = self.step(state).await?;
        }
        Ok(SessionResult::from_state(&state))
    }

    /// Execute one agent invocation and persist the resulting state.
    ///
    /// Returns the saved state. A terminal or paused state is returned as is.
    pub async fn step(&self, mut state: AgentState) -> ConductorResult<AgentState> {
        if state.is_terminal() || state.paused {
            return Ok(state);
        }
        let key = state.key();

        // ── Step 1: Cancellation requested between stages ────────────────────
        if let Some(reason) = self.take_cancellation(&key) {
            return self.persist_cancellation(state, &reason).await;
        }

        // ── Step 2: Pick the agent, or finalize ──────────────────────────────
        let Some(role) = state.pending_agent() else {
            state.transition_to(WorkflowStage::Complete)?;
            state.push_message(AgentMessage::new(ORCHESTRATOR, "workflow complete"));
            return self.persist(state).await;
        };

        if state.iterations >= self.config.max_iterations {
            let err = ConductorError::FatalWorkflow {
                agent: ORCHESTRATOR.to_string(),
                reason: format!(
                    "iteration limit of {} reached before '{}' could run",
                    self.config.max_iterations, role
                ),
            };
            self.fail(&mut state, ORCHESTRATOR, &err)?;
            return self.persist(state).await;
        }

        // ── Step 3: Dispatch through the bridge ──────────────────────────────
        let task = state
            .take_assigned_task(role)
            .unwrap_or_else(|| TaskDescriptor::for_stage(role, &state.initial_task));
        state.iterations += 1;
        info!(
            session = %key,
            stage = %state.current_stage(),
            agent = %role,
            task_type = %task.task_type,
            iteration = state.iterations,
            "dispatching agent"
        );

        let invocation = StageInvocation {
            agent: self.roster.get(role),
            task: task.clone(),
        };
        let result = self.bridge.execute_stage(&state, invocation).await;

        // ── Step 4: Cancellation raised while the stage was in flight ────────
        if let Some(reason) = self.take_cancellation(&key) {
            info!(session = %key, agent = %role, "discarding stage result of cancelled session");
            return self.persist_cancellation(state, &reason).await;
        }

        // ── Step 5: Apply the reply ──────────────────────────────────────────
        match result {
            Ok(outcome) => {
                if let Err(err) = self.apply_reply(&mut state, role, &task, outcome.reply) {
                    self.fail(&mut state, role.name(), &err)?;
                }
            }
            Err(err @ ConductorError::ConcurrentExecution { .. }) => return Err(err),
            Err(err) => self.fail(&mut state, role.name(), &err)?,
        }

        // ── Step 6: Checkpoint ───────────────────────────────────────────────
        self.persist(state).await
    }

    /// Clear the paused flag and run the session again.
    pub async fn resume(&self, tenant_id: &str, session_id: &str) -> ConductorResult<SessionResult> {
        let mut state = self.store.load(tenant_id, session_id).await?;
        if state.paused && !state.is_terminal() {
            state.paused = false;
            state.push_message(AgentMessage::new(ORCHESTRATOR, "session resumed"));
            let saved = self.store.save(state).await?;
            info!(session = %saved.key(), version = saved.version(), "session resumed");
        }
        self.run(tenant_id, session_id).await
    }

    /// Cancel a session.
    ///
    /// An idle session is failed immediately. For a session with a run in
    /// progress, the cancellation is queued: the in-flight stage's result is
    /// discarded when it returns and the session is failed instead.
    pub async fn cancel(
        &self,
        tenant_id: &str,
        session_id: &str,
        reason: impl Into<String>,
    ) -> ConductorResult<SessionResult> {
        let key = SessionKey::new(tenant_id, session_id);
        let state = self.store.load(tenant_id, session_id).await?;
        if state.is_terminal() {
            return Ok(SessionResult::from_state(&state));
        }

        self.cancellations.insert(key.clone(), reason.into());
        if self.active_runs.contains_key(&key) {
            info!(session = %key, "cancellation queued for running session");
            return Ok(SessionResult::from_state(&state));
        }
        self.apply_pending_cancellation(&key).await
    }

    async fn apply_pending_cancellation(&self, key: &SessionKey) -> ConductorResult<SessionResult> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let state = self.store.load(&key.tenant_id, &key.session_id).await?;
            if state.is_terminal() {
                self.cancellations.remove(key);
                return Ok(SessionResult::from_state(&state));
            }
            let Some(reason) = self.cancellations.get(key).map(|r| r.value().clone()) else {
                return Ok(SessionResult::from_state(&state));
            };

            match self.persist_cancellation(state, &reason).await {
                Ok(saved) => {
                    self.cancellations.remove(key);
                    return Ok(SessionResult::from_state(&saved));
                }
                Err(ConductorError::VersionConflict { .. }) if attempt < CANCEL_SAVE_ATTEMPTS => {
                    debug!(session = %key, attempt, "cancellation lost a save race, reloading");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn take_cancellation(&self, key: &SessionKey) -> Option<String> {
        self.cancellations.remove(key).map(|(_, reason)| reason)
    }

    // ── Reply interpretation ─────────────────────────────────────────────────

    fn apply_reply(
        &self,
        state: &mut AgentState,
        role: AgentRole,
        task: &TaskDescriptor,
        reply: AgentReply,
    ) -> ConductorResult<()> {
        match reply {
            AgentReply::Success(data) => {
                state.merge_section(role, &data);
                let message = AgentMessage::new(role.name(), format!("completed {}", task.task_type))
                    .with_data(Value::Object(data.clone()));
                state.record_result(role, Value::Object(data));
                state.push_message(message);
                self.follow_default_edge(state, role, task)
            }
            AgentReply::Command(command) => {
                if command.issued_by() != role {
                    return Err(fatal(
                        role,
                        format!(
                            "command claims issuer '{}' but was returned by '{}'",
                            command.issued_by(),
                            role
                        ),
                    ));
                }
                debug!(
                    session = %state.key(),
                    agent = %role,
                    command = command.kind().label(),
                    command_id = %command.command_id(),
                    reason = command.reason(),
                    "applying command"
                );
                self.apply_command(state, role, task, &command)
            }
        }
    }

    fn apply_command(
        &self,
        state: &mut AgentState,
        issuer: AgentRole,
        task: &TaskDescriptor,
        command: &Command,
    ) -> ConductorResult<()> {
        match command.kind() {
            CommandKind::AgentHandoff => {
                let target = require_target(command)?;
                let owned = target.owned_stage();
                state.complete_task(&task.id);

                if owned.ordinal() < state.current_stage().ordinal() {
                    // Only the supervisor may send work backwards, and it does
                    // so by re-routing; the stage itself never regresses.
                    if issuer != AgentRole::Supervisor {
                        return Err(fatal(
                            issuer,
                            format!(
                                "backward handoff to '{}' ({} -> {}) rejected",
                                target,
                                state.current_stage(),
                                owned
                            ),
                        ));
                    }
                    self.reenter(state, issuer, "supervisor override")?;
                } else if owned == state.current_stage() {
                    // The stage does not move, so the rerun counts against
                    // the same re-entry bound as a retry.
                    self.reenter(state, issuer, "handoff within stage")?;
                } else {
                    state.transition_to(owned)?;
                }

                state.next_agent = Some(target);
                state.push_message(
                    AgentMessage::new(
                        issuer.name(),
                        format!("handoff to {}: {}", target, command.reason()),
                    )
                    .to(target)
                    .with_data(command.payload().clone()),
                );
                Ok(())
            }

            CommandKind::DataRequest { keys } => {
                let target = require_target(command)?;
                state.complete_task(&task.id);

                match resolve_data(state, target, keys) {
                    Some(data) => {
                        self.reenter(state, issuer, "data request")?;
                        let response = TaskDescriptor::new(
                            "data_response",
                            json!({ "source": target.name(), "data": Value::Object(data) }),
                        )
                        .assigned(issuer, target);
                        state.push_message(
                            AgentMessage::new(
                                ORCHESTRATOR,
                                format!("data from {} routed to {}", target, issuer),
                            )
                            .to(issuer),
                        );
                        state.enqueue_task(response);
                    }
                    None => {
                        state.record_error(
                            issuer,
                            ErrorRecord::new(
                                ErrorClass::Transient,
                                format!(
                                    "data requested from '{}' is not available: {}",
                                    target,
                                    command.reason()
                                ),
                            ),
                        );
                        self.reenter(
                            state,
                            issuer,
                            &format!("data requested from '{}' never became available", target),
                        )?;
                        let unavailable = TaskDescriptor::new(
                            "data_unavailable",
                            json!({ "source": target.name(), "keys": keys }),
                        )
                        .assigned(issuer, target);
                        state.enqueue_task(unavailable);
                    }
                }
                state.next_agent = Some(issuer);
                Ok(())
            }

            CommandKind::TaskAssignment { task_type } => {
                let target = require_target(command)?;
                let assigned = TaskDescriptor::new(task_type.clone(), command.payload().clone())
                    .assigned(target, issuer);
                state.push_message(
                    AgentMessage::new(
                        issuer.name(),
                        format!("assigned {} to {}: {}", task_type, target, command.reason()),
                    )
                    .to(target)
                    .with_data(json!({ "task_id": assigned.id })),
                );
                state.enqueue_task(assigned);
                self.follow_default_edge(state, issuer, task)?;

                // A target whose stage has passed is never dispatched again.
                let reachable = state.next_agent == Some(target)
                    || target.owned_stage().ordinal() > state.current_stage().ordinal();
                if !reachable {
                    if issuer != AgentRole::Supervisor {
                        return Err(fatal(
                            issuer,
                            format!(
                                "task '{}' assigned to '{}', which does not run again after stage {}",
                                task_type,
                                target,
                                state.current_stage()
                            ),
                        ));
                    }
                    self.reenter(state, issuer, "supervisor assignment")?;
                    state.next_agent = Some(target);
                }
                Ok(())
            }

            CommandKind::ResultDelivery => {
                let Value::Object(data) = command.payload().clone() else {
                    return Err(fatal(issuer, "result delivery payload must be a JSON object"));
                };
                state.merge_section(issuer, &data);
                state.record_result(issuer, Value::Object(data.clone()));

                let mut message = AgentMessage::new(
                    issuer.name(),
                    format!("result delivered: {}", command.reason()),
                )
                .with_data(Value::Object(data));
                if let Some(target) = command.target_agent() {
                    message = message.to(target);
                }
                state.push_message(message);
                self.follow_default_edge(state, issuer, task)
            }

            CommandKind::WorkflowControl { action } => {
                state.push_message(AgentMessage::new(
                    issuer.name(),
                    format!("{}: {}", action, command.reason()),
                ));
                match action {
                    WorkflowAction::Abort => Err(ConductorError::FatalWorkflow {
                        agent: issuer.name().to_string(),
                        reason: command.reason().to_string(),
                    }),
                    WorkflowAction::Retry => {
                        self.reenter(state, issuer, "retry requested")?;
                        if task.assigned_to == Some(issuer) {
                            state.assigned_tasks.insert(0, task.clone());
                        } else {
                            state.complete_task(&task.id);
                        }
                        state.next_agent = Some(issuer);
                        Ok(())
                    }
                    WorkflowAction::Complete => {
                        if issuer != AgentRole::Supervisor {
                            return Err(fatal(issuer, "only the supervisor may complete a session"));
                        }
                        state.complete_task(&task.id);
                        if !command.payload().is_null() {
                            state.record_result(issuer, command.payload().clone());
                        }
                        state.next_agent = None;
                        state.transition_to(WorkflowStage::Complete)
                    }
                    WorkflowAction::Pause => {
                        self.follow_default_edge(state, issuer, task)?;
                        state.paused = true;
                        info!(session = %state.key(), agent = %issuer, "session paused");
                        Ok(())
                    }
                }
            }
        }
    }

    /// The transition taken after a plain success: clear any override and
    /// move to the issuer's owned stage if that is ahead. A non-supervisor
    /// finishing at SUPERVISION is routed back to the supervisor.
    fn follow_default_edge(
        &self,
        state: &mut AgentState,
        role: AgentRole,
        task: &TaskDescriptor,
    ) -> ConductorResult<()> {
        state.complete_task(&task.id);
        state.next_agent = None;
        let owned = role.owned_stage();
        if owned.ordinal() > state.current_stage().ordinal() {
            state.transition_to(owned)?;
        }
        // Work finished after the review started goes back to the supervisor
        // before the session may finalize.
        if state.current_stage() == WorkflowStage::Supervision && role != AgentRole::Supervisor {
            state.next_agent = Some(AgentRole::Supervisor);
        }
        Ok(())
    }

    fn reenter(&self, state: &mut AgentState, role: AgentRole, cause: &str) -> ConductorResult<()> {
        state.reentries += 1;
        if state.reentries > self.config.max_stage_reentries {
            return Err(fatal(
                role,
                format!(
                    "{}: stage {} re-entered more than {} times",
                    cause,
                    state.current_stage(),
                    self.config.max_stage_reentries
                ),
            ));
        }
        Ok(())
    }

    // ── Failure and persistence ──────────────────────────────────────────────

    fn fail(&self, state: &mut AgentState, who: &str, err: &ConductorError) -> ConductorResult<()> {
        warn!(
            session = %state.key(),
            stage = %state.current_stage(),
            agent = who,
            class = %err.class(),
            error = %err,
            "session failed"
        );
        state
            .agent_errors
            .insert(who.to_string(), ErrorRecord::from_error(err));
        state.next_agent = None;
        state.push_message(AgentMessage::new(
            ORCHESTRATOR,
            format!("session failed: {}", err.reason()),
        ));
        state.transition_to(WorkflowStage::Failed)
    }

    async fn persist_cancellation(
        &self,
        mut state: AgentState,
        reason: &str,
    ) -> ConductorResult<AgentState> {
        let err = ConductorError::FatalWorkflow {
            agent: ORCHESTRATOR.to_string(),
            reason: format!("cancelled: {}", reason),
        };
        self.fail(&mut state, ORCHESTRATOR, &err)?;
        self.persist(state).await
    }

    async fn persist(&self, state: AgentState) -> ConductorResult<AgentState> {
        let saved = self.store.save(state).await?;
        debug!(
            session = %saved.key(),
            stage = %saved.current_stage(),
            version = saved.version(),
            "checkpoint saved"
        );
        self.metrics.emit(MetricEvent::counter(
            "stage_transitions",
            1,
            tags([
                ("tenant_id", saved.tenant_id().to_string()),
                ("stage", saved.current_stage().to_string()),
            ]),
        ));
        match saved.current_stage() {
            WorkflowStage::Complete => {
                info!(session = %saved.key(), version = saved.version(), "session complete");
                self.emit_counter("sessions_completed", &saved);
            }
            WorkflowStage::Failed => self.emit_counter("sessions_failed", &saved),
            _ => {}
        }
        Ok(saved)
    }

    fn emit_counter(&self, name: &str, state: &AgentState) {
        self.metrics.emit(MetricEvent::counter(
            name,
            1,
            tags([("tenant_id", state.tenant_id().to_string())]),
        ));
    }
}

/// Marks a session as being driven by this process until dropped.
struct ActiveRun<'a> {
    runs: &'a DashMap<SessionKey, usize>,
    key: SessionKey,
}

impl<'a> ActiveRun<'a> {
    fn enter(runs: &'a DashMap<SessionKey, usize>, key: SessionKey) -> Self {
        *runs.entry(key.clone()).or_insert(0) += 1;
        Self { runs, key }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.runs.remove_if_mut(&self.key, |_, count| {
            *count -= 1;
            *count == 0
        });
    }
}

fn fatal(role: AgentRole, reason: impl Into<String>) -> ConductorError {
    ConductorError::FatalWorkflow {
        agent: role.name().to_string(),
        reason: reason.into(),
    }
}

fn require_target(command: &Command) -> ConductorResult<AgentRole> {
    command.target_agent().ok_or_else(|| {
        fatal(
            command.issued_by(),
            format!("{} command has no target agent", command.kind().label()),
        )
    })
}

/// Look up `keys` in `target`'s output. Empty `keys` asks for all of it.
///
/// The supervisor owns no section, so its last recorded result is used.
fn resolve_data(state: &AgentState, target: AgentRole, keys: &[String]) -> Option<Map<String, Value>> {
    let source: Map<String, Value> = match state.section(target) {
        Some(section) => section.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        None => match state.agent_results.get(target.name()) {
            Some(Value::Object(result)) => result.clone(),
            _ => Map::new(),
        },
    };

    if keys.is_empty() {
        return (!source.is_empty()).then_some(source);
    }
    let mut found = Map::new();
    for key in keys {
        found.insert(key.clone(), source.get(key)?.clone());
    }
    Some(found)
}

// ── Tests ────────────────────────────────────────────────────────────────────
