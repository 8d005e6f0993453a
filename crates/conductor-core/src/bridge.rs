//! In-process durable execution bridge.
//!
//! `LocalBridge` runs one stage at a time per session:
//!
//! 1. Take the session lease, or fail with `ConcurrentExecution`.
//! 2. For each attempt, up to `max_attempts`:
//!    a. Refuse with `CircuitOpen` if the agent's circuit breaker is open.
//!    b. Acquire an admission permit, deferring while the tenant is over
//!       capacity until the stage timeout elapses. `OverBudget` is never
//!       deferred.
//!    c. Call the agent under the per-attempt timeout and report the result
//!       to the breaker.
//!    d. On a transient failure, back off and try again.
//! 3. Release the permit after every attempt and the lease on exit, on
//!    every path (RAII guards).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use conductor_contracts::{
    admission::AdmissionPermit,
    command::AgentReply,
    error::{ConductorError, ConductorResult},
    metrics::{tags, MetricEvent},
    state::{AgentRole, AgentState, SessionKey},
};

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::BridgeConfig;
use crate::metrics::NoopMetricsSink;
use crate::retry::{retry_with_backoff, RetryError};
use crate::traits::{AdmissionControl, DurableExecution, MetricsSink, StageInvocation, StageOutcome};

pub struct LocalBridge {
    config: BridgeConfig,
    admission: Option<Arc<dyn AdmissionControl>>,
    metrics: Arc<dyn MetricsSink>,
    leases: DashMap<SessionKey, Instant>,
    breakers: DashMap<AgentRole, Arc<CircuitBreaker>>,
}

impl LocalBridge {
    /// A bridge with no admission control and no metrics.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            admission: None,
            metrics: Arc::new(NoopMetricsSink),
            leases: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    pub fn with_admission(mut self, admission: Arc<dyn AdmissionControl>) -> Self {
        self.admission = Some(admission);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Whether a stage is currently executing for the session.
    pub fn is_leased(&self, tenant_id: &str, session_id: &str) -> bool {
        self.leases
            .contains_key(&SessionKey::new(tenant_id, session_id))
    }

    /// State of the agent's circuit; `Closed` when the breaker is disabled
    /// or the agent has not run yet.
    pub fn circuit_state(&self, agent: AgentRole) -> CircuitState {
        self.breakers
            .get(&agent)
            .map_or(CircuitState::Closed, |breaker| breaker.state())
    }

    fn breaker(&self, agent: AgentRole) -> Option<Arc<CircuitBreaker>> {
        let config = self.config.circuit_breaker()?;
        Some(
            self.breakers
                .entry(agent)
                .or_insert_with(|| Arc::new(CircuitBreaker::new(agent.name(), config)))
                .clone(),
        )
    }

    fn take_lease(&self, key: SessionKey) -> ConductorResult<LeaseGuard<'_>> {
        use dashmap::mapref::entry::Entry;

        match self.leases.entry(key.clone()) {
            Entry::Occupied(_) => Err(ConductorError::ConcurrentExecution {
                tenant_id: key.tenant_id,
                session_id: key.session_id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(LeaseGuard {
                    leases: &self.leases,
                    key,
                })
            }
        }
    }

    /// Reserve capacity for one attempt, deferring on capacity rejections
    /// until `deadline`.
    async fn admit(
        &self,
        tenant_id: &str,
        invocation: &StageInvocation,
        deadline: Instant,
    ) -> ConductorResult<Option<PermitGuard>> {
        let Some(admission) = &self.admission else {
            return Ok(None);
        };
        let weight = admission.weight_for(invocation.agent.operation_kind());
        let agent = invocation.agent.role();

        loop {
            match admission.acquire(tenant_id, weight) {
                Ok(permit) => {
                    return Ok(Some(PermitGuard {
                        admission: admission.clone(),
                        permit: Some(permit),
                    }));
                }
                Err(err @ ConductorError::Capacity { .. }) => {
                    self.metrics.emit(MetricEvent::counter(
                        "admission_rejections",
                        1,
                        tags([("tenant_id", tenant_id.to_string()), ("agent", agent.to_string())]),
                    ));
                    let backoff = self.config.admission_backoff();
                    if Instant::now() + backoff >= deadline {
                        warn!(tenant_id, agent = %agent, weight, "admission deferral exhausted");
                        return Err(err);
                    }
                    debug!(tenant_id, agent = %agent, weight, "over capacity, deferring");
                    sleep(backoff).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn attempt(
        &self,
        state: &AgentState,
        invocation: &StageInvocation,
        attempt: u32,
    ) -> ConductorResult<AgentReply> {
        let stage_timeout = self.config.stage_timeout();
        let deadline = Instant::now() + stage_timeout;
        let agent = invocation.agent.role();

        let breaker = self.breaker(agent);
        if let Some(breaker) = &breaker {
            if let Err(wait) = breaker.try_acquire() {
                self.metrics.emit(MetricEvent::counter(
                    "circuit_rejections",
                    1,
                    tags([
                        ("tenant_id", state.tenant_id().to_string()),
                        ("agent", agent.to_string()),
                    ]),
                ));
                warn!(session = %state.key(), agent = %agent, "circuit open, attempt refused");
                return Err(ConductorError::CircuitOpen {
                    agent: agent.to_string(),
                    retry_after_ms: wait.as_millis() as u64,
                });
            }
        }

        let _permit = self.admit(state.tenant_id(), invocation, deadline).await?;

        debug!(
            session = %state.key(),
            agent = %agent,
            attempt,
            task_type = %invocation.task.task_type,
            "dispatching stage attempt"
        );
        let result =
            match timeout(stage_timeout, invocation.agent.process_task(state, &invocation.task)).await {
                Ok(result) => result,
                Err(_) => Err(ConductorError::StageTimeout {
                    agent: agent.to_string(),
                    timeout_ms: self.config.stage_timeout_ms,
                }),
            };

        // Only failures of the call itself trip the breaker; a fatal reply
        // means the agent answered.
        if let Some(breaker) = &breaker {
            match &result {
                Ok(_) => breaker.record_success(),
                Err(err) if err.is_transient() => breaker.record_failure(),
                Err(_) => {}
            }
        }
        result
    }
}

#[async_trait]
impl DurableExecution for LocalBridge {
    async fn execute_stage(
        &self,
        state: &AgentState,
        invocation: StageInvocation,
    ) -> ConductorResult<StageOutcome> {
        let _lease = self.take_lease(state.key())?;
        let started = Instant::now();
        let agent = invocation.agent.role();
        let policy = self.config.backoff_policy();

        let result = retry_with_backoff(
            &policy,
            |attempt| {
                let invocation = &invocation;
                async move {
                    self.attempt(state, invocation, attempt)
                        .await
                        .map(|reply| (reply, attempt))
                }
            },
            ConductorError::is_transient,
        )
        .await;

        let elapsed = started.elapsed();
        let attempts = match &result {
            Ok((_, attempts)) => *attempts,
            Err(err) => err.attempts,
        };
        let metric_tags = || {
            tags([
                ("tenant_id", state.tenant_id().to_string()),
                ("agent", agent.to_string()),
            ])
        };
        self.metrics.emit(MetricEvent::timer(
            "stage_duration_ms",
            elapsed.as_millis() as u64,
            metric_tags(),
        ));
        if attempts > 1 {
            self.metrics.emit(MetricEvent::counter(
                "stage_retries",
                u64::from(attempts - 1),
                metric_tags(),
            ));
        }

        match result {
            Ok((reply, attempts)) => {
                info!(
                    session = %state.key(),
                    agent = %agent,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "stage completed"
                );
                Ok(StageOutcome {
                    reply,
                    attempts,
                    elapsed,
                })
            }
            Err(RetryError {
                last_error,
                attempts,
            }) => {
                warn!(
                    session = %state.key(),
                    agent = %agent,
                    attempts,
                    error = %last_error,
                    "stage failed"
                );
                if last_error.is_transient() {
                    Err(ConductorError::RetriesExhausted {
                        agent: agent.to_string(),
                        attempts,
                        reason: last_error.reason(),
                    })
                } else {
                    Err(last_error)
                }
            }
        }
    }
}

/// Holds a session's execution lease until dropped.
struct LeaseGuard<'a> {
    leases: &'a DashMap<SessionKey, Instant>,
    key: SessionKey,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.leases.remove(&self.key);
    }
}

/// Returns its permit to admission control when dropped.
struct PermitGuard {
    admission: Arc<dyn AdmissionControl>,
    permit: Option<AdmissionPermit>,
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.admission.release(permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::{json, Map};

    use conductor_contracts::{
        admission::OperationKind,
        state::AgentRole,
        task::TaskDescriptor,
    };

    use crate::metrics::InMemoryMetricsSink;
    use crate::traits::Agent;

    // ── Mock agents ──────────────────────────────────────────────────────────

    /// Fails transiently `failures` times, then succeeds.
    struct FlakyAgent {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyAgent {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn role(&self) -> AgentRole {
            AgentRole::Workspace
        }

        async fn process_task(
            &self,
            _state: &AgentState,
            _task: &TaskDescriptor,
        ) -> ConductorResult<AgentReply> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(ConductorError::TransientAgent {
                    agent: "workspace".to_string(),
                    reason: format!("rate limited (call {n})"),
                });
            }
            let mut data = Map::new();
            data.insert("calls".to_string(), json!(n));
            Ok(AgentReply::Success(data))
        }
    }

    /// Sleeps longer than any test timeout.
    struct SlowAgent;

    #[async_trait]
    impl Agent for SlowAgent {
        fn role(&self) -> AgentRole {
            AgentRole::Planning
        }

        async fn process_task(
            &self,
            _state: &AgentState,
            _task: &TaskDescriptor,
        ) -> ConductorResult<AgentReply> {
            sleep(Duration::from_millis(200)).await;
            Ok(AgentReply::Success(Map::new()))
        }
    }

    struct FatalAgent;

    #[async_trait]
    impl Agent for FatalAgent {
        fn role(&self) -> AgentRole {
            AgentRole::Insights
        }

        async fn process_task(
            &self,
            _state: &AgentState,
            _task: &TaskDescriptor,
        ) -> ConductorResult<AgentReply> {
            Err(ConductorError::FatalWorkflow {
                agent: "insights".to_string(),
                reason: "malformed plan".to_string(),
            })
        }
    }

    // ── Mock admission control ───────────────────────────────────────────────

    /// Rejects the first `rejections` acquires, then admits; counts releases.
    #[derive(Default)]
    struct MockAdmission {
        rejections: AtomicU32,
        released: Mutex<Vec<AdmissionPermit>>,
        weights_seen: Mutex<Vec<u32>>,
    }

    impl AdmissionControl for MockAdmission {
        fn weight_for(&self, kind: OperationKind) -> u32 {
            match kind {
                OperationKind::LlmCall => 3,
                OperationKind::DataFetch => 2,
                OperationKind::Validation => 1,
            }
        }

        fn acquire(&self, tenant_id: &str, weight: u32) -> ConductorResult<AdmissionPermit> {
            self.weights_seen.lock().unwrap().push(weight);
            let remaining = self.rejections.load(Ordering::SeqCst);
            if remaining > 0 {
                self.rejections.store(remaining - 1, Ordering::SeqCst);
                return Err(ConductorError::Capacity {
                    tenant_id: tenant_id.to_string(),
                    reason: "budget exhausted".to_string(),
                });
            }
            Ok(AdmissionPermit::new(tenant_id, weight))
        }

        fn release(&self, permit: AdmissionPermit) {
            self.released.lock().unwrap().push(permit);
        }
    }

    /// A tenant whose budget is smaller than any operation weight.
    #[derive(Default)]
    struct TinyBudgetAdmission {
        acquires: AtomicU32,
    }

    impl AdmissionControl for TinyBudgetAdmission {
        fn weight_for(&self, _kind: OperationKind) -> u32 {
            3
        }

        fn acquire(&self, tenant_id: &str, weight: u32) -> ConductorResult<AdmissionPermit> {
            self.acquires.fetch_add(1, Ordering::SeqCst);
            Err(ConductorError::OverBudget {
                tenant_id: tenant_id.to_string(),
                weight,
                budget: 2,
            })
        }

        fn release(&self, _permit: AdmissionPermit) {}
    }

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            stage_timeout_ms: 50,
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
            admission_backoff_ms: 5,
            breaker_failure_threshold: 5,
            breaker_success_threshold: 1,
            breaker_reset_ms: 60_000,
        }
    }

    fn make_state() -> AgentState {
        AgentState::new("t1", "s1", None, TaskDescriptor::new("plan_campaign", json!({})))
    }

    fn invocation(agent: Arc<dyn Agent>) -> StageInvocation {
        StageInvocation {
            task: TaskDescriptor::new("workspace_stage", json!({})),
            agent,
        }
    }

    // ── Retry ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let metrics = InMemoryMetricsSink::new();
        let bridge = LocalBridge::new(fast_config()).with_metrics(Arc::new(metrics.clone()));
        let agent = FlakyAgent::new(2);

        let outcome = bridge
            .execute_stage(&make_state(), invocation(agent.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.counter_total("stage_retries"), 2);
        assert_eq!(metrics.named("stage_duration_ms").len(), 1);
    }

    #[tokio::test]
    async fn attempts_never_exceed_max() {
        let bridge = LocalBridge::new(fast_config());
        let agent = FlakyAgent::new(10);

        let err = bridge
            .execute_stage(&make_state(), invocation(agent.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, ConductorError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
        assert!(err.reason().contains("rate limited"));
    }

    #[tokio::test]
    async fn timeout_counts_as_transient_attempt() {
        let bridge = LocalBridge::new(BridgeConfig {
            max_attempts: 2,
            ..fast_config()
        });

        let err = bridge
            .execute_stage(&make_state(), invocation(Arc::new(SlowAgent)))
            .await
            .unwrap_err();

        match err {
            ConductorError::RetriesExhausted { attempts, reason, .. } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let bridge = LocalBridge::new(fast_config());
        let err = bridge
            .execute_stage(&make_state(), invocation(Arc::new(FatalAgent)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::FatalWorkflow { .. }));
    }

    // ── Leases ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_stage_for_same_session_is_rejected() {
        let bridge = Arc::new(LocalBridge::new(BridgeConfig {
            stage_timeout_ms: 1_000,
            ..fast_config()
        }));
        let state = make_state();

        let first = {
            let bridge = bridge.clone();
            let state = state.clone();
            tokio::spawn(async move {
                bridge
                    .execute_stage(&state, invocation(Arc::new(SlowAgent)))
                    .await
            })
        };
        sleep(Duration::from_millis(20)).await;
        assert!(bridge.is_leased("t1", "s1"));

        let second = bridge
            .execute_stage(&state, invocation(FlakyAgent::new(0)))
            .await
            .unwrap_err();
        assert!(matches!(second, ConductorError::ConcurrentExecution { .. }));

        assert!(first.await.unwrap().is_ok());
        assert!(!bridge.is_leased("t1", "s1"));
    }

    #[tokio::test]
    async fn lease_released_after_failure() {
        let bridge = LocalBridge::new(fast_config());
        let state = make_state();

        let _ = bridge
            .execute_stage(&state, invocation(Arc::new(FatalAgent)))
            .await;
        assert!(!bridge.is_leased("t1", "s1"));
        assert!(bridge
            .execute_stage(&state, invocation(FlakyAgent::new(0)))
            .await
            .is_ok());
    }

    // ── Admission ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn capacity_rejection_is_deferred_then_admitted() {
        let admission = Arc::new(MockAdmission::default());
        admission.rejections.store(2, Ordering::SeqCst);
        let metrics = InMemoryMetricsSink::new();
        let bridge = LocalBridge::new(fast_config())
            .with_admission(admission.clone())
            .with_metrics(Arc::new(metrics.clone()));

        let outcome = bridge
            .execute_stage(&make_state(), invocation(FlakyAgent::new(0)))
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(metrics.counter_total("admission_rejections"), 2);
        assert_eq!(admission.released.lock().unwrap().len(), 1);
        assert_eq!(*admission.weights_seen.lock().unwrap(), vec![3, 3, 3]);
    }

    #[tokio::test]
    async fn persistent_capacity_rejection_surfaces_after_timeout() {
        let admission = Arc::new(MockAdmission::default());
        admission.rejections.store(u32::MAX, Ordering::SeqCst);
        let bridge = LocalBridge::new(fast_config()).with_admission(admission.clone());

        let err = bridge
            .execute_stage(&make_state(), invocation(FlakyAgent::new(0)))
            .await
            .unwrap_err();

        assert!(matches!(err, ConductorError::Capacity { .. }));
        assert!(admission.released.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn permit_released_after_every_attempt() {
        let admission = Arc::new(MockAdmission::default());
        let bridge = LocalBridge::new(fast_config()).with_admission(admission.clone());

        let _ = bridge
            .execute_stage(&make_state(), invocation(FlakyAgent::new(10)))
            .await;

        assert_eq!(admission.released.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn over_budget_fails_without_deferral() {
        let admission = Arc::new(TinyBudgetAdmission::default());
        let metrics = InMemoryMetricsSink::new();
        let bridge = LocalBridge::new(BridgeConfig {
            stage_timeout_ms: 5_000,
            ..fast_config()
        })
        .with_admission(admission.clone())
        .with_metrics(Arc::new(metrics.clone()));
        let agent = FlakyAgent::new(0);

        let started = Instant::now();
        let err = bridge
            .execute_stage(&make_state(), invocation(agent.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, ConductorError::OverBudget { weight: 3, budget: 2, .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(admission.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.counter_total("admission_rejections"), 0);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
    }

    // ── Circuit breaker ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn open_circuit_refuses_attempts_without_calling_agent() {
        let metrics = InMemoryMetricsSink::new();
        let bridge = LocalBridge::new(BridgeConfig {
            breaker_failure_threshold: 2,
            ..fast_config()
        })
        .with_metrics(Arc::new(metrics.clone()));
        let agent = FlakyAgent::new(10);

        let err = bridge
            .execute_stage(&make_state(), invocation(agent.clone()))
            .await
            .unwrap_err();

        // Two failures open the circuit, so the third attempt never reaches the agent.
        assert!(matches!(err, ConductorError::CircuitOpen { .. }));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
        assert_eq!(bridge.circuit_state(AgentRole::Workspace), CircuitState::Open);

        let again = bridge
            .execute_stage(&make_state(), invocation(agent.clone()))
            .await
            .unwrap_err();
        assert!(matches!(again, ConductorError::CircuitOpen { .. }));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.counter_total("circuit_rejections"), 2);
        assert!(!bridge.is_leased("t1", "s1"));
    }

    #[tokio::test]
    async fn circuit_closes_after_successful_trial() {
        let bridge = LocalBridge::new(BridgeConfig {
            max_attempts: 2,
            breaker_failure_threshold: 2,
            breaker_reset_ms: 20,
            ..fast_config()
        });
        let agent = FlakyAgent::new(2);

        let err = bridge
            .execute_stage(&make_state(), invocation(agent.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(bridge.circuit_state(AgentRole::Workspace), CircuitState::Open);

        sleep(Duration::from_millis(30)).await;
        assert_eq!(bridge.circuit_state(AgentRole::Workspace), CircuitState::HalfOpen);

        let outcome = bridge
            .execute_stage(&make_state(), invocation(agent.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(bridge.circuit_state(AgentRole::Workspace), CircuitState::Closed);
    }

    #[tokio::test]
    async fn fatal_replies_do_not_trip_the_circuit() {
        let bridge = LocalBridge::new(BridgeConfig {
            breaker_failure_threshold: 1,
            ..fast_config()
        });

        for _ in 0..3 {
            let err = bridge
                .execute_stage(&make_state(), invocation(Arc::new(FatalAgent)))
                .await
                .unwrap_err();
            assert!(matches!(err, ConductorError::FatalWorkflow { .. }));
        }
        assert_eq!(bridge.circuit_state(AgentRole::Insights), CircuitState::Closed);
    }

    #[tokio::test]
    async fn breakers_are_per_agent_and_can_be_disabled() {
        let bridge = LocalBridge::new(BridgeConfig {
            breaker_failure_threshold: 1,
            ..fast_config()
        });
        let _ = bridge
            .execute_stage(&make_state(), invocation(FlakyAgent::new(10)))
            .await;
        assert_eq!(bridge.circuit_state(AgentRole::Workspace), CircuitState::Open);
        assert_eq!(bridge.circuit_state(AgentRole::Planning), CircuitState::Closed);

        let disabled = LocalBridge::new(BridgeConfig {
            breaker_failure_threshold: 0,
            ..fast_config()
        });
        let agent = FlakyAgent::new(10);
        let err = disabled
            .execute_stage(&make_state(), invocation(agent.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
    }
}
