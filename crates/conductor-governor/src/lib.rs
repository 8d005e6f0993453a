//! # conductor-governor
//!
//! Per-tenant, weighted admission control for the Conductor runtime.
//!
//! ## Overview
//!
//! This crate provides [`ResourceGovernor`], which implements the
//! [`AdmissionControl`](conductor_core::traits::AdmissionControl) trait.
//! Budgets, operation weights and optional request-rate limits are declared
//! in TOML. The durable execution bridge acquires a permit before every stage
//! attempt and releases it when the attempt ends.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use conductor_governor::ResourceGovernor;
//!
//! let governor = ResourceGovernor::from_file(Path::new("config/governor.toml"))?;
//! // Pass `Arc::new(governor)` to `LocalBridge::with_admission(...)`.
//! ```

pub mod config;
pub mod governor;
pub mod rate_limit;

pub use config::{GovernorConfig, OperationWeights, TenantBudget};
pub use governor::ResourceGovernor;
pub use rate_limit::RateLimitConfig;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use conductor_contracts::{admission::OperationKind, error::ConductorError, metrics::MetricEvent};
    use conductor_core::metrics::InMemoryMetricsSink;
    use conductor_core::traits::AdmissionControl;

    use crate::ResourceGovernor;

    // ── Helpers ───────────────────────────────────────────────────────────────

    const GOVERNOR_TOML: &str = r#"
        default_budget = 6

        [weights]
        llm_call = 3
        data_fetch = 2
        validation = 1

        [[tenants]]
        id = "acme"
        budget = 12

        [[tenants]]
        id = "tiny"
        budget = 2
    "#;

    fn governor() -> ResourceGovernor {
        ResourceGovernor::from_toml_str(GOVERNOR_TOML).unwrap()
    }

    fn rate_limited_governor() -> ResourceGovernor {
        let toml = format!(
            "{}\n[rate_limit]\nrequests_per_minute = 8\nrequests_per_second = 4\nburst_allowance = 1\n",
            GOVERNOR_TOML
        );
        ResourceGovernor::from_toml_str(&toml).unwrap()
    }

    /// The bridge only defers on `Capacity`; everything else fails the stage.
    fn err_is_deferrable(err: &ConductorError) -> bool {
        matches!(err, ConductorError::Capacity { .. })
    }

    // ── 1. Configuration ──────────────────────────────────────────────────────

    #[test]
    fn budgets_and_weights_load_from_toml() {
        let g = governor();
        assert_eq!(g.config().budget_for("acme"), 12);
        assert_eq!(g.config().budget_for("unlisted"), 6);
        assert_eq!(g.weight_for(OperationKind::LlmCall), 3);
        assert_eq!(g.weight_for(OperationKind::Validation), 1);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let g = ResourceGovernor::from_toml_str("").unwrap();
        assert_eq!(g.config().default_budget, 6);
        assert_eq!(g.weight_for(OperationKind::DataFetch), 2);
    }

    #[test]
    fn zero_weight_is_rejected() {
        let err = ResourceGovernor::from_toml_str("[weights]\nvalidation = 0\n").unwrap_err();
        assert!(err.to_string().contains("validation"));
    }

    #[test]
    fn duplicate_tenant_is_rejected() {
        let toml = r#"
            [[tenants]]
            id = "acme"
            budget = 3
            [[tenants]]
            id = "acme"
            budget = 4
        "#;
        let err = ResourceGovernor::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConductorError::Config { .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", GOVERNOR_TOML).unwrap();
        let g = ResourceGovernor::from_file(file.path()).unwrap();
        assert_eq!(g.config().tenants.len(), 2);

        let err = ResourceGovernor::from_file(Path::new("/nonexistent/governor.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read governor file"));
    }

    // ── 2. Admission ──────────────────────────────────────────────────────────

    #[test]
    fn admits_until_budget_then_rejects() {
        let g = governor();
        let first = g.acquire("t-default", 3).unwrap();
        let _second = g.acquire("t-default", 3).unwrap();

        let err = g.acquire("t-default", 1).unwrap_err();
        match err {
            ConductorError::Capacity { tenant_id, reason } => {
                assert_eq!(tenant_id, "t-default");
                assert!(reason.starts_with("OverCapacity"));
            }
            other => panic!("expected Capacity, got {other:?}"),
        }

        g.release(first);
        assert!(g.acquire("t-default", 3).is_ok());
    }

    #[test]
    fn weight_above_budget_fails_without_capacity_error() {
        let g = governor();
        let err = g.acquire("tiny", 3).unwrap_err();
        match err {
            ConductorError::OverBudget {
                tenant_id,
                weight,
                budget,
            } => {
                assert_eq!(tenant_id, "tiny");
                assert_eq!((weight, budget), (3, 2));
            }
            other => panic!("expected OverBudget, got {other:?}"),
        }
        assert!(!err_is_deferrable(&g.acquire("tiny", 3).unwrap_err()));
        assert_eq!(g.tenant_utilization("tiny").rejected, 2);
        assert_eq!(g.tenant_utilization("tiny").in_use, 0);
    }

    #[test]
    fn tenants_do_not_share_budget() {
        let g = governor();
        let _a = g.acquire("tiny", 2).unwrap();
        assert!(g.acquire("tiny", 1).is_err());
        assert!(g.acquire("acme", 12).is_ok());
    }

    #[test]
    fn double_release_is_harmless() {
        let g = governor();
        let permit = g.acquire("acme", 3).unwrap();
        let _held = g.acquire("acme", 3).unwrap();

        g.release(permit.clone());
        g.release(permit);

        assert_eq!(g.tenant_utilization("acme").in_use, 3);
        assert_eq!(g.outstanding_permits(), 1);
    }

    #[test]
    fn concurrent_acquire_never_exceeds_budget() {
        let g = Arc::new(governor());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let g = g.clone();
                std::thread::spawn(move || g.acquire("acme", 3).ok())
            })
            .collect();

        let permits: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(permits.len(), 4);
        let usage = g.tenant_utilization("acme");
        assert_eq!(usage.in_use, 12);
        assert_eq!(usage.admitted, 4);
        assert_eq!(usage.rejected, 12);

        for permit in permits {
            g.release(permit);
        }
        assert_eq!(g.tenant_utilization("acme").in_use, 0);
    }

    #[test]
    fn read_only_lookup_does_not_register_tenant() {
        let g = governor();
        let before = g.utilization().len();

        let ghost = g.tenant_utilization("ghost");

        assert_eq!(ghost.budget, 6);
        assert_eq!(ghost.in_use, 0);
        assert_eq!(g.utilization().len(), before);
        assert!(g.utilization().iter().all(|u| u.tenant_id != "ghost"));

        let permit = g.acquire("ghost", 2).unwrap();
        assert_eq!(g.utilization().len(), before + 1);
        g.release(permit);
        assert_eq!(g.tenant_utilization("ghost").in_use, 0);
    }

    // ── 3. Rate limits ────────────────────────────────────────────────────────

    #[test]
    fn rate_limit_table_is_optional() {
        assert!(governor().config().rate_limit.is_none());
        let g = rate_limited_governor();
        let limits = g.config().rate_limit.as_ref().unwrap();
        assert_eq!(limits.requests_per_minute, 8);
        assert_eq!(limits.per_second_ceiling(), 5);
    }

    #[test]
    fn rate_limit_below_heaviest_weight_is_rejected() {
        let toml = "[rate_limit]\nrequests_per_second = 1\nburst_allowance = 1\n";
        let err = ResourceGovernor::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConductorError::Config { .. }));
        assert!(err.to_string().contains("heaviest operation weight 3"));
    }

    #[test]
    fn weighted_rate_limit_rejects_even_with_free_budget() {
        let g = rate_limited_governor();

        // Released permits free budget units but still count against the rate.
        let first = g.acquire("acme", 3).unwrap();
        g.release(first);
        let second = g.acquire("acme", 2).unwrap();
        g.release(second);

        let err = g.acquire("acme", 1).unwrap_err();
        assert!(err_is_deferrable(&err));
        assert!(err.reason().starts_with("RateLimited"));
        assert!(err.reason().contains("second"));

        let usage = g.tenant_utilization("acme");
        assert_eq!(usage.in_use, 0);
        assert_eq!(usage.admitted, 2);
        assert_eq!(usage.rate_limited, 1);
        assert_eq!(usage.rejected, 0);
    }

    #[test]
    fn rate_limits_are_per_tenant() {
        let g = rate_limited_governor();
        let p = g.acquire("acme", 3).unwrap();
        g.release(p);
        let p = g.acquire("acme", 2).unwrap();
        g.release(p);
        assert!(g.acquire("acme", 3).is_err());

        assert!(g.acquire("t-other", 3).is_ok());
        assert_eq!(g.tenant_utilization("t-other").rate_limited, 0);
    }

    #[test]
    fn rate_limit_recovers_once_the_second_window_passes() {
        let g = rate_limited_governor();
        let p = g.acquire("acme", 3).unwrap();
        g.release(p);
        let p = g.acquire("acme", 2).unwrap();
        g.release(p);
        assert!(g.acquire("acme", 3).is_err());

        std::thread::sleep(Duration::from_millis(1_050));

        let p = g.acquire("acme", 3).unwrap();
        g.release(p);
        // 8 units in the minute window: 3 + 2 + 3 leaves nothing.
        let err = g.acquire("acme", 1).unwrap_err();
        assert!(err.reason().contains("minute"));
        assert_eq!(g.tenant_utilization("acme").rate_limited, 2);
    }

    // ── 4. Health reporting ───────────────────────────────────────────────────

    #[test]
    fn utilization_lists_configured_tenants() {
        let g = governor();
        let _p = g.acquire("acme", 6).unwrap();

        let all = g.utilization();
        let ids: Vec<&str> = all.iter().map(|u| u.tenant_id.as_str()).collect();
        assert_eq!(ids, vec!["acme", "tiny"]);
        assert_eq!(all[0].in_use, 6);
        assert!((all[0].ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn report_health_emits_gauges_per_tenant() {
        let g = governor();
        let sink = InMemoryMetricsSink::new();

        g.report_health(&sink);

        assert_eq!(sink.named("tenant_utilization").len(), 2);
        assert_eq!(sink.named("tenant_units_in_use").len(), 2);
        assert_eq!(sink.named("tenant_rate_limited").len(), 2);
    }

    #[test]
    fn report_health_surfaces_rate_violations() {
        let g = rate_limited_governor();
        let p = g.acquire("acme", 3).unwrap();
        g.release(p);
        let p = g.acquire("acme", 2).unwrap();
        g.release(p);
        let _ = g.acquire("acme", 3);
        let sink = InMemoryMetricsSink::new();

        g.report_health(&sink);

        let acme: Vec<f64> = sink
            .named("tenant_rate_limited")
            .into_iter()
            .filter(|e| e.tags().get("tenant_id").map(String::as_str) == Some("acme"))
            .filter_map(|e| match e {
                MetricEvent::Gauge { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(acme, vec![1.0]);
    }

    #[tokio::test]
    async fn health_reporter_runs_periodically() {
        let g = Arc::new(governor());
        let sink = InMemoryMetricsSink::new();

        let handle = g
            .clone()
            .spawn_health_reporter(Duration::from_millis(10), Arc::new(sink.clone()));
        tokio::time::sleep(Duration::from_millis(45)).await;
        handle.abort();

        assert!(sink.named("tenant_utilization").len() >= 4);
    }
}
