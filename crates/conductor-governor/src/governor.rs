//! Weighted per-tenant admission control.
//!
//! `ResourceGovernor` loads a `GovernorConfig` from a TOML string or file and
//! implements the `AdmissionControl` trait from conductor-core.
//!
//! Admission algorithm:
//!
//! 1. Look up (or lazily create) the tenant's counters.
//! 2. If `weight` exceeds the whole budget → `OverBudget`; waiting cannot help.
//! 3. With rate limiting configured, check the tenant's sliding windows →
//!    `Capacity` with a `RateLimited` reason.
//! 4. Read `in_use`. If `in_use + weight` exceeds the budget → `Capacity`.
//! 5. Compare-and-swap `in_use` to `in_use + weight`; on a lost race, re-read
//!    and go back to step 4.
//! 6. Record the attempt in the rate window, record the permit id as
//!    outstanding, and return it.
//!
//! Release only credits units for ids still outstanding, so releasing a
//! permit twice (or a permit this governor never issued) changes nothing.
//! Read-only lookups never register a tenant.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use conductor_contracts::{
    admission::{AdmissionPermit, OperationKind, TenantUtilization},
    error::{ConductorError, ConductorResult},
    metrics::{tags, MetricEvent},
};
use conductor_core::traits::{AdmissionControl, MetricsSink};

use crate::config::GovernorConfig;
use crate::rate_limit::RateWindow;

/// Utilization ratio at which health reports log a warning.
const NEAR_CAPACITY: f64 = 0.9;

#[derive(Debug)]
struct TenantCounters {
    budget: u32,
    in_use: AtomicU32,
    admitted: AtomicU64,
    rejected: AtomicU64,
    rate_limited: AtomicU64,
    window: Mutex<RateWindow>,
}

impl TenantCounters {
    fn new(budget: u32) -> Self {
        Self {
            budget,
            in_use: AtomicU32::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            window: Mutex::new(RateWindow::default()),
        }
    }

    fn snapshot(&self, tenant_id: &str) -> TenantUtilization {
        let in_use = self.in_use.load(Ordering::Acquire);
        let ratio = if self.budget == 0 {
            0.0
        } else {
            f64::from(in_use) / f64::from(self.budget)
        };
        TenantUtilization {
            tenant_id: tenant_id.to_string(),
            in_use,
            budget: self.budget,
            ratio,
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

/// An `AdmissionControl` implementation with one weighted budget per tenant.
///
/// ```rust,ignore
/// use conductor_governor::ResourceGovernor;
///
/// let governor = Arc::new(ResourceGovernor::from_file(Path::new("governor.toml"))?);
/// let bridge = LocalBridge::new(config.bridge).with_admission(governor.clone());
/// ```
#[derive(Debug)]
pub struct ResourceGovernor {
    config: GovernorConfig,
    tenants: DashMap<String, Arc<TenantCounters>>,
    /// Outstanding permits: id → (tenant, weight).
    outstanding: DashMap<Uuid, (String, u32)>,
}

impl ResourceGovernor {
    /// Build a governor, pre-registering every tenant listed in `config`.
    pub fn new(config: GovernorConfig) -> ConductorResult<Self> {
        config.validate()?;
        let tenants = DashMap::new();
        for tenant in &config.tenants {
            tenants.insert(tenant.id.clone(), Arc::new(TenantCounters::new(tenant.budget)));
        }
        Ok(Self {
            config,
            tenants,
            outstanding: DashMap::new(),
        })
    }

    /// Parse `s` as TOML and build a `ResourceGovernor`.
    pub fn from_toml_str(s: &str) -> ConductorResult<Self> {
        let config: GovernorConfig = toml::from_str(s).map_err(|e| ConductorError::Config {
            reason: format!("failed to parse governor TOML: {}", e),
        })?;
        Self::new(config)
    }

    /// Read the file at `path` and parse it as governor configuration.
    pub fn from_file(path: &Path) -> ConductorResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConductorError::Config {
            reason: format!("failed to read governor file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// The tenant's counters, registering the tenant on first admission.
    fn counters(&self, tenant_id: &str) -> Arc<TenantCounters> {
        if let Some(existing) = self.tenants.get(tenant_id) {
            return existing.clone();
        }
        self.tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(TenantCounters::new(self.config.budget_for(tenant_id))))
            .clone()
    }

    /// Current utilization of every known tenant, sorted by tenant id.
    pub fn utilization(&self) -> Vec<TenantUtilization> {
        let mut all: Vec<TenantUtilization> = self
            .tenants
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        all.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        all
    }

    /// Utilization of one tenant. An unknown tenant reads as idle at its
    /// configured budget and is not registered.
    pub fn tenant_utilization(&self, tenant_id: &str) -> TenantUtilization {
        match self.tenants.get(tenant_id) {
            Some(counters) => counters.snapshot(tenant_id),
            None => TenantCounters::new(self.config.budget_for(tenant_id)).snapshot(tenant_id),
        }
    }

    /// Number of permits issued and not yet released.
    pub fn outstanding_permits(&self) -> usize {
        self.outstanding.len()
    }

    /// Push one round of utilization gauges to `sink`.
    pub fn report_health(&self, sink: &dyn MetricsSink) {
        for usage in self.utilization() {
            let tenant_tags = || tags([("tenant_id", usage.tenant_id.clone())]);
            sink.emit(MetricEvent::gauge("tenant_utilization", usage.ratio, tenant_tags()));
            sink.emit(MetricEvent::gauge(
                "tenant_units_in_use",
                f64::from(usage.in_use),
                tenant_tags(),
            ));
            sink.emit(MetricEvent::gauge(
                "tenant_admissions_rejected",
                usage.rejected as f64,
                tenant_tags(),
            ));
            sink.emit(MetricEvent::gauge(
                "tenant_rate_limited",
                usage.rate_limited as f64,
                tenant_tags(),
            ));
            if usage.ratio >= NEAR_CAPACITY {
                warn!(
                    tenant_id = %usage.tenant_id,
                    in_use = usage.in_use,
                    budget = usage.budget,
                    "tenant near capacity"
                );
            }
        }
    }

    /// Report health to `sink` every `interval` until the handle is aborted.
    pub fn spawn_health_reporter(
        self: Arc<Self>,
        interval: Duration,
        sink: Arc<dyn MetricsSink>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.report_health(sink.as_ref());
            }
        })
    }
}

impl AdmissionControl for ResourceGovernor {
    fn weight_for(&self, kind: OperationKind) -> u32 {
        self.config.weights.weight(kind)
    }

    fn acquire(&self, tenant_id: &str, weight: u32) -> ConductorResult<AdmissionPermit> {
        let counters = self.counters(tenant_id);
        let budget = counters.budget;

        if weight > budget {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(tenant_id, weight, budget, "operation weight exceeds tenant budget");
            return Err(ConductorError::OverBudget {
                tenant_id: tenant_id.to_string(),
                weight,
                budget,
            });
        }

        // The window stays locked until the attempt is recorded.
        let now = Instant::now();
        let mut window = match &self.config.rate_limit {
            Some(limits) => {
                let mut window = counters
                    .window
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Err(violation) = window.check(limits, weight, now) {
                    counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                    debug!(tenant_id, weight, %violation, "rate limited");
                    return Err(ConductorError::Capacity {
                        tenant_id: tenant_id.to_string(),
                        reason: format!("RateLimited: {}", violation),
                    });
                }
                Some(window)
            }
            None => None,
        };

        let mut current = counters.in_use.load(Ordering::Acquire);
        loop {
            if current.saturating_add(weight) > budget {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(tenant_id, in_use = current, budget, weight, "admission rejected");
                return Err(ConductorError::Capacity {
                    tenant_id: tenant_id.to_string(),
                    reason: format!(
                        "OverCapacity: {}/{} units in use, {} requested",
                        current, budget, weight
                    ),
                });
            }
            match counters.in_use.compare_exchange_weak(
                current,
                current + weight,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if let Some(window) = window.as_mut() {
            window.record(weight, now);
        }
        drop(window);

        counters.admitted.fetch_add(1, Ordering::Relaxed);
        let permit = AdmissionPermit::new(tenant_id, weight);
        self.outstanding
            .insert(permit.id, (tenant_id.to_string(), weight));
        debug!(tenant_id, weight, in_use = current + weight, budget, "admitted");
        Ok(permit)
    }

    fn release(&self, permit: AdmissionPermit) {
        let Some((_, (tenant_id, weight))) = self.outstanding.remove(&permit.id) else {
            debug!(permit_id = %permit.id, "permit already released");
            return;
        };
        let Some(counters) = self.tenants.get(&tenant_id) else {
            return;
        };
        counters.in_use.fetch_sub(weight, Ordering::AcqRel);
        debug!(tenant_id = %tenant_id, weight, "released");
    }
}
