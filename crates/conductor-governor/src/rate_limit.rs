//! Weighted sliding-window request-rate limits.
//!
//! Every admitted attempt is recorded with its operation weight. A new
//! attempt of weight `w` is allowed when both hold:
//!
//! - weighted total of the last second + `w` ≤ `requests_per_second + burst_allowance`
//! - weighted total of the last minute + `w` ≤ `requests_per_minute`
//!
//! Limits apply per tenant; one tenant's traffic never consumes another's.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Per-tenant rate limits, read from the `[rate_limit]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_second: u32,
    /// Extra weighted units allowed on top of `requests_per_second`.
    pub burst_allowance: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_second: 10,
            burst_allowance: 5,
        }
    }
}

impl RateLimitConfig {
    /// Weighted units allowed in any one-second window.
    pub fn per_second_ceiling(&self) -> u32 {
        self.requests_per_second.saturating_add(self.burst_allowance)
    }

    /// The largest single weight these limits can ever admit.
    pub fn max_admissible_weight(&self) -> u32 {
        self.per_second_ceiling().min(self.requests_per_minute)
    }
}

/// Which window refused an attempt, and by how much.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RateViolation {
    pub window: &'static str,
    pub used: u32,
    pub limit: u32,
}

impl std::fmt::Display for RateViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} units used in the last {}, limit {}",
            self.used, self.window, self.limit
        )
    }
}

/// Admission timestamps and weights for one tenant, oldest first.
#[derive(Debug, Default)]
pub(crate) struct RateWindow {
    records: VecDeque<(Instant, u32)>,
}

impl RateWindow {
    /// Whether `weight` more units fit at `now`. Drops records older than a
    /// minute as a side effect.
    pub(crate) fn check(
        &mut self,
        limits: &RateLimitConfig,
        weight: u32,
        now: Instant,
    ) -> Result<(), RateViolation> {
        while let Some(&(at, _)) = self.records.front() {
            if now.duration_since(at) >= MINUTE {
                self.records.pop_front();
            } else {
                break;
            }
        }

        let last_minute: u32 = self.records.iter().map(|&(_, w)| w).sum();
        let last_second: u32 = self
            .records
            .iter()
            .filter(|&&(at, _)| now.duration_since(at) < SECOND)
            .map(|&(_, w)| w)
            .sum();

        let ceiling = limits.per_second_ceiling();
        if last_second.saturating_add(weight) > ceiling {
            return Err(RateViolation {
                window: "second",
                used: last_second,
                limit: ceiling,
            });
        }
        if last_minute.saturating_add(weight) > limits.requests_per_minute {
            return Err(RateViolation {
                window: "minute",
                used: last_minute,
                limit: limits.requests_per_minute,
            });
        }
        Ok(())
    }

    pub(crate) fn record(&mut self, weight: u32, now: Instant) {
        self.records.push_back((now, weight));
    }
}
