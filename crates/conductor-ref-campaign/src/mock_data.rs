//! Simulated campaign data for the Conductor reference runtime.
//!
//! All data in this module is hardcoded and fictional. No external systems are
//! contacted. It stands in for the spreadsheet workspace and the ad-platform
//! benchmark feeds a production deployment would read.

use serde_json::{json, Value};

// ── Campaign briefs (mock workspace) ──────────────────────────────────────────

/// Look up a campaign brief by id.
///
/// Known briefs:
/// - `brief-spring`   → 50 000 USD across search, social and display
/// - `brief-lean`     → 12 000 USD, search and email only
/// - `brief-negative` → a brief whose budget cell was entered as -500
///
/// Any other id returns `None`.
pub fn campaign_brief(brief_id: &str) -> Option<Value> {
    let brief = match brief_id {
        "brief-spring" => json!({
            "brief_id": "brief-spring",
            "client": "Northwind Outdoor",
            "objective": "Spring collection launch",
            "total_budget": 50000.0,
            "currency": "USD",
            "duration_weeks": 6,
            "channels": ["search", "social", "display"],
            "sheets": ["Q2 media plan", "Creative inventory", "Audience segments"]
        }),
        "brief-lean" => json!({
            "brief_id": "brief-lean",
            "client": "Fabrikam Coffee",
            "objective": "Subscription sign-ups",
            "total_budget": 12000.0,
            "currency": "USD",
            "duration_weeks": 4,
            "channels": ["search", "email"],
            "sheets": ["Subscriber funnel"]
        }),
        "brief-negative" => json!({
            "brief_id": "brief-negative",
            "client": "Contoso Bikes",
            "objective": "Clearance sale",
            "total_budget": -500.0,
            "currency": "USD",
            "duration_weeks": 2,
            "channels": ["search", "social"],
            "sheets": ["Clearance stock"]
        }),
        _ => return None,
    };
    Some(brief)
}

// ── Channel benchmarks (mock ad-platform feed) ────────────────────────────────

/// Benchmark click-through rate, cost per click and conversion rate for a
/// channel. Unknown channels get a conservative fallback.
pub fn channel_metrics(channel: &str) -> Value {
    let (ctr, cpc, conversion_rate) = match channel {
        "search" => (0.035, 1.80, 0.045),
        "social" => (0.012, 0.95, 0.020),
        "display" => (0.004, 0.60, 0.008),
        "email" => (0.220, 0.10, 0.060),
        _ => (0.010, 1.00, 0.010),
    };
    json!({
        "channel": channel,
        "ctr": ctr,
        "cpc": cpc,
        "conversion_rate": conversion_rate
    })
}

/// Relative share of budget a channel receives before normalization.
pub fn channel_weight(channel: &str) -> f64 {
    match channel {
        "search" => 0.5,
        "social" => 0.3,
        "display" => 0.2,
        "email" => 0.1,
        _ => 0.05,
    }
}
