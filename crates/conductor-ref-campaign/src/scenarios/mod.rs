//! Campaign reference runtime demo scenarios.
//!
//! Each scenario is a self-contained module that wires up real Conductor
//! components (orchestrator, bridge, store, governor) with mock campaign data
//! and demonstrates a distinct orchestration pattern.

pub mod budget_abort;
pub mod flaky_workspace;
pub mod pipeline;
pub mod tenant_capacity;

use conductor_contracts::execution::SessionResult;
use conductor_store::InMemoryStateStore;

/// Print the stored checkpoint trail for a session, one line per version.
pub(crate) fn print_checkpoints(store: &InMemoryStateStore, tenant_id: &str, session_id: &str) {
    match store.checkpoints(tenant_id, session_id) {
        Ok(checkpoints) => {
            for checkpoint in checkpoints {
                println!(
                    "    v{:<2} {:<20} {}…",
                    checkpoint.version,
                    checkpoint.stage.to_string(),
                    checkpoint.this_hash.get(..12).unwrap_or(checkpoint.this_hash.as_str())
                );
            }
        }
        Err(e) => println!("    (no checkpoints: {})", e),
    }
}

/// Print a one-line summary of a finished session.
pub(crate) fn print_outcome(result: &SessionResult) {
    println!(
        "  Outcome:          {} at version {}",
        result.stage, result.version
    );
    for (agent, error) in &result.errors {
        println!(
            "  Error ({}):     {} [{}; {} attempt(s)]",
            agent, error.message, error.class, error.attempts
        );
    }
}
