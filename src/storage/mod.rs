//! Persistence layer.
//!
//! Circuit breaker state lives in a small JSON file so a halted process
//! restarts halted. Decisions and closures go to the SQLite trade ledger
//! (see [`ledger`]).

pub mod ledger;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::engine::circuit_breaker::BreakerSnapshot;

/// Default breaker state file path.
pub const DEFAULT_STATE_FILE: &str = "aegis_state.json";

/// Save breaker state to a JSON file.
pub fn save_breaker_state(snapshot: &BreakerSnapshot, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(snapshot)
        .context("Failed to serialise breaker state")?;

    // Write to a temp file, then rename over the target
    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json).context(format!("Failed to write state to {tmp}"))?;
    std::fs::rename(&tmp, path).context(format!("Failed to move state into {path}"))?;

    debug!(path, state = %snapshot.state, "Breaker state saved");
    Ok(())
}

/// Load breaker state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_breaker_state(path: Option<&str>) -> Result<Option<BreakerSnapshot>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved breaker state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read state from {path}"))?;

    let snapshot: BreakerSnapshot = serde_json::from_str(&json)
        .context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        state = %snapshot.state,
        since = %snapshot.since,
        transitions = snapshot.history.len(),
        "Breaker state loaded from disk"
    );

    Ok(Some(snapshot))
}

/// Delete the state file (for testing or reset).
pub fn delete_breaker_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
