//! Per-agent runtime state owned by the host.

use habitat_sandbox_abi::{ActionRateLimit, Capability, GrantedCapabilities};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub tick: u64,
    pub capability: Capability,
}

/// Sliding log of executed actions used for rate limiting.
///
/// The log is rebuilt from history on every update rather than patched, so the
/// window start always follows from the current tick and the grant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionWindowState {
    pub actions: Vec<WindowEntry>,
    pub window_start: u64,
}

impl ActionWindowState {
    /// Returns the window as seen from `now`: entries older than
    /// `now - window_ticks` are evicted.
    pub fn recompute(&self, now: u64, limit: &ActionRateLimit) -> Self {
        let window_start = now.saturating_sub(limit.window_ticks);
        Self {
            actions: self
                .actions
                .iter()
                .copied()
                .filter(|entry| entry.tick >= window_start)
                .collect(),
            window_start,
        }
    }

    pub fn count(&self) -> usize {
        self.actions.len()
    }

    pub fn is_limited(&self, limit: &ActionRateLimit) -> bool {
        match u32::try_from(self.actions.len()) {
            Ok(count) => count >= limit.max,
            Err(_) => true,
        }
    }

    pub fn record(&mut self, tick: u64, capability: Capability) {
        self.actions.push(WindowEntry { tick, capability });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxContext {
    pub agent_id: String,
    pub granted: GrantedCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<String>,
    pub window: ActionWindowState,
    /// Measured wall-clock compute of the most recent tick.
    pub compute_ms_used: u64,
}

impl SandboxContext {
    pub fn new(agent_id: impl Into<String>, granted: GrantedCapabilities) -> Self {
        let shard_id = granted.shard_id.clone();
        Self {
            agent_id: agent_id.into(),
            granted,
            shard_id,
            window: ActionWindowState::default(),
            compute_ms_used: 0,
        }
    }

    pub fn in_quarantine(&self) -> bool {
        self.granted.in_quarantine
    }
}
