//! Engine log handle.
//!
//! A [`SandboxLog`] is created once from configuration and passed to whatever
//! needs to record engine events. Entries are mirrored to `tracing` and the
//! most recent ones are retained in memory for inspection.

use habitat_sandbox_abi::{ActionRejectionCode, StepErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

pub const DEFAULT_RETAINED_ENTRIES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogVerbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl LogVerbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogVerbosity::Quiet => "quiet",
            LogVerbosity::Normal => "normal",
            LogVerbosity::Verbose => "verbose",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quiet" => Some(LogVerbosity::Quiet),
            "normal" => Some(LogVerbosity::Normal),
            "verbose" => Some(LogVerbosity::Verbose),
            _ => None,
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["quiet", "normal", "verbose"]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub verbosity: LogVerbosity,
    pub retained_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbosity: LogVerbosity::Normal,
            retained_entries: DEFAULT_RETAINED_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxLogEntry {
    pub tick: u64,
    pub agent_id: String,
    pub kind: SandboxLogKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SandboxLogKind {
    AgentAdmitted {
        in_quarantine: bool,
        shard_id: Option<String>,
    },
    AgentInvalid {
        errors: usize,
    },
    AgentRejected {
        reasons: usize,
    },
    AgentDeregistered,
    StepFailed {
        code: StepErrorCode,
        message: String,
        trace: Option<String>,
    },
    ComputeBudgetExceeded {
        budget_ms: u64,
        measured_ms: u64,
    },
    StepReported {
        reported_ms: f64,
        measured_ms: u64,
    },
    ActionRejected {
        capability: String,
        code: ActionRejectionCode,
    },
    TickCompleted {
        executed: usize,
        rejected: usize,
        total_cost: u64,
    },
}

impl SandboxLogKind {
    /// Lowest verbosity at which this kind is recorded.
    pub fn level(&self) -> LogVerbosity {
        match self {
            SandboxLogKind::AgentInvalid { .. }
            | SandboxLogKind::AgentRejected { .. }
            | SandboxLogKind::StepFailed { .. }
            | SandboxLogKind::ComputeBudgetExceeded { .. } => LogVerbosity::Quiet,
            SandboxLogKind::AgentAdmitted { .. }
            | SandboxLogKind::AgentDeregistered
            | SandboxLogKind::ActionRejected { .. } => LogVerbosity::Normal,
            SandboxLogKind::StepReported { .. } | SandboxLogKind::TickCompleted { .. } => {
                LogVerbosity::Verbose
            }
        }
    }
}

#[derive(Debug)]
struct LogBuffer {
    entries: VecDeque<SandboxLogEntry>,
    dropped: u64,
}

#[derive(Debug, Clone)]
pub struct SandboxLog {
    config: LogConfig,
    buffer: Arc<Mutex<LogBuffer>>,
}

impl Default for SandboxLog {
    fn default() -> Self {
        Self::new(LogConfig::default())
    }
}

impl SandboxLog {
    pub fn new(config: LogConfig) -> Self {
        let capacity = config.retained_entries.min(DEFAULT_RETAINED_ENTRIES);
        Self {
            buffer: Arc::new(Mutex::new(LogBuffer {
                entries: VecDeque::with_capacity(capacity),
                dropped: 0,
            })),
            config,
        }
    }

    pub fn verbosity(&self) -> LogVerbosity {
        self.config.verbosity
    }

    pub fn enabled(&self, kind: &SandboxLogKind) -> bool {
        kind.level() <= self.config.verbosity
    }

    pub fn record(&self, tick: u64, agent_id: &str, kind: SandboxLogKind) {
        if !self.enabled(&kind) {
            return;
        }
        emit(tick, agent_id, &kind);
        if self.config.retained_entries == 0 {
            return;
        }
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        while buffer.entries.len() >= self.config.retained_entries {
            buffer.entries.pop_front();
            buffer.dropped = buffer.dropped.saturating_add(1);
        }
        buffer.entries.push_back(SandboxLogEntry {
            tick,
            agent_id: agent_id.to_string(),
            kind,
        });
    }

    pub fn entries(&self) -> Vec<SandboxLogEntry> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.entries.iter().cloned().collect()
    }

    pub fn entries_for(&self, agent_id: &str) -> Vec<SandboxLogEntry> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer
            .entries
            .iter()
            .filter(|entry| entry.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Number of entries evicted from the ring so far.
    pub fn dropped(&self) -> u64 {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped
    }
}

fn emit(tick: u64, agent_id: &str, kind: &SandboxLogKind) {
    match kind {
        SandboxLogKind::StepFailed { code, message, .. } => {
            tracing::warn!(tick, agent_id, ?code, %message, "step failed");
        }
        SandboxLogKind::ComputeBudgetExceeded {
            budget_ms,
            measured_ms,
        } => {
            tracing::warn!(tick, agent_id, budget_ms, measured_ms, "compute budget exceeded");
        }
        SandboxLogKind::AgentInvalid { errors } => {
            tracing::info!(agent_id, errors, "manifest invalid");
        }
        SandboxLogKind::AgentRejected { reasons } => {
            tracing::info!(agent_id, reasons, "admission rejected");
        }
        SandboxLogKind::AgentAdmitted {
            in_quarantine,
            shard_id,
        } => {
            tracing::info!(agent_id, in_quarantine, shard_id = ?shard_id, "agent admitted");
        }
        SandboxLogKind::AgentDeregistered => {
            tracing::info!(agent_id, "agent deregistered");
        }
        SandboxLogKind::ActionRejected { capability, code } => {
            tracing::debug!(tick, agent_id, %capability, ?code, "action rejected");
        }
        SandboxLogKind::StepReported {
            reported_ms,
            measured_ms,
        } => {
            tracing::debug!(tick, agent_id, reported_ms, measured_ms, "step timing");
        }
        SandboxLogKind::TickCompleted {
            executed,
            rejected,
            total_cost,
        } => {
            tracing::debug!(tick, agent_id, executed, rejected, total_cost, "tick completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> SandboxLogKind {
        SandboxLogKind::StepFailed {
            code: StepErrorCode::Timeout,
            message: "late".to_string(),
            trace: None,
        }
    }

    fn reported() -> SandboxLogKind {
        SandboxLogKind::StepReported {
            reported_ms: 0.5,
            measured_ms: 3,
        }
    }

    #[test]
    fn verbosity_filters_by_kind_level() {
        let quiet = SandboxLog::new(LogConfig {
            verbosity: LogVerbosity::Quiet,
            ..LogConfig::default()
        });
        quiet.record(1, "a", failed());
        quiet.record(1, "a", SandboxLogKind::AgentDeregistered);
        quiet.record(1, "a", reported());
        assert_eq!(quiet.entries().len(), 1);

        let verbose = SandboxLog::new(LogConfig {
            verbosity: LogVerbosity::Verbose,
            ..LogConfig::default()
        });
        verbose.record(1, "a", failed());
        verbose.record(1, "a", SandboxLogKind::AgentDeregistered);
        verbose.record(1, "a", reported());
        assert_eq!(verbose.entries().len(), 3);
    }

    #[test]
    fn self_reported_timing_needs_verbose() {
        let log = SandboxLog::default();
        log.record(2, "a", reported());
        assert!(log.entries().is_empty());
    }

    #[test]
    fn ring_keeps_most_recent_entries() {
        let log = SandboxLog::new(LogConfig {
            verbosity: LogVerbosity::Normal,
            retained_entries: 2,
        });
        for tick in 0..5 {
            log.record(tick, "a", failed());
        }
        let ticks: Vec<_> = log.entries().iter().map(|entry| entry.tick).collect();
        assert_eq!(ticks, vec![3, 4]);
        assert_eq!(log.dropped(), 3);
    }

    #[test]
    fn clones_share_one_buffer() {
        let log = SandboxLog::default();
        let other = log.clone();
        other.record(1, "b", failed());
        log.record(1, "c", failed());
        assert_eq!(log.entries_for("b").len(), 1);
        assert_eq!(other.entries().len(), 2);
    }

    #[test]
    fn verbosity_parses_case_insensitively() {
        assert_eq!(LogVerbosity::parse("VERBOSE"), Some(LogVerbosity::Verbose));
        assert_eq!(LogVerbosity::parse("loud"), None);
        for name in LogVerbosity::variants() {
            assert_eq!(LogVerbosity::parse(name).unwrap().as_str(), *name);
        }
    }
}
