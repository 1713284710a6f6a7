//! AgentHost: registration, the per-tick pipeline and concurrent tick batches.

use habitat_sandbox_abi::{
    ActionResult, AgentStep, GrantedCapabilities, RawCell, StepContext, StepExecution, StepInput,
    StepState,
};
use habitat_sandbox_executor::{StepExecutor, StepSlot};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::actions::{process_actions, ActionPricer};
use super::admission::{admit, AdmissionResult};
use super::config::HabitatConfig;
use super::context::SandboxContext;
use super::log::{SandboxLog, SandboxLogKind};
use super::manifest::{load_manifest, ValidationResult};
use super::observation::degrade;
use super::policy::{PolicyError, PolicyHandle};
use super::util::hash_json;

pub const DEFAULT_QUARANTINE_SHARD: &str = "quarantine-default";

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("agent not registered: {agent_id}")]
    UnknownAgent { agent_id: String },
    #[error("agent already registered: {agent_id}")]
    DuplicateAgent { agent_id: String },
    #[error("agent scheduled twice in one batch: {agent_id}")]
    DuplicateJob { agent_id: String },
    #[error("manifest digest failed: {0}")]
    Digest(#[from] serde_json::Error),
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Registration {
    Admitted {
        granted: GrantedCapabilities,
        manifest_digest: String,
    },
    Invalid(ValidationResult),
    Rejected(AdmissionResult),
}

impl Registration {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Registration::Admitted { .. })
    }
}

/// Per-tick inputs the host supplies to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickInput {
    pub tick: u64,
    /// Ledger balance at the start of the tick.
    pub energy: u64,
    #[serde(default)]
    pub location: JsonValue,
    /// True cells, already sorted by relevance.
    #[serde(default)]
    pub raw_cells: Vec<RawCell>,
    /// Fixes the observation noise for reproducible runs.
    #[serde(default)]
    pub noise_seed: Option<u64>,
}

impl TickInput {
    pub fn new(tick: u64, energy: u64) -> Self {
        Self {
            tick,
            energy,
            location: JsonValue::Null,
            raw_cells: Vec::new(),
            noise_seed: None,
        }
    }

    pub fn with_cells(mut self, raw_cells: Vec<RawCell>) -> Self {
        self.raw_cells = raw_cells;
        self
    }

    pub fn with_noise_seed(mut self, seed: u64) -> Self {
        self.noise_seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub agent_id: String,
    pub tick: u64,
    pub execution: StepExecution,
    pub results: Vec<ActionResult>,
    /// Energy the caller deducts from the agent's ledger.
    pub total_cost: u64,
    pub terminated: bool,
}

impl TickReport {
    pub fn executed_count(&self) -> usize {
        self.results.iter().filter(|result| result.executed).count()
    }
}

/// Runs degrade, execute and process for one agent and applies the new
/// window to its context. The ledger itself is left to the caller.
///
/// Spending is capped by the grant's per-tick energy budget as well as the
/// ledger balance. `slot` must be the same for every tick of one agent.
pub async fn run_agent_tick<P: ActionPricer + ?Sized>(
    executor: &StepExecutor,
    log: &SandboxLog,
    context: &mut SandboxContext,
    slot: &StepSlot,
    step: Arc<dyn AgentStep>,
    input: TickInput,
    pricer: &P,
) -> TickReport {
    let tick = input.tick;
    let granted = context.granted.clone();
    let mut rng = match input.noise_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let observation = degrade(&input.raw_cells, &granted.observation_budget, &mut rng);
    let spendable = input.energy.min(granted.energy_budget.max_per_tick);

    let step_input = StepInput {
        state: StepState {
            energy: input.energy,
            location: input.location,
            tick,
            observation,
        },
        context: StepContext {
            granted: granted.clone(),
            agent_id: context.agent_id.clone(),
        },
    };
    let budget_ms = granted.compute_budget_ms_per_tick;
    let execution = executor.execute(slot, step, step_input, budget_ms).await;
    context.compute_ms_used = execution.actual_compute_ms;

    let agent_id = context.agent_id.clone();
    if let Some(error) = &execution.error {
        log.record(
            tick,
            &agent_id,
            SandboxLogKind::StepFailed {
                code: error.code,
                message: error.message.clone(),
                trace: error.trace.clone(),
            },
        );
    }
    if execution.compute_budget_exceeded {
        log.record(
            tick,
            &agent_id,
            SandboxLogKind::ComputeBudgetExceeded {
                budget_ms,
                measured_ms: execution.actual_compute_ms,
            },
        );
    }
    if let Some(output) = &execution.output {
        log.record(
            tick,
            &agent_id,
            SandboxLogKind::StepReported {
                reported_ms: output.compute_time_ms,
                measured_ms: execution.actual_compute_ms,
            },
        );
    }

    let outcome = process_actions(execution.actions(), context, tick, spendable, pricer);
    context.window = outcome.updated_window;

    for result in outcome.results.iter().filter(|result| !result.executed) {
        if let Some(code) = result.rejection {
            log.record(
                tick,
                &agent_id,
                SandboxLogKind::ActionRejected {
                    capability: result.capability.clone(),
                    code,
                },
            );
        }
    }
    let executed = outcome.results.iter().filter(|result| result.executed).count();
    log.record(
        tick,
        &agent_id,
        SandboxLogKind::TickCompleted {
            executed,
            rejected: outcome.results.len() - executed,
            total_cost: outcome.total_cost,
        },
    );

    let terminated = execution
        .output
        .as_ref()
        .is_some_and(|output| execution.error.is_none() && output.terminated);
    TickReport {
        agent_id,
        tick,
        execution,
        results: outcome.results,
        total_cost: outcome.total_cost,
        terminated,
    }
}

/// One agent's share of a concurrent tick.
#[derive(Clone)]
pub struct AgentTickJob {
    pub agent_id: String,
    pub step: Arc<dyn AgentStep>,
    pub input: TickInput,
}

impl AgentTickJob {
    pub fn new(agent_id: impl Into<String>, step: Arc<dyn AgentStep>, input: TickInput) -> Self {
        Self {
            agent_id: agent_id.into(),
            step,
            input,
        }
    }
}

/// Per-agent reports of one batch, keyed by agent id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TickSummary {
    pub reports: BTreeMap<String, TickReport>,
    /// Agents whose pipeline task died; their contexts are left unchanged.
    #[serde(default)]
    pub aborted: Vec<String>,
}

impl TickSummary {
    pub fn total_cost(&self) -> u64 {
        self.reports
            .values()
            .fold(0u64, |total, report| total.saturating_add(report.total_cost))
    }

    pub fn failed_steps(&self) -> usize {
        self.reports
            .values()
            .filter(|report| report.execution.error.is_some())
            .count()
    }
}

#[derive(Debug)]
pub struct AgentHost {
    policy: PolicyHandle,
    executor: StepExecutor,
    log: SandboxLog,
    contexts: BTreeMap<String, SandboxContext>,
    slots: BTreeMap<String, StepSlot>,
}

impl AgentHost {
    pub fn new(policy: PolicyHandle, executor: StepExecutor, log: SandboxLog) -> Self {
        Self {
            policy,
            executor,
            log,
            contexts: BTreeMap::new(),
            slots: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &HabitatConfig) -> Result<Self, PolicyError> {
        Ok(Self::new(
            PolicyHandle::new(config.policy.clone())?,
            StepExecutor::new(config.executor.clone()),
            SandboxLog::new(config.log.clone()),
        ))
    }

    pub fn policy(&self) -> &PolicyHandle {
        &self.policy
    }

    pub fn log(&self) -> &SandboxLog {
        &self.log
    }

    pub fn context(&self, agent_id: &str) -> Option<&SandboxContext> {
        self.contexts.get(agent_id)
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.contexts.keys().cloned().collect()
    }

    /// Validates and admits a serialized manifest against the current policy.
    /// Admission works on one policy snapshot, so a concurrent swap never
    /// produces a grant mixing two policies.
    pub fn register(
        &mut self,
        agent_id: &str,
        manifest_json: &str,
    ) -> Result<Registration, HostError> {
        if self.contexts.contains_key(agent_id) {
            return Err(HostError::DuplicateAgent {
                agent_id: agent_id.to_string(),
            });
        }
        let manifest = match load_manifest(manifest_json) {
            Ok(manifest) => manifest,
            Err(validation) => {
                self.log.record(
                    0,
                    agent_id,
                    SandboxLogKind::AgentInvalid {
                        errors: validation.errors.len(),
                    },
                );
                return Ok(Registration::Invalid(validation));
            }
        };
        let manifest_digest = hash_json(&manifest)?;
        let policy = self.policy.snapshot();
        let admission = admit(&manifest, &policy);
        let Some(mut granted) = admission.granted.clone().filter(|_| admission.admitted) else {
            self.log.record(
                0,
                agent_id,
                SandboxLogKind::AgentRejected {
                    reasons: admission.rejection_reasons.len(),
                },
            );
            return Ok(Registration::Rejected(admission));
        };
        if granted.in_quarantine && granted.shard_id.is_none() {
            granted.shard_id = Some(DEFAULT_QUARANTINE_SHARD.to_string());
        }
        self.log.record(
            0,
            agent_id,
            SandboxLogKind::AgentAdmitted {
                in_quarantine: granted.in_quarantine,
                shard_id: granted.shard_id.clone(),
            },
        );
        self.contexts.insert(
            agent_id.to_string(),
            SandboxContext::new(agent_id, granted.clone()),
        );
        self.slots.insert(agent_id.to_string(), StepSlot::new());
        Ok(Registration::Admitted {
            granted,
            manifest_digest,
        })
    }

    pub fn deregister(&mut self, agent_id: &str) -> Result<SandboxContext, HostError> {
        let context = self
            .contexts
            .remove(agent_id)
            .ok_or_else(|| HostError::UnknownAgent {
                agent_id: agent_id.to_string(),
            })?;
        self.slots.remove(agent_id);
        self.log
            .record(0, agent_id, SandboxLogKind::AgentDeregistered);
        Ok(context)
    }

    /// Runs one tick for one agent. `&mut self` keeps ticks of the same agent
    /// strictly sequential.
    pub async fn run_tick<P: ActionPricer + ?Sized>(
        &mut self,
        agent_id: &str,
        step: Arc<dyn AgentStep>,
        input: TickInput,
        pricer: &P,
    ) -> Result<TickReport, HostError> {
        let context = self
            .contexts
            .get_mut(agent_id)
            .ok_or_else(|| HostError::UnknownAgent {
                agent_id: agent_id.to_string(),
            })?;
        let slot = self.slots.entry(agent_id.to_string()).or_default();
        Ok(run_agent_tick(&self.executor, &self.log, context, slot, step, input, pricer).await)
    }

    /// Runs many agents' ticks concurrently, one task per agent. Each task works
    /// on a copy of its agent's context, which is written back once the task is
    /// collected; results are keyed by agent id so completion order does not
    /// matter. Dropping the returned future leaves every uncollected agent
    /// registered with its pre-batch context.
    pub async fn run_tick_batch(
        &mut self,
        jobs: Vec<AgentTickJob>,
        pricer: Arc<dyn ActionPricer + Send + Sync>,
    ) -> Result<TickSummary, HostError> {
        let mut scheduled: Vec<&str> = Vec::with_capacity(jobs.len());
        for job in &jobs {
            if !self.contexts.contains_key(&job.agent_id) {
                return Err(HostError::UnknownAgent {
                    agent_id: job.agent_id.clone(),
                });
            }
            if scheduled.contains(&job.agent_id.as_str()) {
                return Err(HostError::DuplicateJob {
                    agent_id: job.agent_id.clone(),
                });
            }
            scheduled.push(job.agent_id.as_str());
        }

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let Some(context) = self.contexts.get(&job.agent_id).cloned() else {
                continue;
            };
            let slot = self
                .slots
                .entry(job.agent_id.clone())
                .or_default()
                .clone();
            let executor = self.executor.clone();
            let log = self.log.clone();
            let pricer = Arc::clone(&pricer);
            let handle = tokio::spawn(async move {
                let mut context = context;
                let report = run_agent_tick(
                    &executor,
                    &log,
                    &mut context,
                    &slot,
                    job.step,
                    job.input,
                    pricer.as_ref(),
                )
                .await;
                (context, report)
            });
            handles.push((job.agent_id, handle));
        }

        let mut summary = TickSummary::default();
        for (agent_id, handle) in handles {
            match handle.await {
                Ok((context, report)) => {
                    self.contexts.insert(agent_id.clone(), context);
                    summary.reports.insert(agent_id, report);
                }
                Err(err) => {
                    tracing::error!(agent_id = %agent_id, error = %err, "tick task failed");
                    summary.aborted.push(agent_id);
                }
            }
        }
        Ok(summary)
    }
}
