//! Bounded execution of agent-supplied step logic.
//!
//! Every call races the step against a deadline of `budget + scheduling overhead`.
//! The returned [`StepExecution`] is final: a step that resolves after its deadline
//! is detached and its value is dropped without ever being inspected.
//!
//! A detached synchronous step keeps its blocking-pool thread until it returns.
//! Each agent runs through its own [`StepSlot`], and a slot still occupied by a
//! detached step refuses new work, so one agent never holds more than one thread.

use habitat_sandbox_abi::{
    AgentStep, StepError, StepErrorCode, StepExecution, StepFault, StepInput, StepOutput,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio::time::error::Elapsed;

pub const DEFAULT_SCHEDULING_OVERHEAD_MS: u64 = 5;
pub const DEFAULT_MAX_ACTIONS_PER_STEP: u32 = 256;

fn count_exceeds_limit(count: usize, limit: u32) -> bool {
    match u32::try_from(count) {
        Ok(value) => value > limit,
        Err(_) => true,
    }
}

/// A step stub that always returns a fixed result, optionally after a delay.
#[derive(Debug, Clone)]
pub struct FixedStep {
    result: Result<JsonValue, StepFault>,
    delay: Option<Duration>,
}

impl FixedStep {
    pub fn succeed(output: JsonValue) -> Self {
        Self {
            result: Ok(output),
            delay: None,
        }
    }

    pub fn fail(fault: StepFault) -> Self {
        Self {
            result: Err(fault),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl AgentStep for FixedStep {
    fn step(&self, _input: &StepInput) -> Result<JsonValue, StepFault> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.result.clone()
    }
}

/// Per-agent marker for a synchronous step occupying a blocking-pool thread.
///
/// Clones share the same marker.
#[derive(Debug, Clone, Default)]
pub struct StepSlot {
    busy: Arc<AtomicBool>,
}

impl StepSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a previously launched step has not yet returned.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn claim(&self) -> Option<SlotClaim> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotClaim {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Released on drop, including when the step unwinds or is never started.
struct SlotClaim {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepExecutorConfig {
    /// Added to the granted compute budget to absorb scheduling jitter.
    pub scheduling_overhead_ms: u64,
    /// Outputs carrying more actions than this are rejected as invalid.
    pub max_actions_per_step: u32,
}

impl Default for StepExecutorConfig {
    fn default() -> Self {
        Self {
            scheduling_overhead_ms: DEFAULT_SCHEDULING_OVERHEAD_MS,
            max_actions_per_step: DEFAULT_MAX_ACTIONS_PER_STEP,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    config: StepExecutorConfig,
}

impl StepExecutor {
    pub fn new(config: StepExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StepExecutorConfig {
        &self.config
    }

    pub fn deadline(&self, budget_ms: u64) -> Duration {
        Duration::from_millis(budget_ms.saturating_add(self.config.scheduling_overhead_ms))
    }

    /// Runs synchronous step logic on the blocking pool.
    ///
    /// A step that overruns keeps its thread until it returns on its own; the
    /// host only stops waiting for it. While it runs, `slot` stays busy and
    /// every further call on it returns `TIMEOUT` without launching the step.
    pub async fn execute(
        &self,
        slot: &StepSlot,
        step: Arc<dyn AgentStep>,
        input: StepInput,
        budget_ms: u64,
    ) -> StepExecution {
        let Some(claim) = slot.claim() else {
            tracing::warn!(
                agent_id = %input.context.agent_id,
                "previous step still running, tick skipped"
            );
            return StepExecution {
                output: None,
                error: Some(failure(
                    StepErrorCode::Timeout,
                    "previous step still running past its deadline",
                    None,
                )),
                actual_compute_ms: 0,
                compute_budget_exceeded: true,
            };
        };
        let started = Instant::now();
        let handle = tokio::task::spawn_blocking(move || {
            let _claim = claim;
            step.step(&input)
        });
        let joined = tokio::time::timeout(self.deadline(budget_ms), handle).await;
        self.finish(joined, started, budget_ms)
    }

    /// Runs asynchronous step logic as its own task. The task is aborted at the deadline.
    pub async fn execute_async<Fut>(&self, step: Fut, budget_ms: u64) -> StepExecution
    where
        Fut: Future<Output = Result<JsonValue, StepFault>> + Send + 'static,
    {
        let started = Instant::now();
        let handle = tokio::spawn(step);
        let abort = handle.abort_handle();
        let joined = tokio::time::timeout(self.deadline(budget_ms), handle).await;
        if joined.is_err() {
            abort.abort();
        }
        self.finish(joined, started, budget_ms)
    }

    fn finish(
        &self,
        joined: Result<Result<Result<JsonValue, StepFault>, JoinError>, Elapsed>,
        started: Instant,
        budget_ms: u64,
    ) -> StepExecution {
        let elapsed = started.elapsed();
        let actual_compute_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let over_budget = elapsed > Duration::from_millis(budget_ms);
        let outcome = match joined {
            Err(_) => Err(failure(
                StepErrorCode::Timeout,
                format!(
                    "step exceeded {budget_ms}ms budget (+{}ms overhead)",
                    self.config.scheduling_overhead_ms
                ),
                None,
            )),
            Ok(Err(join_error)) => Err(join_failure(join_error)),
            Ok(Ok(Err(fault))) => Err(failure(StepErrorCode::Crash, fault.message, fault.trace)),
            Ok(Ok(Ok(value))) => self.parse_output(value),
        };
        match outcome {
            Ok(output) => {
                tracing::debug!(
                    reported_ms = output.compute_time_ms,
                    measured_ms = actual_compute_ms,
                    "step completed"
                );
                StepExecution {
                    output: Some(output),
                    error: None,
                    actual_compute_ms,
                    compute_budget_exceeded: over_budget,
                }
            }
            Err(error) => {
                let timed_out = error.code == StepErrorCode::Timeout;
                StepExecution {
                    output: None,
                    error: Some(error),
                    actual_compute_ms,
                    compute_budget_exceeded: timed_out || over_budget,
                }
            }
        }
    }

    /// Checks the `{actions, computeTimeMs}` shape of a raw step result.
    pub fn parse_output(&self, value: JsonValue) -> Result<StepOutput, StepError> {
        if !value.is_object() {
            return Err(failure(
                StepErrorCode::InvalidOutput,
                "step output is not an object",
                None,
            ));
        }
        let output: StepOutput = serde_json::from_value(value).map_err(|err| {
            failure(
                StepErrorCode::InvalidOutput,
                format!("step output malformed: {err}"),
                None,
            )
        })?;
        if count_exceeds_limit(output.actions.len(), self.config.max_actions_per_step) {
            return Err(failure(
                StepErrorCode::InvalidOutput,
                format!(
                    "step output carries {} actions, limit {}",
                    output.actions.len(),
                    self.config.max_actions_per_step
                ),
                None,
            ));
        }
        Ok(output)
    }
}

fn failure(code: StepErrorCode, message: impl Into<String>, trace: Option<String>) -> StepError {
    StepError {
        code,
        message: message.into(),
        trace,
    }
}

fn join_failure(error: JoinError) -> StepError {
    if error.is_panic() {
        let message = panic_message(error.into_panic());
        return failure(
            StepErrorCode::Crash,
            format!("step panicked: {message}"),
            None,
        );
    }
    failure(StepErrorCode::Crash, format!("step task failed: {error}"), None)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}
