//! Step contract between the host and agent-supplied decision logic.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{ActionRequest, DegradedObservation, GrantedCapabilities};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    pub state: StepState,
    pub context: StepContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub energy: u64,
    #[serde(default)]
    pub location: JsonValue,
    pub tick: u64,
    pub observation: DegradedObservation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepContext {
    pub granted: GrantedCapabilities,
    pub agent_id: String,
}

/// Well-formed step output. `compute_time_ms` is self-reported and never enforced on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    pub actions: Vec<ActionRequest>,
    pub compute_time_ms: f64,
    #[serde(default)]
    pub terminated: bool,
}

/// An error raised by agent logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFault {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl StepFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Some(trace.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepErrorCode {
    Timeout,
    Crash,
    InvalidOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub code: StepErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Outcome of one bounded step. Exactly one of `output`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StepOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub actual_compute_ms: u64,
    pub compute_budget_exceeded: bool,
}

impl StepExecution {
    pub fn error_code(&self) -> Option<StepErrorCode> {
        self.error.as_ref().map(|error| error.code)
    }

    /// Actions to hand to the action processor. Empty whenever the step failed.
    pub fn actions(&self) -> &[ActionRequest] {
        match (&self.error, &self.output) {
            (None, Some(output)) => output.actions.as_slice(),
            _ => &[],
        }
    }
}

/// Agent-supplied decision logic. Returns an untyped value so the executor, not
/// the agent, decides whether the output is well formed.
pub trait AgentStep: Send + Sync {
    fn step(&self, input: &StepInput) -> Result<JsonValue, StepFault>;
}

impl<F> AgentStep for F
where
    F: Fn(&StepInput) -> Result<JsonValue, StepFault> + Send + Sync,
{
    fn step(&self, input: &StepInput) -> Result<JsonValue, StepFault> {
        self(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_output_defaults_terminated_to_false() {
        let output: StepOutput = serde_json::from_value(json!({
            "actions": [{"capability": "MOVE", "params": {"dx": 1}}],
            "computeTimeMs": 3.5
        }))
        .unwrap();
        assert!(!output.terminated);
        assert_eq!(output.actions.len(), 1);
        assert_eq!(output.actions[0].capability, "MOVE");
    }

    #[test]
    fn failed_execution_exposes_no_actions() {
        let execution = StepExecution {
            output: Some(StepOutput {
                actions: vec![ActionRequest {
                    capability: "MOVE".to_string(),
                    params: JsonValue::Null,
                }],
                compute_time_ms: 0.0,
                terminated: false,
            }),
            error: Some(StepError {
                code: StepErrorCode::Timeout,
                message: "late".to_string(),
                trace: None,
            }),
            actual_compute_ms: 20,
            compute_budget_exceeded: true,
        };
        assert!(execution.actions().is_empty());
        assert_eq!(execution.error_code(), Some(StepErrorCode::Timeout));
    }
}
