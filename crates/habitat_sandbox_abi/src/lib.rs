use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

mod observation;
mod step;

pub use observation::{CellField, DegradedCell, DegradedObservation, FieldValue, RawCell};
pub use step::{
    AgentStep, StepContext, StepError, StepErrorCode, StepExecution, StepFault, StepInput,
    StepOutput, StepState,
};

/// Literal every manifest document must carry in `manifestVersion`.
pub const MANIFEST_VERSION: &str = "1.0";

/// Closed vocabulary of permissions an agent may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Move,
    Sense,
    GenerateTrace,
    ProposePact,
    Inquiry,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Move,
        Capability::Sense,
        Capability::GenerateTrace,
        Capability::ProposePact,
        Capability::Inquiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Move => "MOVE",
            Capability::Sense => "SENSE",
            Capability::GenerateTrace => "GENERATE_TRACE",
            Capability::ProposePact => "PROPOSE_PACT",
            Capability::Inquiry => "INQUIRY",
        }
    }

    /// Exact-match parse. Tags are case sensitive; `"move"` is not a capability.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|capability| capability.as_str() == tag)
    }

    pub fn variants() -> Vec<&'static str> {
        Self::ALL.iter().map(Capability::as_str).collect()
    }
}

/// How the agent's decision logic is hosted. Only `Builtin` is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionKind {
    Wasm,
    Process,
    Builtin,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::Wasm => "WASM",
            ExecutionKind::Process => "PROCESS",
            ExecutionKind::Builtin => "BUILTIN",
        }
    }

    pub fn is_trusted(&self) -> bool {
        matches!(self, ExecutionKind::Builtin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRateLimit {
    pub window_ticks: u64,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationBudget {
    pub max_cells: u32,
    pub max_fields: u32,
    pub noise_floor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyBudget {
    pub max_per_tick: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reserve: Option<u64>,
}

// ============================================================================
// Manifest document
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub manifest_version: String,
    pub agent: AgentIdentity,
    pub requested: RequestedCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compat: Option<CompatConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine: Option<QuarantinePreference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub name: String,
    pub kind: ExecutionKind,
    pub entry: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedCapabilities {
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<ActionRateLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_budget_ms_per_tick: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_budget: Option<RequestedObservationBudget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_budget: Option<RequestedEnergyBudget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedObservationBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cells: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fields: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_floor: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedEnergyBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_tick: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reserve: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_habitat_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinePreference {
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<String>,
}

// ============================================================================
// Grant
// ============================================================================

/// What the host actually allows an admitted agent. Always within both the
/// request and the policy ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedCapabilities {
    pub capabilities: Vec<Capability>,
    pub action_rate_limit: ActionRateLimit,
    pub compute_budget_ms_per_tick: u64,
    pub observation_budget: ObservationBudget,
    pub energy_budget: EnergyBudget,
    pub in_quarantine: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<String>,
}

impl GrantedCapabilities {
    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Tag-level check used on untrusted action requests. Unknown tags are never granted.
    pub fn allows_tag(&self, tag: &str) -> bool {
        Capability::parse(tag).is_some_and(|capability| self.allows(capability))
    }
}

// ============================================================================
// Actions
// ============================================================================

/// One action an agent asks to perform. `params` is opaque data and carries no authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub capability: String,
    #[serde(default)]
    pub params: JsonValue,
}

impl ActionRequest {
    pub fn new(capability: Capability, params: JsonValue) -> Self {
        Self {
            capability: capability.as_str().to_string(),
            params,
        }
    }

    pub fn parsed_capability(&self) -> Option<Capability> {
        Capability::parse(&self.capability)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionRejectionCode {
    CapabilityNotGranted,
    RateLimitExceeded,
    InsufficientEnergy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub capability: String,
    pub executed: bool,
    pub energy_cost: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<ActionRejectionCode>,
}

impl ActionResult {
    pub fn executed(capability: impl Into<String>, energy_cost: u64) -> Self {
        Self {
            capability: capability.into(),
            executed: true,
            energy_cost,
            rejection: None,
        }
    }

    pub fn rejected(capability: impl Into<String>, code: ActionRejectionCode) -> Self {
        Self {
            capability: capability.into(),
            executed: false,
            energy_cost: 0,
            rejection: Some(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capability_parse_is_exact() {
        assert_eq!(Capability::parse("GENERATE_TRACE"), Some(Capability::GenerateTrace));
        assert_eq!(Capability::parse("move"), None);
        assert_eq!(Capability::parse("TELEPORT"), None);
        for capability in Capability::ALL {
            assert_eq!(Capability::parse(capability.as_str()), Some(capability));
        }
    }

    #[test]
    fn capability_serializes_as_vocabulary_tag() {
        let value = serde_json::to_value(Capability::ProposePact).unwrap();
        assert_eq!(value, json!("PROPOSE_PACT"));
    }

    #[test]
    fn only_builtin_kind_is_trusted() {
        assert!(ExecutionKind::Builtin.is_trusted());
        assert!(!ExecutionKind::Wasm.is_trusted());
        assert!(!ExecutionKind::Process.is_trusted());
    }

    #[test]
    fn manifest_deserializes_camel_case_document() {
        let manifest: Manifest = serde_json::from_value(json!({
            "manifestVersion": "1.0",
            "agent": {"name": "scout", "kind": "WASM", "entry": "scout.wasm"},
            "requested": {
                "capabilities": ["MOVE", "SENSE"],
                "rateLimit": {"windowTicks": 10, "max": 3},
                "observationBudget": {"maxCells": 25, "noiseFloor": 0.05}
            },
            "quarantine": {"required": true, "shardId": "s-1"}
        }))
        .unwrap();
        assert_eq!(manifest.agent.kind, ExecutionKind::Wasm);
        assert_eq!(
            manifest.requested.rate_limit,
            Some(ActionRateLimit {
                window_ticks: 10,
                max: 3
            })
        );
        let observation = manifest.requested.observation_budget.unwrap();
        assert_eq!(observation.max_cells, Some(25));
        assert_eq!(observation.max_fields, None);
        assert_eq!(manifest.quarantine.unwrap().shard_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn unknown_tag_is_never_granted() {
        let granted = GrantedCapabilities {
            capabilities: vec![Capability::Move],
            action_rate_limit: ActionRateLimit {
                window_ticks: 1,
                max: 1,
            },
            compute_budget_ms_per_tick: 10,
            observation_budget: ObservationBudget {
                max_cells: 1,
                max_fields: 1,
                noise_floor: 0.0,
            },
            energy_budget: EnergyBudget {
                max_per_tick: 1,
                max_reserve: None,
            },
            in_quarantine: false,
            shard_id: None,
        };
        assert!(granted.allows_tag("MOVE"));
        assert!(!granted.allows_tag("SENSE"));
        assert!(!granted.allows_tag("ADMIN"));
    }
}
