#![allow(dead_code)]

use habitat_sandbox::{
    ActionRateLimit, AgentIdentity, Capability, EnergyBudget, ExecutionKind, GrantedCapabilities,
    Manifest, ObservationBudget, RequestedCapabilities, RequestedEnergyBudget,
    RequestedObservationBudget, SandboxContext,
};

pub fn manifest(kind: ExecutionKind, capabilities: Vec<Capability>) -> Manifest {
    Manifest {
        manifest_version: "1.0".to_string(),
        agent: AgentIdentity {
            name: "probe".to_string(),
            kind,
            entry: "probe.entry".to_string(),
        },
        requested: RequestedCapabilities {
            capabilities,
            rate_limit: None,
            compute_budget_ms_per_tick: None,
            observation_budget: Some(RequestedObservationBudget::default()),
            energy_budget: Some(RequestedEnergyBudget::default()),
        },
        defaults: None,
        compat: None,
        quarantine: None,
    }
}

pub fn grant(capabilities: Vec<Capability>, window_ticks: u64, max: u32) -> GrantedCapabilities {
    GrantedCapabilities {
        capabilities,
        action_rate_limit: ActionRateLimit { window_ticks, max },
        compute_budget_ms_per_tick: 10,
        observation_budget: ObservationBudget {
            max_cells: 9,
            max_fields: 8,
            noise_floor: 0.1,
        },
        energy_budget: EnergyBudget {
            max_per_tick: 100,
            max_reserve: None,
        },
        in_quarantine: false,
        shard_id: None,
    }
}

pub fn context(capabilities: Vec<Capability>, window_ticks: u64, max: u32) -> SandboxContext {
    SandboxContext::new("probe-1", grant(capabilities, window_ticks, max))
}
