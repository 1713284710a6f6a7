//! Admission controller: turns a validated manifest into a grant under a policy.
//!
//! A version mismatch is the only hard rejection. Everything else resolves
//! to a grant that is never wider than either the request or the policy.

use habitat_sandbox_abi::{
    ActionRateLimit, Capability, EnergyBudget, GrantedCapabilities, Manifest, ObservationBudget,
};
use serde::{Deserialize, Serialize};

use super::policy::WorldPolicy;
use super::version::SemVer;

pub const DEFAULT_RATE_LIMIT: ActionRateLimit = ActionRateLimit {
    window_ticks: 1,
    max: 1,
};
pub const DEFAULT_COMPUTE_BUDGET_MS: u64 = 10;
pub const DEFAULT_MAX_CELLS: u32 = 9;
pub const DEFAULT_MAX_FIELDS: u32 = 8;
pub const DEFAULT_NOISE_FLOOR: f64 = 0.1;
pub const DEFAULT_ENERGY_PER_TICK: u64 = 10;
pub const DEFAULT_MIN_HABITAT_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionRejection {
    #[serde(rename_all = "camelCase")]
    VersionMismatch { required: String, habitat: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResult {
    pub admitted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted: Option<GrantedCapabilities>,
    #[serde(default)]
    pub rejection_reasons: Vec<AdmissionRejection>,
}

impl AdmissionResult {
    fn rejected(reason: AdmissionRejection) -> Self {
        Self {
            admitted: false,
            granted: None,
            rejection_reasons: vec![reason],
        }
    }
}

/// Decides whether `manifest` may run under `policy` and with what grant.
pub fn admit(manifest: &Manifest, policy: &WorldPolicy) -> AdmissionResult {
    if let Some(reason) = check_version(manifest, policy) {
        tracing::info!(agent = %manifest.agent.name, ?reason, "admission rejected");
        return AdmissionResult::rejected(reason);
    }
    let granted = resolve_grant(manifest, policy);
    tracing::debug!(
        agent = %manifest.agent.name,
        capabilities = granted.capabilities.len(),
        in_quarantine = granted.in_quarantine,
        "admission granted"
    );
    AdmissionResult {
        admitted: true,
        granted: Some(granted),
        rejection_reasons: Vec::new(),
    }
}

fn check_version(manifest: &Manifest, policy: &WorldPolicy) -> Option<AdmissionRejection> {
    let required = manifest
        .compat
        .as_ref()
        .and_then(|compat| compat.min_habitat_version.as_deref())
        .unwrap_or(DEFAULT_MIN_HABITAT_VERSION);
    let compatible = match (policy.parsed_version(), SemVer::parse(required)) {
        (Some(habitat), Some(minimum)) => habitat >= minimum,
        _ => false,
    };
    if compatible {
        return None;
    }
    Some(AdmissionRejection::VersionMismatch {
        required: required.to_string(),
        habitat: policy.habitat_version.clone(),
    })
}

fn resolve_grant(manifest: &Manifest, policy: &WorldPolicy) -> GrantedCapabilities {
    let requested = &manifest.requested;

    let mut capabilities: Vec<Capability> = Vec::new();
    for capability in &requested.capabilities {
        if policy.allows(*capability) && !capabilities.contains(capability) {
            capabilities.push(*capability);
        }
    }

    let rate = requested.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT);
    let action_rate_limit = ActionRateLimit {
        window_ticks: rate.window_ticks.max(policy.max_action_rate.window_ticks),
        max: rate.max.min(policy.max_action_rate.max),
    };

    let compute_budget_ms_per_tick = requested
        .compute_budget_ms_per_tick
        .unwrap_or(DEFAULT_COMPUTE_BUDGET_MS)
        .min(policy.max_compute_ms_per_tick);

    let observation = requested.observation_budget.unwrap_or_default();
    let requested_noise = observation
        .noise_floor
        .filter(|noise| noise.is_finite())
        .unwrap_or(DEFAULT_NOISE_FLOOR);
    let observation_budget = ObservationBudget {
        max_cells: observation
            .max_cells
            .unwrap_or(DEFAULT_MAX_CELLS)
            .min(policy.max_observation_cells),
        max_fields: observation.max_fields.unwrap_or(DEFAULT_MAX_FIELDS),
        noise_floor: requested_noise.max(policy.min_observation_noise),
    };

    let energy = requested.energy_budget.unwrap_or_default();
    let energy_budget = EnergyBudget {
        max_per_tick: energy
            .max_per_tick
            .unwrap_or(DEFAULT_ENERGY_PER_TICK)
            .min(policy.max_energy_per_tick),
        max_reserve: energy.max_reserve,
    };

    let preference = manifest.quarantine.clone().unwrap_or_default();
    let in_quarantine = !manifest.agent.kind.is_trusted()
        && (policy.quarantine_third_party || preference.required);
    let shard_id = if in_quarantine {
        preference.shard_id
    } else {
        None
    };

    GrantedCapabilities {
        capabilities,
        action_rate_limit,
        compute_budget_ms_per_tick,
        observation_budget,
        energy_budget,
        in_quarantine,
        shard_id,
    }
}
