//! World policy: the absolute ceilings on what any agent may be granted.

use habitat_sandbox_abi::{ActionRateLimit, Capability};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use super::version::SemVer;

pub const DEFAULT_HABITAT_VERSION: &str = "1.0.0";
pub const MIN_COMPUTE_BUDGET_MS: u64 = 1;
pub const MAX_COMPUTE_BUDGET_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("habitat_version is not a numeric major.minor.patch version: {version}")]
    InvalidHabitatVersion { version: String },
    #[error("min_observation_noise must be within [0, 1], got {value}")]
    NoiseFloorOutOfRange { value: f64 },
    #[error("max_action_rate.window_ticks must be at least 1")]
    ZeroRateWindow,
    #[error("max_compute_ms_per_tick must be within [1, 100], got {value}")]
    ComputeCeilingOutOfRange { value: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldPolicy {
    pub max_capabilities: Vec<Capability>,
    #[serde(with = "snake_case_rate")]
    pub max_action_rate: ActionRateLimit,
    pub max_compute_ms_per_tick: u64,
    pub min_observation_noise: f64,
    pub max_observation_cells: u32,
    pub max_energy_per_tick: u64,
    /// Forces every non-builtin agent into quarantine.
    pub quarantine_third_party: bool,
    pub habitat_version: String,
}

impl Default for WorldPolicy {
    fn default() -> Self {
        Self {
            max_capabilities: Capability::ALL.to_vec(),
            max_action_rate: ActionRateLimit {
                window_ticks: 1,
                max: 4,
            },
            max_compute_ms_per_tick: 50,
            min_observation_noise: 0.05,
            max_observation_cells: 25,
            max_energy_per_tick: 100,
            quarantine_third_party: false,
            habitat_version: DEFAULT_HABITAT_VERSION.to_string(),
        }
    }
}

/// Keeps the rate ceiling snake_case inside configuration files, while manifests
/// and grants carry the camelCase wire form.
mod snake_case_rate {
    use habitat_sandbox_abi::ActionRateLimit;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct RateCeiling {
        #[serde(alias = "windowTicks")]
        window_ticks: u64,
        max: u32,
    }

    pub fn serialize<S: Serializer>(rate: &ActionRateLimit, serializer: S) -> Result<S::Ok, S::Error> {
        RateCeiling {
            window_ticks: rate.window_ticks,
            max: rate.max,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ActionRateLimit, D::Error> {
        let ceiling = RateCeiling::deserialize(deserializer)?;
        Ok(ActionRateLimit {
            window_ticks: ceiling.window_ticks,
            max: ceiling.max,
        })
    }
}

impl WorldPolicy {
    pub fn allows(&self, capability: Capability) -> bool {
        self.max_capabilities.contains(&capability)
    }

    pub fn parsed_version(&self) -> Option<SemVer> {
        SemVer::parse(&self.habitat_version)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.parsed_version().is_none() {
            return Err(PolicyError::InvalidHabitatVersion {
                version: self.habitat_version.clone(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_observation_noise) {
            return Err(PolicyError::NoiseFloorOutOfRange {
                value: self.min_observation_noise,
            });
        }
        if self.max_action_rate.window_ticks == 0 {
            return Err(PolicyError::ZeroRateWindow);
        }
        if !(MIN_COMPUTE_BUDGET_MS..=MAX_COMPUTE_BUDGET_MS).contains(&self.max_compute_ms_per_tick)
        {
            return Err(PolicyError::ComputeCeilingOutOfRange {
                value: self.max_compute_ms_per_tick,
            });
        }
        Ok(())
    }
}

/// Shared, swappable policy. Readers always get a whole snapshot; a swap
/// replaces the snapshot atomically and never edits one in place.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    current: Arc<RwLock<Arc<WorldPolicy>>>,
}

impl PolicyHandle {
    pub fn new(policy: WorldPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(policy))),
        })
    }

    pub fn snapshot(&self) -> Arc<WorldPolicy> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs a new policy and returns the one it replaced.
    pub fn swap(&self, policy: WorldPolicy) -> Result<Arc<WorldPolicy>, PolicyError> {
        policy.validate()?;
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::replace(&mut *guard, Arc::new(policy)))
    }
}
