pub mod actions;
pub mod admission;
pub mod config;
pub mod context;
pub mod host;
pub mod log;
pub mod manifest;
pub mod observation;
pub mod policy;
pub mod util;
pub mod version;

pub use habitat_sandbox_abi::{
    ActionRateLimit, ActionRejectionCode, ActionRequest, ActionResult, AgentIdentity, AgentStep,
    Capability, CellField, CompatConstraint, DegradedCell, DegradedObservation, EnergyBudget,
    ExecutionKind, FieldValue, GrantedCapabilities, Manifest, ObservationBudget,
    QuarantinePreference, RawCell, RequestedCapabilities, RequestedEnergyBudget,
    RequestedObservationBudget, StepError, StepErrorCode, StepExecution, StepFault, StepInput,
    StepOutput, MANIFEST_VERSION,
};
pub use habitat_sandbox_executor::{FixedStep, StepExecutor, StepExecutorConfig, StepSlot};

pub use actions::{process_actions, ActionBatchOutcome, ActionPricer, FlatPricer};
pub use admission::{admit, AdmissionRejection, AdmissionResult};
pub use config::{ConfigError, HabitatConfig, DEFAULT_CONFIG_FILE_NAME};
pub use context::{ActionWindowState, SandboxContext, WindowEntry};
pub use host::{
    run_agent_tick, AgentHost, AgentTickJob, HostError, Registration, TickInput, TickReport,
    TickSummary, DEFAULT_QUARANTINE_SHARD,
};
pub use log::{LogConfig, LogVerbosity, SandboxLog, SandboxLogEntry, SandboxLogKind};
pub use manifest::{
    load_manifest, manifest_from_value, validate_manifest, ValidationError, ValidationResult,
};
pub use observation::degrade;
pub use policy::{PolicyError, PolicyHandle, WorldPolicy};
pub use version::{compare_semver, SemVer};
