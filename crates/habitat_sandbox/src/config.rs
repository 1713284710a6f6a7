use habitat_sandbox_executor::StepExecutorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::log::{LogConfig, LogVerbosity};
use super::policy::{PolicyError, WorldPolicy};

pub const ENV_HABITAT_VERSION: &str = "HABITAT_VERSION";
pub const ENV_QUARANTINE_THIRD_PARTY: &str = "HABITAT_QUARANTINE_THIRD_PARTY";
pub const ENV_MAX_COMPUTE_MS: &str = "HABITAT_MAX_COMPUTE_MS";
pub const ENV_SCHEDULING_OVERHEAD_MS: &str = "HABITAT_SCHEDULING_OVERHEAD_MS";
pub const ENV_LOG_VERBOSITY: &str = "HABITAT_LOG_VERBOSITY";

pub const DEFAULT_CONFIG_FILE_NAME: &str = "habitat.toml";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("read config file failed ({path}): {message}")]
    ReadConfigFile { path: String, message: String },
    #[error("parse config file failed ({path}): {message}")]
    ParseConfigFile { path: String, message: String },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Process configuration: the policy ceiling, executor tuning and logging.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HabitatConfig {
    pub policy: WorldPolicy,
    pub executor: StepExecutorConfig,
    pub log: LogConfig,
}

impl HabitatConfig {
    /// Reads `habitat.toml` from the working directory when present, then
    /// applies environment overrides.
    pub fn from_default_sources() -> Result<Self, ConfigError> {
        let config_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
        if config_path.exists() {
            return Self::from_config_file(config_path);
        }
        Self::from_env()
    }

    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigError::ReadConfigFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let config = Self::from_toml_str(&content).map_err(|err| match err {
            ConfigError::ParseConfigFile { message, .. } => ConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Parses a TOML document without consulting the environment.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::ParseConfigFile {
            path: "<inline>".to_string(),
            message: err.to_string(),
        })?;
        config.policy.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides<F>(mut self, mut getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(value) = non_empty(&mut getter, ENV_HABITAT_VERSION) {
            self.policy.habitat_version = value;
        }
        if let Some(value) = non_empty(&mut getter, ENV_QUARANTINE_THIRD_PARTY) {
            self.policy.quarantine_third_party = parse_bool(ENV_QUARANTINE_THIRD_PARTY, value)?;
        }
        if let Some(value) = non_empty(&mut getter, ENV_MAX_COMPUTE_MS) {
            self.policy.max_compute_ms_per_tick = parse_u64(ENV_MAX_COMPUTE_MS, value)?;
        }
        if let Some(value) = non_empty(&mut getter, ENV_SCHEDULING_OVERHEAD_MS) {
            self.executor.scheduling_overhead_ms = parse_u64(ENV_SCHEDULING_OVERHEAD_MS, value)?;
        }
        if let Some(value) = non_empty(&mut getter, ENV_LOG_VERBOSITY) {
            self.log.verbosity =
                LogVerbosity::parse(&value).ok_or(ConfigError::InvalidEnv {
                    key: ENV_LOG_VERBOSITY,
                    value,
                })?;
        }
        self.policy.validate()?;
        Ok(self)
    }
}

fn non_empty<F>(getter: &mut F, key: &str) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    getter(key).filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use habitat_sandbox_abi::Capability;
    use std::collections::BTreeMap;

    fn getter(pairs: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let vars: BTreeMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(HabitatConfig::from_toml_str("").unwrap(), HabitatConfig::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = HabitatConfig::from_toml_str(
            r#"
            [policy]
            max_capabilities = ["SENSE"]
            quarantine_third_party = true
            habitat_version = "1.4.2"

            [executor]
            scheduling_overhead_ms = 12

            [log]
            verbosity = "verbose"
            retained_entries = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.policy.max_capabilities, vec![Capability::Sense]);
        assert!(config.policy.quarantine_third_party);
        assert_eq!(config.executor.scheduling_overhead_ms, 12);
        assert_eq!(config.executor.max_actions_per_step, 256);
        assert_eq!(config.log.verbosity, LogVerbosity::Verbose);
        assert_eq!(config.log.retained_entries, 16);
    }

    #[test]
    fn invalid_policy_in_file_is_rejected() {
        let err = HabitatConfig::from_toml_str("[policy]\nmin_observation_noise = 2.0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Policy(PolicyError::NoiseFloorOutOfRange { .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = HabitatConfig::from_toml_str("[policy\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseConfigFile { .. }));
    }

    #[test]
    fn env_overrides_apply_on_top_of_file() {
        let config = HabitatConfig::default()
            .with_env_overrides(getter(&[
                (ENV_HABITAT_VERSION, "2.0.0"),
                (ENV_QUARANTINE_THIRD_PARTY, "true"),
                (ENV_MAX_COMPUTE_MS, "20"),
                (ENV_SCHEDULING_OVERHEAD_MS, "9"),
                (ENV_LOG_VERBOSITY, "quiet"),
            ]))
            .unwrap();
        assert_eq!(config.policy.habitat_version, "2.0.0");
        assert!(config.policy.quarantine_third_party);
        assert_eq!(config.policy.max_compute_ms_per_tick, 20);
        assert_eq!(config.executor.scheduling_overhead_ms, 9);
        assert_eq!(config.log.verbosity, LogVerbosity::Quiet);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config = HabitatConfig::default()
            .with_env_overrides(getter(&[(ENV_HABITAT_VERSION, "  ")]))
            .unwrap();
        assert_eq!(config, HabitatConfig::default());
    }

    #[test]
    fn bad_env_values_are_reported() {
        let err = HabitatConfig::default()
            .with_env_overrides(getter(&[(ENV_MAX_COMPUTE_MS, "fast")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                key: ENV_MAX_COMPUTE_MS,
                value: "fast".to_string()
            }
        );

        let err = HabitatConfig::default()
            .with_env_overrides(getter(&[(ENV_MAX_COMPUTE_MS, "500")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Policy(_)));

        let err = HabitatConfig::default()
            .with_env_overrides(getter(&[(ENV_QUARANTINE_THIRD_PARTY, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let err = HabitatConfig::from_config_file(Path::new("/nonexistent/habitat.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadConfigFile { .. }));
    }
}
