//! Manifest validation.
//!
//! The document shape is described once, as a table of [`FieldRule`]s, and a
//! single interpreter walks it over untyped JSON. Every violation is reported
//! with its dotted path; validation never stops at the first problem. Only a
//! document that passes the table is converted into a typed [`Manifest`].

use habitat_sandbox_abi::{Capability, Manifest, MANIFEST_VERSION};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

use super::version::SemVer;

pub const MAX_AGENT_NAME_LEN: usize = 64;
pub const MAX_ENTRY_LEN: usize = 512;
pub const MAX_SHARD_ID_LEN: usize = 64;
const ROOT_PATH: &str = "$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    fn single(path: &str, message: impl Into<String>) -> Self {
        Self::from_errors(vec![ValidationError {
            path: path.to_string(),
            message: message.into(),
        }])
    }

    pub fn has_error_at(&self, path: &str) -> bool {
        self.errors.iter().any(|error| error.path == path)
    }
}

#[derive(Debug, Clone, Copy)]
enum TextPattern {
    Any,
    Identifier,
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Object,
    Bool,
    Literal(&'static str),
    OneOf(&'static [&'static str]),
    Text {
        max_len: usize,
        pattern: TextPattern,
    },
    Integer {
        min: u64,
        max: u64,
    },
    Number {
        min: f64,
        max: f64,
    },
    Version,
    CapabilityList,
}

/// `required` means required whenever the enclosing object is present.
#[derive(Debug, Clone, Copy)]
struct FieldRule {
    path: &'static str,
    kind: FieldKind,
    required: bool,
}

const fn required(path: &'static str, kind: FieldKind) -> FieldRule {
    FieldRule {
        path,
        kind,
        required: true,
    }
}

const fn optional(path: &'static str, kind: FieldKind) -> FieldRule {
    FieldRule {
        path,
        kind,
        required: false,
    }
}

const COUNT_MAX: u64 = u32::MAX as u64;

const MANIFEST_SCHEMA: &[FieldRule] = &[
    required("manifestVersion", FieldKind::Literal(MANIFEST_VERSION)),
    required("agent", FieldKind::Object),
    required(
        "agent.name",
        FieldKind::Text {
            max_len: MAX_AGENT_NAME_LEN,
            pattern: TextPattern::Identifier,
        },
    ),
    required("agent.kind", FieldKind::OneOf(&["WASM", "PROCESS", "BUILTIN"])),
    required(
        "agent.entry",
        FieldKind::Text {
            max_len: MAX_ENTRY_LEN,
            pattern: TextPattern::Any,
        },
    ),
    required("requested", FieldKind::Object),
    required("requested.capabilities", FieldKind::CapabilityList),
    optional("requested.rateLimit", FieldKind::Object),
    required(
        "requested.rateLimit.windowTicks",
        FieldKind::Integer {
            min: 1,
            max: COUNT_MAX,
        },
    ),
    required(
        "requested.rateLimit.max",
        FieldKind::Integer {
            min: 0,
            max: COUNT_MAX,
        },
    ),
    optional(
        "requested.computeBudgetMsPerTick",
        FieldKind::Integer { min: 1, max: 100 },
    ),
    optional("requested.observationBudget", FieldKind::Object),
    optional(
        "requested.observationBudget.maxCells",
        FieldKind::Integer {
            min: 0,
            max: COUNT_MAX,
        },
    ),
    optional(
        "requested.observationBudget.maxFields",
        FieldKind::Integer {
            min: 0,
            max: COUNT_MAX,
        },
    ),
    optional(
        "requested.observationBudget.noiseFloor",
        FieldKind::Number { min: 0.0, max: 1.0 },
    ),
    optional("requested.energyBudget", FieldKind::Object),
    optional(
        "requested.energyBudget.maxPerTick",
        FieldKind::Integer {
            min: 0,
            max: u64::MAX,
        },
    ),
    optional(
        "requested.energyBudget.maxReserve",
        FieldKind::Integer {
            min: 0,
            max: u64::MAX,
        },
    ),
    optional("defaults", FieldKind::Object),
    optional("compat", FieldKind::Object),
    optional("compat.minHabitatVersion", FieldKind::Version),
    optional("quarantine", FieldKind::Object),
    optional("quarantine.required", FieldKind::Bool),
    optional(
        "quarantine.shardId",
        FieldKind::Text {
            max_len: MAX_SHARD_ID_LEN,
            pattern: TextPattern::Identifier,
        },
    ),
];

fn is_identifier(text: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(text))
}

enum Lookup<'a> {
    Found(&'a JsonValue),
    Missing,
    ParentUnavailable,
}

fn lookup<'a>(root: &'a JsonValue, path: &str) -> Lookup<'a> {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        let Some(object) = current.as_object() else {
            return Lookup::ParentUnavailable;
        };
        match object.get(segment) {
            Some(value) => current = value,
            None if is_last => return Lookup::Missing,
            None => return Lookup::ParentUnavailable,
        }
    }
    Lookup::Found(current)
}

fn check_field(path: &str, kind: FieldKind, value: &JsonValue, errors: &mut Vec<ValidationError>) {
    if let FieldKind::CapabilityList = kind {
        check_capabilities(path, value, errors);
        return;
    }
    if let Some(message) = field_problem(kind, value) {
        push_error(errors, path, message);
    }
}

fn field_problem(kind: FieldKind, value: &JsonValue) -> Option<String> {
    match kind {
        FieldKind::Object => (!value.is_object()).then(|| "must be an object".to_string()),
        FieldKind::Bool => (!value.is_boolean()).then(|| "must be a boolean".to_string()),
        FieldKind::Literal(expected) => (value.as_str() != Some(expected))
            .then(|| format!("must be the string \"{expected}\"")),
        FieldKind::OneOf(allowed) => match value.as_str() {
            Some(text) if allowed.contains(&text) => None,
            _ => Some(format!("must be one of {}", allowed.join(", "))),
        },
        FieldKind::Text { max_len, pattern } => {
            let Some(text) = value.as_str() else {
                return Some("must be a string".to_string());
            };
            if text.trim().is_empty() {
                Some("must not be empty".to_string())
            } else if text.chars().count() > max_len {
                Some(format!("must be at most {max_len} characters"))
            } else if matches!(pattern, TextPattern::Identifier) && !is_identifier(text) {
                Some(
                    "must start with a letter and contain only letters, digits, '_' or '-'"
                        .to_string(),
                )
            } else {
                None
            }
        }
        FieldKind::Integer { min, max } => match value.as_u64() {
            Some(number) if number >= min && number <= max => None,
            _ => Some(format!("must be an integer within [{min}, {max}]")),
        },
        FieldKind::Number { min, max } => match value.as_f64() {
            Some(number) if number >= min && number <= max => None,
            _ => Some(format!("must be a number within [{min}, {max}]")),
        },
        FieldKind::Version => match value.as_str().and_then(SemVer::parse) {
            Some(_) => None,
            None => Some("must be a numeric major.minor.patch version".to_string()),
        },
        FieldKind::CapabilityList => None,
    }
}

fn check_capabilities(path: &str, value: &JsonValue, errors: &mut Vec<ValidationError>) {
    let Some(items) = value.as_array() else {
        push_error(errors, path, "must be an array of capabilities");
        return;
    };
    if items.is_empty() {
        push_error(errors, path, "must request at least one capability");
        return;
    }
    for (index, item) in items.iter().enumerate() {
        if item.as_str().and_then(Capability::parse).is_none() {
            push_error(
                errors,
                &format!("{path}[{index}]"),
                format!(
                    "unknown capability {item}; expected one of {}",
                    Capability::variants().join(", ")
                ),
            );
        }
    }
}

fn push_error(errors: &mut Vec<ValidationError>, path: &str, message: impl Into<String>) {
    errors.push(ValidationError {
        path: path.to_string(),
        message: message.into(),
    });
}

/// Checks an arbitrary JSON value against the manifest schema.
pub fn validate_manifest(document: &JsonValue) -> ValidationResult {
    if !document.is_object() {
        return ValidationResult::single(ROOT_PATH, "manifest must be a JSON object");
    }
    let mut errors = Vec::new();
    for rule in MANIFEST_SCHEMA {
        match lookup(document, rule.path) {
            Lookup::Found(value) => check_field(rule.path, rule.kind, value, &mut errors),
            Lookup::Missing if rule.required => push_error(&mut errors, rule.path, "is required"),
            Lookup::Missing | Lookup::ParentUnavailable => {}
        }
    }
    ValidationResult::from_errors(errors)
}

/// Validates a JSON value and converts it into a typed manifest.
pub fn manifest_from_value(document: JsonValue) -> Result<Manifest, ValidationResult> {
    let result = validate_manifest(&document);
    if !result.valid {
        return Err(result);
    }
    serde_json::from_value(document)
        .map_err(|err| ValidationResult::single(ROOT_PATH, format!("manifest malformed: {err}")))
}

/// Parses and validates a serialized manifest. Parse failures and schema
/// failures come back in the same [`ValidationResult`] shape.
pub fn load_manifest(text: &str) -> Result<Manifest, ValidationResult> {
    let document: JsonValue = serde_json::from_str(text)
        .map_err(|err| ValidationResult::single(ROOT_PATH, format!("invalid JSON: {err}")))?;
    manifest_from_value(document)
}
