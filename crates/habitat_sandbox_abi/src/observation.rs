//! Sensory snapshot types: true cells supplied by the host, degraded cells handed to agents.

use serde::{Deserialize, Serialize};

/// A single observable value. Only `Number` is subject to noise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellField {
    pub name: String,
    pub value: FieldValue,
}

impl CellField {
    pub fn number(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Number(value),
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Text(value.into()),
        }
    }
}

/// A cell of true world state. Fields are an ordered list: truncation keeps the
/// first `maxFields` entries in this order, so callers sort by relevance first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCell {
    pub cell_id: String,
    #[serde(default)]
    pub fields: Vec<CellField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedCell {
    pub cell_id: String,
    pub fields: Vec<CellField>,
    /// Multiplicative factor applied to every numeric field of this cell.
    pub noise_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedObservation {
    pub cells: Vec<DegradedCell>,
    /// Cells dropped because the snapshot exceeded `maxCells`.
    pub cells_omitted: u32,
    /// Fields dropped from retained cells because they exceeded `maxFields`.
    pub fields_omitted: u32,
    pub noise_floor: f64,
}

impl DegradedObservation {
    pub fn empty(noise_floor: f64) -> Self {
        Self {
            cells: Vec::new(),
            cells_omitted: 0,
            fields_omitted: 0,
            noise_floor,
        }
    }
}
