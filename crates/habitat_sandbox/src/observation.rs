//! Observation degrader.

use habitat_sandbox_abi::{
    CellField, DegradedCell, DegradedObservation, FieldValue, ObservationBudget, RawCell,
};
use rand::Rng;

fn saturating_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Caps and noises a snapshot of true cells.
///
/// Cells and fields are kept in input order; callers sort by relevance first.
/// Each retained cell draws one factor in `[1 - noise_floor, 1 + noise_floor]`
/// and applies it to all of its numeric fields. A zero noise floor yields the
/// exact values.
pub fn degrade<R: Rng>(
    raw_cells: &[RawCell],
    budget: &ObservationBudget,
    rng: &mut R,
) -> DegradedObservation {
    let noise_floor = if budget.noise_floor.is_finite() {
        budget.noise_floor.clamp(0.0, 1.0)
    } else {
        1.0
    };
    let max_cells = usize::try_from(budget.max_cells).unwrap_or(usize::MAX);
    let max_fields = usize::try_from(budget.max_fields).unwrap_or(usize::MAX);

    let mut fields_omitted: u32 = 0;
    let cells = raw_cells
        .iter()
        .take(max_cells)
        .map(|cell| {
            let noise_factor = if noise_floor > 0.0 {
                rng.gen_range((1.0 - noise_floor)..=(1.0 + noise_floor))
            } else {
                1.0
            };
            let dropped = cell.fields.len().saturating_sub(max_fields);
            fields_omitted = fields_omitted.saturating_add(saturating_u32(dropped));
            DegradedCell {
                cell_id: cell.cell_id.clone(),
                fields: cell
                    .fields
                    .iter()
                    .take(max_fields)
                    .map(|field| apply_noise(field, noise_factor))
                    .collect(),
                noise_factor,
            }
        })
        .collect();

    DegradedObservation {
        cells,
        cells_omitted: saturating_u32(raw_cells.len().saturating_sub(max_cells)),
        fields_omitted,
        noise_floor,
    }
}

fn apply_noise(field: &CellField, factor: f64) -> CellField {
    let value = match &field.value {
        FieldValue::Number(value) => FieldValue::Number(value * factor),
        other => other.clone(),
    };
    CellField {
        name: field.name.clone(),
        value,
    }
}
