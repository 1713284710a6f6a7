mod common;

use habitat_sandbox::{
    admit, load_manifest, process_actions, ActionRejectionCode, ActionRequest, Capability,
    FlatPricer, ObservationBudget, WorldPolicy,
};
use serde_json::json;

#[test]
fn observation_budget_is_clamped_by_policy_ceiling() {
    let manifest = load_manifest(
        &json!({
            "manifestVersion": "1.0",
            "agent": {"name": "watcher", "kind": "WASM", "entry": "watcher.wasm"},
            "requested": {
                "capabilities": ["MOVE", "SENSE"],
                "observationBudget": {"maxCells": 25, "noiseFloor": 0.05}
            }
        })
        .to_string(),
    )
    .unwrap();
    let policy = WorldPolicy {
        max_observation_cells: 9,
        min_observation_noise: 0.2,
        ..WorldPolicy::default()
    };
    let result = admit(&manifest, &policy);
    assert!(result.admitted);
    let budget = result.granted.unwrap().observation_budget;
    assert_eq!(
        (budget.max_cells, budget.noise_floor),
        (9, 0.2),
        "granted {budget:?}"
    );
    assert_ne!(
        budget,
        ObservationBudget {
            max_cells: 25,
            max_fields: budget.max_fields,
            noise_floor: 0.05
        }
    );
}

#[test]
fn second_action_inside_long_window_is_rate_limited() {
    let mut context = common::context(vec![Capability::Move], 200, 1);
    context.window.record(100, Capability::Move);
    let actions = vec![ActionRequest::new(Capability::Move, json!({"dx": 1}))];
    let outcome = process_actions(&actions, &context, 101, 100, &FlatPricer(1));
    assert_eq!(
        outcome.results[0].rejection,
        Some(ActionRejectionCode::RateLimitExceeded)
    );
    assert!(!outcome.results[0].executed);
    assert_eq!(outcome.total_cost, 0);
    assert_eq!(outcome.updated_window.count(), 1);
}

#[test]
fn third_move_runs_out_of_energy() {
    let context = common::context(vec![Capability::Move], 1, 10);
    let actions = vec![ActionRequest::new(Capability::Move, json!({})); 3];
    let outcome = process_actions(&actions, &context, 1, 5, &FlatPricer(2));
    let executed: Vec<bool> = outcome.results.iter().map(|result| result.executed).collect();
    assert_eq!(executed, vec![true, true, false]);
    assert_eq!(
        outcome.results[2].rejection,
        Some(ActionRejectionCode::InsufficientEnergy)
    );
    assert_eq!(outcome.total_cost, 4);
}

#[test]
fn malformed_manifest_reports_all_paths() {
    let result = load_manifest(
        &json!({
            "manifestVersion": "1.0",
            "agent": {"name": "x y", "kind": "WASM", "entry": ""},
            "requested": {"capabilities": [], "computeBudgetMsPerTick": 0}
        })
        .to_string(),
    )
    .unwrap_err();
    assert!(!result.valid);
    for path in [
        "agent.name",
        "agent.entry",
        "requested.capabilities",
        "requested.computeBudgetMsPerTick",
    ] {
        assert!(result.has_error_at(path), "missing {path}: {:?}", result.errors);
    }
}
