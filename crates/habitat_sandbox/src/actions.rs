//! Action processor: the single enforcement point for capability, rate and
//! energy checks on the actions a step proposes.

use habitat_sandbox_abi::{ActionRejectionCode, ActionRequest, ActionResult};
use serde::{Deserialize, Serialize};

use super::context::{ActionWindowState, SandboxContext};

/// Prices an action in energy units. Supplied by the host's world physics;
/// expected to be deterministic and free of side effects.
pub trait ActionPricer {
    fn price(&self, action: &ActionRequest) -> u64;
}

impl<F> ActionPricer for F
where
    F: Fn(&ActionRequest) -> u64,
{
    fn price(&self, action: &ActionRequest) -> u64 {
        self(action)
    }
}

/// Charges every action the same amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatPricer(pub u64);

impl ActionPricer for FlatPricer {
    fn price(&self, _action: &ActionRequest) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionBatchOutcome {
    pub results: Vec<ActionResult>,
    pub total_cost: u64,
    pub updated_window: ActionWindowState,
    pub remaining_energy: u64,
}

impl ActionBatchOutcome {
    pub fn executed_count(&self) -> usize {
        self.results.iter().filter(|result| result.executed).count()
    }
}

/// Processes `actions` in order against the context's grant.
///
/// Checks run capability, rate, price, energy; a rejection only affects its
/// own action. Energy is checked against the running remainder, so each
/// action sees the deductions of the ones before it. The context is not
/// modified; the caller applies `updated_window` and `total_cost`.
pub fn process_actions<P: ActionPricer + ?Sized>(
    actions: &[ActionRequest],
    context: &SandboxContext,
    tick: u64,
    current_energy: u64,
    pricer: &P,
) -> ActionBatchOutcome {
    let limit = context.granted.action_rate_limit;
    let mut window = context.window.recompute(tick, &limit);
    let mut remaining_energy = current_energy;
    let mut total_cost: u64 = 0;
    let mut results = Vec::with_capacity(actions.len());

    for action in actions {
        let capability = match action.parsed_capability() {
            Some(capability) if context.granted.allows(capability) => capability,
            _ => {
                results.push(ActionResult::rejected(
                    action.capability.clone(),
                    ActionRejectionCode::CapabilityNotGranted,
                ));
                continue;
            }
        };
        if window.is_limited(&limit) {
            results.push(ActionResult::rejected(
                action.capability.clone(),
                ActionRejectionCode::RateLimitExceeded,
            ));
            continue;
        }
        let cost = pricer.price(action);
        if cost > remaining_energy {
            results.push(ActionResult::rejected(
                action.capability.clone(),
                ActionRejectionCode::InsufficientEnergy,
            ));
            continue;
        }
        remaining_energy -= cost;
        total_cost = total_cost.saturating_add(cost);
        window.record(tick, capability);
        results.push(ActionResult::executed(action.capability.clone(), cost));
    }

    ActionBatchOutcome {
        results,
        total_cost,
        updated_window: window,
        remaining_energy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use habitat_sandbox_abi::{
        ActionRateLimit, Capability, EnergyBudget, GrantedCapabilities, ObservationBudget,
    };
    use serde_json::json;

    fn context(capabilities: Vec<Capability>, window_ticks: u64, max: u32) -> SandboxContext {
        SandboxContext::new(
            "agent-1",
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
            },
        )
    }

    fn codes(outcome: &ActionBatchOutcome) -> Vec<Option<ActionRejectionCode>> {
        outcome.results.iter().map(|result| result.rejection).collect()
    }

    #[test]
    fn running_energy_rejects_third_move() {
        let ctx = context(vec![Capability::Move], 1, 10);
        let actions = vec![ActionRequest::new(Capability::Move, json!({})); 3];
        let outcome = process_actions(&actions, &ctx, 1, 5, &FlatPricer(2));
        assert_eq!(
            codes(&outcome),
            vec![None, None, Some(ActionRejectionCode::InsufficientEnergy)]
        );
        assert_eq!(outcome.total_cost, 4);
        assert_eq!(outcome.remaining_energy, 1);
        assert_eq!(outcome.results[2].energy_cost, 0);
        assert_eq!(outcome.updated_window.count(), 2);
    }

    #[test]
    fn window_history_blocks_new_action() {
        let mut ctx = context(vec![Capability::Move], 200, 1);
        ctx.window.record(100, Capability::Move);
        let actions = vec![ActionRequest::new(Capability::Move, json!({}))];
        let outcome = process_actions(&actions, &ctx, 101, 50, &FlatPricer(1));
        assert_eq!(
            codes(&outcome),
            vec![Some(ActionRejectionCode::RateLimitExceeded)]
        );
        assert_eq!(outcome.total_cost, 0);
    }

    #[test]
    fn rejection_does_not_abort_batch() {
        let ctx = context(vec![Capability::Move], 1, 10);
        let actions = vec![
            ActionRequest::new(Capability::Sense, json!({})),
            ActionRequest {
                capability: "SELF_DESTRUCT".to_string(),
                params: json!({}),
            },
            ActionRequest::new(Capability::Move, json!({})),
        ];
        let outcome = process_actions(&actions, &ctx, 1, 10, &FlatPricer(3));
        assert_eq!(
            codes(&outcome),
            vec![
                Some(ActionRejectionCode::CapabilityNotGranted),
                Some(ActionRejectionCode::CapabilityNotGranted),
                None,
            ]
        );
        assert_eq!(outcome.total_cost, 3);
    }

    #[test]
    fn ungranted_action_is_never_priced() {
        let ctx = context(vec![Capability::Move], 1, 10);
        let actions = vec![ActionRequest::new(Capability::ProposePact, json!({}))];
        let pricer = |_: &ActionRequest| -> u64 { panic!("must not price ungranted action") };
        let outcome = process_actions(&actions, &ctx, 1, 10, &pricer);
        assert_eq!(outcome.executed_count(), 0);
    }

    #[test]
    fn adversarial_params_have_no_effect() {
        let ctx = context(vec![Capability::Move], 1, 1);
        let plain = vec![ActionRequest::new(Capability::Move, json!({})); 3];
        let hostile = vec![
            ActionRequest::new(
                Capability::Move,
                json!({"refundEnergy": 1000, "bypassRateLimit": true, "grant": ["PROPOSE_PACT"]}),
            );
            3
        ];
        let pricer = FlatPricer(2);
        let expected = process_actions(&plain, &ctx, 4, 3, &pricer);
        let actual = process_actions(&hostile, &ctx, 4, 3, &pricer);
        assert_eq!(codes(&expected), codes(&actual));
        assert_eq!(expected.total_cost, actual.total_cost);
        assert_eq!(expected.updated_window, actual.updated_window);
    }

    #[test]
    fn stale_window_entries_are_evicted_before_checking() {
        let mut ctx = context(vec![Capability::Inquiry], 5, 1);
        ctx.window.record(1, Capability::Inquiry);
        let actions = vec![ActionRequest::new(Capability::Inquiry, json!({}))];
        let outcome = process_actions(&actions, &ctx, 10, 5, &FlatPricer(0));
        assert_eq!(codes(&outcome), vec![None]);
        assert_eq!(outcome.updated_window.window_start, 5);
        assert_eq!(outcome.updated_window.count(), 1);
        assert_eq!(outcome.updated_window.actions[0].tick, 10);
    }
}
