//! One candidate combination of discrete remedial actions.

use crate::linear::{optimize, IteratingLinearOptimizerInput, LinearOptimizationResult};
use crate::objective::ObjectiveFunction;
use crate::results::RangeActionActivation;
use crate::sensitivity::SensitivityProvider;
use rao_core::{Crac, FlowCnec, Network, RangeAction, State};
use std::collections::BTreeSet;
use tracing::debug;

/// A search-tree node: the discrete actions it activates plus its own
/// linear-optimization result. Leaves own their network copy, so sibling
/// evaluations never share mutable state.
#[derive(Debug, Clone)]
pub struct Leaf {
    /// Activated discrete actions, in activation order (parents first).
    pub activated_network_actions: Vec<String>,
    pub optimization: LinearOptimizationResult,
}

impl Leaf {
    pub fn cost(&self) -> f64 {
        self.optimization.cost()
    }

    /// Evaluate one action combination: apply the discrete actions on an
    /// owned network copy, recompute flows, then optimize range actions.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        base_network: &Network,
        oracle: &dyn SensitivityProvider,
        crac: &Crac,
        cnecs: &[FlowCnec],
        range_actions: &[RangeAction],
        objective: &ObjectiveFunction,
        ilo: &IteratingLinearOptimizerInput<'_>,
        pre_perimeter_setpoints: &RangeActionActivation,
        activated_network_actions: Vec<String>,
    ) -> Leaf {
        let mut network = base_network.clone();
        for id in &activated_network_actions {
            if let Some(action) = crac.network_action(id) {
                network.apply_network_action(action);
            }
        }

        let states: BTreeSet<State> = cnecs.iter().map(|c| c.state.clone()).collect();
        let output = oracle.run(&network, cnecs, range_actions, &states);
        let initial_objective = objective.evaluate(cnecs, &output, ilo.excluded_contingencies);
        debug!(
            actions = ?activated_network_actions,
            cost = initial_objective.cost(),
            "leaf evaluated before range-action optimization"
        );

        let optimization = optimize(
            &mut network,
            oracle,
            ilo,
            pre_perimeter_setpoints.clone(),
            output,
            initial_objective,
        );
        Leaf { activated_network_actions, optimization }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::build_fillers;
    use crate::params::RaoParameters;
    use crate::test_utils::{cnec, empty_crac, pst, LinearOracle};
    use rao_core::{ElementaryAction, NetworkAction, RaUsageLimits, UsageMethod, UsageRule};

    #[test]
    fn test_leaf_combines_topology_and_setpoints() {
        let mut crac = empty_crac();
        crac.flow_cnecs.push(cnec("cnec1", 80.0));
        crac.range_actions.push(pst("pst1"));
        crac.network_actions.push(NetworkAction {
            id: "open-line9".into(),
            name: "open line9".into(),
            operator: None,
            elementary_actions: vec![ElementaryAction::OpenBranch { element: "line9".into() }],
            usage_rules: vec![UsageRule::OnInstant {
                instant_id: "preventive".into(),
                method: UsageMethod::Available,
            }],
        });
        let oracle = LinearOracle::default()
            .with_flow("cnec1", 130.0)
            .with_sensitivity("cnec1", "pst1", 5.0)
            .with_open_effect("line9", "cnec1", -30.0);

        let parameters = RaoParameters::default();
        let network = Network::new("net");
        let states: BTreeSet<State> =
            crac.flow_cnecs.iter().map(|c| c.state.clone()).collect();
        let initial = oracle.run(&network, &crac.flow_cnecs, &crac.range_actions, &states);
        let objective = ObjectiveFunction::build(&crac.flow_cnecs, &initial, &parameters);
        let fillers = build_fillers(
            &parameters,
            &crac.flow_cnecs,
            &crac.range_actions,
            &initial,
            &initial,
            &BTreeSet::new(),
            &RaUsageLimits::default(),
        );
        let pre = RangeActionActivation::from_setpoints(&crac.range_actions, |_| 0.0);
        let excluded = BTreeSet::new();
        let ilo = IteratingLinearOptimizerInput {
            cnecs: &crac.flow_cnecs,
            range_actions: &crac.range_actions,
            objective: &objective,
            fillers: &fillers,
            pre_perimeter: &pre,
            excluded_contingencies: &excluded,
            parameters: &parameters.range_actions,
        };

        // Topology removes 30 MW, the PST handles the rest
        let leaf = Leaf::evaluate(
            &network,
            &oracle,
            &crac,
            &crac.flow_cnecs,
            &crac.range_actions,
            &objective,
            &ilo,
            &pre,
            vec!["open-line9".to_string()],
        );
        assert!(leaf.cost() < 0.0);
        assert_eq!(leaf.activated_network_actions, vec!["open-line9".to_string()]);
        assert!(leaf.optimization.activation.setpoint("pst1").unwrap() < 0.0);
    }
}
