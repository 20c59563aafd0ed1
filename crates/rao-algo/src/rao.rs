//! Top-level optimization run: decomposition, preventive perimeter, then
//! every contingency scenario.

use crate::linear::build_fillers;
use crate::objective::ObjectiveFunction;
use crate::params::{RaoParameters, TreeParameters};
use crate::results::{PerimeterResult, PrePerimeterResult, RangeActionActivation, RaoRunResult};
use crate::search_tree::{SearchTree, SearchTreeInput};
use crate::sensitivity::{SensitivityComputer, SensitivityOutput, SensitivityProvider};
use crate::state_tree::{Perimeter, StateTree};
use rao_core::{Crac, FlowCnec, Network, NetworkAction, RangeAction, RaoResult};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, info_span};

/// Immutable inputs of one optimization run.
pub struct RaoInput<'a> {
    pub crac: &'a Crac,
    pub network: &'a Network,
    pub oracle: &'a dyn SensitivityProvider,
}

/// Optimize every perimeter of the catalog.
///
/// Fatal errors are configuration-time only (catalog invariants, perimeter
/// shape). Solver and sensitivity failures during optimization degrade the
/// affected perimeter's result instead of failing the run, so callers always
/// get a usable remedial-action set.
pub fn run(input: &RaoInput<'_>, parameters: &RaoParameters) -> RaoResult<RaoRunResult> {
    input.crac.validate()?;
    let tree = StateTree::build(input.crac)?;

    let mut network = input.network.clone();
    let all_cnecs = input.crac.flow_cnecs.clone();
    let all_range_actions = input.crac.range_actions.clone();
    let initial_output = SensitivityComputer::compute(
        &mut network,
        input.oracle,
        input.crac,
        &all_cnecs,
        &all_range_actions,
        &Default::default(),
    );
    let initial_objective = ObjectiveFunction::build(&all_cnecs, &initial_output, parameters)
        .evaluate(&all_cnecs, &initial_output, &BTreeSet::new());
    info!(cost = initial_objective.cost(), "initial situation evaluated");

    let preventive = {
        let _span = info_span!("preventive").entered();
        optimize_perimeter(
            &mut network,
            input,
            parameters,
            &tree.preventive_perimeter,
            &TreeParameters::for_preventive(parameters),
            &initial_output,
            &BTreeSet::new(),
        )
    };
    info!(cost = preventive.cost(), "preventive perimeter optimized");

    let mut post_contingency = BTreeMap::new();
    for scenario in &tree.contingency_scenarios {
        let _span = info_span!("scenario", contingency = %scenario.contingency_id).entered();
        // Each scenario works on its own copy of the post-preventive
        // network, so curative decisions never leak across contingencies
        let mut scenario_network = network.clone();

        if let Some(perimeter) = &scenario.automaton_perimeter {
            let result = optimize_perimeter(
                &mut scenario_network,
                input,
                parameters,
                perimeter,
                &TreeParameters::for_automaton(parameters),
                &initial_output,
                &BTreeSet::new(),
            );
            post_contingency.insert(perimeter.optimization_state.clone(), result);
        }

        for perimeter in &scenario.curative_perimeters {
            let result = optimize_perimeter(
                &mut scenario_network,
                input,
                parameters,
                perimeter,
                &TreeParameters::for_curative(parameters, preventive.cost()),
                &initial_output,
                &tree.operators_not_sharing_cras,
            );
            post_contingency.insert(perimeter.optimization_state.clone(), result);
        }
    }

    Ok(RaoRunResult {
        initial_cost: initial_objective.cost(),
        preventive,
        post_contingency,
        operators_not_sharing_cras: tree.operators_not_sharing_cras,
    })
}

/// Optimize one perimeter on `network` and apply its decisions there.
fn optimize_perimeter(
    network: &mut Network,
    input: &RaoInput<'_>,
    parameters: &RaoParameters,
    perimeter: &Perimeter,
    tree_parameters: &TreeParameters,
    anchor_output: &SensitivityOutput,
    operators_not_sharing_cras: &BTreeSet<String>,
) -> PerimeterResult {
    let crac = input.crac;
    let state = &perimeter.optimization_state;
    let cnecs: Vec<FlowCnec> = perimeter
        .all_states()
        .iter()
        .flat_map(|s| crac.cnecs_of_state(s))
        .cloned()
        .collect();
    let range_actions: Vec<RangeAction> = crac
        .potentially_available_range_actions(state)
        .into_iter()
        .cloned()
        .collect();
    let network_actions: Vec<NetworkAction> = crac
        .potentially_available_network_actions(state)
        .into_iter()
        .cloned()
        .collect();

    let objective = ObjectiveFunction::build(&cnecs, anchor_output, parameters);
    let excluded = BTreeSet::new();
    let pre = {
        let output = SensitivityComputer::compute(
            network,
            input.oracle,
            crac,
            &cnecs,
            &range_actions,
            &Default::default(),
        );
        let setpoints = RangeActionActivation::from_setpoints(&range_actions, |ra| {
            network
                .setpoint(&ra.network_element)
                .unwrap_or((ra.min_setpoint + ra.max_setpoint) / 2.0)
        });
        let objective = objective.evaluate(&cnecs, &output, &excluded);
        PrePerimeterResult { output, setpoints, objective }
    };
    let fillers = build_fillers(
        parameters,
        &cnecs,
        &range_actions,
        anchor_output,
        &pre.output,
        operators_not_sharing_cras,
        &crac.usage_limits(&state.instant.id),
    );

    let search = SearchTreeInput {
        crac,
        network,
        optimization_state: state,
        cnecs: &cnecs,
        range_actions: &range_actions,
        network_actions: &network_actions,
        objective: &objective,
        fillers: &fillers,
        pre_perimeter_setpoints: &pre.setpoints,
        pre_perimeter_cost: pre.cost(),
        excluded_contingencies: &excluded,
        tree_parameters,
        parameters,
    };
    let result = SearchTree::run(&search, input.oracle);
    apply_result(network, crac, &result);
    result
}

/// Record a perimeter's decisions on the working variant, so later
/// perimeters inherit them.
fn apply_result(network: &mut Network, crac: &Crac, result: &PerimeterResult) {
    for id in &result.activated_network_actions {
        if let Some(action) = crac.network_action(id) {
            network.apply_network_action(action);
        }
    }
    for (id, setpoint) in result.activation.setpoints() {
        if let Some(action) = crac.range_action(id) {
            network.apply_range_action(action, setpoint);
        }
    }
}
