//! Greedy combinatorial search over discrete remedial actions.
//!
//! One tree per perimeter. The root activates only forced actions; each
//! depth adds exactly one more available action to the best-known
//! combination, evaluating sibling candidates in parallel and keeping a
//! child only on strict, sufficient improvement. Every leaf runs the full
//! iterating linear optimizer, so discrete and continuous actions are
//! co-optimized.

pub mod leaf;

pub use leaf::Leaf;

use crate::linear::{IteratingLinearOptimizerInput, ProblemFiller};
use crate::objective::ObjectiveFunction;
use crate::params::{RaoParameters, StopCriterion, TreeParameters};
use crate::results::{PerimeterResult, RangeActionActivation};
use crate::sensitivity::SensitivityProvider;
use rao_core::{Crac, FlowCnec, Network, NetworkAction, RangeAction, State, UsageMethod};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Everything one search-tree run needs.
pub struct SearchTreeInput<'a> {
    pub crac: &'a Crac,
    /// Perimeter entry network: earlier perimeters' decisions applied.
    pub network: &'a Network,
    pub optimization_state: &'a State,
    pub cnecs: &'a [FlowCnec],
    pub range_actions: &'a [RangeAction],
    /// Discrete actions not excluded at the optimization state.
    pub network_actions: &'a [NetworkAction],
    pub objective: &'a ObjectiveFunction,
    pub fillers: &'a [ProblemFiller],
    pub pre_perimeter_setpoints: &'a RangeActionActivation,
    pub pre_perimeter_cost: f64,
    pub excluded_contingencies: &'a BTreeSet<String>,
    pub tree_parameters: &'a TreeParameters,
    pub parameters: &'a RaoParameters,
}

pub struct SearchTree;

impl SearchTree {
    /// Explore the combination tree and return the perimeter's result.
    pub fn run(input: &SearchTreeInput<'_>, oracle: &dyn SensitivityProvider) -> PerimeterResult {
        let ilo = IteratingLinearOptimizerInput {
            cnecs: input.cnecs,
            range_actions: input.range_actions,
            objective: input.objective,
            fillers: input.fillers,
            pre_perimeter: input.pre_perimeter_setpoints,
            excluded_contingencies: input.excluded_contingencies,
            parameters: &input.parameters.range_actions,
        };

        let forced: Vec<String> = input
            .network_actions
            .iter()
            .filter(|a| a.usage_method(input.optimization_state) == UsageMethod::Forced)
            .map(|a| a.id.clone())
            .collect();
        if !forced.is_empty() {
            info!(state = %input.optimization_state, actions = ?forced, "applying forced actions");
        }

        let mut best = Leaf::evaluate(
            input.network,
            oracle,
            input.crac,
            input.cnecs,
            input.range_actions,
            input.objective,
            &ilo,
            input.pre_perimeter_setpoints,
            forced,
        );
        debug!(cost = best.cost(), "root leaf evaluated");

        for depth in 1..=input.tree_parameters.maximum_search_depth {
            if stop_reached(input.tree_parameters.stop_criterion, best.cost()) {
                info!(depth, cost = best.cost(), "stop criterion reached");
                break;
            }
            let candidates = Self::candidates(input, &best);
            if candidates.is_empty() {
                debug!(depth, "no remaining usable action");
                break;
            }

            let children = Self::evaluate_candidates(input, oracle, &ilo, &best, &candidates);
            // Deterministic reduction: best cost first, then smallest added
            // action id, independent of completion order
            let Some(child) = children.into_iter().min_by(|a, b| {
                a.cost()
                    .total_cmp(&b.cost())
                    .then_with(|| a.activated_network_actions.cmp(&b.activated_network_actions))
            }) else {
                break;
            };

            let improvement = best.cost() - child.cost();
            let required = input
                .parameters
                .topo
                .absolute_min_impact_threshold
                .max(input.parameters.topo.relative_min_impact_threshold * best.cost().abs());
            if improvement <= 0.0 {
                debug!(depth, "no child strictly improves, stopping");
                break;
            }
            if improvement < required {
                debug!(depth, improvement, required, "improvement below threshold, stopping");
                break;
            }
            info!(
                depth,
                actions = ?child.activated_network_actions,
                cost = child.cost(),
                "accepting child leaf"
            );
            best = child;
        }

        PerimeterResult {
            optimization_state: input.optimization_state.clone(),
            activated_network_actions: best.activated_network_actions,
            activation: best.optimization.activation,
            cost_before: input.pre_perimeter_cost,
            objective: best.optimization.objective,
            sensitivity_status: best.optimization.output.status(),
        }
    }

    /// Actions usable on top of `best`: available under current margins, not
    /// yet activated, within usage-count limits.
    fn candidates<'a>(input: &SearchTreeInput<'a>, best: &Leaf) -> Vec<&'a NetworkAction> {
        let limits = input.crac.usage_limits(&input.optimization_state.instant.id);
        if limits
            .max_ra
            .is_some_and(|max| best.activated_network_actions.len() >= max)
        {
            debug!("remedial-action count limit reached");
            return Vec::new();
        }
        let mut per_operator: BTreeMap<&str, usize> = BTreeMap::new();
        for id in &best.activated_network_actions {
            if let Some(operator) = input.crac.network_action(id).and_then(|a| a.operator.as_deref())
            {
                *per_operator.entry(operator).or_default() += 1;
            }
        }

        let margin_of = |cnec_id: &str| -> Option<f64> {
            let cnec = input.cnecs.iter().find(|c| c.id == cnec_id)?;
            best.optimization.output.flows.margin(cnec, rao_core::Unit::Megawatt)
        };
        input
            .network_actions
            .iter()
            .filter(|a| !best.activated_network_actions.contains(&a.id))
            .filter(|a| {
                a.usage_method_with_margins(input.optimization_state, &margin_of)
                    == UsageMethod::Available
            })
            .filter(|a| {
                a.operator.as_deref().is_none_or(|operator| {
                    limits
                        .max_ra_per_operator
                        .get(operator)
                        .is_none_or(|cap| per_operator.get(operator).copied().unwrap_or(0) < *cap)
                })
            })
            .collect()
    }

    fn evaluate_candidates(
        input: &SearchTreeInput<'_>,
        oracle: &dyn SensitivityProvider,
        ilo: &IteratingLinearOptimizerInput<'_>,
        best: &Leaf,
        candidates: &[&NetworkAction],
    ) -> Vec<Leaf> {
        let evaluate = |action: &NetworkAction| {
            let mut actions = best.activated_network_actions.clone();
            actions.push(action.id.clone());
            Leaf::evaluate(
                input.network,
                oracle,
                input.crac,
                input.cnecs,
                input.range_actions,
                input.objective,
                ilo,
                input.pre_perimeter_setpoints,
                actions,
            )
        };

        let workers = input.tree_parameters.leaves_in_parallel.max(1);
        if workers == 1 || candidates.len() == 1 {
            return candidates.iter().map(|a| evaluate(a)).collect();
        }
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| candidates.par_iter().map(|a| evaluate(a)).collect()),
            Err(err) => {
                warn!(error = %err, "worker pool unavailable, evaluating sequentially");
                candidates.iter().map(|a| evaluate(a)).collect()
            }
        }
    }
}

fn stop_reached(criterion: StopCriterion, cost: f64) -> bool {
    match criterion {
        StopCriterion::MinObjective => false,
        StopCriterion::AtTargetObjectiveValue(target) => cost <= target,
    }
}
