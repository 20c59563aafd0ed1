//! Configuration for the optimization engine.
//!
//! All knobs are plain immutable structs with `Default` impls, constructed
//! once and passed by reference. Tree parameters are derived per perimeter
//! kind from the user-facing [`RaoParameters`].

use rao_core::Unit;
use serde::{Deserialize, Serialize};

/// Shape of the functional objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveFunctionType {
    /// Maximize the minimum margin over optimized elements.
    MaxMinMargin,
    /// Maximize the minimum margin relative to zonal PTDF sums.
    MaxMinRelativeMargin,
}

/// Stop criterion applied by a search tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StopCriterion {
    /// Expand until no child improves (greedy descent to a local optimum).
    MinObjective,
    /// Stop as soon as any leaf's cost reaches the target value.
    AtTargetObjectiveValue(f64),
}

/// Stop criterion configuration for the preventive perimeter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreventiveStopCriterion {
    MinObjective,
    /// Stop once the preventive perimeter is secure (cost ≤ 0).
    #[default]
    Secure,
}

/// Stop criterion configuration for curative perimeters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CurativeStopCriterion {
    MinObjective,
    /// Stop once the perimeter is secure.
    Secure,
    /// Stop once the perimeter matches the preventive cost minus the
    /// required improvement.
    PreventiveObjective,
    /// Stop at min(preventive cost minus improvement, secure).
    #[default]
    PreventiveObjectiveAndSecure,
}

/// How PST setpoints are modeled in the linear problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PstModel {
    /// One continuous setpoint variable per PST.
    #[default]
    Continuous,
    /// Integer tap variables linked to the setpoint through a local
    /// tap-to-angle linearization.
    ApproximatedIntegers,
}

/// Objective-function configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveParameters {
    pub function_type: ObjectiveFunctionType,
    /// Unit in which margins are expressed in the objective (MW or A).
    pub unit: Unit,
    /// Floor applied to zonal PTDF sums in relative-margin mode, to avoid
    /// division blow-up near zero.
    pub ptdf_sum_lower_bound: f64,
    pub preventive_stop_criterion: PreventiveStopCriterion,
    pub curative_stop_criterion: CurativeStopCriterion,
    /// Required improvement of a curative perimeter over the preventive
    /// cost before its search may stop early.
    pub curative_min_obj_improvement: f64,
}

impl Default for ObjectiveParameters {
    fn default() -> Self {
        Self {
            function_type: ObjectiveFunctionType::MaxMinMargin,
            unit: Unit::Megawatt,
            ptdf_sum_lower_bound: 0.01,
            preventive_stop_criterion: PreventiveStopCriterion::default(),
            curative_stop_criterion: CurativeStopCriterion::default(),
            curative_min_obj_improvement: 0.0,
        }
    }
}

/// Range-action optimization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeActionParameters {
    /// Iteration budget of the iterating linear optimizer.
    pub max_iterations: usize,
    pub pst_model: PstModel,
    /// Penalty cost per degree of PST variation, keeps setpoints close to
    /// their pre-perimeter positions when it does not cost margin.
    pub pst_penalty_cost: f64,
    /// Penalty cost per MW of HVDC variation.
    pub hvdc_penalty_cost: f64,
    /// Below this setpoint difference two activations are considered equal.
    pub setpoint_tolerance: f64,
}

impl Default for RangeActionParameters {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            pst_model: PstModel::default(),
            pst_penalty_cost: 0.01,
            hvdc_penalty_cost: 0.001,
            setpoint_tolerance: 1e-6,
        }
    }
}

/// Discrete-search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopoParameters {
    pub max_search_depth: usize,
    /// A child must improve on the previous depth by at least this much (in
    /// objective units) to be accepted.
    pub absolute_min_impact_threshold: f64,
    /// Relative counterpart of the impact threshold.
    pub relative_min_impact_threshold: f64,
}

impl Default for TopoParameters {
    fn default() -> Self {
        Self {
            max_search_depth: usize::MAX,
            absolute_min_impact_threshold: 0.0,
            relative_min_impact_threshold: 0.0,
        }
    }
}

/// Monitored-element (MNEC) penalty configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MnecParameters {
    /// Acceptable decrease of an MNEC margin below its initial value (MW).
    pub acceptable_margin_decrease: f64,
    /// Price of one MW of MNEC violation.
    pub violation_cost: f64,
    /// Constant tightening of MNEC constraints in the linear problem (MW).
    pub constraint_adjustment_coefficient: f64,
}

impl Default for MnecParameters {
    fn default() -> Self {
        Self {
            acceptable_margin_decrease: 50.0,
            violation_cost: 10.0,
            constraint_adjustment_coefficient: 0.0,
        }
    }
}

/// Loop-flow limitation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopFlowParameters {
    /// Acceptable increase of |loop flow| above its initial value (MW).
    pub acceptable_increase: f64,
    /// Price of one MW of loop-flow excess.
    pub violation_cost: f64,
    /// Constant tightening of loop-flow constraints in the linear problem.
    pub constraint_adjustment_coefficient: f64,
}

impl Default for LoopFlowParameters {
    fn default() -> Self {
        Self {
            acceptable_increase: 0.0,
            violation_cost: 10.0,
            constraint_adjustment_coefficient: 0.0,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaoParameters {
    pub objective: ObjectiveParameters,
    pub range_actions: RangeActionParameters,
    pub topo: TopoParameters,
    pub mnec: Option<MnecParameters>,
    pub loop_flow: Option<LoopFlowParameters>,
    /// Flat overcost added once when any in-scope state has a failed
    /// sensitivity computation.
    pub sensitivity_failure_overcost: f64,
    /// Sibling leaves evaluated in parallel per expansion round.
    pub leaves_in_parallel: usize,
}

impl Default for RaoParameters {
    fn default() -> Self {
        Self {
            objective: ObjectiveParameters::default(),
            range_actions: RangeActionParameters::default(),
            topo: TopoParameters::default(),
            mnec: None,
            loop_flow: None,
            sensitivity_failure_overcost: 10_000.0,
            leaves_in_parallel: 1,
        }
    }
}

/// Internal search-tree parameters, derived per perimeter kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParameters {
    pub stop_criterion: StopCriterion,
    pub maximum_search_depth: usize,
    pub leaves_in_parallel: usize,
}

impl TreeParameters {
    pub fn for_preventive(parameters: &RaoParameters) -> Self {
        let stop_criterion = match parameters.objective.preventive_stop_criterion {
            PreventiveStopCriterion::MinObjective => StopCriterion::MinObjective,
            PreventiveStopCriterion::Secure => StopCriterion::AtTargetObjectiveValue(0.0),
        };
        Self {
            stop_criterion,
            maximum_search_depth: parameters.topo.max_search_depth,
            leaves_in_parallel: parameters.leaves_in_parallel,
        }
    }

    pub fn for_automaton(parameters: &RaoParameters) -> Self {
        Self {
            stop_criterion: StopCriterion::AtTargetObjectiveValue(0.0),
            maximum_search_depth: parameters.topo.max_search_depth,
            leaves_in_parallel: parameters.leaves_in_parallel,
        }
    }

    pub fn for_curative(parameters: &RaoParameters, preventive_cost: f64) -> Self {
        let improvement = parameters.objective.curative_min_obj_improvement;
        let stop_criterion = match parameters.objective.curative_stop_criterion {
            CurativeStopCriterion::MinObjective => StopCriterion::MinObjective,
            CurativeStopCriterion::Secure => StopCriterion::AtTargetObjectiveValue(0.0),
            CurativeStopCriterion::PreventiveObjective => {
                StopCriterion::AtTargetObjectiveValue(preventive_cost - improvement)
            }
            CurativeStopCriterion::PreventiveObjectiveAndSecure => {
                StopCriterion::AtTargetObjectiveValue((preventive_cost - improvement).min(0.0))
            }
        };
        Self {
            stop_criterion,
            maximum_search_depth: parameters.topo.max_search_depth,
            leaves_in_parallel: parameters.leaves_in_parallel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preventive_secure_maps_to_target_zero() {
        let params = RaoParameters::default();
        let tree = TreeParameters::for_preventive(&params);
        assert_eq!(tree.stop_criterion, StopCriterion::AtTargetObjectiveValue(0.0));
    }

    #[test]
    fn test_curative_stop_criterion_translations() {
        let mut params = RaoParameters::default();
        params.objective.curative_min_obj_improvement = 10.0;

        params.objective.curative_stop_criterion = CurativeStopCriterion::MinObjective;
        assert_eq!(
            TreeParameters::for_curative(&params, 100.0).stop_criterion,
            StopCriterion::MinObjective
        );

        params.objective.curative_stop_criterion = CurativeStopCriterion::Secure;
        assert_eq!(
            TreeParameters::for_curative(&params, 100.0).stop_criterion,
            StopCriterion::AtTargetObjectiveValue(0.0)
        );

        params.objective.curative_stop_criterion = CurativeStopCriterion::PreventiveObjective;
        assert_eq!(
            TreeParameters::for_curative(&params, 100.0).stop_criterion,
            StopCriterion::AtTargetObjectiveValue(90.0)
        );

        // Already-secure preventive cost caps the target at zero
        params.objective.curative_stop_criterion =
            CurativeStopCriterion::PreventiveObjectiveAndSecure;
        assert_eq!(
            TreeParameters::for_curative(&params, -5.0).stop_criterion,
            StopCriterion::AtTargetObjectiveValue(-15.0)
        );
        assert_eq!(
            TreeParameters::for_curative(&params, 100.0).stop_criterion,
            StopCriterion::AtTargetObjectiveValue(0.0)
        );
    }

    #[test]
    fn test_parameters_survive_a_json_round_trip() {
        let mut params = RaoParameters::default();
        params.mnec = Some(MnecParameters::default());
        params.objective.function_type = ObjectiveFunctionType::MaxMinRelativeMargin;
        let json = serde_json::to_string(&params).unwrap();
        let back: RaoParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_automaton_always_targets_secure() {
        let mut params = RaoParameters::default();
        params.objective.preventive_stop_criterion = PreventiveStopCriterion::MinObjective;
        let tree = TreeParameters::for_automaton(&params);
        assert_eq!(tree.stop_criterion, StopCriterion::AtTargetObjectiveValue(0.0));
    }
}
