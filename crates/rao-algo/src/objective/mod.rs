//! Objective function: one functional cost plus named virtual costs.
//!
//! The functional cost is the signed opposite of the worst margin over
//! optimized elements (negative when the perimeter is secure). Virtual
//! costs are non-negative penalties for soft constraints: monitored-element
//! violations, loop-flow excesses and sensitivity failures. Lower total is
//! better; a perimeter is secure when the total is ≤ 0 and every virtual
//! cost is zero.

mod evaluators;

pub use evaluators::{CostEvaluator, CostlyElement};

use crate::params::{ObjectiveFunctionType, RaoParameters};
use crate::sensitivity::SensitivityOutput;
use rao_core::FlowCnec;
use std::collections::{BTreeMap, BTreeSet};

/// The composed objective for one optimization run.
#[derive(Debug, Clone)]
pub struct ObjectiveFunction {
    functional: CostEvaluator,
    virtuals: Vec<CostEvaluator>,
}

impl ObjectiveFunction {
    /// Compose the evaluators enabled by `parameters`.
    ///
    /// `initial` is the pre-optimization sensitivity output; it anchors the
    /// MNEC and loop-flow penalties to their pre-optimization values.
    pub fn build(
        cnecs: &[FlowCnec],
        initial: &SensitivityOutput,
        parameters: &RaoParameters,
    ) -> Self {
        let functional = match parameters.objective.function_type {
            ObjectiveFunctionType::MaxMinMargin => {
                CostEvaluator::MinMargin { unit: parameters.objective.unit }
            }
            ObjectiveFunctionType::MaxMinRelativeMargin => CostEvaluator::MinRelativeMargin {
                unit: parameters.objective.unit,
                ptdf_sum_lower_bound: parameters.objective.ptdf_sum_lower_bound,
            },
        };

        let mut virtuals = Vec::new();
        if let Some(mnec) = &parameters.mnec {
            let initial_margins_mw = cnecs
                .iter()
                .filter(|c| c.monitored)
                .filter_map(|c| {
                    initial
                        .flows
                        .margin(c, rao_core::Unit::Megawatt)
                        .map(|m| (c.id.clone(), m))
                })
                .collect();
            virtuals.push(CostEvaluator::MnecViolation {
                parameters: mnec.clone(),
                initial_margins_mw,
            });
        }
        if let Some(loop_flow) = &parameters.loop_flow {
            let mut initial_loop_flows_mw = BTreeMap::new();
            for cnec in cnecs.iter().filter(|c| c.is_loop_flow_monitored()) {
                for side in cnec.monitored_sides() {
                    if let Some(lf) = initial.flows.loop_flow_mw(&cnec.id, side) {
                        initial_loop_flows_mw.insert((cnec.id.clone(), side), lf);
                    }
                }
            }
            virtuals.push(CostEvaluator::LoopFlowViolation {
                parameters: loop_flow.clone(),
                initial_loop_flows_mw,
            });
        }
        virtuals.push(CostEvaluator::SensitivityFailure {
            overcost: parameters.sensitivity_failure_overcost,
        });

        Self { functional, virtuals }
    }

    /// Evaluate all costs against one sensitivity output.
    pub fn evaluate(
        &self,
        cnecs: &[FlowCnec],
        output: &SensitivityOutput,
        excluded_contingencies: &BTreeSet<String>,
    ) -> ObjectiveFunctionResult {
        let (functional_cost, most_limiting_elements) =
            self.functional.evaluate(cnecs, output, excluded_contingencies);
        let mut virtual_costs = BTreeMap::new();
        let mut costly_elements = BTreeMap::new();
        for evaluator in &self.virtuals {
            let (cost, elements) = evaluator.evaluate(cnecs, output, excluded_contingencies);
            virtual_costs.insert(evaluator.name().to_string(), cost);
            costly_elements.insert(evaluator.name().to_string(), elements);
        }
        ObjectiveFunctionResult {
            functional_cost,
            virtual_costs,
            most_limiting_elements,
            costly_elements,
        }
    }
}

/// One evaluation of the objective.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveFunctionResult {
    /// Signed: negative when every optimized element has positive margin.
    pub functional_cost: f64,
    /// Non-negative penalties, keyed by evaluator name.
    pub virtual_costs: BTreeMap<String, f64>,
    /// Optimized elements ranked worst margin first.
    pub most_limiting_elements: Vec<CostlyElement>,
    /// Per virtual-cost category, elements ranked by contribution.
    pub costly_elements: BTreeMap<String, Vec<CostlyElement>>,
}

impl ObjectiveFunctionResult {
    pub fn virtual_cost(&self) -> f64 {
        self.virtual_costs.values().sum()
    }

    /// The scalar the engine minimizes.
    pub fn cost(&self) -> f64 {
        self.functional_cost + self.virtual_cost()
    }

    pub fn is_secure(&self) -> bool {
        self.functional_cost <= 0.0 && self.virtual_cost() == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensitivity::SensitivityStatus;
    use crate::test_utils::{cnec, preventive_state};
    use rao_core::Side;

    fn secure_output(cnec_id: &str, flow_mw: f64) -> SensitivityOutput {
        let mut output = SensitivityOutput::default();
        output.flows.set_flow(cnec_id, Side::One, flow_mw);
        output.set_state_status(&preventive_state(), SensitivityStatus::Success);
        output
    }

    #[test]
    fn test_total_cost_is_functional_plus_virtuals() {
        let cnecs = vec![cnec("cnec1", 1000.0)];
        let initial = secure_output("cnec1", 800.0);
        let params = RaoParameters::default();
        let objective = ObjectiveFunction::build(&cnecs, &initial, &params);

        let result = objective.evaluate(&cnecs, &initial, &BTreeSet::new());
        assert!((result.functional_cost + 200.0).abs() < 1e-9);
        assert_eq!(result.virtual_cost(), 0.0);
        assert!((result.cost() + 200.0).abs() < 1e-9);
        assert!(result.is_secure());
    }

    #[test]
    fn test_sensitivity_failure_makes_perimeter_insecure() {
        let cnecs = vec![cnec("cnec1", 1000.0)];
        let initial = secure_output("cnec1", 800.0);
        let params = RaoParameters::default();
        let objective = ObjectiveFunction::build(&cnecs, &initial, &params);

        let mut failed = secure_output("cnec1", 800.0);
        failed.set_state_status(&preventive_state(), SensitivityStatus::Failure);
        let result = objective.evaluate(&cnecs, &failed, &BTreeSet::new());
        assert_eq!(result.virtual_cost(), params.sensitivity_failure_overcost);
        assert!(!result.is_secure());
        // Still a finite, comparable cost
        assert!(result.cost().is_finite());
    }

    #[test]
    fn test_mnec_evaluator_enabled_by_configuration() {
        let mut mnec = cnec("mnec1", 1000.0);
        mnec.optimized = false;
        mnec.monitored = true;
        let cnecs = vec![cnec("cnec1", 1000.0), mnec];
        let initial = {
            let mut output = secure_output("cnec1", 500.0);
            output.flows.set_flow("mnec1", Side::One, 900.0);
            output
        };

        let mut params = RaoParameters::default();
        params.mnec = Some(crate::params::MnecParameters {
            acceptable_margin_decrease: 50.0,
            violation_cost: 10.0,
            constraint_adjustment_coefficient: 0.0,
        });
        let objective = ObjectiveFunction::build(&cnecs, &initial, &params);

        // mnec1 margin drops from 100 to -30: floor is min(0, 100-50)=0, so
        // the violation is 30 MW
        let mut worsened = secure_output("cnec1", 500.0);
        worsened.flows.set_flow("mnec1", Side::One, 1030.0);
        let result = objective.evaluate(&cnecs, &worsened, &BTreeSet::new());
        assert!((result.virtual_costs["mnec-violation"] - 300.0).abs() < 1e-9);
        assert!(!result.is_secure());
    }
}
