//! Cost evaluators composed into the objective function.
//!
//! A closed set of tagged variants rather than trait objects: the set of
//! cost categories is fixed by configuration at build time and dispatch
//! happens in the evaluation hot loop.

use crate::params::{LoopFlowParameters, MnecParameters};
use crate::sensitivity::{SensitivityOutput, SensitivityStatus};
use rao_core::{FlowCnec, Side, Unit};
use std::collections::{BTreeMap, BTreeSet};

/// One element's contribution to a cost category, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct CostlyElement {
    pub cnec_id: String,
    /// Contribution in the evaluator's own unit (margin, violation MW, ...).
    pub value: f64,
}

/// Rank elements by decreasing contribution, ties by id.
fn ranked(mut elements: Vec<CostlyElement>) -> Vec<CostlyElement> {
    elements.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.cnec_id.cmp(&b.cnec_id)));
    elements
}

fn excluded(cnec: &FlowCnec, excluded_contingencies: &BTreeSet<String>) -> bool {
    cnec.state
        .contingency
        .as_ref()
        .is_some_and(|c| excluded_contingencies.contains(c))
}

/// A cost contribution of the composed objective.
#[derive(Debug, Clone)]
pub enum CostEvaluator {
    /// Functional cost: the opposite of the worst margin over optimized
    /// elements. Negative when every element has positive margin.
    MinMargin { unit: Unit },
    /// Functional cost where positive margins are divided by the element's
    /// zonal PTDF sum, floored to avoid blow-up near zero.
    MinRelativeMargin { unit: Unit, ptdf_sum_lower_bound: f64 },
    /// Virtual cost penalizing monitored elements whose margin dropped
    /// more than the acceptable decrease below its initial value.
    MnecViolation { parameters: MnecParameters, initial_margins_mw: BTreeMap<String, f64> },
    /// Virtual cost penalizing loop flows beyond their threshold or their
    /// initial value plus the acceptable increase.
    LoopFlowViolation {
        parameters: LoopFlowParameters,
        initial_loop_flows_mw: BTreeMap<(String, Side), f64>,
    },
    /// Flat overcost applied once when any in-scope state has a failed
    /// sensitivity computation.
    SensitivityFailure { overcost: f64 },
}

impl CostEvaluator {
    pub fn name(&self) -> &'static str {
        match self {
            CostEvaluator::MinMargin { .. } => "min-margin",
            CostEvaluator::MinRelativeMargin { .. } => "min-relative-margin",
            CostEvaluator::MnecViolation { .. } => "mnec-violation",
            CostEvaluator::LoopFlowViolation { .. } => "loop-flow-violation",
            CostEvaluator::SensitivityFailure { .. } => "sensitivity-failure",
        }
    }

    /// Cost contribution and ranked costly elements over `cnecs`, skipping
    /// elements attached to excluded contingencies.
    pub fn evaluate(
        &self,
        cnecs: &[FlowCnec],
        output: &SensitivityOutput,
        excluded_contingencies: &BTreeSet<String>,
    ) -> (f64, Vec<CostlyElement>) {
        match self {
            CostEvaluator::MinMargin { unit } => {
                min_margin_cost(cnecs, output, excluded_contingencies, *unit, None)
            }
            CostEvaluator::MinRelativeMargin { unit, ptdf_sum_lower_bound } => min_margin_cost(
                cnecs,
                output,
                excluded_contingencies,
                *unit,
                Some(*ptdf_sum_lower_bound),
            ),
            CostEvaluator::MnecViolation { parameters, initial_margins_mw } => {
                mnec_cost(cnecs, output, excluded_contingencies, parameters, initial_margins_mw)
            }
            CostEvaluator::LoopFlowViolation { parameters, initial_loop_flows_mw } => {
                loop_flow_cost(cnecs, output, excluded_contingencies, parameters, initial_loop_flows_mw)
            }
            CostEvaluator::SensitivityFailure { overcost } => {
                sensitivity_failure_cost(cnecs, output, excluded_contingencies, *overcost)
            }
        }
    }
}

fn min_margin_cost(
    cnecs: &[FlowCnec],
    output: &SensitivityOutput,
    excluded_contingencies: &BTreeSet<String>,
    unit: Unit,
    ptdf_sum_lower_bound: Option<f64>,
) -> (f64, Vec<CostlyElement>) {
    let mut margins = Vec::new();
    for cnec in cnecs {
        if !cnec.optimized || excluded(cnec, excluded_contingencies) {
            continue;
        }
        let Some(mut margin) = output.flows.margin(cnec, unit) else { continue };
        if let Some(floor) = ptdf_sum_lower_bound {
            // Relative margins only relax positive margins; violations stay
            // absolute so that security is judged in physical units.
            if margin > 0.0 {
                let ptdf_sum = cnec
                    .monitored_sides()
                    .into_iter()
                    .filter_map(|side| output.flows.ptdf_zonal_sum(&cnec.id, side))
                    .fold(f64::INFINITY, f64::min);
                if ptdf_sum.is_finite() {
                    margin /= ptdf_sum.max(floor);
                }
            }
        }
        margins.push(CostlyElement { cnec_id: cnec.id.clone(), value: margin });
    }
    // Most limiting first: smallest margin
    margins.sort_by(|a, b| a.value.total_cmp(&b.value).then_with(|| a.cnec_id.cmp(&b.cnec_id)));
    let cost = margins.first().map_or(0.0, |worst| -worst.value);
    (cost, margins)
}

fn mnec_cost(
    cnecs: &[FlowCnec],
    output: &SensitivityOutput,
    excluded_contingencies: &BTreeSet<String>,
    parameters: &MnecParameters,
    initial_margins_mw: &BTreeMap<String, f64>,
) -> (f64, Vec<CostlyElement>) {
    let mut violations = Vec::new();
    for cnec in cnecs {
        if !cnec.monitored || excluded(cnec, excluded_contingencies) {
            continue;
        }
        let Some(margin) = output.flows.margin(cnec, Unit::Megawatt) else { continue };
        let initial = initial_margins_mw.get(&cnec.id).copied().unwrap_or(0.0);
        // The margin may not drop below min(0, initial - acceptable decrease):
        // an initially constrained element may not get worse, a secure one may
        // lose up to the acceptable decrease but never become constrained.
        let floor = (initial - parameters.acceptable_margin_decrease).min(0.0);
        let violation = (floor - margin).max(0.0);
        if violation > 0.0 {
            violations.push(CostlyElement { cnec_id: cnec.id.clone(), value: violation });
        }
    }
    let total: f64 = violations.iter().map(|v| v.value).sum();
    (parameters.violation_cost * total, ranked(violations))
}

fn loop_flow_cost(
    cnecs: &[FlowCnec],
    output: &SensitivityOutput,
    excluded_contingencies: &BTreeSet<String>,
    parameters: &LoopFlowParameters,
    initial_loop_flows_mw: &BTreeMap<(String, Side), f64>,
) -> (f64, Vec<CostlyElement>) {
    let mut excesses = Vec::new();
    for cnec in cnecs {
        let Some(threshold) = cnec.loop_flow_threshold_mw else { continue };
        if excluded(cnec, excluded_contingencies) {
            continue;
        }
        let excess = cnec
            .monitored_sides()
            .into_iter()
            .filter_map(|side| {
                let loop_flow = output.flows.loop_flow_mw(&cnec.id, side)?;
                let initial = initial_loop_flows_mw
                    .get(&(cnec.id.clone(), side))
                    .copied()
                    .unwrap_or(0.0);
                let limit = threshold
                    .max(initial.abs() + parameters.acceptable_increase)
                    .max(0.0);
                Some((loop_flow.abs() - limit).max(0.0))
            })
            .fold(0.0, f64::max);
        if excess > 0.0 {
            excesses.push(CostlyElement { cnec_id: cnec.id.clone(), value: excess });
        }
    }
    let total: f64 = excesses.iter().map(|v| v.value).sum();
    (parameters.violation_cost * total, ranked(excesses))
}

fn sensitivity_failure_cost(
    cnecs: &[FlowCnec],
    output: &SensitivityOutput,
    excluded_contingencies: &BTreeSet<String>,
    overcost: f64,
) -> (f64, Vec<CostlyElement>) {
    let states: BTreeSet<_> = cnecs
        .iter()
        .filter(|c| !excluded(c, excluded_contingencies))
        .map(|c| &c.state)
        .collect();
    let any_failed = states
        .into_iter()
        .any(|state| output.state_status(state) == SensitivityStatus::Failure);
    if any_failed {
        (overcost, Vec::new())
    } else {
        (0.0, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cnec, preventive_state};

    fn output_with_flow(cnec_id: &str, flow_mw: f64) -> SensitivityOutput {
        let mut output = SensitivityOutput::default();
        output.flows.set_flow(cnec_id, Side::One, flow_mw);
        output.set_state_status(&preventive_state(), SensitivityStatus::Success);
        output
    }

    #[test]
    fn test_min_margin_is_signed() {
        let cnecs = vec![cnec("cnec1", 1000.0)];
        let evaluator = CostEvaluator::MinMargin { unit: Unit::Megawatt };

        let (cost, elements) = evaluator.evaluate(&cnecs, &output_with_flow("cnec1", 800.0), &BTreeSet::new());
        assert!((cost + 200.0).abs() < 1e-9);
        assert_eq!(elements[0].cnec_id, "cnec1");

        let (cost, _) = evaluator.evaluate(&cnecs, &output_with_flow("cnec1", 1200.0), &BTreeSet::new());
        assert!((cost - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_margin_skips_unoptimized_elements() {
        let mut pure_mnec = cnec("cnec1", 1000.0);
        pure_mnec.optimized = false;
        pure_mnec.monitored = true;
        let evaluator = CostEvaluator::MinMargin { unit: Unit::Megawatt };
        let (cost, elements) =
            evaluator.evaluate(&[pure_mnec], &output_with_flow("cnec1", 1200.0), &BTreeSet::new());
        assert_eq!(cost, 0.0);
        assert!(elements.is_empty());
    }

    #[test]
    fn test_relative_margin_divides_positive_margins_only() {
        let cnecs = vec![cnec("cnec1", 1000.0)];
        let evaluator =
            CostEvaluator::MinRelativeMargin { unit: Unit::Megawatt, ptdf_sum_lower_bound: 0.01 };

        let mut output = output_with_flow("cnec1", 800.0);
        output.flows.set_ptdf_zonal_sum("cnec1", Side::One, 0.5);
        let (cost, _) = evaluator.evaluate(&cnecs, &output, &BTreeSet::new());
        assert!((cost + 400.0).abs() < 1e-9);

        // Violations are not divided
        let mut output = output_with_flow("cnec1", 1200.0);
        output.flows.set_ptdf_zonal_sum("cnec1", Side::One, 0.5);
        let (cost, _) = evaluator.evaluate(&cnecs, &output, &BTreeSet::new());
        assert!((cost - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_ptdf_sum_is_floored() {
        let cnecs = vec![cnec("cnec1", 1000.0)];
        let evaluator =
            CostEvaluator::MinRelativeMargin { unit: Unit::Megawatt, ptdf_sum_lower_bound: 0.01 };
        let mut output = output_with_flow("cnec1", 900.0);
        output.flows.set_ptdf_zonal_sum("cnec1", Side::One, 1e-6);
        let (cost, _) = evaluator.evaluate(&cnecs, &output, &BTreeSet::new());
        // 100 MW margin divided by the 0.01 floor, not by 1e-6
        assert!((cost + 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_mnec_violation_threshold() {
        let mut mnec = cnec("mnec1", 1000.0);
        mnec.optimized = false;
        mnec.monitored = true;
        let parameters = MnecParameters {
            acceptable_margin_decrease: 50.0,
            violation_cost: 10.0,
            constraint_adjustment_coefficient: 0.0,
        };
        let evaluator = CostEvaluator::MnecViolation {
            parameters,
            initial_margins_mw: [("mnec1".to_string(), 400.0)].into(),
        };

        // Initially secure element: margin may drop to min(0, 400-50) = 0
        let (cost, _) =
            evaluator.evaluate(&[mnec.clone()], &output_with_flow("mnec1", 990.0), &BTreeSet::new());
        assert_eq!(cost, 0.0);

        let (cost, elements) =
            evaluator.evaluate(&[mnec], &output_with_flow("mnec1", 1030.0), &BTreeSet::new());
        assert!((cost - 300.0).abs() < 1e-9);
        assert_eq!(elements[0].cnec_id, "mnec1");
    }

    #[test]
    fn test_mnec_initially_constrained_element_may_not_worsen() {
        let mut mnec = cnec("mnec1", 1000.0);
        mnec.optimized = false;
        mnec.monitored = true;
        let evaluator = CostEvaluator::MnecViolation {
            parameters: MnecParameters::default(),
            // Already 100 MW in violation before optimization
            initial_margins_mw: [("mnec1".to_string(), -100.0)].into(),
        };
        // Floor = min(0, -100 - 50) = -150; margin -120 is tolerated
        let (cost, _) =
            evaluator.evaluate(&[mnec.clone()], &output_with_flow("mnec1", 1120.0), &BTreeSet::new());
        assert_eq!(cost, 0.0);
        // Margin -200 violates by 50
        let (cost, _) =
            evaluator.evaluate(&[mnec], &output_with_flow("mnec1", 1200.0), &BTreeSet::new());
        assert!((cost - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_loop_flow_excess() {
        let mut lf_cnec = cnec("cnec1", 2000.0);
        lf_cnec.loop_flow_threshold_mw = Some(100.0);
        let parameters = LoopFlowParameters {
            acceptable_increase: 0.0,
            violation_cost: 10.0,
            constraint_adjustment_coefficient: 0.0,
        };
        let evaluator = CostEvaluator::LoopFlowViolation {
            parameters,
            initial_loop_flows_mw: [(("cnec1".to_string(), Side::One), 150.0)].into(),
        };

        // Limit = max(threshold 100, |initial| 150) = 150; loop flow 180 → 30
        let mut output = output_with_flow("cnec1", 500.0);
        output.flows.set_commercial_flow("cnec1", Side::One, 320.0);
        let (cost, elements) = evaluator.evaluate(&[lf_cnec.clone()], &output, &BTreeSet::new());
        assert!((cost - 300.0).abs() < 1e-9);
        assert!((elements[0].value - 30.0).abs() < 1e-9);

        // Below the limit: no cost
        let mut output = output_with_flow("cnec1", 500.0);
        output.flows.set_commercial_flow("cnec1", Side::One, 360.0);
        let (cost, _) = evaluator.evaluate(&[lf_cnec], &output, &BTreeSet::new());
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn test_sensitivity_failure_overcost_applied_once() {
        let cnecs = vec![cnec("cnec1", 1000.0), cnec("cnec2", 1000.0)];
        let evaluator = CostEvaluator::SensitivityFailure { overcost: 10_000.0 };

        let mut output = SensitivityOutput::default();
        output.set_state_status(&preventive_state(), SensitivityStatus::Failure);
        let (cost, _) = evaluator.evaluate(&cnecs, &output, &BTreeSet::new());
        assert_eq!(cost, 10_000.0);

        output.set_state_status(&preventive_state(), SensitivityStatus::Success);
        let (cost, _) = evaluator.evaluate(&cnecs, &output, &BTreeSet::new());
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn test_excluded_contingencies_are_skipped() {
        use rao_core::{Instant, InstantKind, State};
        let mut curative = cnec("cnec1", 1000.0);
        curative.state = State::new("co1", Instant::new("curative", InstantKind::Curative, 2));
        let evaluator = CostEvaluator::MinMargin { unit: Unit::Megawatt };
        let excluded: BTreeSet<String> = ["co1".to_string()].into();
        let (cost, elements) =
            evaluator.evaluate(&[curative], &output_with_flow("cnec1", 1500.0), &excluded);
        assert_eq!(cost, 0.0);
        assert!(elements.is_empty());
    }
}
