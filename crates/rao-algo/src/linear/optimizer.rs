//! Iterating linear optimizer.
//!
//! Alternates between solving the linear problem (built around the latest
//! sensitivity point) and re-evaluating the true objective with the oracle,
//! accepting an iteration only on strict cost improvement. All failures are
//! statuses, not errors: an infeasible model or a failed sensitivity
//! computation stops the loop and keeps the previous best.

use super::fillers::{activation_from_solution, build_problem, FillerContext, ProblemFiller};
use super::problem::LinearProblemStatus;
use crate::objective::{ObjectiveFunction, ObjectiveFunctionResult};
use crate::params::RangeActionParameters;
use crate::results::RangeActionActivation;
use crate::sensitivity::{ComputationStatus, SensitivityOutput, SensitivityProvider, VariantGuard};
use rao_core::{FlowCnec, Network, RangeAction, State};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Why the iteration loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearOptimizationStatus {
    /// At least one iteration was accepted and the iteration budget ran out.
    Improved,
    /// No further improvement: the solution is stable or a candidate
    /// regressed the cost.
    Stalled,
    /// The linear problem could not be solved on the first iteration.
    Infeasible,
    /// The oracle failed on every state after applying new setpoints.
    SensitivityFailed,
}

/// Best accepted point of the iteration loop.
#[derive(Debug, Clone)]
pub struct LinearOptimizationResult {
    pub status: LinearOptimizationStatus,
    pub activation: RangeActionActivation,
    pub output: SensitivityOutput,
    pub objective: ObjectiveFunctionResult,
    pub iterations: usize,
}

impl LinearOptimizationResult {
    pub fn cost(&self) -> f64 {
        self.objective.cost()
    }
}

/// Inputs that stay fixed across iterations.
pub struct IteratingLinearOptimizerInput<'a> {
    pub cnecs: &'a [FlowCnec],
    pub range_actions: &'a [RangeAction],
    pub objective: &'a ObjectiveFunction,
    pub fillers: &'a [ProblemFiller],
    /// Setpoints inherited from previous perimeters.
    pub pre_perimeter: &'a RangeActionActivation,
    pub excluded_contingencies: &'a BTreeSet<String>,
    pub parameters: &'a RangeActionParameters,
}

/// Run the iteration loop from an already-evaluated starting point.
///
/// The network's working variant carries the leaf's discrete actions; every
/// candidate evaluation happens on a disposable child variant, so the
/// caller's variant is never mutated.
pub fn optimize(
    network: &mut Network,
    oracle: &dyn SensitivityProvider,
    input: &IteratingLinearOptimizerInput<'_>,
    initial_activation: RangeActionActivation,
    initial_output: SensitivityOutput,
    initial_objective: ObjectiveFunctionResult,
) -> LinearOptimizationResult {
    let mut best = LinearOptimizationResult {
        status: LinearOptimizationStatus::Stalled,
        activation: initial_activation,
        output: initial_output,
        objective: initial_objective,
        iterations: 0,
    };
    let states: BTreeSet<State> = input.cnecs.iter().map(|c| c.state.clone()).collect();
    let mut has_improved = false;

    for iteration in 1..=input.parameters.max_iterations {
        best.iterations = iteration;

        let ctx = FillerContext {
            cnecs: input.cnecs,
            range_actions: input.range_actions,
            output: &best.output,
            current: &best.activation,
            pre_perimeter: input.pre_perimeter,
        };
        let (status, solution) = build_problem(input.fillers, &ctx).solve();
        let candidate_activation = match (status, solution) {
            (LinearProblemStatus::Optimal, Some(solution)) => {
                activation_from_solution(&solution, input.range_actions)
            }
            (status, _) => {
                debug!(iteration, ?status, "linear problem not solved to optimality");
                if iteration == 1 && !has_improved {
                    best.status = LinearOptimizationStatus::Infeasible;
                } else {
                    best.status = terminal_status(has_improved);
                }
                return best;
            }
        };

        if candidate_activation.same_as(&best.activation, input.parameters.setpoint_tolerance) {
            debug!(iteration, "setpoints stable, stopping");
            best.status = LinearOptimizationStatus::Stalled;
            return best;
        }

        let Some(candidate_output) =
            evaluate_candidate(network, oracle, input, &candidate_activation, &states, iteration)
        else {
            best.status = LinearOptimizationStatus::SensitivityFailed;
            return best;
        };
        if candidate_output.status() == ComputationStatus::Failure {
            warn!(iteration, "sensitivity computation failed on all states");
            best.status = LinearOptimizationStatus::SensitivityFailed;
            return best;
        }

        let candidate_objective =
            input
                .objective
                .evaluate(input.cnecs, &candidate_output, input.excluded_contingencies);
        if candidate_objective.cost() < best.objective.cost() {
            debug!(
                iteration,
                cost = candidate_objective.cost(),
                "accepting improved solution"
            );
            best.activation = candidate_activation;
            best.output = candidate_output;
            best.objective = candidate_objective;
            has_improved = true;
        } else {
            // A correctly linearized re-optimization should never regress;
            // tolerated as a stop condition, not retried.
            if candidate_objective.cost() > best.objective.cost() {
                warn!(
                    iteration,
                    best = best.objective.cost(),
                    candidate = candidate_objective.cost(),
                    "objective worsened after re-optimization, discarding candidate"
                );
            }
            best.status = LinearOptimizationStatus::Stalled;
            return best;
        }
    }

    best.status = terminal_status(has_improved);
    best
}

fn terminal_status(has_improved: bool) -> LinearOptimizationStatus {
    if has_improved {
        LinearOptimizationStatus::Improved
    } else {
        LinearOptimizationStatus::Stalled
    }
}

/// Apply the candidate setpoints on a disposable variant and recompute the
/// flows there.
fn evaluate_candidate(
    network: &mut Network,
    oracle: &dyn SensitivityProvider,
    input: &IteratingLinearOptimizerInput<'_>,
    activation: &RangeActionActivation,
    states: &BTreeSet<State>,
    iteration: usize,
) -> Option<SensitivityOutput> {
    let variant = format!("ilo-{}", iteration);
    let mut guard = match VariantGuard::new(network, &variant) {
        Ok(guard) => guard,
        Err(err) => {
            warn!(iteration, error = %err, "could not set up evaluation variant");
            return None;
        }
    };
    for ra in input.range_actions {
        if let Some(setpoint) = activation.setpoint(&ra.id) {
            guard.network_mut().apply_range_action(ra, setpoint);
        }
    }
    Some(oracle.run(guard.network(), input.cnecs, input.range_actions, states))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::fillers::build_fillers;
    use crate::params::RaoParameters;
    use crate::sensitivity::SensitivityComputer;
    use crate::test_utils::{cnec, pst, LinearOracle};
    use rao_core::RaUsageLimits;

    struct Fixture {
        cnecs: Vec<FlowCnec>,
        range_actions: Vec<RangeAction>,
        oracle: LinearOracle,
        parameters: RaoParameters,
    }

    impl Fixture {
        fn new(limit_mw: f64, base_flow_mw: f64, sensitivity: f64) -> Self {
            Self {
                cnecs: vec![cnec("cnec1", limit_mw)],
                range_actions: vec![pst("pst1")],
                oracle: LinearOracle::default()
                    .with_flow("cnec1", base_flow_mw)
                    .with_sensitivity("cnec1", "pst1", sensitivity),
                parameters: RaoParameters::default(),
            }
        }

        fn run(&self, network: &mut Network) -> LinearOptimizationResult {
            let initial_output = SensitivityComputer::compute(
                network,
                &self.oracle,
                &crate::test_utils::empty_crac(),
                &self.cnecs,
                &self.range_actions,
                &Default::default(),
            );
            let objective =
                ObjectiveFunction::build(&self.cnecs, &initial_output, &self.parameters);
            let initial_objective =
                objective.evaluate(&self.cnecs, &initial_output, &BTreeSet::new());
            let fillers = build_fillers(
                &self.parameters,
                &self.cnecs,
                &self.range_actions,
                &initial_output,
                &initial_output,
                &BTreeSet::new(),
                &RaUsageLimits::default(),
            );
            let pre_perimeter = RangeActionActivation::from_setpoints(&self.range_actions, |ra| {
                network.setpoint(&ra.network_element).unwrap_or(0.0)
            });
            let input = IteratingLinearOptimizerInput {
                cnecs: &self.cnecs,
                range_actions: &self.range_actions,
                objective: &objective,
                fillers: &fillers,
                pre_perimeter: &pre_perimeter,
                excluded_contingencies: &BTreeSet::new(),
                parameters: &self.parameters.range_actions,
            };
            optimize(
                network,
                &self.oracle,
                &input,
                pre_perimeter.clone(),
                initial_output,
                initial_objective,
            )
        }
    }

    #[test]
    fn test_converges_on_linear_oracle_in_two_iterations() {
        // Overload of 20 MW, 10 MW/° of leverage: first iteration fixes it,
        // second confirms stability
        let fixture = Fixture::new(80.0, 100.0, 10.0);
        let mut network = Network::new("net");
        let result = fixture.run(&mut network);
        assert_eq!(result.status, LinearOptimizationStatus::Stalled);
        assert_eq!(result.iterations, 2);
        assert!(result.cost() < 0.0);
        assert!(result.activation.setpoint("pst1").unwrap() < -2.0);
        // The caller's variant was never touched
        assert_eq!(network.setpoint("pst1"), None);
    }

    #[test]
    fn test_null_action_reproduces_initial_cost() {
        // No leverage at all: the first candidate equals the starting point
        let fixture = Fixture::new(80.0, 100.0, 0.0);
        let mut network = Network::new("net");
        let result = fixture.run(&mut network);
        assert_eq!(result.status, LinearOptimizationStatus::Stalled);
        assert!((result.cost() - 20.0).abs() < 1e-6);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn test_sensitivity_failure_keeps_previous_best() {
        // The oracle succeeds on the initial point but fails as soon as new
        // setpoints are applied on an evaluation variant
        let mut fixture = Fixture::new(80.0, 100.0, 10.0);
        fixture.oracle = fixture.oracle.clone().failing_on_temporary_variants();
        let mut network = Network::new("net");
        let result = fixture.run(&mut network);
        assert_eq!(result.status, LinearOptimizationStatus::SensitivityFailed);
        assert_eq!(result.activation.setpoint("pst1"), Some(0.0));
        assert!((result.cost() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_iteration_budget_is_honored() {
        let mut fixture = Fixture::new(80.0, 100.0, 10.0);
        fixture.parameters.range_actions.max_iterations = 1;
        let mut network = Network::new("net");
        let result = fixture.run(&mut network);
        assert_eq!(result.status, LinearOptimizationStatus::Improved);
        assert_eq!(result.iterations, 1);
    }
}
