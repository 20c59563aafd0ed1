//! Linear problem assembly and resolution.
//!
//! One [`LinearProblem`] is built per optimization iteration from the
//! ordered filler list, solved once, and discarded. Variables are registered
//! under stable keys so fillers can reference each other's variables without
//! sharing state.

use good_lp::{variable, Constraint, Expression, ProblemVariables, Solution, SolverModel, Variable};
use rao_core::Side;
use std::collections::BTreeMap;

#[cfg(feature = "solver-clarabel")]
use good_lp::solvers::clarabel::clarabel as default_solver;
#[cfg(all(feature = "solver-highs", not(feature = "solver-clarabel")))]
use good_lp::solvers::highs::highs as default_solver;

/// Solver outcome, read back as a status rather than an error: an infeasible
/// model is a regular stop signal for the iterating optimizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinearProblemStatus {
    Optimal,
    Infeasible,
    Unbounded,
    Error(String),
}

/// Variable and constraint set for one optimization iteration.
pub struct LinearProblem {
    vars: ProblemVariables,
    objective: Expression,
    constraints: Vec<Constraint>,
    setpoint_vars: BTreeMap<String, Variable>,
    /// Upward and downward variation from the pre-perimeter setpoint.
    variation_vars: BTreeMap<String, (Variable, Variable)>,
    flow_vars: BTreeMap<(String, Side), Variable>,
    tap_vars: BTreeMap<String, Variable>,
    activation_vars: BTreeMap<String, Variable>,
    mnec_violation_vars: BTreeMap<String, Variable>,
    loop_flow_violation_vars: BTreeMap<String, Variable>,
    min_margin_var: Option<Variable>,
}

impl Default for LinearProblem {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearProblem {
    pub fn new() -> Self {
        Self {
            vars: ProblemVariables::new(),
            objective: Expression::from(0.0),
            constraints: Vec::new(),
            setpoint_vars: BTreeMap::new(),
            variation_vars: BTreeMap::new(),
            flow_vars: BTreeMap::new(),
            tap_vars: BTreeMap::new(),
            activation_vars: BTreeMap::new(),
            mnec_violation_vars: BTreeMap::new(),
            loop_flow_violation_vars: BTreeMap::new(),
            min_margin_var: None,
        }
    }

    pub fn add_setpoint_variable(&mut self, range_action_id: &str, min: f64, max: f64) -> Variable {
        let var = self.vars.add(variable().min(min).max(max));
        self.setpoint_vars.insert(range_action_id.to_string(), var);
        var
    }

    pub fn setpoint_variable(&self, range_action_id: &str) -> Option<Variable> {
        self.setpoint_vars.get(range_action_id).copied()
    }

    pub fn add_variation_variables(&mut self, range_action_id: &str) -> (Variable, Variable) {
        let upward = self.vars.add(variable().min(0.0));
        let downward = self.vars.add(variable().min(0.0));
        self.variation_vars
            .insert(range_action_id.to_string(), (upward, downward));
        (upward, downward)
    }

    pub fn variation_variables(&self, range_action_id: &str) -> Option<(Variable, Variable)> {
        self.variation_vars.get(range_action_id).copied()
    }

    pub fn add_flow_variable(&mut self, cnec_id: &str, side: Side) -> Variable {
        let var = self.vars.add(variable());
        self.flow_vars.insert((cnec_id.to_string(), side), var);
        var
    }

    pub fn flow_variable(&self, cnec_id: &str, side: Side) -> Option<Variable> {
        self.flow_vars.get(&(cnec_id.to_string(), side)).copied()
    }

    pub fn add_tap_variable(&mut self, range_action_id: &str, min: f64, max: f64) -> Variable {
        let var = self.vars.add(variable().min(min).max(max));
        self.tap_vars.insert(range_action_id.to_string(), var);
        var
    }

    pub fn tap_variable(&self, range_action_id: &str) -> Option<Variable> {
        self.tap_vars.get(range_action_id).copied()
    }

    pub fn add_activation_variable(&mut self, range_action_id: &str) -> Variable {
        let var = self.vars.add(variable().min(0.0).max(1.0));
        self.activation_vars.insert(range_action_id.to_string(), var);
        var
    }

    pub fn activation_variable(&self, range_action_id: &str) -> Option<Variable> {
        self.activation_vars.get(range_action_id).copied()
    }

    pub fn add_mnec_violation_variable(&mut self, cnec_id: &str) -> Variable {
        let var = self.vars.add(variable().min(0.0));
        self.mnec_violation_vars.insert(cnec_id.to_string(), var);
        var
    }

    pub fn add_loop_flow_violation_variable(&mut self, cnec_id: &str) -> Variable {
        let var = self.vars.add(variable().min(0.0));
        self.loop_flow_violation_vars.insert(cnec_id.to_string(), var);
        var
    }

    /// The minimum-margin variable, created on first use so that filler
    /// order does not matter.
    pub fn min_margin_variable(&mut self) -> Variable {
        if let Some(var) = self.min_margin_var {
            return var;
        }
        let var = self.vars.add(variable());
        self.min_margin_var = Some(var);
        // Maximizing the worst margin = minimizing its opposite
        self.objective += -1.0 * var;
        var
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn add_objective_term(&mut self, term: Expression) {
        self.objective += term;
    }

    /// Solve the assembled model and extract all variable values.
    pub fn solve(self) -> (LinearProblemStatus, Option<LinearSolution>) {
        let Self {
            vars,
            objective,
            constraints,
            setpoint_vars,
            tap_vars,
            activation_vars,
            ..
        } = self;
        let mut model = vars.minimise(objective).using(default_solver);
        for constraint in constraints {
            model = model.with(constraint);
        }
        match model.solve() {
            Ok(solution) => {
                let extract = |vars: &BTreeMap<String, Variable>| {
                    vars.iter()
                        .map(|(id, var)| (id.clone(), solution.value(*var)))
                        .collect::<BTreeMap<String, f64>>()
                };
                let extracted = LinearSolution {
                    setpoints: extract(&setpoint_vars),
                    taps: extract(&tap_vars),
                    activations: extract(&activation_vars),
                };
                (LinearProblemStatus::Optimal, Some(extracted))
            }
            Err(good_lp::ResolutionError::Infeasible) => (LinearProblemStatus::Infeasible, None),
            Err(good_lp::ResolutionError::Unbounded) => (LinearProblemStatus::Unbounded, None),
            Err(other) => (LinearProblemStatus::Error(other.to_string()), None),
        }
    }
}

/// Plain values extracted from an optimal solution.
#[derive(Debug, Clone, Default)]
pub struct LinearSolution {
    pub setpoints: BTreeMap<String, f64>,
    /// Continuous tap values, to be rounded to the nearest integer tap.
    pub taps: BTreeMap<String, f64>,
    pub activations: BTreeMap<String, f64>,
}
