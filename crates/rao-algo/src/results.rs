//! Result records exchanged between the optimizer stages and returned to
//! callers.

use crate::objective::ObjectiveFunctionResult;
use crate::sensitivity::{ComputationStatus, SensitivityOutput};
use rao_core::{RangeAction, State};
use std::collections::{BTreeMap, BTreeSet};

/// Range-action setpoints (and derived taps) chosen by one optimization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeActionActivation {
    setpoints: BTreeMap<String, f64>,
    taps: BTreeMap<String, i32>,
}

impl RangeActionActivation {
    /// Record the pre-optimization positions of `range_actions` as read from
    /// `setpoint_of` (typically the network's working variant).
    pub fn from_setpoints(
        range_actions: &[RangeAction],
        setpoint_of: impl Fn(&RangeAction) -> f64,
    ) -> Self {
        let mut activation = Self::default();
        for ra in range_actions {
            let setpoint = setpoint_of(ra);
            activation.set_setpoint(&ra.id, setpoint);
            if let Some(tap) = ra.nearest_tap(setpoint) {
                activation.set_tap(&ra.id, tap);
            }
        }
        activation
    }

    pub fn set_setpoint(&mut self, range_action_id: &str, setpoint: f64) {
        self.setpoints.insert(range_action_id.to_string(), setpoint);
    }

    pub fn set_tap(&mut self, range_action_id: &str, tap: i32) {
        self.taps.insert(range_action_id.to_string(), tap);
    }

    pub fn setpoint(&self, range_action_id: &str) -> Option<f64> {
        self.setpoints.get(range_action_id).copied()
    }

    pub fn tap(&self, range_action_id: &str) -> Option<i32> {
        self.taps.get(range_action_id).copied()
    }

    pub fn setpoints(&self) -> impl Iterator<Item = (&str, f64)> {
        self.setpoints.iter().map(|(id, sp)| (id.as_str(), *sp))
    }

    /// Whether both activations carry the same setpoints within `tolerance`.
    pub fn same_as(&self, other: &RangeActionActivation, tolerance: f64) -> bool {
        if self.setpoints.len() != other.setpoints.len() {
            return false;
        }
        self.setpoints.iter().all(|(id, sp)| {
            other
                .setpoints
                .get(id)
                .is_some_and(|other_sp| (sp - other_sp).abs() <= tolerance)
        })
    }

    /// Ids of actions whose setpoint moved from `reference` by more than
    /// `tolerance`.
    pub fn activated_against(
        &self,
        reference: &RangeActionActivation,
        tolerance: f64,
    ) -> Vec<&str> {
        self.setpoints
            .iter()
            .filter(|(id, sp)| {
                reference
                    .setpoint(id)
                    .is_none_or(|reference_sp| (*sp - reference_sp).abs() > tolerance)
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Snapshot of a perimeter before its optimization starts: flows, setpoints
/// and objective at the inherited remedial state.
#[derive(Debug, Clone)]
pub struct PrePerimeterResult {
    pub output: SensitivityOutput,
    pub setpoints: RangeActionActivation,
    pub objective: ObjectiveFunctionResult,
}

impl PrePerimeterResult {
    pub fn cost(&self) -> f64 {
        self.objective.cost()
    }
}

/// Final result of one perimeter's optimization.
#[derive(Debug, Clone)]
pub struct PerimeterResult {
    pub optimization_state: State,
    /// Discrete actions activated by the search, in activation order.
    pub activated_network_actions: Vec<String>,
    pub activation: RangeActionActivation,
    pub cost_before: f64,
    pub objective: ObjectiveFunctionResult,
    pub sensitivity_status: ComputationStatus,
}

impl PerimeterResult {
    pub fn cost(&self) -> f64 {
        self.objective.cost()
    }

    pub fn improvement(&self) -> f64 {
        self.cost_before - self.cost()
    }
}

/// Full engine output: the preventive perimeter result plus one result per
/// post-contingency perimeter, keyed by optimization state.
#[derive(Debug, Clone)]
pub struct RaoRunResult {
    pub initial_cost: f64,
    pub preventive: PerimeterResult,
    pub post_contingency: BTreeMap<State, PerimeterResult>,
    /// Operators that share no curative remedial action, used when reading
    /// per-operator results.
    pub operators_not_sharing_cras: BTreeSet<String>,
}

impl RaoRunResult {
    pub fn perimeter(&self, state: &State) -> Option<&PerimeterResult> {
        if state.is_preventive() {
            Some(&self.preventive)
        } else {
            self.post_contingency.get(state)
        }
    }

    /// Worst terminal cost over all perimeters.
    pub fn cost(&self) -> f64 {
        self.post_contingency
            .values()
            .map(PerimeterResult::cost)
            .fold(self.preventive.cost(), f64::max)
    }

    pub fn status(&self) -> ComputationStatus {
        let statuses: Vec<ComputationStatus> = std::iter::once(self.preventive.sensitivity_status)
            .chain(self.post_contingency.values().map(|p| p.sensitivity_status))
            .collect();
        if statuses.iter().all(|s| *s == ComputationStatus::Default) {
            ComputationStatus::Default
        } else if statuses.iter().all(|s| *s == ComputationStatus::Failure) {
            ComputationStatus::Failure
        } else {
            ComputationStatus::PartialFailure
        }
    }

    pub fn is_secure(&self) -> bool {
        self.preventive.objective.is_secure()
            && self.post_contingency.values().all(|p| p.objective.is_secure())
    }
}
