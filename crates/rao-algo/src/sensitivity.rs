//! Sensitivity oracle adapter.
//!
//! The sensitivity/load-flow solver is an external oracle behind the
//! [`SensitivityProvider`] trait: given a network and a set of states it
//! returns per-(element, side) flows, per-(element, side, range-action)
//! sensitivity coefficients, and a per-state success/failure status. The
//! oracle never fails the whole batch; failures are per-state statuses.
//!
//! [`SensitivityComputer`] batches oracle calls: all states with no applied
//! remedial actions go into one call, and each state that requires remedial
//! actions applied first gets a dedicated call on a disposable network
//! variant ([`VariantGuard`], create-use-discard even on early return).

use rao_core::{Crac, FlowCnec, Network, RangeAction, RaoResult, Side, State, Unit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Per-state outcome of a sensitivity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensitivityStatus {
    Success,
    Failure,
}

/// Aggregated outcome over all states in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputationStatus {
    /// All states computed successfully.
    Default,
    /// Some states failed, others remain usable.
    PartialFailure,
    /// Every state failed.
    Failure,
}

/// Immutable per-(element, side) flow snapshot, in MW.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    flows_mw: BTreeMap<(String, Side), f64>,
    /// Commercial (allocated-exchange) flows; loop flow = flow − commercial.
    commercial_flows_mw: BTreeMap<(String, Side), f64>,
    /// Absolute zonal PTDF sums, used by the relative-margin objective.
    ptdf_zonal_sums: BTreeMap<(String, Side), f64>,
}

impl FlowResult {
    pub fn set_flow(&mut self, cnec_id: &str, side: Side, flow_mw: f64) {
        self.flows_mw.insert((cnec_id.to_string(), side), flow_mw);
    }

    pub fn set_commercial_flow(&mut self, cnec_id: &str, side: Side, flow_mw: f64) {
        self.commercial_flows_mw.insert((cnec_id.to_string(), side), flow_mw);
    }

    pub fn set_ptdf_zonal_sum(&mut self, cnec_id: &str, side: Side, sum: f64) {
        self.ptdf_zonal_sums.insert((cnec_id.to_string(), side), sum);
    }

    pub fn flow_mw(&self, cnec_id: &str, side: Side) -> Option<f64> {
        self.flows_mw.get(&(cnec_id.to_string(), side)).copied()
    }

    pub fn commercial_flow_mw(&self, cnec_id: &str, side: Side) -> Option<f64> {
        self.commercial_flows_mw.get(&(cnec_id.to_string(), side)).copied()
    }

    /// Loop flow on one side: physical flow minus commercial flow.
    pub fn loop_flow_mw(&self, cnec_id: &str, side: Side) -> Option<f64> {
        Some(self.flow_mw(cnec_id, side)? - self.commercial_flow_mw(cnec_id, side)?)
    }

    pub fn ptdf_zonal_sum(&self, cnec_id: &str, side: Side) -> Option<f64> {
        self.ptdf_zonal_sums.get(&(cnec_id.to_string(), side)).copied()
    }

    /// Worst margin of `cnec` over its monitored sides, in `unit`.
    /// `None` if no flow was computed for the element.
    pub fn margin(&self, cnec: &FlowCnec, unit: Unit) -> Option<f64> {
        cnec.monitored_sides()
            .into_iter()
            .filter_map(|side| self.flow_mw(&cnec.id, side).map(|f| cnec.margin(f, side, unit)))
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Merge another result into this one (used to combine batched calls).
    pub fn merge(&mut self, other: FlowResult) {
        self.flows_mw.extend(other.flows_mw);
        self.commercial_flows_mw.extend(other.commercial_flows_mw);
        self.ptdf_zonal_sums.extend(other.ptdf_zonal_sums);
    }
}

/// Full output of one sensitivity computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensitivityOutput {
    pub flows: FlowResult,
    /// Flow sensitivity to a range-action setpoint, per (element, side, action).
    sensitivities: BTreeMap<(String, Side, String), f64>,
    pub per_state_status: BTreeMap<State, SensitivityStatus>,
}

impl SensitivityOutput {
    pub fn set_sensitivity(&mut self, cnec_id: &str, side: Side, range_action_id: &str, value: f64) {
        self.sensitivities
            .insert((cnec_id.to_string(), side, range_action_id.to_string()), value);
    }

    pub fn sensitivity(&self, cnec_id: &str, side: Side, range_action_id: &str) -> f64 {
        self.sensitivities
            .get(&(cnec_id.to_string(), side, range_action_id.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set_state_status(&mut self, state: &State, status: SensitivityStatus) {
        self.per_state_status.insert(state.clone(), status);
    }

    pub fn state_status(&self, state: &State) -> SensitivityStatus {
        self.per_state_status
            .get(state)
            .copied()
            .unwrap_or(SensitivityStatus::Failure)
    }

    pub fn status(&self) -> ComputationStatus {
        let total = self.per_state_status.len();
        let failed = self
            .per_state_status
            .values()
            .filter(|s| **s == SensitivityStatus::Failure)
            .count();
        if failed == 0 {
            ComputationStatus::Default
        } else if failed == total {
            ComputationStatus::Failure
        } else {
            ComputationStatus::PartialFailure
        }
    }

    pub fn any_failure(&self) -> bool {
        self.status() != ComputationStatus::Default
    }

    pub fn merge(&mut self, other: SensitivityOutput) {
        self.flows.merge(other.flows);
        self.sensitivities.extend(other.sensitivities);
        self.per_state_status.extend(other.per_state_status);
    }
}

/// The opaque sensitivity/load-flow oracle.
///
/// Implementations read the remedial state recorded on the network's working
/// variant. The signature is infallible: any solver failure must be reported
/// through per-state `Failure` statuses so that other states' results remain
/// usable.
pub trait SensitivityProvider: Send + Sync {
    fn run(
        &self,
        network: &Network,
        cnecs: &[FlowCnec],
        range_actions: &[RangeAction],
        states: &BTreeSet<State>,
    ) -> SensitivityOutput;
}

/// Remedial actions to apply before computing a state's flows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedRemedialActions {
    /// Activated discrete actions per state, by id.
    pub network_actions: BTreeMap<State, Vec<String>>,
    /// Range-action setpoints per state, by id.
    pub range_actions: BTreeMap<State, Vec<(String, f64)>>,
}

impl AppliedRemedialActions {
    pub fn add_network_action(&mut self, state: &State, action_id: &str) {
        self.network_actions
            .entry(state.clone())
            .or_default()
            .push(action_id.to_string());
    }

    pub fn add_range_action(&mut self, state: &State, action_id: &str, setpoint: f64) {
        self.range_actions
            .entry(state.clone())
            .or_default()
            .push((action_id.to_string(), setpoint));
    }

    pub fn is_empty_for(&self, state: &State) -> bool {
        !self.network_actions.contains_key(state) && !self.range_actions.contains_key(state)
    }

    /// States carrying at least one action, in deterministic order.
    pub fn states_with_actions(&self) -> BTreeSet<State> {
        self.network_actions
            .keys()
            .chain(self.range_actions.keys())
            .cloned()
            .collect()
    }

    /// Apply this record's actions for one state on the working variant.
    pub fn apply_for_state(&self, network: &mut Network, crac: &Crac, state: &State) {
        if let Some(actions) = self.network_actions.get(state) {
            for id in actions {
                if let Some(action) = crac.network_action(id) {
                    network.apply_network_action(action);
                }
            }
        }
        if let Some(setpoints) = self.range_actions.get(state) {
            for (id, setpoint) in setpoints {
                if let Some(action) = crac.range_action(id) {
                    network.apply_range_action(action, *setpoint);
                }
            }
        }
    }
}

/// RAII scope for a disposable network variant.
///
/// On creation, snapshots the working variant under a fresh name and makes
/// it the working variant; on drop, restores the previous working variant
/// and removes the snapshot. Mutations inside the scope never leak.
pub struct VariantGuard<'a> {
    network: &'a mut Network,
    variant: String,
    previous: String,
}

impl<'a> VariantGuard<'a> {
    pub fn new(network: &'a mut Network, name: &str) -> RaoResult<Self> {
        let previous = network.working_variant().to_string();
        network.clone_variant(&previous, name)?;
        network.set_working_variant(name)?;
        Ok(Self { network, variant: name.to_string(), previous })
    }

    pub fn network(&self) -> &Network {
        self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        self.network
    }
}

impl Drop for VariantGuard<'_> {
    fn drop(&mut self) {
        if self.network.set_working_variant(&self.previous).is_err() {
            warn!(variant = %self.previous, "could not restore working variant");
        }
        let _ = self.network.remove_variant(&self.variant);
    }
}

/// Batches oracle calls for a set of states with optional applied actions.
pub struct SensitivityComputer;

impl SensitivityComputer {
    /// Compute flows and sensitivities for `cnecs`, applying the recorded
    /// remedial actions per state first.
    ///
    /// States with no applied actions are batched into one oracle call on
    /// the current working variant; each state with applied actions gets a
    /// dedicated call on a disposable variant.
    pub fn compute(
        network: &mut Network,
        oracle: &dyn SensitivityProvider,
        crac: &Crac,
        cnecs: &[FlowCnec],
        range_actions: &[RangeAction],
        applied: &AppliedRemedialActions,
    ) -> SensitivityOutput {
        let all_states: BTreeSet<State> = cnecs.iter().map(|c| c.state.clone()).collect();
        let plain_states: BTreeSet<State> = all_states
            .iter()
            .filter(|s| applied.is_empty_for(s))
            .cloned()
            .collect();
        let dedicated_states: Vec<State> = all_states
            .iter()
            .filter(|s| !applied.is_empty_for(s))
            .cloned()
            .collect();

        let mut output = if plain_states.is_empty() {
            SensitivityOutput::default()
        } else {
            oracle.run(network, cnecs, range_actions, &plain_states)
        };

        for (index, state) in dedicated_states.iter().enumerate() {
            let variant_name = format!("sens-{}-{}", network.working_variant(), index);
            let partial = match VariantGuard::new(network, &variant_name) {
                Ok(mut guard) => {
                    applied.apply_for_state(guard.network_mut(), crac, state);
                    let states: BTreeSet<State> = [state.clone()].into();
                    oracle.run(guard.network(), cnecs, range_actions, &states)
                }
                Err(err) => {
                    warn!(state = %state, error = %err, "sensitivity variant setup failed");
                    let mut failed = SensitivityOutput::default();
                    failed.set_state_status(state, SensitivityStatus::Failure);
                    failed
                }
            };
            output.merge(partial);
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rao_core::BASE_VARIANT;

    #[test]
    fn test_variant_guard_restores_on_drop() {
        let mut network = Network::new("net");
        {
            let mut guard = VariantGuard::new(&mut network, "tmp").unwrap();
            assert_eq!(guard.network().working_variant(), "tmp");
            guard
                .network_mut()
                .apply_range_action(
                    &rao_core::RangeAction {
                        id: "hvdc1".into(),
                        name: "hvdc1".into(),
                        operator: None,
                        network_element: "hvdc1".into(),
                        kind: rao_core::RangeActionKind::Hvdc,
                        min_setpoint: -100.0,
                        max_setpoint: 100.0,
                        group_id: None,
                        usage_rules: vec![],
                    },
                    50.0,
                );
        }
        assert_eq!(network.working_variant(), BASE_VARIANT);
        assert_eq!(network.setpoint("hvdc1"), None);
        assert_eq!(network.variant_ids(), vec![BASE_VARIANT]);
    }

    #[test]
    fn test_status_aggregation() {
        use rao_core::{Instant, InstantKind};
        let preventive = State::preventive(Instant::new("preventive", InstantKind::Preventive, 0));
        let curative = State::new("co1", Instant::new("curative", InstantKind::Curative, 2));

        let mut output = SensitivityOutput::default();
        output.set_state_status(&preventive, SensitivityStatus::Success);
        output.set_state_status(&curative, SensitivityStatus::Success);
        assert_eq!(output.status(), ComputationStatus::Default);

        output.set_state_status(&curative, SensitivityStatus::Failure);
        assert_eq!(output.status(), ComputationStatus::PartialFailure);

        output.set_state_status(&preventive, SensitivityStatus::Failure);
        assert_eq!(output.status(), ComputationStatus::Failure);
    }

    #[test]
    fn test_unknown_state_is_a_failure() {
        use rao_core::{Instant, InstantKind};
        let output = SensitivityOutput::default();
        let state = State::preventive(Instant::new("preventive", InstantKind::Preventive, 0));
        assert_eq!(output.state_status(&state), SensitivityStatus::Failure);
    }

    #[test]
    fn test_missing_sensitivity_defaults_to_zero() {
        let output = SensitivityOutput::default();
        assert_eq!(output.sensitivity("cnec1", Side::One, "ra1"), 0.0);
    }

    fn curative_state() -> State {
        State::new("co1", crate::test_utils::curative_instant())
    }

    /// Preventive CNEC plus a curative CNEC whose state carries an applied
    /// switch opening "line9".
    fn applied_actions_fixture() -> (Crac, Vec<FlowCnec>, AppliedRemedialActions) {
        use crate::test_utils::{cnec, empty_crac};

        let mut crac = empty_crac();
        crac.contingencies.push(rao_core::Contingency::new("co1", vec!["line2".into()]));
        crac.network_actions.push(rao_core::NetworkAction {
            id: "open-line9".into(),
            name: "open line9".into(),
            operator: None,
            elementary_actions: vec![rao_core::ElementaryAction::OpenBranch {
                element: "line9".into(),
            }],
            usage_rules: vec![],
        });

        let mut curative_cnec = cnec("cnec2", 1000.0);
        curative_cnec.state = curative_state();
        let cnecs = vec![cnec("cnec1", 1000.0), curative_cnec];

        let mut applied = AppliedRemedialActions::default();
        applied.add_network_action(&curative_state(), "open-line9");

        (crac, cnecs, applied)
    }

    #[test]
    fn test_compute_applies_actions_on_a_dedicated_variant() {
        let (crac, cnecs, applied) = applied_actions_fixture();
        let oracle = crate::test_utils::LinearOracle::default()
            .with_flow("cnec1", 800.0)
            .with_flow("cnec2", 500.0)
            .with_open_effect("line9", "cnec2", -100.0);

        let mut network = Network::new("net");
        let output =
            SensitivityComputer::compute(&mut network, &oracle, &crac, &cnecs, &[], &applied);

        // Plain state on the working variant, dedicated state with the
        // switch applied
        assert_eq!(output.flows.flow_mw("cnec1", Side::One), Some(800.0));
        assert_eq!(output.flows.flow_mw("cnec2", Side::One), Some(400.0));
        assert_eq!(output.status(), ComputationStatus::Default);

        // The dedicated variant never leaks
        assert_eq!(network.working_variant(), BASE_VARIANT);
        assert_eq!(network.variant_ids(), vec![BASE_VARIANT]);
        assert!(!network.is_open("line9"));
    }

    #[test]
    fn test_dedicated_call_failure_leaves_batched_states_usable() {
        let (crac, cnecs, applied) = applied_actions_fixture();
        let oracle = crate::test_utils::LinearOracle::default()
            .with_flow("cnec1", 800.0)
            .with_flow("cnec2", 500.0)
            .failing_when_open("line9");

        let mut network = Network::new("net");
        let output =
            SensitivityComputer::compute(&mut network, &oracle, &crac, &cnecs, &[], &applied);

        assert_eq!(output.flows.flow_mw("cnec1", Side::One), Some(800.0));
        assert_eq!(output.flows.flow_mw("cnec2", Side::One), None);
        assert_eq!(output.state_status(&curative_state()), SensitivityStatus::Failure);
        assert_eq!(output.status(), ComputationStatus::PartialFailure);
        assert_eq!(network.working_variant(), BASE_VARIANT);
    }
}
