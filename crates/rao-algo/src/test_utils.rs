//! Shared fixtures: a linear mock of the sensitivity oracle and small
//! catalog builders. Used by unit and integration tests.

use crate::sensitivity::{SensitivityOutput, SensitivityProvider, SensitivityStatus};
use rao_core::{
    Crac, FlowCnec, Instant, InstantKind, Network, RangeAction, Side, State, Threshold,
};
use std::collections::{BTreeMap, BTreeSet};

pub fn preventive_instant() -> Instant {
    Instant::new("preventive", InstantKind::Preventive, 0)
}

pub fn outage_instant() -> Instant {
    Instant::new("outage", InstantKind::Outage, 1)
}

pub fn auto_instant() -> Instant {
    Instant::new("auto", InstantKind::Auto, 2)
}

pub fn curative_instant() -> Instant {
    Instant::new("curative", InstantKind::Curative, 3)
}

pub fn preventive_state() -> State {
    State::preventive(preventive_instant())
}

/// Optimized preventive CNEC on side one with a symmetric ±`max_mw` limit.
pub fn cnec(id: &str, max_mw: f64) -> FlowCnec {
    FlowCnec {
        id: id.into(),
        name: id.into(),
        network_element: id.into(),
        state: preventive_state(),
        thresholds: vec![Threshold::max_mw(Side::One, max_mw)],
        optimized: true,
        monitored: false,
        operator: None,
        nominal_voltage_kv: 400.0,
        reliability_margin_mw: 0.0,
        loop_flow_threshold_mw: None,
    }
}

/// A CRAC with the four standard instants and nothing else.
pub fn empty_crac() -> Crac {
    let mut crac = Crac::new("test");
    crac.instants =
        vec![preventive_instant(), outage_instant(), auto_instant(), curative_instant()];
    crac
}

/// A continuous PST with taps −16..=16 mapped linearly to ±6.2°.
pub fn pst(id: &str) -> RangeAction {
    let tap_to_angle: BTreeMap<i32, f64> =
        (-16..=16).map(|tap| (tap, tap as f64 * 6.2 / 16.0)).collect();
    RangeAction {
        id: id.into(),
        name: id.into(),
        operator: None,
        network_element: id.into(),
        kind: rao_core::RangeActionKind::Pst { tap_to_angle },
        min_setpoint: -6.2,
        max_setpoint: 6.2,
        group_id: None,
        usage_rules: vec![rao_core::UsageRule::OnInstant {
            instant_id: "preventive".into(),
            method: rao_core::UsageMethod::Available,
        }],
    }
}

/// Sensitivity oracle whose flows are exactly linear in the applied
/// remedial state, so iterating optimization converges in one step.
///
/// `flow(cnec, side) = base + Σ_ra sens × (setpoint − reference) + Σ open
/// effects`, where setpoints are read from the network's working variant.
#[derive(Debug, Clone, Default)]
pub struct LinearOracle {
    /// Flow with every action at its reference position, MW.
    pub base_flows_mw: BTreeMap<(String, Side), f64>,
    /// Flow sensitivity per (cnec, side, range-action id), MW per unit.
    pub sensitivities: BTreeMap<(String, Side, String), f64>,
    /// Range-action setpoints at which `base_flows_mw` holds, by action id.
    pub reference_setpoints: BTreeMap<String, f64>,
    /// Flow shift per (opened element, cnec, side), MW.
    pub open_effects_mw: BTreeMap<(String, String, Side), f64>,
    /// Commercial flows for loop-flow evaluation, by (cnec, side).
    pub commercial_flows_mw: BTreeMap<(String, Side), f64>,
    /// Zonal PTDF sums for relative margins, by (cnec, side).
    pub ptdf_sums: BTreeMap<(String, Side), f64>,
    /// States this oracle reports as failed.
    pub failing_states: BTreeSet<State>,
    /// Fail every state when running on a variant other than the base one,
    /// to exercise failures that only appear once actions are applied.
    pub fail_on_temporary_variants: bool,
    /// Fail every state while any of these elements is switched open, to
    /// exercise topologies that break the load flow.
    pub failing_when_open: BTreeSet<String>,
}

impl LinearOracle {
    pub fn with_flow(mut self, cnec_id: &str, flow_mw: f64) -> Self {
        self.base_flows_mw.insert((cnec_id.to_string(), Side::One), flow_mw);
        self
    }

    pub fn with_sensitivity(mut self, cnec_id: &str, ra_id: &str, value: f64) -> Self {
        self.sensitivities
            .insert((cnec_id.to_string(), Side::One, ra_id.to_string()), value);
        self
    }

    pub fn with_open_effect(mut self, element: &str, cnec_id: &str, shift_mw: f64) -> Self {
        self.open_effects_mw
            .insert((element.to_string(), cnec_id.to_string(), Side::One), shift_mw);
        self
    }

    pub fn failing_on(mut self, state: State) -> Self {
        self.failing_states.insert(state);
        self
    }

    pub fn failing_on_temporary_variants(mut self) -> Self {
        self.fail_on_temporary_variants = true;
        self
    }

    pub fn failing_when_open(mut self, element: &str) -> Self {
        self.failing_when_open.insert(element.to_string());
        self
    }

    fn fails_for(&self, network: &Network, state: &State) -> bool {
        self.failing_states.contains(state)
            || (self.fail_on_temporary_variants
                && network.working_variant() != rao_core::BASE_VARIANT)
            || self.failing_when_open.iter().any(|element| network.is_open(element))
    }
}

impl SensitivityProvider for LinearOracle {
    fn run(
        &self,
        network: &Network,
        cnecs: &[FlowCnec],
        range_actions: &[RangeAction],
        states: &BTreeSet<State>,
    ) -> SensitivityOutput {
        let mut output = SensitivityOutput::default();
        for state in states {
            let status = if self.fails_for(network, state) {
                SensitivityStatus::Failure
            } else {
                SensitivityStatus::Success
            };
            output.set_state_status(state, status);
        }
        for cnec in cnecs.iter().filter(|c| states.contains(&c.state)) {
            if self.fails_for(network, &cnec.state) {
                continue;
            }
            for side in cnec.monitored_sides() {
                let key = (cnec.id.clone(), side);
                let Some(base) = self.base_flows_mw.get(&key).copied() else { continue };
                let mut flow = base;
                for ra in range_actions {
                    let sens = self
                        .sensitivities
                        .get(&(cnec.id.clone(), side, ra.id.clone()))
                        .copied()
                        .unwrap_or(0.0);
                    let reference = self.reference_setpoints.get(&ra.id).copied().unwrap_or(0.0);
                    let setpoint =
                        network.setpoint(&ra.network_element).unwrap_or(reference);
                    flow += sens * (setpoint - reference);
                    output.set_sensitivity(&cnec.id, side, &ra.id, sens);
                }
                for ((element, cnec_id, effect_side), shift) in &self.open_effects_mw {
                    if cnec_id == &cnec.id && *effect_side == side && network.is_open(element) {
                        flow += shift;
                    }
                }
                output.flows.set_flow(&cnec.id, side, flow);
                if let Some(commercial) = self.commercial_flows_mw.get(&key) {
                    output.flows.set_commercial_flow(&cnec.id, side, *commercial);
                }
                if let Some(sum) = self.ptdf_sums.get(&key) {
                    output.flows.set_ptdf_zonal_sum(&cnec.id, side, *sum);
                }
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_oracle_applies_setpoints_and_topology() {
        let oracle = LinearOracle::default()
            .with_flow("cnec1", 800.0)
            .with_sensitivity("cnec1", "pst1", 50.0)
            .with_open_effect("line9", "cnec1", -100.0);
        let pst = pst("pst1");
        let cnecs = vec![cnec("cnec1", 1000.0)];
        let states: BTreeSet<State> = [preventive_state()].into();

        let mut network = Network::new("net");
        let output = oracle.run(&network, &cnecs, std::slice::from_ref(&pst), &states);
        assert_eq!(output.flows.flow_mw("cnec1", Side::One), Some(800.0));

        network.apply_range_action(&pst, 2.0);
        let output = oracle.run(&network, &cnecs, std::slice::from_ref(&pst), &states);
        assert_eq!(output.flows.flow_mw("cnec1", Side::One), Some(900.0));

        network.apply_network_action(&rao_core::NetworkAction {
            id: "open-line9".into(),
            name: "open line9".into(),
            operator: None,
            elementary_actions: vec![rao_core::ElementaryAction::OpenBranch {
                element: "line9".into(),
            }],
            usage_rules: vec![],
        });
        let output = oracle.run(&network, &cnecs, std::slice::from_ref(&pst), &states);
        assert_eq!(output.flows.flow_mw("cnec1", Side::One), Some(800.0));
    }

    #[test]
    fn test_failing_state_yields_no_flows() {
        let oracle = LinearOracle::default()
            .with_flow("cnec1", 800.0)
            .failing_on(preventive_state());
        let cnecs = vec![cnec("cnec1", 1000.0)];
        let states: BTreeSet<State> = [preventive_state()].into();
        let output = oracle.run(&Network::new("net"), &cnecs, &[], &states);
        assert_eq!(output.state_status(&preventive_state()), SensitivityStatus::Failure);
        assert_eq!(output.flows.flow_mw("cnec1", Side::One), None);
    }
}
