//! Remedial actions: discrete network actions and continuous range actions.
//!
//! A remedial action is either discrete (a [`NetworkAction`]: topology switch
//! or injection setpoint, applied as a whole) or continuous (a
//! [`RangeAction`]: a bounded setpoint such as a phase-shifter angle or an
//! HVDC flow). Availability at a given state is governed by usage rules;
//! grouped range actions must share one setpoint.

use crate::crac::State;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a remedial action may be used at a state, from strongest to weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UsageMethod {
    Unavailable,
    Available,
    /// The action must be applied, not merely considered.
    Forced,
}

/// Condition under which a remedial action becomes usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageRule {
    /// Usable at every state of the given instant.
    OnInstant { instant_id: String, method: UsageMethod },
    /// Usable at one specific contingency state.
    OnContingencyState { contingency_id: String, instant_id: String, method: UsageMethod },
    /// Usable at states of the given instant when the referenced monitored
    /// element is constrained (negative margin).
    OnFlowConstraint { instant_id: String, cnec_id: String, method: UsageMethod },
}

impl UsageRule {
    /// Whether this rule can apply at `state`, ignoring flow conditions.
    fn matches_state(&self, state: &State) -> bool {
        match self {
            UsageRule::OnInstant { instant_id, .. } => state.instant.id == *instant_id,
            UsageRule::OnContingencyState { contingency_id, instant_id, .. } => {
                state.instant.id == *instant_id
                    && state.contingency.as_deref() == Some(contingency_id.as_str())
            }
            UsageRule::OnFlowConstraint { instant_id, .. } => state.instant.id == *instant_id,
        }
    }

    fn method(&self) -> UsageMethod {
        match self {
            UsageRule::OnInstant { method, .. }
            | UsageRule::OnContingencyState { method, .. }
            | UsageRule::OnFlowConstraint { method, .. } => *method,
        }
    }
}

/// Strongest usage method over rules matching `state`, flow conditions
/// treated as satisfied ("potentially available").
fn strongest_usage_method(rules: &[UsageRule], state: &State) -> UsageMethod {
    rules
        .iter()
        .filter(|r| r.matches_state(state))
        .map(UsageRule::method)
        .max()
        .unwrap_or(UsageMethod::Unavailable)
}

/// Strongest usage method with flow-constraint rules evaluated against
/// actual margins: a flow-constraint rule only applies when the referenced
/// element's margin is negative.
fn usage_method_with_margins(
    rules: &[UsageRule],
    state: &State,
    margin_of: &dyn Fn(&str) -> Option<f64>,
) -> UsageMethod {
    rules
        .iter()
        .filter(|r| r.matches_state(state))
        .filter(|r| match r {
            UsageRule::OnFlowConstraint { cnec_id, .. } => {
                margin_of(cnec_id).is_some_and(|m| m < 0.0)
            }
            _ => true,
        })
        .map(UsageRule::method)
        .max()
        .unwrap_or(UsageMethod::Unavailable)
}

/// One indivisible modification of the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementaryAction {
    OpenBranch { element: String },
    CloseBranch { element: String },
    InjectionSetpoint { element: String, setpoint_mw: f64 },
}

/// A discrete remedial action, applied as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAction {
    pub id: String,
    pub name: String,
    pub operator: Option<String>,
    pub elementary_actions: Vec<ElementaryAction>,
    pub usage_rules: Vec<UsageRule>,
}

impl NetworkAction {
    pub fn usage_method(&self, state: &State) -> UsageMethod {
        strongest_usage_method(&self.usage_rules, state)
    }

    pub fn usage_method_with_margins(
        &self,
        state: &State,
        margin_of: &dyn Fn(&str) -> Option<f64>,
    ) -> UsageMethod {
        usage_method_with_margins(&self.usage_rules, state, margin_of)
    }

    pub fn is_potentially_available(&self, state: &State) -> bool {
        self.usage_method(state) != UsageMethod::Unavailable
    }

    pub fn references_state(&self, state: &State) -> bool {
        self.usage_rules.iter().any(|r| r.matches_state(state))
    }
}

/// Continuous kind: phase-shifter (discrete tap table) or HVDC flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeActionKind {
    /// Phase-shifting transformer; tap → angle (degrees), sorted by tap.
    Pst { tap_to_angle: BTreeMap<i32, f64> },
    /// HVDC active-power setpoint (MW).
    Hvdc,
}

/// A continuous remedial action: a bounded setpoint on one network element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeAction {
    pub id: String,
    pub name: String,
    pub operator: Option<String>,
    pub network_element: String,
    pub kind: RangeActionKind,
    /// Admissible setpoint range (degrees for PSTs, MW for HVDC).
    pub min_setpoint: f64,
    pub max_setpoint: f64,
    /// Aligned range actions share a group id and must share one setpoint.
    pub group_id: Option<String>,
    pub usage_rules: Vec<UsageRule>,
}

impl RangeAction {
    pub fn usage_method(&self, state: &State) -> UsageMethod {
        strongest_usage_method(&self.usage_rules, state)
    }

    pub fn is_potentially_available(&self, state: &State) -> bool {
        self.usage_method(state) != UsageMethod::Unavailable
    }

    pub fn references_state(&self, state: &State) -> bool {
        self.usage_rules.iter().any(|r| r.matches_state(state))
    }

    pub fn is_pst(&self) -> bool {
        matches!(self.kind, RangeActionKind::Pst { .. })
    }

    /// Setpoint (angle) for a tap position, if this is a PST with that tap.
    pub fn angle_for_tap(&self, tap: i32) -> Option<f64> {
        match &self.kind {
            RangeActionKind::Pst { tap_to_angle } => tap_to_angle.get(&tap).copied(),
            RangeActionKind::Hvdc => None,
        }
    }

    /// Tap position whose angle is nearest to `angle`.
    pub fn nearest_tap(&self, angle: f64) -> Option<i32> {
        match &self.kind {
            RangeActionKind::Pst { tap_to_angle } => tap_to_angle
                .iter()
                .min_by(|a, b| (a.1 - angle).abs().total_cmp(&(b.1 - angle).abs()))
                .map(|(tap, _)| *tap),
            RangeActionKind::Hvdc => None,
        }
    }

    /// Minimum and maximum tap positions of a PST.
    pub fn tap_range(&self) -> Option<(i32, i32)> {
        match &self.kind {
            RangeActionKind::Pst { tap_to_angle } => {
                let min = *tap_to_angle.keys().next()?;
                let max = *tap_to_angle.keys().next_back()?;
                Some((min, max))
            }
            RangeActionKind::Hvdc => None,
        }
    }

    /// Local angle change per tap step around `tap`, used to linearize the
    /// tap↔angle relation near the current position.
    pub fn angle_per_tap_around(&self, tap: i32) -> Option<f64> {
        let (min_tap, max_tap) = self.tap_range()?;
        if min_tap == max_tap {
            return None;
        }
        let (lo, hi) = if tap >= max_tap { (tap - 1, tap) } else { (tap, tap + 1) };
        let a_lo = self.angle_for_tap(lo)?;
        let a_hi = self.angle_for_tap(hi)?;
        Some(a_hi - a_lo)
    }
}

/// Usage-count limits for remedial actions at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaUsageLimits {
    /// Cap on the total number of activated remedial actions.
    pub max_ra: Option<usize>,
    /// Cap per operator.
    pub max_ra_per_operator: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crac::{Instant, InstantKind};

    fn curative_state(contingency: &str) -> State {
        State::new(contingency, Instant::new("curative", InstantKind::Curative, 3))
    }

    fn action_with_rules(rules: Vec<UsageRule>) -> NetworkAction {
        NetworkAction {
            id: "na1".into(),
            name: "na1".into(),
            operator: Some("op1".into()),
            elementary_actions: vec![ElementaryAction::OpenBranch { element: "line1".into() }],
            usage_rules: rules,
        }
    }

    #[test]
    fn test_on_instant_rule() {
        let na = action_with_rules(vec![UsageRule::OnInstant {
            instant_id: "curative".into(),
            method: UsageMethod::Available,
        }]);
        assert_eq!(na.usage_method(&curative_state("co1")), UsageMethod::Available);
        assert_eq!(na.usage_method(&curative_state("co2")), UsageMethod::Available);
    }

    #[test]
    fn test_on_contingency_state_rule() {
        let na = action_with_rules(vec![UsageRule::OnContingencyState {
            contingency_id: "co1".into(),
            instant_id: "curative".into(),
            method: UsageMethod::Forced,
        }]);
        assert_eq!(na.usage_method(&curative_state("co1")), UsageMethod::Forced);
        assert_eq!(na.usage_method(&curative_state("co2")), UsageMethod::Unavailable);
    }

    #[test]
    fn test_strongest_method_wins() {
        let na = action_with_rules(vec![
            UsageRule::OnInstant { instant_id: "curative".into(), method: UsageMethod::Available },
            UsageRule::OnContingencyState {
                contingency_id: "co1".into(),
                instant_id: "curative".into(),
                method: UsageMethod::Forced,
            },
        ]);
        assert_eq!(na.usage_method(&curative_state("co1")), UsageMethod::Forced);
        assert_eq!(na.usage_method(&curative_state("co2")), UsageMethod::Available);
    }

    #[test]
    fn test_flow_constraint_rule_depends_on_margin() {
        let na = action_with_rules(vec![UsageRule::OnFlowConstraint {
            instant_id: "curative".into(),
            cnec_id: "cnec1".into(),
            method: UsageMethod::Available,
        }]);
        let state = curative_state("co1");
        // Potentially available regardless of flows
        assert!(na.is_potentially_available(&state));
        // Actually available only when the element is constrained
        let violated = |_: &str| Some(-10.0);
        let secure = |_: &str| Some(10.0);
        assert_eq!(
            na.usage_method_with_margins(&state, &violated),
            UsageMethod::Available
        );
        assert_eq!(na.usage_method_with_margins(&state, &secure), UsageMethod::Unavailable);
    }

    fn pst(taps: &[(i32, f64)]) -> RangeAction {
        RangeAction {
            id: "pst1".into(),
            name: "pst1".into(),
            operator: None,
            network_element: "pst1".into(),
            kind: RangeActionKind::Pst { tap_to_angle: taps.iter().copied().collect() },
            min_setpoint: -6.2,
            max_setpoint: 6.2,
            group_id: None,
            usage_rules: vec![],
        }
    }

    #[test]
    fn test_nearest_tap() {
        let pst = pst(&[(-2, -3.1), (-1, -1.55), (0, 0.0), (1, 1.55), (2, 3.1)]);
        assert_eq!(pst.nearest_tap(0.1), Some(0));
        assert_eq!(pst.nearest_tap(1.4), Some(1));
        assert_eq!(pst.nearest_tap(-10.0), Some(-2));
    }

    #[test]
    fn test_tap_range_and_slope() {
        let pst = pst(&[(-2, -3.1), (-1, -1.55), (0, 0.0), (1, 1.55), (2, 3.1)]);
        assert_eq!(pst.tap_range(), Some((-2, 2)));
        let slope = pst.angle_per_tap_around(0).unwrap();
        assert!((slope - 1.55).abs() < 1e-9);
        // At the upper end the slope is taken backwards
        let slope_top = pst.angle_per_tap_around(2).unwrap();
        assert!((slope_top - 1.55).abs() < 1e-9);
    }
}
