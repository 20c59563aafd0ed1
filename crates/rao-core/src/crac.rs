//! CRAC catalog model: instants, states, contingencies and monitored elements.
//!
//! A CRAC describes one system-security study: the contingencies to secure,
//! the monitored elements (CNECs) with their operating thresholds, and the
//! remedial actions available to restore margins. The catalog is read-only
//! for the optimization engine; all identifiers are strings, as in the
//! interchange formats CRACs come from.
//!
//! Causal stages are modeled by [`Instant`]: exactly one PREVENTIVE instant,
//! one OUTAGE instant strictly after it, and any number of AUTO/CURATIVE
//! instants strictly after the outage. A [`State`] is one operating condition
//! to secure: a `(contingency, instant)` pair, with no contingency only for
//! the preventive instant.

use crate::error::{RaoError, RaoResult};
use crate::remedial::{NetworkAction, RaUsageLimits, RangeAction};
use crate::units::{flow_unit_multiplier, Unit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kind of a causal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstantKind {
    Preventive,
    Outage,
    Auto,
    Curative,
}

/// A named causal stage with a total order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instant {
    pub id: String,
    pub kind: InstantKind,
    /// Position in the causal order, 0 = preventive.
    pub order: usize,
}

impl Instant {
    pub fn new(id: impl Into<String>, kind: InstantKind, order: usize) -> Self {
        Self { id: id.into(), kind, order }
    }

    pub fn comes_after(&self, other: &Instant) -> bool {
        self.order > other.order
    }

    pub fn comes_before(&self, other: &Instant) -> bool {
        self.order < other.order
    }

    pub fn is_preventive(&self) -> bool {
        self.kind == InstantKind::Preventive
    }

    pub fn is_auto(&self) -> bool {
        self.kind == InstantKind::Auto
    }

    pub fn is_curative(&self) -> bool {
        self.kind == InstantKind::Curative
    }
}

impl PartialOrd for Instant {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Instant {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order.cmp(&other.order).then_with(|| self.id.cmp(&other.id))
    }
}

/// A hypothetical loss of one or more network elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contingency {
    pub id: String,
    pub name: String,
    pub network_elements: Vec<String>,
}

impl Contingency {
    pub fn new(id: impl Into<String>, elements: Vec<String>) -> Self {
        let id = id.into();
        Self { name: id.clone(), id, network_elements: elements }
    }
}

/// One operating condition to secure: `(contingency?, instant)`.
///
/// `contingency` is `None` only for the preventive instant. States are
/// immutable and totally ordered (instant order first, then contingency id)
/// so that every iteration over state sets is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State {
    pub contingency: Option<String>,
    pub instant: Instant,
}

impl State {
    pub fn preventive(instant: Instant) -> Self {
        Self { contingency: None, instant }
    }

    pub fn new(contingency: impl Into<String>, instant: Instant) -> Self {
        Self { contingency: Some(contingency.into()), instant }
    }

    pub fn is_preventive(&self) -> bool {
        self.contingency.is_none()
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.instant
            .cmp(&other.instant)
            .then_with(|| self.contingency.cmp(&other.contingency))
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.contingency {
            Some(c) => write!(f, "{} - {}", c, self.instant.id),
            None => write!(f, "{}", self.instant.id),
        }
    }
}

/// Monitored side of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    One,
    Two,
}

/// An operating limit on one side of a monitored element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub side: Side,
    pub unit: Unit,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Threshold {
    pub fn max_mw(side: Side, max: f64) -> Self {
        Self { side, unit: Unit::Megawatt, min: Some(-max), max: Some(max) }
    }
}

/// A monitored element: network branch + state + thresholds.
///
/// The `optimized` flag makes the element count in the min-margin objective;
/// the `monitored` flag makes violations of it penalized as a virtual cost.
/// The flags are not mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowCnec {
    pub id: String,
    pub name: String,
    pub network_element: String,
    pub state: State,
    pub thresholds: Vec<Threshold>,
    pub optimized: bool,
    pub monitored: bool,
    pub operator: Option<String>,
    pub nominal_voltage_kv: f64,
    /// Flow reliability margin, tightens both bounds (MW).
    pub reliability_margin_mw: f64,
    /// Loop-flow limit, if this element is loop-flow monitored (MW).
    pub loop_flow_threshold_mw: Option<f64>,
}

impl FlowCnec {
    /// Sides carrying at least one threshold, in deterministic order.
    pub fn monitored_sides(&self) -> BTreeSet<Side> {
        self.thresholds.iter().map(|t| t.side).collect()
    }

    /// Most restrictive upper flow bound on `side`, in MW.
    pub fn upper_bound_mw(&self, side: Side) -> Option<f64> {
        self.thresholds
            .iter()
            .filter(|t| t.side == side)
            .filter_map(|t| {
                t.max.map(|m| {
                    m * flow_unit_multiplier(t.unit, Unit::Megawatt, self.nominal_voltage_kv)
                        - self.reliability_margin_mw
                })
            })
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Most restrictive lower flow bound on `side`, in MW.
    pub fn lower_bound_mw(&self, side: Side) -> Option<f64> {
        self.thresholds
            .iter()
            .filter(|t| t.side == side)
            .filter_map(|t| {
                t.min.map(|m| {
                    m * flow_unit_multiplier(t.unit, Unit::Megawatt, self.nominal_voltage_kv)
                        + self.reliability_margin_mw
                })
            })
            .max_by(|a, b| a.total_cmp(b))
    }

    /// Signed margin of a flow on `side`, in MW.
    ///
    /// `margin = min(upper - flow, flow - lower)` over the bounds present;
    /// positive means within limits. A side without thresholds is
    /// unconstrained (infinite margin).
    pub fn margin_mw(&self, flow_mw: f64, side: Side) -> f64 {
        let mut margin = f64::INFINITY;
        if let Some(ub) = self.upper_bound_mw(side) {
            margin = margin.min(ub - flow_mw);
        }
        if let Some(lb) = self.lower_bound_mw(side) {
            margin = margin.min(flow_mw - lb);
        }
        margin
    }

    /// Margin expressed in `unit` instead of MW.
    pub fn margin(&self, flow_mw: f64, side: Side, unit: Unit) -> f64 {
        self.margin_mw(flow_mw, side)
            * flow_unit_multiplier(Unit::Megawatt, unit, self.nominal_voltage_kv)
    }

    pub fn is_loop_flow_monitored(&self) -> bool {
        self.loop_flow_threshold_mw.is_some()
    }
}

/// The full catalog for one security study.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Crac {
    pub id: String,
    /// All instants, kept sorted by causal order.
    pub instants: Vec<Instant>,
    pub contingencies: Vec<Contingency>,
    pub flow_cnecs: Vec<FlowCnec>,
    pub network_actions: Vec<NetworkAction>,
    pub range_actions: Vec<RangeAction>,
    /// Usage-count limits, keyed by instant id.
    pub ra_usage_limits: BTreeMap<String, RaUsageLimits>,
}

impl Crac {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    pub fn instant(&self, id: &str) -> Option<&Instant> {
        self.instants.iter().find(|i| i.id == id)
    }

    pub fn preventive_instant(&self) -> Option<&Instant> {
        self.instants.iter().find(|i| i.kind == InstantKind::Preventive)
    }

    pub fn outage_instant(&self) -> Option<&Instant> {
        self.instants.iter().find(|i| i.kind == InstantKind::Outage)
    }

    /// Instants of a given kind, in causal order.
    pub fn instants_of_kind(&self, kind: InstantKind) -> Vec<&Instant> {
        let mut out: Vec<&Instant> = self.instants.iter().filter(|i| i.kind == kind).collect();
        out.sort();
        out
    }

    pub fn has_auto_instant(&self) -> bool {
        self.instants.iter().any(|i| i.kind == InstantKind::Auto)
    }

    pub fn preventive_state(&self) -> RaoResult<State> {
        let instant = self
            .preventive_instant()
            .ok_or_else(|| RaoError::Validation("CRAC has no preventive instant".into()))?;
        Ok(State::preventive(instant.clone()))
    }

    /// The state `(contingency, instant)` if the catalog references it
    /// through a CNEC or a remedial-action usage rule, `None` otherwise.
    pub fn state(&self, contingency_id: &str, instant: &Instant) -> Option<State> {
        let candidate = State::new(contingency_id, instant.clone());
        let referenced = self.flow_cnecs.iter().any(|c| c.state == candidate)
            || self
                .network_actions
                .iter()
                .any(|na| na.references_state(&candidate))
            || self
                .range_actions
                .iter()
                .any(|ra| ra.references_state(&candidate));
        referenced.then_some(candidate)
    }

    /// All states referenced by the catalog, preventive state included.
    pub fn states(&self) -> BTreeSet<State> {
        let mut states: BTreeSet<State> = self.flow_cnecs.iter().map(|c| c.state.clone()).collect();
        if let Ok(preventive) = self.preventive_state() {
            states.insert(preventive);
        }
        for contingency in &self.contingencies {
            for instant in &self.instants {
                if instant.is_preventive() {
                    continue;
                }
                if let Some(state) = self.state(&contingency.id, instant) {
                    states.insert(state);
                }
            }
        }
        states
    }

    pub fn cnec(&self, id: &str) -> Option<&FlowCnec> {
        self.flow_cnecs.iter().find(|c| c.id == id)
    }

    pub fn cnecs_of_state(&self, state: &State) -> Vec<&FlowCnec> {
        self.flow_cnecs.iter().filter(|c| &c.state == state).collect()
    }

    pub fn has_cnecs_on(&self, state: &State) -> bool {
        self.flow_cnecs.iter().any(|c| &c.state == state)
    }

    pub fn loop_flow_cnecs(&self) -> Vec<&FlowCnec> {
        self.flow_cnecs.iter().filter(|c| c.is_loop_flow_monitored()).collect()
    }

    pub fn network_action(&self, id: &str) -> Option<&NetworkAction> {
        self.network_actions.iter().find(|a| a.id == id)
    }

    pub fn range_action(&self, id: &str) -> Option<&RangeAction> {
        self.range_actions.iter().find(|a| a.id == id)
    }

    /// Network actions whose usage rules do not exclude `state`.
    pub fn potentially_available_network_actions(&self, state: &State) -> Vec<&NetworkAction> {
        self.network_actions
            .iter()
            .filter(|a| a.is_potentially_available(state))
            .collect()
    }

    /// Range actions whose usage rules do not exclude `state`.
    pub fn potentially_available_range_actions(&self, state: &State) -> Vec<&RangeAction> {
        self.range_actions
            .iter()
            .filter(|a| a.is_potentially_available(state))
            .collect()
    }

    pub fn any_available_remedial_action(&self, state: &State) -> bool {
        !self.potentially_available_network_actions(state).is_empty()
            || !self.potentially_available_range_actions(state).is_empty()
    }

    /// Usage limits for an instant; empty limits if none are configured.
    pub fn usage_limits(&self, instant_id: &str) -> RaUsageLimits {
        self.ra_usage_limits.get(instant_id).cloned().unwrap_or_default()
    }

    /// All operators appearing on CNECs or remedial actions.
    pub fn operators(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        out.extend(self.flow_cnecs.iter().filter_map(|c| c.operator.clone()));
        out.extend(self.network_actions.iter().filter_map(|a| a.operator.clone()));
        out.extend(self.range_actions.iter().filter_map(|a| a.operator.clone()));
        out
    }

    /// Check catalog invariants. Called once before any optimization starts.
    pub fn validate(&self) -> RaoResult<()> {
        let preventive: Vec<&Instant> =
            self.instants.iter().filter(|i| i.kind == InstantKind::Preventive).collect();
        if preventive.len() != 1 {
            return Err(RaoError::UnsupportedConfiguration(format!(
                "CRAC must define exactly one preventive instant, found {}",
                preventive.len()
            )));
        }
        let outage: Vec<&Instant> =
            self.instants.iter().filter(|i| i.kind == InstantKind::Outage).collect();
        if outage.len() > 1 {
            return Err(RaoError::UnsupportedConfiguration(
                "CRAC defines more than one outage instant".into(),
            ));
        }
        if let Some(outage) = outage.first() {
            if !outage.comes_after(preventive[0]) {
                return Err(RaoError::UnsupportedConfiguration(
                    "outage instant must strictly follow the preventive instant".into(),
                ));
            }
            for instant in &self.instants {
                if matches!(instant.kind, InstantKind::Auto | InstantKind::Curative)
                    && !instant.comes_after(outage)
                {
                    return Err(RaoError::UnsupportedConfiguration(format!(
                        "instant {} must strictly follow the outage instant",
                        instant.id
                    )));
                }
            }
        }

        let mut ids = BTreeSet::new();
        for id in self
            .flow_cnecs
            .iter()
            .map(|c| &c.id)
            .chain(self.network_actions.iter().map(|a| &a.id))
            .chain(self.range_actions.iter().map(|a| &a.id))
        {
            if !ids.insert(id.clone()) {
                return Err(RaoError::Validation(format!("duplicate identifier: {}", id)));
            }
        }

        for cnec in &self.flow_cnecs {
            if cnec.thresholds.is_empty() {
                return Err(RaoError::Validation(format!("CNEC {} has no threshold", cnec.id)));
            }
            if cnec.thresholds.iter().any(|t| t.min.is_none() && t.max.is_none()) {
                return Err(RaoError::Validation(format!(
                    "CNEC {} has a threshold with neither min nor max",
                    cnec.id
                )));
            }
            if let Some(c) = &cnec.contingency_id() {
                if !self.contingencies.iter().any(|k| &k.id == c) {
                    return Err(RaoError::Validation(format!(
                        "CNEC {} references unknown contingency {}",
                        cnec.id, c
                    )));
                }
            }
        }

        for ra in &self.range_actions {
            if ra.min_setpoint > ra.max_setpoint {
                return Err(RaoError::Validation(format!(
                    "range action {} has min setpoint above max",
                    ra.id
                )));
            }
        }

        // Aligned range actions must share one setpoint, so their admissible
        // ranges must be identical.
        let mut groups: BTreeMap<&String, Vec<&RangeAction>> = BTreeMap::new();
        for ra in &self.range_actions {
            if let Some(group) = &ra.group_id {
                groups.entry(group).or_default().push(ra);
            }
        }
        for (group, members) in groups {
            let first = members[0];
            if members.iter().any(|ra| {
                ra.min_setpoint != first.min_setpoint || ra.max_setpoint != first.max_setpoint
            }) {
                return Err(RaoError::UnsupportedConfiguration(format!(
                    "aligned range actions of group {} have different admissible ranges",
                    group
                )));
            }
        }

        Ok(())
    }
}

impl FlowCnec {
    fn contingency_id(&self) -> Option<String> {
        self.state.contingency.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preventive() -> Instant {
        Instant::new("preventive", InstantKind::Preventive, 0)
    }

    fn cnec_with_max(max_mw: f64) -> FlowCnec {
        FlowCnec {
            id: "cnec1".into(),
            name: "cnec1".into(),
            network_element: "line1".into(),
            state: State::preventive(preventive()),
            thresholds: vec![Threshold::max_mw(Side::One, max_mw)],
            optimized: true,
            monitored: false,
            operator: None,
            nominal_voltage_kv: 400.0,
            reliability_margin_mw: 0.0,
            loop_flow_threshold_mw: None,
        }
    }

    #[test]
    fn test_margin_sign_convention() {
        let cnec = cnec_with_max(1000.0);
        assert!((cnec.margin_mw(800.0, Side::One) - 200.0).abs() < 1e-9);
        assert!((cnec.margin_mw(1200.0, Side::One) + 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_margin_uses_most_restrictive_threshold() {
        let mut cnec = cnec_with_max(1000.0);
        cnec.thresholds.push(Threshold::max_mw(Side::One, 900.0));
        assert!((cnec.margin_mw(800.0, Side::One) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_reliability_margin_tightens_bounds() {
        let mut cnec = cnec_with_max(1000.0);
        cnec.reliability_margin_mw = 50.0;
        assert_eq!(cnec.upper_bound_mw(Side::One), Some(950.0));
        assert_eq!(cnec.lower_bound_mw(Side::One), Some(-950.0));
    }

    #[test]
    fn test_unmonitored_side_has_infinite_margin() {
        let cnec = cnec_with_max(1000.0);
        assert!(cnec.margin_mw(5000.0, Side::Two).is_infinite());
    }

    #[test]
    fn test_state_ordering_is_deterministic() {
        let outage = Instant::new("outage", InstantKind::Outage, 1);
        let curative = Instant::new("curative", InstantKind::Curative, 2);
        let mut states = vec![
            State::new("co2", curative.clone()),
            State::new("co1", curative.clone()),
            State::new("co1", outage.clone()),
        ];
        states.sort();
        assert_eq!(states[0].instant.id, "outage");
        assert_eq!(states[1].contingency.as_deref(), Some("co1"));
        assert_eq!(states[2].contingency.as_deref(), Some("co2"));
    }

    #[test]
    fn test_validate_rejects_outage_before_preventive() {
        let mut crac = Crac::new("test");
        crac.instants = vec![
            Instant::new("outage", InstantKind::Outage, 0),
            Instant::new("preventive", InstantKind::Preventive, 1),
        ];
        assert!(crac.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_curative_before_outage() {
        let mut crac = Crac::new("test");
        crac.instants = vec![
            Instant::new("preventive", InstantKind::Preventive, 0),
            Instant::new("curative", InstantKind::Curative, 1),
            Instant::new("outage", InstantKind::Outage, 2),
        ];
        assert!(crac.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_well_ordered_instants() {
        let mut crac = Crac::new("test");
        crac.instants = vec![
            Instant::new("preventive", InstantKind::Preventive, 0),
            Instant::new("outage", InstantKind::Outage, 1),
            Instant::new("auto", InstantKind::Auto, 2),
            Instant::new("curative", InstantKind::Curative, 3),
        ];
        assert!(crac.validate().is_ok());
    }
}
