//! State/perimeter decomposition.
//!
//! Partitions all (contingency, instant) states of a catalog into the
//! minimal set of independently optimizable perimeters: one preventive
//! perimeter, and per contingency an optional automaton perimeter plus zero
//! or more curative perimeters. A state lands in its own perimeter only if
//! remedial actions can actually be decided there; everything else is
//! covered by the nearest earlier decision state. One exception: when
//! automaton actions exist, curative monitored elements with no reachable
//! curative decision state get a default perimeter of their own, so they
//! are evaluated after the automaton rather than under the preventive
//! decisions.
//!
//! The decomposition is a pure function of the catalog and deterministic:
//! contingencies and states are visited in their catalog order, collections
//! are ordered.

use rao_core::{Crac, InstantKind, RaoError, RaoResult, State};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// One independently optimizable unit: a decision state plus the states it
/// secures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Perimeter {
    /// Where remedial-action decisions are made.
    pub optimization_state: State,
    /// States evaluated under those decisions, never causally before the
    /// optimization state.
    pub covered_states: BTreeSet<State>,
}

impl Perimeter {
    pub fn new(optimization_state: State) -> Self {
        Self { optimization_state, covered_states: BTreeSet::new() }
    }

    /// Optimization state plus covered states.
    pub fn all_states(&self) -> BTreeSet<State> {
        let mut states = self.covered_states.clone();
        states.insert(self.optimization_state.clone());
        states
    }
}

/// Per-contingency slice of the decomposition, perimeters ordered by
/// instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContingencyScenario {
    pub contingency_id: String,
    pub automaton_perimeter: Option<Perimeter>,
    pub curative_perimeters: Vec<Perimeter>,
}

impl ContingencyScenario {
    pub fn perimeters(&self) -> impl Iterator<Item = &Perimeter> {
        self.automaton_perimeter.iter().chain(self.curative_perimeters.iter())
    }
}

/// The full decomposition of one catalog.
#[derive(Debug, Clone)]
pub struct StateTree {
    pub preventive_perimeter: Perimeter,
    pub contingency_scenarios: Vec<ContingencyScenario>,
    /// Operators with curative monitored elements but no curative remedial
    /// action of their own; their elements are frozen at pre-perimeter
    /// margins in curative optimizations.
    pub operators_not_sharing_cras: BTreeSet<String>,
}

impl StateTree {
    /// Decompose `crac` into perimeters.
    ///
    /// Fails with [`RaoError::UnsupportedConfiguration`] if any outage state
    /// carries usable remedial actions: nothing can be decided between the
    /// contingency and the first automaton/curative instant.
    pub fn build(crac: &Crac) -> RaoResult<Self> {
        let mut preventive_perimeter = Perimeter::new(crac.preventive_state()?);
        let mut contingency_scenarios = Vec::new();

        for contingency in &crac.contingencies {
            let mut scenario = ContingencyScenario {
                contingency_id: contingency.id.clone(),
                automaton_perimeter: None,
                curative_perimeters: Vec::new(),
            };

            if let Some(outage) = crac.outage_instant() {
                if let Some(state) = crac.state(&contingency.id, outage) {
                    if crac.any_available_remedial_action(&state) {
                        return Err(RaoError::UnsupportedConfiguration(format!(
                            "remedial actions available at outage state {}",
                            state
                        )));
                    }
                    if crac.has_cnecs_on(&state) {
                        preventive_perimeter.covered_states.insert(state);
                    }
                }
            }

            let mut automaton_cnecs_exist = false;
            for auto in crac.instants_of_kind(InstantKind::Auto) {
                let Some(state) = crac.state(&contingency.id, auto) else { continue };
                let has_cnecs = crac.has_cnecs_on(&state);
                if crac.any_available_remedial_action(&state) {
                    if scenario.automaton_perimeter.is_none() {
                        debug!(state = %state, "automaton perimeter");
                        automaton_cnecs_exist = has_cnecs;
                        scenario.automaton_perimeter = Some(Perimeter::new(state));
                        continue;
                    }
                    warn!(state = %state, "several automaton instants, keeping the first");
                }
                if has_cnecs {
                    debug!(state = %state, "no automaton action, folding into preventive");
                    preventive_perimeter.covered_states.insert(state);
                }
            }
            let automaton_actions_exist = scenario.automaton_perimeter.is_some();

            // (state, has cnecs, has actions) per curative instant, in
            // causal order
            let curative_states: Vec<(State, bool, bool)> = crac
                .instants_of_kind(InstantKind::Curative)
                .into_iter()
                .filter_map(|instant| crac.state(&contingency.id, instant))
                .map(|state| {
                    let cnecs = crac.has_cnecs_on(&state);
                    let actions = crac.any_available_remedial_action(&state);
                    (state, cnecs, actions)
                })
                .collect();

            // Default perimeter for curative CNECs with no reachable decision
            // state: preventive, unless automaton actions exist (then their
            // effect must be seen, so the first CNEC-bearing curative instant
            // becomes its own perimeter)
            let mut curative_default: Option<Perimeter> = if automaton_actions_exist {
                curative_states
                    .iter()
                    .find(|(_, cnecs, _)| *cnecs)
                    .map(|(state, _, _)| Perimeter::new(state.clone()))
            } else {
                None
            };
            let mut default_used = false;

            let mut perimeters: BTreeMap<State, Perimeter> = BTreeMap::new();
            for (index, (state, cnecs, _)) in curative_states.iter().enumerate() {
                if !*cnecs {
                    continue;
                }
                // Nearest non-later curative instant with available actions
                let binding = curative_states[..=index]
                    .iter()
                    .rev()
                    .find(|(_, _, actions)| *actions)
                    .map(|(decision, _, _)| decision.clone());
                match binding {
                    Some(decision) => {
                        let perimeter = perimeters
                            .entry(decision.clone())
                            .or_insert_with(|| Perimeter::new(decision));
                        if state != &perimeter.optimization_state {
                            perimeter.covered_states.insert(state.clone());
                        }
                    }
                    None => match curative_default.as_mut() {
                        Some(default) => {
                            default_used = true;
                            if state != &default.optimization_state {
                                default.covered_states.insert(state.clone());
                            }
                        }
                        None => {
                            debug!(state = %state, "no curative actions, folding into preventive");
                            preventive_perimeter.covered_states.insert(state.clone());
                        }
                    },
                }
            }

            // An instant with actions but no monitored elements still gets a
            // perimeter when a later instant carries monitored elements: its
            // actions affect those future flows
            for (index, (state, cnecs, actions)) in curative_states.iter().enumerate() {
                if *cnecs || !*actions {
                    continue;
                }
                if curative_states[index + 1..].iter().any(|(_, later, _)| *later) {
                    perimeters
                        .entry(state.clone())
                        .or_insert_with(|| Perimeter::new(state.clone()));
                }
            }

            if default_used {
                scenario.curative_perimeters.extend(curative_default);
            }
            scenario.curative_perimeters.extend(perimeters.into_values());
            scenario
                .curative_perimeters
                .sort_by(|a, b| a.optimization_state.cmp(&b.optimization_state));

            if automaton_cnecs_exist || !scenario.curative_perimeters.is_empty() {
                contingency_scenarios.push(scenario);
            } else if automaton_actions_exist {
                warn!(
                    contingency = %contingency.id,
                    "automaton actions but no monitored element to secure, dropping scenario"
                );
            }
        }

        let operators_not_sharing_cras = operators_without_curative_actions(crac);

        Ok(Self { preventive_perimeter, contingency_scenarios, operators_not_sharing_cras })
    }

    /// Every state optimized or covered by some perimeter.
    pub fn all_states(&self) -> BTreeSet<State> {
        let mut states = self.preventive_perimeter.all_states();
        for scenario in &self.contingency_scenarios {
            for perimeter in scenario.perimeters() {
                states.extend(perimeter.all_states());
            }
        }
        states
    }
}

fn operators_without_curative_actions(crac: &Crac) -> BTreeSet<String> {
    let curative_cnec_operators: BTreeSet<String> = crac
        .flow_cnecs
        .iter()
        .filter(|c| c.state.instant.is_curative())
        .filter_map(|c| c.operator.clone())
        .collect();

    let mut sharing = BTreeSet::new();
    for contingency in &crac.contingencies {
        for curative in crac.instants_of_kind(InstantKind::Curative) {
            let state = State::new(&contingency.id, curative.clone());
            sharing.extend(
                crac.potentially_available_network_actions(&state)
                    .iter()
                    .filter_map(|a| a.operator.clone()),
            );
            sharing.extend(
                crac.potentially_available_range_actions(&state)
                    .iter()
                    .filter_map(|a| a.operator.clone()),
            );
        }
    }

    curative_cnec_operators.difference(&sharing).cloned().collect()
}
