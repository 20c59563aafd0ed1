//! Variant-managed network handle.
//!
//! The physical network model and its electrical solution live outside this
//! workspace; what the optimizer needs is a mutable carrier for the remedial
//! state it decides on: which elements are switched, which injections are
//! overridden, and which range-action setpoints are applied. The sensitivity
//! oracle reads this carrier when computing flows.
//!
//! The handle supports cheap named snapshots ("variants"): remedial actions
//! are always applied to the working variant, and workers that must apply
//! actions temporarily do so on a disposable variant that is discarded
//! afterwards. The base variant can never be removed. `Network` is
//! `Clone + Send` so each parallel worker owns its own copy.

use crate::error::{RaoError, RaoResult};
use crate::remedial::{ElementaryAction, NetworkAction, RangeAction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of the variant every network starts with.
pub const BASE_VARIANT: &str = "base";

/// Remedial state recorded on one variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantState {
    /// Elements currently switched open.
    pub open_elements: BTreeSet<String>,
    /// Injection overrides (MW), keyed by element.
    pub injection_overrides_mw: BTreeMap<String, f64>,
    /// Range-action setpoints (PST angle in degrees, HVDC flow in MW),
    /// keyed by the controlled element.
    pub setpoints: BTreeMap<String, f64>,
}

/// A network handle with named, disposable variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    variants: BTreeMap<String, VariantState>,
    working: String,
}

impl Network {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_initial_state(id, VariantState::default())
    }

    /// Create a network whose base variant starts from a given remedial
    /// state (e.g. initial PST positions).
    pub fn with_initial_state(id: impl Into<String>, initial: VariantState) -> Self {
        let mut variants = BTreeMap::new();
        variants.insert(BASE_VARIANT.to_string(), initial);
        Self { id: id.into(), variants, working: BASE_VARIANT.to_string() }
    }

    pub fn working_variant(&self) -> &str {
        &self.working
    }

    pub fn variant_ids(&self) -> Vec<&str> {
        self.variants.keys().map(String::as_str).collect()
    }

    /// Snapshot `src` under the name `dst`, overwriting any existing `dst`.
    pub fn clone_variant(&mut self, src: &str, dst: &str) -> RaoResult<()> {
        let state = self
            .variants
            .get(src)
            .cloned()
            .ok_or_else(|| RaoError::Network(format!("unknown variant {}", src)))?;
        self.variants.insert(dst.to_string(), state);
        Ok(())
    }

    pub fn set_working_variant(&mut self, id: &str) -> RaoResult<()> {
        if !self.variants.contains_key(id) {
            return Err(RaoError::Network(format!("unknown variant {}", id)));
        }
        self.working = id.to_string();
        Ok(())
    }

    /// Remove a variant. The base variant cannot be removed; removing the
    /// working variant resets the working variant to base.
    pub fn remove_variant(&mut self, id: &str) -> RaoResult<()> {
        if id == BASE_VARIANT {
            return Err(RaoError::Network("cannot remove the base variant".into()));
        }
        if self.variants.remove(id).is_none() {
            return Err(RaoError::Network(format!("unknown variant {}", id)));
        }
        if self.working == id {
            self.working = BASE_VARIANT.to_string();
        }
        Ok(())
    }

    /// Remedial state of the working variant.
    pub fn state(&self) -> &VariantState {
        // The working variant is kept valid by construction.
        &self.variants[&self.working]
    }

    fn state_mut(&mut self) -> &mut VariantState {
        self.variants.get_mut(&self.working).expect("working variant exists")
    }

    /// Apply a discrete action to the working variant.
    pub fn apply_network_action(&mut self, action: &NetworkAction) {
        for elementary in &action.elementary_actions {
            match elementary {
                ElementaryAction::OpenBranch { element } => {
                    self.state_mut().open_elements.insert(element.clone());
                }
                ElementaryAction::CloseBranch { element } => {
                    self.state_mut().open_elements.remove(element);
                }
                ElementaryAction::InjectionSetpoint { element, setpoint_mw } => {
                    self.state_mut()
                        .injection_overrides_mw
                        .insert(element.clone(), *setpoint_mw);
                }
            }
        }
    }

    /// Apply a range-action setpoint to the working variant.
    pub fn apply_range_action(&mut self, action: &RangeAction, setpoint: f64) {
        self.state_mut().setpoints.insert(action.network_element.clone(), setpoint);
    }

    pub fn setpoint(&self, element: &str) -> Option<f64> {
        self.state().setpoints.get(element).copied()
    }

    pub fn is_open(&self, element: &str) -> bool {
        self.state().open_elements.contains(element)
    }
}
