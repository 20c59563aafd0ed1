//! Runtime units for monitored quantities.
//!
//! Thresholds in a CRAC catalog are unit-tagged data: a monitored element can
//! carry limits in megawatts, amperes, degrees or kilovolts, and the objective
//! function is scaled to a configured unit. Units are therefore a runtime
//! enum here rather than compile-time newtypes.
//!
//! Flow conversions between MW and A need the nominal voltage of the
//! monitored element: `I [A] = P [MW] * 1000 / (sqrt(3) * Vnom [kV])`.

use serde::{Deserialize, Serialize};

/// Unit of a threshold or of the objective function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    /// Active power flow (MW)
    Megawatt,
    /// Current (A)
    Ampere,
    /// Angle (degrees)
    Degree,
    /// Voltage (kV)
    Kilovolt,
    /// Discrete tap position
    Tap,
}

impl Unit {
    /// Whether this unit can express a branch flow.
    pub fn is_flow_unit(self) -> bool {
        matches!(self, Unit::Megawatt | Unit::Ampere)
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unit::Megawatt => write!(f, "MW"),
            Unit::Ampere => write!(f, "A"),
            Unit::Degree => write!(f, "°"),
            Unit::Kilovolt => write!(f, "kV"),
            Unit::Tap => write!(f, "tap"),
        }
    }
}

/// Multiplier converting a flow expressed in `from` into `to`, for an element
/// at the given nominal voltage.
///
/// Only MW↔A conversions are meaningful; identical units return 1.0.
pub fn flow_unit_multiplier(from: Unit, to: Unit, nominal_voltage_kv: f64) -> f64 {
    match (from, to) {
        (Unit::Megawatt, Unit::Ampere) => 1000.0 / (3f64.sqrt() * nominal_voltage_kv),
        (Unit::Ampere, Unit::Megawatt) => 3f64.sqrt() * nominal_voltage_kv / 1000.0,
        _ => 1.0,
    }
}
