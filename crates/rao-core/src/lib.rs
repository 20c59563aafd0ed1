//! # rao-core: Remedial Action Optimization Core Model
//!
//! Provides the fundamental data structures for remedial-action optimization
//! of transmission networks under contingency risk.
//!
//! ## Design Philosophy
//!
//! A security study is described by a **CRAC** catalog:
//! - **Instants**: causally ordered stages (preventive, outage, auto, curative)
//! - **States**: `(contingency?, instant)` operating conditions to secure
//! - **CNECs**: monitored elements with operating thresholds per side and unit
//! - **Remedial actions**: discrete network actions and continuous range
//!   actions with usage rules and usage-count limits
//!
//! The catalog is immutable during optimization; every engine query on it is
//! deterministic (ordered collections throughout). The physical network is
//! represented by a variant-managed [`Network`] handle carrying the applied
//! remedial state; the electrical solution itself comes from an external
//! sensitivity oracle consumed by `rao-algo`.
//!
//! ## Quick Start
//!
//! ```rust
//! use rao_core::*;
//!
//! let mut crac = Crac::new("study");
//! crac.instants = vec![
//!     Instant::new("preventive", InstantKind::Preventive, 0),
//!     Instant::new("outage", InstantKind::Outage, 1),
//!     Instant::new("curative", InstantKind::Curative, 2),
//! ];
//! crac.contingencies.push(Contingency::new("co1", vec!["line2".into()]));
//! crac.flow_cnecs.push(FlowCnec {
//!     id: "cnec1".into(),
//!     name: "line1 after co1".into(),
//!     network_element: "line1".into(),
//!     state: State::new("co1", crac.instant("curative").unwrap().clone()),
//!     thresholds: vec![Threshold::max_mw(Side::One, 1000.0)],
//!     optimized: true,
//!     monitored: false,
//!     operator: Some("op1".into()),
//!     nominal_voltage_kv: 400.0,
//!     reliability_margin_mw: 0.0,
//!     loop_flow_threshold_mw: None,
//! });
//! crac.validate().unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`crac`] - Catalog model and queries
//! - [`remedial`] - Network actions, range actions, usage rules
//! - [`network`] - Variant-managed network handle
//! - [`units`] - Runtime units and flow conversions
//! - [`error`] - Unified error type

pub mod crac;
pub mod error;
pub mod network;
pub mod remedial;
pub mod units;

pub use crac::{Contingency, Crac, FlowCnec, Instant, InstantKind, Side, State, Threshold};
pub use error::{RaoError, RaoResult};
pub use network::{Network, VariantState, BASE_VARIANT};
pub use remedial::{
    ElementaryAction, NetworkAction, RaUsageLimits, RangeAction, RangeActionKind, UsageMethod,
    UsageRule,
};
pub use units::{flow_unit_multiplier, Unit};
