//! # rao-algo: Remedial Action Optimization Engine
//!
//! This crate implements the optimization engine for securing a transmission
//! network under contingency risk: given a `rao-core` catalog, a network
//! handle and a sensitivity oracle, it finds the combination of discrete and
//! continuous remedial actions that maximizes the worst operating margin at
//! minimum cost, per causal stage and per contingency.
//!
//! ## Pipeline
//!
//! 1. **[`StateTree`]** partitions all states into independent perimeters:
//!    one preventive perimeter plus per-contingency automaton/curative
//!    perimeters, based on where remedial actions can actually be decided.
//! 2. **[`SearchTree`]** explores discrete action combinations for one
//!    perimeter, one added action per depth, siblings in parallel.
//! 3. Each leaf runs the **iterating linear optimizer** ([`linear`]):
//!    solve an LP built from composable fillers around the latest
//!    sensitivity point, re-evaluate with the oracle, accept on strict
//!    improvement.
//! 4. The **[`ObjectiveFunction`]** combines the signed worst-margin
//!    functional cost with virtual penalties (monitored-element violations,
//!    loop-flow excesses, sensitivity failures).
//!
//! External solvers stay external: load flow and sensitivities come from a
//! [`SensitivityProvider`] implementation, and the LP backend is selected by
//! feature (`solver-clarabel` by default, `solver-highs` as an alternative).
//!
//! ## Example
//!
//! ```ignore
//! use rao_algo::{run, RaoInput, RaoParameters};
//!
//! let result = run(
//!     &RaoInput { crac: &crac, network: &network, oracle: &oracle },
//!     &RaoParameters::default(),
//! )?;
//! println!("secure: {}", result.is_secure());
//! ```
//!
//! ## Failure model
//!
//! Only configuration-time invariant violations are hard errors. Solver
//! infeasibility and sensitivity failures are statuses that degrade one
//! leaf or one perimeter; the run always returns its best-effort result.

pub mod linear;
pub mod objective;
pub mod params;
pub mod rao;
pub mod results;
pub mod search_tree;
pub mod sensitivity;
pub mod state_tree;
pub mod test_utils;

pub use linear::{
    IteratingLinearOptimizerInput, LinearOptimizationResult, LinearOptimizationStatus,
    LinearProblem, LinearProblemStatus, ProblemFiller,
};
pub use objective::{CostEvaluator, CostlyElement, ObjectiveFunction, ObjectiveFunctionResult};
pub use params::{
    CurativeStopCriterion, LoopFlowParameters, MnecParameters, ObjectiveFunctionType,
    ObjectiveParameters, PreventiveStopCriterion, PstModel, RangeActionParameters, RaoParameters,
    StopCriterion, TopoParameters, TreeParameters,
};
pub use rao::{run, RaoInput};
pub use results::{PerimeterResult, PrePerimeterResult, RangeActionActivation, RaoRunResult};
pub use search_tree::{Leaf, SearchTree, SearchTreeInput};
pub use sensitivity::{
    AppliedRemedialActions, ComputationStatus, FlowResult, SensitivityComputer, SensitivityOutput,
    SensitivityProvider, SensitivityStatus, VariantGuard,
};
pub use state_tree::{ContingencyScenario, Perimeter, StateTree};
